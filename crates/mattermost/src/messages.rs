//! Markdown replies the bot posts. All user-facing copy lives here.

use chrono::Weekday;

use summarybot_core::domain::message::ChannelDigest;
use summarybot_core::domain::subscription::{Frequency, ScheduleTime, Subscription};

const MANAGE_FOOTER: &str = "💡 *Для управления подписками напишите боту в личку*";

const NATURAL_EXAMPLE: &str = "```\n~канал1, ~канал2 ежедневно в 9 утра\n```";

/// Line-oriented markdown assembly.
#[derive(Default)]
pub struct MarkdownBuilder {
    lines: Vec<String>,
}

impl MarkdownBuilder {
    pub fn new(heading: impl Into<String>) -> Self {
        Self { lines: vec![heading.into()] }
    }

    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.lines.push(text.into());
        self
    }

    pub fn blank(self) -> Self {
        self.line("")
    }

    pub fn bullet(self, text: impl AsRef<str>) -> Self {
        let line = format!("• {}", text.as_ref());
        self.line(line)
    }

    pub fn bullets<I, S>(self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        items.into_iter().fold(self, |builder, item| builder.bullet(item))
    }

    pub fn build(self) -> String {
        self.lines.join("\n")
    }
}

pub fn frequency_label(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Daily => "ежедневно",
        Frequency::Weekly => "еженедельно",
    }
}

/// Dative plural used after "по": "по вторникам".
pub fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "понедельникам",
        Weekday::Tue => "вторникам",
        Weekday::Wed => "средам",
        Weekday::Thu => "четвергам",
        Weekday::Fri => "пятницам",
        Weekday::Sat => "субботам",
        Weekday::Sun => "воскресеньям",
    }
}

pub fn cadence_label(frequency: Frequency, weekday: Option<Weekday>) -> String {
    match (frequency, weekday) {
        (Frequency::Weekly, Some(weekday)) => {
            format!("{} по {}", frequency_label(frequency), weekday_label(weekday))
        }
        _ => frequency_label(frequency).to_string(),
    }
}

fn channel_mentions(channels: &[String]) -> String {
    channels.iter().map(|channel| format!("~{channel}")).collect::<Vec<_>>().join(", ")
}

fn management_hints(builder: MarkdownBuilder) -> MarkdownBuilder {
    builder.line("**Управление подписками:**").bullets([
        "`подписки` - посмотреть текущие подписки",
        "`удалить подписку` - выбрать подписку для удаления",
        "`удалить все подписки` - удалить все подписки сразу",
    ])
}

pub fn subscription_list(subscriptions: &[Subscription]) -> String {
    if subscriptions.is_empty() {
        return MarkdownBuilder::new("📋 **Ваши подписки**")
            .blank()
            .line("У вас пока нет активных подписок.")
            .blank()
            .line("**Чтобы создать подписку:**")
            .line("Отправьте сообщение в одном из форматов:")
            .line("```")
            .line("~канал1, ~канал2 ежедневно в 9 утра")
            .line("~канал1, ~канал2 еженедельно по вторникам в 18:00")
            .line("~канал1 каждую среду в 6 вечера")
            .line("~канал1 вторник 18:00")
            .line("```")
            .blank()
            .line("💡 **Важно:** В Mattermost символ `~` необходим для выбора канала!")
            .build();
    }

    let mut builder = MarkdownBuilder::new("📋 **Ваши подписки**").blank();
    for (position, subscription) in subscriptions.iter().enumerate() {
        builder = builder
            .line(format!(
                "**{}.** Каналы: {}",
                position + 1,
                channel_mentions(&subscription.channels)
            ))
            .line(format!("   Время: {}", subscription.schedule_time))
            .line(format!(
                "   Частота: {}",
                cadence_label(subscription.frequency, subscription.weekday)
            ))
            .line(format!("   Создано: {}", subscription.created_at.format("%Y-%m-%d")))
            .blank();
    }

    builder
        .line("**Управление подписками:**")
        .bullets([
            "`удалить подписку` - выбрать подписку для удаления",
            "`удалить все подписки` - удалить все подписки сразу",
            "`создать подписку` - создать новую подписку",
        ])
        .blank()
        .line("**Примеры новых подписок:**")
        .bullets([
            "`~general ежедневно в 9 утра`",
            "`~random, ~development еженедельно по пятницам в 18:00`",
            "`~marketing каждую среду в 15:30`",
        ])
        .build()
}

pub fn delete_prompt(subscriptions: &[Subscription]) -> String {
    let builder = subscriptions.iter().enumerate().fold(
        MarkdownBuilder::new("🗑️ **Выберите подписку для удаления:**").blank(),
        |builder, (position, subscription)| {
            builder.line(format!(
                "**{}.** {} - {} в {}",
                position + 1,
                channel_mentions(&subscription.channels),
                cadence_label(subscription.frequency, subscription.weekday),
                subscription.schedule_time
            ))
        },
    );

    builder
        .blank()
        .line("📝 **Как удалить:**")
        .bullets([
            "Напишите **номер подписки** (например: `1`)",
            "Или напишите `все` для удаления всех подписок",
            "Или напишите `отмена` для отмены операции",
        ])
        .build()
}

pub fn nothing_to_delete() -> String {
    MarkdownBuilder::new("❌ **Нет подписок для удаления**")
        .blank()
        .line("У вас нет активных подписок.")
        .blank()
        .line("Чтобы создать подписку, отправьте сообщение в формате:")
        .line(NATURAL_EXAMPLE)
        .build()
}

pub fn deletion_cancelled() -> String {
    "❌ **Операция отменена**\n\nУдаление подписки отменено.".to_string()
}

pub fn subscription_deleted(subscription: &Subscription) -> String {
    MarkdownBuilder::new("✅ **Подписка удалена**")
        .blank()
        .line(format!(
            "Подписка на каналы {} была успешно удалена.",
            channel_mentions(&subscription.channels)
        ))
        .blank()
        .line("**Управление подписками:**")
        .bullets([
            "`подписки` - посмотреть оставшиеся подписки",
            "`удалить подписку` - удалить ещё одну подписку",
        ])
        .build()
}

pub fn deletion_failed() -> String {
    "❌ **Ошибка удаления**\n\nНе удалось удалить подписку. Попробуйте позже.".to_string()
}

pub fn invalid_choice(count: usize) -> String {
    format!("❌ **Неверный номер**\n\nВведите число от 1 до {count}.")
}

pub fn invalid_dialog_reply() -> String {
    MarkdownBuilder::new("❌ **Неверный формат**")
        .blank()
        .line("Введите:")
        .bullets([
            "**Номер подписки** (например: `1`)",
            "`все` для удаления всех подписок",
            "`отмена` для отмены операции",
        ])
        .build()
}

pub fn all_deleted() -> String {
    MarkdownBuilder::new("✅ **Все подписки удалены**")
        .blank()
        .line("Все ваши подписки были успешно удалены.")
        .blank()
        .line("Чтобы создать новую подписку, отправьте сообщение в формате:")
        .line(NATURAL_EXAMPLE)
        .build()
}

pub fn all_deletion_failed() -> String {
    "❌ **Ошибка удаления**\n\nНе удалось удалить подписки. Попробуйте позже.".to_string()
}

pub fn help(bot_username: &str) -> String {
    MarkdownBuilder::new("🤖 **Привет! Я Summary Bot**")
        .blank()
        .line("Я умею создавать саммари обсуждений в Mattermost и отправлять регулярные сводки по каналам.")
        .blank()
        .line("📋 **В каналах:**")
        .bullet(format!("Добавьте меня в канал: `/invite @{bot_username}`"))
        .bullet("Напишите команду для создания саммари: `!summary`, `summary`, `саммари`, `!саммари`")
        .blank()
        .line("📊 **Подписки на каналы:**")
        .bullet("Создайте подписку для получения регулярных сводок")
        .bullet("Сводки приходят в личные сообщения по расписанию")
        .blank()
        .line("**Команды управления подписками:**")
        .bullets([
            "`подписки` - посмотреть текущие подписки",
            "`удалить подписку` - выбрать подписку для удаления",
            "`удалить все подписки` - удалить все подписки сразу",
            "`создать подписку` - получить инструкцию по созданию",
        ])
        .blank()
        .line("**Примеры:**")
        .line("```")
        .line("~general, ~random ежедневно в 9 утра")
        .line("~development, ~qa каждую неделю по средам в 18:00")
        .line("general,random ~ 09:00 ~ daily")
        .line("```")
        .blank()
        .line(format!("💡 **Важно:** бот должен быть добавлен в каналы командой `/invite @{bot_username}`"))
        .build()
}

pub fn create_help(bot_username: &str) -> String {
    MarkdownBuilder::new("📝 **Создание подписки**")
        .blank()
        .line("Просто отправьте сообщение в естественном формате:")
        .line("```")
        .line("~канал1, ~канал2 ежедневно в 9 утра")
        .line("~канал1, ~канал2 еженедельно по вторникам в 18:00")
        .line("~канал1 каждую среду в 6 вечера")
        .line("~канал1 вторник 18:00")
        .line("~Канал с пробелами ежедневно в 15:20")
        .line("```")
        .blank()
        .line("**Периодичность:**")
        .bullets([
            "`ежедневно` или `каждый день`",
            "`еженедельно` или `каждую неделю`",
            "`каждую среду` или `каждый понедельник`",
            "Просто `вторник`, `среда`, `пятница` и т.д.",
        ])
        .blank()
        .line("**Время:**")
        .bullets(["`в 9 утра` или `в 09:00`", "`в 18:00` или `в 6 вечера`", "просто `18:00`"])
        .blank()
        .line("💡 **Важно:**")
        .line("- В Mattermost символ `~` необходим для выбора канала!")
        .line(format!("- Добавьте бота во все указанные каналы командой `/invite @{bot_username}`"))
        .build()
}

pub fn channel_problems(not_found: &[String], no_access: &[String], bot_username: &str) -> String {
    let mut builder = MarkdownBuilder::new("❌ **Проблемы с каналами:**").blank();
    if !not_found.is_empty() {
        builder = builder
            .line("**Каналы не найдены:**")
            .bullets(not_found.iter().map(|channel| format!("~{channel}")))
            .blank();
    }
    if !no_access.is_empty() {
        builder = builder
            .line("**Нет доступа к каналам:**")
            .bullets(no_access.iter().map(|channel| format!("~{channel}")))
            .blank();
    }

    builder
        .line("**Что нужно сделать:**")
        .line("1. Убедитесь, что названия каналов правильные")
        .line(format!("2. Добавьте бота в эти каналы командой `/invite @{bot_username}`"))
        .line("3. Повторите создание подписки")
        .build()
}

pub fn subscription_created(
    channels: &[String],
    schedule_time: ScheduleTime,
    frequency: Frequency,
    weekday: Option<Weekday>,
) -> String {
    let builder = MarkdownBuilder::new("✅ **Подписка создана!**")
        .blank()
        .line(format!("**Каналы:** {}", channel_mentions(channels)))
        .line(format!("**Время:** {schedule_time}"))
        .line(format!("**Частота:** {}", cadence_label(frequency, weekday)))
        .blank()
        .line("Сводки будут приходить в личные сообщения по расписанию.")
        .blank();
    management_hints(builder).build()
}

pub fn creation_failed() -> String {
    "❌ Ошибка создания подписки. Попробуйте позже.".to_string()
}

pub fn thread_summary_started() -> String {
    "⏳ Готовлю саммари треда...".to_string()
}

pub fn thread_fetch_failed() -> String {
    "❌ Не удалось получить сообщения треда или тред пустой.".to_string()
}

pub fn thread_too_short() -> String {
    "📝 В треде недостаточно сообщений для создания саммари (минимум 2 сообщения).".to_string()
}

pub fn thread_summary_failed() -> String {
    "❌ Не удалось сгенерировать саммари. Возможно, проблемы с LLM сервисом.".to_string()
}

/// Scheduled digest DM: header, per-channel counts, total, the summary body, footer.
pub fn channel_digest(frequency: Frequency, digests: &[ChannelDigest], summary: &str) -> String {
    let header = match frequency {
        Frequency::Daily => "📊 **Ежедневная сводка каналов**",
        Frequency::Weekly => "📊 **Еженедельная сводка каналов**",
    };
    let total: usize = digests.iter().map(|digest| digest.message_count).sum();

    MarkdownBuilder::new(header)
        .blank()
        .line("**Каналы:**")
        .bullets(digests.iter().map(|digest| {
            format!("**{}** ({} сообщений)", digest.display_name, digest.message_count)
        }))
        .blank()
        .line(format!("**Всего сообщений:** {total}"))
        .blank()
        .line("---")
        .blank()
        .line(summary.trim())
        .blank()
        .line("---")
        .blank()
        .line(MANAGE_FOOTER)
        .build()
}

pub fn channel_access_error(channels: &[String], bot_username: &str) -> String {
    MarkdownBuilder::new("❌ **Ошибка доставки сводки**")
        .blank()
        .line("Бот не может получить доступ к следующим каналам:")
        .blank()
        .bullets(channels)
        .blank()
        .line("**Что нужно сделать:**")
        .line(format!("1. Добавьте бота в эти каналы командой `/invite @{bot_username}`"))
        .line("2. Либо удалите их из подписки командой `удалить подписку`")
        .blank()
        .line(MANAGE_FOOTER)
        .build()
}

pub fn no_new_messages(frequency: Frequency, digests: &[ChannelDigest]) -> String {
    let period = match frequency {
        Frequency::Daily => "за последние 24 часа",
        Frequency::Weekly => "за последнюю неделю",
    };

    MarkdownBuilder::new("📊 **Сводка каналов**")
        .blank()
        .line("**Каналы:**")
        .bullets(digests.iter().map(|digest| format!("**{}**", digest.display_name)))
        .blank()
        .line(format!("ℹ️ В отслеживаемых каналах нет новых сообщений {period}."))
        .blank()
        .line(MANAGE_FOOTER)
        .build()
}

pub fn generation_error() -> String {
    MarkdownBuilder::new("❌ **Ошибка генерации сводки**")
        .blank()
        .line("Не удалось создать сводку из-за проблем с AI сервисом.")
        .blank()
        .line("Попробуйте позже или обратитесь к администратору.")
        .blank()
        .line(MANAGE_FOOTER)
        .build()
}
