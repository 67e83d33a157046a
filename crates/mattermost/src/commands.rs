//! Free-text grammar for direct messages sent to the bot.
//!
//! A DM is either a management command (exact phrase), a subscription request in the legacy
//! `channels~HH:MM~frequency` form, a natural-language request such as
//! `~general, ~random ежедневно в 9 утра`, or nothing the bot understands.

use std::sync::OnceLock;

use chrono::Weekday;
use regex::{Captures, Regex};
use thiserror::Error;

use summarybot_core::domain::subscription::{Frequency, ScheduleTime};

/// Channel names recognized without a `~` marker.
pub const KNOWN_CHANNELS: &[&str] =
    &["general", "random", "development", "qa", "marketing", "sales", "support"];

const STOP_WORDS: &[&str] = &[
    "ежедневно", "еженедельно", "каждый", "каждую", "каждое", "каждые", "в", "во", "по", "раз", "и",
    "daily", "weekly", "every", "at", "on", "and",
];

const DAILY_PHRASES: &[&str] = &[
    "ежедневно",
    "каждый день",
    "каждые сутки",
    "каждое утро",
    "каждый вечер",
    "daily",
    "every day",
];

const WEEKLY_PHRASES: &[&str] =
    &["еженедельно", "каждую неделю", "каждые 7 дней", "раз в неделю", "weekly", "every week"];

const EVERY_WORDS: &[&str] = &["каждый", "каждую", "каждое", "every"];
const WEEKDAY_LEADS: &[&str] = &["по", "каждый", "каждую", "каждое", "every", "on"];

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("понедельник", Weekday::Mon),
    ("понедельника", Weekday::Mon),
    ("понедельникам", Weekday::Mon),
    ("пн", Weekday::Mon),
    ("monday", Weekday::Mon),
    ("mon", Weekday::Mon),
    ("вторник", Weekday::Tue),
    ("вторника", Weekday::Tue),
    ("вторникам", Weekday::Tue),
    ("вт", Weekday::Tue),
    ("tuesday", Weekday::Tue),
    ("tue", Weekday::Tue),
    ("среда", Weekday::Wed),
    ("среду", Weekday::Wed),
    ("среды", Weekday::Wed),
    ("средам", Weekday::Wed),
    ("ср", Weekday::Wed),
    ("wednesday", Weekday::Wed),
    ("wed", Weekday::Wed),
    ("четверг", Weekday::Thu),
    ("четверга", Weekday::Thu),
    ("четвергам", Weekday::Thu),
    ("чт", Weekday::Thu),
    ("thursday", Weekday::Thu),
    ("thu", Weekday::Thu),
    ("пятница", Weekday::Fri),
    ("пятницу", Weekday::Fri),
    ("пятницы", Weekday::Fri),
    ("пятницам", Weekday::Fri),
    ("пт", Weekday::Fri),
    ("friday", Weekday::Fri),
    ("fri", Weekday::Fri),
    ("суббота", Weekday::Sat),
    ("субботу", Weekday::Sat),
    ("субботы", Weekday::Sat),
    ("субботам", Weekday::Sat),
    ("сб", Weekday::Sat),
    ("saturday", Weekday::Sat),
    ("sat", Weekday::Sat),
    ("воскресенье", Weekday::Sun),
    ("воскресенья", Weekday::Sun),
    ("воскресеньям", Weekday::Sun),
    ("вс", Weekday::Sun),
    ("sunday", Weekday::Sun),
    ("sun", Weekday::Sun),
];

const SUMMARY_COMMANDS: &[&str] = &["summary", "саммари", "!summary", "!саммари", "/summary", "/саммари"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagementCommand {
    List,
    DeleteInteractive,
    DeleteAll,
    CreateHelp,
}

impl ManagementCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = normalize(text);
        match normalized.as_str() {
            "подписки" | "мои подписки" | "посмотреть подписки" | "show subscriptions"
            | "subscriptions" => Some(Self::List),
            "удалить подписку" | "удалить подписки" | "отписаться" | "delete subscription"
            | "unsubscribe" => Some(Self::DeleteInteractive),
            "удалить все подписки" | "удалить все" | "удалить всё" | "delete all subscriptions" => {
                Some(Self::DeleteAll)
            }
            "создать подписку" | "create subscription" => Some(Self::CreateHelp),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSyntax {
    Legacy,
    Natural,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub channels: Vec<String>,
    pub schedule_time: ScheduleTime,
    pub frequency: Frequency,
    pub weekday: Option<Weekday>,
    pub syntax: CommandSyntax,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubscriptionParseError {
    #[error("expected 3 `~`-separated segments, found {found}")]
    LegacySegmentCount { found: usize },
    #[error("no channels before the first `~`")]
    LegacyChannelsMissing,
    #[error("invalid time `{value}`")]
    LegacyTimeFormat { value: String },
    #[error("invalid frequency `{value}`")]
    LegacyFrequency { value: String },
    #[error("no channels found in request")]
    MissingChannels,
    #[error("no time found in request")]
    MissingTime,
    #[error("no frequency found in request")]
    MissingFrequency,
}

impl SubscriptionParseError {
    /// Text shown to the user in reply to the malformed request.
    pub fn user_message(&self) -> String {
        match self {
            Self::LegacySegmentCount { .. } => "❌ **Неверный формат команды**\n\n\
                Используйте формат: `каналы ~ время ~ частота`\n\
                Например: `general,random ~ 09:00 ~ daily`\n\n\
                Или опишите подписку своими словами: `~general ежедневно в 9 утра`"
                .to_string(),
            Self::LegacyChannelsMissing => "❌ Укажите хотя бы один канал".to_string(),
            Self::LegacyTimeFormat { .. } => {
                "❌ Неверный формат времени. Используйте HH:MM".to_string()
            }
            Self::LegacyFrequency { .. } => {
                "❌ Частота должна быть 'daily' или 'weekly'".to_string()
            }
            Self::MissingChannels => "❌ **Не удалось определить каналы**\n\n\
                Укажите каналы через `~`, например: `~general, ~random ежедневно в 9 утра`"
                .to_string(),
            Self::MissingTime => "❌ **Не удалось определить время**\n\n\
                Укажите время, например: `в 9 утра`, `в 18:00`, `в 6 вечера`"
                .to_string(),
            Self::MissingFrequency => "❌ **Не удалось определить частоту**\n\n\
                Укажите частоту, например: `ежедневно`, `еженедельно`, `каждый понедельник`"
                .to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectMessageIntent {
    Management(ManagementCommand),
    CreateSubscription(Result<SubscriptionRequest, SubscriptionParseError>),
    Unrecognized,
}

pub fn classify_direct_message(text: &str) -> DirectMessageIntent {
    if let Some(command) = ManagementCommand::parse(text) {
        return DirectMessageIntent::Management(command);
    }

    if is_legacy_candidate(text) {
        return DirectMessageIntent::CreateSubscription(parse_legacy(text));
    }

    if is_natural_candidate(text) {
        return DirectMessageIntent::CreateSubscription(parse_natural(text));
    }

    DirectMessageIntent::Unrecognized
}

/// Two or more `~` with at least one used as a separator. A `~` directly before a name and after
/// whitespace, a comma or the start of the message is a channel mention of the natural form
/// (`~general, ~random ...`); any other `~` separates legacy segments, so `09:00~general~daily`
/// is a malformed legacy command rather than a natural request.
fn is_legacy_candidate(text: &str) -> bool {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.iter().filter(|ch| **ch == '~').count() < 2 {
        return false;
    }
    chars.iter().enumerate().any(|(index, ch)| *ch == '~' && is_separator_tilde(&chars, index))
}

fn is_separator_tilde(chars: &[char], index: usize) -> bool {
    let glued_left = index
        .checked_sub(1)
        .and_then(|previous| chars.get(previous))
        .is_some_and(|previous| !previous.is_whitespace() && *previous != ',');
    let open_right =
        chars.get(index + 1).map_or(true, |next| next.is_whitespace() || matches!(next, ',' | '~'));
    glued_left || open_right
}

fn is_natural_candidate(text: &str) -> bool {
    let lower = text.to_lowercase();
    let has_channel_hint =
        lower.contains('~') || tokens(&lower).iter().any(|token| KNOWN_CHANNELS.contains(token));
    has_channel_hint && has_time_hint(&lower) && extract_frequency(&lower).is_some()
}

pub fn parse_legacy(text: &str) -> Result<SubscriptionRequest, SubscriptionParseError> {
    let segments: Vec<&str> = text.trim().split('~').map(str::trim).collect();
    let [channels, time, frequency] = segments.as_slice() else {
        return Err(SubscriptionParseError::LegacySegmentCount { found: segments.len() });
    };

    let channels = dedup(
        channels.split(',').map(str::trim).filter(|name| !name.is_empty()).map(str::to_string),
    );
    if channels.is_empty() {
        return Err(SubscriptionParseError::LegacyChannelsMissing);
    }

    let schedule_time = ScheduleTime::parse(time)
        .ok_or_else(|| SubscriptionParseError::LegacyTimeFormat { value: (*time).to_string() })?;
    let frequency = Frequency::parse(frequency).ok_or_else(|| {
        SubscriptionParseError::LegacyFrequency { value: (*frequency).to_string() }
    })?;

    Ok(SubscriptionRequest {
        channels,
        schedule_time,
        frequency,
        weekday: None,
        syntax: CommandSyntax::Legacy,
    })
}

pub fn parse_natural(text: &str) -> Result<SubscriptionRequest, SubscriptionParseError> {
    let channels = extract_channels(text);
    if channels.is_empty() {
        return Err(SubscriptionParseError::MissingChannels);
    }
    let schedule_time = extract_time(text).ok_or(SubscriptionParseError::MissingTime)?;
    let frequency = extract_frequency(text).ok_or(SubscriptionParseError::MissingFrequency)?;
    let weekday = match frequency {
        Frequency::Weekly => extract_weekday(text),
        Frequency::Daily => None,
    };

    Ok(SubscriptionRequest {
        channels,
        schedule_time,
        frequency,
        weekday,
        syntax: CommandSyntax::Natural,
    })
}

pub fn extract_channels(text: &str) -> Vec<String> {
    if !text.contains('~') {
        let lower = text.to_lowercase();
        return dedup(
            tokens(&lower)
                .into_iter()
                .filter(|token| KNOWN_CHANNELS.contains(token))
                .map(str::to_string),
        );
    }

    let names = text.split('~').skip(1).filter_map(|chunk| {
        let chunk = chunk.split(',').next().unwrap_or_default();
        let mut words = Vec::new();
        for word in chunk.split_whitespace() {
            let bare = word.trim_matches(|c: char| ".!?;:".contains(c)).to_lowercase();
            if STOP_WORDS.contains(&bare.as_str()) || is_time_like(word) || weekday_for(&bare).is_some()
            {
                break;
            }
            words.push(word);
        }
        let name = words.join(" ");
        let name = name.trim().trim_end_matches(|c: char| ".!?;:".contains(c)).trim();
        (!name.is_empty()).then(|| name.to_string())
    });

    dedup(names)
}

fn is_time_like(word: &str) -> bool {
    word.contains(':') || (!word.is_empty() && word.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Clone, Copy)]
enum HourRule {
    Clock,
    Morning,
    Evening,
    Afternoon,
    Night,
    Bare,
}

impl HourRule {
    fn apply(self, hour: u32) -> u32 {
        match self {
            Self::Morning if hour == 12 => 0,
            Self::Evening | Self::Afternoon if hour < 12 => hour + 12,
            Self::Night if hour != 12 => hour + 12,
            _ => hour,
        }
    }
}

fn time_patterns() -> &'static [(Regex, HourRule)] {
    static PATTERNS: OnceLock<Vec<(Regex, HourRule)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        const PREP: &str = r"\b(?:в|во|at)\s+";
        const MORNING: &str = r"\s*(?:утра|morning|am)\b";
        const EVENING: &str = r"\s*(?:вечера|evening|pm)\b";
        const AFTERNOON: &str = r"\s*(?:дня|afternoon)\b";
        const NIGHT: &str = r"\s*(?:ночи|night)\b";
        let hour = r"(\d{1,2})";

        [
            (format!(r"{PREP}(\d{{1,2}}):(\d{{2}})\b"), HourRule::Clock),
            (format!(r"{PREP}{hour}{MORNING}"), HourRule::Morning),
            (format!(r"{PREP}{hour}{EVENING}"), HourRule::Evening),
            (format!(r"{PREP}{hour}{AFTERNOON}"), HourRule::Afternoon),
            (format!(r"{PREP}{hour}{NIGHT}"), HourRule::Night),
            (format!(r"{PREP}{hour}(?:\s|$)"), HourRule::Bare),
            (r"\b(\d{1,2}):(\d{2})\b".to_string(), HourRule::Clock),
            (format!(r"\b{hour}{MORNING}"), HourRule::Morning),
            (format!(r"\b{hour}{EVENING}"), HourRule::Evening),
            (format!(r"\b{hour}{AFTERNOON}"), HourRule::Afternoon),
            (format!(r"\b{hour}{NIGHT}"), HourRule::Night),
        ]
        .into_iter()
        .map(|(pattern, rule)| {
            (Regex::new(&pattern).expect("time pattern must compile"), rule)
        })
        .collect()
    })
}

fn time_hint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\d{1,2}:\d{2}|\b(?:в|во|at)\s+\d{1,2}\b|\b\d{1,2}\s*(?:утра|вечера|дня|ночи|morning|evening|afternoon|night|am|pm)\b",
        )
        .expect("time hint pattern must compile")
    })
}

fn has_time_hint(lower: &str) -> bool {
    time_hint_pattern().is_match(lower)
}

/// First matching pattern wins; an out-of-range hour or minute means no time at all.
pub fn extract_time(text: &str) -> Option<ScheduleTime> {
    let lower = text.to_lowercase();
    time_patterns().iter().find_map(|(pattern, rule)| {
        pattern.captures(&lower).map(|captures| time_from_captures(&captures, *rule))
    })?
}

fn time_from_captures(captures: &Captures<'_>, rule: HourRule) -> Option<ScheduleTime> {
    let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match rule {
        HourRule::Clock => captures.get(2)?.as_str().parse().ok()?,
        _ => 0,
    };
    ScheduleTime::new(rule.apply(hour), minute)
}

pub fn extract_frequency(text: &str) -> Option<Frequency> {
    let lower = text.to_lowercase();
    let words = tokens(&lower);

    if DAILY_PHRASES.iter().any(|phrase| contains_phrase(&words, phrase)) {
        return Some(Frequency::Daily);
    }
    if WEEKLY_PHRASES.iter().any(|phrase| contains_phrase(&words, phrase)) {
        return Some(Frequency::Weekly);
    }
    let every_day = words
        .windows(2)
        .any(|pair| EVERY_WORDS.contains(&pair[0]) && weekday_for(pair[1]).is_some());
    if every_day || words.iter().any(|word| weekday_for(word).is_some()) {
        return Some(Frequency::Weekly);
    }
    None
}

pub fn extract_weekday(text: &str) -> Option<Weekday> {
    let lower = text.to_lowercase();
    let words = tokens(&lower);

    words
        .windows(2)
        .find_map(|pair| {
            WEEKDAY_LEADS.contains(&pair[0]).then(|| weekday_for(pair[1])).flatten()
        })
        .or_else(|| words.iter().find_map(|word| weekday_for(word)))
}

fn weekday_for(token: &str) -> Option<Weekday> {
    WEEKDAYS.iter().find(|(name, _)| *name == token).map(|(_, weekday)| *weekday)
}

/// Channel post asking for a summary of its thread.
pub fn is_summary_command(text: &str) -> bool {
    SUMMARY_COMMANDS.contains(&normalize(text).as_str())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogReply {
    Cancel,
    All,
    /// 1-based position in the list shown to the user; range is checked by the caller.
    Choice(usize),
    Invalid,
}

pub fn parse_dialog_reply(text: &str) -> DialogReply {
    let normalized = normalize(text);
    match normalized.as_str() {
        "отмена" | "отменить" | "cancel" => DialogReply::Cancel,
        "все" | "всё" | "all" => DialogReply::All,
        other => other.parse().map(DialogReply::Choice).unwrap_or(DialogReply::Invalid),
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn tokens(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|token| !token.is_empty())
        .collect()
}

fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    words.windows(needle.len()).any(|window| window == needle.as_slice())
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for name in names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}
