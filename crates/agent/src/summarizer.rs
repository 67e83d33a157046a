use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use summarybot_core::domain::message::{ChannelDigest, ChannelMessage};
use summarybot_core::domain::subscription::Frequency;

use crate::llm::{ChatPrompt, LlmClient, LlmError};

const THREAD_SYSTEM_PROMPT: &str = "Ты - помощник для создания кратких саммари обсуждений в корпоративном мессенджере.

Твоя задача: проанализировать переписку и создать структурированное краткое саммари.

Формат ответа должен быть следующим:
## 📝 Саммари треда

**👥 Участники обсуждения:**
[список участников]

**💬 Основные темы обсуждения:**
[краткое описание основных тем]

**📋 Ключевые моменты:**
[список важных выводов, решений или фактов]

**✅ Задачи и действия:**
[список конкретных задач, действий или договоренностей, если есть]

**🎯 Итог:**
[краткий общий вывод]

Пиши кратко, по существу, на русском языке.";

const CHANNELS_SYSTEM_PROMPT: &str = "Ты - помощник, который готовит регулярные сводки активности в каналах корпоративного мессенджера.

Тебе передают сообщения из нескольких каналов, сгруппированные по каналам.

Формат ответа:
Для каждого канала, в котором были сообщения, отдельный раздел:
### [название канала]
- основные темы обсуждения;
- принятые решения и договоренности;
- задачи, вопросы без ответа и упомянутые сроки.

В конце раздел **🎯 Главное за период** из 2-4 пунктов.

Не выдумывай факты, которых нет в сообщениях. Пиши кратко, по существу, на русском языке.";

#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("nothing to summarize")]
    NoMessages,
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize_thread(&self, messages: &[ChannelMessage]) -> Result<String, SummarizerError>;

    async fn summarize_channels(
        &self,
        messages: &[ChannelMessage],
        digests: &[ChannelDigest],
        frequency: Frequency,
    ) -> Result<String, SummarizerError>;
}

pub struct LlmSummarizer<C> {
    client: C,
}

impl<C: LlmClient> LlmSummarizer<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    async fn run(&self, prompt: ChatPrompt, kind: &'static str) -> Result<String, SummarizerError> {
        match self.client.complete(&prompt).await {
            Ok(text) => Ok(text),
            Err(error) => {
                warn!(
                    event_name = "summarizer.generation.failed",
                    kind,
                    error = %error,
                    "summary generation failed"
                );
                Err(error.into())
            }
        }
    }
}

#[async_trait]
impl<C: LlmClient> Summarizer for LlmSummarizer<C> {
    async fn summarize_thread(&self, messages: &[ChannelMessage]) -> Result<String, SummarizerError> {
        let transcript = format_transcript(messages.iter());
        if transcript.is_empty() {
            return Err(SummarizerError::NoMessages);
        }

        let prompt = ChatPrompt {
            system: THREAD_SYSTEM_PROMPT.to_string(),
            user: format!("Проанализируй следующую переписку и создай саммари:\n\n{transcript}"),
        };
        self.run(prompt, "thread").await
    }

    async fn summarize_channels(
        &self,
        messages: &[ChannelMessage],
        digests: &[ChannelDigest],
        frequency: Frequency,
    ) -> Result<String, SummarizerError> {
        let sections = channel_sections(messages, digests);
        if sections.is_empty() {
            return Err(SummarizerError::NoMessages);
        }

        let period = match frequency {
            Frequency::Daily => "за последние сутки",
            Frequency::Weekly => "за последнюю неделю",
        };
        let prompt = ChatPrompt {
            system: CHANNELS_SYSTEM_PROMPT.to_string(),
            user: format!("Подготовь сводку сообщений {period}.\n\n{sections}"),
        };
        self.run(prompt, "channels").await
    }
}

/// `username: text` per line; blank messages are skipped.
fn format_transcript<'a>(messages: impl Iterator<Item = &'a ChannelMessage>) -> String {
    messages
        .filter_map(|message| {
            let text = message.text.trim();
            (!text.is_empty()).then(|| format!("{}: {}", display_author(&message.username), text))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn display_author(username: &str) -> &str {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        "Неизвестный пользователь"
    } else {
        trimmed
    }
}

// Channels follow digest order; messages whose channel has no digest go last under their raw name.
fn channel_sections(messages: &[ChannelMessage], digests: &[ChannelDigest]) -> String {
    let mut order: Vec<(&str, &str)> = digests
        .iter()
        .map(|digest| (digest.channel_name.as_str(), digest.display_name.as_str()))
        .collect();
    for message in messages {
        if !order.iter().any(|(name, _)| *name == message.channel_name) {
            order.push((message.channel_name.as_str(), message.channel_name.as_str()));
        }
    }

    order
        .into_iter()
        .filter_map(|(name, display)| {
            let transcript =
                format_transcript(messages.iter().filter(|message| message.channel_name == name));
            (!transcript.is_empty()).then(|| format!("### Канал: {display}\n{transcript}"))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
