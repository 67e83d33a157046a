//! Summarization runtime.
//!
//! The LLM is only a writer here: it turns already-collected chat transcripts into prose.
//! Which messages are collected, for whom and when is decided elsewhere.
//!
//! - `llm` holds the `LlmClient` seam and an OpenAI-compatible chat-completions client.
//! - `summarizer` builds the Russian prompts for thread and channel digests.

pub mod llm;
pub mod summarizer;

pub use llm::{ChatPrompt, LlmClient, LlmError, OpenAiCompatibleClient};
pub use summarizer::{LlmSummarizer, Summarizer, SummarizerError};
