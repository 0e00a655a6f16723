use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{ChatClient, ChatMessage, LlmError};

const ANSWER_TEMPERATURE: f32 = 0.1;

/// One generated question/answer pair with its sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub instruction: String,
    pub output: String,
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

pub struct Responder<'a, C> {
    client: &'a C,
    model: &'a str,
    system_prompt: &'a str,
}

impl<'a, C: ChatClient> Responder<'a, C> {
    pub fn new(client: &'a C, model: &'a str, system_prompt: &'a str) -> Self {
        Self {
            client,
            model,
            system_prompt,
        }
    }

    /// Answers `question` from `context` alone. The context goes in its own
    /// user turn ahead of the question.
    pub async fn answer(
        &self,
        question: &str,
        context: &str,
        links: Vec<String>,
    ) -> Result<Record, LlmError> {
        let messages = [
            ChatMessage::system(self.system_prompt),
            ChatMessage::user(context),
            ChatMessage::user(question),
        ];
        let output = self
            .client
            .complete(&messages, self.model, Some(ANSWER_TEMPERATURE))
            .await?;
        debug!(question, links = links.len(), "answered");
        Ok(Record {
            instruction: question.to_string(),
            output,
            links,
            context: None,
        })
    }
}
