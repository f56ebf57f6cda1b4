//! Coach prompt assembly.

use super::{ChatRequest, ChatRole};
use crate::llm::ChatMessage;

pub const DEFAULT_HISTORY_TURNS: usize = 20;

/// Turns a [`ChatRequest`] into the message list sent to the backend.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_history_turns: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TURNS)
    }
}

impl PromptBuilder {
    pub fn new(max_history_turns: usize) -> Self {
        Self { max_history_turns }
    }

    pub fn max_history_turns(&self) -> usize {
        self.max_history_turns
    }

    pub fn build(&self, request: &ChatRequest) -> Vec<ChatMessage> {
        let history = &request.chat_history;
        let skip = history.len().saturating_sub(self.max_history_turns);

        let mut messages = Vec::with_capacity(history.len() - skip + 2);
        messages.push(ChatMessage::system(self.system_prompt(request)));
        for turn in &history[skip..] {
            messages.push(match turn.role {
                ChatRole::User => ChatMessage::user(turn.content.clone()),
                ChatRole::Coach => ChatMessage::assistant(turn.content.clone()),
            });
        }
        messages.push(ChatMessage::user(request.message.clone()));
        messages
    }

    fn system_prompt(&self, request: &ChatRequest) -> String {
        let profile = &request.user_profile;
        let coach = profile
            .selected_coach
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("your coach");

        let mut prompt = format!(
            "You are {}, a supportive personal coach. Keep replies focused, practical and encouraging.",
            coach
        );
        match profile.name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => prompt.push_str(&format!("\nYou are talking with {}.", name)),
            None => prompt.push_str("\nYou are talking with a member of the programme."),
        }

        if !profile.details.is_empty() {
            prompt.push_str("\n\nWhat you know about them:");
            // BTreeMap iterates in key order.
            for (key, value) in &profile.details {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                prompt.push_str(&format!("\n{}: {}", key, rendered));
            }
        }
        prompt
    }
}
