//! Chat message assembly for the knowledge-base chat endpoint.

use serde::{Deserialize, Serialize};

use crate::retrieval::{format_context, RetrievedDocument};

/// One `{ role, content }` entry of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Prior conversation followed by one user message carrying the formatted
/// context and the question.
pub fn build_chat_messages(
    prompt: &str,
    context_documents: &[RetrievedDocument],
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let context = format_context(context_documents);
    let mut messages = history.to_vec();
    messages.push(ChatMessage::user(format!(
        "Context:\n{}\n\nQuestion:\n{}",
        context, prompt
    )));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use serde_json::json;

    #[test]
    fn test_history_is_kept_and_question_appended() {
        let history = vec![
            ChatMessage::user("hi"),
            ChatMessage::new("assistant", "hello"),
        ];
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!("docs/x.md"));
        let docs = vec![RetrievedDocument {
            id: "chunk-00000".to_string(),
            text: "terpenes".to_string(),
            metadata,
        }];

        let messages = build_chat_messages("What is linalool?", &docs, &history);
        assert_eq!(messages.len(), 3);
        assert_eq!(&messages[..2], &history[..]);
        assert_eq!(messages[2].role, "user");
        assert_eq!(
            messages[2].content,
            "Context:\n[1] Source: docs/x.md\nterpenes\n\nQuestion:\nWhat is linalool?"
        );
    }

    #[test]
    fn test_empty_context() {
        let messages = build_chat_messages("q", &[], &[]);
        assert_eq!(messages, vec![ChatMessage::user("Context:\n\n\nQuestion:\nq")]);
    }

    #[test]
    fn test_message_serializes_as_role_content() {
        let v = serde_json::to_value(ChatMessage::system("s")).unwrap();
        assert_eq!(v, json!({"role": "system", "content": "s"}));
    }
}
