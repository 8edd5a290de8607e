use crate::tokens::estimate_tokens;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Where an inline image's bytes live: still remote, or already embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    Url(String),
    Data { mime: String, base64: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentPart {
    Text(String),
    Image { source: ImageSource },
}

/// Message content is plain text until dispatch-time image extraction turns a
/// user message into ordered parts for multimodal providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }

    /// Concatenated text of the content, image parts skipped. Used for token
    /// counting and for providers that only accept a prompt string.
    pub fn joined_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => {
                let mut joined = String::new();
                for part in parts {
                    if let ContentPart::Text(text) = part {
                        joined.push_str(text);
                    }
                }
                joined
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl Message {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = Some(estimate_tokens(&content));
        Self {
            role,
            content: Content::Text(content),
            token_count,
        }
    }

    /// Cached token count, computed on first use.
    pub fn ensure_token_count(&mut self) -> usize {
        if let Some(count) = self.token_count {
            return count;
        }
        let count = estimate_tokens(&self.content.joined_text());
        self.token_count = Some(count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_constructor_counts_tokens() {
        let message = Message::text(Role::User, "abcdefgh");
        assert_eq!(message.token_count, Some(2));
    }

    #[test]
    fn test_ensure_token_count_counts_text_parts_only() {
        let mut message = Message {
            role: Role::User,
            content: Content::Parts(vec![
                ContentPart::Text("abcd".to_string()),
                ContentPart::Image {
                    source: ImageSource::Url("https://example.com/a.png".to_string()),
                },
                ContentPart::Text("efgh".to_string()),
            ]),
            token_count: None,
        };
        assert_eq!(message.ensure_token_count(), 2);
        assert_eq!(message.token_count, Some(2));
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}
