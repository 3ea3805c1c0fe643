//! Wire types shared by every provider adapter (§4.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Generation parameters, uniform across providers (§4.4).
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            max_output_tokens: 4_096,
        }
    }
}

/// A completed (non-streaming) response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One incremental chunk of a streaming completion.
#[derive(Debug, Clone)]
pub struct CompletionDelta {
    pub text: String,
    pub finished: bool,
}
