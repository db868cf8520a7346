// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire types for the Ollama HTTP API.
//!
//! Request structs encode optional fields with omit-if-absent semantics so
//! the bodies stay bit-compatible with what the server expects. Response
//! structs default missing fields rather than failing the decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A chat message with role and content.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    /// Model reasoning text, present when thinking is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            thinking: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Three-way thinking toggle: unset means "let the model decide".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkMode {
    /// Omitted from the request body entirely.
    #[default]
    Unset,
    On,
    Off,
}

impl ThinkMode {
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::On => Some(true),
            Self::Off => Some(false),
        }
    }
}

/// Sampling options forwarded under the request's `options` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// f64 so values like 0.7 survive JSON encoding exactly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl ChatOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_ctx.is_none()
    }
}

/// Caller-side settings applied when building a chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatSettings {
    pub temperature: Option<f64>,
    pub num_ctx: Option<u32>,
    /// Prepended as a system message when enabled and not already present.
    pub system_prompt: Option<String>,
    pub think: ThinkMode,
    pub tools: Option<Vec<serde_json::Value>>,
}

/// Body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
}

impl ChatRequest {
    /// Build a request from conversation messages plus settings.
    ///
    /// A configured system prompt is inserted at position 0 at most once:
    /// if the conversation already starts with a system message, nothing is
    /// added.
    pub fn build(
        model: impl Into<String>,
        mut messages: Vec<ChatMessage>,
        stream: bool,
        settings: &ChatSettings,
    ) -> Self {
        if let Some(prompt) = settings.system_prompt.as_deref() {
            let has_system = messages.first().map(|m| m.role == "system").unwrap_or(false);
            if !prompt.is_empty() && !has_system {
                messages.insert(0, ChatMessage::system(prompt));
            }
        }

        let options = ChatOptions {
            temperature: settings.temperature,
            num_ctx: settings.num_ctx,
        };

        Self {
            model: model.into(),
            messages,
            stream,
            think: settings.think.as_option(),
            options: if options.is_empty() { None } else { Some(options) },
            tools: settings.tools.clone(),
        }
    }
}

/// One decoded chunk of a chat response (streaming or single-shot).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body for `POST /api/pull`.
#[derive(Debug, Clone, Serialize)]
pub struct PullRequest {
    pub model: String,
    pub stream: bool,
}

/// One NDJSON line of a pull response.
#[derive(Debug, Clone, Deserialize)]
pub struct PullEvent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body for `DELETE /api/delete` and `POST /api/show`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub model: String,
}

/// Response from `GET /api/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelSummary>,
}

/// One entry of the model list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: String,
}

/// A listed model with its stable position in the last refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelEntry {
    /// Ordinal index in server response order.
    pub index: usize,
    pub summary: ModelSummary,
}

/// Response from `POST /api/show`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelDetail {
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub modelfile: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub model_info: Option<serde_json::Value>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

/// Response from `GET /api/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Response from `GET /api/ps`.
#[derive(Debug, Clone, Deserialize)]
pub struct PsResponse {
    #[serde(default)]
    pub models: Vec<RunningModel>,
}

/// One currently loaded model.
#[derive(Debug, Clone, Deserialize)]
pub struct RunningModel {
    pub name: String,
    /// ISO-8601 with fractional seconds; absent or unparseable becomes
    /// `None`, never a decode error.
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size_vram: Option<u64>,
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }))
}
