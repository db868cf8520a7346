// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client configuration: server host and request timeout.
//!
//! The timeout bounds time-to-first-byte only. Streaming bodies run as long
//! as they need to; a multi-gigabyte pull must never be killed by an
//! overall timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default Ollama host.
pub const DEFAULT_HOST: &str = "localhost:11434";

/// Time allowed for the server to produce the first response byte.
///
/// One of a small enumerated set so a settings UI can offer it as a picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestTimeout {
    Secs30,
    #[default]
    Secs60,
    Mins5,
    Unlimited,
}

impl RequestTimeout {
    /// The wall-clock bound, or `None` for unlimited.
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::Secs30 => Some(Duration::from_secs(30)),
            Self::Secs60 => Some(Duration::from_secs(60)),
            Self::Mins5 => Some(Duration::from_secs(300)),
            Self::Unlimited => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Secs30 => "30s",
            Self::Secs60 => "60s",
            Self::Mins5 => "5min",
            Self::Unlimited => "unlimited",
        }
    }
}

/// Configuration for an [`crate::client::OllamaClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host string as entered by the user; normalized on use.
    pub host: String,
    pub timeout: RequestTimeout,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            timeout: RequestTimeout::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Normalized base URL for the configured host.
    pub fn base_url(&self) -> String {
        normalize_host(&self.host)
    }
}

/// Normalize a user-entered host into a base URL.
///
/// Strips any `http://`/`https://` prefix and re-derives the scheme,
/// defaulting to `http` unless the original began with `https://`. Applied
/// identically everywhere a host is turned into a URL.
pub fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    let (secure, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        (false, rest)
    } else {
        (false, trimmed)
    };
    let scheme = if secure { "https" } else { "http" };
    format!("{}://{}", scheme, rest)
}
