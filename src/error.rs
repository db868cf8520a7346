// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Ollama API client.
//!
//! Per-line decode failures inside a streaming response are logged and
//! skipped by the caller; everything that terminates an operation surfaces
//! as one of these variants. The client never retries on its own.

use std::fmt;

/// Errors produced by API operations.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Connection refused, DNS failure, timed out waiting for first byte.
    Transport(String),
    /// Secure-transport failure (certificate or TLS handshake).
    Tls(String),
    /// Non-2xx HTTP status on the initial response.
    HttpStatus { status: u16, message: String },
    /// Malformed JSON or schema mismatch; carries the offending payload.
    Decode { line: String, message: String },
    /// The server reported an error envelope (`{"error": ...}`).
    Api(String),
    /// The operation was cancelled by the user or superseded.
    Cancelled,
}

impl ApiError {
    /// Classify a reqwest error into transport/TLS/timeout buckets.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if is_tls_error(&err) {
            return Self::Tls(err.to_string());
        }
        if err.is_timeout() {
            return Self::Transport(format!("request timed out: {}", err));
        }
        if err.is_connect() {
            return Self::Transport(format!("cannot connect: {}", err));
        }
        Self::Transport(err.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Tls(msg) => write!(f, "secure connection failed: {}", msg),
            Self::HttpStatus { status, message } => {
                write!(f, "HTTP {}: {}", status, message)
            }
            Self::Decode { line, message } => {
                write!(f, "failed to decode response: {} (payload: {})", message, line)
            }
            Self::Api(msg) => write!(f, "server error: {}", msg),
            Self::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Walk the error source chain looking for certificate/TLS wording.
///
/// reqwest does not expose a TLS predicate, so this matches on the message
/// text of the underlying rustls/native-tls errors.
pub(crate) fn is_tls_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        let msg = e.to_string().to_lowercase();
        if msg.contains("certificate") || msg.contains("tls") || msg.contains("ssl") {
            return true;
        }
        source = e.source();
    }
    false
}
