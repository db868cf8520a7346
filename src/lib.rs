// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! llamalink - Streaming Ollama API client
//!
//! A client for Ollama-compatible servers that multiplexes any number of
//! concurrent streaming chats plus one model pull with live, rate-limited
//! progress reporting.
//!
//! # Core Modules
//!
//! - [`client`] - API facade, request multiplexing, streaming workers
//! - [`types`] - Typed wire structs for the Ollama HTTP API
//! - [`linebuf`] - Incremental NDJSON line splitting
//! - [`progress`] - Transfer speed / ETA tracking for pulls
//! - [`coalesce`] - Rate-limited progress commits to observers
//! - [`cache`] - Memoized model detail lookups
//! - [`config`] - Host normalization and timeout configuration
//! - [`state`] - Observable client state snapshots
//! - [`error`] - Typed API errors

pub mod cache;
pub mod client;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod linebuf;
pub mod progress;
pub mod state;
pub mod types;
pub mod util;

// Re-export the surface most callers need.
pub use client::{ChatStream, Connectivity, OllamaClient, PullHandle};
pub use config::{normalize_host, ClientConfig, RequestTimeout, DEFAULT_HOST};
pub use error::ApiError;
pub use progress::{PullPhase, PullProgress};
pub use state::ClientState;
pub use types::{
    ChatChunk, ChatMessage, ChatOptions, ChatRequest, ChatSettings, ModelDetail, ModelEntry,
    ModelSummary, RunningModel, ThinkMode,
};
pub use util::{format_bytes, format_eta, format_speed};
