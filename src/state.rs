// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Observable client state.
//!
//! Observers (a UI layer, a test harness) subscribe to snapshots through a
//! watch channel; only the client's own handlers mutate the state.

use crate::progress::PullProgress;
use crate::types::ModelEntry;

/// Snapshot of everything an observer can see.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    /// Model list from the last successful refresh, in response order.
    pub models: Vec<ModelEntry>,
    /// Set when the last list refresh failed for any reason.
    pub connection_error: bool,
    /// Committed progress of the current (or last) pull.
    pub pull: PullProgress,
    /// Human-readable description of the most recent failure, if any.
    pub status_message: Option<String>,
}
