// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ollama API client.
//!
//! One `OllamaClient` multiplexes any number of concurrent chat streams
//! plus at most one model pull. Every streaming request runs in its own
//! tokio task with its own line buffer and consumer channel, registered in
//! the client so it can be cancelled; shared state (model list, pull
//! progress, detail cache) is only touched behind the client's own locks.
//!
//! # Example
//!
//! ```no_run
//! use llamalink::client::OllamaClient;
//! use llamalink::types::{ChatMessage, ChatRequest, ChatSettings};
//! use futures_util::StreamExt;
//!
//! # async fn run() {
//! let client = OllamaClient::new();
//! let request = ChatRequest::build(
//!     "llama3.2:latest",
//!     vec![ChatMessage::user("Hello!")],
//!     true,
//!     &ChatSettings::default(),
//! );
//! let mut stream = client.chat(request);
//! while let Some(chunk) = stream.next().await {
//!     if let Ok(chunk) = chunk {
//!         if let Some(msg) = chunk.message {
//!             print!("{}", msg.content);
//!         }
//!     }
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::cache::DetailCache;
use crate::coalesce::StatusCoalescer;
use crate::config::{ClientConfig, RequestTimeout};
use crate::error::ApiError;
use crate::linebuf::LineBuffer;
use crate::progress::{ProgressTracker, PullPhase, PullProgress};
use crate::state::ClientState;
use crate::types::{
    ChatChunk, ChatRequest, ModelDetail, ModelEntry, ModelRequest, PsResponse, PullEvent,
    PullRequest, RunningModel, TagsResponse, VersionResponse,
};

/// TCP connect timeout; separate from the configurable first-byte timeout.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Buffered chunks per chat stream before backpressure suspends the reader.
const CHAT_CHANNEL_CAPACITY: usize = 32;

/// Outcome of a connectivity probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Connectivity {
    /// The server answered with a 2xx.
    Connected,
    /// The server answered, but not with a 2xx.
    HttpError { status: u16, message: String },
    /// Certificate or TLS handshake failure; deserves a specific message.
    TlsFailure(String),
    /// Could not reach the server at all.
    Unreachable(String),
}

struct ChatEntry {
    cancel: watch::Sender<bool>,
}

struct PullEntry {
    id: u64,
    cancel: watch::Sender<bool>,
}

struct Inner {
    http: Mutex<reqwest::Client>,
    config: Mutex<ClientConfig>,
    state_tx: watch::Sender<ClientState>,
    timeout_tx: watch::Sender<RequestTimeout>,
    chats: Mutex<HashMap<u64, ChatEntry>>,
    pull: Mutex<Option<PullEntry>>,
    /// Id of the pull that owns the published pull state. A superseding
    /// pull takes ownership before the superseded worker commits its
    /// terminal snapshot, so stale terminals never reach observers.
    active_pull_id: AtomicU64,
    details: DetailCache,
    next_id: AtomicU64,
}

/// Recover from a poisoned lock; a panicked worker must not wedge the client.
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn build_http() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .expect("failed to create HTTP client")
}

/// Resolves once the cancel flag is raised (or its sender is gone).
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl Inner {
    fn http(&self) -> reqwest::Client {
        lock_recover(&self.http).clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", lock_recover(&self.config).base_url(), path)
    }

    /// Send a request, bounding time-to-first-byte by the configured
    /// timeout. The response body is never bounded.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let timeout = lock_recover(&self.config).timeout;
        match timeout.duration() {
            Some(limit) => match tokio::time::timeout(limit, req.send()).await {
                Ok(resp) => resp.map_err(ApiError::from_transport),
                Err(_) => Err(ApiError::Transport(format!(
                    "no response within {}",
                    timeout.label()
                ))),
            },
            None => req.send().await.map_err(ApiError::from_transport),
        }
    }

    fn note_failure(&self, error: &ApiError) {
        self.state_tx
            .send_modify(|s| s.status_message = Some(error.to_string()));
    }

    fn cancel_chat(inner: &Arc<Self>, id: u64) {
        let entry = lock_recover(&inner.chats).remove(&id);
        if let Some(entry) = entry {
            let _ = entry.cancel.send(true);
        }
    }

    fn cancel_pull_id(inner: &Arc<Self>, id: u64) {
        let mut slot = lock_recover(&inner.pull);
        if slot.as_ref().map(|e| e.id == id).unwrap_or(false) {
            if let Some(entry) = slot.take() {
                let _ = entry.cancel.send(true);
            }
        }
    }
}

/// Handle to an in-flight (or finished) model pull.
///
/// Progress snapshots are committed at most twice per second; the terminal
/// snapshot is committed immediately.
#[derive(Debug, Clone)]
pub struct PullHandle {
    pub model: String,
    id: u64,
    progress_rx: watch::Receiver<PullProgress>,
    client: Weak<Inner>,
}

impl PullHandle {
    /// The latest committed progress.
    pub fn progress(&self) -> PullProgress {
        self.progress_rx.borrow().clone()
    }

    /// A fresh receiver for observing committed progress.
    pub fn subscribe(&self) -> watch::Receiver<PullProgress> {
        self.progress_rx.clone()
    }

    /// Wait for the pull to reach a terminal phase.
    pub async fn wait(&mut self) -> PullProgress {
        loop {
            if self.progress_rx.borrow().phase.is_terminal() {
                return self.progress_rx.borrow().clone();
            }
            if self.progress_rx.changed().await.is_err() {
                return self.progress_rx.borrow().clone();
            }
        }
    }

    /// Cancel this pull if it is still the active one. Idempotent.
    pub fn cancel(&self) {
        if let Some(inner) = self.client.upgrade() {
            Inner::cancel_pull_id(&inner, self.id);
        }
    }
}

/// A lazy, cancellable sequence of decoded chat chunks.
///
/// Streaming requests yield one chunk per NDJSON line; single-shot requests
/// yield exactly one chunk. Dropping the stream cancels the request.
pub struct ChatStream {
    id: u64,
    rx: ReceiverStream<Result<ChatChunk, ApiError>>,
    client: Weak<Inner>,
}

impl ChatStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the underlying request. Idempotent.
    pub fn cancel(&self) {
        if let Some(inner) = self.client.upgrade() {
            Inner::cancel_chat(&inner, self.id);
        }
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatChunk, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Client for an Ollama-compatible server.
#[derive(Clone)]
pub struct OllamaClient {
    inner: Arc<Inner>,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaClient {
    /// Client for `localhost:11434` with default timeouts.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ClientState::default());
        let (timeout_tx, _) = watch::channel(config.timeout);
        Self {
            inner: Arc::new(Inner {
                http: Mutex::new(build_http()),
                config: Mutex::new(config),
                state_tx,
                timeout_tx,
                chats: Mutex::new(HashMap::new()),
                pull: Mutex::new(None),
                active_pull_id: AtomicU64::new(0),
                details: DetailCache::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to observable client state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.inner.state_tx.subscribe()
    }

    /// The current state snapshot.
    pub fn state(&self) -> ClientState {
        self.inner.state_tx.borrow().clone()
    }

    /// Notified whenever the timeout configuration changes.
    pub fn subscribe_timeout(&self) -> watch::Receiver<RequestTimeout> {
        self.inner.timeout_tx.subscribe()
    }

    pub fn host(&self) -> String {
        lock_recover(&self.inner.config).host.clone()
    }

    pub fn set_host(&self, host: impl Into<String>) {
        lock_recover(&self.inner.config).host = host.into();
    }

    /// Change the first-byte timeout.
    ///
    /// Rebuilds the transport session. Tasks in flight are abandoned, but
    /// their consumers are resolved with a cancellation error, never leaked.
    pub fn set_timeout(&self, timeout: RequestTimeout) {
        {
            let mut cfg = lock_recover(&self.inner.config);
            if cfg.timeout == timeout {
                return;
            }
            cfg.timeout = timeout;
        }
        {
            let mut http = lock_recover(&self.inner.http);
            *http = build_http();
        }
        self.cancel_all_chats();
        self.cancel_pull();
        let _ = self.inner.timeout_tx.send(timeout);
    }

    // ------------------------------------------------------------------
    // One-shot operations
    // ------------------------------------------------------------------

    /// Refresh the model list from `/api/tags`.
    ///
    /// Success replaces the published list (with ordinal indices in
    /// response order) and clears the connection-error flag; any failure
    /// publishes an empty list and sets the flag.
    pub async fn list_models(&self) -> Result<Vec<ModelEntry>, ApiError> {
        let inner = &self.inner;
        let result = async {
            let resp = inner.send(inner.http().get(inner.url("/api/tags"))).await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ApiError::HttpStatus {
                    status: status.as_u16(),
                    message: resp.text().await.unwrap_or_default(),
                });
            }
            resp.json::<TagsResponse>().await.map_err(|e| ApiError::Decode {
                line: String::new(),
                message: e.to_string(),
            })
        }
        .await;

        match result {
            Ok(tags) => {
                let entries: Vec<ModelEntry> = tags
                    .models
                    .into_iter()
                    .enumerate()
                    .map(|(index, summary)| ModelEntry { index, summary })
                    .collect();
                inner.state_tx.send_modify(|s| {
                    s.models = entries.clone();
                    s.connection_error = false;
                    s.status_message = None;
                });
                Ok(entries)
            }
            Err(e) => {
                inner.state_tx.send_modify(|s| {
                    s.models.clear();
                    s.connection_error = true;
                    s.status_message = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Probe the server with a lightweight request and classify the result.
    pub async fn check_connection(&self) -> Connectivity {
        let inner = &self.inner;
        match inner.send(inner.http().get(inner.url("/api/version"))).await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    Connectivity::Connected
                } else {
                    Connectivity::HttpError {
                        status: status.as_u16(),
                        message: resp.text().await.unwrap_or_default(),
                    }
                }
            }
            Err(ApiError::Tls(msg)) => Connectivity::TlsFailure(msg),
            Err(e) => Connectivity::Unreachable(e.to_string()),
        }
    }

    /// Server version, or `None` on any failure.
    pub async fn version(&self) -> Option<String> {
        self.fetch_json::<VersionResponse>("/api/version")
            .await
            .map(|v| v.version)
    }

    /// Currently loaded models, or `None` on any failure.
    pub async fn running_models(&self) -> Option<Vec<RunningModel>> {
        self.fetch_json::<PsResponse>("/api/ps")
            .await
            .map(|ps| ps.models)
    }

    /// Number of currently loaded models, or `None` on any failure.
    pub async fn running_model_count(&self) -> Option<usize> {
        self.running_models().await.map(|m| m.len())
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let inner = &self.inner;
        let resp = match inner.send(inner.http().get(inner.url(path))).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!("GET {} failed: {}", path, e);
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::debug!("GET {} returned HTTP {}", path, resp.status());
            return None;
        }
        match resp.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("GET {} decode failed: {}", path, e);
                None
            }
        }
    }

    /// Delete a model. 200 triggers a list refresh; 404 reports not-found.
    pub async fn delete_model(&self, model: &str) -> Result<(), ApiError> {
        let inner = &self.inner;
        let req = inner
            .http()
            .delete(inner.url("/api/delete"))
            .json(&ModelRequest {
                model: model.to_string(),
            });
        let resp = inner.send(req).await.map_err(|e| {
            inner.note_failure(&e);
            e
        })?;
        let status = resp.status();
        if status.is_success() {
            // The catalog changed; republish it.
            let _ = self.list_models().await;
            return Ok(());
        }
        let error = if status.as_u16() == 404 {
            ApiError::HttpStatus {
                status: 404,
                message: format!("model '{}' not found", model),
            }
        } else {
            ApiError::HttpStatus {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            }
        };
        inner.note_failure(&error);
        Err(error)
    }

    /// Fetch model detail, memoized per model name.
    ///
    /// Failures yield `None` ("unknown") and are not cached.
    pub async fn model_detail(&self, model: &str) -> Option<Arc<ModelDetail>> {
        let inner = Arc::clone(&self.inner);
        let name = model.to_string();
        self.inner
            .details
            .get_or_fetch(model, || async move {
                let req = inner
                    .http()
                    .post(inner.url("/api/show"))
                    .json(&ModelRequest { model: name });
                let resp = inner.send(req).await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(ApiError::HttpStatus {
                        status: status.as_u16(),
                        message: resp.text().await.unwrap_or_default(),
                    });
                }
                resp.json::<ModelDetail>().await.map_err(|e| ApiError::Decode {
                    line: String::new(),
                    message: e.to_string(),
                })
            })
            .await
    }

    /// Drop all memoized model details.
    pub fn clear_detail_cache(&self) {
        self.inner.details.clear();
    }

    // ------------------------------------------------------------------
    // Model pull
    // ------------------------------------------------------------------

    /// Start pulling a model, superseding any pull already in flight.
    ///
    /// The superseded pull's consumers observe a cancelled terminal
    /// snapshot. Progress flows through the tracker and coalescer to both
    /// the returned handle and the published client state.
    pub fn pull_model(&self, model: &str) -> PullHandle {
        let inner = Arc::clone(&self.inner);
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let model = model.to_string();

        let initial = PullProgress {
            phase: PullPhase::Running,
            status: "Starting".to_string(),
            ..Default::default()
        };
        let (progress_tx, progress_rx) = watch::channel(initial.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        {
            // Single-flight with supersession: at most one pull task exists.
            let mut slot = lock_recover(&inner.pull);
            if let Some(prev) = slot.take() {
                let _ = prev.cancel.send(true);
            }
            *slot = Some(PullEntry {
                id,
                cancel: cancel_tx,
            });
        }
        inner.active_pull_id.store(id, Ordering::SeqCst);

        // Reset published progress/error state before sending.
        inner.state_tx.send_modify(|s| {
            s.pull = initial;
            s.status_message = None;
        });

        // Mirror committed snapshots into the published state, but only
        // while this pull still owns it. The ownership check runs inside
        // the sender's critical section, so a superseded worker's terminal
        // snapshot can never land after the new pull's state reset.
        let forward_inner = Arc::clone(&inner);
        let mut forward_rx = progress_rx.clone();
        tokio::spawn(async move {
            while forward_rx.changed().await.is_ok() {
                let progress = forward_rx.borrow_and_update().clone();
                let owned = forward_inner.state_tx.send_if_modified(|s| {
                    if forward_inner.active_pull_id.load(Ordering::SeqCst) != id {
                        return false;
                    }
                    if progress.phase == PullPhase::Failed {
                        s.status_message = progress.error.clone();
                    }
                    s.pull = progress.clone();
                    true
                });
                if !owned {
                    return;
                }
            }
        });

        let worker_inner = Arc::clone(&inner);
        let worker_model = model.clone();
        tokio::spawn(async move {
            Self::run_pull(worker_inner, id, worker_model, progress_tx, cancel_rx).await;
        });

        PullHandle {
            model,
            id,
            progress_rx,
            client: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel the active pull, if any. Idempotent.
    pub fn cancel_pull(&self) {
        let entry = lock_recover(&self.inner.pull).take();
        if let Some(entry) = entry {
            let _ = entry.cancel.send(true);
        }
    }

    async fn run_pull(
        inner: Arc<Inner>,
        id: u64,
        model: String,
        progress_tx: watch::Sender<PullProgress>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        Self::pull_loop(&inner, &model, progress_tx, &mut cancel_rx).await;
        let mut slot = lock_recover(&inner.pull);
        if slot.as_ref().map(|e| e.id == id).unwrap_or(false) {
            *slot = None;
        }
    }

    async fn pull_loop(
        inner: &Arc<Inner>,
        model: &str,
        progress_tx: watch::Sender<PullProgress>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) {
        let mut coalescer = StatusCoalescer::new(progress_tx);
        let req = inner
            .http()
            .post(inner.url("/api/pull"))
            .json(&PullRequest {
                model: model.to_string(),
                stream: true,
            });

        let resp = tokio::select! {
            _ = cancelled(cancel_rx) => {
                coalescer.finish(PullProgress::cancelled());
                return;
            }
            resp = inner.send(req) => match resp {
                Ok(resp) => resp,
                Err(e) => {
                    coalescer.finish(PullProgress::failed("Failed", e.to_string()));
                    return;
                }
            }
        };

        let status = resp.status();
        if !status.is_success() {
            // A non-200 handshake is fatal for the whole pull.
            let message = if status.as_u16() == 400 {
                format!("pull of '{}' rejected: likely an invalid model name", model)
            } else {
                format!(
                    "pull failed: HTTP {} {}",
                    status.as_u16(),
                    resp.text().await.unwrap_or_default()
                )
            };
            coalescer.finish(PullProgress::failed("Failed", message));
            return;
        }

        let mut stream = resp.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut tracker = ProgressTracker::new();

        loop {
            // Cancellation must win over bytes already buffered; anything
            // arriving afterwards is discarded, not delivered.
            let chunk = tokio::select! {
                biased;
                _ = cancelled(cancel_rx) => {
                    coalescer.finish(PullProgress::cancelled());
                    return;
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                None => break,
                Some(Err(e)) => {
                    let error = ApiError::from_transport(e);
                    coalescer.finish(PullProgress::failed("Failed", error.to_string()));
                    return;
                }
                Some(Ok(bytes)) => {
                    let complete = match lines.feed(&bytes) {
                        Ok(complete) => complete,
                        Err(e) => {
                            coalescer.finish(PullProgress::failed("Failed", e.to_string()));
                            return;
                        }
                    };
                    for line in complete {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<PullEvent>(line) {
                            Ok(event) => {
                                if let Some(error) = event.error {
                                    coalescer.finish(PullProgress::failed(event.status, error));
                                    return;
                                }
                                if event.completed.is_some() || event.total.is_some() {
                                    tracker.update(
                                        event.completed.unwrap_or(0),
                                        event.total.unwrap_or(0),
                                    );
                                }
                                coalescer
                                    .offer(tracker.snapshot(PullPhase::Running, &event.status));
                            }
                            Err(e) => {
                                // Not an error envelope, not decodable: skip
                                // the line, keep the stream alive.
                                tracing::warn!("skipping undecodable pull line {:?}: {}", line, e);
                            }
                        }
                    }
                }
            }
        }

        // Transport completed without error: force completion to 100%.
        let mut done = tracker.snapshot(PullPhase::Completed, "Completed");
        done.fraction = 1.0;
        done.completed = done.total.max(done.completed);
        done.eta_seconds = 0;
        coalescer.finish(done);
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    /// Issue a chat request and return its chunk stream.
    ///
    /// Any number of chats may be in flight; each has its own line buffer
    /// and channel, so streams never interleave. The request is sent lazily
    /// by a worker task; all failures arrive through the stream.
    pub fn chat(&self, request: ChatRequest) -> ChatStream {
        let inner = Arc::clone(&self.inner);
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CHAT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        lock_recover(&inner.chats).insert(id, ChatEntry { cancel: cancel_tx });

        let worker_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            Self::run_chat(worker_inner, id, request, tx, cancel_rx).await;
        });

        ChatStream {
            id,
            rx: ReceiverStream::new(rx),
            client: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel one chat by id. No-op when nothing with that id is in flight.
    pub fn cancel_chat(&self, id: u64) {
        Inner::cancel_chat(&self.inner, id);
    }

    /// Cancel every chat in flight. Idempotent.
    pub fn cancel_all_chats(&self) {
        let entries: Vec<ChatEntry> = {
            let mut chats = lock_recover(&self.inner.chats);
            chats.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            let _ = entry.cancel.send(true);
        }
    }

    async fn run_chat(
        inner: Arc<Inner>,
        id: u64,
        request: ChatRequest,
        tx: mpsc::Sender<Result<ChatChunk, ApiError>>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        Self::chat_loop(&inner, request, &tx, &mut cancel_rx).await;
        lock_recover(&inner.chats).remove(&id);
    }

    async fn chat_loop(
        inner: &Arc<Inner>,
        request: ChatRequest,
        tx: &mpsc::Sender<Result<ChatChunk, ApiError>>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) {
        let streaming = request.stream;
        let req = inner.http().post(inner.url("/api/chat")).json(&request);

        let resp = tokio::select! {
            _ = cancelled(cancel_rx) => {
                let _ = tx.send(Err(ApiError::Cancelled)).await;
                return;
            }
            resp = inner.send(req) => match resp {
                Ok(resp) => resp,
                Err(e) => {
                    inner.note_failure(&e);
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let error = ApiError::HttpStatus {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            };
            inner.note_failure(&error);
            let _ = tx.send(Err(error)).await;
            return;
        }

        let mut stream = resp.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut body: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                // Cancellation must win over bytes already buffered;
                // dropping the stream closes the connection.
                biased;
                _ = cancelled(cancel_rx) => {
                    let _ = tx.send(Err(ApiError::Cancelled)).await;
                    return;
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                None => break,
                Some(Err(e)) => {
                    let _ = tx.send(Err(ApiError::from_transport(e))).await;
                    return;
                }
                Some(Ok(bytes)) => {
                    if !streaming {
                        // Single-shot: decode once from the full body.
                        body.extend_from_slice(&bytes);
                        continue;
                    }
                    let complete = match lines.feed(&bytes) {
                        Ok(complete) => complete,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                    for line in complete {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ChatChunk>(line) {
                            Ok(chunk) => {
                                if let Some(error) = chunk.error.clone() {
                                    let _ = tx.send(Err(ApiError::Api(error))).await;
                                    return;
                                }
                                if tx.send(Ok(chunk)).await.is_err() {
                                    // Consumer dropped the stream.
                                    return;
                                }
                            }
                            Err(e) => {
                                // For chat the first undecodable line ends
                                // the sequence.
                                let _ = tx
                                    .send(Err(ApiError::Decode {
                                        line: line.to_string(),
                                        message: e.to_string(),
                                    }))
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
        }

        if !streaming {
            match serde_json::from_slice::<ChatChunk>(&body) {
                Ok(chunk) => {
                    if let Some(error) = chunk.error.clone() {
                        let _ = tx.send(Err(ApiError::Api(error))).await;
                    } else {
                        let _ = tx.send(Ok(chunk)).await;
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(ApiError::Decode {
                            line: String::from_utf8_lossy(&body).into_owned(),
                            message: e.to_string(),
                        }))
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_idempotent_with_nothing_in_flight() {
        let client = OllamaClient::new();
        client.cancel_pull();
        client.cancel_chat(42);
        client.cancel_all_chats();
        client.cancel_pull();
    }

    #[tokio::test]
    async fn test_set_timeout_notifies_subscribers() {
        let client = OllamaClient::new();
        let mut rx = client.subscribe_timeout();
        assert_eq!(*rx.borrow(), RequestTimeout::Secs60);

        client.set_timeout(RequestTimeout::Mins5);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), RequestTimeout::Mins5);

        // Setting the same value again is a no-op.
        client.set_timeout(RequestTimeout::Mins5);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_state_snapshot_starts_empty() {
        let client = OllamaClient::new();
        let state = client.state();
        assert!(state.models.is_empty());
        assert!(!state.connection_error);
        assert_eq!(state.pull.phase, PullPhase::Idle);
        assert!(state.status_message.is_none());
    }

    #[tokio::test]
    async fn test_set_host_changes_urls() {
        let client = OllamaClient::new();
        client.set_host("https://remote:8443/");
        assert_eq!(client.inner.url("/api/tags"), "https://remote:8443/api/tags");
    }
}
