// Copyright 2025 Penne Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Resumable change stream cursor.
//!
//! [`ChangeStream`] iterates change events and recovers once from a transient
//! failure (network error, primary failover, empty batch) by re-opening the
//! server-side cursor after the last delivered event.
//!
//! ## Fetch Flow
//!
//! ```text
//!  next()
//!    │
//!    ├─ stream failed/closed? ──────────────► None (no I/O)
//!    │
//!    ├─ fetch ── ok ─────────────────────────┐
//!    │    │                                  │
//!    │    └─ error ── fatal? ───────────────►│ Failed
//!    │         │                             │
//!    │         └─ resumable: resume ── err ─►│ Failed
//!    │                │                      │
//!    │                └─ fetch once ── err ─►│ Failed
//!    │                       │               │
//!    │                       ok              │
//!    ▼                       ▼               │
//!  read _id ── missing ─────────────────────►│ Failed
//!    │
//!    ▼
//!  decode, store token ──► Some(event)
//! ```
//!
//! ## States
//!
//! - **Open**: delivering events
//! - **Failed**: a terminal error is stored; every `next` returns `None`
//! - **Closed**: closed by the caller
//!
//! A resume in progress counts as Failed with
//! [`ChangeStreamError::ResumeInterrupted`] until it completes, so a `next`
//! call cancelled mid-resume leaves the stream failed rather than open on a
//! killed cursor.
//!
//! Failed and Closed are terminal. A failed stream never recovers; open a new
//! one with [`Collection::watch`](crate::collection::Collection::watch), e.g.
//! from [`ChangeStream::resume_token`].
//!
//! ## Concurrency
//!
//! All mutable state sits behind one async mutex held for the whole `next`
//! call, resume I/O included. Calls from tasks sharing an `Arc<ChangeStream>`
//! are serialized and every document goes to exactly one caller.

use crate::collection::Collection;
use crate::error::ChangeStreamError;
use crate::event::Namespace;
use crate::metrics::{self, ResumeOutcome};
use crate::options::ChangeStreamOptions;
use crate::resume;
use crate::session::{Cursor, Fetched, Session};
use crate::state::{StateStore, StateStoreError};
use crate::token::ResumeToken;
use bson::{Document, RawDocumentBuf};
use futures::Stream;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Delivering events
    Open,
    /// A terminal error is stored
    Failed,
    /// Closed by the caller
    Closed,
}

/// State guarded by the stream mutex.
struct Inner<C> {
    cursor: Option<C>,
    resume_token: Option<ResumeToken>,
    error: Option<Arc<ChangeStreamError>>,
    state: StreamState,
    /// Whether this stream still counts toward the open-streams gauge.
    gauge_held: bool,
}

impl<C> Inner<C> {
    fn release_gauge(&mut self) {
        if self.gauge_held {
            self.gauge_held = false;
            metrics::decrement_open_streams();
        }
    }
}

/// A change stream that resumes once per failed fetch.
///
/// Created by [`Collection::watch`]. Methods take `&self`; share the stream
/// across tasks with an `Arc`.
///
/// # Examples
///
/// ```rust,no_run
/// use penne_core::event::ChangeEvent;
/// use penne_core::session::Session;
/// use penne_core::stream::ChangeStream;
///
/// async fn drain<S: Session>(stream: &ChangeStream<S>) {
///     while let Some(event) = stream.next::<ChangeEvent>().await {
///         println!("{:?} on {}", event.operation, event.namespace);
///     }
///
///     match stream.err().await {
///         Some(err) => eprintln!("stream failed: {err}"),
///         None => println!("stream closed"),
///     }
/// }
/// ```
pub struct ChangeStream<S: Session> {
    collection: Collection<S>,
    stages: Arc<[Document]>,
    options: ChangeStreamOptions,
    inner: Mutex<Inner<S::Cursor>>,
}

impl<S: Session> std::fmt::Debug for ChangeStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("namespace", self.namespace())
            .field("stages", &self.stages)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: Session> ChangeStream<S> {
    pub(crate) fn new(
        collection: Collection<S>,
        stages: Arc<[Document]>,
        options: ChangeStreamOptions,
        cursor: S::Cursor,
    ) -> Self {
        debug!(
            namespace = %collection.namespace(),
            cursor_id = cursor.id(),
            "Change stream opened"
        );
        metrics::increment_open_streams();

        Self {
            collection,
            stages,
            options,
            inner: Mutex::new(Inner {
                cursor: Some(cursor),
                resume_token: None,
                error: None,
                state: StreamState::Open,
                gauge_held: true,
            }),
        }
    }

    /// Returns the namespace being watched.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        self.collection.namespace()
    }

    /// Returns the options the stream was opened with.
    #[must_use]
    pub fn options(&self) -> &ChangeStreamOptions {
        &self.options
    }

    /// Returns the next change document decoded as `T`.
    ///
    /// Waits for the next event, resuming once if the fetch fails with a
    /// resumable error. Returns `None` when the stream is closed or has failed;
    /// check [`err`](Self::err) to tell the two apart.
    ///
    /// A document without an `_id` field fails the stream with
    /// [`ChangeStreamError::MissingResumeToken`]: without it the stream could
    /// not resume past that document.
    ///
    /// # Cancel safety
    ///
    /// Not cancel safe. Dropping the future while a fetch is in flight can
    /// lose the batch the server already returned. Dropping it while resuming
    /// fails the stream with [`ChangeStreamError::ResumeInterrupted`]; reopen
    /// it from [`resume_token`](Self::resume_token). Drive `next` to
    /// completion, or only cancel it when the stream is being shut down.
    pub async fn next<T: DeserializeOwned>(&self) -> Option<T> {
        let mut inner = self.inner.lock().await;

        if inner.state != StreamState::Open {
            return None;
        }

        match self.next_locked(&mut inner).await {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(&mut inner, err);
                None
            }
        }
    }

    /// Decodes the next change document into `out`.
    ///
    /// Returns `true` on success. On `false`, `out` is left untouched and
    /// [`err`](Self::err) reports the terminal error, if any.
    pub async fn next_into<T: DeserializeOwned>(&self, out: &mut T) -> bool {
        match self.next::<T>().await {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    /// Returns the terminal error, if the stream failed.
    pub async fn err(&self) -> Option<Arc<ChangeStreamError>> {
        self.inner.lock().await.error.clone()
    }

    /// Returns the token of the last delivered document.
    ///
    /// `None` until the first document has been delivered.
    pub async fn resume_token(&self) -> Option<ResumeToken> {
        self.inner.lock().await.resume_token.clone()
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> StreamState {
        self.inner.lock().await.state
    }

    /// Returns true if [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.state().await == StreamState::Closed
    }

    /// Closes the stream and kills its server-side cursor.
    ///
    /// The stream is closed even when the kill fails; the kill error is
    /// returned. Closing a failed stream performs no I/O.
    ///
    /// # Errors
    ///
    /// - [`ChangeStreamError::Closed`] if the stream was already closed
    /// - the error reported while killing the cursor
    pub async fn close(&self) -> Result<(), ChangeStreamError> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            StreamState::Closed => return Err(ChangeStreamError::Closed),
            StreamState::Failed => {
                inner.cursor = None;
                inner.state = StreamState::Closed;
                inner.release_gauge();
                debug!(namespace = %self.namespace(), "Closed failed change stream");
                return Ok(());
            }
            StreamState::Open => {}
        }

        inner.state = StreamState::Closed;
        inner.release_gauge();
        info!(namespace = %self.namespace(), "Closing change stream");

        let Some(cursor) = inner.cursor.take() else {
            return Ok(());
        };
        if cursor.id() == 0 {
            return Ok(());
        }

        let session = self.collection.session().await;
        session
            .kill_cursors(self.namespace(), &[cursor.id()])
            .await
            .inspect_err(|e| {
                warn!(
                    namespace = %self.namespace(),
                    cursor_id = cursor.id(),
                    error = %e,
                    "Failed to kill cursor while closing change stream"
                );
            })
    }

    /// Saves the last delivered resume token to `store`.
    ///
    /// The token is stored under the namespace's full name. Returns `false`
    /// when no document has been delivered yet.
    ///
    /// # Errors
    ///
    /// Returns the store's error if saving fails.
    pub async fn checkpoint<T>(&self, store: &T) -> Result<bool, StateStoreError>
    where
        T: StateStore + ?Sized,
    {
        let Some(token) = self.resume_token().await else {
            return Ok(false);
        };

        store
            .save_resume_token(&self.namespace().full_name(), &token)
            .await?;
        trace!(namespace = %self.namespace(), "Checkpointed resume token");
        Ok(true)
    }

    /// Converts the stream into a [`Stream`] of decoded documents.
    ///
    /// The stream yields the terminal error once, then ends. An explicit
    /// close ends it without an error.
    pub fn into_stream<T>(self) -> impl Stream<Item = Result<T, Arc<ChangeStreamError>>> + Send
    where
        T: DeserializeOwned + Send + 'static,
    {
        futures::stream::unfold(Some(self), |stream| async move {
            let Some(stream) = stream else {
                return None;
            };
            match stream.next::<T>().await {
                Some(value) => Some((Ok(value), Some(stream))),
                None => stream.err().await.map(|err| (Err(err), None)),
            }
        })
    }

    async fn next_locked<T: DeserializeOwned>(
        &self,
        inner: &mut Inner<S::Cursor>,
    ) -> Result<T, ChangeStreamError> {
        let raw = match self.fetch(inner).await {
            Ok(raw) => raw,
            Err(err) if err.is_resumable() => {
                warn!(
                    namespace = %self.namespace(),
                    error = %err,
                    category = err.category(),
                    "Resumable change stream error, resuming once"
                );
                // Failed until resume and the retry fetch both complete.
                inner.state = StreamState::Failed;
                inner.error = Some(Arc::new(ChangeStreamError::ResumeInterrupted));

                self.resume(inner).await?;
                let raw = self.fetch(inner).await?;

                inner.state = StreamState::Open;
                inner.error = None;
                raw
            }
            Err(err) => return Err(err),
        };

        let token = ResumeToken::from_change_document(&raw)?;
        let value = bson::from_slice::<T>(raw.as_bytes())
            .map_err(|e| ChangeStreamError::Decode(e.to_string()))?;

        trace!(namespace = %self.namespace(), token = ?token, "Stored resume token");
        inner.resume_token = Some(token);
        metrics::increment_events_received(&self.namespace().full_name());

        Ok(value)
    }

    /// Fetches one raw document from the current cursor.
    async fn fetch(&self, inner: &mut Inner<S::Cursor>) -> Result<RawDocumentBuf, ChangeStreamError> {
        let cursor = inner.cursor.as_mut().ok_or(ChangeStreamError::Closed)?;

        loop {
            match cursor.fetch().await? {
                Fetched::Document(raw) => return Ok(raw),
                Fetched::Exhausted if self.options.resume_on_empty_batch || cursor.id() == 0 => {
                    return Err(ChangeStreamError::CursorExhausted);
                }
                Fetched::Exhausted => {
                    trace!(namespace = %self.namespace(), "Empty batch, polling again");
                }
            }
        }
    }

    async fn resume(&self, inner: &mut Inner<S::Cursor>) -> Result<(), ChangeStreamError> {
        let stale_cursor = inner.cursor.as_ref().map_or(0, Cursor::id);
        let namespace = self.namespace().full_name();

        match resume::resume(
            &self.collection,
            stale_cursor,
            &self.stages,
            &self.options,
            inner.resume_token.as_ref(),
        )
        .await
        {
            Ok(cursor) => {
                metrics::increment_resumes(&namespace, ResumeOutcome::Success);
                inner.cursor = Some(cursor);
                Ok(())
            }
            Err(err) => {
                metrics::increment_resumes(&namespace, ResumeOutcome::Failure);
                Err(err)
            }
        }
    }

    fn fail(&self, inner: &mut Inner<S::Cursor>, err: ChangeStreamError) {
        error!(
            namespace = %self.namespace(),
            error = %err,
            category = err.category(),
            "Change stream failed"
        );
        metrics::increment_stream_failures(&self.namespace().full_name(), err.category());
        inner.release_gauge();

        inner.error = Some(Arc::new(err));
        inner.state = StreamState::Failed;
    }
}

impl<S: Session> Drop for ChangeStream<S> {
    fn drop(&mut self) {
        self.inner.get_mut().release_gauge();
    }
}
