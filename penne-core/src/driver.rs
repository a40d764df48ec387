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

//! [`Session`] and [`Cursor`] on top of the official `MongoDB` driver.
//!
//! Cursors are driven with raw `aggregate`, `getMore` and `killCursors`
//! commands so the server cursor id stays visible and can be killed on
//! resume. Every command of a cursor runs in the same explicit
//! `ClientSession`; [`MongoSession::duplicate`](Session::duplicate) starts a
//! new one.
//!
//! ## Server pinning
//!
//! A server cursor only exists on the node that ran the `aggregate`. The
//! aggregate is sent with a selection predicate that pins the first eligible
//! server it is offered (primary, mongos, standalone or load balancer);
//! `getMore` and `killCursors` for that cursor go to the pinned address only.
//! A new aggregate, e.g. after a resume, pins afresh.
//!
//! If the pinned server cannot be selected when killing its cursor, the
//! cursor died with it: the kill is skipped with a warning once server
//! selection gives up (`serverSelectionTimeoutMS`).

use crate::error::ChangeStreamError;
use crate::event::Namespace;
use crate::pipeline::AggregateOptions;
use crate::session::{Cursor, CursorId, Fetched, Session};
use async_trait::async_trait;
use bson::{doc, Bson, Document, RawDocumentBuf};
use mongodb::{
    error::{Error as MongoError, ErrorKind as MongoErrorKind},
    options::{ReadPreference, SelectionCriteria, ServerAddress},
    Client, ClientSession, ServerInfo, ServerType,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

impl From<MongoError> for ChangeStreamError {
    /// Server command errors keep their code (and not-primary classification);
    /// every other driver error is a transport failure.
    fn from(err: MongoError) -> Self {
        if let MongoErrorKind::Command(cmd_err) = err.kind.as_ref() {
            return Self::command(cmd_err.code, cmd_err.message.clone());
        }

        Self::Transport {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Server types that can own a change stream cursor.
fn is_cursor_host(server_type: ServerType) -> bool {
    matches!(
        server_type,
        ServerType::RsPrimary
            | ServerType::Mongos
            | ServerType::Standalone
            | ServerType::LoadBalancer
    )
}

/// The server a cursor lives on, fixed by the first selection that uses it.
#[derive(Debug, Clone, Default)]
struct ServerPin(Arc<OnceLock<ServerAddress>>);

impl ServerPin {
    /// Returns true if a server at `address` may run this cursor's commands.
    ///
    /// Unpinned, the first eligible server offered becomes the pin. Pinned,
    /// only the pinned address is admitted.
    fn admits(&self, eligible: bool, address: &ServerAddress) -> bool {
        match self.0.get() {
            Some(pinned) => pinned == address,
            None => eligible && self.0.get_or_init(|| address.clone()) == address,
        }
    }

    fn address(&self) -> Option<&ServerAddress> {
        self.0.get()
    }

    fn criteria(&self) -> SelectionCriteria {
        let pin = self.clone();
        SelectionCriteria::Predicate(Arc::new(move |info: &ServerInfo| {
            pin.admits(is_cursor_host(info.server_type()), info.address())
        }))
    }
}

/// A logical driver session.
#[derive(Clone)]
pub struct MongoSession {
    client: Client,
    session: Arc<Mutex<ClientSession>>,
    /// Pins of live cursors, shared with duplicated sessions so a resume can
    /// kill the stale cursor on its own server.
    cursor_hosts: Arc<Mutex<HashMap<CursorId, ServerPin>>>,
}

impl std::fmt::Debug for MongoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoSession").finish_non_exhaustive()
    }
}

impl MongoSession {
    /// Starts a new logical session on `client`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the driver cannot start a session.
    pub async fn start(client: Client) -> Result<Self, ChangeStreamError> {
        let session = client.start_session().await?;
        Ok(Self {
            client,
            session: Arc::new(Mutex::new(session)),
            cursor_hosts: Arc::default(),
        })
    }

    /// Returns the underlying driver client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn run(
        &self,
        database: &str,
        command: Document,
        criteria: SelectionCriteria,
    ) -> Result<Document, MongoError> {
        let mut session = self.session.lock().await;
        self.client
            .database(database)
            .run_command(command)
            .selection_criteria(criteria)
            .session(&mut *session)
            .await
    }

    async fn kill_one(&self, namespace: &Namespace, cursor_id: CursorId) -> Result<(), ChangeStreamError> {
        let pin = self.cursor_hosts.lock().await.remove(&cursor_id);
        let criteria = pin.as_ref().map_or(
            SelectionCriteria::ReadPreference(ReadPreference::Primary),
            ServerPin::criteria,
        );
        let command = doc! {
            "killCursors": namespace.collection.as_str(),
            "cursors": [cursor_id],
        };

        match self.run(&namespace.database, command, criteria).await {
            Ok(_) => {
                debug!(namespace = %namespace, cursor_id, "Killed cursor");
                Ok(())
            }
            Err(err)
                if pin.is_some()
                    && matches!(err.kind.as_ref(), MongoErrorKind::ServerSelection { .. }) =>
            {
                warn!(
                    namespace = %namespace,
                    cursor_id,
                    server = ?pin.as_ref().and_then(ServerPin::address),
                    error = %err,
                    "Cursor host unreachable, skipping kill"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Session for MongoSession {
    type Cursor = MongoCursor;

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> Result<MongoCursor, ChangeStreamError> {
        let mut cursor_options = Document::new();
        if let Some(size) = options.batch_size {
            cursor_options.insert("batchSize", i64::from(size));
        }

        let mut command = doc! {
            "aggregate": namespace.collection.as_str(),
            "pipeline": pipeline,
            "cursor": cursor_options,
        };
        if let Some(collation) = &options.collation {
            command.insert("collation", collation.to_document()?);
        }

        let pin = ServerPin::default();
        let reply = self
            .run(&namespace.database, command, pin.criteria())
            .await?;
        let (id, batch) = parse_batch(&reply, "firstBatch")?;

        if id != 0 {
            self.cursor_hosts.lock().await.insert(id, pin.clone());
        }

        debug!(
            namespace = %namespace,
            cursor_id = id,
            server = ?pin.address(),
            first_batch = batch.len(),
            "Opened aggregation cursor"
        );

        Ok(MongoCursor {
            session: self.clone(),
            pin,
            namespace: namespace.clone(),
            id,
            buffer: batch,
            batch_size: options.batch_size,
            max_await_time: options.max_await_time,
            change_stream: options.change_stream,
        })
    }

    async fn duplicate(&self) -> Result<Self, ChangeStreamError> {
        let mut session = Self::start(self.client.clone()).await?;
        session.cursor_hosts = Arc::clone(&self.cursor_hosts);
        Ok(session)
    }

    async fn kill_cursors(
        &self,
        namespace: &Namespace,
        cursor_ids: &[CursorId],
    ) -> Result<(), ChangeStreamError> {
        for &cursor_id in cursor_ids {
            self.kill_one(namespace, cursor_id).await?;
        }
        Ok(())
    }
}

/// A server cursor fetched with `getMore`.
#[derive(Debug)]
pub struct MongoCursor {
    session: MongoSession,
    pin: ServerPin,
    namespace: Namespace,
    id: CursorId,
    buffer: VecDeque<RawDocumentBuf>,
    batch_size: Option<u32>,
    max_await_time: Option<Duration>,
    change_stream: bool,
}

impl MongoCursor {
    fn get_more_command(&self) -> Document {
        let mut command = doc! {
            "getMore": self.id,
            "collection": self.namespace.collection.as_str(),
        };
        if let Some(size) = self.batch_size {
            command.insert("batchSize", i64::from(size));
        }
        if let Some(wait) = self.max_await_time {
            command.insert(
                "maxTimeMS",
                i64::try_from(wait.as_millis()).unwrap_or(i64::MAX),
            );
        }
        command
    }
}

#[async_trait]
impl Cursor for MongoCursor {
    fn id(&self) -> CursorId {
        self.id
    }

    async fn fetch(&mut self) -> Result<Fetched, ChangeStreamError> {
        loop {
            if let Some(raw) = self.buffer.pop_front() {
                return Ok(Fetched::Document(raw));
            }
            if self.id == 0 {
                return Ok(Fetched::Exhausted);
            }

            let reply = self
                .session
                .run(
                    &self.namespace.database,
                    self.get_more_command(),
                    self.pin.criteria(),
                )
                .await?;
            let (id, batch) = parse_batch(&reply, "nextBatch")?;
            trace!(cursor_id = id, batch = batch.len(), "getMore returned");

            if id == 0 {
                self.session.cursor_hosts.lock().await.remove(&self.id);
            }
            self.id = id;
            self.buffer = batch;

            // An empty change stream batch means no events arrived within the
            // await window.
            if self.buffer.is_empty() && (self.change_stream || self.id == 0) {
                return Ok(Fetched::Exhausted);
            }
        }
    }
}

/// Reads the cursor id and a batch out of an `aggregate`/`getMore` reply.
fn parse_batch(
    reply: &Document,
    field: &str,
) -> Result<(CursorId, VecDeque<RawDocumentBuf>), ChangeStreamError> {
    let malformed = |e: bson::document::ValueAccessError| {
        ChangeStreamError::command(0, format!("malformed cursor reply: {e}"))
    };

    let cursor = reply.get_document("cursor").map_err(malformed)?;
    let id = cursor.get_i64("id").map_err(malformed)?;
    let batch = cursor
        .get_array(field)
        .map_err(malformed)?
        .iter()
        .map(|entry| match entry {
            Bson::Document(doc) => RawDocumentBuf::from_document(doc)
                .map_err(|e| ChangeStreamError::Decode(e.to_string())),
            other => Err(ChangeStreamError::command(
                0,
                format!("malformed cursor reply: batch entry is {:?}", other.element_type()),
            )),
        })
        .collect::<Result<VecDeque<_>, _>>()?;

    Ok((id, batch))
}
