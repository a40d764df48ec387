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

//! Session and cursor abstractions.
//!
//! A change stream only needs three things from the database layer:
//!
//! - run an aggregation and get a streaming cursor back ([`Session::aggregate`])
//! - start a fresh logical session on a newly selected node ([`Session::duplicate`])
//! - kill a server-side cursor by id ([`Session::kill_cursors`])
//!
//! [`MongoSession`](crate::driver::MongoSession) implements these traits on top of
//! the official driver. Tests use scripted in-memory implementations.

use crate::error::ChangeStreamError;
use crate::event::Namespace;
use crate::pipeline::AggregateOptions;
use async_trait::async_trait;
use bson::{Document, RawDocumentBuf};

/// Server-assigned cursor identifier. `0` means the cursor is closed.
pub type CursorId = i64;

/// Outcome of a single fetch from a cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// The next raw change document.
    Document(RawDocumentBuf),

    /// The cursor returned nothing and reported no error: the batch was
    /// empty after the await window, or the server closed the cursor.
    Exhausted,
}

/// A streaming cursor over aggregation results.
#[async_trait]
pub trait Cursor: Send {
    /// Returns the server-side identifier of this cursor.
    fn id(&self) -> CursorId;

    /// Fetches the next document, issuing a `getMore` when the local batch
    /// is drained.
    ///
    /// # Errors
    ///
    /// Returns the transport or server error reported by the fetch.
    async fn fetch(&mut self) -> Result<Fetched, ChangeStreamError>;
}

/// A logical session bound to a database deployment.
#[async_trait]
pub trait Session: Send + Sync + Sized + 'static {
    /// The cursor type produced by [`aggregate`](Session::aggregate).
    type Cursor: Cursor + 'static;

    /// Runs an aggregation and returns its cursor.
    ///
    /// # Errors
    ///
    /// Returns the error reported while opening the cursor.
    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> Result<Self::Cursor, ChangeStreamError>;

    /// Creates a new logical session whose commands go through a freshly
    /// selected node and connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no session can be started.
    async fn duplicate(&self) -> Result<Self, ChangeStreamError>;

    /// Asks the server to kill the given cursors.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the server or transport.
    async fn kill_cursors(
        &self,
        namespace: &Namespace,
        cursor_ids: &[CursorId],
    ) -> Result<(), ChangeStreamError>;
}
