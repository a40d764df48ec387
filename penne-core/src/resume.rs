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

//! Re-establishing a change stream cursor after a resumable failure.
//!
//! ## Resume Sequence
//!
//! 1. Duplicate the current session, so commands go through a newly
//!    selected node instead of the possibly dead connection
//! 2. Kill the stale server-side cursor over the new session
//! 3. Rebind the collection to the new session
//! 4. Rebuild the pipeline with the latest resume token
//! 5. Run the aggregation on the new session to get a fresh cursor
//!
//! Any failure aborts the sequence and is returned as-is. There is no retry
//! and no backoff here: the caller makes at most one attempt per failed fetch.

use crate::collection::Collection;
use crate::error::ChangeStreamError;
use crate::options::ChangeStreamOptions;
use crate::pipeline::{build_pipeline, AggregateOptions};
use crate::session::{Cursor, CursorId, Session};
use crate::token::ResumeToken;
use bson::Document;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Runs the resume sequence and returns the replacement cursor.
///
/// The pipeline is rebuilt from `stages` with `resume_token`, falling back to
/// `options.resume_after` when no document has been consumed yet.
///
/// # Errors
///
/// Returns the first error raised by session duplication, cursor cleanup, or
/// the new aggregation. A cleanup failure is fatal and is not retried.
#[instrument(skip_all, fields(namespace = %collection.namespace(), stale_cursor = stale_cursor))]
pub async fn resume<S: Session>(
    collection: &Collection<S>,
    stale_cursor: CursorId,
    stages: &[Document],
    options: &ChangeStreamOptions,
    resume_token: Option<&ResumeToken>,
) -> Result<S::Cursor, ChangeStreamError> {
    let namespace = collection.namespace();

    let session = Arc::new(collection.session().await.duplicate().await?);

    if stale_cursor == 0 {
        debug!("Stale cursor already closed by the server, nothing to kill");
    } else {
        session.kill_cursors(namespace, &[stale_cursor]).await?;
        debug!("Killed stale cursor");
    }

    collection.rebind(Arc::clone(&session)).await;

    let token = resume_token.or(options.resume_after.as_ref());
    let pipeline = build_pipeline(stages, options, token);

    let cursor = session
        .aggregate(
            namespace,
            pipeline,
            &AggregateOptions::for_change_stream(options),
        )
        .await?;

    info!(
        new_cursor = cursor.id(),
        has_token = token.is_some(),
        "Change stream cursor re-established"
    );

    Ok(cursor)
}
