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

//! Collection handle with a swappable session.
//!
//! A [`Collection`] pairs a [`Namespace`] with the session used to reach it.
//! Clones share the same session slot: when a change stream resumes it swaps
//! the slot to the new session in one step, so every clone observes either the
//! old session or the new one.

use crate::error::ChangeStreamError;
use crate::event::Namespace;
use crate::options::ChangeStreamOptions;
use crate::pipeline::{build_pipeline, stages_to_documents, AggregateOptions, Stage};
use crate::session::Session;
use crate::state::StateStore;
use crate::stream::ChangeStream;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A collection bound to a session.
pub struct Collection<S: Session> {
    namespace: Namespace,
    session: Arc<RwLock<Arc<S>>>,
}

impl<S: Session> Clone for Collection<S> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: Session> std::fmt::Debug for Collection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<S: Session> Collection<S> {
    /// Creates a collection handle for `namespace` using `session`.
    pub fn new(session: S, namespace: Namespace) -> Self {
        Self {
            namespace,
            session: Arc::new(RwLock::new(Arc::new(session))),
        }
    }

    /// Returns the namespace of this collection.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the session currently bound to this collection.
    pub async fn session(&self) -> Arc<S> {
        Arc::clone(&*self.session.read().await)
    }

    /// Replaces the bound session for this handle and all of its clones.
    pub(crate) async fn rebind(&self, session: Arc<S>) {
        *self.session.write().await = session;
        debug!(namespace = %self.namespace, "Rebound collection to new session");
    }

    /// Opens a change stream on this collection.
    ///
    /// The `$changeStream` stage is prepended to `stages`; when
    /// `options.resume_after` is set the stream starts after that token.
    ///
    /// # Errors
    ///
    /// - [`ChangeStreamError::Configuration`] if the options are invalid
    /// - [`ChangeStreamError::InvalidPipeline`] if a stage is not a document
    /// - any error reported while opening the cursor, e.g. a command error
    ///   when the deployment does not support change streams
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use penne_core::collection::Collection;
    /// use penne_core::driver::MongoSession;
    /// use penne_core::event::{ChangeEvent, Namespace};
    /// use penne_core::options::ChangeStreamOptions;
    /// use bson::doc;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = mongodb::Client::with_uri_str("mongodb://localhost:27017/?replicaSet=rs0").await?;
    /// let session = MongoSession::start(client).await?;
    /// let users = Collection::new(session, Namespace::new("mydb", "users"));
    ///
    /// let stream = users
    ///     .watch(
    ///         &[doc! { "$match": { "operationType": "insert" } }],
    ///         ChangeStreamOptions::default(),
    ///     )
    ///     .await?;
    ///
    /// while let Some(event) = stream.next::<ChangeEvent>().await {
    ///     println!("{:?}", event.operation);
    /// }
    ///
    /// if let Some(err) = stream.err().await {
    ///     eprintln!("stream failed: {err}");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn watch<St: Stage>(
        &self,
        stages: &[St],
        options: ChangeStreamOptions,
    ) -> Result<ChangeStream<S>, ChangeStreamError> {
        options.validate()?;
        let stages: Arc<[bson::Document]> = stages_to_documents(stages)?.into();

        let pipeline = build_pipeline(&stages, &options, options.resume_after.as_ref());
        let session = self.session().await;

        info!(
            namespace = %self.namespace,
            stages = stages.len(),
            resuming = options.resume_after.is_some(),
            "Opening change stream"
        );

        let cursor = session
            .aggregate(
                &self.namespace,
                pipeline,
                &AggregateOptions::for_change_stream(&options),
            )
            .await?;

        Ok(ChangeStream::new(self.clone(), stages, options, cursor))
    }

    /// Opens a change stream starting after the token saved in `store`.
    ///
    /// The token is looked up under the namespace's full name. When the store
    /// holds no token, `options.resume_after` is left as given.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::StateStore`] if the lookup fails, or any
    /// error [`watch`](Self::watch) can return.
    pub async fn watch_from_store<St, T>(
        &self,
        store: &T,
        stages: &[St],
        mut options: ChangeStreamOptions,
    ) -> Result<ChangeStream<S>, ChangeStreamError>
    where
        St: Stage,
        T: StateStore + ?Sized,
    {
        let key = self.namespace.full_name();
        if let Some(token) = store.get_resume_token(&key).await? {
            debug!(namespace = %self.namespace, "Loaded resume token from state store");
            options.resume_after = Some(token);
        }

        self.watch(stages, options).await
    }
}
