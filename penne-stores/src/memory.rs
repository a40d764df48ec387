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

//! In-memory resume token store.
//!
//! Keeps one [`ResumeToken`] per stream key (`database.collection`) in a
//! shared map. Clones share the same map, so a store handed to several tasks
//! sees every checkpoint.
//!
//! Tokens do not survive a restart. The store is meant for tests, local
//! development, and processes that only need to reopen a stream after
//! closing it, e.g. when rotating sessions.
//!
//! # Example
//!
//! ```rust
//! use penne_core::state::StateStore;
//! use penne_core::ResumeToken;
//! use penne_stores::memory::MemoryStore;
//! use bson::doc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let token = ResumeToken::new(doc! { "_data": "826A" });
//!
//! store.save_resume_token("shop.orders", &token).await?;
//! assert_eq!(store.get_resume_token("shop.orders").await?, Some(token));
//!
//! store.delete_resume_token("shop.orders").await?;
//! assert!(store.is_empty().await);
//! # Ok(())
//! # }
//! ```

use penne_core::state::{StateStore, StateStoreError};
use penne_core::ResumeToken;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

/// Process-local [`StateStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tokens: Arc<RwLock<HashMap<String, ResumeToken>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `tokens`, keyed by stream name.
    #[must_use]
    pub fn with_tokens(tokens: HashMap<String, ResumeToken>) -> Self {
        debug!(token_count = tokens.len(), "Seeding memory store");
        Self {
            tokens: Arc::new(RwLock::new(tokens)),
        }
    }

    /// Returns the number of stored tokens.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    /// Returns `true` if no token is stored.
    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }

    /// Removes every stored token.
    pub async fn clear(&self) {
        let mut tokens = self.tokens.write().await;
        debug!(cleared = tokens.len(), "Clearing memory store");
        tokens.clear();
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStore {
    async fn save_resume_token(&self, key: &str, token: &ResumeToken) -> Result<(), StateStoreError> {
        let previous = self
            .tokens
            .write()
            .await
            .insert(key.to_string(), token.clone());

        trace!(
            stream = key,
            replaced = previous.is_some(),
            "Saved resume token"
        );
        Ok(())
    }

    async fn get_resume_token(&self, key: &str) -> Result<Option<ResumeToken>, StateStoreError> {
        let token = self.tokens.read().await.get(key).cloned();
        trace!(stream = key, found = token.is_some(), "Looked up resume token");
        Ok(token)
    }

    async fn delete_resume_token(&self, key: &str) -> Result<(), StateStoreError> {
        if self.tokens.write().await.remove(key).is_none() {
            warn!(stream = key, "No resume token to delete");
        } else {
            debug!(stream = key, "Deleted resume token");
        }
        Ok(())
    }

    async fn list_resume_tokens(&self) -> Result<HashMap<String, ResumeToken>, StateStoreError> {
        Ok(self.tokens.read().await.clone())
    }

    async fn close(&self) -> Result<(), StateStoreError> {
        Ok(())
    }
}
