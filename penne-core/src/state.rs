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

//! State storage for resume tokens.
//!
//! A [`ChangeStream`](crate::stream::ChangeStream) only keeps its resume token
//! in memory. The [`StateStore`] trait lets an application persist it with
//! [`ChangeStream::checkpoint`](crate::stream::ChangeStream::checkpoint) and
//! reopen at the same position after a restart with
//! [`Collection::watch_from_store`](crate::collection::Collection::watch_from_store).
//!
//! Tokens are keyed by the stream's `database.collection` name.

use crate::token::ResumeToken;
use std::collections::HashMap;

/// Trait for resume token storage backends.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Saves the resume token for a stream key.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be saved.
    async fn save_resume_token(&self, key: &str, token: &ResumeToken)
        -> Result<(), StateStoreError>;

    /// Retrieves the resume token for a stream key.
    ///
    /// Returns `None` if no token exists for the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be retrieved.
    async fn get_resume_token(&self, key: &str) -> Result<Option<ResumeToken>, StateStoreError>;

    /// Deletes the resume token for a stream key.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be deleted.
    async fn delete_resume_token(&self, key: &str) -> Result<(), StateStoreError>;

    /// Lists all stored resume tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokens cannot be listed.
    async fn list_resume_tokens(&self) -> Result<HashMap<String, ResumeToken>, StateStoreError>;

    /// Closes the state store, releasing any resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be closed cleanly.
    async fn close(&self) -> Result<(), StateStoreError>;
}

/// Errors that can occur during state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other errors
    #[error("State store error: {0}")]
    Other(String),
}
