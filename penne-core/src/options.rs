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

//! Delivery options for change streams.
//!
//! Use [`ChangeStreamOptions::builder`] to construct validated options:
//!
//! ```rust
//! use penne_core::options::{ChangeStreamOptions, FullDocument};
//! use std::time::Duration;
//!
//! let options = ChangeStreamOptions::builder()
//!     .full_document(FullDocument::UpdateLookup)
//!     .batch_size(100)
//!     .max_await_time(Duration::from_secs(1))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(options.batch_size, Some(100));
//! ```

use crate::error::ChangeStreamError;
use crate::token::ResumeToken;
use bson::Document;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How much of the changed document the server includes in update events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullDocument {
    /// Server default: no full document for updates.
    #[default]
    Default,
    /// Look up the current document for update events.
    UpdateLookup,
    /// Include the post-image when the collection stores one.
    WhenAvailable,
    /// Require a post-image; the server errors if none is available.
    Required,
}

impl FullDocument {
    /// Returns the wire value of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::UpdateLookup => "updateLookup",
            Self::WhenAvailable => "whenAvailable",
            Self::Required => "required",
        }
    }
}

/// String comparison rules for the aggregation.
///
/// Only `locale` is required; unset fields are left to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collation {
    /// ICU locale, e.g. `"en"` or `"simple"`
    pub locale: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_level: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_first: Option<String>,

    /// Comparison level 1-5
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_ordering: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_variable: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backwards: Option<bool>,
}

impl Collation {
    /// Creates a collation for the given locale.
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            ..Self::default()
        }
    }

    /// Converts the collation into its command document form.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::Configuration`] if serialization fails.
    pub fn to_document(&self) -> Result<Document, ChangeStreamError> {
        bson::to_document(self).map_err(|e| ChangeStreamError::Configuration(e.to_string()))
    }
}

/// Options controlling what a change stream delivers and how it fetches.
///
/// ```rust
/// use penne_core::options::ChangeStreamOptions;
///
/// let options = ChangeStreamOptions::default();
/// assert!(options.resume_after.is_none());
/// assert!(options.resume_on_empty_batch);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeStreamOptions {
    /// Full-document mode for update events
    pub full_document: FullDocument,

    /// Logical starting point; `None` starts from the current time
    pub resume_after: Option<ResumeToken>,

    /// Documents per batch (`None` = server default)
    pub batch_size: Option<u32>,

    /// Longest time the server waits for new events on a fetch
    pub max_await_time: Option<Duration>,

    /// Collation for the aggregation
    pub collation: Option<Collation>,

    /// Whether an empty batch without an error is treated as a resumable
    /// failure (`true`) or simply polled again (`false`).
    pub resume_on_empty_batch: bool,
}

impl Default for ChangeStreamOptions {
    fn default() -> Self {
        Self {
            full_document: FullDocument::Default,
            resume_after: None,
            batch_size: None,
            max_await_time: None,
            collation: None,
            resume_on_empty_batch: true,
        }
    }
}

impl ChangeStreamOptions {
    /// Creates a new builder for change stream options.
    #[must_use]
    pub fn builder() -> ChangeStreamOptionsBuilder {
        ChangeStreamOptionsBuilder::default()
    }

    /// Validates the options.
    ///
    /// Returns an error if:
    /// - `batch_size` is set to 0
    /// - `max_await_time` is set to zero
    pub fn validate(&self) -> Result<(), ChangeStreamError> {
        if self.batch_size == Some(0) {
            return Err(ChangeStreamError::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_await_time.is_some_and(|d| d.is_zero()) {
            return Err(ChangeStreamError::Configuration(
                "max_await_time must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`ChangeStreamOptions`].
#[derive(Debug, Default)]
pub struct ChangeStreamOptionsBuilder {
    full_document: FullDocument,
    resume_after: Option<ResumeToken>,
    batch_size: Option<u32>,
    max_await_time: Option<Duration>,
    collation: Option<Collation>,
    resume_on_empty_batch: Option<bool>,
}

impl ChangeStreamOptionsBuilder {
    /// Sets the full-document mode.
    #[must_use]
    pub fn full_document(mut self, mode: FullDocument) -> Self {
        self.full_document = mode;
        self
    }

    /// Starts the stream after the given resume token.
    #[must_use]
    pub fn resume_after(mut self, token: ResumeToken) -> Self {
        self.resume_after = Some(token);
        self
    }

    /// Sets the batch size used for the aggregate and every fetch.
    #[must_use]
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Sets how long the server may block waiting for new events.
    #[must_use]
    pub fn max_await_time(mut self, duration: Duration) -> Self {
        self.max_await_time = Some(duration);
        self
    }

    /// Sets the collation.
    #[must_use]
    pub fn collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Chooses what an empty batch means.
    ///
    /// Default: `true` (empty batches go through the resume path).
    #[must_use]
    pub fn resume_on_empty_batch(mut self, resume: bool) -> Self {
        self.resume_on_empty_batch = Some(resume);
        self
    }

    /// Builds the options.
    ///
    /// # Errors
    ///
    /// Returns `ChangeStreamError::Configuration` if validation fails.
    pub fn build(self) -> Result<ChangeStreamOptions, ChangeStreamError> {
        let options = ChangeStreamOptions {
            full_document: self.full_document,
            resume_after: self.resume_after,
            batch_size: self.batch_size,
            max_await_time: self.max_await_time,
            collation: self.collation,
            resume_on_empty_batch: self.resume_on_empty_batch.unwrap_or(true),
        };

        options.validate()?;
        Ok(options)
    }
}
