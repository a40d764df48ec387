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

//! Change stream pipeline construction.
//!
//! A change stream is an aggregation whose first stage is `$changeStream`.
//! This module prepends that stage to the caller's stages:
//!
//! ```text
//! [ { "$changeStream": { fullDocument?, resumeAfter? } }, caller stage 0, caller stage 1, ... ]
//! ```
//!
//! The builder is pure. It runs once when the stream is opened and again on
//! every resume, with the latest resume token.
//!
//! # Example
//!
//! ```rust
//! use penne_core::options::ChangeStreamOptions;
//! use penne_core::pipeline::{build_pipeline, stages_to_documents};
//! use bson::doc;
//!
//! let stages = stages_to_documents(&[doc! { "$match": { "operationType": "insert" } }]).unwrap();
//! let pipeline = build_pipeline(&stages, &ChangeStreamOptions::default(), None);
//!
//! assert_eq!(pipeline.len(), 2);
//! assert_eq!(pipeline[0], doc! { "$changeStream": {} });
//! ```

use crate::error::ChangeStreamError;
use crate::options::{ChangeStreamOptions, Collation, FullDocument};
use crate::token::ResumeToken;
use bson::{doc, Document};
use serde::Serialize;
use std::time::Duration;

/// Name of the injected stage.
pub const CHANGE_STREAM_STAGE: &str = "$changeStream";

/// A caller-supplied aggregation stage.
///
/// Anything that serializes to a BSON document is a stage, including
/// [`bson::Document`] itself and typed stage structs.
pub trait Stage {
    /// Converts the stage into its document form.
    ///
    /// # Errors
    ///
    /// Returns a message describing why the value is not a document.
    fn to_stage_document(&self) -> Result<Document, String>;
}

impl<T: Serialize + ?Sized> Stage for T {
    fn to_stage_document(&self) -> Result<Document, String> {
        bson::to_document(self).map_err(|e| e.to_string())
    }
}

/// Converts typed caller stages into documents, preserving order.
///
/// # Errors
///
/// Returns [`ChangeStreamError::InvalidPipeline`] naming the first stage that
/// does not serialize to a document.
pub fn stages_to_documents<S: Stage>(stages: &[S]) -> Result<Vec<Document>, ChangeStreamError> {
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            stage
                .to_stage_document()
                .map_err(|message| ChangeStreamError::InvalidPipeline { index, message })
        })
        .collect()
}

/// Builds the `$changeStream` stage for the given options and token.
///
/// `fullDocument` is only emitted for a non-default mode, and `resumeAfter`
/// only when a token is known.
#[must_use]
pub fn change_stream_stage(
    options: &ChangeStreamOptions,
    resume_after: Option<&ResumeToken>,
) -> Document {
    let mut stage_options = Document::new();

    if options.full_document != FullDocument::Default {
        stage_options.insert("fullDocument", options.full_document.as_str());
    }
    if let Some(token) = resume_after {
        stage_options.insert("resumeAfter", token.as_bson().clone());
    }

    doc! { CHANGE_STREAM_STAGE: stage_options }
}

/// Builds the full pipeline: the change stream stage followed by `stages`.
#[must_use]
pub fn build_pipeline(
    stages: &[Document],
    options: &ChangeStreamOptions,
    resume_after: Option<&ResumeToken>,
) -> Vec<Document> {
    let mut pipeline = Vec::with_capacity(stages.len() + 1);
    pipeline.push(change_stream_stage(options, resume_after));
    pipeline.extend(stages.iter().cloned());
    pipeline
}

/// Options for the aggregate command that opens a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    /// Documents per batch
    pub batch_size: Option<u32>,

    /// Longest server-side wait for a fetch
    pub max_await_time: Option<Duration>,

    /// Collation for the aggregation
    pub collation: Option<Collation>,

    /// Marks the cursor as a change stream cursor, so an empty batch means
    /// "no events yet" rather than a finished result set.
    pub change_stream: bool,
}

impl AggregateOptions {
    /// Derives aggregate options for a change stream cursor.
    #[must_use]
    pub fn for_change_stream(options: &ChangeStreamOptions) -> Self {
        Self {
            batch_size: options.batch_size,
            max_await_time: options.max_await_time,
            collation: options.collation.clone(),
            change_stream: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Limit {
        #[serde(rename = "$limit")]
        limit: i64,
    }

    #[test]
    fn test_stage_without_options() {
        let stage = change_stream_stage(&ChangeStreamOptions::default(), None);
        assert_eq!(stage, doc! { "$changeStream": {} });
    }

    #[test]
    fn test_stage_with_full_document_and_token() {
        let options = ChangeStreamOptions::builder()
            .full_document(FullDocument::UpdateLookup)
            .build()
            .unwrap();
        let token = ResumeToken::from(doc! { "_data": "82" });

        let stage = change_stream_stage(&options, Some(&token));
        assert_eq!(
            stage,
            doc! { "$changeStream": { "fullDocument": "updateLookup", "resumeAfter": { "_data": "82" } } }
        );
    }

    #[test]
    fn test_pipeline_preserves_caller_order() {
        let stages = vec![
            doc! { "$match": { "operationType": "insert" } },
            doc! { "$project": { "fullDocument": 1 } },
        ];
        let token = ResumeToken::from(doc! { "_data": "T" });

        let pipeline = build_pipeline(&stages, &ChangeStreamOptions::default(), Some(&token));

        assert_eq!(pipeline.len(), 3);
        assert_eq!(
            pipeline[0].get_document(CHANGE_STREAM_STAGE).unwrap().get("resumeAfter"),
            Some(&bson::Bson::Document(doc! { "_data": "T" }))
        );
        assert_eq!(&pipeline[1..], &stages[..]);
    }

    #[test]
    fn test_typed_stages() {
        let docs = stages_to_documents(&[Limit { limit: 5 }]).unwrap();
        assert_eq!(docs, vec![doc! { "$limit": 5_i64 }]);
    }

    #[test]
    fn test_non_document_stage_rejected() {
        let err = stages_to_documents(&[bson::Bson::Int32(7)]).unwrap_err();
        assert!(matches!(err, ChangeStreamError::InvalidPipeline { index: 0, .. }));
    }

    #[test]
    fn test_aggregate_options_marked_change_stream() {
        let options = ChangeStreamOptions::builder().batch_size(10).build().unwrap();
        let aggregate = AggregateOptions::for_change_stream(&options);
        assert!(aggregate.change_stream);
        assert_eq!(aggregate.batch_size, Some(10));
    }
}
