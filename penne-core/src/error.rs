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

//! Error taxonomy for change streams.
//!
//! Every failure a [`ChangeStream`](crate::stream::ChangeStream) can hit is a
//! [`ChangeStreamError`]. The classifier ([`is_resumable`]) decides whether a
//! failed fetch is worth one resume attempt or ends the stream for good.
//!
//! | Variant | Resumable |
//! |---------|-----------|
//! | [`Transport`](ChangeStreamError::Transport) | yes |
//! | [`NotPrimary`](ChangeStreamError::NotPrimary) | yes |
//! | [`CursorExhausted`](ChangeStreamError::CursorExhausted) | yes |
//! | [`Command`](ChangeStreamError::Command) | no |
//! | everything else | no |

use crate::state::StateStoreError;
use thiserror::Error;

/// Server error codes reporting that the contacted node is no longer primary.
const NOT_PRIMARY_CODES: [i32; 3] = [
    10107, // NotWritablePrimary
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// Errors that can occur while opening or iterating a change stream.
#[derive(Debug, Error)]
pub enum ChangeStreamError {
    /// A caller pipeline stage did not serialize to a document.
    #[error("Invalid pipeline stage at index {index}: {message}")]
    InvalidPipeline { index: usize, message: String },

    /// Change stream options failed validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network or connection failure (always resumable)
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The contacted node lost primary status (resumable)
    #[error("Node is not primary (code {code}): {message}")]
    NotPrimary { code: i32, message: String },

    /// Any other server-reported command error (fatal)
    #[error("Command failed (code {code}): {message}")]
    Command { code: i32, message: String },

    /// The change document had no `_id` field to resume from.
    #[error("Resume token missing from change document")]
    MissingResumeToken,

    /// The cursor returned an empty batch without reporting an error.
    #[error("Cursor exhausted without a document")]
    CursorExhausted,

    /// The change document could not be decoded into the requested type.
    #[error("Failed to decode change document: {0}")]
    Decode(String),

    /// The stream was already closed.
    #[error("Change stream is already closed")]
    Closed,

    /// A `next` call was cancelled while resuming, leaving no usable cursor.
    #[error("Change stream resume was cancelled before it completed")]
    ResumeInterrupted,

    /// Loading a stored resume token failed.
    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),
}

impl ChangeStreamError {
    /// Builds a server-reported error, classifying not-primary responses.
    ///
    /// A response counts as not-primary when its code is one of the
    /// replication codes (10107, 13435, 13436) or when the message mentions
    /// `not master` / `not primary`, which older servers send without a code.
    pub fn command(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();

        if NOT_PRIMARY_CODES.contains(&code)
            || lowered.contains("not master")
            || lowered.contains("not primary")
        {
            Self::NotPrimary { code, message }
        } else {
            Self::Command { code, message }
        }
    }

    /// Builds a transport error without an underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if a failed fetch with this error may be resumed once.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::NotPrimary { .. } => true,
            Self::CursorExhausted => true,
            Self::Command { .. } => false,
            Self::MissingResumeToken => false,
            Self::Decode(_) => false,
            Self::InvalidPipeline { .. } => false,
            Self::Configuration(_) => false,
            Self::Closed => false,
            Self::ResumeInterrupted => false,
            Self::StateStore(_) => false,
        }
    }

    /// Returns the error category for metrics/logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidPipeline { .. } => "invalid_pipeline",
            Self::Configuration(_) => "configuration",
            Self::Transport { .. } => "transport",
            Self::NotPrimary { .. } => "not_primary",
            Self::Command { .. } => "command",
            Self::MissingResumeToken => "missing_resume_token",
            Self::CursorExhausted => "cursor_exhausted",
            Self::Decode(_) => "decode",
            Self::Closed => "closed",
            Self::ResumeInterrupted => "resume_interrupted",
            Self::StateStore(_) => "state_store",
        }
    }
}

/// Classifies a fetch failure as resumable or fatal.
///
/// Transport failures and not-primary responses are resumable; every other
/// server-reported error is fatal.
#[must_use]
pub fn is_resumable(err: &ChangeStreamError) -> bool {
    err.is_resumable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_classifies_not_primary_codes() {
        for code in NOT_PRIMARY_CODES {
            let err = ChangeStreamError::command(code, "stepped down");
            assert!(matches!(err, ChangeStreamError::NotPrimary { .. }));
            assert!(is_resumable(&err));
        }
    }

    #[test]
    fn test_command_classifies_not_master_message() {
        let err = ChangeStreamError::command(0, "not master and slaveOk=false");
        assert!(matches!(err, ChangeStreamError::NotPrimary { code: 0, .. }));

        let err = ChangeStreamError::command(2, "Node is Not Primary");
        assert!(is_resumable(&err));
    }

    #[test]
    fn test_other_command_errors_are_fatal() {
        let err = ChangeStreamError::command(40324, "Unrecognized pipeline stage name: '$bogus'");
        assert!(matches!(err, ChangeStreamError::Command { code: 40324, .. }));
        assert!(!is_resumable(&err));
    }

    #[test]
    fn test_transport_and_exhausted_are_resumable() {
        assert!(is_resumable(&ChangeStreamError::transport("connection reset")));
        assert!(is_resumable(&ChangeStreamError::CursorExhausted));
    }

    #[test]
    fn test_post_fetch_errors_are_fatal() {
        assert!(!is_resumable(&ChangeStreamError::MissingResumeToken));
        assert!(!is_resumable(&ChangeStreamError::Decode("bad".to_string())));
        assert!(!is_resumable(&ChangeStreamError::Closed));
        assert!(!is_resumable(&ChangeStreamError::ResumeInterrupted));
    }

    #[test]
    fn test_category() {
        assert_eq!(ChangeStreamError::transport("x").category(), "transport");
        assert_eq!(
            ChangeStreamError::MissingResumeToken.category(),
            "missing_resume_token"
        );
        assert_eq!(ChangeStreamError::CursorExhausted.category(), "cursor_exhausted");
    }
}
