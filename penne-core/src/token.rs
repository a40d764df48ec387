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

//! Resume tokens.

use crate::error::ChangeStreamError;
use bson::{Bson, RawDocumentBuf};
use serde::{Deserialize, Serialize};

/// Opaque position marker taken from the `_id` field of a change document.
///
/// The server defines the contents; callers should only store it and hand it
/// back through [`ChangeStreamOptions`](crate::options::ChangeStreamOptions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Bson);

impl ResumeToken {
    /// Wraps a raw BSON value as a resume token.
    pub fn new(value: impl Into<Bson>) -> Self {
        Self(value.into())
    }

    /// Returns the token as a BSON value.
    #[must_use]
    pub fn as_bson(&self) -> &Bson {
        &self.0
    }

    /// Consumes the token, returning the BSON value.
    #[must_use]
    pub fn into_bson(self) -> Bson {
        self.0
    }

    /// Reads the resume token from the `_id` field of a raw change document.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::MissingResumeToken`] if the field is absent
    /// or null, and [`ChangeStreamError::Decode`] if the bytes are malformed.
    pub fn from_change_document(raw: &RawDocumentBuf) -> Result<Self, ChangeStreamError> {
        #[derive(Deserialize)]
        struct IdField {
            #[serde(rename = "_id")]
            id: Option<Bson>,
        }

        let field: IdField = bson::from_slice(raw.as_bytes())
            .map_err(|e| ChangeStreamError::Decode(e.to_string()))?;

        match field.id {
            Some(Bson::Null) | None => Err(ChangeStreamError::MissingResumeToken),
            Some(id) => Ok(Self(id)),
        }
    }
}

impl From<bson::Document> for ResumeToken {
    fn from(doc: bson::Document) -> Self {
        Self(Bson::Document(doc))
    }
}
