//! Change Event Representation
//!
//! [`ChangeEvent`] is a ready-made decode target for
//! [`ChangeStream::next`](crate::stream::ChangeStream::next). Any other
//! `serde::Deserialize` type works too; this one covers the fields the server
//! sends for collection-level streams.
//!
//! # Examples
//!
//! ```rust
//! use penne_core::event::{ChangeEvent, OperationType};
//! use bson::doc;
//!
//! let event: ChangeEvent = bson::from_document(doc! {
//!     "_id": { "_data": "token123" },
//!     "operationType": "insert",
//!     "ns": { "db": "mydb", "coll": "users" },
//!     "documentKey": { "_id": 123 },
//!     "fullDocument": { "_id": 123, "name": "Alice" },
//! })
//! .unwrap();
//!
//! assert!(event.is_insert());
//! assert_eq!(event.collection_name(), "users");
//! ```

use crate::token::ResumeToken;
use bson::{Document, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Change stream operation types.
///
/// The `Unknown` variant keeps streams readable when a newer server emits an
/// operation type this crate does not know.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum OperationType {
    /// A document was inserted into a collection
    Insert,

    /// A document was updated (modified in place)
    Update,

    /// A document was deleted from a collection
    Delete,

    /// A document was replaced entirely
    Replace,

    /// The change stream was invalidated (collection dropped, renamed, etc.)
    Invalidate,

    /// A collection was dropped
    Drop,

    /// A database was dropped
    #[serde(rename = "dropDatabase")]
    DropDatabase,

    /// A collection was renamed
    Rename,

    /// An operation type from a newer server version
    #[serde(untagged)]
    Unknown(String),
}

impl OperationType {
    /// Returns true if this operation modifies data (insert, update, replace).
    #[inline]
    pub fn is_data_modification(&self) -> bool {
        matches!(
            self,
            OperationType::Insert | OperationType::Update | OperationType::Replace
        )
    }

    /// Returns true if this is a DDL operation (drop, rename, drop database).
    #[inline]
    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            OperationType::Drop | OperationType::DropDatabase | OperationType::Rename
        )
    }
}

/// Namespace (database + collection).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    #[serde(rename = "db")]
    pub database: String,

    /// Collection name
    #[serde(rename = "coll", default)]
    pub collection: String,
}

impl Namespace {
    /// Creates a new namespace from database and collection names.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Returns the fully qualified namespace as "database.collection".
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Update description for partial document updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDescription {
    /// Fields that were added or modified
    #[serde(rename = "updatedFields")]
    pub updated_fields: Document,

    /// Fields that were removed from the document
    #[serde(rename = "removedFields")]
    pub removed_fields: Vec<String>,
}

/// A change event as delivered by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Resume token for this event
    #[serde(rename = "_id")]
    pub resume_token: ResumeToken,

    /// Type of operation that occurred
    #[serde(rename = "operationType")]
    pub operation: OperationType,

    /// Namespace where the operation occurred (absent for some invalidate events)
    #[serde(rename = "ns", default)]
    pub namespace: Namespace,

    /// Document key (`_id` and shard key if sharded)
    #[serde(rename = "documentKey", skip_serializing_if = "Option::is_none")]
    pub document_key: Option<Document>,

    /// Full document after the operation, depending on the full-document mode
    #[serde(rename = "fullDocument", skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Document>,

    #[serde(rename = "updateDescription", skip_serializing_if = "Option::is_none")]
    pub update_description: Option<UpdateDescription>,

    /// Oplog timestamp of the operation
    #[serde(rename = "clusterTime", skip_serializing_if = "Option::is_none")]
    pub cluster_time: Option<Timestamp>,
}

impl ChangeEvent {
    /// Returns true if this is an insert operation.
    #[inline]
    pub fn is_insert(&self) -> bool {
        self.operation == OperationType::Insert
    }

    /// Returns true if this is an update operation.
    #[inline]
    pub fn is_update(&self) -> bool {
        self.operation == OperationType::Update
    }

    /// Returns true if this is a delete operation.
    #[inline]
    pub fn is_delete(&self) -> bool {
        self.operation == OperationType::Delete
    }

    /// Returns true if this is an invalidate operation.
    ///
    /// The server closes the cursor after an invalidate event.
    #[inline]
    pub fn is_invalidate(&self) -> bool {
        self.operation == OperationType::Invalidate
    }

    /// Returns the collection name.
    #[inline]
    pub fn collection_name(&self) -> &str {
        &self.namespace.collection
    }

    /// Returns the document ID if present in the document key.
    pub fn document_id(&self) -> Option<&bson::Bson> {
        self.document_key.as_ref()?.get("_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_decode_update_event() {
        let event: ChangeEvent = bson::from_document(doc! {
            "_id": { "_data": "t1" },
            "operationType": "update",
            "ns": { "db": "shop", "coll": "orders" },
            "documentKey": { "_id": 7 },
            "updateDescription": { "updatedFields": { "status": "paid" }, "removedFields": [] },
            "clusterTime": Timestamp { time: 1_700_000_000, increment: 3 },
        })
        .unwrap();

        assert!(event.is_update());
        assert_eq!(event.namespace, Namespace::new("shop", "orders"));
        assert_eq!(event.document_id(), Some(&bson::Bson::Int32(7)));
        assert_eq!(
            event.update_description.unwrap().updated_fields,
            doc! { "status": "paid" }
        );
        assert_eq!(event.cluster_time.unwrap().increment, 3);
    }

    #[test]
    fn test_decode_invalidate_without_namespace() {
        let event: ChangeEvent = bson::from_document(doc! {
            "_id": { "_data": "t2" },
            "operationType": "invalidate",
        })
        .unwrap();

        assert!(event.is_invalidate());
        assert_eq!(event.namespace, Namespace::default());
    }

    #[test]
    fn test_unknown_operation_type() {
        let event: ChangeEvent = bson::from_document(doc! {
            "_id": { "_data": "t3" },
            "operationType": "shardCollection",
            "ns": { "db": "a", "coll": "b" },
        })
        .unwrap();

        assert_eq!(
            event.operation,
            OperationType::Unknown("shardCollection".to_string())
        );
        assert!(!event.operation.is_data_modification());
    }

    #[test]
    fn test_namespace_display() {
        let ns = Namespace::new("testdb", "users");
        assert_eq!(ns.to_string(), "testdb.users");
        assert_eq!(ns.full_name(), "testdb.users");
    }
}
