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

//! Penne Core - Resumable `MongoDB` Change Streams
//!
//! This crate opens change streams on a collection and keeps them going across
//! transient failures. When a fetch fails with a network error, a primary
//! step-down, or an exhausted cursor, the stream kills the stale cursor, opens
//! a new one after the last delivered event, and fetches again. It resumes at
//! most once per failed fetch; a second failure ends the stream.
//!
//! # Key Components
//!
//! - **Collection**: [`collection::Collection`] opens streams with `watch`
//! - **Stream**: [`stream::ChangeStream`] delivers events and tracks the resume token
//! - **Errors**: [`error::ChangeStreamError`] and the resumability classifier
//! - **Events**: [`event::ChangeEvent`], a typed change document
//! - **Driver**: [`driver::MongoSession`] binds the stream to the official driver
//! - **State**: [`state::StateStore`] persists resume tokens between runs
//!
//! # Example
//!
//! ```rust,no_run
//! use penne_core::collection::Collection;
//! use penne_core::driver::MongoSession;
//! use penne_core::event::{ChangeEvent, Namespace, OperationType};
//! use penne_core::options::{ChangeStreamOptions, FullDocument};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017/?replicaSet=rs0").await?;
//! let orders = Collection::new(MongoSession::start(client).await?, Namespace::new("shop", "orders"));
//!
//! let options = ChangeStreamOptions::builder()
//!     .full_document(FullDocument::UpdateLookup)
//!     .max_await_time(Duration::from_secs(1))
//!     .build()?;
//!
//! let stream = orders.watch(&[bson::doc! { "$match": {} }], options).await?;
//!
//! while let Some(event) = stream.next::<ChangeEvent>().await {
//!     match event.operation {
//!         OperationType::Insert => println!("New order {:?}", event.document_id()),
//!         OperationType::Delete => println!("Order removed"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod driver;
pub mod error;
pub mod event;
pub mod metrics;
pub mod options;
pub mod pipeline;
pub mod resume;
pub mod session;
pub mod state;
pub mod stream;
pub mod token;

pub use collection::Collection;
pub use error::ChangeStreamError;
pub use stream::{ChangeStream, StreamState};
pub use token::ResumeToken;
