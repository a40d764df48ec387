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

//! Resume token stores for penne change streams.
//!
//! Implementations of [`StateStore`](penne_core::state::StateStore) used with
//! [`ChangeStream::checkpoint`](penne_core::stream::ChangeStream::checkpoint)
//! and [`Collection::watch_from_store`](penne_core::collection::Collection::watch_from_store).
//!
//! # Available Stores
//!
//! - [`memory::MemoryStore`]: process-local, lost on restart
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
//!
//! store
//!     .save_resume_token("shop.orders", &ResumeToken::new(doc! { "_data": "8263A1" }))
//!     .await?;
//!
//! assert!(store.get_resume_token("shop.orders").await?.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod memory;

pub use memory::MemoryStore;
