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

//! Scripted session and cursor doubles.
//!
//! A [`Script`] holds one entry per expected `aggregate` call. Each entry is
//! either a cursor with a list of fetch steps or an aggregate failure. When a
//! cursor runs out of steps the server "closes" it: the id drops to 0 and the
//! fetch reports [`Fetched::Exhausted`].

#![allow(dead_code)]

use async_trait::async_trait;
use bson::{doc, Document, RawDocumentBuf};
use penne_core::collection::Collection;
use penne_core::error::ChangeStreamError;
use penne_core::event::Namespace;
use penne_core::pipeline::AggregateOptions;
use penne_core::session::{Cursor, CursorId, Fetched, Session};
use penne_core::state::{StateStore, StateStoreError};
use penne_core::ResumeToken;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted fetch outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Doc(Document),
    Empty,
    Transport,
    NotPrimary,
    Command(i32),
}

impl Step {
    fn error(&self) -> ChangeStreamError {
        match self {
            Step::Transport => ChangeStreamError::transport("connection reset by peer"),
            Step::NotPrimary => ChangeStreamError::command(10107, "not primary"),
            Step::Command(code) => ChangeStreamError::command(*code, "scripted command failure"),
            other => panic!("{other:?} is not an error step"),
        }
    }
}

struct CursorScript {
    id: CursorId,
    steps: VecDeque<Step>,
}

/// Shared script and call log.
#[derive(Default)]
pub struct Script {
    aggregates: Mutex<VecDeque<Result<CursorScript, Step>>>,
    pub pipelines: Mutex<Vec<Vec<Document>>>,
    pub aggregate_options: Mutex<Vec<AggregateOptions>>,
    pub killed: Mutex<Vec<(usize, CursorId)>>,
    pub aggregate_calls: AtomicUsize,
    pub duplicate_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
    pub fail_duplicate: AtomicBool,
    pub fail_kill: AtomicBool,
    /// Makes `aggregate` hang after recording the call.
    pub stall_aggregate: AtomicBool,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scripts the next `aggregate` call to return a cursor.
    pub fn cursor(&self, id: CursorId, steps: impl IntoIterator<Item = Step>) -> &Self {
        self.aggregates.lock().unwrap().push_back(Ok(CursorScript {
            id,
            steps: steps.into_iter().collect(),
        }));
        self
    }

    /// Scripts the next `aggregate` call to fail.
    pub fn aggregate_error(&self, step: Step) -> &Self {
        self.aggregates.lock().unwrap().push_back(Err(step));
        self
    }

    pub fn aggregates(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn duplicates(&self) -> usize {
        self.duplicate_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kill_calls.load(Ordering::SeqCst)
    }

    pub fn pipeline(&self, call: usize) -> Vec<Document> {
        self.pipelines.lock().unwrap()[call].clone()
    }

    /// Total number of calls that reached the fake server.
    pub fn io_calls(&self) -> usize {
        self.aggregates() + self.duplicates() + self.fetches() + self.kills()
    }
}

/// Session double. `generation` counts duplications from the first session.
pub struct MockSession {
    script: Arc<Script>,
    pub generation: usize,
}

impl MockSession {
    pub fn new(script: &Arc<Script>) -> Self {
        Self {
            script: Arc::clone(script),
            generation: 0,
        }
    }
}

#[async_trait]
impl Session for MockSession {
    type Cursor = MockCursor;

    async fn aggregate(
        &self,
        _namespace: &Namespace,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> Result<MockCursor, ChangeStreamError> {
        self.script.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        self.script.pipelines.lock().unwrap().push(pipeline);
        self.script
            .aggregate_options
            .lock()
            .unwrap()
            .push(options.clone());

        if self.script.stall_aggregate.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let next = self.script.aggregates.lock().unwrap().pop_front();
        match next {
            Some(Ok(cursor)) => Ok(MockCursor {
                script: Arc::clone(&self.script),
                id: cursor.id,
                steps: cursor.steps,
            }),
            Some(Err(step)) => Err(step.error()),
            None => Err(ChangeStreamError::command(0, "no cursor scripted")),
        }
    }

    async fn duplicate(&self) -> Result<Self, ChangeStreamError> {
        self.script.duplicate_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_duplicate.load(Ordering::SeqCst) {
            return Err(ChangeStreamError::transport("no reachable servers"));
        }
        Ok(Self {
            script: Arc::clone(&self.script),
            generation: self.generation + 1,
        })
    }

    async fn kill_cursors(
        &self,
        _namespace: &Namespace,
        cursor_ids: &[CursorId],
    ) -> Result<(), ChangeStreamError> {
        self.script.kill_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_kill.load(Ordering::SeqCst) {
            return Err(ChangeStreamError::command(8000, "kill failed"));
        }
        let mut killed = self.script.killed.lock().unwrap();
        killed.extend(cursor_ids.iter().map(|id| (self.generation, *id)));
        Ok(())
    }
}

/// Cursor double that plays back its steps.
pub struct MockCursor {
    script: Arc<Script>,
    id: CursorId,
    steps: VecDeque<Step>,
}

#[async_trait]
impl Cursor for MockCursor {
    fn id(&self) -> CursorId {
        self.id
    }

    async fn fetch(&mut self) -> Result<Fetched, ChangeStreamError> {
        self.script.fetch_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        match self.steps.pop_front() {
            Some(Step::Doc(doc)) => Ok(Fetched::Document(
                RawDocumentBuf::from_document(&doc).expect("valid document"),
            )),
            Some(Step::Empty) => Ok(Fetched::Exhausted),
            Some(step) => Err(step.error()),
            None => {
                self.id = 0;
                Ok(Fetched::Exhausted)
            }
        }
    }
}

/// Store double backed by a map.
#[derive(Default)]
pub struct MapStore {
    pub tokens: Mutex<HashMap<String, ResumeToken>>,
}

#[async_trait]
impl StateStore for MapStore {
    async fn save_resume_token(&self, key: &str, token: &ResumeToken) -> Result<(), StateStoreError> {
        self.tokens
            .lock()
            .unwrap()
            .insert(key.to_string(), token.clone());
        Ok(())
    }

    async fn get_resume_token(&self, key: &str) -> Result<Option<ResumeToken>, StateStoreError> {
        Ok(self.tokens.lock().unwrap().get(key).cloned())
    }

    async fn delete_resume_token(&self, key: &str) -> Result<(), StateStoreError> {
        self.tokens.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_resume_tokens(&self) -> Result<HashMap<String, ResumeToken>, StateStoreError> {
        Ok(self.tokens.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<(), StateStoreError> {
        Ok(())
    }
}

pub fn namespace() -> Namespace {
    Namespace::new("shop", "orders")
}

pub fn collection(script: &Arc<Script>) -> Collection<MockSession> {
    Collection::new(MockSession::new(script), namespace())
}

pub fn token(n: i32) -> ResumeToken {
    ResumeToken::new(doc! { "_data": format!("826{n:04}") })
}

/// An insert change document whose `_id` is `token(n)`.
pub fn change_doc(n: i32) -> Document {
    doc! {
        "_id": { "_data": format!("826{n:04}") },
        "operationType": "insert",
        "ns": { "db": "shop", "coll": "orders" },
        "documentKey": { "_id": n },
        "fullDocument": { "_id": n, "total": n * 10 },
    }
}

pub fn docs(range: std::ops::Range<i32>) -> Vec<Step> {
    range.map(|n| Step::Doc(change_doc(n))).collect()
}

pub fn no_stages() -> &'static [Document] {
    &[]
}
