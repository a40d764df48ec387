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

//! Change streams against a real replica set.
//!
//! Change streams need a replica set, e.g.:
//! ```bash
//! docker run -d -p 27017:27017 mongo:7 --replSet rs0
//! docker exec <id> mongosh --eval 'rs.initiate()'
//! cargo test --package penne-core --test mongodb_integration_test -- --ignored
//! ```

use bson::{doc, Document};
use mongodb::Client;
use penne_core::collection::Collection;
use penne_core::driver::MongoSession;
use penne_core::event::{ChangeEvent, Namespace};
use penne_core::options::{ChangeStreamOptions, FullDocument};
use std::time::Duration;
use tokio::time::timeout;

const URI: &str = "mongodb://localhost:27017/?replicaSet=rs0&directConnection=true";

async fn setup(coll: &str) -> Result<(Client, Collection<MongoSession>), Box<dyn std::error::Error>> {
    let client = Client::with_uri_str(URI).await?;
    client
        .database("test_penne")
        .collection::<Document>(coll)
        .drop()
        .await
        .ok();

    let session = MongoSession::start(client.clone()).await?;
    Ok((client, Collection::new(session, Namespace::new("test_penne", coll))))
}

fn options() -> ChangeStreamOptions {
    ChangeStreamOptions::builder()
        .full_document(FullDocument::UpdateLookup)
        .max_await_time(Duration::from_millis(200))
        .resume_on_empty_batch(false)
        .build()
        .unwrap()
}

#[tokio::test]
#[ignore] // Requires a MongoDB replica set
async fn test_receives_inserts() -> Result<(), Box<dyn std::error::Error>> {
    let (client, orders) = setup("orders").await?;
    let stream = orders
        .watch(&[doc! { "$match": { "operationType": "insert" } }], options())
        .await?;

    let raw = client.database("test_penne").collection::<Document>("orders");
    for i in 0..3 {
        raw.insert_one(doc! { "n": i }).await?;
    }

    let events = timeout(Duration::from_secs(10), async {
        let mut events = Vec::new();
        while events.len() < 3 {
            match stream.next::<ChangeEvent>().await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    })
    .await?;

    assert_eq!(events.len(), 3);
    assert!(events.iter().all(ChangeEvent::is_insert));
    assert_eq!(stream.resume_token().await, Some(events[2].resume_token.clone()));

    stream.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires a MongoDB replica set
async fn test_reopen_after_token() -> Result<(), Box<dyn std::error::Error>> {
    let (client, orders) = setup("reopen").await?;
    let raw = client.database("test_penne").collection::<Document>("reopen");

    let first = orders.watch(&Vec::<Document>::new(), options()).await?;
    raw.insert_one(doc! { "n": 1 }).await?;
    raw.insert_one(doc! { "n": 2 }).await?;

    let event = timeout(Duration::from_secs(10), first.next::<ChangeEvent>())
        .await?
        .expect("first event");
    first.close().await?;

    let reopened = orders
        .watch(
            &Vec::<Document>::new(),
            ChangeStreamOptions {
                resume_after: Some(event.resume_token),
                ..options()
            },
        )
        .await?;

    let next = timeout(Duration::from_secs(10), reopened.next::<ChangeEvent>())
        .await?
        .expect("second event");
    assert_eq!(next.full_document.unwrap().get_i32("n")?, 2);

    reopened.close().await?;
    Ok(())
}

/// Multiple mongos routers, e.g. `mongodb://mongos1:27017,mongos2:27017`.
const SHARDED_URI_VAR: &str = "PENNE_SHARDED_URI";

#[tokio::test]
#[ignore] // Requires a sharded cluster with more than one mongos
async fn test_cursor_stays_on_its_server() -> Result<(), Box<dyn std::error::Error>> {
    let uri = std::env::var(SHARDED_URI_VAR)?;
    let client = Client::with_uri_str(&uri).await?;
    let raw = client.database("test_penne").collection::<Document>("pinned");
    raw.drop().await.ok();

    let session = MongoSession::start(client.clone()).await?;
    let pinned = Collection::new(session, Namespace::new("test_penne", "pinned"));
    let stream = pinned
        .watch(
            &Vec::<Document>::new(),
            ChangeStreamOptions {
                batch_size: Some(1),
                ..options()
            },
        )
        .await?;

    for i in 0..6 {
        raw.insert_one(doc! { "n": i }).await?;
    }

    // Each event needs its own getMore. A router that does not own the
    // cursor answers CursorNotFound, which fails the stream.
    let events = timeout(Duration::from_secs(20), async {
        let mut events = Vec::new();
        while events.len() < 6 {
            match stream.next::<ChangeEvent>().await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    })
    .await?;

    assert_eq!(events.len(), 6);
    assert!(stream.err().await.is_none());
    stream.close().await?;
    Ok(())
}
