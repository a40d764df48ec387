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

//! Watch a collection, checkpoint every event, and reopen after a failure.
//!
//! Requires a replica set:
//!
//! ```bash
//! MONGODB_URI="mongodb://localhost:27017/?replicaSet=rs0" \
//!     cargo run --package penne-stores --example checkpointed_watch
//! ```
//!
//! Metrics are served at <http://localhost:9000/metrics>.

use metrics_exporter_prometheus::PrometheusBuilder;
use penne_core::collection::Collection;
use penne_core::driver::MongoSession;
use penne_core::event::{ChangeEvent, Namespace};
use penne_core::metrics;
use penne_core::options::{ChangeStreamOptions, FullDocument};
use penne_stores::MemoryStore;
use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Number of times a failed stream is reopened from its checkpoint.
const MAX_REOPENS: usize = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    metrics::init_metrics();

    let prometheus_addr: SocketAddr = ([0, 0, 0, 0], 9000).into();
    PrometheusBuilder::new()
        .with_http_listener(prometheus_addr)
        .install()?;
    info!("Prometheus exporter listening on http://{prometheus_addr}");

    let uri = std::env::var("MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());
    let client = mongodb::Client::with_uri_str(&uri).await?;
    let orders = Collection::new(
        MongoSession::start(client).await?,
        Namespace::new("shop", "orders"),
    );

    let store = MemoryStore::new();
    let stages = [bson::doc! { "$match": { "operationType": { "$in": ["insert", "update"] } } }];

    for attempt in 0..=MAX_REOPENS {
        let options = ChangeStreamOptions::builder()
            .full_document(FullDocument::UpdateLookup)
            .max_await_time(Duration::from_secs(1))
            .resume_on_empty_batch(false)
            .build()?;

        let stream = orders.watch_from_store(&store, &stages, options).await?;
        info!(attempt, namespace = %stream.namespace(), "Watching");

        loop {
            tokio::select! {
                event = stream.next::<ChangeEvent>() => {
                    let Some(event) = event else { break };
                    info!(
                        operation = ?event.operation,
                        document_id = ?event.document_id(),
                        "Change received"
                    );
                    stream.checkpoint(&store).await?;
                }
                _ = signal::ctrl_c() => {
                    info!("Shutting down");
                    stream.checkpoint(&store).await?;
                    if let Err(e) = stream.close().await {
                        warn!(error = %e, "Close reported an error");
                    }
                    return Ok(());
                }
            }
        }

        match stream.err().await {
            Some(err) => error!(error = %err, "Change stream failed, reopening from checkpoint"),
            None => return Ok(()),
        }
    }

    error!(reopens = MAX_REOPENS, "Giving up");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,penne_core=debug,penne_stores=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();
}
