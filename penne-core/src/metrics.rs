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

//! Metrics instrumentation for change streams.
//!
//! Uses the `metrics` facade, so any exporter (Prometheus, StatsD, ...) can be
//! installed by the application. Without a recorder every call is a no-op.
//!
//! # Naming Conventions
//!
//! - Prefix with `penne_`
//! - Counter metrics end with `_total`
//!
//! # Labels
//!
//! - **collection**: `database.collection` of the stream (low cardinality)
//! - **outcome**: `success` or `failure` for resume attempts
//! - **error\_type**: [`ChangeStreamError::category`](crate::error::ChangeStreamError::category)
//!
//! # Examples
//!
//! ```rust
//! use penne_core::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_events_received("shop.orders");
//! metrics::increment_resumes("shop.orders", metrics::ResumeOutcome::Success);
//! ```

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric name prefix for all Penne metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "penne";

/// Total number of change documents delivered to callers.
///
/// Type: Counter
/// Labels: collection
#[doc(hidden)]
pub const EVENTS_RECEIVED_TOTAL: &str = "penne_events_received_total";

/// Total number of resume attempts.
///
/// Type: Counter
/// Labels: collection, outcome
#[doc(hidden)]
pub const RESUMES_TOTAL: &str = "penne_resumes_total";

/// Total number of streams that ended with a terminal error.
///
/// Type: Counter
/// Labels: collection, error_type
#[doc(hidden)]
pub const STREAM_FAILURES_TOTAL: &str = "penne_stream_failures_total";

/// Number of streams currently open.
///
/// Type: Gauge
#[doc(hidden)]
pub const OPEN_STREAMS: &str = "penne_open_streams";

/// Initializes metric descriptions for exporters.
///
/// Call once at application startup, before opening streams.
pub fn init_metrics() {
    describe_counter!(
        EVENTS_RECEIVED_TOTAL,
        "Total number of change documents delivered to callers"
    );

    describe_counter!(
        RESUMES_TOTAL,
        "Total number of change stream resume attempts after a resumable failure"
    );

    describe_counter!(
        STREAM_FAILURES_TOTAL,
        "Total number of change streams that ended with a terminal error"
    );

    describe_gauge!(
        OPEN_STREAMS,
        metrics::Unit::Count,
        "Number of change streams currently open"
    );
}

/// Outcome label for [`increment_resumes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResumeOutcome {
    /// A new cursor was opened.
    Success,
    /// The resume sequence failed and the stream is now failed.
    Failure,
}

impl ResumeOutcome {
    /// Returns the outcome as a static string for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Increments the count of delivered change documents.
pub fn increment_events_received(collection: &str) {
    counter!(EVENTS_RECEIVED_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the resume counter.
pub fn increment_resumes(collection: &str, outcome: ResumeOutcome) {
    counter!(RESUMES_TOTAL, "collection" => collection.to_string(), "outcome" => outcome.as_str())
        .increment(1);
}

/// Increments the count of streams that failed permanently.
pub fn increment_stream_failures(collection: &str, error_type: &'static str) {
    counter!(STREAM_FAILURES_TOTAL, "collection" => collection.to_string(), "error_type" => error_type)
        .increment(1);
}

/// Records that a stream was opened.
pub fn increment_open_streams() {
    gauge!(OPEN_STREAMS).increment(1.0);
}

/// Records that an open stream failed, closed, or was dropped.
pub fn decrement_open_streams() {
    gauge!(OPEN_STREAMS).decrement(1.0);
}
