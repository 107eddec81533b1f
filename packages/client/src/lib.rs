#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the GBIF occurrence-search API.
//!
//! Provides the count probe, the offset-paginated fetcher, and in-fetch
//! feature materialization. The fetcher is written against the
//! [`search::OccurrenceApi`] trait so the pagination and cancellation
//! semantics can be exercised without live HTTP.

pub mod progress;
pub mod retry;
pub mod search;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gbif_occ_models::PointFeature;

/// Errors that can occur while talking to the occurrence API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON decoding failed.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API returned a response the client cannot use.
    #[error("API error: {message}")]
    Api {
        /// Description of what went wrong.
        message: String,
    },
}

/// Cooperative cancellation signal shared between the UI and the
/// fetch/clip loops.
///
/// Checked at well-defined checkpoints (after each materialized feature,
/// between pages) rather than mid-request, so a slow in-flight request
/// cannot be interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, unasserted token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asserts the token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of one region's fetch or clip pass.
///
/// An aborted run is deliberately distinct from a completed run with few
/// (or zero) features: callers must not clip or register the output of an
/// aborted fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The operation ran to its natural end.
    Completed {
        /// Features materialized (or retained, for a clip pass).
        features: Vec<PointFeature>,
        /// Raw records seen, including ones dropped for missing coordinates.
        records_seen: u64,
    },
    /// The cancellation token was asserted before the natural end.
    Aborted,
}
