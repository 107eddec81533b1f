//! Count probe and offset-paginated occurrence fetch.
//!
//! The occurrence-search endpoint takes a WKT `geometry` parameter (always
//! a bounding rectangle here) plus a `limit`/`offset` pair. A `limit=0`
//! request is a count-only probe. Pagination walks offsets in steps of
//! [`PAGE_SIZE`] until a short or empty page, or the [`RECORD_CAP`] is hit.

use async_trait::async_trait;

use gbif_occ_models::{BoundingBox, materialize};

use crate::progress::ProgressCallback;
use crate::{CancelToken, FetchError, FetchOutcome, retry};

/// Records requested per page.
pub const PAGE_SIZE: u64 = 300;

/// Global cap on records fetched for one query region.
pub const RECORD_CAP: u64 = 100_000;

/// Default occurrence-search endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.gbif.org/v1/occurrence/search";

/// Read-only view of the occurrence-search API.
///
/// [`GbifApi`] is the live HTTP implementation; tests drive the fetch loop
/// with in-memory fakes.
#[async_trait]
pub trait OccurrenceApi: Send + Sync {
    /// Returns the unclamped total number of records matching the bounding
    /// box (the `limit=0` probe). A missing count field is reported as zero.
    async fn count(&self, bbox: &BoundingBox) -> Result<u64, FetchError>;

    /// Fetches one page of raw records at the given offset. An absent or
    /// empty result list is returned as an empty vector (clean end of
    /// pagination, not an error).
    async fn page(&self, bbox: &BoundingBox, offset: u64) -> Result<Vec<serde_json::Value>, FetchError>;
}

/// Live HTTP client for the occurrence-search endpoint.
pub struct GbifApi {
    client: reqwest::Client,
    base_url: String,
}

impl GbifApi {
    /// Creates a client against the public GBIF API.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a client against an alternate endpoint.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_owned(),
        }
    }

    /// Builds the full search URL for one request. Spaces in the WKT ring
    /// are percent-encoded; the parentheses the endpoint accepts raw.
    fn search_url(&self, bbox: &BoundingBox, limit: u64, offset: u64) -> String {
        let geometry = bbox.to_wkt_polygon().replace(' ', "%20");
        format!(
            "{}?geometry={geometry}&limit={limit}&offset={offset}",
            self.base_url
        )
    }
}

impl Default for GbifApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OccurrenceApi for GbifApi {
    async fn count(&self, bbox: &BoundingBox) -> Result<u64, FetchError> {
        let url = self.search_url(bbox, 0, 0);
        log::debug!("Count probe: {url}");
        let body = retry::send_json(|| self.client.get(&url)).await?;
        Ok(count_from_body(&body))
    }

    async fn page(&self, bbox: &BoundingBox, offset: u64) -> Result<Vec<serde_json::Value>, FetchError> {
        let url = self.search_url(bbox, PAGE_SIZE, offset);
        log::debug!("Fetching page at offset {offset}: {url}");
        let body = retry::send_json(|| self.client.get(&url)).await?;
        results_from_body(&body)
    }
}

/// Extracts the `count` field from a probe response, treating an absent
/// or non-numeric count as zero.
#[must_use]
pub fn count_from_body(body: &serde_json::Value) -> u64 {
    body.get("count").and_then(serde_json::Value::as_u64).unwrap_or(0)
}

/// Extracts the `results` list from a page response. A missing list is an
/// empty page; a present-but-non-array value is a malformed response.
///
/// # Errors
///
/// Returns [`FetchError::Api`] if `results` exists but is not an array.
pub fn results_from_body(body: &serde_json::Value) -> Result<Vec<serde_json::Value>, FetchError> {
    match body.get("results") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(records)) => Ok(records.clone()),
        Some(other) => Err(FetchError::Api {
            message: format!("expected 'results' array, got {other}"),
        }),
    }
}

/// Clamps a probed count to [`RECORD_CAP`] for progress sizing.
#[must_use]
pub const fn clamp_estimate(count: u64) -> u64 {
    if count > RECORD_CAP { RECORD_CAP } else { count }
}

/// Fetches and materializes all occurrences inside a bounding box.
///
/// Walks pages of [`PAGE_SIZE`] records, materializing each record that
/// carries coordinates and silently dropping the rest. Terminates on an
/// empty page, a short page, or after [`RECORD_CAP`] records. A final page
/// of exactly [`PAGE_SIZE`] records costs one extra empty request before
/// termination; this is tolerated.
///
/// The cancellation token is checked before each page request and after
/// each record; an asserted token yields [`FetchOutcome::Aborted`], which
/// callers must treat differently from a completed fetch (no clip step).
///
/// # Errors
///
/// Returns [`FetchError`] if any page request or decode fails after
/// retries. No partial results survive a failed fetch.
pub async fn fetch_region(
    api: &(impl OccurrenceApi + ?Sized),
    bbox: &BoundingBox,
    cancel: &CancelToken,
    progress: &dyn ProgressCallback,
) -> Result<FetchOutcome, FetchError> {
    let mut features = Vec::new();
    let mut records_seen: u64 = 0;
    let mut offset: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            log::info!("Fetch aborted at offset {offset} ({records_seen} records seen)");
            return Ok(FetchOutcome::Aborted);
        }

        let page = api.page(bbox, offset).await?;
        if page.is_empty() {
            break;
        }

        let page_len = page.len() as u64;
        for record in &page {
            records_seen += 1;
            if let Some(feature) = materialize(record) {
                features.push(feature);
            }
            progress.inc(1);

            if cancel.is_cancelled() {
                log::info!("Fetch aborted after {records_seen} records");
                return Ok(FetchOutcome::Aborted);
            }
            if records_seen >= RECORD_CAP {
                log::warn!("Record cap of {RECORD_CAP} reached, stopping fetch");
                return Ok(FetchOutcome::Completed {
                    features,
                    records_seen,
                });
            }
        }

        if page_len < PAGE_SIZE {
            break; // short page: last page reached
        }
        offset += PAGE_SIZE;
    }

    log::debug!(
        "Fetch complete: {} features from {records_seen} records",
        features.len()
    );
    Ok(FetchOutcome::Completed {
        features,
        records_seen,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use serde_json::json;

    use super::*;
    use crate::progress::NullProgress;

    fn record_with_coords() -> serde_json::Value {
        json!({
            "gbifID": 1,
            "species": "Larus argentatus",
            "decimalLatitude": 60.0,
            "decimalLongitude": 5.0,
        })
    }

    fn record_without_coords() -> serde_json::Value {
        json!({ "species": "Larus argentatus" })
    }

    fn bbox() -> BoundingBox {
        BoundingBox {
            min_lon: 4.0,
            min_lat: 59.0,
            max_lon: 6.0,
            max_lat: 61.0,
        }
    }

    struct FakeApi {
        pages: Vec<Vec<serde_json::Value>>,
        count: u64,
        page_calls: AtomicU64,
    }

    impl FakeApi {
        fn new(pages: Vec<Vec<serde_json::Value>>) -> Self {
            Self {
                pages,
                count: 0,
                page_calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl OccurrenceApi for FakeApi {
        async fn count(&self, _bbox: &BoundingBox) -> Result<u64, FetchError> {
            Ok(self.count)
        }

        async fn page(
            &self,
            _bbox: &BoundingBox,
            offset: u64,
        ) -> Result<Vec<serde_json::Value>, FetchError> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(offset % PAGE_SIZE, 0, "offset must advance by page size");
            let index = usize::try_from(offset / PAGE_SIZE).unwrap();
            Ok(self.pages.get(index).cloned().unwrap_or_default())
        }
    }

    /// Cancels the shared token once `after` records have been reported.
    struct CancelAfter {
        token: CancelToken,
        after: u64,
        seen: AtomicU64,
    }

    impl ProgressCallback for CancelAfter {
        fn set_total(&self, _total: u64) {}
        fn inc(&self, delta: u64) {
            if self.seen.fetch_add(delta, Ordering::SeqCst) + delta >= self.after {
                self.token.cancel();
            }
        }
        fn set_message(&self, _msg: String) {}
        fn finish(&self, _msg: String) {}
        fn finish_and_clear(&self) {}
    }

    #[tokio::test]
    async fn two_page_fetch_materializes_and_stops_after_short_page() {
        let mut first_page: Vec<serde_json::Value> = Vec::new();
        for i in 0..300 {
            if i < 5 {
                first_page.push(record_without_coords());
            } else {
                first_page.push(record_with_coords());
            }
        }
        let second_page = vec![record_with_coords(); 40];
        let api = FakeApi::new(vec![first_page, second_page]);

        let outcome = fetch_region(&api, &bbox(), &CancelToken::new(), &NullProgress)
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Completed {
                features,
                records_seen,
            } => {
                assert_eq!(features.len(), 335);
                assert_eq!(records_seen, 340);
            }
            FetchOutcome::Aborted => panic!("fetch should complete"),
        }
        // 40 < 300, so no third request was made.
        assert_eq!(api.page_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exactly_full_final_page_costs_one_extra_request() {
        let api = FakeApi::new(vec![vec![record_with_coords(); 300]]);

        let outcome = fetch_region(&api, &bbox(), &CancelToken::new(), &NullProgress)
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Completed { features, .. } => assert_eq!(features.len(), 300),
            FetchOutcome::Aborted => panic!("fetch should complete"),
        }
        // Full page forces one follow-up request that comes back empty.
        assert_eq!(api.page_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn short_first_page_makes_no_second_request() {
        let api = FakeApi::new(vec![vec![record_with_coords(); 12]]);

        let outcome = fetch_region(&api, &bbox(), &CancelToken::new(), &NullProgress)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            FetchOutcome::Completed { ref features, .. } if features.len() == 12
        ));
        assert_eq!(api.page_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_response_is_a_clean_end() {
        let api = FakeApi::new(vec![]);

        let outcome = fetch_region(&api, &bbox(), &CancelToken::new(), &NullProgress)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Completed {
                features: Vec::new(),
                records_seen: 0,
            }
        );
    }

    #[tokio::test]
    async fn pre_asserted_token_aborts_before_any_request() {
        let api = FakeApi::new(vec![vec![record_with_coords(); 300]]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = fetch_region(&api, &bbox(), &cancel, &NullProgress)
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Aborted);
        assert_eq!(api.page_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_page_yields_aborted_not_completed() {
        let api = FakeApi::new(vec![
            vec![record_with_coords(); 300],
            vec![record_with_coords(); 300],
        ]);
        let cancel = CancelToken::new();
        let progress = CancelAfter {
            token: cancel.clone(),
            after: 10,
            seen: AtomicU64::new(0),
        };

        let outcome = fetch_region(&api, &bbox(), &cancel, &progress).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Aborted);
        assert_eq!(api.page_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn record_cap_stops_the_fetch() {
        let pages_needed = usize::try_from(RECORD_CAP / PAGE_SIZE).unwrap() + 1;
        let pages = vec![vec![record_with_coords(); 300]; pages_needed];
        let api = FakeApi::new(pages);

        let outcome = fetch_region(&api, &bbox(), &CancelToken::new(), &NullProgress)
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Completed { records_seen, .. } => {
                assert_eq!(records_seen, RECORD_CAP);
            }
            FetchOutcome::Aborted => panic!("cap is a completed fetch, not an abort"),
        }
    }

    #[test]
    fn clamps_oversized_count_estimate() {
        assert_eq!(clamp_estimate(250_000), 100_000);
        assert_eq!(clamp_estimate(42), 42);
        assert_eq!(clamp_estimate(RECORD_CAP), RECORD_CAP);
    }

    #[test]
    fn count_probe_tolerates_missing_count() {
        assert_eq!(count_from_body(&json!({})), 0);
        assert_eq!(count_from_body(&json!({ "count": "many" })), 0);
        assert_eq!(count_from_body(&json!({ "count": 250_000 })), 250_000);
    }

    #[test]
    fn missing_results_list_is_an_empty_page() {
        assert!(results_from_body(&json!({})).unwrap().is_empty());
        assert!(results_from_body(&json!({ "results": null })).unwrap().is_empty());
        assert!(results_from_body(&json!({ "results": "oops" })).is_err());
    }

    #[test]
    fn search_url_encodes_the_bounding_rectangle() {
        let api = GbifApi::with_base_url("https://api.gbif.org/v1/occurrence/search");
        let url = api.search_url(&bbox(), 300, 600);
        assert_eq!(
            url,
            "https://api.gbif.org/v1/occurrence/search?geometry=POLYGON((4%2059,6%2059,6%2061,4%2061,4%2059))&limit=300&offset=600"
        );
    }
}
