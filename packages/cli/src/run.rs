//! Per-layer fetch/clip orchestration.
//!
//! For each polygon part of each region: probe the count, fetch the
//! bounding-box records with a progress bar sized by the clamped estimate,
//! clip the materialized points to the exact polygon, and register the
//! clipped layer in the session group. An aborted fetch or clip discards
//! the whole group and stops further regions.

use std::error::Error;
use std::path::Path;

use gbif_occ_cli_utils::{IndicatifProgress, MultiProgress};
use gbif_occ_client::search::{OccurrenceApi, clamp_estimate, fetch_region};
use gbif_occ_client::{CancelToken, FetchOutcome};
use gbif_occ_spatial::{ClipOutcome, PolygonLayer, bounding_box, clip_points};

use crate::session::Session;

/// Runs the fetch/clip sequence for every region of one polygon layer.
///
/// # Errors
///
/// Returns an error if a count probe or page fetch fails after retries, or
/// if a result layer cannot be written. User cancellation is not an error:
/// the partial group is removed and the run ends cleanly.
pub async fn run_layer(
    multi: &MultiProgress,
    api: &(impl OccurrenceApi + ?Sized),
    layer: &PolygonLayer,
    output_dir: &Path,
    cancel: &CancelToken,
) -> Result<(), Box<dyn Error>> {
    let mut session = Session::create(output_dir);
    log::info!(
        "Querying layer '{}' into group '{}'",
        layer.name,
        session.group_name()
    );

    for region in &layer.regions {
        for (part, polygon) in region.geometry.0.iter().enumerate() {
            if cancel.is_cancelled() {
                session.discard()?;
                log::warn!("Run cancelled; partial results discarded");
                return Ok(());
            }

            let Some(bbox) = bounding_box(polygon) else {
                log::warn!("Region {} part {part} has no extent, skipping", region.id);
                continue;
            };

            let estimate = clamp_estimate(api.count(&bbox).await?);

            let progress = IndicatifProgress::region_bar(
                multi,
                &format!("Fetching region {} part {part}", region.id),
            );
            if estimate > 0 {
                progress.set_total(estimate);
            }

            let outcome = fetch_region(api, &bbox, cancel, progress.as_ref()).await?;
            let FetchOutcome::Completed {
                features,
                records_seen,
            } = outcome
            else {
                progress.finish_and_clear();
                session.discard()?;
                log::warn!("Fetch aborted; partial results discarded");
                return Ok(());
            };
            progress.finish(format!(
                "Region {} part {part}: {} of {records_seen} record(s) materialized",
                region.id,
                features.len(),
            ));

            if features.is_empty() {
                log::info!(
                    "Region {} part {part}: no occurrences, skipping clip",
                    region.id
                );
                continue;
            }

            let clip_progress = IndicatifProgress::region_bar(
                multi,
                &format!("Clipping region {} part {part}", region.id),
            );
            clip_progress.set_total(features.len() as u64);

            match clip_points(polygon, features, cancel, clip_progress.as_ref()) {
                ClipOutcome::Aborted => {
                    clip_progress.finish_and_clear();
                    session.discard()?;
                    log::warn!("Clip aborted; partial results discarded");
                    return Ok(());
                }
                ClipOutcome::Completed(kept) => {
                    clip_progress.finish(format!(
                        "{} occurrence(s) within region {} part {part}",
                        kept.len(),
                        region.id,
                    ));
                    if kept.is_empty() {
                        continue;
                    }
                    session.register(region.id, part, &kept)?;
                }
            }
        }
    }

    session.finish();
    Ok(())
}
