//! Session group bookkeeping for one CLI run.
//!
//! Each run writes its clipped result layers into a uniquely named group
//! directory (`GBIF Occurrences-<timestamp>`). The name is generated from
//! the clock rather than by scanning existing directories, so repeated runs
//! never collide. Nothing touches the filesystem until the first result is
//! registered, and a cancelled run discards the whole group.

use std::path::{Path, PathBuf};

use gbif_occ_models::PointFeature;
use gbif_occ_spatial::to_feature_collection;

/// Errors that can occur while writing session results.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Creating the group directory or writing a layer file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing a result layer failed.
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One run's result group: a named directory of clipped result layers.
pub struct Session {
    group_name: String,
    group_dir: PathBuf,
    layers_written: usize,
}

impl Session {
    /// Creates a session with a timestamp-unique group name under
    /// `base_dir`. No directory is created yet.
    #[must_use]
    pub fn create(base_dir: &Path) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        Self::with_group_name(base_dir, &format!("GBIF Occurrences-{stamp}"))
    }

    /// Creates a session with an explicit group name.
    #[must_use]
    pub fn with_group_name(base_dir: &Path, group_name: &str) -> Self {
        Self {
            group_name: group_name.to_owned(),
            group_dir: base_dir.join(group_name),
            layers_written: 0,
        }
    }

    /// The unique group name of this run.
    #[must_use]
    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Writes one region part's clipped features as a `GeoJSON` layer file
    /// in the group directory, creating the directory on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the directory cannot be created or the
    /// file cannot be written.
    pub fn register(
        &mut self,
        region_id: u64,
        part: usize,
        features: &[PointFeature],
    ) -> Result<PathBuf, SessionError> {
        std::fs::create_dir_all(&self.group_dir)?;

        let file_name = if part == 0 {
            format!("result{region_id}.geojson")
        } else {
            format!("result{region_id}-{part}.geojson")
        };
        let path = self.group_dir.join(file_name);

        let collection = to_feature_collection(features);
        let json = serde_json::to_string_pretty(&collection)?;
        std::fs::write(&path, json)?;

        self.layers_written += 1;
        log::info!(
            "Registered {} feature(s) as {}",
            features.len(),
            path.display()
        );
        Ok(path)
    }

    /// Removes the partially created group after a cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the group directory exists but cannot be
    /// removed.
    pub fn discard(self) -> Result<(), SessionError> {
        if self.group_dir.exists() {
            std::fs::remove_dir_all(&self.group_dir)?;
            log::info!("Removed result group '{}'", self.group_name);
        }
        Ok(())
    }

    /// Logs the run summary. A run with no results leaves no directory
    /// behind.
    pub fn finish(self) {
        if self.layers_written == 0 {
            log::info!("No result layers written; group '{}' not created", self.group_name);
        } else {
            log::info!(
                "Wrote {} result layer(s) to {}",
                self.layers_written,
                self.group_dir.display()
            );
        }
    }
}
