//! Turns completed uploads into containers and scores results against them.

pub mod check;
pub mod csv;
pub mod mnist;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument};

use crate::common::Result;
use crate::container::DatasetFile;
use crate::upload::UploadRegistry;

pub use check::{check_result, correctness};

/// Converts finished uploads held by the registry into their final form.
pub struct Finalizer {
    registry: Arc<UploadRegistry>,
}

impl Finalizer {
    pub fn new(registry: Arc<UploadRegistry>) -> Self {
        Self { registry }
    }

    /// Builds an image container from two IDX uploads, then drops both uploads.
    #[instrument(skip(self, target), fields(dest = %target.as_ref().display()))]
    pub fn finalize_mnist(
        &self,
        target: impl AsRef<Path>,
        name: &str,
        input_id: &str,
        label_id: &str,
    ) -> Result<DatasetFile> {
        let images = self.registry.get_data(input_id)?;
        let labels = self.registry.get_data(label_id)?;
        let file = mnist::convert(target, name, &images, &labels)?;

        self.registry.remove_data(input_id)?;
        self.registry.remove_data(label_id)?;
        info!(rows = file.row_count(), "mnist dataset finalized");
        Ok(file)
    }

    /// Builds a table container from a CSV upload, then drops the upload.
    #[instrument(skip(self, target), fields(dest = %target.as_ref().display()))]
    pub fn finalize_csv(&self, target: impl AsRef<Path>, name: &str, input_id: &str) -> Result<DatasetFile> {
        let raw = self.registry.get_data(input_id)?;
        let text = String::from_utf8_lossy(&raw);
        let file = csv::convert(target, name, &text)?;

        self.registry.remove_data(input_id)?;
        info!(rows = file.row_count(), "csv dataset finalized");
        Ok(file)
    }

    /// Snapshots are stored verbatim: the upload is moved into place.
    pub fn finalize_snapshot(&self, file_id: &str, target: impl AsRef<Path>) -> Result<PathBuf> {
        self.registry.move_data(file_id, target)
    }
}
