use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::frame::IngestFrame;
use crate::common::{IngestConfig, Result};
use crate::upload::UploadRegistry;

/// Metadata store notified when the last chunk of an upload has been stored.
pub trait UploadFinishSink: Send + Sync {
    fn mark_upload_finished(&self, dataset_id: &str, file_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Chunk written; the upload continues.
    Stored,
    /// Chunk written and the upload reported as finished.
    Completed,
    /// Last chunk written, but the finish notification failed. The upload
    /// stays open and the notification can be retried by resending the chunk.
    Unconfirmed,
    /// Frame rejected before anything was written; logged.
    Dropped,
}

/// Routes chunk frames from the stream channel into the upload registry.
pub struct IngestDispatcher {
    registry: Arc<UploadRegistry>,
    finish_sink: Arc<dyn UploadFinishSink>,
    config: IngestConfig,
}

impl IngestDispatcher {
    pub fn new(
        registry: Arc<UploadRegistry>,
        finish_sink: Arc<dyn UploadFinishSink>,
        config: IngestConfig,
    ) -> Self {
        Self {
            registry,
            finish_sink,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Bare stream frame. Completion falls back to the size heuristic when enabled.
    #[instrument(skip_all, fields(len = data.len()))]
    pub fn handle_frame(&self, data: &[u8]) -> IngestOutcome {
        self.dispatch(data, None)
    }

    /// Frame carried in an envelope with an explicit last-chunk flag.
    #[instrument(skip_all, fields(len = data.len(), is_last = is_last))]
    pub fn handle_envelope(&self, data: &[u8], is_last: bool) -> IngestOutcome {
        self.dispatch(data, Some(is_last))
    }

    fn dispatch(&self, data: &[u8], is_last: Option<bool>) -> IngestOutcome {
        let mut frame = match IngestFrame::decode(data, self.config.offset_width) {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind = e.kind(), error = %e, "dropping undecodable frame");
                return IngestOutcome::Dropped;
            }
        };
        frame.is_last = is_last;

        match self.process(&frame) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    kind = e.kind(),
                    error = %e,
                    dataset_id = %frame.dataset_id,
                    file_id = %frame.file_id,
                    offset = frame.offset,
                    "dropping frame"
                );
                IngestOutcome::Dropped
            }
        }
    }

    fn process(&self, frame: &IngestFrame<'_>) -> Result<IngestOutcome> {
        self.registry
            .add_data_to_pos(&frame.file_id, frame.offset, &frame.bytes)?;

        if !self.is_complete(frame) {
            return Ok(IngestOutcome::Stored);
        }

        if let Err(e) = self
            .finish_sink
            .mark_upload_finished(&frame.dataset_id, &frame.file_id)
        {
            error!(
                kind = e.kind(),
                error = %e,
                dataset_id = %frame.dataset_id,
                file_id = %frame.file_id,
                "chunk stored but upload could not be marked finished"
            );
            return Ok(IngestOutcome::Unconfirmed);
        }
        info!(dataset_id = %frame.dataset_id, file_id = %frame.file_id, "upload finished");
        Ok(IngestOutcome::Completed)
    }

    fn is_complete(&self, frame: &IngestFrame<'_>) -> bool {
        match frame.is_last {
            Some(flag) => flag,
            None if self.config.size_heuristic => {
                let last = frame.len() < self.config.heuristic_threshold;
                if last {
                    warn!(
                        file_id = %frame.file_id,
                        len = frame.len(),
                        threshold = self.config.heuristic_threshold,
                        "completion inferred from chunk size"
                    );
                }
                last
            }
            None => {
                debug!(file_id = %frame.file_id, "bare frame without completion signal");
                false
            }
        }
    }
}
