use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::error::validate_component;
use crate::common::logging::init_tracing;
use crate::common::{Result, VaultConfig};
use crate::control::{ControlDispatcher, FileLogSink, LogSink, ResultStore};
use crate::finalize::Finalizer;
use crate::ingest::{IngestDispatcher, UploadFinishSink};
use crate::upload::UploadRegistry;

/// Owns the registry and both dispatchers for the lifetime of the service.
pub struct VaultRoot {
    config: VaultConfig,
    registry: Arc<UploadRegistry>,
    ingest: IngestDispatcher,
    control: ControlDispatcher,
    finalizer: Finalizer,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl VaultRoot {
    /// Loads configuration from the environment, installs tracing and builds the root.
    pub fn bootstrap(finish_sink: Arc<dyn UploadFinishSink>) -> anyhow::Result<Self> {
        let config = VaultConfig::from_env().context("loading vault configuration")?;
        init_tracing(config.log_filter.as_deref());
        Self::new(config, finish_sink)
    }

    /// Builds the root with the file-backed log sink.
    pub fn new(config: VaultConfig, finish_sink: Arc<dyn UploadFinishSink>) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let log_sink = FileLogSink::new(&storage.audit_dir, &storage.error_dir)
            .context("creating log directories")?;
        Self::with_log_sink(config, finish_sink, Arc::new(log_sink))
    }

    pub fn with_log_sink(
        config: VaultConfig,
        finish_sink: Arc<dyn UploadFinishSink>,
        log_sink: Arc<dyn LogSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        config
            .storage
            .create_dirs()
            .context("creating storage directories")?;

        let registry = Arc::new(
            UploadRegistry::new(&config.storage.staging_dir)
                .context("opening upload staging directory")?,
        );
        let results = ResultStore::new(&config.storage.result_dir)
            .context("opening result directory")?;

        let ingest = IngestDispatcher::new(Arc::clone(&registry), finish_sink, config.ingest.clone());
        let control = ControlDispatcher::new(results, log_sink);
        let finalizer = Finalizer::new(Arc::clone(&registry));

        info!(
            staging = %config.storage.staging_dir.display(),
            size_heuristic = config.ingest.size_heuristic,
            "vault ready"
        );
        Ok(Self {
            config,
            registry,
            ingest,
            control,
            finalizer,
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<UploadRegistry> {
        &self.registry
    }

    pub fn ingest(&self) -> &IngestDispatcher {
        &self.ingest
    }

    pub fn control(&self) -> &ControlDispatcher {
        &self.control
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    /// Location of the container for dataset `id`.
    pub fn dataset_path(&self, id: &str) -> Result<PathBuf> {
        validate_component(id)?;
        Ok(self.config.storage.dataset_dir.join(id))
    }

    pub fn snapshot_path(&self, id: &str) -> Result<PathBuf> {
        validate_component(id)?;
        Ok(self.config.storage.snapshot_dir.join(id))
    }

    /// Starts the periodic idle-upload sweep on the current tokio runtime.
    ///
    /// Returns `false` when no idle timeout is configured or a sweeper is already running.
    pub fn spawn_idle_sweeper(&self) -> bool {
        let Some(max_idle) = self.config.upload.idle_timeout() else {
            return false;
        };
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }

        let registry = Arc::clone(&self.registry);
        let period = self.config.upload.sweep_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let registry = Arc::clone(&registry);
                match tokio::task::spawn_blocking(move || registry.sweep_idle(max_idle)).await {
                    Ok(swept) if !swept.is_empty() => debug!(?swept, "sweeper pass"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "idle sweep task failed"),
                }
            }
        }));

        info!(?max_idle, ?period, "idle upload sweeper started");
        true
    }

    /// Stops the sweeper and discards every open upload.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.registry.shutdown();
    }
}

impl Drop for VaultRoot {
    fn drop(&mut self) {
        self.shutdown();
    }
}
