use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::common::error::validate_component;
use crate::common::{Result, VaultError};
use crate::storage::BinaryFile;

/// One upload in progress. The backing file is `None` once the slot has been
/// sealed (moved or removed) while another thread still held a reference.
pub struct UploadSlot {
    id: String,
    declared_size: u64,
    file: Mutex<Option<BinaryFile>>,
    last_touched: Mutex<Instant>,
}

impl UploadSlot {
    fn new(id: String, declared_size: u64, file: BinaryFile) -> Self {
        Self {
            id,
            declared_size,
            file: Mutex::new(Some(file)),
            last_touched: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.last_touched).elapsed()
    }

    fn touch(&self) {
        *lock(&self.last_touched) = Instant::now();
    }

    /// Runs `f` on the backing file under the slot lock.
    fn with_file<T>(&self, f: impl FnOnce(&BinaryFile) -> Result<T>) -> Result<T> {
        let guard = lock(&self.file);
        let file = guard
            .as_ref()
            .ok_or_else(|| VaultError::UnknownId(self.id.clone()))?;
        let out = f(file);
        self.touch();
        out
    }

    /// Waits for in-flight writes, then takes the backing file out of the slot.
    fn seal(&self) -> Option<BinaryFile> {
        lock(&self.file).take()
    }
}

/// Registry of open uploads shared by every session.
///
/// The map lock is held only for lookup, insert and remove; writes to one id
/// are serialized by that slot's own lock.
pub struct UploadRegistry {
    staging_dir: PathBuf,
    slots: Mutex<HashMap<String, Arc<UploadSlot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UploadRegistry {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Result<Self> {
        let staging_dir = staging_dir.into();
        fs::create_dir_all(&staging_dir)?;
        Ok(Self {
            staging_dir,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn staging_path(&self, id: &str) -> PathBuf {
        self.staging_dir.join(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.slots).contains_key(id)
    }

    /// Pre-allocates `<staging_dir>/<id>` to exactly `declared_size` bytes.
    ///
    /// An id that is already open yields `DuplicateId` and leaves the existing
    /// slot and its file untouched.
    #[instrument(skip(self))]
    pub fn init_new_file(&self, id: &str, declared_size: u64) -> Result<()> {
        validate_component(id)?;

        let mut slots = lock(&self.slots);
        if slots.contains_key(id) {
            return Err(VaultError::DuplicateId(id.to_string()));
        }
        let file = BinaryFile::allocate(self.staging_path(id), declared_size)?;
        slots.insert(
            id.to_string(),
            Arc::new(UploadSlot::new(id.to_string(), declared_size, file)),
        );

        info!(declared_size, open = slots.len(), "upload slot opened");
        Ok(())
    }

    /// Opens a slot under a freshly generated id and returns that id.
    pub fn register_upload(&self, declared_size: u64) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.init_new_file(&id, declared_size)?;
        Ok(id)
    }

    fn slot(&self, id: &str) -> Result<Arc<UploadSlot>> {
        lock(&self.slots)
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::UnknownId(id.to_string()))
    }

    fn take_slot(&self, id: &str) -> Result<Arc<UploadSlot>> {
        lock(&self.slots)
            .remove(id)
            .ok_or_else(|| VaultError::UnknownId(id.to_string()))
    }

    /// Writes `data` at byte `offset` of the upload. Chunks may arrive in any
    /// order and leave gaps; nothing may land past the declared size.
    pub fn add_data_to_pos(&self, id: &str, offset: u64, data: &[u8]) -> Result<()> {
        let slot = self.slot(id)?;
        let len = data.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > slot.declared_size) {
            return Err(VaultError::OutOfBounds {
                offset,
                len,
                limit: slot.declared_size,
            });
        }

        slot.with_file(|file| file.write_at(offset, data))?;
        debug!(id, offset, len, "chunk stored");
        Ok(())
    }

    /// Whole backing file of an open upload.
    pub fn get_data(&self, id: &str) -> Result<Vec<u8>> {
        self.slot(id)?.with_file(|file| file.read_all())
    }

    /// Closes and deletes the upload's file and forgets the id.
    pub fn remove_data(&self, id: &str) -> Result<()> {
        let slot = self.take_slot(id)?;
        if let Some(file) = slot.seal() {
            file.delete()?;
        }
        info!(id, "upload slot removed");
        Ok(())
    }

    /// Seals the upload and renames its file to `target`.
    ///
    /// On a rename failure the slot is registered again so the data is not lost.
    #[instrument(skip(self, target), fields(dest = %target.as_ref().display()))]
    pub fn move_data(&self, id: &str, target: impl AsRef<Path>) -> Result<PathBuf> {
        let target = target.as_ref();
        let slot = self.take_slot(id)?;
        let file = slot
            .seal()
            .ok_or_else(|| VaultError::UnknownId(id.to_string()))?;
        let source = file.path().to_path_buf();
        match file.sync().and_then(|()| file.rename(target)) {
            Ok(moved) => {
                info!(id, "upload moved");
                Ok(moved)
            }
            Err(e) => {
                warn!(id, error = %e, "move failed, keeping upload open");
                let reopened = BinaryFile::open(&source)?;
                lock(&self.slots).insert(
                    id.to_string(),
                    Arc::new(UploadSlot::new(id.to_string(), slot.declared_size, reopened)),
                );
                Err(e)
            }
        }
    }

    /// Deletes every slot untouched for longer than `max_idle`. Returns the swept ids.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<String> {
        let expired: Vec<Arc<UploadSlot>> = {
            let mut slots = lock(&self.slots);
            let ids: Vec<String> = slots
                .values()
                .filter(|slot| slot.idle_for() > max_idle)
                .map(|slot| slot.id.clone())
                .collect();
            ids.iter().filter_map(|id| slots.remove(id)).collect()
        };

        let mut swept = Vec::with_capacity(expired.len());
        for slot in expired {
            if let Some(file) = slot.seal() {
                if let Err(e) = file.delete() {
                    warn!(id = %slot.id, error = %e, "failed to delete idle upload");
                }
            }
            swept.push(slot.id.clone());
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "idle uploads swept");
        }
        swept
    }

    /// Closes and deletes every open upload.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<UploadSlot>> = lock(&self.slots).drain().map(|(_, s)| s).collect();
        if drained.is_empty() {
            return;
        }
        for slot in &drained {
            if let Some(file) = slot.seal() {
                if let Err(e) = file.delete() {
                    warn!(id = %slot.id, error = %e, "failed to delete upload on shutdown");
                }
            }
        }
        info!(count = drained.len(), "open uploads discarded");
    }
}

impl Drop for UploadRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
