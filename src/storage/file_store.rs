// File-backed slot store: an A/B pair of image files plus a JSON boot
// record, the host-side analogue of a paired OTA flash layout. The boot
// record is replaced with a rename so activation stays atomic.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{FirmwareSlot, FirmwareStorage, StorageError};

const BOOT_RECORD_FILE: &str = "boot.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::A => write!(f, "a"),
            SlotId::B => write!(f, "b"),
        }
    }
}

/// Which slot boots next, and the metadata of the image installed there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootRecord {
    pub active: SlotId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<u32>,
}

impl Default for BootRecord {
    fn default() -> Self {
        Self {
            active: SlotId::A,
            version: None,
            build_number: None,
        }
    }
}

pub struct FileSlotStore {
    dir: PathBuf,
}

impl FileSlotStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The current boot record, if one has been written yet.
    pub fn boot_record(&self) -> Result<Option<BootRecord>, StorageError> {
        let path = self.dir.join(BOOT_RECORD_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        let record = serde_json::from_slice(&data)
            .map_err(|e| StorageError::new(format!("corrupt boot record: {e}")))?;
        Ok(Some(record))
    }

    /// Stamp the active slot with the version and build it now holds.
    /// Called after a successful install so the identity can be refreshed
    /// from storage on the next start.
    pub fn record_installed(&self, version: &str, build_number: u32) -> Result<(), StorageError> {
        let mut record = self.boot_record()?.unwrap_or_default();
        record.version = Some(version.to_string());
        record.build_number = Some(build_number);
        write_record(&self.dir, &record)
    }
}

impl FirmwareStorage for FileSlotStore {
    type Slot = FileSlot;

    fn acquire_inactive_slot(&mut self) -> Result<FileSlot, StorageError> {
        let active = self
            .boot_record()?
            .map(|record| record.active)
            .unwrap_or(SlotId::A);
        let target = active.other();

        let final_path = self.dir.join(format!("slot_{target}.bin"));
        let partial_path = self.dir.join(format!("slot_{target}.bin.partial"));
        // create() truncates any stale partial left by an interrupted run
        let file = File::create(&partial_path)?;

        log::debug!("acquired slot {} for writing", target);
        Ok(FileSlot {
            id: target,
            dir: self.dir.clone(),
            final_path,
            partial_path,
            file: Some(file),
            finalized: false,
        })
    }
}

pub struct FileSlot {
    id: SlotId,
    dir: PathBuf,
    final_path: PathBuf,
    partial_path: PathBuf,
    file: Option<File>,
    finalized: bool,
}

impl FirmwareSlot for FileSlot {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::new("slot is not open for writing"))?;
        file.write_all(chunk)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), StorageError> {
        let file = self
            .file
            .take()
            .ok_or_else(|| StorageError::new("slot is not open for writing"))?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.partial_path, &self.final_path)?;
        self.finalized = true;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), StorageError> {
        if !self.finalized {
            return Err(StorageError::new("cannot activate a slot that was not finalized"));
        }
        // Metadata of the previous image no longer applies once the boot
        // target flips; record_installed fills it back in.
        let record = BootRecord {
            active: self.id,
            version: None,
            build_number: None,
        };
        write_record(&self.dir, &record)?;
        log::info!("slot {} is now the boot target", self.id);
        Ok(())
    }

    fn abort(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.partial_path);
            log::debug!("aborted slot {}, partial image removed", self.id);
        }
    }
}

impl Drop for FileSlot {
    fn drop(&mut self) {
        // Installer aborts explicitly on every failure path; this catches
        // slots dropped mid-write during a panic or early return.
        if self.file.take().is_some() && !self.finalized {
            let _ = fs::remove_file(&self.partial_path);
        }
    }
}

fn write_record(dir: &Path, record: &BootRecord) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| StorageError::new(format!("encode boot record: {e}")))?;
    let tmp = dir.join(format!("{BOOT_RECORD_FILE}.tmp"));
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, dir.join(BOOT_RECORD_FILE))?;
    Ok(())
}
