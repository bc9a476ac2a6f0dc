//! # cybersim-filesystem
//!
//! Simulated file systems for CyberSim nodes.
//!
//! This crate provides:
//! - [`FileHealth`] and the timed health tracker shared by files and folders
//! - [`File`] and [`Folder`] with actual vs visible health
//! - [`FileSystem`], owning folders plus side tables of deleted items
//!
//! ## Health Timers
//!
//! | action    | from            | to (after limit)             |
//! |-----------|-----------------|------------------------------|
//! | `corrupt` | anything but DESTROYED | CORRUPT (immediate)   |
//! | `destroy` | anything        | DESTROYED (immediate)        |
//! | `repair`  | CORRUPT         | REPAIRING → GOOD             |
//! | `restore` | anything        | RESTORING → GOOD             |
//! | `scan`    | anything        | visible := actual            |
//!
//! Timers decrement once per timestep and fire when they reach zero, so a
//! limit of `n` takes exactly `n` timesteps. A limit of zero completes
//! immediately.

mod file;
mod file_system;
mod folder;

pub use file::{File, FileType, FILE_REQUESTS};
pub use file_system::{FileSystem, FILE_SYSTEM_REQUESTS, ROOT_FOLDER};
pub use folder::{Folder, FOLDER_REQUESTS};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from file-system operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileSystemError {
    /// No live folder with that name.
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// No live file with that name.
    #[error("File not found: {folder}/{file}")]
    FileNotFound {
        /// Folder searched.
        folder: String,
        /// File name.
        file: String,
    },

    /// Folder name already taken.
    #[error("Folder already exists: {0}")]
    FolderExists(String),

    /// File name already taken.
    #[error("File already exists: {folder}/{file}")]
    FileExists {
        /// Folder name.
        folder: String,
        /// File name.
        file: String,
    },

    /// The root folder cannot be deleted.
    #[error("The root folder cannot be deleted")]
    RootFolder,
}

// ============================================================================
// Health
// ============================================================================

/// Health of a file or folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileHealth {
    /// Intact.
    Good,
    /// Content damaged; repairable.
    Corrupt,
    /// Content lost; only a restore brings it back.
    Destroyed,
    /// Repair in progress.
    Repairing,
    /// Restore in progress.
    Restoring,
}

impl FileHealth {
    /// Rank used to aggregate folder health (higher is worse).
    pub fn severity(self) -> u8 {
        match self {
            FileHealth::Good => 0,
            FileHealth::Repairing => 1,
            FileHealth::Restoring => 2,
            FileHealth::Corrupt => 3,
            FileHealth::Destroyed => 4,
        }
    }

    /// The worse of two states.
    pub fn worst(self, other: FileHealth) -> FileHealth {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for FileHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileHealth::Good => write!(f, "GOOD"),
            FileHealth::Corrupt => write!(f, "CORRUPT"),
            FileHealth::Destroyed => write!(f, "DESTROYED"),
            FileHealth::Repairing => write!(f, "REPAIRING"),
            FileHealth::Restoring => write!(f, "RESTORING"),
        }
    }
}

/// Durations (in timesteps) of file-system operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemLimits {
    /// Steps before a scan reveals actual health.
    pub scanning_limit: u32,
    /// Steps for a repair to complete.
    pub repairing_limit: u32,
    /// Steps for a restore to complete.
    pub restoring_limit: u32,
}

impl Default for FileSystemLimits {
    fn default() -> Self {
        FileSystemLimits {
            scanning_limit: 3,
            repairing_limit: 3,
            restoring_limit: 3,
        }
    }
}

/// Actual/visible health with the repair, restore and scan countdowns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HealthTracker {
    actual: FileHealth,
    visible: FileHealth,
    /// Remaining steps of a REPAIRING or RESTORING transition.
    transition: Option<u32>,
    /// Remaining steps of a scan.
    scan: Option<u32>,
}

impl HealthTracker {
    pub(crate) fn new() -> Self {
        HealthTracker {
            actual: FileHealth::Good,
            visible: FileHealth::Good,
            transition: None,
            scan: None,
        }
    }

    pub(crate) fn actual(&self) -> FileHealth {
        self.actual
    }

    pub(crate) fn visible(&self) -> FileHealth {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: FileHealth) {
        self.visible = visible;
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    pub(crate) fn corrupt(&mut self) -> bool {
        if self.actual == FileHealth::Destroyed {
            return false;
        }
        self.actual = FileHealth::Corrupt;
        self.transition = None;
        true
    }

    pub(crate) fn destroy(&mut self) {
        self.actual = FileHealth::Destroyed;
        self.transition = None;
    }

    pub(crate) fn repair(&mut self, limit: u32) -> bool {
        if self.actual != FileHealth::Corrupt {
            return false;
        }
        self.begin_transition(FileHealth::Repairing, limit);
        true
    }

    pub(crate) fn restore(&mut self, limit: u32) {
        self.begin_transition(FileHealth::Restoring, limit);
    }

    /// Start a scan. Returns true if it completed immediately.
    pub(crate) fn scan(&mut self, limit: u32) -> bool {
        if limit == 0 {
            self.scan = None;
            self.visible = self.actual;
            true
        } else {
            self.scan = Some(limit);
            false
        }
    }

    pub(crate) fn reveal(&mut self) {
        self.visible = self.actual;
    }

    /// Advance the countdowns. Returns true when a scan completed this step.
    pub(crate) fn tick(&mut self) -> bool {
        if let Some(remaining) = self.transition {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.actual = FileHealth::Good;
                self.transition = None;
            } else {
                self.transition = Some(remaining);
            }
        }

        match self.scan {
            Some(remaining) => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    self.scan = None;
                    self.visible = self.actual;
                    true
                } else {
                    self.scan = Some(remaining);
                    false
                }
            }
            None => false,
        }
    }

    fn begin_transition(&mut self, state: FileHealth, limit: u32) {
        if limit == 0 {
            self.actual = FileHealth::Good;
            self.transition = None;
        } else {
            self.actual = state;
            self.transition = Some(limit);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
