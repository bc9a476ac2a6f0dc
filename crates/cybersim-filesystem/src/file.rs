//! Files.

use crate::{FileHealth, FileSystemLimits, HealthTracker};
use cybersim_common::{
    Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// File type, derived from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    /// Unrecognised extension.
    Unknown,
    /// Plain text.
    Txt,
    /// Comma separated values.
    Csv,
    /// JSON document.
    Json,
    /// PDF document.
    Pdf,
    /// Word document.
    Docx,
    /// PNG image.
    Png,
    /// JPEG image.
    Jpg,
    /// Database file.
    Db,
    /// Executable.
    Exe,
    /// Archive.
    Zip,
}

impl FileType {
    /// Infer the type from a file name.
    pub fn from_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" => FileType::Txt,
            "csv" => FileType::Csv,
            "json" => FileType::Json,
            "pdf" => FileType::Pdf,
            "docx" => FileType::Docx,
            "png" => FileType::Png,
            "jpg" | "jpeg" => FileType::Jpg,
            "db" => FileType::Db,
            "exe" => FileType::Exe,
            "zip" => FileType::Zip,
            _ => FileType::Unknown,
        }
    }

    /// Size in bytes used when none is configured.
    pub fn default_size(self) -> u64 {
        match self {
            FileType::Unknown => 1_024,
            FileType::Txt => 4_096,
            FileType::Csv => 16_384,
            FileType::Json => 8_192,
            FileType::Pdf => 102_400,
            FileType::Docx => 51_200,
            FileType::Png => 204_800,
            FileType::Jpg => 153_600,
            FileType::Db => 15_360_000,
            FileType::Exe => 1_048_576,
            FileType::Zip => 2_097_152,
        }
    }
}

/// A file inside a folder.
#[derive(Debug, Clone)]
pub struct File {
    id: ComponentId,
    name: String,
    file_type: FileType,
    size: u64,
    health: HealthTracker,
    limits: FileSystemLimits,
    /// Accesses during the current timestep.
    num_access: u32,
}

impl File {
    /// Create a new healthy file. `size` defaults by file type.
    pub fn new(
        id: ComponentId,
        name: impl Into<String>,
        size: Option<u64>,
        limits: FileSystemLimits,
    ) -> Self {
        let name = name.into();
        let file_type = FileType::from_name(&name);
        File {
            id,
            size: size.unwrap_or_else(|| file_type.default_size()),
            name,
            file_type,
            health: HealthTracker::new(),
            limits,
            num_access: 0,
        }
    }

    /// File name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File type.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Ground-truth health.
    pub fn health_status(&self) -> FileHealth {
        self.health.actual()
    }

    /// Health as last revealed by a scan.
    pub fn visible_status(&self) -> FileHealth {
        self.health.visible()
    }

    /// Accesses during the current timestep.
    pub fn num_access(&self) -> u32 {
        self.num_access
    }

    /// Whether a scan is in progress.
    pub fn is_scanning(&self) -> bool {
        self.health.is_scanning()
    }

    /// Corrupt the file. Fails on a destroyed file.
    pub fn corrupt(&mut self) -> bool {
        let ok = self.health.corrupt();
        if ok {
            debug!(file = %self.name, "file corrupted");
        }
        ok
    }

    /// Destroy the file.
    pub fn destroy(&mut self) {
        debug!(file = %self.name, "file destroyed");
        self.health.destroy();
    }

    /// Begin repairing a corrupt file.
    pub fn repair(&mut self) -> bool {
        self.health.repair(self.limits.repairing_limit)
    }

    /// Begin restoring the file from any state.
    pub fn restore(&mut self) {
        self.health.restore(self.limits.restoring_limit);
    }

    /// Begin a scan.
    pub fn scan(&mut self) {
        self.health.scan(self.limits.scanning_limit);
    }

    /// Reveal actual health immediately.
    pub fn reveal(&mut self) {
        self.health.reveal();
    }

    /// Read or write the file. Destroyed files cannot be accessed.
    pub fn access(&mut self) -> bool {
        if self.health.actual() == FileHealth::Destroyed {
            return false;
        }
        self.num_access += 1;
        true
    }

    /// Reset per-step counters.
    pub fn pre_timestep(&mut self) {
        self.num_access = 0;
    }

    /// Advance timers.
    pub fn apply_timestep(&mut self) {
        self.health.tick();
    }
}

impl SimComponent for File {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> serde_json::Value {
        json!({
            "uuid": self.id,
            "name": self.name,
            "file_type": self.file_type,
            "size": self.size,
            "health_status": self.health.actual(),
            "visible_status": self.health.visible(),
            "scanning": self.health.is_scanning(),
            "num_access": self.num_access,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        FILE_REQUESTS
    }
}

fn file_scan(file: &mut File, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    file.scan();
    RequestResponse::success()
}

fn file_repair(file: &mut File, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(file.repair(), "only corrupt files can be repaired")
}

fn file_restore(file: &mut File, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    file.restore();
    RequestResponse::success()
}

fn file_corrupt(file: &mut File, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(file.corrupt(), "destroyed files cannot be corrupted")
}

fn file_destroy(file: &mut File, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    file.destroy();
    RequestResponse::success()
}

fn file_access(file: &mut File, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(file.access(), "file is destroyed")
}

/// Requests accepted by a file.
pub const FILE_REQUESTS: &[RequestDef<File>] = &[
    RequestDef::new("scan", "Reveal actual health after the scanning limit", Arity::Exact(0), file_scan),
    RequestDef::new("repair", "Repair a corrupt file", Arity::Exact(0), file_repair),
    RequestDef::new("restore", "Restore the file from backup", Arity::Exact(0), file_restore),
    RequestDef::new("corrupt", "Corrupt the file", Arity::Exact(0), file_corrupt),
    RequestDef::new("destroy", "Destroy the file", Arity::Exact(0), file_destroy),
    RequestDef::new("access", "Read or write the file", Arity::Exact(0), file_access),
];
