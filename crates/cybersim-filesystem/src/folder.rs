//! Folders.

use crate::{File, FileHealth, FileSystemLimits, HealthTracker};
use cybersim_common::{
    Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// A folder of files.
///
/// The folder's actual health is the worst of its own state and the state of
/// every live file it holds. Health actions apply to the folder and, where
/// they make sense, to each file.
#[derive(Debug, Clone)]
pub struct Folder {
    id: ComponentId,
    name: String,
    /// Live files (BTreeMap for deterministic ordering).
    files: BTreeMap<String, File>,
    /// Deleted files per name, oldest first.
    deleted_files: BTreeMap<String, Vec<File>>,
    health: HealthTracker,
    limits: FileSystemLimits,
}

impl Folder {
    /// Create an empty, healthy folder.
    pub fn new(id: ComponentId, name: impl Into<String>, limits: FileSystemLimits) -> Self {
        Folder {
            id,
            name: name.into(),
            files: BTreeMap::new(),
            deleted_files: BTreeMap::new(),
            health: HealthTracker::new(),
            limits,
        }
    }

    /// Folder name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aggregated ground-truth health.
    pub fn health_status(&self) -> FileHealth {
        self.files
            .values()
            .map(File::health_status)
            .fold(self.health.actual(), FileHealth::worst)
    }

    /// Health as last revealed by a scan.
    pub fn visible_status(&self) -> FileHealth {
        self.health.visible()
    }

    /// Whether a folder scan is in progress.
    pub fn is_scanning(&self) -> bool {
        self.health.is_scanning()
    }

    /// Live files.
    pub fn files(&self) -> &BTreeMap<String, File> {
        &self.files
    }

    /// Look up a live file.
    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.get(name)
    }

    /// Look up a live file mutably.
    pub fn file_mut(&mut self, name: &str) -> Option<&mut File> {
        self.files.get_mut(name)
    }

    /// The most recently deleted file with this name.
    pub fn deleted_file(&self, name: &str) -> Option<&File> {
        self.deleted_files.get(name).and_then(|files| files.last())
    }

    /// Every deleted file with this name, oldest first.
    pub fn deleted_file_history(&self, name: &str) -> &[File] {
        self.deleted_files.get(name).map_or(&[], Vec::as_slice)
    }

    /// Add a file. Returns false if the name is taken.
    pub fn add_file(&mut self, file: File) -> bool {
        if self.files.contains_key(file.name()) {
            return false;
        }
        self.files.insert(file.name().to_string(), file);
        true
    }

    /// Move a live file to the deleted table.
    pub fn delete_file(&mut self, name: &str) -> bool {
        match self.files.remove(name) {
            Some(file) => {
                debug!(folder = %self.name, file = %name, "file deleted");
                self.deleted_files.entry(name.to_string()).or_default().push(file);
                true
            }
            None => false,
        }
    }

    /// Bring back the most recently deleted file with this name and start
    /// restoring it. Older deletions stay in the table.
    ///
    /// Fails if the file is not deleted or a live file has the same name.
    pub fn undelete_file(&mut self, name: &str) -> bool {
        if self.files.contains_key(name) {
            return false;
        }
        let Some(history) = self.deleted_files.get_mut(name) else {
            return false;
        };
        let Some(mut file) = history.pop() else {
            return false;
        };
        if history.is_empty() {
            self.deleted_files.remove(name);
        }
        file.restore();
        self.files.insert(name.to_string(), file);
        true
    }

    /// Remove a live file without keeping it (used by moves).
    pub fn take_file(&mut self, name: &str) -> Option<File> {
        self.files.remove(name)
    }

    /// Corrupt the folder and every file in it.
    pub fn corrupt(&mut self) -> bool {
        let mut any = self.health.corrupt();
        for file in self.files.values_mut() {
            any |= file.corrupt();
        }
        any
    }

    /// Destroy the folder and every file in it.
    pub fn destroy(&mut self) {
        self.health.destroy();
        for file in self.files.values_mut() {
            file.destroy();
        }
    }

    /// Start repairing the folder and its corrupt files.
    ///
    /// Returns false when nothing was corrupt.
    pub fn repair(&mut self) -> bool {
        let mut any = self.health.repair(self.limits.repairing_limit);
        for file in self.files.values_mut() {
            any |= file.repair();
        }
        any
    }

    /// Start restoring the folder and all its files.
    pub fn restore(&mut self) {
        self.health.restore(self.limits.restoring_limit);
        for file in self.files.values_mut() {
            file.restore();
        }
    }

    /// Start a folder scan. On completion the folder and all its files
    /// reveal their actual health.
    pub fn scan(&mut self) {
        if self.health.scan(self.limits.scanning_limit) {
            self.complete_scan();
        }
    }

    /// Reveal actual health of the folder and files immediately.
    pub fn reveal(&mut self) {
        self.complete_scan();
    }

    /// Reset per-step counters.
    pub fn pre_timestep(&mut self) {
        for file in self.files.values_mut() {
            file.pre_timestep();
        }
    }

    /// Advance timers of the folder and its files.
    pub fn apply_timestep(&mut self) {
        for file in self.files.values_mut() {
            file.apply_timestep();
        }
        if self.health.tick() {
            self.complete_scan();
        }
    }

    fn complete_scan(&mut self) {
        for file in self.files.values_mut() {
            file.reveal();
        }
        let aggregate = self.health_status();
        self.health.set_visible(aggregate);
    }
}

impl SimComponent for Folder {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let files: Map<String, Value> = self
            .files
            .iter()
            .map(|(name, file)| (name.clone(), file.describe_state()))
            .collect();
        let deleted: Map<String, Value> = self
            .deleted_files
            .iter()
            .map(|(name, files)| {
                let states: Vec<Value> = files.iter().map(File::describe_state).collect();
                (name.clone(), Value::Array(states))
            })
            .collect();
        json!({
            "uuid": self.id,
            "name": self.name,
            "health_status": self.health_status(),
            "visible_status": self.health.visible(),
            "scanning": self.health.is_scanning(),
            "files": files,
            "deleted_files": deleted,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        FOLDER_REQUESTS
    }
}

fn folder_scan(folder: &mut Folder, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    folder.scan();
    RequestResponse::success()
}

fn folder_repair(folder: &mut Folder, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(folder.repair(), "nothing in the folder is corrupt")
}

fn folder_restore(folder: &mut Folder, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    folder.restore();
    RequestResponse::success()
}

fn folder_corrupt(folder: &mut Folder, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(folder.corrupt(), "folder is destroyed")
}

fn folder_destroy(folder: &mut Folder, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    folder.destroy();
    RequestResponse::success()
}

/// Requests accepted by a folder.
pub const FOLDER_REQUESTS: &[RequestDef<Folder>] = &[
    RequestDef::new("scan", "Reveal actual health of the folder and its files", Arity::Exact(0), folder_scan),
    RequestDef::new("repair", "Repair the folder and its corrupt files", Arity::Exact(0), folder_repair),
    RequestDef::new("restore", "Restore the folder and all its files", Arity::Exact(0), folder_restore),
    RequestDef::new("corrupt", "Corrupt the folder and all its files", Arity::Exact(0), folder_corrupt),
    RequestDef::new("destroy", "Destroy the folder and all its files", Arity::Exact(0), folder_destroy),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn folder_with(names: &[&str]) -> Folder {
        let limits = FileSystemLimits::default();
        let mut folder = Folder::new(ComponentId::from_u128(10), "docs", limits);
        for (i, name) in names.iter().enumerate() {
            folder.add_file(File::new(ComponentId::from_u128(i as u128), *name, None, limits));
        }
        folder
    }

    #[test]
    fn test_health_is_worst_file() {
        let mut folder = folder_with(&["a.txt", "b.txt"]);
        assert_eq!(folder.health_status(), FileHealth::Good);
        folder.file_mut("a.txt").unwrap().corrupt();
        assert_eq!(folder.health_status(), FileHealth::Corrupt);
        folder.file_mut("b.txt").unwrap().destroy();
        assert_eq!(folder.health_status(), FileHealth::Destroyed);
    }

    #[test]
    fn test_scan_reveals_folder_and_files() {
        let mut folder = folder_with(&["a.txt"]);
        folder.file_mut("a.txt").unwrap().corrupt();
        folder.scan();
        assert!(folder.is_scanning());
        folder.apply_timestep();
        folder.apply_timestep();
        assert_eq!(folder.visible_status(), FileHealth::Good);
        folder.apply_timestep();
        assert!(!folder.is_scanning());
        assert_eq!(folder.visible_status(), FileHealth::Corrupt);
        assert_eq!(folder.file("a.txt").unwrap().visible_status(), FileHealth::Corrupt);
    }

    #[test]
    fn test_repair_applies_to_corrupt_children() {
        let mut folder = folder_with(&["a.txt", "b.txt"]);
        assert!(!folder.repair());
        folder.file_mut("a.txt").unwrap().corrupt();
        assert!(folder.repair());
        assert_eq!(folder.file("a.txt").unwrap().health_status(), FileHealth::Repairing);
        assert_eq!(folder.file("b.txt").unwrap().health_status(), FileHealth::Good);
        for _ in 0..3 {
            folder.apply_timestep();
        }
        assert_eq!(folder.health_status(), FileHealth::Good);
    }

    #[test]
    fn test_delete_keeps_file_for_audit() {
        let mut folder = folder_with(&["a.txt"]);
        assert!(folder.delete_file("a.txt"));
        assert!(folder.file("a.txt").is_none());
        assert!(folder.deleted_file("a.txt").is_some());
        assert!(!folder.delete_file("a.txt"));

        assert!(folder.undelete_file("a.txt"));
        assert_eq!(folder.file("a.txt").unwrap().health_status(), FileHealth::Restoring);
        assert!(folder.deleted_file("a.txt").is_none());
    }

    #[test]
    fn test_deleting_same_name_twice_keeps_both() {
        let limits = FileSystemLimits::default();
        let mut folder = folder_with(&[]);
        let mut first = File::new(ComponentId::from_u128(1), "a.txt", Some(1), limits);
        first.corrupt();
        folder.add_file(first);
        assert!(folder.delete_file("a.txt"));
        folder.add_file(File::new(ComponentId::from_u128(2), "a.txt", Some(2), limits));
        assert!(folder.delete_file("a.txt"));

        let history = folder.deleted_file_history("a.txt");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].size(), 1);
        assert_eq!(history[0].health_status(), FileHealth::Corrupt);
        assert_eq!(folder.deleted_file("a.txt").unwrap().size(), 2);

        // Restore brings back the newest deletion.
        assert!(folder.undelete_file("a.txt"));
        assert_eq!(folder.file("a.txt").unwrap().size(), 2);
        assert_eq!(folder.deleted_file("a.txt").unwrap().size(), 1);
        assert!(!folder.undelete_file("a.txt"));

        let state = folder.describe_state();
        assert_eq!(state["deleted_files"]["a.txt"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_destroyed_folder_restores_fully() {
        let mut folder = folder_with(&["a.txt"]);
        folder.destroy();
        assert!(!folder.corrupt());
        folder.restore();
        assert_eq!(folder.health_status(), FileHealth::Restoring);
        for _ in 0..3 {
            folder.apply_timestep();
        }
        assert_eq!(folder.health_status(), FileHealth::Good);
    }
}
