//! The per-node file system.

use crate::{File, FileSystemError, FileSystemLimits, Folder, FILE_REQUESTS, FOLDER_REQUESTS};
use cybersim_common::{
    dispatch, parse_arg, Arity, ComponentId, RequestDef, RequestResponse, SimComponent,
    SimContext,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Name of the folder every file system starts with.
pub const ROOT_FOLDER: &str = "root";

/// Folders of a node, plus the folders that have been deleted.
#[derive(Debug, Clone)]
pub struct FileSystem {
    id: ComponentId,
    folders: BTreeMap<String, Folder>,
    /// Deleted folders per name, oldest first.
    deleted_folders: BTreeMap<String, Vec<Folder>>,
    limits: FileSystemLimits,
}

impl FileSystem {
    /// Create a file system holding an empty root folder.
    pub fn new(ctx: &mut SimContext, limits: FileSystemLimits) -> Self {
        let mut fs = FileSystem {
            id: ctx.new_id(),
            folders: BTreeMap::new(),
            deleted_folders: BTreeMap::new(),
            limits,
        };
        let root = Folder::new(ctx.new_id(), ROOT_FOLDER, limits);
        fs.folders.insert(ROOT_FOLDER.to_string(), root);
        fs
    }

    /// Operation durations used for new files and folders.
    pub fn limits(&self) -> FileSystemLimits {
        self.limits
    }

    /// Live folders.
    pub fn folders(&self) -> &BTreeMap<String, Folder> {
        &self.folders
    }

    /// Look up a live folder.
    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.get(name)
    }

    /// Look up a live folder mutably.
    pub fn folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.get_mut(name)
    }

    /// Look up a live file.
    pub fn file(&self, folder: &str, file: &str) -> Option<&File> {
        self.folders.get(folder).and_then(|f| f.file(file))
    }

    /// Look up a live file mutably.
    pub fn file_mut(&mut self, folder: &str, file: &str) -> Option<&mut File> {
        self.folders.get_mut(folder).and_then(|f| f.file_mut(file))
    }

    /// The most recently deleted folder with this name.
    pub fn deleted_folder(&self, name: &str) -> Option<&Folder> {
        self.deleted_folders.get(name).and_then(|folders| folders.last())
    }

    /// Every deleted folder with this name, oldest first.
    pub fn deleted_folder_history(&self, name: &str) -> &[Folder] {
        self.deleted_folders.get(name).map_or(&[], Vec::as_slice)
    }

    /// Look up a deleted file in a live folder.
    pub fn deleted_file(&self, folder: &str, file: &str) -> Option<&File> {
        self.folders.get(folder).and_then(|f| f.deleted_file(file))
    }

    /// Create an empty folder.
    pub fn create_folder(
        &mut self,
        ctx: &mut SimContext,
        name: &str,
    ) -> Result<&mut Folder, FileSystemError> {
        if self.folders.contains_key(name) {
            return Err(FileSystemError::FolderExists(name.to_string()));
        }
        debug!(folder = %name, "folder created");
        let folder = Folder::new(ctx.new_id(), name, self.limits);
        Ok(self.folders.entry(name.to_string()).or_insert(folder))
    }

    /// Create a file, creating its folder first if needed.
    pub fn create_file(
        &mut self,
        ctx: &mut SimContext,
        folder: &str,
        name: &str,
        size: Option<u64>,
    ) -> Result<&mut File, FileSystemError> {
        if !self.folders.contains_key(folder) {
            self.create_folder(ctx, folder)?;
        }
        let file = File::new(ctx.new_id(), name, size, self.limits);
        let target = self
            .folders
            .get_mut(folder)
            .ok_or_else(|| FileSystemError::FolderNotFound(folder.to_string()))?;
        if !target.add_file(file) {
            return Err(FileSystemError::FileExists {
                folder: folder.to_string(),
                file: name.to_string(),
            });
        }
        target.file_mut(name).ok_or_else(|| FileSystemError::FileNotFound {
            folder: folder.to_string(),
            file: name.to_string(),
        })
    }

    /// Move a folder to the deleted table. The root folder cannot be deleted.
    pub fn delete_folder(&mut self, name: &str) -> Result<(), FileSystemError> {
        if name == ROOT_FOLDER {
            return Err(FileSystemError::RootFolder);
        }
        let folder = self
            .folders
            .remove(name)
            .ok_or_else(|| FileSystemError::FolderNotFound(name.to_string()))?;
        debug!(folder = %name, "folder deleted");
        self.deleted_folders.entry(name.to_string()).or_default().push(folder);
        Ok(())
    }

    /// Move a file to its folder's deleted table.
    pub fn delete_file(&mut self, folder: &str, file: &str) -> Result<(), FileSystemError> {
        let target = self
            .folders
            .get_mut(folder)
            .ok_or_else(|| FileSystemError::FolderNotFound(folder.to_string()))?;
        if target.delete_file(file) {
            Ok(())
        } else {
            Err(FileSystemError::FileNotFound {
                folder: folder.to_string(),
                file: file.to_string(),
            })
        }
    }

    /// Restore a folder.
    ///
    /// If no live folder has the name, the most recently deleted one is
    /// brought back first. Either way the folder and its files start
    /// RESTORING.
    pub fn restore_folder(&mut self, name: &str) -> Result<(), FileSystemError> {
        if !self.folders.contains_key(name) {
            let folder = self
                .deleted_folders
                .get_mut(name)
                .and_then(Vec::pop)
                .ok_or_else(|| FileSystemError::FolderNotFound(name.to_string()))?;
            if self.deleted_folders.get(name).is_some_and(Vec::is_empty) {
                self.deleted_folders.remove(name);
            }
            self.folders.insert(name.to_string(), folder);
        }
        match self.folders.get_mut(name) {
            Some(folder) => {
                folder.restore();
                Ok(())
            }
            None => Err(FileSystemError::FolderNotFound(name.to_string())),
        }
    }

    /// Restore a file, bringing it back from the deleted table if needed.
    pub fn restore_file(&mut self, folder: &str, file: &str) -> Result<(), FileSystemError> {
        let target = self
            .folders
            .get_mut(folder)
            .ok_or_else(|| FileSystemError::FolderNotFound(folder.to_string()))?;
        if let Some(live) = target.file_mut(file) {
            live.restore();
            return Ok(());
        }
        if target.undelete_file(file) {
            Ok(())
        } else {
            Err(FileSystemError::FileNotFound {
                folder: folder.to_string(),
                file: file.to_string(),
            })
        }
    }

    /// Reveal the actual health of every live folder and file.
    pub fn reveal_all(&mut self) {
        for folder in self.folders.values_mut() {
            folder.reveal();
        }
    }

    /// Reset per-step counters.
    pub fn pre_timestep(&mut self) {
        for folder in self.folders.values_mut() {
            folder.pre_timestep();
        }
    }

    /// Advance every live folder and file.
    pub fn apply_timestep(&mut self) {
        for folder in self.folders.values_mut() {
            folder.apply_timestep();
        }
    }
}

impl SimComponent for FileSystem {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let folders: Map<String, Value> = self
            .folders
            .iter()
            .map(|(name, folder)| (name.clone(), folder.describe_state()))
            .collect();
        let deleted: Map<String, Value> = self
            .deleted_folders
            .iter()
            .map(|(name, folders)| {
                let states: Vec<Value> = folders.iter().map(Folder::describe_state).collect();
                (name.clone(), Value::Array(states))
            })
            .collect();
        json!({
            "uuid": self.id,
            "folders": folders,
            "deleted_folders": deleted,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        FILE_SYSTEM_REQUESTS
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

fn into_response(result: Result<(), FileSystemError>) -> RequestResponse {
    match result {
        Ok(()) => RequestResponse::success(),
        Err(e) => RequestResponse::failure(e.to_string()),
    }
}

fn fs_file(fs: &mut FileSystem, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    let (folder, file) = (&args[0], &args[1]);
    match fs.file_mut(folder, file) {
        Some(target) => dispatch(FILE_REQUESTS, target, &args[2..], ctx),
        None => RequestResponse::failure(
            FileSystemError::FileNotFound {
                folder: folder.clone(),
                file: file.clone(),
            }
            .to_string(),
        ),
    }
}

fn fs_folder(fs: &mut FileSystem, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    match fs.folder_mut(&args[0]) {
        Some(target) => dispatch(FOLDER_REQUESTS, target, &args[1..], ctx),
        None => RequestResponse::failure(FileSystemError::FolderNotFound(args[0].clone()).to_string()),
    }
}

fn fs_create(fs: &mut FileSystem, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    match (args[0].as_str(), args.len()) {
        ("folder", 2) => into_response(fs.create_folder(ctx, &args[1]).map(|_| ())),
        ("file", 3) | ("file", 4) => {
            let size = if args.len() == 4 {
                match parse_arg::<u64>(args, 3, "size") {
                    Ok(size) => Some(size),
                    Err(reason) => return RequestResponse::failure(reason),
                }
            } else {
                None
            };
            into_response(fs.create_file(ctx, &args[1], &args[2], size).map(|_| ()))
        }
        _ => RequestResponse::unreachable(args),
    }
}

fn fs_delete(fs: &mut FileSystem, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match (args[0].as_str(), args.len()) {
        ("folder", 2) => into_response(fs.delete_folder(&args[1])),
        ("file", 3) => into_response(fs.delete_file(&args[1], &args[2])),
        _ => RequestResponse::unreachable(args),
    }
}

fn fs_restore(fs: &mut FileSystem, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match (args[0].as_str(), args.len()) {
        ("folder", 2) => into_response(fs.restore_folder(&args[1])),
        ("file", 3) => into_response(fs.restore_file(&args[1], &args[2])),
        _ => RequestResponse::unreachable(args),
    }
}

/// Requests accepted by a file system.
pub const FILE_SYSTEM_REQUESTS: &[RequestDef<FileSystem>] = &[
    RequestDef::new("file", "<folder> <file> <file request>", Arity::AtLeast(3), fs_file),
    RequestDef::new("folder", "<folder> <folder request>", Arity::AtLeast(2), fs_folder),
    RequestDef::new("create", "file <folder> <file> [size] | folder <folder>", Arity::Between(2, 4), fs_create),
    RequestDef::new("delete", "file <folder> <file> | folder <folder>", Arity::Between(2, 3), fs_delete),
    RequestDef::new("restore", "file <folder> <file> | folder <folder>", Arity::Between(2, 3), fs_restore),
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileHealth;

    fn path(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn setup() -> (FileSystem, SimContext) {
        let mut ctx = SimContext::new(7);
        let mut fs = FileSystem::new(&mut ctx, FileSystemLimits::default());
        fs.create_file(&mut ctx, "database", "database.db", None).unwrap();
        (fs, ctx)
    }

    #[test]
    fn test_create_file_creates_folder() {
        let (fs, _) = setup();
        assert!(fs.folder(ROOT_FOLDER).is_some());
        assert!(fs.folder("database").is_some());
        assert!(fs.file("database", "database.db").is_some());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let (mut fs, mut ctx) = setup();
        assert_eq!(
            fs.create_folder(&mut ctx, "database").unwrap_err(),
            FileSystemError::FolderExists("database".to_string())
        );
        assert!(fs.create_file(&mut ctx, "database", "database.db", None).is_err());
    }

    #[test]
    fn test_root_cannot_be_deleted() {
        let (mut fs, _) = setup();
        assert_eq!(fs.delete_folder(ROOT_FOLDER), Err(FileSystemError::RootFolder));
    }

    #[test]
    fn test_deleted_folder_is_queryable_not_targetable() {
        let (mut fs, mut ctx) = setup();
        fs.delete_folder("database").unwrap();
        assert!(fs.folder("database").is_none());
        assert!(fs.deleted_folder("database").is_some());

        let resp = fs.apply_request(&path(&["folder", "database", "scan"]), &mut ctx);
        assert!(!resp.is_success());

        let state = fs.describe_state();
        assert_eq!(state["deleted_folders"]["database"].as_array().unwrap().len(), 1);
        assert!(state["folders"]["database"].is_null());
    }

    #[test]
    fn test_restore_deleted_file() {
        let (mut fs, mut ctx) = setup();
        let resp = fs.apply_request(&path(&["delete", "file", "database", "database.db"]), &mut ctx);
        assert!(resp.is_success());
        assert!(fs.deleted_file("database", "database.db").is_some());

        let resp = fs.apply_request(&path(&["restore", "file", "database", "database.db"]), &mut ctx);
        assert!(resp.is_success());
        let file = fs.file("database", "database.db").unwrap();
        assert_eq!(file.health_status(), FileHealth::Restoring);
    }

    #[test]
    fn test_deleted_files_and_folders_keep_history() {
        let (mut fs, mut ctx) = setup();
        fs.create_file(&mut ctx, "docs", "a.txt", Some(1)).unwrap().corrupt();
        fs.delete_file("docs", "a.txt").unwrap();
        fs.create_file(&mut ctx, "docs", "a.txt", Some(2)).unwrap();
        fs.delete_file("docs", "a.txt").unwrap();

        let history = fs.folder("docs").unwrap().deleted_file_history("a.txt");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].size(), 1);
        assert_eq!(history[0].health_status(), FileHealth::Corrupt);
        assert_eq!(fs.deleted_file("docs", "a.txt").unwrap().size(), 2);

        fs.delete_folder("database").unwrap();
        fs.create_folder(&mut ctx, "database").unwrap();
        fs.delete_folder("database").unwrap();
        assert_eq!(fs.deleted_folder_history("database").len(), 2);
        assert!(fs.deleted_folder("database").unwrap().files().is_empty());

        // Restore brings back the newest deletion; the older one stays.
        fs.restore_folder("database").unwrap();
        assert!(fs.folder("database").unwrap().files().is_empty());
        assert!(fs.deleted_folder("database").unwrap().file("database.db").is_some());
        fs.delete_folder("database").unwrap();
        fs.restore_folder("database").unwrap();
        assert!(fs.folder("database").unwrap().files().is_empty());
        assert_eq!(fs.deleted_folder_history("database").len(), 1);
    }

    #[test]
    fn test_file_request_routes_to_file() {
        let (mut fs, mut ctx) = setup();
        let resp = fs.apply_request(&path(&["file", "database", "database.db", "corrupt"]), &mut ctx);
        assert!(resp.is_success());
        assert_eq!(
            fs.file("database", "database.db").unwrap().health_status(),
            FileHealth::Corrupt
        );
        assert_eq!(fs.folder("database").unwrap().health_status(), FileHealth::Corrupt);
    }

    #[test]
    fn test_create_requests() {
        let (mut fs, mut ctx) = setup();
        let resp = fs.apply_request(&path(&["create", "file", "docs", "a.txt", "10"]), &mut ctx);
        assert!(resp.is_success());
        assert_eq!(fs.file("docs", "a.txt").unwrap().size(), 10);

        let resp = fs.apply_request(&path(&["create", "file", "docs", "b.txt", "big"]), &mut ctx);
        assert_eq!(resp.reason(), Some("invalid size: 'big'"));

        let resp = fs.apply_request(&path(&["create", "disk", "x"]), &mut ctx);
        assert!(resp.reason().unwrap().starts_with("unreachable"));
    }

    #[test]
    fn test_reveal_all() {
        let (mut fs, _) = setup();
        fs.file_mut("database", "database.db").unwrap().corrupt();
        fs.reveal_all();
        assert_eq!(
            fs.file("database", "database.db").unwrap().visible_status(),
            FileHealth::Corrupt
        );
        assert_eq!(fs.folder("database").unwrap().visible_status(), FileHealth::Corrupt);
    }
}
