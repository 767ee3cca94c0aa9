//! Filesystem layout of the GeoLife dataset and user discovery.
//!
//! ```text
//! <root>/labeled_ids.txt
//! <root>/Data/<user>/labels.txt
//! <root>/Data/<user>/Trajectory/<file>.plt
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{IoResultExt, Result};
use crate::User;

const DATA_DIR: &str = "Data";
const LABELED_IDS_FILE: &str = "labeled_ids.txt";
const LABELS_FILE: &str = "labels.txt";
const TRAJECTORY_DIR: &str = "Trajectory";

/// Resolves dataset paths relative to a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn labeled_ids_path(&self) -> PathBuf {
        self.root.join(LABELED_IDS_FILE)
    }

    pub fn labels_path(&self, user_id: &str) -> PathBuf {
        self.data_dir().join(user_id).join(LABELS_FILE)
    }

    pub fn trajectory_dir(&self, user_id: &str) -> PathBuf {
        self.data_dir().join(user_id).join(TRAJECTORY_DIR)
    }

    pub fn trajectory_path(&self, user_id: &str, file_name: &str) -> PathBuf {
        self.trajectory_dir(user_id).join(file_name)
    }

    /// Read the set of user ids listed in `labeled_ids.txt`. Blank lines are ignored.
    pub fn labeled_ids(&self) -> Result<HashSet<String>> {
        let path = self.labeled_ids_path();
        let text = fs::read_to_string(&path).discovery_context(&path)?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// List every user directory under `Data/`, sorted by id.
    ///
    /// A user has labels when its id appears in `labeled_ids.txt`.
    pub fn discover_users(&self) -> Result<Vec<User>> {
        let labeled = self.labeled_ids()?;
        let data_dir = self.data_dir();

        let mut ids = Vec::new();
        for entry in fs::read_dir(&data_dir).discovery_context(&data_dir)? {
            let entry = entry.discovery_context(&data_dir)?;
            let file_type = entry.file_type().discovery_context(&entry.path())?;
            if !file_type.is_dir() {
                continue;
            }
            ids.push(entry.file_name().to_string_lossy().into_owned());
        }
        ids.sort();

        let users: Vec<User> = ids
            .into_iter()
            .map(|id| {
                let has_labels = labeled.contains(&id);
                User::new(id, has_labels)
            })
            .collect();

        debug!(
            "[Dataset] Discovered {} users ({} labeled) under {}",
            users.len(),
            users.iter().filter(|u| u.has_labels).count(),
            data_dir.display()
        );
        Ok(users)
    }

    /// List a user's trajectory file names, sorted.
    pub fn trajectory_files(&self, user_id: &str) -> Result<Vec<String>> {
        let dir = self.trajectory_dir(user_id);
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).discovery_context(&dir)? {
            let entry = entry.discovery_context(&dir)?;
            let file_type = entry.file_type().discovery_context(&entry.path())?;
            if file_type.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
