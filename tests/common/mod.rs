//! Synthetic GeoLife dataset trees for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

pub const PLT_HEADER: &str = "Geolife trajectory\nWGS 84\nAltitude is in Feet\nReserved 3\n0,2,255,My Track,0,0,2,8421376\n0\n";

pub const LABELS_HEADER: &str = "Start Time\tEnd Time\tTransportation Mode\n";

/// One trajectory row at `2008-10-23 <time>`.
pub fn plt_row(time: &str) -> String {
    format!("39.984702,116.318417,0,492,39744.1201851852,2008-10-23,{}\n", time)
}

/// A trajectory file with one row per time.
pub fn plt(times: &[&str]) -> String {
    let mut text = PLT_HEADER.to_string();
    for time in times {
        text.push_str(&plt_row(time));
    }
    text
}

/// A trajectory file with `rows` rows one second apart, starting at 00:00:00.
pub fn plt_with_rows(rows: usize) -> String {
    let mut text = PLT_HEADER.to_string();
    for i in 0..rows {
        let time = format!("{:02}:{:02}:{:02}", i / 3600, (i / 60) % 60, i % 60);
        text.push_str(&plt_row(&time));
    }
    text
}

/// Builds a dataset root inside a temporary directory.
pub struct DatasetBuilder {
    dir: TempDir,
    labeled: Vec<String>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        fs::create_dir_all(dir.path().join("Data")).expect("failed to create Data dir");
        Self {
            dir,
            labeled: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Add a user directory with an empty `Trajectory` folder.
    pub fn user(mut self, id: &str, labels: Option<&str>) -> Self {
        let user_dir = self.dir.path().join("Data").join(id);
        fs::create_dir_all(user_dir.join("Trajectory")).expect("failed to create user dir");
        if let Some(labels) = labels {
            fs::write(user_dir.join("labels.txt"), format!("{}{}", LABELS_HEADER, labels))
                .expect("failed to write labels");
            self.labeled.push(id.to_string());
        }
        self
    }

    pub fn trajectory(self, user_id: &str, name: &str, contents: &str) -> Self {
        let path = self
            .dir
            .path()
            .join("Data")
            .join(user_id)
            .join("Trajectory")
            .join(name);
        fs::write(path, contents).expect("failed to write trajectory");
        self
    }

    /// Write `labeled_ids.txt` and hand back the finished tree.
    pub fn build(self) -> TempDir {
        fs::write(
            self.dir.path().join("labeled_ids.txt"),
            self.labeled.join("\n"),
        )
        .expect("failed to write labeled_ids.txt");
        self.dir
    }
}
