//! Labware definitions and their persistence.
//!
//! A [`LabwareRecord`] is a named container (plate, tip rack, trough) with the
//! position of each well relative to the container origin and a calibration offset
//! applied on top. Records are kept in a [`LabwareStore`]; [`JsonLabwareStore`]
//! stores one pretty-printed JSON file per record:
//!
//! ```text
//! labware/
//! ├── 96-flat.json
//! └── tiprack-200ul.json
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RobotError, RobotResult};
use crate::pose_tree::Point;

/// A named labware definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabwareRecord {
    /// Unique name, also the storage key
    pub name: String,
    /// Well positions relative to the container origin
    #[serde(default)]
    pub wells: BTreeMap<String, Point>,
    /// Calibration offset added to every well
    #[serde(default)]
    pub offset: Point,
}

impl LabwareRecord {
    /// Record with no wells and zero offset.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wells: BTreeMap::new(),
            offset: Point::ORIGIN,
        }
    }

    /// Add a well.
    pub fn with_well(mut self, well: impl Into<String>, position: Point) -> Self {
        self.wells.insert(well.into(), position);
        self
    }

    /// Calibrated position of a well, relative to the container's frame.
    pub fn well(&self, well: &str) -> Option<Point> {
        self.wells.get(well).map(|position| *position + self.offset)
    }

    /// Shift the calibration offset by `delta`.
    pub fn shift(&mut self, delta: Point) {
        self.offset = self.offset + delta;
    }
}

/// Persistent labware storage.
pub trait LabwareStore {
    /// Load a record by name. Unknown names are a precondition error.
    fn load(&self, name: &str) -> RobotResult<LabwareRecord>;

    /// Create or overwrite a record.
    fn save(&mut self, record: &LabwareRecord) -> RobotResult<()>;
}

/// One JSON file per record in a directory.
#[derive(Debug, Clone)]
pub struct JsonLabwareStore {
    dir: PathBuf,
}

impl JsonLabwareStore {
    /// Store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of all stored records, sorted.
    pub fn names(&self) -> RobotResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_for(&self, name: &str) -> RobotResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(RobotError::precondition(format!(
                "invalid labware name {:?}",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl LabwareStore for JsonLabwareStore {
    fn load(&self, name: &str) -> RobotResult<LabwareRecord> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(RobotError::precondition(format!(
                "unknown labware {:?}",
                name
            )));
        }
        let record: LabwareRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
        debug!(name, path = %path.display(), "Labware loaded");
        Ok(record)
    }

    fn save(&mut self, record: &LabwareRecord) -> RobotResult<()> {
        let path = self.path_for(&record.name)?;
        fs::create_dir_all(&self.dir)?;

        // Write-then-rename so a crash never leaves a half-written record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        fs::rename(&tmp, &path)?;

        info!(name = %record.name, path = %path.display(), "Labware saved");
        Ok(())
    }
}
