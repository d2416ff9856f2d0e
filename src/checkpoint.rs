// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{FwiError, Result};
use crate::io::{read_f32_file, write_f32_file};

/// Which buffer of a wavefield pair a checkpoint holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// The earlier time level.
    Previous,
    /// The later time level.
    Current,
}

impl BufferRole {
    /// Short name used in file names and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferRole::Previous => "prev",
            BufferRole::Current => "curr",
        }
    }
}

/// Storage for wavefield snapshots keyed by time step and role.
pub trait CheckpointStore {
    /// Store a snapshot, replacing any previous one under the same key.
    fn save(&mut self, step: usize, role: BufferRole, data: &[f32]) -> Result<()>;

    /// Load a snapshot.
    ///
    /// # Errors
    /// Returns [`FwiError::CheckpointMissing`] if nothing was saved.
    fn load(&self, step: usize, role: BufferRole) -> Result<Vec<f32>>;

    /// Load a snapshot and check its length.
    fn load_exact(&self, step: usize, role: BufferRole, len: usize) -> Result<Vec<f32>> {
        let data = self.load(step, role)?;
        if data.len() != len {
            return Err(FwiError::CheckpointSize {
                step,
                expected: len,
                got: data.len(),
            });
        }
        Ok(data)
    }
}

/// Snapshots kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: HashMap<(usize, BufferRole), Vec<f32>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl CheckpointStore for MemoryStore {
    fn save(&mut self, step: usize, role: BufferRole, data: &[f32]) -> Result<()> {
        self.snapshots.insert((step, role), data.to_vec());
        Ok(())
    }

    fn load(&self, step: usize, role: BufferRole) -> Result<Vec<f32>> {
        self.snapshots
            .get(&(step, role))
            .cloned()
            .ok_or(FwiError::CheckpointMissing {
                step,
                role: role.as_str(),
            })
    }
}

/// Snapshots written as raw little-endian `f32` files in a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Use `dir` for snapshot files, creating it if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(DiskStore { dir })
    }

    /// Deterministic file name of a snapshot.
    pub fn path_for(&self, step: usize, role: BufferRole) -> PathBuf {
        self.dir
            .join(format!("check_time_{}_{}.bin", step, role.as_str()))
    }
}

impl CheckpointStore for DiskStore {
    fn save(&mut self, step: usize, role: BufferRole, data: &[f32]) -> Result<()> {
        write_f32_file(&self.path_for(step, role), data)
    }

    fn load(&self, step: usize, role: BufferRole) -> Result<Vec<f32>> {
        let path = self.path_for(step, role);
        if !path.exists() {
            return Err(FwiError::CheckpointMissing {
                step,
                role: role.as_str(),
            });
        }
        read_f32_file(&path)
    }
}
