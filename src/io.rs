// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Flat little-endian `f32` files with JSON sidecars.
//!
//! A data file `foo.bin` carries its shape in `foo.bin.json`. Velocity files
//! are ordered depth fastest, then lateral. Gather files are ordered
//! receiver fastest, then time, then shot.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::SurveyParams;
use crate::error::{FwiError, Result};

/// Shape of a velocity file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelHeader {
    /// Depth cells.
    pub nz: usize,
    /// Lateral cells.
    pub nx: usize,
    /// Depth spacing in metres.
    pub dz: f32,
    /// Lateral spacing in metres.
    pub dx: f32,
}

impl ModelHeader {
    /// Samples in the file.
    pub fn len(&self) -> usize {
        self.nz * self.nx
    }

    /// True for a zero-sized model.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write raw little-endian `f32` samples.
pub fn write_f32_file(path: &Path, data: &[f32]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for v in data {
        out.write_all(&v.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Read raw little-endian `f32` samples.
///
/// # Errors
/// Returns an error if the file size is not a multiple of four bytes.
pub fn read_f32_file(path: &Path) -> Result<Vec<f32>> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(FwiError::Metadata(format!(
            "{}: {} bytes is not a whole number of f32 samples",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// The sidecar of `path`: the same name with `.json` appended.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// Write the JSON sidecar of `path`.
pub fn write_metadata<T: Serialize>(path: &Path, meta: &T) -> Result<()> {
    let mut out = BufWriter::new(File::create(sidecar_path(path))?);
    serde_json::to_writer_pretty(&mut out, meta)?;
    out.flush()?;
    Ok(())
}

/// Read the JSON sidecar of `path`, or `None` if there is none.
pub fn read_metadata<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let meta = sidecar_path(path);
    if !meta.exists() {
        return Ok(None);
    }
    let value = serde_json::from_reader(BufReader::new(File::open(meta)?))?;
    Ok(Some(value))
}

/// Write an interior velocity grid and its sidecar.
///
/// # Errors
/// Returns an error if `velocity` does not match the header.
pub fn write_velocity(path: &Path, velocity: &[f32], header: &ModelHeader) -> Result<()> {
    check_samples(path, velocity.len(), header.len())?;
    write_f32_file(path, velocity)?;
    write_metadata(path, header)
}

/// Read an interior velocity grid.
///
/// The sidecar wins over `fallback`; one of them must exist.
///
/// # Errors
/// Returns an error if neither header is available or the sample count
/// does not match it.
pub fn read_velocity(path: &Path, fallback: Option<ModelHeader>) -> Result<(Vec<f32>, ModelHeader)> {
    let header = match read_metadata::<ModelHeader>(path)? {
        Some(h) => h,
        None => fallback.ok_or_else(|| {
            FwiError::Metadata(format!(
                "{}: no sidecar and no grid size given",
                path.display()
            ))
        })?,
    };
    let data = read_f32_file(path)?;
    check_samples(path, data.len(), header.len())?;
    Ok((data, header))
}

/// Write all shot gathers and the survey sidecar.
pub fn write_gathers(path: &Path, data: &[f32], survey: &SurveyParams) -> Result<()> {
    check_samples(path, data.len(), survey.ns * survey.gather_len())?;
    write_f32_file(path, data)?;
    write_metadata(path, survey)
}

/// Read all shot gathers and the survey they were modeled with.
///
/// # Errors
/// Returns an error if the sidecar is missing or invalid, or the sample
/// count does not match it.
pub fn read_gathers(path: &Path) -> Result<(Vec<f32>, SurveyParams)> {
    let survey: SurveyParams = read_metadata(path)?.ok_or_else(|| {
        FwiError::Metadata(format!("{}: missing survey sidecar", path.display()))
    })?;
    survey.validate()?;
    let data = read_f32_file(path)?;
    check_samples(path, data.len(), survey.ns * survey.gather_len())?;
    Ok((data, survey))
}

fn check_samples(path: &Path, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(FwiError::Metadata(format!(
            "{}: expected {} samples, found {}",
            path.display(),
            expected,
            got
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey() -> SurveyParams {
        SurveyParams {
            nz: 20,
            nx: 20,
            nb: 5,
            dz: 10.0,
            dx: 10.0,
            nt: 10,
            dt: 0.001,
            fm: 20.0,
            amp: 1.0,
            ns: 2,
            szbeg: 1,
            sxbeg: 2,
            jsz: 0,
            jsx: 5,
            ng: 3,
            gzbeg: 1,
            gxbeg: 0,
            jgz: 0,
            jgx: 4,
            vmin: Some(1500.0),
            vmax: Some(2500.0),
        }
    }

    #[test]
    fn raw_samples_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        let data = vec![0.0, -1.5, 3.25e-7, f32::MAX];
        write_f32_file(&path, &data).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
        assert_eq!(read_f32_file(&path).unwrap(), data);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(matches!(read_f32_file(&path), Err(FwiError::Metadata(_))));
    }

    #[test]
    fn sidecar_name() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/vel.bin")),
            PathBuf::from("/tmp/vel.bin.json")
        );
    }

    #[test]
    fn velocity_with_and_without_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vel.bin");
        let header = ModelHeader {
            nz: 3,
            nx: 2,
            dz: 5.0,
            dx: 5.0,
        };
        let v = vec![1500.0, 1600.0, 1700.0, 1500.0, 1600.0, 1700.0];
        write_velocity(&path, &v, &header).unwrap();
        let (back, h) = read_velocity(&path, None).unwrap();
        assert_eq!(back, v);
        assert_eq!(h, header);

        let bare = dir.path().join("bare.bin");
        write_f32_file(&bare, &v).unwrap();
        assert!(read_velocity(&bare, None).is_err());
        let wrong = ModelHeader { nz: 4, ..header };
        assert!(read_velocity(&bare, Some(wrong)).is_err());
        let (back, _) = read_velocity(&bare, Some(header)).unwrap();
        assert_eq!(back, v);

        assert!(write_velocity(&path, &v[..5], &header).is_err());
    }

    #[test]
    fn gathers_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots.bin");
        let s = survey();
        let data: Vec<f32> = (0..s.ns * s.gather_len()).map(|i| i as f32).collect();
        write_gathers(&path, &data, &s).unwrap();
        let (back, meta) = read_gathers(&path).unwrap();
        assert_eq!(back, data);
        assert_eq!(meta, s);

        std::fs::remove_file(sidecar_path(&path)).unwrap();
        assert!(matches!(read_gathers(&path), Err(FwiError::Metadata(_))));
    }
}
