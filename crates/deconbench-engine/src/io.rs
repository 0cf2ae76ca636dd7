//! Port types, artifact values and typed file codecs
//!
//! Every module input and output is tagged with a [`PortType`] that fixes
//! the artifact's file extension and its reader/writer pair. Artifact files
//! are written to a temporary sibling path and renamed into place, so an
//! existing artifact file is always complete.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::table::ParameterTable;

/// The kind of artifact a port consumes or produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// 3-D image stack
    Image,
    /// Small tabular result (e.g. one metric row)
    Stat,
    /// Directory managed by the producing method itself
    Folder,
    /// Bare file managed by the producing method itself
    File,
    /// Bundle of paired source/target stacks for training
    Data,
    /// Trained restoration model
    Model,
}

impl PortType {
    /// Filename suffix appended to the artifact's `outputID`
    pub fn extension(self) -> &'static str {
        match self {
            PortType::Image => ".img",
            PortType::Stat => ".csv",
            PortType::Folder => "",
            PortType::File => "",
            PortType::Data => ".data",
            PortType::Model => ".model",
        }
    }

    /// Ports whose writer is a no-op; the producing method receives an
    /// explicit `fn_output` parameter and manages the path itself.
    pub fn is_pathlike(self) -> bool {
        matches!(self, PortType::Folder | PortType::File)
    }

    pub fn name(self) -> &'static str {
        match self {
            PortType::Image => "image",
            PortType::Stat => "stat",
            PortType::Folder => "folder",
            PortType::File => "file",
            PortType::Data => "data",
            PortType::Model => "model",
        }
    }
}

/// Paired source/target stacks produced by data generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataBundle {
    pub sources: Vec<Array3<f32>>,
    pub targets: Vec<Array3<f32>>,
}

impl DataBundle {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// A value flowing between modules
#[derive(Debug, Clone)]
pub enum ArtifactValue {
    Image(Array3<f32>),
    Table(ParameterTable),
    Scalar(f64),
    Data(DataBundle),
    Model(serde_json::Value),
    Path(PathBuf),
    /// Produced by methods whose output lives at an explicit path
    Unit,
}

impl ArtifactValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactValue::Image(_) => "image",
            ArtifactValue::Table(_) => "table",
            ArtifactValue::Scalar(_) => "scalar",
            ArtifactValue::Data(_) => "data",
            ArtifactValue::Model(_) => "model",
            ArtifactValue::Path(_) => "path",
            ArtifactValue::Unit => "unit",
        }
    }

    pub fn as_image(&self) -> Result<&Array3<f32>> {
        match self {
            ArtifactValue::Image(img) => Ok(img),
            other => Err(EngineError::PortValueMismatch {
                port: "image",
                actual: other.kind(),
            }),
        }
    }

    pub fn as_data(&self) -> Result<&DataBundle> {
        match self {
            ArtifactValue::Data(bundle) => Ok(bundle),
            other => Err(EngineError::PortValueMismatch {
                port: "data",
                actual: other.kind(),
            }),
        }
    }

    pub fn as_model(&self) -> Result<&serde_json::Value> {
        match self {
            ArtifactValue::Model(value) => Ok(value),
            other => Err(EngineError::PortValueMismatch {
                port: "model",
                actual: other.kind(),
            }),
        }
    }

    pub fn as_path(&self) -> Result<&Path> {
        match self {
            ArtifactValue::Path(path) => Ok(path),
            other => Err(EngineError::PortValueMismatch {
                port: "path",
                actual: other.kind(),
            }),
        }
    }

    pub fn as_scalar(&self) -> Result<f64> {
        match self {
            ArtifactValue::Scalar(v) => Ok(*v),
            other => Err(EngineError::PortValueMismatch {
                port: "scalar",
                actual: other.kind(),
            }),
        }
    }
}

/// Read an artifact from disk according to its port type
pub fn read(path: impl AsRef<Path>, port: PortType) -> Result<ArtifactValue> {
    let path = path.as_ref();
    match port {
        PortType::Image => {
            let bytes = fs::read(path)?;
            let image: Array3<f32> = bincode::deserialize(&bytes)?;
            Ok(ArtifactValue::Image(image))
        }
        PortType::Stat => Ok(ArtifactValue::Table(ParameterTable::load(path)?)),
        PortType::Folder | PortType::File => Ok(ArtifactValue::Path(path.to_path_buf())),
        PortType::Data => {
            let bytes = fs::read(path)?;
            let bundle: DataBundle = bincode::deserialize(&bytes)?;
            Ok(ArtifactValue::Data(bundle))
        }
        PortType::Model => {
            let text = fs::read_to_string(path)?;
            Ok(ArtifactValue::Model(serde_json::from_str(&text)?))
        }
    }
}

/// Write an artifact to disk according to its port type
///
/// Pathlike ports are no-ops; their methods write through `fn_output`.
pub fn write(path: impl AsRef<Path>, value: &ArtifactValue, port: PortType) -> Result<()> {
    let path = path.as_ref();
    match port {
        PortType::Image => {
            let image = value.as_image()?;
            atomic_write(path, &bincode::serialize(image)?)
        }
        PortType::Stat => match value {
            ArtifactValue::Table(table) => {
                atomic_write(path, table.to_csv_string().as_bytes())
            }
            other => Err(EngineError::PortValueMismatch {
                port: "stat",
                actual: other.kind(),
            }),
        },
        PortType::Folder | PortType::File => Ok(()),
        PortType::Data => {
            let bundle = value.as_data()?;
            atomic_write(path, &bincode::serialize(bundle)?)
        }
        PortType::Model => {
            let model = value.as_model()?;
            atomic_write(path, serde_json::to_string_pretty(model)?.as_bytes())
        }
    }
}

/// Write bytes to a temporary sibling path and rename into place
///
/// Rename within one directory is atomic on the target platforms, so a
/// reader never observes a partially written artifact.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(EngineError::Malformed {
            what: "artifact path",
            detail: format!("{:?} has no file name", path),
        })?;
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));
    fs::write(&tmp, bytes)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_extensions() {
        assert_eq!(PortType::Image.extension(), ".img");
        assert_eq!(PortType::Stat.extension(), ".csv");
        assert_eq!(PortType::Folder.extension(), "");
        assert_eq!(PortType::Data.extension(), ".data");
    }

    #[test]
    fn test_image_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GT0000.img");
        let image = Array3::<f32>::from_elem((4, 5, 6), 255.0);
        write(&path, &ArtifactValue::Image(image.clone()), PortType::Image).unwrap();
        let back = read(&path, PortType::Image).unwrap();
        assert_eq!(back.as_image().unwrap(), &image);
    }

    #[test]
    fn test_data_bundle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patches.data");
        let bundle = DataBundle {
            sources: vec![Array3::zeros((2, 2, 2))],
            targets: vec![Array3::from_elem((2, 2, 2), 1.0)],
        };
        write(&path, &ArtifactValue::Data(bundle), PortType::Data).unwrap();
        let back = read(&path, PortType::Data).unwrap();
        assert_eq!(back.as_data().unwrap().len(), 1);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        atomic_write(&path, b"a,b\n1,2\n").unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_pathlike_read_returns_path() {
        let value = read("/tmp/some-folder", PortType::Folder).unwrap();
        assert_eq!(value.as_path().unwrap(), Path::new("/tmp/some-folder"));
    }
}
