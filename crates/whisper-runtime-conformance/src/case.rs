use log::warn;
use prost::Message;
use std::fs;
use std::path::{Path, PathBuf};
use whisper_runtime::NumericTensor;
use whisper_runtime::graph::ONNXDecodingError;
use whisper_runtime::onnx::TensorProto;

#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("No model.onnx in {0}")]
    MissingModel(PathBuf),
    #[error("No test_data_set_* directories in {0}")]
    NoDataSets(PathBuf),
    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode {path}")]
    Protobuf {
        path: PathBuf,
        #[source]
        source: prost::DecodeError,
    },
    #[error("Unsupported tensor in {path}")]
    Tensor {
        path: PathBuf,
        #[source]
        source: ONNXDecodingError,
    },
}

fn read(path: &Path) -> Result<Vec<u8>, CaseError> {
    fs::read(path).map_err(|source| CaseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// One set of inputs and reference outputs. Names may be empty, in which case the tensor binds
/// to the graph input or output at the same position.
#[derive(Debug, Clone)]
pub struct TestDataSet {
    pub inputs: Vec<(String, NumericTensor)>,
    pub outputs: Vec<(String, NumericTensor)>,
}

/// `prefix_<n>.pb` files of a directory, ordered by `n`.
fn numbered_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, CaseError> {
    let entries = fs::read_dir(dir).map_err(|source| CaseError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| CaseError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let index = file_name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".pb"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(index) = index {
            files.push((index, path));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn load_tensor(path: &Path) -> Result<(String, NumericTensor), CaseError> {
    let bytes = read(path)?;
    let proto = TensorProto::decode(bytes.as_slice()).map_err(|source| CaseError::Protobuf {
        path: path.to_path_buf(),
        source,
    })?;
    let tensor = NumericTensor::try_from(&proto).map_err(|source| CaseError::Tensor {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((proto.name, tensor))
}

impl TestDataSet {
    pub fn from_directory(dir: &Path) -> Result<Self, CaseError> {
        let inputs = numbered_files(dir, "input_")?
            .iter()
            .map(|p| load_tensor(p))
            .collect::<Result<_, _>>()?;
        let outputs = numbered_files(dir, "output_")?
            .iter()
            .map(|p| load_tensor(p))
            .collect::<Result<_, _>>()?;
        Ok(Self { inputs, outputs })
    }
}

/// An ONNX backend-test case directory: `model.onnx` plus one or more `test_data_set_*`.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub model_path: PathBuf,
    pub data_sets: Vec<TestDataSet>,
}

impl TestCase {
    pub fn from_directory(dir: &Path) -> Result<Self, CaseError> {
        let model_path = dir.join("model.onnx");
        if !model_path.is_file() {
            return Err(CaseError::MissingModel(dir.to_path_buf()));
        }
        let mut set_dirs = Vec::new();
        let entries = fs::read_dir(dir).map_err(|source| CaseError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_data_set = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("test_data_set_"));
            if path.is_dir() && is_data_set {
                set_dirs.push(path);
            }
        }
        set_dirs.sort();
        if set_dirs.is_empty() {
            return Err(CaseError::NoDataSets(dir.to_path_buf()));
        }

        let mut data_sets = Vec::with_capacity(set_dirs.len());
        for set_dir in &set_dirs {
            let data_set = TestDataSet::from_directory(set_dir)?;
            if data_set.outputs.is_empty() {
                warn!("{} has no reference outputs", set_dir.display());
            }
            data_sets.push(data_set);
        }

        Ok(Self {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            model_path,
            data_sets,
        })
    }

    pub fn model_bytes(&self) -> Result<Vec<u8>, CaseError> {
        read(&self.model_path)
    }
}
