// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;
use std::path::PathBuf;

pub type Result<T> = core::result::Result<T, RotateError>;

/// Errors produced by the rotating file and its retention engine.
#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    /// A single write is larger than the maximum file size. Nothing was written.
    #[error("write length {len} exceeds maximum file size {max}")]
    WriteTooLarge { len: u64, max: u64 },

    #[error("can't make directories for new logfile {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("can't open logfile {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("error getting log file info {path:?}: {source}")]
    Stat { path: PathBuf, source: io::Error },

    #[error("can't rename log file {from:?} -> {to:?}: {source}")]
    Rename { from: PathBuf, to: PathBuf, source: io::Error },

    #[error("can't read log file directory {path:?}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },

    #[error("failed to remove {path:?}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("failed to compress log file {path:?}: {source}")]
    Compress { path: PathBuf, source: io::Error },

    #[error("no writable log directory found")]
    NoLogDir,

    #[error("invalid size {0:?}: {1}")]
    InvalidSize(String, String),

    #[error("unsupported rotate signal {0:?}")]
    InvalidSignal(String),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RotateError {
    /// The underlying I/O error, if this failure came from the filesystem.
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            RotateError::CreateDir { source, .. }
            | RotateError::Open { source, .. }
            | RotateError::Stat { source, .. }
            | RotateError::Rename { source, .. }
            | RotateError::ReadDir { source, .. }
            | RotateError::Remove { source, .. }
            | RotateError::Compress { source, .. } => Some(source),
            RotateError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RotateError> for io::Error {
    fn from(err: RotateError) -> Self {
        match err {
            RotateError::Io(e) => e,
            RotateError::WriteTooLarge { .. } => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => {
                let kind = other.io_source().map(io::Error::kind).unwrap_or(io::ErrorKind::Other);
                io::Error::new(kind, other)
            }
        }
    }
}
