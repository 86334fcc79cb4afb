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

//! Gzip compression of rotated backups.
//!
//! `<name>` is streamed into `<name>.gz`, which gets the source's permission
//! bits (and owner, on unix, best-effort). The source is removed only after
//! the archive has been finished, flushed, synced and closed. On any failure
//! the partial archive is removed and the source is left untouched.

use crate::error::{Result, RotateError};
use crate::naming::COMPRESS_SUFFIX;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of the compressed copy of `path`.
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(COMPRESS_SUFFIX);
    PathBuf::from(name)
}

/// Compress `src` into `dst` with gzip `level`, then remove `src`.
///
/// An existing `dst` is presumed to be left over from an earlier failed
/// attempt and is overwritten.
///
/// # Returns
/// The size of the finished archive in bytes.
pub fn compress_file(src: &Path, dst: &Path, level: u32) -> Result<u64> {
    let wrap = |source: io::Error| RotateError::Compress {
        path: src.to_path_buf(),
        source,
    };

    let input = File::open(src).map_err(wrap)?;
    let meta = input.metadata().map_err(wrap)?;

    let output = create_like(dst, &meta).map_err(wrap)?;

    match write_archive(input, output, meta.permissions(), level) {
        Ok(written) => {
            copy_owner(dst, &meta);
            fs::remove_file(src).map_err(wrap)?;
            debug!("Compressed {:?} -> {:?} ({} bytes -> {} bytes)", src, dst, meta.len(), written);
            Ok(written)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(dst) {
                warn!("Failed to remove partial archive {:?}: {}", dst, rm);
            }
            Err(wrap(e))
        }
    }
}

fn write_archive(input: File, output: File, perms: fs::Permissions, level: u32) -> io::Result<u64> {
    // The mode passed to open is filtered by the umask.
    output.set_permissions(perms)?;
    let mut reader = BufReader::new(input);
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::new(level.clamp(1, 9)));
    io::copy(&mut reader, &mut encoder)?;

    let mut writer = encoder.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    let written = file.metadata()?.len();
    drop(file);
    Ok(written)
}

fn create_like(dst: &Path, meta: &fs::Metadata) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::fs::PermissionsExt;
        opts.mode(meta.permissions().mode());
    }
    opts.open(dst)
}

#[cfg(unix)]
fn copy_owner(dst: &Path, meta: &fs::Metadata) {
    use std::os::unix::fs::MetadataExt;
    if let Err(e) = std::os::unix::fs::chown(dst, Some(meta.uid()), Some(meta.gid())) {
        debug!("Unable to copy owner onto {:?}: {}", dst, e);
    }
}

#[cfg(not(unix))]
fn copy_owner(_dst: &Path, _meta: &fs::Metadata) {}
