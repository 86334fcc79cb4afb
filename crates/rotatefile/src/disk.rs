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

use std::path::Path;

/// Reports free space on the filesystem holding a directory.
pub trait DiskSpace: Send + Sync {
    /// Bytes available to unprivileged users under `path`.
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64>;
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

/// [`DiskSpace`] backed by `statvfs(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsDisk;

impl DiskSpace for StatvfsDisk {
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64> {
        get_usage(path).map(|u| u.free)
    }
}

/// Returns total, free and used bytes of the filesystem holding `p`.
#[cfg(unix)]
pub fn get_usage(p: impl AsRef<Path>) -> std::io::Result<DiskUsage> {
    use std::io::Error;

    let path_display = p.as_ref().display();
    let stat = rustix::fs::statvfs(p.as_ref())?;

    // f_blocks is in units of f_frsize; fall back to f_bsize on filesystems
    // that leave f_frsize at 0.
    let bsize = if stat.f_frsize > 0 { stat.f_frsize } else { stat.f_bsize };

    let bfree = stat.f_bfree;
    let bavail = stat.f_bavail;
    let blocks = stat.f_blocks;

    let reserved = bfree.checked_sub(bavail).ok_or_else(|| {
        Error::other(format!(
            "detected f_bavail space ({bavail}) > f_bfree space ({bfree}), fs corruption at ({path_display}). please run 'fsck'"
        ))
    })?;

    let total = blocks.checked_sub(reserved).map(|b| b * bsize).ok_or_else(|| {
        Error::other(format!(
            "detected reserved space ({reserved}) > blocks space ({blocks}), fs corruption at ({path_display}). please run 'fsck'"
        ))
    })?;

    let free = bavail * bsize;
    let used = total.checked_sub(free).ok_or_else(|| {
        Error::other(format!(
            "detected free space ({free}) > total drive space ({total}), fs corruption at ({path_display}). please run 'fsck'"
        ))
    })?;

    Ok(DiskUsage { total, free, used })
}

#[cfg(not(unix))]
pub fn get_usage(_p: impl AsRef<Path>) -> std::io::Result<DiskUsage> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "disk usage is only available on unix",
    ))
}
