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

//! Backup retention ("mill").
//!
//! One pass of [`Mill::run_once`]:
//! 1. Scan the log directory for backups of the active file.
//! 2. Select backups beyond `max_backups` (a backup and its `.gz` count once).
//! 3. Select backups older than `max_days`, independently of step 2.
//! 4. Queue surviving uncompressed backups for gzip when `compress` is set.
//! 5. Delete, then compress, attempting every item.
//! 6. Evict the oldest backups while active file + backups exceed
//!    `total_size_cap` or free disk space is below `min_disk_free`.
//!
//! Individual failures do not stop the pass; the last one is returned.
//! The active file is never touched.

use crate::clock::Clock;
use crate::compress::{compress_file, compressed_path};
use crate::config::RotateConfig;
use crate::disk::DiskSpace;
use crate::error::{Result, RotateError};
use crate::naming::{BackupPattern, COMPRESS_SUFFIX, to_instant};
use chrono::{Duration, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A rotated-out copy of the active file, as found by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub name: String,
    /// Rotation time decoded from the file name.
    pub timestamp: NaiveDateTime,
    /// Size at scan time.
    pub size: u64,
    pub compressed: bool,
}

impl BackupInfo {
    /// Name shared by a backup and its compressed form.
    fn logical_name(&self) -> &str {
        self.name.strip_suffix(COMPRESS_SUFFIX).unwrap_or(&self.name)
    }
}

/// Retention settings read by a mill pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_backups: usize,
    pub max_days: u32,
    pub total_size_cap: u64,
    pub min_disk_free: u64,
    pub compress: bool,
    pub compress_level: u32,
    /// Backup timestamps are UTC rather than local time.
    pub utc_time: bool,
}

impl RetentionPolicy {
    fn is_noop(&self) -> bool {
        self.max_backups == 0 && self.max_days == 0 && !self.compress && self.total_size_cap == 0 && self.min_disk_free == 0
    }
}

impl From<&RotateConfig> for RetentionPolicy {
    fn from(c: &RotateConfig) -> Self {
        Self {
            max_backups: c.max_backups,
            max_days: c.max_days,
            total_size_cap: c.total_size_cap,
            min_disk_free: c.min_disk_free,
            compress: c.compress,
            compress_level: c.gzip_level(),
            utc_time: c.utc_time,
        }
    }
}

/// Outcome of one mill pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MillReport {
    /// Backups removed by the count or age cap.
    pub removed: usize,
    pub compressed: usize,
    /// Backups removed by the total-size / disk-free pass.
    pub evicted: usize,
    pub freed_bytes: u64,
}

impl MillReport {
    fn is_empty(&self) -> bool {
        *self == MillReport::default()
    }
}

/// What a pass intends to do, before touching the filesystem.
#[derive(Debug, Default)]
pub(crate) struct MillPlan {
    pub(crate) remove: Vec<BackupInfo>,
    pub(crate) compress: Vec<BackupInfo>,
}

/// Retention engine for the backups of one active file.
pub struct Mill {
    active: PathBuf,
    dir: PathBuf,
    pattern: BackupPattern,
    policy: RetentionPolicy,
    clock: Arc<dyn Clock>,
    disk: Arc<dyn DiskSpace>,
    /// Serializes passes; at most one is in flight.
    running: Mutex<()>,
}

impl Mill {
    pub fn new(active: PathBuf, policy: RetentionPolicy, clock: Arc<dyn Clock>, disk: Arc<dyn DiskSpace>) -> Self {
        let dir = match active.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let pattern = BackupPattern::for_path(&active);
        Self {
            active,
            dir,
            pattern,
            policy,
            clock,
            disk,
            running: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Backups of the active file, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| RotateError::ReadDir {
            path: self.dir.clone(),
            source,
        })?;
        let active_name = self.active.file_name();

        let mut backups = Vec::new();
        for entry in read_dir.filter_map(|e| e.ok()) {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            let file_name = entry.file_name();
            if Some(file_name.as_os_str()) == active_name {
                continue;
            }
            let Some(name) = file_name.to_str() else {
                continue;
            };
            // Anything that does not decode was not produced by rotation.
            let Some((timestamp, compressed)) = self.pattern.decode(name) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            backups.push(BackupInfo {
                path: entry.path(),
                name: name.to_string(),
                timestamp,
                size,
                compressed,
            });
        }

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    /// Apply the count cap, the age cap and compression selection to
    /// `backups` (newest first).
    pub(crate) fn plan(&self, backups: Vec<BackupInfo>) -> MillPlan {
        let mut plan = MillPlan::default();
        let mut files = backups;

        if self.policy.max_backups > 0 && self.policy.max_backups < files.len() {
            let mut preserved = HashSet::new();
            let mut remaining = Vec::with_capacity(files.len());
            for f in files {
                preserved.insert(f.logical_name().to_string());
                if preserved.len() > self.policy.max_backups {
                    plan.remove.push(f);
                } else {
                    remaining.push(f);
                }
            }
            files = remaining;
        }

        if self.policy.max_days > 0 {
            let cutoff = self.clock.now() - Duration::hours(24 * i64::from(self.policy.max_days));
            let (expired, remaining): (Vec<_>, Vec<_>) = files
                .into_iter()
                .partition(|f| to_instant(f.timestamp, self.policy.utc_time) < cutoff);
            plan.remove.extend(expired);
            files = remaining;
        }

        if self.policy.compress {
            plan.compress = files.into_iter().filter(|f| !f.compressed).collect();
        }

        plan
    }

    /// Run one full pass. `active_size` reports the active file's current size.
    ///
    /// # Errors
    /// A directory listing failure aborts the pass. Otherwise every item is
    /// attempted and the last failure is returned.
    pub fn run_once(&self, active_size: &dyn Fn() -> u64) -> Result<MillReport> {
        let _running = self.running.lock();
        let mut report = MillReport::default();

        if self.policy.is_noop() {
            return Ok(report);
        }

        let backups = self.list_backups()?;
        let plan = self.plan(backups);
        let mut last_err = None;

        for f in &plan.remove {
            match fs::remove_file(&f.path) {
                Ok(()) => {
                    debug!("Deleted: {:?}", f.path);
                    report.removed += 1;
                    report.freed_bytes += f.size;
                }
                Err(source) => {
                    warn!("Failed to delete {:?}: {}", f.path, source);
                    last_err = Some(RotateError::Remove {
                        path: f.path.clone(),
                        source,
                    });
                }
            }
        }

        for f in &plan.compress {
            match compress_file(&f.path, &compressed_path(&f.path), self.policy.compress_level) {
                Ok(written) => {
                    report.compressed += 1;
                    report.freed_bytes += f.size.saturating_sub(written);
                }
                Err(e) => {
                    warn!("Failed to compress {:?}: {}", f.path, e);
                    last_err = Some(e);
                }
            }
        }

        if let Err(e) = self.enforce_total_size(active_size, &mut report) {
            last_err = Some(e);
        }

        if !report.is_empty() {
            info!(
                "Mill pass on {:?}: removed {}, compressed {}, evicted {}, freed {} bytes ({:.2} MB)",
                self.dir,
                report.removed,
                report.compressed,
                report.evicted,
                report.freed_bytes,
                report.freed_bytes as f64 / 1024.0 / 1024.0
            );
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Delete backups oldest first until the total size is within the cap
    /// and the disk has the required free space, or no backups remain.
    fn enforce_total_size(&self, active_size: &dyn Fn() -> u64, report: &mut MillReport) -> Result<()> {
        let cap = self.policy.total_size_cap;
        let floor = self.policy.min_disk_free;

        let mut free = if floor > 0 { self.free_space() } else { None };
        let below_floor = free.is_some_and(|f| f < floor);
        if cap == 0 && !below_floor {
            return Ok(());
        }

        let backups = self.list_backups()?;
        let mut total = active_size() + backups.iter().map(|f| f.size).sum::<u64>();
        let satisfied = |total: u64, free: Option<u64>| (cap == 0 || total <= cap) && free.is_none_or(|f| f >= floor);

        let mut last_err = None;
        for f in backups.iter().rev() {
            if satisfied(total, free) {
                break;
            }
            match fs::remove_file(&f.path) {
                Ok(()) => {
                    debug!("Evicted {:?} ({} bytes, total now {})", f.path, f.size, total - f.size);
                    total -= f.size;
                    free = free.map(|v| v.saturating_add(f.size));
                    report.evicted += 1;
                    report.freed_bytes += f.size;
                }
                Err(source) => {
                    warn!("Failed to evict {:?}: {}", f.path, source);
                    last_err = Some(RotateError::Remove {
                        path: f.path.clone(),
                        source,
                    });
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Free bytes under the log directory; `None` when the probe fails, which
    /// disables the disk-free check for this pass.
    fn free_space(&self) -> Option<u64> {
        match self.disk.free_bytes(&self.dir) {
            Ok(free) => Some(free),
            Err(e) => {
                warn!("Unable to read free disk space for {:?}: {}", self.dir, e);
                None
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
