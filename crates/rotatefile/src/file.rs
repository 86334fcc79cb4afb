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

use crate::clock::{Clock, SystemClock};
use crate::compress::compressed_path;
use crate::config::RotateConfig;
use crate::disk::{DiskSpace, StatvfsDisk};
use crate::error::{Result, RotateError};
use crate::logdir::{LogLock, resolve_filename};
use crate::mill::{Mill, MillReport, RetentionPolicy};
use crate::naming::{backup_name, wall_clock};
use crate::worker::MillWorker;
use chrono::Duration;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

const MILL_THREAD_NAME: &str = "rotatefile-mill";

/// Time and disk-space sources used by a [`RotateFile`].
#[derive(Clone)]
pub struct Probes {
    pub clock: Arc<dyn Clock>,
    pub disk: Arc<dyn DiskSpace>,
}

impl Default for Probes {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            disk: Arc::new(StatvfsDisk),
        }
    }
}

#[derive(Default)]
struct State {
    /// `Some` while the active file is open.
    file: Option<File>,
    /// Bytes in the active file.
    size: u64,
}

struct Inner {
    filename: PathBuf,
    max_size: u64,
    utc_time: bool,
    print_term: bool,
    clock: Arc<dyn Clock>,
    mill: Mill,
    state: Mutex<State>,
}

/// A log file that rotates itself by size.
///
/// Before a write would push the active file past `max_size` bytes the file
/// is renamed to a timestamped backup and a fresh one is created in its
/// place. After every rotation, and on first open, a background thread
/// applies the retention policy to the backups.
///
/// All methods take `&self`; writes and rotations are serialized by an
/// internal lock, so a `RotateFile` can be shared across threads.
pub struct RotateFile {
    inner: Arc<Inner>,
    worker: Mutex<Option<MillWorker>>,
    lock: Option<LogLock>,
}

impl RotateFile {
    /// Create a rotating file from `config`. Nothing is opened until the
    /// first write or rotation.
    ///
    /// # Errors
    /// Fails when no file name is configured and no writable log directory
    /// can be found.
    pub fn new(config: RotateConfig) -> Result<Self> {
        Self::with_probes(config, Probes::default())
    }

    /// Like [`RotateFile::new`] with injected time and disk-space sources.
    pub fn with_probes(config: RotateConfig, probes: Probes) -> Result<Self> {
        let resolved = resolve_filename(&config)?;
        let mill = Mill::new(
            resolved.path.clone(),
            RetentionPolicy::from(&config),
            probes.clock.clone(),
            probes.disk,
        );
        let inner = Inner {
            filename: resolved.path,
            max_size: config.max_size_bytes(),
            utc_time: config.utc_time,
            print_term: config.print_term,
            clock: probes.clock,
            mill,
            state: Mutex::new(State::default()),
        };
        if let Some(lock) = &resolved.lock {
            debug!("Holding log lock {:?}", lock.path());
        }
        Ok(Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
            lock: resolved.lock,
        })
    }

    /// Path of the active file.
    pub fn current_filename(&self) -> &Path {
        &self.inner.filename
    }

    /// Effective rotation threshold in bytes.
    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    /// Bytes in the active file.
    pub fn size(&self) -> u64 {
        self.inner.state.lock().size
    }

    /// Append `buf` to the active file as a single write, rotating first if
    /// it would not fit.
    ///
    /// # Errors
    /// [`RotateError::WriteTooLarge`] if `buf` is longer than the maximum file
    /// size; nothing is written and no state changes. Otherwise any failure
    /// to open, rotate or write the file.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let len = buf.len() as u64;
        let max = self.inner.max_size;
        if len > max {
            return Err(RotateError::WriteTooLarge { len, max });
        }

        // Nothing is logged while `state` is held: this file may be the
        // sink of the subscriber receiving those events.
        let mut state = self.inner.state.lock();
        let opened = if state.file.is_none() {
            Some(self.inner.open_existing_or_new(&mut state, len)?)
        } else if state.size + len > max {
            Some(self.inner.rotate_locked(&mut state)?)
        } else {
            None
        };

        let result = match state.file.as_mut() {
            Some(file) => file.write_all(buf),
            None => Err(io::Error::other("log file is not open")),
        };
        match &result {
            Ok(()) => state.size += len,
            Err(_) => {
                // A partial write may have landed; resync with the file.
                if let Ok(meta) = fs::metadata(&self.inner.filename) {
                    state.size = meta.len();
                }
            }
        }
        drop(state);

        if let Some(backup) = opened {
            self.after_open(backup);
        }
        result.map_err(RotateError::Io)?;

        if self.inner.print_term {
            let _ = io::stdout().write_all(buf);
        }
        Ok(buf.len())
    }

    /// Rotate now, regardless of size.
    pub fn rotate(&self) -> Result<()> {
        let backup = {
            let mut state = self.inner.state.lock();
            self.inner.rotate_locked(&mut state)?
        };
        self.after_open(backup);
        Ok(())
    }

    /// Release the active file. A later write reopens it.
    pub fn close(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.file.take();
        Ok(())
    }

    /// Commit the active file's contents to disk.
    pub fn sync(&self) -> Result<()> {
        let state = self.inner.state.lock();
        match &state.file {
            Some(file) => file.sync_all().map_err(RotateError::Io),
            None => Ok(()),
        }
    }

    /// Alias of [`RotateFile::sync`]. Unlike `io::Write::flush`, this fsyncs.
    pub fn flush(&self) -> Result<()> {
        self.sync()
    }

    /// Run one retention pass on the calling thread. Passes never overlap
    /// with the background worker's.
    pub fn mill_now(&self) -> Result<MillReport> {
        self.inner.run_mill()
    }

    fn after_open(&self, backup: Option<PathBuf>) {
        if let Some(backup) = backup {
            info!("Rotated {:?} -> {:?}", self.inner.filename, backup);
        }
        self.notify_mill();
    }

    /// Queue a retention pass, starting the worker on first use.
    fn notify_mill(&self) {
        let queued = {
            let mut worker = self.worker.lock();
            if worker.is_none() {
                let inner = self.inner.clone();
                match MillWorker::spawn(MILL_THREAD_NAME, move || inner.run_mill_logged()) {
                    Ok(w) => *worker = Some(w),
                    Err(e) => {
                        drop(worker);
                        error!("Failed to start mill worker: {}", e);
                        return;
                    }
                }
            }
            worker.as_ref().is_some_and(MillWorker::notify)
        };
        if !queued {
            debug!("Mill pass already pending for {:?}", self.inner.filename);
        }
    }
}

impl Inner {
    /// Open the active file for the first time. Returns the backup path when
    /// the existing file had to be rotated out.
    fn open_existing_or_new(&self, state: &mut State, write_len: u64) -> Result<Option<PathBuf>> {
        let meta = match fs::metadata(&self.filename) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return self.open_new(state),
            Err(source) => {
                return Err(RotateError::Stat {
                    path: self.filename.clone(),
                    source,
                });
            }
        };

        if meta.len() + write_len >= self.max_size {
            return self.rotate_locked(state);
        }

        match OpenOptions::new().append(true).open(&self.filename) {
            Ok(file) => {
                state.file = Some(file);
                state.size = meta.len();
                Ok(None)
            }
            // Unreadable leftovers are rotated out of the way.
            Err(_) => self.open_new(state),
        }
    }

    fn rotate_locked(&self, state: &mut State) -> Result<Option<PathBuf>> {
        state.file.take();
        self.open_new(state)
    }

    /// Move the current file (if any) aside as a backup and create an empty
    /// one with the same permissions and owner.
    fn open_new(&self, state: &mut State) -> Result<Option<PathBuf>> {
        if let Some(dir) = self.filename.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_log_dir(dir)?;
        }

        let previous = fs::metadata(&self.filename).ok();
        let mut backup = None;
        if previous.is_some() {
            let to = self.next_backup_name();
            fs::rename(&self.filename, &to).map_err(|source| RotateError::Rename {
                from: self.filename.clone(),
                to: to.clone(),
                source,
            })?;
            backup = Some(to);
        }

        let file = create_truncated(&self.filename, previous.as_ref()).map_err(|source| RotateError::Open {
            path: self.filename.clone(),
            source,
        })?;
        if let Some(meta) = &previous {
            copy_owner(&self.filename, meta);
        }

        state.file = Some(file);
        state.size = 0;
        Ok(backup)
    }

    /// Backup path for a rotation now. A stamp already taken by a plain or
    /// compressed backup is moved forward one millisecond at a time, since
    /// the rename would replace it.
    fn next_backup_name(&self) -> PathBuf {
        let mut ts = wall_clock(self.clock.now(), self.utc_time);
        loop {
            let candidate = backup_name(&self.filename, ts);
            if !candidate.exists() && !compressed_path(&candidate).exists() {
                return candidate;
            }
            ts += Duration::milliseconds(1);
        }
    }

    fn run_mill(&self) -> Result<MillReport> {
        self.mill.run_once(&|| self.state.lock().size)
    }

    fn run_mill_logged(&self) {
        if let Err(e) = self.run_mill() {
            error!("Mill pass for {:?} failed: {}", self.filename, e);
        }
    }
}

fn create_log_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir).map_err(|source| RotateError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Best-effort on permissions: called with the state lock held, so
/// failures are not logged.
fn create_truncated(path: &Path, previous: Option<&fs::Metadata>) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        opts.mode(previous.map(|m| m.permissions().mode()).unwrap_or(0o600));
    }
    let file = opts.open(path)?;
    if let Some(meta) = previous {
        let _ = file.set_permissions(meta.permissions());
    }
    Ok(file)
}

#[cfg(unix)]
fn copy_owner(path: &Path, meta: &fs::Metadata) {
    use std::os::unix::fs::MetadataExt;
    let _ = std::os::unix::fs::chown(path, Some(meta.uid()), Some(meta.gid()));
}

#[cfg(not(unix))]
fn copy_owner(_path: &Path, _meta: &fs::Metadata) {}

/// Each `write` goes straight to the file, so `flush` has nothing to do.
/// It does not fsync; call [`RotateFile::sync`] for that.
impl Write for RotateFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotateFile::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Same as the owned impl: `flush` does not fsync.
impl Write for &RotateFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotateFile::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for RotateFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotateFile")
            .field("filename", &self.inner.filename)
            .field("max_size", &self.inner.max_size)
            .field("locked", &self.lock.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mill::tests::FakeDisk;
    use crate::naming::BackupPattern;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn config(path: &Path, max_size: u64) -> RotateConfig {
        RotateConfig {
            filename: Some(path.to_path_buf()),
            max_size,
            max_days: 0,
            max_backups: 0,
            total_size_cap: 0,
            min_disk_free: 0,
            compress: false,
            utc_time: true,
            print_term: false,
            ..Default::default()
        }
    }

    fn probes() -> (Arc<ManualClock>, Probes) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let probes = Probes {
            clock: clock.clone(),
            disk: Arc::new(FakeDisk::new(u64::MAX)),
        };
        (clock, probes)
    }

    fn backups(path: &Path) -> Vec<PathBuf> {
        let pattern = BackupPattern::for_path(path);
        let mut found: Vec<PathBuf> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| pattern.decode(&p.file_name().unwrap().to_string_lossy()).is_some())
            .collect();
        found.sort();
        found
    }

    #[test]
    fn test_rotates_at_boundary() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 100), probes).unwrap();

        assert_eq!(file.write(&[b'a'; 60]).unwrap(), 60);
        assert_eq!(fs::metadata(&path).unwrap().len(), 60);
        assert!(backups(&path).is_empty());

        assert_eq!(file.write(&[b'b'; 60]).unwrap(), 60);
        let found = backups(&path);
        assert_eq!(found.len(), 1);
        assert_eq!(fs::read(&found[0]).unwrap(), vec![b'a'; 60]);
        assert_eq!(fs::read(&path).unwrap(), vec![b'b'; 60]);
        assert_eq!(file.size(), 60);
    }

    #[test]
    fn test_write_filling_exactly_does_not_rotate() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 100), probes).unwrap();

        file.write(&[b'a'; 40]).unwrap();
        file.write(&[b'a'; 60]).unwrap();
        assert_eq!(file.size(), 100);
        assert!(backups(&path).is_empty());
    }

    #[test]
    fn test_oversized_write_is_rejected_without_side_effects() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 10), probes).unwrap();

        file.write(b"12345").unwrap();
        let err = file.write(&[b'x'; 11]).unwrap_err();
        assert!(matches!(err, RotateError::WriteTooLarge { len: 11, max: 10 }));
        assert_eq!(file.size(), 5);
        assert_eq!(fs::read(&path).unwrap(), b"12345");
        assert!(backups(&path).is_empty());

        let io_err = Write::write(&mut &file, &[b'x'; 11]).unwrap_err();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_appends_to_existing_file_that_fits() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        fs::write(&path, b"old-").unwrap();
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 100), probes).unwrap();

        file.write(b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"old-new");
        assert_eq!(file.size(), 7);
        assert!(backups(&path).is_empty());
    }

    #[test]
    fn test_existing_file_that_would_fill_is_rotated_on_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        fs::write(&path, [b'o'; 90]).unwrap();
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 100), probes).unwrap();

        file.write(&[b'n'; 10]).unwrap();
        let found = backups(&path);
        assert_eq!(found.len(), 1);
        assert_eq!(fs::read(&found[0]).unwrap(), vec![b'o'; 90]);
        assert_eq!(fs::read(&path).unwrap(), vec![b'n'; 10]);
    }

    #[test]
    fn test_forced_rotation_names_backup_from_clock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 1000), probes).unwrap();

        file.write(b"first").unwrap();
        clock.advance(Duration::milliseconds(1234));
        file.rotate().unwrap();

        assert_eq!(file.size(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        let backup = tmp.path().join("app.20240601T120001.234.log");
        assert_eq!(fs::read(backup).unwrap(), b"first");

        file.write(b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_rotate_without_existing_file_creates_it() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("dir").join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 1000), probes).unwrap();

        file.rotate().unwrap();
        assert!(path.exists());
        assert!(backups(&path).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_rotation_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 1000), probes).unwrap();

        file.rotate().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn test_close_then_write_reopens() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 1000), probes).unwrap();

        file.write(b"a").unwrap();
        file.sync().unwrap();
        file.close().unwrap();
        file.close().unwrap();
        file.sync().unwrap();
        file.write(b"b").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"ab");
        assert_eq!(file.size(), 2);
    }

    #[test]
    fn test_zero_max_size_means_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 0), probes).unwrap();
        assert_eq!(file.max_size(), crate::config::DEFAULT_MAX_SIZE);
        file.write(&[0u8; 4096]).unwrap();
        assert!(backups(&path).is_empty());
    }

    #[test]
    fn test_size_tracks_file_length() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 50), probes).unwrap();

        for len in [7usize, 13, 29, 1, 50, 3, 49, 20] {
            clock.advance(Duration::milliseconds(10));
            file.write(&vec![b'z'; len]).unwrap();
            assert_eq!(file.size(), fs::metadata(&path).unwrap().len());
            assert!(file.size() <= 50);
        }
    }

    #[test]
    fn test_rotations_within_one_millisecond_keep_every_byte() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 10), probes).unwrap();

        for i in 0..200u8 {
            file.write(&[i; 10]).unwrap();
        }

        let found = backups(&path);
        assert_eq!(found.len(), 199);
        let total: u64 = found
            .iter()
            .chain(std::iter::once(&path))
            .map(|p| fs::metadata(p).unwrap().len())
            .sum();
        assert_eq!(total, 2000);
        assert_eq!(fs::read(&found[0]).unwrap(), vec![0u8; 10]);
        assert_eq!(fs::read(&path).unwrap(), vec![199u8; 10]);
    }

    #[test]
    fn test_backup_name_skips_compressed_backup_with_same_stamp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let taken = tmp.path().join("app.20240601T120000.000.log.gz");
        fs::write(&taken, b"archived").unwrap();
        let file = RotateFile::with_probes(config(&path, 1000), probes).unwrap();

        file.write(b"first").unwrap();
        file.rotate().unwrap();

        assert_eq!(fs::read(&taken).unwrap(), b"archived");
        let backup = tmp.path().join("app.20240601T120000.001.log");
        assert_eq!(fs::read(backup).unwrap(), b"first");
    }

    #[test]
    fn test_io_write_flush_leaves_state_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let (_clock, probes) = probes();
        let file = RotateFile::with_probes(config(&path, 100), probes).unwrap();

        let mut sink = &file;
        sink.write_all(b"line\n").unwrap();
        Write::flush(&mut sink).unwrap();
        assert_eq!(file.size(), 5);
        assert_eq!(fs::read(&path).unwrap(), b"line\n");
        assert!(backups(&path).is_empty());

        file.flush().unwrap();
        assert_eq!(file.size(), 5);
    }
}
