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

//! Backup file naming.
//!
//! A backup of `/var/log/app/server.log` rotated at 18:30:00.000 on
//! 2016-11-04 is named `/var/log/app/server.20161104T183000.000.log`, and
//! `server.20161104T183000.000.log.gz` once compressed. The timestamp carries
//! no zone; whether it is local time or UTC is a configuration bit.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};

/// `YYYYMMDDThhmmss.mmm`
pub const BACKUP_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";
pub const COMPRESS_SUFFIX: &str = ".gz";

const TIMESTAMP_LEN: usize = "20060102T150405.000".len();

/// Split a file name at its last dot: `"server.log"` -> `("server", ".log")`.
/// A name without a dot has an empty extension.
pub fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(BACKUP_TIME_FORMAT).to_string()
}

/// Backup path for `path` stamped with `ts`, in the same directory.
pub fn backup_name(path: &Path, ts: NaiveDateTime) -> PathBuf {
    let filename = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let (stem, ext) = split_ext(&filename);
    let backup = format!("{stem}.{}{ext}", format_timestamp(ts));
    match path.parent() {
        Some(dir) => dir.join(backup),
        None => PathBuf::from(backup),
    }
}

/// Wall-clock reading of `now` in the zone used for backup names.
pub fn wall_clock(now: DateTime<Utc>, utc: bool) -> NaiveDateTime {
    if utc { now.naive_utc() } else { now.with_timezone(&Local).naive_local() }
}

/// Inverse of [`wall_clock`]. Local times that fall into a DST gap are read as UTC.
pub fn to_instant(ts: NaiveDateTime, utc: bool) -> DateTime<Utc> {
    if utc {
        return ts.and_utc();
    }
    Local
        .from_local_datetime(&ts)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| ts.and_utc())
}

/// Extract the timestamp from `name` if and only if it is exactly
/// `prefix + <timestamp> + ext`.
pub fn parse_timestamp(name: &str, prefix: &str, ext: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_suffix(ext)?.strip_prefix(prefix)?;
    if rest.len() != TIMESTAMP_LEN {
        return None;
    }
    let ts = NaiveDateTime::parse_from_str(rest, BACKUP_TIME_FORMAT).ok()?;
    // Reject anything the formatter would not have produced.
    (format_timestamp(ts) == rest).then_some(ts)
}

/// Recognizes the backups that belong to one active file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPattern {
    prefix: String,
    ext: String,
}

impl BackupPattern {
    pub fn for_path(path: &Path) -> Self {
        let filename = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let (stem, ext) = split_ext(&filename);
        Self {
            prefix: format!("{stem}."),
            ext: ext.to_string(),
        }
    }

    /// Decode a directory entry name. Returns the timestamp and whether the
    /// backup is compressed, or `None` if the name is not one of our backups.
    pub fn decode(&self, name: &str) -> Option<(NaiveDateTime, bool)> {
        if let Some(ts) = parse_timestamp(name, &self.prefix, &self.ext) {
            return Some((ts, false));
        }
        let gz_ext = format!("{}{COMPRESS_SUFFIX}", self.ext);
        parse_timestamp(name, &self.prefix, &gz_ext).map(|ts| (ts, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 11, 4)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn test_backup_name_inserts_timestamp_before_ext() {
        let name = backup_name(Path::new("/var/log/foo/server.log"), ts(18, 30, 0, 0));
        assert_eq!(name, PathBuf::from("/var/log/foo/server.20161104T183000.000.log"));

        let name = backup_name(Path::new("/var/log/foo/server"), ts(18, 30, 0, 7));
        assert_eq!(name, PathBuf::from("/var/log/foo/server.20161104T183000.007"));

        let name = backup_name(Path::new("app.tar.log"), ts(1, 2, 3, 456));
        assert_eq!(name, PathBuf::from("app.tar.20161104T010203.456.log"));
    }

    #[test]
    fn test_decode_round_trip() {
        let base = Path::new("/logs/server.log");
        let pattern = BackupPattern::for_path(base);
        for stamp in [ts(0, 0, 0, 0), ts(23, 59, 59, 999), ts(12, 1, 2, 30)] {
            let backup = backup_name(base, stamp);
            let name = backup.file_name().unwrap().to_str().unwrap();
            assert_eq!(pattern.decode(name), Some((stamp, false)));
            assert_eq!(pattern.decode(&format!("{name}{COMPRESS_SUFFIX}")), Some((stamp, true)));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_names() {
        let pattern = BackupPattern::for_path(Path::new("/logs/server.log"));
        for name in [
            "server.log",
            "server.20161104T183000.000.txt",
            "other.20161104T183000.000.log",
            "server.20161104T183000.log",
            "server.20161104T183000.0000.log",
            "server.20161304T183000.000.log",
            "server.2016-11-04T18:30:00.log",
            "server.20161104T183000.000.log.bz2",
            "server.+2016104T183000.000.log",
            "xserver.20161104T183000.000.log",
        ] {
            assert_eq!(pattern.decode(name), None, "{name} must not decode");
        }
    }

    #[test]
    fn test_wall_clock_round_trip() {
        let now = Utc::now();
        for utc in [true, false] {
            let wall = wall_clock(now, utc);
            assert_eq!(to_instant(wall, utc), now);
        }
    }

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext("server.log"), ("server", ".log"));
        assert_eq!(split_ext("server"), ("server", ""));
        assert_eq!(split_ext("a.b.c"), ("a.b", ".c"));
    }
}
