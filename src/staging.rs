//! Staging area (file-based data lake).
//!
//! Scraped batches land here as `<root>/<YYYY-MM-DD>/<channel>.json` before
//! the raw loader promotes them into the store. Staged files are write-once:
//! each one is written under a temporary name and renamed into place, and an
//! existing file is never replaced.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use csv::Writer;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{IngestError, Result};
use crate::models::{DetectionRecord, MessageRecord};

const STAGED_EXTENSION: &str = "json";
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Write one channel's batch for `date`, returning the created file.
///
/// If `<channel>.json` already exists for that date the batch goes to
/// `<channel>.<HHMMSS>.json` instead (with a numeric suffix on collision).
pub fn write_staged_file(root: &Path, date: NaiveDate, channel: &str, records: &[MessageRecord]) -> Result<PathBuf> {
    let date_dir = root.join(date.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&date_dir)?;

    let target = next_free_path(&date_dir, channel);
    let temp = date_dir.join(format!(
        ".{}.tmp",
        target.file_name().and_then(|n| n.to_str()).unwrap_or(channel)
    ));

    write_and_rename(&temp, &target, records)?;

    debug!(path = %target.display(), records = records.len(), "Staged batch");
    Ok(target)
}

/// Write `records` to `temp` and move it onto `target`. On any failure the
/// temp file is removed.
fn write_and_rename(temp: &Path, target: &Path, records: &[MessageRecord]) -> Result<()> {
    let written = write_synced(temp, records).and_then(|()| fs::rename(temp, target).map_err(IngestError::from));

    if written.is_err() && temp.is_file() {
        let _ = fs::remove_file(temp);
    }
    written
}

fn write_synced(path: &Path, records: &[MessageRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn next_free_path(date_dir: &Path, channel: &str) -> PathBuf {
    let primary = date_dir.join(format!("{channel}.{STAGED_EXTENSION}"));
    if !primary.exists() {
        return primary;
    }

    let stamp = Utc::now().format("%H%M%S").to_string();
    let mut candidate = date_dir.join(format!("{channel}.{stamp}.{STAGED_EXTENSION}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = date_dir.join(format!("{channel}.{stamp}-{n}.{STAGED_EXTENSION}"));
        n += 1;
    }
    candidate
}

/// Every staged file under `root` in the order the batches were scraped.
///
/// Date directories come in calendar order. Within a date a channel's
/// `<channel>.json` precedes its `<channel>.<HHMMSS>[-n].json` follow-ups,
/// so loading in this order leaves the latest counters in the store.
/// A missing root is empty.
pub fn list_staged_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = list_files(root, &[STAGED_EXTENSION])?;
    files.sort_by_cached_key(|path| staged_order(path));
    Ok(files)
}

/// Every image under `root`, sorted by path. A missing root is empty.
pub fn list_images(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = list_files(root, &IMAGE_EXTENSIONS)?;
    files.sort();
    Ok(files)
}

/// Sort key: (directory, channel, stamp, collision counter). The first file
/// of the day has no stamp and sorts before every stamped one.
fn staged_order(path: &Path) -> (PathBuf, String, Option<(String, u32)>) {
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    if let Some((channel, suffix)) = stem.rsplit_once('.') {
        let (stamp, counter) = suffix.split_once('-').unwrap_or((suffix, "0"));
        let is_stamp = stamp.len() == 6 && stamp.bytes().all(|b| b.is_ascii_digit());
        if let (true, Ok(n)) = (is_stamp, counter.parse::<u32>()) {
            return (dir, channel.to_string(), Some((stamp.to_string(), n)));
        }
    }
    (dir, stem.to_string(), None)
}

fn list_files(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        debug!(root = %root.display(), "Directory does not exist, nothing to list");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| IngestError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)));

        if wanted && !hidden {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

/// Parse a staged file. Any malformed record fails the whole file.
pub fn read_staged_file(path: &Path) -> Result<Vec<MessageRecord>> {
    let file = File::open(path).map_err(|e| IngestError::StagedFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|e| IngestError::StagedFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write a CSV audit copy of a detection run, replacing any previous export
pub fn write_detections_csv(path: &Path, records: &[DetectionRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    if records.is_empty() {
        warn!(path = %path.display(), "Detection export is empty");
    }
    Ok(())
}
