//! Append-only history file shared by every run on the host

use crate::history::error::{HistoryError, Result};
use crate::history::record::{TransactionRecord, FIELD_DELIMITER};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Durable ledger of transaction records, one line per record.
///
/// Appends are all-or-nothing per record; whole batches are not locked
/// against overlapping runs.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    chunk_size: usize,
}

impl HistoryStore {
    /// Store backed by `path`. The file is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: READ_CHUNK,
        }
    }

    /// Store backed by a file that must already exist, e.g. a history file
    /// handed over for rollback.
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(HistoryError::SourceNotFound { path });
        }
        Ok(Self::open(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that records can be appended, creating the file if needed.
    pub fn ensure_writable(&self) -> Result<()> {
        self.open_for_append().map(|_| ())
    }

    /// Append one record and flush it to disk before returning.
    pub fn append(&self, record: &TransactionRecord) -> Result<()> {
        let mut file = self.open_for_append()?;

        let mut line = String::new();
        if ends_mid_line(&mut file).map_err(|e| HistoryError::io(&self.path, e))? {
            warn!(
                "{} ends with an incomplete line, terminating it before appending",
                self.path.display()
            );
            line.push('\n');
        }
        line.push_str(&record.encode());
        line.push('\n');

        // A single write on an O_APPEND descriptor keeps concurrent writers
        // from interleaving inside a line.
        file.write_all(line.as_bytes())
            .map_err(|e| HistoryError::io(&self.path, e))?;
        file.sync_data()
            .map_err(|e| HistoryError::io(&self.path, e))?;

        debug!(
            "Appended history record for {} {} in batch {}",
            record.backend, record.unit, record.batch_id
        );
        Ok(())
    }

    fn open_for_append(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HistoryError::io(&self.path, e))
    }

    /// Records in exact reverse append order, optionally restricted to one
    /// batch. Each call starts from the end of the file as it is now.
    pub fn scan_reverse(&self, batch_filter: Option<&str>) -> Result<ReverseScan> {
        let lines = match File::open(&self.path) {
            Ok(file) => Some(
                ReverseLines::new(file, self.chunk_size)
                    .map_err(|e| HistoryError::io(&self.path, e))?,
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(HistoryError::io(&self.path, e)),
        };

        Ok(ReverseScan {
            path: self.path.clone(),
            lines,
            batch_filter: batch_filter.map(str::to_string),
        })
    }

    /// Batch of the newest record; ties go to the record appended last.
    pub fn latest_batch(&self) -> Result<Option<String>> {
        let mut latest: Option<(DateTime<Utc>, String)> = None;

        for entry in self.scan_reverse(None)? {
            let record = match entry {
                Ok(record) => record,
                Err(e) if e.is_line_error() => {
                    warn!("Ignoring unreadable history line: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let newer = latest
                .as_ref()
                .is_none_or(|(timestamp, _)| record.timestamp > *timestamp);
            if newer {
                latest = Some((record.timestamp, record.batch_id));
            }
        }

        Ok(latest.map(|(_, batch_id)| batch_id))
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// The file is non-empty and its last byte is not a newline.
fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Lazy reverse iterator over a history file.
///
/// Malformed lines are yielded as errors so the caller can decide whether
/// to skip them; an I/O error ends the scan.
#[derive(Debug)]
pub struct ReverseScan {
    path: PathBuf,
    lines: Option<ReverseLines>,
    batch_filter: Option<String>,
}

impl ReverseScan {
    fn in_batch(&self, raw_line: &str) -> bool {
        match &self.batch_filter {
            Some(batch) => raw_line.split(FIELD_DELIMITER).nth(1) == Some(batch.as_str()),
            None => true,
        }
    }
}

impl Iterator for ReverseScan {
    type Item = Result<TransactionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let bytes = match self.lines.as_mut()?.next_line() {
                None => {
                    self.lines = None;
                    return None;
                }
                Some(Err(e)) => {
                    self.lines = None;
                    return Some(Err(HistoryError::io(&self.path, e)));
                }
                Some(Ok(bytes)) => bytes,
            };

            let text = String::from_utf8_lossy(&bytes);
            if text.trim().is_empty() {
                continue;
            }

            match TransactionRecord::parse(&text) {
                Ok(record) => {
                    let matches = self
                        .batch_filter
                        .as_deref()
                        .is_none_or(|batch| record.batch_id == batch);
                    if matches {
                        return Some(Ok(record));
                    }
                }
                Err(e) => {
                    if self.in_batch(&text) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Reads newline-terminated lines from the end of a file towards its start.
#[derive(Debug)]
struct ReverseLines {
    file: File,
    /// Offset of the first byte not yet pulled into `buf`.
    pos: u64,
    /// Unyielded bytes between `pos` and the last yielded line.
    buf: Vec<u8>,
    chunk_size: usize,
    /// The file ended without a newline: its last line is a torn write.
    skip_torn_tail: bool,
}

impl ReverseLines {
    fn new(mut file: File, chunk_size: usize) -> io::Result<Self> {
        let len = file.seek(SeekFrom::End(0))?;
        let mut skip_torn_tail = false;
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            skip_torn_tail = last[0] != b'\n';
        }

        Ok(Self {
            file,
            pos: len,
            buf: Vec::new(),
            chunk_size: chunk_size.max(1),
            skip_torn_tail,
        })
    }

    fn next_line(&mut self) -> Option<io::Result<Vec<u8>>> {
        loop {
            let line = if let Some(idx) = self.buf.iter().rposition(|b| *b == b'\n') {
                let line = self.buf.split_off(idx + 1);
                self.buf.truncate(idx);
                line
            } else if self.pos == 0 {
                if self.buf.is_empty() {
                    return None;
                }
                std::mem::take(&mut self.buf)
            } else {
                if let Err(e) = self.fill() {
                    return Some(Err(e));
                }
                continue;
            };

            if self.skip_torn_tail {
                self.skip_torn_tail = false;
                if !line.is_empty() {
                    warn!("Ignoring incomplete trailing history line");
                }
                continue;
            }

            if line.is_empty() {
                continue;
            }
            return Some(Ok(line));
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let read = self.chunk_size.min(self.pos as usize);
        self.pos -= read as u64;

        let mut chunk = vec![0u8; read];
        self.file.seek(SeekFrom::Start(self.pos))?;
        self.file.read_exact(&mut chunk)?;

        chunk.extend_from_slice(&self.buf);
        self.buf = chunk;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendKind;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(second: u32, batch: &str, backend: BackendKind, unit: &str) -> TransactionRecord {
        TransactionRecord::update(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
            batch,
            backend,
            unit,
            "1.0",
            "1.1",
        )
    }

    fn units(scan: ReverseScan) -> Vec<String> {
        scan.map(|entry| entry.unwrap().unit).collect()
    }

    #[test]
    fn test_scan_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path().join("transactions.log"));
        assert_eq!(store.scan_reverse(None).unwrap().count(), 0);
        assert_eq!(store.latest_batch().unwrap(), None);
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = TempDir::new().unwrap();
        let err = HistoryStore::open_existing(dir.path().join("nope.log")).unwrap_err();
        assert!(matches!(err, HistoryError::SourceNotFound { .. }));
    }

    #[test]
    fn test_append_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("transactions.log");
        let store = HistoryStore::open(&path);
        store
            .append(&record(0, "b1", BackendKind::Apt, "curl"))
            .unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with('\n'));
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_scan_reverse_across_chunk_boundaries() {
        let dir = TempDir::new().unwrap();
        let store =
            HistoryStore::open(dir.path().join("transactions.log")).with_chunk_size(7);

        let names: Vec<String> = (0..25).map(|i| format!("pkg-{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            store
                .append(&record(i as u32, "b1", BackendKind::Apt, name))
                .unwrap();
        }

        let mut expected = names.clone();
        expected.reverse();
        assert_eq!(units(store.scan_reverse(None).unwrap()), expected);
    }

    #[test]
    fn test_batch_filter_keeps_reverse_order() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path().join("transactions.log"));
        store.append(&record(0, "b1", BackendKind::Apt, "a")).unwrap();
        store.append(&record(1, "b2", BackendKind::Snap, "b")).unwrap();
        store.append(&record(2, "b1", BackendKind::Apt, "c")).unwrap();
        store.append(&record(3, "b2", BackendKind::Snap, "d")).unwrap();

        assert_eq!(units(store.scan_reverse(Some("b1")).unwrap()), vec!["c", "a"]);
        assert_eq!(units(store.scan_reverse(Some("b2")).unwrap()), vec!["d", "b"]);
        assert_eq!(store.scan_reverse(Some("b3")).unwrap().count(), 0);
    }

    #[test]
    fn test_fresh_scan_sees_new_appends() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path().join("transactions.log"));
        store.append(&record(0, "b1", BackendKind::Apt, "a")).unwrap();

        let first = store.scan_reverse(None).unwrap();
        store.append(&record(1, "b1", BackendKind::Apt, "b")).unwrap();

        // The older scan is bounded by the file size at its start.
        assert_eq!(units(first), vec!["a"]);
        assert_eq!(units(store.scan_reverse(None).unwrap()), vec!["b", "a"]);
    }

    #[test]
    fn test_torn_trailing_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transactions.log");
        let store = HistoryStore::open(&path);
        store.append(&record(0, "b1", BackendKind::Apt, "a")).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2024-05-01T10:00:09Z|b1|APT|tor").unwrap();

        assert_eq!(units(store.scan_reverse(None).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_append_after_torn_line_starts_a_new_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transactions.log");
        let store = HistoryStore::open(&path);
        store.append(&record(0, "b0", BackendKind::Apt, "a")).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2024-05-01T10:00:09Z|b0|APT|tor").unwrap();
        drop(file);

        store.append(&record(10, "b1", BackendKind::Apt, "curl")).unwrap();

        assert_eq!(units(store.scan_reverse(Some("b1")).unwrap()), vec!["curl"]);
        assert_eq!(store.latest_batch().unwrap().as_deref(), Some("b1"));

        // The fragment is kept as its own unreadable line of the old batch.
        let old: Vec<_> = store.scan_reverse(Some("b0")).unwrap().collect();
        assert_eq!(old.len(), 2);
        assert!(old[0].as_ref().unwrap_err().is_line_error());
        assert_eq!(old[1].as_ref().unwrap().unit, "a");
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_malformed_lines_surface_as_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transactions.log");
        let store = HistoryStore::open(&path);
        store.append(&record(0, "b1", BackendKind::Apt, "a")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"garbage|b1|line\n\n").unwrap();
        store.append(&record(1, "b1", BackendKind::Apt, "b")).unwrap();

        let entries: Vec<_> = store.scan_reverse(Some("b1")).unwrap().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].as_ref().unwrap().unit, "b");
        assert!(entries[1].as_ref().unwrap_err().is_line_error());
        assert_eq!(entries[2].as_ref().unwrap().unit, "a");

        // Garbage that does not name the batch is not reported for it.
        assert_eq!(store.scan_reverse(Some("b2")).unwrap().count(), 0);
    }

    #[test]
    fn test_latest_batch_uses_newest_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path().join("transactions.log"));
        store.append(&record(5, "b-new", BackendKind::Apt, "a")).unwrap();
        // Interleaved older run appended afterwards.
        store.append(&record(1, "b-old", BackendKind::Apt, "b")).unwrap();

        assert_eq!(store.latest_batch().unwrap().as_deref(), Some("b-new"));
    }

    #[test]
    fn test_latest_batch_includes_all_backends() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path().join("transactions.log"));
        store.append(&record(0, "b0", BackendKind::Apt, "old")).unwrap();
        store.append(&record(3, "b1", BackendKind::Apt, "curl")).unwrap();
        store.append(&record(3, "b1", BackendKind::Flatpak, "org.gimp.GIMP")).unwrap();

        let latest = store.latest_batch().unwrap().unwrap();
        assert_eq!(latest, "b1");
        let found: Vec<BackendKind> = store
            .scan_reverse(Some(&latest))
            .unwrap()
            .map(|entry| entry.unwrap().backend)
            .collect();
        assert_eq!(found, vec![BackendKind::Flatpak, BackendKind::Apt]);
    }
}
