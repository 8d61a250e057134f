use std::collections::HashSet;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, warn};

use super::error::StoreError;
use super::types::{LISTING_HEADERS, QueueEntry, Record};

/// Append-only CSV file plus the set of keys already written to it.
///
/// Every successful [`append`](RecordStore::append) is flushed and synced
/// before returning, so a crash loses at most the record in flight.
pub struct RecordStore<R> {
    path: PathBuf,
    seen: HashSet<String>,
    file: Option<File>,
    /// The file's last line has no terminator yet.
    unterminated: bool,
    _kind: PhantomData<R>,
}

impl<R: Record> RecordStore<R> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let seen = Self::load(&path)?;
        debug!(path = %path.display(), keys = seen.len(), "store loaded");
        Ok(Self {
            path,
            seen,
            file: None,
            unterminated: false,
            _kind: PhantomData,
        })
    }

    /// Keys already present in the backing file. A missing file is empty.
    pub fn load(path: &Path) -> Result<HashSet<String>, StoreError> {
        let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
            Ok(reader) => reader,
            Err(err) if is_not_found(&err) => return Ok(HashSet::new()),
            Err(err) => return Err(StoreError::csv(path, err)),
        };

        let headers = reader
            .headers()
            .map_err(|err| StoreError::csv(path, err))?
            .clone();
        let key_idx = header_index(&headers, R::KEY_COLUMN)
            .unwrap_or_else(|| R::HEADERS.len().saturating_sub(1));

        let mut seen = HashSet::new();
        for row in reader.records() {
            let row = row.map_err(|err| StoreError::csv(path, err))?;
            if let Some(key) = row.get(key_idx).map(str::trim)
                && !key.is_empty()
            {
                seen.insert(key.to_string());
            }
        }

        Ok(seen)
    }

    pub fn append(&mut self, record: &R) -> Result<bool, StoreError> {
        let key = record.key();
        if self.seen.contains(key) {
            return Ok(false);
        }

        self.open_for_write()?;
        let Some(file) = self.file.as_mut() else {
            return Err(StoreError::io(&self.path, io::Error::other("store file not open")));
        };
        let start = file
            .metadata()
            .map_err(|err| StoreError::io(&self.path, err))?
            .len();

        let mut row = Vec::new();
        if self.unterminated {
            row.push(b'\n');
        }
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut row);
            if start == 0 {
                writer
                    .write_record(R::HEADERS)
                    .map_err(|err| StoreError::csv(&self.path, err))?;
            }
            writer
                .serialize(record)
                .map_err(|err| StoreError::csv(&self.path, err))?;
            writer
                .flush()
                .map_err(|err| StoreError::io(&self.path, err))?;
        }

        if let Err(err) = write_synced(file, &row) {
            if let Err(rollback) = file.set_len(start) {
                warn!(path = %self.path.display(), error = %rollback, "could not roll back partial row");
            }
            return Err(StoreError::io(&self.path, err));
        }

        self.unterminated = false;
        self.seen.insert(key.to_string());
        Ok(true)
    }

    /// Takes the write lock up front so a concurrent run fails before any
    /// browser work starts.
    pub fn claim(&mut self) -> Result<(), StoreError> {
        self.open_for_write()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_write(&mut self) -> Result<(), StoreError> {
        if self.file.is_some() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| StoreError::io(&self.path, err))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(StoreError::Locked(self.path.clone()));
            }
            Err(TryLockError::Error(err)) => return Err(StoreError::io(&self.path, err)),
        }
        self.unterminated =
            lacks_final_newline(&mut file).map_err(|err| StoreError::io(&self.path, err))?;
        if self.unterminated {
            debug!(path = %self.path.display(), "last line has no terminator, will add one");
        }
        self.file = Some(file);
        Ok(())
    }
}

fn write_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_data()
}

fn lacks_final_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Reads `(Name, URL)` pairs from a listing file in file order.
///
/// Rows without an http(s) URL are dropped.
pub fn load_queue(path: &Path) -> Result<Vec<QueueEntry>, StoreError> {
    let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(reader) => reader,
        Err(err) if is_not_found(&err) => {
            return Err(StoreError::MissingInput(path.to_path_buf()));
        }
        Err(err) => return Err(StoreError::csv(path, err)),
    };

    let headers = reader
        .headers()
        .map_err(|err| StoreError::csv(path, err))?
        .clone();
    let name_idx = header_index(&headers, LISTING_HEADERS[0]).unwrap_or(0);
    let url_idx = header_index(&headers, LISTING_HEADERS[3]).unwrap_or(3);

    let mut queue = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| StoreError::csv(path, err))?;
        let url = row.get(url_idx).map(str::trim).unwrap_or_default();
        if !url.starts_with("http") {
            continue;
        }
        queue.push(QueueEntry {
            name: row.get(name_idx).map(str::trim).unwrap_or_default().to_string(),
            url: url.to_string(),
        });
    }

    Ok(queue)
}

fn header_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
}

fn is_not_found(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound)
}
