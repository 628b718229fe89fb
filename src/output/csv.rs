//! CSV record sink
//!
//! One file per job with the canonical column set. Reopening an existing file
//! appends and preloads its ids, so a resumed job never writes a record twice.

use crate::NormalizedRecord;
use csv::{Writer, WriterBuilder};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{OutputError, OutputResult, RecordSink};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Column order of every export file
pub const COLUMNS: [&str; 14] = [
    "exchange",
    "account",
    "data_type",
    "id",
    "timestamp",
    "datetime",
    "symbol",
    "side",
    "price",
    "quantity",
    "fee",
    "fee_currency",
    "raw_type",
    "extra",
];

const ID_COLUMN: usize = 3;

/// CSV sink deduplicating by record id
pub struct CsvRecordSink {
    path: PathBuf,
    writer: Option<Writer<BufWriter<File>>>,
    seen_ids: HashSet<String>,
    records_written: u64,
    duplicates_skipped: u64,
}

impl CsvRecordSink {
    /// Create (or truncate) `path` and write the header row
    pub fn create<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Creating CSV sink: path={}", path.display());
        create_parent(path)?;

        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {}", e)))?;
        let mut writer = writer_for(file);
        writer
            .write_record(COLUMNS)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;
        writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            seen_ids: HashSet::new(),
            records_written: 0,
            duplicates_skipped: 0,
        })
    }

    /// Append to `path`, remembering the ids it already holds.
    ///
    /// A row left half-written by a crash is cut off first. Falls back to
    /// [`create`](Self::create) when the file is missing, empty, or holds no
    /// complete line.
    pub fn open_append<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        let has_content = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        if !has_content || truncate_torn_tail(path)? == 0 {
            return Self::create(path);
        }

        let seen_ids = read_ids(path)?;
        info!(
            "Appending to CSV sink: path={} existing_records={}",
            path.display(),
            seen_ids.len()
        );

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer_for(file)),
            seen_ids,
            records_written: 0,
            duplicates_skipped: 0,
        })
    }

    /// Output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written by this sink instance
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Records skipped because their id was already present
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped
    }
}

impl RecordSink for CsvRecordSink {
    fn write(&mut self, record: &NormalizedRecord) -> OutputResult<bool> {
        let writer = self.writer.as_mut().ok_or(OutputError::Closed)?;

        if self.seen_ids.contains(&record.id) {
            self.duplicates_skipped += 1;
            debug!(id = %record.id, "Skipping duplicate record");
            return Ok(false);
        }

        writer
            .write_record(&to_row(record)?)
            .map_err(|e| OutputError::CsvError(format!("Failed to write record: {}", e)))?;
        self.seen_ids.insert(record.id.clone());
        self.records_written += 1;
        Ok(true)
    }

    /// Flush buffered rows and sync the file to disk
    fn flush(&mut self) -> OutputResult<()> {
        let writer = self.writer.as_mut().ok_or(OutputError::Closed)?;
        writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;
        writer
            .get_ref()
            .get_ref()
            .sync_data()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))
    }

    fn close(&mut self) -> OutputResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let buf_writer = writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {}", e)))?;
        let file = buf_writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {}", e)))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))?;

        info!(
            "CSV sink closed: path={} records_written={} duplicates_skipped={}",
            self.path.display(),
            self.records_written,
            self.duplicates_skipped
        );
        Ok(())
    }
}

fn create_parent(path: &Path) -> OutputResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
    }
    Ok(())
}

fn writer_for(file: File) -> Writer<BufWriter<File>> {
    WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file))
}

/// Cut the file back to just after its last newline.
///
/// Rows never contain a raw newline (`extra` is compact JSON), so anything past
/// the last `\n` is a partial row. Returns the resulting length.
fn truncate_torn_tail(path: &Path) -> OutputResult<u64> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;
    let len = file
        .metadata()
        .map_err(|e| OutputError::IoError(format!("Failed to stat file: {}", e)))?
        .len();

    let mut end = len;
    let mut block = vec![0u8; DEFAULT_BUFFER_SIZE];
    let keep = loop {
        if end == 0 {
            break 0;
        }
        let start = end.saturating_sub(block.len() as u64);
        let chunk = &mut block[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))
            .map_err(|e| OutputError::IoError(format!("Failed to seek file: {}", e)))?;
        file.read_exact(chunk)
            .map_err(|e| OutputError::IoError(format!("Failed to read file: {}", e)))?;
        if let Some(pos) = chunk.iter().rposition(|b| *b == b'\n') {
            break start + pos as u64 + 1;
        }
        end = start;
    };

    if keep < len {
        warn!(
            "Discarding partial row: path={} bytes={}",
            path.display(),
            len - keep
        );
        file.set_len(keep)
            .and_then(|_| file.sync_all())
            .map_err(|e| OutputError::IoError(format!("Failed to truncate file: {}", e)))?;
    }
    Ok(keep)
}

/// One CSV row; absent values are empty and decimals keep their exact scale
pub fn to_row(record: &NormalizedRecord) -> OutputResult<[String; 14]> {
    let extra = serde_json::to_string(&record.extra)
        .map_err(|e| OutputError::SerializationError(e.to_string()))?;
    let decimal = |value: &Option<rust_decimal::Decimal>| {
        value.map(|d| d.to_string()).unwrap_or_default()
    };

    Ok([
        record.exchange.clone(),
        record.account.clone(),
        record.data_type.to_string(),
        record.id.clone(),
        record.timestamp.to_string(),
        record.datetime.clone(),
        record.symbol.clone().unwrap_or_default(),
        record.side.to_string(),
        decimal(&record.price),
        decimal(&record.quantity),
        decimal(&record.fee),
        record.fee_currency.clone().unwrap_or_default(),
        record.raw_type.to_string(),
        extra,
    ])
}

/// Ids already present in an export file
pub fn read_ids(path: &Path) -> OutputResult<HashSet<String>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| OutputError::IoError(format!("Failed to open {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| OutputError::CsvError(format!("Failed to read header: {}", e)))?
        .clone();
    if headers.iter().ne(COLUMNS.iter().copied()) {
        return Err(OutputError::HeaderMismatch {
            path: path.display().to_string(),
            found: headers.iter().collect::<Vec<_>>().join(","),
        });
    }

    let mut ids = HashSet::new();
    for row in reader.records() {
        let row = row.map_err(|e| OutputError::CsvError(format!("Failed to read row: {}", e)))?;
        if let Some(id) = row.get(ID_COLUMN) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}
