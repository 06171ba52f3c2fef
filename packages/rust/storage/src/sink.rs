//! Append-only CSV output.
//!
//! Each row is written and synced before [`OutputSink::append`] returns, and
//! the returned byte length is what the checkpoint records as committed. On
//! resume the file is cut back to that length, which drops both torn trailing
//! rows and rows written after the last persisted checkpoint.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use enricher_shared::{
    CsvConfig, EnricherError, EnrichmentResult, InputRecord, OutputSink, Result, TextEncoding,
};

use crate::csv;

/// Columns appended after the input columns.
pub const ENRICHMENT_COLUMNS: [&str; 6] = [
    "TELEPHONE",
    "EMAIL",
    "SCRAPE_STATUS",
    "SCRAPE_DATE",
    "API_IDENTIFIANT",
    "SCRAPE_NOTES",
];

/// Separator for multi-valued phone/email cells.
const MULTI_VALUE_SEPARATOR: &str = "; ";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output header: every input column followed by [`ENRICHMENT_COLUMNS`].
pub fn output_header(input_header: &[String]) -> Vec<String> {
    input_header
        .iter()
        .cloned()
        .chain(ENRICHMENT_COLUMNS.iter().map(|c| (*c).to_string()))
        .collect()
}

/// CSV output file with durable appends.
#[derive(Debug)]
pub struct CsvOutputSink {
    path: PathBuf,
    file: File,
    delimiter: char,
    encoding: TextEncoding,
    committed: u64,
    replaced_chars: u64,
}

impl CsvOutputSink {
    /// Create (or truncate) the output and write the header row.
    pub fn create(path: &Path, input_header: &[String], config: &CsvConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EnricherError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| EnricherError::io(path, e))?;

        let mut sink = Self {
            path: path.to_path_buf(),
            file,
            delimiter: config.delimiter,
            encoding: config.encoding,
            committed: 0,
            replaced_chars: 0,
        };
        let header = csv::format_row(&output_header(input_header), sink.delimiter);
        sink.write_durably(&header, "header")?;

        info!(path = %path.display(), "output created");
        Ok(sink)
    }

    /// Reopen an existing output, cutting it back to `committed` bytes.
    pub fn resume(path: &Path, committed: u64, config: &CsvConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EnricherError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| EnricherError::io(path, e))?
            .len();

        if len < committed {
            return Err(EnricherError::Checkpoint(format!(
                "output {} holds {len} bytes but the checkpoint committed {committed}; restart required",
                path.display()
            )));
        }
        if len > committed {
            warn!(
                path = %path.display(),
                discarded_bytes = len - committed,
                "discarding output written after the last checkpoint"
            );
            file.set_len(committed)
                .and_then(|()| file.sync_all())
                .map_err(|e| EnricherError::output_write(path, e))?;
        }

        file.seek(SeekFrom::End(0))
            .map_err(|e| EnricherError::output_write(path, e))?;

        info!(path = %path.display(), committed, "output reopened for append");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            delimiter: config.delimiter,
            encoding: config.encoding,
            committed,
            replaced_chars: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed byte length.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Characters replaced by `?` because the output encoding cannot hold them.
    pub fn replaced_chars(&self) -> u64 {
        self.replaced_chars
    }

    fn write_durably(&mut self, text: &str, row: &str) -> Result<u64> {
        let csv::Encoded { bytes, replaced } = csv::encode(text, self.encoding);
        if replaced > 0 {
            warn!(
                row,
                replaced,
                encoding = ?self.encoding,
                "characters not representable in the output encoding were written as '?'"
            );
            self.replaced_chars += replaced as u64;
        }
        self.file
            .write_all(&bytes)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| EnricherError::output_write(&self.path, e))?;
        self.committed += bytes.len() as u64;
        Ok(self.committed)
    }
}

impl OutputSink for CsvOutputSink {
    fn append(&mut self, record: &InputRecord, result: &EnrichmentResult) -> Result<u64> {
        let mut row: Vec<String> = record.fields.clone();
        row.push(result.phones.join(MULTI_VALUE_SEPARATOR));
        row.push(result.emails.join(MULTI_VALUE_SEPARATOR));
        row.push(result.status.as_str().to_string());
        row.push(result.timestamp.format(DATE_FORMAT).to_string());
        row.push(result.external_id.clone().unwrap_or_default());
        row.push(result.note.clone());

        let line = csv::format_row(&row, self.delimiter);
        self.write_durably(&line, &record.id)
    }
}
