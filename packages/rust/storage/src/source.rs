//! CSV-backed record source.
//!
//! The whole input (a few tens of thousands of rows) is read up front, so
//! resuming at an arbitrary index is a plain lookup.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use enricher_shared::{CsvConfig, EnricherError, InputRecord, RecordSource, Result};

use crate::csv;

/// Input records loaded from a delimiter-separated file with a header row.
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    header: Vec<String>,
    records: Vec<InputRecord>,
    fingerprint: String,
}

impl CsvRecordSource {
    /// Read and parse the input file.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path, config: &CsvConfig) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| EnricherError::io(path, e))?;
        let fingerprint = fingerprint(&bytes);
        let text = csv::decode(&bytes, config.encoding)?;
        let source = Self::from_text(&text, config, fingerprint)?;

        info!(
            records = source.records.len(),
            columns = source.header.len(),
            "input loaded"
        );
        Ok(source)
    }

    /// Build a source from already-decoded text.
    pub fn from_text(text: &str, config: &CsvConfig, fingerprint: String) -> Result<Self> {
        let mut rows = csv::parse_rows(text, config.delimiter)?.into_iter();
        let header = rows
            .next()
            .ok_or_else(|| EnricherError::parse("input has no header row"))?;

        let id_col = column_index(&header, &config.id_column)?;
        let query_cols = config
            .query_columns
            .iter()
            .map(|name| column_index(&header, name))
            .collect::<Result<Vec<_>>>()?;

        let mut records = Vec::new();
        for (n, mut fields) in rows.enumerate() {
            // Row numbers are 1-based and count the header.
            let row = n + 2;
            if fields.len() > header.len() {
                return Err(EnricherError::parse(format!(
                    "row {row} has {} fields but the header has {}",
                    fields.len(),
                    header.len()
                )));
            }
            if fields.len() < header.len() {
                warn!(
                    row,
                    expected = header.len(),
                    found = fields.len(),
                    "short row, padding with empty fields"
                );
                fields.resize(header.len(), String::new());
            }

            let parts: Vec<&str> = query_cols.iter().map(|&i| fields[i].trim()).collect();
            // All query columns are required; a partial name is not searched.
            let query_key = if parts.iter().any(|p| p.is_empty()) {
                String::new()
            } else {
                parts.join(" ")
            };

            records.push(InputRecord {
                id: fields[id_col].trim().to_string(),
                query_key,
                fields,
            });
        }

        Ok(Self {
            header,
            records,
            fingerprint,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// SHA-256 of the raw input bytes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl RecordSource for CsvRecordSource {
    fn record_at(&mut self, index: u64) -> Result<Option<InputRecord>> {
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.records.get(i))
            .cloned())
    }

    fn total(&self) -> Option<u64> {
        Some(self.records.len() as u64)
    }
}

fn column_index(header: &[String], name: &str) -> Result<usize> {
    header
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| EnricherError::parse(format!("input header has no column '{name}'")))
}

/// Compute the SHA-256 hex digest of raw content.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use enricher_shared::TextEncoding;

    const INPUT: &str = "ID_AVO;NOM;PRENOM1;VILLE\n\
                         A1;JEANNE DIT FOUQUE;Lise;PARIS\n\
                         A2;MARTIN;;LYON\n\
                         A3; DURAND ;Paul\n";

    fn source() -> CsvRecordSource {
        CsvRecordSource::from_text(INPUT, &CsvConfig::default(), "fp".into()).unwrap()
    }

    #[test]
    fn builds_query_key_from_configured_columns() {
        let mut src = source();
        let first = src.record_at(0).unwrap().unwrap();
        assert_eq!(first.id, "A1");
        assert_eq!(first.query_key, "Lise JEANNE DIT FOUQUE");
        assert_eq!(first.fields, vec!["A1", "JEANNE DIT FOUQUE", "Lise", "PARIS"]);
    }

    #[test]
    fn missing_name_part_gives_empty_query_key() {
        let mut src = source();
        assert_eq!(src.record_at(1).unwrap().unwrap().query_key, "");
    }

    #[test]
    fn short_rows_are_padded_and_values_trimmed_for_query() {
        let mut src = source();
        let third = src.record_at(2).unwrap().unwrap();
        assert_eq!(third.query_key, "Paul DURAND");
        assert_eq!(third.fields.len(), 4);
        // Pass-through fields stay verbatim.
        assert_eq!(third.fields[1], " DURAND ");
        assert_eq!(third.fields[3], "");
    }

    #[test]
    fn wide_row_is_rejected() {
        let text = "ID_AVO;NOM;PRENOM1\nA1;MARTIN;Paul\nA2;DURAND;Lea;extra\n";
        let err = CsvRecordSource::from_text(text, &CsvConfig::default(), "fp".into()).unwrap_err();
        assert!(matches!(err, EnricherError::Parse { .. }));
        assert!(err.to_string().contains("row 3 has 4 fields"), "{err}");
    }

    #[test]
    fn resumes_at_any_index() {
        let mut src = source();
        assert_eq!(src.total(), Some(3));
        assert_eq!(src.record_at(2).unwrap().unwrap().id, "A3");
        assert!(src.record_at(3).unwrap().is_none());
        assert!(src.record_at(u64::MAX).unwrap().is_none());
    }

    #[test]
    fn missing_column_is_reported() {
        let config = CsvConfig {
            id_column: "ID".into(),
            ..CsvConfig::default()
        };
        let err = CsvRecordSource::from_text(INPUT, &config, "fp".into()).unwrap_err();
        assert!(err.to_string().contains("'ID'"));
    }

    #[test]
    fn open_reads_latin1_and_fingerprints() {
        let dir = std::env::temp_dir().join(format!("enricher-src-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("avocats.csv");
        let mut bytes = b"ID_AVO;NOM;PRENOM1\nA9;L".to_vec();
        bytes.extend_from_slice(&[0xC9]); // 'É'
        bytes.extend_from_slice(b"VY;H\n");
        std::fs::write(&path, &bytes).unwrap();

        let config = CsvConfig {
            encoding: TextEncoding::Latin1,
            ..CsvConfig::default()
        };
        let mut src = CsvRecordSource::open(&path, &config).unwrap();
        assert_eq!(src.record_at(0).unwrap().unwrap().query_key, "H LÉVY");
        assert_eq!(src.fingerprint(), fingerprint(&bytes));
        assert_eq!(src.fingerprint().len(), 64);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
