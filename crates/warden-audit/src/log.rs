// log.rs - Hash-chained JSONL export of the audit trail.
//
// The live trail lives in the storage backend. For archival and offline
// review it can be exported to a JSON Lines file: one `ChainedRecord` per
// line, each carrying the SHA-256 of the previous raw line. Inserting,
// deleting or editing a line breaks the chain and `verify_chain` reports
// the first broken link.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuditError;
use crate::record::AuditRecord;

/// One line of the export: the record plus its link to the previous line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainedRecord {
    #[serde(flatten)]
    pub record: AuditRecord,
    /// Hash of the previous raw line; `None` for the first line.
    pub previous_hash: Option<String>,
}

/// Append-only export file.
pub struct AuditLog {
    writer: BufWriter<File>,
    path: PathBuf,
    last_hash: Option<String>,
    last_sequence: Option<u64>,
}

impl AuditLog {
    /// Open (or create) an export at `path`, recovering the chain head so
    /// new lines link to the existing ones.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        let (last_hash, last_sequence) = if path.exists() {
            Self::read_head(&path)?
        } else {
            (None, None)
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            last_hash,
            last_sequence,
        })
    }

    /// Append one record, chained to the previous line, and flush.
    pub fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = ChainedRecord {
            record: record.clone(),
            previous_hash: self.last_hash.clone(),
        };
        let json = serde_json::to_string(&line)?;

        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;

        self.last_hash = Some(line_hash(&json));
        self.last_sequence = Some(record.sequence_id);
        Ok(())
    }

    /// Append every record whose sequence number is beyond the last one
    /// already exported. Returns how many lines were written.
    ///
    /// Makes repeated exports of a growing trail incremental.
    pub fn append_new(&mut self, records: &[AuditRecord]) -> Result<usize, AuditError> {
        let mut written = 0;
        for record in records {
            if self
                .last_sequence
                .is_some_and(|last| record.sequence_id <= last)
            {
                continue;
            }
            self.append(record)?;
            written += 1;
        }
        if written > 0 {
            tracing::info!(path = %self.path.display(), written, "exported audit records");
        }
        Ok(written)
    }

    /// Read all lines, oldest first. Blank lines are skipped.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<ChainedRecord>, AuditError> {
        let reader = open_reader(path.as_ref())?;
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            lines.push(serde_json::from_str(&line)?);
        }
        Ok(lines)
    }

    /// Verify the hash chain. Returns the number of verified lines or an
    /// `IntegrityViolation` naming the first broken link.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let reader = open_reader(path.as_ref())?;
        let mut previous_hash: Option<String> = None;
        let mut verified = 0;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chained: ChainedRecord = serde_json::from_str(&line)?;
            if chained.previous_hash != previous_hash {
                return Err(AuditError::IntegrityViolation {
                    line: line_num + 1,
                    expected: previous_hash.unwrap_or_else(|| "None".to_string()),
                    actual: chained.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }
            // Hash the raw line: re-serializing could reorder fields.
            previous_hash = Some(line_hash(&line));
            verified += 1;
        }

        Ok(verified)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_head(path: &Path) -> Result<(Option<String>, Option<u64>), AuditError> {
        let reader = open_reader(path)?;
        let mut last_line: Option<String> = None;
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                last_line = Some(line);
            }
        }
        match last_line {
            Some(line) => {
                let chained: ChainedRecord = serde_json::from_str(&line)?;
                Ok((Some(line_hash(&line)), Some(chained.record.sequence_id)))
            }
            None => Ok((None, None)),
        }
    }
}

fn open_reader(path: &Path) -> Result<BufReader<File>, AuditError> {
    let file = File::open(path).map_err(|source| AuditError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Lowercase hex SHA-256 of one export line.
fn line_hash(line: &str) -> String {
    format!("{:x}", Sha256::digest(line.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EntityRef;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(sequence_id: u64, name: &str) -> AuditRecord {
        AuditRecord {
            sequence_id,
            entity: EntityRef::user(42),
            attribute_name: name.to_string(),
            old_value: None,
            new_value: Some(serde_json::Value::Bool(true)),
            actor_id: Some(7),
            reason: "test".to_string(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(&record(1, "BETA")).unwrap();
            log.append(&record(2, "PREMIUM")).unwrap();
        }

        let lines = AuditLog::read_all(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].record.attribute_name, "BETA");
        assert!(lines[0].previous_hash.is_none());
        assert!(lines[1].previous_hash.is_some());
    }

    #[test]
    fn chain_verifies_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(&record(1, "BETA")).unwrap();
        }
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(&record(2, "BETA")).unwrap();
            log.append(&record(3, "TEAM")).unwrap();
        }

        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 3);
    }

    #[test]
    fn edited_line_breaks_the_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut log = AuditLog::open(&path).unwrap();
            for seq in 1..=3 {
                log.append(&record(seq, "BETA")).unwrap();
            }
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("\"reason\":\"test\"", "\"reason\":\"edited\"", 1);
        std::fs::write(&path, tampered).unwrap();

        match AuditLog::verify_chain(&path) {
            Err(AuditError::IntegrityViolation { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected IntegrityViolation, got {:?}", other),
        }
    }

    #[test]
    fn append_new_skips_already_exported_sequences() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first = vec![record(1, "BETA"), record(2, "TEAM")];
        {
            let mut log = AuditLog::open(&path).unwrap();
            assert_eq!(log.append_new(&first).unwrap(), 2);
        }

        let second = vec![record(1, "BETA"), record(2, "TEAM"), record(3, "LANG")];
        {
            let mut log = AuditLog::open(&path).unwrap();
            assert_eq!(log.append_new(&second).unwrap(), 1);
        }

        assert_eq!(AuditLog::read_all(&path).unwrap().len(), 3);
        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 3);
    }
}
