//! Minimal file helpers for the append-only ledger log (one JSON record per line).

use crate::transaction::LedgerRecord;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Appends `record` as one JSON line to `path`, creating parent directories.
pub fn append_record(path: impl AsRef<Path>, record: &LedgerRecord) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let line = serde_json::to_string(record)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Reads every record from a ledger log; a missing file reads as empty.
pub fn read_records(path: impl AsRef<Path>) -> io::Result<Vec<LedgerRecord>> {
    let file = match File::open(path.as_ref()) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::{append_record, read_records};
    use crate::transaction::{InputEntry, LedgerRecord, OutputEntry, TransactionType};
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn test_append_and_read_records() {
        let base = std::env::temp_dir();
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let tmp_dir = base.join(format!("route_ledger_test_{}", unique));
        let path = tmp_dir.join("ledger.jsonl");
        assert!(read_records(&path).unwrap().is_empty());
        let record = LedgerRecord {
            kind: TransactionType::Withdraw,
            input: vec![InputEntry::Withdraw("P".into(), "900".into(), None)],
            output: vec![OutputEntry::Withdraw("P".into(), "900".into())],
            timestamp: 4,
            txid: "ab".into(),
            signature: "sig".into(),
        };
        append_record(&path, &record).unwrap();
        append_record(&path, &record).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with("{\"type\":\"BGP Withdraw\""));
        assert_eq!(read_records(&path).unwrap(), vec![record.clone(), record]);
        fs::remove_dir_all(&tmp_dir).unwrap();
    }
}
