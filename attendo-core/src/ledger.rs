use crate::table::{self, TableWarning};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column order of the attendance spreadsheet
pub const LEDGER_HEADERS: [&str; 9] = [
    "Ticket Number",
    "Name",
    "Department",
    "Section",
    "Date",
    "Day",
    "Time",
    "Status",
    "Type",
];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Values outside the known set (typed into the sheet by hand) are kept as
/// `Other` so the row survives the next rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttendanceStatus {
    Present,
    /// Seen outside both windows
    Unmarked,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryType {
    CheckIn,
    CheckOut,
    OutOfWindow,
    Other(String),
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Unmarked => "---",
            AttendanceStatus::Other(value) => value,
        }
    }
}

impl EntryType {
    pub fn as_str(&self) -> &str {
        match self {
            EntryType::CheckIn => "Check-in",
            EntryType::CheckOut => "Check-out",
            EntryType::OutOfWindow => "---",
            EntryType::Other(value) => value,
        }
    }
}

impl From<String> for AttendanceStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Present" => AttendanceStatus::Present,
            "---" => AttendanceStatus::Unmarked,
            _ => AttendanceStatus::Other(value),
        }
    }
}

impl From<AttendanceStatus> for String {
    fn from(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl From<String> for EntryType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Check-in" => EntryType::CheckIn,
            "Check-out" => EntryType::CheckOut,
            "---" => EntryType::OutOfWindow,
            _ => EntryType::Other(value),
        }
    }
}

impl From<EntryType> for String {
    fn from(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attendance row. Date, day and time are stored pre-formatted
/// (`%Y-%m-%d`, `%A`, `%H:%M:%S`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Ticket Number")]
    pub ticket_id: String,
    #[serde(rename = "Name")]
    pub display_name: String,
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Section")]
    pub section: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Day")]
    pub weekday: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Status")]
    pub status: AttendanceStatus,
    #[serde(rename = "Type")]
    pub entry_type: EntryType,
}

/// At most one record may exist per key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub ticket_id: String,
    pub date: String,
    pub entry_type: EntryType,
}

impl AttendanceRecord {
    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey {
            ticket_id: self.ticket_id.clone(),
            date: self.date.clone(),
            entry_type: self.entry_type.clone(),
        }
    }

    pub fn matches(&self, key: &DedupeKey) -> bool {
        self.ticket_id == key.ticket_id && self.date == key.date && self.entry_type == key.entry_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

#[derive(Debug)]
pub struct AppendReport {
    pub outcome: AppendOutcome,
    /// Problems recovered from while reading the existing ledger
    pub warnings: Vec<TableWarning>,
}

/// Persisted attendance rows
pub trait Ledger {
    /// Append `record` unless a row matching `key` already exists
    fn append_if_absent(
        &mut self,
        record: AttendanceRecord,
        key: &DedupeKey,
    ) -> Result<AppendReport, LedgerError>;

    /// Every stored row, in insertion order
    fn records(&self) -> (Vec<AttendanceRecord>, Option<TableWarning>);
}

/// Ledger kept as a CSV spreadsheet. Every append re-reads and rewrites the
/// whole file, keeping any extra columns. A file that fails to parse is
/// treated as empty, so the next append replaces its contents. Assumes a
/// single writer.
pub struct CsvLedger {
    path: PathBuf,
}

impl CsvLedger {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Ledger for CsvLedger {
    fn append_if_absent(
        &mut self,
        record: AttendanceRecord,
        key: &DedupeKey,
    ) -> Result<AppendReport, LedgerError> {
        let existing = table::read_rows::<AttendanceRecord>(&self.path, &LEDGER_HEADERS);
        let warnings: Vec<TableWarning> = existing.warning.iter().cloned().collect();

        if existing.rows.iter().any(|row| row.matches(key)) {
            log::debug!(
                "Ledger already has {} for {} on {}",
                key.entry_type,
                key.ticket_id,
                key.date
            );
            return Ok(AppendReport {
                outcome: AppendOutcome::Duplicate,
                warnings,
            });
        }

        existing
            .write_with(&self.path, &LEDGER_HEADERS, &record)
            .map_err(|source| LedgerError::Write {
            path: self.path.clone(),
            source,
        })?;

        Ok(AppendReport {
            outcome: AppendOutcome::Appended,
            warnings,
        })
    }

    fn records(&self) -> (Vec<AttendanceRecord>, Option<TableWarning>) {
        let read = table::read_rows(&self.path, &LEDGER_HEADERS);
        (read.rows, read.warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(ticket: &str, date: &str, time: &str, entry_type: EntryType) -> AttendanceRecord {
        let status = match entry_type {
            EntryType::OutOfWindow => AttendanceStatus::Unmarked,
            _ => AttendanceStatus::Present,
        };
        AttendanceRecord {
            ticket_id: ticket.to_string(),
            display_name: "Alex".to_string(),
            department: "CS".to_string(),
            section: "A".to_string(),
            date: date.to_string(),
            weekday: "Friday".to_string(),
            time: time.to_string(),
            status,
            entry_type,
        }
    }

    #[test]
    fn test_header_row_matches_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = CsvLedger::new(dir.path().join("attendance.csv"));
        let rec = record("1001", "2026-10-16", "09:31:00", EntryType::CheckIn);
        let key = rec.dedupe_key();
        ledger.append_if_absent(rec, &key).unwrap();

        let contents = fs::read_to_string(ledger.path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), LEDGER_HEADERS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "1001,Alex,CS,A,2026-10-16,Friday,09:31:00,Present,Check-in"
        );
    }

    #[test]
    fn test_duplicate_key_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = CsvLedger::new(dir.path().join("attendance.csv"));

        let first = record("1001", "2026-10-16", "09:31:00", EntryType::CheckIn);
        let key = first.dedupe_key();
        let report = ledger.append_if_absent(first, &key).unwrap();
        assert_eq!(report.outcome, AppendOutcome::Appended);

        let second = record("1001", "2026-10-16", "09:50:00", EntryType::CheckIn);
        let report = ledger.append_if_absent(second, &key).unwrap();
        assert_eq!(report.outcome, AppendOutcome::Duplicate);

        let (rows, warning) = ledger.records();
        assert!(warning.is_none());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, "09:31:00");
    }

    #[test]
    fn test_key_distinguishes_type_date_and_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = CsvLedger::new(dir.path().join("attendance.csv"));

        for rec in [
            record("1001", "2026-10-16", "09:31:00", EntryType::CheckIn),
            record("1001", "2026-10-16", "16:31:00", EntryType::CheckOut),
            record("1001", "2026-10-16", "12:00:00", EntryType::OutOfWindow),
            record("1001", "2026-10-17", "09:31:00", EntryType::CheckIn),
            record("1002", "2026-10-16", "09:31:00", EntryType::CheckIn),
        ] {
            let key = rec.dedupe_key();
            let report = ledger.append_if_absent(rec, &key).unwrap();
            assert_eq!(report.outcome, AppendOutcome::Appended);
        }

        assert_eq!(ledger.records().0.len(), 5);
    }

    #[test]
    fn test_corrupt_ledger_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "\u{0}\u{1}garbage,,\nnot,a,ledger\n").unwrap();

        let mut ledger = CsvLedger::new(&path);
        let rec = record("1001", "2026-10-16", "09:31:00", EntryType::CheckIn);
        let key = rec.dedupe_key();
        let report = ledger.append_if_absent(rec.clone(), &key).unwrap();

        assert_eq!(report.outcome, AppendOutcome::Appended);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].path, path);

        let (rows, warning) = ledger.records();
        assert!(warning.is_none());
        assert_eq!(rows, vec![rec]);
    }

    fn ledger_with(dir: &tempfile::TempDir, contents: &str) -> CsvLedger {
        let path = dir.path().join("attendance.csv");
        fs::write(&path, contents).unwrap();
        CsvLedger::new(path)
    }

    #[test]
    fn test_hand_typed_values_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_with(
            &dir,
            &format!(
                "{}\n1001,Alex,CS,A,2026-10-16,Friday,09:31:00,Absent,Lunch\n",
                LEDGER_HEADERS.join(",")
            ),
        );

        let (rows, warning) = ledger.records();
        assert!(warning.is_none());
        assert_eq!(rows[0].status, AttendanceStatus::Other("Absent".to_string()));
        assert_eq!(rows[0].entry_type, EntryType::Other("Lunch".to_string()));

        let rec = record("1001", "2026-10-16", "12:00:00", EntryType::OutOfWindow);
        let key = rec.dedupe_key();
        let report = ledger.append_if_absent(rec, &key).unwrap();
        assert_eq!(report.outcome, AppendOutcome::Appended);
        assert!(report.warnings.is_empty());

        let contents = fs::read_to_string(ledger.path()).unwrap();
        assert!(contents.contains("09:31:00,Absent,Lunch"));
        assert!(contents.contains("12:00:00,---,---"));
    }

    #[test]
    fn test_hand_typed_type_is_its_own_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_with(
            &dir,
            &format!(
                "{}\n1001,Alex,CS,A,2026-10-16,Friday,12:10:00,Present,Lunch\n",
                LEDGER_HEADERS.join(",")
            ),
        );

        let rec = record("1001", "2026-10-16", "12:20:00", EntryType::Other("Lunch".to_string()));
        let key = rec.dedupe_key();
        let report = ledger.append_if_absent(rec, &key).unwrap();
        assert_eq!(report.outcome, AppendOutcome::Duplicate);
    }

    #[test]
    fn test_extra_column_keeps_prior_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_with(
            &dir,
            &format!(
                "{},Notes\n1001,Alex,CS,A,2026-10-16,Friday,09:31:00,Present,Check-in,late bus\n",
                LEDGER_HEADERS.join(",")
            ),
        );

        let rec = record("1002", "2026-10-16", "12:00:00", EntryType::OutOfWindow);
        let key = rec.dedupe_key();
        let report = ledger.append_if_absent(rec, &key).unwrap();
        assert!(report.warnings.is_empty());

        let (rows, warning) = ledger.records();
        assert!(warning.is_none());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ticket_id, "1001");

        let contents = fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], format!("{},Notes", LEDGER_HEADERS.join(",")));
        assert!(lines[1].ends_with("Check-in,late bus"));
        assert!(lines[2].ends_with("---,---,"));
    }

    #[test]
    fn test_missing_column_counts_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_with(
            &dir,
            "Ticket Number,Name,Date\n1001,Alex,2026-10-16\n",
        );

        let (rows, warning) = ledger.records();
        assert!(rows.is_empty());
        assert!(warning.is_some());
    }
}
