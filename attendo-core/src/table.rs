use csv::StringRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// An existing table could not be read and was treated as empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for TableWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is corrupted or empty, starting new ({})",
            self.path.display(),
            self.reason
        )
    }
}

/// Contents of a whole-file CSV table.
///
/// Besides the typed rows, the file's own column layout and raw records are
/// kept so that a rewrite preserves columns the typed rows do not know about.
pub(crate) struct Table<T> {
    pub rows: Vec<T>,
    pub warning: Option<TableWarning>,
    columns: StringRecord,
    records: Vec<StringRecord>,
}

impl<T> Table<T> {
    fn empty(headers: &[&str], warning: Option<TableWarning>) -> Self {
        Self {
            rows: Vec::new(),
            warning,
            columns: StringRecord::from(headers.to_vec()),
            records: Vec::new(),
        }
    }
}

/// Read all rows. Columns are matched by name; extra columns are carried
/// along untouched. A missing file is an empty table. A file that fails to
/// parse or lacks a required column is reported as a warning and also
/// yields an empty table.
pub(crate) fn read_rows<T: DeserializeOwned>(path: &Path, headers: &[&str]) -> Table<T> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Table::empty(headers, None),
        Err(e) => return unreadable(path, headers, e.to_string()),
    };

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let columns = match reader.headers() {
        Ok(found) => found.clone(),
        Err(e) => return unreadable(path, headers, e.to_string()),
    };
    let missing: Vec<&str> = headers
        .iter()
        .copied()
        .filter(|name| !columns.iter().any(|c| c == *name))
        .collect();
    if !missing.is_empty() {
        return unreadable(path, headers, format!("missing columns {:?}", missing));
    }

    let records: Result<Vec<StringRecord>, csv::Error> = reader.records().collect();
    let records = match records {
        Ok(records) => records,
        Err(e) => return unreadable(path, headers, e.to_string()),
    };

    let rows: Result<Vec<T>, csv::Error> = records
        .iter()
        .map(|record| record.deserialize(Some(&columns)))
        .collect();
    match rows {
        Ok(rows) => Table {
            rows,
            warning: None,
            columns,
            records,
        },
        Err(e) => unreadable(path, headers, e.to_string()),
    }
}

fn unreadable<T>(path: &Path, headers: &[&str], reason: String) -> Table<T> {
    let warning = TableWarning {
        path: path.to_path_buf(),
        reason,
    };
    log::warn!("{}", warning);
    Table::empty(headers, Some(warning))
}

impl<T: Serialize> Table<T> {
    /// Rewrite `path` with every row read earlier plus `row`, in the file's
    /// own column order. `headers` names `T`'s fields in declaration order;
    /// columns `row` has no value for are left blank.
    pub(crate) fn write_with(&self, path: &Path, headers: &[&str], row: &T) -> Result<(), csv::Error> {
        let fields = serialize_record(row)?;
        let appended: StringRecord = self
            .columns
            .iter()
            .map(|column| {
                headers
                    .iter()
                    .position(|h| *h == column)
                    .and_then(|i| fields.get(i))
                    .unwrap_or("")
            })
            .collect();

        write_atomic(path, |writer| {
            writer.write_record(&self.columns)?;
            for record in &self.records {
                writer.write_record(record)?;
            }
            writer.write_record(&appended)
        })
    }
}

/// Fields of `row` in declaration order
fn serialize_record<T: Serialize>(row: &T) -> Result<StringRecord, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(row)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::Other, e.to_string())))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes.as_slice());
    match reader.records().next() {
        Some(record) => record,
        None => Ok(StringRecord::new()),
    }
}

/// Write through a temporary file in the same directory, then rename it over
/// `path`. An interrupted write leaves the previous file intact.
fn write_atomic<F>(path: &Path, fill: F) -> Result<(), csv::Error>
where
    F: FnOnce(&mut csv::Writer<&mut NamedTempFile>) -> Result<(), csv::Error>,
{
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut temp);
        fill(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| csv::Error::from(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        #[serde(rename = "Key")]
        key: String,
        #[serde(rename = "Value")]
        value: String,
    }

    const HEADERS: [&str; 2] = ["Key", "Value"];

    fn row(key: &str, value: &str) -> Row {
        Row {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn append(path: &Path, new: Row) -> Option<TableWarning> {
        let table: Table<Row> = read_rows(path, &HEADERS);
        table.write_with(path, &HEADERS, &new).unwrap();
        table.warning
    }

    #[test]
    fn test_missing_file_is_empty_without_warning() {
        let dir = tempfile::tempdir().unwrap();
        let table: Table<Row> = read_rows(&dir.path().join("none.csv"), &HEADERS);
        assert!(table.rows.is_empty());
        assert!(table.warning.is_none());
    }

    #[test]
    fn test_append_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("table.csv");
        assert!(append(&path, row("a", "1")).is_none());
        assert!(append(&path, row("b", "two words")).is_none());

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Key,Value\n"));

        let table: Table<Row> = read_rows(&path, &HEADERS);
        assert!(table.warning.is_none());
        assert_eq!(table.rows, vec![row("a", "1"), row("b", "two words")]);
    }

    #[test]
    fn test_extra_columns_and_order_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(&path, "Value,Notes,Key\n1,late bus,a\n").unwrap();

        assert!(append(&path, row("b", "2")).is_none());

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "Value,Notes,Key\n1,late bus,a\n2,,b\n");

        let table: Table<Row> = read_rows(&path, &HEADERS);
        assert_eq!(table.rows, vec![row("a", "1"), row("b", "2")]);
    }

    #[test]
    fn test_missing_column_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(&path, "Key,Other\nx,y\n").unwrap();

        let table: Table<Row> = read_rows(&path, &HEADERS);
        assert!(table.rows.is_empty());
        assert_eq!(table.warning.unwrap().path, path);
    }

    #[test]
    fn test_empty_file_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(&path, "").unwrap();

        let table: Table<Row> = read_rows(&path, &HEADERS);
        assert!(table.rows.is_empty());
        assert!(table.warning.is_some());
    }

    #[test]
    fn test_ragged_row_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(&path, "Key,Value\na,1\nb\n").unwrap();

        let table: Table<Row> = read_rows(&path, &HEADERS);
        assert!(table.rows.is_empty());
        assert!(table.warning.is_some());
    }

    #[test]
    fn test_unreadable_table_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(&path, "Key,Value\na,1\nb\n").unwrap();

        assert!(append(&path, row("c", "3")).is_some());
        assert_eq!(fs::read_to_string(&path).unwrap(), "Key,Value\nc,3\n");
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        append(&path, row("a", "1"));
        append(&path, row("b", "2"));

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("table.csv")]);
    }
}
