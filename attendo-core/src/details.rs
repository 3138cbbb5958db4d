use crate::table::{self, TableWarning};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DETAILS_HEADERS: [&str; 4] = [
    "Ticket Number (ID)",
    "Full Name",
    "Department",
    "Section (A/B)",
];

/// Enrollment form fields as the operator typed them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentDetails {
    #[serde(rename = "Ticket Number (ID)")]
    pub ticket_id: String,
    #[serde(rename = "Full Name")]
    pub full_name: String,
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Section (A/B)")]
    pub section: String,
}

/// Append-only student roster. No duplicate check; enrollment guards
/// duplicates through the dataset directory instead.
pub struct DetailsTable {
    path: PathBuf,
}

impl DetailsTable {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the warning raised if the existing table had to be discarded
    pub fn append(&self, details: StudentDetails) -> Result<Option<TableWarning>, csv::Error> {
        let existing = table::read_rows::<StudentDetails>(&self.path, &DETAILS_HEADERS);
        existing.write_with(&self.path, &DETAILS_HEADERS, &details)?;
        log::info!("Student details saved to {}", self.path.display());
        Ok(existing.warning)
    }

    pub fn students(&self) -> (Vec<StudentDetails>, Option<TableWarning>) {
        let read = table::read_rows(&self.path, &DETAILS_HEADERS);
        (read.rows, read.warning)
    }
}
