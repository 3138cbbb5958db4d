use crate::capture::{CaptureError, FrameSource};
use crate::config::{Config, EnrollmentConfig};
use crate::details::{DetailsTable, StudentDetails};
use crate::encodings::{EncodingError, EncodingSet, EncodingStore, RebuildReport};
use crate::identity;
use crate::table::TableWarning;
use crate::vision::FaceEncoder;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("Student already enrolled: {0} exists")]
    Duplicate(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to update student details: {0}")]
    Details(#[from] csv::Error),
    #[error("Failed to save sample {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// The four fields collected for a new student
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentForm {
    pub ticket_id: String,
    pub full_name: String,
    pub department: String,
    pub section: String,
}

impl EnrollmentForm {
    pub fn new(ticket_id: &str, full_name: &str, department: &str, section: &str) -> Self {
        Self {
            ticket_id: ticket_id.to_string(),
            full_name: full_name.to_string(),
            department: department.to_string(),
            section: section.to_string(),
        }
    }

    /// Trimmed copy, or the first empty field
    pub fn validate(&self) -> Result<Self, EnrollError> {
        let field = |value: &str, name: &'static str| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(EnrollError::EmptyField(name))
            } else {
                Ok(trimmed.to_string())
            }
        };

        Ok(Self {
            ticket_id: field(&self.ticket_id, "Ticket number")?,
            full_name: field(&self.full_name, "Full name")?,
            department: field(&self.department, "Department")?,
            section: field(&self.section, "Section")?,
        })
    }

    pub fn identifier(&self) -> String {
        identity::encode(&self.ticket_id, &self.full_name, &self.department, &self.section)
    }

    fn details(&self) -> StudentDetails {
        StudentDetails {
            ticket_id: self.ticket_id.clone(),
            full_name: self.full_name.clone(),
            department: self.department.clone(),
            section: self.section.clone(),
        }
    }
}

/// A student whose directory and details row now exist
#[derive(Debug, Clone)]
pub struct Registration {
    pub identifier: String,
    pub directory: PathBuf,
    pub warnings: Vec<TableWarning>,
}

#[derive(Debug)]
pub struct EnrollmentReport {
    pub registration: Registration,
    pub samples: Vec<PathBuf>,
    pub encodings: EncodingSet,
    pub rebuild: RebuildReport,
}

/// Registers students, captures their samples and refreshes the encodings
pub struct Enroller {
    dataset_dir: PathBuf,
    details: DetailsTable,
    store: EncodingStore,
    settings: EnrollmentConfig,
}

impl Enroller {
    pub fn new(config: &Config) -> Self {
        Self {
            dataset_dir: config.storage.dataset_dir.clone(),
            details: DetailsTable::new(&config.storage.details_path),
            store: EncodingStore::new(&config.storage.encodings_path),
            settings: config.enrollment.clone(),
        }
    }

    pub fn details(&self) -> &DetailsTable {
        &self.details
    }

    pub fn store(&self) -> &EncodingStore {
        &self.store
    }

    /// Validate the form, create the student's directory and record their details.
    /// Nothing is written if the form is invalid or the student already exists.
    pub fn register(&self, form: &EnrollmentForm) -> Result<Registration, EnrollError> {
        let form = form.validate()?;
        let identifier = form.identifier();
        let directory = self.dataset_dir.join(&identifier);

        if directory.exists() {
            return Err(EnrollError::Duplicate(directory));
        }

        fs::create_dir_all(&directory).map_err(|source| EnrollError::Io {
            path: directory.clone(),
            source,
        })?;
        log::info!("Created {}", directory.display());

        let warnings = self.details.append(form.details())?.into_iter().collect();

        Ok(Registration {
            identifier,
            directory,
            warnings,
        })
    }

    /// Save the configured number of frames into the student's directory
    pub fn capture<S: FrameSource + ?Sized>(
        &self,
        registration: &Registration,
        source: &mut S,
    ) -> Result<Vec<PathBuf>, EnrollError> {
        capture_samples(
            source,
            &registration.directory,
            self.settings.images_to_capture,
            self.settings.capture_interval(),
        )
    }

    pub fn rebuild<E: FaceEncoder + ?Sized>(
        &self,
        encoder: &mut E,
    ) -> Result<(EncodingSet, RebuildReport), EnrollError> {
        Ok(self.store.rebuild(&self.dataset_dir, encoder)?)
    }
}

/// Write `count` frames as `1.jpg` .. `count.jpg`, `interval` apart.
///
/// On a read failure the images already written stay on disk.
pub fn capture_samples<S: FrameSource + ?Sized>(
    source: &mut S,
    directory: &Path,
    count: u32,
    interval: Duration,
) -> Result<Vec<PathBuf>, EnrollError> {
    let mut saved = Vec::with_capacity(count as usize);

    for n in 1..=count {
        if n > 1 && !interval.is_zero() {
            thread::sleep(interval);
        }

        let frame = source.next_frame()?;
        let path = directory.join(format!("{}.jpg", n));
        frame.save(&path).map_err(|source| EnrollError::Image {
            path: path.clone(),
            source,
        })?;

        log::info!("Captured image {}/{}", n, count);
        saved.push(path);
    }

    Ok(saved)
}
