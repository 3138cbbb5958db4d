pub mod capture;
pub mod compare;
pub mod config;
pub mod details;
pub mod encodings;
pub mod enrollment;
pub mod identity;
pub mod ledger;
pub mod policy;
pub mod recognition;
pub mod table;
pub mod vision;

use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use capture::{Camera, CaptureError};
use config::Config;
use details::{DetailsTable, StudentDetails};
use encodings::{EncodingError, EncodingSet, EncodingStore, RebuildReport};
use enrollment::{EnrollError, Enroller, EnrollmentForm, EnrollmentReport};
use ledger::{AttendanceRecord, CsvLedger, Ledger};
use policy::{AttendanceLogger, AttendancePolicy, LogResult};
use recognition::{Overlay, RecognitionError, RecognitionSession, ScanOptions, ScanSummary};
use table::TableWarning;
use vision::OnnxFaceEncoder;

/// Accepted by `attendo log --at`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CAMERA_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Camera error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Vision error: {0}")]
    Vision(#[from] vision::VisionError),
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),
    #[error("Enrollment error: {0}")]
    Enroll(#[from] EnrollError),
    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("No known faces in {0}. Enroll students or run `attendo encode` first.")]
    NoEncodings(PathBuf),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse failure category shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Corrupt,
    DuplicateEntity,
    DeviceUnavailable,
    InvalidInput,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Capture(_) => ErrorKind::DeviceUnavailable,
            Error::Encoding(e) => encoding_kind(e),
            Error::Enroll(e) => match e {
                EnrollError::EmptyField(_) => ErrorKind::InvalidInput,
                EnrollError::Duplicate(_) => ErrorKind::DuplicateEntity,
                EnrollError::Capture(_) => ErrorKind::DeviceUnavailable,
                EnrollError::Encoding(e) => encoding_kind(e),
                _ => ErrorKind::Other,
            },
            Error::NoEncodings(_) => ErrorKind::NotFound,
            Error::Vision(_) | Error::Ledger(_) | Error::Recognition(_) => ErrorKind::Other,
        }
    }
}

fn encoding_kind(error: &EncodingError) -> ErrorKind {
    match error {
        EncodingError::NotFound(_) => ErrorKind::NotFound,
        EncodingError::Corrupt { .. } => ErrorKind::Corrupt,
        EncodingError::Io { .. } => ErrorKind::Other,
    }
}

/// Parse a `YYYY-MM-DD HH:MM:SS` timestamp
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, Error> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("bad timestamp {:?}: {}", value, e)))
}

/// Camera, models and files for one attendance station
pub struct AttendanceStation {
    config: Config,
    encoder: Option<OnnxFaceEncoder>,
}

impl AttendanceStation {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            encoder: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Models are loaded on first use
    fn encoder(&mut self) -> Result<&mut OnnxFaceEncoder, Error> {
        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => OnnxFaceEncoder::new(&self.config)?,
        };
        Ok(self.encoder.insert(encoder))
    }

    /// Open the camera on a worker thread and load the models meanwhile
    fn open_camera_and_models(&mut self) -> Result<Camera, Error> {
        log::info!("Initializing camera...");
        let camera_task = capture::open_in_background(&self.config.camera);

        self.encoder()?;

        let camera = camera_task.wait_with(CAMERA_POLL, || {
            log::debug!("Waiting for camera to initialize...");
        })??;
        Ok(camera)
    }

    /// Register a student, capture their samples and rebuild the encodings
    pub fn enroll(&mut self, form: &EnrollmentForm) -> Result<EnrollmentReport, Error> {
        let enroller = Enroller::new(&self.config);
        let registration = enroller.register(form)?;
        log::info!("Registered {}", registration.identifier);

        let mut camera = self.open_camera_and_models()?;
        log::info!("Look at the camera...");
        let samples = enroller.capture(&registration, &mut camera)?;
        drop(camera);

        let encoder = self.encoder()?;
        encoder.set_detection_scale(1.0);
        let (encodings, rebuild) = enroller.rebuild(encoder)?;

        Ok(EnrollmentReport {
            registration,
            samples,
            encodings,
            rebuild,
        })
    }

    /// Re-encode the whole dataset
    pub fn rebuild_encodings(&mut self) -> Result<(EncodingSet, RebuildReport), Error> {
        let store = EncodingStore::new(&self.config.storage.encodings_path);
        let dataset_dir = self.config.storage.dataset_dir.clone();
        let encoder = self.encoder()?;
        encoder.set_detection_scale(1.0);
        Ok(store.rebuild(&dataset_dir, encoder)?)
    }

    /// Encodings for a scan; an empty set is refused before any device is touched
    pub fn load_encodings(&self) -> Result<EncodingSet, Error> {
        let store = EncodingStore::new(&self.config.storage.encodings_path);
        let set = store.load()?;
        if set.is_empty() {
            return Err(Error::NoEncodings(store.path().to_path_buf()));
        }
        log::info!("Loaded {} known face encodings", set.len());
        Ok(set)
    }

    /// Run the recognition loop against the live camera
    pub fn scan(&mut self, options: &ScanOptions) -> Result<ScanSummary, Error> {
        let known = self.load_encodings()?;
        let logger = self.logger();
        let recognition = self.config.recognition.clone();
        let overlay = match options.snapshots {
            Some(_) => Overlay::load(&self.config.overlay),
            None => Overlay::default(),
        };

        let mut camera = self.open_camera_and_models()?;
        let encoder = self.encoder()?;
        encoder.set_detection_scale(recognition.detection_scale);

        let mut session =
            RecognitionSession::new(known, &recognition, logger, std::time::Instant::now())
                .with_overlay(overlay);
        let summary = session.run(&mut camera, encoder, options, || Local::now().naive_local())?;
        Ok(summary)
    }

    /// Apply the attendance policy to one sighting
    pub fn log_attendance(&self, identifier: &str, at: NaiveDateTime) -> Result<LogResult, Error> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::InvalidInput("identifier must not be empty".to_string()));
        }
        Ok(self.logger().log(identifier, at)?)
    }

    /// Ledger rows, optionally for one `YYYY-MM-DD` date
    pub fn report(
        &self,
        date: Option<&str>,
    ) -> (Vec<AttendanceRecord>, Option<TableWarning>) {
        let ledger = CsvLedger::new(&self.config.storage.ledger_path);
        let (mut rows, warning) = ledger.records();
        if let Some(date) = date {
            rows.retain(|r| r.date == date);
        }
        (rows, warning)
    }

    pub fn students(&self) -> (Vec<StudentDetails>, Option<TableWarning>) {
        DetailsTable::new(&self.config.storage.details_path).students()
    }

    fn logger(&self) -> AttendanceLogger<CsvLedger> {
        AttendanceLogger::new(
            AttendancePolicy::new(self.config.windows.clone()),
            CsvLedger::new(&self.config.storage.ledger_path),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::ledger::EntryType;
    use std::path::Path;

    fn station(root: &Path) -> AttendanceStation {
        let mut config = Config::default();
        config.storage = StorageConfig {
            dataset_dir: root.join("dataset"),
            encodings_path: root.join("encodings.bin"),
            ledger_path: root.join("attendance.csv"),
            details_path: root.join("details.csv"),
        };
        AttendanceStation::new(config).unwrap()
    }

    #[test]
    fn test_parse_timestamp() {
        let at = parse_timestamp("2026-10-16 09:45:00").unwrap();
        assert_eq!(at.format("%H:%M").to_string(), "09:45");

        let err = parse_timestamp("16/10/2026 09:45").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_log_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let station = station(dir.path());

        let first = station
            .log_attendance("1001_Alex_CS_A", parse_timestamp("2026-10-16 09:45:00").unwrap())
            .unwrap();
        assert!(first.outcome.is_logged());
        let again = station
            .log_attendance("1001_Alex_CS_A", parse_timestamp("2026-10-16 09:50:00").unwrap())
            .unwrap();
        assert!(!again.outcome.is_logged());
        station
            .log_attendance("1001_Alex_CS_A", parse_timestamp("2026-10-17 16:45:00").unwrap())
            .unwrap();

        let (all, warning) = station.report(None);
        assert!(warning.is_none());
        assert_eq!(all.len(), 2);

        let (friday, _) = station.report(Some("2026-10-16"));
        assert_eq!(friday.len(), 1);
        assert_eq!(friday[0].entry_type, EntryType::CheckIn);
    }

    #[test]
    fn test_log_rejects_blank_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let station = station(dir.path());
        let err = station
            .log_attendance("  ", parse_timestamp("2026-10-16 09:45:00").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_scan_requires_encodings() {
        let dir = tempfile::tempdir().unwrap();
        let mut station = station(dir.path());

        let missing = station.scan(&ScanOptions::default()).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        EncodingStore::new(dir.path().join("encodings.bin"))
            .save(&EncodingSet::default())
            .unwrap();
        let empty = station.scan(&ScanOptions::default()).unwrap_err();
        assert!(matches!(empty, Error::NoEncodings(_)));
        assert_eq!(empty.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_error_kinds() {
        let duplicate: Error = EnrollError::Duplicate(PathBuf::from("x")).into();
        assert_eq!(duplicate.kind(), ErrorKind::DuplicateEntity);

        let corrupt: Error = EncodingError::Corrupt {
            path: PathBuf::from("x"),
            reason: "bad".to_string(),
        }
        .into();
        assert_eq!(corrupt.kind(), ErrorKind::Corrupt);

        let camera: Error = EnrollError::Capture(CaptureError::Read("gone".to_string())).into();
        assert_eq!(camera.kind(), ErrorKind::DeviceUnavailable);

        let empty: Error = EnrollError::EmptyField("Section").into();
        assert_eq!(empty.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.recognition.tolerance = 0.0;
        let err = AttendanceStation::new(config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
