use crate::vision::{Embedding, FaceEncoder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

const ARTIFACT_VERSION: u32 = 1;
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("{0} not found. Run enrollment or `attendo encode` first.")]
    NotFound(PathBuf),
    #[error("Encoding file {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Known faces: `embeddings[i]` belongs to `identifiers[i]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingSet {
    pub embeddings: Vec<Embedding>,
    pub identifiers: Vec<String>,
}

impl EncodingSet {
    pub fn push(&mut self, embedding: Embedding, identifier: String) {
        self.embeddings.push(embedding);
        self.identifiers.push(identifier);
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn identifier(&self, index: usize) -> Option<&str> {
        self.identifiers.get(index).map(String::as_str)
    }
}

#[derive(Serialize, Deserialize)]
struct Artifact {
    version: u32,
    set: EncodingSet,
}

/// Summary of a full rebuild
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    pub students: usize,
    pub faces_encoded: usize,
    pub images_without_face: usize,
    pub images_unreadable: usize,
    pub elapsed: Duration,
}

/// On-disk encoding set, written wholesale and read wholesale
pub struct EncodingStore {
    path: PathBuf,
}

impl EncodingStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<EncodingSet, EncodingError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EncodingError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(self.corrupt(e.to_string())),
        };

        let artifact: Artifact =
            bincode::deserialize(&data).map_err(|e| self.corrupt(e.to_string()))?;

        if artifact.version != ARTIFACT_VERSION {
            return Err(self.corrupt(format!("unsupported version {}", artifact.version)));
        }

        let set = artifact.set;
        if set.embeddings.len() != set.identifiers.len() {
            return Err(self.corrupt(format!(
                "{} embeddings but {} identifiers",
                set.embeddings.len(),
                set.identifiers.len()
            )));
        }

        log::debug!("Loaded {} face encodings from {}", set.len(), self.path.display());
        Ok(set)
    }

    pub fn save(&self, set: &EncodingSet) -> Result<(), EncodingError> {
        let artifact = Artifact {
            version: ARTIFACT_VERSION,
            set: set.clone(),
        };
        let data = bincode::serialize(&artifact).map_err(|e| self.corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| EncodingError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, data).map_err(|source| EncodingError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Re-encode every sample under `dataset_dir` and replace the stored set.
    ///
    /// Each subdirectory is one student, named by identifier. Only the first
    /// face of each image is used; unreadable and faceless images are skipped.
    pub fn rebuild<E: FaceEncoder + ?Sized>(
        &self,
        dataset_dir: &Path,
        encoder: &mut E,
    ) -> Result<(EncodingSet, RebuildReport), EncodingError> {
        log::info!("Starting face encoding from {}", dataset_dir.display());
        let started = Instant::now();
        let mut set = EncodingSet::default();
        let mut report = RebuildReport::default();

        for student_dir in sorted_entries(dataset_dir)? {
            if !student_dir.is_dir() {
                continue;
            }
            let Some(identifier) = student_dir.file_name().and_then(|n| n.to_str()) else {
                log::warn!("Skipping non UTF-8 directory {}", student_dir.display());
                continue;
            };

            log::info!("Processing: {}...", identifier);
            report.students += 1;

            for image_path in sorted_entries(&student_dir)? {
                if !is_image(&image_path) {
                    continue;
                }

                let image = match image::open(&image_path) {
                    Ok(img) => img.to_rgb8(),
                    Err(e) => {
                        log::warn!("Could not process {}: {}", image_path.display(), e);
                        report.images_unreadable += 1;
                        continue;
                    }
                };

                match encoder.encode_first_face(&image) {
                    Ok(Some(face)) => {
                        set.push(face.embedding, identifier.to_string());
                        report.faces_encoded += 1;
                    }
                    Ok(None) => {
                        log::debug!("No face found in {}", image_path.display());
                        report.images_without_face += 1;
                    }
                    Err(e) => {
                        log::warn!("Could not process {}: {}", image_path.display(), e);
                        report.images_unreadable += 1;
                    }
                }
            }
        }

        self.save(&set)?;
        report.elapsed = started.elapsed();

        log::info!(
            "Encoding complete: {} faces from {} students in {:.2}s",
            report.faces_encoded,
            report.students,
            report.elapsed.as_secs_f64()
        );
        Ok((set, report))
    }

    fn corrupt(&self, reason: String) -> EncodingError {
        EncodingError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, EncodingError> {
    let entries = fs::read_dir(dir).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            EncodingError::NotFound(dir.to_path_buf())
        } else {
            EncodingError::Io {
                path: dir.to_path_buf(),
                source,
            }
        }
    })?;

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}
