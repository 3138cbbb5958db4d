use crate::capture::FrameSource;
use crate::compare::{self, MatchResult};
use crate::config::{OverlayConfig, RecognitionConfig};
use crate::encodings::EncodingSet;
use crate::identity::Identity;
use crate::ledger::{Ledger, LedgerError};
use crate::policy::{AttendanceLogger, LogResult};
use crate::vision::{BoundingBox, FaceEncoder, VisionError};
use ab_glyph::{FontVec, PxScale};
use chrono::NaiveDateTime;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Label for faces that match nobody
pub const UNKNOWN_LABEL: &str = "Unknown";

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MESSAGE_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_PADDING: u32 = 4;

/// Limits how often the same student is sent to the ledger.
///
/// A call goes through when the identifier differs from the last one logged,
/// or when more than `interval` has passed since the last call.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_identifier: Option<String>,
    last_logged: Instant,
}

impl Throttle {
    pub fn new(interval: Duration, started: Instant) -> Self {
        Self {
            interval,
            last_identifier: None,
            last_logged: started,
        }
    }

    /// Returns true and records the call if `identifier` may be logged at `now`
    pub fn check(&mut self, identifier: &str, now: Instant) -> bool {
        let changed = self.last_identifier.as_deref() != Some(identifier);
        let expired = now.saturating_duration_since(self.last_logged) > self.interval;

        if changed || expired {
            self.last_identifier = Some(identifier.to_string());
            self.last_logged = now;
            true
        } else {
            false
        }
    }
}

/// One face in a processed frame
#[derive(Debug, Clone)]
pub struct RecognizedFace {
    pub bbox: BoundingBox,
    pub identity: Option<Identity>,
    pub distance: Option<f32>,
}

impl RecognizedFace {
    pub fn label(&self) -> &str {
        self.identity
            .as_ref()
            .map(Identity::display_name)
            .unwrap_or(UNKNOWN_LABEL)
    }
}

#[derive(Debug, Default)]
pub struct FrameReport {
    pub faces: Vec<RecognizedFace>,
    /// Ledger calls made for this frame
    pub logs: Vec<LogResult>,
}

impl FrameReport {
    pub fn has_known_face(&self) -> bool {
        self.faces.iter().any(|f| f.identity.is_some())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to save snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// When a scan stops and where annotated frames go
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub max_frames: Option<u64>,
    pub duration: Option<Duration>,
    /// Annotated frames with at least one recognized face are saved here
    pub snapshots: Option<PathBuf>,
    /// Checked before every frame; set it to end the scan cleanly
    pub stop: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub frames: u64,
    pub faces_seen: usize,
    pub recognized: usize,
    pub logged: usize,
    pub already_logged: usize,
    pub snapshots_saved: usize,
    /// Set when the frame source ended the scan
    pub source_error: Option<String>,
    /// The stop flag ended the scan
    pub stopped: bool,
    pub elapsed: Duration,
}

/// Matches faces against the known set and forwards sightings to the
/// attendance logger
pub struct RecognitionSession<L: Ledger> {
    known: EncodingSet,
    tolerance: f32,
    throttle: Throttle,
    logger: AttendanceLogger<L>,
    last_message: Option<String>,
    overlay: Overlay,
}

impl<L: Ledger> RecognitionSession<L> {
    pub fn new(
        known: EncodingSet,
        config: &RecognitionConfig,
        logger: AttendanceLogger<L>,
        started: Instant,
    ) -> Self {
        Self {
            known,
            tolerance: config.tolerance,
            throttle: Throttle::new(config.throttle(), started),
            logger,
            last_message: None,
            overlay: Overlay::default(),
        }
    }

    /// Use `overlay` for annotated snapshots
    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    /// Most recent ledger message, shown until replaced
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn logger(&self) -> &AttendanceLogger<L> {
        &self.logger
    }

    /// Nearest known identifier within tolerance
    pub fn identify(&self, embedding: &crate::vision::Embedding) -> Option<(MatchResult, &str)> {
        let best = compare::find_best_match(&self.known.embeddings, embedding, self.tolerance)?;
        let identifier = self.known.identifier(best.index)?;
        Some((best, identifier))
    }

    /// Recognize every face in `frame`. `clock` is the wall-clock time used for
    /// attendance, `now` the monotonic time used for throttling.
    pub fn process_frame<E: FaceEncoder + ?Sized>(
        &mut self,
        frame: &RgbImage,
        encoder: &mut E,
        clock: NaiveDateTime,
        now: Instant,
    ) -> Result<FrameReport, RecognitionError> {
        let mut report = FrameReport::default();

        for face in encoder.encode_faces(frame)? {
            let matched = self
                .identify(&face.embedding)
                .map(|(m, id)| (m, id.to_string()));

            let Some((best, identifier)) = matched else {
                report.faces.push(RecognizedFace {
                    bbox: face.bbox,
                    identity: None,
                    distance: None,
                });
                continue;
            };

            log::debug!("Matched {} at distance {:.3}", identifier, best.distance);

            if self.throttle.check(&identifier, now) {
                let result = self.logger.log(&identifier, clock)?;
                self.last_message = Some(result.outcome.to_string());
                report.logs.push(result);
            }

            report.faces.push(RecognizedFace {
                bbox: face.bbox,
                identity: Some(Identity::decode(&identifier)),
                distance: Some(best.distance),
            });
        }

        Ok(report)
    }

    /// Process frames until a limit in `options` is reached, the stop flag is
    /// set or the source fails. `clock` supplies the wall-clock time for each
    /// frame.
    pub fn run<S, E, C>(
        &mut self,
        source: &mut S,
        encoder: &mut E,
        options: &ScanOptions,
        mut clock: C,
    ) -> Result<ScanSummary, RecognitionError>
    where
        S: FrameSource + ?Sized,
        E: FaceEncoder + ?Sized,
        C: FnMut() -> NaiveDateTime,
    {
        if let Some(dir) = &options.snapshots {
            fs::create_dir_all(dir).map_err(|source| RecognitionError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let started = Instant::now();
        let mut summary = ScanSummary::default();

        loop {
            if options.stop.load(Ordering::Relaxed) {
                log::info!("Scan stopped");
                summary.stopped = true;
                break;
            }
            if options.max_frames.is_some_and(|max| summary.frames >= max) {
                break;
            }
            if options.duration.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }

            let mut frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Stopping scan: {}", e);
                    summary.source_error = Some(e.to_string());
                    break;
                }
            };
            summary.frames += 1;

            let now = clock();
            let report = self.process_frame(&frame, encoder, now, Instant::now())?;
            summary.faces_seen += report.faces.len();
            summary.recognized += report.faces.iter().filter(|f| f.identity.is_some()).count();

            for result in &report.logs {
                log::info!("{}", result.outcome);
                if result.outcome.is_logged() {
                    summary.logged += 1;
                } else {
                    summary.already_logged += 1;
                }
            }

            if let (Some(dir), true) = (&options.snapshots, report.has_known_face()) {
                self.overlay
                    .draw(&mut frame, &report.faces, self.last_message.as_deref());
                let path = dir.join(snapshot_name(now, summary.frames));
                frame.save(&path).map_err(|source| RecognitionError::Snapshot {
                    path: path.clone(),
                    source,
                })?;
                log::debug!("Saved snapshot {}", path.display());
                summary.snapshots_saved += 1;
            }
        }

        summary.elapsed = started.elapsed();
        log::info!(
            "Scan finished: {} frames, {} recognized, {} logged",
            summary.frames,
            summary.recognized,
            summary.logged
        );
        Ok(summary)
    }
}

/// `snapshot_<date>_<time>_<pid>_<frame>.jpg`
fn snapshot_name(at: NaiveDateTime, frame: u64) -> String {
    format!(
        "snapshot_{}_{}_{:06}.jpg",
        at.format("%Y%m%d_%H%M%S"),
        std::process::id(),
        frame
    )
}

/// Annotates frames: a box and name band per face, green for recognized and
/// red for unknown, plus the latest ledger message along the bottom.
/// Without a font only the boxes and bands are drawn.
#[derive(Default)]
pub struct Overlay {
    font: Option<FontVec>,
    size: f32,
}

impl Overlay {
    pub fn load(config: &OverlayConfig) -> Self {
        let font = match fs::read(&config.font_path) {
            Ok(data) => match FontVec::try_from_vec(data) {
                Ok(font) => Some(font),
                Err(e) => {
                    log::warn!("Invalid font {}: {}", config.font_path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!(
                    "Could not read font {}: {}. Labels will not be drawn",
                    config.font_path.display(),
                    e
                );
                None
            }
        };

        Self {
            font,
            size: config.font_size,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Height of a text band
    fn band_height(&self) -> u32 {
        (self.size.max(1.0) as u32) + 2 * TEXT_PADDING
    }

    pub fn draw(&self, frame: &mut RgbImage, faces: &[RecognizedFace], message: Option<&str>) {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let band = self.band_height();

        for face in faces {
            let color = if face.identity.is_some() {
                KNOWN_COLOR
            } else {
                UNKNOWN_COLOR
            };

            let x = face.bbox.x.max(0.0) as i32;
            let y = face.bbox.y.max(0.0) as i32;
            let w = (face.bbox.width as u32).clamp(1, width);
            let h = (face.bbox.height as u32).clamp(1, height);

            // Two-pixel border
            draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(w, h), color);
            if w > 2 && h > 2 {
                draw_hollow_rect_mut(frame, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), color);
            }

            // Name band along the inside of the bottom edge
            let band_h = band.min(h);
            let band_y = y + (h - band_h) as i32;
            draw_filled_rect_mut(frame, Rect::at(x, band_y).of_size(w, band_h), color);
            self.text(frame, x + TEXT_PADDING as i32, band_y + TEXT_PADDING as i32, face.label());
        }

        if let Some(message) = message {
            let band_h = band.min(height);
            let band_y = (height - band_h) as i32;
            draw_filled_rect_mut(
                frame,
                Rect::at(0, band_y).of_size(width, band_h),
                MESSAGE_BACKGROUND,
            );
            self.text(frame, TEXT_PADDING as i32, band_y + TEXT_PADDING as i32, message);
        }
    }

    fn text(&self, frame: &mut RgbImage, x: i32, y: i32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(frame, TEXT_COLOR, x, y, PxScale::from(self.size), font, text);
        }
    }
}
