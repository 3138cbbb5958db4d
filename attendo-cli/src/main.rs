use attendo_core::config::Config;
use attendo_core::enrollment::EnrollmentForm;
use attendo_core::recognition::ScanOptions;
use attendo_core::{parse_timestamp, AttendanceStation};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "attendo")]
#[command(about = "Face recognition attendance for classrooms", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the system/user ones
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student and capture face samples
    Enroll {
        /// Ticket number
        ticket: String,
        /// Full name (quote multi-word names)
        name: String,
        /// Department
        department: String,
        /// Section
        section: String,
    },
    /// Rebuild face encodings from the dataset
    Encode,
    /// Recognize faces from the camera and mark attendance
    Scan {
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Save annotated frames with recognized faces here
        #[arg(long)]
        snapshots: Option<PathBuf>,
    },
    /// Mark attendance for an identifier without the camera
    Log {
        /// Identifier, e.g. 1001_Alex_Kim_CS_A
        identifier: String,
        /// Timestamp as "YYYY-MM-DD HH:MM:SS" (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Show the attendance ledger
    Report {
        /// Only rows for this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// List enrolled students
    Students,
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let result = match cli.command {
        Commands::Enroll {
            ticket,
            name,
            department,
            section,
        } => cmd_enroll(
            cli.config,
            EnrollmentForm::new(&ticket, &name, &department, &section),
        ),
        Commands::Encode => cmd_encode(cli.config),
        Commands::Scan {
            max_frames,
            duration,
            snapshots,
        } => cmd_scan(
            cli.config,
            ScanOptions {
                max_frames,
                duration: duration.map(Duration::from_secs),
                snapshots,
                ..Default::default()
            },
        ),
        Commands::Log { identifier, at } => cmd_log(cli.config, identifier, at),
        Commands::Report { date } => cmd_report(cli.config, date),
        Commands::Students => cmd_students(cli.config),
        Commands::Config { validate } => cmd_config(cli.config, validate),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<attendo_core::Error>() {
                Some(core) => eprintln!("Error ({:?}): {}", core.kind(), core),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config, attendo_core::Error> {
    let config = match path {
        Some(path) => Config::load_file(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn station(path: Option<PathBuf>) -> Result<AttendanceStation, attendo_core::Error> {
    AttendanceStation::new(load_config(path)?)
}

fn cmd_enroll(config: Option<PathBuf>, form: EnrollmentForm) -> anyhow::Result<()> {
    let mut station = station(config)?;
    println!("Enrolling: {}", form.full_name.trim());

    let report = station.enroll(&form)?;

    println!("\n✓ Student enrolled: {}", report.registration.identifier);
    println!("Samples saved to: {}", report.registration.directory.display());
    for warning in &report.registration.warnings {
        println!("⚠ {}", warning);
    }
    println!(
        "Encodings rebuilt: {} faces from {} students",
        report.rebuild.faces_encoded, report.rebuild.students
    );
    Ok(())
}

fn cmd_encode(config: Option<PathBuf>) -> anyhow::Result<()> {
    let mut station = station(config)?;
    let (set, report) = station.rebuild_encodings()?;

    println!("✓ Encoding complete in {:.2}s", report.elapsed.as_secs_f64());
    println!("Students:           {}", report.students);
    println!("Faces encoded:      {}", set.len());
    println!("Images without face: {}", report.images_without_face);
    println!("Unreadable images:  {}", report.images_unreadable);
    Ok(())
}

fn cmd_scan(config: Option<PathBuf>, options: ScanOptions) -> anyhow::Result<()> {
    let mut station = station(config)?;

    let stop = Arc::clone(&options.stop);
    ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))?;
    println!("Scanning... press Ctrl+C to stop");

    let summary = station.scan(&options)?;

    println!();
    println!("Frames processed: {}", summary.frames);
    println!("Faces recognized: {}/{}", summary.recognized, summary.faces_seen);
    println!("Attendance logged: {}", summary.logged);
    println!("Already logged:    {}", summary.already_logged);
    if summary.snapshots_saved > 0 {
        println!("📷 Snapshots saved: {}", summary.snapshots_saved);
    }
    if let Some(reason) = summary.source_error {
        println!("Camera stopped: {}", reason);
    }
    if summary.stopped {
        println!("Interrupted");
    }
    println!("Total time: {:.1}s", summary.elapsed.as_secs_f64());
    Ok(())
}

fn cmd_log(config: Option<PathBuf>, identifier: String, at: Option<String>) -> anyhow::Result<()> {
    let station = station(config)?;
    let at = match at {
        Some(value) => parse_timestamp(&value)?,
        None => chrono::Local::now().naive_local(),
    };

    let result = station.log_attendance(&identifier, at)?;
    for warning in &result.warnings {
        println!("⚠ {}", warning);
    }
    println!("{}", result.outcome);
    Ok(())
}

fn cmd_report(config: Option<PathBuf>, date: Option<String>) -> anyhow::Result<()> {
    let station = station(config)?;
    let (rows, warning) = station.report(date.as_deref());
    if let Some(warning) = warning {
        println!("⚠ {}", warning);
    }

    if rows.is_empty() {
        println!("No attendance recorded");
        return Ok(());
    }

    println!(
        "{:<10} {:<20} {:<8} {:<4} {:<10} {:<9} {:<8} {:<7} {}",
        "Ticket", "Name", "Dept", "Sec", "Date", "Day", "Time", "Status", "Type"
    );
    println!("{}", "-".repeat(90));
    for r in rows {
        println!(
            "{:<10} {:<20} {:<8} {:<4} {:<10} {:<9} {:<8} {:<7} {}",
            r.ticket_id,
            r.display_name,
            r.department,
            r.section,
            r.date,
            r.weekday,
            r.time,
            r.status.as_str(),
            r.entry_type.as_str()
        );
    }
    Ok(())
}

fn cmd_students(config: Option<PathBuf>) -> anyhow::Result<()> {
    let station = station(config)?;
    let (students, warning) = station.students();
    if let Some(warning) = warning {
        println!("⚠ {}", warning);
    }

    if students.is_empty() {
        println!("No students enrolled");
        return Ok(());
    }

    println!("{:<10} {:<25} {:<10} {}", "Ticket", "Full Name", "Dept", "Section");
    println!("{}", "-".repeat(55));
    for s in students {
        println!(
            "{:<10} {:<25} {:<10} {}",
            s.ticket_id, s.full_name, s.department, s.section
        );
    }
    Ok(())
}

fn cmd_config(path: Option<PathBuf>, validate: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;

    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[windows]");
    println!(
        "  check_in = {} - {}",
        config.windows.check_in.start, config.windows.check_in.end
    );
    println!(
        "  check_out = {} - {}",
        config.windows.check_out.start, config.windows.check_out.end
    );
    println!();

    println!("[recognition]");
    println!("  tolerance = {}", config.recognition.tolerance);
    println!("  throttle = {}s", config.recognition.throttle_secs);
    println!("  detection_scale = {}", config.recognition.detection_scale);
    println!();

    println!("[enrollment]");
    println!("  images_to_capture = {}", config.enrollment.images_to_capture);
    println!("  capture_interval = {}ms", config.enrollment.capture_interval_ms);
    println!();

    println!("[camera]");
    println!("  device = {:?}", config.camera.device);
    println!("  resolution = {}x{}", config.camera.width, config.camera.height);
    println!();

    println!("[detection]");
    println!("  model = {:?}", config.detection.model_path);
    println!(
        "  confidence_threshold = {}",
        config.detection.confidence_threshold
    );
    println!();

    println!("[embedding]");
    println!("  model = {:?}", config.embedding.model_path);
    println!();

    println!("[overlay]");
    println!("  font = {:?}", config.overlay.font_path);
    println!("  font_size = {}", config.overlay.font_size);
    println!();

    println!("[storage]");
    println!("  dataset_dir = {:?}", config.storage.dataset_dir);
    println!("  encodings_path = {:?}", config.storage.encodings_path);
    println!("  ledger_path = {:?}", config.storage.ledger_path);
    println!("  details_path = {:?}", config.storage.details_path);

    Ok(())
}
