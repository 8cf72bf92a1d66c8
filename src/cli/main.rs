use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use iris_meta::config::{self, StoreOption};
use iris_meta::files;
use iris_meta::metadata::{self, Metadata, RightLeft};
use iris_meta::sync::{SyncCoordinator, SyncEvent};

#[derive(Parser, Debug)]
#[command(
    name = "iris-meta-cli",
    version,
    about = "Show and edit the annotation metadata stored inside iris photos (EXIF + XMP)"
)]
struct Cli {
    /// Photo files or directories
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Override which metadata blocks may be modified
    #[arg(long, value_enum)]
    store_option: Option<StoreOptionArg>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Set the title (empty string removes it)
    #[arg(long)]
    title: Option<String>,

    /// Set the description (empty string removes it)
    #[arg(long)]
    description: Option<String>,

    /// Set the subject (empty string removes it)
    #[arg(long)]
    subject: Option<String>,

    /// Set the comment (empty string removes it)
    #[arg(long)]
    comment: Option<String>,

    /// Set the person (empty string removes it)
    #[arg(long)]
    person: Option<String>,

    /// Which eye the photo shows
    #[arg(long, value_parser = parse_eye)]
    eye: Option<RightLeft>,

    /// Brightness offset, clamped to [-1, 1]
    #[arg(long, allow_hyphen_values = true)]
    brightness: Option<f32>,

    /// Contrast factor, 1 is neutral
    #[arg(long)]
    contrast: Option<f32>,

    /// Overlay color as #RRGGBB or #AARRGGBB
    #[arg(long, value_parser = parse_overlay_color)]
    overlay_color: Option<u32>,

    /// Remove all stored annotations before applying the other edits
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreOptionArg {
    DoNotStore,
    XmpOnly,
    XmpAndExif,
}

impl From<StoreOptionArg> for StoreOption {
    fn from(arg: StoreOptionArg) -> Self {
        match arg {
            StoreOptionArg::DoNotStore => StoreOption::DoNotStore,
            StoreOptionArg::XmpOnly => StoreOption::XmpOnly,
            StoreOptionArg::XmpAndExif => StoreOption::XmpAndExif,
        }
    }
}

fn parse_eye(value: &str) -> Result<RightLeft, String> {
    RightLeft::parse(value).ok_or_else(|| format!("expected 'right' or 'left', got '{value}'"))
}

fn parse_overlay_color(value: &str) -> Result<u32, String> {
    metadata::parse_color(value).ok_or_else(|| format!("expected #RRGGBB or #AARRGGBB, got '{value}'"))
}

impl Cli {
    fn has_edits(&self) -> bool {
        self.clear
            || self.title.is_some()
            || self.description.is_some()
            || self.subject.is_some()
            || self.comment.is_some()
            || self.person.is_some()
            || self.eye.is_some()
            || self.brightness.is_some()
            || self.contrast.is_some()
            || self.overlay_color.is_some()
    }

    fn apply_edits(&self, metadata: &mut Metadata) {
        if self.clear {
            *metadata = Metadata {
                orientation: metadata.orientation,
                ..Default::default()
            };
        }

        let text = |value: &Option<String>, field: &mut Option<String>| {
            if let Some(v) = value {
                *field = (!v.is_empty()).then(|| v.clone());
            }
        };
        text(&self.title, &mut metadata.title);
        text(&self.description, &mut metadata.description);
        text(&self.subject, &mut metadata.subject);
        text(&self.comment, &mut metadata.comment);
        text(&self.person, &mut metadata.person);

        if let Some(eye) = self.eye {
            metadata.right_left = Some(eye);
        }
        if let Some(brightness) = self.brightness {
            metadata.set_brightness(brightness);
        }
        if let Some(contrast) = self.contrast {
            metadata.set_contrast(contrast);
        }
        if let Some(color) = self.overlay_color {
            metadata.overlay_color = Some(color);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unchanged,
    Stored,
    Failed,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Stored => "stored",
            Self::Failed => "failed",
        }
    }
}

struct Report {
    path: PathBuf,
    metadata: Option<Metadata>,
    status: Status,
    error: Option<String>,
    submitted: bool,
}

/// Final status of a photo from the rewrite event received for it.
///
/// Every submitted store ends in exactly one event; a submitted photo without
/// one had its result dropped by a lagging receiver and counts as failed.
fn resolve(submitted: bool, outcome: Option<&SyncEvent>) -> (Status, Option<String>) {
    match outcome {
        Some(SyncEvent::Stored { .. }) => (Status::Stored, None),
        Some(SyncEvent::Failed { reason, .. }) => (Status::Failed, Some(reason.clone())),
        None if submitted => (
            Status::Failed,
            Some("no rewrite result received, file state unknown".to_string()),
        ),
        None => (Status::Unchanged, None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(option) = cli.store_option {
        config.metadata.store_option = option.into();
    }
    let json = cli.json || config.output.json;

    let images = files::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }
    log::debug!("Found {} image(s)", images.len());

    // Room for one result per photo
    config.sync.event_capacity = config.sync.event_capacity.max(images.len());

    let coordinator = SyncCoordinator::builder().from_config(&config).build()?;
    let mut events = coordinator.subscribe();

    let mut reports: Vec<Report> = Vec::with_capacity(images.len());
    let mut submitted = 0;

    for image_path in &images {
        let mut report = Report {
            path: image_path.clone(),
            metadata: None,
            status: Status::Unchanged,
            error: None,
            submitted: false,
        };

        match coordinator.get(image_path) {
            Ok(mut metadata) => {
                if cli.has_edits() {
                    cli.apply_edits(&mut metadata);
                    if coordinator.store_if_changed(image_path, metadata) {
                        report.submitted = true;
                        submitted += 1;
                    }
                }
            }
            Err(e) => {
                log::error!("{e}");
                report.status = Status::Failed;
                report.error = Some(e.to_string());
            }
        }

        reports.push(report);
    }

    if cli.has_edits() && !config.metadata.store_option.writes_files() {
        log::warn!("store_option is do_not_store, no file was modified");
    }

    // Collect outcomes, keyed by the canonical path the events carry
    let mut outcomes: HashMap<PathBuf, SyncEvent> = HashMap::new();
    if submitted > 0 {
        log::info!("Storing metadata of {submitted} photo(s)");
        let idle = coordinator.wait_idle();
        tokio::pin!(idle);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => record(&mut outcomes, event),
                    Err(RecvError::Lagged(n)) => log::warn!("Missed {n} rewrite results"),
                    Err(RecvError::Closed) => break,
                },
                _ = &mut idle => break,
            }
        }
        loop {
            match events.try_recv() {
                Ok(event) => record(&mut outcomes, event),
                Err(TryRecvError::Lagged(n)) => log::warn!("Missed {n} rewrite results"),
                Err(_) => break,
            }
        }
    }

    for report in &mut reports {
        if report.status == Status::Failed {
            continue;
        }
        let outcome = outcomes.get(&files::canonical_path(&report.path));
        (report.status, report.error) = resolve(report.submitted, outcome);
        // Re-read after the rewrite, so the output shows what is on disk
        match coordinator.get(&report.path) {
            Ok(metadata) => report.metadata = Some(metadata),
            Err(e) => report.error = Some(e.to_string()),
        }
    }

    if json {
        let json_reports: Vec<serde_json::Value> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "path": r.path.display().to_string(),
                    "status": r.status.as_str(),
                    "metadata": r.metadata,
                    "orientation": r.metadata.as_ref().and_then(|m| m.orientation),
                    "error": r.error,
                })
            })
            .collect();

        println!("{}", serde_json::to_string_pretty(&json_reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    let total = reports.len();
    let stored = reports.iter().filter(|r| r.status == Status::Stored).count();
    let failed = reports.iter().filter(|r| r.status == Status::Failed).count();
    if cli.has_edits() {
        log::info!("Done: {stored} stored, {failed} failed out of {total} photos");
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} photo(s) failed");
    }

    Ok(())
}

fn record(outcomes: &mut HashMap<PathBuf, SyncEvent>, event: SyncEvent) {
    let path = match &event {
        SyncEvent::Stored { path } | SyncEvent::Failed { path, .. } => path.clone(),
    };
    outcomes.insert(path, event);
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print the metadata of one photo, organized by section.
fn print_report(report: &Report) {
    println!();
    let status = match report.status {
        Status::Unchanged => String::new(),
        Status::Stored => format!("  {GREEN}(stored){RESET}"),
        Status::Failed => format!("  {RED}(failed){RESET}"),
    };
    println!("{BOLD}File:{RESET} {}{status}", report.path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    if let Some(ref error) = report.error {
        print_row("Error", error);
        println!();
    }

    let Some(ref m) = report.metadata else {
        return;
    };

    let fmt = |v: Option<f32>| v.map(|v| format!("{v:.4}"));

    print_section(
        "Description",
        &[
            ("Title", m.title.clone()),
            ("Description", m.description.clone()),
            ("Subject", m.subject.clone()),
            ("Comment", m.comment.clone()),
            ("Person", m.person.clone()),
            ("Eye", m.right_left.map(|e| e.as_str().to_string())),
            ("OrganizeDate", m.organize_date.map(|d| d.to_string())),
        ],
    );

    print_section(
        "Overlay",
        &[
            ("Center", pair(m.x_center, m.y_center)),
            ("ScaleFactor", fmt(m.overlay_scale_factor)),
            ("Color", m.overlay_color.map(metadata::format_color)),
            ("PupilSize", fmt(m.pupil_size)),
            ("PupilOffset", pair(m.pupil_x_offset, m.pupil_y_offset)),
            ("Flags", describe_flags(m)),
        ],
    );

    print_section(
        "View",
        &[
            ("Position", pair(m.x_position, m.y_position)),
            ("Zoom", fmt(m.zoom_factor)),
            ("Brightness", fmt(m.brightness)),
            ("Contrast", fmt(m.contrast)),
            ("Orientation", m.orientation.map(|o| o.to_string())),
        ],
    );

    if m.is_empty() {
        println!("  {DIM}(no annotations stored){RESET}");
        println!();
    }
}

fn print_section(title: &str, fields: &[(&str, Option<String>)]) {
    if fields.iter().all(|(_, v)| v.is_none()) {
        return;
    }
    println!("  {BOLD}{title}{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(70));
    for (tag, val) in fields {
        if let Some(v) = val {
            print_row(tag, v);
        }
    }
    println!();
}

fn pair(x: Option<f32>, y: Option<f32>) -> Option<String> {
    match (x, y) {
        (Some(x), Some(y)) => Some(format!("{x:.4}, {y:.4}")),
        _ => None,
    }
}

fn describe_flags(m: &Metadata) -> Option<String> {
    let names: Vec<&str> = [
        (metadata::FLAG_OVERLAY_SET_BY_CAMERA, "set by camera"),
        (metadata::FLAG_OVERLAY_POSITION_DETERMINED_AUTOMATICALLY, "automatic"),
        (metadata::FLAG_OVERLAY_POSITION_LOCKED, "locked"),
    ]
    .into_iter()
    .filter(|(flag, _)| m.has_flag(*flag))
    .map(|(_, name)| name)
    .collect();

    (!names.is_empty()).then(|| names.join(", "))
}

/// Print a single row in the metadata table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
