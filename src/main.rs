use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use flume::{Receiver, RecvTimeoutError};
use log::{info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use pagevault::pdf::{DocumentRef, DocumentSource, MupdfRasterizer, QualityTier, RenderConfig};
use pagevault::{SessionEvent, ViewerIdentity, ViewerSession, WatermarkedPage, panic_handler, settings};

/// Slack added on top of the configured budgets while waiting for events
const WAIT_SLACK: Duration = Duration::from_secs(1);

/// Render watermarked pages of a PDF the way the viewer shows them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PDF document to open
    pdf: PathBuf,

    /// Page to render (1-based, repeatable, clamped to the document)
    #[arg(short, long = "page")]
    pages: Vec<u32>,

    /// Directory for the rendered PNG files
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Viewer identity shown in the visible watermarks
    #[arg(long)]
    email: Option<String>,

    /// Viewer id encoded in the forensic mark
    #[arg(long)]
    user_id: Option<String>,

    /// Brand label, overriding the configured one
    #[arg(long)]
    label: Option<String>,

    /// Settings file to use instead of the user config
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "pagevault.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    panic_handler::initialize_panic_handler();
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("cannot create log file {}", args.log_file.display()))?,
    )?;
    info!("Starting pagevault");

    match &args.config {
        Some(path) => settings::load_settings_from_path(path),
        None => settings::load_settings(),
    }
    let config = settings::render_config();
    let label = args
        .label
        .clone()
        .unwrap_or_else(settings::get_watermark_label);

    fs::create_dir_all(&args.out)
        .with_context(|| format!("cannot create output directory {}", args.out.display()))?;

    let document = document_ref(&args.pdf);
    println!("Opening {} ({})", args.pdf.display(), document.display_size());

    let session = ViewerSession::open(
        document,
        Arc::new(MupdfRasterizer),
        config.clone(),
        label,
        ViewerIdentity::new(args.email.clone(), args.user_id.clone()),
    );
    let events = session.subscribe();

    let total_pages = wait_for_open(&events, config.metadata_timeout + WAIT_SLACK)?;
    println!("{total_pages} pages");

    let requested = if args.pages.is_empty() {
        vec![1]
    } else {
        args.pages.clone()
    };
    let mut seen = HashSet::new();
    for page in requested
        .into_iter()
        .map(|p| p.clamp(1, total_pages))
        .filter(|p| seen.insert(*p))
    {
        session.go_to_page(page);
        match wait_for_page(&events, page, &config)? {
            Some(image) => {
                let path = save_page(&args.out, &image)?;
                println!("Page {page}: {} -> {}", image.tier, path.display());
            }
            None => println!("Page {page}: unavailable"),
        }
    }

    session.close();
    info!("Shutting down pagevault");
    Ok(())
}

fn document_ref(path: &Path) -> DocumentRef {
    let id = path
        .file_stem()
        .map_or_else(|| "document".to_string(), |s| s.to_string_lossy().into_owned());
    let mut document = DocumentRef::new(id, DocumentSource::Path(path.to_path_buf()));
    document.title = path.file_name().map(|s| s.to_string_lossy().into_owned());
    document.byte_size = fs::metadata(path).ok().map(|m| m.len());
    document
}

fn wait_for_open(events: &Receiver<SessionEvent>, timeout: Duration) -> Result<u32> {
    let deadline = Instant::now() + timeout;
    loop {
        match events.recv_deadline(deadline) {
            Ok(SessionEvent::Opened { total_pages }) => return Ok(total_pages),
            Ok(SessionEvent::OpenFailed { reason }) => bail!("cannot open document: {reason}"),
            Ok(SessionEvent::Closed) => bail!("session closed while opening"),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => bail!("timed out opening document"),
            Err(RecvTimeoutError::Disconnected) => bail!("session went away"),
        }
    }
}

/// Wait for the final render of `page`, settling for the preview when the
/// upgrade does not arrive in time. `None` means the page is unavailable.
fn wait_for_page(
    events: &Receiver<SessionEvent>,
    page: u32,
    config: &RenderConfig,
) -> Result<Option<Arc<WatermarkedPage>>> {
    let budget =
        config.preview_timeout + config.upgrade_delay + config.final_timeout * 2 + WAIT_SLACK;
    let mut deadline = Instant::now() + budget;
    let mut preview = None;

    loop {
        match events.recv_deadline(deadline) {
            Ok(SessionEvent::PageReady {
                page: ready,
                tier,
                image,
            }) if ready == page => {
                if tier == QualityTier::Final {
                    return Ok(Some(image));
                }
                preview = Some(image);
                // Once the preview is up only the upgrade is left to wait for.
                deadline = Instant::now() + config.upgrade_delay + config.final_timeout + WAIT_SLACK;
            }
            Ok(SessionEvent::PageUnavailable { page: failed }) if failed == page => return Ok(None),
            Ok(SessionEvent::Closed) => bail!("session closed"),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                if preview.is_none() {
                    warn!("No render of page {page} arrived in time");
                }
                return Ok(preview);
            }
            Err(RecvTimeoutError::Disconnected) => bail!("session went away"),
        }
    }
}

fn save_page(dir: &Path, page: &WatermarkedPage) -> Result<PathBuf> {
    let path = dir.join(format!("page-{:04}-{}.png", page.page_number, page.tier));
    page.image
        .save_with_format(&path, image::ImageFormat::Png)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}
