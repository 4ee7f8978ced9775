use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use fullgrab::fetch::{load_page, PageSource};
use fullgrab::host::LocalHost;
use fullgrab::orchestrator::{CaptureReport, Orchestrator};
use fullgrab::storage::FileStore;
use fullgrab::{CaptureConfig, Viewport};

#[derive(Parser)]
#[command(name = "fullgrab", version, about = "Capture a web page as one seamless image")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scroll through the whole page and stitch the frames
    Full(CaptureArgs),
    /// Capture only the visible viewport
    Visible(CaptureArgs),
}

#[derive(Args)]
struct CaptureArgs {
    /// http(s) URL, file:// URL or path to an HTML file
    source: String,
    /// Where to write the PNG
    #[arg(short, long, default_value = "capture.png")]
    out: PathBuf,
    /// Directory to persist the capture record in
    #[arg(long)]
    store: Option<PathBuf>,
    /// Viewport width in CSS pixels
    #[arg(long)]
    width: Option<u32>,
    /// Viewport height in CSS pixels
    #[arg(long)]
    height: Option<u32>,
    /// Device pixel ratio
    #[arg(long)]
    dpr: Option<f64>,
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl CaptureArgs {
    fn config(&self) -> Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::from_json_file(path)?,
            None => CaptureConfig::default(),
        };
        config.viewport = Viewport {
            width: self.width.unwrap_or(config.viewport.width),
            height: self.height.unwrap_or(config.viewport.height),
        };
        if let Some(dpr) = self.dpr {
            config.device_pixel_ratio = dpr;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let (args, full) = match &cli.command {
        Command::Full(args) => (args, true),
        Command::Visible(args) => (args, false),
    };

    let config = args.config()?;
    let source = PageSource::parse(&args.source)?;
    // the blocking HTTP client must run outside the async runtime
    let page = load_page(&source, &config).with_context(|| format!("loading {}", args.source))?;

    let store_dir = args.store.clone().unwrap_or_else(|| PathBuf::from(".fullgrab"));
    let store = Arc::new(FileStore::open(&store_dir)?);
    let host = Arc::new(LocalHost::new(config.scroll_settle()));
    host.open_tab(page.document, &page.url)?;
    let orchestrator = Orchestrator::new(host, store.clone(), config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let report: CaptureReport = runtime.block_on(async {
        if full {
            orchestrator.capture_full_page().await
        } else {
            orchestrator.capture_visible().await
        }
    })?;

    std::fs::write(&args.out, &report.image)
        .with_context(|| format!("writing {}", args.out.display()))?;
    info!("capture record saved to {}", store.path().display());
    println!(
        "{}: {} frame(s){} -> {}",
        if report.page_title.is_empty() { &report.page_url } else { &report.page_title },
        report.frames.len(),
        report
            .termination
            .map(|t| format!(", stopped: {:?}", t))
            .unwrap_or_default(),
        args.out.display()
    );
    Ok(())
}
