use anyhow::Result;
use clap::Parser;
use shelfharvest::browser::BrowserSession;
use shelfharvest::cancel::CancelToken;
use shelfharvest::debug;
use shelfharvest::exit::{self, StageError};
use shelfharvest::folders::ImageDownloader;
use shelfharvest::models::StageSummary;
use shelfharvest::pipeline;
use shelfharvest::tui::StageTUI;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Download product images into per-product folders")]
struct Args {
    /// Brand whose {brand}_filtered_products.xlsx is read
    #[clap(short, long)]
    brand: String,

    /// Directory holding the listing outputs
    #[clap(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Directory for product image folders
    #[clap(short, long, default_value = "product_images")]
    images_dir: PathBuf,

    /// Maximum images to download per product
    #[clap(short, long)]
    max_images: Option<usize>,

    /// Run Chrome without a visible window
    #[clap(long)]
    headless: bool,

    /// Stop after this many seconds, keeping what was downloaded
    #[clap(short, long)]
    timeout_secs: Option<u64>,

    /// Enable debug output
    #[clap(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = match exit::parse_args::<Args>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    debug::init(args.debug);

    exit::run_stage("images", |summary| run(&args, summary))
}

fn run(args: &Args, summary: &mut StageSummary) -> Result<()> {
    let brand = pipeline::brand_key(&args.brand);
    let input = args.out_dir.join(pipeline::filtered_products_file(&brand));
    let products = pipeline::load_products(&input)?;

    let tui = StageTUI::new("Image scraper");
    tui.header(&format!("{} products from {}", products.len(), input.display()))?;
    if products.is_empty() {
        tui.warn("Nothing to download")?;
        return Ok(());
    }

    let cancel = CancelToken::with_deadline(args.timeout_secs.map(Duration::from_secs));
    let session = BrowserSession::launch(args.headless)
        .map_err(|e| StageError::Collaborator(format!("browser unavailable: {:#}", e)))?;
    let downloader = ImageDownloader::new()?;

    pipeline::scrape_product_images(
        &session,
        &downloader,
        &products,
        &args.images_dir,
        args.max_images,
        &cancel,
        &tui,
        summary,
    )?;
    tui.final_summary(summary)?;
    println!("📁 Images saved under {}", args.images_dir.display());
    Ok(())
}
