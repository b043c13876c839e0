use anyhow::Result;
use clap::Parser;
use shelfharvest::browser::{BrowserSession, ChromeListingPage};
use shelfharvest::cancel::CancelToken;
use shelfharvest::exit::{self, StageError};
use shelfharvest::folders::ImageDownloader;
use shelfharvest::models::StageSummary;
use shelfharvest::pipeline::{self, ListingOptions};
use shelfharvest::sites::Site;
use shelfharvest::spreadsheet::Persister;
use shelfharvest::tui::StageTUI;
use shelfharvest::debug;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "ShelfHarvest - product listing scraper for quick-commerce and marketplace search")]
struct Args {
    /// Brand or keyword to search for
    #[clap(short, long)]
    query: String,

    /// Site to search
    #[clap(short, long, value_enum, default_value_t = Site::Blinkit)]
    site: Site,

    /// Directory for the output spreadsheets
    #[clap(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Run Chrome without a visible window
    #[clap(long)]
    headless: bool,

    /// Stop after this many seconds, keeping what was collected
    #[clap(short, long)]
    timeout_secs: Option<u64>,

    /// Rounds without new cards before the listing counts as fully loaded
    #[clap(long)]
    max_no_growth_rounds: Option<u32>,

    /// Also download the images of every matched product
    #[clap(long)]
    images: bool,

    /// Directory for product image folders (with --images)
    #[clap(long, default_value = "product_images")]
    images_dir: PathBuf,

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

    exit::run_stage("listing", |summary| run(&args, summary))
}

fn run(args: &Args, summary: &mut StageSummary) -> Result<()> {
    if args.query.trim().is_empty() {
        return Err(StageError::Usage("--query must not be empty".to_string()).into());
    }

    let mut tui = StageTUI::new("ShelfHarvest");
    tui.header(&format!("{} search for {:?}", args.site, args.query.trim()))?;

    let cancel = CancelToken::with_deadline(args.timeout_secs.map(Duration::from_secs));
    let mut harvest = args.site.harvest_options();
    if let Some(rounds) = args.max_no_growth_rounds {
        harvest.max_no_growth_rounds = rounds;
    }
    let options = ListingOptions {
        site: args.site,
        query: args.query.clone(),
        out_dir: args.out_dir.clone(),
        harvest,
    };

    let session = BrowserSession::launch(args.headless)
        .map_err(|e| StageError::Collaborator(format!("browser unavailable: {:#}", e)))?;
    let extractor = args.site.extractor()?;
    let persister = Persister::default();

    let outcome = {
        let mut page = ChromeListingPage::open(&session, args.site, args.query.trim())?;
        pipeline::run_listing_harvest(&mut page, &extractor, &options, &persister, &cancel, &mut tui, summary)?
    };

    println!(
        "📦 {} products total, {} new this run, {} matched",
        outcome.records.len(),
        outcome.new_records,
        outcome.matched_products().len()
    );

    if args.images {
        let products = outcome.matched_products();
        if products.is_empty() {
            tui.warn("No matching products, skipping image download")?;
        } else {
            let image_tui = StageTUI::new("Images");
            image_tui.header(&format!("{} matched products", products.len()))?;
            let downloader = ImageDownloader::new()?;
            let mut images = StageSummary::new("images");
            pipeline::scrape_product_images(
                &session,
                &downloader,
                &products,
                &args.images_dir,
                None,
                &cancel,
                &image_tui,
                &mut images,
            )?;
            image_tui.final_summary(&images)?;
            println!("{}", images.to_line());
        }
    }

    tui.final_summary(summary)?;
    Ok(())
}
