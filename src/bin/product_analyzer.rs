use anyhow::Result;
use clap::Parser;
use shelfharvest::browser::BrowserSession;
use shelfharvest::cancel::CancelToken;
use shelfharvest::debug;
use shelfharvest::debug_println;
use shelfharvest::exit::{self, StageError};
use shelfharvest::models::StageSummary;
use shelfharvest::pipeline;
use shelfharvest::spreadsheet::Persister;
use shelfharvest::tui::StageTUI;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Collect ratings and specifications from product pages")]
struct Args {
    /// Brand whose {brand}_filtered_products.xlsx is read
    #[clap(short, long)]
    brand: String,

    /// Product name for the output file (defaults to the brand)
    #[clap(short, long)]
    product: Option<String>,

    /// Directory holding the listing outputs and receiving the analysis
    #[clap(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Run Chrome without a visible window
    #[clap(long)]
    headless: bool,

    /// Stop after this many seconds, keeping the rows analyzed so far
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

    exit::run_stage("analysis", |summary| run(&args, summary))
}

fn run(args: &Args, summary: &mut StageSummary) -> Result<()> {
    let brand = pipeline::brand_key(&args.brand);
    let input = args.out_dir.join(pipeline::filtered_products_file(&brand));
    let products = pipeline::load_products(&input)?;
    let product = args
        .product
        .as_deref()
        .map(pipeline::brand_key)
        .unwrap_or_else(|| brand.clone());
    let output = args.out_dir.join(pipeline::analysis_file(&product));

    let tui = StageTUI::new("Product analyzer");
    tui.header(&format!("{} products from {}", products.len(), input.display()))?;

    let cancel = CancelToken::with_deadline(args.timeout_secs.map(Duration::from_secs));
    let session = BrowserSession::launch(args.headless)
        .map_err(|e| StageError::Collaborator(format!("browser unavailable: {:#}", e)))?;

    let written = pipeline::analyze_products(
        &session,
        &products,
        &output,
        &Persister::default(),
        &cancel,
        &tui,
        summary,
    )?;
    debug_println!("Final output: {}", written.display());
    tui.final_summary(summary)?;
    Ok(())
}
