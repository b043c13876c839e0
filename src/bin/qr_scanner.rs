use anyhow::Result;
use chrono::Local;
use clap::Parser;
use shelfharvest::cancel::CancelToken;
use shelfharvest::debug;
use shelfharvest::debug_println;
use shelfharvest::exit;
use shelfharvest::models::StageSummary;
use shelfharvest::pipeline;
use shelfharvest::qr::{self, HttpResolver};
use shelfharvest::spreadsheet::Persister;
use shelfharvest::tui::StageTUI;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Find QR codes in product images and resolve their links")]
struct Args {
    /// Directory holding the product_NNN_* folders
    #[clap(short, long, default_value = "product_images")]
    images_dir: PathBuf,

    /// Directory receiving the results sheet
    #[clap(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Stop after this many seconds, keeping the folders scanned so far
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

    exit::run_stage("qr-scan", |summary| run(&args, summary))
}

fn run(args: &Args, summary: &mut StageSummary) -> Result<()> {
    let folders = pipeline::require_product_folders(&args.images_dir)?;

    let tui = StageTUI::new("QR scanner");
    tui.header(&format!("{} product folders in {}", folders.len(), args.images_dir.display()))?;

    let resolver = HttpResolver::new()?;
    let cancel = CancelToken::with_deadline(args.timeout_secs.map(Duration::from_secs));
    let rows = pipeline::scan_qr_codes(&folders, &resolver, &cancel, &tui, summary);

    let output = args
        .out_dir
        .join(pipeline::qr_results_file(Local::now().naive_local()));
    let written = Persister::default().save(&qr::to_sheet(&rows), &output)?;

    debug_println!("Final output: {}", written.display());
    tui.final_summary(summary)?;
    Ok(())
}
