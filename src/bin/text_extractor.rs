use anyhow::Result;
use clap::Parser;
use shelfharvest::cancel::CancelToken;
use shelfharvest::debug;
use shelfharvest::exit::{self, StageError};
use shelfharvest::models::StageSummary;
use shelfharvest::pipeline;
use shelfharvest::spreadsheet::Persister;
use shelfharvest::tui::StageTUI;
use shelfharvest::vision::{GeminiClient, DEFAULT_MODEL};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Transcribe packaging text from product images")]
struct Args {
    /// Directory holding the product_NNN_* folders
    #[clap(short, long, default_value = "product_images")]
    images_dir: PathBuf,

    /// Vision API key
    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Vision model name
    #[clap(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Pause between images, in milliseconds
    #[clap(long, default_value = "1000")]
    pause_ms: u64,

    /// Stop after this many seconds, keeping the folders finished so far
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

    exit::run_stage("text-extraction", |summary| run(&args, summary))
}

fn run(args: &Args, summary: &mut StageSummary) -> Result<()> {
    if args.api_key.trim().is_empty() {
        return Err(StageError::Usage("GEMINI_API_KEY is empty".to_string()).into());
    }
    let folders = pipeline::require_product_folders(&args.images_dir)?;

    let tui = StageTUI::new("Text extractor");
    tui.header(&format!("{} product folders in {}", folders.len(), args.images_dir.display()))?;

    let client = GeminiClient::new(args.api_key.trim())?.with_model(&args.model);
    let cancel = CancelToken::with_deadline(args.timeout_secs.map(Duration::from_secs));

    pipeline::extract_folder_texts(
        &folders,
        &client,
        Duration::from_millis(args.pause_ms),
        &Persister::default(),
        &cancel,
        &tui,
        summary,
    )?;
    tui.final_summary(summary)?;
    Ok(())
}
