use anyhow::Result;
use clap::Parser;
use shelfharvest::debug;
use shelfharvest::debug_println;
use shelfharvest::exit::{self, StageError};
use shelfharvest::models::StageSummary;
use shelfharvest::pipeline;
use shelfharvest::spreadsheet::{self, Persister};
use shelfharvest::tui::StageTUI;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Merge extracted image text into the product analysis")]
struct Args {
    /// Product name of {product}_product_analysis.xlsx (first one found if omitted)
    #[clap(short, long)]
    product: Option<String>,

    /// Directory holding the analysis file and receiving the merged file
    #[clap(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Directory holding the product_NNN_* folders
    #[clap(short, long, default_value = "product_images")]
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

    exit::run_stage("merge", |summary| run(&args, summary))
}

fn run(args: &Args, summary: &mut StageSummary) -> Result<()> {
    let product = args.product.as_deref().map(pipeline::brand_key);
    let (analysis_path, product) = pipeline::find_analysis_file(&args.out_dir, product.as_deref())?;
    let analysis = spreadsheet::load(&analysis_path)?
        .ok_or_else(|| StageError::MissingInput(format!("{} not found", analysis_path.display())))?;
    let folders = pipeline::require_product_folders(&args.images_dir)?;

    let tui = StageTUI::new("Text merger");
    tui.header(&format!(
        "{} rows from {}, {} folders",
        analysis.len(),
        analysis_path.display(),
        folders.len()
    ))?;

    let merged = pipeline::merge_extracted_text(&analysis, &folders, pipeline::load_folder_texts, summary);
    let written = Persister::default().save(&merged, &args.out_dir.join(pipeline::merged_file(&product)))?;

    debug_println!("Final output: {}", written.display());
    tui.final_summary(summary)?;
    Ok(())
}
