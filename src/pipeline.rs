//! Stage orchestration: file-name conventions between stages and the
//! per-item loops each binary runs.
//!
//! Every loop recovers per item and records the outcome in the stage's
//! [`StageSummary`]; only a missing upstream file aborts a stage.

use crate::cancel::CancelToken;
use crate::dedup::{dedupe, Deduplicator};
use crate::exit::StageError;
use crate::extractor::CardExtractor;
use crate::folders::{self, find_folder, prepare_folder, save_images, ImageFetcher, ProductFolder};
use crate::harvester::{harvest, HarvestOptions, ListingPage, StopReason};
use crate::matcher::Matcher;
use crate::models::{ListingItem, ProductRecord, ProductRow, StageSummary, LINK_HEADERS};
use crate::product_page::{ProductAnalysis, ProductPage, ANALYSIS_HEADERS};
use crate::qr::{self, CodeRow, UrlResolver};
use crate::sites::Site;
use crate::spreadsheet::{self, Persister, Sheet, SheetWriter};
use crate::tui::{progress_bar, StageTUI};
use crate::vision::{self, TextExtractor};
use crate::contacts::Contacts;
use crate::{debug_eprintln, debug_println};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const QR_RESULTS_PREFIX: &str = "qr_barcode_results_";
pub const PRODUCT_HEADERS: [&str; 2] = ["title", "url"];
pub const CONTACT_COLUMN: &str = "phone_fssai_check";
pub const NO_TEXT_DATA: &str = "No text data available";
pub const NO_FOLDER_MATCH: &str = "No folder match";
const ANALYSIS_SUFFIX: &str = "_product_analysis.xlsx";
const ANALYSIS_FALLBACK_SUFFIX: &str = "_product_analysis.csv";

/// File-name key for a query: spaces become underscores.
pub fn brand_key(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join("_")
}

pub fn links_file(brand: &str) -> String {
    format!("{}_links.xlsx", brand)
}

pub fn filtered_links_file(brand: &str) -> String {
    format!("{}_links_filtered.xlsx", brand)
}

pub fn filtered_products_file(brand: &str) -> String {
    format!("{}_filtered_products.xlsx", brand)
}

pub fn analysis_file(product: &str) -> String {
    format!("{}{}", product, ANALYSIS_SUFFIX)
}

pub fn merged_file(product: &str) -> String {
    format!("{}_merged_analysis.xlsx", product)
}

pub fn qr_results_file(at: NaiveDateTime) -> String {
    format!("{}{}.xlsx", QR_RESULTS_PREFIX, at.format("%Y%m%d_%H%M%S"))
}

/// Product name of a `{product}_product_analysis.xlsx` file or of its CSV
/// fallback.
pub fn product_of_analysis_file(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(ANALYSIS_SUFFIX)
        .or_else(|| file_name.strip_suffix(ANALYSIS_FALLBACK_SUFFIX))
        .filter(|product| !product.is_empty())
}

/// The analysis file for `product`, or the first one found in `dir`.
///
/// The returned path is the file actually on disk, which is the CSV
/// fallback when the analyzer could not write the workbook.
pub fn find_analysis_file(dir: &Path, product: Option<&str>) -> Result<(PathBuf, String)> {
    if let Some(product) = product {
        let path = dir.join(analysis_file(product));
        let found = spreadsheet::existing_path(&path)
            .ok_or_else(|| StageError::MissingInput(format!("{} not found", path.display())))?;
        return Ok((found, product.to_string()));
    }

    let mut products: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            product_of_analysis_file(&name).map(str::to_string)
        })
        .collect();
    products.sort();
    products
        .into_iter()
        .find_map(|product| {
            let found = spreadsheet::existing_path(&dir.join(analysis_file(&product)))?;
            Some((found, product))
        })
        .ok_or_else(|| {
            StageError::MissingInput(format!(
                "no *{} in {}; run the product analyzer first",
                ANALYSIS_SUFFIX,
                dir.display()
            ))
            .into()
        })
}

pub fn products_sheet<'a, I>(rows: I) -> Sheet
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sheet = Sheet::new(&PRODUCT_HEADERS);
    for (title, url) in rows {
        sheet.push_row(vec![title.to_string(), url.to_string()]);
    }
    sheet
}

/// Reads the `title`/`url` rows a previous stage produced.
///
/// Rows without a URL are dropped; the index of each row stays its
/// 1-based position in the file so it lines up with the folder names.
pub fn load_products(path: &Path) -> Result<Vec<ProductRow>> {
    let sheet = spreadsheet::load(path)?
        .ok_or_else(|| StageError::MissingInput(format!("{} not found", path.display())))?;
    if sheet.column("url").is_none() {
        return Err(StageError::MissingInput(format!("{} has no url column", path.display())).into());
    }

    Ok((0..sheet.len())
        .filter_map(|row| {
            let url = sheet.cell(row, "url")?.trim();
            if url.is_empty() {
                return None;
            }
            Some(ProductRow {
                index: row + 1,
                title: sheet.cell(row, "title").unwrap_or_default().trim().to_string(),
                url: url.to_string(),
            })
        })
        .collect())
}

/// Sleeps a randomized interval between page visits; `false` if cancelled.
pub fn polite_delay(cancel: &CancelToken, min_ms: u64, max_ms: u64) -> bool {
    let ms = if max_ms > min_ms {
        rand::thread_rng().gen_range(min_ms..max_ms)
    } else {
        min_ms
    };
    cancel.sleep(Duration::from_millis(ms))
}

#[derive(Debug, Clone)]
pub struct ListingOptions {
    pub site: Site,
    pub query: String,
    pub out_dir: PathBuf,
    pub harvest: HarvestOptions,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            site: Site::Blinkit,
            query: String::new(),
            out_dir: PathBuf::from("."),
            harvest: HarvestOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct ListingOutcome {
    /// Every unique record, earlier runs first.
    pub records: Vec<ProductRecord>,
    pub new_records: usize,
    pub links_path: PathBuf,
    pub filtered_links_path: PathBuf,
    pub products_path: PathBuf,
    pub stop: StopReason,
}

impl ListingOutcome {
    /// Matched records as stage hand-off rows, indexed by position.
    pub fn matched_products(&self) -> Vec<ProductRow> {
        self.records
            .iter()
            .filter(|r| r.matched)
            .enumerate()
            .map(|(i, r)| ProductRow {
                index: i + 1,
                title: r.item.title.clone(),
                url: r.url.clone(),
            })
            .collect()
    }
}

fn record_from_link_row(sheet: &Sheet, row: usize) -> Option<ProductRecord> {
    let url = sheet.cell(row, "Product URL")?.trim().to_string();
    if url.is_empty() {
        return None;
    }
    let optional = |name: &str| {
        sheet
            .cell(row, name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Some(ProductRecord {
        item: ListingItem {
            identifier: url.clone(),
            title: optional("Title").unwrap_or_default(),
            price: optional("Price"),
            pack: optional("Pack"),
            available: optional("In Stock").map_or(true, |v| v.eq_ignore_ascii_case("yes")),
            raw_link: Some(url.clone()),
        },
        url,
        matched: false,
    })
}

fn links_sheet<'a, I: IntoIterator<Item = &'a ProductRecord>>(records: I) -> Sheet {
    let mut sheet = Sheet::new(&LINK_HEADERS);
    for record in records {
        sheet.push_row(record.to_row());
    }
    sheet
}

/// Harvests one search listing and writes the three listing files.
///
/// Records from an earlier `{brand}_links.xlsx` are kept and never
/// duplicated; the match flag is recomputed for all of them.
pub fn run_listing_harvest<P, W>(
    page: &mut P,
    extractor: &CardExtractor,
    options: &ListingOptions,
    persister: &Persister<W>,
    cancel: &CancelToken,
    tui: &mut StageTUI,
    summary: &mut StageSummary,
) -> Result<ListingOutcome>
where
    P: ListingPage + ?Sized,
    W: SheetWriter,
{
    let query = options.query.trim();
    if query.is_empty() {
        return Err(StageError::Usage("the search query is empty".to_string()).into());
    }
    let brand = brand_key(query);
    let links_path = options.out_dir.join(links_file(&brand));

    let mut records: Vec<ProductRecord> = match spreadsheet::load(&links_path)? {
        Some(sheet) => (0..sheet.len()).filter_map(|row| record_from_link_row(&sheet, row)).collect(),
        None => Vec::new(),
    };
    tui.loaded(records.len(), "known products").ok();
    let mut dedup = Deduplicator::with_known(records.iter().map(|r| r.url.clone()));

    let max_no_growth = options.harvest.max_no_growth_rounds;
    let outcome = harvest(page, &options.harvest, cancel, |session| {
        tui.harvest_round(session.rounds, session.last_item_count, session.no_growth_rounds, max_no_growth)
            .ok();
    })?;
    tui.finish_harvest(outcome.cards.len(), outcome.rounds).ok();
    if outcome.stop == StopReason::Cancelled {
        tui.warn("Run deadline reached; keeping the cards loaded so far").ok();
    }
    for _ in 0..outcome.unreadable {
        summary.failure();
    }

    let items: Vec<ListingItem> = outcome.cards.iter().map(|card| extractor.extract(card)).collect();
    debug_println!("Extracted {} items from {} cards", items.len(), outcome.cards.len());

    let site = options.site;
    let deduped = dedupe(items, &mut dedup, |item| site.canonical_url(item));
    for _ in 0..(deduped.duplicates + deduped.unidentified) {
        summary.skip();
    }
    let new_records = deduped.records.len();
    for _ in 0..new_records {
        summary.success();
    }
    records.extend(deduped.records);

    let matcher = Matcher::new(query);
    for record in &mut records {
        record.matched = matcher.matches(&record.item.title);
    }
    let matched_count = records.iter().filter(|r| r.matched).count();
    println!(
        "🔍 {} new, {} known, {} duplicates, {} matching {:?}",
        new_records,
        records.len() - new_records,
        deduped.duplicates,
        matched_count,
        query
    );

    let matched: Vec<&ProductRecord> = records.iter().filter(|r| r.matched).collect();
    let links_path = persister.save(&links_sheet(&records), &links_path)?;
    let filtered_links_path = persister.save(
        &links_sheet(matched.iter().copied()),
        &options.out_dir.join(filtered_links_file(&brand)),
    )?;
    let products_path = persister.save(
        &products_sheet(matched.iter().map(|r| (r.item.title.as_str(), r.url.as_str()))),
        &options.out_dir.join(filtered_products_file(&brand)),
    )?;

    Ok(ListingOutcome {
        records,
        new_records,
        links_path,
        filtered_links_path,
        products_path,
        stop: outcome.stop,
    })
}

/// Yields the rendered HTML of a product page.
pub trait PageSource {
    fn page_html(&self, url: &str) -> Result<String>;
}

/// Visits each product page and downloads its images into the folder contract.
pub fn scrape_product_images<S, F>(
    source: &S,
    fetcher: &F,
    products: &[ProductRow],
    root: &Path,
    max_images: Option<usize>,
    cancel: &CancelToken,
    tui: &StageTUI,
    summary: &mut StageSummary,
) -> Result<()>
where
    S: PageSource + ?Sized,
    F: ImageFetcher + ?Sized,
{
    fs::create_dir_all(root).with_context(|| format!("Failed to create {}", root.display()))?;

    for (position, product) in products.iter().enumerate() {
        if cancel.is_cancelled() {
            tui.warn("Run deadline reached; remaining products skipped").ok();
            for _ in position..products.len() {
                summary.skip();
            }
            break;
        }
        tui.item_started(position + 1, products.len(), &product.title).ok();

        match scrape_one_product(source, fetcher, product, root, max_images) {
            Ok((folder, saved, 0)) if saved > 0 => {
                tui.item_done(&format!("{} images in {}", saved, folder)).ok();
                summary.success();
            }
            Ok((folder, saved, failed)) if saved > 0 => {
                tui.item_done(&format!("{} images in {} ({} failed)", saved, folder, failed)).ok();
                summary.success();
            }
            Ok((folder, _, _)) => {
                tui.item_failed(&format!("no images saved for {}", folder)).ok();
                summary.failure();
            }
            Err(e) => {
                tui.item_failed(&format!("{:#}", e)).ok();
                summary.failure();
            }
        }

        if position + 1 < products.len() {
            polite_delay(cancel, 800, 2000);
        }
    }
    Ok(())
}

fn scrape_one_product<S, F>(
    source: &S,
    fetcher: &F,
    product: &ProductRow,
    root: &Path,
    max_images: Option<usize>,
) -> Result<(String, usize, usize)>
where
    S: PageSource + ?Sized,
    F: ImageFetcher + ?Sized,
{
    let html = source.page_html(&product.url)?;
    let page = ProductPage::parse(&html);
    let title = if product.title.is_empty() {
        page.title().unwrap_or_default()
    } else {
        product.title.clone()
    };

    let folder = prepare_folder(root, product.index, &title, &product.url)?;
    let mut urls = page.image_urls();
    if let Some(max) = max_images {
        urls.truncate(max);
    }
    debug_println!("{} image URLs for {}", urls.len(), product.url);

    let (saved, failed) = save_images(fetcher, &folder, &urls);
    let folder_name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((folder_name, saved, failed))
}

/// Builds the product analysis sheet, saving after every product.
pub fn analyze_products<S, W>(
    source: &S,
    products: &[ProductRow],
    out_path: &Path,
    persister: &Persister<W>,
    cancel: &CancelToken,
    tui: &StageTUI,
    summary: &mut StageSummary,
) -> Result<PathBuf>
where
    S: PageSource + ?Sized,
    W: SheetWriter,
{
    let mut sheet = Sheet::new(&ANALYSIS_HEADERS);
    let mut written = out_path.to_path_buf();

    for (position, product) in products.iter().enumerate() {
        if cancel.is_cancelled() {
            tui.warn("Run deadline reached; remaining products skipped").ok();
            for _ in position..products.len() {
                summary.skip();
            }
            break;
        }
        tui.item_started(position + 1, products.len(), &product.title).ok();

        let analysis = match source.page_html(&product.url) {
            Ok(html) => {
                let analysis = ProductAnalysis::from_page(&ProductPage::parse(&html));
                tui.item_done(&format!("rating: {}", analysis.rating)).ok();
                summary.success();
                analysis
            }
            Err(e) => {
                tui.item_failed(&format!("{:#}", e)).ok();
                summary.failure();
                ProductAnalysis {
                    rating: vision::error_text(format!("{:#}", e)),
                    ..Default::default()
                }
            }
        };
        sheet.push_row(analysis.to_row(&product.title, &product.url));
        written = persister.save(&sheet, out_path)?;

        if position + 1 < products.len() {
            polite_delay(cancel, 1000, 2500);
        }
    }

    if sheet.is_empty() {
        written = persister.save(&sheet, out_path)?;
    }
    Ok(written)
}

/// Transcribes the images of every folder into its `extracted_text.xlsx`.
pub fn extract_folder_texts<T, W>(
    folders: &[ProductFolder],
    extractor: &T,
    pause: Duration,
    persister: &Persister<W>,
    cancel: &CancelToken,
    tui: &StageTUI,
    summary: &mut StageSummary,
) -> Result<()>
where
    T: TextExtractor + ?Sized,
    W: SheetWriter,
{
    for (position, folder) in folders.iter().enumerate() {
        if cancel.is_cancelled() {
            tui.warn("Run deadline reached; remaining folders skipped").ok();
            for _ in position..folders.len() {
                summary.skip();
            }
            break;
        }
        tui.item_started(position + 1, folders.len(), &folder.name).ok();

        let images: Vec<PathBuf> = match folders::image_files(&folder.path) {
            Ok(files) => files
                .into_iter()
                .filter(|p| folders::image_number(&p.file_name().unwrap_or_default().to_string_lossy()).is_some())
                .collect(),
            Err(e) => {
                tui.item_failed(&format!("{:#}", e)).ok();
                summary.failure();
                continue;
            }
        };
        if images.is_empty() {
            tui.warn(&format!("No images in {}", folder.name)).ok();
            summary.skip();
            continue;
        }

        let bar = progress_bar(images.len() as u64, &folder.name);
        let texts = vision::extract_images(extractor, &images, pause, cancel, |text| {
            if text.failed() {
                bar.println(format!("  ❌ {}: {}", text.name, text.text));
            }
            bar.inc(1);
        });
        bar.finish_and_clear();

        let mut ok = 0;
        for text in &texts {
            if text.failed() {
                summary.failure();
            } else {
                ok += 1;
                summary.success();
            }
        }
        match persister.save(&vision::to_sheet(&texts), &folder.path.join(vision::EXTRACTED_TEXT_FILE)) {
            Ok(_) => tui.item_done(&format!("text from {}/{} images", ok, texts.len())).ok(),
            Err(e) => {
                summary.failure();
                tui.item_failed(&format!("{:#}", e)).ok()
            }
        };
    }
    Ok(())
}

/// Loads `(image number, text)` pairs from a folder's extracted-text sheet.
pub fn load_folder_texts(folder: &Path) -> Vec<(usize, String)> {
    let path = folder.join(vision::EXTRACTED_TEXT_FILE);
    match spreadsheet::load(&path) {
        Ok(Some(sheet)) => vision::from_sheet(&sheet)
            .into_iter()
            .filter(|(_, text)| !vision::is_error(text))
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            debug_eprintln!("Could not read {}: {:#}", path.display(), e);
            Vec::new()
        }
    }
}

/// Adds `image N` text columns and the contact summary to the analysis sheet.
///
/// Row `i` (0-based) joins to the folder with index `i + 1`; a title match
/// is used only when no folder carries that index.
pub fn merge_extracted_text<L>(
    analysis: &Sheet,
    folders: &[ProductFolder],
    load_texts: L,
    summary: &mut StageSummary,
) -> Sheet
where
    L: Fn(&Path) -> Vec<(usize, String)>,
{
    let mut merged = analysis.clone();
    let joined: Vec<Option<Vec<(usize, String)>>> = (0..analysis.len())
        .map(|row| {
            let title = analysis.cell(row, "title").unwrap_or_default();
            find_folder(folders, row + 1, title).map(|folder| {
                debug_println!("Row {} -> {}", row + 1, folder.name);
                load_texts(&folder.path)
            })
        })
        .collect();

    let max_images = joined
        .iter()
        .flatten()
        .flat_map(|texts| texts.iter().map(|(n, _)| *n))
        .max()
        .unwrap_or(0);
    let image_columns: Vec<usize> = (1..=max_images)
        .map(|n| merged.add_column(&format!("image {}", n), ""))
        .collect();
    let contact_col = merged.add_column(CONTACT_COLUMN, "");

    for (row, texts) in joined.into_iter().enumerate() {
        let verdict = match texts {
            None => {
                summary.skip();
                NO_FOLDER_MATCH.to_string()
            }
            Some(texts) if texts.is_empty() => {
                summary.skip();
                NO_TEXT_DATA.to_string()
            }
            Some(texts) => {
                for (n, text) in &texts {
                    merged.set(row, image_columns[n - 1], text.clone());
                }
                summary.success();
                let combined: Vec<&str> = texts.iter().map(|(_, t)| t.as_str()).collect();
                Contacts::classify(&combined.join(" ")).summary()
            }
        };
        merged.set(row, contact_col, verdict);
    }
    merged
}

/// Scans every folder for QR codes.
pub fn scan_qr_codes<R>(
    folders: &[ProductFolder],
    resolver: &R,
    cancel: &CancelToken,
    tui: &StageTUI,
    summary: &mut StageSummary,
) -> Vec<CodeRow>
where
    R: UrlResolver + ?Sized,
{
    let mut rows = Vec::new();
    for (position, folder) in folders.iter().enumerate() {
        if cancel.is_cancelled() {
            tui.warn("Run deadline reached; remaining folders skipped").ok();
            for _ in position..folders.len() {
                summary.skip();
            }
            break;
        }
        tui.item_started(position + 1, folders.len(), &folder.name).ok();
        match qr::scan_folder(folder, resolver) {
            Ok(found) => {
                for row in &found {
                    if row.found() {
                        summary.success();
                    } else if row.data.starts_with(vision::ERROR_PREFIX) {
                        summary.failure();
                    } else {
                        summary.skip();
                    }
                }
                let codes = found.iter().filter(|r| r.found()).count();
                tui.item_done(&format!("{} codes in {} images", codes, found.len())).ok();
                rows.extend(found);
            }
            Err(e) => {
                tui.item_failed(&format!("{:#}", e)).ok();
                summary.failure();
            }
        }
    }
    rows
}

/// Fails with a missing-input error unless `dir` holds product folders.
pub fn require_product_folders(dir: &Path) -> Result<Vec<ProductFolder>> {
    if !dir.is_dir() {
        return Err(StageError::MissingInput(format!("{} is not a directory", dir.display())).into());
    }
    let folders = folders::list_product_folders(dir)?;
    if folders.is_empty() {
        return Err(StageError::MissingInput(format!(
            "no product_NNN_* folders in {}; run the image scraper first",
            dir.display()
        ))
        .into());
    }
    Ok(folders)
}
