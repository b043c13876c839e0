//! QR code and barcode detection in product images, and resolution of the
//! URLs QR codes carry.

use crate::folders::{image_files, ProductFolder};
use crate::spreadsheet::Sheet;
use anyhow::{anyhow, Context, Result};
use image::{imageops, DynamicImage, GenericImageView, GrayImage};
use rxing::BarcodeFormat;
use std::path::Path;
use std::time::Duration;

pub const RESULT_HEADERS: [&str; 7] = ["Folder", "Image", "Code Type", "Data", "Is URL", "Final URL", "Snapshot"];
pub const NO_CODE: &str = "No code detected";
pub const QR_SYMBOLOGY: &str = "QRCODE";
/// Final URL of a barcode row; only QR payloads are followed.
pub const BARCODE_FINAL_URL: &str = "N/A (Barcode)";
const SNAPSHOT_PREFIX: &str = "code_";
const SNAPSHOT_PADDING: i32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCode {
    /// Symbology name as written to the `Code Type` column, e.g. `QRCODE`
    /// or `EAN13`.
    pub symbology: String,
    pub data: String,
    /// Axis-aligned box around the code: x, y, width, height.
    pub bounds: (u32, u32, u32, u32),
}

impl DecodedCode {
    pub fn is_qr(&self) -> bool {
        self.symbology == QR_SYMBOLOGY
    }
}

/// Every QR code and barcode found in the image, QR codes first.
pub fn decode_codes(img: &DynamicImage) -> Vec<DecodedCode> {
    let luma = img.to_luma8();
    let mut codes = decode_qr(&luma);
    codes.extend(decode_barcodes(&luma));
    codes
}

/// Padded box around `(min_x, min_y)..(max_x, max_y)`, clipped to the image.
fn padded_bounds(min_x: i32, min_y: i32, max_x: i32, max_y: i32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let x0 = (min_x - SNAPSHOT_PADDING).max(0) as u32;
    let y0 = (min_y - SNAPSHOT_PADDING).max(0) as u32;
    let x1 = ((max_x + SNAPSHOT_PADDING).max(0) as u32).min(width);
    let y1 = ((max_y + SNAPSHOT_PADDING).max(0) as u32).min(height);
    (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

fn decode_qr(luma: &GrayImage) -> Vec<DecodedCode> {
    let (width, height) = luma.dimensions();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
        luma.get_pixel(x as u32, y as u32)[0]
    });

    prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| {
            let (_, data) = grid.decode().ok()?;
            let points = &grid.bounds;
            let min_x = points.iter().map(|p| p.x).min()?;
            let max_x = points.iter().map(|p| p.x).max()?;
            let min_y = points.iter().map(|p| p.y).min()?;
            let max_y = points.iter().map(|p| p.y).max()?;
            Some(DecodedCode {
                symbology: QR_SYMBOLOGY.to_string(),
                data,
                bounds: padded_bounds(min_x, min_y, max_x, max_y, width, height),
            })
        })
        .collect()
}

/// One-dimensional and other non-QR symbologies, read with rxing. QR
/// formats are left to rqrr so a code is never reported twice.
fn decode_barcodes(luma: &GrayImage) -> Vec<DecodedCode> {
    let (width, height) = luma.dimensions();
    let found = rxing::helpers::detect_multiple_in_luma(luma.as_raw().clone(), width, height).unwrap_or_default();

    found
        .into_iter()
        .filter(|result| !is_qr_format(result.getBarcodeFormat()))
        .filter_map(|result| {
            let points = result.getPoints();
            let min_x = points.iter().map(|p| p.x).reduce(f32::min)?;
            let max_x = points.iter().map(|p| p.x).reduce(f32::max)?;
            let min_y = points.iter().map(|p| p.y).reduce(f32::min)?;
            let max_y = points.iter().map(|p| p.y).reduce(f32::max)?;
            Some(DecodedCode {
                symbology: symbology_name(result.getBarcodeFormat()),
                data: result.getText().to_string(),
                bounds: padded_bounds(
                    min_x.floor() as i32,
                    min_y.floor() as i32,
                    max_x.ceil() as i32,
                    max_y.ceil() as i32,
                    width,
                    height,
                ),
            })
        })
        .collect()
}

fn is_qr_format(format: &BarcodeFormat) -> bool {
    matches!(
        format,
        BarcodeFormat::QR_CODE | BarcodeFormat::MICRO_QR_CODE | BarcodeFormat::RECTANGULAR_MICRO_QR_CODE
    )
}

/// `EAN_13` becomes `EAN13`, `CODE_128` becomes `CODE128`.
pub fn symbology_name(format: &BarcodeFormat) -> String {
    format!("{:?}", format).replace('_', "")
}

/// Whether a payload reads like a web address.
pub fn is_url_like(data: &str) -> bool {
    const INDICATORS: [&str; 8] = ["http://", "https://", "www.", ".com", ".org", ".net", ".in", ".co"];
    let lower = data.trim().to_lowercase();
    !lower.contains(char::is_whitespace) && INDICATORS.iter().any(|i| lower.contains(i))
}

/// Follows redirects from a scanned URL to where it finally lands.
pub trait UrlResolver {
    fn resolve(&self, url: &str) -> Result<String>;
}

pub struct HttpResolver {
    client: reqwest::blocking::Client,
}

impl HttpResolver {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl UrlResolver for HttpResolver {
    fn resolve(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(with_scheme(url))
            .send()
            .with_context(|| format!("Failed to load {}", url))?;
        Ok(response.url().to_string())
    }
}

pub fn with_scheme(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// One row of the QR results sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeRow {
    pub folder: String,
    pub image: String,
    pub code_type: String,
    pub data: String,
    pub is_url: Option<bool>,
    pub final_url: String,
    pub snapshot: String,
}

impl CodeRow {
    fn empty(folder: &str, image: &str, data: String) -> Self {
        Self {
            folder: folder.to_string(),
            image: image.to_string(),
            code_type: String::new(),
            data,
            is_url: None,
            final_url: String::new(),
            snapshot: String::new(),
        }
    }

    pub fn found(&self) -> bool {
        !self.code_type.is_empty()
    }

    pub fn to_row(&self) -> Vec<String> {
        let is_url = match self.is_url {
            Some(true) => "Yes",
            Some(false) => "No",
            None => "",
        };
        vec![
            self.folder.clone(),
            self.image.clone(),
            self.code_type.clone(),
            self.data.clone(),
            is_url.to_string(),
            self.final_url.clone(),
            self.snapshot.clone(),
        ]
    }
}

fn is_snapshot(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with(SNAPSHOT_PREFIX))
        .unwrap_or(false)
}

/// Scans one image: every decoded code becomes a row with a cropped snapshot
/// saved next to the image; an image without codes yields a single row.
pub fn scan_image<R: UrlResolver + ?Sized>(folder_name: &str, path: &Path, resolver: &R) -> Vec<CodeRow> {
    let image_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => return vec![CodeRow::empty(folder_name, &image_name, format!("Error: {}", e))],
    };
    let codes = decode_codes(&img);
    if codes.is_empty() {
        return vec![CodeRow::empty(folder_name, &image_name, NO_CODE.to_string())];
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    codes
        .into_iter()
        .enumerate()
        .map(|(i, code)| {
            let snapshot = format!("{}{}_{}.png", SNAPSHOT_PREFIX, i + 1, stem);
            let snapshot = match save_snapshot(&img, code.bounds, &path.with_file_name(&snapshot)) {
                Ok(()) => snapshot,
                Err(e) => {
                    eprintln!("  ⚠️  Snapshot for {} failed: {}", image_name, e);
                    String::new()
                }
            };
            code_row(folder_name, &image_name, code, snapshot, resolver)
        })
        .collect()
}

/// Result row for one decoded code. Only URL-like QR payloads are
/// resolved; barcodes carry [`BARCODE_FINAL_URL`].
pub fn code_row<R: UrlResolver + ?Sized>(
    folder_name: &str,
    image_name: &str,
    code: DecodedCode,
    snapshot: String,
    resolver: &R,
) -> CodeRow {
    let is_url = is_url_like(&code.data);
    let final_url = if !code.is_qr() {
        BARCODE_FINAL_URL.to_string()
    } else if is_url {
        match resolver.resolve(&code.data) {
            Ok(url) => url,
            Err(e) => format!("Error: {:#}", e),
        }
    } else {
        "N/A".to_string()
    };
    CodeRow {
        folder: folder_name.to_string(),
        image: image_name.to_string(),
        code_type: code.symbology,
        data: code.data,
        is_url: Some(is_url),
        final_url,
        snapshot,
    }
}

fn save_snapshot(img: &DynamicImage, (x, y, w, h): (u32, u32, u32, u32), target: &Path) -> Result<()> {
    if w == 0 || h == 0 {
        return Err(anyhow!("empty code region"));
    }
    let (img_w, img_h) = img.dimensions();
    if x >= img_w || y >= img_h {
        return Err(anyhow!("code region outside image"));
    }
    let crop = imageops::crop_imm(img, x, y, w.min(img_w - x), h.min(img_h - y)).to_image();
    crop.save(target)
        .with_context(|| format!("Failed to save {}", target.display()))
}

/// Scans every image of a product folder, skipping earlier snapshots.
pub fn scan_folder<R: UrlResolver + ?Sized>(folder: &ProductFolder, resolver: &R) -> Result<Vec<CodeRow>> {
    let mut rows = Vec::new();
    for path in image_files(&folder.path)? {
        if is_snapshot(&path) {
            continue;
        }
        rows.extend(scan_image(&folder.name, &path, resolver));
    }
    Ok(rows)
}

pub fn to_sheet(rows: &[CodeRow]) -> Sheet {
    let mut sheet = Sheet::new(&RESULT_HEADERS);
    for row in rows {
        sheet.push_row(row.to_row());
    }
    sheet
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingResolver {
        asked: RefCell<Vec<String>>,
    }

    impl UrlResolver for RecordingResolver {
        fn resolve(&self, url: &str) -> Result<String> {
            self.asked.borrow_mut().push(url.to_string());
            Ok(format!("{}/landing", with_scheme(url)))
        }
    }

    #[test]
    fn url_like_payloads() {
        assert!(is_url_like("https://itc.in/q/123"));
        assert!(is_url_like("www.sunfeast.com"));
        assert!(is_url_like("qr.itcportal.com/x"));
        assert!(!is_url_like("BATCH 2024-07"));
        assert!(!is_url_like("8901725121129"));
    }

    #[test]
    fn scheme_is_added_when_missing() {
        assert_eq!(with_scheme("www.itc.in"), "https://www.itc.in");
        assert_eq!(with_scheme("http://itc.in"), "http://itc.in");
    }

    #[test]
    fn image_without_codes_yields_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image_1.png");
        image::RgbImage::from_pixel(64, 64, image::Rgb([255, 255, 255])).save(&path).unwrap();

        let resolver = RecordingResolver { asked: RefCell::new(Vec::new()) };
        let rows = scan_image("product_001_A", &path, &resolver);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].found());
        assert_eq!(rows[0].data, NO_CODE);
        assert!(resolver.asked.borrow().is_empty());
    }

    #[test]
    fn unreadable_image_is_reported_in_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image_1.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        let resolver = RecordingResolver { asked: RefCell::new(Vec::new()) };
        let rows = scan_image("product_001_A", &path, &resolver);
        assert!(rows[0].data.starts_with("Error:"));
        assert_eq!(rows[0].to_row()[4], "");
    }

    fn decoded(symbology: &str, data: &str) -> DecodedCode {
        DecodedCode { symbology: symbology.into(), data: data.into(), bounds: (0, 0, 40, 20) }
    }

    #[test]
    fn barcodes_keep_symbology_and_skip_resolution() {
        let resolver = RecordingResolver { asked: RefCell::new(Vec::new()) };
        let row = code_row(
            "product_001_A",
            "image_4.jpg",
            decoded("EAN13", "8901725121129"),
            "code_1_image_4.png".into(),
            &resolver,
        );
        assert_eq!(row.code_type, "EAN13");
        assert_eq!(row.final_url, BARCODE_FINAL_URL);
        assert_eq!(row.is_url, Some(false));

        // a URL printed as Code 128 is still a barcode row
        let row = code_row("product_001_A", "image_4.jpg", decoded("CODE128", "www.itc.in"), String::new(), &resolver);
        assert_eq!(row.final_url, BARCODE_FINAL_URL);
        assert!(resolver.asked.borrow().is_empty());
    }

    #[test]
    fn qr_urls_are_resolved() {
        let resolver = RecordingResolver { asked: RefCell::new(Vec::new()) };
        let row = code_row("product_001_A", "image_2.jpg", decoded(QR_SYMBOLOGY, "www.itc.in"), String::new(), &resolver);
        assert_eq!(row.code_type, "QRCODE");
        assert_eq!(row.final_url, "https://www.itc.in/landing");
        let row = code_row("product_001_A", "image_2.jpg", decoded(QR_SYMBOLOGY, "BATCH 7"), String::new(), &resolver);
        assert_eq!(row.final_url, "N/A");
        assert_eq!(*resolver.asked.borrow(), ["www.itc.in"]);
    }

    #[test]
    fn symbology_names_drop_underscores() {
        assert_eq!(symbology_name(&BarcodeFormat::EAN_13), "EAN13");
        assert_eq!(symbology_name(&BarcodeFormat::CODE_128), "CODE128");
        assert_eq!(symbology_name(&BarcodeFormat::UPC_A), "UPCA");
        assert!(is_qr_format(&BarcodeFormat::QR_CODE));
        assert!(!is_qr_format(&BarcodeFormat::EAN_8));
    }

    #[test]
    fn snapshots_are_not_rescanned() {
        assert!(is_snapshot(Path::new("/x/code_1_image_2.png")));
        assert!(!is_snapshot(Path::new("/x/image_2.png")));
    }

    #[test]
    fn result_rows_render_yes_no() {
        let row = CodeRow {
            folder: "product_002_B".into(),
            image: "image_3.jpg".into(),
            code_type: "QRCODE".into(),
            data: "https://itc.in/q".into(),
            is_url: Some(true),
            final_url: "https://itc.in/landing".into(),
            snapshot: "code_1_image_3.png".into(),
        };
        let sheet = to_sheet(&[row]);
        assert_eq!(sheet.headers, RESULT_HEADERS);
        assert_eq!(sheet.rows[0][4], "Yes");
    }
}
