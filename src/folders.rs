//! The per-product folder contract shared by the image, text and QR stages.
//!
//! ```text
//! product_007_Sunfeast_Dark_Fantasy/
//!     product_info.txt
//!     image_1.jpg
//!     image_2.jpg
//! ```
//!
//! The zero-padded index is the join key back to the row of the products
//! file the folder was created from (row 1 is `product_001_...`).

use crate::debug_eprintln;
use crate::normalize::sanitize_folder_title;
use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use image::codecs::jpeg::JpegEncoder;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

pub const INFO_FILE: &str = "product_info.txt";
const MAX_TITLE_CHARS: usize = 100;
const JPEG_QUALITY: u8 = 92;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "bmp"];

pub fn folder_name(index: usize, title: &str) -> String {
    let mut safe: String = sanitize_folder_title(title)
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    if safe.is_empty() {
        safe = format!("product_{}", index);
    }
    format!("product_{:03}_{}", index, safe)
}

/// Index embedded in a `product_{index}_{title}` folder name.
pub fn parse_folder_index(name: &str) -> Option<usize> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^product_(\d+)(?:_|$)").expect("folder pattern"));
    re.captures(name)?.get(1)?.as_str().parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductInfo {
    pub title: String,
    pub url: String,
    pub index: usize,
    pub scraped_on: NaiveDateTime,
}

impl ProductInfo {
    pub fn now(title: &str, url: &str, index: usize) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            index,
            scraped_on: Local::now().naive_local(),
        }
    }

    pub fn to_text(&self) -> String {
        format!(
            "Product Title: {}\nProduct URL: {}\nProduct Index: {}\nScraped on: {}\n",
            self.title,
            self.url,
            self.index,
            self.scraped_on.format(TIMESTAMP_FORMAT)
        )
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut title = None;
        let mut url = None;
        let mut index = None;
        let mut scraped_on = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Product Title" => title = Some(value.to_string()),
                "Product URL" => url = Some(value.to_string()),
                "Product Index" => index = value.parse().ok(),
                "Scraped on" => scraped_on = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok(),
                _ => {}
            }
        }

        Ok(Self {
            title: title.ok_or_else(|| anyhow!("product info has no title line"))?,
            url: url.ok_or_else(|| anyhow!("product info has no URL line"))?,
            index: index.ok_or_else(|| anyhow!("product info has no valid index line"))?,
            scraped_on: scraped_on.ok_or_else(|| anyhow!("product info has no valid timestamp"))?,
        })
    }

    pub fn write_to(&self, folder: &Path) -> Result<()> {
        let path = folder.join(INFO_FILE);
        fs::write(&path, self.to_text()).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn read_from(folder: &Path) -> Result<Self> {
        let path = folder.join(INFO_FILE);
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Malformed {}", path.display()))
    }
}

/// Creates (or reuses) the folder for product `index` and writes its info file.
pub fn prepare_folder(root: &Path, index: usize, title: &str, url: &str) -> Result<PathBuf> {
    let folder = root.join(folder_name(index, title));
    fs::create_dir_all(&folder).with_context(|| format!("Failed to create {}", folder.display()))?;
    ProductInfo::now(title, url, index).write_to(&folder)?;
    Ok(folder)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductFolder {
    pub index: usize,
    pub name: String,
    pub path: PathBuf,
}

/// Every `product_NNN_*` directory under `root`, ordered by index.
pub fn list_product_folders(root: &Path) -> Result<Vec<ProductFolder>> {
    let mut folders = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("Failed to list {}", root.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(index) = parse_folder_index(&name) {
            folders.push(ProductFolder {
                index,
                name,
                path: entry.path(),
            });
        }
    }
    folders.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)));
    Ok(folders)
}

/// Folder for a row, by index first and by title words only when no folder
/// carries that index.
pub fn find_folder<'a>(folders: &'a [ProductFolder], index: usize, title: &str) -> Option<&'a ProductFolder> {
    folders
        .iter()
        .find(|f| f.index == index)
        .or_else(|| find_folder_by_title(folders, title))
}

/// Last-resort title match: the whole underscored title inside the folder
/// name, else any of the first three longer words.
pub fn find_folder_by_title<'a>(folders: &'a [ProductFolder], title: &str) -> Option<&'a ProductFolder> {
    let title = title.trim();
    if title.is_empty() {
        return None;
    }
    let underscored = title.to_lowercase().replace(' ', "_");
    if let Some(found) = folders.iter().find(|f| f.name.to_lowercase().contains(&underscored)) {
        return Some(found);
    }
    let words: Vec<String> = title
        .split_whitespace()
        .take(3)
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect();
    folders.iter().find(|f| {
        let name = f.name.to_lowercase();
        words.iter().any(|w| name.contains(w.as_str()))
    })
}

/// Image files in `folder`, ordered by their number (`image_2` before `image_10`).
pub fn image_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = fs::read_dir(folder)
        .with_context(|| format!("Failed to list {}", folder.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_image(path))
        .collect();
    images.sort_by_key(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (image_number(&name).unwrap_or(usize::MAX), name)
    });
    Ok(images)
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// `N` from `image_N.ext`.
pub fn image_number(file_name: &str) -> Option<usize> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^image_(\d+)\.").expect("image name pattern"));
    re.captures(file_name)?.get(1)?.as_str().parse().ok()
}

pub struct ImageDownloader {
    client: reqwest::blocking::Client,
}

impl ImageDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

/// Source of raw image bytes by URL.
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

impl ImageFetcher for ImageDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request for {} failed", url))?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP {} for {}", response.status(), url));
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Downloads `urls` into `folder` as `image_1.jpg`, `image_2.jpg`, ...
///
/// Returns how many were saved and how many failed; numbering follows the
/// URL order so a failed download leaves a gap.
pub fn save_images<F: ImageFetcher + ?Sized>(fetcher: &F, folder: &Path, urls: &[String]) -> (usize, usize) {
    let mut saved = 0;
    let mut failed = 0;
    for (i, url) in urls.iter().enumerate() {
        let target = folder.join(format!("image_{}.jpg", i + 1));
        match fetcher.fetch(url).and_then(|bytes| save_as_jpeg(&bytes, &target)) {
            Ok(()) => saved += 1,
            Err(e) => {
                eprintln!("  ❌ Image {} failed: {:#}", i + 1, e);
                failed += 1;
            }
        }
    }
    (saved, failed)
}

/// Re-encodes the bytes as JPEG; undecodable data is written as-is.
pub fn save_as_jpeg(bytes: &[u8], target: &Path) -> Result<()> {
    let encoded = image::load_from_memory(bytes).and_then(|img| {
        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        img.to_rgb8().write_with_encoder(encoder)?;
        Ok(out)
    });
    let data = match encoded {
        Ok(jpeg) => jpeg,
        Err(e) => {
            debug_eprintln!("Keeping raw bytes for {}: {}", target.display(), e);
            bytes.to_vec()
        }
    };
    fs::write(target, data).with_context(|| format!("Failed to write {}", target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn folder_names_follow_contract() {
        assert_eq!(folder_name(7, "Sunfeast Dark Fantasy (75g)"), "product_007_Sunfeast_Dark_Fantasy_75g");
        assert_eq!(folder_name(12, "  ?? "), "product_012_product_12");
        assert_eq!(folder_name(1234, "A"), "product_1234_A");
        let long = "x".repeat(300);
        assert_eq!(folder_name(1, &long).len(), "product_001_".len() + 100);
    }

    #[test]
    fn index_is_parsed_from_folder_name() {
        assert_eq!(parse_folder_index("product_007_Sunfeast"), Some(7));
        assert_eq!(parse_folder_index("product_120"), Some(120));
        assert_eq!(parse_folder_index("product_abc"), None);
        assert_eq!(parse_folder_index("images"), None);
    }

    #[test]
    fn product_info_round_trips() {
        let info = ProductInfo {
            title: "Marie Light: Original".to_string(),
            url: "https://shop.test/p/1".to_string(),
            index: 3,
            scraped_on: NaiveDate::from_ymd_opt(2025, 1, 31)
                .unwrap()
                .and_hms_opt(9, 5, 0)
                .unwrap(),
        };
        let text = info.to_text();
        assert!(text.contains("Scraped on: 2025-01-31 09:05:00\n"));
        assert_eq!(ProductInfo::parse(&text).unwrap(), info);
    }

    #[test]
    fn folders_are_listed_by_index_and_joined() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["product_010_Bounce", "product_002_Dark_Fantasy", "notes"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("product_003_file.txt"), "").unwrap();

        let folders = list_product_folders(dir.path()).unwrap();
        let indices: Vec<usize> = folders.iter().map(|f| f.index).collect();
        assert_eq!(indices, [2, 10]);

        assert_eq!(find_folder(&folders, 10, "anything").unwrap().name, "product_010_Bounce");
        // no folder 5: falls back to title words
        assert_eq!(
            find_folder(&folders, 5, "Sunfeast Dark Fantasy").unwrap().name,
            "product_002_Dark_Fantasy"
        );
        assert!(find_folder(&folders, 5, "Atta").is_none());
    }

    #[test]
    fn images_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["image_10.jpg", "image_2.png", "image_1.jpg", "product_info.txt", "code_1_image_1.PNG"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = image_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["image_1.jpg", "image_2.png", "image_10.jpg", "code_1_image_1.PNG"]);
    }

    #[test]
    fn undecodable_bytes_are_written_raw() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("image_1.jpg");
        save_as_jpeg(b"not an image", &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"not an image");
    }

    #[test]
    fn decodable_images_are_reencoded_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let mut png = Vec::new();
        image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let target = dir.path().join("image_1.jpg");
        save_as_jpeg(&png, &target).unwrap();
        let written = fs::read(&target).unwrap();
        assert_eq!(&written[..2], &[0xFF, 0xD8]);
    }
}
