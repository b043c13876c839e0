//! Spreadsheet persistence shared by every stage.
//!
//! Saving retries while another program holds the file open, then falls
//! back to CSV next to the requested path. Loading treats a missing file as
//! "nothing yet" rather than an error.

use crate::retry::RetryPolicy;
use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Reader};
use rust_xlsxwriter::{Format, Workbook};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// A header row plus data rows, all as display strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column index by header name, ignoring case and surrounding blanks.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
    }

    /// Cell of `row` under header `name`; `None` for unknown columns or short rows.
    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let col = self.column(name)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Appends a column, filling existing rows with `fill`. Returns its index.
    pub fn add_column(&mut self, name: &str, fill: &str) -> usize {
        if let Some(existing) = self.column(name) {
            return existing;
        }
        self.headers.push(name.to_string());
        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, fill.to_string());
        }
        width - 1
    }

    /// Sets a cell, growing the row to the header width when needed.
    pub fn set(&mut self, row: usize, col: usize, value: String) {
        let width = self.headers.len().max(col + 1);
        if let Some(cells) = self.rows.get_mut(row) {
            if cells.len() < width {
                cells.resize(width, String::new());
            }
            cells[col] = value;
        }
    }
}

/// Writes a sheet to one concrete file.
pub trait SheetWriter {
    fn write(&self, sheet: &Sheet, path: &Path) -> io::Result<()>;
}

/// Writes `.csv` paths as CSV and everything else as `.xlsx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWriter;

impl SheetWriter for FileWriter {
    fn write(&self, sheet: &Sheet, path: &Path) -> io::Result<()> {
        if has_extension(path, "csv") {
            write_csv(sheet, path)
        } else {
            write_xlsx(sheet, path)
        }
    }
}

fn write_xlsx(sheet: &Sheet, path: &Path) -> io::Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();

    for (col, header) in sheet.headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, header, &bold)
            .map_err(io::Error::other)?;
    }
    for (r, row) in sheet.rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            worksheet
                .write_string((r + 1) as u32, col as u16, value)
                .map_err(io::Error::other)?;
        }
    }

    // Build in memory first so a locked target never ends up half-written.
    let buffer = workbook.save_to_buffer().map_err(io::Error::other)?;
    fs::write(path, buffer)
}

fn write_csv(sheet: &Sheet, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    writer.write_record(&sheet.headers)?;
    for row in &sheet.rows {
        writer.write_record(row)?;
    }
    writer.flush()
}

/// Whether an I/O error means another process has the file open.
pub fn is_lock_error(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    // Windows sharing and lock violations
    cfg!(windows) && matches!(error.raw_os_error(), Some(32 | 33))
}

pub struct Persister<W: SheetWriter = FileWriter> {
    writer: W,
    policy: RetryPolicy,
    sleeper: fn(Duration),
}

impl Default for Persister<FileWriter> {
    fn default() -> Self {
        Self::new(FileWriter)
    }
}

impl<W: SheetWriter> Persister<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            policy: RetryPolicy::file_lock(),
            sleeper: thread::sleep,
        }
    }

    pub fn with_sleeper(mut self, sleeper: fn(Duration)) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Saves `sheet` to `path` and returns the path actually written.
    ///
    /// Lock errors are retried on the file-lock schedule; if the file stays
    /// locked (or the format cannot be written) the rows go to a CSV file
    /// beside it instead.
    pub fn save(&self, sheet: &Sheet, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let result = self.policy.run_with_sleeper(
            |attempt| {
                if attempt > 1 {
                    println!("🔁 Retrying save of {} (attempt {})", path.display(), attempt);
                }
                self.writer.write(sheet, path)
            },
            is_lock_error,
            self.sleeper,
        );

        match result {
            Ok(_) => {
                println!("💾 Saved {} rows to {}", sheet.len(), path.display());
                Ok(path.to_path_buf())
            }
            Err(e) => {
                eprintln!("⚠️  Could not write {}: {}", path.display(), e);
                let fallback = fallback_path(path);
                write_csv(sheet, &fallback)
                    .with_context(|| format!("Fallback save to {} failed", fallback.display()))?;
                println!("💾 Saved {} rows to fallback {}", sheet.len(), fallback.display());
                Ok(fallback)
            }
        }
    }
}

fn fallback_path(path: &Path) -> PathBuf {
    if has_extension(path, "csv") {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        path.with_file_name(format!("{}_fallback.csv", stem))
    } else {
        path.with_extension("csv")
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// The file a save to `path` actually produced: `path` itself or its CSV
/// fallback, whichever was written last. `None` when neither exists.
pub fn existing_path(path: &Path) -> Option<PathBuf> {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    let fallback = fallback_path(path);
    match (path.is_file(), fallback.is_file()) {
        (true, true) if modified(&fallback) > modified(path) => Some(fallback),
        (true, _) => Some(path.to_path_buf()),
        (false, true) => Some(fallback),
        (false, false) => None,
    }
}

/// Loads the first worksheet of an `.xlsx`/`.xls` file, or a `.csv` file.
///
/// A path whose save fell back to CSV loads from the fallback. Returns
/// `Ok(None)` when neither exists. The first row is taken as headers.
pub fn load(path: &Path) -> Result<Option<Sheet>> {
    let found = match existing_path(path) {
        Some(found) => found,
        None => return Ok(None),
    };
    let path = found.as_path();

    let mut rows: Vec<Vec<String>> = if has_extension(path, "csv") {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("Failed to open workbook {}", path.display()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| anyhow!("Workbook {} has no worksheets", path.display()))?
            .with_context(|| format!("Failed to read first worksheet of {}", path.display()))?;
        range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    };

    if rows.is_empty() {
        return Ok(Some(Sheet::default()));
    }
    let headers = rows.remove(0);
    Ok(Some(Sheet { headers, rows }))
}
