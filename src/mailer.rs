//! Emails the pipeline's result spreadsheets.

use crate::exit::StageError;
use crate::pipeline::{analysis_file, merged_file, QR_RESULTS_PREFIX};
use crate::spreadsheet;
use anyhow::{anyhow, Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::fs;
use std::path::{Path, PathBuf};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const CSV_MIME: &str = "text/csv";

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

/// Files to attach for `product` in `dir`: the analysis and merged sheets,
/// plus the newest QR results sheet. A sheet saved as its CSV fallback is
/// attached in that form. Missing files are reported and skipped.
pub fn collect_attachments(dir: &Path, product: &str) -> Vec<PathBuf> {
    let mut attachments = Vec::new();
    for name in [analysis_file(product), merged_file(product)] {
        match spreadsheet::existing_path(&dir.join(&name)) {
            Some(path) => {
                println!("✅ Found: {}", display_name(&path));
                attachments.push(path);
            }
            None => println!("⚠️  Missing: {}", name),
        }
    }
    match newest_qr_results(dir) {
        Some(path) => {
            println!("✅ Found latest QR results: {}", display_name(&path));
            attachments.push(path);
        }
        None => println!("⚠️  No {}* files found", QR_RESULTS_PREFIX),
    }
    attachments
}

/// Most recently modified `qr_barcode_results_*` sheet in `dir`, either
/// `.xlsx` or a `.csv` fallback.
pub fn newest_qr_results(dir: &Path) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with(QR_RESULTS_PREFIX) && (name.ends_with(".xlsx") || name.ends_with(".csv"))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.file_name(), entry.path()))
        })
        .max()
        .map(|(_, _, path)| path)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => CSV_MIME,
        _ => XLSX_MIME,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn build_report(product: &str, attachments: Vec<PathBuf>) -> Report {
    let file_list: Vec<String> = attachments
        .iter()
        .map(|p| format!("   • {}", display_name(p)))
        .collect();
    let body = format!(
        "Complete Product Analysis Results\n\n\
         Please find the attached analysis files for {product} products:\n\n\
         {files}\n\n\
         File Descriptions:\n\
         • {analysis}: ratings and specifications per product\n\
         • {merged}: analysis with extracted image text and contact information\n\
         • {qr}[timestamp].xlsx: QR code detection results with URL redirects\n\n\
         Total files attached: {count}\n",
        product = product,
        files = file_list.join("\n"),
        analysis = analysis_file(product),
        merged = merged_file(product),
        qr = QR_RESULTS_PREFIX,
        count = attachments.len(),
    );
    Report {
        subject: format!("Complete Product Analysis Results - {}", product),
        body,
        attachments,
    }
}

pub trait MailSender {
    fn send(&self, report: &Report) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub recipient: String,
}

pub struct SmtpSender {
    settings: SmtpSettings,
}

impl SmtpSender {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    fn message(&self, report: &Report) -> Result<Message> {
        let from: Mailbox = self
            .settings
            .user
            .parse()
            .with_context(|| format!("Invalid sender address {:?}", self.settings.user))?;
        let to: Mailbox = self
            .settings
            .recipient
            .parse()
            .with_context(|| format!("Invalid recipient address {:?}", self.settings.recipient))?;
        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(report.body.clone()));
        for path in &report.attachments {
            let bytes = fs::read(path).with_context(|| format!("Failed to read attachment {}", path.display()))?;
            let content_type =
                ContentType::parse(content_type_for(path)).map_err(|e| anyhow!("Bad content type: {}", e))?;
            parts = parts.singlepart(Attachment::new(display_name(path)).body(bytes, content_type));
        }

        Message::builder()
            .from(from)
            .to(to)
            .subject(report.subject.clone())
            .multipart(parts)
            .context("Failed to build email")
    }
}

impl MailSender for SmtpSender {
    fn send(&self, report: &Report) -> Result<()> {
        let message = self.message(report)?;
        let transport = SmtpTransport::relay(&self.settings.host)
            .with_context(|| format!("Invalid SMTP host {}", self.settings.host))?
            .port(self.settings.port)
            .credentials(Credentials::new(
                self.settings.user.clone(),
                self.settings.password.clone(),
            ))
            .build();
        transport
            .send(&message)
            .map_err(|e| StageError::Collaborator(format!("SMTP send failed: {}", e)))?;
        Ok(())
    }
}

/// Sends the report unless there is nothing to attach.
pub fn send_report<S: MailSender + ?Sized>(sender: &S, report: &Report) -> Result<()> {
    if report.attachments.is_empty() {
        return Err(StageError::Collaborator("no attachments found, email not sent".to_string()).into());
    }
    println!("📧 Sending email with {} attachments...", report.attachments.len());
    sender.send(report)?;
    println!("📧 Email sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::exit_code;
    use std::cell::RefCell;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Outbox {
        sent: RefCell<Vec<Report>>,
    }

    impl MailSender for Outbox {
        fn send(&self, report: &Report) -> Result<()> {
            self.sent.borrow_mut().push(report.clone());
            Ok(())
        }
    }

    #[test]
    fn missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sunfeast_merged_analysis.xlsx"), b"x").unwrap();
        let attachments = collect_attachments(dir.path(), "sunfeast");
        assert_eq!(attachments, [dir.path().join("sunfeast_merged_analysis.xlsx")]);
    }

    #[test]
    fn newest_qr_results_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("qr_barcode_results_20250101_090000.xlsx"), b"old").unwrap();
        thread::sleep(Duration::from_millis(20));
        fs::write(dir.path().join("qr_barcode_results_20250102_090000.xlsx"), b"new").unwrap();
        fs::write(dir.path().join("qr_barcode_results_notes.txt"), b"").unwrap();
        assert_eq!(
            newest_qr_results(dir.path()),
            Some(dir.path().join("qr_barcode_results_20250102_090000.xlsx"))
        );
    }

    #[test]
    fn csv_fallbacks_are_attached() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sunfeast_product_analysis.csv"), b"title,url\n").unwrap();
        fs::write(dir.path().join("qr_barcode_results_20250103_090000.csv"), b"Folder\n").unwrap();
        let attachments = collect_attachments(dir.path(), "sunfeast");
        assert_eq!(
            attachments,
            [
                dir.path().join("sunfeast_product_analysis.csv"),
                dir.path().join("qr_barcode_results_20250103_090000.csv"),
            ]
        );
        assert_eq!(content_type_for(&attachments[0]), CSV_MIME);
        assert_eq!(content_type_for(Path::new("x_merged_analysis.xlsx")), XLSX_MIME);
    }

    #[test]
    fn zero_attachments_fail_without_sending() {
        let outbox = Outbox::default();
        let report = build_report("sunfeast", Vec::new());
        let err = send_report(&outbox, &report).unwrap_err();
        assert_eq!(exit_code(&err), 2);
        assert!(outbox.sent.borrow().is_empty());
    }

    #[test]
    fn report_lists_attachments() {
        let outbox = Outbox::default();
        let report = build_report("sunfeast", vec![PathBuf::from("/out/sunfeast_product_analysis.xlsx")]);
        assert_eq!(report.subject, "Complete Product Analysis Results - sunfeast");
        assert!(report.body.contains("   • sunfeast_product_analysis.xlsx\n"));
        assert!(report.body.contains("Total files attached: 1"));
        send_report(&outbox, &report).unwrap();
        assert_eq!(outbox.sent.borrow().len(), 1);
    }
}
