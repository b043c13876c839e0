//! Image-to-text collaborator.
//!
//! Callers get a plain string back. A failed extraction is a string that
//! starts with [`ERROR_PREFIX`]; nothing here panics or returns `Err` to the
//! per-image loop.

use crate::cancel::CancelToken;
use crate::retry::RetryPolicy;
use crate::spreadsheet::Sheet;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ERROR_PREFIX: &str = "Error:";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_PROMPT: &str = "Extract all visible text from the provided image as accurately as possible. \
Carefully review the extracted results before generating the response to ensure no text is missed or misinterpreted. \
Do not hallucinate or assume any text that is not clearly visible. \
Focus on product information, ingredients, nutritional facts, brand names, and any other text content.";

pub const EXTRACTED_TEXT_FILE: &str = "extracted_text.xlsx";
pub const EXTRACTED_HEADERS: [&str; 4] = ["Image_Number", "Image_Name", "Extracted_Text", "Character_Count"];

pub fn is_error(text: &str) -> bool {
    text.starts_with(ERROR_PREFIX)
}

pub fn error_text(message: impl std::fmt::Display) -> String {
    format!("{} {}", ERROR_PREFIX, message)
}

pub trait TextExtractor {
    /// Best-effort transcription of the image, or an `Error:` string.
    fn extract_text(&self, image: &[u8], mime_type: &str) -> String;
}

#[derive(Debug, Error)]
enum VisionError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned {0}: {1}")]
    Status(StatusCode, String),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl VisionError {
    fn is_transient(&self) -> bool {
        match self {
            VisionError::Transport(_) => true,
            VisionError::Status(status, _) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            VisionError::Malformed(_) => false,
        }
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    prompt: String,
    policy: RetryPolicy,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            policy: RetryPolicy::rate_limited(),
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        )
    }

    fn call(&self, payload: &Value) -> Result<String, VisionError> {
        let response = self.client.post(self.endpoint()).json(payload).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::Status(status, body.chars().take(200).collect()));
        }
        let body: Value = response.json()?;
        response_text(&body).ok_or_else(|| VisionError::Malformed(body.to_string().chars().take(200).collect()))
    }
}

impl TextExtractor for GeminiClient {
    fn extract_text(&self, image: &[u8], mime_type: &str) -> String {
        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": self.prompt },
                    { "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(image) } }
                ]
            }]
        });

        let result = self.policy.run(
            |attempt| {
                if attempt > 1 {
                    println!("  🔁 Vision call attempt {}/{}", attempt, self.policy.max_attempts);
                }
                self.call(&payload)
            },
            VisionError::is_transient,
        );
        match result {
            Ok(retried) => retried.value,
            Err(e) if e.is_exhausted() => error_text(format!("API call failed after {} attempts", e.attempts())),
            Err(e) => error_text(e.into_inner()),
        }
    }
}

/// Text of the first candidate's parts, joined.
fn response_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: Vec<&str> = parts.iter().filter_map(|p| p.get("text")?.as_str()).collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

/// One transcribed image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageText {
    pub number: usize,
    pub name: String,
    pub text: String,
}

impl ImageText {
    pub fn failed(&self) -> bool {
        is_error(&self.text)
    }

    /// Characters of extracted text; failures count as zero.
    pub fn character_count(&self) -> usize {
        if self.failed() {
            0
        } else {
            self.text.chars().count()
        }
    }
}

/// Transcribes `images` in order, pausing between calls.
///
/// Stops early (returning what it has) when `cancel` trips.
pub fn extract_images<T, F>(
    extractor: &T,
    images: &[PathBuf],
    pause: Duration,
    cancel: &CancelToken,
    mut on_image: F,
) -> Vec<ImageText>
where
    T: TextExtractor + ?Sized,
    F: FnMut(&ImageText),
{
    let mut results = Vec::with_capacity(images.len());
    for (i, path) in images.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = match fs::read(path) {
            Ok(bytes) => extractor.extract_text(&bytes, mime_type_for(path)),
            Err(e) => error_text(format!("Could not read {}: {}", name, e)),
        };
        let result = ImageText {
            number: i + 1,
            name,
            text,
        };
        on_image(&result);
        results.push(result);

        if i + 1 < images.len() && !pause.is_zero() && !cancel.sleep(pause) {
            break;
        }
    }
    results
}

pub fn to_sheet(texts: &[ImageText]) -> Sheet {
    let mut sheet = Sheet::new(&EXTRACTED_HEADERS);
    for t in texts {
        sheet.push_row(vec![
            t.number.to_string(),
            t.name.clone(),
            t.text.clone(),
            t.character_count().to_string(),
        ]);
    }
    sheet
}

/// Reads an `extracted_text` sheet back as `(image number, text)` pairs,
/// skipping rows without a number or text.
pub fn from_sheet(sheet: &Sheet) -> Vec<(usize, String)> {
    (0..sheet.len())
        .filter_map(|row| {
            let number = sheet.cell(row, "Image_Number")?.trim().parse::<f64>().ok()? as usize;
            let text = sheet.cell(row, "Extracted_Text")?.to_string();
            (number > 0 && !text.trim().is_empty()).then_some((number, text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Answers from a script, one reply per call.
    struct ScriptedExtractor {
        replies: RefCell<Vec<String>>,
        seen_mime: RefCell<Vec<String>>,
    }

    impl TextExtractor for ScriptedExtractor {
        fn extract_text(&self, _image: &[u8], mime_type: &str) -> String {
            self.seen_mime.borrow_mut().push(mime_type.to_string());
            self.replies.borrow_mut().remove(0)
        }
    }

    #[test]
    fn sentinel_marks_failures() {
        assert!(is_error("Error: API call failed after 3 attempts"));
        assert!(!is_error("Net wt. 75 g. Error: none"));
        assert_eq!(error_text("boom"), "Error: boom");
    }

    #[test]
    fn failures_count_zero_characters() {
        let ok = ImageText { number: 1, name: "image_1.jpg".into(), text: "FSSAI Lic. No.".into() };
        let bad = ImageText { number: 2, name: "image_2.jpg".into(), text: "Error: timeout".into() };
        assert_eq!(ok.character_count(), 14);
        assert_eq!(bad.character_count(), 0);
    }

    #[test]
    fn folder_images_are_transcribed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("image_1.jpg");
        let second = dir.path().join("image_2.png");
        fs::write(&first, b"jpeg").unwrap();
        fs::write(&second, b"png").unwrap();
        let missing = dir.path().join("image_3.jpg");

        let extractor = ScriptedExtractor {
            replies: RefCell::new(vec!["Dark Fantasy".into(), "Error: API call failed after 3 attempts".into()]),
            seen_mime: RefCell::new(Vec::new()),
        };
        let mut progress = 0;
        let texts = extract_images(
            &extractor,
            &[first, second, missing],
            Duration::ZERO,
            &CancelToken::new(),
            |_| progress += 1,
        );

        assert_eq!(progress, 3);
        assert_eq!(texts[0].text, "Dark Fantasy");
        assert!(texts[1].failed());
        assert!(texts[2].text.starts_with("Error: Could not read image_3.jpg"));
        assert_eq!(*extractor.seen_mime.borrow(), ["image/jpeg", "image/png"]);

        let sheet = to_sheet(&texts);
        assert_eq!(sheet.headers, EXTRACTED_HEADERS);
        assert_eq!(sheet.rows[0], ["1", "image_1.jpg", "Dark Fantasy", "12"]);
        assert_eq!(sheet.rows[1][3], "0");
        assert_eq!(from_sheet(&sheet)[0], (1, "Dark Fantasy".to_string()));
    }

    #[test]
    fn cancel_during_pause_stops_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let images: Vec<PathBuf> = (1..=3)
            .map(|n| {
                let path = dir.path().join(format!("image_{}.jpg", n));
                fs::write(&path, b"jpeg").unwrap();
                path
            })
            .collect();
        let extractor = ScriptedExtractor {
            replies: RefCell::new(vec!["one".into(), "two".into(), "three".into()]),
            seen_mime: RefCell::new(Vec::new()),
        };
        let cancel = CancelToken::new();
        let started = std::time::Instant::now();
        let texts = extract_images(&extractor, &images, Duration::from_secs(30), &cancel, |_| cancel.cancel());

        assert_eq!(texts.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn candidate_text_is_joined() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "A"}, {"text": "B"}]}}]});
        assert_eq!(response_text(&body).as_deref(), Some("AB"));
        assert_eq!(response_text(&json!({"candidates": []})), None);
    }

    #[test]
    fn rate_limits_are_transient() {
        assert!(VisionError::Status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(VisionError::Status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!VisionError::Status(StatusCode::BAD_REQUEST, String::new()).is_transient());
        assert!(!VisionError::Malformed(String::new()).is_transient());
    }
}
