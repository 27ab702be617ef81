//! Source material attached to a session: extracted PDF text or a grounded
//! web-search answer.

use crate::error::StudyError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{debug, warn};

/// Turns an opaque document into plain text.
pub trait TextExtractor: Send + Sync + std::fmt::Debug {
    fn extract(&self, bytes: &[u8]) -> Result<String, StudyError>;
}

/// PDF text layer via `pdf-extract`. Scanned PDFs without text are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, StudyError> {
        let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            warn!(error = %e, "PDF extraction failed");
            StudyError::Pdf(e.to_string())
        })?;
        let text = tidy_extracted(&raw);
        if text.is_empty() {
            return Err(StudyError::Pdf("the document has no extractable text".to_string()));
        }
        debug!(chars = text.chars().count(), "extracted PDF text");
        Ok(text)
    }
}

/// Trims each line, drops form feeds and collapses runs of blank lines.
fn tidy_extracted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.replace('\u{c}', "\n").lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMaterial {
    pub name: String,
    pub text: String,
}

impl SourceMaterial {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into() }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// At most `max_chars` characters, cut on a char boundary.
    pub fn excerpt(&self, max_chars: usize) -> Cow<'_, str> {
        match self.text.char_indices().nth(max_chars) {
            Some((cut, _)) => Cow::Owned(format!("{}\n[...truncated]", &self.text[..cut])),
            None => Cow::Borrowed(&self.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub title: String,
    pub url: String,
}
