//! services/api/src/adapters/extract.rs
//!
//! This module contains the adapter for document text extraction.
//! It implements the `TextExtractionService` port from the `core` crate,
//! handling PDF files via `pdf-extract` and DOCX files by reading
//! `word/document.xml` out of the zip container.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use study_assistant_core::domain::DocumentKind;
use study_assistant_core::ports::{PortError, PortResult, TextExtractionService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `TextExtractionService` for PDF and DOCX uploads.
#[derive(Clone, Default)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    /// Creates a new `DocumentExtractor`.
    pub fn new() -> Self {
        Self
    }
}

//=========================================================================================
// `TextExtractionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextExtractionService for DocumentExtractor {
    /// Extracts plain text from the raw bytes of an uploaded document.
    ///
    /// Parsing is CPU-bound, so it runs on the blocking pool rather than
    /// stalling the async runtime.
    async fn extract(&self, data: &[u8], kind: DocumentKind) -> PortResult<String> {
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || match kind {
            DocumentKind::Pdf => extract_pdf(&data),
            DocumentKind::Docx => extract_docx(&data),
        })
        .await
        .map_err(|e| PortError::Unexpected(format!("extraction task panicked: {}", e)))?
    }
}

fn extract_pdf(data: &[u8]) -> PortResult<String> {
    pdf_extract::extract_text_from_mem(data).map_err(|e| PortError::Extraction(e.to_string()))
}

/// Pulls the paragraph text out of a DOCX container: unzip, find the main
/// document part, then collect the contents of every `w:t` run. Paragraph
/// ends become newlines so the chunker sees roughly the original layout.
fn extract_docx(data: &[u8]) -> PortResult<String> {
    let cursor = std::io::Cursor::new(data);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| PortError::Extraction(e.to_string()))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| PortError::Extraction(format!("not a DOCX archive: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| PortError::Extraction(e.to_string()))?;

    let mut reader = Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_run = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"w:t" => in_run = false,
            Ok(Event::End(e)) if e.name().as_ref() == b"w:p" => text.push('\n'),
            Ok(Event::Text(t)) if in_run => {
                let run = t
                    .unescape()
                    .map_err(|e| PortError::Extraction(e.to_string()))?;
                text.push_str(&run);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PortError::Extraction(e.to_string())),
            _ => {}
        }
    }

    Ok(text)
}
