//! Text extraction for the supported document formats.
//!
//! | Extension | Method |
//! |-----------|--------|
//! | `pdf` | `pdf-extract` |
//! | `docx` | `word/document.xml` read from the ZIP container with `quick-xml` |
//! | `md`, `txt` | read as UTF-8 |
//!
//! Extraction never panics. A file that cannot be read yields
//! [`RagError::UnsupportedFormat`] or [`RagError::Extraction`] and the
//! ingest layer skips it.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use ragchat_core::{RagError, Result};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "md", "txt"];

/// Turns a file into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Extractor for the formats in [`SUPPORTED_EXTENSIONS`], chosen by extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let ext = extension(path)
            .ok_or_else(|| RagError::UnsupportedFormat(path.display().to_string()))?;
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(RagError::UnsupportedFormat(format!(
                "{} (.{})",
                path.display(),
                ext
            )));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| RagError::Extraction(format!("{}: {}", path.display(), e)))?;
        let text = match ext.as_str() {
            "pdf" => extract_pdf(&bytes),
            "docx" => extract_docx(&bytes),
            _ => String::from_utf8(bytes)
                .map_err(|_| RagError::Extraction("file is not valid UTF-8".to_string())),
        };
        text.map_err(|e| match e {
            RagError::Extraction(msg) => {
                RagError::Extraction(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }
}

/// Lowercased extension of `path`, without the dot.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::Extraction(format!("PDF extraction failed: {}", e)))
}

fn ooxml(e: impl std::fmt::Display) -> RagError {
    RagError::Extraction(format!("DOCX extraction failed: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml("word/document.xml not found"))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(ooxml)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml("word/document.xml exceeds size limit"));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().map_err(ooxml)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
