//! Plain-text extraction from attachment files.
//!
//! Callers that know what an attachment is (from its content type) pass a
//! [`TextFormat`]; otherwise the format is guessed from the file suffix.
//! PDFs are parsed page by page up to the page cap, HTML is tag-stripped,
//! and anything else is read as lossy UTF-8. Output is always bounded by
//! [`ExtractLimits::max_chars`].
//!
//! These functions are blocking; async callers run them on
//! `tokio::task::spawn_blocking`.

use regex::Regex;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::OnceLock;

use lopdf::Document;

use crate::config::ExtractionConfig;
use crate::models::FulltextSource;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Cost bounds applied to every extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub pdf_max_pages: usize,
    pub max_file_bytes: u64,
    pub max_chars: usize,
}

impl From<&ExtractionConfig> for ExtractLimits {
    fn from(cfg: &ExtractionConfig) -> Self {
        Self {
            pdf_max_pages: cfg.pdf_max_pages,
            max_file_bytes: cfg.max_file_bytes,
            max_chars: cfg.fulltext_max_chars,
        }
    }
}

impl Default for ExtractLimits {
    fn default() -> Self {
        (&ExtractionConfig::default()).into()
    }
}

/// How to turn an attachment's bytes into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Pdf,
    Html,
    Plain,
}

impl TextFormat {
    /// Guess from the file suffix. Unknown suffixes are read as plain text.
    pub fn from_path(path: &Path) -> Self {
        let suffix = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match suffix.as_str() {
            "pdf" => TextFormat::Pdf,
            "html" | "htm" => TextFormat::Html,
            _ => TextFormat::Plain,
        }
    }
}

impl From<FulltextSource> for TextFormat {
    fn from(source: FulltextSource) -> Self {
        match source {
            FulltextSource::Pdf => TextFormat::Pdf,
            FulltextSource::Html => TextFormat::Html,
        }
    }
}

/// Extract text from the file at `path`, truncated to `limits.max_chars`.
///
/// `format` overrides the suffix guess; a PDF-typed attachment stored as
/// `download` is still parsed as a PDF.
pub fn extract_file(
    path: &Path,
    format: Option<TextFormat>,
    limits: &ExtractLimits,
) -> Result<String, ExtractError> {
    let size = std::fs::metadata(path)?.len();
    if size > limits.max_file_bytes {
        return Err(ExtractError::TooLarge {
            size,
            limit: limits.max_file_bytes,
        });
    }
    let bytes = std::fs::read(path)?;

    let text = match format.unwrap_or_else(|| TextFormat::from_path(path)) {
        TextFormat::Pdf => extract_pdf(&bytes, limits.pdf_max_pages)?,
        TextFormat::Html => html_to_text(&String::from_utf8_lossy(&bytes)),
        TextFormat::Plain => String::from_utf8_lossy(&bytes).into_owned(),
    };

    Ok(truncate_chars(text.trim(), limits.max_chars))
}

/// Text of the first `max_pages` pages of a PDF.
///
/// Pages past the cap are never parsed. `pdf-extract` can panic on
/// malformed input; the panic is contained and reported as
/// [`ExtractError::Pdf`].
pub fn extract_pdf(bytes: &[u8], max_pages: usize) -> Result<String, ExtractError> {
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_leading_pages(bytes, max_pages))) {
        Ok(result) => result,
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

fn pdf_leading_pages(bytes: &[u8], max_pages: usize) -> Result<String, ExtractError> {
    let mut doc = Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    if doc.is_encrypted() {
        // Most "encrypted" papers only restrict printing and open with an
        // empty user password.
        doc.decrypt("")
            .map_err(|e| ExtractError::Pdf(format!("encrypted: {}", e)))?;
    }

    let mut pages = Vec::new();
    for page_num in doc.get_pages().into_keys().take(max_pages) {
        let mut text = String::new();
        let rendered = {
            let mut output = pdf_extract::PlainTextOutput::new(&mut text);
            pdf_extract::output_doc_page(&doc, &mut output, page_num)
        };
        match rendered {
            Ok(()) => pages.push(text),
            Err(e) if pages.is_empty() => return Err(ExtractError::Pdf(e.to_string())),
            Err(e) => {
                tracing::debug!(page = page_num, error = %e, "stopping at unreadable page");
                break;
            }
        }
    }
    Ok(pages.join("\n"))
}

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)\s*>")
            .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Strip markup from an HTML document or fragment.
///
/// Drops `<script>`, `<style>` and `<head>` blocks, replaces remaining tags
/// with spaces, decodes the common entities, and collapses whitespace.
pub fn html_to_text(html: &str) -> String {
    let without_blocks = script_style_re().replace_all(html, " ");
    let without_tags = tag_re().replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);
    whitespace_re().replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// First `max_chars` characters of `s` (char boundaries, not bytes).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn truncate_is_exact_and_char_safe() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("ééééé", 2), "éé");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn html_is_stripped() {
        let html = r#"<html><head><title>T</title><style>p{color:red}</style></head>
            <body><p>Hello&nbsp;<b>world</b></p><script>alert(1)</script>
            <p>Fish &amp; chips</p></body></html>"#;
        assert_eq!(html_to_text(html), "Hello world Fish & chips");
    }

    #[test]
    fn note_fragment_is_stripped() {
        assert_eq!(
            html_to_text("<div data-schema-version=\"8\"><p>Key finding:\n  X &lt; Y</p></div>"),
            "Key finding: X < Y"
        );
    }

    /// A PDF with one page per word, each page showing only that word.
    fn pdf_with_pages(words: &[&str]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids: Vec<Object> = Vec::new();
        for word in words {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![100.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*word)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => words.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn pdf_pages_past_the_cap_are_ignored() {
        let bytes = pdf_with_pages(&["alphapage", "betapage", "gammapage", "deltapage"]);

        let text = extract_pdf(&bytes, 2).unwrap();
        assert!(text.contains("alphapage"), "{:?}", text);
        assert!(text.contains("betapage"), "{:?}", text);
        assert!(!text.contains("gammapage"), "{:?}", text);
        assert!(!text.contains("deltapage"), "{:?}", text);

        let all = extract_pdf(&bytes, 10).unwrap();
        assert!(all.contains("deltapage"), "{:?}", all);
    }

    #[test]
    fn page_cap_applies_through_extract_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, pdf_with_pages(&["firstpage", "secondpage"])).unwrap();
        let limits = ExtractLimits {
            pdf_max_pages: 1,
            ..ExtractLimits::default()
        };
        let text = extract_file(&path, None, &limits).unwrap();
        assert!(text.contains("firstpage"));
        assert!(!text.contains("secondpage"));
    }

    #[test]
    fn declared_pdf_without_suffix_is_parsed_as_pdf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("download");
        std::fs::write(&path, pdf_with_pages(&["suffixlesspdf"])).unwrap();

        let text = extract_file(&path, Some(TextFormat::Pdf), &ExtractLimits::default()).unwrap();
        assert!(text.contains("suffixlesspdf"), "{:?}", text);
        assert!(!text.contains("%PDF"));

        // Without the hint the bytes would be read as text.
        let raw = extract_file(&path, None, &ExtractLimits::default()).unwrap();
        assert!(raw.starts_with("%PDF"));
    }

    #[test]
    fn format_guess_from_suffix() {
        assert_eq!(TextFormat::from_path(Path::new("a/B.PDF")), TextFormat::Pdf);
        assert_eq!(TextFormat::from_path(Path::new("snap.htm")), TextFormat::Html);
        assert_eq!(TextFormat::from_path(Path::new("download")), TextFormat::Plain);
        assert_eq!(TextFormat::from(FulltextSource::Html), TextFormat::Html);
    }

    #[test]
    fn invalid_pdf_is_an_error() {
        let err = extract_pdf(b"not a pdf", 10).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn long_text_file_is_capped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "x".repeat(25_000)).unwrap();
        let text = extract_file(&path, None, &ExtractLimits::default()).unwrap();
        assert_eq!(text.chars().count(), 10_000);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.html");
        std::fs::write(&path, "<p>".repeat(100)).unwrap();
        let limits = ExtractLimits {
            max_file_bytes: 10,
            ..ExtractLimits::default()
        };
        assert!(matches!(
            extract_file(&path, None, &limits),
            Err(ExtractError::TooLarge { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = extract_file(Path::new("/nonexistent/x.pdf"), None, &ExtractLimits::default())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }
}
