//! Build the text to embed and the stored metadata for a record.

use crate::extract::html_to_text;
use crate::models::{DocumentMetadata, IndexedDocument, LibraryRecord};

/// Text to embed: the fulltext when there is any, otherwise the record's
/// descriptive fields joined by spaces. Blank when the record has nothing.
pub fn document_text(record: &LibraryRecord) -> String {
    if let Some(ft) = record.fulltext.as_ref().filter(|f| !f.text.trim().is_empty()) {
        return ft.text.clone();
    }

    let notes = record
        .notes
        .iter()
        .map(|n| html_to_text(n))
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    [
        record.title.clone().unwrap_or_default(),
        record.creators_text(),
        record.abstract_note.clone().unwrap_or_default(),
        record.publication.clone().unwrap_or_default(),
        record.tags.join(" "),
        notes,
    ]
    .into_iter()
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

pub fn document_metadata(record: &LibraryRecord) -> DocumentMetadata {
    let fulltext = record
        .fulltext
        .as_ref()
        .filter(|f| !f.text.trim().is_empty());
    DocumentMetadata {
        item_key: record.key.clone(),
        item_type: record.item_type.to_string(),
        title: record.title.clone().unwrap_or_default(),
        date: record.date.clone().unwrap_or_default(),
        date_added: record
            .date_added
            .map(|d| d.to_rfc3339())
            .unwrap_or_default(),
        date_modified: record
            .date_modified
            .map(|d| d.to_rfc3339())
            .unwrap_or_default(),
        creators: record.creators_text(),
        publication: record.publication.clone().unwrap_or_default(),
        url: record.url.clone().unwrap_or_default(),
        doi: record.doi.clone().unwrap_or_default(),
        tags: record.tags.join(" "),
        citation_key: record.citation_key().unwrap_or_default(),
        has_fulltext: fulltext.is_some(),
        fulltext_source: fulltext
            .map(|f| f.source.as_str().to_string())
            .unwrap_or_default(),
    }
}

/// `None` when there is nothing to embed.
pub fn build_document(record: &LibraryRecord) -> Option<IndexedDocument> {
    let text = document_text(record);
    if text.is_empty() {
        return None;
    }
    Some(IndexedDocument {
        id: record.key.clone(),
        text,
        metadata: document_metadata(record),
    })
}
