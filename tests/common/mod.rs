//! Test fixture: a throwaway Zotero library (schema subset + storage dir).
#![allow(dead_code)]

use std::path::PathBuf;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;

use zotero_index::config::SourceConfig;

const SCHEMA: &[&str] = &[
    "CREATE TABLE itemTypes (itemTypeID INTEGER PRIMARY KEY, typeName TEXT NOT NULL)",
    "CREATE TABLE items (itemID INTEGER PRIMARY KEY, itemTypeID INT NOT NULL, key TEXT NOT NULL UNIQUE, dateAdded TEXT NOT NULL, dateModified TEXT NOT NULL)",
    "CREATE TABLE fields (fieldID INTEGER PRIMARY KEY, fieldName TEXT NOT NULL)",
    "CREATE TABLE itemDataValues (valueID INTEGER PRIMARY KEY, value UNIQUE)",
    "CREATE TABLE itemData (itemID INT, fieldID INT, valueID INT, PRIMARY KEY (itemID, fieldID))",
    "CREATE TABLE creators (creatorID INTEGER PRIMARY KEY, firstName TEXT, lastName TEXT, fieldMode INT)",
    "CREATE TABLE itemCreators (itemID INT, creatorID INT, creatorTypeID INT DEFAULT 1, orderIndex INT DEFAULT 0, PRIMARY KEY (itemID, creatorID))",
    "CREATE TABLE itemNotes (itemID INTEGER PRIMARY KEY, parentItemID INT, note TEXT, title TEXT)",
    "CREATE TABLE itemAttachments (itemID INTEGER PRIMARY KEY, parentItemID INT, linkMode INT, contentType TEXT, path TEXT)",
    "CREATE TABLE tags (tagID INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    "CREATE TABLE itemTags (itemID INT, tagID INT, type INT DEFAULT 0, PRIMARY KEY (itemID, tagID))",
];

const ITEM_TYPES: &[(i64, &str)] = &[
    (1, "journalArticle"),
    (2, "preprint"),
    (3, "book"),
    (4, "conferencePaper"),
    (14, "attachment"),
    (28, "note"),
];

const FIELDS: &[(i64, &str)] = &[
    (1, "title"),
    (2, "abstractNote"),
    (3, "DOI"),
    (4, "extra"),
    (5, "date"),
    (6, "url"),
    (7, "publicationTitle"),
];

pub struct ZoteroFixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pool: SqlitePool,
    next_id: i64,
}

impl ZoteroFixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let zotero_dir = dir.path().join("Zotero");
        let storage_dir = zotero_dir.join("storage");
        std::fs::create_dir_all(&storage_dir).unwrap();
        let db_path = zotero_dir.join("zotero.sqlite");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        for (id, name) in ITEM_TYPES {
            sqlx::query("INSERT INTO itemTypes VALUES (?, ?)")
                .bind(id)
                .bind(name)
                .execute(&pool)
                .await
                .unwrap();
        }
        for (id, name) in FIELDS {
            sqlx::query("INSERT INTO fields VALUES (?, ?)")
                .bind(id)
                .bind(name)
                .execute(&pool)
                .await
                .unwrap();
        }

        Self {
            dir,
            db_path,
            storage_dir,
            pool,
            next_id: 1,
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            db_path: Some(self.db_path.clone()),
            storage_dir: Some(self.storage_dir.clone()),
            busy_timeout_ms: 5_000,
        }
    }

    async fn insert_item(&mut self, key: &str, type_name: &str, modified: &str) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        let type_id = ITEM_TYPES
            .iter()
            .find(|(_, n)| *n == type_name)
            .map(|(i, _)| *i)
            .unwrap_or_else(|| panic!("unknown item type {}", type_name));
        sqlx::query("INSERT INTO items VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(type_id)
            .bind(key)
            .bind(modified)
            .bind(modified)
            .execute(&self.pool)
            .await
            .unwrap();
        id
    }

    /// Add a regular item with `fields` given by Zotero field name.
    pub async fn add_item(
        &mut self,
        key: &str,
        type_name: &str,
        fields: &[(&str, &str)],
        modified: &str,
    ) -> i64 {
        let id = self.insert_item(key, type_name, modified).await;
        for (name, value) in fields {
            let field_id = FIELDS
                .iter()
                .find(|(_, n)| n == name)
                .map(|(i, _)| *i)
                .unwrap_or_else(|| panic!("unknown field {}", name));
            sqlx::query("INSERT OR IGNORE INTO itemDataValues (value) VALUES (?)")
                .bind(value)
                .execute(&self.pool)
                .await
                .unwrap();
            let value_id: i64 = sqlx::query_scalar("SELECT valueID FROM itemDataValues WHERE value = ?")
                .bind(value)
                .fetch_one(&self.pool)
                .await
                .unwrap();
            sqlx::query("INSERT INTO itemData VALUES (?, ?, ?)")
                .bind(id)
                .bind(field_id)
                .bind(value_id)
                .execute(&self.pool)
                .await
                .unwrap();
        }
        id
    }

    pub async fn add_creator(&self, item_id: i64, first: &str, last: &str, order: i64) {
        let creator_id = sqlx::query("INSERT INTO creators (firstName, lastName, fieldMode) VALUES (?, ?, 0)")
            .bind(first)
            .bind(last)
            .execute(&self.pool)
            .await
            .unwrap()
            .last_insert_rowid();
        sqlx::query("INSERT INTO itemCreators (itemID, creatorID, orderIndex) VALUES (?, ?, ?)")
            .bind(item_id)
            .bind(creator_id)
            .bind(order)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn add_tag(&self, item_id: i64, name: &str) {
        sqlx::query("INSERT OR IGNORE INTO tags (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO itemTags (itemID, tagID) SELECT ?, tagID FROM tags WHERE name = ?")
            .bind(item_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn add_note(&mut self, parent_id: i64, note: &str) {
        let key = format!("NOTE{:04}", self.next_id);
        let id = self.insert_item(&key, "note", "2024-01-01 00:00:00").await;
        sqlx::query("INSERT INTO itemNotes (itemID, parentItemID, note) VALUES (?, ?, ?)")
            .bind(id)
            .bind(parent_id)
            .bind(note)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    /// Add an imported attachment and write `bytes` to
    /// `storage/<att_key>/<file_name>`.
    pub async fn add_attachment(
        &mut self,
        parent_id: i64,
        att_key: &str,
        content_type: &str,
        file_name: &str,
        bytes: &[u8],
    ) {
        let id = self.insert_item(att_key, "attachment", "2024-01-01 00:00:00").await;
        sqlx::query("INSERT INTO itemAttachments VALUES (?, ?, 0, ?, ?)")
            .bind(id)
            .bind(parent_id)
            .bind(content_type)
            .bind(format!("storage:{}", file_name))
            .execute(&self.pool)
            .await
            .unwrap();
        let dir = self.storage_dir.join(att_key);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file_name), bytes).unwrap();
    }
}

/// An HTML snapshot page whose visible text is `body`.
pub fn html_page(body: &str) -> Vec<u8> {
    format!(
        "<html><head><title>ignored</title><style>p {{ color: red }}</style></head><body><p>{}</p></body></html>",
        body
    )
    .into_bytes()
}

/// Minimal single-page PDF showing `phrase` in Helvetica.
pub fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}
