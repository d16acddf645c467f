//! On-disk copies of remote response bodies, one file per fetch.
//!
//! Bodies land under `<category>/<collection_id>/` as
//! `<YYYYmmddTHHMMSSZ>-<status>-<run>.<ext>` and every fetch also replaces
//! `latest_response.txt` in the same directory, so the last answer from the
//! survey API is always at a fixed path. Error bodies are kept like any other.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ttag_core::Category;
use uuid::Uuid;

pub const LATEST_RESPONSE_FILE: &str = "latest_response.txt";

/// One fetched body, successful or not.
#[derive(Debug, Clone, Copy)]
pub struct ResponseBody<'a> {
    pub category: Category,
    pub collection_id: &'a str,
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    pub status: u16,
    pub body: &'a [u8],
}

impl ResponseBody<'_> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedBody {
    /// Relative to the archive root.
    pub relative_path: PathBuf,
    pub latest_path: PathBuf,
    pub sha256: String,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ResponseArchive {
    root: PathBuf,
}

impl ResponseArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_dir(&self, category: Category, collection_id: &str) -> PathBuf {
        PathBuf::from(category.as_str()).join(path_segment(collection_id))
    }

    pub fn relative_path(&self, response: &ResponseBody<'_>) -> PathBuf {
        let run = response.run_id.simple().to_string();
        let ext = if response.is_success() { "json" } else { "txt" };
        self.collection_dir(response.category, response.collection_id)
            .join(format!(
                "{}-{}-{}.{ext}",
                response.fetched_at.format("%Y%m%dT%H%M%SZ"),
                response.status,
                &run[..8]
            ))
    }

    /// Writes the per-fetch file and refreshes `latest_response.txt`.
    pub async fn write(&self, response: &ResponseBody<'_>) -> anyhow::Result<ArchivedBody> {
        let relative_path = self.relative_path(response);
        let path = self.root.join(&relative_path);
        let dir = self
            .root
            .join(self.collection_dir(response.category, response.collection_id));
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        replace_file(&path, response.body).await?;
        let latest_path = dir.join(LATEST_RESPONSE_FILE);
        replace_file(&latest_path, response.body).await?;

        Ok(ArchivedBody {
            relative_path,
            latest_path,
            sha256: sha256_hex(response.body),
            bytes: response.body.len(),
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Collection ids are opaque remote identifiers; keep them to one safe path segment.
fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Temp file plus rename, so readers never see a half-written body.
async fn replace_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("partial");
    let mut file = fs::File::create(&tmp)
        .await
        .with_context(|| format!("creating {}", tmp.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing {}", tmp.display()))?;
    drop(file);
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("moving {} into place", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn response<'a>(collection_id: &'a str, status: u16, body: &'a [u8]) -> ResponseBody<'a> {
        ResponseBody {
            category: Category::Tree,
            collection_id,
            run_id: Uuid::parse_str("0f5e2b7c-1111-4222-8333-944445555666").unwrap(),
            fetched_at: at("2026-03-01T08:30:05Z"),
            status,
            body,
        }
    }

    #[test]
    fn paths_are_keyed_by_category_and_collection() {
        let archive = ResponseArchive::new("/srv/raw");
        assert_eq!(
            archive.relative_path(&response("aTreeForm", 200, b"{}")),
            PathBuf::from("tree/aTreeForm/20260301T083005Z-200-0f5e2b7c.json")
        );
        assert_eq!(
            archive.relative_path(&response("aTreeForm", 401, b"Invalid token.")),
            PathBuf::from("tree/aTreeForm/20260301T083005Z-401-0f5e2b7c.txt")
        );
        assert_eq!(
            archive.collection_dir(Category::Seed, "../x y"),
            PathBuf::from("seed/___x_y")
        );
    }

    #[tokio::test]
    async fn write_keeps_every_fetch_and_refreshes_latest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ResponseArchive::new(dir.path());

        let ok = archive
            .write(&response("treeForm", 200, br#"{"results":[]}"#))
            .await
            .unwrap();
        let mut failed = response("treeForm", 502, b"<html>Bad Gateway</html>");
        failed.fetched_at = at("2026-03-01T18:00:00Z");
        let failed = archive.write(&failed).await.unwrap();

        assert_ne!(ok.relative_path, failed.relative_path);
        assert_eq!(
            std::fs::read(dir.path().join(&ok.relative_path)).unwrap(),
            br#"{"results":[]}"#
        );
        assert_eq!(
            std::fs::read(&failed.latest_path).unwrap(),
            b"<html>Bad Gateway</html>"
        );
        assert_eq!(failed.bytes, 24);
        assert_eq!(failed.sha256, sha256_hex(b"<html>Bad Gateway</html>"));
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
