//! Parquet backups of processed records, one file per category and run.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ttag_core::Category;

/// One processed submission, as it went through the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub record_id: Option<String>,
    pub remote_id: Option<String>,
    pub status: String,
    pub raw_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

pub fn snapshot_file_name(category: Category) -> String {
    format!("{}_backup.parquet", category.as_str())
}

pub fn write_snapshot(path: &Path, rows: &[SnapshotRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("record_id", DataType::Utf8, true),
        ArrowField::new("remote_id", DataType::Utf8, true),
        ArrowField::new("status", DataType::Utf8, false),
        ArrowField::new("raw_json", DataType::Utf8, false),
    ]));
    let record_ids = StringArray::from(rows.iter().map(|r| r.record_id.as_deref()).collect::<Vec<_>>());
    let remote_ids = StringArray::from(rows.iter().map(|r| r.remote_id.as_deref()).collect::<Vec<_>>());
    let statuses = StringArray::from(rows.iter().map(|r| r.status.as_str()).collect::<Vec<_>>());
    let raw = StringArray::from(rows.iter().map(|r| r.raw_json.as_str()).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(record_ids),
            Arc::new(remote_ids),
            Arc::new(statuses),
            Arc::new(raw),
        ],
    )
    .context("building snapshot record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

pub fn manifest_entry(name: &str, run_dir: &Path, path: &Path, rows: usize) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path.strip_prefix(run_dir).unwrap_or(path).display().to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
        rows,
    })
}

pub fn write_manifest(run_dir: &Path, files: Vec<SnapshotManifestFile>) -> Result<PathBuf> {
    let manifest = SnapshotManifest {
        schema_version: 1,
        files,
    };
    let manifest_path = run_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    std::fs::write(&manifest_path, bytes)
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}
