//! Core domain model for the tree/seed tagging pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod codes;
pub mod schema;

pub use codes::{
    clean_gps, derive_species_code, derive_unique_id, CodeTables, DerivedCodes, Deriver,
    QrTemplate, UNKNOWN_CODE,
};
pub use schema::{coerce_attributes, map_fields, CoercionError, EntitySchema, SEED_SCHEMA, TREE_SCHEMA};

pub const CRATE_NAME: &str = "ttag-core";

/// One submission as returned by the survey API: flat key → value pairs.
pub type RemoteRecord = serde_json::Map<String, JsonValue>;

/// Coerced domain attributes persisted alongside an entity.
pub type Attributes = BTreeMap<String, String>;

/// Tree photo attributes shown on scan pages, in display order.
pub const TREE_PHOTO_FIELDS: [&str; 5] = [
    "MOTHER_TREE_MAIN_PHOTO",
    "MOTHER_TREE_NORTH_PHOTO",
    "MOTHER_TREE_EAST_PHOTO",
    "MOTHER_TREE_SOUTH_PHOTO",
    "MOTHER_TREE_WEST_PHOTO",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tree,
    Seed,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Tree, Category::Seed];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Tree => "tree",
            Category::Seed => "seed",
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            Category::Tree => "TREE",
            Category::Seed => "SEED",
        }
    }

    pub fn schema(self) -> &'static EntitySchema {
        match self {
            Category::Tree => &TREE_SCHEMA,
            Category::Seed => &SEED_SCHEMA,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for one sync decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SyncStatus {
    Success,
    Duplicate,
    Updated,
    Error(String),
}

impl SyncStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, SyncStatus::Error(_))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Success => f.write_str("Success"),
            SyncStatus::Duplicate => f.write_str("Duplicate"),
            SyncStatus::Updated => f.write_str("Updated"),
            SyncStatus::Error(detail) => write!(f, "Error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized sync status `{0}`")]
pub struct ParseStatusError(pub String);

impl FromStr for SyncStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "Success" => Ok(SyncStatus::Success),
            "Duplicate" => Ok(SyncStatus::Duplicate),
            "Updated" => Ok(SyncStatus::Updated),
            _ => match trimmed.strip_prefix("Error:") {
                Some(detail) => Ok(SyncStatus::Error(detail.trim().to_string())),
                None => Err(ParseStatusError(s.to_string())),
            },
        }
    }
}

impl TryFrom<String> for SyncStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, ParseStatusError> {
        value.parse()
    }
}

impl From<SyncStatus> for String {
    fn from(status: SyncStatus) -> Self {
        status.to_string()
    }
}

/// A planted specimen record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    #[serde(rename = "TreeID")]
    pub tree_id: String,
    #[serde(rename = "RemoteID")]
    pub remote_id: Option<String>,
    #[serde(rename = "GPS")]
    pub gps: Option<String>,
    #[serde(rename = "RegionCode")]
    pub region_code: String,
    #[serde(rename = "ReserveCode")]
    pub reserve_code: String,
    #[serde(rename = "SpeciesCode")]
    pub species_code: String,
    #[serde(rename = "QRCodeURL")]
    pub qr_code_url: String,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Tree {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn photo_urls(&self) -> Vec<String> {
        TREE_PHOTO_FIELDS
            .iter()
            .filter_map(|key| self.attribute(key))
            .map(ToString::to_string)
            .collect()
    }

    /// Parsed `(lat, lon)` when the stored GPS string is a valid pair.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let (lat, lon) = self.gps.as_deref()?.split_once(',')?;
        Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
    }
}

/// A collected-seed record. `parent_tree_id` is a lookup-only reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    #[serde(rename = "SeedID")]
    pub seed_id: String,
    #[serde(rename = "RemoteID")]
    pub remote_id: Option<String>,
    #[serde(rename = "ParentTreeID")]
    pub parent_tree_id: Option<String>,
    #[serde(rename = "SpeciesCode")]
    pub species_code: String,
    #[serde(rename = "QRCodeURL")]
    pub qr_code_url: String,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Seed {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Insert candidate for a tree. `fields` are mapped but not yet coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTree {
    pub tree_id: String,
    pub remote_id: Option<String>,
    pub gps: Option<String>,
    pub region_code: String,
    pub reserve_code: String,
    pub species_code: String,
    pub qr_code_url: String,
    pub fields: RemoteRecord,
}

impl NewTree {
    pub fn from_parts(
        remote_id: Option<String>,
        gps: Option<String>,
        codes: DerivedCodes,
        fields: RemoteRecord,
    ) -> Self {
        Self {
            tree_id: codes.unique_id,
            remote_id,
            gps: gps.filter(|g| !g.is_empty()),
            region_code: codes.region_code,
            reserve_code: codes.reserve_code,
            species_code: codes.species_code,
            qr_code_url: codes.qr_code_url,
            fields,
        }
    }

    pub fn into_tree(self, attributes: Attributes, created_at: DateTime<Utc>) -> Tree {
        Tree {
            tree_id: self.tree_id,
            remote_id: self.remote_id,
            gps: self.gps,
            region_code: self.region_code,
            reserve_code: self.reserve_code,
            species_code: self.species_code,
            qr_code_url: self.qr_code_url,
            created_at,
            attributes,
        }
    }
}

/// Insert candidate for a seed. `ParentTreeID` is lifted out of the mapped fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSeed {
    pub seed_id: String,
    pub remote_id: Option<String>,
    pub parent_tree_id: Option<String>,
    pub species_code: String,
    pub qr_code_url: String,
    pub fields: RemoteRecord,
}

impl NewSeed {
    pub const PARENT_FIELD: &'static str = "ParentTreeID";

    pub fn from_parts(remote_id: Option<String>, codes: DerivedCodes, mut fields: RemoteRecord) -> Self {
        let parent_tree_id = fields
            .remove(Self::PARENT_FIELD)
            .as_ref()
            .and_then(value_as_text);
        Self {
            seed_id: codes.unique_id,
            remote_id,
            parent_tree_id,
            species_code: codes.species_code,
            qr_code_url: codes.qr_code_url,
            fields,
        }
    }

    pub fn into_seed(self, attributes: Attributes, created_at: DateTime<Utc>) -> Seed {
        Seed {
            seed_id: self.seed_id,
            remote_id: self.remote_id,
            parent_tree_id: self.parent_tree_id,
            species_code: self.species_code,
            qr_code_url: self.qr_code_url,
            created_at,
            attributes,
        }
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    #[serde(rename = "SyncID")]
    pub sync_id: i64,
    #[serde(rename = "RecordID")]
    pub record_id: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Status")]
    pub status: SyncStatus,
}

/// Verbatim remote response body kept per sync run, whatever its HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    pub id: i64,
    pub category: Category,
    pub collection_id: String,
    pub fetched_at: DateTime<Utc>,
    pub status: u16,
    pub content_hash: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRawResponse {
    pub category: Category,
    pub collection_id: String,
    pub fetched_at: DateTime<Utc>,
    pub status: u16,
    pub content_hash: String,
    pub body: Vec<u8>,
}

/// Renders a scalar JSON value as trimmed text; blank strings and non-scalars yield `None`.
pub fn value_as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Text of the first of `keys` present in `record` with a usable scalar value.
pub fn first_text(record: &RemoteRecord, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| record.get(*key).and_then(value_as_text))
}
