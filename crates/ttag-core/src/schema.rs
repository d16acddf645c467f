//! Static entity schemas and the field mapper.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{value_as_text, Attributes, Category, RemoteRecord};

/// Recognized remote field names for one entity, in column order, plus the
/// fields the deriver reads its inputs from.
#[derive(Debug)]
pub struct EntitySchema {
    pub category: Category,
    pub fields: &'static [&'static str],
    pub species_fields: &'static [&'static str],
    pub district_fields: &'static [&'static str],
    pub reserve_fields: &'static [&'static str],
}

impl EntitySchema {
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains(&key)
    }
}

pub static TREE_SCHEMA: EntitySchema = EntitySchema {
    category: Category::Tree,
    fields: &[
        "ForestName",
        "TreeName",
        "TreeType",
        "Species",
        "DatePlanted",
        "Notes",
        "COLLECTOR_NAME",
        "DISTRICT_NAME",
        "FOREST_RESERVE_NAME",
        "SPECIES_NAME",
        "LOT_CODE",
        "TREE_HEIGHT",
        "TREE_DBH",
        "CROWN_DIAMETER",
        "TREE_CONDITION",
        "HEALTH_STATUS",
        "FRUITING_STATUS",
        "MOTHER_TREE_MAIN_PHOTO",
        "MOTHER_TREE_NORTH_PHOTO",
        "MOTHER_TREE_EAST_PHOTO",
        "MOTHER_TREE_SOUTH_PHOTO",
        "MOTHER_TREE_WEST_PHOTO",
    ],
    species_fields: &["SPECIES_NAME", "Species"],
    district_fields: &["DISTRICT_NAME"],
    reserve_fields: &["FOREST_RESERVE_NAME", "ForestName"],
};

pub static SEED_SCHEMA: EntitySchema = EntitySchema {
    category: Category::Seed,
    fields: &[
        "ParentTreeID",
        "DateCollected",
        "LocationFound",
        "Notes",
        "LOT_CODE",
        "SEED_COLLECTOR_NAME",
        "FOREST_RESERVE",
        "SPECIES",
        "SEED_QUANTITY",
        "SEED_WEIGHT",
        "STORAGE_LOCATION",
    ],
    species_fields: &["SPECIES"],
    district_fields: &[],
    reserve_fields: &["FOREST_RESERVE"],
};

/// Restricts a remote record to the keys the schema recognizes. Unknown keys
/// are dropped so that new form questions never fail a sync.
pub fn map_fields(remote: &RemoteRecord, schema: &EntitySchema) -> RemoteRecord {
    remote
        .iter()
        .filter(|(key, _)| schema.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("field {field} holds {kind}; expected a scalar value")]
    NonScalar { field: String, kind: &'static str },
}

/// Converts mapped values into stored text. Nulls and blank strings are
/// treated as absent; nested values cannot be stored in a flat column.
pub fn coerce_attributes(fields: &RemoteRecord) -> Result<Attributes, CoercionError> {
    let mut out = Attributes::new();
    for (key, value) in fields {
        match value {
            JsonValue::Array(_) => {
                return Err(CoercionError::NonScalar {
                    field: key.clone(),
                    kind: "a list",
                })
            }
            JsonValue::Object(_) => {
                return Err(CoercionError::NonScalar {
                    field: key.clone(),
                    kind: "an object",
                })
            }
            other => {
                if let Some(text) = value_as_text(other) {
                    out.insert(key.clone(), text);
                }
            }
        }
    }
    Ok(out)
}
