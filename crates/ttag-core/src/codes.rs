//! Identifier and code derivation.
//!
//! Everything here is pure: the lookup tables are immutable data handed in by
//! the caller, never process-wide state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{first_text, Category, RemoteRecord};

pub const UNKNOWN_CODE: &str = "UNK";

/// Species code: first 3 chars of the first token plus the first char of the
/// last token, or the first 4 chars of a single token. `UNK` when blank.
pub fn derive_species_code(name: Option<&str>) -> String {
    let tokens: Vec<&str> = name.unwrap_or_default().split_whitespace().collect();
    let code: String = match tokens.as_slice() {
        [] => return UNKNOWN_CODE.to_string(),
        [single] => single.chars().take(4).collect(),
        [first, .., last] => first.chars().take(3).chain(last.chars().take(1)).collect(),
    };
    code.to_uppercase()
}

/// Normalizes a geopoint (`"lat lon [alt acc]"`) to `"lat,lon"`, or `""` when malformed.
pub fn clean_gps(raw: Option<&str>) -> String {
    let mut tokens = raw.unwrap_or_default().split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(lat), Some(lon)) => format!("{lat},{lon}"),
        _ => String::new(),
    }
}

pub fn derive_unique_id(category: Category, remote_id: &str) -> String {
    format!("{}-{}", category.id_prefix(), remote_id)
}

/// Region and reserve lookup tables, keyed by lowercase name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeTables {
    #[serde(default)]
    pub regions: BTreeMap<String, String>,
    #[serde(default)]
    pub reserves: BTreeMap<String, String>,
}

impl Default for CodeTables {
    fn default() -> Self {
        let regions = [("juaso", "JUA"), ("mampong", "MAM"), ("kumawu", "KUM")];
        let reserves = [
            ("bobiri", "BOB"),
            ("afram headwaters", "AFH"),
            ("dome river", "DOM"),
            ("oda river", "ODA"),
            ("tano offin", "TAO"),
        ];
        Self::new(regions, reserves)
    }
}

impl CodeTables {
    pub fn new<K, V>(
        regions: impl IntoIterator<Item = (K, V)>,
        reserves: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            regions: normalize_table(regions),
            reserves: normalize_table(reserves),
        }
    }

    /// Re-keys tables loaded from configuration so lookups stay case-insensitive.
    pub fn normalized(self) -> Self {
        Self {
            regions: normalize_table(self.regions),
            reserves: normalize_table(self.reserves),
        }
    }

    pub fn region_code(&self, district: Option<&str>) -> String {
        lookup(&self.regions, district)
    }

    pub fn reserve_code(&self, reserve: Option<&str>) -> String {
        lookup(&self.reserves, reserve)
    }
}

fn normalize_table<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> BTreeMap<String, String>
where
    K: AsRef<str>,
    V: Into<String>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.as_ref().trim().to_lowercase(), v.into()))
        .collect()
}

fn lookup(table: &BTreeMap<String, String>, name: Option<&str>) -> String {
    name.map(|n| n.trim().to_lowercase())
        .and_then(|key| table.get(&key).cloned())
        .unwrap_or_else(|| UNKNOWN_CODE.to_string())
}

/// Scan landing-page URL template; `{id}` is replaced by the record's unique id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrTemplate(String);

impl QrTemplate {
    pub const DEFAULT: &'static str = "https://tags.3t.eco/scan/{id}";
    const PLACEHOLDER: &'static str = "{id}";

    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn payload(&self, unique_id: &str) -> String {
        if self.0.contains(Self::PLACEHOLDER) {
            self.0.replace(Self::PLACEHOLDER, unique_id)
        } else {
            format!("{}{}", self.0, unique_id)
        }
    }
}

impl Default for QrTemplate {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedCodes {
    pub unique_id: String,
    pub region_code: String,
    pub reserve_code: String,
    pub species_code: String,
    pub qr_code_url: String,
}

/// Derives every secondary attribute of a record from injected configuration.
#[derive(Debug, Clone, Default)]
pub struct Deriver {
    tables: CodeTables,
    qr: QrTemplate,
}

impl Deriver {
    pub fn new(tables: CodeTables, qr: QrTemplate) -> Self {
        Self { tables, qr }
    }

    pub fn tables(&self) -> &CodeTables {
        &self.tables
    }

    pub fn qr_template(&self) -> &QrTemplate {
        &self.qr
    }

    /// Codes for a synced record whose stable id derives from its remote id.
    pub fn derive(&self, category: Category, remote_id: &str, record: &RemoteRecord) -> DerivedCodes {
        self.derive_for_id(category, derive_unique_id(category, remote_id), record)
    }

    /// Codes for a record whose stable id is already known (manual entry).
    pub fn derive_for_id(
        &self,
        category: Category,
        unique_id: String,
        record: &RemoteRecord,
    ) -> DerivedCodes {
        let schema = category.schema();
        let species = first_text(record, schema.species_fields);
        let district = first_text(record, schema.district_fields);
        let reserve = first_text(record, schema.reserve_fields);
        DerivedCodes {
            region_code: self.tables.region_code(district.as_deref()),
            reserve_code: self.tables.reserve_code(reserve.as_deref()),
            species_code: derive_species_code(species.as_deref()),
            qr_code_url: self.qr.payload(&unique_id),
            unique_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn species_code_examples() {
        assert_eq!(derive_species_code(None), "UNK");
        assert_eq!(derive_species_code(Some("")), "UNK");
        assert_eq!(derive_species_code(Some("   ")), "UNK");
        assert_eq!(derive_species_code(Some("Mango")), "MANG");
        assert_eq!(derive_species_code(Some("Khaya senegalensis")), "KHAS");
        assert_eq!(derive_species_code(Some("Terminalia superba")), "TERS");
        assert_eq!(derive_species_code(Some("Oak")), "OAK");
    }

    #[test]
    fn species_code_uses_first_and_last_token() {
        assert_eq!(derive_species_code(Some("Milicia  excelsa var. regia")), "MILR");
        assert_eq!(derive_species_code(Some("\tentandrophragma\n cylindricum ")), "ENTC");
    }

    #[test]
    fn multi_token_species_codes_are_four_uppercase_chars() {
        let samples = [
            ("cedrela", "odorata"),
            ("Triplochiton", "scleroxylon"),
            ("tectona", "Grandis"),
            ("ceiba", "pentandra"),
            ("Nauclea", "diderrichii"),
        ];
        for (first, last) in samples {
            let code = derive_species_code(Some(&format!("{first} {last}")));
            assert_eq!(code.chars().count(), 4, "{code}");
            assert!(code.chars().all(|c| c.is_uppercase()), "{code}");
            assert_eq!(code[..3], first[..3].to_uppercase());
            assert_eq!(code[3..], last[..1].to_uppercase());
        }
    }

    #[test]
    fn gps_cleaning() {
        assert_eq!(clean_gps(Some("6.234 -1.567")), "6.234,-1.567");
        assert_eq!(clean_gps(Some("6.234 -1.567 212.0 5.0")), "6.234,-1.567");
        assert_eq!(clean_gps(Some("")), "");
        assert_eq!(clean_gps(Some("6.234")), "");
        assert_eq!(clean_gps(None), "");
    }

    #[test]
    fn region_lookup_is_case_insensitive() {
        let tables = CodeTables::default();
        assert_eq!(tables.region_code(Some("Juaso")), "JUA");
        assert_eq!(tables.region_code(Some("  MAMPONG ")), "MAM");
        assert_eq!(tables.region_code(Some("Unknown District")), "UNK");
        assert_eq!(tables.region_code(None), "UNK");
        assert_eq!(tables.reserve_code(Some("Bobiri")), "BOB");
    }

    #[test]
    fn configured_tables_are_normalized() {
        let mut tables = CodeTables {
            regions: BTreeMap::new(),
            reserves: BTreeMap::new(),
        };
        tables.regions.insert("Ejisu".into(), "EJI".into());
        let tables = tables.normalized();
        assert_eq!(tables.region_code(Some("ejisu")), "EJI");
    }

    #[test]
    fn qr_template_substitutes_or_appends() {
        assert_eq!(
            QrTemplate::default().payload("TREE-77"),
            "https://tags.3t.eco/scan/TREE-77"
        );
        assert_eq!(
            QrTemplate::new("https://scan.test/?id=").payload("SEED-4"),
            "https://scan.test/?id=SEED-4"
        );
    }

    #[test]
    fn deriver_reads_category_specific_fields() {
        let deriver = Deriver::default();
        let record = json!({
            "_id": "77",
            "SPECIES_NAME": "Terminalia superba",
            "DISTRICT_NAME": "Juaso",
            "FOREST_RESERVE_NAME": "Dome River"
        });
        let codes = deriver.derive(Category::Tree, "77", record.as_object().unwrap());
        assert_eq!(codes.unique_id, "TREE-77");
        assert_eq!(codes.species_code, "TERS");
        assert_eq!(codes.region_code, "JUA");
        assert_eq!(codes.reserve_code, "DOM");
        assert!(codes.qr_code_url.contains("TREE-77"));

        let seed = json!({"SPECIES": "Khaya senegalensis", "FOREST_RESERVE": "Bobiri"});
        let codes = deriver.derive(Category::Seed, "5", seed.as_object().unwrap());
        assert_eq!(codes.unique_id, "SEED-5");
        assert_eq!(codes.species_code, "KHAS");
        assert_eq!(codes.reserve_code, "BOB");
        assert_eq!(codes.region_code, "UNK");
    }
}
