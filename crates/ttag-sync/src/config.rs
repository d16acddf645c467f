use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;
use ttag_adapters::DEFAULT_KOBO_API_BASE;
use ttag_core::{Category, CodeTables, Deriver, QrTemplate};
use ttag_storage::DatabaseConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// What a sync does when a record's id or remote id already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave the stored row untouched and log `Duplicate`.
    #[default]
    Reject,
    /// For trees, overwrite only the GPS column when it changed and log `Updated`.
    RefreshGps,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ConflictPolicy::Reject),
            "refresh-gps" | "refresh_gps" => Ok(ConflictPolicy::RefreshGps),
            other => Err(format!("expected `reject` or `refresh-gps`, got `{other}`")),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres(DatabaseConfig),
    Memory,
}

impl fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Postgres(db) => f.debug_tuple("Postgres").field(db).finish(),
            StoreBackend::Memory => f.write_str("Memory"),
        }
    }
}

impl StoreBackend {
    /// Reads only `TTAG_STORE` and the `DB_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(&|name: &str| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        match value_or_default(lookup, "TTAG_STORE", "postgres").as_str() {
            "postgres" => Ok(StoreBackend::Postgres(database_from_lookup(lookup)?)),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::Invalid {
                name: "TTAG_STORE",
                reason: format!("expected `postgres` or `memory`, got `{other}`"),
            }),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct KoboSettings {
    pub api_base: String,
    pub token: String,
    pub tree_form_id: String,
    pub seed_form_id: String,
}

impl fmt::Debug for KoboSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KoboSettings")
            .field("api_base", &self.api_base)
            .field("token", &"[REDACTED]")
            .field("tree_form_id", &self.tree_form_id)
            .field("seed_form_id", &self.seed_form_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub kobo: KoboSettings,
    pub store: StoreBackend,
    pub artifacts_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub sync_log_path: PathBuf,
    pub code_tables_path: Option<PathBuf>,
    pub qr_url_template: String,
    pub conflict_policy: ConflictPolicy,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_crons: Vec<String>,
    pub fixtures_dir: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let fixtures_dir = optional(&lookup, "TTAG_FIXTURES_DIR").map(PathBuf::from);
        // fixture runs never reach the remote API
        let token = match &fixtures_dir {
            Some(_) => optional(&lookup, "KOBO_TOKEN").unwrap_or_default(),
            None => required(&lookup, "KOBO_TOKEN")?,
        };
        let kobo = KoboSettings {
            api_base: value_or_default(&lookup, "KOBO_API_BASE", DEFAULT_KOBO_API_BASE),
            token,
            tree_form_id: required(&lookup, "KOBO_TREE_FORM_ID")?,
            seed_form_id: required(&lookup, "KOBO_SEED_FORM_ID")?,
        };

        let store = StoreBackend::from_lookup(&lookup)?;

        let conflict_policy = match optional(&lookup, "TTAG_CONFLICT_POLICY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                name: "TTAG_CONFLICT_POLICY",
                reason,
            })?,
            None => ConflictPolicy::default(),
        };

        let http_timeout_secs = match optional(&lookup, "TTAG_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "TTAG_HTTP_TIMEOUT_SECS",
                reason: format!("`{raw}` is not a number of seconds"),
            })?,
            None => 20,
        };

        let sync_crons = value_or_default(&lookup, "SYNC_CRON", "0 0 6 * * *;0 0 18 * * *")
            .split(';')
            .map(str::trim)
            .filter(|cron| !cron.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(Self {
            kobo,
            store,
            artifacts_dir: value_or_default(&lookup, "ARTIFACTS_DIR", "./artifacts").into(),
            reports_dir: value_or_default(&lookup, "REPORTS_DIR", "./reports").into(),
            sync_log_path: value_or_default(&lookup, "SYNC_LOG_PATH", "./kobo_sync_log.txt").into(),
            code_tables_path: optional(&lookup, "CODE_TABLES_PATH").map(PathBuf::from),
            qr_url_template: value_or_default(&lookup, "QR_URL_TEMPLATE", QrTemplate::DEFAULT),
            conflict_policy,
            user_agent: value_or_default(&lookup, "TTAG_USER_AGENT", "ttag-sync/0.1"),
            http_timeout_secs,
            scheduler_enabled: optional(&lookup, "TTAG_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_crons,
            fixtures_dir,
        })
    }

    pub fn collection_id(&self, category: Category) -> &str {
        match category {
            Category::Tree => &self.kobo.tree_form_id,
            Category::Seed => &self.kobo.seed_form_id,
        }
    }

    /// Built-in tables, extended by the optional YAML file.
    pub fn load_code_tables(&self) -> anyhow::Result<CodeTables> {
        let mut tables = CodeTables::default();
        let Some(path) = &self.code_tables_path else {
            return Ok(tables);
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let loaded: CodeTables =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let loaded = loaded.normalized();
        tables.regions.extend(loaded.regions);
        tables.reserves.extend(loaded.reserves);
        Ok(tables)
    }

    pub fn deriver(&self) -> anyhow::Result<Deriver> {
        Ok(Deriver::new(
            self.load_code_tables()?,
            QrTemplate::new(self.qr_url_template.clone()),
        ))
    }
}

fn database_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<DatabaseConfig, ConfigError> {
    let port_raw = required(lookup, "DB_PORT")?;
    let port = port_raw.parse().map_err(|_| ConfigError::Invalid {
        name: "DB_PORT",
        reason: format!("`{port_raw}` is not a valid port"),
    })?;
    Ok(DatabaseConfig {
        host: required(lookup, "DB_HOST")?,
        port,
        user: required(lookup, "DB_USER")?,
        password: required(lookup, "DB_PASSWORD")?,
        name: required(lookup, "DB_NAME")?,
    })
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<String, ConfigError> {
    optional(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn value_or_default(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional(lookup, name).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| values.get(name).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("KOBO_TOKEN", "tok"),
        ("KOBO_TREE_FORM_ID", "aTree"),
        ("KOBO_SEED_FORM_ID", "aSeed"),
        ("DB_HOST", "localhost"),
        ("DB_PORT", "5432"),
        ("DB_USER", "ttag"),
        ("DB_PASSWORD", "secret"),
        ("DB_NAME", "tagging"),
    ];

    fn without(name: &str) -> Vec<(&'static str, &'static str)> {
        BASE.iter().copied().filter(|(k, _)| *k != name).collect()
    }

    #[test]
    fn full_environment_parses_with_defaults() {
        let config = SyncConfig::from_lookup(lookup_from(BASE)).unwrap();
        assert_eq!(config.collection_id(Category::Tree), "aTree");
        assert_eq!(config.collection_id(Category::Seed), "aSeed");
        assert_eq!(config.kobo.api_base, DEFAULT_KOBO_API_BASE);
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
        assert_eq!(config.sync_crons.len(), 2);
        assert!(!config.scheduler_enabled);
        match &config.store {
            StoreBackend::Postgres(db) => assert_eq!(db.port, 5432),
            StoreBackend::Memory => panic!("expected postgres"),
        }
    }

    #[test]
    fn every_required_variable_is_enforced() {
        for name in [
            "KOBO_TOKEN",
            "KOBO_TREE_FORM_ID",
            "KOBO_SEED_FORM_ID",
            "DB_HOST",
            "DB_PORT",
            "DB_USER",
            "DB_PASSWORD",
            "DB_NAME",
        ] {
            let err = SyncConfig::from_lookup(lookup_from(&without(name))).unwrap_err();
            assert!(
                matches!(err, ConfigError::MissingVar(missing) if missing == name),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn memory_store_with_fixtures_needs_no_database_or_token() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("KOBO_TREE_FORM_ID", "aTree"),
            ("KOBO_SEED_FORM_ID", "aSeed"),
            ("TTAG_STORE", "memory"),
            ("TTAG_FIXTURES_DIR", "fixtures/kobo"),
        ]))
        .unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.fixtures_dir, Some(PathBuf::from("fixtures/kobo")));
    }

    #[test]
    fn store_backend_reads_only_database_variables() {
        let db_only = lookup_from(&[
            ("DB_HOST", "localhost"),
            ("DB_PORT", "5433"),
            ("DB_USER", "ttag"),
            ("DB_PASSWORD", "secret"),
            ("DB_NAME", "tagging"),
        ]);
        match StoreBackend::from_lookup(&db_only).unwrap() {
            StoreBackend::Postgres(db) => assert_eq!((db.host.as_str(), db.port), ("localhost", 5433)),
            StoreBackend::Memory => panic!("expected postgres"),
        }

        let memory = lookup_from(&[("TTAG_STORE", "memory")]);
        assert_eq!(StoreBackend::from_lookup(&memory).unwrap(), StoreBackend::Memory);

        let err = StoreBackend::from_lookup(&lookup_from(&[("DB_HOST", "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("DB_PORT")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("TTAG_CONFLICT_POLICY", "merge"));
        let err = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TTAG_CONFLICT_POLICY", .. }));

        let mut pairs = without("DB_PORT");
        pairs.push(("DB_PORT", "five"));
        let err = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DB_PORT", .. }));
    }

    #[test]
    fn conflict_policy_accepts_refresh_gps() {
        assert_eq!("refresh-gps".parse(), Ok(ConflictPolicy::RefreshGps));
        assert_eq!(" Reject ".parse(), Ok(ConflictPolicy::Reject));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = SyncConfig::from_lookup(lookup_from(BASE)).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("tok\""));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn yaml_code_tables_extend_the_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.yaml");
        std::fs::write(&path, "regions:\n  Ejisu: EJI\nreserves:\n  Bobiri: BBR\n").unwrap();
        let mut pairs = BASE.to_vec();
        let path_text = path.display().to_string();
        pairs.push(("CODE_TABLES_PATH", &path_text));
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();

        let tables = config.load_code_tables().unwrap();
        assert_eq!(tables.region_code(Some("ejisu")), "EJI");
        assert_eq!(tables.region_code(Some("Juaso")), "JUA");
        assert_eq!(tables.reserve_code(Some("BOBIRI")), "BBR");
    }
}
