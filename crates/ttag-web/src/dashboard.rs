//! Server-rendered pages: the filterable dashboard and per-tag detail pages.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use ttag_core::{Seed, Tree};

use crate::{find_record, AppState, ScannedRecord};

const RECENT_SYNC_ROWS: usize = 25;
const RUN_LOG_TAIL: usize = 20;

const TREE_COLUMNS: &[(&str, &str)] = &[
    ("TreeID", "Tree ID"),
    ("GPS", "GPS"),
    ("COLLECTOR_NAME", "Collector"),
    ("DISTRICT_NAME", "District"),
    ("FOREST_RESERVE_NAME", "Reserve"),
    ("SPECIES_NAME", "Species"),
    ("LOT_CODE", "Lot code"),
    ("RegionCode", "Region code"),
];

const SEED_COLUMNS: &[(&str, &str)] = &[
    ("SeedID", "Seed ID"),
    ("ParentTreeID", "Parent tree"),
    ("LocationFound", "Location"),
    ("LOT_CODE", "Lot code"),
    ("SEED_COLLECTOR_NAME", "Collector"),
    ("FOREST_RESERVE", "Reserve"),
    ("SPECIES", "Species"),
    ("SpeciesCode", "Species code"),
];

#[derive(Debug, Clone)]
struct FilterOption {
    value: String,
    selected: bool,
}

#[derive(Debug, Clone)]
struct FilterColumn {
    param: String,
    label: &'static str,
    options: Vec<FilterOption>,
}

#[derive(Debug, Clone)]
struct TableRow {
    id: String,
    cells: Vec<String>,
}

#[derive(Debug, Clone)]
struct SyncRow {
    sync_id: i64,
    record_id: String,
    timestamp: String,
    status: String,
    is_error: bool,
}

#[derive(Debug, Clone)]
struct AttributeRow {
    name: String,
    value: String,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    total_trees: usize,
    total_seeds: usize,
    mapped_trees: usize,
    tree_headers: Vec<&'static str>,
    tree_filters: Vec<FilterColumn>,
    tree_rows: Vec<TableRow>,
    seed_headers: Vec<&'static str>,
    seed_filters: Vec<FilterColumn>,
    seed_rows: Vec<TableRow>,
    sync_rows: Vec<SyncRow>,
    run_log_tail: Vec<String>,
}

#[derive(Template)]
#[template(path = "tag.html")]
struct TagTemplate {
    kind: &'static str,
    record_id: String,
    species_code: String,
    qr_code_url: String,
    gps: String,
    region_code: String,
    reserve_code: String,
    parent_tree_id: String,
    created_at: String,
    attributes: Vec<AttributeRow>,
    photos: Vec<String>,
}

fn tree_cell(tree: &Tree, key: &str) -> String {
    match key {
        "TreeID" => tree.tree_id.clone(),
        "GPS" => tree.gps.clone().unwrap_or_default(),
        "RegionCode" => tree.region_code.clone(),
        other => tree.attribute(other).unwrap_or_default().to_string(),
    }
}

fn seed_cell(seed: &Seed, key: &str) -> String {
    match key {
        "SeedID" => seed.seed_id.clone(),
        "ParentTreeID" => seed.parent_tree_id.clone().unwrap_or_default(),
        "SpeciesCode" => seed.species_code.clone(),
        other => seed.attribute(other).unwrap_or_default().to_string(),
    }
}

/// Exact-match filtering. Dropdown options come from the unfiltered rows so
/// a selection never hides its own alternatives.
fn filtered_table<T>(
    items: &[T],
    columns: &[(&'static str, &'static str)],
    prefix: &str,
    query: &HashMap<String, String>,
    cell: fn(&T, &str) -> String,
    row_id: fn(&T) -> String,
) -> (Vec<FilterColumn>, Vec<TableRow>) {
    let active: Vec<(&str, &str)> = columns
        .iter()
        .filter_map(|(key, _)| {
            query
                .get(&format!("{prefix}{key}"))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (*key, v))
        })
        .collect();

    let filters = columns
        .iter()
        .map(|(key, label)| {
            let selected = active.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
            let values: BTreeSet<String> = items
                .iter()
                .map(|item| cell(item, key))
                .filter(|v| !v.is_empty())
                .collect();
            FilterColumn {
                param: format!("{prefix}{key}"),
                label: *label,
                options: values
                    .into_iter()
                    .map(|value| FilterOption {
                        selected: selected == Some(value.as_str()),
                        value,
                    })
                    .collect(),
            }
        })
        .collect();

    let rows = items
        .iter()
        .filter(|item| active.iter().all(|(key, want)| cell(item, key) == *want))
        .map(|item| TableRow {
            id: row_id(item),
            cells: columns.iter().map(|(key, _)| cell(item, key)).collect(),
        })
        .collect();

    (filters, rows)
}

pub(crate) async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let data = async {
        let trees = state.store.list_trees().await?;
        let seeds = state.store.list_seeds().await?;
        let logs = state.store.recent_sync_logs(RECENT_SYNC_ROWS).await?;
        Ok::<_, ttag_storage::StoreError>((trees, seeds, logs))
    }
    .await;
    let (trees, seeds, logs) = match data {
        Ok(data) => data,
        Err(err) => return server_error(anyhow::anyhow!(err)),
    };
    let run_log_tail = match state.reconciler.run_log().tail(RUN_LOG_TAIL).await {
        Ok(lines) => lines,
        Err(err) => return server_error(err),
    };

    let (tree_filters, tree_rows) = filtered_table(
        &trees,
        TREE_COLUMNS,
        "t_",
        &query,
        tree_cell,
        |t: &Tree| t.tree_id.clone(),
    );
    let (seed_filters, seed_rows) = filtered_table(
        &seeds,
        SEED_COLUMNS,
        "s_",
        &query,
        seed_cell,
        |s: &Seed| s.seed_id.clone(),
    );

    render_html(DashboardTemplate {
        total_trees: trees.len(),
        total_seeds: seeds.len(),
        mapped_trees: trees.iter().filter(|t| t.coordinates().is_some()).count(),
        tree_headers: TREE_COLUMNS.iter().map(|(_, label)| *label).collect(),
        tree_filters,
        tree_rows,
        seed_headers: SEED_COLUMNS.iter().map(|(_, label)| *label).collect(),
        seed_filters,
        seed_rows,
        sync_rows: logs
            .into_iter()
            .map(|entry| SyncRow {
                sync_id: entry.sync_id,
                record_id: entry.record_id,
                timestamp: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                is_error: entry.status.is_error(),
                status: entry.status.to_string(),
            })
            .collect(),
        run_log_tail,
    })
}

fn attribute_rows(attributes: &ttag_core::Attributes) -> Vec<AttributeRow> {
    attributes
        .iter()
        .map(|(name, value)| AttributeRow {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

pub(crate) async fn tag_page_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let record = match find_record(state.store.as_ref(), &id).await {
        Ok(record) => record,
        Err(err) => return server_error(anyhow::anyhow!(err)),
    };
    let tpl = match record {
        Some(ScannedRecord::Tree(tree)) => TagTemplate {
            kind: "Tree",
            photos: tree.photo_urls(),
            attributes: attribute_rows(&tree.attributes),
            gps: tree.gps.unwrap_or_default(),
            created_at: tree.created_at.format("%Y-%m-%d %H:%M").to_string(),
            record_id: tree.tree_id,
            species_code: tree.species_code,
            qr_code_url: tree.qr_code_url,
            region_code: tree.region_code,
            reserve_code: tree.reserve_code,
            parent_tree_id: String::new(),
        },
        Some(ScannedRecord::Seed(seed)) => TagTemplate {
            kind: "Seed",
            photos: Vec::new(),
            attributes: attribute_rows(&seed.attributes),
            gps: String::new(),
            created_at: seed.created_at.format("%Y-%m-%d %H:%M").to_string(),
            record_id: seed.seed_id,
            species_code: seed.species_code,
            qr_code_url: seed.qr_code_url,
            region_code: String::new(),
            reserve_code: String::new(),
            parent_tree_id: seed.parent_tree_id.unwrap_or_default(),
        },
        None => {
            return (StatusCode::NOT_FOUND, Html(format!("Record {id} not found"))).into_response()
        }
    };
    render_html(tpl)
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    tracing::error!(error = %format!("{err:#}"), "page render failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err}")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn tree(id: &str, district: &str, gps: Option<&str>) -> Tree {
        Tree {
            tree_id: id.to_string(),
            remote_id: None,
            gps: gps.map(ToString::to_string),
            region_code: "UNK".to_string(),
            reserve_code: "UNK".to_string(),
            species_code: "UNK".to_string(),
            qr_code_url: String::new(),
            created_at: Utc::now(),
            attributes: BTreeMap::from([("DISTRICT_NAME".to_string(), district.to_string())]),
        }
    }

    #[test]
    fn filters_match_exactly_and_keep_all_options() {
        let trees = vec![
            tree("T-1", "Juaso", Some("6.1,-1.2")),
            tree("T-2", "Mampong", None),
            tree("T-3", "Juaso", None),
        ];
        let query = HashMap::from([("t_DISTRICT_NAME".to_string(), "Juaso".to_string())]);
        let (filters, rows) = filtered_table(
            &trees,
            TREE_COLUMNS,
            "t_",
            &query,
            tree_cell,
            |t: &Tree| t.tree_id.clone(),
        );

        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["T-1", "T-3"]);

        let district = filters.iter().find(|f| f.param == "t_DISTRICT_NAME").unwrap();
        let options: Vec<_> = district
            .options
            .iter()
            .map(|o| (o.value.as_str(), o.selected))
            .collect();
        assert_eq!(options, vec![("Juaso", true), ("Mampong", false)]);

        let gps = filters.iter().find(|f| f.param == "t_GPS").unwrap();
        assert_eq!(gps.options.len(), 1);
    }

    #[test]
    fn blank_filter_values_are_ignored() {
        let trees = vec![tree("T-1", "Juaso", None), tree("T-2", "Kumawu", None)];
        let query = HashMap::from([("t_DISTRICT_NAME".to_string(), " ".to_string())]);
        let (_, rows) = filtered_table(&trees, TREE_COLUMNS, "t_", &query, tree_cell, |t: &Tree| {
            t.tree_id.clone()
        });
        assert_eq!(rows.len(), 2);
    }
}
