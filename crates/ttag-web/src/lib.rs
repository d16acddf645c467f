//! Axum surface for the tagging pipeline: record API, sync trigger and the
//! read-only dashboard.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use ttag_core::{
    first_text, map_fields, Category, DerivedCodes, NewSeed, NewTree, RemoteRecord, Seed,
    SyncLogEntry, SyncStatus, Tree,
};
use ttag_storage::{RecordStore, StoreError};
use ttag_sync::{build_reconciler, connect_store, maybe_build_scheduler, Reconciler, SyncConfig};

mod dashboard;

pub const CRATE_NAME: &str = "ttag-web";

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            store: Arc::clone(reconciler.store()),
            reconciler,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard::index_handler))
        .route("/healthz", get(healthz))
        .route("/trees", get(list_trees).post(create_tree))
        .route("/trees/{id}", delete(delete_tree))
        .route("/seeds", get(list_seeds).post(create_seed))
        .route("/seeds/{id}", delete(delete_seed))
        .route("/sync", get(list_sync_logs).post(create_sync_log))
        .route("/sync-kobo", get(trigger_sync))
        .route("/scan/{id}", get(scan_handler))
        .route("/scan/{id}/page", get(dashboard::tag_page_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "tagging api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("TTAG_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = SyncConfig::from_env()?;
    let store = connect_store(&config).await?;
    let reconciler = Arc::new(build_reconciler(&config, store)?);
    let scheduler = maybe_build_scheduler(&config, Arc::clone(&reconciler)).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
    }
    serve(AppState::new(reconciler), port).await
}

/// JSON error body `{ "error": "<message>" }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } | StoreError::Coercion(_) => ApiError::BadRequest(err.to_string()),
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            other => {
                error!(error = %other, "record store failure");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn healthz() -> &'static str {
    "ok"
}

async fn list_trees(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Tree>> {
    Ok(Json(state.store.list_trees().await?))
}

async fn list_seeds(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Seed>> {
    Ok(Json(state.store.list_seeds().await?))
}

/// Caller-supplied codes win over derived ones.
fn apply_supplied_codes(codes: &mut DerivedCodes, body: &RemoteRecord) {
    let slots = [
        ("RegionCode", &mut codes.region_code),
        ("ReserveCode", &mut codes.reserve_code),
        ("SpeciesCode", &mut codes.species_code),
        ("QRCodeURL", &mut codes.qr_code_url),
    ];
    for (key, slot) in slots {
        if let Some(value) = first_text(body, &[key]) {
            *slot = value;
        }
    }
}

/// Accepts either an already-clean `lat,lon` or a raw geopoint. Anything else
/// comes back empty and the tree is stored without GPS.
fn manual_gps(raw: &str) -> String {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [lat, lon] if lat.parse::<f64>().is_ok() && lon.parse::<f64>().is_ok() => {
            format!("{lat},{lon}")
        }
        [_] => ttag_core::clean_gps(Some(raw)),
        _ => String::new(),
    }
}

async fn create_tree(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RemoteRecord>, JsonRejection>,
) -> ApiResult<Tree> {
    let Json(body) = payload?;
    let tree_id = first_text(&body, &["TreeID"])
        .ok_or_else(|| ApiError::BadRequest("TreeID is required.".into()))?;
    let mut codes = state
        .reconciler
        .deriver()
        .derive_for_id(Category::Tree, tree_id, &body);
    apply_supplied_codes(&mut codes, &body);
    let gps = first_text(&body, &["GPS"]).map(|raw| manual_gps(&raw));
    let fields = map_fields(&body, Category::Tree.schema());

    let tree = state
        .store
        .insert_tree(NewTree::from_parts(None, gps, codes, fields))
        .await
        .map_err(|err| match err {
            StoreError::Conflict { .. } => ApiError::BadRequest("TreeID already exists.".into()),
            other => other.into(),
        })?;
    info!(tree_id = %tree.tree_id, "tree created");
    Ok(Json(tree))
}

async fn create_seed(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RemoteRecord>, JsonRejection>,
) -> ApiResult<Seed> {
    let Json(body) = payload?;
    let seed_id = first_text(&body, &["SeedID"])
        .ok_or_else(|| ApiError::BadRequest("SeedID is required.".into()))?;
    if first_text(&body, &[NewSeed::PARENT_FIELD]).is_none() {
        return Err(ApiError::BadRequest("ParentTreeID is required.".into()));
    }
    let mut codes = state
        .reconciler
        .deriver()
        .derive_for_id(Category::Seed, seed_id, &body);
    apply_supplied_codes(&mut codes, &body);
    let fields = map_fields(&body, Category::Seed.schema());

    let seed = state
        .store
        .insert_seed(NewSeed::from_parts(None, codes, fields))
        .await
        .map_err(|err| match err {
            StoreError::Conflict { .. } => ApiError::BadRequest(
                "SeedID already exists or ParentTreeID is invalid.".into(),
            ),
            other => other.into(),
        })?;
    info!(seed_id = %seed.seed_id, parent = ?seed.parent_tree_id, "seed created");
    Ok(Json(seed))
}

#[derive(Debug, Deserialize)]
struct SyncLogRequest {
    #[serde(rename = "RecordID", alias = "TreeID", default)]
    record_id: String,
    #[serde(rename = "Status", default)]
    status: String,
}

async fn create_sync_log(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SyncLogRequest>, JsonRejection>,
) -> ApiResult<SyncLogEntry> {
    let Json(request) = payload?;
    let record_id = request.record_id.trim();
    if record_id.is_empty() {
        return Err(ApiError::BadRequest("RecordID is required.".into()));
    }
    let status: SyncStatus = request
        .status
        .parse()
        .map_err(|err: ttag_core::ParseStatusError| ApiError::BadRequest(err.to_string()))?;
    Ok(Json(state.store.append_sync_log(record_id, &status).await?))
}

#[derive(Debug, Deserialize, Default)]
struct LogQuery {
    limit: Option<usize>,
}

async fn list_sync_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Vec<SyncLogEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    Ok(Json(state.store.recent_sync_logs(limit).await?))
}

/// A scanned tag resolves to a tree first, then a seed.
pub(crate) enum ScannedRecord {
    Tree(Tree),
    Seed(Seed),
}

pub(crate) async fn find_record(
    store: &dyn RecordStore,
    id: &str,
) -> Result<Option<ScannedRecord>, StoreError> {
    if let Some(tree) = store.tree(id).await? {
        return Ok(Some(ScannedRecord::Tree(tree)));
    }
    Ok(store.seed(id).await?.map(ScannedRecord::Seed))
}

#[derive(Debug, Serialize)]
#[serde(tag = "category", rename_all = "lowercase")]
enum ScanResponse {
    Tree { record: Tree, photos: Vec<String> },
    Seed { record: Seed },
}

async fn scan_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<ScanResponse> {
    match find_record(state.store.as_ref(), &id).await? {
        Some(ScannedRecord::Tree(tree)) => Ok(Json(ScanResponse::Tree {
            photos: tree.photo_urls(),
            record: tree,
        })),
        Some(ScannedRecord::Seed(seed)) => Ok(Json(ScanResponse::Seed { record: seed })),
        None => Err(ApiError::NotFound(format!("Record {id} not found"))),
    }
}

async fn delete_tree(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<serde_json::Value> {
    if !state.store.delete_tree(&id).await? {
        return Err(ApiError::NotFound("Tree not found".into()));
    }
    info!(tree_id = %id, "tree deleted");
    Ok(Json(json!({ "message": format!("Tree {id} deleted successfully") })))
}

async fn delete_seed(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<serde_json::Value> {
    if !state.store.delete_seed(&id).await? {
        return Err(ApiError::NotFound("Seed not found".into()));
    }
    info!(seed_id = %id, "seed deleted");
    Ok(Json(json!({ "message": format!("Seed {id} deleted successfully") })))
}

async fn trigger_sync(State(state): State<Arc<AppState>>) -> Response {
    let summary = state.reconciler.run_all().await;
    if summary.is_success() {
        Json(json!({ "status": "Sync completed", "summary": summary })).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": summary.fatal_errors().join("; "), "summary": summary })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use ttag_adapters::FixtureSource;
    use ttag_core::Deriver;
    use ttag_storage::MemoryRecordStore;
    use ttag_sync::CollectionTarget;

    struct TestApp {
        dir: TempDir,
        store: Arc<MemoryRecordStore>,
        router: Router,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryRecordStore::new());
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FixtureSource::new(dir.path())),
            Deriver::default(),
            vec![
                CollectionTarget::new(Category::Tree, "treeForm"),
                CollectionTarget::new(Category::Seed, "seedForm"),
            ],
        )
        .with_artifacts_dir(dir.path().join("artifacts"))
        .with_run_log(dir.path().join("kobo_sync_log.txt"));
        let router = app(AppState::new(Arc::new(reconciler)));
        TestApp { dir, store, router }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let resp = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn manual_gps_accepts_only_coordinate_pairs() {
        assert_eq!(manual_gps("6.1, -1.2"), "6.1,-1.2");
        assert_eq!(manual_gps("6.6885 -1.3244 231 5"), "6.6885,-1.3244");
        assert_eq!(manual_gps("a,b,c"), "");
        assert_eq!(manual_gps(","), "");
        assert_eq!(manual_gps("6.1,"), "");
        assert_eq!(manual_gps("north,west"), "");
    }

    #[tokio::test]
    async fn malformed_manual_gps_is_not_stored() {
        let t = test_app();
        let (status, created) = send(
            &t.router,
            "POST",
            "/trees",
            Some(json!({"TreeID": "JUA-009", "GPS": "a,b,c"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{created}");
        let tree = t.store.tree("JUA-009").await.unwrap().unwrap();
        assert_eq!(tree.gps, None);
    }

    #[tokio::test]
    async fn created_tree_round_trips_through_scan() {
        let t = test_app();
        let (status, created) = send(
            &t.router,
            "POST",
            "/trees",
            Some(json!({
                "TreeID": "JUA-001",
                "GPS": "6.6885 -1.3244 231 5",
                "SPECIES_NAME": "Terminalia superba",
                "DISTRICT_NAME": "Juaso",
                "LOT_CODE": "L9",
                "MOTHER_TREE_MAIN_PHOTO": "https://media.example/main.jpg",
                "UnknownQuestion": "dropped"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{created}");
        assert_eq!(created["SpeciesCode"], "TERS");
        assert_eq!(created["RegionCode"], "JUA");
        assert_eq!(created["GPS"], "6.6885,-1.3244");
        assert!(created["QRCodeURL"].as_str().unwrap().contains("JUA-001"));

        let (status, scanned) = send(&t.router, "GET", "/scan/JUA-001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(scanned["category"], "tree");
        assert_eq!(scanned["record"]["LOT_CODE"], "L9");
        assert_eq!(scanned["record"]["SPECIES_NAME"], "Terminalia superba");
        assert_eq!(scanned["record"]["SpeciesCode"], "TERS");
        assert!(scanned["record"].get("UnknownQuestion").is_none());
        assert_eq!(scanned["photos"], json!(["https://media.example/main.jpg"]));
    }

    #[tokio::test]
    async fn tree_create_rejects_duplicates_and_missing_ids() {
        let t = test_app();
        let body = json!({"TreeID": "T-1", "Species": "Ceiba"});
        assert_eq!(send(&t.router, "POST", "/trees", Some(body.clone())).await.0, StatusCode::OK);

        let (status, err) = send(&t.router, "POST", "/trees", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "TreeID already exists.");

        let (status, err) = send(&t.router, "POST", "/trees", Some(json!({"Species": "Ceiba"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "TreeID is required.");

        let (status, _) = send(&t.router, "POST", "/trees", Some(json!({"TreeID": "T-2", "Notes": ["a"]}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn supplied_codes_override_derivation() {
        let t = test_app();
        let (status, created) = send(
            &t.router,
            "POST",
            "/trees",
            Some(json!({"TreeID": "T-9", "SPECIES_NAME": "Khaya ivorensis", "SpeciesCode": "KHAY"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["SpeciesCode"], "KHAY");
        assert_eq!(created["RegionCode"], "UNK");
    }

    #[tokio::test]
    async fn seed_create_requires_parent_and_scans_as_seed() {
        let t = test_app();
        let (status, err) = send(&t.router, "POST", "/seeds", Some(json!({"SeedID": "S-1"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "ParentTreeID is required.");

        let (status, seed) = send(
            &t.router,
            "POST",
            "/seeds",
            Some(json!({"SeedID": "S-1", "ParentTreeID": "T-404", "SPECIES": "Milicia excelsa"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(seed["ParentTreeID"], "T-404");
        assert_eq!(seed["SpeciesCode"], "MILE");

        let (status, err) = send(
            &t.router,
            "POST",
            "/seeds",
            Some(json!({"SeedID": "S-1", "ParentTreeID": "T-404"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "SeedID already exists or ParentTreeID is invalid.");

        let (status, scanned) = send(&t.router, "GET", "/scan/S-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(scanned["category"], "seed");

        let (status, err) = send(&t.router, "GET", "/scan/NOPE", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "Record NOPE not found");
    }

    #[tokio::test]
    async fn deleting_a_parent_tree_leaves_seeds_dangling() {
        let t = test_app();
        send(&t.router, "POST", "/trees", Some(json!({"TreeID": "T-1"}))).await;
        send(&t.router, "POST", "/seeds", Some(json!({"SeedID": "S-1", "ParentTreeID": "T-1"}))).await;

        let (status, body) = send(&t.router, "DELETE", "/trees/T-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Tree T-1 deleted successfully");

        let seed = t.store.seed("S-1").await.unwrap().expect("seed survives");
        assert_eq!(seed.parent_tree_id.as_deref(), Some("T-1"));

        let (status, err) = send(&t.router, "DELETE", "/trees/T-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "Tree not found");

        assert_eq!(send(&t.router, "DELETE", "/seeds/S-1", None).await.0, StatusCode::OK);
        assert_eq!(send(&t.router, "DELETE", "/seeds/S-1", None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_sync_log_rows_are_validated() {
        let t = test_app();
        let (status, row) = send(
            &t.router,
            "POST",
            "/sync",
            Some(json!({"RecordID": "TREE-5", "Status": "Error: camera offline"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(row["RecordID"], "TREE-5");
        assert_eq!(row["Status"], "Error: camera offline");

        let (status, _) = send(&t.router, "POST", "/sync", Some(json!({"TreeID": "TREE-6", "Status": "Success"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&t.router, "POST", "/sync", Some(json!({"RecordID": " ", "Status": "Success"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&t.router, "POST", "/sync", Some(json!({"RecordID": "TREE-5", "Status": "Maybe"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, rows) = send(&t.router, "GET", "/sync?limit=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["RecordID"], "TREE-6");
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let t = test_app();
        let resp = t
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trees")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sync_trigger_reports_success_and_failure() {
        let t = test_app();
        std::fs::write(
            t.dir.path().join("treeForm.json"),
            r#"{"results":[{"_id":"77","_submission_time":"2026-03-01T08:30:05","SPECIES_NAME":"Terminalia superba","DISTRICT_NAME":"Juaso","GPS":"6.6885 -1.3244 231 5","MOTHER_TREE_MAIN_PHOTO":"https://media.example/77.jpg"}]}"#,
        )
        .unwrap();
        std::fs::write(t.dir.path().join("seedForm.json"), r#"{"results":[]}"#).unwrap();

        let (status, body) = send(&t.router, "GET", "/sync-kobo", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "Sync completed");
        let (_, trees) = send(&t.router, "GET", "/trees", None).await;
        assert_eq!(trees[0]["TreeID"], "TREE-77");

        let (status, scanned) = send(&t.router, "GET", "/scan/TREE-77", None).await;
        assert_eq!(status, StatusCode::OK, "{scanned}");
        assert_eq!(scanned["category"], "tree");
        assert_eq!(scanned["record"]["TreeID"], "TREE-77");
        assert_eq!(scanned["record"]["SpeciesCode"], "TERS");
        assert_eq!(scanned["record"]["RegionCode"], "JUA");
        assert_eq!(scanned["record"]["GPS"], "6.6885,-1.3244");
        assert_eq!(scanned["record"]["SPECIES_NAME"], "Terminalia superba");
        assert!(scanned["record"]["QRCodeURL"].as_str().unwrap().contains("TREE-77"));
        assert!(scanned["record"].get("_id").is_none());
        assert!(scanned["record"].get("_submission_time").is_none());
        assert_eq!(scanned["photos"], json!(["https://media.example/77.jpg"]));

        std::fs::remove_file(t.dir.path().join("seedForm.json")).unwrap();
        let (status, body) = send(&t.router, "GET", "/sync-kobo", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("seedForm"));
        assert_eq!(body["summary"]["categories"][0]["duplicate"], 1);
    }

    async fn page(router: &Router, uri: &str) -> (StatusCode, String) {
        let resp = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn dashboard_lists_records_and_applies_filters() {
        let t = test_app();
        for (id, district) in [("T-1", "Juaso"), ("T-2", "Mampong")] {
            send(
                &t.router,
                "POST",
                "/trees",
                Some(json!({"TreeID": id, "DISTRICT_NAME": district, "GPS": "6.1,-1.2"})),
            )
            .await;
        }
        send(&t.router, "POST", "/sync", Some(json!({"RecordID": "T-1", "Status": "Success"}))).await;

        let (status, html) = page(&t.router, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Tree &amp; Seed Dashboard"));
        assert!(html.contains("/scan/T-1/page"));
        assert!(html.contains("/scan/T-2/page"));
        assert!(html.contains("Trees with GPS: <strong>2</strong>"));
        assert!(html.contains("No sync runs logged yet."));

        let (status, html) = page(&t.router, "/?t_DISTRICT_NAME=Mampong").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!html.contains("/scan/T-1/page"));
        assert!(html.contains("/scan/T-2/page"));
        assert!(html.contains(r#"<option value="Mampong" selected>"#));
    }

    #[tokio::test]
    async fn tag_page_renders_tree_details() {
        let t = test_app();
        send(
            &t.router,
            "POST",
            "/trees",
            Some(json!({
                "TreeID": "T-7",
                "SPECIES_NAME": "Terminalia superba",
                "MOTHER_TREE_MAIN_PHOTO": "https://media.example/t7.jpg"
            })),
        )
        .await;

        let (status, html) = page(&t.router, "/scan/T-7/page").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Tree T-7"));
        assert!(html.contains("TERS"));
        assert!(html.contains("t7.jpg"));

        let (status, _) = page(&t.router, "/scan/T-404/page").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let t = test_app();
        let resp = t
            .router
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
