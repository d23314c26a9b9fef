//! JSON control surface: admin import endpoint, position overrides and the
//! statistics views.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use dwatch_core::{normalize_party, Legislator, PartyCategory};
use dwatch_storage::{ImportStore, PgStore, StoreError};
use dwatch_sync::{
    kokkai_source_from_config, load_committee_counts, load_monthly_activity, load_party_speech_counts,
    load_party_stats, load_rules, load_top_legislators, ImportDriver, ImportKind, PageRequest, SyncConfig,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dwatch-web";

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";
/// Session imported when a request names none.
pub const DEFAULT_SESSION: u32 = 215;

pub struct AppState {
    pub driver: Arc<ImportDriver>,
    /// `None` locks every admin route.
    pub admin_password: Option<String>,
    pub page_size: u32,
}

impl AppState {
    pub fn new(driver: Arc<ImportDriver>, admin_password: Option<String>, page_size: u32) -> Self {
        Self {
            driver,
            admin_password,
            page_size,
        }
    }

    fn store(&self) -> &dyn ImportStore {
        self.driver.store().as_ref()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.admin_password.as_deref() else {
            return false;
        };
        headers
            .get(ADMIN_PASSWORD_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|given| given == expected)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/import", post(admin_import_handler))
        .route(
            "/api/admin/legislators/{id}/position-override",
            put(position_override_handler),
        )
        .route("/api/legislators/{id}", get(legislator_handler))
        .route("/api/stats/parties", get(party_stats_handler))
        .route("/api/stats/top-legislators", get(top_legislators_handler))
        .route("/api/stats/committees", get(committees_handler))
        .route("/api/stats/monthly", get(monthly_handler))
        .route("/api/stats/party-speeches", get(party_speeches_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let store = PgStore::connect(&config.database_url).await?;
    let driver = Arc::new(ImportDriver::new(
        kokkai_source_from_config(&config)?,
        Arc::new(store),
        load_rules(&config)?,
    ));
    if config.admin_password.is_none() {
        warn!("ADMIN_PASSWORD is not set; admin routes will reject every request");
    }
    serve(AppState::new(driver, config.admin_password.clone(), config.page_size), config.web_port).await
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web control surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportCommand {
    action: String,
    #[serde(default)]
    session: Option<u32>,
    #[serde(default)]
    start_record: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OverrideBody {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LegislatorView {
    #[serde(flatten)]
    pub legislator: Legislator,
    pub display_position: Option<String>,
    pub party_short_name: String,
    pub party_category: PartyCategory,
}

impl From<Legislator> for LegislatorView {
    fn from(legislator: Legislator) -> Self {
        let party = normalize_party(legislator.current_party.as_deref());
        Self {
            display_position: legislator.display_position().map(str::to_string),
            party_short_name: party.short_name,
            party_category: party.category,
            legislator,
        }
    }
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn unauthorized() -> Response {
    error_json(StatusCode::UNAUTHORIZED, "Unauthorized")
}

fn store_error(err: StoreError) -> Response {
    match err {
        StoreError::NotFound(what) => error_json(StatusCode::NOT_FOUND, format!("not found: {what}")),
        other => {
            warn!(error = %other, "store request failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

async fn admin_import_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let command: ImportCommand = match serde_json::from_slice(&body) {
        Ok(command) => command,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, format!("invalid request body: {err}")),
    };

    let kind = match command.action.as_str() {
        "import_legislators" => ImportKind::Legislators,
        "import_speeches" => ImportKind::Speeches,
        "get_import_status" => {
            return match state.store().import_status(&state.driver.rules().answerer_keywords).await {
                Ok(status) => Json(status).into_response(),
                Err(err) => store_error(err),
            };
        }
        _ => return error_json(StatusCode::BAD_REQUEST, "Unknown action"),
    };

    let report = state
        .driver
        .run_page(PageRequest {
            kind,
            session: command.session.unwrap_or(DEFAULT_SESSION),
            cursor: command.start_record.unwrap_or(1),
            page_size: state.page_size,
        })
        .await;

    // The driver's name index lives as long as the server; legislators written by
    // another process are picked up here once the session's last page lands.
    if kind == ImportKind::Speeches && report.done {
        match state.store().link_unmatched_speeches().await {
            Ok(linked) => info!(session = report.session, linked, "linked speeches after final page"),
            Err(err) => warn!(session = report.session, error = %err, "relink after final page failed"),
        }
    }
    Json(report).into_response()
}

async fn position_override_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let body: OverrideBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, format!("invalid request body: {err}")),
    };
    let value = body.value.as_deref().map(str::trim).filter(|v| !v.is_empty());

    match state.store().set_position_override(id, value, Utc::now()).await {
        Ok(legislator) => {
            info!(%id, cleared = value.is_none(), "position override changed");
            Json(LegislatorView::from(legislator)).into_response()
        }
        Err(err) => store_error(err),
    }
}

async fn legislator_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.store().get_legislator(id).await {
        Ok(Some(legislator)) => Json(LegislatorView::from(legislator)).into_response(),
        Ok(None) => error_json(StatusCode::NOT_FOUND, "Legislator not found"),
        Err(err) => store_error(err),
    }
}

async fn party_stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_party_stats(state.store()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => store_error(err),
    }
}

async fn top_legislators_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_top_legislators(state.store()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn committees_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_committee_counts(state.store()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn monthly_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_monthly_activity(state.store()).await {
        Ok(activity) => Json(activity).into_response(),
        Err(err) => store_error(err),
    }
}

async fn party_speeches_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_party_speech_counts(state.store()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::{header, Request};
    use dwatch_adapters::FixtureRecordSource;
    use dwatch_storage::MemoryStore;
    use dwatch_sync::ClassificationRules;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    const PASSWORD: &str = "test-secret";

    fn test_app(password: Option<&str>) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/kokkai");
        let driver = Arc::new(ImportDriver::new(
            Arc::new(FixtureRecordSource::new(fixtures)),
            store.clone(),
            Arc::new(ClassificationRules::default()),
        ));
        (app(AppState::new(driver, password.map(str::to_string), 5)), store)
    }

    fn admin_post(body: Value, password: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/admin/import")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(pw) = password {
            builder = builder.header(ADMIN_PASSWORD_HEADER, pw);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn admin_import_requires_the_shared_secret() {
        let (app, _) = test_app(Some(PASSWORD));
        let body = json!({ "action": "get_import_status" });
        let (status, value) = send(&app, admin_post(body.clone(), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["error"], "Unauthorized");

        let (status, _) = send(&app, admin_post(body.clone(), Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, admin_post(body, Some(PASSWORD))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unset_password_rejects_everything() {
        let (app, _) = test_app(None);
        let (status, _) = send(&app, admin_post(json!({ "action": "get_import_status" }), Some(""))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn import_pages_report_counts_and_resume_cursor() {
        let (app, store) = test_app(Some(PASSWORD));

        let (status, first) = send(
            &app,
            admin_post(json!({ "action": "import_legislators", "session": 215, "startRecord": 1 }), Some(PASSWORD)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["total"], 7);
        assert_eq!(first["fetched"], 5);
        assert_eq!(first["speakers"], 4);
        assert_eq!(first["inserted"], 3);
        assert_eq!(first["updated"], 0);
        assert_eq!(first["nextStart"], 6);
        assert_eq!(first["done"], false);
        assert_eq!(first["session"], 215);

        let (_, second) = send(
            &app,
            admin_post(json!({ "action": "import_speeches", "session": 215, "startRecord": 6 }), Some(PASSWORD)),
        )
        .await;
        assert_eq!(second["imported"], 1);
        assert_eq!(second["skipped"], 1);
        assert_eq!(second["done"], true);
        assert!(second.get("inserted").is_none());

        let (_, status) = send(&app, admin_post(json!({ "action": "get_import_status" }), Some(PASSWORD))).await;
        assert_eq!(status["legislators"], 3);
        assert_eq!(status["speeches"], 1);
        assert_eq!(status["representatives"], 3);
        assert_eq!(status["answerers"], 1);
        assert_eq!(status["answerer_sample"][0]["name"], "東山健二");
        assert_eq!(store.legislators().await.len(), 3);
    }

    #[tokio::test]
    async fn error_envelope_is_reported_as_done() {
        let (app, _) = test_app(Some(PASSWORD));
        let (status, body) = send(
            &app,
            admin_post(json!({ "action": "import_speeches", "session": 999 }), Some(PASSWORD)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["done"], true);
        assert_eq!(body["fetched"], 0);
        assert!(body["error"].as_str().unwrap().contains("該当する会議録がありません"));
    }

    #[tokio::test]
    async fn unknown_action_is_a_bad_request() {
        let (app, _) = test_app(Some(PASSWORD));
        let (status, body) = send(&app, admin_post(json!({ "action": "drop_tables" }), Some(PASSWORD))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown action");
    }

    #[tokio::test]
    async fn position_override_round_trip() {
        let (app, store) = test_app(Some(PASSWORD));
        send(
            &app,
            admin_post(json!({ "action": "import_legislators", "session": 215 }), Some(PASSWORD)),
        )
        .await;
        let leg = store
            .legislators()
            .await
            .into_iter()
            .find(|l| l.name == "東山健二")
            .unwrap();

        let put = |value: Value, password: &str| {
            Request::builder()
                .method("PUT")
                .uri(format!("/api/admin/legislators/{}/position-override", leg.id))
                .header(header::CONTENT_TYPE, "application/json")
                .header(ADMIN_PASSWORD_HEADER, password)
                .body(Body::from(value.to_string()))
                .unwrap()
        };

        let (status, _) = send(&app, put(json!({ "value": "前内閣総理大臣" }), "wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, put(json!({ "value": "前内閣総理大臣" }), PASSWORD)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["display_position"], "前内閣総理大臣");
        assert_eq!(body["current_position"], "内閣総理大臣");
        assert_eq!(body["current_position_source"], "manual");

        let (_, body) = send(&app, get_req(&format!("/api/legislators/{}", leg.id))).await;
        assert_eq!(body["display_position"], "前内閣総理大臣");

        let (_, body) = send(&app, put(json!({ "value": null }), PASSWORD)).await;
        assert_eq!(body["display_position"], "内閣総理大臣");
        assert_eq!(body["current_position_source"], "speech_inferred");
    }

    #[tokio::test]
    async fn override_on_unknown_legislator_is_not_found() {
        let (app, _) = test_app(Some(PASSWORD));
        let req = Request::builder()
            .method("PUT")
            .uri(format!("/api/admin/legislators/{}/position-override", Uuid::new_v4()))
            .header(ADMIN_PASSWORD_HEADER, PASSWORD)
            .body(Body::from(r#"{"value":"議長"}"#))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get_req(&format!("/api/legislators/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_endpoints_answer_on_an_empty_store() {
        let (app, _) = test_app(Some(PASSWORD));
        for uri in [
            "/api/stats/parties",
            "/api/stats/top-legislators",
            "/api/stats/committees",
            "/api/stats/party-speeches",
        ] {
            let (status, body) = send(&app, get_req(uri)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body, json!([]), "{uri}");
        }
        let (status, body) = send(&app, get_req("/api/stats/monthly")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "months": [], "inactive_months": [] }));
    }

    #[tokio::test]
    async fn stats_reflect_imported_speeches() {
        let (app, _) = test_app(Some(PASSWORD));
        for (action, start) in [
            ("import_legislators", 1),
            ("import_legislators", 6),
            ("import_speeches", 1),
            ("import_speeches", 6),
        ] {
            send(
                &app,
                admin_post(json!({ "action": action, "session": 215, "startRecord": start }), Some(PASSWORD)),
            )
            .await;
        }

        let (_, top) = send(&app, get_req("/api/stats/top-legislators")).await;
        assert_eq!(top[0]["name"], "西田春子");
        assert_eq!(top[0]["speech_count"], 2);
        assert_eq!(top[0]["party_short_name"], "立憲");

        let (_, committees) = send(&app, get_req("/api/stats/committees")).await;
        assert_eq!(committees, json!([{ "name": "予算委員会", "count": 5 }]));

        let (_, monthly) = send(&app, get_req("/api/stats/monthly")).await;
        assert_eq!(monthly["months"], json!([{ "month": "2024-01", "count": 5 }]));
    }

    #[tokio::test]
    async fn final_speech_page_links_legislators_added_elsewhere() {
        let (app, store) = test_app(Some(PASSWORD));
        let import = |start: u32| {
            admin_post(
                json!({ "action": "import_speeches", "session": 215, "startRecord": start }),
                Some(PASSWORD),
            )
        };

        let (_, first) = send(&app, import(1)).await;
        assert_eq!(first["done"], false);

        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 26).unwrap();
        store
            .insert_legislator(&dwatch_core::NewLegislator {
                name: "西田春子".into(),
                name_yomi: None,
                current_party: Some("立憲民主党・無所属".into()),
                current_position: None,
                house: None,
                first_seen: date,
                last_seen: date,
            })
            .await
            .unwrap();

        let (_, last) = send(&app, import(6)).await;
        assert_eq!(last["done"], true);

        let nishida = store
            .speeches()
            .await
            .into_iter()
            .filter(|s| s.speaker_name == "西田春子")
            .collect::<Vec<_>>();
        assert_eq!(nishida.len(), 2);
        assert!(nishida.iter().all(|s| s.legislator_id.is_some()));
    }
}
