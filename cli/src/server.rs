use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use liftlog_core::auth::{AuthError, AuthErrorKind, Identity, IdentityProvider, LocalIdentityProvider};
use liftlog_core::db::Database;
use liftlog_core::error::StoreError;
use liftlog_core::legacy::LegacyStorage;
use liftlog_core::migration::{CleanupPolicy, MigrationCoordinator, MigrationReport};
use liftlog_core::models::{
    AccountSnapshot, Exercise, WorkoutLog, validate_exercise, validate_workout_log,
};
use liftlog_core::store::{AccountBatch, AccountStore};
use liftlog_core::transfer::{self, ImportSummary};
use liftlog_core::volume::{self, BodyPartVolume, SetPolicy, TimeWindow, VolumeQuery, WeekStart};

pub(crate) const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Arc<dyn AccountStore>,
    pub legacy: Arc<dyn LegacyStorage>,
    pub identity: Arc<dyn IdentityProvider>,
    pub api_key: Option<String>,
}

// --- Request / Response types ---

#[derive(Serialize, Deserialize)]
pub(crate) struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangePasswordRequest {
    pub email: String,
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    user_id: String,
    email: String,
    #[serde(default)]
    cleanup: CleanupPolicy,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct StatusResponse {
    pub initialized: bool,
}

#[derive(Deserialize)]
struct ProgressQuery {
    window: Option<String>,
    locale: Option<String>,
    policy: Option<String>,
    today: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Auth(AuthError),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            Self::Auth(err) => {
                let status = match err.kind {
                    AuthErrorKind::InvalidEmail | AuthErrorKind::WeakPassword => {
                        StatusCode::BAD_REQUEST
                    }
                    AuthErrorKind::WrongCredentials | AuthErrorKind::IncorrectCurrentPassword => {
                        StatusCode::UNAUTHORIZED
                    }
                    AuthErrorKind::EmailAlreadyInUse => StatusCode::CONFLICT,
                    AuthErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.message_key().to_string(), Some(err.code))
            }
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };
        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::NotInitialized(_)) => Self::Conflict(format!("{err:#}")),
            _ => Self::Internal(err),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(msg) => Self::BadRequest(msg),
            err @ StoreError::NotInitialized(_) => Self::Conflict(err.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err:#}"))
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                    code: None,
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Identity ---

async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<Identity>, ApiError> {
    Ok(Json(state.identity.sign_in(&req.email, &req.password)?))
}

async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<(StatusCode, Json<Identity>), ApiError> {
    let identity = state.identity.sign_up(&req.email, &req.password)?;
    Ok((StatusCode::CREATED, Json(identity)))
}

async fn change_password(
    State(state): State<AppState>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .identity
        .change_password(&req.email, &req.current_password, &req.new_password)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn open_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<MigrationReport>, ApiError> {
    if req.user_id.trim().is_empty() || req.email.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "userId and email are required".to_string(),
        ));
    }
    let report = MigrationCoordinator::new(state.store.as_ref(), state.legacy.as_ref())
        .with_cleanup(req.cleanup)
        .run(&req.user_id, &req.email)?;
    Ok(Json(report))
}

// --- Account data ---

async fn get_snapshot(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<AccountSnapshot>, ApiError> {
    Ok(Json(state.store.snapshot(&uid)?))
}

async fn get_status(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let initialized = state.store.is_initialized(&uid)?;
    Ok(Json(StatusResponse { initialized }))
}

async fn list_exercises(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<Exercise>>, ApiError> {
    Ok(Json(state.store.get_exercises(&uid)?))
}

async fn put_exercise(
    State(state): State<AppState>,
    Path((uid, id)): Path<(String, String)>,
    Json(exercise): Json<Exercise>,
) -> Result<Json<Exercise>, ApiError> {
    if exercise.id != id {
        return Err(ApiError::BadRequest(format!(
            "Exercise id '{}' does not match path '{id}'",
            exercise.id
        )));
    }
    validate_exercise(&exercise).map_err(|e| bad_request(&e))?;
    state.store.put_exercise(&uid, &exercise)?;
    Ok(Json(exercise))
}

async fn delete_exercise(
    State(state): State<AppState>,
    Path((uid, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_exercise(&uid, &id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Exercise '{id}' not found")))
    }
}

async fn get_workout_log(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<WorkoutLog>, ApiError> {
    Ok(Json(state.store.get_workout_log(&uid)?))
}

async fn put_workout_log(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(log): Json<WorkoutLog>,
) -> Result<StatusCode, ApiError> {
    validate_workout_log(&log).map_err(|e| bad_request(&e))?;
    state.store.put_workout_log(&uid, &log)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn commit_batch(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(batch): Json<AccountBatch>,
) -> Result<StatusCode, ApiError> {
    for exercise in &batch.exercises {
        validate_exercise(exercise).map_err(|e| bad_request(&e))?;
    }
    validate_workout_log(&batch.workout_log).map_err(|e| bad_request(&e))?;
    state.store.commit(&uid, &batch)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Progress and transfer ---

fn progress_query(q: ProgressQuery) -> Result<VolumeQuery, ApiError> {
    let window = match q.window.as_deref() {
        Some(w) => w.parse::<TimeWindow>().map_err(|e| bad_request(&e))?,
        None => TimeWindow::default(),
    };
    let today = match q.today.as_deref() {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("Invalid date '{d}'. Use YYYY-MM-DD")))?,
        None => Local::now().date_naive(),
    };
    let mut query = VolumeQuery::new(window, today);
    if let Some(locale) = q.locale.as_deref() {
        query.week_start = WeekStart::from_locale(locale);
    }
    if let Some(policy) = q.policy.as_deref() {
        query.policy = policy.parse::<SetPolicy>().map_err(|e| bad_request(&e))?;
    }
    Ok(query)
}

async fn get_progress(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(q): Query<ProgressQuery>,
) -> Result<Json<Vec<BodyPartVolume>>, ApiError> {
    let query = progress_query(q)?;
    let snapshot = state.store.snapshot(&uid)?;
    Ok(Json(volume::volume_by_body_part(
        &snapshot.workout_log,
        &snapshot.exercises,
        &query,
    )))
}

async fn export_csv(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state.store.snapshot(&uid)?;
    let mut body = Vec::new();
    transfer::write_csv(&mut body, &snapshot).context("failed to build CSV export")?;
    Ok((
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        body,
    )
        .into_response())
}

async fn import_data(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    body: String,
) -> Result<Json<ImportSummary>, ApiError> {
    let data = transfer::parse_import(&body).map_err(|e| bad_request(&e))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest(
            "Import file contains no exercises or workout log".to_string(),
        ));
    }
    let summary = transfer::import_into(state.store.as_ref(), &uid, data)?;
    Ok(Json(summary))
}

// --- Router builder ---

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/sign-up", post(sign_up))
        .route("/api/auth/change-password", post(change_password))
        .route("/api/session", post(open_session))
        .route("/api/users/{uid}/snapshot", get(get_snapshot))
        .route("/api/users/{uid}/status", get(get_status))
        .route("/api/users/{uid}/exercises", get(list_exercises))
        .route(
            "/api/users/{uid}/exercises/{id}",
            put(put_exercise).delete(delete_exercise),
        )
        .route(
            "/api/users/{uid}/workout-log",
            get(get_workout_log).put(put_workout_log),
        )
        .route("/api/users/{uid}/batch", post(commit_batch))
        .route("/api/users/{uid}/progress", get(get_progress))
        .route("/api/users/{uid}/export", get(export_csv))
        .route("/api/users/{uid}/import", post(import_data))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

fn mask_key(key: &str) -> String {
    match (key.get(..4), key.get(key.len().saturating_sub(4)..)) {
        (Some(head), Some(tail)) if key.len() > 8 => format!("{head}...{tail}"),
        _ => "****".to_string(),
    }
}

pub async fn start_server(
    db: Arc<Database>,
    legacy: Arc<dyn LegacyStorage>,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        store: db.clone(),
        legacy,
        identity: Arc::new(LocalIdentityProvider::new(db)),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {} (see api_key file in data directory)",
            mask_key(key)
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!(bind, port, auth = api_key.is_some(), "server started");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use liftlog_core::legacy::{MemoryStorage, exercises_key};
    use tower::ServiceExt;

    fn test_state(api_key: Option<String>) -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        AppState {
            store: db.clone(),
            legacy: Arc::new(MemoryStorage::new()),
            identity: Arc::new(LocalIdentityProvider::new(db)),
            api_key,
        }
    }

    fn test_app(api_key: Option<String>) -> Router {
        build_router(test_state(api_key))
    }

    async fn send(app: &Router, request: axum::http::Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn open_account(app: &Router, uid: &str) -> serde_json::Value {
        let (status, report) = send(
            app,
            json_request(
                "POST",
                "/api/session",
                &serde_json::json!({"userId": uid, "email": format!("{uid}@example.com")}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        report
    }

    #[tokio::test]
    async fn auth_missing_key_returns_401() {
        let app = test_app(Some("test-key-abc123".to_string()));
        let (status, json) = send(&app, get("/api/users/u1/status")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "Invalid or missing API key");
    }

    #[tokio::test]
    async fn auth_wrong_key_returns_401() {
        let app = test_app(Some("test-key-abc123".to_string()));
        let request = axum::http::Request::get("/api/users/u1/status")
            .header("Authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_correct_key_succeeds() {
        let app = test_app(Some("test-key-abc123".to_string()));
        let request = axum::http::Request::get("/api/users/u1/status")
            .header("Authorization", "Bearer test-key-abc123")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["initialized"], false);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app(Some("secret".to_string()));
        let response = app.oneshot(get("/api/users/u1/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app(None);
        let big_body = vec![b' '; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/users/u1/import")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/liftlog.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }

    #[tokio::test]
    async fn sign_up_and_sign_in() {
        let app = test_app(None);
        let creds = serde_json::json!({"email": "Lifter@Example.com", "password": "hunter22"});

        let (status, created) = send(&app, json_request("POST", "/api/auth/sign-up", &creds)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["email"], "lifter@example.com");

        let (status, signed_in) = send(&app, json_request("POST", "/api/auth/sign-in", &creds)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(signed_in["userId"], created["userId"]);

        let (status, dup) = send(&app, json_request("POST", "/api/auth/sign-up", &creds)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(dup["code"], "auth/email-already-in-use");
        assert_eq!(dup["error"], "emailAlreadyInUse");
    }

    #[tokio::test]
    async fn auth_errors_map_to_status() {
        let app = test_app(None);
        let weak = serde_json::json!({"email": "a@b.co", "password": "123"});
        let (status, json) = send(&app, json_request("POST", "/api/auth/sign-up", &weak)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "auth/weak-password");

        let unknown = serde_json::json!({"email": "a@b.co", "password": "123456"});
        let (status, json) = send(&app, json_request("POST", "/api/auth/sign-in", &unknown)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "userExistsPasswordIncorrect");
    }

    #[tokio::test]
    async fn change_password_flow() {
        let app = test_app(None);
        let creds = serde_json::json!({"email": "a@b.co", "password": "123456"});
        send(&app, json_request("POST", "/api/auth/sign-up", &creds)).await;

        let bad = serde_json::json!({"email": "a@b.co", "currentPassword": "nope!!", "newPassword": "abcdefg"});
        let (status, json) = send(&app, json_request("POST", "/api/auth/change-password", &bad)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "incorrectCurrentPassword");

        let good = serde_json::json!({"email": "a@b.co", "currentPassword": "123456", "newPassword": "abcdefg"});
        let (status, _) = send(&app, json_request("POST", "/api/auth/change-password", &good)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn session_seeds_once() {
        let app = test_app(None);
        let report = open_account(&app, "u1").await;
        assert_eq!(report["outcome"], "seeded");
        assert_eq!(report["exercisesWritten"], 15);

        let report = open_account(&app, "u1").await;
        assert_eq!(report["outcome"], "already_initialized");

        let (_, status) = send(&app, get("/api/users/u1/status")).await;
        assert_eq!(status["initialized"], true);
        let (_, snapshot) = send(&app, get("/api/users/u1/snapshot")).await;
        assert_eq!(snapshot["exercises"].as_array().unwrap().len(), 15);
        assert_eq!(snapshot["workoutLog"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn session_migrates_server_side_legacy_data() {
        let state = test_state(None);
        state
            .legacy
            .set_item(
                &exercises_key("u1@example.com"),
                r#"[{"id":"c1","name":"Hip Thrust","bodyPart":"Legs","description":"glutes"}]"#,
            )
            .unwrap();
        let app = build_router(state.clone());

        let report = open_account(&app, "u1").await;
        assert_eq!(report["outcome"], "migrated");
        assert_eq!(report["legacyCleared"], true);
        assert!(state.legacy.get_item(&exercises_key("u1@example.com")).unwrap().is_none());
        assert_eq!(state.store.get_exercises("u1").unwrap().len(), 16);
    }

    #[tokio::test]
    async fn session_requires_fields() {
        let app = test_app(None);
        let (status, _) = send(
            &app,
            json_request("POST", "/api/session", &serde_json::json!({"userId": " ", "email": "a@b.co"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn exercise_put_and_delete() {
        let app = test_app(None);
        open_account(&app, "u1").await;
        let exercise = serde_json::json!({
            "id": "c1", "name": "Hip Thrust", "bodyPart": "Legs",
            "description": "Barbell glute bridge", "emoji": "🏃", "isCustom": true
        });

        let (status, _) = send(&app, json_request("PUT", "/api/users/u1/exercises/other", &exercise)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, json_request("PUT", "/api/users/u1/exercises/c1", &exercise)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, list) = send(&app, get("/api/users/u1/exercises")).await;
        assert_eq!(list.as_array().unwrap().len(), 16);

        let delete = |uri: &str| axum::http::Request::delete(uri).body(Body::empty()).unwrap();
        let (status, _) = send(&app, delete("/api/users/u1/exercises/c1")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, delete("/api/users/u1/exercises/c1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn workout_log_put_normalizes_and_validates() {
        let app = test_app(None);
        let log = serde_json::json!({
            "2024-06-14": [],
            "2024-06-15": [{"id": "w1", "exerciseId": "ex1", "sets": [{"reps": 8, "weight": 55, "completed": true}]}]
        });
        let (status, _) = send(&app, json_request("PUT", "/api/users/u1/workout-log", &log)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, stored) = send(&app, get("/api/users/u1/workout-log")).await;
        assert!(stored.get("2024-06-14").is_none());
        assert_eq!(stored["2024-06-15"][0]["id"], "w1");

        let bad = serde_json::json!({"June 15": []});
        let (status, _) = send(&app, json_request("PUT", "/api/users/u1/workout-log", &bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_commit_initializes_account() {
        let app = test_app(None);
        let batch = serde_json::json!({
            "exercises": [{"id": "c1", "name": "Hip Thrust", "bodyPart": "Legs", "description": "Barbell glute bridge"}],
            "workoutLog": {}
        });
        let (status, _) = send(&app, json_request("POST", "/api/users/u1/batch", &batch)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, status) = send(&app, get("/api/users/u1/status")).await;
        assert_eq!(status["initialized"], true);
    }

    #[tokio::test]
    async fn progress_sums_completed_sets() {
        let app = test_app(None);
        open_account(&app, "u1").await;
        let set = serde_json::json!({"reps": 8, "weight": 55, "completed": true});
        let log = serde_json::json!({
            "2024-06-15": [{"id": "w1", "exerciseId": "ex1", "sets": [set, set, set]}],
            "2024-05-01": [{"id": "w2", "exerciseId": "ex1", "sets": [set]}]
        });
        send(&app, json_request("PUT", "/api/users/u1/workout-log", &log)).await;

        let (status, week) = send(&app, get("/api/users/u1/progress?window=week&today=2024-06-15")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(week[0]["bodyPart"], "Chest");
        assert_eq!(week[0]["volume"], 1320.0);

        let (_, all) = send(&app, get("/api/users/u1/progress?window=all&today=2024-06-15")).await;
        assert_eq!(all[0]["volume"], 1760.0);

        let (status, _) = send(&app, get("/api/users/u1/progress?window=decade")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn export_returns_csv() {
        let app = test_app(None);
        open_account(&app, "u1").await;
        let response = app.oneshot(get("/api/users/u1/export")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv; charset=utf-8"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap().trim_end(),
            "date,exercise,bodyPart,set,reps,weight,volume"
        );
    }

    #[tokio::test]
    async fn import_merges_and_rejects_malformed() {
        let app = test_app(None);
        open_account(&app, "u1").await;
        let raw = r#"{"exercises":[{"name":"Hip Thrust","bodyPart":"Legs"}],"workoutLog":{"2024-06-15":[{"id":"w","exerciseId":"ex7","sets":[{"reps":5,"weight":100,"completed":true}]}]}}"#;
        let request = axum::http::Request::post("/api/users/u1/import")
            .body(Body::from(raw))
            .unwrap();
        let (status, summary) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["exercisesUpserted"], 1);
        assert_eq!(summary["daysImported"], 1);

        let request = axum::http::Request::post("/api/users/u1/import")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn import_before_setup_is_refused_and_setup_still_seeds() {
        let app = test_app(None);
        let raw = r#"{"workoutLog":{"2024-06-15":[{"id":"w","exerciseId":"ex7","sets":[{"reps":5,"weight":100,"completed":true}]}]}}"#;
        let request = axum::http::Request::post("/api/users/u1/import")
            .body(Body::from(raw))
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().unwrap().contains("not been set up"));

        let (_, status) = send(&app, get("/api/users/u1/status")).await;
        assert_eq!(status["initialized"], false);

        let report = open_account(&app, "u1").await;
        assert_eq!(report["outcome"], "seeded");
        let (_, list) = send(&app, get("/api/users/u1/exercises")).await;
        assert_eq!(list.as_array().unwrap().len(), 15);
    }

    #[test]
    fn mask_key_hides_middle() {
        assert_eq!(mask_key("abcdef0123456789"), "abcd...6789");
        assert_eq!(mask_key("short"), "****");
    }
}
