use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use liftlog_core::auth::{AuthAction, AuthError, Identity, IdentityProvider, codes};
use liftlog_core::error::{StoreError, StoreResult};
use liftlog_core::models::{AccountSnapshot, Exercise, WorkoutLog};
use liftlog_core::store::{AccountBatch, AccountStore, Listener, ListenerRegistry, Subscription};

use crate::server::{ChangePasswordRequest, Credentials, ErrorResponse, StatusResponse};

const POLL_INTERVAL: Duration = Duration::from_secs(15);

/// HTTP connection to a `liftlog serve` instance.
pub struct RemoteClient {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    rt: tokio::runtime::Handle,
}

impl RemoteClient {
    /// Must be called from inside the tokio runtime.
    pub fn new(base: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("liftlog-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        let base = Url::parse(base).with_context(|| format!("Invalid server URL: {base}"))?;
        if base.cannot_be_a_base() {
            bail!("Invalid server URL: {base}");
        }
        Ok(Self {
            client,
            base,
            api_key,
            rt: tokio::runtime::Handle::current(),
        })
    }

    /// Append each segment to the base URL, percent-encoding it.
    fn url<S: AsRef<str>>(&self, segments: &[S]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request<S: AsRef<str>>(&self, method: Method, segments: &[S]) -> RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| self.rt.block_on(fut))
    }

    async fn send(&self, builder: RequestBuilder) -> StoreResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.base)))
    }

    async fn get_json<T: DeserializeOwned, S: AsRef<str>>(&self, path: &[S]) -> StoreResult<T> {
        let resp = self.send(self.request(Method::GET, path)).await?;
        read_json(ensure_success(resp).await?).await
    }

    async fn write<B: Serialize + ?Sized>(&self, method: Method, path: &[&str], body: &B) -> StoreResult<()> {
        let resp = self.send(self.request(method, path).json(body)).await?;
        ensure_success(resp).await.map(drop)
    }
}

async fn ensure_success(resp: Response) -> StoreResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<ErrorResponse>()
        .await
        .map_or_else(|_| status.to_string(), |body| body.error);
    if status == StatusCode::BAD_REQUEST {
        Err(StoreError::Invalid(message))
    } else {
        Err(StoreError::Unavailable(format!("server returned {status}: {message}")))
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> StoreResult<T> {
    resp.json()
        .await
        .map_err(|e| StoreError::Unavailable(format!("unexpected response body: {e}")))
}

fn user_path<'a>(user_id: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
    let mut path = vec!["api", "users", user_id];
    path.extend_from_slice(rest);
    path
}

/// Account store backed by the server's `/api/users` routes.
///
/// Writes made through this store notify local subscribers immediately.
/// Changes made elsewhere are picked up by polling the snapshot.
pub struct RemoteStore {
    client: Arc<RemoteClient>,
    listeners: ListenerRegistry,
    poll_interval: Duration,
}

impl RemoteStore {
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            listeners: ListenerRegistry::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn notify(&self, user_id: &str) {
        self.listeners
            .publish_with(user_id, || self.snapshot(user_id));
    }
}

impl AccountStore for RemoteStore {
    fn get_exercises(&self, user_id: &str) -> StoreResult<Vec<Exercise>> {
        self.client
            .block_on(self.client.get_json(&user_path(user_id, &["exercises"])))
    }

    fn get_workout_log(&self, user_id: &str) -> StoreResult<WorkoutLog> {
        self.client
            .block_on(self.client.get_json(&user_path(user_id, &["workout-log"])))
    }

    fn put_exercise(&self, user_id: &str, exercise: &Exercise) -> StoreResult<()> {
        let path = user_path(user_id, &["exercises", exercise.id.as_str()]);
        self.client
            .block_on(self.client.write(Method::PUT, &path, exercise))?;
        self.notify(user_id);
        Ok(())
    }

    fn delete_exercise(&self, user_id: &str, exercise_id: &str) -> StoreResult<bool> {
        let path = user_path(user_id, &["exercises", exercise_id]);
        let deleted = self.client.block_on(async {
            let resp = self
                .client
                .send(self.client.request(Method::DELETE, &path))
                .await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            ensure_success(resp).await.map(|_| true)
        })?;
        if deleted {
            self.notify(user_id);
        }
        Ok(deleted)
    }

    fn put_workout_log(&self, user_id: &str, log: &WorkoutLog) -> StoreResult<()> {
        self.client.block_on(self.client.write(
            Method::PUT,
            &user_path(user_id, &["workout-log"]),
            log,
        ))?;
        self.notify(user_id);
        Ok(())
    }

    fn is_initialized(&self, user_id: &str) -> StoreResult<bool> {
        let status: StatusResponse = self
            .client
            .block_on(self.client.get_json(&user_path(user_id, &["status"])))?;
        Ok(status.initialized)
    }

    fn commit(&self, user_id: &str, batch: &AccountBatch) -> StoreResult<()> {
        self.client.block_on(self.client.write(
            Method::POST,
            &user_path(user_id, &["batch"]),
            batch,
        ))?;
        self.notify(user_id);
        Ok(())
    }

    fn subscribe(&self, user_id: &str, listener: Listener) -> StoreResult<Subscription> {
        let last_seen: Arc<Mutex<Option<AccountSnapshot>>> = Arc::new(Mutex::new(None));

        let seen = Arc::clone(&last_seen);
        let forward = Arc::clone(&listener);
        let local = self.listeners.register(
            user_id,
            Arc::new(move |snapshot: &AccountSnapshot| {
                *seen.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
                forward(snapshot);
            }),
        );

        let client = Arc::clone(&self.client);
        let path: Vec<String> = user_path(user_id, &["snapshot"])
            .into_iter()
            .map(str::to_string)
            .collect();
        let interval = self.poll_interval;
        let user = user_id.to_string();
        let poller = self.client.rt.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot: AccountSnapshot = match client.get_json(&path).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        tracing::warn!(user_id = %user, error = %e, "snapshot poll failed");
                        continue;
                    }
                };
                let changed = {
                    let mut seen = last_seen.lock().unwrap_or_else(PoisonError::into_inner);
                    let changed = seen.as_ref().is_some_and(|prev| *prev != snapshot);
                    *seen = Some(snapshot.clone());
                    changed
                };
                if changed {
                    listener(&snapshot);
                }
            }
        });

        Ok(Subscription::new(move || {
            local.unsubscribe();
            poller.abort();
        }))
    }

    fn snapshot(&self, user_id: &str) -> StoreResult<AccountSnapshot> {
        self.client
            .block_on(self.client.get_json(&user_path(user_id, &["snapshot"])))
    }
}

/// Identity provider backed by the server's `/api/auth` routes.
pub struct RemoteIdentityProvider {
    client: Arc<RemoteClient>,
}

impl RemoteIdentityProvider {
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self { client }
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &[&str],
        body: &B,
        action: AuthAction,
    ) -> Result<Option<T>, AuthError> {
        let client = &self.client;
        client.block_on(async {
            let resp = client
                .send(client.request(Method::POST, path).json(body))
                .await
                .map_err(|e| unreachable_provider(&e, action))?;
            let status = resp.status();
            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }
            if status.is_success() {
                return read_json(resp)
                    .await
                    .map(Some)
                    .map_err(|e| unreachable_provider(&e, action));
            }
            let code = resp
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.code)
                .unwrap_or_else(|| codes::INTERNAL_ERROR.to_string());
            Err(AuthError::from_provider_code(&code, action))
        })
    }

    fn identity(&self, path: &[&str], email: &str, password: &str, action: AuthAction) -> Result<Identity, AuthError> {
        let body = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post(path, &body, action)?
            .ok_or_else(|| AuthError::from_provider_code(codes::INTERNAL_ERROR, action))
    }
}

fn unreachable_provider(err: &StoreError, action: AuthAction) -> AuthError {
    tracing::warn!(error = %err, ?action, "identity server unreachable");
    AuthError::from_provider_code(codes::INTERNAL_ERROR, action)
}

impl IdentityProvider for RemoteIdentityProvider {
    fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.identity(&["api", "auth", "sign-in"], email, password, AuthAction::SignIn)
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.identity(&["api", "auth", "sign-up"], email, password, AuthAction::SignUp)
    }

    fn change_password(&self, email: &str, current: &str, new: &str) -> Result<(), AuthError> {
        let body = ChangePasswordRequest {
            email: email.to_string(),
            current_password: current.to_string(),
            new_password: new.to_string(),
        };
        self.post::<_, serde_json::Value>(&["api", "auth", "change-password"], &body, AuthAction::ChangePassword)
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AppState, build_router};
    use chrono::NaiveDate;
    use liftlog_core::auth::{AuthErrorKind, LocalIdentityProvider};
    use liftlog_core::db::Database;
    use liftlog_core::legacy::{LegacyStorage, MemoryStorage, exercises_key, workout_logs_key};
    use liftlog_core::migration::{CleanupPolicy, MigrationOutcome};
    use liftlog_core::service::{PlannedExercise, Session};
    use liftlog_core::volume::{TimeWindow, VolumeQuery};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestServer {
        base: String,
        store: Arc<Database>,
    }

    async fn spawn_server(api_key: Option<&str>) -> TestServer {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = AppState {
            store: db.clone(),
            legacy: Arc::new(MemoryStorage::new()),
            identity: Arc::new(LocalIdentityProvider::new(db.clone())),
            api_key: api_key.map(str::to_string),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        TestServer {
            base: format!("http://{addr}"),
            store: db,
        }
    }

    fn remote(server: &TestServer, api_key: Option<&str>) -> Arc<RemoteClient> {
        Arc::new(RemoteClient::new(&server.base, api_key.map(str::to_string)).unwrap())
    }

    fn identity() -> Identity {
        Identity {
            user_id: "u1".to_string(),
            email: "lifter@example.com".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_over_http() {
        let server = spawn_server(Some("k")).await;
        let store = Arc::new(RemoteStore::new(remote(&server, Some("k"))));
        let legacy = MemoryStorage::new();
        legacy
            .set_item(&workout_logs_key("lifter@example.com"), "{}")
            .unwrap();

        let session = Session::open(identity(), store, &legacy, CleanupPolicy::default()).unwrap();
        assert_eq!(session.migration_report().outcome, MigrationOutcome::Migrated);
        assert!(legacy.get_item(&workout_logs_key("lifter@example.com")).unwrap().is_none());
        assert_eq!(server.store.get_exercises("u1").unwrap().len(), 15);

        let day = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let entry = session
            .add_to_day(
                day,
                &PlannedExercise {
                    exercise_id: "ex1".to_string(),
                    sets: 3,
                    reps: 8,
                    weight: 55.0,
                },
            )
            .unwrap();
        for i in 0..3 {
            session.toggle_set(day, &entry.id, i).unwrap();
        }
        let volume = session.volume(&VolumeQuery::new(TimeWindow::Week, day)).unwrap();
        assert!((volume[0].volume - 1320.0).abs() < f64::EPSILON);
        assert_eq!(server.store.get_workout_log("u1").unwrap().len(), 1);
    }

    fn dirty_legacy() -> MemoryStorage {
        let legacy = MemoryStorage::new();
        legacy
            .set_item(
                &exercises_key("lifter@example.com"),
                r#"[{"id":"c1","name":"","bodyPart":"Arms","description":""},
                    {"id":"c2","name":"Hip Thrust","bodyPart":"Legs","description":"glutes"}]"#,
            )
            .unwrap();
        legacy
            .set_item(
                &workout_logs_key("lifter@example.com"),
                r#"{"2024-06-15":[{"id":"w1","exerciseId":"ex1","sets":[]},
                    {"id":"w2","exerciseId":"c2","sets":[{"reps":5,"weight":80,"completed":true}]}]}"#,
            )
            .unwrap();
        legacy
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dirty_legacy_data_migrates_into_local_and_remote_stores() {
        let server = spawn_server(None).await;
        let local: Arc<dyn AccountStore> = Arc::new(Database::open_in_memory().unwrap());
        let remote_store: Arc<dyn AccountStore> = Arc::new(RemoteStore::new(remote(&server, None)));

        for store in [local, remote_store] {
            let legacy = dirty_legacy();
            let session = Session::open(identity(), store, &legacy, CleanupPolicy::default()).unwrap();
            let report = session.migration_report();
            assert_eq!(report.outcome, MigrationOutcome::Migrated);
            assert_eq!(report.exercises_dropped, 1);
            assert_eq!(report.entries_dropped, 1);
            assert!(session.exercises().unwrap().iter().any(|e| e.name == "Hip Thrust"));
            assert_eq!(session.workout_log().unwrap().day("2024-06-15")[0].id, "w2");
        }
        assert!(server.store.is_initialized("u1").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_path_segments_are_percent_encoded() {
        let server = spawn_server(None).await;
        let client = remote(&server, None);
        let url = client.url(&user_path("a b", &["exercises", "x/y?z"]));
        assert!(url.path().ends_with("/api/users/a%20b/exercises/x%2Fy%3Fz"));

        let store = RemoteStore::new(client);
        store.put_workout_log("a b", &WorkoutLog::new()).unwrap();
        let odd = Exercise {
            id: "my lift/1".to_string(),
            name: "Curl".to_string(),
            body_part: liftlog_core::models::BodyPart::Arms,
            description: String::new(),
            emoji: None,
            is_custom: Some(true),
        };
        store.put_exercise("a b", &odd).unwrap();
        assert_eq!(server.store.get_exercises("a b").unwrap()[0].id, "my lift/1");
        assert!(store.delete_exercise("a b", "my lift/1").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wrong_api_key_is_unavailable() {
        let server = spawn_server(Some("k")).await;
        let store = RemoteStore::new(remote(&server, Some("nope")));
        let err = store.get_exercises("u1").unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(ref msg) if msg.contains("401")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_server_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = Arc::new(RemoteClient::new(&format!("http://{addr}"), None).unwrap());
        let err = RemoteStore::new(client).is_initialized("u1").unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delete_and_invalid_write() {
        let server = spawn_server(None).await;
        let store = RemoteStore::new(remote(&server, None));
        assert!(!store.delete_exercise("u1", "ex1").unwrap());

        let blank = Exercise {
            id: "c1".to_string(),
            name: " ".to_string(),
            body_part: liftlog_core::models::BodyPart::Arms,
            description: String::new(),
            emoji: None,
            is_custom: None,
        };
        assert!(matches!(store.put_exercise("u1", &blank), Err(StoreError::Invalid(_))));

        let valid = Exercise {
            name: "Curl".to_string(),
            ..blank
        };
        store.put_exercise("u1", &valid).unwrap();
        assert!(store.delete_exercise("u1", "c1").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remote_identity() {
        let server = spawn_server(None).await;
        let provider = RemoteIdentityProvider::new(remote(&server, None));

        let created = provider.sign_up("a@b.co", "123456").unwrap();
        assert_eq!(provider.sign_in("A@B.CO", "123456").unwrap(), created);
        assert_eq!(
            provider.sign_in("a@b.co", "654321").unwrap_err().kind,
            AuthErrorKind::WrongCredentials
        );
        assert_eq!(
            provider.sign_up("a@b.co", "123456").unwrap_err().kind,
            AuthErrorKind::EmailAlreadyInUse
        );
        assert_eq!(
            provider.change_password("a@b.co", "bad-pw", "abcdefg").unwrap_err().kind,
            AuthErrorKind::IncorrectCurrentPassword
        );
        provider.change_password("a@b.co", "123456", "abcdefg").unwrap();
        assert!(provider.sign_in("a@b.co", "abcdefg").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscription_sees_remote_changes_until_dropped() {
        let server = spawn_server(None).await;
        let store = RemoteStore::new(remote(&server, None)).with_poll_interval(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let subscription = store
            .subscribe(
                "u1",
                Arc::new(move |_: &AccountSnapshot| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        // Let the poller record a baseline.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let log: WorkoutLog = serde_json::from_str(
            r#"{"2024-06-15":[{"id":"w","exerciseId":"ex1","sets":[{"reps":1,"weight":1,"completed":true}]}]}"#,
        )
        .unwrap();
        server.store.put_workout_log("u1", &log).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        server.store.put_workout_log("u1", &WorkoutLog::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
