use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Request, StatusCode,
    },
    Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use agenda_core::credentials::{PasswordHasher, TokenSigner};
use agenda_core::workflow::{AppointmentWorkflow, EnforcementPolicy};
use agenda_db::{
    connect_with_settings, migrations, SqlAppointmentRepository, SqlUserRepository,
};
use agenda_server::notify::{self, MailRenderer, NotificationDispatcher, RecordingMailer};
use agenda_server::service::{AccountService, AppointmentService};
use agenda_server::state::AppState;

struct Harness {
    app: Router,
    mailer: RecordingMailer,
    notifier: JoinHandle<()>,
    _dir: TempDir,
}

impl Harness {
    async fn start(policy: EnforcementPolicy) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}", dir.path().join("agenda.db").display());
        let pool = connect_with_settings(&url, 2, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let users = Arc::new(SqlUserRepository::new(pool.clone()));
        let mailer = RecordingMailer::default();
        let dispatcher = NotificationDispatcher::new(
            users.clone(),
            MailRenderer::new().expect("templates"),
            Arc::new(mailer.clone()),
            "agenda@localhost",
        );
        let (publisher, notifier) = notify::spawn(dispatcher, 16);

        let accounts = AccountService::new(
            users,
            PasswordHasher::new(1_000),
            TokenSigner::new(SecretString::from("api-flow-test-secret"), 3_600),
        );
        let appointments = AppointmentService::new(
            Arc::new(SqlAppointmentRepository::new(pool.clone())),
            AppointmentWorkflow::new(policy),
            Arc::new(publisher),
        );

        let app = agenda_server::app(AppState::new(accounts, appointments), pool);
        Self { app, mailer, notifier, _dir: dir }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    async fn register(&self, name: &str, email: &str, role: &str) -> (String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({ "name": name, "email": email, "password": "hunter22", "role": role })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {email}: {body}");
        (
            body["token"].as_str().expect("token").to_string(),
            body["user"]["id"].as_str().expect("user id").to_string(),
        )
    }

    async fn create(&self, token: &str, approver_id: &str, start: &str, end: &str) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/appointments",
                Some(token),
                Some(json!({
                    "approverId": approver_id,
                    "type": "meeting",
                    "startTime": start,
                    "endTime": end,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create: {body}");
        body
    }

    async fn transition(&self, token: &str, id: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PATCH, &format!("/appointments/{id}"), Some(token), Some(body)).await
    }

    /// Drops the router so the dispatcher drains and stops, then returns sent mail.
    async fn finish(self) -> Vec<notify::OutgoingMail> {
        let Self { app, mailer, notifier, _dir } = self;
        drop(app);
        notifier.await.expect("dispatcher");
        mailer.sent()
    }
}

#[tokio::test]
async fn requester_and_approver_complete_the_approval_round_trip() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;
    let (ava_token, ava_id) = harness.register("Ava", "ava@example.com", "user").await;
    let (ben_token, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;

    let created =
        harness.create(&ava_token, &ben_id, "2025-01-01T10:00", "2025-01-01T11:00").await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["requesterId"], ava_id.as_str());
    let id = created["id"].as_str().expect("id").to_string();

    let (status, listed) = harness.call(Method::GET, "/appointments", Some(&ben_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["status"], "pending");

    let (status, approved) =
        harness.transition(&ben_token, &id, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");

    let (_, listed) = harness.call(Method::GET, "/appointments", Some(&ava_token), None).await;
    assert_eq!(listed[0]["id"], id.as_str());
    assert_eq!(listed[0]["status"], "approved");

    let mail = harness.finish().await;
    let recipients: Vec<&str> = mail.iter().map(|mail| mail.to.as_str()).collect();
    assert_eq!(recipients, vec!["ben@example.com", "ava@example.com"]);
    assert_eq!(mail[0].subject, "New Appointment Request");
    assert!(mail[1].text.contains("approved"));
}

#[tokio::test]
async fn requester_id_in_body_is_ignored() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;
    let (ava_token, ava_id) = harness.register("Ava", "ava@example.com", "user").await;
    let (_, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;

    let (status, body) = harness
        .call(
            Method::POST,
            "/appointments",
            Some(&ava_token),
            Some(json!({
                "requesterId": ben_id,
                "approverId": ben_id,
                "type": "chat",
                "startTime": "2025-03-01T09:00:00Z",
                "endTime": "2025-03-01T09:15:00Z",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["requesterId"], ava_id.as_str());
}

#[tokio::test]
async fn listing_is_scoped_to_the_caller_and_newest_first() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;
    let (ava_token, _) = harness.register("Ava", "ava@example.com", "user").await;
    let (ben_token, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;
    let (cara_token, _) = harness.register("Cara", "cara@example.com", "user").await;

    for day in ["01", "03", "02"] {
        harness
            .create(
                &ava_token,
                &ben_id,
                &format!("2025-01-{day}T10:00"),
                &format!("2025-01-{day}T11:00"),
            )
            .await;
    }

    let (_, listed) = harness.call(Method::GET, "/appointments", Some(&ben_token), None).await;
    let starts: Vec<&str> =
        listed.as_array().expect("array").iter().filter_map(|a| a["startTime"].as_str()).collect();
    assert_eq!(
        starts,
        vec!["2025-01-03T10:00:00Z", "2025-01-02T10:00:00Z", "2025-01-01T10:00:00Z"]
    );

    let (_, others) = harness.call(Method::GET, "/appointments", Some(&cara_token), None).await;
    assert_eq!(others, json!([]));
}

#[tokio::test]
async fn transition_refusals_follow_not_found_forbidden_bad_request_order() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;
    let (ava_token, _) = harness.register("Ava", "ava@example.com", "user").await;
    let (ben_token, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;
    let created =
        harness.create(&ava_token, &ben_id, "2025-01-01T10:00", "2025-01-01T11:00").await;
    let id = created["id"].as_str().expect("id");

    let (status, body) =
        harness.transition(&ben_token, "missing-id", json!({ "status": "bogus" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "appointment not found");

    let (status, _) = harness.transition(&ava_token, id, json!({ "status": "bogus" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = harness.transition(&ben_token, id, json!({ "status": "pending" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid status");
}

#[tokio::test]
async fn ill_typed_or_missing_transition_bodies_still_check_lookup_and_approver_first() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;
    let (ava_token, _) = harness.register("Ava", "ava@example.com", "user").await;
    let (ben_token, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;
    let created =
        harness.create(&ava_token, &ben_id, "2025-01-01T10:00", "2025-01-01T11:00").await;
    let id = created["id"].as_str().expect("id");

    let (status, _) = harness.transition(&ava_token, id, json!({ "status": 5 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) =
        harness.call(Method::PATCH, &format!("/appointments/{id}"), Some(&ava_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) =
        harness.call(Method::PATCH, "/appointments/no-such-id", Some(&ben_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "appointment not found");

    let (status, body) = harness.transition(&ben_token, id, json!({ "status": 5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid status");

    let (status, body) =
        harness.call(Method::PATCH, &format!("/appointments/{id}"), Some(&ben_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid status");
}

#[tokio::test]
async fn lenient_policy_accepts_repeat_transitions_and_bare_delays() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;
    let (ava_token, _) = harness.register("Ava", "ava@example.com", "user").await;
    let (ben_token, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;
    let created =
        harness.create(&ava_token, &ben_id, "2025-01-01T10:00", "2025-01-01T11:00").await;
    let id = created["id"].as_str().expect("id");

    for _ in 0..2 {
        let (status, body) =
            harness.transition(&ben_token, id, json!({ "status": "approved" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "approved");
    }

    let (status, body) = harness.transition(&ben_token, id, json!({ "status": "delayed" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delayed");
    assert!(body["delayReason"].is_null());
}

#[tokio::test]
async fn strict_policy_enforces_single_transition_and_complete_delays() {
    let harness = Harness::start(EnforcementPolicy::Strict).await;
    let (ava_token, _) = harness.register("Ava", "ava@example.com", "user").await;
    let (ben_token, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;
    let created =
        harness.create(&ava_token, &ben_id, "2025-01-01T10:00", "2025-01-01T11:00").await;
    let id = created["id"].as_str().expect("id");

    let (status, _) = harness.transition(&ben_token, id, json!({ "status": "delayed" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = harness
        .transition(
            &ben_token,
            id,
            json!({
                "status": "delayed",
                "delayReason": "travelling",
                "newTime": "2025-01-02T10:00",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delayReason"], "travelling");
    assert_eq!(body["newTime"], "2025-01-02T10:00:00Z");

    let (status, _) = harness.transition(&ben_token, id, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness
        .call(
            Method::POST,
            "/appointments",
            Some(&ava_token),
            Some(json!({
                "approverId": ben_id,
                "type": "call",
                "startTime": "2025-01-01T11:00",
                "endTime": "2025-01-01T10:00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_a_valid_bearer_token() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;

    let (status, body) = harness.call(Method::GET, "/appointments", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "missing bearer token");

    let (status, body) =
        harness.call(Method::GET, "/appointments", Some("u-1.9999999999.deadbeef"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid or expired token");
}

#[tokio::test]
async fn login_friends_and_user_lookup() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;
    let (ava_token, ava_id) = harness.register("Ava", "ava@example.com", "user").await;
    let (_, ben_id) = harness.register("Ben", "ben@example.com", "friend").await;

    let (status, body) = harness
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "Ava@Example.com", "password": "hunter22" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], ava_id.as_str());
    assert!(body["user"].get("password_hash").is_none());

    let (status, _) = harness
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "ava@example.com", "password": "nope-nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = harness
        .call(Method::POST, "/auth/register", None, Some(json!({ "name": "Ava" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, friends) = harness.call(Method::GET, "/auth/friends", None, None).await;
    assert_eq!(friends.as_array().map(Vec::len), Some(1));
    assert_eq!(friends[0]["id"], ben_id.as_str());

    let uri = format!("/users?ids={ava_id},{ben_id},unknown");
    let (status, users) = harness.call(Method::GET, &uri, Some(&ava_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request_and_health_reports_ready() {
    let harness = Harness::start(EnforcementPolicy::Lenient).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/login")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let response = harness.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, body) = harness.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}
