#![cfg(feature = "web")]

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::{MASTER_CSV, SHOPIFY_CSV};
use csms::Config;
use csms::app::{AppState, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "csms-test-boundary";
const SERVICE_KEY: &str = "service-secret";

struct TestApp {
    router: Router,
    _dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            service_key: Some(SERVICE_KEY.to_string()),
            ..Config::default()
        };
        adjust(&mut config);
        let state = Arc::new(AppState::open(config).unwrap());
        TestApp {
            router: build_router(state),
            _dir: dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
        (status, headers, body)
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn signup(&self, email: &str, role: &str) -> String {
        let (status, body) = self
            .json(post_json(
                "/api/users/create",
                None,
                json!({ "email": email, "password": "hunter22", "role": role }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["userId"].as_str().unwrap().to_string()
    }

    /// Sign in and return the `session=...` cookie pair.
    async fn login(&self, email: &str) -> String {
        let form = format!("email={}&password=hunter22", email.replace('@', "%40"));
        let request = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap();
        let (status, headers, _) = self.send(request).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/mv");

        let set_cookie = headers[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn editor(&self) -> String {
        self.signup("ops@example.com", "Edit").await;
        self.login("ops@example.com").await
    }
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn upload(uri: &str, cookie: &str, field: &str, content: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn anonymous_requests_are_turned_away() {
    let app = TestApp::new();

    let (status, _) = app.json(get("/api/products", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, headers, _) = app.send(get("/mv", None)).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers[header::LOCATION], "/login?next=%2Fmv");

    let (_, headers, _) = app.send(get("/", None)).await;
    assert_eq!(headers[header::LOCATION], "/login");
}

#[tokio::test]
async fn signup_requires_every_field() {
    let app = TestApp::new();
    let (status, body) = app
        .json(post_json("/api/users/create", None, json!({ "email": "a@example.com", "password": "x" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "email, password and role (Edit|View) are required");

    let (status, _) = app
        .json(post_json(
            "/api/users/create",
            None,
            json!({ "email": "a@example.com", "password": "x", "role": "Owner" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.signup("a@example.com", "View").await;
    let (status, _) = app
        .json(post_json(
            "/api/users/create",
            None,
            json!({ "email": "A@example.com", "password": "y", "role": "View" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn closed_signup_needs_an_editor() {
    let app = TestApp::with_config(|config| config.allow_signup = false);
    let (status, _) = app
        .json(post_json(
            "/api/users/create",
            None,
            json!({ "email": "a@example.com", "password": "x", "role": "View" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let app = TestApp::new();
    app.signup("ops@example.com", "Edit").await;

    let request = Request::post("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("email=ops%40example.com&password=nope"))
        .unwrap();
    let (status, headers, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn session_reports_the_caller() {
    let app = TestApp::new();
    let cookie = app.editor().await;

    let (status, body) = app.json(get("/api/session", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "email": "ops@example.com", "role": "Edit" }));

    let (status, headers, _) = app.send(get("/logout", Some(&cookie))).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers[header::LOCATION], "/login");

    let (status, _) = app.json(get("/api/session", Some(&cookie))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn import_then_browse_and_export() {
    let app = TestApp::new();
    let cookie = app.editor().await;

    let (status, body) = app
        .json(upload("/api/products/import", &cookie, "file", MASTER_CSV.as_bytes()))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["products"], 3);
    assert_eq!(body["collapsed_duplicates"], 1);

    let (status, body) = app.json(get("/api/products?group_by=sku", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"][0]["sku"], "RING-01");
    assert_eq!(body["colors"]["RING-01"], json!(["Gold", "Rose"]));

    let (_, body) = app
        .json(get("/api/products?availability=out&q=ring", Some(&cookie)))
        .await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["variant"], "Rose / 7");

    let (status, headers, csv) = app.send(get("/api/products/export", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("csms-variants-export.csv"));
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().next(), MASTER_CSV.lines().next());

    let (status, _, _) = app.send(get("/api/products/export?format=pdf", Some(&cookie))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn import_without_a_file_is_a_bad_request() {
    let app = TestApp::new();
    let cookie = app.editor().await;

    let (status, body) = app
        .json(upload("/api/products/import", &cookie, "other", b"SKU\nA1\n"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "file missing");
}

#[tokio::test]
async fn product_page_stage_commit_and_undo() {
    let app = TestApp::new();
    let cookie = app.editor().await;
    app.send(upload("/api/products/import", &cookie, "file", MASTER_CSV.as_bytes()))
        .await;

    let (status, body) = app
        .json(get("/api/products/RING-01?color=Gold&location=ware", Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cards"]["stock"], 8);
    assert_eq!(body["selected"]["location"], "Warehouse");
    assert_eq!(body["variants"].as_array().unwrap().len(), 2);

    let (status, _) = app.json(get("/api/products/NOPE", Some(&cookie))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .json(post_json(
            "/api/products/RING-01/stage",
            Some(&cookie),
            json!({ "additions": [{ "location": "Liberty", "quantity": 4 }] }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.json(get("/api/products/RING-01", Some(&cookie))).await;
    assert_eq!(body["recent_changes"][0]["quantity"], 4);

    let (status, body) = app
        .json(post_json("/api/products/RING-01/commit", Some(&cookie), json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let liberty = body["products"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["location"] == "Liberty")
        .unwrap();
    assert_eq!(liberty["on_hand_current"], 12);

    let (status, _) = app
        .json(post_json("/api/products/RING-01/undo", Some(&cookie), json!({ "index": 0 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn orders_returns_and_direct_updates() {
    let app = TestApp::new();
    let cookie = app.editor().await;
    app.send(upload("/api/products/import", &cookie, "file", MASTER_CSV.as_bytes()))
        .await;

    let (status, body) = app
        .json(post_json(
            "/api/products/CH-02/orders",
            Some(&cookie),
            json!({ "location": "Liberty", "quantity": 2 }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], 2);

    let (status, body) = app
        .json(post_json(
            "/api/products/CH-02/returns",
            Some(&cookie),
            json!({ "location": "Liberty", "quantity": 1, "status": "in_transit" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["returns"], 1);

    let (status, _) = app
        .json(post_json(
            "/api/products/CH-02/orders",
            Some(&cookie),
            json!({ "location": "Liberty", "quantity": 0 }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(post_json(
            "/api/products/CH-02/orders",
            Some(&cookie),
            json!({ "location": "Mars", "quantity": 1 }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app
        .json(post_json(
            "/api/products/CH-02/on-hand-current",
            Some(&cookie),
            json!({ "location": "Liberty", "value": 20 }),
        ))
        .await;
    assert_eq!(body["updated"], 1);

    let (_, body) = app
        .json(post_json(
            "/api/products/RING-01/variants",
            Some(&cookie),
            json!({ "location": "Liberty", "color": "Gold", "size": "8", "value": 2 }),
        ))
        .await;
    assert_eq!(body["updated"], 1);
}

#[tokio::test]
async fn viewers_cannot_change_anything() {
    let app = TestApp::new();
    app.signup("viewer@example.com", "View").await;
    let cookie = app.login("viewer@example.com").await;

    let (status, _) = app
        .json(upload("/api/products/import", &cookie, "file", MASTER_CSV.as_bytes()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(post_json("/api/products/RING-01/commit", Some(&cookie), json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app.send(get("/api/products/export", Some(&cookie))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.json(get("/api/products", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn set_role_needs_the_service_key() {
    let app = TestApp::new();
    let user_id = app.signup("viewer@example.com", "View").await;
    let request = |key: Option<&str>, body: Value| {
        let mut builder = Request::post("/api/users/set-role").header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            builder = builder.header("x-service-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    };

    let (status, _) = app
        .json(request(None, json!({ "userId": user_id, "role": "Edit" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .json(request(Some(SERVICE_KEY), json!({ "userId": user_id, "role": "Root" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(request(Some(SERVICE_KEY), json!({ "userId": "missing", "role": "Edit" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .json(request(Some(SERVICE_KEY), json!({ "userId": user_id, "role": "Edit" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["app_metadata"]["role"], "Edit");

    let cookie = app.login("viewer@example.com").await;
    let (_, body) = app.json(get("/api/session", Some(&cookie))).await;
    assert_eq!(body["role"], "Edit");
}

#[tokio::test]
async fn set_role_without_a_configured_key_is_a_server_error() {
    let app = TestApp::with_config(|config| config.service_key = None);
    let request = Request::post("/api/users/set-role")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-service-key", "anything")
        .body(Body::from(json!({ "userId": "u1", "role": "Edit" }).to_string()))
        .unwrap();

    let (status, _) = app.json(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn shopify_inventory_round_trip() {
    let app = TestApp::new();
    let cookie = app.editor().await;

    let (status, body) = app
        .json(upload("/api/inventory/import", &cookie, "file", SHOPIFY_CSV.as_bytes()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "processed": 2, "upserted": 2 }));

    let (status, headers, csv) = app.send(get("/api/inventory/export", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 2);

    let (status, body) = app
        .json(upload("/api/inventory/import", &cookie, "file", b"\r\n  \n"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "inserted": 0, "updated": 0 }));
}

#[tokio::test]
async fn snapshot_download_and_restore() {
    let source = TestApp::new();
    let cookie = source.editor().await;
    source
        .send(upload("/api/products/import", &cookie, "file", MASTER_CSV.as_bytes()))
        .await;

    let (status, headers, snapshot) = source.send(get("/api/snapshot", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/gzip");

    let target = TestApp::new();
    let cookie = target.editor().await;
    let (status, body) = target
        .json(upload("/api/snapshot", &cookie, "snapshot", &snapshot))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["products"], 3);

    let (_, body) = target.json(get("/api/products?group_by=sku", Some(&cookie))).await;
    assert_eq!(body["total"], 2);

    let (status, _) = target
        .json(upload("/api/snapshot", &cookie, "snapshot", b"garbage"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_snapshot_is_a_bad_request() {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let app = TestApp::new();
    let cookie = app.editor().await;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&1u64.to_le_bytes()).unwrap();
    encoder.write_all(&(u64::MAX / 2).to_le_bytes()).unwrap();
    let crafted = encoder.finish().unwrap();

    let (status, body) = app.json(upload("/api/snapshot", &cookie, "snapshot", &crafted)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = app.json(get("/api/products", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
}
