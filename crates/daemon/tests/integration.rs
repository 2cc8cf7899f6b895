use spendlog_daemon::{build_router, start, AppOptions, AppState};

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    _root: tempfile::TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }
}

async fn start_server(api_token: Option<String>) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    let app = start(&AppOptions::new(root.path())).await.unwrap();
    let state = AppState { app, api_token };
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestServer {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        _root: root,
        _handle: handle,
    }
}

async fn add_record(srv: &TestServer, amount: f64, details: &str, date: &str) -> i64 {
    let resp = srv
        .client
        .post(srv.url("/records"))
        .json(&serde_json::json!({ "amount": amount, "details": details, "date": date }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn create_backup(srv: &TestServer) -> serde_json::Value {
    let resp = srv.client.post(srv.url("/backups")).send().await.unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let srv = start_server(None).await;

    let resp = srv.client.get(srv.url("/healthz")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["degraded"], false);
}

#[tokio::test]
async fn test_records_round_trip_and_validation() {
    let srv = start_server(None).await;
    add_record(&srv, 4.5, "Coffee", "2024-03-01").await;
    add_record(&srv, 60.0, "Groceries", "2024-03-05").await;

    let records: Vec<serde_json::Value> = srv
        .client
        .get(srv.url("/records"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["details"], "Groceries");

    let resp = srv
        .client
        .post(srv.url("/records"))
        .json(&serde_json::json!({ "amount": -1.0, "details": "Refund", "date": "2024-03-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "StoreError");
}

#[tokio::test]
async fn test_backup_list_and_stats() {
    let srv = start_server(None).await;
    add_record(&srv, 4.5, "Coffee", "2024-03-01").await;

    let created = create_backup(&srv).await;
    assert_eq!(created["recordCount"], 1);
    assert_eq!(created["isVerified"], true);
    assert!(created["filename"].as_str().unwrap().starts_with("budget_backup_"));

    let list: Vec<serde_json::Value> = srv
        .client
        .get(srv.url("/backups"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], created["id"]);

    let stats: serde_json::Value = srv
        .client
        .get(srv.url("/backups/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalBackups"], 1);
}

#[tokio::test]
async fn test_download() {
    let srv = start_server(None).await;
    add_record(&srv, 4.5, "Coffee", "2024-03-01").await;
    let created = create_backup(&srv).await;
    let id = created["id"].as_str().unwrap();

    let resp = srv
        .client
        .get(srv.url(&format!("/backups/{id}/download")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let disposition = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(disposition.contains("budget_backup_"));
    let doc: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(doc["version"], "1.0.0");
    assert_eq!(doc["records"][0]["details"], "Coffee");

    let missing = srv
        .client
        .get(srv.url("/backups/nope/download"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_restore_requires_confirmation() {
    let srv = start_server(None).await;
    let coffee = add_record(&srv, 4.5, "Coffee", "2024-03-01").await;
    let created = create_backup(&srv).await;
    let id = created["id"].as_str().unwrap();
    add_record(&srv, 12.0, "Lunch", "2024-03-02").await;

    let resp = srv
        .client
        .post(srv.url(&format!("/backups/{id}/restore")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "ConfirmationRequiredError");

    let resp = srv
        .client
        .post(srv.url(&format!("/backups/{id}/restore?confirm=true")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(report["restored"], 1);
    assert_eq!(report["transactional"], true);

    let records: Vec<serde_json::Value> = srv
        .client
        .get(srv.url("/records"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], coffee);
}

#[tokio::test]
async fn test_delete_requires_confirmation() {
    let srv = start_server(None).await;
    let created = create_backup(&srv).await;
    let id = created["id"].as_str().unwrap();

    let resp = srv
        .client
        .delete(srv.url(&format!("/backups/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = srv
        .client
        .delete(srv.url(&format!("/backups/{id}?confirm=true")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let list: Vec<serde_json::Value> = srv
        .client
        .get(srv.url("/backups"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_import_rejects_invalid_documents() {
    let srv = start_server(None).await;

    let resp = srv
        .client
        .post(srv.url("/backups/import"))
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "CorruptBackupError");

    let resp = srv
        .client
        .post(srv.url("/backups/import"))
        .body(r#"{"version":"1.0.0","timestamp":"2024-03-01T00:00:00.000Z"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "InvalidBackupError");

    let list: Vec<serde_json::Value> = srv
        .client
        .get(srv.url("/backups"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_import_accepts_exported_snapshot() {
    let srv = start_server(None).await;
    add_record(&srv, 4.5, "Coffee", "2024-03-01").await;
    let created = create_backup(&srv).await;
    let id = created["id"].as_str().unwrap();
    let doc = srv
        .client
        .get(srv.url(&format!("/backups/{id}/download")))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let resp = srv
        .client
        .post(srv.url("/backups/import"))
        .body(doc)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let imported: serde_json::Value = resp.json().await.unwrap();
    assert!(imported["id"].as_str().unwrap().starts_with("imported_"));
    assert_eq!(imported["recordCount"], 1);
}

#[tokio::test]
async fn test_schedule_get_and_put() {
    let srv = start_server(None).await;

    let policy: serde_json::Value = srv
        .client
        .get(srv.url("/schedule"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(policy["enabled"], false);
    assert_eq!(policy["frequency"], "weekly");
    assert_eq!(policy["time"], "02:00");
    assert!(policy["nextBackupTime"].is_null());

    let resp = srv
        .client
        .put(srv.url("/schedule"))
        .json(&serde_json::json!({ "enabled": true, "frequency": "daily", "time": "23:30" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let policy: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(policy["enabled"], true);
    assert_eq!(policy["frequency"], "daily");
    assert_eq!(policy["time"], "23:30");

    let resp = srv
        .client
        .put(srv.url("/schedule"))
        .json(&serde_json::json!({ "time": "25:00" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "InvalidScheduleError");

    let resp = srv.client.post(srv.url("/schedule/test")).send().await.unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn test_share_unavailable_without_command() {
    let srv = start_server(None).await;
    let created = create_backup(&srv).await;
    let id = created["id"].as_str().unwrap();

    let resp = srv
        .client
        .post(srv.url(&format!("/backups/{id}/share")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "SharingUnavailableError");
}

#[tokio::test]
async fn test_api_auth_rejected_without_token() {
    let srv = start_server(Some("secret".to_owned())).await;

    let resp = srv.client.get(srv.url("/backups")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = srv
        .client
        .get(srv.url("/backups"))
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Health stays open for probes.
    let resp = srv.client.get(srv.url("/healthz")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_api_auth_accepted_with_token() {
    let srv = start_server(Some("secret".to_owned())).await;

    let resp = srv
        .client
        .get(srv.url("/backups"))
        .header("Authorization", "Bearer secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
