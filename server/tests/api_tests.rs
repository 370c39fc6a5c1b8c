//! HTTP-level tests against a server bound to an ephemeral port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use papconv::{ConversionService, ServiceConfig, TextEngine};
use papconv_server::{create_router, AppState};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use tempfile::TempDir;

struct TestServer {
    base: String,
    client: reqwest::Client,
    _temp: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Like `start`, with the history database kept in the temp dir.
    async fn start_with_history() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(history: bool) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut config = ServiceConfig::new(
            temp.path().join("uploads").to_string_lossy(),
            temp.path().join("output").to_string_lossy(),
        );
        config.worker_count = 1;
        let database = temp.path().join("history.db");
        config.database_path = Some(database.to_string_lossy().into_owned());

        let mut builder = ConversionService::builder(config, Arc::new(TextEngine::new()));
        if !history {
            builder = builder.without_history();
        }
        let service = builder.build().expect("Failed to build service");
        let app = create_router(AppState::new(Arc::new(service)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to read local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            _temp: temp,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn upload(&self, filename: &str, content: &str) -> reqwest::Response {
        let form = Form::new().part(
            "file",
            Part::bytes(content.as_bytes().to_vec()).file_name(filename.to_string()),
        );
        self.client
            .post(self.url("/api/convert"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn wait_terminal(&self, id: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let (status, body) = self.get_json(&format!("/api/convert/{}/status", id)).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
            assert!(Instant::now() < deadline, "job {} did not finish", id);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let (status, body) = server.get_json("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["engine"], "text");
    assert_eq!(body["workers"], 1);
}

#[tokio::test]
async fn test_upload_convert_and_download() {
    let server = TestServer::start().await;

    let resp = server
        .upload("plan.md", "# Plan\n\n| step | owner |\n| --- | --- |\n| draft | ana |\n")
        .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let job: Value = resp.json().await.unwrap();
    let id = job["jobId"].as_str().unwrap().to_string();
    assert_eq!(job["filename"], "plan.md");

    let view = server.wait_terminal(&id).await;
    assert_eq!(view["status"], "completed", "{}", view);
    assert_eq!(view["progress"], 100);

    let (status, result) = server.get_json(&format!("/api/convert/{}/result", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["tablesCount"], 1);

    let download = server
        .client
        .get(server.url(&format!("/api/export/{}/markdown", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    let disposition = download.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains("plan.md"));
    assert!(download.text().await.unwrap().contains("# Plan"));

    let (status, content) = server
        .get_json(&format!("/api/export/{}/text/content", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(content["content"].as_str().unwrap().contains("Plan"));

    let csv = server
        .client
        .get(server.url(&format!("/api/convert/{}/tables/1/csv", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(csv.status(), StatusCode::OK);
    assert!(csv.text().await.unwrap().contains("draft,ana"));

    let events = server
        .client
        .get(server.url(&format!("/api/convert/{}/events", id)))
        .send()
        .await
        .unwrap();
    let body = events.text().await.unwrap();
    assert!(body.contains("event: progress"));
    assert!(body.contains("\"status\":\"completed\""));

    let deleted = server
        .client
        .delete(server.url(&format!("/api/convert/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let (status, _) = server.get_json(&format!("/api/convert/{}/status", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_mapping() {
    let server = TestServer::start().await;

    let resp = server.upload("tool.exe", "MZ").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains(".exe"));

    let (status, _) = server.get_json("/api/convert/missing/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let resp = server.upload("scan.pdf", "%PDF-1.4").await;
    let id = resp.json::<Value>().await.unwrap()["jobId"]
        .as_str()
        .unwrap()
        .to_string();
    let view = server.wait_terminal(&id).await;
    assert_eq!(view["status"], "failed");

    let (status, body) = server.get_json(&format!("/api/convert/{}/result", id)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("Unsupported input"));

    let (status, _) = server.get_json(&format!("/api/export/{}/pdf", id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp = server
        .client
        .post(server.url("/api/convert/url"))
        .json(&serde_json::json!({ "url": "ftp://example.com/a.pdf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_reports_rejections() {
    let server = TestServer::start().await;

    let form = Form::new()
        .part("files", Part::bytes(b"one".to_vec()).file_name("one.txt"))
        .part("files", Part::bytes(b"MZ".to_vec()).file_name("two.exe"))
        .part(
            "files",
            Part::bytes(b"three".to_vec()).file_name("three.txt"),
        );
    let resp = server
        .client
        .post(server.url("/api/convert/batch"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["accepted"].as_array().unwrap().len(), 2);
    let rejected = body["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["index"], 1);
}

#[tokio::test]
async fn test_settings_update_and_reset() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .put(server.url("/api/settings"))
        .json(&serde_json::json!({ "ocr": { "language": "de" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, settings) = server.get_json("/api/settings").await;
    assert_eq!(settings["ocr"]["language"], "de");

    let resp = server
        .client
        .put(server.url("/api/settings"))
        .json(&serde_json::json!({ "chunking": { "max_tokens": 0 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let reset: Value = server
        .client
        .post(server.url("/api/settings/reset"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["ocr"]["language"], "en");
}

#[tokio::test]
async fn test_supported_formats() {
    let server = TestServer::start().await;

    let (status, formats) = server.get_json("/api/settings/formats").await;
    assert_eq!(status, StatusCode::OK);

    let markdown = formats["inputFormats"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["id"] == "md")
        .expect("markdown is accepted by default");
    assert_eq!(markdown["extensions"], serde_json::json!([".md", ".markdown"]));

    let outputs = formats["outputFormats"].as_array().unwrap();
    assert!(outputs
        .iter()
        .any(|f| f["id"] == "markdown" && f["mimeType"] == "text/markdown"));
}

#[tokio::test]
async fn test_history_entry_stats_and_delete() {
    let server = TestServer::start_with_history().await;

    let resp = server.upload("notes.md", "# Notes\n\nSome text").await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let job: Value = resp.json().await.unwrap();
    let id = job["jobId"].as_str().unwrap().to_string();
    assert_eq!(server.wait_terminal(&id).await["status"], "completed");

    let (status, entry) = server.get_json(&format!("/api/history/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["status"], "completed");
    assert_eq!(entry["inputFormat"], "md");

    let (status, stats) = server.get_json("/api/history/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["formatBreakdown"]["md"], 1);

    let resp = server
        .client
        .delete(server.url(&format!("/api/history/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (status, _) = server.get_json(&format!("/api/history/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server.get_json(&format!("/api/convert/{}/status", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, stats) = server.get_json("/api/history/stats").await;
    assert_eq!(stats["total"], 0);

    let resp = server
        .client
        .delete(server.url(&format!("/api/history/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
