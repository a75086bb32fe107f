use chrono::{TimeZone, Utc};
use reporter_core::render::content_hash;
use reporter_core::{DeliverySink, RenderedReport, ReportError, Window};
use reporter_pipeline::sinks::discord::DISCORD_MESSAGE_LIMIT;
use reporter_pipeline::{DiscordSink, FileSink};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn report(body: &str) -> RenderedReport {
    RenderedReport {
        window: Window {
            start: Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
            period_id: "2026-W42".into(),
        },
        body: body.to_string(),
        content_hash: content_hash(body),
    }
}

#[tokio::test]
async fn test_discord_posts_content_and_username() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/abc"))
        .and(body_partial_json(serde_json::json!({
            "content": "# Weekly budget report",
            "username": "Budget Reporter"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sink = DiscordSink::new(format!("{}/api/webhooks/1/abc", server.uri())).unwrap();
    let r = report("# Weekly budget report");
    let receipt = sink.deliver(&r).await.unwrap();

    assert_eq!(receipt.sink, "discord");
    assert_eq!(receipt.reference, r.content_hash);
}

#[tokio::test]
async fn test_discord_truncates_long_reports() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let sink = DiscordSink::new(server.uri()).unwrap();
    sink.deliver(&report(&"x".repeat(5000))).await.unwrap();

    let requests: Vec<Request> = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let content = sent["content"].as_str().unwrap();
    assert_eq!(content.chars().count(), DISCORD_MESSAGE_LIMIT);
    assert!(content.ends_with("..."));
}

#[tokio::test]
async fn test_discord_error_status_is_delivery_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let sink = DiscordSink::new(server.uri()).unwrap();
    let err = sink.deliver(&report("hi")).await.unwrap_err();

    assert!(matches!(err, ReportError::Delivery(_)));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("429"));
}

#[tokio::test]
async fn test_file_sink_is_idempotent_by_hash() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path().join("reports"));
    let r = report("# Weekly budget report\n");

    let first = sink.deliver(&r).await.unwrap();
    let second = sink.deliver(&r).await.unwrap();
    assert_eq!(first, second);

    let path = sink.path_for(&r);
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("2026-W42-"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), r.body);

    let changed = report("# Weekly budget report\nmore\n");
    sink.deliver(&changed).await.unwrap();
    assert_eq!(std::fs::read_dir(sink.dir()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_file_sink_alert_leaves_failure_note() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path());
    let r = report("x");

    sink.alert(&r.window, "provider error: timeout").await.unwrap();

    let note = std::fs::read_to_string(dir.path().join("2026-W42-FAILED.txt")).unwrap();
    assert_eq!(note, "provider error: timeout\n");
}
