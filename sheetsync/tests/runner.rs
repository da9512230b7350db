use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use sheetsync::config::SyncConfig;
use sheetsync::runner::{SyncError, SyncRunner};
use sheetsync::service::SmartsheetService;
use sheetsync::sync::backoff::Backoff;
use sheetsync::sync::index::MatchColumn;
use smartsheet_core::{SmartsheetClient, Timeouts};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_bytes, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const SOURCE_SHEET: i64 = 1553121697288068;
const TARGET_SHEET: i64 = 4850043816202116;
const SOURCE_COLUMN: i64 = 11;
const TARGET_COLUMN: i64 = 21;

fn config(server: &MockServer, temp_dir: &Path) -> SyncConfig {
    SyncConfig {
        api_token: "abcdefghijklmnopqrstuvwxyz".to_string(),
        base_url: server.uri(),
        source_sheet_id: SOURCE_SHEET,
        target_sheet_id: TARGET_SHEET,
        source_match_column: MatchColumn::Id(SOURCE_COLUMN),
        target_match_column: MatchColumn::Id(TARGET_COLUMN),
        temp_dir: temp_dir.to_path_buf(),
        concurrency: 1,
        sheet_fetch_attempts: 3,
        http_timeouts: Timeouts::default(),
        fail_on_errors: false,
    }
}

fn runner(server: &MockServer, temp_dir: &Path) -> SyncRunner<SmartsheetService> {
    runner_with(config(server, temp_dir))
}

fn runner_with(config: SyncConfig) -> SyncRunner<SmartsheetService> {
    let client = SmartsheetClient::with_timeouts(
        &config.base_url,
        config.api_token.clone(),
        config.http_timeouts,
    )
    .unwrap();
    SyncRunner::new(SmartsheetService::new(client), config).with_backoff(Backoff::new(
        Duration::from_millis(1),
        Duration::from_millis(5),
        false,
    ))
}

fn file(id: i64, name: &str) -> Value {
    json!({ "id": id, "name": name, "attachmentType": "FILE", "mimeType": "application/pdf" })
}

fn row(id: i64, column: i64, key: i64, attachments: Vec<Value>) -> Value {
    json!({
        "id": id,
        "cells": [{ "columnId": column, "value": key }],
        "attachments": attachments
    })
}

fn row_without_attachments(id: i64, column: i64, key: i64) -> Value {
    json!({ "id": id, "cells": [{ "columnId": column, "value": key }] })
}

fn sheet(id: i64, column: i64, rows: Vec<Value>) -> Value {
    json!({
        "id": id,
        "name": format!("sheet {id}"),
        "columns": [{ "id": column, "index": 0, "title": "Job #", "primary": true }],
        "rows": rows
    })
}

/// Source keys 101, 102, 103; target keys 101, 103. Target row 101 already
/// has `a.pdf`.
async fn mount_sheets(server: &MockServer) {
    mount_sheet_pair(server, default_source(), default_target()).await;
}

fn default_source() -> Value {
    sheet(
        SOURCE_SHEET,
        SOURCE_COLUMN,
        vec![
            row(1, SOURCE_COLUMN, 101, vec![file(1001, "a.pdf"), file(1002, "b.pdf")]),
            row(2, SOURCE_COLUMN, 102, vec![file(1003, "c.pdf")]),
            row(3, SOURCE_COLUMN, 103, vec![]),
        ],
    )
}

fn default_target() -> Value {
    sheet(
        TARGET_SHEET,
        TARGET_COLUMN,
        vec![
            row(201, TARGET_COLUMN, 101, vec![file(2001, "a.pdf")]),
            row(203, TARGET_COLUMN, 103, vec![]),
        ],
    )
}

async fn mount_sheet_pair(server: &MockServer, source: Value, target: Value) {
    for (id, body) in [(SOURCE_SHEET, source), (TARGET_SHEET, target)] {
        Mock::given(method("GET"))
            .and(path(format!("/2.0/sheets/{id}")))
            .and(query_param("include", "attachments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
}

async fn mount_download(server: &MockServer, attachment_id: i64, content: &'static [u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{SOURCE_SHEET}/attachments/{attachment_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": attachment_id,
            "name": "ignored",
            "attachmentType": "FILE",
            "url": format!("{}/blob/{attachment_id}", server.uri())
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/blob/{attachment_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content))
        .mount(server)
        .await;
}

fn upload_ok(name: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "message": "SUCCESS",
        "resultCode": 0,
        "result": { "id": 3001, "name": name, "attachmentType": "FILE" }
    }))
}

#[tokio::test]
async fn copies_new_attachment_and_skips_existing_name() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    mount_sheets(&server).await;
    mount_download(&server, 1002, b"b-content").await;
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{SOURCE_SHEET}/attachments/1001")))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/2.0/sheets/{TARGET_SHEET}/rows/201/attachments")))
        .and(body_bytes(b"b-content".to_vec()))
        .respond_with(upload_ok("b.pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let stats = runner(&server, temp.path())
        .run(false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.rows_processed, 3);
    assert_eq!(stats.rows_matched, 2);
    assert_eq!(stats.rows_unmatched, 1);
    assert_eq!(stats.attachments_copied, 1);
    assert_eq!(stats.attachments_skipped, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.rows_empty, 1);
    assert!(!stats.interrupted);
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn dry_run_plans_without_transferring() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    mount_sheets(&server).await;
    Mock::given(method("POST"))
        .respond_with(upload_ok("b.pdf"))
        .expect(0)
        .mount(&server)
        .await;

    let stats = runner(&server, temp.path())
        .run(true, &CancellationToken::new())
        .await
        .unwrap();

    assert!(stats.dry_run);
    assert_eq!(stats.tasks_planned, 1);
    assert_eq!(stats.attachments_copied, 0);
    assert_eq!(stats.attachments_skipped, 1);
}

#[tokio::test]
async fn failed_upload_is_counted_and_run_completes() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    mount_sheets(&server).await;
    mount_download(&server, 1002, b"b-content").await;
    Mock::given(method("POST"))
        .and(path(format!("/2.0/sheets/{TARGET_SHEET}/rows/201/attachments")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorCode": 1008,
            "message": "Unable to parse request."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stats = runner(&server, temp.path())
        .run(false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.attachments_copied, 0);
    assert_eq!(stats.rows_processed, 3);
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_sheet_aborts_the_run() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{SOURCE_SHEET}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errorCode": 1006,
            "message": "Not Found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = runner(&server, temp.path())
        .run(false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SheetAccess { sheet_id: SOURCE_SHEET, .. }));
}

#[tokio::test]
async fn missing_match_column_aborts_the_run() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    mount_sheets(&server).await;

    let mut config = config(&server, temp.path());
    config.target_match_column = MatchColumn::Id(99);
    let err = runner_with(config)
        .run(false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::MatchColumnMissing {
            sheet_id: TARGET_SHEET,
            column: MatchColumn::Id(99)
        }
    ));
}

#[tokio::test]
async fn rate_limited_sheet_fetch_is_retried() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{SOURCE_SHEET}")))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "errorCode": 4003,
            "message": "Rate limit exceeded."
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_sheets(&server).await;

    let stats = runner(&server, temp.path())
        .run(true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.rows_processed, 3);
}

#[tokio::test]
async fn cancelled_run_reports_remaining_tasks_as_not_attempted() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    mount_sheets(&server).await;
    Mock::given(method("POST"))
        .respond_with(upload_ok("b.pdf"))
        .expect(0)
        .mount(&server)
        .await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stats = runner(&server, temp.path()).run(false, &cancel).await.unwrap();

    assert!(stats.interrupted);
    assert_eq!(stats.tasks_not_attempted, 1);
    assert_eq!(stats.attachments_copied, 0);
}

#[tokio::test]
async fn stalled_download_fails_its_task_and_the_run_moves_on() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    let source = sheet(
        SOURCE_SHEET,
        SOURCE_COLUMN,
        vec![row(1, SOURCE_COLUMN, 101, vec![file(1002, "b.pdf"), file(1004, "d.pdf")])],
    );
    let target = sheet(
        TARGET_SHEET,
        TARGET_COLUMN,
        vec![row(201, TARGET_COLUMN, 101, vec![])],
    );
    mount_sheet_pair(&server, source, target).await;
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{SOURCE_SHEET}/attachments/1002")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1002,
            "name": "b.pdf",
            "attachmentType": "FILE",
            "url": format!("{}/blob/1002", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/1002"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"never".to_vec())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    mount_download(&server, 1004, b"d-content").await;
    Mock::given(method("POST"))
        .and(path(format!("/2.0/sheets/{TARGET_SHEET}/rows/201/attachments")))
        .and(body_bytes(b"d-content".to_vec()))
        .respond_with(upload_ok("d.pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server, temp.path());
    config.http_timeouts = Timeouts {
        connect: Duration::from_secs(1),
        read: Duration::from_millis(200),
    };
    let stats = tokio::time::timeout(
        Duration::from_secs(2),
        runner_with(config).run(false, &CancellationToken::new()),
    )
    .await
    .expect("run should finish without waiting for the stalled download")
    .unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.attachments_copied, 1);
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

struct CancelDuringUpload(CancellationToken);

impl Respond for CancelDuringUpload {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.0.cancel();
        upload_ok("b.pdf")
    }
}

#[tokio::test]
async fn cancellation_after_the_last_task_is_not_an_interruption() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    mount_sheets(&server).await;
    mount_download(&server, 1002, b"b-content").await;
    let cancel = CancellationToken::new();
    Mock::given(method("POST"))
        .and(path(format!("/2.0/sheets/{TARGET_SHEET}/rows/201/attachments")))
        .respond_with(CancelDuringUpload(cancel.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let stats = runner(&server, temp.path()).run(false, &cancel).await.unwrap();

    assert!(cancel.is_cancelled());
    assert!(!stats.interrupted);
    assert_eq!(stats.tasks_not_attempted, 0);
    assert_eq!(stats.attachments_copied, 1);
}

#[tokio::test]
async fn match_columns_resolve_by_title() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    mount_sheets(&server).await;

    let mut config = config(&server, temp.path());
    config.source_match_column = MatchColumn::Title("Job #".into());
    config.target_match_column = MatchColumn::Title("Job #".into());
    let stats = runner_with(config.clone())
        .run(true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.rows_matched, 2);
    assert_eq!(stats.tasks_planned, 1);

    config.target_match_column = MatchColumn::Title("Job Number".into());
    let err = runner_with(config)
        .run(true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::MatchColumnMissing {
            sheet_id: TARGET_SHEET,
            column: MatchColumn::Title(ref title),
        } if title == "Job Number"
    ));
}

fn attachment_page(attachments: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "pageNumber": 1,
        "pageSize": 100,
        "totalPages": 1,
        "totalCount": attachments.len(),
        "data": attachments
    }))
}

#[tokio::test]
async fn rows_without_inline_attachments_are_listed_per_row() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    let source = sheet(
        SOURCE_SHEET,
        SOURCE_COLUMN,
        vec![
            row_without_attachments(1, SOURCE_COLUMN, 101),
            row_without_attachments(2, SOURCE_COLUMN, 102),
        ],
    );
    let target = sheet(
        TARGET_SHEET,
        TARGET_COLUMN,
        vec![row_without_attachments(201, TARGET_COLUMN, 101)],
    );
    mount_sheet_pair(&server, source, target).await;
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{SOURCE_SHEET}/rows/1/attachments")))
        .respond_with(attachment_page(vec![file(1001, "a.pdf"), file(1002, "b.pdf")]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{SOURCE_SHEET}/rows/2/attachments")))
        .respond_with(attachment_page(vec![]))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{TARGET_SHEET}/rows/201/attachments")))
        .respond_with(attachment_page(vec![file(2001, "a.pdf")]))
        .expect(1)
        .mount(&server)
        .await;

    let stats = runner(&server, temp.path())
        .run(true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.rows_matched, 1);
    assert_eq!(stats.rows_unmatched, 1);
    assert_eq!(stats.attachments_skipped, 1);
    assert_eq!(stats.tasks_planned, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn unreadable_target_row_receives_nothing() {
    let server = MockServer::start().await;
    let temp = tempdir().unwrap();
    let target = sheet(
        TARGET_SHEET,
        TARGET_COLUMN,
        vec![
            row_without_attachments(201, TARGET_COLUMN, 101),
            row(203, TARGET_COLUMN, 103, vec![]),
        ],
    );
    mount_sheet_pair(&server, default_source(), target).await;
    Mock::given(method("GET"))
        .and(path(format!("/2.0/sheets/{TARGET_SHEET}/rows/201/attachments")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errorCode": 1004,
            "message": "You are not authorized to perform this action."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(upload_ok("b.pdf"))
        .expect(0)
        .mount(&server)
        .await;

    let stats = runner(&server, temp.path())
        .run(false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.rows_matched, 2);
    assert_eq!(stats.rows_empty, 2);
    assert_eq!(stats.attachments_copied, 0);
}
