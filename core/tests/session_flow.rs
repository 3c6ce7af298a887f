//! Drives a review session end to end against a mocked job service.

use segment_review_core::{
    ApiError, Availability, IssueTypeKey, LoadError, Operation, ReviewConfig, ReviewSession,
    StaticToken, SyncState,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JOB: &str = "job-42";

fn config_for(server: &MockServer) -> ReviewConfig {
    let mut config = ReviewConfig::default();
    config.api.base_url = server.uri();
    config.paging.page_size = 2;
    config
}

fn job_path(suffix: &str) -> String {
    format!("/api/v1/jobs/{JOB}/{suffix}")
}

async fn mount_segment_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(job_path("segments")))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "segments": [
                {"index": 0, "source_text": "Hello.", "translated_text": "Bonjour."},
                {"index": 1, "source_text": "Good night.", "translated_text": "Bonjour soir."}
            ],
            "has_more": true
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(job_path("segments")))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "segments": [
                {"index": 2, "source_text": "Bye.", "translated_text": "Salut."}
            ],
            "has_more": false
        })))
        .mount(server)
        .await;
}

async fn mount_validation(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(job_path("validation-report")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "summary": {"total_segments": 3, "segments_with_issues": 1, "total_issues": 2},
            "per_segment_results": [{
                "segment_index": 1,
                "source_text": "Good night.",
                "translated_text": "Bonjour soir.",
                "structured_cases": [
                    {"issue_type": "accuracy", "severity": 3, "reason": "wrong greeting"},
                    {"issue_type": "completeness", "severity": 2, "reason": "dropped word"}
                ]
            }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn review_flow_against_http_backend() {
    let server = MockServer::start().await;
    mount_segment_pages(&server).await;
    mount_validation(&server).await;
    Mock::given(method("GET"))
        .and(path(job_path("post-edit-log")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(job_path("status")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "validation_status": "completed",
            "post_edit_status": "completed"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(job_path("post-edit")))
        .and(body_json(json!({"selectedCases": {"1": [false, true]}})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let session =
        ReviewSession::connect(JOB, config_for(&server), Arc::new(StaticToken::anonymous()))
            .unwrap();

    let summary = session.load_all(None).await.unwrap();
    assert!(summary.complete);
    assert_eq!(summary.segments, 3);

    let report = session.refresh().await;
    assert_eq!(report.validation, Availability::Ready);
    assert_eq!(report.post_edit, Availability::NotReady);
    assert_eq!(report.full_content, Availability::NotReady);
    assert_eq!(session.full_text(), "Bonjour.\nBonjour soir.\nSalut.");
    assert_eq!(session.validation_summary().unwrap().total_issues, 2);

    let counts = session.selected_counts();
    assert_eq!(counts[&IssueTypeKey::Critical], 1);
    assert_eq!(counts[&IssueTypeKey::MissingContent], 1);

    assert!(session.toggle_issue(1, IssueTypeKey::Critical, 0, false));
    assert_eq!(session.sync_status().await.unwrap(), SyncState::Settled);
    assert!(!session.is_polling());

    session.trigger_post_edit().await.unwrap();
    assert!(session.errors().is_empty());

    session.close();
    assert!(session.is_closed());
}

#[tokio::test]
async fn rejected_token_is_reported_per_operation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(job_path("segments")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let session = ReviewSession::connect(
        JOB,
        config_for(&server),
        Arc::new(StaticToken::new("expired")),
    )
    .unwrap();

    let error = session.load_more().await.unwrap_err();
    assert!(matches!(
        error,
        LoadError::Api(ApiError::Unauthorized { status: 401, .. })
    ));
    assert!(session.error_for(Operation::GetSegmentsPage).is_some());
    assert!(session.segments().is_empty());
    assert!(session.cursor().has_more());
}
