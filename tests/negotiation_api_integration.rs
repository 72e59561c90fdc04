//! Integration tests for the negotiation HTTP API.
//!
//! Each test builds the real router over an in-memory store and a stub
//! reasoning backend, then drives it with `oneshot` requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::time::timeout;
use tower::ServiceExt;

use negotiation_assist::api::negotiation_routes;
use negotiation_assist::approval::{ApprovalPolicy, AutoReplyConditions, ReplyMode};
use negotiation_assist::config::{OrchestrationConfig, Readiness};
use negotiation_assist::error::LlmError;
use negotiation_assist::llm::{CompletionRequest, CompletionResponse, LlmProvider};
use negotiation_assist::negotiation::model::CounterpartyProfile;
use negotiation_assist::service::NegotiationService;
use negotiation_assist::store::{MemoryStore, StaticDirectory};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const PRICING_QUESTION: &str = "料金についてもう少し詳しく教えていただけますか？";

/// Stub backend: answers the analysis prompt with a fixed classification
/// and the drafting prompt with three postures.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let drafting = request
            .messages
            .first()
            .is_some_and(|m| m.content.contains("JSON array"));
        let content = if drafting {
            json!([
                {
                    "pattern_type": "friendly_enthusiastic",
                    "content": "ご質問ありがとうございます！今回のご予算は20,000円〜100,000円を想定しています。ぜひご一緒させてください！",
                    "reasoning": "Warm reply that answers the pricing question directly.",
                    "tone": "friendly"
                },
                {
                    "pattern_type": "cautious_professional",
                    "content": "お問い合わせありがとうございます。料金につきましては、企画内容を確認のうえ改めてご連絡いたします。",
                    "reasoning": "Defers the figure until scope is clear.",
                    "tone": "professional"
                },
                {
                    "pattern_type": "business_focused",
                    "content": "ご予算は20,000円〜100,000円です。投稿本数と納期をご提示いただければ条件を確定します。",
                    "reasoning": "Leads with terms.",
                    "tone": "business"
                }
            ])
            .to_string()
        } else {
            json!({
                "relationship_stage": "initial_contact",
                "emotional_tone": "positive",
                "urgency_level": "normal",
                "main_topics": ["pricing"]
            })
            .to_string()
        };
        Ok(CompletionResponse { content })
    }
}

fn company_settings() -> Value {
    json!({
        "companyName": "InfuMatch株式会社",
        "contactPerson": "田中美咲",
        "negotiationTone": "friendly",
        "budgetRange": {"min": 20000, "max": 100000}
    })
}

fn app_with(provider: Option<Arc<dyn LlmProvider>>, policy: ApprovalPolicy) -> Router {
    let directory = StaticDirectory::new(vec![CounterpartyProfile {
        address: "creator@example.com".into(),
        display_name: Some("Creator".into()),
        engagement_rate: 0.05,
        follower_count: Some(50_000),
    }]);
    let readiness = if provider.is_some() {
        Readiness::Ready
    } else {
        Readiness::Degraded {
            reason: "no key".into(),
        }
    };
    let service = NegotiationService::new(
        &OrchestrationConfig::default(),
        policy,
        provider,
        readiness,
        Arc::new(MemoryStore::new()),
        Arc::new(directory),
    );
    negotiation_routes(Arc::new(service))
}

fn app() -> Router {
    app_with(Some(Arc::new(StubLlm)), ApprovalPolicy::default())
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = timeout(TEST_TIMEOUT, app.clone().oneshot(request))
        .await
        .expect("request timed out")
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn orchestrated_body(thread_id: &str, message: &str) -> Value {
    json!({
        "thread_id": thread_id,
        "new_message": {"from": "creator@example.com", "body": message},
        "company_settings": company_settings(),
        "conversation_history": []
    })
}

#[tokio::test]
async fn pricing_question_yields_three_ranked_patterns() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/negotiation/reply-patterns",
        Some(json!({
            "thread_messages": [{"from": "creator@example.com", "body": PRICING_QUESTION}],
            "company_settings": company_settings()
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["processing_type"], "orchestrated_response");
    assert_eq!(body["thread_analysis"]["relationship_stage"], "initial_contact");

    let patterns = body["reply_patterns"].as_array().unwrap();
    assert_eq!(patterns.len(), 3);
    assert_eq!(patterns[0]["pattern_type"], "friendly_enthusiastic");

    let scores: Vec<f64> = patterns
        .iter()
        .map(|p| p["recommendation_score"].as_f64().unwrap())
        .collect();
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    assert!(scores[0] > scores[1] && scores[1] > scores[2], "{scores:?}");

    for p in patterns {
        let content = p["content"].as_str().unwrap();
        assert!(content.contains("InfuMatch株式会社"));
        assert!(content.contains("田中美咲"));
    }
}

#[tokio::test]
async fn identical_requests_give_identical_patterns() {
    let app = app();
    let request = json!({
        "thread_messages": [{"from": "creator@example.com", "body": PRICING_QUESTION}],
        "company_settings": company_settings()
    });
    let (_, first) = call(&app, "POST", "/negotiation/reply-patterns", Some(request.clone())).await;
    let (_, second) = call(&app, "POST", "/negotiation/reply-patterns", Some(request)).await;
    assert_eq!(first["reply_patterns"], second["reply_patterns"]);
}

#[tokio::test]
async fn disabled_backend_still_answers_with_templates() {
    let app = app_with(None, ApprovalPolicy::default());

    let (status, body) = call(
        &app,
        "POST",
        "/negotiation/reply-patterns",
        Some(json!({
            "thread_messages": [{"from": "creator@example.com", "body": PRICING_QUESTION}],
            "company_settings": company_settings()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processing_type"], "fallback_response");
    assert_eq!(body["reply_patterns"].as_array().unwrap().len(), 3);

    let (status, body) = call(
        &app,
        "POST",
        "/negotiation/orchestrated",
        Some(orchestrated_body("t-1", PRICING_QUESTION)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["processing_type"], "fallback_response");
    let content = body["content"].as_str().unwrap();
    assert!(!content.is_empty());
    assert!(content.contains("田中美咲"));
    assert_eq!(body["decision"]["disposition"], "pending_approval");

    let (_, status_body) = call(&app, "GET", "/negotiation/status", None).await;
    assert_eq!(status_body["status"]["readiness"]["status"], "degraded");
}

#[tokio::test]
async fn orchestrated_reply_goes_to_review_then_approval() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/negotiation/orchestrated",
        Some(orchestrated_body("t-1", PRICING_QUESTION)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["processing_type"], "orchestrated_response");
    assert_eq!(body["decision"]["disposition"], "pending_approval");
    assert!(body["decision"]["deadline"].is_string());
    assert!(!body["metadata"]["ai_thinking"]["entries"].as_array().unwrap().is_empty());
    assert_eq!(
        body["metadata"]["orchestration_details"]["phases"],
        json!(["idle", "loading", "analyzing", "drafting", "scoring", "ready"])
    );

    let (_, pending) = call(&app, "GET", "/email/pending-replies", None).await;
    assert_eq!(pending["pending"].as_array().unwrap().len(), 1);

    let (status, approved) = call(&app, "POST", "/email/approve-reply/t-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["decision"]["disposition"], "approved");
    assert_eq!(approved["decision"]["closed_by"], "reviewer");

    let (status, again) = call(&app, "POST", "/email/approve-reply/t-1", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["success"], false);

    let (status, _) = call(&app, "POST", "/email/approve-reply/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reject_records_reason() {
    let app = app();
    call(&app, "POST", "/negotiation/orchestrated", Some(orchestrated_body("t-2", "hello"))).await;

    let (status, body) = call(
        &app,
        "POST",
        "/email/reject-reply/t-2",
        Some(json!({"reason": "too pushy"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"]["disposition"], "rejected");
    assert_eq!(body["decision"]["reason"], "too pushy");
}

#[tokio::test]
async fn invalid_requests_are_bad_requests() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/negotiation/orchestrated",
        Some(orchestrated_body("t-1", "   ")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &app,
        "POST",
        "/negotiation/reply-patterns",
        Some(json!({"thread_messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn concurrent_messages_on_one_thread_never_double_send() {
    let policy = ApprovalPolicy {
        default_mode: ReplyMode::Auto,
        auto_reply_conditions: AutoReplyConditions {
            max_daily_auto_replies: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let app = app_with(Some(Arc::new(StubLlm)), policy);

    let calls = ["first", "second"].map(|msg| {
        let app = app.clone();
        async move {
            call(&app, "POST", "/negotiation/orchestrated", Some(orchestrated_body("t-1", msg))).await
        }
    });
    let results = futures::future::join_all(calls).await;

    let dispositions: Vec<String> = results
        .iter()
        .map(|(status, body)| {
            assert_eq!(*status, StatusCode::OK);
            body["decision"]["disposition"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(dispositions.iter().filter(|d| *d == "auto_sent").count(), 1);
    assert_eq!(dispositions.iter().filter(|d| *d == "pending_approval").count(), 1);
}

#[tokio::test]
async fn concurrent_messages_on_one_thread_leave_one_live_reply() {
    let policy = ApprovalPolicy {
        auto_reply_conditions: AutoReplyConditions {
            max_daily_auto_replies: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let app = app_with(Some(Arc::new(StubLlm)), policy);

    let calls = ["first", "second", "third", "fourth"].map(|msg| {
        let app = app.clone();
        async move {
            call(&app, "POST", "/negotiation/orchestrated", Some(orchestrated_body("t-1", msg))).await
        }
    });
    let results = futures::future::join_all(calls).await;

    let mut superseded = 0;
    for (status, body) in &results {
        assert_eq!(*status, StatusCode::OK);
        assert_eq!(body["decision"]["disposition"], "pending_approval");
        if !body["superseded"].is_null() {
            assert_eq!(body["superseded"]["disposition"], "rejected");
            assert_eq!(body["superseded"]["closed_by"], "superseded");
            superseded += 1;
        }
    }
    assert_eq!(superseded, 3);

    let (_, pending) = call(&app, "GET", "/email/pending-replies", None).await;
    assert_eq!(pending["pending"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn saved_settings_apply_when_a_request_omits_them() {
    let app = app();
    let mut first = orchestrated_body("t-1", PRICING_QUESTION);
    first["user_id"] = json!("u-1");
    call(&app, "POST", "/negotiation/orchestrated", Some(first)).await;

    let (status, body) = call(
        &app,
        "POST",
        "/negotiation/orchestrated",
        Some(json!({
            "thread_id": "t-2",
            "user_id": "u-1",
            "new_message": {"from": "creator@example.com", "body": PRICING_QUESTION}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let content = body["content"].as_str().unwrap();
    assert!(content.contains("InfuMatch株式会社"));
    assert!(content.contains("田中美咲"));
}

#[tokio::test]
async fn archive_withdraws_pending_reply() {
    let app = app();
    call(&app, "POST", "/negotiation/orchestrated", Some(orchestrated_body("t-3", "hello"))).await;

    let (status, body) = call(&app, "POST", "/negotiation/threads/t-3/archive", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["withdrawn"]["disposition"], "rejected");

    let (_, pending) = call(&app, "GET", "/email/pending-replies", None).await;
    assert!(pending["pending"].as_array().unwrap().is_empty());

    let (status, _) = call(&app, "POST", "/negotiation/threads/unknown/archive", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_lists_roster() {
    let app = app();
    let (status, body) = call(&app, "GET", "/negotiation/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["status"]["specialists"],
        json!(["analyst", "drafter", "scorer"])
    );
    assert_eq!(body["status"]["missing_specialists"], json!([]));
    assert_eq!(body["status"]["readiness"]["status"], "ready");
    assert_eq!(body["status"]["model"], "stub");

    let (status, _) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
