//! Tests for comfymcp-webhooks: registration, signed delivery, retry, log

use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, routing::post, Router};
use comfymcp_webhooks::*;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        timeout: Duration::from_secs(2),
    }
}

#[derive(Default)]
struct Receiver {
    hits: AtomicUsize,
    fail_first: usize,
    seen: Mutex<Vec<(HeaderMap, Bytes)>>,
}

async fn receive(State(r): State<Arc<Receiver>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let n = r.hits.fetch_add(1, Ordering::SeqCst);
    r.seen.lock().unwrap().push((headers, body));
    if n < r.fail_first {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn spawn_receiver(fail_first: usize) -> (String, Arc<Receiver>) {
    let state = Arc::new(Receiver {
        fail_first,
        ..Default::default()
    });
    let app = Router::new().route("/hook", post(receive)).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), state)
}

fn names(events: &[&str]) -> Vec<String> {
    events.iter().map(|s| s.to_string()).collect()
}

// ===========================================================================
// Registration
// ===========================================================================

#[test]
fn register_defaults_to_all_events() {
    let mgr = WebhookManager::new();
    let view = mgr.register("https://example.com/h", &[], Some("s".into()), Map::new()).unwrap();
    assert_eq!(view.events.len(), WebhookEvent::ALL.len());
    assert!(view.has_secret);
    assert!(view.active);

    let json = serde_json::to_value(&view).unwrap();
    assert!(json.get("secret").is_none());
    assert_eq!(json["events"][0], "generation_completed");
}

#[test]
fn register_validates_url_and_events() {
    let mgr = WebhookManager::new();
    assert!(matches!(
        mgr.register("ftp://x", &[], None, Map::new()),
        Err(WebhookError::InvalidUrl(_))
    ));
    assert!(mgr.register("https://", &[], None, Map::new()).is_err());
    let err = mgr
        .register("http://x", &names(&["job_started", "bogus"]), None, Map::new())
        .unwrap_err();
    match err {
        WebhookError::InvalidEvents(bad) => assert_eq!(bad, vec!["bogus".to_string()]),
        other => panic!("unexpected {:?}", other),
    }
    assert!(mgr.is_empty());
}

#[test]
fn unregister_set_active_update_events() {
    let mgr = WebhookManager::new();
    let id = mgr
        .register("http://x", &names(&["job_started"]), None, Map::new())
        .unwrap()
        .webhook_id;

    assert!(!mgr.set_active(&id, false).unwrap().active);
    let updated = mgr.update_events(&id, &names(&["job_failed", "job_cancelled"])).unwrap();
    assert_eq!(updated.events, vec![WebhookEvent::JobFailed, WebhookEvent::JobCancelled]);
    assert!(mgr.update_events(&id, &names(&["nope"])).is_err());
    assert!(matches!(mgr.set_active("missing", true), Err(WebhookError::NotFound(_))));

    assert_eq!(mgr.list().len(), 1);
    assert!(mgr.unregister(&id));
    assert!(!mgr.unregister(&id));
    assert!(mgr.get(&id).is_none());
}

// ===========================================================================
// Delivery
// ===========================================================================

#[tokio::test]
async fn delivery_is_signed_and_shaped() {
    let (url, receiver) = spawn_receiver(0).await;
    let mgr = WebhookManager::with_policy(fast_policy(0));
    let id = mgr.register(&url, &[], Some("topsecret".into()), Map::new()).unwrap().webhook_id;

    let tasks = mgr.dispatch_tracked("generation_completed", json!({"asset_id": "a1"}));
    assert_eq!(tasks.len(), 1);
    let (task_id, handle) = tasks.into_iter().next().unwrap();
    assert_eq!(task_id, id);
    let record = handle.await.unwrap();
    assert!(record.success);
    assert_eq!(record.status_code, Some(200));
    assert_eq!(record.retry_count, 0);

    let seen = receiver.seen.lock().unwrap();
    let (headers, body) = &seen[0];
    assert_eq!(headers["x-webhook-event"], "generation_completed");
    assert_eq!(headers["x-webhook-id"], id.as_str());
    assert_eq!(headers["x-delivery-id"], record.delivery_id.as_str());
    let sig = headers[SIGNATURE_HEADER].to_str().unwrap();
    assert!(verify_signature("topsecret", body, sig));

    let parsed: Value = serde_json::from_slice(body).unwrap();
    assert_eq!(parsed["event"], "generation_completed");
    assert_eq!(parsed["webhook_id"], id.as_str());
    assert_eq!(parsed["data"]["asset_id"], "a1");
    assert!(parsed["timestamp"].is_string());
}

#[tokio::test]
async fn delivery_without_secret_is_unsigned() {
    let (url, receiver) = spawn_receiver(0).await;
    let mgr = WebhookManager::with_policy(fast_policy(0));
    let id = mgr.register(&url, &[], None, Map::new()).unwrap().webhook_id;

    let record = mgr.deliver(&id, WebhookEvent::JobStarted, &json!({})).await.unwrap();
    assert!(record.success);
    let seen = receiver.seen.lock().unwrap();
    assert!(seen[0].0.get(SIGNATURE_HEADER).is_none());
}

#[tokio::test]
async fn delivery_retries_until_success() {
    let (url, receiver) = spawn_receiver(2).await;
    let mgr = WebhookManager::with_policy(fast_policy(3));
    let id = mgr.register(&url, &[], None, Map::new()).unwrap().webhook_id;

    let record = mgr.deliver(&id, WebhookEvent::JobFailed, &json!({"error": "x"})).await.unwrap();
    assert!(record.success);
    assert_eq!(record.retry_count, 2);
    assert_eq!(receiver.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn delivery_gives_up_after_max_retries() {
    let (url, receiver) = spawn_receiver(usize::MAX).await;
    let mgr = WebhookManager::with_policy(fast_policy(2));
    let id = mgr.register(&url, &[], None, Map::new()).unwrap().webhook_id;

    let record = mgr.deliver(&id, WebhookEvent::JobFailed, &json!({})).await.unwrap();
    assert!(!record.success);
    assert_eq!(record.status_code, Some(500));
    assert_eq!(record.retry_count, 2);
    assert!(record.error.as_deref().unwrap().starts_with("HTTP 500"));
    assert_eq!(receiver.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transport_error_is_logged() {
    let mgr = WebhookManager::with_policy(fast_policy(0));
    let id = mgr.register("http://127.0.0.1:1/hook", &[], None, Map::new()).unwrap().webhook_id;

    let record = mgr.deliver(&id, WebhookEvent::JobStarted, &json!({})).await.unwrap();
    assert!(!record.success);
    assert!(record.status_code.is_none());
    assert!(record.error.is_some());
    assert_eq!(mgr.delivery_log(Some(&id), None, 10).len(), 1);
}

#[tokio::test]
async fn dispatch_skips_inactive_unsubscribed_and_unknown() {
    let (url, receiver) = spawn_receiver(0).await;
    let mgr = WebhookManager::with_policy(fast_policy(0));
    let started = mgr.register(&url, &names(&["job_started"]), None, Map::new()).unwrap().webhook_id;
    let paused = mgr.register(&url, &[], None, Map::new()).unwrap().webhook_id;
    mgr.set_active(&paused, false).unwrap();

    assert!(mgr.dispatch("not_an_event", json!({})).is_empty());
    assert!(mgr.dispatch("job_failed", json!({})).is_empty());

    let tasks = mgr.dispatch_tracked("job_started", json!({}));
    assert_eq!(tasks.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(), vec![started]);
    for (_, handle) in tasks {
        handle.await.unwrap();
    }
    assert_eq!(receiver.hits.load(Ordering::SeqCst), 1);
}

// ===========================================================================
// Delivery log
// ===========================================================================

#[tokio::test]
async fn log_is_bounded_filtered_and_newest_first() {
    let (url, _receiver) = spawn_receiver(0).await;
    let mgr = WebhookManager::with_limits(fast_policy(0), 3);
    let a = mgr.register(&url, &[], None, Map::new()).unwrap().webhook_id;
    let b = mgr.register(&url, &[], None, Map::new()).unwrap().webhook_id;

    mgr.deliver(&a, WebhookEvent::JobStarted, &json!({})).await.unwrap();
    mgr.deliver(&a, WebhookEvent::JobFailed, &json!({})).await.unwrap();
    mgr.deliver(&b, WebhookEvent::JobStarted, &json!({})).await.unwrap();
    let last = mgr.deliver(&a, WebhookEvent::JobCancelled, &json!({})).await.unwrap();

    let all = mgr.delivery_log(None, None, 100);
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].delivery_id, last.delivery_id);

    assert_eq!(mgr.delivery_log(Some(&a), None, 100).len(), 2);
    assert_eq!(mgr.delivery_log(None, Some(WebhookEvent::JobStarted), 100).len(), 1);
    assert_eq!(mgr.delivery_log(None, None, 1).len(), 1);
}
