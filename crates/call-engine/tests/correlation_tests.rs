//! Post-call correlation against the AI voice-agent conversation listing

mod common;

use axum::http::{Method, StatusCode};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use careline_call_engine::correlation::SyncOutcome;
use careline_call_engine::database::{CallDirection, CallStatus, NewCallRecord, StatusUpdate};

use common::{eventually, harness, TestHarness, OUR_NUMBER};

fn conversation(caller: &str, start: DateTime<Utc>) -> Value {
    json!({
        "metadata": {
            "start_time_unix_secs": start.timestamp(),
            "phone_call": {"external_number": caller}
        },
        "transcript": [
            {"role": "agent", "message": "Hello, you've reached the front desk."},
            {"role": "user", "message": "I'm running late for my appointment."}
        ],
        "analysis": {"transcript_summary": "Caller is running late."}
    })
}

async fn completed_call(h: &TestHarness, sid: &str, caller: &str, created_at: DateTime<Utc>) {
    let db = h.engine.database();
    db.insert_call_if_absent(
        &NewCallRecord::new(sid, CallDirection::Inbound, CallStatus::Completed)
            .with_numbers(caller, OUR_NUMBER)
            .created_at(created_at),
    )
    .await
    .unwrap();
    db.apply_status_update(
        sid,
        &StatusUpdate {
            duration_seconds: Some(90),
            ..Default::default()
        },
    )
    .await
    .unwrap();
}

fn add(h: &TestHarness, id: &str, caller: &str, start: DateTime<Utc>) {
    h.conversations.add(id, start.timestamp(), conversation(caller, start));
}

#[tokio::test]
async fn test_phone_match_beats_closer_start_time() {
    let h = harness().await;
    let t = Utc::now() - Duration::minutes(10);
    completed_call(&h, "CA300", "0412345678", t).await;
    add(&h, "conv_near", "+61499999999", t + Duration::seconds(5));
    add(&h, "conv_phone", "+61412345678", t + Duration::seconds(60));

    let outcome = h.engine.correlation().sync_call("CA300").await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Matched {
            conversation_id: "conv_phone".to_string(),
            score: 140,
        }
    );

    let call = h.engine.database().get_call("CA300").await.unwrap().unwrap();
    assert_eq!(call.external_conversation_id.as_deref(), Some("conv_phone"));
    assert_eq!(
        call.transcript.as_deref(),
        Some("Agent: Hello, you've reached the front desk.\nCaller: I'm running late for my appointment.")
    );
}

#[tokio::test]
async fn test_candidate_outside_window_is_never_matched() {
    let h = harness().await;
    let t = Utc::now() - Duration::hours(1);
    completed_call(&h, "CA301", "0412345678", t).await;
    add(&h, "conv_late", "+61412345678", t + Duration::minutes(16));

    let outcome = h.engine.correlation().sync_call("CA301").await.unwrap();
    assert_eq!(outcome, SyncOutcome::Placeholder);

    let call = h.engine.database().get_call("CA301").await.unwrap().unwrap();
    assert!(call.transcript.is_none());
    assert!(call.external_conversation_id.is_none());
    assert!(call.summary_is_placeholder);
    assert!(call.ai_summary.unwrap().starts_with("Inbound call from 0412345678, 1m 30s."));
}

#[tokio::test]
async fn test_sweep_assigns_each_conversation_once() {
    let h = harness().await;
    let t = Utc::now() - Duration::minutes(30);
    completed_call(&h, "CA302", "0412345678", t).await;
    completed_call(&h, "CA303", "0412345678", t + Duration::seconds(30)).await;
    add(&h, "conv_only", "+61412345678", t + Duration::seconds(10));

    let report = h.engine.correlation().sweep().await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.candidates, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(report.placeholders, 1);

    let db = h.engine.database();
    let first = db.get_call("CA302").await.unwrap().unwrap();
    let second = db.get_call("CA303").await.unwrap().unwrap();
    assert_eq!(first.external_conversation_id.as_deref(), Some("conv_only"));
    assert!(second.external_conversation_id.is_none());
    assert!(second.summary_is_placeholder);

    // the assigned conversation is no longer a candidate
    let again = h.engine.correlation().sweep().await.unwrap();
    assert_eq!(again.examined, 1);
    assert_eq!(again.candidates, 0);
    assert_eq!(again.matched, 0);
    assert_eq!(again.placeholders, 0);
}

#[tokio::test]
async fn test_sync_leaves_transcribed_and_live_calls_alone() {
    let h = harness().await;
    let t = Utc::now() - Duration::minutes(5);
    completed_call(&h, "CA304", "0412345678", t).await;
    h.engine
        .database()
        .set_transcript_if_absent("CA304", "Provider transcript")
        .await
        .unwrap();
    // far outside any window, so the live call below cannot claim it either
    add(&h, "conv_a", "+61412345678", t - Duration::hours(2));
    assert_eq!(
        h.engine.correlation().sync_call("CA304").await.unwrap(),
        SyncOutcome::AlreadyTranscribed
    );

    h.webhook(
        "/webhooks/voice/status",
        &[("CallSid", "CA305"), ("CallStatus", "in-progress"), ("From", "0400000000")],
    )
    .await;
    assert_eq!(
        h.engine.correlation().sync_call("CA305").await.unwrap(),
        SyncOutcome::Unmatched
    );
    let live = h.engine.database().get_call("CA305").await.unwrap().unwrap();
    assert!(live.ai_summary.is_none());
}

#[tokio::test]
async fn test_completion_webhook_triggers_correlation() {
    let h = harness().await;
    add(&h, "conv_live", "+61412345678", Utc::now());

    h.webhook(
        "/webhooks/voice/status",
        &[
            ("CallSid", "CA306"),
            ("CallStatus", "completed"),
            ("CallDuration", "60"),
            ("From", "0412345678"),
            ("To", OUR_NUMBER),
        ],
    )
    .await;

    let db = h.engine.database().clone();
    assert!(
        eventually(|| {
            let db = db.clone();
            async move {
                db.get_call("CA306")
                    .await
                    .unwrap()
                    .is_some_and(|call| call.ai_summary.is_some())
            }
        })
        .await
    );
    let call = db.get_call("CA306").await.unwrap().unwrap();
    assert_eq!(call.external_conversation_id.as_deref(), Some("conv_live"));
    assert_eq!(
        call.ai_summary.as_deref(),
        Some("Summary: Agent: Hello, you've reached the front desk.")
    );
    assert!(!call.summary_is_placeholder);
}

#[tokio::test]
async fn test_transcript_sync_endpoints() {
    let h = harness().await;
    let t = Utc::now() - Duration::minutes(2);
    completed_call(&h, "CA307", "0412345678", t).await;
    add(&h, "conv_api", "0412 345 678", t + Duration::seconds(3));

    let synced = h.api(Method::POST, "/api/calls/CA307/transcript-sync", None).await;
    assert_eq!(synced.status, StatusCode::OK);
    let synced = synced.json();
    assert_eq!(synced["outcome"], "matched");
    assert_eq!(synced["conversation_id"], "conv_api");

    assert_eq!(
        h.api(Method::POST, "/api/calls/CA-unknown/transcript-sync", None).await.status,
        StatusCode::NOT_FOUND
    );

    let report = h.api(Method::POST, "/api/transcripts/sync", None).await.json();
    assert_eq!(report["examined"], 0);
    assert_eq!(report["matched"], 0);
}
