// tests/session_test.rs - Integration test: session lifecycle against a mock service

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;

use common::{controller, message, test_config, MockService};
use simcoach::infra::errors::SimError;
use simcoach::remote::SimulationService;
use simcoach::session::resolver::ScenarioResolver;
use simcoach::session::store::SessionStore;
use simcoach::session::types::{Emotion, ProgressValue, Sender, SessionAnalysis, SessionStatus};
use simcoach::session::{
    LifecycleState, SendOutcome, SessionController, SessionDeps, SessionEvent,
};

fn setup() -> (Arc<MockService>, Arc<SessionStore>) {
    (Arc::new(MockService::new()), Arc::new(SessionStore::in_memory()))
}

// ─── Scenario resolution ────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_resolves_share_one_bulk_fetch() {
    let mock = Arc::new(MockService::new());
    *mock.list_delay.lock().unwrap() = Some(Duration::from_millis(50));
    let service: Arc<dyn SimulationService> = mock.clone();
    let resolver = Arc::new(ScenarioResolver::new(service));

    let mut handles = Vec::new();
    for i in 0..10 {
        let resolver = resolver.clone();
        let id = if i % 2 == 0 { "crisis-leadership" } else { "negotiation" };
        handles.push(tokio::spawn(async move { resolver.resolve(id).await }));
    }
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }

    assert_eq!(MockService::count(&mock.list_calls), 1);
    assert_eq!(resolver.cached_len(), 2);
}

#[tokio::test]
async fn test_unknown_scenario_fails_open_and_returns_to_idle() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);

    let err = c.open("does-not-exist").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(c.state(), LifecycleState::Idle);
    assert_eq!(MockService::count(&mock.create_calls), 0);

    // Retry is allowed after a failed initialization.
    c.open("crisis-leadership").await.unwrap();
    assert_eq!(c.state(), LifecycleState::Active);
}

// ─── Creation and resumption ────────────────────────────────────────────────

#[tokio::test]
async fn test_new_session_gets_welcome_message() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);

    let opened = c.open("crisis-leadership").await.unwrap();
    assert!(!opened.resumed);
    assert_eq!(opened.transcript_len, 1);
    assert_eq!(MockService::count(&mock.create_calls), 1);
    assert_eq!(c.state(), LifecycleState::Active);

    let transcript = c.transcript();
    assert_eq!(transcript.len(), 1);
    let welcome = transcript.last().unwrap();
    assert_eq!(welcome.sender, Sender::Counterpart);
    assert!(welcome.is_local());

    assert_eq!(store.get("crisis-leadership").unwrap().session_id, opened.session.id);

    let signals = c.signals();
    assert_eq!(signals.emotional_tone, 50);
    assert_eq!(signals.strategic_alignment, 50);
    assert_eq!(signals.objectives.len(), 2);
}

#[tokio::test]
async fn test_resume_fetches_every_transcript_page() {
    let store = Arc::new(SessionStore::in_memory());
    let mock = Arc::new(MockService {
        page_size: 2,
        ..MockService::new()
    });
    mock.insert_session(
        "sim-77",
        SessionStatus::Active,
        vec![
            message("1", Sender::Counterpart, "Welcome."),
            message("2", Sender::User, "Thanks for meeting."),
            message("3", Sender::Counterpart, "Let's begin."),
        ],
    );
    store.put("crisis-leadership", "sim-77").unwrap();

    let c = controller(&mock, &store);
    let opened = c.open("crisis-leadership").await.unwrap();
    assert!(opened.resumed);
    assert!(c.was_resumed());
    assert_eq!(opened.session.id, "sim-77");
    assert_eq!(MockService::count(&mock.create_calls), 0);

    let contents: Vec<String> = c
        .transcript()
        .messages()
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(contents, vec!["Welcome.", "Thanks for meeting.", "Let's begin."]);
}

#[tokio::test]
async fn test_resumed_empty_transcript_gets_welcome() {
    let (mock, store) = setup();
    mock.insert_session("sim-5", SessionStatus::Active, Vec::new());
    store.put("crisis-leadership", "sim-5").unwrap();

    let c = controller(&mock, &store);
    let opened = c.open("crisis-leadership").await.unwrap();
    assert!(opened.resumed);
    assert_eq!(c.transcript().len(), 1);
    assert!(c.transcript().last().unwrap().is_local());
}

#[tokio::test]
async fn test_not_found_pointer_is_replaced() {
    let (mock, store) = setup();
    store.put("crisis-leadership", "ghost").unwrap();

    let c = controller(&mock, &store);
    let opened = c.open("crisis-leadership").await.unwrap();

    assert!(!opened.resumed);
    assert_eq!(MockService::count(&mock.create_calls), 1);
    assert_ne!(opened.session.id, "ghost");
    assert_eq!(store.get("crisis-leadership").unwrap().session_id, opened.session.id);
    assert_eq!(c.state(), LifecycleState::Active);
}

#[tokio::test]
async fn test_ended_pointer_is_replaced() {
    let (mock, store) = setup();
    mock.insert_session("sim-old", SessionStatus::Ended, vec![message("1", Sender::User, "Hi")]);
    store.put("crisis-leadership", "sim-old").unwrap();

    let c = controller(&mock, &store);
    let opened = c.open("crisis-leadership").await.unwrap();

    assert!(!opened.resumed);
    assert_ne!(opened.session.id, "sim-old");
    assert_eq!(c.transcript().len(), 1);
}

#[tokio::test]
async fn test_resume_remote_failure_is_fatal_and_keeps_pointer() {
    let (mock, store) = setup();
    mock.insert_session("sim-9", SessionStatus::Active, Vec::new());
    mock.fail_get_session.store(true, Ordering::SeqCst);
    store.put("crisis-leadership", "sim-9").unwrap();

    let c = controller(&mock, &store);
    let err = c.open("crisis-leadership").await.unwrap_err();

    assert!(err.is_remote_failure());
    assert_eq!(c.state(), LifecycleState::Idle);
    assert_eq!(store.get("crisis-leadership").unwrap().session_id, "sim-9");
    assert_eq!(MockService::count(&mock.create_calls), 0);
}

#[tokio::test]
async fn test_transcript_failure_for_live_session_keeps_pointer() {
    let (mock, store) = setup();
    mock.insert_session("sim-live", SessionStatus::Active, Vec::new());
    mock.messages.lock().unwrap().remove("sim-live");
    store.put("crisis-leadership", "sim-live").unwrap();

    let c = controller(&mock, &store);
    let err = c.open("crisis-leadership").await.unwrap_err();

    // The session itself is live, so a missing transcript must not look
    // like a stale pointer.
    assert!(err.is_not_found());
    assert_eq!(c.state(), LifecycleState::Idle);
    assert_eq!(MockService::count(&mock.create_calls), 0);
    assert_eq!(store.get("crisis-leadership").unwrap().session_id, "sim-live");
}

#[tokio::test]
async fn test_resumed_elapsed_includes_earlier_run_time() {
    let (mock, store) = setup();
    mock.insert_session("sim-7", SessionStatus::Active, Vec::new());
    mock.sessions.lock().unwrap().get_mut("sim-7").unwrap().started_at =
        Utc::now() - chrono::Duration::minutes(30);
    store.put("crisis-leadership", "sim-7").unwrap();

    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();
    assert!(c.elapsed() >= Duration::from_secs(29 * 60));

    let fresh = controller(&mock, &store);
    fresh.open("negotiation").await.unwrap();
    assert!(fresh.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn test_open_twice_is_invalid() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();

    let err = c.open("negotiation").await.unwrap_err();
    assert!(matches!(err, SimError::InvalidState { .. }));
    assert_eq!(c.state(), LifecycleState::Active);
}

// ─── Exchanges ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_appends_pair_and_merges_progress_sparsely() {
    let (mock, store) = setup();
    let progress: BTreeMap<String, ProgressValue> =
        [("Present a plan".to_string(), ProgressValue::Done(true))]
            .into_iter()
            .collect();
    *mock.progress.lock().unwrap() = Some(progress);

    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();
    let before = c.transcript().len();

    let outcome = c.send("¿Cuál es su propuesta?").await.unwrap();
    assert!(outcome.is_delivered());
    assert_eq!(c.transcript().len(), before + 2);

    let signals = c.signals();
    assert_eq!(signals.objectives.get("Present a plan"), Some(ProgressValue::Done(true)));
    assert_eq!(signals.objectives.get("Calm the board"), Some(ProgressValue::Done(false)));
    assert_eq!(signals.objectives.len(), 2);
    assert_eq!(signals.last_sequence, 1);
}

#[tokio::test]
async fn test_failed_send_appends_one_fallback_and_keeps_signals() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();
    let before_len = c.transcript().len();
    let before_signals = c.signals();

    mock.fail_send.store(true, Ordering::SeqCst);
    let outcome = c.send("Our plan has three phases.").await.unwrap();

    match outcome {
        SendOutcome::Fallback { message, error } => {
            assert!(error.is_remote_failure());
            assert_eq!(message.sender, Sender::Counterpart);
            assert_eq!(message.emotion, Some(Emotion::Neutral));
            assert_eq!(message.content, test_config().session.fallback_message);
        }
        SendOutcome::Delivered(_) => panic!("expected fallback"),
    }
    assert_eq!(c.transcript().len(), before_len + 1);
    assert_eq!(c.signals(), before_signals);
    assert_eq!(c.state(), LifecycleState::Active);

    // The session carries on once the service recovers.
    mock.fail_send.store(false, Ordering::SeqCst);
    assert!(c.send("Let me try again.").await.unwrap().is_delivered());
}

#[tokio::test]
async fn test_transcript_has_two_per_exchange_plus_welcome() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);
    c.open("negotiation").await.unwrap();

    let n = 5;
    for i in 0..n {
        c.send(&format!("Point number {i}")).await.unwrap();
    }

    let transcript = c.transcript();
    assert_eq!(transcript.len(), 2 * n + 1);
    for pair in transcript.messages()[1..].chunks(2) {
        assert_eq!(pair[0].sender, Sender::User);
        assert_eq!(pair[1].sender, Sender::Counterpart);
    }
}

#[tokio::test]
async fn test_resumed_transcript_grows_two_per_exchange() {
    let (mock, store) = setup();
    let restored = vec![
        message("1", Sender::Counterpart, "Welcome."),
        message("2", Sender::User, "Thanks for meeting."),
        message("3", Sender::Counterpart, "Let's begin."),
    ];
    mock.insert_session("sim-40", SessionStatus::Active, restored.clone());
    store.put("crisis-leadership", "sim-40").unwrap();

    let c = controller(&mock, &store);
    assert!(c.open("crisis-leadership").await.unwrap().resumed);

    let n = 4;
    for i in 0..n {
        assert!(c.send(&format!("Point number {i}")).await.unwrap().is_delivered());
    }

    let transcript = c.transcript();
    assert_eq!(transcript.len(), 2 * n + restored.len());
    assert_eq!(&transcript.messages()[..restored.len()], &restored[..]);
    for (i, pair) in transcript.messages()[restored.len()..].chunks(2).enumerate() {
        assert_eq!(pair[0].sender, Sender::User);
        assert_eq!(pair[0].content, format!("Point number {i}"));
        assert_eq!(pair[1].sender, Sender::Counterpart);
    }
}

#[tokio::test]
async fn test_concurrent_send_is_rejected() {
    let (mock, store) = setup();
    let c = Arc::new(controller(&mock, &store));
    c.open("crisis-leadership").await.unwrap();
    mock.hold_sends.store(true, Ordering::SeqCst);

    let first = {
        let c = c.clone();
        tokio::spawn(async move { c.send("First point").await })
    };
    mock.send_entered.notified().await;

    let err = c.send("Second point").await.unwrap_err();
    assert!(matches!(err, SimError::SendInFlight { .. }));

    mock.send_release.notify_one();
    assert!(first.await.unwrap().unwrap().is_delivered());
    assert_eq!(c.transcript().len(), 3);
    assert_eq!(MockService::count(&mock.send_calls), 1);
}

#[tokio::test]
async fn test_empty_message_is_rejected_without_remote_call() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();

    let err = c.send("   \n").await.unwrap_err();
    assert!(matches!(err, SimError::EmptyMessage));
    assert_eq!(MockService::count(&mock.send_calls), 0);
    assert_eq!(c.transcript().len(), 1);
}

#[tokio::test]
async fn test_signals_stay_in_range_over_long_sessions() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();

    let emotions = [Emotion::Skeptical, Emotion::Positive, Emotion::Neutral, Emotion::Frustrated];
    for i in 0..40 {
        *mock.reply_emotion.lock().unwrap() = Some(emotions[i % emotions.len()]);
        let text = if i % 3 == 0 {
            "ok"
        } else {
            "Our strategy rests on the data: a staged investment with explicit risk limits."
        };
        c.send(text).await.unwrap();
        let s = c.signals();
        assert!(s.emotional_tone <= 100);
        assert!(s.strategic_alignment <= 100);
        assert!(s.strategic_alignment >= 30);
    }
}

// ─── Ending ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_returns_analysis_and_clears_pointer() {
    let (mock, store) = setup();
    *mock.analysis.lock().unwrap() = Some(SessionAnalysis {
        overall_score: 82,
        strengths: vec!["Clear opening".into()],
        ..Default::default()
    });
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();
    c.send("Here is the plan.").await.unwrap();

    let summary = c.end().await.unwrap();
    assert!(summary.remote_acknowledged);
    assert_eq!(summary.analysis.unwrap().overall_score, 82);
    assert_eq!(summary.transcript.len(), 3);
    assert_eq!(summary.scenario_id, "crisis-leadership");
    assert_eq!(c.state(), LifecycleState::Ended);
    assert!(store.get("crisis-leadership").is_none());
    assert!(!c.session().unwrap().is_active());
}

#[tokio::test(start_paused = true)]
async fn test_end_timeout_still_reaches_ended() {
    let (mock, store) = setup();
    *mock.end_delay.lock().unwrap() = Some(Duration::from_secs(600));
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();
    assert!(store.get("crisis-leadership").is_some());

    let summary = c.end().await.unwrap();
    assert!(!summary.remote_acknowledged);
    assert!(summary.analysis.is_none());
    assert_eq!(c.state(), LifecycleState::Ended);
    assert!(store.get("crisis-leadership").is_none());
    assert_eq!(MockService::count(&mock.end_calls), 1);
}

#[tokio::test]
async fn test_reply_arriving_after_end_is_discarded() {
    let (mock, store) = setup();
    let c = Arc::new(controller(&mock, &store));
    c.open("crisis-leadership").await.unwrap();
    mock.hold_sends.store(true, Ordering::SeqCst);
    *mock.reply_emotion.lock().unwrap() = Some(Emotion::Positive);

    let pending = {
        let c = c.clone();
        tokio::spawn(async move { c.send("Here is the plan.").await })
    };
    mock.send_entered.notified().await;

    let summary = c.end().await.unwrap();
    mock.send_release.notify_one();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, SimError::InvalidState { .. }));
    assert_eq!(summary.transcript.len(), 1);
    assert_eq!(c.transcript().len(), 1);
    assert_eq!(c.signals(), summary.signals);
    assert_eq!(c.state(), LifecycleState::Ended);
}

#[tokio::test]
async fn test_analysis_can_be_fetched_after_end() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();

    assert!(matches!(c.analysis().await.unwrap_err(), SimError::InvalidState { .. }));

    let summary = c.end().await.unwrap();
    assert!(summary.analysis.is_none());

    *mock.analysis.lock().unwrap() = Some(SessionAnalysis {
        overall_score: 74,
        ..Default::default()
    });
    assert_eq!(c.analysis().await.unwrap().overall_score, 74);
    assert_eq!(MockService::count(&mock.analysis_calls), 1);
}

#[tokio::test]
async fn test_no_transitions_out_of_ended() {
    let (mock, store) = setup();
    let c = controller(&mock, &store);
    c.open("crisis-leadership").await.unwrap();
    c.end().await.unwrap();

    assert!(matches!(c.send("Hello?").await.unwrap_err(), SimError::InvalidState { .. }));
    assert!(matches!(c.end().await.unwrap_err(), SimError::InvalidState { .. }));
    assert!(matches!(c.open("crisis-leadership").await.unwrap_err(), SimError::InvalidState { .. }));
    assert_eq!(c.state(), LifecycleState::Ended);
}

#[tokio::test(start_paused = true)]
async fn test_no_metrics_updates_after_end() {
    let (mock, store) = setup();
    let updates = Arc::new(Mutex::new(0usize));
    let seen = updates.clone();
    let service: Arc<dyn SimulationService> = mock.clone();
    let c = SessionController::new(SessionDeps::new(service, store.clone()), &test_config())
        .with_events(move |event| {
            if let SessionEvent::MetricsUpdated(_) = event {
                *seen.lock().unwrap() += 1;
            }
        });

    c.open("crisis-leadership").await.unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;
    let before_end = *updates.lock().unwrap();
    assert_eq!(before_end, 3);
    assert!(c.latest_metrics().is_some());

    c.end().await.unwrap();
    let polled = MockService::count(&mock.metrics_calls);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(*updates.lock().unwrap(), before_end);
    assert_eq!(MockService::count(&mock.metrics_calls), polled);
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let (mock, store) = setup();
    let states = Arc::new(Mutex::new(Vec::new()));
    let log = states.clone();
    let service: Arc<dyn SimulationService> = mock.clone();
    let c = SessionController::new(SessionDeps::new(service, store.clone()), &test_config())
        .with_events(move |event| {
            if let SessionEvent::StateChanged { to, .. } = event {
                log.lock().unwrap().push(*to);
            }
        });

    c.open("crisis-leadership").await.unwrap();
    c.end().await.unwrap();

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            LifecycleState::Initializing,
            LifecycleState::Active,
            LifecycleState::Ending,
            LifecycleState::Ended,
        ]
    );
}
