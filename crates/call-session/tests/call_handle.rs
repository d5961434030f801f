//! The call actor: commands serialized with the controller's own inputs

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use callrelay_session::{
    AudioConstraints, CallConfig, CallDependencies, CallEvent, CallHandle, CallOutcome, CallSessionController,
    LifecycleState, LocalMediaStream, MediaError, MediaProvider, Partner, Role, TransportState,
};
use callrelay_signaling::{CallId, SignalPayload};

use common::{FakeChannel, Harness, CALL_ID};

/// A permission prompt nobody answers
struct UnansweredPrompt;

#[async_trait]
impl MediaProvider for UnansweredPrompt {
    async fn acquire(&self, _constraints: &AudioConstraints) -> Result<Arc<LocalMediaStream>, MediaError> {
        std::future::pending().await
    }
}

fn stalled_on_media(h: &Harness) -> CallSessionController {
    let deps = CallDependencies {
        media: Arc::new(UnansweredPrompt),
        ..h.deps()
    };
    CallSessionController::new(CallConfig::default(), deps, h.local.clone())
}

/// Wait (in paused time) until the caller's offer has gone out
async fn wait_for_offer(channel: &FakeChannel) {
    for _ in 0..50 {
        if channel
            .signals()
            .iter()
            .any(|s| matches!(s.payload, SignalPayload::Offer { .. }))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("no offer sent");
}

async fn wait_for(events: &mut tokio::sync::broadcast::Receiver<CallEvent>, wanted: CallEvent) {
    loop {
        match events.recv().await {
            Ok(event) if event == wanted => return,
            Ok(_) => continue,
            Err(e) => panic!("event stream ended before {:?}: {}", wanted, e),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn handle_runs_call_and_hangs_up() {
    let h = Harness::new("alice");
    let controller = h.controller(CallConfig::default());
    let mut events = controller.subscribe();

    let call = CallHandle::spawn(controller, CallId::from(CALL_ID));
    assert_eq!(call.call_id(), &CallId::from(CALL_ID));
    wait_for(&mut events, CallEvent::Negotiating).await;
    wait_for_offer(&h.connector.channel()).await;

    h.transport.latest().emit_state(TransportState::Connected);
    wait_for(&mut events, CallEvent::Connected).await;

    assert!(call.toggle_mute().await.unwrap());
    assert!(!call.toggle_mute().await.unwrap());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let outcome = call.hangup().await;
    assert_eq!(outcome, CallOutcome::Ended { duration_seconds: 10 });
    assert_eq!(call.outcome().await, outcome);
    assert!(call.is_finished());

    // The actor is gone; commands are refused, hangup still answers
    assert!(call.toggle_mute().await.is_err());
    assert_eq!(call.hangup().await, outcome);

    let signals = h.connector.channel().signals();
    assert!(matches!(signals.first().map(|s| &s.payload), Some(SignalPayload::Offer { .. })));
    assert_eq!(signals.last().map(|s| &s.payload), Some(&SignalPayload::CallEnd));
    assert_eq!(h.directory.ended_calls(), vec![(CallId::from(CALL_ID), 10)]);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_hangs_up() {
    let h = Harness::new("bob");
    let controller = h.controller(CallConfig::default());
    let mut events = controller.subscribe();

    let call = CallHandle::spawn(controller, CallId::from(CALL_ID));
    wait_for(&mut events, CallEvent::Negotiating).await;
    drop(call);

    wait_for(&mut events, CallEvent::Ended { duration_seconds: 0 }).await;
    assert_eq!(h.directory.ended_calls(), vec![(CallId::from(CALL_ID), 0)]);
}

#[tokio::test]
async fn setup_failure_surfaces_as_outcome() {
    let h = Harness::new("alice");
    h.connector.set_fail(true);

    let call = CallHandle::spawn(h.controller(CallConfig::default()), CallId::from(CALL_ID));
    assert_eq!(
        call.outcome().await,
        CallOutcome::Failed {
            reason: "Could not reach the call server".to_string()
        }
    );
    assert!(call.subscribe().try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn hangup_cancels_setup_stuck_on_media() {
    let h = Harness::new("alice");
    let controller = stalled_on_media(&h);
    let mut events = controller.subscribe();

    let call = CallHandle::spawn(controller, CallId::from(CALL_ID));
    wait_for(&mut events, CallEvent::AwaitingPartner {
        partner: Partner {
            id: "bob".into(),
            name: "Bob".to_string(),
        },
        role: Role::Caller,
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Mute has nothing to act on yet
    assert!(!call.toggle_mute().await.unwrap());

    let outcome = tokio::time::timeout(Duration::from_secs(60), call.hangup())
        .await
        .expect("hangup must not wait for setup");
    assert_eq!(outcome, CallOutcome::Ended { duration_seconds: 0 });
    assert!(call.is_finished());

    let channel = h.connector.channel();
    assert_eq!(channel.close_count(), 1);
    assert_eq!(channel.signals().last().map(|s| &s.payload), Some(&SignalPayload::CallEnd));
    assert_eq!(h.directory.ended_calls(), vec![(CallId::from(CALL_ID), 0)]);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_during_setup_ends_the_call() {
    let h = Harness::new("bob");
    let controller = stalled_on_media(&h);
    let mut events = controller.subscribe();

    let call = CallHandle::spawn(controller, CallId::from(CALL_ID));
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(call);

    loop {
        match events.recv().await {
            Ok(CallEvent::StateChanged { to, .. }) if to == LifecycleState::Ended => break,
            Ok(_) => continue,
            Err(e) => panic!("call never ended: {}", e),
        }
    }
    wait_for(&mut events, CallEvent::Ended { duration_seconds: 0 }).await;
    assert_eq!(h.directory.ended_calls(), vec![(CallId::from(CALL_ID), 0)]);
}
