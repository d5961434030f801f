//! Invitation handshake between two users sharing one directory

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use callrelay_directory::{CallStatus, InMemoryCallDirectory, UserProfile};
use callrelay_session::{InviteCenter, InviteEvent, LocalUser, SessionError};
use callrelay_signaling::{CallId, ClientMessage, ServerMessage, UserId};

use common::FakeChannel;

const TIMEOUT: Duration = Duration::from_secs(30);

struct Endpoint {
    center: InviteCenter,
    channel: Arc<FakeChannel>,
}

fn endpoint(directory: &InMemoryCallDirectory, id: &str, name: &str) -> Endpoint {
    let (channel, _events) = FakeChannel::new();
    let center = InviteCenter::new(
        LocalUser::new(id, name),
        Arc::new(directory.for_user(id)),
        channel.clone(),
        TIMEOUT,
    );
    Endpoint { center, channel }
}

fn directory() -> InMemoryCallDirectory {
    let directory = InMemoryCallDirectory::new("alice");
    directory.insert_user(UserProfile::new("alice", "Alice"));
    directory.insert_user(UserProfile::new("bob", "Bob"));
    directory
}

/// What the relay would deliver to bob for alice's invite frame
fn relay_invite(sent: &ClientMessage) -> ServerMessage {
    match sent {
        ClientMessage::CallInvite {
            call_id, caller_name, ..
        } => ServerMessage::CallInvite {
            call_id: call_id.clone(),
            caller_id: UserId::from("alice"),
            caller_name: caller_name.clone(),
        },
        other => panic!("expected call_invite, got {:?}", other),
    }
}

#[tokio::test]
async fn invite_and_accept() {
    let directory = directory();
    let mut alice = endpoint(&directory, "alice", "Alice");
    let mut bob = endpoint(&directory, "bob", "Bob");

    let record = alice.center.invite(&UserId::from("bob")).await.unwrap();
    assert_eq!(record.status, CallStatus::Pending);

    let sent = alice.channel.sent();
    assert_eq!(
        sent,
        vec![ClientMessage::CallInvite {
            to_user_id: UserId::from("bob"),
            call_id: record.call_id.clone(),
            caller_name: "Alice".to_string(),
        }]
    );

    let incoming = bob.center.on_message(&relay_invite(&sent[0]));
    assert_eq!(
        incoming,
        Some(InviteEvent::Incoming {
            call_id: record.call_id.clone(),
            caller_id: UserId::from("alice"),
            caller_name: "Alice".to_string(),
        })
    );
    assert_eq!(bob.center.pending(), vec![record.call_id.clone()]);

    let accepted = bob.center.accept(&record.call_id).await.unwrap();
    assert_eq!(accepted.status, CallStatus::Accepted);
    let room = accepted.room_id.clone().expect("room assigned on accept");

    assert_eq!(
        bob.channel.sent(),
        vec![ClientMessage::CallResponse {
            call_id: record.call_id.clone(),
            to_user_id: UserId::from("alice"),
            accepted: true,
            room_id: Some(room.clone()),
            responder_name: Some("Bob".to_string()),
        }]
    );
    assert!(bob.center.pending().is_empty());

    // Alice learns about the acceptance from the relay
    let event = alice.center.on_message(&ServerMessage::CallResponse {
        call_id: record.call_id.clone(),
        from_user_id: UserId::from("bob"),
        accepted: true,
        room_id: Some(room.clone()),
    });
    assert_eq!(
        event,
        Some(InviteEvent::Accepted {
            call_id: record.call_id,
            by: UserId::from("bob"),
            room_id: Some(room),
        })
    );
}

#[tokio::test]
async fn decline_sends_negative_response() {
    let directory = directory();
    let mut bob = endpoint(&directory, "bob", "Bob");
    let call_id = CallId::from("7");

    bob.center.on_message(&ServerMessage::CallInvite {
        call_id: call_id.clone(),
        caller_id: UserId::from("alice"),
        caller_name: "Alice".to_string(),
    });
    bob.center.decline(&call_id).unwrap();

    assert_eq!(
        bob.channel.sent(),
        vec![ClientMessage::CallResponse {
            call_id: call_id.clone(),
            to_user_id: UserId::from("alice"),
            accepted: false,
            room_id: None,
            responder_name: Some("Bob".to_string()),
        }]
    );

    // Nothing left to decide on
    assert!(matches!(
        bob.center.decline(&call_id),
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn unrelated_frames_are_not_invite_events() {
    let directory = directory();
    let mut alice = endpoint(&directory, "alice", "Alice");

    assert_eq!(alice.center.on_message(&ServerMessage::Pong), None);
    assert_eq!(
        alice.center.on_message(&ServerMessage::CallRejected {
            call_id: None,
            rejected_by_name: "Bob".to_string(),
            message: Some("Bob declined your call".to_string()),
        }),
        Some(InviteEvent::Declined {
            call_id: None,
            by_name: "Bob".to_string(),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_invites_expire_as_missed() {
    let directory = directory();
    let mut bob = endpoint(&directory, "bob", "Bob");

    for id in ["1", "2"] {
        bob.center.on_message(&ServerMessage::CallInvite {
            call_id: CallId::from(id),
            caller_id: UserId::from("alice"),
            caller_name: "Alice".to_string(),
        });
    }

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(bob.center.expire(Instant::now()).is_empty());

    // Accepting after the timeout is refused even before expire() runs
    tokio::time::advance(Duration::from_secs(25)).await;
    assert!(matches!(
        bob.center.accept(&CallId::from("1")).await,
        Err(SessionError::InvalidState { .. })
    ));

    let missed = bob.center.expire(Instant::now());
    assert_eq!(
        missed,
        vec![InviteEvent::Missed {
            call_id: CallId::from("2"),
            caller_id: UserId::from("alice"),
        }]
    );
    assert!(bob.center.pending().is_empty());
    assert!(bob.channel.sent().is_empty());
}

#[tokio::test]
async fn inviting_unknown_user_fails_without_sending() {
    let directory = directory();
    let alice = endpoint(&directory, "alice", "Alice");

    let err = alice.center.invite(&UserId::from("nobody")).await.unwrap_err();
    assert!(matches!(err, SessionError::Directory(_)));
    assert!(alice.channel.sent().is_empty());
}
