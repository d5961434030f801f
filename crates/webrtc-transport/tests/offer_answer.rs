//! Offer/answer between two in-process peer connections

use std::sync::Arc;

use callrelay_session::{
    LocalAudioTrack, LocalMediaStream, SessionDescription, TransportError, TransportFactory, TransportState,
};
use callrelay_webrtc::WebRtcTransportFactory;

fn microphone() -> LocalMediaStream {
    LocalMediaStream::new(vec![Arc::new(LocalAudioTrack::new("mic-1"))])
}

#[tokio::test]
async fn offer_and_answer_carry_audio() {
    // No ICE servers: host candidates only, nothing leaves the machine
    let factory = WebRtcTransportFactory::new(Vec::new()).unwrap();

    let (caller, _caller_events) = factory.create().await.unwrap();
    let (callee, _callee_events) = factory.create().await.unwrap();
    caller.attach_media(&microphone()).await.unwrap();
    callee.attach_media(&microphone()).await.unwrap();
    assert_eq!(caller.connection_state(), TransportState::New);

    let offer = caller.create_offer().await.unwrap();
    assert!(offer.contains("m=audio"));
    assert!(offer.to_lowercase().contains("opus"));
    caller
        .set_local_description(SessionDescription::offer(offer.clone()))
        .await
        .unwrap();

    callee
        .set_remote_description(SessionDescription::offer(offer))
        .await
        .unwrap();
    let answer = callee.create_answer().await.unwrap();
    assert!(answer.contains("m=audio"));
    callee
        .set_local_description(SessionDescription::answer(answer.clone()))
        .await
        .unwrap();

    caller
        .set_remote_description(SessionDescription::answer(answer))
        .await
        .unwrap();

    caller.close().await.unwrap();
    callee.close().await.unwrap();
    assert_eq!(caller.connection_state(), TransportState::Closed);
}

#[tokio::test]
async fn closed_session_rejects_operations() {
    let factory = WebRtcTransportFactory::new(Vec::new()).unwrap();
    let (transport, _events) = factory.create().await.unwrap();

    transport.close().await.unwrap();
    // Closing twice is fine
    transport.close().await.unwrap();

    assert!(matches!(transport.create_offer().await, Err(TransportError::Closed)));
    assert!(matches!(
        transport.attach_media(&microphone()).await,
        Err(TransportError::Closed)
    ));
}

#[test]
fn factory_uses_configured_ice_servers() {
    let factory = WebRtcTransportFactory::from_config(&callrelay_session::CallConfig::default()).unwrap();
    assert_eq!(factory.ice_servers().len(), 5);
}
