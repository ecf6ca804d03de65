mod common;

use std::num::NonZeroUsize;
use std::time::Duration;

use common::{connected_client, MockService};
use sirius_client::{
    ClientConfig, ClientError, ClientUpdate, ConnectionState, FailureReason, Phase,
    ProtocolGeneration, ReferenceAudio, RetentionPolicy, TtsClient,
};
use sirius_protocol::ValidationError;
use tokio_tungstenite::tungstenite::Message;

async fn next(client: &mut TtsClient) -> ClientUpdate {
    tokio::time::timeout(Duration::from_secs(5), client.next_update())
        .await
        .expect("timed out waiting for an update")
        .expect("event stream ended")
}

fn sample() -> ReferenceAudio {
    ReferenceAudio::new("my_voice.wav", vec![0x52, 0x49, 0x46, 0x46, 1, 2, 3])
}

#[tokio::test]
async fn ping_changes_nothing_but_liveness() {
    let service = MockService::start().await;
    let mut client = connected_client(service.config()).await;
    assert_eq!(client.synthesis_state().phase, Phase::Ready);
    assert!(client.last_ping().is_none());

    service.send_text(r#"{"type":"ping"}"#);
    assert_eq!(next(&mut client).await, ClientUpdate::Liveness);

    assert_eq!(client.connection_state(), ConnectionState::Open);
    assert_eq!(client.synthesis_state().phase, Phase::Ready);
    assert!(client.last_ping().is_some());
    assert_eq!(client.status(), "Connected");
}

#[tokio::test]
async fn hello_produces_one_resource_with_the_audio_bytes() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("Hello", None).unwrap();
    assert_eq!(client.synthesis_state().phase, Phase::Synthesizing);
    assert!(!client.can_submit());
    assert_eq!(service.next_frame().await, Message::Text("Hello".to_string()));

    service.send_audio(vec![7u8; 120_000]);
    let id = client.wait_for_outcome().await.unwrap();

    let state = client.synthesis_state();
    assert_eq!(state.phase, Phase::AudioReady);
    let current = state.current.expect("current resource");
    assert_eq!(current.id(), id);
    assert_eq!(current.len(), 120_000);
    assert!(current.bytes().iter().all(|&b| b == 7));
    assert_eq!(client.audio().stats().created, 1);
    assert_eq!(client.status(), "Audio ready (120000 bytes)");
    assert!(client.can_submit());
}

#[tokio::test]
async fn second_submit_while_synthesizing_is_rejected() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("first", None).unwrap();
    let err = client.submit("second", None).unwrap_err();
    assert!(matches!(err, ClientError::NotReady(Phase::Synthesizing)));

    assert_eq!(service.next_frame().await, Message::Text("first".to_string()));
    service.expect_silence().await;
}

#[tokio::test]
async fn empty_text_never_reaches_the_wire() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    let err = client.submit("", None).unwrap_err();
    assert!(matches!(err, ClientError::Validation(ValidationError::EmptyText)));
    assert_eq!(client.synthesis_state().phase, Phase::Ready);
    assert_eq!(client.connection_state(), ConnectionState::Open);
    service.expect_silence().await;
}

#[tokio::test]
async fn voice_clone_needs_a_sample_and_sends_header_first() {
    let mut service = MockService::start().await;
    let config = ClientConfig {
        generation: ProtocolGeneration::VoiceClone,
        language: "en".to_string(),
        ..service.config()
    };
    let mut client = connected_client(config).await;

    let err = client.submit("Clone me", None).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::MissingReferenceAudio)
    ));
    service.expect_silence().await;

    client.submit("Clone me", Some(sample())).unwrap();
    match service.next_frame().await {
        Message::Text(json) => {
            let header: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(header["text"], "Clone me");
            assert_eq!(header["language"], "en");
        }
        other => panic!("expected the control frame first, got {other:?}"),
    }
    assert_eq!(service.next_frame().await, Message::Binary(sample().data));
    service.expect_silence().await;
}

#[tokio::test]
async fn tagged_clone_requests_count_up() {
    let mut service = MockService::start().await;
    let config = ClientConfig {
        generation: ProtocolGeneration::VoiceClone,
        tag_requests: true,
        ..service.config()
    };
    let mut client = connected_client(config).await;

    for expected in 1..=2u64 {
        client.submit("again", Some(sample())).unwrap();
        let Message::Text(json) = service.next_frame().await else {
            panic!("expected the control frame first");
        };
        let header: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(header["request_id"], expected);
        service.next_frame().await;

        service.send_audio(vec![1, 2, 3]);
        client.wait_for_outcome().await.unwrap();
    }
}

#[tokio::test]
async fn server_close_mid_synthesis_errors_without_a_resource() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("Hello", None).unwrap();
    service.next_frame().await;
    service.close();

    assert_eq!(
        next(&mut client).await,
        ClientUpdate::Failed(FailureReason::ConnectionClosed)
    );
    let state = client.synthesis_state();
    assert_eq!(state.phase, Phase::Errored);
    assert_eq!(state.error, Some(&FailureReason::ConnectionClosed));
    assert!(state.current.is_none());
    assert_eq!(client.audio().stats().live(), 0);
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert!(!client.can_submit());
    assert!(matches!(
        client.submit("Hello", None),
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn dropped_socket_mid_synthesis_errors() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("Hello", None).unwrap();
    service.next_frame().await;
    service.drop_socket();

    assert!(matches!(next(&mut client).await, ClientUpdate::Failed(_)));
    assert_eq!(client.synthesis_state().phase, Phase::Errored);
    assert!(client.synthesis_state().current.is_none());
}

#[tokio::test]
async fn local_close_mid_synthesis_errors() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("Hello", None).unwrap();
    service.next_frame().await;
    client.close();

    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert_eq!(client.synthesis_state().phase, Phase::Errored);
    assert_eq!(
        client.synthesis_state().error,
        Some(&FailureReason::ConnectionClosed)
    );
}

#[tokio::test]
async fn reconnect_returns_to_ready() {
    let service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    service.close();
    assert_eq!(
        next(&mut client).await,
        ClientUpdate::Disconnected { error: None }
    );
    assert_eq!(client.synthesis_state().phase, Phase::AwaitingConnection);

    client.reconnect();
    client.wait_until_connected().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Open);
    assert_eq!(client.synthesis_state().phase, Phase::Ready);
}

#[tokio::test]
async fn reconnect_after_a_failed_request_starts_clean() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("Hello", None).unwrap();
    service.next_frame().await;
    service.close();
    assert_eq!(
        next(&mut client).await,
        ClientUpdate::Failed(FailureReason::ConnectionClosed)
    );

    client.reconnect();
    client.wait_until_connected().await.unwrap();
    let state = client.synthesis_state();
    assert_eq!(state.phase, Phase::Ready);
    assert!(state.error.is_none());
    assert_eq!(client.status(), "Connected");

    service.close();
    assert_eq!(
        next(&mut client).await,
        ClientUpdate::Disconnected { error: None }
    );
    assert_eq!(client.synthesis_state().phase, Phase::AwaitingConnection);
    assert_eq!(client.status(), "Closed");
}

#[tokio::test]
async fn connect_when_open_is_a_no_op() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.connect();
    assert_eq!(client.connection_state(), ConnectionState::Open);
    client.submit("still here", None).unwrap();
    assert_eq!(service.next_frame().await, Message::Text("still here".to_string()));
}

#[tokio::test]
async fn synthesis_times_out_and_late_audio_is_stale() {
    let mut service = MockService::start().await;
    let config = ClientConfig {
        synthesis_timeout: Some(Duration::from_millis(200)),
        ..service.config()
    };
    let mut client = connected_client(config).await;

    client.submit("slow", None).unwrap();
    service.next_frame().await;

    let err = client.wait_for_outcome().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Failed(FailureReason::Timeout(timeout)) if timeout == Duration::from_millis(200)
    ));
    assert_eq!(client.synthesis_state().phase, Phase::Errored);
    assert!(client.status().starts_with("Error: no audio"));

    service.send_audio(vec![0; 32]);
    assert_eq!(next(&mut client).await, ClientUpdate::StaleAudio { bytes: 32 });
    assert!(client.synthesis_state().current.is_none());
    assert_eq!(client.audio().stats().created, 0);
}

#[tokio::test]
async fn falling_behind_on_events_fails_the_request_without_a_timeout() {
    let mut service = MockService::start().await;
    let config = ClientConfig {
        synthesis_timeout: None,
        ..service.config()
    };
    let mut client = connected_client(config).await;

    client.submit("Hello", None).unwrap();
    service.next_frame().await;
    for _ in 0..100 {
        service.send_text(r#"{"type":"ping"}"#);
    }
    // Let the pings pile up past the event buffer before reading any.
    tokio::time::sleep(Duration::from_millis(500)).await;

    match next(&mut client).await {
        ClientUpdate::Failed(FailureReason::EventsLost(missed)) => assert!(missed > 0),
        other => panic!("expected the request to fail, got {other:?}"),
    }
    assert_eq!(client.synthesis_state().phase, Phase::Errored);
    assert_eq!(client.connection_state(), ConnectionState::Open);
    assert!(client.can_submit());
}

#[tokio::test]
async fn unrequested_audio_is_ignored() {
    let service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    service.send_audio(vec![9; 64]);
    assert_eq!(next(&mut client).await, ClientUpdate::StaleAudio { bytes: 64 });
    assert_eq!(client.synthesis_state().phase, Phase::Ready);
    assert!(client.audio().is_empty());
}

#[tokio::test]
async fn malformed_control_frame_leaves_the_session_alone() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("Hello", None).unwrap();
    service.next_frame().await;
    service.send_text("{not json");

    assert!(matches!(next(&mut client).await, ClientUpdate::ProtocolError(_)));
    assert_eq!(client.synthesis_state().phase, Phase::Synthesizing);

    service.send_audio(vec![1; 10]);
    client.wait_for_outcome().await.unwrap();
}

#[tokio::test]
async fn single_slot_keeps_only_the_latest_result() {
    let mut service = MockService::start().await;
    let mut client = connected_client(service.config()).await;

    client.submit("one", None).unwrap();
    service.next_frame().await;
    service.send_audio(vec![1; 10]);
    let first = client.wait_for_outcome().await.unwrap();

    client.submit("two", None).unwrap();
    // Accepting the new request already let go of the previous result.
    assert!(client.resource(first).is_none());
    service.next_frame().await;
    service.send_audio(vec![2; 20]);
    let second = client.wait_for_outcome().await.unwrap();

    assert_eq!(client.audio().len(), 1);
    assert_eq!(client.synthesis_state().current.map(|r| r.id()), Some(second));
    let stats = client.audio().stats();
    assert_eq!((stats.created, stats.released), (2, 1));
}

#[tokio::test]
async fn history_keeps_results_most_recent_first() {
    let mut service = MockService::start().await;
    let config = ClientConfig {
        retention: RetentionPolicy::History(NonZeroUsize::new(2).unwrap()),
        ..service.config()
    };
    let mut client = connected_client(config).await;

    let mut ids = Vec::new();
    for n in 1..=3u8 {
        client.submit(format!("take {n}"), None).unwrap();
        service.next_frame().await;
        service.send_audio(vec![n; 8]);
        ids.push(client.wait_for_outcome().await.unwrap());
    }

    let kept: Vec<_> = client.history().map(|r| r.id()).collect();
    assert_eq!(kept, vec![ids[2], ids[1]]);
    assert_eq!(client.audio().stats().released, 1);

    client.shutdown();
    assert_eq!(client.audio().stats().live(), 0);
    assert_eq!(client.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn unreachable_service_reports_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = TtsClient::new(ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ClientConfig::default()
    })
    .unwrap();
    client.connect();
    assert_eq!(client.synthesis_state().phase, Phase::AwaitingConnection);

    let err = client.wait_until_connected().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert!(client.status().starts_with("Closed: "));
    assert!(!client.can_submit());
}
