//! Live transport integration tests
//!
//! Runs the Gemini Live transport against a local websocket server

use std::future::Future;
use std::time::Duration;

use beacon_live::voice::{CAPTURE_SAMPLE_RATE, pcm};
use beacon_live::{
    AudioFrame, ConnectionStatus, ErrorKind, GeminiLiveTransport, SessionConfig, Transport,
    TransportEvent,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

type ServerSocket = WebSocketStream<TcpStream>;

/// Accept one websocket connection and hand it to `handler`
async fn spawn_server<F, Fut>(handler: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(ws).await;
    });

    format!("ws://{addr}/")
}

/// Next JSON text message from the client, `None` once it closes
async fn next_json(ws: &mut ServerSocket) -> Option<Value> {
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_json(ws: &mut ServerSocket, json: &str) {
    ws.send(Message::Text(json.to_string())).await.unwrap();
}

/// Keep polling so close handshakes complete
async fn drain(mut ws: ServerSocket) {
    while ws.next().await.is_some() {}
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

fn transport(url: &str) -> GeminiLiveTransport {
    GeminiLiveTransport::with_endpoint(url, "test-key").unwrap()
}

#[tokio::test]
async fn test_setup_then_open() {
    let (setup_tx, mut setup_rx) = mpsc::unbounded_channel();
    let url = spawn_server(move |mut ws| async move {
        let setup = next_json(&mut ws).await.unwrap();
        setup_tx.send(setup).unwrap();
        send_json(&mut ws, r#"{"setupComplete":{}}"#).await;
        drain(ws).await;
    })
    .await;

    let transport = transport(&url);
    let config = SessionConfig::default()
        .with_voice("Puck")
        .with_system_instruction("You are a pirate");
    let (tx, mut rx) = mpsc::unbounded_channel();

    transport.connect(&config, tx).await.unwrap();
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));
    assert_eq!(transport.status(), ConnectionStatus::Connected);

    let setup = setup_rx.recv().await.unwrap();
    assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-exp");
    assert_eq!(
        setup["setup"]["generationConfig"]["responseModalities"][0],
        "AUDIO"
    );
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
            ["voiceName"],
        "Puck"
    );
    assert_eq!(
        setup["setup"]["systemInstruction"]["parts"][0]["text"],
        "You are a pirate"
    );

    transport.disconnect().await;
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_inbound_messages_are_classified() {
    let samples = [0.0_f32, 0.25, -0.25, 0.5];
    let audio = pcm::encode_base64(&pcm::encode_pcm16(&samples));

    let url = spawn_server(move |mut ws| async move {
        next_json(&mut ws).await.unwrap();
        send_json(&mut ws, r#"{"setupComplete":{}}"#).await;

        let content = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{audio}"}}}},{{"text":"Ahoy"}}]}}}}}}"#
        );
        send_json(&mut ws, &content).await;
        send_json(&mut ws, r#"{"serverContent":{"turnComplete":true}}"#).await;
        send_json(&mut ws, r#"{"serverContent":{"interrupted":true}}"#).await;
        drain(ws).await;
    })
    .await;

    let transport = transport(&url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(&SessionConfig::default(), tx).await.unwrap();

    assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));

    match next_event(&mut rx).await {
        TransportEvent::Audio(chunk) => {
            assert_eq!(chunk.sample_rate(), 24_000);
            assert_eq!(chunk.data(), pcm::encode_pcm16(&samples).as_slice());
        }
        other => panic!("expected audio, got {other:?}"),
    }
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Text(t) if t == "Ahoy"));
    assert!(matches!(next_event(&mut rx).await, TransportEvent::TurnComplete));
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Interrupted));

    transport.disconnect().await;
}

#[tokio::test]
async fn test_output_transcription_flushed_per_turn() {
    let (setup_tx, mut setup_rx) = mpsc::unbounded_channel();
    let url = spawn_server(move |mut ws| async move {
        setup_tx.send(next_json(&mut ws).await.unwrap()).unwrap();
        send_json(&mut ws, r#"{"setupComplete":{}}"#).await;
        send_json(
            &mut ws,
            r#"{"serverContent":{"outputTranscription":{"text":"Hello "}}}"#,
        )
        .await;
        send_json(
            &mut ws,
            r#"{"serverContent":{"outputTranscription":{"text":"there"}}}"#,
        )
        .await;
        send_json(&mut ws, r#"{"serverContent":{"turnComplete":true}}"#).await;
        drain(ws).await;
    })
    .await;

    let transport = transport(&url);
    let config = SessionConfig {
        output_transcription: true,
        ..SessionConfig::default()
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(&config, tx).await.unwrap();

    assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Text(t) if t == "Hello there"));
    assert!(matches!(next_event(&mut rx).await, TransportEvent::TurnComplete));

    let setup = setup_rx.recv().await.unwrap();
    assert!(setup["setup"].get("outputAudioTranscription").is_some());

    transport.disconnect().await;
}

#[tokio::test]
async fn test_outbound_audio_and_text() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let url = spawn_server(move |mut ws| async move {
        next_json(&mut ws).await.unwrap();
        send_json(&mut ws, r#"{"setupComplete":{}}"#).await;
        while let Some(message) = next_json(&mut ws).await {
            let _ = seen_tx.send(message);
        }
        drain(ws).await;
    })
    .await;

    let transport = transport(&url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(&SessionConfig::default(), tx).await.unwrap();
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));

    let frame = AudioFrame::new(vec![0.5; 8], CAPTURE_SAMPLE_RATE, 0);
    transport.send_audio_frame(&frame);
    transport.send_text("hi");

    let audio = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let chunk = &audio["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    let data = pcm::decode_base64(chunk["data"].as_str().unwrap()).unwrap();
    assert_eq!(data, frame.to_pcm16());

    let text = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(text["clientContent"]["turns"][0]["role"], "user");
    assert_eq!(text["clientContent"]["turns"][0]["parts"][0]["text"], "hi");
    assert_eq!(text["clientContent"]["turnComplete"], true);

    transport.disconnect().await;
}

#[tokio::test]
async fn test_remote_close_after_open() {
    let url = spawn_server(move |mut ws| async move {
        next_json(&mut ws).await.unwrap();
        send_json(&mut ws, r#"{"setupComplete":{}}"#).await;
        ws.close(None).await.unwrap();
        drain(ws).await;
    })
    .await;

    let transport = transport(&url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(&SessionConfig::default(), tx).await.unwrap();

    assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Close));
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_close_during_setup_is_an_error() {
    let url = spawn_server(move |mut ws| async move {
        next_json(&mut ws).await.unwrap();
        ws.close(None).await.unwrap();
        drain(ws).await;
    })
    .await;

    let transport = transport(&url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(&SessionConfig::default(), tx).await.unwrap();

    match next_event(&mut rx).await {
        TransportEvent::Error(e) => assert_eq!(e.kind(), ErrorKind::Transport),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = transport(&format!("ws://{addr}/"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(&SessionConfig::default(), tx).await.unwrap();

    assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_send_while_disconnected_is_dropped() {
    let transport = transport("ws://127.0.0.1:9/");

    transport.send_text("nobody home");
    transport.send_audio_frame(&AudioFrame::new(vec![0.0; 4], CAPTURE_SAMPLE_RATE, 0));
    transport.disconnect().await;

    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_connect_replaces_previous_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (first_setup_tx, first_setup_rx) = tokio::sync::oneshot::channel();
    let (first_closed_tx, first_closed_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        // First connection never acknowledges setup
        let (stream, _) = listener.accept().await.unwrap();
        let mut first = tokio_tungstenite::accept_async(stream).await.unwrap();
        next_json(&mut first).await.unwrap();
        first_setup_tx.send(()).unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut second = tokio_tungstenite::accept_async(stream).await.unwrap();

        // Close frame or end of stream, either way the old socket is gone
        assert!(next_json(&mut first).await.is_none());
        let _ = first_closed_tx.send(());

        next_json(&mut second).await.unwrap();
        send_json(&mut second, r#"{"setupComplete":{}}"#).await;
        drain(second).await;
    });

    let transport = transport(&format!("ws://{addr}/"));

    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    transport.connect(&SessionConfig::default(), first_tx).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), first_setup_rx)
        .await
        .unwrap()
        .unwrap();

    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    transport.connect(&SessionConfig::default(), second_tx).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), first_closed_rx)
        .await
        .expect("first socket was not closed")
        .unwrap();

    // The old session task is finished, so its channel drains to the end
    let first_events = tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        while let Some(event) = first_rx.recv().await {
            events.push(event);
        }
        events
    })
    .await
    .unwrap();
    assert!(!first_events.iter().any(|e| matches!(e, TransportEvent::Open)));

    assert!(matches!(next_event(&mut second_rx).await, TransportEvent::Open));
    assert_eq!(transport.status(), ConnectionStatus::Connected);

    transport.disconnect().await;
    let mut opens = 1;
    while let Ok(event) = second_rx.try_recv() {
        if matches!(event, TransportEvent::Open) {
            opens += 1;
        }
    }
    assert_eq!(opens, 1);
}
