//! Integration tests for the IPC protocol and daemon socket

mod mocks;

use avatarcam_core::config::RecoveryPolicy;
use avatarcam_core::error::AvatarCamError;
use avatarcam_core::ipc::{self, DaemonStatus, IpcClient, IpcMessage, IpcResponse, IpcServer};
use avatarcam_core::performance::LatencyStats;
use avatarcam_core::{
    BridgeConfig, Pipeline, PipelineState, PipelineStats, PipelineStatus, PixelFormat,
    SelectionPolicy, SinkFormat,
};
use mocks::{MockCameraBackend, MockTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn round_trip_message(msg: IpcMessage) -> IpcMessage {
    let bytes = msg.to_bytes();
    IpcMessage::from_bytes(&bytes[..bytes.len() - 1]).expect("Should parse")
}

fn round_trip_response(resp: IpcResponse) -> IpcResponse {
    let bytes = resp.to_bytes();
    IpcResponse::from_bytes(&bytes[..bytes.len() - 1]).expect("Should parse")
}

fn sample_status() -> PipelineStatus {
    PipelineStatus {
        state: PipelineState::Streaming,
        source: Some("VRChatCam".to_string()),
        selection: SelectionPolicy::auto("VRC"),
        output: Some(SinkFormat {
            width: 1280,
            height: 720,
            fps: 30,
            pixel_format: PixelFormat::Rgba8,
        }),
        camera_name: "AvatarCam".to_string(),
        diagnostic: None,
    }
}

#[test]
fn test_control_messages_round_trip() {
    for msg in [
        IpcMessage::Ping,
        IpcMessage::Status,
        IpcMessage::Stats,
        IpcMessage::Start,
        IpcMessage::Stop,
        IpcMessage::Rescan,
        IpcMessage::ListSources,
        IpcMessage::Shutdown,
        IpcMessage::Select { source: None },
        IpcMessage::Select {
            source: Some("VRChatCam".to_string()),
        },
    ] {
        assert_eq!(round_trip_message(msg.clone()), msg);
    }
}

#[test]
fn test_response_error_serialization() {
    let resp = IpcResponse::error("Pipeline has shut down");
    match round_trip_response(resp) {
        IpcResponse::Error { message } => assert_eq!(message, "Pipeline has shut down"),
        other => panic!("Expected Error response, got {:?}", other),
    }
}

#[test]
fn test_response_status_serialization() {
    let resp = IpcResponse::Status(DaemonStatus {
        pid: 12345,
        uptime_seconds: 3600.5,
        pipeline: sample_status(),
    });

    match round_trip_response(resp) {
        IpcResponse::Status(status) => {
            assert_eq!(status.pid, 12345);
            assert!((status.uptime_seconds - 3600.5).abs() < 0.01);
            assert_eq!(status.pipeline, sample_status());
        }
        other => panic!("Expected Status response, got {:?}", other),
    }
}

#[test]
fn test_response_stats_serialization() {
    let stats = PipelineStats {
        state: PipelineState::SinkError,
        source: None,
        output: None,
        frames_received: 1000,
        frames_delivered: 900,
        frames_paced: 80,
        frames_dropped: 15,
        frames_failed: 5,
        preview_frames: 150,
        reconnects: 2,
        latency: LatencyStats {
            receive_ms: 1.5,
            convert_ms: 2.0,
            output_ms: 0.5,
            fps: 29.9,
        },
        uptime_seconds: 33.3,
    };

    match round_trip_response(IpcResponse::Stats(stats.clone())) {
        IpcResponse::Stats(parsed) => assert_eq!(parsed, stats),
        other => panic!("Expected Stats response, got {:?}", other),
    }
}

#[test]
fn test_state_wire_names() {
    let json = serde_json::to_string(&PipelineState::SourceLost).unwrap();
    assert_eq!(json, r#""source_lost""#);
}

#[test]
fn test_invalid_message_parsing() {
    assert!(IpcMessage::from_bytes(b"not json").is_err());
    assert!(IpcMessage::from_bytes(br#"{"type":"ForceStop"}"#).is_err());
    assert!(IpcResponse::from_bytes(br#"{"type":"Bogus"}"#).is_err());
}

#[test]
fn test_bytes_have_newline_terminator() {
    assert_eq!(IpcMessage::Ping.to_bytes().last(), Some(&b'\n'));
    assert_eq!(IpcResponse::Stopping.to_bytes().last(), Some(&b'\n'));
}

#[test]
fn test_client_without_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("avatarcam.sock");

    tokio_test::block_on(async {
        assert!(matches!(
            IpcClient::connect_to(&path).await,
            Err(AvatarCamError::NoActiveSession)
        ));
        assert!(!ipc::daemon_running_at(&path).await);
    });
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_daemon_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("avatarcam.sock");

    let transport = MockTransport::new();
    transport.add_sender("VRChatCam", 64, 64);
    transport.add_sender("OtherCam", 64, 64);
    let backend = MockCameraBackend::new();
    let recovery = RecoveryPolicy {
        receive_timeout: Duration::from_millis(20),
        scan_backoff_base: Duration::from_millis(10),
        scan_backoff_max: Duration::from_millis(50),
        ..RecoveryPolicy::default()
    };
    let pipeline = Pipeline::spawn(
        BridgeConfig::auto("VRC").with_recovery(recovery),
        Arc::new(transport.clone()),
        Arc::new(backend.clone()),
    )
    .unwrap();

    let mut server = IpcServer::with_socket_path(pipeline.clone(), "VRC", &path);
    server.start().await.unwrap();
    let server_task = tokio::spawn(async move { server.serve().await });

    assert!(ipc::daemon_running_at(&path).await);
    let mut client = IpcClient::connect_to(&path).await.unwrap();
    assert!(client.ping().await.unwrap());

    let status = client.status().await.unwrap();
    assert_eq!(status.pid, std::process::id());
    assert_eq!(status.pipeline.state, PipelineState::Idle);

    let mut names: Vec<String> = client
        .list_sources()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["OtherCam".to_string(), "VRChatCam".to_string()]);

    client.start().await.unwrap();
    wait_until("streaming", || pipeline.state() == PipelineState::Streaming).await;
    assert_eq!(pipeline.status().source.as_deref(), Some("VRChatCam"));

    client.select(Some("OtherCam".to_string())).await.unwrap();
    wait_until("manual switch", || {
        pipeline.status().source.as_deref() == Some("OtherCam")
    })
    .await;

    // None goes back to the daemon's auto pattern
    client.select(None).await.unwrap();
    assert_eq!(pipeline.status().selection, SelectionPolicy::auto("VRC"));
    wait_until("auto switch", || {
        pipeline.status().source.as_deref() == Some("VRChatCam")
    })
    .await;

    client.rescan().await.unwrap();
    let stats = client.stats().await.unwrap();
    assert_eq!(stats.reconnects, 2);

    client.stop().await.unwrap();
    assert_eq!(client.status().await.unwrap().pipeline.state, PipelineState::Stopped);
    assert_eq!(transport.open_connections(), 0);
    assert_eq!(backend.open_devices(), 0);

    client.shutdown().await.unwrap();
    server_task.await.unwrap().unwrap();
    assert!(matches!(
        pipeline.start().await,
        Err(AvatarCamError::PipelineClosed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_answers_garbage_with_error() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("avatarcam.sock");
    let pipeline = Pipeline::spawn(
        BridgeConfig::default(),
        Arc::new(MockTransport::new()),
        Arc::new(MockCameraBackend::new()),
    )
    .unwrap();

    let mut server = IpcServer::with_socket_path(pipeline, "VRC", &path);
    server.start().await.unwrap();
    let server_task = tokio::spawn(async move {
        while server.accept_one().await.unwrap() {}
    });

    let mut stream = UnixStream::connect(&path).await.unwrap();
    stream.write_all(b"{\"type\":\"Reboot\"}\n").await.unwrap();
    let mut line = String::new();
    BufReader::new(&mut stream).read_line(&mut line).await.unwrap();
    assert!(matches!(
        IpcResponse::from_bytes(line.trim().as_bytes()).unwrap(),
        IpcResponse::Error { .. }
    ));
    // The server handles one connection at a time
    drop(stream);

    let mut client = IpcClient::connect_to(&path).await.unwrap();
    client.shutdown().await.unwrap();
    server_task.await.unwrap();
}
