//! Daemon integration tests over a real TCP socket

#![cfg(unix)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use toy_voice::{Daemon, PipelineManager, SpeechClient};

mod common;

use common::Sandbox;

struct Running {
    addr: SocketAddr,
    speaker: Arc<Mutex<PipelineManager>>,
    stop: oneshot::Sender<()>,
    server: JoinHandle<toy_voice::Result<()>>,
}

async fn start(sandbox: &Sandbox, prestart: Option<&str>) -> Running {
    start_with(sandbox.manager(), prestart).await
}

async fn start_with(manager: PipelineManager, prestart: Option<&str>) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let daemon = Daemon::with_speaker(manager, addr.to_string())
        .prestart(prestart.map(str::to_string));
    let speaker = daemon.speaker();

    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(daemon.serve(listener, async move {
        let _ = stopped.await;
    }));

    Running {
        addr,
        speaker,
        stop,
        server,
    }
}

/// Send raw bytes, half-close, and read whatever comes back
async fn exchange(addr: SocketAddr, payload: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await.unwrap();
    reply
}

#[tokio::test]
async fn test_speak_and_switch_languages() {
    let sandbox = Sandbox::new();
    let daemon = start(&sandbox, None).await;

    let reply = exchange(daemon.addr, br#"{"text":"hello","language":"en"}"#).await;
    assert_eq!(reply, "{\"ok\":true}\n");
    assert!(sandbox.wait_for_audio("hello"));

    let reply = exchange(daemon.addr, b"{\"text\":\"hallo\",\"language\":\"de\"}\n").await;
    assert_eq!(reply, "{\"ok\":true}\n");
    assert!(sandbox.wait_for_audio("hallo"));

    {
        let manager = daemon.speaker.lock().unwrap();
        assert_eq!(manager.active_language(), Some("de"));
        assert_eq!(manager.pipelines_started(), 2);
    }

    daemon.stop.send(()).unwrap();
    daemon.server.await.unwrap().unwrap();
    assert!(daemon.speaker.lock().unwrap().active_language().is_none());
}

#[tokio::test]
async fn test_unsupported_language_falls_back_to_english() {
    let sandbox = Sandbox::new();
    let daemon = start(&sandbox, None).await;

    let reply = exchange(daemon.addr, b"{\"text\":\"bonjour\",\"language\":\"fr\"}\n").await;
    assert_eq!(reply, "{\"ok\":true}\n");
    assert_eq!(
        daemon.speaker.lock().unwrap().active_language(),
        Some("en")
    );

    daemon.stop.send(()).unwrap();
    daemon.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bad_requests_keep_server_alive() {
    let sandbox = Sandbox::new();
    let daemon = start(&sandbox, None).await;

    assert_eq!(
        exchange(daemon.addr, b"{\"text\":\"\",\"language\":\"en\"}\n").await,
        "{\"ok\":false,\"error\":\"no_text\"}\n"
    );
    assert_eq!(
        exchange(daemon.addr, b"not json\n").await,
        "{\"ok\":false,\"error\":\"internal\"}\n"
    );
    assert_eq!(
        exchange(daemon.addr, b"  \n").await,
        "{\"ok\":false,\"error\":\"empty\"}\n"
    );

    // Closing without sending anything gets no reply
    assert_eq!(exchange(daemon.addr, b"").await, "");

    assert!(daemon.speaker.lock().unwrap().active_language().is_none());
    assert_eq!(
        exchange(daemon.addr, b"{\"text\":\"still up\"}\n").await,
        "{\"ok\":true}\n"
    );

    daemon.stop.send(()).unwrap();
    daemon.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_missing_voice_reports_speak_failed() {
    let sandbox = Sandbox::new();
    sandbox.remove_german();
    let daemon = start(&sandbox, None).await;

    assert_eq!(
        exchange(daemon.addr, b"{\"text\":\"hallo\",\"language\":\"de\"}\n").await,
        "{\"ok\":false,\"error\":\"speak_failed\"}\n"
    );

    daemon.stop.send(()).unwrap();
    daemon.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_prestart_warms_pipeline() {
    let sandbox = Sandbox::new();
    let daemon = start(&sandbox, Some("de")).await;

    // Pre-warm finishes before the first request is accepted
    let reply = exchange(daemon.addr, b"{\"text\":\"guten tag\",\"language\":\"de\"}\n").await;
    assert_eq!(reply, "{\"ok\":true}\n");
    assert_eq!(daemon.speaker.lock().unwrap().pipelines_started(), 1);

    daemon.stop.send(()).unwrap();
    daemon.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_talks_to_daemon() {
    let sandbox = Sandbox::new();
    let daemon = start(&sandbox, None).await;

    let client = SpeechClient::with_parts(daemon.addr.to_string(), true, sandbox.oneshot());
    client.speak("from the client", "en").await.unwrap();
    assert!(sandbox.wait_for_audio("from the client"));

    daemon.stop.send(()).unwrap();
    daemon.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    let sandbox = Sandbox::new();
    let daemon = start(&sandbox, None).await;

    let mut tasks = Vec::new();
    for (i, lang) in ["en", "de", "en", "de", "en", "de"].into_iter().enumerate() {
        let addr = daemon.addr;
        tasks.push(tokio::spawn(async move {
            let payload = format!("{{\"text\":\"line{i}\",\"language\":\"{lang}\"}}\n");
            exchange(addr, payload.as_bytes()).await
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), "{\"ok\":true}\n");
    }

    for i in 0..6 {
        assert!(sandbox.wait_for_audio(&format!("line{i}")));
    }

    daemon.stop.send(()).unwrap();
    daemon.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stalled_player_reports_speak_failed() {
    let sandbox = Sandbox::new();
    let player = sandbox.script("stalled-aplay", "#!/bin/sh\nexec sleep 600\n");
    let manager = sandbox
        .manager_with(&sandbox.synth, &player)
        .feed_timeout(Duration::from_millis(300));
    let daemon = start_with(manager, None).await;

    let payload = format!("{{\"text\":\"{}\",\"language\":\"en\"}}\n", "word ".repeat(200));
    let mut reply = String::new();
    for _ in 0..2000 {
        reply = exchange(daemon.addr, payload.as_bytes()).await;
        if reply != "{\"ok\":true}\n" {
            break;
        }
    }
    assert_eq!(reply, "{\"ok\":false,\"error\":\"speak_failed\"}\n");

    // Shutdown no longer waits on a blocked write
    daemon.stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), daemon.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
