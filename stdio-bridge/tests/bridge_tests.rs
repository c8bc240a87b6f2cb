#![cfg(unix)]

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use stdio_bridge::bridge::{
    BridgeError, BridgeEvent, BridgeSettings, ProcessBridge, SessionState, WorkerEnvironment,
};
use stdio_bridge_auth::AccountId;

const WAIT: Duration = Duration::from_secs(5);

fn bridge(command: &str, args: &[&str]) -> ProcessBridge {
    ProcessBridge::new(BridgeSettings {
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        working_dir: None,
        inherit_env: true,
        channel_capacity: 16,
        submit_path: "/stream".to_string(),
    })
}

async fn next_event(events: &mut mpsc::Receiver<BridgeEvent>) -> Option<BridgeEvent> {
    timeout(WAIT, events.recv()).await.expect("timed out waiting for event")
}

async fn wait_until_gone(bridge: &ProcessBridge, session_id: &str) {
    timeout(WAIT, async {
        while bridge.registry().contains(session_id) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session was not cleaned up");
}

#[tokio::test]
async fn test_first_event_announces_submit_endpoint() {
    let bridge = bridge("cat", &[]);
    let mut opened = bridge.open_session(WorkerEnvironment::default()).unwrap();

    let first = next_event(&mut opened.events).await.unwrap();
    assert_eq!(
        first,
        BridgeEvent::Endpoint(format!("/stream?sessionId={}", opened.session_id))
    );
    assert_eq!(
        bridge.session_state(&opened.session_id),
        Some(SessionState::Streaming)
    );
    assert!(uuid::Uuid::parse_str(&opened.session_id).is_ok());

    bridge.close_session(&opened.session_id);
}

#[tokio::test]
async fn test_input_is_echoed_as_message_events() {
    let bridge = bridge("cat", &[]);
    let mut opened = bridge.open_session(WorkerEnvironment::default()).unwrap();
    next_event(&mut opened.events).await;

    bridge
        .submit_input(&opened.session_id, r#"{"jsonrpc":"2.0","id":1}"#.to_string())
        .unwrap();
    bridge
        .submit_input(&opened.session_id, r#"{"jsonrpc":"2.0","id":2}"#.to_string())
        .unwrap();

    assert_eq!(
        next_event(&mut opened.events).await,
        Some(BridgeEvent::Message(r#"{"jsonrpc":"2.0","id":1}"#.to_string()))
    );
    assert_eq!(
        next_event(&mut opened.events).await,
        Some(BridgeEvent::Message(r#"{"jsonrpc":"2.0","id":2}"#.to_string()))
    );

    bridge.close_session(&opened.session_id);
    assert_eq!(next_event(&mut opened.events).await, None);
}

#[tokio::test]
async fn test_one_output_line_is_one_event() {
    let bridge = bridge("sh", &["-c", r#"printf '{"id":1}\r\n\n\n'"#]);
    let mut opened = bridge.open_session(WorkerEnvironment::default()).unwrap();
    next_event(&mut opened.events).await;

    assert_eq!(
        next_event(&mut opened.events).await,
        Some(BridgeEvent::Message(r#"{"id":1}"#.to_string()))
    );
    // Blank lines are forwarded too, then the stream ends with the worker
    assert_eq!(
        next_event(&mut opened.events).await,
        Some(BridgeEvent::Message(String::new()))
    );
    assert_eq!(
        next_event(&mut opened.events).await,
        Some(BridgeEvent::Message(String::new()))
    );
    assert_eq!(next_event(&mut opened.events).await, None);
    assert!(!bridge.registry().contains(&opened.session_id));
}

#[tokio::test]
async fn test_exiting_worker_closes_session() {
    let bridge = bridge("sh", &["-c", "exit 3"]);
    let mut opened = bridge.open_session(WorkerEnvironment::default()).unwrap();

    assert!(matches!(
        next_event(&mut opened.events).await,
        Some(BridgeEvent::Endpoint(_))
    ));
    assert_eq!(next_event(&mut opened.events).await, None);

    assert_eq!(bridge.session_count(), 0);
    assert!(matches!(
        bridge.submit_input(&opened.session_id, "{}".to_string()),
        Err(BridgeError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_submit_to_unknown_session_is_not_found() {
    let bridge = bridge("cat", &[]);
    let result = bridge.submit_input("never-opened", "{}".to_string());
    assert!(matches!(result, Err(BridgeError::SessionNotFound(_))));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let bridge = bridge("cat", &[]);
    let mut first = bridge.open_session(WorkerEnvironment::default()).unwrap();
    let mut second = bridge.open_session(WorkerEnvironment::default()).unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(bridge.session_count(), 2);

    next_event(&mut first.events).await;
    next_event(&mut second.events).await;

    bridge.close_session(&first.session_id);
    assert_eq!(next_event(&mut first.events).await, None);
    wait_until_gone(&bridge, &first.session_id).await;

    bridge
        .submit_input(&second.session_id, "still here".to_string())
        .unwrap();
    assert_eq!(
        next_event(&mut second.events).await,
        Some(BridgeEvent::Message("still here".to_string()))
    );
    assert_eq!(bridge.session_count(), 1);

    // Closing twice is harmless
    bridge.close_session(&first.session_id);
    bridge.close_session(&second.session_id);
}

#[tokio::test]
async fn test_client_disconnect_tears_down_worker() {
    let bridge = bridge("cat", &[]);
    let opened = bridge.open_session(WorkerEnvironment::default()).unwrap();
    let session_id = opened.session_id.clone();

    drop(opened);
    wait_until_gone(&bridge, &session_id).await;
    assert!(matches!(
        bridge.submit_input(&session_id, "{}".to_string()),
        Err(BridgeError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_spawn_failure_registers_nothing() {
    let bridge = bridge("/nonexistent/stdio-worker", &[]);
    let result = bridge.open_session(WorkerEnvironment::default());
    assert!(matches!(result, Err(BridgeError::Spawn { .. })));
    assert_eq!(bridge.session_count(), 0);
}

#[tokio::test]
async fn test_worker_receives_injected_environment() {
    let bridge = ProcessBridge::new(BridgeSettings {
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r#"echo "$NETSUITE_ACCOUNT_ID:$NETSUITE_CLIENT_ID:${HOME:-unset}""#.to_string(),
        ],
        working_dir: None,
        inherit_env: false,
        channel_capacity: 16,
        submit_path: "/stream".to_string(),
    });
    let account = AccountId::parse("ACME").unwrap();
    let env = WorkerEnvironment::unauthenticated("NETSUITE", Some(&account), Some("abc"));

    let mut opened = bridge.open_session(env).unwrap();
    next_event(&mut opened.events).await;
    assert_eq!(
        next_event(&mut opened.events).await,
        Some(BridgeEvent::Message("acme:abc:unset".to_string()))
    );
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let bridge = bridge("cat", &[]);
    let mut sessions: Vec<_> = (0..3)
        .map(|_| bridge.open_session(WorkerEnvironment::default()).unwrap())
        .collect();

    bridge.shutdown();

    for opened in sessions.iter_mut() {
        next_event(&mut opened.events).await;
        assert_eq!(next_event(&mut opened.events).await, None);
    }
    assert_eq!(bridge.session_count(), 0);
}
