//! Integration tests: ProcessBackend against small shell scripts standing in for the agent CLI.
#![cfg(unix)]

use futures_util::StreamExt;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use switchboard::agent::{AgentGateway, AgentSettings, APOLOGY_REPLY};
use switchboard::backend::{AgentBackend, AgentEvent, AgentRequest, BackendError, ProcessBackend};
use switchboard::message::Message;

fn script(body: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("switchboard-backend-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("fake-agent");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn request(resume: Option<&str>) -> AgentRequest {
    AgentRequest {
        prompt: "[cli You 12:00] hello".to_string(),
        resume: resume.map(String::from),
        model: "test-model".to_string(),
        system_prompt: "be brief".to_string(),
        max_turns: 2,
        allowed_tools: vec!["mcp__switchboard-tools__get_time".to_string()],
    }
}

const HAPPY: &str = r#"
echo '{"type":"system","subtype":"init","session_id":"s-1"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hi"},{"type":"tool_use","name":"x"},{"type":"text","text":"there"}]}}'
echo '{"type":"rate_limit_event"}'
echo '{"type":"result","subtype":"success","session_id":"s-1","is_error":false}'
"#;

#[tokio::test]
async fn streams_staged_events_in_order() {
    let backend = ProcessBackend::new(script(HAPPY).to_string_lossy());
    let events: Vec<_> = backend
        .query(request(None))
        .await
        .expect("spawned")
        .collect()
        .await;
    let events: Vec<AgentEvent> = events.into_iter().map(|e| e.expect("event")).collect();
    assert_eq!(
        events,
        vec![
            AgentEvent::Init {
                session_id: Some("s-1".to_string())
            },
            AgentEvent::Content {
                text: "hi".to_string()
            },
            AgentEvent::Content {
                text: "there".to_string()
            },
            AgentEvent::Result {
                session_id: Some("s-1".to_string())
            },
        ]
    );
}

#[tokio::test]
async fn resume_flag_reaches_the_process() {
    // Echo back whatever follows --resume as the session id.
    let path = script(
        r#"
while [ $# -gt 0 ]; do
  if [ "$1" = "--resume" ]; then shift; echo "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"$1\"}"; fi
  shift
done
echo '{"type":"result","is_error":false}'
"#,
    );
    let backend = ProcessBackend::new(path.to_string_lossy());
    let mut stream = backend.query(request(Some("prev-42"))).await.expect("spawned");
    let first = stream.next().await.expect("one event").expect("ok");
    assert_eq!(
        first,
        AgentEvent::Init {
            session_id: Some("prev-42".to_string())
        }
    );
}

#[tokio::test]
async fn nonzero_exit_fails_after_events() {
    let path = script(
        r#"
echo '{"type":"system","subtype":"init","session_id":"s-9"}'
exit 3
"#,
    );
    let backend = ProcessBackend::new(path.to_string_lossy());
    let events: Vec<_> = backend
        .query(request(None))
        .await
        .expect("spawned")
        .collect()
        .await;
    assert_eq!(events.len(), 2);
    assert!(events[0].is_ok());
    assert!(matches!(events[1], Err(BackendError::Exit(_))));
}

#[tokio::test]
async fn missing_command_is_a_spawn_error() {
    let backend = ProcessBackend::new("/nonexistent/switchboard-agent");
    let res = backend.query(request(None)).await;
    assert!(matches!(res, Err(BackendError::Spawn(_))));
}

#[tokio::test]
async fn gateway_keeps_init_session_when_process_fails() {
    let path = script(
        r#"
echo '{"type":"system","subtype":"init","session_id":"s-early"}'
echo 'not json'
"#,
    );
    let gateway = AgentGateway::new(
        Arc::new(ProcessBackend::new(path.to_string_lossy())),
        AgentSettings {
            model: "test-model".to_string(),
            system_prompt: String::new(),
            max_turns: 1,
            allowed_tools: Vec::new(),
        },
    );
    let reply = gateway
        .get_reply(&Message::direct("cli", "cli-user", "hello"))
        .await;
    assert_eq!(reply, APOLOGY_REPLY);
    assert_eq!(
        gateway.sessions().get("cli:cli-user").await.as_deref(),
        Some("s-early")
    );
}
