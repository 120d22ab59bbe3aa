//! Integration test: one console line flows through the agent gateway and the reply is printed once.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use switchboard::agent::{AgentGateway, AgentSettings};
use switchboard::backend::{AgentBackend, AgentEvent, AgentRequest, BackendError, EventStream};
use switchboard::channels::{Channel, ConsoleChannel};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

struct HiThere {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl AgentBackend for HiThere {
    async fn query(&self, request: AgentRequest) -> Result<EventStream, BackendError> {
        self.prompts.lock().await.push(request.prompt);
        let events = vec![
            Ok(AgentEvent::Init {
                session_id: Some("sess-1".to_string()),
            }),
            Ok(AgentEvent::Content {
                text: "hi there".to_string(),
            }),
            Ok(AgentEvent::Result {
                session_id: Some("sess-1".to_string()),
            }),
        ];
        Ok(futures_util::stream::iter(events).boxed())
    }
}

#[tokio::test]
async fn console_hello_prints_reply_once() {
    let backend = Arc::new(HiThere {
        prompts: Mutex::new(Vec::new()),
    });
    let gateway = Arc::new(AgentGateway::new(
        backend.clone(),
        AgentSettings {
            model: "test-model".to_string(),
            system_prompt: "be brief".to_string(),
            max_turns: 3,
            allowed_tools: Vec::new(),
        },
    ));
    let (out_tx, mut out_rx) = tokio::io::duplex(64 * 1024);
    let console = ConsoleChannel::with_io(gateway.clone(), &b"hello\n"[..], out_tx);

    console.start().await.expect("console start");
    drop(console);

    let prompts = backend.prompts.lock().await;
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("[cli You "));
    assert!(prompts[0].ends_with("] hello"));
    drop(prompts);

    let mut out = String::new();
    out_rx.read_to_string(&mut out).await.expect("read output");
    assert_eq!(out.matches("hi there").count(), 1);
    assert_eq!(
        gateway.sessions().get("cli:cli-user").await.as_deref(),
        Some("sess-1")
    );
}
