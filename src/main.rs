//! Interactive chat entrypoint
//!
//! Reads user messages from stdin line by line, runs each one through the
//! orchestrator and prints the assistant's replies. One process serves one
//! interactive session, but the store underneath holds them all.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use sandbot::model::OllamaChatClient;
use sandbot::sandbox::SandboxExecutor;
use sandbot::store::SessionStore;
use sandbot::{InboundFrame, Orchestrator, OrchestratorConfig, OutboundFrame};

const DEFAULT_DB_PATH: &str = ".sandbot/sessions.db";
const DEFAULT_MODEL: &str = "qwen3";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sandbot::tracing::init_tracing()?;

    let db_path = std::env::var("SANDBOT_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let model = std::env::var("SANDBOT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let ollama_url =
        std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());

    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store = SessionStore::open(&db_path).await?;

    let client = Arc::new(OllamaChatClient::new(ollama_url.clone(), model.clone()));
    let executor = Arc::new(SandboxExecutor::with_defaults());
    let orchestrator = Arc::new(Orchestrator::new(
        client,
        executor,
        store.clone(),
        OrchestratorConfig::default(),
    ));

    let session = orchestrator.store().create_session().await?;
    let session_id = session.id;
    info!(session_id = %session_id, model = %model, db = %db_path, "session started");

    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(16);
    let printer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::AssistantMessage(content) => println!("assistant> {}", content),
                OutboundFrame::Error(message) => eprintln!("error> {}", message),
            }
        }
    });

    println!("sandbot ready (session {}). Empty line or Ctrl-D exits.", session_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("you> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            break;
        }
        let frame = InboundFrame::from_line(text);
        orchestrator.handle_message(&session_id, &frame.message, &tx).await;
    }

    drop(tx);
    printer.await?;
    store.close().await;
    Ok(())
}
