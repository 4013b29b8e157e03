//! CLI for hubbub
//!
//! Subcommands:
//! - `server`: run the broker (WebSocket sessions + admin HTTP)
//! - `client`: run a simple example client (useful for smoke tests)

use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use hubbub_broker::engine::{Broker, SharedBroker};
use hubbub_config::load_config;
use hubbub_transport::websocket::start_websocket_server;

#[derive(Parser)]
#[command(name = "hubbub")]
enum Command {
    /// Start the broker: WebSocket sessions plus the admin HTTP surface
    Server,
    /// Run the example client (connects, subscribes, publishes, prints frames)
    Client {
        /// WebSocket server URL to connect to (default: ws://127.0.0.1:8080)
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Topic to subscribe and publish to (must already exist)
        #[arg(long, default_value = "demo")]
        topic: String,
    },
}

#[tokio::main]
async fn main() {
    hubbub_utils::logging::init("info");

    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client { url, topic } => {
            if let Err(e) = run_client(&url, &topic).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let admin_addr = format!("{}:{}", config.server.host, config.server.admin_port);
    let broker: SharedBroker = Arc::new(Mutex::new(Broker::new(config.broker.clone())));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut admin = tokio::spawn(hubbub_admin::serve(
        admin_addr,
        broker.clone(),
        config.server.expose_errors,
    ));
    let mut server = tokio::spawn(start_websocket_server(addr, broker, shutdown_rx));

    tokio::select! {
        _ = &mut server => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = &mut admin => {
            error!("Admin server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Draining sessions.");
            let _ = shutdown_tx.send(true);
            // the server finishes its bounded session drain before returning
            let _ = server.await;
        }
    }

    Ok(())
}

async fn run_client(url: &str, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url).await?;

    // 1. Welcome frame with our server-assigned identity
    if let Some(Ok(WsMessage::Text(welcome))) = ws_stream.next().await {
        println!("Connected: {welcome}");
    }

    // 2. Subscribe with a replay of the last few events
    let client_id = format!("cli-{}", uuid::Uuid::new_v4());
    let subscribe = json!({
        "type": "subscribe",
        "topic": topic,
        "client_id": client_id,
        "last_n": 5,
        "request_id": "cli-subscribe"
    });
    ws_stream
        .send(WsMessage::Text(subscribe.to_string().into()))
        .await?;

    // 3. Publish a message to ourselves
    let publish = json!({
        "type": "publish",
        "topic": topic,
        "message": {
            "id": uuid::Uuid::new_v4().to_string(),
            "payload": { "hello": "from the hubbub example client" }
        },
        "request_id": "cli-publish"
    });
    ws_stream
        .send(WsMessage::Text(publish.to_string().into()))
        .await?;

    // 4. Print frames until the server closes or we are interrupted
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            msg = ws_stream.next() => match msg {
                Some(Ok(WsMessage::Text(incoming))) => println!("<< {incoming}"),
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }

    Ok(())
}
