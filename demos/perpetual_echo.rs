use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use perpetual_ws::client;
use perpetual_ws::core::{
    ConnectTarget, ConnectionConfig, PerpetualConfig, WebSocketError, WsFrame, WsPayload,
};
use perpetual_ws::perpetual::{ClientConnector, PerpetualHandler, PerpetualSocket};
use perpetual_ws::transport::tungstenite::TungsteniteTransport;
use perpetual_ws::ws::ConnectionFactory;

fn usage() -> &'static str {
    "perpetual_echo\n\
  Keeps one logical socket to an echo server alive across connection rotations and logs every\n\
  deduplicated echo.\n\
\n\
USAGE:\n\
  cargo run --example perpetual_echo -- [--url <ws-url>] [--shift-secs <N>] [--switch-secs <N>] [--run-secs <N>]\n\
\n\
DEFAULTS:\n\
  --url          local echo server on 127.0.0.1\n\
  --shift-secs   10\n\
  --switch-secs  2\n\
  --run-secs     45\n\
"
}

struct Args {
    url: Option<String>,
    shift: Duration,
    switch: Duration,
    run_for: Duration,
}

fn parse_secs(value: Option<String>) -> Duration {
    match value.and_then(|v| v.parse::<u64>().ok()) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            eprintln!("{usage}", usage = usage());
            std::process::exit(2);
        }
    }
}

fn parse_args() -> Args {
    let mut args = Args {
        url: None,
        shift: Duration::from_secs(10),
        switch: Duration::from_secs(2),
        run_for: Duration::from_secs(45),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--url" => args.url = it.next(),
            "--shift-secs" => args.shift = parse_secs(it.next()),
            "--switch-secs" => args.switch = parse_secs(it.next()),
            "--run-secs" => args.run_for = parse_secs(it.next()),
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            _ => {
                eprintln!("{usage}", usage = usage());
                std::process::exit(2);
            }
        }
    }
    args
}

/// Echo server that accepts any number of connections.
async fn spawn_echo_server() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut ws = match client::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(err) => {
                        warn!(%peer, error = %err, "handshake failed");
                        return;
                    }
                };
                while let Some(Ok(frame)) = ws.next().await {
                    match frame {
                        WsFrame::Text(_) | WsFrame::Binary(_) => {
                            if ws.send(frame).await.is_err() {
                                break;
                            }
                        }
                        WsFrame::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });
    Ok(format!("ws://{addr}"))
}

struct EchoLogger;

impl PerpetualHandler for EchoLogger {
    fn on_available(&self, socket: &PerpetualSocket) {
        info!(socket = %socket.name(), "available");
    }

    fn on_message(&self, socket: &PerpetualSocket, payload: &WsPayload) {
        let connection = socket.primary().map(|ws| ws.id());
        info!(
            socket = %socket.name(),
            primary = ?connection,
            echo = payload.as_text().unwrap_or("<binary>"),
            "echo"
        );
    }

    fn on_unavailable(&self, socket: &PerpetualSocket, reason: &WebSocketError) {
        warn!(socket = %socket.name(), reason = %reason, "unavailable");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();
    let url = match args.url {
        Some(url) => url,
        None => spawn_echo_server().await?,
    };
    info!(%url, shift = ?args.shift, switch = ?args.switch, "starting perpetual socket");

    let factory = ConnectionFactory::<TungsteniteTransport>::default();
    let connector = ClientConnector::new(factory, move || ConnectTarget::new(url.clone()))
        .with_config(ConnectionConfig::default());
    let socket = PerpetualSocket::builder("echo", connector, EchoLogger)
        .config(PerpetualConfig::new(args.shift).with_switch_duration(args.switch))
        .start()?;

    let deadline = tokio::time::Instant::now() + args.run_for;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut seq = 0u64;
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        seq += 1;
        if let Err(err) = socket.send(format!("tick {seq}")).await {
            warn!(error = %err, seq, "send failed");
        }
    }

    socket.shutdown().await?;
    info!(sent = seq, "done");
    Ok(())
}
