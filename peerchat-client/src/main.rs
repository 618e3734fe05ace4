use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use peerchat_client::{
    Command, Orchestrator, SessionConfig, UiEvent,
    config::{DEFAULT_CONNECT_ATTEMPTS, DEFAULT_DEDUP_WINDOW},
    direct::{DirectConfig, TcpTransportFactory},
    files::{TransferDirection, save_received},
    prefs::{JsonFileStore, data_dir, preferences_path},
    relay_client::RelaySignaling,
};
use peerchat_core::{FILE_CHUNK_BYTES, MAX_PEERS_PER_ROOM, TYPING_TIMEOUT_MS};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug, Clone)]
#[command(name = "peerchat", about = "Terminal peer-to-peer chat")]
struct ClientArgs {
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    relay_url: String,
    /// Room to join on startup.
    #[arg(long)]
    room: Option<String>,
    #[arg(long)]
    nickname: Option<String>,
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,
    /// Listener address for direct links.
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,
    /// Address announced to peers for direct links.
    #[arg(long)]
    advertise: Option<IpAddr>,
    #[arg(long, default_value_t = MAX_PEERS_PER_ROOM)]
    max_peers: usize,
    #[arg(long, default_value_t = TYPING_TIMEOUT_MS)]
    typing_timeout_ms: u64,
    #[arg(long, default_value_t = DEFAULT_CONNECT_ATTEMPTS)]
    connect_attempts: u32,
    #[arg(long, default_value_t = 3_000)]
    observation_window_ms: u64,
    #[arg(long, default_value_t = 2_000)]
    retry_backoff_ms: u64,
    #[arg(long, default_value_t = DEFAULT_DEDUP_WINDOW)]
    dedup_window: usize,
    #[arg(long, default_value_t = FILE_CHUNK_BYTES)]
    chunk_bytes: usize,
}

impl ClientArgs {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_peers: self.max_peers,
            typing_timeout: Duration::from_millis(self.typing_timeout_ms),
            connect_attempts: self.connect_attempts,
            observation_window: Duration::from_millis(self.observation_window_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            dedup_window: self.dedup_window,
            chunk_bytes: self.chunk_bytes.max(1),
        }
    }

    fn direct_config(&self) -> DirectConfig {
        DirectConfig {
            bind: self.bind,
            advertise_ip: self.advertise,
            ..DirectConfig::default()
        }
    }
}

struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let log_path = client_log_path();
    let file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .init();
}

fn client_log_path() -> PathBuf {
    let dir = data_dir();
    let _ = std::fs::create_dir_all(&dir);
    dir.join("peerchat.log")
}

fn parse_command(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return Some(Command::SendText(line.to_string()));
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    match verb {
        "/file" => {
            let paths: Vec<PathBuf> = parts.map(PathBuf::from).collect();
            if paths.is_empty() {
                println!("usage: /file <path>...");
                return None;
            }
            Some(Command::SendFiles(paths))
        }
        "/reconnect" => Some(Command::Reconnect),
        "/leave" => Some(Command::Leave),
        "/join" => {
            let Some(room_code) = parts.next() else {
                println!("usage: /join <room> [nickname]");
                return None;
            };
            let nickname: Vec<&str> = parts.collect();
            Some(Command::Join {
                room_code: room_code.to_string(),
                nickname: (!nickname.is_empty()).then(|| nickname.join(" ")),
            })
        }
        "/quit" => Some(Command::Quit),
        other => {
            println!("unknown command {other}");
            None
        }
    }
}

async fn print_ui_events(mut ui_rx: mpsc::UnboundedReceiver<UiEvent>, download_dir: PathBuf) {
    while let Some(event) = ui_rx.recv().await {
        match event {
            UiEvent::Status(view) => {
                let mut line = format!("[status] {}", view.state);
                if view.reconnect_available {
                    line.push_str(" (type /reconnect to rejoin)");
                }
                println!("{line}");
            }
            UiEvent::PeerCount { known, connected } => {
                println!("[peers] {known} in room, {connected} direct");
            }
            UiEvent::Joined {
                room_code,
                user_id,
                nickname,
            } => println!("[joined] room {room_code} as {nickname} ({user_id})"),
            UiEvent::Left => println!("[left] room"),
            UiEvent::System(text) => println!("* {text}"),
            UiEvent::Alert(text) => println!("! {text}"),
            UiEvent::Chat {
                message,
                outgoing,
                channel,
            } => {
                let arrow = if outgoing { ">" } else { "<" };
                println!("{arrow} [{channel}] {}: {}", message.nickname, message.text);
            }
            UiEvent::Typing {
                nickname,
                is_typing,
                ..
            } => {
                if is_typing {
                    println!("  {nickname} is typing...");
                }
            }
            UiEvent::CallSignal { peer_id, kind, .. } => {
                println!("[call] {kind} from {peer_id} (calls are not supported here)");
            }
            UiEvent::FileStarted { transfer } => match transfer.direction {
                TransferDirection::Sending => {
                    println!("[file] sending {} ({} bytes)", transfer.name, transfer.size)
                }
                TransferDirection::Receiving => println!(
                    "[file] {} is sending {} ({} bytes)",
                    transfer.sender_nickname, transfer.name, transfer.size
                ),
            },
            UiEvent::FileProgress {
                file_id, progress, ..
            } => {
                if progress >= 1.0 {
                    println!("[file] {file_id} transferred");
                }
            }
            UiEvent::FileReceived { transfer, bytes } => {
                match save_received(&download_dir, &transfer.name, &bytes).await {
                    Ok(path) => println!("[file] saved {} to {}", transfer.name, path.display()),
                    Err(err) => {
                        error!(file = %transfer.name, "saving received file failed: {err}");
                        println!("! could not save {}: {err}", transfer.name);
                    }
                }
            }
            UiEvent::FileFailed { name, cause } => println!("! file {name} failed: {cause}"),
            UiEvent::Reconnecting => println!("[status] reconnecting..."),
            UiEvent::ReconnectReady => {}
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = ClientArgs::parse();
    info!(relay_url = %args.relay_url, "peerchat starting");

    let signaling = Arc::new(RelaySignaling::new(args.relay_url.clone()));
    let factory = Arc::new(TcpTransportFactory::new(args.direct_config()));
    let prefs = Arc::new(JsonFileStore::open(preferences_path()));

    let (mut orchestrator, ui_rx) =
        Orchestrator::new(args.session_config(), signaling, factory, prefs);
    let printer = tokio::spawn(print_ui_events(ui_rx, args.download_dir.clone()));

    if let Err(err) = orchestrator.initialize().await {
        warn!("signaling unavailable at startup: {err}");
    }

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    if let Some(room) = &args.room {
        let _ = command_tx.send(Command::Join {
            room_code: room.clone(),
            nickname: args.nickname.clone(),
        });
    } else {
        println!("type /join <room> [nickname] to enter a room");
    }

    let session = tokio::spawn(orchestrator.run(command_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!("reading stdin failed: {err}");
                break;
            }
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };
        let quit = matches!(command, Command::Quit);
        if matches!(command, Command::SendText(_)) {
            let _ = command_tx.send(Command::InputActivity);
        }
        if command_tx.send(command).is_err() || quit {
            break;
        }
    }

    let _ = command_tx.send(Command::Quit);
    drop(command_tx);
    if let Err(err) = session.await {
        error!("session task failed: {err}");
    }
    printer.abort();
    info!("peerchat stopped");
}
