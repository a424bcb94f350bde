//! In-process stand-in for the chat service.
//!
//! Two listeners mirror the real deployment: the read port writes a scripted
//! set of broadcast lines, the write port runs the greeting / token /
//! registration exchange and then records every line the client sends.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use resilient_chat::{
    auth::Credentials,
    config::{Config, Timings},
    supervisor::Backoff,
};
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

pub const HOST: &str = "127.0.0.1";
pub const GREETING: &str =
    "Hello %username%! Enter your personal hash or leave it empty to create new account.";
pub const NICKNAME_PROMPT: &str = "Enter preferred nickname below:";
pub const WELCOME: &str = "Welcome to chat! Post your message below. End it with an empty line.";

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Known `(token, nickname)` pairs.
    pub accounts: Vec<(String, String)>,
    /// Token handed out on registration; generated when `None`.
    pub issued_token: Option<String>,
    /// Lines written on every read connection right after accept.
    pub read_lines: Vec<String>,
    /// Close the read connection once `read_lines` are written.
    pub close_read_after_lines: bool,
    /// Accept send connections but never write the greeting.
    pub withhold_greeting: bool,
    /// After a successful login, hold the send connection without reading.
    pub stall_send_after_auth: bool,
    /// After a successful login, drop the send connection once the first
    /// line arrives.
    pub drop_send_after_first_line: bool,
}

impl MockOptions {
    pub fn with_account(token: &str, nickname: &str) -> Self {
        Self {
            accounts: vec![(token.to_string(), nickname.to_string())],
            ..Self::default()
        }
    }
}

pub struct MockChatServer {
    pub read_port: u16,
    pub write_port: u16,
    state: Arc<MockState>,
}

struct MockState {
    options: MockOptions,
    accounts: Mutex<HashMap<String, String>>,
    received: Mutex<Vec<String>>,
    read_accepts: AtomicUsize,
    send_accepts: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockChatServer {
    pub async fn start(options: MockOptions) -> Result<Self> {
        let read_listener = TcpListener::bind((HOST, 0)).await?;
        let write_listener = TcpListener::bind((HOST, 0)).await?;
        let read_port = read_listener.local_addr()?.port();
        let write_port = write_listener.local_addr()?.port();

        let accounts = options.accounts.iter().cloned().collect();
        let state = Arc::new(MockState {
            options,
            accounts: Mutex::new(accounts),
            received: Mutex::new(Vec::new()),
            read_accepts: AtomicUsize::new(0),
            send_accepts: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        });

        tokio::spawn(accept_reads(read_listener, Arc::clone(&state)));
        tokio::spawn(accept_sends(write_listener, Arc::clone(&state)));

        Ok(Self {
            read_port,
            write_port,
            state,
        })
    }

    /// Every line received on authorised send connections, terminators stripped.
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().expect("received lock").clone()
    }

    pub fn read_accepts(&self) -> usize {
        self.state.read_accepts.load(Ordering::SeqCst)
    }

    pub fn send_accepts(&self) -> usize {
        self.state.send_accepts.load(Ordering::SeqCst)
    }

    /// Configuration pointing at this server, with short timings for tests.
    pub fn config(&self, token: Option<&str>, timings: Timings, backoff: Backoff) -> Config {
        Config {
            host: HOST.to_string(),
            read_port: self.read_port,
            write_port: self.write_port,
            history_path: std::env::temp_dir().join("resilient-chat-unused.history"),
            token_path: std::env::temp_dir().join("resilient-chat-unused.token"),
            credentials: Credentials::new(token.map(str::to_string), None),
            timings,
            backoff,
        }
    }
}

pub fn quick_timings(watchdog_timeout: Duration) -> Timings {
    Timings {
        ping_interval: Duration::from_secs(60),
        ping_timeout: Duration::from_secs(1),
        watchdog_timeout,
    }
}

async fn accept_reads(listener: TcpListener, state: Arc<MockState>) {
    while let Ok((stream, _)) = listener.accept().await {
        state.read_accepts.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let _ = serve_read(stream, state).await;
        });
    }
}

async fn accept_sends(listener: TcpListener, state: Arc<MockState>) {
    while let Ok((stream, _)) = listener.accept().await {
        state.send_accepts.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let _ = serve_send(stream, state).await;
        });
    }
}

async fn serve_read(stream: TcpStream, state: Arc<MockState>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    for line in &state.options.read_lines {
        send_line(&mut writer, line).await?;
    }

    if state.options.close_read_after_lines {
        writer.shutdown().await?;
        return Ok(());
    }

    // Hold the connection open until the client goes away.
    let mut reader = BufReader::new(reader);
    let mut sink = String::new();
    while reader.read_line(&mut sink).await? > 0 {
        sink.clear();
    }
    Ok(())
}

async fn serve_send(stream: TcpStream, state: Arc<MockState>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    if state.options.withhold_greeting {
        hold(reader, writer).await;
        return Ok(());
    }

    send_line(&mut writer, GREETING).await?;
    let Some(token) = next_line(&mut reader).await? else {
        return Ok(());
    };

    if !token.is_empty() {
        let known = state.accounts.lock().expect("accounts lock").get(&token).cloned();
        match known {
            Some(nickname) => {
                let reply = json!({ "nickname": nickname, "account_hash": token });
                send_line(&mut writer, &reply.to_string()).await?;
                send_line(&mut writer, WELCOME).await?;
                return after_login(reader, writer, state).await;
            }
            None => send_line(&mut writer, "null").await?,
        }
    }

    send_line(&mut writer, NICKNAME_PROMPT).await?;
    let Some(username) = next_line(&mut reader).await? else {
        return Ok(());
    };
    let token = state.issue_token(&username);
    let reply = json!({ "nickname": username, "account_hash": token });
    send_line(&mut writer, &reply.to_string()).await?;
    send_line(&mut writer, WELCOME).await?;

    after_login(reader, writer, state).await
}

async fn after_login(
    mut reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    state: Arc<MockState>,
) -> std::io::Result<()> {
    if state.options.stall_send_after_auth {
        hold(reader, writer).await;
        return Ok(());
    }

    while let Some(line) = next_line(&mut reader).await? {
        state.received.lock().expect("received lock").push(line);
        if state.options.drop_send_after_first_line {
            // Both halves go away here; later client writes hit a dead socket.
            return Ok(());
        }
    }
    Ok(())
}

/// Keeps a connection open without ever touching it.
async fn hold(reader: BufReader<OwnedReadHalf>, writer: OwnedWriteHalf) {
    let _connection = (reader, writer);
    std::future::pending::<()>().await;
}

impl MockState {
    fn issue_token(&self, nickname: &str) -> String {
        let token = self.options.issued_token.clone().unwrap_or_else(|| {
            format!("token-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
        });
        self.accounts
            .lock()
            .expect("accounts lock")
            .insert(token.clone(), nickname.to_string());
        token
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn next_line<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
