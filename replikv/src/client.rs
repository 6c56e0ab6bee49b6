use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail, ensure};
use rand::seq::SliceRandom;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    console::ConsoleCommand,
    message::{self, Message, read_message},
};

const HELP: &str = "commands: PUT <key> <value>, GET <key>, HELP, EXIT";

/// Last timestamp observed per key. Shared between the interactive loop and
/// the callback listener; a cached timestamp is never lowered, so reads stay
/// monotonic no matter which server answers next.
#[derive(Default)]
pub struct TimestampCache {
    inner: Mutex<HashMap<String, u64>>,
}

impl TimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freshness bar for the next GET of `key`; 0 if the key was never seen.
    pub fn last_seen(&self, key: &str) -> u64 {
        self.inner.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn observe(&self, key: &str, timestamp: u64) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entry(key.to_string()).or_insert(0);
        *entry = (*entry).max(timestamp);
    }
}

/// One client's view of the cluster: the servers it may contact, its
/// timestamp cache, and the address where it accepts asynchronous pushes.
/// Every operation picks a server uniformly at random.
pub struct Session {
    servers: Vec<SocketAddr>,
    cache: Arc<TimestampCache>,
    callback: SocketAddr,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PutOutcome {
    pub timestamp: u64,
    pub server: SocketAddr,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GetOutcome {
    Value {
        value: String,
        timestamp: u64,
        server: SocketAddr,
    },
    /// The server parked the read; the answer arrives on the callback
    /// listener once the server catches up.
    Pending { server: SocketAddr },
}

impl Session {
    pub fn new(
        servers: Vec<SocketAddr>,
        cache: Arc<TimestampCache>,
        callback: SocketAddr,
    ) -> Result<Self> {
        ensure!(!servers.is_empty(), "a session needs at least one server");
        Ok(Self {
            servers,
            cache,
            callback,
        })
    }

    fn pick_server(&self) -> SocketAddr {
        *self
            .servers
            .choose(&mut rand::thread_rng())
            .expect("servers is never empty")
    }

    /// Sends a PUT to one random server. On confirmation the cache adopts
    /// the assigned timestamp; on anything else the PUT failed. No retry.
    pub async fn put(&self, key: &str, value: &str) -> Result<PutOutcome> {
        let server = self.pick_server();
        let request = Message::Put {
            key: key.to_string(),
            value: value.to_string(),
        };
        let reply = message::request(server, &request)
            .await
            .with_context(|| format!("failed to reach server {server}"))?;

        match reply {
            Some(Message::PutOk { timestamp, .. }) => {
                self.cache.observe(key, timestamp);
                Ok(PutOutcome { timestamp, server })
            }
            Some(other) => bail!("PUT of {key} rejected by {server}: {other:?}"),
            None => bail!("PUT of {key} not confirmed by {server}"),
        }
    }

    /// Sends a GET phrased with the cached timestamp. The value either comes
    /// back synchronously or the read is parked server-side and delivered
    /// through the callback listener later.
    pub async fn get(&self, key: &str) -> Result<GetOutcome> {
        let server = self.pick_server();
        let request = Message::Get {
            key: key.to_string(),
            timestamp: self.cache.last_seen(key),
            client_ip: self.callback.ip().to_string(),
            client_port: self.callback.port(),
        };
        let reply = message::request(server, &request)
            .await
            .with_context(|| format!("failed to reach server {server}"))?;

        match reply {
            Some(Message::GetOk {
                value, timestamp, ..
            }) => {
                self.cache.observe(key, timestamp);
                Ok(GetOutcome::Value {
                    value,
                    timestamp,
                    server,
                })
            }
            Some(Message::WaitForResponse { .. }) => Ok(GetOutcome::Pending { server }),
            Some(other) => bail!("unexpected reply to GET of {key} from {server}: {other:?}"),
            None => bail!("server {server} closed the connection without answering"),
        }
    }
}

/// Accepts asynchronous GET completions and applies them to the cache
/// exactly as a synchronous reply would, printing the result for the
/// operator.
pub async fn run_callback_listener(listener: TcpListener, cache: Arc<TimestampCache>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    if let Err(error) = handle_push(stream, &cache).await {
                        warn!(%peer, %error, "failed to receive async result");
                    }
                });
            }
            Err(error) => warn!(%error, "failed to accept async result connection"),
        }
    }
}

async fn handle_push(stream: TcpStream, cache: &TimestampCache) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    match read_message::<_, Message>(&mut reader).await? {
        Some(Message::GetOk {
            key,
            value,
            timestamp,
        }) => {
            cache.observe(&key, timestamp);
            write_stdout(&format!("get {key} = {value} (ts {timestamp}, async)")).await?;
        }
        Some(other) => warn!(message = ?other, "unexpected message on callback listener"),
        None => {}
    }
    Ok(())
}

/// Interactive client loop: bind the callback listener, then read commands
/// from stdin until EXIT or EOF.
pub async fn run(args: ClientArgs) -> Result<()> {
    let listener = TcpListener::bind(args.callback)
        .await
        .with_context(|| format!("failed to bind callback listener on {}", args.callback))?;
    let callback = listener.local_addr()?;
    info!("callback listener on {callback}");

    let cache = Arc::new(TimestampCache::new());
    tokio::spawn(run_callback_listener(listener, Arc::clone(&cache)));

    let session = Session::new(args.servers, Arc::clone(&cache), callback)?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        if stdin.read_line(&mut input).await? == 0 {
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        match ConsoleCommand::parse(line) {
            Ok(command) => {
                if !execute(&session, command).await? {
                    break;
                }
            }
            Err(error) => write_stdout(&format!("{error:#}")).await?,
        }
    }

    Ok(())
}

async fn execute(session: &Session, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Put { key, value } => {
            match session.put(&key, &value).await {
                Ok(outcome) => {
                    write_stdout(&format!(
                        "put_ok {key} = {value} (ts {}, server {})",
                        outcome.timestamp, outcome.server
                    ))
                    .await?
                }
                Err(error) => write_stdout(&format!("put of {key} failed: {error:#}")).await?,
            }
            Ok(true)
        }
        ConsoleCommand::Get { key } => {
            match session.get(&key).await {
                Ok(GetOutcome::Value {
                    value,
                    timestamp,
                    server,
                }) => {
                    write_stdout(&format!(
                        "get {key} = {value} (ts {timestamp}, server {server})"
                    ))
                    .await?
                }
                Ok(GetOutcome::Pending { server }) => {
                    write_stdout(&format!(
                        "get {key} pending: server {server} will answer asynchronously"
                    ))
                    .await?
                }
                Err(error) => write_stdout(&format!("get of {key} failed: {error:#}")).await?,
            }
            Ok(true)
        }
        ConsoleCommand::Help => {
            write_stdout(HELP).await?;
            Ok(true)
        }
        ConsoleCommand::Exit => Ok(false),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_defaults_to_zero() {
        let cache = TimestampCache::new();
        assert_eq!(cache.last_seen("never"), 0);
    }

    #[test]
    fn cache_never_regresses() {
        let cache = TimestampCache::new();
        cache.observe("a", 10);
        cache.observe("a", 7);
        assert_eq!(cache.last_seen("a"), 10);

        cache.observe("a", 12);
        assert_eq!(cache.last_seen("a"), 12);
    }

    #[test]
    fn session_requires_servers() {
        let cache = Arc::new(TimestampCache::new());
        let callback = "127.0.0.1:20000".parse().unwrap();
        assert!(Session::new(Vec::new(), cache, callback).is_err());
    }
}
