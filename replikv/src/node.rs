use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{
    clock::WriteClock,
    message::{self, Message, read_message, write_message},
    pending::{PendingRead, PendingReads},
    replication,
    store::Store,
};

/// Role fixed at startup. Leaders originate and order writes; followers
/// forward writes to the leader and serve reads from their own replica.
#[derive(Debug, Clone)]
pub enum Role {
    Leader { followers: Vec<SocketAddr> },
    Follower { leader: SocketAddr },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Leader { .. } => "leader",
            Role::Follower { .. } => "follower",
        }
    }
}

pub struct NodeConfig {
    pub role: Role,
    /// Pause before each replication send. Test instrumentation for holding
    /// the pending-read window open; zero in normal operation.
    pub replication_delay: Duration,
}

/// A server process: accepts one request per connection and dispatches it.
/// Leader and follower share the GET and replication-apply paths and differ
/// only in how they handle PUT.
pub struct Node {
    listener: TcpListener,
    state: Arc<NodeState>,
}

pub(crate) struct NodeState {
    pub(crate) role: Role,
    pub(crate) store: Store,
    pub(crate) pending: PendingReads,
    pub(crate) clock: WriteClock,
    pub(crate) replication_delay: Duration,
}

impl Node {
    pub fn new(listener: TcpListener, config: NodeConfig) -> Self {
        Self {
            listener,
            state: Arc::new(NodeState {
                role: config.role,
                store: Store::new(),
                pending: PendingReads::new(),
                clock: WriteClock::new(),
                replication_delay: config.replication_delay,
            }),
        }
    }

    pub fn role_name(&self) -> &'static str {
        self.state.role.name()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; runs until the process is terminated. A failed
    /// connection never stops the loop.
    pub async fn run(self) -> Result<()> {
        let Node { listener, state } = self;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => spawn_request_handler(stream, peer, &state),
                Err(error) => warn!(%error, "failed to accept connection"),
            }
        }
    }
}

fn spawn_request_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<NodeState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(error) = handle_connection(stream, state).await {
            warn!(%peer, error = ?error, "connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, state: Arc<NodeState>) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = match read_message::<_, Message>(&mut reader).await? {
        Some(message) => message,
        None => return Ok(()),
    };

    match request {
        Message::Put { key, value } => handle_put(&state, &mut writer, peer, key, value).await,
        Message::Get {
            key,
            timestamp,
            client_ip,
            client_port,
        } => handle_get(&state, &mut writer, key, timestamp, &client_ip, client_port).await,
        Message::Replication {
            key,
            value,
            timestamp,
        } => handle_replication(&state, &mut writer, key, value, timestamp).await,
        other => {
            warn!(?peer, request = ?other, "unexpected request type, closing without response");
            Ok(())
        }
    }
}

/// Leader: order, apply, replicate, confirm only on full acknowledgment.
/// Follower: relay to the leader and pass the outcome through.
async fn handle_put<W>(
    state: &NodeState,
    writer: &mut W,
    peer: Option<SocketAddr>,
    key: String,
    value: String,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match &state.role {
        Role::Leader { followers } => {
            info!(?peer, %key, %value, "PUT received");
            if let Some(timestamp) =
                replication::coordinate(state, followers, &key, &value).await
            {
                let confirmation = Message::PutOk {
                    key: key.clone(),
                    value: value.clone(),
                    timestamp,
                };
                write_message(writer, &confirmation).await?;
                info!(%key, timestamp, "PUT confirmed");
                drain_and_push(state, &key, &value, timestamp).await;
            }
            // On partial replication no response is written; the caller sees
            // the connection close without a confirmation. The write already
            // landed here and on any follower that acked.
            Ok(())
        }
        Role::Follower { leader } => {
            info!(%key, %value, %leader, "forwarding PUT to leader");
            let response = match message::request(*leader, &Message::Put { key, value }).await {
                Ok(Some(reply)) => reply,
                Ok(None) => Message::PutFail,
                Err(error) => {
                    warn!(%leader, %error, "failed to forward PUT to leader");
                    Message::PutFail
                }
            };
            write_message(writer, &response).await?;
            Ok(())
        }
    }
}

/// Served from the local replica on every node. The client's timestamp is
/// the freshness bar: meet it or park the read.
async fn handle_get<W>(
    state: &NodeState,
    writer: &mut W,
    key: String,
    client_timestamp: u64,
    client_ip: &str,
    client_port: u16,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let callback: SocketAddr = format!("{client_ip}:{client_port}")
        .parse()
        .with_context(|| format!("bad callback address {client_ip}:{client_port}"))?;

    let local = state.store.read(&key);
    let local_timestamp = local.as_ref().map(|r| r.timestamp).unwrap_or(0);

    let response = match local {
        Some(record) if record.timestamp >= client_timestamp => Message::GetOk {
            key: key.clone(),
            value: record.value,
            timestamp: record.timestamp,
        },
        // Neither the client nor this node has ever seen the key.
        None if client_timestamp == 0 => Message::GetOk {
            key: key.clone(),
            value: "NULL".into(),
            timestamp: 0,
        },
        // The client knows a fresher value than this replica holds.
        _ => park_read(state, &key, client_timestamp, callback, local_timestamp),
    };

    debug!(%key, client_timestamp, response = ?response, "GET answered");
    write_message(writer, &response).await?;
    Ok(())
}

/// Registers a pending read, then re-checks the store. A write landing
/// between the freshness check and the registration drains before the entry
/// exists; the re-check keeps that waiter from being stranded. If a
/// concurrent drain already claimed the entry, its push is in flight and the
/// caller is told to wait.
fn park_read(
    state: &NodeState,
    key: &str,
    client_timestamp: u64,
    callback: SocketAddr,
    local_timestamp: u64,
) -> Message {
    let entry = PendingRead {
        key: key.to_string(),
        client_timestamp,
        callback,
    };
    state.pending.register(entry.clone());

    if let Some(record) = state.store.read(key) {
        if record.timestamp >= client_timestamp && state.pending.remove(&entry) {
            return Message::GetOk {
                key: key.to_string(),
                value: record.value,
                timestamp: record.timestamp,
            };
        }
    }

    info!(%key, client_timestamp, %callback, "read parked until a fresher write lands");
    Message::WaitForResponse {
        key: key.to_string(),
        timestamp: local_timestamp,
    }
}

/// Applies a write relayed by the leader. Leader and follower share this
/// path, though in practice only followers receive it.
async fn handle_replication<W>(
    state: &NodeState,
    writer: &mut W,
    key: String,
    value: String,
    timestamp: u64,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    state.store.write(key.clone(), value.clone(), timestamp);
    info!(%key, %value, timestamp, "replicated write applied");

    let ack = Message::ReplicationOk {
        key: key.clone(),
        timestamp,
    };
    write_message(writer, &ack).await?;

    drain_and_push(state, &key, &value, timestamp).await;
    Ok(())
}

/// Pushes the applied write to every waiter parked on `key`. Waiters are
/// copied out under the registry lock; the pushes run without holding it.
/// Delivery is best effort: a failed push is logged and the waiter's GET is
/// simply lost, to be re-issued by the client.
async fn drain_and_push(state: &NodeState, key: &str, value: &str, timestamp: u64) {
    for waiter in state.pending.drain(key) {
        let result = Message::GetOk {
            key: key.to_string(),
            value: value.to_string(),
            timestamp,
        };
        match message::push(waiter.callback, &result).await {
            Ok(()) => info!(%key, timestamp, callback = %waiter.callback, "async GET_OK delivered"),
            Err(error) => {
                warn!(%key, callback = %waiter.callback, %error, "failed to push async read result")
            }
        }
    }
}
