use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::{
    message::{self, Message},
    node::NodeState,
};

/// The leader's write path: assign the next timestamp, apply locally, then
/// replicate to every follower in turn, blocking for each acknowledgment.
///
/// Returns the assigned timestamp only if every follower acknowledged.
/// Anything less leaves the caller unconfirmed even though the write landed
/// on the leader and on whichever followers did ack.
pub(crate) async fn coordinate(
    state: &NodeState,
    followers: &[SocketAddr],
    key: &str,
    value: &str,
) -> Option<u64> {
    let timestamp = state.clock.next();
    state.store.write(key.to_string(), value.to_string(), timestamp);

    let update = Message::Replication {
        key: key.to_string(),
        value: value.to_string(),
        timestamp,
    };

    let mut acks = 0;
    for follower in followers {
        if !state.replication_delay.is_zero() {
            debug!(%follower, delay = ?state.replication_delay, "delaying replication send");
            tokio::time::sleep(state.replication_delay).await;
        }

        debug!(%follower, %key, timestamp, "sending REPLICATION");
        match message::request(*follower, &update).await {
            Ok(Some(Message::ReplicationOk { .. })) => {
                debug!(%follower, %key, "REPLICATION_OK received");
                acks += 1;
            }
            Ok(reply) => warn!(%follower, reply = ?reply, "unexpected replication reply"),
            Err(error) => warn!(%follower, %error, "replication failed"),
        }
    }

    if acks == followers.len() {
        Some(timestamp)
    } else {
        warn!(
            %key,
            acks,
            followers = followers.len(),
            "write not confirmed: missing replication acks"
        );
        None
    }
}
