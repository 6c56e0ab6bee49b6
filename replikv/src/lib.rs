//! Replicated key-value store with a statically-configured leader.
//!
//! One leader and any number of followers serve a PUT/GET protocol over
//! newline-delimited JSON, one TCP connection per request. The leader
//! timestamps and applies each write, replicates it synchronously to every
//! follower, and confirms the writer only once all of them acked. Any node
//! serves reads from its own replica: a client states the freshest
//! timestamp it has seen for the key, and a node that cannot meet it parks
//! the read and pushes the answer over a new connection once it catches up.
//!
//! Each module covers one responsibility:
//!
//! - [`cli`] parses the command-line interface for both roles.
//! - [`message`] is the wire protocol: the message envelope, line framing,
//!   and one-shot connection helpers.
//! - [`store`] holds a node's key/value/timestamp records.
//! - [`pending`] tracks reads waiting for a fresher write.
//! - [`clock`] hands the leader strictly-increasing write timestamps.
//! - [`node`] is the server: accept loop, request dispatch, and the GET
//!   and replication-apply handlers shared by both roles.
//! - [`replication`] is the leader's synchronous fan-out to followers.
//! - [`console`] parses the client REPL commands.
//! - [`client`] is the client session: timestamp cache, random server
//!   choice, and the callback listener for asynchronous results.
//!
//! Integration tests spawn whole clusters in-process and drive them over
//! real sockets.

pub mod cli;
pub mod client;
pub mod clock;
pub mod console;
pub mod message;
pub mod node;
pub mod pending;
mod replication;
pub mod store;
