use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::{Args, Parser, Subcommand};

use crate::node::{NodeConfig, Role};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one server node, as the leader or as a follower.
    Server(ServerArgs),
    /// Run the interactive client.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address this node binds. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:10097")]
    pub listen: SocketAddr,

    /// Make this node the leader. Exactly one node per deployment.
    #[arg(long)]
    pub leader: bool,

    /// Follower address, repeatable. Leader only.
    #[arg(long = "follower")]
    pub followers: Vec<SocketAddr>,

    /// Address of the leader. Follower only.
    #[arg(long)]
    pub leader_addr: Option<SocketAddr>,

    /// Pause in milliseconds before each replication send. Test
    /// instrumentation for exercising the asynchronous read path.
    #[arg(long, default_value_t = 0)]
    pub replication_delay_ms: u64,
}

impl ServerArgs {
    pub fn node_config(&self) -> Result<NodeConfig> {
        let role = if self.leader {
            ensure!(
                self.leader_addr.is_none(),
                "--leader-addr only applies to followers"
            );
            ensure!(
                !self.followers.is_empty(),
                "a leader needs at least one --follower"
            );
            Role::Leader {
                followers: self.followers.clone(),
            }
        } else {
            ensure!(
                self.followers.is_empty(),
                "--follower only applies to the leader"
            );
            let leader = self
                .leader_addr
                .context("a follower needs --leader-addr")?;
            Role::Follower { leader }
        };

        Ok(NodeConfig {
            role,
            replication_delay: Duration::from_millis(self.replication_delay_ms),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Server address, repeatable; operations pick one at random.
    #[arg(long = "server", required = true)]
    pub servers: Vec<SocketAddr>,

    /// Address to bind for asynchronous GET results. Use port 0 for an
    /// ephemeral port.
    #[arg(long, default_value = "127.0.0.1:0")]
    pub callback: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_args(leader: bool) -> ServerArgs {
        ServerArgs {
            listen: "127.0.0.1:10097".parse().unwrap(),
            leader,
            followers: Vec::new(),
            leader_addr: None,
            replication_delay_ms: 0,
        }
    }

    #[test]
    fn leader_requires_followers() {
        let args = server_args(true);
        assert!(args.node_config().is_err());

        let mut args = server_args(true);
        args.followers = vec!["127.0.0.1:10098".parse().unwrap()];
        assert!(matches!(
            args.node_config().unwrap().role,
            Role::Leader { ref followers } if followers.len() == 1
        ));
    }

    #[test]
    fn follower_requires_leader_addr() {
        let args = server_args(false);
        assert!(args.node_config().is_err());

        let mut args = server_args(false);
        args.leader_addr = Some("127.0.0.1:10097".parse().unwrap());
        assert!(matches!(
            args.node_config().unwrap().role,
            Role::Follower { .. }
        ));
    }

    #[test]
    fn role_flags_are_mutually_exclusive() {
        let mut args = server_args(true);
        args.followers = vec!["127.0.0.1:10098".parse().unwrap()];
        args.leader_addr = Some("127.0.0.1:10099".parse().unwrap());
        assert!(args.node_config().is_err());

        let mut args = server_args(false);
        args.followers = vec!["127.0.0.1:10098".parse().unwrap()];
        assert!(args.node_config().is_err());
    }
}
