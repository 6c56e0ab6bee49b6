use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use replikv::{
    cli::{Cli, Command},
    client,
    node::Node,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = args.node_config()?;
            let listener = TcpListener::bind(args.listen).await?;
            let node = Node::new(listener, config);
            info!("{} node listening on {}", node.role_name(), node.local_addr()?);
            node.run().await?;
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
