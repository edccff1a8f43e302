//! `gossiper`: the node binary (spec §6 "CLI surface (gossiper)").

use std::sync::Arc;

use clap::Parser;
use peerchain::{
  cli::CliOpts,
  config::Config,
  node::Node,
  rpc,
  transport::UdpTransport,
};
use tracing::{info, Level};
use tracing_subscriber::{prelude::*, util::SubscriberInitExt};

fn build_config(opts: &CliOpts) -> anyhow::Result<Arc<Config>> {
  if opts.name.trim().is_empty() {
    anyhow::bail!("--name must be non-empty");
  }
  let gossip_addr = opts.gossip_addr.parse()?;
  let bootstrap_peers = opts.bootstrap_peers()?;

  Ok(Arc::new(Config {
    name: opts.name.clone(),
    gossip_addr,
    ui_port: opts.ui_port,
    bootstrap_peers,
    anti_entropy: opts.anti_entropy(),
    rtimer: opts.rtimer(),
    cluster_size: opts.cluster_size(),
    stubborn_timeout: opts.stubborn_timeout(),
    hop_limit: opts.hop_limit,
    mode: opts.round_mode(),
    ack_timeout: Config::DEFAULT_ACK_TIMEOUT,
    mine_threshold: 1,
    seconds_per_block: Config::DEFAULT_SECONDS_PER_BLOCK,
    max_datagram: Config::MAX_DATAGRAM,
  }))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
  let opts = CliOpts::parse();

  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer())
    .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
    .init();

  let config = build_config(&opts)?;
  info!(name = %config.name, addr = %config.gossip_addr, mode = ?config.mode, "starting gossiper");

  let transport = UdpTransport::bind(config.gossip_addr, config.max_datagram).await?;
  let node = Node::new(config.clone(), Arc::new(transport));

  let ui_port = config.ui_port;
  let app = rpc::router(node.clone());
  let http_addr = std::net::SocketAddr::from(([127, 0, 0, 1], ui_port));
  tokio::spawn(async move {
    if let Err(err) = axum::Server::bind(&http_addr).serve(app.into_make_service()).await {
      tracing::error!(%err, "HTTP read-model server failed");
    }
  });

  node.run().await;
  Ok(())
}
