//! Responder - serve a few named objects on the multicast group.
//!
//! This example demonstrates:
//! - Filling a `LocalRegistry` with identity → reference entries
//! - Starting a `Responder` from a `DiscoveryConfig`
//! - Stopping it cleanly on Ctrl-C
//!
//! # Running
//!
//! ```text
//! RUST_LOG=multicast_lookup=debug cargo run --example responder -- printer-1=10.0.0.3:9000
//! ```
//!
//! Pass `--config path.json` to override group, port and the rest.

use std::sync::Arc;

use multicast_lookup::{DiscoveryConfig, LocalRegistry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = DiscoveryConfig::default();
    let registry = Arc::new(LocalRegistry::new());

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().ok_or("--config needs a path")?;
            config = DiscoveryConfig::from_json_file(path)?;
        } else if let Some((identity, reference)) = arg.split_once('=') {
            registry.register(identity, reference);
        } else {
            return Err(format!("expected identity=reference, got {:?}", arg).into());
        }
    }

    if registry.is_empty() {
        registry.register("demo-object", "127.0.0.1:9000");
    }

    let responder = config.responder_builder().shared_resolver(registry).start()?;
    println!(
        "responder {} listening on {}:{}",
        responder.responder_id(),
        config.multicast.group,
        config.multicast.port
    );

    tokio::signal::ctrl_c().await?;

    let stats = responder.stats();
    responder.stop().await?;
    println!(
        "served {} requests, {} replies sent",
        stats.requests, stats.replies_sent
    );

    Ok(())
}
