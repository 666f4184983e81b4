//! Lookup - ask the group who provides an object.
//!
//! This example demonstrates:
//! - Binding a `Requester`
//! - Running a lookup with retries
//! - Reading per-responder results
//!
//! # Running
//!
//! Start the `responder` example first, then:
//!
//! ```text
//! cargo run --example lookup -- printer-1
//! ```

use std::time::Duration;

use multicast_lookup::{LookupOptions, Requester};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let subject = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demo-object".to_string());

    let requester = Requester::builder().bind()?;
    let options = LookupOptions::new(Duration::from_millis(300), 3);

    let found = requester.lookup_detailed(subject.as_str(), &options).await?;
    if found.is_empty() {
        println!("nobody provides {}", subject);
    }
    for discovery in &found {
        println!("{} -> {}", discovery.responder_id, discovery.reference);
    }

    let stats = requester.stats();
    println!(
        "{} broadcast(s), {} duplicate(s), {} stale",
        stats.broadcasts, stats.duplicate_replies, stats.stale_replies
    );
    requester.close().await;

    Ok(())
}
