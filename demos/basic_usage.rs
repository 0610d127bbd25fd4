// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic tiered-store usage example.
//!
//! Demonstrates:
//! 1. Connecting the remote (Redis), local (SQLite) and in-memory tiers
//! 2. Writing entries across the retention classes
//! 3. Checking existence and fetching entries back
//! 4. Inspecting the status snapshot and event stream
//! 5. Clean shutdown
//!
//! Redis is optional: if nothing listens on localhost:6379 the store
//! starts from the SQLite tier and everything below still works.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use tierkv::{DataTier, SetOptions, TierKvConfig, TieredStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Simple logging (no filter for simplicity)
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n=== tierkv: basic usage ===\n");

    // ── 1. Connect and initialize ────────────────────────────────────
    let config = TierKvConfig {
        remote_url: Some("redis://localhost:6379".into()),
        local_path: Some("sqlite:tierkv_demo.db?mode=rwc".into()),
        wal_path: Some("./tierkv_demo.wal".into()),
        remote_prefix: Some("tierkv:".into()),
        ..Default::default()
    };

    let store = Arc::new(TieredStore::connect(config).await?);
    let mut events = store.events();
    store.init().await?;

    let runner = store.clone();
    let scheduler = tokio::spawn(async move { runner.run().await });

    let status = store.status();
    println!("active tier: {} (index {})", status.active_tier_name, status.active_tier);

    // ── 2. Write entries across the retention classes ────────────────
    let entries = [
        ("session:alice", br#"{"cart":["book"]}"#.as_slice(), DataTier::Transient),
        ("config:app", br#"{"theme":"dark"}"#.as_slice(), DataTier::Staging),
        ("audit:2026-08", br#"{"events":42}"#.as_slice(), DataTier::Archive),
    ];
    for (key, value, tier) in &entries {
        store.set(key, value.to_vec(), SetOptions::tier(*tier)).await?;
        println!("set {key} ({tier})");
    }

    // ── 3. Existence checks and reads ────────────────────────────────
    println!("\nexists(session:alice) = {}", store.exists("session:alice").await?);
    println!("exists(session:nobody) = {}", store.exists("session:nobody").await?);

    for (key, _, _) in &entries {
        match store.get(key).await? {
            Some(value) => println!("get {key} -> {} bytes", value.len()),
            None => println!("get {key} -> not found"),
        }
    }

    let mut keys = store.keys(Some("session:*")).await?;
    keys.sort();
    println!("keys(session:*) = {keys:?}");

    // ── 4. Status and events ─────────────────────────────────────────
    let status = store.status();
    println!("\nstatus: {status}");
    while let Ok(event) = events.try_recv() {
        println!("event: {event:?}");
    }

    // ── 5. Clean shutdown ────────────────────────────────────────────
    store.close();
    scheduler.await?;
    println!("\nshutdown complete");

    // Demo files only; data in Redis survives for inspection
    let _ = std::fs::remove_file("./tierkv_demo.wal");
    let _ = std::fs::remove_file("./tierkv_demo.db");

    Ok(())
}
