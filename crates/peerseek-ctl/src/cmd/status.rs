//! Daemon status, peers, events and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    me: Option<PeerInfo>,
    connected: usize,
    disconnected: usize,
    potential: usize,
    stats: ConnectStats,
    indexed_documents: u64,
    indexed_words: u64,
}

#[derive(Deserialize)]
struct ConnectStats {
    senior_connects: u64,
    principal_connects: u64,
    disconnects: u64,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct PeerInfo {
    id: String,
    name: String,
    peer_type: String,
    addresses: Vec<String>,
    port: u16,
    last_seen: i64,
    age_days: i64,
    ssl: bool,
    word_count: u64,
    link_count: u64,
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct PeersResponse {
    state: String,
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
struct EventsResponse {
    events: Vec<PeerEvent>,
}

#[derive(Deserialize)]
struct PeerEvent {
    kind: String,
    peer: String,
    name: String,
    detail: String,
    at: i64,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  peerseek Node Status");
    println!("═══════════════════════════════════════");
    match &resp.me {
        Some(me) => {
            println!("  Peer id          : {}", me.id);
            println!("  Name             : {}", me.name);
            println!("  Type             : {}", me.peer_type);
            println!("  Addresses        : {}", addresses(me));
        }
        None => println!("  Identity         : not initialised"),
    }
    println!("  Connected peers  : {}", resp.connected);
    println!("  Disconnected     : {}", resp.disconnected);
    println!("  Potential        : {}", resp.potential);
    println!(
        "  Connects         : {} senior, {} principal, {} disconnects",
        resp.stats.senior_connects, resp.stats.principal_connects, resp.stats.disconnects
    );
    println!("  Local documents  : {}", resp.indexed_documents);
    println!("  Local words      : {}", resp.indexed_words);

    Ok(())
}

pub async fn cmd_peers(port: u16, state: &str) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers?state={}", base_url(port), state)).await?;

    if resp.peers.is_empty() {
        println!("No {} peers.", resp.state);
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  {} Peers ({})", capitalize(&resp.state), resp.peers.len());
    println!("═══════════════════════════════════════");

    for p in &resp.peers {
        println!("  ┌─ {} {}", p.id, p.name);
        println!("  │  type      : {}", p.peer_type);
        println!("  │  addresses : {}", addresses(p));
        println!("  │  age       : {} days", p.age_days);
        println!("  │  documents : {}", p.link_count);
        println!("  └─ last seen : {}", p.last_seen);
    }

    Ok(())
}

pub async fn cmd_events(port: u16) -> Result<()> {
    let resp: EventsResponse = get_json(&format!("{}/events", base_url(port))).await?;

    if resp.events.is_empty() {
        println!("No peer events yet.");
        return Ok(());
    }
    for e in &resp.events {
        println!("{}  {:<9} {} {} ({})", e.at, e.kind, e.peer, e.name, e.detail);
    }
    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct ShutdownResponse {
        message: String,
    }

    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}

fn addresses(p: &PeerInfo) -> String {
    if p.addresses.is_empty() {
        return "none".to_string();
    }
    p.addresses
        .iter()
        .map(|a| if a.contains(':') { format!("[{}]:{}", a, p.port) } else { format!("{}:{}", a, p.port) })
        .collect::<Vec<_>>()
        .join(", ")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
