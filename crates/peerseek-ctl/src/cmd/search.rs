//! Remote search, ping and local indexing commands.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

use super::http::{base_url, post_json_body};

#[derive(Deserialize)]
struct SearchOutcome {
    items: Vec<Item>,
    topics: BTreeMap<String, u64>,
    reports: Vec<Report>,
    timed_out: bool,
    elapsed_ms: u64,
}

#[derive(Deserialize)]
struct Item {
    origin: String,
    url: String,
    title: String,
}

#[derive(Deserialize)]
struct Report {
    peer: String,
    kind: String,
    status: String,
}

#[derive(Deserialize)]
struct PingResponse {
    addr: String,
    learned: usize,
}

#[derive(Deserialize)]
struct IndexResponse {
    url_hash: String,
    documents: u64,
}

pub async fn cmd_search(port: u16, query: &str, count: usize) -> Result<()> {
    let resp: SearchOutcome = post_json_body(
        &format!("{}/search", base_url(port)),
        &json!({ "query": query, "count": count }),
    )
    .await?;

    let answered = resp.reports.iter().filter(|r| r.status == "success").count();
    println!(
        "{} results from {}/{} peers in {} ms{}",
        resp.items.len(),
        answered,
        resp.reports.len(),
        resp.elapsed_ms,
        if resp.timed_out { " (deadline reached)" } else { "" }
    );
    for (i, item) in resp.items.iter().enumerate() {
        println!("{:>3}. {}", i + 1, if item.title.is_empty() { &item.url } else { &item.title });
        println!("     {}  [{}]", item.url, item.origin);
    }

    let mut topics: Vec<_> = resp.topics.into_iter().collect();
    topics.sort_by(|a, b| b.1.cmp(&a.1));
    if !topics.is_empty() {
        let top: Vec<String> = topics.iter().take(10).map(|(w, _)| w.clone()).collect();
        println!("\nTopics: {}", top.join(", "));
    }

    for r in resp.reports.iter().filter(|r| r.status != "success") {
        println!("  {} ({}): {}", r.peer, r.kind, r.status);
    }
    Ok(())
}

pub async fn cmd_ping(port: u16, addr: &str) -> Result<()> {
    let resp: PingResponse =
        post_json_body(&format!("{}/peers/ping", base_url(port)), &json!({ "addr": addr })).await?;
    println!("{} answered, {} peers learned", resp.addr, resp.learned);
    Ok(())
}

pub async fn cmd_index(port: u16, url: &str, title: &str, text: &str) -> Result<()> {
    let resp: IndexResponse = post_json_body(
        &format!("{}/index", base_url(port)),
        &json!({ "url": url, "title": title, "text": text }),
    )
    .await?;
    println!("Indexed {} ({} documents)", resp.url_hash, resp.documents);
    Ok(())
}
