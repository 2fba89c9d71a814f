//! Two real nodes talking HTTP over loopback.

use serde_json::{json, Value};

use peerseek_services::search::TaskOutcome;
use peerseek_services::{HealthSignals, PeerState, SearchQuery};

use crate::*;

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn get(url: &str) -> (u16, Value) {
    let resp = client().get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

async fn post(url: &str, body: Value) -> (u16, Value) {
    let resp = client().post(url).json(&body).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_two_nodes_hello_then_search() {
    let a = spawn_node("alpha", 1).await.unwrap();
    let b = spawn_node("beta", 2).await.unwrap();
    b.state
        .index
        .add_document("http://rust-lang.org/", "Rust language", "fearless concurrency");

    // a greets b through its control API; both end up connected
    let (status, body) = post(&format!("{}/peers/ping", a.api_base), json!({ "addr": b.peer_addr.to_string() })).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["learned"], 0);
    assert_eq!(a.state.registry.state_of(&b.id()), Some(PeerState::Connected));
    assert_eq!(b.state.registry.state_of(&a.id()), Some(PeerState::Connected));

    let outcome = a
        .state
        .search
        .search_with(SearchQuery::new("rust", 10), HealthSignals::default())
        .await;
    assert!(!outcome.timed_out);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].item.url, "http://rust-lang.org/");
    assert_eq!(outcome.items[0].origin, b.id());
    assert!(outcome
        .reports
        .iter()
        .any(|r| r.peer == b.id() && matches!(r.outcome, TaskOutcome::Success { accepted: 1, .. })));
    assert_eq!(a.state.registry.get(&b.id()).unwrap().counters().url_sent, 1);
    assert_eq!(b.state.registry.my_seed().unwrap().counters().url_sent, 1);

    let (status, body) = get(&format!("{}/status", a.api_base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["connected"], 1);
    assert_eq!(body["me"]["name"], "alpha");

    let (_, body) = get(&format!("{}/events", b.api_base)).await;
    assert_eq!(body["events"][0]["peer"], a.id().to_string());
    assert_eq!(body["events"][0]["detail"], "direct");
}

#[tokio::test]
async fn test_control_api_rejects_bad_input() {
    let a = spawn_node("gamma", 3).await.unwrap();

    let (status, _) = get(&format!("{}/peers?state=bogus", a.api_base)).await;
    assert_eq!(status, 400);
    let (status, _) = post(&format!("{}/search", a.api_base), json!({ "query": "  ?! " })).await;
    assert_eq!(status, 400);
    let (status, _) = post(&format!("{}/peers/ping", a.api_base), json!({ "addr": "nowhere" })).await;
    assert_eq!(status, 400);

    let (status, body) = post(
        &format!("{}/index", a.api_base),
        json!({ "url": "http://example.org/", "title": "Example", "text": "two words" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["documents"], 1);
    assert_eq!(a.state.registry.my_seed().unwrap().link_count, 1);

    let mut shutdown = a.state.shutdown_tx.subscribe();
    let (status, _) = post(&format!("{}/daemon/shutdown", a.api_base), json!({})).await;
    assert_eq!(status, 200);
    assert!(shutdown.recv().await.is_ok());
}
