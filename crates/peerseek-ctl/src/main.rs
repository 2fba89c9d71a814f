//! peerseek-ctl — command-line interface for the peerseek daemon.

mod cmd;

use anyhow::{Context, Result};

use cmd::search::{cmd_index, cmd_ping, cmd_search};
use cmd::status::{cmd_events, cmd_peers, cmd_shutdown, cmd_status};

const DEFAULT_PORT: u16 = 9091;
const DEFAULT_COUNT: usize = 20;

fn print_usage() {
    println!("Usage: peerseek-ctl [--port <port>] [--count <n>] <command>");
    println!();
    println!("Commands:");
    println!("  status                       Show node identity and peer counts");
    println!("  peers [state]                List connected, disconnected or potential peers");
    println!("  events                       Show recent peer arrivals and departures");
    println!("  search <words...>            Run a remote search");
    println!("  ping <host:port>             Say hello to a peer");
    println!("  index <url> <title> [text]   Add a document to the local index");
    println!("  shutdown                     Stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
    println!("  --count <n>     Results wanted by search (default: {})", DEFAULT_COUNT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut count = DEFAULT_COUNT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--count" => {
                i += 1;
                count = args
                    .get(i)
                    .context("--count requires a value")?
                    .parse()
                    .context("--count must be a number")?;
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(port).await,
        ["peers"] => cmd_peers(port, "connected").await,
        ["peers", state] => cmd_peers(port, state).await,
        ["events"] => cmd_events(port).await,
        ["search", words @ ..] if !words.is_empty() => cmd_search(port, &words.join(" "), count).await,
        ["ping", addr] => cmd_ping(port, addr).await,
        ["index", url, title] => cmd_index(port, url, title, "").await,
        ["index", url, title, text @ ..] => cmd_index(port, url, title, &text.join(" ")).await,
        ["shutdown"] => cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }
}
