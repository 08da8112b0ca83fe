//! mesh-ctl: command-line interface for the mesh daemon.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: mesh-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                          Show node state, connections and routing stats");
    println!("  peers                           List connections, reconnects and unreachable peers");
    println!("  topology                        Show this node and its neighbours");
    println!("  messages [--since <ms>]         List received messages");
    println!("  send <text> [--urgency <level>] Broadcast a message (LOW|MEDIUM|HIGH)");
    println!("  connect <peer-id>               Connect to a peer");
    println!("  drop <peer-id>                  Close the connection to a peer");
    println!("  shutdown                        Leave the mesh and stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

/// Pull `--flag <value>` out of `args`, returning the value if present.
fn take_option(args: &mut Vec<String>, flag: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        anyhow::bail!("{} requires a value", flag);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let port = match take_option(&mut args, "--port")? {
        Some(p) => p.parse().context("--port must be a number")?,
        None => DEFAULT_PORT,
    };
    let since = match take_option(&mut args, "--since")? {
        Some(s) => Some(s.parse::<i64>().context("--since must be unix milliseconds")?),
        None => None,
    };
    let urgency = take_option(&mut args, "--urgency")?.unwrap_or_else(|| "MEDIUM".to_string());

    let remaining: Vec<&str> = args.iter().map(String::as_str).collect();

    match remaining.as_slice() {
        ["status"] | []                => cmd::status::cmd_status(port).await,
        ["peers"]                      => cmd::peers::cmd_peers(port).await,
        ["topology"]                   => cmd::status::cmd_topology(port).await,
        ["messages"]                   => cmd::messages::cmd_messages(port, since).await,
        ["send", text @ ..] if !text.is_empty() => {
            cmd::messages::cmd_send(port, &text.join(" "), &urgency.to_uppercase()).await
        }
        ["connect", peer]              => cmd::peers::cmd_connect(port, peer).await,
        ["drop", peer]                 => cmd::peers::cmd_drop(port, peer).await,
        ["shutdown"]                   => cmd::status::cmd_shutdown(port).await,
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
