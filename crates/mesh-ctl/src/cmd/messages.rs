//! Messaging commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json_body};
use super::short;

#[derive(Deserialize)]
struct MessagesResponse {
    messages: Vec<MessageJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageJson {
    id: String,
    message: String,
    urgency: String,
    timestamp: String,
    sender_id: String,
    #[serde(default)]
    route: Vec<String>,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    message: &'a str,
    urgency: &'a str,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    id: String,
    timestamp: i64,
    urgency: String,
}

pub async fn cmd_messages(port: u16, since: Option<i64>) -> Result<()> {
    let url = match since {
        Some(ms) => format!("{}/messages?since={}", base_url(port), ms),
        None => format!("{}/messages", base_url(port)),
    };
    let resp: MessagesResponse = get_json(&url).await?;

    if resp.messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Messages ({})", resp.messages.len());
    println!("═══════════════════════════════════════");
    for m in &resp.messages {
        println!("  ┌─ {} [{}]", m.urgency, m.timestamp);
        println!("  │  from : {}", short(&m.sender_id, 16));
        println!("  │  id   : {}...", short(&m.id, 16));
        println!("  │  hops : {}", m.route.len().saturating_sub(1));
        println!("  └─ {}", m.message);
    }
    Ok(())
}

pub async fn cmd_send(port: u16, text: &str, urgency: &str) -> Result<()> {
    let req = SendMessageRequest {
        message: text,
        urgency,
    };
    let resp: SendMessageResponse =
        post_json_body(&format!("{}/messages/send", base_url(port)), &req).await?;

    println!("Message sent:");
    println!("  id        : {}", resp.id);
    println!("  urgency   : {}", resp.urgency);
    println!("  timestamp : {}", resp.timestamp);
    Ok(())
}
