//! CLI command modules.

pub mod http;
pub mod messages;
pub mod peers;
pub mod status;

/// First `n` characters of an identifier, for compact display.
pub fn short(id: &str, n: usize) -> &str {
    match id.char_indices().nth(n) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}
