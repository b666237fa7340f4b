//! Token accounting.
//!
//! A "token" here is a budget unit derived from character length, not a
//! tokenizer output: every four characters cost one token, rounded up.

/// Maximum total token cost a single owner's collection may hold.
pub const TOKEN_BUDGET: usize = 1_000_000;

const CHARS_PER_TOKEN: usize = 4;

/// Token cost of `text`: `ceil(chars / 4)`. Empty text costs nothing.
pub fn count_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Human-readable token count (`1.5M`, `12.3K`, `999`). Display only.
pub fn format_token_count(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
