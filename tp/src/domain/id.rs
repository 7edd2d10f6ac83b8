//! Identifier and timestamp helpers
//!
//! Continuation token IDs use the format `{8-hex}-{8-hex}-{kind}-{scope}`,
//! e.g. `01943a7c-5e0f9a12-clarify-ch3`. Both hex parts come from a v7 UUID:
//! the prefix sorts by creation time, the suffix is random.

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a token ID for an interrupt kind and scope
pub fn generate_token_id(kind: &str, scope: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    // Skip the timestamp's leading bits so consecutive tokens differ within the prefix
    let suffix = &uuid[uuid.len() - 8..];
    format!("{}-{}-{}-{}", &uuid[..8], suffix, kind, slugify(scope))
}

/// Slugify a scope for use in IDs
fn slugify(scope: &str) -> String {
    scope
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
