pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod users;

use chrono::{DateTime, Utc};
use tracing::warn;

/// Parse a stored timestamp. SQLite defaults write "YYYY-MM-DD HH:MM:SS"
/// without a timezone while message rows carry RFC 3339; accept both.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
