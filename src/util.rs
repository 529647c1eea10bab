//! Size and time formatting shared by the CLI, the search and reports.

use time::format_description::well_known::Rfc3339;

pub const MIB: f64 = 1024.0 * 1024.0;

/// Current UTC time as RFC 3339, truncated to whole seconds.
pub fn timestamp() -> String {
    let now = time::OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Megabytes (1024 * 1024) to bytes, rounded down.
pub fn mb_to_bytes(mb: f64) -> u64 {
    if !mb.is_finite() || mb <= 0.0 {
        return 0;
    }
    (mb * MIB) as u64
}

pub fn fmt_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / MIB)
}
