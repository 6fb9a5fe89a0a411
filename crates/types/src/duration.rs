//! Duration parsing for configuration values.

use std::time::Duration;

/// Parses durations such as `"250ms"`, `"10s"`, `"2m"`, `"1h"`, or `"1m30s"`.
///
/// A bare number is treated as seconds. Returns `None` for empty or malformed input.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut remaining = trimmed;
    while !remaining.is_empty() {
        let digits_end = remaining.find(|character: char| !character.is_ascii_digit()).unwrap_or(remaining.len());
        if digits_end == 0 {
            return None;
        }
        let amount: u64 = remaining[..digits_end].parse().ok()?;
        let rest = &remaining[digits_end..];
        let unit_end = rest.find(|character: char| character.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let part = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        remaining = &rest[unit_end..];
    }
    Some(total)
}
