/// Milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// RFC 3339 timestamp for the current instant.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Truncate to at most `max` chars, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clocks_agree() {
        let ms = now_ms();
        let parsed = chrono::DateTime::parse_from_rfc3339(&now_rfc3339()).unwrap().timestamp_millis() as u64;
        assert!(parsed >= ms && parsed - ms < 5_000);
    }

    #[test]
    fn truncate_short_text_untouched() {
        assert_eq!(truncate_chars("abc", 5), "abc");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("ééééé", 2), "éé…");
    }
}
