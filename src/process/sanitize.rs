/// Scrub a text cell for storage: control characters become spaces,
/// whitespace runs collapse to a single space, ends trimmed.
pub fn clean_text(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Aggressive variant for payloads the store rejects on an encoding
/// condition: anything outside printable ASCII becomes a space before
/// the usual collapse.
pub fn printable_only(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_and_trims() {
        assert_eq!(clean_text("  Walla  Walla \t College\n"), "Walla Walla College");
        assert_eq!(clean_text("plain"), "plain");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn clean_text_keeps_non_ascii() {
        assert_eq!(clean_text("Universidad Interamericana\u{00e9}"), "Universidad Interamericana\u{00e9}");
    }

    #[test]
    fn clean_text_drops_embedded_controls() {
        assert_eq!(clean_text("A\u{0000}B\u{0007}C"), "A B C");
    }

    #[test]
    fn printable_only_strips_non_ascii() {
        assert_eq!(printable_only("caf\u{00e9} news"), "caf news");
        assert_eq!(printable_only("ok text"), "ok text");
    }
}
