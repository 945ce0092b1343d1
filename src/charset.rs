use std::borrow::Cow;

use deunicode::deunicode_with_tofu;
use encoding_rs::ISO_8859_15;

/// Repair a raw text field so it is valid UTF-8 before it reaches a sink.
///
/// Access logs from older proxies frequently carry Latin-9 bytes in
/// user-agent and URI fields. The chain is: valid UTF-8 passes through
/// unchanged, otherwise the bytes are reinterpreted as ISO-8859-15, and as a
/// last resort the text is transliterated to plain ASCII. The last step is
/// total, so this function always returns a string.
pub fn repair(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let (decoded, _, had_errors) = ISO_8859_15.decode(bytes);
    if !had_errors && !contains_c1_controls(&decoded) {
        return decoded.into_owned();
    }

    transliterate(bytes)
}

// A C1 control in the decoded text means the input was never Latin-9: the
// 0x80-0x9f range is unassigned to printable characters in ISO-8859-15.
fn contains_c1_controls(text: &str) -> bool {
    text.chars().any(|c| ('\u{80}'..='\u{9f}').contains(&c))
}

fn transliterate(bytes: &[u8]) -> String {
    let lossy: Cow<'_, str> = String::from_utf8_lossy(bytes);
    // Undecodable bytes become '?' rather than U+FFFD so the output stays
    // non-empty for non-empty input.
    let marked = lossy.replace('\u{fffd}', "?");
    deunicode_with_tofu(&marked, "?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_utf8_is_identity() {
        let inputs = ["", "plain ascii", "café ☕", "日本語"];
        for input in inputs {
            assert_eq!(repair(input.as_bytes()), input);
        }
    }

    #[test]
    fn latin9_bytes_are_reinterpreted() {
        // "café" with a Latin-9 e-acute, invalid as UTF-8.
        assert_eq!(repair(b"caf\xe9"), "café");
        // The euro sign sits at 0xa4 in ISO-8859-15.
        assert_eq!(repair(b"prix: 5\xa4"), "prix: 5€");
    }

    #[test]
    fn garbage_falls_back_to_ascii_transliteration() {
        // 0x81 is a C1 control under Latin-9, so the input cannot be
        // Latin-9 text; the terminal fallback must still return something.
        let out = repair(b"abc\x81def");
        assert!(!out.is_empty());
        assert!(out.is_ascii());
        assert!(out.starts_with("abc"));
        assert!(out.ends_with("def"));
    }

    #[test]
    fn fallback_never_empty_for_nonempty_input() {
        let out = repair(b"\x81\x82\x83");
        assert!(!out.is_empty());
        assert!(out.is_ascii());
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(repair(b""), "");
    }
}
