#![forbid(unsafe_code)]

//! Turns arbitrary video titles into names that are safe to write into the
//! downloads directory and to put in a URL path.

/// Longest sanitized title we keep, in characters.
pub const MAX_TITLE_LEN: usize = 50;

/// Used when nothing survives sanitization (titles made only of symbols or
/// non-Latin script).
pub const FALLBACK_TITLE: &str = "video";

/// Restricts `title` to ASCII letters, digits, `_` and single spaces, then
/// caps it at [`MAX_TITLE_LEN`] characters.
///
/// Whitespace of any kind becomes a plain space; everything else outside the
/// safe set is dropped. Leading and trailing spaces are trimmed.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .take(MAX_TITLE_LEN)
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<sanitized-title>_<millis>.<ext>`.
///
/// The timestamp is the only disambiguation between two downloads of the same
/// title, so two requests landing in the same millisecond share a name.
pub fn download_filename(title: &str, timestamp_millis: i64, ext: &str) -> String {
    format!("{}_{}.{}", sanitize_title(title), timestamp_millis, ext)
}

/// Extensions are user input that ends up in a path; only short alphanumeric
/// values are accepted.
pub fn is_valid_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_symbols_and_keeps_words() {
        assert_eq!(
            sanitize_title("Rick Astley - Never Gonna Give You Up (Official Video)"),
            "Rick Astley  Never Gonna Give You Up Official Vide"
        );
    }

    #[test]
    fn caps_length() {
        let long = "a".repeat(200);
        assert_eq!(sanitize_title(&long).len(), MAX_TITLE_LEN);
    }

    #[test]
    fn normalizes_whitespace_kinds() {
        assert_eq!(sanitize_title("one\ttwo\nthree"), "one two three");
    }

    #[test]
    fn drops_non_ascii_and_falls_back() {
        assert_eq!(sanitize_title("日本語のタイトル!!"), FALLBACK_TITLE);
        assert_eq!(sanitize_title("Caf\u{e9} 2024"), "Caf 2024");
    }

    #[test]
    fn output_never_contains_path_separators() {
        let name = sanitize_title("../../etc/passwd");
        assert!(!name.contains('/'));
        assert!(!name.contains('.'));
        assert_eq!(name, "etcpasswd");
    }

    #[test]
    fn builds_download_filename() {
        assert_eq!(
            download_filename("My Title!", 1_700_000_000_000, "mp4"),
            "My Title_1700000000000.mp4"
        );
    }

    #[test]
    fn validates_extensions() {
        assert!(is_valid_extension("mp4"));
        assert!(is_valid_extension("m4a"));
        assert!(!is_valid_extension(""));
        assert!(!is_valid_extension("../mp4"));
        assert!(!is_valid_extension("averyverylongext"));
    }
}
