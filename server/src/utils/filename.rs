//! Upload filename sanitization
//!
//! Strips control characters and anything that could smuggle a path or a
//! header through Content-Disposition. Idempotent: sanitizing an already
//! clean name changes nothing.

/// Remove dangerous characters and path separators from a client-supplied
/// filename. Falls back to "file" when nothing usable remains.
pub fn sanitize_filename(name: &str) -> String {
    let without_controls: String = name
        .chars()
        .filter(|&c| c >= ' ' && c != '\u{7f}')
        .collect();

    let replaced: String = without_controls
        .replace("..", "-")
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '|' => '-',
            '"' => '\'',
            '<' | '>' => '_',
            other => other,
        })
        .collect();

    let collapsed = replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.is_empty() {
        "file".to_string()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_clean_names_untouched() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("ТЗ.pdf"), "ТЗ.pdf");
    }

    #[test]
    fn strips_control_characters() {
        assert_eq!(sanitize_filename("a\r\nb.pdf"), "ab.pdf");
        assert_eq!(sanitize_filename("a\x00b\x7fc"), "abc");
    }

    #[test]
    fn neutralizes_path_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "----etc-passwd");
        assert_eq!(sanitize_filename("dir\\file"), "dir-file");
    }

    #[test]
    fn replaces_header_sensitive_characters() {
        assert_eq!(sanitize_filename("a:b|c"), "a-b-c");
        assert_eq!(sanitize_filename("say \"hi\""), "say 'hi'");
        assert_eq!(sanitize_filename("<tag>"), "_tag_");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(sanitize_filename("  my   report .pdf "), "my report .pdf");
    }

    #[test]
    fn empty_input_falls_back() {
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("   "), "file");
        assert_eq!(sanitize_filename("\r\n"), "file");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for name in [
            "report.pdf",
            "../../etc/passwd",
            "a:b|c <d> \"e\"",
            "  spaced   out  ",
            "",
            "ТЗ по проекту.docx",
        ] {
            let once = sanitize_filename(name);
            assert_eq!(sanitize_filename(&once), once);
        }
    }
}
