//! `Content-Disposition` header values for downloads.

/// Build a `Content-Disposition` value for `filename`.
///
/// The quoted `filename` keeps only printable ASCII minus quote, slash and
/// backslash. When that loses anything, the full name follows as an
/// RFC 5987 `filename*` extended value.
pub fn content_disposition(disposition: &str, filename: &str) -> String {
    if filename.is_empty() {
        return disposition.to_string();
    }
    let mut quoted: String = filename
        .chars()
        .filter(|&c| c > ' ' && c < '\u{7f}' && !matches!(c, '"' | '/' | '\\'))
        .collect();
    if quoted.is_empty() {
        quoted = "download".to_string();
    }
    if quoted == filename {
        return format!("{disposition}; filename=\"{quoted}\"");
    }
    format!(
        "{disposition}; filename=\"{quoted}\"; filename*=UTF-8''{}",
        path_escape(filename)
    )
}

/// Percent-encode a path segment.
fn path_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric()
            || matches!(b, b'-' | b'_' | b'.' | b'~' | b'$' | b'&' | b'+' | b':' | b'=' | b'@')
        {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii_name() {
        assert_eq!(
            content_disposition("attachment", "report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
    }

    #[test]
    fn test_space_goes_to_extended_form() {
        assert_eq!(
            content_disposition("inline", "foo bar.jpg"),
            "inline; filename=\"foobar.jpg\"; filename*=UTF-8''foo%20bar.jpg"
        );
    }

    #[test]
    fn test_non_ascii_name() {
        assert_eq!(
            content_disposition("attachment", "été.txt"),
            "attachment; filename=\"t.txt\"; filename*=UTF-8''%C3%A9t%C3%A9.txt"
        );
    }

    #[test]
    fn test_empty_quoted_falls_back_to_download() {
        assert_eq!(
            content_disposition("attachment", "日本"),
            "attachment; filename=\"download\"; filename*=UTF-8''%E6%97%A5%E6%9C%AC"
        );
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(content_disposition("inline", ""), "inline");
    }
}
