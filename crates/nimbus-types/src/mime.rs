//! MIME normalization and class derivation.

use crate::error::{ModelError, ModelResult};

/// MIME used when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Split a content type into its bare MIME and semantic class.
///
/// Parameters after `;` are dropped. An empty content type is the default
/// binary type.
pub fn extract_mime_and_class(content_type: &str) -> (String, String) {
    let content_type = if content_type.trim().is_empty() {
        DEFAULT_CONTENT_TYPE
    } else {
        content_type
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_string();

    let class = match mime.as_str() {
        DEFAULT_CONTENT_TYPE | "application/x-apple-diskimage" | "application/x-msdownload" => {
            "files"
        }
        "text/html" | "text/css" | "text/xml" | "application/js" | "application/javascript"
        | "text/x-c" | "text/x-go" | "text/x-python" | "text/x-rust" | "application/x-ruby" => {
            "code"
        }
        "application/pdf" => "pdf",
        "application/vnd.ms-powerpoint"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        | "application/vnd.oasis.opendocument.presentation"
        | "application/x-iwork-keynote-sffkey" => "slide",
        "application/x-iwork-numbers-sffnumbers"
        | "application/vnd.oasis.opendocument.spreadsheet"
        | "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "spreadsheet",
        "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.oasis.opendocument.text"
        | "application/x-iwork-pages-sffpages" => "text",
        "application/x-7z-compressed"
        | "application/x-rar-compressed"
        | "application/zip"
        | "application/gzip"
        | "application/x-tar" => "zip",
        other => other.split('/').next().unwrap_or(other),
    }
    .to_string();

    (mime, class)
}

/// Normalize and validate a content type, returning the bare MIME.
pub fn validate_mime(content_type: &str) -> ModelResult<String> {
    let (mime, _) = extract_mime_and_class(content_type);
    let valid = match mime.split_once('/') {
        Some((top, sub)) => {
            !top.is_empty()
                && !sub.is_empty()
                && !sub.contains('/')
                && !mime.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(mime)
    } else {
        Err(ModelError::IllegalMime(content_type.to_string()))
    }
}

/// Guess a MIME type from a file name's extension.
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_special_cases() {
        assert_eq!(extract_mime_and_class("application/pdf").1, "pdf");
        assert_eq!(extract_mime_and_class("application/zip").1, "zip");
        assert_eq!(extract_mime_and_class("text/html; charset=utf-8"), (
            "text/html".to_string(),
            "code".to_string()
        ));
        assert_eq!(extract_mime_and_class("").1, "files");
    }

    #[test]
    fn test_class_falls_back_to_top_level() {
        assert_eq!(extract_mime_and_class("image/jpeg").1, "image");
        assert_eq!(extract_mime_and_class("text/plain").1, "text");
    }

    #[test]
    fn test_validate_mime() {
        assert_eq!(validate_mime("text/plain; charset=utf-8").unwrap(), "text/plain");
        assert_eq!(validate_mime("").unwrap(), DEFAULT_CONTENT_TYPE);
        assert!(validate_mime("garbage").is_err());
        assert!(validate_mime("text/").is_err());
        assert!(validate_mime("te xt/plain").is_err());
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("photo.jpg"), "image/jpeg");
        assert_eq!(guess_mime("notes.txt"), "text/plain");
        assert_eq!(guess_mime("noext"), DEFAULT_CONTENT_TYPE);
    }
}
