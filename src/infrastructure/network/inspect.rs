//! Content-type validation for fetched payloads.

use crate::domain::errors::LoadError;

const GENERIC_TYPES: [&str; 3] = [
    "application/octet-stream",
    "binary/octet-stream",
    "application/unknown",
];

/// Decides the content type of a fetched payload.
///
/// `image/*` headers are trusted. Missing or generic headers fall back to
/// sniffing the payload's magic bytes.
///
/// # Errors
/// Returns `LoadError::TransientFetch` when the payload is not an image.
pub fn resolve_content_type(header: Option<&str>, body: &[u8]) -> Result<String, LoadError> {
    let mime = header
        .and_then(|h| h.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());

    match mime {
        Some(mime) if mime.starts_with("image/") => Ok(mime),
        Some(mime) if !GENERIC_TYPES.contains(&mime.as_str()) => Err(LoadError::transient(
            format!("unexpected content type `{mime}`"),
        )),
        _ => sniff(body),
    }
}

/// Returns true if a HEAD probe's content type rules out an image.
#[must_use]
pub fn rejects_image(header: Option<&str>) -> bool {
    header
        .and_then(|h| h.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .is_some_and(|m| {
            !m.is_empty() && !m.starts_with("image/") && !GENERIC_TYPES.contains(&m.as_str())
        })
}

fn sniff(body: &[u8]) -> Result<String, LoadError> {
    image::guess_format(body)
        .map(|format| format.to_mime_type().to_string())
        .map_err(|_| LoadError::transient("payload is not a recognised image"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::sample_png;
    use test_case::test_case;

    #[test_case(Some("image/png") ; "plain")]
    #[test_case(Some("IMAGE/PNG; charset=binary") ; "parameters_and_case")]
    fn test_image_header_is_trusted(header: Option<&str>) {
        assert_eq!(resolve_content_type(header, b"").unwrap(), "image/png");
    }

    #[test_case(None ; "missing")]
    #[test_case(Some("application/octet-stream") ; "octet_stream")]
    #[test_case(Some("") ; "empty")]
    fn test_generic_header_is_sniffed(header: Option<&str>) {
        let body = sample_png();
        assert_eq!(resolve_content_type(header, &body).unwrap(), "image/png");
    }

    #[test]
    fn test_generic_header_with_non_image_body_fails() {
        let err = resolve_content_type(None, b"<html></html>").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_html_is_rejected() {
        let body = sample_png();
        let err = resolve_content_type(Some("text/html"), &body).unwrap_err();
        assert!(matches!(err, LoadError::TransientFetch { .. }));
    }

    #[test_case(Some("text/html"), true)]
    #[test_case(Some("image/webp"), false)]
    #[test_case(Some("application/octet-stream"), false)]
    #[test_case(None, false)]
    fn test_probe_rejection(header: Option<&str>, expected: bool) {
        assert_eq!(rejects_image(header), expected);
    }
}
