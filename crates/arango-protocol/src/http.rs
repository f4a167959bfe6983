//! HTTP/1.1 request-head serialization.
//!
//! The head is built once, on the submitting thread, and written ahead of
//! the payload buffers by the half-duplex driver. Re-serializing the same
//! request yields byte-identical output.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::ProtocolError;
use crate::message::Request;
use crate::types::{Authentication, RestVerb};

/// Characters percent-encoded in path segments and query pairs: everything
/// but RFC 3986 unreserved.
const URL_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode one URL component.
#[must_use]
pub fn url_encode(component: &str) -> String {
    utf8_percent_encode(component, URL_ENCODE).to_string()
}

/// Serialize the request line and headers for `request`.
///
/// The returned string ends with the blank line separating head and body;
/// payload buffers follow directly on the wire.
pub fn build_request_head(
    request: &Request,
    host: &str,
    auth: &Authentication,
) -> Result<String, ProtocolError> {
    let header = &request.header;
    if !header.path.starts_with('/') {
        return Err(ProtocolError::InvalidPath(header.path.clone()));
    }

    let mut head = String::with_capacity(128);
    head.push_str(header.rest_verb.as_str());
    head.push(' ');

    if let Some(database) = &header.database {
        head.push_str("/_db/");
        head.push_str(&url_encode(database));
    }
    head.push_str(&header.path);

    for (i, (key, value)) in header.parameters.iter().enumerate() {
        head.push(if i == 0 { '?' } else { '&' });
        head.push_str(&url_encode(key));
        head.push('=');
        head.push_str(&url_encode(value));
    }

    head.push_str(" HTTP/1.1\r\n");
    head.push_str("Host: ");
    head.push_str(host);
    head.push_str("\r\n");
    head.push_str("Connection: Keep-Alive\r\n");

    for (name, value) in &header.meta {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }

    if let Some(mime) = header.content_type.mime() {
        head.push_str("Content-Type: ");
        head.push_str(mime);
        head.push_str("\r\n");
    }

    match auth {
        Authentication::None => {}
        Authentication::Basic { user, password } => {
            head.push_str("Authorization: Basic ");
            head.push_str(&BASE64.encode(format!("{user}:{password}")));
            head.push_str("\r\n");
        }
        Authentication::Jwt { token } => {
            head.push_str("Authorization: bearer ");
            head.push_str(token);
            head.push_str("\r\n");
        }
    }

    if header.rest_verb != RestVerb::Get {
        head.push_str("Content-Length: ");
        head.push_str(&request.payload_size().to_string());
        head.push_str("\r\n\r\n");
    } else {
        head.push_str("\r\n");
    }
    Ok(head)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ContentType;
    use bytes::Bytes;

    #[test]
    fn test_get_head_ends_with_single_blank_line() {
        let request = Request::get("/_api/version");
        let head = build_request_head(&request, "localhost:8529", &Authentication::None).unwrap();
        assert!(head.starts_with("GET /_api/version HTTP/1.1\r\n"));
        assert!(head.contains("Host: localhost:8529\r\n"));
        assert!(head.contains("Connection: Keep-Alive\r\n"));
        assert!(!head.contains("Content-Length"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_non_get_emits_content_length() {
        let request = Request::new(RestVerb::Post, "/_api/document")
            .payload(Bytes::from_static(b"{\"a\":1}"));
        let head = build_request_head(&request, "h", &Authentication::None).unwrap();
        assert!(head.contains("Content-Length: 7\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_database_prefix_and_query_encoding() {
        let request = Request::get("/_api/collection")
            .database("my db")
            .parameter("filter", "a&b")
            .parameter("filter", "c d");
        let head = build_request_head(&request, "h", &Authentication::None).unwrap();
        assert!(
            head.starts_with(
                "GET /_db/my%20db/_api/collection?filter=a%26b&filter=c%20d HTTP/1.1\r\n"
            ),
            "unexpected head: {head}"
        );
    }

    #[test]
    fn test_basic_auth_header() {
        let request = Request::get("/_api/version");
        let auth = Authentication::Basic {
            user: "root".to_string(),
            password: "secret".to_string(),
        };
        let head = build_request_head(&request, "h", &auth).unwrap();
        // base64("root:secret")
        assert!(head.contains("Authorization: Basic cm9vdDpzZWNyZXQ=\r\n"));
    }

    #[test]
    fn test_jwt_auth_header() {
        let request = Request::get("/_api/version");
        let auth = Authentication::Jwt {
            token: "abc.def.ghi".to_string(),
        };
        let head = build_request_head(&request, "h", &auth).unwrap();
        assert!(head.contains("Authorization: bearer abc.def.ghi\r\n"));
    }

    #[test]
    fn test_content_type_emitted_when_set() {
        let request = Request::new(RestVerb::Post, "/_api/cursor").content_type(ContentType::Json);
        let head = build_request_head(&request, "h", &Authentication::None).unwrap();
        assert!(head.contains("Content-Type: application/json\r\n"));
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let request = Request::new(RestVerb::Put, "/_api/document/c/k")
            .parameter("waitForSync", "true")
            .payload(Bytes::from_static(b"{}"));
        let first = build_request_head(&request, "db.example:8529", &Authentication::None).unwrap();
        let second =
            build_request_head(&request, "db.example:8529", &Authentication::None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_relative_path() {
        let request = Request::get("no-slash");
        let result = build_request_head(&request, "h", &Authentication::None);
        assert!(matches!(result, Err(ProtocolError::InvalidPath(_))));
    }
}
