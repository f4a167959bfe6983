//! Protocol-level enumerations shared by the HTTP and VelocyStream drivers.

use core::fmt;

use crate::error::ProtocolError;

/// HTTP-style status code as carried in a response header.
pub type StatusCode = u16;

/// REST verb of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RestVerb {
    /// GET request.
    Get = 1,
    /// POST request.
    Post = 2,
    /// PUT request.
    Put = 3,
    /// DELETE request.
    Delete = 0,
    /// HEAD request.
    Head = 4,
    /// PATCH request.
    Patch = 5,
    /// OPTIONS request.
    Options = 6,
}

impl RestVerb {
    /// Wire name of the verb as used on the HTTP request line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }

    /// Numeric identifier of the verb in a VelocyStream request header.
    #[must_use]
    pub const fn vst_value(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for RestVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RestVerb {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        to_rest_verb(s)
    }
}

/// Parse a verb name (case-insensitive) into a [`RestVerb`].
pub fn to_rest_verb(s: &str) -> Result<RestVerb, ProtocolError> {
    match s.to_ascii_uppercase().as_str() {
        "GET" => Ok(RestVerb::Get),
        "POST" => Ok(RestVerb::Post),
        "PUT" => Ok(RestVerb::Put),
        "DELETE" => Ok(RestVerb::Delete),
        "HEAD" => Ok(RestVerb::Head),
        "PATCH" => Ok(RestVerb::Patch),
        "OPTIONS" => Ok(RestVerb::Options),
        _ => Err(ProtocolError::InvalidVerb(s.to_string())),
    }
}

/// Wire name of a [`RestVerb`].
#[must_use]
pub fn to_string(verb: RestVerb) -> &'static str {
    verb.as_str()
}

/// Content type of a request or response body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentType {
    /// No content type set; nothing is emitted on the wire.
    #[default]
    Unset,
    /// VelocyPack (`application/x-velocypack`).
    VPack,
    /// JSON (`application/json`).
    Json,
    /// HTML (`text/html`).
    Html,
    /// Plain text (`text/plain`).
    Text,
    /// ArangoDB dump format (`application/x-arango-dump`).
    Dump,
    /// Any other mime type, passed through verbatim.
    Custom(String),
}

impl ContentType {
    /// The mime representation, or `None` for [`ContentType::Unset`].
    #[must_use]
    pub fn mime(&self) -> Option<&str> {
        match self {
            Self::Unset => None,
            Self::VPack => Some("application/x-velocypack"),
            Self::Json => Some("application/json"),
            Self::Html => Some("text/html"),
            Self::Text => Some("text/plain"),
            Self::Dump => Some("application/x-arango-dump"),
            Self::Custom(mime) => Some(mime),
        }
    }

    /// Map a mime string onto a content type. Unknown values become
    /// [`ContentType::Custom`].
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        // Parameters like "; charset=utf-8" are not part of the type
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence {
            "application/x-velocypack" => Self::VPack,
            "application/json" => Self::Json,
            "text/html" => Self::Html,
            "text/plain" => Self::Text,
            "application/x-arango-dump" => Self::Dump,
            "" => Self::Unset,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Transport protocol selected by the connection URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    /// HTTP/1.1, half-duplex.
    Http,
    /// VelocyStream, full-duplex and multiplexed.
    Vst,
}

/// Authentication material presented to the server.
#[derive(Clone, Default)]
pub enum Authentication {
    /// No authentication.
    #[default]
    None,
    /// HTTP Basic (user and password); on VelocyStream sent as a "plain"
    /// authentication message after the protocol preamble.
    Basic {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
    /// Bearer token (JWT).
    Jwt {
        /// The raw token.
        token: String,
    },
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials stay out of logs
        match self {
            Self::None => f.write_str("Authentication::None"),
            Self::Basic { user, .. } => f
                .debug_struct("Authentication::Basic")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Jwt { .. } => f.write_str("Authentication::Jwt { .. }"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_round_trip() {
        for verb in [
            RestVerb::Get,
            RestVerb::Post,
            RestVerb::Put,
            RestVerb::Delete,
            RestVerb::Head,
            RestVerb::Patch,
            RestVerb::Options,
        ] {
            assert_eq!(to_rest_verb(verb.as_str()).unwrap(), verb);
        }
        assert_eq!(to_rest_verb("get").unwrap(), RestVerb::Get);
        assert!(to_rest_verb("TRACE").is_err());
    }

    #[test]
    fn test_content_type_mime() {
        assert_eq!(ContentType::Json.mime(), Some("application/json"));
        assert_eq!(ContentType::Unset.mime(), None);
        assert_eq!(
            ContentType::from_mime("application/json; charset=utf-8"),
            ContentType::Json
        );
        assert_eq!(
            ContentType::from_mime("application/octet-stream"),
            ContentType::Custom("application/octet-stream".to_string())
        );
    }

    #[test]
    fn test_authentication_debug_hides_secrets() {
        let auth = Authentication::Basic {
            user: "root".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("hunter2"));
    }
}
