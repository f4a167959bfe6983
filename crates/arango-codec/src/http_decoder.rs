//! Streaming HTTP/1.1 response decoding.
//!
//! The half-duplex driver feeds raw socket bytes into this decoder until a
//! complete response is produced. The head is parsed with `httparse`; the
//! body is framed by `Content-Length` or the chunked transfer coding.
//! Malformed heads are rejected outright and protocol upgrades are refused.

use std::collections::HashMap;

use arango_protocol::types::ContentType;
use bytes::{Buf, Bytes, BytesMut};

use crate::error::CodecError;

/// Maximum accepted size of a response head.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of headers in a response head.
const MAX_HEADERS: usize = 64;

/// A fully decoded HTTP response.
#[derive(Debug, Clone)]
pub struct DecodedResponse {
    /// Status code from the status line.
    pub status: u16,
    /// Response headers; for duplicated names the last value wins.
    pub meta: HashMap<String, String>,
    /// Body content type, if announced.
    pub content_type: ContentType,
    /// The response body.
    pub body: Bytes,
}

#[derive(Debug)]
enum BodyFraming {
    /// `Content-Length` with this many bytes outstanding.
    Length(usize),
    /// Chunked transfer coding.
    Chunked(ChunkedState),
    /// No body (HEAD response, 1xx/204/304, or no framing headers).
    None,
}

#[derive(Debug)]
enum ChunkedState {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailer,
}

#[derive(Debug)]
enum DecodeState {
    Head,
    Body {
        head: ResponseHead,
        framing: BodyFraming,
    },
}

#[derive(Debug)]
struct ResponseHead {
    status: u16,
    meta: HashMap<String, String>,
    content_type: ContentType,
}

/// Incremental decoder for one HTTP/1.1 response at a time.
///
/// After a response is returned the decoder resets itself for the next
/// exchange; [`HttpResponseDecoder::expect_head_response`] must be called
/// again if the next request is a HEAD.
#[derive(Debug)]
pub struct HttpResponseDecoder {
    state: DecodeState,
    body: BytesMut,
    head_request: bool,
}

impl Default for HttpResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponseDecoder {
    /// Create a decoder in its initial state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
            body: BytesMut::new(),
            head_request: false,
        }
    }

    /// Announce that the response being awaited answers a HEAD request, so
    /// a `Content-Length` header does not imply body bytes.
    pub fn expect_head_response(&mut self) {
        self.head_request = true;
    }

    /// Reset to the initial state, dropping any partial response.
    pub fn reset(&mut self) {
        self.state = DecodeState::Head;
        self.body.clear();
        self.head_request = false;
    }

    /// Whether a response is partially decoded.
    #[must_use]
    pub fn mid_response(&self) -> bool {
        !matches!(self.state, DecodeState::Head) || !self.body.is_empty()
    }

    /// Feed buffered bytes; returns a response once one is complete.
    ///
    /// Consumed bytes are removed from `src`; leftover bytes (the start of
    /// a pipelined message would be a protocol violation for this driver
    /// and are left in place for the caller to inspect).
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecodedResponse>, CodecError> {
        if matches!(self.state, DecodeState::Head) {
            let Some((head, framing)) = self.parse_head(src)? else {
                return Ok(None);
            };
            self.state = DecodeState::Body { head, framing };
        }

        let DecodeState::Body { framing, .. } = &mut self.state else {
            return Ok(None);
        };
        let complete = match framing {
            BodyFraming::None => true,
            BodyFraming::Length(remaining) => {
                let take = (*remaining).min(src.len());
                self.body.extend_from_slice(&src[..take]);
                src.advance(take);
                *remaining -= take;
                *remaining == 0
            }
            BodyFraming::Chunked(state) => decode_chunked(state, src, &mut self.body)?,
        };
        if !complete {
            return Ok(None);
        }

        let DecodeState::Body { head, .. } = std::mem::replace(&mut self.state, DecodeState::Head)
        else {
            return Ok(None);
        };
        self.head_request = false;
        let body = self.body.split().freeze();
        Ok(Some(DecodedResponse {
            status: head.status,
            meta: head.meta,
            content_type: head.content_type,
            body,
        }))
    }

    fn parse_head(
        &self,
        src: &mut BytesMut,
    ) -> Result<Option<(ResponseHead, BodyFraming)>, CodecError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);

        let head_len = match response.parse(&src[..]) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                if src.len() > MAX_HEAD_SIZE {
                    return Err(CodecError::HeadTooLarge);
                }
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => return Err(CodecError::HeadTooLarge),
            Err(e) => return Err(CodecError::InvalidHead(e)),
        };

        let status = response.code.ok_or(CodecError::InvalidHead(
            httparse::Error::Status,
        ))?;

        // Upgrades (101) are refused; other 1xx responses are interim and
        // this driver does not send Expect, so they are refused as well.
        if (100..200).contains(&status) {
            return Err(CodecError::UpgradeRefused);
        }

        let mut meta = HashMap::new();
        let mut content_length: Option<usize> = None;
        let mut chunked = false;
        let mut upgrade = false;
        let mut content_type = ContentType::Unset;

        for header in response.headers.iter() {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| CodecError::InvalidHead(httparse::Error::HeaderValue))?;
            if header.name.eq_ignore_ascii_case("content-length") {
                content_length =
                    Some(value.trim().parse().map_err(|_| CodecError::InvalidContentLength)?);
            } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = value
                    .split(',')
                    .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            } else if header.name.eq_ignore_ascii_case("upgrade") {
                upgrade = true;
            } else if header.name.eq_ignore_ascii_case("content-type") {
                content_type = ContentType::from_mime(value);
            }
            meta.insert(header.name.to_string(), value.to_string());
        }

        if upgrade {
            return Err(CodecError::UpgradeRefused);
        }

        src.advance(head_len);

        let framing = if self.head_request || status == 204 || status == 304 {
            BodyFraming::None
        } else if chunked {
            BodyFraming::Chunked(ChunkedState::Size)
        } else {
            match content_length {
                Some(0) | None => BodyFraming::None,
                Some(n) => BodyFraming::Length(n),
            }
        };

        tracing::trace!(status, ?framing, "decoded response head");

        Ok(Some((
            ResponseHead {
                status,
                meta,
                content_type,
            },
            framing,
        )))
    }
}

/// Advance the chunked-coding state machine. Returns `true` when the final
/// chunk and trailer section have been consumed.
fn decode_chunked(
    state: &mut ChunkedState,
    src: &mut BytesMut,
    body: &mut BytesMut,
) -> Result<bool, CodecError> {
    loop {
        match state {
            ChunkedState::Size => {
                let Some(line_end) = find_crlf(src) else {
                    return Ok(false);
                };
                let line = std::str::from_utf8(&src[..line_end])
                    .map_err(|_| CodecError::InvalidChunkedBody("non-ascii chunk size"))?;
                let size_str = line.split(';').next().unwrap_or("").trim();
                let size = usize::from_str_radix(size_str, 16)
                    .map_err(|_| CodecError::InvalidChunkedBody("invalid chunk size"))?;
                src.advance(line_end + 2);
                if size == 0 {
                    *state = ChunkedState::Trailer;
                } else {
                    *state = ChunkedState::Data { remaining: size };
                }
            }
            ChunkedState::Data { remaining } => {
                let take = (*remaining).min(src.len());
                body.extend_from_slice(&src[..take]);
                src.advance(take);
                *remaining -= take;
                if *remaining > 0 {
                    return Ok(false);
                }
                *state = ChunkedState::DataEnd;
            }
            ChunkedState::DataEnd => {
                if src.len() < 2 {
                    return Ok(false);
                }
                if &src[..2] != b"\r\n" {
                    return Err(CodecError::InvalidChunkedBody("missing chunk terminator"));
                }
                src.advance(2);
                *state = ChunkedState::Size;
            }
            ChunkedState::Trailer => {
                let Some(line_end) = find_crlf(src) else {
                    return Ok(false);
                };
                let empty = line_end == 0;
                src.advance(line_end + 2);
                if empty {
                    return Ok(true);
                }
                // Trailer fields are consumed and discarded
            }
        }
    }
}

fn find_crlf(src: &BytesMut) -> Option<usize> {
    src.windows(2).position(|pair| pair == b"\r\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn feed(decoder: &mut HttpResponseDecoder, bytes: &[u8]) -> Option<DecodedResponse> {
        let mut buf = BytesMut::from(bytes);
        let result = decoder.decode(&mut buf).unwrap();
        assert!(buf.is_empty(), "decoder left bytes unconsumed");
        result
    }

    #[test]
    fn test_content_length_response() {
        let mut decoder = HttpResponseDecoder::new();
        let response = feed(
            &mut decoder,
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\nhello world",
        )
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, ContentType::Json);
        assert_eq!(&response.body[..], b"hello world");
    }

    #[test]
    fn test_split_feeds() {
        let mut decoder = HttpResponseDecoder::new();
        let wire = b"HTTP/1.1 404 Not Found\r\nContent-Length: 5\r\n\r\noops!";
        for split in [3usize, 20, 40, wire.len() - 1] {
            decoder.reset();
            let mut buf = BytesMut::from(&wire[..split]);
            assert!(decoder.decode(&mut buf).unwrap().is_none());
            buf.extend_from_slice(&wire[split..]);
            let response = decoder.decode(&mut buf).unwrap().unwrap();
            assert_eq!(response.status, 404);
            assert_eq!(&response.body[..], b"oops!");
        }
    }

    #[test]
    fn test_chunked_body() {
        let mut decoder = HttpResponseDecoder::new();
        let response = feed(
            &mut decoder,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(&response.body[..], b"hello world");
    }

    #[test]
    fn test_chunked_body_with_trailer() {
        let mut decoder = HttpResponseDecoder::new();
        let response = feed(
            &mut decoder,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\nX-Done: yes\r\n\r\n",
        )
        .unwrap();
        assert_eq!(&response.body[..], b"abc");
    }

    #[test]
    fn test_duplicate_headers_last_wins() {
        let mut decoder = HttpResponseDecoder::new();
        let response = feed(
            &mut decoder,
            b"HTTP/1.1 200 OK\r\nX-Arango: first\r\nX-Arango: second\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(response.meta.get("X-Arango").map(String::as_str), Some("second"));
    }

    #[test]
    fn test_head_response_skips_body() {
        let mut decoder = HttpResponseDecoder::new();
        decoder.expect_head_response();
        let response = feed(
            &mut decoder,
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n",
        )
        .unwrap();
        assert!(response.body.is_empty());
        assert_eq!(
            response.meta.get("Content-Length").map(String::as_str),
            Some("1000")
        );
    }

    #[test]
    fn test_no_framing_means_empty_body() {
        let mut decoder = HttpResponseDecoder::new();
        let response = feed(&mut decoder, b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_upgrade_refused() {
        let mut decoder = HttpResponseDecoder::new();
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\n\r\n"[..],
        );
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::UpgradeRefused)
        ));
    }

    #[test]
    fn test_malformed_head_rejected() {
        let mut decoder = HttpResponseDecoder::new();
        let mut buf = BytesMut::from(&b"NOT-HTTP nonsense\r\n\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::InvalidHead(_))
        ));
    }

    #[test]
    fn test_invalid_content_length_rejected() {
        let mut decoder = HttpResponseDecoder::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::InvalidContentLength)
        ));
    }

    #[test]
    fn test_two_sequential_responses() {
        let mut decoder = HttpResponseDecoder::new();
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"[..],
        );
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.body[..], b"ok");
        assert!(buf.is_empty());

        buf.extend_from_slice(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n");
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.status, 201);
    }
}
