use std::time::Duration;

use thiserror::Error;

use crate::{config::ConfigError, endpoint::Endpoint, types::ReportOutcome};

pub const CONTENT_TYPE_JSON: &str = "application/json";

pub const MAX_RESPONSE_BODY: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] ConfigError),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("malformed response: {0}")]
    Response(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0} endpoints are not supported by this transport")]
    UnsupportedScheme(&'static str),
}

/// Delivers one encoded payload. Implementations open a fresh connection per
/// call and release it before returning, whatever the result.
pub trait Reporter {
    fn send(&mut self, payload: &str, endpoint: &str) -> Result<ReportOutcome, TransportError>;
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn send(&mut self, payload: &str, endpoint: &str) -> Result<ReportOutcome, TransportError> {
        (**self).send(payload, endpoint)
    }
}

pub fn post_request(endpoint: &Endpoint, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: telemetry-node/{version}\r\n\
         Content-Type: {CONTENT_TYPE_JSON}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        path = endpoint.path,
        host = endpoint.host_header(),
        version = env!("CARGO_PKG_VERSION"),
        len = body.len(),
    )
}

enum Framing {
    Length(usize),
    Chunked,
    UntilClose,
}

struct Head {
    status: u16,
    body_start: usize,
    framing: Framing,
}

// `None` until the blank line ending the headers has arrived.
fn parse_head(raw: &[u8]) -> Result<Option<Head>, TransportError> {
    let Some(header_end) = find(raw, b"\r\n\r\n") else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| TransportError::Response("headers are not utf-8".to_string()))?;

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TransportError::Response(format!(
            "unexpected status line `{status_line}`"
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| TransportError::Response(format!("bad status line `{status_line}`")))?;

    let mut chunked = false;
    let mut content_length = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.to_ascii_lowercase().contains("chunked");
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        }
    }

    let framing = if chunked {
        Framing::Chunked
    } else if let Some(len) = content_length {
        Framing::Length(len)
    } else if matches!(status, 100..=199 | 204 | 304) {
        Framing::Length(0)
    } else {
        Framing::UntilClose
    };

    Ok(Some(Head {
        status,
        body_start: header_end + 4,
        framing,
    }))
}

/// Whether `raw` already holds a whole response, so the reader can stop
/// without waiting for the peer to close. Responses framed only by the
/// connection closing are never complete.
pub fn is_complete(raw: &[u8]) -> Result<bool, TransportError> {
    let Some(head) = parse_head(raw)? else {
        return Ok(false);
    };
    let body = &raw[head.body_start..];
    Ok(match head.framing {
        Framing::Length(len) => body.len() >= len,
        Framing::Chunked => decode_chunked(body).is_ok(),
        Framing::UntilClose => false,
    })
}

pub fn parse_response(raw: &[u8]) -> Result<ReportOutcome, TransportError> {
    let head = parse_head(raw)?
        .ok_or_else(|| TransportError::Response("missing end of headers".to_string()))?;
    let body = &raw[head.body_start..];

    let body = match head.framing {
        Framing::Chunked => decode_chunked(body)?,
        Framing::Length(len) => body[..len.min(body.len())].to_vec(),
        Framing::UntilClose => body.to_vec(),
    };

    Ok(ReportOutcome {
        status: head.status,
        body: truncate_body(&body),
    })
}

pub fn truncate_body(body: &[u8]) -> String {
    let body = &body[..body.len().min(MAX_RESPONSE_BODY)];
    String::from_utf8_lossy(body).into_owned()
}

fn decode_chunked(mut raw: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::new();
    loop {
        let line_end = find(raw, b"\r\n")
            .ok_or_else(|| TransportError::Response("truncated chunk header".to_string()))?;
        let size_line = std::str::from_utf8(&raw[..line_end])
            .map_err(|_| TransportError::Response("chunk header is not utf-8".to_string()))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| TransportError::Response(format!("bad chunk size `{size_hex}`")))?;
        raw = &raw[line_end + 2..];

        if size == 0 {
            return Ok(out);
        }
        if raw.len() < size {
            return Err(TransportError::Response("truncated chunk".to_string()));
        }
        out.extend_from_slice(&raw[..size]);
        raw = raw[size..].strip_prefix(b"\r\n").unwrap_or(&raw[size..]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
