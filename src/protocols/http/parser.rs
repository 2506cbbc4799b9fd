//! HTTP request-line parser and canned responses.

use bytes::BytesMut;
use std::fmt;

/// Parsed request line: `<method> <path> <version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub version: String,
}

/// Reasons a request line is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No bytes, or the first line is blank.
    MissingRequestLine,
    /// Fewer than three whitespace-separated tokens.
    MissingToken,
    /// Method other than `GET`.
    UnsupportedMethod(String),
    /// Version without the `HTTP/` prefix.
    InvalidVersion(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingRequestLine => write!(f, "missing request line"),
            ParseError::MissingToken => write!(f, "request line needs method, path and version"),
            ParseError::UnsupportedMethod(m) => write!(f, "unsupported method '{}'", m),
            ParseError::InvalidVersion(v) => write!(f, "invalid version '{}'", v),
        }
    }
}

impl std::error::Error for ParseError {}

const BAD_REQUEST_BODY: &[u8] = b"400 Bad Request";

/// Parse the request line from the first line of `input`.
///
/// Only the first line is inspected; anything after it is ignored, as are
/// tokens after the version.
pub fn parse_request_line(input: &[u8]) -> Result<RequestLine, ParseError> {
    let line_end = input
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(input.len());
    let line = String::from_utf8_lossy(&input[..line_end]);

    let mut parts = line.split_whitespace();

    let method = parts.next().ok_or(ParseError::MissingRequestLine)?;
    let path = parts.next().ok_or(ParseError::MissingToken)?;
    let version = parts.next().ok_or(ParseError::MissingToken)?;

    if method != "GET" {
        return Err(ParseError::UnsupportedMethod(method.to_string()));
    }

    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidVersion(version.to_string()));
    }

    Ok(RequestLine {
        method: method.to_string(),
        path: path.to_string(),
        version: version.to_string(),
    })
}

/// Format a `200 OK` HTML page describing `request`.
pub fn response_ok(request: &RequestLine) -> BytesMut {
    let body = format!(
        "<html><body><h1>Hello from pingback</h1>\
         <p>Method: {}</p><p>Path: {}</p><p>Version: {}</p>\
         </body></html>",
        request.method, request.path, request.version
    );

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );

    let mut response = BytesMut::with_capacity(header.len() + body.len());
    response.extend_from_slice(header.as_bytes());
    response.extend_from_slice(body.as_bytes());
    response
}

/// Format the fixed `400 Bad Request` response.
pub fn response_bad_request() -> BytesMut {
    let header = format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        BAD_REQUEST_BODY.len()
    );

    let mut response = BytesMut::with_capacity(header.len() + BAD_REQUEST_BODY.len());
    response.extend_from_slice(header.as_bytes());
    response.extend_from_slice(BAD_REQUEST_BODY);
    response
}
