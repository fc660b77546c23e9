//! Request parser and response encoder for the RPC wire protocol.
//!
//! Requests look like a minimal HTTP/1.x request:
//! - Request line: `<METHOD> <path> <VERSION>\r\n`
//! - Zero or more `<Name>: <Value>\r\n` header lines
//! - A blank line, then an opaque body made of every remaining byte
//!
//! The parser is a byte-at-a-time state machine so it can be fed chunks as
//! they arrive off the socket.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::str::FromStr;

/// Longest method token accepted before the request is rejected.
pub const MAX_METHOD_LENGTH: usize = 16;

/// Largest request head (request line plus headers) accepted.
pub const MAX_HEAD_LENGTH: usize = 64 * 1024;

const OK: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 22\r\nContent-Type: text/plain\r\n\r\nError 400: Bad Request";
const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 20\r\nContent-Type: text/plain\r\n\r\nError 404: Not Found";
const INTERNAL_ERROR: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 32\r\nContent-Type: text/plain\r\n\r\nError 500: Internal Server Error";

/// Request verbs understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("GET") {
            Ok(Method::Get)
        } else if s.eq_ignore_ascii_case("POST") {
            Ok(Method::Post)
        } else {
            Err(ParseError::UnknownMethod(s.to_string()))
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// A fully parsed request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRequest {
    pub method: Method,
    /// Request path, lowercased.
    pub path: String,
    /// Protocol version, uppercased.
    pub version: String,
    /// Header names keep the case of their last occurrence. A repeated name
    /// overwrites earlier ones, ignoring case.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl ParsedRequest {
    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Protocol parsing errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The method token is not a known verb
    UnknownMethod(String),
    /// The input ended before a method token was complete
    MissingMethod,
    /// A header line did not contain `": "`
    MalformedHeader(String),
    /// The request line and headers exceeded the size limit
    HeadTooLarge,
    /// The body exceeded the configured size limit
    BodyTooLarge(usize),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnknownMethod(method) => write!(f, "Unknown method: {}", method),
            ParseError::MissingMethod => write!(f, "Missing method token"),
            ParseError::MalformedHeader(line) => write!(f, "Malformed header: {}", line),
            ParseError::HeadTooLarge => write!(f, "Request head too large"),
            ParseError::BodyTooLarge(limit) => write!(f, "Body exceeds {} bytes", limit),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parser position within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Method,
    Path,
    Version,
    HeaderName,
    HeaderValue,
    Content,
    Invalid,
}

/// Incremental request parser.
///
/// Feed bytes with [`RequestParser::feed`] as they arrive and call
/// [`RequestParser::finish`] once the input is exhausted.
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    token: Vec<u8>,
    last: u8,
    header_name: String,
    head_len: usize,
    max_body: usize,
    request: ParsedRequest,
    body: BytesMut,
    content_length: Option<usize>,
    error: Option<ParseError>,
}

impl RequestParser {
    /// Create a parser that rejects bodies larger than `max_body` bytes.
    pub fn new(max_body: usize) -> Self {
        RequestParser {
            state: ParseState::Method,
            token: Vec::with_capacity(64),
            last: 0,
            header_name: String::new(),
            head_len: 0,
            max_body,
            request: ParsedRequest::default(),
            body: BytesMut::new(),
            content_length: None,
            error: None,
        }
    }

    /// Whether the head has been fully parsed.
    pub fn in_body(&self) -> bool {
        self.state == ParseState::Content
    }

    /// Declared body length, once the head is complete and it carried a
    /// parseable `Content-Length` header.
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Whether no further input can change the outcome.
    pub fn is_done(&self) -> bool {
        match self.state {
            ParseState::Invalid => true,
            ParseState::Content => self
                .content_length
                .is_some_and(|expected| self.body.len() >= expected),
            _ => false,
        }
    }

    /// Feed a chunk of input, returning the state after consuming it.
    pub fn feed(&mut self, input: &[u8]) -> ParseState {
        for (i, &byte) in input.iter().enumerate() {
            if self.state == ParseState::Content {
                self.push_body(&input[i..]);
                break;
            }

            self.step(byte);

            if self.state == ParseState::Invalid {
                break;
            }
        }
        self.state
    }

    /// Finish parsing and hand back the request.
    pub fn finish(mut self) -> Result<ParsedRequest, ParseError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.state == ParseState::Method {
            return Err(ParseError::MissingMethod);
        }
        self.request.body = self.body.freeze();
        Ok(self.request)
    }

    fn step(&mut self, byte: u8) {
        self.head_len += 1;
        if self.head_len > MAX_HEAD_LENGTH {
            self.fail(ParseError::HeadTooLarge);
            return;
        }

        let crlf = byte == b'\n' && self.last == b'\r';

        match self.state {
            ParseState::Method => {
                if byte == b' ' {
                    let token = String::from_utf8_lossy(&self.token).to_string();
                    match token.parse::<Method>() {
                        Ok(method) => {
                            self.request.method = method;
                            self.token.clear();
                            self.state = ParseState::Path;
                        }
                        Err(e) => self.fail(e),
                    }
                } else if self.token.len() >= MAX_METHOD_LENGTH {
                    let token = String::from_utf8_lossy(&self.token).to_string();
                    self.fail(ParseError::UnknownMethod(token));
                } else {
                    self.token.push(byte);
                }
            }

            ParseState::Path => {
                if byte == b' ' {
                    self.request.path = String::from_utf8_lossy(&self.token).to_lowercase();
                    self.token.clear();
                    self.state = ParseState::Version;
                } else {
                    self.token.push(byte);
                }
            }

            ParseState::Version => {
                if crlf {
                    self.request.version = String::from_utf8_lossy(&self.token).to_uppercase();
                    self.token.clear();
                    self.state = ParseState::HeaderName;
                } else if byte != b'\r' {
                    self.token.push(byte);
                }
            }

            ParseState::HeaderName => {
                if byte == b' ' && self.last == b':' {
                    // The colon was buffered; drop it from the name.
                    self.token.pop();
                    let name = String::from_utf8_lossy(&self.token).to_string();
                    self.request
                        .headers
                        .retain(|key, _| !key.eq_ignore_ascii_case(&name));
                    self.request.headers.insert(name.clone(), String::new());
                    self.header_name = name;
                    self.token.clear();
                    self.state = ParseState::HeaderValue;
                } else if crlf {
                    if self.token.is_empty() {
                        self.enter_content();
                    } else {
                        let line = String::from_utf8_lossy(&self.token).to_string();
                        self.fail(ParseError::MalformedHeader(line));
                    }
                } else if byte != b'\r' {
                    self.token.push(byte);
                }
            }

            ParseState::HeaderValue => {
                if crlf {
                    let value = String::from_utf8_lossy(&self.token).to_string();
                    self.request.headers.insert(self.header_name.clone(), value);
                    self.token.clear();
                    self.state = ParseState::HeaderName;
                } else if byte != b'\r' {
                    self.token.push(byte);
                }
            }

            ParseState::Content | ParseState::Invalid => {}
        }

        self.last = byte;
    }

    fn enter_content(&mut self) {
        self.content_length = self
            .request
            .header("content-length")
            .and_then(|value| value.trim().parse::<usize>().ok());
        self.state = ParseState::Content;
    }

    fn push_body(&mut self, bytes: &[u8]) {
        if self.body.len() + bytes.len() > self.max_body {
            self.fail(ParseError::BodyTooLarge(self.max_body));
            return;
        }
        self.body.put_slice(bytes);
    }

    fn fail(&mut self, error: ParseError) {
        self.error = Some(error);
        self.state = ParseState::Invalid;
    }
}

/// Parse a complete request held in memory.
pub fn parse(input: &[u8], max_body: usize) -> Result<ParsedRequest, ParseError> {
    let mut parser = RequestParser::new(max_body);
    parser.feed(input);
    parser.finish()
}

/// Response sent back on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `200 OK` with the handler's payload as body
    Ok(Bytes),
    BadRequest,
    NotFound,
    InternalError,
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::Ok(_) => 200,
            Response::BadRequest => 400,
            Response::NotFound => 404,
            Response::InternalError => 500,
        }
    }

    /// Serialize the status line, headers and body.
    pub fn encode(&self) -> BytesMut {
        match self {
            Response::Ok(body) => {
                let mut response = BytesMut::with_capacity(OK.len() + body.len());
                response.extend_from_slice(OK);
                response.extend_from_slice(body);
                response
            }
            Response::BadRequest => BytesMut::from(BAD_REQUEST),
            Response::NotFound => BytesMut::from(NOT_FOUND),
            Response::InternalError => BytesMut::from(INTERNAL_ERROR),
        }
    }
}
