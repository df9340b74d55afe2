// Minimal HTTP/1.1 request parsing and response writing for the query server.
use serde::Serialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use crate::error::{AuditError, Result};

const MAX_HEADER_LINES: usize = 100;
const MAX_LINE_LEN: usize = 8 * 1024;

#[derive(Debug)]
pub(crate) struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

pub(crate) fn parse_request(stream: &TcpStream) -> Result<Request> {
    let mut reader = BufReader::new(stream);

    let request_line = read_line(&mut reader)?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(AuditError::Parse(format!(
            "malformed request line: {}",
            request_line.trim()
        )));
    }
    let method = parts[0].to_uppercase();
    let (path, query) = split_target(parts[1]);

    // headers are drained and ignored; every route is a body-less GET
    for _ in 0..MAX_HEADER_LINES {
        let line = read_line(&mut reader)?;
        if line.trim().is_empty() {
            break;
        }
    }

    Ok(Request {
        method,
        path,
        query,
    })
}

fn read_line(reader: &mut BufReader<&TcpStream>) -> Result<String> {
    let mut line = String::new();
    let n = reader
        .by_ref()
        .take(MAX_LINE_LEN as u64)
        .read_line(&mut line)
        .map_err(|e| AuditError::Parse(format!("failed to read request: {e}")))?;
    if n == 0 && line.is_empty() {
        return Err(AuditError::Parse("connection closed before request".into()));
    }
    Ok(line)
}

/// Split `/path?a=1&b=2` into the path and its decoded query parameters.
pub(crate) fn split_target(target: &str) -> (String, HashMap<String, String>) {
    match target.split_once('?') {
        Some((path, raw)) => (path.to_string(), parse_query(raw)),
        None => (target.to_string(), HashMap::new()),
    }
}

/// Percent-decode `k=v&...` pairs; `+` is a space. First occurrence of a key wins.
pub(crate) fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key);
        if !params.contains_key(&key) {
            params.insert(key, decode(value));
        }
    }
    params
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

pub(crate) fn write_response(stream: &TcpStream, status: u16, body: &str) -> Result<()> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        len = body.len(),
    );
    let mut w = stream;
    w.write_all(response.as_bytes())
        .and_then(|_| w.flush())
        .map_err(|e| AuditError::Parse(format!("failed to write response: {e}")))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| r#"{"error":"serialization failed"}"#.to_string())
}
