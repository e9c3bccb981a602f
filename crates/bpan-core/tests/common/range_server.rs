//! Minimal HTTP/1.1 server with HEAD and Range GET support for download
//! tests.
//!
//! Serves a single static body. HEAD answers with `Content-Length` and
//! (optionally) `Accept-Ranges: bytes`; ranged GETs answer `206 Partial
//! Content`. Failures can be injected per range start offset to exercise
//! the retry path.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
    /// Sleep this long before answering a GET (0 = answer immediately).
    pub get_delay_ms: u64,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self { support_ranges: true, advertise_ranges: true, get_delay_ms: 0 }
    }
}

#[derive(Default)]
pub struct RangeState {
    /// Log of GET requests: the requested range, if any.
    pub gets: Mutex<Vec<Option<(u64, u64)>>>,
    /// Remaining injected failures keyed by range start offset.
    pub fail_starts: Mutex<HashMap<u64, u32>>,
}

impl RangeState {
    /// Makes the next `count` GETs whose range starts at `from` fail with
    /// HTTP 500.
    pub fn fail_next(&self, from: u64, count: u32) {
        self.fail_starts.lock().unwrap().insert(from, count);
    }

    pub fn get_count(&self) -> usize {
        self.gets.lock().unwrap().len()
    }

    fn should_fail(&self, from: u64) -> bool {
        let mut map = self.fail_starts.lock().unwrap();
        if let Some(left) = map.get_mut(&from) {
            if *left > 0 {
                *left -= 1;
                return true;
            }
        }
        false
    }
}

pub struct RangeServer {
    pub url: String,
    pub state: Arc<RangeState>,
}

/// Starts a server in a background thread serving `body`. The server runs
/// until the process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let state = Arc::new(RangeState::default());
    let server_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let state = Arc::clone(&server_state);
            thread::spawn(move || handle(stream, &body, opts, &state));
        }
    });
    RangeServer { url: format!("http://127.0.0.1:{}/file.bin", port), state }
}

fn handle(mut stream: TcpStream, body: &[u8], opts: RangeServerOptions, state: &RangeState) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(5)));

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return,
        }
    }
    let request = String::from_utf8_lossy(&buf).into_owned();
    let (method, range) = parse_request(&request);
    let total = body.len() as u64;

    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
            total, accept_ranges
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if method.eq_ignore_ascii_case("GET") {
        state.gets.lock().unwrap().push(range);
        if opts.get_delay_ms > 0 {
            thread::sleep(std::time::Duration::from_millis(opts.get_delay_ms));
        }
        if let Some((from, _)) = range {
            if state.should_fail(from) {
                let _ = stream.write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 5\r\nConnection: close\r\n\r\noops!",
                );
                return;
            }
        }

        let (status, slice) = if opts.support_ranges {
            match range {
                Some((from, to_incl)) => {
                    let from = from.min(total) as usize;
                    let to_excl = (to_incl.saturating_add(1)).min(total) as usize;
                    ("206 Partial Content", &body[from..to_excl.max(from)])
                }
                None => ("200 OK", body),
            }
        } else {
            ("200 OK", body)
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
            status,
            slice.len(),
            accept_ranges
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(slice);
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
}

/// Returns (method, optional (start, end_inclusive) from `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(ranges) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = ranges.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = if b.trim().is_empty() {
                            u64::MAX
                        } else {
                            b.trim().parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end));
                    }
                }
            }
        }
    }
    (method, range)
}
