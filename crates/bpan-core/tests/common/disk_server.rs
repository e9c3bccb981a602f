//! Mock cloud-disk API server for upload tests.
//!
//! Implements the three upload endpoints (precreate, superfile2 slice
//! upload, create) over plain TCP. Slices are stored per `partseq` and
//! assembled at commit so tests can compare the round-tripped bytes.
//! Supports dedup mode (precreate answers `return_type == 2` with a
//! scientific-notation `request_id` in the info record, as the real service
//! does) and per-slice failure injection.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// File record the server pretends to already hold (dedup mode).
#[derive(Debug, Clone)]
pub struct DedupRecord {
    pub size: u64,
    pub md5: String,
    pub fs_id: u64,
    pub path: String,
}

/// What `create` assembled.
#[derive(Debug, Clone)]
pub struct Committed {
    pub bytes: Vec<u8>,
    pub md5: String,
    pub size: u64,
    pub path: String,
}

#[derive(Default)]
pub struct DiskState {
    pub dedup: Mutex<Option<DedupRecord>>,
    /// partseq -> number of upcoming slice requests to fail with HTTP 500.
    pub fail_slices: Mutex<HashMap<u32, u32>>,
    pub precreate_count: AtomicUsize,
    pub create_count: AtomicUsize,
    /// Every superfile2 request's partseq, including failed attempts.
    pub slice_requests: Mutex<Vec<u32>>,
    slices: Mutex<HashMap<u32, Vec<u8>>>,
    pub committed: Mutex<Option<Committed>>,
    upload_ids: AtomicUsize,
}

impl DiskState {
    pub fn enable_dedup(&self, record: DedupRecord) {
        *self.dedup.lock().unwrap() = Some(record);
    }

    /// Fails the next `count` uploads of slice `partseq` with HTTP 500.
    pub fn fail_slice(&self, partseq: u32, count: u32) {
        self.fail_slices.lock().unwrap().insert(partseq, count);
    }

    pub fn clear_slice_failures(&self) {
        self.fail_slices.lock().unwrap().clear();
    }

    pub fn slice_request_count(&self, partseq: u32) -> usize {
        self.slice_requests.lock().unwrap().iter().filter(|&&s| s == partseq).count()
    }

    pub fn stored_slice_count(&self) -> usize {
        self.slices.lock().unwrap().len()
    }

    pub fn committed(&self) -> Option<Committed> {
        self.committed.lock().unwrap().clone()
    }

    fn should_fail(&self, partseq: u32) -> bool {
        let mut map = self.fail_slices.lock().unwrap();
        if let Some(left) = map.get_mut(&partseq) {
            if *left > 0 {
                *left -= 1;
                return true;
            }
        }
        false
    }
}

pub struct DiskServer {
    pub url: String,
    pub state: Arc<DiskState>,
}

pub fn start() -> DiskServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(DiskState::default());
    let server_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&server_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    DiskServer { url: format!("http://127.0.0.1:{}", port), state }
}

struct Request {
    target: String,
    content_type: String,
    body: Vec<u8>,
}

fn handle(mut stream: TcpStream, state: &DiskState) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(10)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(10)));
    let req = match read_request(&mut stream) {
        Some(req) => req,
        None => return,
    };

    if req.target.contains("method=precreate") {
        state.precreate_count.fetch_add(1, Ordering::SeqCst);
        if let Some(record) = state.dedup.lock().unwrap().clone() {
            // The real service serialises the dedup info request_id as a
            // float in scientific notation.
            let body = format!(
                concat!(
                    r#"{{"errno":0,"return_type":2,"request_id":182116007115598010,"#,
                    r#""info":{{"size":{},"md5":"{}","fs_id":{},"path":"{}","isdir":0,"#,
                    r#""request_id":1.821160071156e+17}}}}"#
                ),
                record.size, record.md5, record.fs_id, record.path
            );
            respond_json(&mut stream, 200, &body);
            return;
        }
        let id = state.upload_ids.fetch_add(1, Ordering::SeqCst);
        let body = format!(
            r#"{{"errno":0,"uploadid":"N1-{}","return_type":1,"block_list":[],"request_id":42}}"#,
            id
        );
        respond_json(&mut stream, 200, &body);
        return;
    }

    if req.target.contains("superfile2") {
        let params = parse_query(&req.target);
        let partseq: u32 = params.get("partseq").and_then(|s| s.parse().ok()).unwrap_or(0);
        state.slice_requests.lock().unwrap().push(partseq);
        if state.should_fail(partseq) {
            respond_json(&mut stream, 500, r#"{"errmsg":"injected failure"}"#);
            return;
        }
        let data = match multipart_file_content(&req.content_type, &req.body) {
            Some(data) => data,
            None => {
                respond_json(&mut stream, 200, r#"{"errno":2,"errmsg":"bad multipart body"}"#);
                return;
            }
        };
        let md5 = hex_md5(&data);
        state.slices.lock().unwrap().insert(partseq, data);
        let uploadid = params.get("uploadid").cloned().unwrap_or_default();
        // partseq echoed as a string, like the PHP-era service.
        let body = format!(
            r#"{{"errno":0,"md5":"{}","uploadid":"{}","partseq":"{}"}}"#,
            md5, uploadid, partseq
        );
        respond_json(&mut stream, 200, &body);
        return;
    }

    if req.target.contains("method=create") {
        state.create_count.fetch_add(1, Ordering::SeqCst);
        let form = parse_form(&req.body);
        let size: u64 = form.get("size").and_then(|s| s.parse().ok()).unwrap_or(0);
        let path = form.get("path").cloned().unwrap_or_default();
        let block_list: Vec<String> = form
            .get("block_list")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();

        let slices = state.slices.lock().unwrap();
        let mut assembled = Vec::new();
        for (i, expected_md5) in block_list.iter().enumerate() {
            match slices.get(&(i as u32)) {
                Some(data) if hex_md5(data) == *expected_md5 => {
                    assembled.extend_from_slice(data);
                }
                _ => {
                    respond_json(
                        &mut stream,
                        200,
                        r#"{"errno":2,"errmsg":"block_list does not match uploaded slices"}"#,
                    );
                    return;
                }
            }
        }
        drop(slices);

        if assembled.len() as u64 != size {
            respond_json(&mut stream, 200, r#"{"errno":2,"errmsg":"size mismatch"}"#);
            return;
        }
        let md5 = hex_md5(&assembled);
        let name = path.rsplit('/').next().unwrap_or("file").to_string();
        let body = format!(
            concat!(
                r#"{{"errno":0,"path":"{}","server_filename":"{}","size":{},"#,
                r#""md5":"{}","fs_id":99,"isdir":0,"request_id":43}}"#
            ),
            path, name, size, md5
        );
        *state.committed.lock().unwrap() =
            Some(Committed { bytes: assembled, md5, size, path });
        respond_json(&mut stream, 200, &body);
        return;
    }

    respond_json(&mut stream, 404, r#"{"errmsg":"no such endpoint"}"#);
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16384];
    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let target = request_line.split_whitespace().nth(1)?.to_string();

    let mut content_length = 0usize;
    let mut content_type = String::new();
    let mut expect_continue = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type = value.to_string();
            } else if name.eq_ignore_ascii_case("expect")
                && value.eq_ignore_ascii_case("100-continue")
            {
                expect_continue = true;
            }
        }
    }

    if expect_continue {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").ok()?;
    }

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }
    Some(Request { target, content_type, body })
}

fn respond_json(stream: &mut TcpStream, status: u32, body: &str) {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

/// Extracts the content of the first file field from a multipart body.
fn multipart_file_content(content_type: &str, body: &[u8]) -> Option<Vec<u8>> {
    let boundary = content_type.split("boundary=").nth(1)?.trim().trim_matches('"');
    let marker = format!("--{}", boundary);
    let start = find(body, marker.as_bytes())?;
    let content_start = find(&body[start..], b"\r\n\r\n")? + start + 4;
    let closing = format!("\r\n--{}", boundary);
    let content_end = find(&body[content_start..], closing.as_bytes())? + content_start;
    Some(body[content_start..content_end].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn hex_md5(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Parses `k=v&k=v` query or form pairs with percent-decoding.
fn parse_pairs(s: &str) -> HashMap<String, String> {
    s.split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((percent_decode(k), percent_decode(v)))
        })
        .collect()
}

fn parse_query(target: &str) -> HashMap<String, String> {
    match target.split_once('?') {
        Some((_, query)) => parse_pairs(query),
        None => HashMap::new(),
    }
}

fn parse_form(body: &[u8]) -> HashMap<String, String> {
    parse_pairs(&String::from_utf8_lossy(body))
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
