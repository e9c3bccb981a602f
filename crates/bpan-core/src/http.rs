//! HTTP transport on libcurl.
//!
//! One function per request shape the engines need: a form-encoded POST, a
//! multipart file POST with upload progress, a HEAD probe, and a (optionally
//! ranged) GET streamed straight to a file. Cancellation is observed from
//! inside the transfer callbacks so a tripped token aborts mid-body.
//!
//! API calls carry a randomised realistic browser `User-Agent`; download
//! requests always identify as `pan.baidu.com` (the data plane rejects
//! anything else).

use curl::easy::{Easy, Form};
use rand::Rng;
use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::str;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::TransferError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Total budget for small API round-trips (precreate / create).
const API_TIMEOUT: Duration = Duration::from_secs(60);
/// Total budget for a single slice or part transfer.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(3600);
/// libcurl receive buffer for downloads (libcurl caps this at 512 KiB).
const DOWNLOAD_BUF_SIZE: usize = 512 * 1024;

/// The data plane expects this exact agent on HEAD/GET.
pub const DOWNLOAD_USER_AGENT: &str = "pan.baidu.com";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.2151.97",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
];

/// Picks a realistic browser agent for API calls.
pub fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Percent-encodes a single query/form value.
pub fn url_encode(value: &str) -> String {
    let mut easy = Easy::new();
    easy.url_encode(value.as_bytes())
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u32,
    pub body: Vec<u8>,
}

fn perform_error(e: curl::Error, cancel: &CancelToken) -> TransferError {
    if cancel.is_cancelled() || e.is_aborted_by_callback() {
        TransferError::Cancelled
    } else {
        TransferError::Network(e)
    }
}

fn non_2xx(status: u32, body: &[u8]) -> TransferError {
    let snippet = String::from_utf8_lossy(&body[..body.len().min(512)]).into_owned();
    TransferError::HttpStatus { status, body: snippet }
}

/// POSTs a form-urlencoded body and returns the response.
pub fn post_form(
    url: &str,
    body: &str,
    cancel: &CancelToken,
) -> Result<HttpResponse, TransferError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.post(true)?;
    easy.post_fields_copy(body.as_bytes())?;
    easy.useragent(random_user_agent())?;
    easy.connect_timeout(CONNECT_TIMEOUT)?;
    easy.timeout(API_TIMEOUT)?;
    easy.progress(true)?;

    let mut out = Vec::new();
    let perform_result;
    {
        let mut transfer = easy.transfer();
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.write_function(|data| {
            out.extend_from_slice(data);
            Ok(data.len())
        })?;
        perform_result = transfer.perform();
    }
    perform_result.map_err(|e| perform_error(e, cancel))?;

    let status = easy.response_code()?;
    if !(200..300).contains(&status) {
        return Err(non_2xx(status, &out));
    }
    Ok(HttpResponse { status, body: out })
}

/// POSTs `data` as multipart field `"file"` (filename = `filename`).
///
/// `progress` receives the bytes handed to the wire per callback; the
/// multipart framing is counted too, so totals can slightly exceed the raw
/// slice length (the progress sink clamps).
pub fn post_multipart(
    url: &str,
    filename: &str,
    data: &[u8],
    cancel: &CancelToken,
    progress: &dyn Fn(i64),
) -> Result<HttpResponse, TransferError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    let mut form = Form::new();
    form.part("file")
        .buffer(filename, data.to_vec())
        .add()
        .map_err(|e| TransferError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
    easy.httppost(form)?;
    easy.useragent(random_user_agent())?;
    easy.connect_timeout(CONNECT_TIMEOUT)?;
    easy.timeout(TRANSFER_TIMEOUT)?;
    easy.progress(true)?;

    let mut out = Vec::new();
    let uploaded = Cell::new(0u64);
    let perform_result;
    {
        let mut transfer = easy.transfer();
        transfer.progress_function(|_, _, _, ulnow| {
            let now = ulnow as u64;
            if now > uploaded.get() {
                progress((now - uploaded.get()) as i64);
                uploaded.set(now);
            }
            !cancel.is_cancelled()
        })?;
        transfer.write_function(|data| {
            out.extend_from_slice(data);
            Ok(data.len())
        })?;
        perform_result = transfer.perform();
    }
    perform_result.map_err(|e| perform_error(e, cancel))?;

    let status = easy.response_code()?;
    if !(200..300).contains(&status) {
        return Err(non_2xx(status, &out));
    }
    Ok(HttpResponse { status, body: out })
}

/// What a HEAD probe learned about the remote file.
#[derive(Debug, Clone, Copy)]
pub struct HeadInfo {
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
}

/// Issues a HEAD request and parses `Content-Length` / `Accept-Ranges`.
pub fn head_probe(url: &str, cancel: &CancelToken) -> Result<HeadInfo, TransferError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.useragent(DOWNLOAD_USER_AGENT)?;
    easy.connect_timeout(CONNECT_TIMEOUT)?;
    easy.timeout(API_TIMEOUT)?;
    easy.progress(true)?;

    let mut headers: Vec<String> = Vec::new();
    let perform_result;
    {
        let mut transfer = easy.transfer();
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                // curl emits one header block per hop when following
                // redirects; keep only the final response's headers.
                if line.starts_with("HTTP/") {
                    headers.clear();
                }
                headers.push(line.to_string());
            }
            true
        })?;
        perform_result = transfer.perform();
    }
    perform_result.map_err(|e| perform_error(e, cancel))?;

    let status = easy.response_code()?;
    if !(200..300).contains(&status) {
        return Err(non_2xx(status, &[]));
    }

    let mut info = HeadInfo { content_length: None, accept_ranges: false };
    for line in &headers {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                info.content_length = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                info.accept_ranges = value.eq_ignore_ascii_case("bytes");
            }
        }
    }
    Ok(info)
}

/// Streams a GET (ranged when `range` is set) into the file at `dest`.
///
/// Body bytes of an error status are never written to `dest`; they are
/// captured (truncated) for the error message instead, and the file is
/// removed. Returns the number of payload bytes written on success.
pub fn get_to_file(
    url: &str,
    range: Option<(u64, u64)>,
    dest: &Path,
    cancel: &CancelToken,
    progress: &dyn Fn(i64),
) -> Result<u64, TransferError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.useragent(DOWNLOAD_USER_AGENT)?;
    easy.connect_timeout(CONNECT_TIMEOUT)?;
    easy.timeout(TRANSFER_TIMEOUT)?;
    easy.buffer_size(DOWNLOAD_BUF_SIZE)?;
    if let Some((from, to)) = range {
        easy.range(&format!("{}-{}", from, to))?;
    }

    let mut file = File::create(dest)?;
    let status = Cell::new(0u32);
    let mut written: u64 = 0;
    let mut error_body: Vec<u8> = Vec::new();
    let mut io_error: Option<io::Error> = None;
    let perform_result;
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                if line.starts_with("HTTP/") {
                    if let Some(code) =
                        line.split_whitespace().nth(1).and_then(|t| t.parse::<u32>().ok())
                    {
                        status.set(code);
                    }
                }
            }
            true
        })?;
        transfer.write_function(|data| {
            if cancel.is_cancelled() {
                return Ok(0);
            }
            if status.get() >= 300 {
                if error_body.len() < 512 {
                    error_body.extend_from_slice(data);
                }
                return Ok(data.len());
            }
            if let Err(e) = file.write_all(data) {
                io_error = Some(e);
                return Ok(0);
            }
            written += data.len() as u64;
            progress(data.len() as i64);
            Ok(data.len())
        })?;
        perform_result = transfer.perform();
    }

    if let Err(e) = perform_result {
        cancel.check()?;
        if let Some(ioe) = io_error {
            return Err(TransferError::Io(ioe));
        }
        return Err(TransferError::Network(e));
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        let _ = fs::remove_file(dest);
        return Err(non_2xx(code, &error_body));
    }
    Ok(written)
}
