//! Wire envelopes for the cloud-disk REST surface.
//!
//! Every response is JSON with an `errno` field; zero means success and
//! anything else is surfaced as a protocol error carrying `errmsg`. The
//! `request_id` of the dedup branch's `info` record can arrive as a float in
//! scientific notation and is normalised to `u64` during deserialisation.

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::error::TransferError;

/// Lenient `u64`: accepts an unsigned integer, a (scientific-notation)
/// float, or a numeric string.
fn de_u64_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct Lenient;

    impl de::Visitor<'_> for Lenient {
        type Value = u64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("an unsigned integer, float, or numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            Ok(v.max(0) as u64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u64, E> {
            Ok(v as u64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            if let Ok(n) = v.parse::<u64>() {
                return Ok(n);
            }
            v.parse::<f64>()
                .map(|f| f as u64)
                .map_err(|_| E::custom(format!("invalid request_id: {v}")))
        }
    }

    deserializer.deserialize_any(Lenient)
}

/// `partseq` comes back as a string from some service versions and as an
/// integer from others.
fn de_part_seq<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Seq;

    impl de::Visitor<'_> for Seq {
        type Value = Option<u32>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a slice sequence number as integer or string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v as u32))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            v.parse::<u32>()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid partseq: {v}")))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Seq)
}

/// The committed file record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub errno: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub request_id: u64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub server_filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub fs_id: u64,
    #[serde(default)]
    pub isdir: i32,
}

/// File record inside the dedup branch of precreate. Only this object's
/// `request_id` exhibits the scientific-notation quirk, so only it gets the
/// lenient parser.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DedupInfo {
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub request_id: u64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub fs_id: u64,
    #[serde(default)]
    pub isdir: i32,
}

impl From<DedupInfo> for UploadResponse {
    fn from(info: DedupInfo) -> Self {
        UploadResponse {
            errno: 0,
            errmsg: String::new(),
            request_id: info.request_id,
            path: info.path,
            server_filename: String::new(),
            size: info.size,
            md5: info.md5,
            fs_id: info.fs_id,
            isdir: info.isdir,
        }
    }
}

/// Response to the precreate handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreCreateResponse {
    #[serde(default)]
    pub errno: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub request_id: u64,
    #[serde(default)]
    pub uploadid: String,
    #[serde(default)]
    pub path: String,
    /// 2 means the server already holds this content (dedup hit) and `info`
    /// carries the final file record.
    #[serde(default)]
    pub return_type: i32,
    /// Slice indexes the server still wants (informational).
    #[serde(default)]
    pub block_list: Vec<i64>,
    #[serde(default)]
    pub info: Option<DedupInfo>,
}

impl PreCreateResponse {
    pub fn is_dedup_hit(&self) -> bool {
        self.return_type == 2
    }
}

/// Response to one slice upload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SliceUploadResponse {
    #[serde(default)]
    pub errno: i64,
    #[serde(default)]
    pub errmsg: String,
    /// Server-computed MD5 of the received slice; goes into the commit
    /// `block_list` at this slice's position.
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub uploadid: String,
    #[serde(default, deserialize_with = "de_part_seq")]
    pub partseq: Option<u32>,
}

fn check_errno(errno: i64, errmsg: &str) -> Result<(), TransferError> {
    if errno != 0 {
        return Err(TransferError::Protocol { errno, errmsg: errmsg.to_string() });
    }
    Ok(())
}

pub fn parse_precreate(body: &[u8]) -> Result<PreCreateResponse, TransferError> {
    let resp: PreCreateResponse = serde_json::from_slice(body)?;
    check_errno(resp.errno, &resp.errmsg)?;
    Ok(resp)
}

pub fn parse_slice_upload(body: &[u8]) -> Result<SliceUploadResponse, TransferError> {
    let resp: SliceUploadResponse = serde_json::from_slice(body)?;
    check_errno(resp.errno, &resp.errmsg)?;
    Ok(resp)
}

pub fn parse_commit(body: &[u8]) -> Result<UploadResponse, TransferError> {
    let resp: UploadResponse = serde_json::from_slice(body)?;
    check_errno(resp.errno, &resp.errmsg)?;
    Ok(resp)
}
