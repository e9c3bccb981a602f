//! Serialisable transfer snapshots.
//!
//! A snapshot is everything needed to resume an interrupted transfer. The
//! engine mutates it in place while running and returns it alongside any
//! error so the caller can persist it. Field names are stable: previously
//! persisted JSON must keep parsing across releases.

use serde::{Deserialize, Serialize};

/// State of an interrupted upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSnapshot {
    /// Remote path (already sanitised).
    pub path: String,
    pub local_path: String,
    /// Id issued by the service at precreate; scopes every slice upload.
    pub upload_id: String,
    pub file_md5: String,
    pub file_mtime: i64,
    /// True until the upload is committed.
    pub recoverable: bool,
    pub done_size: u64,
    pub total_size: u64,
    pub slice_size: u64,
    pub slice_num: usize,
    /// Per-slice MD5 as returned by the server; empty string means the
    /// slice has not been uploaded yet.
    pub done_slices: Vec<String>,
}

impl UploadSnapshot {
    /// Indices of slices still to upload.
    pub fn missing_slices(&self) -> Vec<usize> {
        self.done_slices
            .iter()
            .enumerate()
            .filter(|(_, md5)| md5.is_empty())
            .map(|(i, _)| i)
            .collect()
    }
}

/// One downloaded byte range; `file_path` is empty until the part's temp
/// file has been fully written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPartSnapshot {
    pub from: u64,
    pub to: u64,
    pub file_path: String,
}

impl DownloadPartSnapshot {
    /// Part length in bytes; `from` and `to` are inclusive.
    pub fn part_len(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// State of an interrupted download.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    pub fs_id: u64,
    pub file_md5: String,
    pub save_path: String,
    /// True until the parts have been merged into the destination.
    pub recoverable: bool,
    /// Tier captured at planning time; a different tier on resume means a
    /// different part plan, which discards the snapshot.
    pub vip_type: i32,
    pub done_size: u64,
    pub total_size: u64,
    pub part_size: u64,
    pub total_part: usize,
    pub done_parts: Vec<DownloadPartSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_snapshot_json_field_names_are_stable() {
        let snap = UploadSnapshot {
            path: "/apps/a.bin".into(),
            local_path: "/tmp/a.bin".into(),
            upload_id: "uid-1".into(),
            file_md5: "abc".into(),
            file_mtime: 1627288705,
            recoverable: true,
            done_size: 8,
            total_size: 12,
            slice_size: 4,
            slice_num: 3,
            done_slices: vec!["m0".into(), "m1".into(), String::new()],
        };
        let json = serde_json::to_value(&snap).unwrap();
        for key in [
            "path", "local_path", "upload_id", "file_md5", "file_mtime", "recoverable",
            "done_size", "total_size", "slice_size", "slice_num", "done_slices",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
    }

    #[test]
    fn upload_snapshot_roundtrip() {
        let snap = UploadSnapshot {
            path: "/x".into(),
            upload_id: "u".into(),
            slice_num: 2,
            done_slices: vec![String::new(), "md5".into()],
            ..Default::default()
        };
        let json = serde_json::to_string(&snap).unwrap();
        let back: UploadSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn missing_slices_lists_empty_slots() {
        let snap = UploadSnapshot {
            slice_num: 3,
            done_slices: vec!["a".into(), String::new(), String::new()],
            ..Default::default()
        };
        assert_eq!(snap.missing_slices(), vec![1, 2]);
    }

    #[test]
    fn download_snapshot_roundtrip() {
        let snap = DownloadSnapshot {
            fs_id: 714504460793248,
            file_md5: "44090321".into(),
            save_path: "/tmp/out.bin".into(),
            recoverable: true,
            vip_type: 2,
            done_size: 20,
            total_size: 30,
            part_size: 10,
            total_part: 3,
            done_parts: vec![
                DownloadPartSnapshot { from: 0, to: 10, file_path: "/t/p0".into() },
                DownloadPartSnapshot { from: 11, to: 21, file_path: String::new() },
                DownloadPartSnapshot { from: 22, to: 29, file_path: "/t/p2".into() },
            ],
        };
        let json = serde_json::to_string(&snap).unwrap();
        let back: DownloadSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn download_snapshot_json_field_names_are_stable() {
        let json = serde_json::to_value(DownloadSnapshot::default()).unwrap();
        for key in [
            "fs_id", "file_md5", "save_path", "recoverable", "vip_type", "done_size",
            "total_size", "part_size", "total_part", "done_parts",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
    }

    #[test]
    fn part_len_is_inclusive() {
        let p = DownloadPartSnapshot { from: 10, to: 19, file_path: String::new() };
        assert_eq!(p.part_len(), 10);
    }
}
