//! VIP tier policy: slice size, part size, and parallelism defaults.
//!
//! The service grants bigger chunks and parallel part downloads to paying
//! tiers. An explicit caller override always takes precedence over the
//! tier-derived value; the engines apply that precedence.

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// User VIP tier as reported by the account endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VipTier {
    Free,
    Member,
    Super,
}

impl VipTier {
    /// Maps the service's `vip_type` integer; unknown values fall back to
    /// the free tier (the most conservative chunking).
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => VipTier::Member,
            2 => VipTier::Super,
            _ => VipTier::Free,
        }
    }

    pub fn as_code(self) -> i32 {
        match self {
            VipTier::Free => 0,
            VipTier::Member => 1,
            VipTier::Super => 2,
        }
    }

    /// Upload slice size, clamped to the file size (a file smaller than one
    /// slice uploads as a single short slice).
    pub fn upload_slice_size(self, file_size: u64) -> u64 {
        let slice = match self {
            VipTier::Free => 4 * MIB,
            VipTier::Member => 16 * MIB,
            VipTier::Super => 32 * MIB,
        };
        slice.min(file_size)
    }

    /// Download part size: 10 MiB, or 50 MiB for the super tier.
    pub fn download_part_size(self) -> u64 {
        match self {
            VipTier::Super => 50 * MIB,
            _ => 10 * MIB,
        }
    }

    /// Concurrent part downloads: only the super tier may fan out.
    pub fn download_parallelism(self) -> usize {
        match self {
            VipTier::Super => 5,
            _ => 1,
        }
    }
}
