//! Slice and part range math.
//!
//! Uploads are cut into `slice_size` runs (the last one may be short).
//! Downloads are cut into at most [`MAX_PARTS`] inclusive byte ranges that
//! tile `[0, total_size)` exactly; the arithmetic matches what earlier
//! snapshots were planned with, so resumed downloads keep their part
//! boundaries.

/// Hard cap on the number of download parts per file.
pub const MAX_PARTS: usize = 100;

/// Number of upload slices: `ceil(total_size / slice_size)`.
pub fn slice_count(total_size: u64, slice_size: u64) -> usize {
    if total_size == 0 || slice_size == 0 {
        return 0;
    }
    (total_size.div_ceil(slice_size)) as usize
}

/// Byte length of slice `index` out of `slice_count(total_size, slice_size)`.
pub fn slice_len(total_size: u64, slice_size: u64, index: usize) -> u64 {
    let offset = slice_size * index as u64;
    slice_size.min(total_size.saturating_sub(offset))
}

/// One planned download range; `from` and `to` are inclusive offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub from: u64,
    pub to: u64,
}

impl PartRange {
    pub fn part_len(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// Plans the download ranges for a file of `total_size` bytes.
///
/// `total_part = min(ceil(total_size / part_size), MAX_PARTS)` and
/// `each_size = total_size / total_part`; every part starts one byte after
/// its predecessor ends and the last part runs to `total_size - 1`. Returns
/// an empty plan for a zero-size file.
pub fn plan_parts(total_size: u64, part_size: u64) -> Vec<PartRange> {
    if total_size == 0 || part_size == 0 {
        return Vec::new();
    }
    let total_part = (total_size.div_ceil(part_size) as usize).min(MAX_PARTS);
    let each_size = total_size / total_part as u64;

    let mut out: Vec<PartRange> = Vec::with_capacity(total_part);
    for i in 0..total_part {
        let from = if i == 0 { 0 } else { out[i - 1].to + 1 };
        let to = if i < total_part - 1 {
            from + each_size
        } else {
            total_size - 1
        };
        out.push(PartRange { from, to });
    }
    out
}
