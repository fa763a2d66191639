//! Partition planning: page counts and page ranges

use std::ops::RangeInclusive;

/// Number of pages needed to cover `total_count` records.
///
/// `page_size` of zero is treated as one so a bad flag can't divide by zero.
pub fn page_count(total_count: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    total_count.div_ceil(size).min(u64::from(u32::MAX)) as u32
}

/// Pages of one run, 1-indexed and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    pub total_count: u64,
    pub page_size: u32,
    pub page_count: u32,
}

impl PagePlan {
    pub fn new(total_count: u64, page_size: u32) -> Self {
        Self {
            total_count,
            page_size,
            page_count: page_count(total_count, page_size),
        }
    }

    /// `1..=page_count`; empty when there is nothing to fetch.
    pub fn pages(&self) -> RangeInclusive<u32> {
        1..=self.page_count
    }

    /// Split pages into `partitions` contiguous lanes, sizes differing by at most one.
    ///
    /// Queue mode doesn't need this (lanes claim jobs), but it is what an
    /// operator sees in the plan log line.
    pub fn lanes(&self, partitions: usize) -> Vec<RangeInclusive<u32>> {
        let partitions = partitions.max(1) as u32;
        let base = self.page_count / partitions;
        let extra = self.page_count % partitions;
        let mut next = 1u32;
        let mut lanes = Vec::new();
        for lane in 0..partitions {
            let len = base + u32::from(lane < extra);
            if len == 0 {
                continue;
            }
            lanes.push(next..=next + len - 1);
            next += len;
        }
        lanes
    }
}
