//! Splits an object into ordered parts.

use crate::models::part::PartDescriptor;

/// Remote multipart storage refuses uploads with more parts than this.
pub const MAX_PARTS: u64 = 10_000;

/// Padding added to the recomputed chunk size when the part cap kicks in.
const CAP_PADDING: u64 = 1024;

/// Offsets and effective chunk size for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_size: u64,
    pub chunk_size: u64,

    /// Start offset of every part, strictly increasing from 0.
    pub offsets: Vec<u64>,
}

/// Plan the parts of an object of `total_size` bytes.
///
/// `nominal_chunk_size` is raised when it would need more than [`MAX_PARTS`]
/// parts. A zero-byte object yields one zero-length part at offset 0.
pub fn plan(total_size: u64, nominal_chunk_size: u64) -> ChunkPlan {
    let mut chunk_size = nominal_chunk_size.max(1);
    if total_size.div_ceil(chunk_size) > MAX_PARTS {
        chunk_size = total_size / MAX_PARTS + CAP_PADDING;
    }

    let mut offsets = vec![0];
    let mut next = chunk_size;
    while next < total_size {
        offsets.push(next);
        next += chunk_size;
    }

    ChunkPlan {
        total_size,
        chunk_size,
        offsets,
    }
}

impl ChunkPlan {
    pub fn part_count(&self) -> usize {
        self.offsets.len()
    }

    /// Every part of the plan, in part-number order.
    pub fn parts(&self) -> impl Iterator<Item = PartDescriptor> + '_ {
        let total_parts = self.offsets.len() as i32;
        self.offsets.iter().enumerate().map(move |(index, &offset)| {
            let length = (self.total_size - offset).min(self.chunk_size);
            PartDescriptor {
                part_number: index as i32 + 1,
                offset,
                length,
                total_parts,
            }
        })
    }

    /// The part with the given 1-based number, if the plan has one.
    pub fn part(&self, part_number: i32) -> Option<PartDescriptor> {
        if part_number < 1 {
            return None;
        }
        self.parts().nth(part_number as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn assert_well_formed(plan: &ChunkPlan) {
        assert_eq!(plan.offsets.first(), Some(&0));
        assert!(plan.offsets.windows(2).all(|w| w[0] < w[1]));
        let sum: u64 = plan.parts().map(|p| p.length).sum();
        assert_eq!(sum, plan.total_size);
        if plan.total_size > 0 {
            assert!(plan.parts().all(|p| p.length > 0));
        }
    }

    #[test]
    fn parts_cover_object_exactly() {
        let sizes = [1, 2, 7, 1023, 1024, 1025, 4096, 99_999, 5 * MB + 3];
        let chunks = [1, 3, 512, 1024, 4096, MB];
        for &size in &sizes {
            for &chunk in &chunks {
                let plan = plan(size, chunk);
                assert_well_formed(&plan);
                assert!(plan.part_count() as u64 <= MAX_PARTS);
            }
        }
    }

    #[test]
    fn even_split_has_no_trailing_empty_part() {
        let plan = plan(120 * MB, 10 * MB);
        assert_eq!(plan.part_count(), 12);
        assert!(plan.parts().all(|p| p.length == 10 * MB));
        assert_eq!(plan.part(12).map(|p| p.offset), Some(110 * MB));
        assert_eq!(plan.part(13), None);
        assert_eq!(plan.part(0), None);
    }

    #[test]
    fn last_part_is_the_remainder() {
        let plan = plan(26 * MB, 10 * MB);
        let parts: Vec<_> = plan.parts().collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].length, 6 * MB);
        assert_eq!(parts[2].total_parts, 3);
        assert_eq!(parts[2].last_byte(), 26 * MB - 1);
    }

    #[test]
    fn part_cap_recomputes_chunk_size() {
        let plan = plan(100_005, 1);
        assert_eq!(plan.chunk_size, 100_005 / MAX_PARTS + CAP_PADDING);
        assert!(plan.part_count() as u64 <= MAX_PARTS);
        assert_well_formed(&plan);
    }

    #[test]
    fn huge_object_stays_under_cap() {
        let plan = plan(5 * 1024 * 1024 * MB, 5 * MB);
        assert!(plan.part_count() as u64 <= MAX_PARTS);
        assert_well_formed(&plan);
    }

    #[test]
    fn empty_object_has_one_empty_part() {
        let plan = plan(0, 10 * MB);
        let parts: Vec<_> = plan.parts().collect();
        assert_eq!(
            parts,
            vec![PartDescriptor {
                part_number: 1,
                offset: 0,
                length: 0,
                total_parts: 1,
            }]
        );
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let plan = plan(3, 0);
        assert_eq!(plan.chunk_size, 1);
        assert_eq!(plan.part_count(), 3);
    }
}
