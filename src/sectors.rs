//! Sector bookkeeping of a region file.

use crate::region::ChunkMetadata;
use bitvec::prelude::*;
use std::ops::Range;

/// First two sectors are used to store header.
pub(crate) const HEADER_SECTORS: u32 = 2;

/// Used sectors of a region source, free sectors form the free list.
#[derive(Debug, Clone)]
pub(crate) struct SectorMap {
    used: BitVec,
}

impl SectorMap {
    /// Calculates used sectors.
    pub(crate) fn new(total_sectors: usize, chunks_metadata: &[ChunkMetadata]) -> Self {
        let mut used = bitvec![0; total_sectors.max(HEADER_SECTORS as usize)];

        used.set(0, true);
        used.set(1, true);

        for metadata in chunks_metadata {
            if metadata.is_empty() {
                continue;
            }

            let start_index = metadata.start_sector_index as usize;
            let end_index = start_index + metadata.sectors as usize;

            for index in start_index..end_index {
                used.set(index, true);
            }
        }

        SectorMap { used }
    }

    /// Amount of sectors tracked, used or free.
    pub(crate) fn len(&self) -> u32 {
        self.used.len() as u32
    }

    pub(crate) fn is_used(&self, sector: u32) -> bool {
        self.used
            .get(sector as usize)
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// Finds first gap of free sectors big enough, marks it used.
    ///
    /// If there is no such gap, sectors are appended at the end, reusing
    /// free sectors at the tail.
    pub(crate) fn allocate(&mut self, sectors_required: u8) -> u32 {
        let sectors_required = sectors_required as u32;
        let total_sectors = self.len();
        let mut sectors_free = 0;

        for sector_index in 0..total_sectors {
            // Sector occupied and we can't place chunk.
            if self.is_used(sector_index) {
                sectors_free = 0;
                continue;
            }

            sectors_free += 1;

            // Can put chunk in gap.
            if sectors_free == sectors_required {
                let start = sector_index + 1 - sectors_free;
                self.mark(start, sectors_required, true);

                return start;
            }
        }

        let start = total_sectors - sectors_free;
        self.mark(start, sectors_required, true);

        start
    }

    pub(crate) fn release(&mut self, start: u32, sectors: u32) {
        self.mark(start, sectors, false);
    }

    fn mark(&mut self, start: u32, sectors: u32, used: bool) {
        let end = (start + sectors) as usize;

        while self.used.len() < end {
            self.used.push(false);
        }

        for index in start as usize..end {
            self.used.set(index, used);
        }
    }

    /// Ranges of free sectors below the end of source.
    pub(crate) fn free_ranges(&self) -> Vec<Range<u32>> {
        let mut ranges = Vec::new();
        let mut start = None;

        for sector_index in 0..self.len() {
            match (self.is_used(sector_index), start) {
                (false, None) => start = Some(sector_index),
                (true, Some(range_start)) => {
                    ranges.push(range_start..sector_index);
                    start = None;
                }
                _ => {}
            }
        }

        if let Some(range_start) = start {
            ranges.push(range_start..self.len());
        }

        ranges
    }
}

#[cfg(test)]
mod tests {
    use crate::region::ChunkMetadata;
    use crate::sectors::SectorMap;

    #[test]
    fn test_used_sectors_only_header() {
        let sectors = SectorMap::new(8, &[]);

        // Two sectors are used for header data.
        assert!(sectors.is_used(0));
        assert!(sectors.is_used(1));
        assert_eq!(sectors.free_ranges(), vec![2..8]);
    }

    #[test]
    fn test_used_sectors_all() {
        let sectors = SectorMap::new(8, &[ChunkMetadata::new(2, 6, 0)]);

        assert!(sectors.free_ranges().is_empty());
    }

    #[test]
    fn test_used_sectors_partially() {
        let chunks_metadata = vec![ChunkMetadata::new(3, 3, 0), ChunkMetadata::new(8, 1, 0)];
        let sectors = SectorMap::new(10, &chunks_metadata);

        assert_eq!(sectors.free_ranges(), vec![2..3, 6..8, 9..10]);
    }

    #[test]
    fn test_allocate_first_fit() {
        let chunks_metadata = vec![ChunkMetadata::new(3, 1, 0), ChunkMetadata::new(6, 1, 0)];
        let mut sectors = SectorMap::new(7, &chunks_metadata);

        // Gap at 2 is too small, gap at 4..6 fits.
        assert_eq!(sectors.allocate(2), 4);
        assert_eq!(sectors.allocate(1), 2);
        assert_eq!(sectors.free_ranges(), Vec::new());
    }

    #[test]
    fn test_allocate_extends_tail() {
        let chunks_metadata = vec![ChunkMetadata::new(2, 1, 0)];
        let mut sectors = SectorMap::new(4, &chunks_metadata);

        // One free sector at the tail is reused, one appended.
        assert_eq!(sectors.allocate(2), 3);
        assert_eq!(sectors.len(), 5);
    }

    #[test]
    fn test_allocate_on_header_only() {
        let mut sectors = SectorMap::new(0, &[]);

        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors.allocate(1), 2);
        assert_eq!(sectors.len(), 3);
    }

    #[test]
    fn test_release() {
        let mut sectors = SectorMap::new(3, &[ChunkMetadata::new(2, 1, 0)]);
        sectors.release(2, 1);

        assert_eq!(sectors.free_ranges(), vec![2..3]);
        assert_eq!(sectors.allocate(1), 2);
    }
}
