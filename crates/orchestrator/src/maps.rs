#![forbid(unsafe_code)]

use crate::error::Error;
use procfs::ProcError;
use procfs::process::{MMapPath, Process};
use tracing::trace;

/// Virtual address range of a `[heap]` mapping, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRange {
    pub start: u64,
    pub end: u64,
}

impl HeapRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pages(&self, page_size: u64) -> u64 {
        self.len() / page_size
    }
}

pub trait MemoryMapSource: Send + Sync {
    /// Heap range of `pid`, or `None` if it has no heap (yet).
    fn heap_range(&self, pid: u32) -> Result<Option<HeapRange>, Error>;
}

/// Reads `/proc/<pid>/maps`.
#[derive(Debug, Default)]
pub struct ProcfsMaps;

impl MemoryMapSource for ProcfsMaps {
    fn heap_range(&self, pid: u32) -> Result<Option<HeapRange>, Error> {
        let maps = match Process::new(pid as i32).and_then(|process| process.maps()) {
            Ok(maps) => maps,
            Err(ProcError::NotFound(path)) => {
                trace!(pid, ?path, "process vanished before its maps were read");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        for map in maps {
            if matches!(map.pathname, MMapPath::Heap) {
                let (start, end) = map.address;
                trace!(pid, start, end, "heap located");
                return Ok(Some(HeapRange::new(start, end)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn own_heap_is_well_formed() {
        let _warm: Vec<Box<[u8; 64]>> = (0..1024).map(|_| Box::new([0u8; 64])).collect();
        if let Some(range) = ProcfsMaps.heap_range(std::process::id()).unwrap() {
            assert!(range.start < range.end);
            assert_eq!(range.start % procfs::page_size() as u64, 0);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn vanished_process_has_no_heap() {
        // pid_max is at most 2^22, so this pid never exists
        assert_eq!(ProcfsMaps.heap_range(u32::MAX >> 1).unwrap(), None);
    }

    proptest! {
        #[test]
        fn pages_never_exceed_length(start in 0u64..1 << 40, len in 0u64..1 << 30, shift in 12u32..16) {
            let page = 1u64 << shift;
            let range = HeapRange::new(start, start + len);
            prop_assert_eq!(range.len(), len);
            prop_assert!(range.pages(page) * page <= len);
            prop_assert!(len - range.pages(page) * page < page);
        }
    }
}
