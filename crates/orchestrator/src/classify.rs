#![forbid(unsafe_code)]

use crate::error::Error;
use crate::maps::HeapRange;
use nix::time::{ClockId, clock_gettime};
use procfs::process::{MemoryPageFlags, PageInfo, Process, SwapPageFlags};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Turns a heap range into a per-page residency artifact.
pub trait PageClassifier: Send + Sync {
    /// Write the residency of every page of `heap` to `artifact` and return
    /// the number of pages recorded.
    fn classify(
        &self,
        pid: u32,
        iteration: u32,
        artifact: &Path,
        heap: HeapRange,
    ) -> Result<u64, Error>;
}

/// Status bits of one `/proc/<pid>/pagemap` entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageEntry {
    pub present: bool,
    pub swapped: bool,
    pub file_or_shared: bool,
    pub soft_dirty: bool,
}

impl From<PageInfo> for PageEntry {
    fn from(info: PageInfo) -> Self {
        match info {
            PageInfo::MemoryPage(flags) => Self {
                present: flags.contains(MemoryPageFlags::PRESENT),
                swapped: flags.contains(MemoryPageFlags::SWAP),
                file_or_shared: flags.contains(MemoryPageFlags::FILE),
                soft_dirty: flags.contains(MemoryPageFlags::SOFT_DIRTY),
            },
            PageInfo::SwapPage(flags) => Self {
                present: flags.contains(SwapPageFlags::PRESENT),
                swapped: flags.contains(SwapPageFlags::SWAP),
                file_or_shared: flags.contains(SwapPageFlags::FILE),
                soft_dirty: flags.contains(SwapPageFlags::SOFT_DIRTY),
            },
        }
    }
}

impl PageEntry {
    /// Artifact line for the page at `addr`:
    /// `iteration, hex address, decimal address, present+swapped, file/shared+soft-dirty`.
    pub fn line(self, iteration: u32, addr: u64) -> String {
        format!(
            "{iteration}\t{addr:#x}\t{addr}\t{}{}\t{}{}",
            u8::from(self.present),
            u8::from(self.swapped),
            u8::from(self.file_or_shared),
            u8::from(self.soft_dirty),
        )
    }
}

/// Classifies pages by reading the subject's pagemap.
#[derive(Debug, Clone)]
pub struct PagemapClassifier {
    proc_root: PathBuf,
    page_size: u64,
}

impl Default for PagemapClassifier {
    fn default() -> Self {
        Self::new("/proc", procfs::page_size() as u64)
    }
}

impl PagemapClassifier {
    pub fn new(proc_root: impl Into<PathBuf>, page_size: u64) -> Self {
        Self {
            proc_root: proc_root.into(),
            page_size,
        }
    }

    fn timestamp() -> Result<String, Error> {
        let now = clock_gettime(ClockId::CLOCK_MONOTONIC_COARSE)
            .map_err(|errno| Error::Io(errno.into()))?;
        Ok(format!("{}.{:03}", now.tv_sec(), now.tv_nsec() / 1_000_000))
    }
}

impl PageClassifier for PagemapClassifier {
    fn classify(
        &self,
        pid: u32,
        iteration: u32,
        artifact: &Path,
        heap: HeapRange,
    ) -> Result<u64, Error> {
        let first_page = heap.start / self.page_size;
        let pages = heap.pages(self.page_size);

        let process = Process::new_with_root(self.proc_root.join(pid.to_string()))?;
        let entries = process
            .pagemap()?
            .get_range_info(first_page as usize..(first_page + pages) as usize)?;

        let artifact_error = |source| Error::Artifact {
            path: artifact.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(File::create(artifact).map_err(artifact_error)?);
        writeln!(out, "{}", Self::timestamp()?).map_err(artifact_error)?;

        let mut present = 0u64;
        let mut swapped = 0u64;
        for (addr, info) in (first_page..).map(|page| page * self.page_size).zip(entries) {
            let entry = PageEntry::from(info);
            present += u64::from(entry.present);
            swapped += u64::from(entry.swapped);
            writeln!(out, "{}", entry.line(iteration, addr)).map_err(artifact_error)?;
        }
        out.flush().map_err(artifact_error)?;

        debug!(pid, iteration, pages, present, swapped, "heap pages classified");
        Ok(pages)
    }
}
