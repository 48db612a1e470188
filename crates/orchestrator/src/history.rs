#![forbid(unsafe_code)]

/// Result of one freeze, measure, thaw cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub iteration: u32,
    pub heap_pages: u64,
    pub artifact: String,
}

/// Everything a run has accumulated so far.
///
/// Heap sizes and artifact names are index aligned, and both are as long as
/// the number of completed iterations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunHistory {
    iteration: u32,
    peak_pages: u64,
    heap_sizes: Vec<u64>,
    artifacts: Vec<String>,
}

impl RunHistory {
    /// Claim the next iteration number.
    pub fn begin(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    /// Give back an iteration claimed with [`RunHistory::begin`] that produced
    /// no sample.
    pub fn rollback(&mut self) {
        debug_assert!(self.iteration as usize > self.heap_sizes.len());
        self.iteration -= 1;
    }

    pub fn record(&mut self, sample: &Sample) {
        debug_assert_eq!(sample.iteration as usize, self.heap_sizes.len() + 1);
        self.peak_pages = self.peak_pages.max(sample.heap_pages);
        self.heap_sizes.push(sample.heap_pages);
        self.artifacts.push(sample.artifact.clone());
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn peak_pages(&self) -> u64 {
        self.peak_pages
    }

    pub fn heap_sizes(&self) -> &[u64] {
        &self.heap_sizes
    }

    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }
}
