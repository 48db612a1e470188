use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Output {
    /// Name of the run summary written when the run stops.
    pub summary_file: String,

    /// Prefix of the per-iteration artifacts. The iteration number is
    /// appended zero padded to four digits.
    pub artifact_prefix: String,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            summary_file: "FOMSummary.json".into(),
            artifact_prefix: "iteration".into(),
        }
    }
}

impl Output {
    pub fn artifact_name(&self, iteration: u32) -> String {
        format!("{}{iteration:04}", self.artifact_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_are_zero_padded() {
        let output = Output::default();
        assert_eq!(output.artifact_name(1), "iteration0001");
        assert_eq!(output.artifact_name(42), "iteration0042");
        assert_eq!(output.artifact_name(12345), "iteration12345");
    }
}
