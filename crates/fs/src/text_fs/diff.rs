//! Line diff between a live mirror and its baseline
//!
//! Runs an external `diff` in its default (normal) output format with the
//! live mirror as the first operand and the baseline as the second. Lines
//! marked `<` exist only in the live mirror, lines marked `>` only in the
//! baseline.

use std::path::Path;
use std::process::Command;

use crate::error::FsError;

pub const DEFAULT_DIFF_PROGRAM: &str = "diff";

/// One row-level change derived from the diff output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineChange {
    /// Present only in the live mirror
    Insert(String),
    /// Present only in the baseline
    Delete(String),
}

#[derive(Debug, Clone)]
pub struct DiffTool {
    program: String,
}

impl Default for DiffTool {
    fn default() -> Self {
        Self::new(DEFAULT_DIFF_PROGRAM)
    }
}

impl DiffTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Diff `live` against `baseline`, blocking until the process exits
    pub fn run(&self, live: &Path, baseline: &Path) -> Result<Vec<LineChange>, FsError> {
        let output = Command::new(&self.program)
            .arg(live)
            .arg(baseline)
            .output()
            .map_err(|e| FsError::Diff(format!("failed to run {}: {e}", self.program)))?;

        // 0: identical, 1: differences, anything else is trouble
        match output.status.code() {
            Some(0) | Some(1) => {}
            code => {
                return Err(FsError::Diff(format!(
                    "{} exited with {:?}: {}",
                    self.program,
                    code,
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| FsError::Diff("diff output is not valid UTF-8".to_string()))?;
        Ok(parse_normal(&stdout))
    }
}

/// Parse normal-format diff output into row changes, in output order
pub fn parse_normal(output: &str) -> Vec<LineChange> {
    output
        .lines()
        .filter_map(|line| {
            if let Some(rest) = line.strip_prefix('<') {
                Some(LineChange::Insert(strip_marker_space(rest).to_string()))
            } else if let Some(rest) = line.strip_prefix('>') {
                Some(LineChange::Delete(strip_marker_space(rest).to_string()))
            } else {
                // hunk headers, "---" separators and "\ No newline" notes
                None
            }
        })
        .collect()
}

fn strip_marker_space(rest: &str) -> &str {
    rest.strip_prefix(' ').unwrap_or(rest)
}
