use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which way a file travels through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// compress → encrypt
    Seal,
    /// decrypt → decompress
    Unseal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Seal => f.write_str("seal"),
            Direction::Unseal => f.write_str("unseal"),
        }
    }
}

/// Per-file pipeline stage.
///
/// Seal:   `Idle → Compressing → Encrypting → Done | Failed`
/// Unseal: `Idle → Decrypting → Decompressing → Done | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Compressing,
    Encrypting,
    Decrypting,
    Decompressing,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// The stage that follows `self` on the happy path for `direction`,
    /// or `None` if `self` is terminal or not part of that flow.
    pub fn next(self, direction: Direction) -> Option<Stage> {
        match (direction, self) {
            (Direction::Seal, Stage::Idle) => Some(Stage::Compressing),
            (Direction::Seal, Stage::Compressing) => Some(Stage::Encrypting),
            (Direction::Seal, Stage::Encrypting) => Some(Stage::Done),
            (Direction::Unseal, Stage::Idle) => Some(Stage::Decrypting),
            (Direction::Unseal, Stage::Decrypting) => Some(Stage::Decompressing),
            (Direction::Unseal, Stage::Decompressing) => Some(Stage::Done),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Compressing => "compressing",
            Stage::Encrypting => "encrypting",
            Stage::Decrypting => "decrypting",
            Stage::Decompressing => "decompressing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of running one file through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub direction: Direction,
    /// Size of the input file in bytes
    pub original_size: u64,
    /// Size of the written output file in bytes
    pub transformed_size: u64,
    /// Wall-clock time spent on the whole file
    pub elapsed: Duration,
}

impl FileReport {
    /// `transformed_size / original_size`, or 0.0 for an empty input
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            0.0
        } else {
            self.transformed_size as f64 / self.original_size as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_flow_order() {
        let mut stage = Stage::Idle;
        let mut seen = vec![stage];
        while let Some(next) = stage.next(Direction::Seal) {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![Stage::Idle, Stage::Compressing, Stage::Encrypting, Stage::Done]
        );
    }

    #[test]
    fn unseal_flow_order() {
        assert_eq!(Stage::Idle.next(Direction::Unseal), Some(Stage::Decrypting));
        assert_eq!(
            Stage::Decrypting.next(Direction::Unseal),
            Some(Stage::Decompressing)
        );
        assert_eq!(Stage::Decompressing.next(Direction::Unseal), Some(Stage::Done));
        // Compressing never appears in the unseal flow
        assert_eq!(Stage::Compressing.next(Direction::Unseal), None);
    }

    #[test]
    fn terminal_stages_have_no_successor() {
        for dir in [Direction::Seal, Direction::Unseal] {
            assert!(Stage::Done.next(dir).is_none());
            assert!(Stage::Failed.next(dir).is_none());
        }
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Encrypting.is_terminal());
    }

    #[test]
    fn ratio_of_empty_input_is_zero() {
        let report = FileReport {
            source: "a".into(),
            output: "a.sealed".into(),
            direction: Direction::Seal,
            original_size: 0,
            transformed_size: 78,
            elapsed: Duration::from_millis(1),
        };
        assert_eq!(report.ratio(), 0.0);
    }
}
