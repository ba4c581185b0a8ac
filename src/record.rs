//! Per-target outcome records and the study-wide aggregate statistics
//! computed over them.

use core::fmt;

use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};

use crate::JointState;

/// Width of the zero-padded decimal record ids. Fixed-width ids make the
/// lexicographic order of the database equal the creation order.
const ID_WIDTH: usize = 8;

/// Format a record index as a stable, fixed-width identifier.
pub fn record_id(index: usize) -> String {
    format!("{:0width$}", index, width = ID_WIDTH)
}

/// The per-target unit of work and of output.
///
/// One record exists for every target pose of the study. `reached` is true
/// iff a non-empty joint solution exists for `goal`; in that case
/// `goal_state` covers every active joint of the planning group and `score`
/// holds the evaluator's verdict for it. Unreached records carry an empty
/// `goal_state` and a zero score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachRecord {
    /// Stable identifier, assigned once at creation.
    pub id: String,
    /// The target transform. Immutable after creation.
    pub goal: Isometry3<f64>,
    pub reached: bool,
    /// Joint configuration used as the IK seed for the most recent
    /// successful evaluation of this record.
    pub seed_state: JointState,
    /// Joint configuration produced by IK for `goal` starting from
    /// `seed_state`. Empty when `reached` is false.
    pub goal_state: JointState,
    pub score: f64,
}

impl ReachRecord {
    /// A fresh, unreached record for the target at `index`.
    pub fn new(index: usize, goal: Isometry3<f64>, seed_state: JointState) -> Self {
        ReachRecord {
            id: record_id(index),
            goal,
            reached: false,
            seed_state,
            goal_state: JointState::new(),
            score: 0.0,
        }
    }

    /// The target position, used as the record's location in the search tree.
    pub fn position(&self) -> Point3<f64> {
        Point3::from(self.goal.translation.vector)
    }
}

/// Aggregate statistics over a reach database.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StudyResults {
    /// Proportion of records with `reached == true`.
    pub reach_fraction: f64,
    /// Sum of all record scores.
    pub total_pose_score: f64,
    /// Total score divided by the number of records.
    pub normalized_total_pose_score: f64,
    /// Population standard deviation of the score over the reached records.
    pub joint_score_variation: f64,
}

impl StudyResults {
    /// Compute the aggregates over `records`. All values are zero for an
    /// empty record set.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ReachRecord>) -> Self {
        let mut count = 0usize;
        let mut reached = 0usize;
        let mut total = 0.0;
        let mut reached_scores = Vec::new();

        for record in records {
            count += 1;
            total += record.score;
            if record.reached {
                reached += 1;
                reached_scores.push(record.score);
            }
        }

        if count == 0 {
            return StudyResults {
                reach_fraction: 0.0,
                total_pose_score: 0.0,
                normalized_total_pose_score: 0.0,
                joint_score_variation: 0.0,
            };
        }

        let variation = if reached_scores.is_empty() {
            0.0
        } else {
            let mean = reached_scores.iter().sum::<f64>() / reached_scores.len() as f64;
            let variance =
                reached_scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / reached_scores.len() as f64;
            variance.sqrt()
        };

        StudyResults {
            reach_fraction: reached as f64 / count as f64,
            total_pose_score: total,
            normalized_total_pose_score: total / count as f64,
            joint_score_variation: variation,
        }
    }
}

impl fmt::Display for StudyResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reach fraction: {:.4}", self.reach_fraction)?;
        writeln!(f, "Total pose score: {:.4}", self.total_pose_score)?;
        writeln!(f, "Normalized total pose score: {:.4}", self.normalized_total_pose_score)?;
        write!(f, "Joint score variation: {:.4}", self.joint_score_variation)
    }
}
