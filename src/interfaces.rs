//! Capability contracts consumed by the reach study engine.
//!
//! The engine accepts already-constructed implementations of these traits
//! (plugin discovery and configuration parsing are external concerns) and
//! shares them across worker threads for the duration of a run, hence the
//! `Send + Sync` bounds. None of the traits carries behavior of its own.

use std::collections::BTreeMap;

use nalgebra::Isometry3;

use crate::{ReachDatabase, ReachError, ReachRecord, StudyResults};

/// A joint configuration as a mapping from joint name to joint position.
///
/// Ordered so that serialization and logging are deterministic.
pub type JointState = BTreeMap<String, f64>;

/// Inverse kinematics for a fixed planning group.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait IkSolver: Send + Sync {
    /// Names of the active joints of the planning group, in the order used by
    /// the solution vectors of [IkSolver::solve]. Fixed for the solver's lifetime.
    fn joint_names(&self) -> Vec<String>;

    /// Solve IK for `target` starting from `seed`.
    ///
    /// Each returned solution is a full joint vector aligned with
    /// [IkSolver::joint_names]. An empty sequence means no solution was found;
    /// an error means the solver itself failed and is recovered at the worker
    /// boundary.
    fn solve(&self, target: &Isometry3<f64>, seed: &JointState) -> Result<Vec<Vec<f64>>, ReachError>;
}

/// Scores a joint pose. Higher is better.
///
/// Implementations must be safe to call from several worker threads at once
/// and must return a finite value. A pose that does not cover the joints the
/// evaluator requires fails with [ReachError::InvalidPose].
pub trait Evaluator: Send + Sync {
    fn calculate_score(&self, pose: &JointState) -> Result<f64, ReachError>;
}

/// Produces the Cartesian target poses of the study. Pure; called once.
/// The length of the returned list defines the size of the database.
pub trait TargetPoseGenerator: Send + Sync {
    fn generate(&self) -> Vec<Isometry3<f64>>;
}

/// Side-effecting sink for live visualization. May be a no-op.
pub trait Display: Send + Sync {
    fn show_environment(&self);
    fn update_robot_pose(&self, pose: &JointState);
    fn show_results(&self, database: &ReachDatabase);
    fn show_neighborhood(&self, neighborhood: &[ReachRecord]);
}

/// Progress and result reporting. Implementations synchronize internally;
/// the engine calls [Logger::print_progress] from its worker threads.
pub trait Logger: Send + Sync {
    fn set_max_progress(&self, max: usize);
    fn print_progress(&self, progress: usize);
    fn print_results(&self, results: &StudyResults);
    fn print(&self, message: &str);
}

/// Pair a solution vector with the solver's joint names.
///
/// Fails with [ReachError::InvariantViolation] when the lengths disagree, as
/// that indicates a solver that violates its own contract.
pub fn joint_state_from(names: &[String], positions: &[f64]) -> Result<JointState, ReachError> {
    if names.len() != positions.len() {
        return Err(ReachError::InvariantViolation(format!(
            "solution holds {} positions for {} joints",
            positions.len(),
            names.len()
        )));
    }
    Ok(names.iter().cloned().zip(positions.iter().copied()).collect())
}

/// The all-zero joint configuration over `names`, used to seed the first
/// evaluation of every target.
pub fn zero_state(names: &[String]) -> JointState {
    names.iter().cloned().map(|name| (name, 0.0)).collect()
}
