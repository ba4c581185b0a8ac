/*! Dummy implementations of the engine interfaces used for testing */

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion};
use parking_lot::Mutex;
use tracing::info;

use crate::interfaces::{Display, Evaluator, IkSolver, JointState, Logger, TargetPoseGenerator};
use crate::{ReachDatabase, ReachError, ReachRecord, StudyResults};

/// Names of the joints of the dummy planning group: one prismatic joint per
/// Cartesian axis, so a joint vector is the reached position itself.
pub const DUMMY_JOINTS: [&str; 3] = ["x", "y", "z"];

fn seed_point(seed: &JointState) -> Point3<f64> {
    Point3::new(
        seed.get("x").copied().unwrap_or(0.0),
        seed.get("y").copied().unwrap_or(0.0),
        seed.get("z").copied().unwrap_or(0.0),
    )
}

/// A seed-sensitive toy solver over the `x`/`y`/`z` gantry.
///
/// A target is solvable iff its position lies within `basin` of the seed
/// configuration; the single solution is the target position itself. This
/// makes neighbor seeding observable: a far-away target becomes reachable
/// once a nearby record provides its solution as the new seed.
#[derive(Debug, Clone)]
pub struct DummyIkSolver {
    /// Convergence basin around the seed, in meters.
    pub basin: f64,
    /// When set, solving for a target at this position fails with
    /// [ReachError::Plugin].
    pub fail_at: Option<Point3<f64>>,
}

impl DummyIkSolver {
    pub fn new(basin: f64) -> Self {
        DummyIkSolver { basin, fail_at: None }
    }
}

impl IkSolver for DummyIkSolver {
    fn joint_names(&self) -> Vec<String> {
        DUMMY_JOINTS.iter().map(|&name| name.to_string()).collect()
    }

    fn solve(&self, target: &Isometry3<f64>, seed: &JointState) -> Result<Vec<Vec<f64>>, ReachError> {
        let goal = Point3::from(target.translation.vector);
        if let Some(fail_at) = self.fail_at {
            if (goal - fail_at).norm() < 1e-9 {
                return Err(ReachError::Plugin("dummy solver poisoned for this target".to_string()));
            }
        }

        if (goal - seed_point(seed)).norm() <= self.basin {
            Ok(vec![vec![goal.x, goal.y, goal.z]])
        } else {
            Ok(vec![])
        }
    }
}

/// Scores a pose by its proximity to the origin: `1 / (1 + ‖position‖)`.
#[derive(Debug, Default, Clone)]
pub struct DistanceEvaluator;

impl Evaluator for DistanceEvaluator {
    fn calculate_score(&self, pose: &JointState) -> Result<f64, ReachError> {
        for joint in DUMMY_JOINTS {
            if !pose.contains_key(joint) {
                return Err(ReachError::InvalidPose(joint.to_string()));
            }
        }
        Ok(1.0 / (1.0 + seed_point(pose).coords.norm()))
    }
}

/// Returns the same score for every pose.
#[derive(Debug, Clone)]
pub struct ConstantEvaluator(pub f64);

impl Evaluator for ConstantEvaluator {
    fn calculate_score(&self, _pose: &JointState) -> Result<f64, ReachError> {
        Ok(self.0)
    }
}

/// Scores like [ConstantEvaluator] with 1.0 but fails for poses whose `x`
/// joint matches `fail_x`, to exercise the worker-boundary recovery.
#[derive(Debug, Clone)]
pub struct FailingEvaluator {
    pub fail_x: f64,
}

impl Evaluator for FailingEvaluator {
    fn calculate_score(&self, pose: &JointState) -> Result<f64, ReachError> {
        let x = pose
            .get("x")
            .copied()
            .ok_or_else(|| ReachError::InvalidPose("x".to_string()))?;
        if (x - self.fail_x).abs() < 1e-9 {
            return Err(ReachError::Plugin("dummy evaluator poisoned for this pose".to_string()));
        }
        Ok(1.0)
    }
}

/// Hands out a fixed list of target poses.
#[derive(Debug, Clone, Default)]
pub struct ListPoseGenerator(pub Vec<Isometry3<f64>>);

impl ListPoseGenerator {
    /// Identity-oriented targets at the given positions.
    pub fn at_positions(positions: &[[f64; 3]]) -> Self {
        ListPoseGenerator(
            positions
                .iter()
                .map(|p| Isometry3::from_parts(Translation3::new(p[0], p[1], p[2]), UnitQuaternion::identity()))
                .collect(),
        )
    }
}

impl TargetPoseGenerator for ListPoseGenerator {
    fn generate(&self) -> Vec<Isometry3<f64>> {
        self.0.clone()
    }
}

/// A regular axis-aligned lattice of identity-oriented targets.
#[derive(Debug, Clone)]
pub struct GridPoseGenerator {
    pub shape: [usize; 3],
    pub spacing: f64,
}

impl TargetPoseGenerator for GridPoseGenerator {
    fn generate(&self) -> Vec<Isometry3<f64>> {
        let mut targets = Vec::with_capacity(self.shape.iter().product());
        for i in 0..self.shape[0] {
            for j in 0..self.shape[1] {
                for k in 0..self.shape[2] {
                    targets.push(Isometry3::from_parts(
                        Translation3::new(
                            i as f64 * self.spacing,
                            j as f64 * self.spacing,
                            k as f64 * self.spacing,
                        ),
                        UnitQuaternion::identity(),
                    ));
                }
            }
        }
        targets
    }
}

/// Swallows every display request.
#[derive(Debug, Default, Clone)]
pub struct NoOpDisplay;

impl Display for NoOpDisplay {
    fn show_environment(&self) {}
    fn update_robot_pose(&self, _pose: &JointState) {}
    fn show_results(&self, _database: &ReachDatabase) {}
    fn show_neighborhood(&self, _neighborhood: &[ReachRecord]) {}
}

/// Forwards everything to `tracing` and keeps the printed messages around so
/// tests can assert on them.
#[derive(Debug, Default)]
pub struct DummyLogger {
    messages: Mutex<Vec<String>>,
}

impl DummyLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything printed through [Logger::print] so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl Logger for DummyLogger {
    fn set_max_progress(&self, max: usize) {
        info!(max, "progress reset");
    }

    fn print_progress(&self, progress: usize) {
        info!(progress, "progress");
    }

    fn print_results(&self, results: &StudyResults) {
        info!("{results}");
    }

    fn print(&self, message: &str) {
        info!("{message}");
        self.messages.lock().push(message.to_string());
    }
}
