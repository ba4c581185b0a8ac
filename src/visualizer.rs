//! Interactive inspection of a finished study: re-solve single records and
//! push record states or whole neighborhoods to the display.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::interfaces::{joint_state_from, Display, Evaluator, IkSolver, JointState};
use crate::{ReachDatabase, ReachError, ReachRecord, SearchTree};

/// Displays the results of a reach study and recalculates IK solutions at
/// chosen target poses.
pub struct ReachVisualizer {
    db: ReachDatabase,
    solver: Arc<dyn IkSolver>,
    evaluator: Arc<dyn Evaluator>,
    display: Arc<dyn Display>,
    search_tree: SearchTree,
    neighbor_radius: f64,
}

impl ReachVisualizer {
    /// Take ownership of a populated database and index it for neighborhood
    /// queries with `neighbor_radius`.
    pub fn new(
        db: ReachDatabase,
        solver: Arc<dyn IkSolver>,
        evaluator: Arc<dyn Evaluator>,
        display: Arc<dyn Display>,
        neighbor_radius: f64,
    ) -> Result<Self, ReachError> {
        if !neighbor_radius.is_finite() || neighbor_radius <= 0.0 {
            return Err(ReachError::Config(format!(
                "neighbor_radius must be positive, got {neighbor_radius}"
            )));
        }
        let search_tree = SearchTree::build(db.iter().map(|record| (record.id.clone(), record.position())));
        Ok(ReachVisualizer {
            db,
            solver,
            evaluator,
            display,
            search_tree,
            neighbor_radius,
        })
    }

    pub fn database(&self) -> &ReachDatabase {
        &self.db
    }

    /// Re-run IK for a record from its recorded seed. The record is updated
    /// when the new solution scores at least as well as the stored one, and
    /// the resulting pose is shown on the display.
    pub fn re_solve_ik(&mut self, record_id: &str) -> Result<(), ReachError> {
        let record = self.lookup(record_id)?.clone();
        let names = self.solver.joint_names();

        let mut best: Option<(JointState, f64)> = None;
        for solution in self.solver.solve(&record.goal, &record.seed_state)? {
            let state = joint_state_from(&names, &solution)?;
            let score = self.evaluator.calculate_score(&state)?;
            if best.as_ref().map_or(true, |(_, b)| score > *b) {
                best = Some((state, score));
            }
        }

        let Some((goal_state, score)) = best else {
            debug!(record_id, "no IK solution on re-solve");
            return Ok(());
        };

        if !record.reached || score >= record.score {
            let mut updated = record;
            updated.reached = true;
            updated.goal_state = goal_state.clone();
            updated.score = score;
            self.db.update(updated)?;
        }
        self.display.update_robot_pose(&goal_state);
        Ok(())
    }

    /// Show the stored IK solution of a record on the display.
    pub fn show_result(&self, record_id: &str) -> Result<(), ReachError> {
        let record = self.lookup(record_id)?;
        self.display.update_robot_pose(&record.goal_state);
        Ok(())
    }

    /// Show the stored IK seed of a record on the display.
    pub fn show_seed(&self, record_id: &str) -> Result<(), ReachError> {
        let record = self.lookup(record_id)?;
        self.display.update_robot_pose(&record.seed_state);
        Ok(())
    }

    /// Collect the reached neighborhood of a record and show it on the
    /// display: the reached records within one radius of the target, or the
    /// whole transitively connected region when `recursive`. The record
    /// itself is part of its neighborhood when reached.
    pub fn reach_neighbors(&self, record_id: &str, recursive: bool) -> Result<Vec<ReachRecord>, ReachError> {
        let start = self.lookup(record_id)?;

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        let mut neighborhood = Vec::new();

        while let Some(record) = queue.pop_front() {
            if !visited.insert(record.id.clone()) {
                continue;
            }
            if record.reached && record.id != start.id {
                neighborhood.push(record.clone());
            }
            if record.id != start.id && !recursive {
                continue;
            }
            for id in self.search_tree.radius_search(&record.position(), self.neighbor_radius) {
                if let Some(neighbor) = self.db.get(id) {
                    if neighbor.reached && !visited.contains(&neighbor.id) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        if start.reached {
            neighborhood.push(start.clone());
        }

        debug!(record_id, count = neighborhood.len(), recursive, "collected reached neighborhood");
        self.display.show_neighborhood(&neighborhood);
        Ok(neighborhood)
    }

    fn lookup(&self, record_id: &str) -> Result<&ReachRecord, ReachError> {
        self.db
            .get(record_id)
            .ok_or_else(|| ReachError::UnknownRecord(record_id.to_string()))
    }
}
