//! The reach study engine: orchestration, the parallel initial evaluation
//! pass, and the neighbor-seeded optimization loop.
//!
//! A [ReachStudy] owns the [ReachDatabase] and a worker pool. [ReachStudy::run]
//! turns the generated target poses into the first generation of records;
//! [ReachStudy::optimize] then repeatedly re-seeds every record from the best
//! solution found among its spatial neighbors until the fractional
//! improvement of the total score falls below the configured threshold.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use nalgebra::Isometry3;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::interfaces::{joint_state_from, zero_state, Display, Evaluator, IkSolver, JointState, Logger, TargetPoseGenerator};
use crate::{ReachDatabase, ReachError, ReachRecord, SearchTree, StudyResults};

/// Parameters of the optimization loop. All values must be finite.
#[derive(Debug, Clone, Copy)]
pub struct Parameters {
    /// Neighbor query radius in meters.
    pub radius: f64,
    /// Hard cap on the number of optimization steps.
    pub max_steps: usize,
    /// Minimum fractional improvement of the total pose score required to
    /// run another step.
    pub step_improvement_threshold: f64,
}

impl Parameters {
    fn validate(&self) -> Result<(), ReachError> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(ReachError::Config(format!("radius must be positive, got {}", self.radius)));
        }
        if self.max_steps < 1 {
            return Err(ReachError::Config("max_steps must be at least 1".to_string()));
        }
        if !self.step_improvement_threshold.is_finite() || self.step_improvement_threshold < 0.0 {
            return Err(ReachError::Config(format!(
                "step_improvement_threshold must be non-negative, got {}",
                self.step_improvement_threshold
            )));
        }
        Ok(())
    }
}

/// Computes and optimizes a reach study over a set of Cartesian targets.
///
/// The plugins are shared, immutable collaborators; the study schedules one
/// task per record on its own worker pool and joins at every step boundary.
pub struct ReachStudy {
    params: Parameters,
    db: ReachDatabase,

    // Plugins
    ik_solver: Arc<dyn IkSolver>,
    evaluator: Arc<dyn Evaluator>,
    pose_generator: Arc<dyn TargetPoseGenerator>,
    display: Arc<dyn Display>,
    logger: Arc<dyn Logger>,

    pool: ThreadPool,
    search_tree: Option<SearchTree>,
}

impl ReachStudy {
    /// Create a study using one worker per available CPU.
    pub fn new(
        ik_solver: Arc<dyn IkSolver>,
        evaluator: Arc<dyn Evaluator>,
        pose_generator: Arc<dyn TargetPoseGenerator>,
        display: Arc<dyn Display>,
        logger: Arc<dyn Logger>,
        params: Parameters,
    ) -> Result<Self, ReachError> {
        Self::with_max_threads(
            ik_solver,
            evaluator,
            pose_generator,
            display,
            logger,
            params,
            num_cpus::get(),
        )
    }

    /// Create a study with an explicit worker count. `max_threads = 1` gives
    /// a serial, deterministic run.
    pub fn with_max_threads(
        ik_solver: Arc<dyn IkSolver>,
        evaluator: Arc<dyn Evaluator>,
        pose_generator: Arc<dyn TargetPoseGenerator>,
        display: Arc<dyn Display>,
        logger: Arc<dyn Logger>,
        params: Parameters,
        max_threads: usize,
    ) -> Result<Self, ReachError> {
        params.validate()?;
        if max_threads < 1 {
            return Err(ReachError::Config("max_threads must be at least 1".to_string()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_threads)
            .build()
            .map_err(|err| ReachError::Config(err.to_string()))?;

        Ok(ReachStudy {
            params,
            db: ReachDatabase::new(),
            ik_solver,
            evaluator,
            pose_generator,
            display,
            logger,
            pool,
            search_tree: None,
        })
    }

    /// The database of the study.
    pub fn database(&self) -> &ReachDatabase {
        &self.db
    }

    /// Aggregate statistics of the current generation of records.
    pub fn results(&self) -> StudyResults {
        self.db.results()
    }

    /// Replace the database with the contents of `path`.
    ///
    /// Besides decoding, every reached record is checked to cover the joints
    /// of the bound IK solver; a record referencing other joints cannot have
    /// been produced with this solver and fails the load.
    pub fn load(&mut self, path: &Path) -> Result<(), ReachError> {
        let db = ReachDatabase::load(path)?;

        let names = self.ik_solver.joint_names();
        for record in db.iter() {
            if !record.reached {
                continue;
            }
            if let Some(missing) = names.iter().find(|name| !record.goal_state.contains_key(*name)) {
                return Err(ReachError::CorruptDatabase(format!(
                    "record {} does not cover joint '{}' of the planning group",
                    record.id, missing
                )));
            }
        }

        self.search_tree = Some(Self::build_tree(&db));
        self.db = db;
        info!(records = self.db.len(), "loaded study database");
        Ok(())
    }

    /// Persist the database to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ReachError> {
        self.db.save(path)
    }

    /// Run the initial evaluation pass: one record per generated target,
    /// solved from the zero seed. A no-op when the database is already
    /// populated (e.g. after [ReachStudy::load]).
    pub fn run(&mut self) -> Result<(), ReachError> {
        if !self.db.is_empty() {
            debug!("database already populated, skipping the initial evaluation pass");
            return Ok(());
        }

        let targets = self.pose_generator.generate();
        let names = self.ik_solver.joint_names();
        let seed = zero_state(&names);

        self.logger
            .print(&format!("Starting initial evaluation of {} targets", targets.len()));
        self.display.show_environment();
        self.logger.set_max_progress(targets.len());
        let progress = AtomicUsize::new(0);

        let records: Vec<ReachRecord> = self.pool.install(|| {
            targets
                .par_iter()
                .enumerate()
                .map(|(index, target)| {
                    let mut record = ReachRecord::new(index, *target, seed.clone());
                    if let Some((goal_state, score)) = self.evaluate_target(target, &seed, &names)? {
                        record.reached = true;
                        record.goal_state = goal_state;
                        record.score = score;
                    }
                    let done = progress.fetch_add(1, Ordering::SeqCst) + 1;
                    self.logger.print_progress(done);
                    Ok(record)
                })
                .collect::<Result<_, ReachError>>()
        })?;

        for record in records {
            self.db.insert(record);
        }
        self.search_tree = Some(Self::build_tree(&self.db));

        self.logger.print("Initial evaluation done");
        self.logger.print_results(&self.db.results());
        self.display.show_results(&self.db);
        Ok(())
    }

    /// Optimize the study: re-seed every record from the best-scoring
    /// solution among its reached neighbors, step by step, until the
    /// fractional improvement of the total pose score drops below the
    /// threshold or `max_steps` is hit.
    pub fn optimize(&mut self) -> Result<(), ReachError> {
        if self.db.is_empty() {
            return Err(ReachError::EmptyDatabase);
        }

        let names = self.ik_solver.joint_names();
        self.logger.print("Starting optimization");

        let mut previous_score = self.db.results().total_pose_score;
        let mut step = 0usize;
        loop {
            step += 1;
            self.run_step(&names)?;

            let results = self.db.results();
            let current_score = results.total_pose_score;
            // A zero baseline would make any gain look infinite anyway; force
            // the loop to take at least this one full step.
            let improvement = if previous_score > 0.0 {
                (current_score - previous_score) / previous_score
            } else {
                f64::INFINITY
            };

            debug!(step, current_score, improvement, "optimization step finished");
            self.logger
                .print(&format!("Step {step}: improvement {improvement:.6}"));
            self.logger.print_results(&results);

            if improvement < self.params.step_improvement_threshold || step >= self.params.max_steps {
                break;
            }
            previous_score = current_score;
        }

        self.logger.print("Optimization done");
        self.logger.print_results(&self.db.results());
        self.display.show_results(&self.db);
        Ok(())
    }

    /// Mean and population standard deviation of the neighbor count over all
    /// records, using the optimization radius. Counts are self-inclusive:
    /// the query record itself is part of its own neighborhood.
    pub fn average_neighbor_count(&self) -> Result<(f64, f64), ReachError> {
        if self.db.is_empty() {
            return Err(ReachError::EmptyDatabase);
        }
        let tree = self.tree()?;

        let counts = self
            .db
            .iter()
            .map(|record| tree.radius_search(&record.position(), self.params.radius).len() as f64)
            .collect_vec();

        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        Ok((mean, variance.sqrt()))
    }

    /// One optimization step over the whole database. Workers read neighbor
    /// state only from the step-boundary snapshot; replacement records are
    /// applied serially after the join.
    fn run_step(&mut self, names: &[String]) -> Result<(), ReachError> {
        let snapshot = self.db.records().clone();
        let records = snapshot.values().collect_vec();
        let tree = self.tree()?;
        let radius = self.params.radius;

        self.logger.set_max_progress(records.len());
        let progress = AtomicUsize::new(0);

        let updates: Vec<Option<ReachRecord>> = self.pool.install(|| {
            records
                .par_iter()
                .map(|record| {
                    let update = self.improve_record(record, &snapshot, tree, names, radius)?;
                    let done = progress.fetch_add(1, Ordering::SeqCst) + 1;
                    self.logger.print_progress(done);
                    Ok(update)
                })
                .collect::<Result<_, ReachError>>()
        })?;

        for update in updates.into_iter().flatten() {
            self.db.update(update)?;
        }
        Ok(())
    }

    /// Find the best neighbor-seeded solution for `record`. Returns a
    /// replacement record when one improves on the current state: strictly
    /// higher score for a reached record, any solution for an unreached one.
    fn improve_record(
        &self,
        record: &ReachRecord,
        snapshot: &BTreeMap<String, ReachRecord>,
        tree: &SearchTree,
        names: &[String],
        radius: f64,
    ) -> Result<Option<ReachRecord>, ReachError> {
        let mut best: Option<ReachRecord> = None;
        let mut best_score = if record.reached { record.score } else { f64::NEG_INFINITY };

        for id in tree.radius_search(&record.position(), radius) {
            if id == record.id {
                continue;
            }
            let Some(neighbor) = snapshot.get(id) else { continue };
            if !neighbor.reached {
                continue;
            }

            if let Some((goal_state, score)) = self.evaluate_target(&record.goal, &neighbor.goal_state, names)? {
                if score > best_score {
                    best_score = score;
                    let mut updated = record.clone();
                    updated.reached = true;
                    updated.seed_state = neighbor.goal_state.clone();
                    updated.goal_state = goal_state;
                    updated.score = score;
                    best = Some(updated);
                }
            }
        }
        Ok(best)
    }

    /// Solve IK for `target` from `seed` and return the highest-scoring
    /// solution, or `None` when the target is unreachable from this seed.
    ///
    /// Plugin failures are recovered here, at the worker boundary: they are
    /// logged and treated as "no solution" so a single bad pose cannot sink
    /// the run. Contract violations (mis-sized solution vectors) abort.
    fn evaluate_target(
        &self,
        target: &Isometry3<f64>,
        seed: &JointState,
        names: &[String],
    ) -> Result<Option<(JointState, f64)>, ReachError> {
        let solutions = match self.ik_solver.solve(target, seed) {
            Ok(solutions) => solutions,
            Err(err @ ReachError::InvariantViolation(_)) => return Err(err),
            Err(err) => {
                warn!(%err, "IK solver failed");
                self.logger.print(&format!("IK solver failed: {err}"));
                return Ok(None);
            }
        };

        let mut best: Option<(JointState, f64)> = None;
        for solution in solutions {
            let state = joint_state_from(names, &solution)?;
            let score = match self.evaluator.calculate_score(&state) {
                Ok(score) if score.is_finite() => score,
                Ok(score) => {
                    warn!(score, "evaluator returned a non-finite score");
                    self.logger.print(&format!("Evaluator returned a non-finite score: {score}"));
                    continue;
                }
                Err(err @ ReachError::InvariantViolation(_)) => return Err(err),
                Err(err) => {
                    warn!(%err, "evaluator failed");
                    self.logger.print(&format!("Evaluator failed: {err}"));
                    continue;
                }
            };

            if best.as_ref().map_or(true, |(_, b)| score > *b) {
                best = Some((state, score));
            }
        }
        Ok(best)
    }

    fn tree(&self) -> Result<&SearchTree, ReachError> {
        self.search_tree
            .as_ref()
            .ok_or_else(|| ReachError::InvariantViolation("search tree not built".to_string()))
    }

    fn build_tree(db: &ReachDatabase) -> SearchTree {
        SearchTree::build(db.iter().map(|record| (record.id.clone(), record.position())))
    }
}
