use std::sync::Arc;

use approx::assert_abs_diff_eq;
use nalgebra::Point3;
use reach::dummy::{
    ConstantEvaluator, DistanceEvaluator, DummyIkSolver, DummyLogger, FailingEvaluator, GridPoseGenerator,
    ListPoseGenerator, NoOpDisplay,
};
use reach::{
    record_id, Evaluator, Parameters, ReachDatabase, ReachError, ReachStudy, ReachVisualizer, TargetPoseGenerator,
};

fn params() -> Parameters {
    Parameters {
        radius: 1.0,
        max_steps: 5,
        step_improvement_threshold: 0.01,
    }
}

fn study(
    solver: DummyIkSolver,
    evaluator: impl Evaluator + 'static,
    generator: impl TargetPoseGenerator + 'static,
    params: Parameters,
    max_threads: usize,
    logger: Arc<DummyLogger>,
) -> ReachStudy {
    ReachStudy::with_max_threads(
        Arc::new(solver),
        Arc::new(evaluator),
        Arc::new(generator),
        Arc::new(NoOpDisplay),
        logger,
        params,
        max_threads,
    )
    .unwrap()
}

#[test_log::test]
fn test_empty_pose_list() {
    let mut study = study(
        DummyIkSolver::new(1.0),
        DistanceEvaluator,
        ListPoseGenerator::default(),
        params(),
        2,
        Arc::new(DummyLogger::new()),
    );

    study.run().unwrap();
    assert_eq!(study.database().len(), 0);
    assert!(matches!(study.optimize(), Err(ReachError::EmptyDatabase)));
    assert!(matches!(study.average_neighbor_count(), Err(ReachError::EmptyDatabase)));
}

#[test_log::test]
fn test_single_reachable_pose() {
    let mut study = study(
        DummyIkSolver::new(1.0),
        DistanceEvaluator,
        ListPoseGenerator::at_positions(&[[0.1, 0.0, 0.0]]),
        params(),
        1,
        Arc::new(DummyLogger::new()),
    );

    study.run().unwrap();
    assert_eq!(study.database().len(), 1);

    let record = study.database().get(&record_id(0)).unwrap();
    assert!(record.reached);
    // Single solution is the target position itself; its score is the
    // distance evaluator's verdict for it.
    assert_abs_diff_eq!(record.score, 1.0 / 1.1, epsilon = 1e-12);
    for joint in ["x", "y", "z"] {
        assert!(record.goal_state.contains_key(joint));
    }

    let before = study.results();
    study.optimize().unwrap();
    let after = study.results();
    assert_eq!(after.reach_fraction, 1.0);
    assert_abs_diff_eq!(before.total_pose_score, after.total_pose_score, epsilon = 1e-12);
}

#[test_log::test]
fn test_goals_match_generated_targets() {
    let generator = GridPoseGenerator {
        shape: [2, 2, 1],
        spacing: 0.25,
    };
    let targets = generator.generate();

    let mut study = study(
        DummyIkSolver::new(10.0),
        ConstantEvaluator(1.0),
        generator,
        params(),
        2,
        Arc::new(DummyLogger::new()),
    );
    study.run().unwrap();

    assert_eq!(study.database().len(), targets.len());
    for (index, target) in targets.iter().enumerate() {
        let record = study.database().get(&record_id(index)).unwrap();
        assert_eq!(record.goal, *target);
    }
}

/// One pose is unreachable from the zero seed but reachable from the other
/// pose's solution; the optimization flips it within two steps.
#[test_log::test]
fn test_optimization_propagates_seeds() {
    let mut study = study(
        DummyIkSolver::new(0.8),
        DistanceEvaluator,
        ListPoseGenerator::at_positions(&[[0.5, 0.0, 0.0], [1.2, 0.0, 0.0]]),
        params(),
        2,
        Arc::new(DummyLogger::new()),
    );

    study.run().unwrap();
    assert_abs_diff_eq!(study.results().reach_fraction, 0.5);

    let before = study.results().total_pose_score;
    study.optimize().unwrap();
    let after = study.results();

    assert_abs_diff_eq!(after.reach_fraction, 1.0);
    assert!(after.total_pose_score > before);

    let flipped = study.database().get(&record_id(1)).unwrap();
    assert!(flipped.reached);
    // Seeded from the neighbor's goal state, not from zero anymore.
    assert_abs_diff_eq!(flipped.seed_state["x"], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(flipped.goal_state["x"], 1.2, epsilon = 1e-12);
}

#[test_log::test]
fn test_constant_evaluator_terminates_immediately() {
    let mut study = study(
        DummyIkSolver::new(10.0),
        ConstantEvaluator(1.0),
        ListPoseGenerator::at_positions(&[[0.1, 0.0, 0.0], [0.2, 0.0, 0.0], [0.3, 0.0, 0.0]]),
        params(),
        2,
        Arc::new(DummyLogger::new()),
    );

    study.run().unwrap();
    let results = study.results();
    assert_abs_diff_eq!(results.reach_fraction, 1.0);
    assert_abs_diff_eq!(results.total_pose_score, 3.0);
    assert_abs_diff_eq!(results.joint_score_variation, 0.0);

    study.optimize().unwrap();
    assert_abs_diff_eq!(study.results().total_pose_score, 3.0);
}

#[test_log::test]
fn test_ik_failure_is_isolated() {
    let mut solver = DummyIkSolver::new(1.0);
    solver.fail_at = Some(Point3::new(0.5, 0.0, 0.0));
    let logger = Arc::new(DummyLogger::new());

    let mut study = study(
        solver,
        DistanceEvaluator,
        ListPoseGenerator::at_positions(&[[0.2, 0.0, 0.0], [0.5, 0.0, 0.0]]),
        params(),
        2,
        logger.clone(),
    );

    study.run().unwrap();
    let poisoned = study.database().get(&record_id(1)).unwrap();
    assert!(!poisoned.reached);
    assert_eq!(poisoned.score, 0.0);
    assert!(poisoned.goal_state.is_empty());

    let healthy = study.database().get(&record_id(0)).unwrap();
    assert!(healthy.reached);

    assert!(logger.messages().iter().any(|msg| msg.contains("IK solver failed")));

    // The optimization keeps recovering: the poisoned candidate is skipped
    // and the record keeps its state.
    study.optimize().unwrap();
    assert_abs_diff_eq!(study.results().reach_fraction, 0.5);
}

#[test_log::test]
fn test_evaluator_failure_is_isolated() {
    let logger = Arc::new(DummyLogger::new());
    let mut study = study(
        DummyIkSolver::new(1.0),
        FailingEvaluator { fail_x: 0.3 },
        ListPoseGenerator::at_positions(&[[0.3, 0.0, 0.0], [0.4, 0.0, 0.0]]),
        params(),
        2,
        logger.clone(),
    );

    study.run().unwrap();
    assert!(!study.database().get(&record_id(0)).unwrap().reached);
    assert!(study.database().get(&record_id(1)).unwrap().reached);
    assert!(logger.messages().iter().any(|msg| msg.contains("Evaluator failed")));
}

#[test_log::test]
fn test_aggregates_deterministic_across_thread_counts() {
    let build = |threads| {
        study(
            DummyIkSolver::new(0.5),
            DistanceEvaluator,
            GridPoseGenerator {
                shape: [3, 3, 1],
                spacing: 0.3,
            },
            Parameters {
                radius: 0.5,
                max_steps: 4,
                step_improvement_threshold: 0.001,
            },
            threads,
            Arc::new(DummyLogger::new()),
        )
    };

    let mut serial = build(1);
    serial.run().unwrap();
    serial.optimize().unwrap();

    let mut parallel = build(4);
    parallel.run().unwrap();
    parallel.optimize().unwrap();

    let a = serial.results();
    let b = parallel.results();
    assert_eq!(a.reach_fraction, b.reach_fraction);
    assert_eq!(a.total_pose_score, b.total_pose_score);
    assert_eq!(a.normalized_total_pose_score, b.normalized_total_pose_score);
}

#[test_log::test]
fn test_save_load_preserves_aggregates() {
    let build = || {
        study(
            DummyIkSolver::new(0.8),
            DistanceEvaluator,
            ListPoseGenerator::at_positions(&[[0.5, 0.0, 0.0], [1.2, 0.0, 0.0]]),
            params(),
            2,
            Arc::new(DummyLogger::new()),
        )
    };

    let mut original = build();
    original.run().unwrap();

    let path = std::env::temp_dir().join("reach_study_roundtrip.json");
    original.save(&path).unwrap();

    let mut reloaded = build();
    reloaded.load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(reloaded.results(), original.results());

    // run() is a no-op on a populated database; optimize() works off the
    // loaded records.
    reloaded.run().unwrap();
    assert_eq!(reloaded.database().len(), 2);
    reloaded.optimize().unwrap();
    assert_abs_diff_eq!(reloaded.results().reach_fraction, 1.0);
}

#[test_log::test]
fn test_average_neighbor_count_is_self_inclusive() {
    let mut study = study(
        DummyIkSolver::new(10.0),
        ConstantEvaluator(1.0),
        ListPoseGenerator::at_positions(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]),
        Parameters {
            radius: 1.1,
            max_steps: 1,
            step_improvement_threshold: 0.0,
        },
        1,
        Arc::new(DummyLogger::new()),
    );
    study.run().unwrap();

    // Counts per record: 2, 3, 2 (each record sees itself).
    let (mean, stddev) = study.average_neighbor_count().unwrap();
    assert_abs_diff_eq!(mean, 7.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(stddev, (2.0f64 / 9.0).sqrt(), epsilon = 1e-12);
}

#[test_log::test]
fn test_visualizer_re_solve_and_neighborhoods() {
    let mut study = study(
        DummyIkSolver::new(0.8),
        DistanceEvaluator,
        ListPoseGenerator::at_positions(&[[0.5, 0.0, 0.0], [1.2, 0.0, 0.0]]),
        params(),
        2,
        Arc::new(DummyLogger::new()),
    );
    study.run().unwrap();

    let path = std::env::temp_dir().join("reach_study_visualizer.json");
    study.save(&path).unwrap();
    let db = ReachDatabase::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    // A wider basin makes the second target solvable from its zero seed.
    let mut visualizer = ReachVisualizer::new(
        db,
        Arc::new(DummyIkSolver::new(2.0)),
        Arc::new(DistanceEvaluator),
        Arc::new(NoOpDisplay),
        1.0,
    )
    .unwrap();

    assert!(matches!(
        visualizer.show_result("no-such-record"),
        Err(ReachError::UnknownRecord(_))
    ));
    visualizer.show_result(&record_id(0)).unwrap();
    visualizer.show_seed(&record_id(0)).unwrap();

    assert!(!visualizer.database().get(&record_id(1)).unwrap().reached);
    visualizer.re_solve_ik(&record_id(1)).unwrap();
    assert!(visualizer.database().get(&record_id(1)).unwrap().reached);

    let neighborhood = visualizer.reach_neighbors(&record_id(0), false).unwrap();
    let mut ids: Vec<_> = neighborhood.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec![record_id(0), record_id(1)]);
}
