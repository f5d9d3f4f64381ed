//! Integration tests for Taskbag
//!
//! These tests verify the end-to-end behavior of partitioning, execution and
//! aggregation through the public facade.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use taskbag::{
    AggregateResult, AggregationMode, Calibration, EstimatorConfig, ExecutionError,
    IsolatedExecutor, ParallelExecutor, PartialResult, Payload, RunError, Runner, Sample,
    SequentialExecutor, Supervisor, TaskError, TaskId, TaskKind, TaskSequence, aggregate,
    estimate_bootstrap, execute_partition, pair_count, partition, task_fn,
};

fn unit_square() -> Vec<Vec<f64>> {
    vec![
        vec![0.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 1.0],
    ]
}

/// Every task lands in exactly one partition, whatever the worker count
#[test]
fn test_partitions_cover_sequence_once() {
    for len in [0usize, 1, 7, 100, 1001] {
        for workers in 1..=12 {
            let mut next = 0;
            for p in partition(len, workers, &Calibration::zero()).unwrap() {
                assert_eq!(p.lo(), next, "gap or overlap at len={len} workers={workers}");
                next = p.hi();
            }
            assert_eq!(next, len);
        }
    }
}

/// Uncalibrated sizes differ by at most one; offsets shift sizes exactly
#[test]
fn test_partition_size_balance_and_calibration() {
    let sizes: Vec<usize> = partition(103, 5, &Calibration::zero())
        .unwrap()
        .map(|p| p.len())
        .collect();
    let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
    assert!(max - min <= 1);
    assert_eq!(sizes.iter().sum::<usize>(), 103);

    let calibrated: Vec<usize> = partition(100, 4, &Calibration::new(vec![-5, 3, 2]))
        .unwrap()
        .map(|p| p.len())
        .collect();
    assert_eq!(calibrated, vec![20, 28, 27, 25]);
}

/// Sequential and parallel means agree for every worker count
#[test]
fn test_strategy_equivalence() {
    let tasks = TaskSequence::indexed((0..97).map(|i| (i as f64).sin() * 3.0 + 1.5));
    let f = task_fn(|x: &f64| Ok(x * x));

    let expected = Runner::new(SequentialExecutor, AggregationMode::Mean)
        .run(&tasks, &f)
        .unwrap()
        .value
        .mean()
        .unwrap();

    for workers in 1..=tasks.len() {
        let got = Runner::new(ParallelExecutor::new(workers), AggregationMode::Mean)
            .run(&tasks, &f)
            .unwrap()
            .value
            .mean()
            .unwrap();
        assert!(
            ((got - expected) / expected).abs() < 1e-9,
            "workers={workers}: {got} vs {expected}"
        );
    }
}

/// Completion order does not change the aggregate
#[test]
fn test_order_invariance() {
    let tasks = TaskSequence::indexed((0..50).map(|i| i as f64 * 0.1));
    let f = task_fn(|x: &f64| Ok(x + 1.0));

    let partials: Vec<PartialResult<f64>> = partition(tasks.len(), 6, &Calibration::zero())
        .unwrap()
        .map(|p| execute_partition(&p, &tasks, &f).unwrap())
        .collect();
    let mut reversed = partials.clone();
    reversed.reverse();

    for mode in [AggregationMode::Mean, AggregationMode::Identity] {
        assert_eq!(
            aggregate(partials.clone(), mode).unwrap(),
            aggregate(reversed.clone(), mode).unwrap()
        );
    }
}

/// All index pairs come back exactly once in identity mode
#[test]
fn test_identity_round_trip_over_pairs() {
    let n = 23;
    let points: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64, (i * i) as f64]).collect();
    let tasks = TaskSequence::pairwise(&points);
    assert_eq!(tasks.len(), pair_count(n));

    let outcome = Runner::new(ParallelExecutor::new(4), AggregationMode::Identity)
        .run(&tasks, &TaskKind::EuclideanDistance)
        .unwrap();
    let map = outcome.value.as_map().unwrap();

    assert_eq!(map.len(), n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            assert!(map.contains_key(&TaskId::Pair(i, j)), "missing ({i}, {j})");
        }
    }
}

/// Diagonal of the unit square is sqrt(2), sequentially and in parallel
#[test]
fn test_unit_square_distances() {
    let tasks = TaskSequence::pairwise(&unit_square());

    let seq = Runner::new(SequentialExecutor, AggregationMode::Identity)
        .run(&tasks, &TaskKind::EuclideanDistance)
        .unwrap();
    let par = Runner::new(ParallelExecutor::new(2), AggregationMode::Identity)
        .run(&tasks, &TaskKind::EuclideanDistance)
        .unwrap();

    let seq_map = seq.value.as_map().unwrap();
    assert_eq!(seq_map[&TaskId::Pair(0, 3)], 2f64.sqrt());
    assert_eq!(seq_map[&TaskId::Pair(0, 1)], 1.0);
    assert_eq!(seq.value, par.value);
    assert_eq!(par.partitions.len(), 2);
}

/// A constant sequence averages to the constant exactly
#[test]
fn test_constant_mean_is_exact() {
    let tasks = TaskSequence::indexed(vec![Payload::Scalar(10.0); 1000]);

    for workers in [1, 2, 5, 7] {
        let outcome = Runner::new(ParallelExecutor::new(workers), AggregationMode::Mean)
            .run(&tasks, &TaskKind::Identity)
            .unwrap();
        assert_eq!(
            outcome.value,
            AggregateResult::Mean {
                value: 10.0,
                count: 1000
            }
        );
    }
}

/// Surplus workers get empty partitions and contribute nothing
#[test]
fn test_more_workers_than_tasks() {
    let tasks = TaskSequence::indexed(vec![1.0f64, 2.0, 3.0]);
    let id = task_fn(|x: &f64| Ok(*x));

    let outcome = Runner::new(ParallelExecutor::new(8), AggregationMode::Mean)
        .run(&tasks, &id)
        .unwrap();

    assert_eq!(outcome.value.mean(), Some(2.0));
    assert_eq!(outcome.partitions.len(), 8);
    assert_eq!(
        outcome.partitions.iter().filter(|p| p.lo == p.hi).count(),
        5
    );
}

/// A failing task aborts the whole run
#[test]
fn test_task_failure_aborts_run() {
    let tasks = TaskSequence::indexed((0..40).map(|i| i as f64));
    let f = task_fn(|x: &f64| {
        if *x == 33.0 {
            Err(TaskError::Invalid("bad value".into()))
        } else {
            Ok(*x)
        }
    });

    let err = Runner::new(ParallelExecutor::new(4), AggregationMode::Mean)
        .run(&tasks, &f)
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Execution(ExecutionError::WorkerFailed { partition: 3, .. })
    ));
}

/// The bootstrap interval brackets its point estimate near the true mean
#[test]
fn test_estimator_brackets_population_mean() {
    let mut rng = StdRng::seed_from_u64(23);
    let sample = taskbag_cli::draw_population(50_000, &mut rng);
    let tasks = TaskSequence::from_sample(&sample);

    let exact = Runner::new(SequentialExecutor, AggregationMode::Mean)
        .run(&tasks, &TaskKind::BodyMassIndex)
        .unwrap()
        .value
        .mean()
        .unwrap();

    let config = EstimatorConfig {
        resample_size: 2000,
        bootstrap_iterations: 1000,
        seed: Some(23),
        ..Default::default()
    };
    let est = estimate_bootstrap(&tasks, &TaskKind::BodyMassIndex, &config, &mut rng).unwrap();

    assert_eq!(est.drawn, 2000);
    assert!(est.lower <= est.point && est.point <= est.upper);
    assert!((est.point - exact).abs() < 0.1);
}

/// Worker processes produce the same mean as the in-process strategies
#[test]
fn test_isolated_matches_sequential() {
    let mut rng = StdRng::seed_from_u64(23);
    let sample = Arc::new(taskbag_cli::draw_population(10_000, &mut rng));
    let tasks = TaskSequence::from_sample(&sample);

    let supervisor = Supervisor::new(Duration::from_secs(30), 3)
        .with_binary(env!("CARGO_BIN_EXE_taskbag"));
    let isolated = Runner::new(
        IsolatedExecutor::new(Arc::clone(&sample), 3, supervisor),
        AggregationMode::Mean,
    )
    .run(&tasks, &TaskKind::BodyMassIndex)
    .unwrap();
    let sequential = Runner::new(SequentialExecutor, AggregationMode::Mean)
        .run(&tasks, &TaskKind::BodyMassIndex)
        .unwrap();

    assert_eq!(isolated.value, sequential.value);
    assert_eq!(isolated.strategy, "isolated");
    assert!(matches!(*sample, Sample::Population(_)));
}

/// Partitions sent in several Run commands still yield every pair once
#[test]
fn test_isolated_chunked_distances() {
    let points: Vec<Vec<f64>> = (0..12).map(|i| vec![i as f64, 0.0]).collect();
    let sample = Arc::new(Sample::Vectors(points));
    let tasks = TaskSequence::from_sample(&sample);

    let supervisor = Supervisor::new(Duration::from_secs(30), 2)
        .with_binary(env!("CARGO_BIN_EXE_taskbag"))
        .with_chunk_tasks(5);
    let isolated = Runner::new(
        IsolatedExecutor::new(Arc::clone(&sample), 2, supervisor),
        AggregationMode::Identity,
    )
    .run(&tasks, &TaskKind::EuclideanDistance)
    .unwrap();

    let map = isolated.value.as_map().unwrap();
    assert_eq!(map.len(), pair_count(12));
    assert_eq!(map[&TaskId::Pair(0, 11)], 11.0);
    assert_eq!(map[&TaskId::Pair(4, 5)], 1.0);
}
