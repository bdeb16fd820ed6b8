//! Integration tests for `run_jobs`.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cirrus_flow::{run_jobs, Job, JobResult, RunOptions, SchedulerConfig, StuckJob};

fn options(concurrency: usize) -> RunOptions {
    RunOptions::new(SchedulerConfig::default().with_concurrency(concurrency))
}

#[tokio::test(start_paused = true)]
async fn results_follow_submission_order() {
    // Later jobs finish first.
    let jobs: Vec<Job<(), usize>> = (0..6)
        .map(|i| {
            Job::new(move |()| async move {
                tokio::time::sleep(Duration::from_millis(100 - 10 * i as u64)).await;
                Ok(i)
            })
        })
        .collect();

    let results = run_jobs(jobs, (), &options(6)).await;
    let values: Vec<usize> = results.iter().map(|r| *r.value().unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn failures_and_panics_are_isolated() {
    let jobs: Vec<Job<(), &'static str>> = vec![
        Job::new(|()| async { Ok("first") }).with_property("service", "s3"),
        Job::new(|()| async { Err(anyhow::anyhow!("AccessDenied")) })
            .with_property("service", "iam")
            .with_property("region", "global"),
        Job::new(|()| async {
            let parsed: Option<&'static str> = None;
            Ok(parsed.expect("collector bug"))
        })
        .with_property("service", "sqs"),
        Job::new(|()| async { Ok("last") }),
    ];

    let results = run_jobs(jobs, (), &options(2)).await;
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].value(), Some(&"first"));
    assert_eq!(results[3].value(), Some(&"last"));

    match &results[1] {
        JobResult::Rejected { reason, properties } => {
            assert!(reason.to_string().contains("AccessDenied"));
            assert_eq!(properties.get("service").map(String::as_str), Some("iam"));
            assert_eq!(properties.get("region").map(String::as_str), Some("global"));
        }
        JobResult::Fulfilled { .. } => panic!("expected rejection"),
    }

    let panicked = results[2].reason().expect("panic becomes rejection");
    assert!(panicked.to_string().contains("collector bug"));
    assert_eq!(
        results[2].properties().get("service").map(String::as_str),
        Some("sqs")
    );
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let jobs: Vec<Job<(), ()>> = (0..10)
        .map(|_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            Job::new(move |()| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    let results = run_jobs(jobs, (), &options(3)).await;
    assert!(results.iter().all(JobResult::is_fulfilled));
    assert_eq!(peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn zero_concurrency_runs_sequentially() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let jobs: Vec<Job<(), ()>> = (0..3)
        .map(|_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            Job::new(move |()| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    let results = run_jobs(jobs, (), &options(0)).await;
    assert_eq!(results.len(), 3);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn every_job_receives_the_context() {
    #[derive(Clone)]
    struct Ctx {
        partition: Arc<str>,
    }

    let jobs: Vec<Job<Ctx, String>> = (0..3)
        .map(|i| Job::new(move |ctx: Ctx| async move { Ok(format!("{}-{i}", ctx.partition)) }))
        .collect();
    let ctx = Ctx {
        partition: Arc::from("aws"),
    };

    let results = run_jobs(jobs, ctx, &options(2)).await;
    let values: Vec<String> = results.into_iter().map(|r| r.into_result().unwrap()).collect();
    assert_eq!(values, vec!["aws-0", "aws-1", "aws-2"]);
}

#[tokio::test(start_paused = true)]
async fn watchdog_warns_each_interval_without_cancelling() {
    let seen: Arc<Mutex<Vec<StuckJob>>> = Arc::default();
    let observer_seen = Arc::clone(&seen);
    let options = RunOptions::new(
        SchedulerConfig::default()
            .with_concurrency(2)
            .with_watchdog_interval(Duration::from_secs(60)),
    )
    .with_stuck_observer(move |stuck| observer_seen.lock().unwrap().push(stuck.clone()));

    let jobs: Vec<Job<(), &'static str>> = vec![
        Job::new(|()| async {
            tokio::time::sleep(Duration::from_secs(150)).await;
            Ok("slow")
        })
        .with_property("service", "ec2"),
        Job::new(|()| async { Ok("fast") }),
    ];

    let results = run_jobs(jobs, (), &options).await;
    assert_eq!(results[0].value(), Some(&"slow"));
    assert_eq!(results[1].value(), Some(&"fast"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|s| s.index == 0));
    assert_eq!(seen[0].intervals, 1);
    assert_eq!(seen[1].intervals, 2);
    assert_eq!(seen[1].properties.get("service").map(String::as_str), Some("ec2"));
}
