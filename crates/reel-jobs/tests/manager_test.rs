mod common;

use std::time::Duration;

use common::*;
use reel_jobs::{
    ExecutionStatus, JobError, JobId, JobManager, JobPatch, JobState, Trigger, UpdateKind,
};
use serde_json::json;

#[tokio::test]
async fn scheduled_job_runs_on_its_own() {
    let manager = manager();
    let id = manager
        .add_job(new_job("tick", "instant", "every 1s"))
        .unwrap()
        .id;
    assert!(manager.get_job(&id).unwrap().next_run_at.is_some());
    manager.start();
    manager.start();

    let deadline = tokio::time::Instant::now() + WAIT;
    let execution = loop {
        let done = manager
            .get_job_executions(&id, 10)
            .unwrap()
            .into_iter()
            .find(|e| e.trigger == Trigger::Scheduled && e.status.is_terminal());
        if let Some(e) = done {
            break e;
        }
        assert!(tokio::time::Instant::now() < deadline, "no scheduled run");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.message.as_deref(), Some("done"));

    let job = manager.get_job(&id).unwrap();
    assert!(job.last_run_at.is_some());
    assert!(job.next_run_at.is_some());
    manager.stop().await;
}

#[tokio::test]
async fn overrunning_job_is_rescheduled_from_completion() {
    let manager = manager();
    let added = manager
        .add_job(new_job("slow", "slow", "every 1s"))
        .unwrap();
    let id = added.id;
    let first_due = added.next_run_at.unwrap();
    manager.start();

    let job = wait_for(&manager, &id, |j| j.last_status.is_some()).await;
    let runs = manager.get_job_executions(&id, 10).unwrap();
    assert_eq!(runs.len(), 1, "no catch-up run while the first overran");
    let run = &runs[0];
    assert_eq!(run.trigger, Trigger::Scheduled);
    assert_eq!(run.status, ExecutionStatus::Succeeded);

    let ended = run.ended_at.unwrap();
    let interval = chrono::Duration::seconds(1);
    let next = job.next_run_at.unwrap();
    assert!(next >= ended + interval, "next {next} before {ended} + 1s");
    assert!(next > first_due + interval);
    assert_eq!(job.state, JobState::Idle);
    manager.stop().await;
}

#[tokio::test]
async fn second_run_without_force_conflicts() {
    let manager = manager();
    let id = add(&manager, "scan", "block");

    let first = manager.run_job(&id, false).unwrap();
    assert_eq!(first.status, ExecutionStatus::Running);
    assert_eq!(first.trigger, Trigger::Manual);
    assert!(matches!(
        manager.run_job(&id, false),
        Err(JobError::Conflict(_))
    ));
    // Never queued.
    assert_eq!(manager.get_job_executions(&id, 10).unwrap().len(), 1);

    manager.cancel_job(&id).unwrap();
    wait_idle(&manager, &id).await;
}

#[tokio::test]
async fn cancel_while_running() {
    let manager = manager();
    let id = add(&manager, "scan", "block");
    let execution = manager.run_job(&id, false).unwrap();
    assert_eq!(manager.get_job(&id).unwrap().state, JobState::Running);

    manager.cancel_job(&id).unwrap();
    let job = wait_idle(&manager, &id).await;
    assert_eq!(job.last_status, Some(ExecutionStatus::Cancelled));

    let recorded = latest(&manager, &id);
    assert_eq!(recorded.execution_id, execution.execution_id);
    assert_eq!(recorded.status, ExecutionStatus::Cancelled);
    assert!(recorded.ended_at.is_some());
}

#[tokio::test]
async fn subscriber_sees_started_then_terminal() {
    let manager = manager();
    let id = add(&manager, "quick", "instant");
    let mut sub = manager.subscribe();

    let execution = manager.run_job(&id, false).unwrap();
    let started = recv(&mut sub).await;
    let done = recv(&mut sub).await;

    assert_eq!(started.status, UpdateKind::Started);
    assert_eq!(done.status, UpdateKind::Completed);
    assert_eq!(started.execution_id, execution.execution_id);
    assert_eq!(done.execution_id, execution.execution_id);
    assert_eq!(done.job_id, id);
    assert!(done.timestamp >= started.timestamp);
    manager.unsubscribe(sub);
}

#[tokio::test]
async fn invalid_config_update_leaves_job_untouched() {
    let manager = manager();
    let mut new = new_job("lib", "library_scan", "manual");
    new.config = json!({"path": "/media/movies"});
    let id = manager.add_job(new).unwrap().id;

    let patch = JobPatch {
        name: Some("New name".into()),
        config: Some(json!({"path": "/media", "progress_every": 0})),
        ..Default::default()
    };
    assert!(matches!(
        manager.update_job(&id, patch),
        Err(JobError::InvalidConfig(_))
    ));
    let job = manager.get_job(&id).unwrap();
    assert_eq!(job.config, json!({"path": "/media/movies"}));
    assert_eq!(job.name, "lib job");
}

#[tokio::test]
async fn update_while_running_conflicts() {
    let manager = manager();
    let id = add(&manager, "scan", "block");
    manager.run_job(&id, false).unwrap();

    let patch = JobPatch {
        enabled: Some(false),
        ..Default::default()
    };
    assert!(matches!(
        manager.update_job(&id, patch),
        Err(JobError::Conflict(_))
    ));
    assert!(manager.get_job(&id).unwrap().enabled);

    manager.cancel_job(&id).unwrap();
    wait_idle(&manager, &id).await;
}

#[tokio::test]
async fn forced_run_overlaps() {
    let manager = manager();
    let id = add(&manager, "scan", "block");
    let a = manager.run_job(&id, false).unwrap();
    let b = manager.run_job(&id, true).unwrap();
    assert!(b.execution_id > a.execution_id);

    let history = manager.get_job_executions(&id, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| e.status == ExecutionStatus::Running));

    manager.cancel_job(&id).unwrap();
    wait_idle(&manager, &id).await;
    let history = manager.get_job_executions(&id, 10).unwrap();
    assert!(history
        .iter()
        .all(|e| e.status == ExecutionStatus::Cancelled));
}

#[tokio::test]
async fn disabled_job_needs_force() {
    let manager = manager();
    let mut new = new_job("off", "instant", "every 1s");
    new.enabled = false;
    let id = manager.add_job(new).unwrap().id;
    assert!(manager.get_job(&id).unwrap().next_run_at.is_none());

    assert!(matches!(
        manager.run_job(&id, false),
        Err(JobError::InvalidRequest(_))
    ));
    manager.run_job(&id, true).unwrap();
    let job = wait_idle(&manager, &id).await;
    assert_eq!(job.last_status, Some(ExecutionStatus::Succeeded));
    assert!(job.next_run_at.is_none());
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let manager = manager();
    let ghost = JobId::from("ghost");
    assert!(matches!(manager.get_job(&ghost), Err(JobError::NotFound { .. })));
    assert!(matches!(manager.run_job(&ghost, true), Err(JobError::NotFound { .. })));
    assert!(matches!(manager.cancel_job(&ghost), Err(JobError::NotFound { .. })));
    assert!(matches!(
        manager.get_job_executions(&ghost, 5),
        Err(JobError::NotFound { .. })
    ));
    assert!(matches!(
        manager.update_job(&ghost, JobPatch::default()),
        Err(JobError::NotFound { .. })
    ));
}

#[tokio::test]
async fn cancel_idle_is_invalid_request() {
    let manager = manager();
    let id = add(&manager, "scan", "block");
    assert!(matches!(
        manager.cancel_job(&id),
        Err(JobError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn repeated_cancel_emits_one_event() {
    let manager = manager();
    let id = add(&manager, "slow", "stubborn");
    let mut sub = manager.subscribe();
    manager.run_job(&id, false).unwrap();
    assert_eq!(recv(&mut sub).await.status, UpdateKind::Started);

    manager.cancel_job(&id).unwrap();
    assert_eq!(manager.get_job(&id).unwrap().state, JobState::Cancelling);
    manager.cancel_job(&id).unwrap();

    assert_eq!(recv(&mut sub).await.status, UpdateKind::Cancelling);
    let terminal = recv(&mut sub).await;
    assert_eq!(terminal.status, UpdateKind::Cancelled);

    let recorded = latest(&manager, &id);
    assert_eq!(recorded.status, ExecutionStatus::Cancelled);
    assert_eq!(recorded.error.as_deref(), Some("interrupted mid-batch"));
}

#[tokio::test]
async fn completion_after_cancel_counts_as_success() {
    let manager = manager();
    let mut new = new_job("slow", "stubborn", "manual");
    new.config = json!({"finish": true});
    let id = manager.add_job(new).unwrap().id;

    manager.run_job(&id, false).unwrap();
    manager.cancel_job(&id).unwrap();
    let job = wait_idle(&manager, &id).await;
    assert_eq!(job.last_status, Some(ExecutionStatus::Succeeded));
    assert_eq!(
        latest(&manager, &id).message.as_deref(),
        Some("finished anyway")
    );
}

#[tokio::test]
async fn failures_and_panics_are_recorded() {
    let manager = manager();
    let fail = add(&manager, "fail", "fail");
    let boom = add(&manager, "boom", "panic");
    let ok = add(&manager, "ok", "instant");

    manager.run_job(&fail, false).unwrap();
    manager.run_job(&boom, false).unwrap();
    wait_idle(&manager, &fail).await;
    wait_idle(&manager, &boom).await;

    let failed = latest(&manager, &fail);
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("disk on fire"));

    let panicked = latest(&manager, &boom);
    assert_eq!(panicked.status, ExecutionStatus::Failed);
    assert!(panicked.error.unwrap().contains("boom"));

    // The manager keeps serving.
    manager.run_job(&ok, false).unwrap();
    let job = wait_idle(&manager, &ok).await;
    assert_eq!(job.last_status, Some(ExecutionStatus::Succeeded));
}

#[tokio::test]
async fn history_is_capped_and_newest_first() {
    let manager = manager();
    let id = add(&manager, "quick", "instant");
    let mut ids = Vec::new();
    for _ in 0..7 {
        ids.push(manager.run_job(&id, false).unwrap().execution_id);
        wait_idle(&manager, &id).await;
    }

    let all = manager.get_job_executions(&id, 100).unwrap();
    assert_eq!(all.len(), 5);
    let kept: Vec<_> = all.iter().map(|e| e.execution_id).collect();
    let expected: Vec<_> = ids.iter().rev().take(5).copied().collect();
    assert_eq!(kept, expected);

    let two = manager.get_job_executions(&id, 2).unwrap();
    assert_eq!(two.len(), 2);
    assert_eq!(two[0].execution_id, all[0].execution_id);
    assert_eq!(two[1].execution_id, all[1].execution_id);
}

#[tokio::test]
async fn library_scan_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..3 {
        std::fs::write(dir.path().join(format!("ep{i}.mkv")), b"x").unwrap();
    }
    let manager = manager();
    let mut new = new_job("lib", "library_scan", "manual");
    new.config = json!({"path": dir.path(), "progress_every": 1});
    let id = manager.add_job(new).unwrap().id;

    let mut sub = manager.subscribe();
    manager.run_job(&id, false).unwrap();

    let mut kinds = Vec::new();
    loop {
        let update = recv(&mut sub).await;
        kinds.push(update.status);
        if update.status.is_terminal() {
            break;
        }
    }
    assert_eq!(kinds.first(), Some(&UpdateKind::Started));
    assert_eq!(kinds.last(), Some(&UpdateKind::Completed));
    // One "scanning" message plus one per media file.
    assert_eq!(
        kinds.iter().filter(|k| **k == UpdateKind::Progress).count(),
        4
    );
    assert_eq!(
        latest(&manager, &id).message.as_deref(),
        Some("scanned 3 files, 3 media files")
    );
}

#[tokio::test]
async fn remove_job_drops_history() {
    let manager = manager();
    let id = add(&manager, "scan", "block");
    manager.run_job(&id, false).unwrap();
    assert!(matches!(manager.remove_job(&id), Err(JobError::Conflict(_))));

    manager.cancel_job(&id).unwrap();
    wait_idle(&manager, &id).await;
    manager.remove_job(&id).unwrap();
    assert!(manager.get_jobs().is_empty());
    assert!(matches!(
        manager.get_job_executions(&id, 10),
        Err(JobError::NotFound { .. })
    ));
}

#[tokio::test]
async fn duplicate_ids_conflict() {
    let manager = manager();
    add(&manager, "scan", "instant");
    assert!(matches!(
        manager.add_job(new_job("scan", "instant", "manual")),
        Err(JobError::Conflict(_))
    ));
}

#[tokio::test]
async fn stop_cancels_in_flight_and_closes_streams() {
    let manager = manager();
    let id = add(&manager, "scan", "block");
    manager.start();
    let mut sub = manager.subscribe();
    manager.run_job(&id, false).unwrap();

    tokio::time::timeout(WAIT, manager.stop())
        .await
        .expect("stop did not finish");

    let recorded = latest(&manager, &id);
    assert_eq!(recorded.status, ExecutionStatus::Cancelled);
    assert_eq!(manager.get_job(&id).unwrap().state, JobState::Idle);

    let mut kinds = Vec::new();
    while let Some(update) = sub.recv().await {
        kinds.push(update.status);
    }
    assert_eq!(
        kinds,
        vec![UpdateKind::Started, UpdateKind::Cancelling, UpdateKind::Cancelled]
    );

    assert!(matches!(manager.run_job(&id, true), Err(JobError::Stopped)));
    assert!(manager.is_stopped());
    // Idempotent.
    manager.stop().await;
}

#[tokio::test]
async fn restored_jobs_keep_their_definition() {
    let manager = manager();
    let job = manager
        .add_job(new_job("nightly", "instant", "daily 03:00"))
        .unwrap();

    let fresh = JobManager::new(config(), registry());
    let restored = fresh.restore_job(job.clone()).unwrap();
    assert_eq!(restored.id, job.id);
    assert_eq!(restored.created_at, job.created_at);
    assert!(restored.next_run_at.is_some());
    assert!(matches!(
        fresh.restore_job(job),
        Err(JobError::Conflict(_))
    ));
}
