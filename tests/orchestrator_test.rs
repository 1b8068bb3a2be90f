//! End-to-end orchestrator behavior over in-memory stores: approval
//! gating, checkpointing, soft-failing tests, and terminal-state rules.

mod helpers;

use gwi::domain::models::approval::{ApproverRole, Scope};
use gwi::domain::models::run::{RunStatus, RunType, StepStatus};
use gwi::domain::ports::{CheckpointStore, RunRepository};
use gwi::infrastructure::crypto::content_hash;
use serde_json::json;

use helpers::core::{TestCore, TEST_KEY_ID};
use helpers::fixtures::{approval_skeleton, pending_run, RecordingSandbox, ScriptedAgent};

fn standard_plan() -> serde_json::Value {
    json!({
        "summary": "fix the null check in parser",
        "branch": "gwi/fix-42",
        "test_command": "cargo test",
        "declared_scopes": [],
    })
}

/// Approvals covering a full autopilot run, signed by a non-actor.
fn approve_all(core: &TestCore, run_id: uuid::Uuid, plan: &serde_json::Value) {
    core.sign_and_write(approval_skeleton(
        run_id,
        "u-reviewer",
        ApproverRole::Maintainer,
        vec![Scope::Commit, Scope::Push, Scope::OpenPr],
        &content_hash(plan),
        TEST_KEY_ID,
    ));
}

#[tokio::test]
async fn autopilot_runs_all_phases_and_checkpoints() {
    let plan = standard_plan();
    let core = TestCore::new(
        ScriptedAgent::autopilot(plan.clone()),
        RecordingSandbox::new(),
    )
    .await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();
    approve_all(&core, run.id, &plan);

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert!(finished.error.is_none());
    assert_eq!(finished.steps.len(), 5);
    assert!(finished
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Completed));

    // One checkpoint per phase, flags per the pipeline table.
    let checkpoints = core.checkpoints.list(run.id).await.unwrap();
    assert_eq!(checkpoints.len(), 5);
    let by_id = |id: &str| checkpoints.iter().find(|c| c.step_id == id).unwrap();
    assert!(by_id("analyze").idempotent);
    assert!(by_id("plan").idempotent);
    assert!(!by_id("apply").idempotent);
    assert!(by_id("test").idempotent);
    assert!(!by_id("publish").idempotent);
    assert!(checkpoints.iter().all(|c| c.resumable));

    // The patch went through the sandbox exactly once.
    assert_eq!(core.sandbox.write_count(), 1);
    assert_eq!(core.agent.call_count("publish"), 1);

    // The result carries the accumulated state.
    let result = finished.result.unwrap();
    assert_eq!(result["publish"]["pr_url"], json!("https://github.com/org/repo/pull/7"));
}

#[tokio::test]
async fn missing_approval_fails_before_any_write() {
    // S5: no approval files at all.
    let core = TestCore::new(
        ScriptedAgent::autopilot(standard_plan()),
        RecordingSandbox::new(),
    )
    .await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    let error = finished.error.unwrap();
    assert!(error.contains("--scopes commit,push"), "error was: {error}");

    // Nothing reached the workspace.
    assert_eq!(core.sandbox.write_count(), 0);
    assert_eq!(core.agent.call_count("apply"), 0);

    // analyze and plan checkpoints survive for a later resume.
    let checkpoints = core.checkpoints.list(run.id).await.unwrap();
    let ids: Vec<&str> = checkpoints.iter().map(|c| c.step_id.as_str()).collect();
    assert_eq!(ids, vec!["analyze", "plan"]);
}

#[tokio::test]
async fn tampered_approval_counts_as_absent() {
    // S6: scopes extended after signing.
    let plan = standard_plan();
    let core = TestCore::new(
        ScriptedAgent::autopilot(plan.clone()),
        RecordingSandbox::new(),
    )
    .await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();

    let mut approval = approval_skeleton(
        run.id,
        "u-reviewer",
        ApproverRole::Maintainer,
        vec![Scope::Commit, Scope::Push],
        &content_hash(&plan),
        TEST_KEY_ID,
    );
    gwi::infrastructure::crypto::sign_approval(&mut approval, &core.signing_key);
    approval.scopes_approved.push(Scope::OpenPr);
    core.write_raw(&approval);

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert!(finished.error.unwrap().contains("--scopes commit,push"));
    assert_eq!(core.sandbox.write_count(), 0);
}

#[tokio::test]
async fn mismatched_intent_hash_is_ignored() {
    // Approving plan A must not authorize executing plan B.
    let plan = standard_plan();
    let core = TestCore::new(
        ScriptedAgent::autopilot(plan.clone()),
        RecordingSandbox::new(),
    )
    .await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();

    let other_plan = json!({"summary": "a different plan entirely"});
    core.sign_and_write(approval_skeleton(
        run.id,
        "u-reviewer",
        ApproverRole::Maintainer,
        vec![Scope::Commit, Scope::Push, Scope::OpenPr],
        &content_hash(&other_plan),
        TEST_KEY_ID,
    ));

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert_eq!(core.sandbox.write_count(), 0);
}

#[tokio::test]
async fn self_approval_is_rejected() {
    // S7: the actor signs their own run.
    let plan = standard_plan();
    let core = TestCore::new(
        ScriptedAgent::autopilot(plan.clone()),
        RecordingSandbox::new(),
    )
    .await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();

    core.sign_and_write(approval_skeleton(
        run.id,
        "u-1",
        ApproverRole::Owner,
        vec![Scope::Commit, Scope::Push, Scope::OpenPr],
        &content_hash(&plan),
        TEST_KEY_ID,
    ));

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert!(finished
        .error
        .unwrap()
        .contains("same actor cannot approve own run"));
}

#[tokio::test]
async fn failing_tests_annotate_but_do_not_fail_the_run() {
    let plan = standard_plan();
    let core = TestCore::new(
        ScriptedAgent::autopilot(plan.clone()),
        RecordingSandbox::failing_tests(),
    )
    .await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();
    approve_all(&core, run.id, &plan);

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(core.agent.call_count("publish"), 1);

    let result = finished.result.unwrap();
    assert_eq!(result["test"]["tests_passed"], json!(false));
    assert!(result["annotations"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a.as_str() == Some("tests failed")));
}

#[tokio::test]
async fn failing_tests_fail_the_run_when_configured() {
    let plan = standard_plan();
    let mut config = gwi::domain::models::config::OrchestratorConfig::default();
    config.fail_run_on_test_failure = true;

    let core = TestCore::with_config(
        ScriptedAgent::autopilot(plan.clone()),
        RecordingSandbox::failing_tests(),
        config,
    )
    .await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();
    approve_all(&core, run.id, &plan);

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert_eq!(core.agent.call_count("publish"), 0);
}

#[tokio::test]
async fn phase_failure_preserves_earlier_checkpoints() {
    // No scripted output for "plan" makes that phase fail.
    let agent = ScriptedAgent::new().with_phase("analyze", json!({"ok": true}));
    let core = TestCore::new(agent, RecordingSandbox::new()).await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert!(finished.error.unwrap().contains("plan"));

    let checkpoints = core.checkpoints.list(run.id).await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].step_id, "analyze");
}

#[tokio::test]
async fn terminal_runs_never_transition_back() {
    let core = TestCore::new(ScriptedAgent::new(), RecordingSandbox::new()).await;

    let mut run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();

    run.status = RunStatus::Running;
    core.run_repo.update(&run).await.unwrap();
    run.status = RunStatus::Completed;
    core.run_repo.update(&run).await.unwrap();

    run.status = RunStatus::Running;
    let err = core.run_repo.update(&run).await.unwrap_err();
    assert!(err.to_string().contains("terminal"));

    let stored = core.run_repo.get(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
}

#[tokio::test]
async fn cancelled_runs_are_not_executed() {
    let core = TestCore::new(ScriptedAgent::new(), RecordingSandbox::new()).await;

    let run = pending_run("t-1", RunType::Autopilot, "u-1");
    core.run_repo.insert(&run).await.unwrap();
    core.orchestrator.cancel_run(run.id).await.unwrap();

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Cancelled);
    assert!(core.agent.calls().is_empty());
}

#[tokio::test]
async fn triage_runs_only_analyze() {
    let core = TestCore::new(
        ScriptedAgent::new().with_phase("analyze", json!({"classification": "question"})),
        RecordingSandbox::new(),
    )
    .await;

    let run = pending_run("t-1", RunType::Triage, "u-1");
    core.run_repo.insert(&run).await.unwrap();

    let finished = core.orchestrator.execute(run.id, None).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.steps.len(), 1);
    assert_eq!(core.agent.calls(), vec!["analyze".to_string()]);
}
