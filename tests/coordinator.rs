//! Coordinator integration tests
//!
//! Drives the scheduling tick phases against a scripted pilot and engine,
//! covering launch/completion transitions, failure retry, exchange
//! application, capacity bounds, drain mode, and crash recovery.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use asyncre::artifact::CycleLayout;
use asyncre::config::Config;
use asyncre::domain::{ReplicaId, RunningStatus, SpmdMode, SubjobSpec, SubjobStatus};
use asyncre::engine::MdEngine;
use asyncre::error::Result;
use asyncre::pilot::{MockPilot, Pilot};
use asyncre::scheduler::{restore_job, Coordinator};
use asyncre::scheme::NullExchange;
use asyncre::store::StatusStore;
use tempfile::TempDir;

/// Engine double whose completion answers are scripted per (replica, cycle)
#[derive(Debug)]
struct ScriptedEngine {
    completed: Arc<Mutex<HashSet<(ReplicaId, u64)>>>,
}

impl ScriptedEngine {
    fn new() -> (Self, Arc<Mutex<HashSet<(ReplicaId, u64)>>>) {
        let completed = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                completed: Arc::clone(&completed),
            },
            completed,
        )
    }
}

impl MdEngine for ScriptedEngine {
    fn prepare(&self, replica: ReplicaId, cycle: u64) -> Result<SubjobSpec> {
        Ok(SubjobSpec {
            executable: PathBuf::from("/bin/true"),
            arguments: vec![],
            working_directory: PathBuf::from(format!("r{}", replica)),
            stdout_path: PathBuf::from(format!("r{}/out_{}.log", replica, cycle)),
            stderr_path: PathBuf::from(format!("r{}/out_{}.err", replica, cycle)),
            processes: 1,
            spmd: SpmdMode::Single,
        })
    }

    fn has_completed(&self, replica: ReplicaId, cycle: u64) -> bool {
        self.completed.lock().unwrap().contains(&(replica, cycle))
    }
}

struct Harness {
    coordinator: Coordinator,
    pilot: Arc<MockPilot>,
    completed: Arc<Mutex<HashSet<(ReplicaId, u64)>>>,
    _temp: TempDir,
}

fn config_yaml(nreplicas: usize, extra: &str) -> String {
    format!(
        "\
ENGINE: DATE
RE_TYPE: NULL
ENGINE_INPUT_BASENAME: job
NREPLICAS: {}
WALL_TIME: 600
EXCHANGE_SEED: 42
{}",
        nreplicas, extra
    )
}

fn harness(nreplicas: usize, extra: &str) -> Harness {
    let temp = TempDir::new().unwrap();
    let config = Config::from_str(&config_yaml(nreplicas, extra)).unwrap();
    let layout = CycleLayout::new(temp.path(), "job");
    let pilot = Arc::new(MockPilot::new(
        config.total_cores,
        config.subjob_cores,
        config.subjobs_buffer_size,
    ));
    let (engine, completed) = ScriptedEngine::new();
    let store = StatusStore::new(nreplicas);
    let coordinator = Coordinator::new(
        config,
        layout,
        store,
        Arc::clone(&pilot) as Arc<dyn Pilot>,
        Box::new(engine),
        Box::new(NullExchange::new(nreplicas)),
    );
    Harness {
        coordinator,
        pilot,
        completed,
        _temp: temp,
    }
}

fn statuses(store: &StatusStore) -> Vec<(RunningStatus, u64)> {
    store
        .table()
        .unwrap()
        .iter()
        .map(|r| (r.running_status, r.cycle_current))
        .collect()
}

/// Scenario: two waiting replicas with an always-accept scheme swap states
/// in one round while their cycles stay put.
#[tokio::test]
async fn two_replicas_trivial_swap() {
    let mut h = harness(2, "NEXCHG_ATTEMPTS: 1\n");
    h.coordinator.run_exchange();

    let table = h.coordinator.store().table().unwrap();
    assert_eq!(table[0].stateid_current, 1);
    assert_eq!(table[1].stateid_current, 0);
    assert_eq!(table[0].cycle_current, 1);
    assert_eq!(table[1].cycle_current, 1);
}

/// Scenario: both replicas launch, the pilot reports Done, and the next
/// poll advances both to cycle 2 in the wait state.
#[tokio::test]
async fn launch_complete_then_cycle_advances() {
    let mut h = harness(2, "TOTAL_CORES: 2\nSUBJOBS_BUFFER_SIZE: 0\n");

    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 2);
    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Running, 1), (RunningStatus::Running, 1)]
    );

    // Runs finish and leave their artifacts behind
    h.completed.lock().unwrap().insert((0, 1));
    h.completed.lock().unwrap().insert((1, 1));
    h.pilot.finish_all(SubjobStatus::Done);

    h.coordinator.poll_running().await.unwrap();
    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Waiting, 2), (RunningStatus::Waiting, 2)]
    );

    h.coordinator.run_exchange();
    assert_eq!(h.coordinator.stats().exchange_rounds, 1);
}

/// Scenario: a failed run (no artifact) returns the replica to W at the
/// same cycle and it is re-launched on the next admission pass.
#[tokio::test]
async fn failure_keeps_cycle_and_retries() {
    let mut h = harness(1, "");

    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 1);

    h.pilot.finish_all(SubjobStatus::Failed);
    h.coordinator.poll_running().await.unwrap();
    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Waiting, 1)]
    );
    assert_eq!(h.coordinator.stats().failed, 1);

    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 2);
    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Running, 1)]
    );
}

/// Scenario: a terminal Done without the cycle artifact counts as failure.
#[tokio::test]
async fn done_without_artifact_is_failure() {
    let mut h = harness(1, "");

    h.coordinator.admit().await.unwrap();
    h.pilot.finish_all(SubjobStatus::Done);
    // No artifact scripted
    h.coordinator.poll_running().await.unwrap();

    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Waiting, 1)]
    );
    assert_eq!(h.coordinator.stats().failed, 1);
}

/// Scenario: single replica never exchanges but keeps cycling.
#[tokio::test]
async fn single_replica_cycles_without_exchanges() {
    let mut h = harness(1, "");

    for cycle in 1..=3u64 {
        h.coordinator.admit().await.unwrap();
        h.completed.lock().unwrap().insert((0, cycle));
        h.pilot.finish_all(SubjobStatus::Done);
        h.coordinator.poll_running().await.unwrap();
        h.coordinator.run_exchange();
    }

    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Waiting, 4)]
    );
    assert_eq!(h.coordinator.stats().exchange_rounds, 0);
    assert_eq!(h.coordinator.store().get(0).unwrap().stateid_current, 0);
}

/// Scenario: TOTAL_CORES=4, SUBJOB_CORES=2, BUFFER=0.5 admits exactly
/// three concurrent subjobs.
#[tokio::test]
async fn capacity_bound_respected() {
    let mut h = harness(
        6,
        "TOTAL_CORES: 4\nSUBJOB_CORES: 2\nSUBJOBS_BUFFER_SIZE: 0.5\n",
    );

    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 3);

    let (running, waiting) = h.coordinator.store().partition().unwrap();
    assert_eq!(running.len(), 3);
    assert_eq!(waiting.len(), 3);

    // Nothing further fits on a second pass
    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 3);

    // One slot frees up once a subjob completes
    let (handle, _) = h.pilot.submitted()[0].clone();
    h.completed.lock().unwrap().insert((0, 1));
    h.pilot.set_status(handle, SubjobStatus::Done);
    h.coordinator.poll_running().await.unwrap();
    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 4);
}

/// Scenario: drain mode refuses new launches while polling continues.
#[tokio::test]
async fn drain_refuses_admission_but_polls() {
    let mut h = harness(2, "TOTAL_CORES: 2\nSUBJOBS_BUFFER_SIZE: 0\n");

    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 2);

    h.coordinator.begin_drain();
    h.completed.lock().unwrap().insert((0, 1));
    h.completed.lock().unwrap().insert((1, 1));
    h.pilot.finish_all(SubjobStatus::Done);
    h.coordinator.tick().await.unwrap();

    // Completions were reaped, nothing new was admitted
    assert_eq!(h.pilot.submitted_count(), 2);
    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Waiting, 2), (RunningStatus::Waiting, 2)]
    );
}

/// Scenario: full ticks drive launch, completion, exchange, and re-launch.
#[tokio::test]
async fn full_ticks_keep_replicas_cycling() {
    let mut h = harness(2, "TOTAL_CORES: 2\nSUBJOBS_BUFFER_SIZE: 0\nCHECKPOINT_INTERVAL: 1\n");

    h.coordinator.tick().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 2);

    h.completed.lock().unwrap().insert((0, 1));
    h.completed.lock().unwrap().insert((1, 1));
    h.pilot.finish_all(SubjobStatus::Done);

    h.coordinator.tick().await.unwrap();
    // Both completed cycle 1 and were re-admitted for cycle 2
    assert_eq!(h.pilot.submitted_count(), 4);
    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Running, 2), (RunningStatus::Running, 2)]
    );
    assert_eq!(h.coordinator.stats().completed, 2);
}

/// Scenario: pilot refusal keeps replicas waiting instead of wedging them.
#[tokio::test]
async fn refused_submission_leaves_replica_waiting() {
    let mut h = harness(2, "");
    h.pilot.refuse_submissions(true);

    h.coordinator.admit().await.unwrap();
    assert_eq!(h.pilot.submitted_count(), 0);
    assert_eq!(
        statuses(h.coordinator.store()),
        vec![(RunningStatus::Waiting, 1), (RunningStatus::Waiting, 1)]
    );
}

/// Scenario: checkpoint, crash, restart. Persisted-R replicas come back W;
/// the one whose artifact exists advances a cycle.
#[tokio::test]
async fn crash_recovery_reconciles_artifacts() {
    let temp = TempDir::new().unwrap();
    let layout = CycleLayout::new(temp.path(), "job");

    let store = StatusStore::new(2);
    store
        .update(0, |r| {
            r.running_status = RunningStatus::Running;
            r.cycle_current = 3;
        })
        .unwrap();
    store
        .update(1, |r| {
            r.running_status = RunningStatus::Running;
            r.cycle_current = 2;
        })
        .unwrap();
    store.checkpoint(layout.root(), layout.basename()).unwrap();
    drop(store); // crash

    let (engine, completed) = ScriptedEngine::new();
    completed.lock().unwrap().insert((0, 3));
    let (restored, _actions) =
        restore_job(&layout, &NullExchange::new(2), &engine).unwrap();

    assert_eq!(
        statuses(&restored),
        vec![(RunningStatus::Waiting, 4), (RunningStatus::Waiting, 2)]
    );
    // State assignment is exactly what the checkpoint recorded
    assert_eq!(restored.get(0).unwrap().stateid_current, 0);
    assert_eq!(restored.get(1).unwrap().stateid_current, 1);
}

/// Invariant: the state vector stays a permutation of [0, N) across many
/// full scheduling rounds with completions interleaved.
#[tokio::test]
async fn state_vector_stays_a_permutation() {
    let mut h = harness(4, "TOTAL_CORES: 2\nSUBJOBS_BUFFER_SIZE: 0\n");

    for round in 0..10u64 {
        h.coordinator.tick().await.unwrap();
        for id in 0..4 {
            let cycle = h.coordinator.store().get(id).unwrap().cycle_current;
            h.completed.lock().unwrap().insert((id, cycle));
        }
        h.pilot.finish_all(SubjobStatus::Done);

        let mut states: Vec<_> = h
            .coordinator
            .store()
            .table()
            .unwrap()
            .iter()
            .map(|r| r.stateid_current)
            .collect();
        states.sort_unstable();
        assert_eq!(states, vec![0, 1, 2, 3], "round {}", round);
    }
}
