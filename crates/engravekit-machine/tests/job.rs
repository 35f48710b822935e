//! Job engine behavior, against both a recording motion fake and the
//! simulated machine.

mod common;

use async_trait::async_trait;
use common::{sim_controller, sim_controller_with, test_config};
use engravekit_core::{
    EventDispatcher, MachineConfig, MachineEvent, Offset, Position, ProcessState, Result,
};
use engravekit_machine::{JobEngine, JobMotion, MoveMode, ProcessControl};
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

struct FakeMotion {
    connected: AtomicBool,
    absolute: Mutex<Position>,
    /// Work origin in absolute coordinates.
    base: Mutex<Position>,
    tool: Offset,
    lines: Mutex<Vec<String>>,
    moves: Mutex<Vec<String>>,
}

impl FakeMotion {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            absolute: Mutex::new(Position::default()),
            base: Mutex::new(Position::default()),
            tool: Offset::zero(),
            lines: Mutex::new(Vec::new()),
            moves: Mutex::new(Vec::new()),
        })
    }

    fn set_position(&self, x: f64, y: f64, z: f64) {
        *self.absolute.lock() = Position::new(x, y, z);
    }

    fn lines_sent(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    fn move_log(&self) -> Vec<String> {
        self.moves.lock().clone()
    }
}

#[async_trait]
impl JobMotion for FakeMotion {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn absolute_position(&self) -> Result<Position> {
        Ok(*self.absolute.lock())
    }

    fn tool_offset(&self) -> Offset {
        self.tool
    }

    async fn move_machine_absolute(&self, x: f64, y: f64, z: f64, _speed: f64) -> Result<()> {
        *self.absolute.lock() = Position::new(x, y, z);
        self.moves.lock().push(format!("machine {} {} {}", x, y, z));
        Ok(())
    }

    async fn move_work_absolute(&self, x: f64, y: f64, z: f64, _speed: f64) -> Result<()> {
        let base = *self.base.lock();
        *self.absolute.lock() = Position::new(base.x + x, base.y + y, base.z + z);
        self.moves.lock().push(format!("work {} {} {}", x, y, z));
        Ok(())
    }

    async fn move_relative(&self, x: f64, y: f64, z: f64, _speed: f64) -> Result<()> {
        {
            let mut pos = self.absolute.lock();
            pos.x += x;
            pos.y += y;
            pos.z += z;
        }
        self.moves.lock().push(format!("rel {} {} {}", x, y, z));
        Ok(())
    }

    async fn set_work_origin(&self) -> Result<()> {
        *self.base.lock() = *self.absolute.lock();
        self.moves.lock().push("origin".to_string());
        Ok(())
    }

    async fn send_program_line(&self, line: &str) -> Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

fn engine_over(motion: Arc<FakeMotion>) -> (JobEngine, EventDispatcher) {
    let events = EventDispatcher::default();
    let process = Arc::new(ProcessControl::new(events.clone()));
    let engine = JobEngine::with_motion(motion, process, events.clone(), MachineConfig::default());
    (engine, events)
}

fn write_program(dir: &TempDir, name: &str, lines: usize, feed: u32) -> PathBuf {
    let mut text = String::new();
    for i in 0..lines {
        text.push_str(&format!("G1 X{} F{}\n", i % 2, feed));
    }
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

fn drain_logs(rx: &mut broadcast::Receiver<MachineEvent>) -> Vec<String> {
    let mut logs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let MachineEvent::Log(msg) = event {
            logs.push(msg);
        }
    }
    logs
}

async fn wait_idle(engine: &JobEngine) {
    for _ in 0..1000 {
        if engine.process_state() == ProcessState::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job did not return to idle");
}

#[tokio::test]
async fn start_validates_the_queue() {
    let motion = FakeMotion::new();
    let (engine, _events) = engine_over(motion);

    // Empty queue.
    assert!(engine.start().await.is_err());

    // Step without a program.
    engine.add_step().unwrap();
    assert!(engine.start().await.is_err());
    assert_eq!(engine.process_state(), ProcessState::Idle);
}

#[tokio::test]
async fn completed_job_restores_the_start_position() {
    let dir = TempDir::new().unwrap();
    let motion = FakeMotion::new();
    motion.set_position(5.0, 5.0, 0.0);
    let (engine, events) = engine_over(motion.clone());
    let mut rx = events.subscribe();

    let id = engine.add_step().unwrap();
    engine
        .set_step_work_position(id, Some(Position::new(10.0, 0.0, 0.0)))
        .unwrap();
    let path = write_program(&dir, "short.nc", 4, 6000);
    engine.load_step_program(id, &path).unwrap();
    assert!(engine.remaining_time() > 0.0);

    engine.start().await.unwrap();
    wait_idle(&engine).await;

    assert_eq!(motion.lines_sent().len(), 4);
    assert_eq!(*motion.absolute.lock(), Position::new(5.0, 5.0, 0.0));
    let moves = motion.move_log();
    assert_eq!(moves.first().map(String::as_str), Some("machine 10 0 0"));
    assert!(moves.contains(&"origin".to_string()));
    assert_eq!(moves.last().map(String::as_str), Some("machine 5 5 0"));

    let logs = drain_logs(&mut rx);
    assert!(logs.iter().any(|l| l.contains("Processing completed")));
    assert!(logs.iter().any(|l| l.contains("step 1 completed")));
}

#[tokio::test]
async fn remaining_time_counts_down_during_execution() {
    let dir = TempDir::new().unwrap();
    let motion = FakeMotion::new();
    let (engine, events) = engine_over(motion);
    let mut rx = events.subscribe();

    let id = engine.add_step().unwrap();
    let path = write_program(&dir, "timed.nc", 10, 600);
    engine.load_step_program(id, &path).unwrap();
    let initial = engine.remaining_time();
    assert!(initial > 0.5);

    engine.start().await.unwrap();
    wait_idle(&engine).await;

    let mut saw_countdown = false;
    while let Ok(event) = rx.try_recv() {
        if let MachineEvent::RemainingTimeChanged { seconds, eta } = event {
            assert!(eta.starts_with("ETA - "));
            if seconds < initial && seconds > 0.0 {
                saw_countdown = true;
            }
        }
    }
    assert!(saw_countdown);
    // After the run the estimate resets to the still-queued total.
    assert!((engine.remaining_time() - initial).abs() < 1e-6);
}

#[tokio::test]
async fn pause_halts_the_stream_and_resume_continues() {
    let dir = TempDir::new().unwrap();
    let motion = FakeMotion::new();
    let (engine, events) = engine_over(motion.clone());
    let mut rx = events.subscribe();

    let id = engine.add_step().unwrap();
    let path = write_program(&dir, "long.nc", 150, 600);
    engine.load_step_program(id, &path).unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    engine.pause().unwrap();
    assert_eq!(engine.process_state(), ProcessState::Paused);
    // Editing the queue stays rejected while paused.
    assert!(engine.add_step().is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let stalled = motion.lines_sent().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(motion.lines_sent().len(), stalled);

    engine.resume().unwrap();
    assert_eq!(engine.process_state(), ProcessState::Running);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(motion.lines_sent().len() > stalled);

    engine.cancel().await.unwrap();
    assert_eq!(engine.process_state(), ProcessState::Idle);
    let logs = drain_logs(&mut rx);
    assert!(logs.iter().any(|l| l.contains("paused")));
    assert!(logs.iter().any(|l| l.contains("resumed")));
}

#[tokio::test]
async fn cancellation_stops_early_and_restores_the_start_position() {
    let dir = TempDir::new().unwrap();
    let motion = FakeMotion::new();
    motion.set_position(2.0, 3.0, 0.0);
    let (engine, events) = engine_over(motion.clone());
    let mut rx = events.subscribe();

    let id = engine.add_step().unwrap();
    let path = write_program(&dir, "long.nc", 150, 600);
    engine.load_step_program(id, &path).unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine.cancel().await.unwrap();

    assert_eq!(engine.process_state(), ProcessState::Idle);
    let sent = motion.lines_sent().len();
    assert!(sent > 0, "worker never started streaming");
    assert!(sent < 100, "cancel took too long: {} lines sent", sent);
    assert_eq!(*motion.absolute.lock(), Position::new(2.0, 3.0, 0.0));
    let logs = drain_logs(&mut rx);
    assert!(logs.iter().any(|l| l.contains("canceled")));
}

#[tokio::test]
async fn cancel_wakes_a_paused_job() {
    let dir = TempDir::new().unwrap();
    let motion = FakeMotion::new();
    let (engine, _events) = engine_over(motion);

    let id = engine.add_step().unwrap();
    let path = write_program(&dir, "long.nc", 150, 600);
    engine.load_step_program(id, &path).unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.pause().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(5), engine.cancel())
        .await
        .expect("cancel hung on a paused job")
        .unwrap();
    assert_eq!(engine.process_state(), ProcessState::Idle);
}

#[tokio::test]
async fn jcode_references_execute_from_a_common_base() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("face.nc"), "G0 X10 F6000\n").unwrap();
    let wrapper = dir.path().join("pair.jc");
    fs::write(&wrapper, "J0 X0\nJ1 face.nc\nJ0 X5\nJ1 face.nc\n").unwrap();

    let motion = FakeMotion::new();
    motion.set_position(2.0, 0.0, 0.0);
    let (engine, _events) = engine_over(motion.clone());

    let id = engine.add_step().unwrap();
    engine
        .set_step_work_position(id, Some(Position::new(20.0, 0.0, 0.0)))
        .unwrap();
    engine.load_step_program(id, &wrapper).unwrap();
    // Both references are parsed relative to the common step base.
    let program = engine.steps()[0].program.clone().unwrap();
    assert_eq!(program.bounds.x, (0.0, 15.0));

    engine.start().await.unwrap();
    wait_idle(&engine).await;

    let moves = motion.move_log();
    // The second reference positions machine-absolute at base + 5,
    // not relative to wherever the first program finished.
    assert!(moves.contains(&"machine 20 0 0".to_string()));
    assert!(moves.contains(&"machine 25 0 0".to_string()));
    assert!(!moves.iter().any(|m| m.starts_with("rel")));
    assert_eq!(motion.lines_sent().len(), 2);
    assert_eq!(*motion.absolute.lock(), Position::new(2.0, 0.0, 0.0));
}

#[tokio::test]
async fn position_polling_pauses_while_a_job_runs() {
    let dir = TempDir::new().unwrap();
    let (controller, sim) = sim_controller_with(MachineConfig {
        poll_interval_ms: 10,
        ..test_config()
    });
    controller.connect().unwrap();
    let engine = JobEngine::new(&controller);

    // The idle poll queries position on its own.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let idle_polls = sim.sent().iter().filter(|c| *c == "M114").count();
    assert!(idle_polls > 1, "poll loop never ran: {} queries", idle_polls);

    let id = engine.add_step().unwrap();
    let path = write_program(&dir, "poll.nc", 200, 600);
    engine.load_step_program(id, &path).unwrap();
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.process_state(), ProcessState::Running);

    let mark = sim.sent_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.process_state(), ProcessState::Running);
    let window = sim.sent()[mark..].to_vec();
    assert!(
        !window.iter().any(|c| c == "M114"),
        "position query interleaved with the running job"
    );

    engine.cancel().await.unwrap();
}

#[tokio::test]
async fn queue_edits_reorder_and_remove_steps() {
    let motion = FakeMotion::new();
    let (engine, _events) = engine_over(motion.clone());

    motion.set_position(1.0, 0.0, 0.0);
    let a = engine.add_step().unwrap();
    motion.set_position(2.0, 0.0, 0.0);
    let b = engine.add_step().unwrap();

    engine.move_step(b, 0).unwrap();
    let steps = engine.steps();
    assert_eq!(steps[0].id, b);
    assert_eq!(steps[1].id, a);

    engine.remove_step(b).unwrap();
    assert_eq!(engine.steps().len(), 1);
    assert!(engine.remove_step(b).is_err());

    engine.set_step_rotary(a, Some(3)).unwrap();
    assert_eq!(engine.steps()[0].rotary_id, Some(3));
}

#[tokio::test]
async fn bounding_box_traces_the_program_outline() {
    let dir = TempDir::new().unwrap();
    let motion = FakeMotion::new();
    let (engine, _events) = engine_over(motion.clone());

    let id = engine.add_step().unwrap();
    engine
        .set_step_work_position(id, Some(Position::new(2.0, 2.0, 0.0)))
        .unwrap();
    let path = dir.path().join("flat.nc");
    fs::write(&path, "G0 X10 Y5 F6000\n").unwrap();
    engine.load_step_program(id, &path).unwrap();

    engine.run_bounding_box(id).await.unwrap();

    let moves = motion.move_log();
    assert_eq!(
        moves,
        vec![
            "machine 2 2 0".to_string(),
            "origin".to_string(),
            "work 0 5 0".to_string(),
            "work 0 0 0".to_string(),
            "work 10 0 0".to_string(),
            "work 10 5 0".to_string(),
            "machine 2 2 0".to_string(),
        ]
    );
}

#[tokio::test]
async fn manual_motion_is_gated_while_a_job_runs() {
    let dir = TempDir::new().unwrap();
    let (controller, _sim) = sim_controller();
    controller.connect().unwrap();
    let engine = JobEngine::new(&controller);

    let id = engine.add_step().unwrap();
    let path = write_program(&dir, "gate.nc", 100, 600);
    engine.load_step_program(id, &path).unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.process_state(), ProcessState::Running);

    let mut rx = controller.events().subscribe();
    let err = controller
        .move_to(MoveMode::Work, 1.0, 0.0, 0.0, 10.0)
        .unwrap_err();
    assert!(err.is_busy());
    assert_eq!(drain_logs(&mut rx).len(), 1);

    assert!(controller.set_work_position().is_err());
    assert!(controller.home(None).is_err());
    assert!(controller.disconnect().is_err());

    engine.cancel().await.unwrap();
    assert_eq!(engine.process_state(), ProcessState::Idle);
    // Manual control returns once the job is gone.
    controller
        .move_to(MoveMode::Work, 1.0, 0.0, 0.0, 10.0)
        .unwrap();
}
