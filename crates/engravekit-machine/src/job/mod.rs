//! Job execution engine
//!
//! Maintains an ordered queue of [`JobStep`]s and executes them on a
//! background worker. The worker drives the machine through the
//! [`JobMotion`] seam rather than the controller's public operations,
//! which are gated while a job runs.
//!
//! Execution of one step: travel to the step's work position, apply
//! the tool head's laser offset, re-zero the work origin there, then
//! stream the step's program line by line. Between commands the worker
//! waits on the pause gate and checks the cancel flag, so pause and
//! cancel both take effect with at most one command of latency.

mod gate;
mod step;

pub use gate::ProcessControl;
pub use step::JobStep;

use crate::controller::MotionController;
use crate::rotary::RotaryController;
use async_trait::async_trait;
use engravekit_core::{
    ConnectionError, EventDispatcher, JobError, MachineConfig, MachineEvent, Offset, Position,
    ProcessState, Result, format_eta,
};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The motion operations the job worker needs from the machine.
///
/// [`MotionController`] implements this for real hardware; tests
/// substitute a recording fake.
#[async_trait]
pub trait JobMotion: Send + Sync {
    /// Whether the machine is connected.
    fn is_connected(&self) -> bool;

    /// Current machine-absolute position.
    fn absolute_position(&self) -> Result<Position>;

    /// The fixed laser offset of the attached tool head.
    fn tool_offset(&self) -> Offset;

    /// Move to machine-absolute coordinates.
    async fn move_machine_absolute(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()>;

    /// Move to work-frame coordinates.
    async fn move_work_absolute(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()>;

    /// Move relative to the current position.
    async fn move_relative(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()>;

    /// Declare the current position as the new work origin.
    async fn set_work_origin(&self) -> Result<()>;

    /// Stream one raw program line to the machine.
    async fn send_program_line(&self, line: &str) -> Result<()>;
}

struct EngineInner {
    motion: Arc<dyn JobMotion>,
    rotary: RwLock<Option<Arc<RotaryController>>>,
    process: Arc<ProcessControl>,
    events: EventDispatcher,
    config: MachineConfig,
    steps: RwLock<Vec<JobStep>>,
    remaining: RwLock<f64>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the job execution engine. Cheap to clone.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl JobEngine {
    /// Create an engine driving the given controller, sharing its
    /// events, process gate, and configuration.
    pub fn new(controller: &MotionController) -> Self {
        Self::with_motion(
            Arc::new(controller.clone()),
            controller.process_control(),
            controller.events(),
            controller.config(),
        )
    }

    /// Create an engine over an arbitrary motion seam.
    pub fn with_motion(
        motion: Arc<dyn JobMotion>,
        process: Arc<ProcessControl>,
        events: EventDispatcher,
        config: MachineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                motion,
                rotary: RwLock::new(None),
                process,
                events,
                config,
                steps: RwLock::new(Vec::new()),
                remaining: RwLock::new(0.0),
                worker: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Attach the rotary subsystem so steps can address its motors.
    pub fn attach_rotary(&self, rotary: Arc<RotaryController>) {
        *self.inner.rotary.write() = Some(rotary);
    }

    /// Current process state.
    pub fn process_state(&self) -> ProcessState {
        self.inner.process.state()
    }

    /// Estimated remaining time of the current or queued job, seconds.
    pub fn remaining_time(&self) -> f64 {
        *self.inner.remaining.read()
    }

    /// Snapshot of the job queue.
    pub fn steps(&self) -> Vec<JobStep> {
        self.inner.steps.read().clone()
    }

    fn guard_idle(&self, operation: &str) -> Result<()> {
        let state = self.inner.process.state();
        if state == ProcessState::Idle {
            return Ok(());
        }
        self.inner.events.warn(format!(
            "Error: cannot {} while the job is {}",
            operation, state
        ));
        Err(JobError::InvalidState {
            state: state.to_string(),
            operation: operation.to_string(),
        }
        .into())
    }

    fn find_step(&self, id: Uuid) -> Result<usize> {
        self.inner
            .steps
            .read()
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| JobError::UnknownStep.into())
    }

    /// Append a step at the machine's current absolute position.
    pub fn add_step(&self) -> Result<Uuid> {
        self.guard_idle("edit the queue")?;
        let position = match self.inner.motion.absolute_position() {
            Ok(p) => p,
            Err(e) => {
                self.inner
                    .events
                    .warn(format!("Error: cannot add step: {}", e));
                return Err(e);
            }
        };
        let step = JobStep::new(position);
        let id = step.id;
        self.inner.steps.write().push(step);
        self.inner.events.log(format!("Added process step at {}", position));
        Ok(id)
    }

    /// Remove a step from the queue.
    pub fn remove_step(&self, id: Uuid) -> Result<()> {
        self.guard_idle("edit the queue")?;
        let index = self.find_step(id)?;
        self.inner.steps.write().remove(index);
        self.recalc_remaining();
        Ok(())
    }

    /// Reorder the queue by moving a step to a new index.
    pub fn move_step(&self, id: Uuid, to: usize) -> Result<()> {
        self.guard_idle("edit the queue")?;
        let from = self.find_step(id)?;
        let mut steps = self.inner.steps.write();
        if to >= steps.len() {
            return Err(JobError::UnknownStep.into());
        }
        let step = steps.remove(from);
        steps.insert(to, step);
        Ok(())
    }

    /// Update a step's work position: to an explicit position, or to
    /// the machine's current position when `position` is `None`.
    pub fn set_step_work_position(&self, id: Uuid, position: Option<Position>) -> Result<Position> {
        self.guard_idle("edit the queue")?;
        let index = self.find_step(id)?;
        let position = match position {
            Some(p) => p,
            None => self.inner.motion.absolute_position()?,
        };
        self.inner.steps.write()[index].work_position = position;
        Ok(position)
    }

    /// Set or clear the rotary motor a step addresses.
    pub fn set_step_rotary(&self, id: Uuid, rotary_id: Option<u8>) -> Result<()> {
        self.guard_idle("edit the queue")?;
        let index = self.find_step(id)?;
        self.inner.steps.write()[index].rotary_id = rotary_id;
        Ok(())
    }

    /// Load a program file (plain or J-code) into a step.
    pub fn load_step_program(&self, id: Uuid, path: impl AsRef<Path>) -> Result<()> {
        self.guard_idle("edit the queue")?;
        let index = self.find_step(id)?;
        let program = match engravekit_program::JobProgram::load(path) {
            Ok(p) => p,
            Err(e) => {
                self.inner.events.warn(format!("Error: {}", e));
                return Err(e);
            }
        };
        self.inner
            .events
            .log(format!("Loaded program {} ({} commands)", program.name, program.command_count()));
        self.inner.steps.write()[index].program = Some(program);
        self.recalc_remaining();
        Ok(())
    }

    fn recalc_remaining(&self) {
        let total: f64 = self.inner.steps.read().iter().map(|s| s.process_time()).sum();
        *self.inner.remaining.write() = total;
        self.inner.events.publish(MachineEvent::RemainingTimeChanged {
            seconds: total,
            eta: format_eta(total),
        });
    }

    /// Validate the queue and start the execution worker.
    pub async fn start(&self) -> Result<()> {
        let state = self.inner.process.state();
        if state != ProcessState::Idle {
            self.inner.events.warn("Execution already in progress");
            return Err(JobError::InvalidState {
                state: state.to_string(),
                operation: "start".to_string(),
            }
            .into());
        }
        if !self.inner.motion.is_connected() {
            self.inner
                .events
                .warn("Error: not connected to the engraver (job start rejected)");
            return Err(ConnectionError::NotConnected.into());
        }
        let steps = self.inner.steps.read().clone();
        if steps.is_empty() {
            self.inner.events.warn("No process steps defined");
            return Err(JobError::QueueEmpty.into());
        }
        for (index, step) in steps.iter().enumerate() {
            if !step.is_ready() {
                self.inner.events.warn(format!(
                    "Process step {} has no program loaded",
                    index + 1
                ));
                return Err(JobError::StepIncomplete {
                    index,
                    reason: "no program loaded".to_string(),
                }
                .into());
            }
        }

        self.inner.process.clear_cancel();
        self.inner.process.open_gate();
        self.recalc_remaining();
        self.inner.process.set_state(ProcessState::Running);
        self.inner.events.log("Start processing");

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            EngineInner::run(inner).await;
        });
        *self.inner.worker.lock().await = Some(handle);
        Ok(())
    }

    /// Pause the running job between commands.
    pub fn pause(&self) -> Result<()> {
        if self.inner.process.state() != ProcessState::Running {
            self.inner.events.warn("Error: no running job to pause");
            return Err(JobError::InvalidState {
                state: self.inner.process.state().to_string(),
                operation: "pause".to_string(),
            }
            .into());
        }
        self.inner.process.close_gate();
        self.inner.process.set_state(ProcessState::Paused);
        self.inner.events.log("Execution paused");
        Ok(())
    }

    /// Resume a paused job.
    pub fn resume(&self) -> Result<()> {
        if self.inner.process.state() != ProcessState::Paused {
            self.inner.events.warn("Error: no paused job to resume");
            return Err(JobError::InvalidState {
                state: self.inner.process.state().to_string(),
                operation: "resume".to_string(),
            }
            .into());
        }
        self.inner.process.set_state(ProcessState::Running);
        self.inner.process.open_gate();
        self.inner.events.log("Execution resumed");
        Ok(())
    }

    /// Cancel the current job and wait for the worker to unwind.
    pub async fn cancel(&self) -> Result<()> {
        if !self.inner.process.is_active() {
            self.inner.events.warn("Error: no job to cancel");
            return Err(JobError::InvalidState {
                state: self.inner.process.state().to_string(),
                operation: "cancel".to_string(),
            }
            .into());
        }
        self.inner.process.request_cancel();
        if let Some(handle) = self.inner.worker.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Trace the outline of a step's program bounds so the operator
    /// can verify material placement. Traces the top rectangle, and
    /// the bottom one as well when the box has Z extent.
    pub async fn run_bounding_box(&self, id: Uuid) -> Result<()> {
        self.guard_idle("run the bounding box preview")?;
        if !self.inner.motion.is_connected() {
            self.inner
                .events
                .warn("Error: not connected to the engraver (bounding box rejected)");
            return Err(ConnectionError::NotConnected.into());
        }
        let index = self.find_step(id)?;
        let step = self.inner.steps.read()[index].clone();
        let Some(program) = step.program.as_ref() else {
            self.inner
                .events
                .warn(format!("Process step {} has no program loaded", index + 1));
            return Err(JobError::StepIncomplete {
                index,
                reason: "no program loaded".to_string(),
            }
            .into());
        };
        let b = program.bounds;
        let wp = step.work_position;
        let speed = self.inner.config.travel_speed;
        let motion = &self.inner.motion;

        motion.move_machine_absolute(wp.x, wp.y, wp.z, speed).await?;
        motion.set_work_origin().await?;
        motion.move_work_absolute(b.x.0, b.y.1, b.z.1, speed).await?;
        motion.move_work_absolute(b.x.0, b.y.0, b.z.1, speed).await?;
        motion.move_work_absolute(b.x.1, b.y.0, b.z.1, speed).await?;
        motion.move_work_absolute(b.x.1, b.y.1, b.z.1, speed).await?;
        if !b.is_flat() {
            motion.move_work_absolute(b.x.0, b.y.1, b.z.0, speed).await?;
            motion.move_work_absolute(b.x.0, b.y.0, b.z.0, speed).await?;
            motion.move_work_absolute(b.x.1, b.y.0, b.z.0, speed).await?;
            motion.move_work_absolute(b.x.1, b.y.1, b.z.0, speed).await?;
        }
        motion.move_machine_absolute(wp.x, wp.y, wp.z, speed).await?;
        Ok(())
    }
}

impl EngineInner {
    async fn run(inner: Arc<EngineInner>) {
        match Self::execute(&inner).await {
            Ok(()) => {
                if inner.process.is_canceled() {
                    inner.events.log("Execution canceled");
                } else {
                    inner.events.log("Processing completed");
                }
            }
            Err(e) => {
                inner.events.warn(format!("Error during execution: {}", e));
            }
        }
        inner.process.set_state(ProcessState::Idle);
        // Reset the estimate for the still-queued steps.
        let total: f64 = inner.steps.read().iter().map(|s| s.process_time()).sum();
        *inner.remaining.write() = total;
        inner.events.publish(MachineEvent::RemainingTimeChanged {
            seconds: total,
            eta: format_eta(total),
        });
    }

    /// Sleep roughly in step with the machine working through its
    /// planner queue. Half the estimate keeps the send buffer ahead of
    /// the motion without racing minutes ahead of it.
    async fn settle(seconds: f64) {
        tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0) * 0.5)).await;
    }

    fn consume_time(inner: &Arc<EngineInner>, seconds: f64) {
        let left = {
            let mut remaining = inner.remaining.write();
            *remaining = (*remaining - seconds).max(0.0);
            *remaining
        };
        inner.events.publish(MachineEvent::RemainingTimeChanged {
            seconds: left,
            eta: format_eta(left),
        });
    }

    async fn execute(inner: &Arc<EngineInner>) -> Result<()> {
        let travel = inner.config.travel_speed;
        let start_position = inner.motion.absolute_position()?;
        let steps = inner.steps.read().clone();
        let rotary = inner.rotary.read().clone();

        'steps: for (index, step) in steps.iter().enumerate() {
            let wp = step.work_position;
            let here = inner.motion.absolute_position()?;
            inner.motion.move_machine_absolute(wp.x, wp.y, wp.z, travel).await?;
            Self::settle(here.distance_to(&wp) / travel).await;
            if inner.process.is_canceled() {
                break;
            }

            let tool = inner.motion.tool_offset();
            if !tool.is_zero() {
                inner.motion.move_relative(tool.x, tool.y, tool.z, travel).await?;
                Self::settle(tool.magnitude() / travel).await;
            }
            inner.motion.set_work_origin().await?;
            if inner.process.is_canceled() {
                break;
            }

            if let (Some(motor), Some(rot)) = (step.rotary_id, rotary.as_ref()) {
                if let Some(angle) = wp.a {
                    rot.move_to_degrees(motor, angle, true, true).await?;
                }
            }

            let Some(program) = step.program.as_ref() else {
                continue;
            };
            // Every reference executes at the step base plus its own
            // local offset, matching the frame its bounds were parsed
            // in. Chaining offsets from wherever the previous program
            // ended would drift.
            let base = inner.motion.absolute_position()?;
            for reference in &program.refs {
                let offset = &reference.offset;
                let here = inner.motion.absolute_position()?;
                let target =
                    Position::new(base.x + offset.x, base.y + offset.y, base.z + offset.z);
                inner
                    .motion
                    .move_machine_absolute(target.x, target.y, target.z, travel)
                    .await?;
                Self::settle(here.distance_to(&target) / travel).await;
                inner.motion.set_work_origin().await?;
                if inner.process.is_canceled() {
                    break 'steps;
                }
                if let (Some(motor), Some(rot)) = (step.rotary_id, rotary.as_ref()) {
                    if reference.offset.r != 0.0 {
                        rot.move_to_degrees(motor, reference.offset.r, true, false).await?;
                    }
                }
                for (ci, command) in reference.program.commands.iter().enumerate() {
                    inner.process.wait_runnable().await;
                    if inner.process.is_canceled() {
                        inner
                            .events
                            .log("Execution canceled, returning to start position");
                        break 'steps;
                    }
                    inner.motion.send_program_line(&command.raw).await?;
                    let seconds = reference.program.time_list[ci];
                    Self::consume_time(inner, seconds);
                    Self::settle(seconds).await;
                }
            }
            inner
                .events
                .log(format!("Process step {} completed", index + 1));
            if inner.process.is_canceled() {
                break;
            }
        }

        inner
            .motion
            .move_machine_absolute(start_position.x, start_position.y, start_position.z, travel)
            .await?;
        Ok(())
    }
}
