//! Process run-state gate
//!
//! Shared between the controller (which consults it to gate manual
//! operations) and the job engine (which drives it). Pausing closes a
//! watch-channel gate the worker awaits between commands; cancellation
//! sets a flag and reopens the gate so a paused worker can wake up and
//! observe it.

use engravekit_core::{EventDispatcher, MachineEvent, ProcessState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Shared run-state of the job execution engine.
pub struct ProcessControl {
    state: RwLock<ProcessState>,
    events: EventDispatcher,
    runnable: watch::Sender<bool>,
    canceled: AtomicBool,
}

impl ProcessControl {
    /// Create an idle gate publishing state changes on the dispatcher.
    pub fn new(events: EventDispatcher) -> Self {
        let (runnable, _) = watch::channel(true);
        Self {
            state: RwLock::new(ProcessState::Idle),
            events,
            runnable,
            canceled: AtomicBool::new(false),
        }
    }

    /// Current process state.
    pub fn state(&self) -> ProcessState {
        *self.state.read()
    }

    /// Whether the execution worker is actively sending commands.
    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Whether a job is in progress, paused or not.
    pub fn is_active(&self) -> bool {
        matches!(self.state(), ProcessState::Running | ProcessState::Paused)
    }

    /// Whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        *self.state.write() = state;
        self.events
            .publish(MachineEvent::ProcessStateChanged(state));
    }

    pub(crate) fn close_gate(&self) {
        self.runnable.send_replace(false);
    }

    pub(crate) fn open_gate(&self) {
        self.runnable.send_replace(true);
    }

    /// Request cancellation. Reopens the gate so a paused worker can
    /// observe the flag and unwind.
    pub(crate) fn request_cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.open_gate();
    }

    pub(crate) fn clear_cancel(&self) {
        self.canceled.store(false, Ordering::SeqCst);
    }

    /// Block until the gate is open.
    pub(crate) async fn wait_runnable(&self) {
        let mut rx = self.runnable.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
