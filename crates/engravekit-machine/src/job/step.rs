//! Job step model

use engravekit_core::Position;
use engravekit_program::{Bounds, JobProgram};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the job queue: a work position, optionally a program
/// to run there, and optionally the rotary motor the step addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStep {
    /// Stable identity of the step across queue edits
    pub id: Uuid,
    /// Machine-absolute position the step starts from
    pub work_position: Position,
    /// Program executed at the work position
    pub program: Option<JobProgram>,
    /// Rotary motor id driven by this step, if any
    pub rotary_id: Option<u8>,
}

impl JobStep {
    pub(crate) fn new(work_position: Position) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_position,
            program: None,
            rotary_id: None,
        }
    }

    /// Estimated duration of this step's program, seconds.
    pub fn process_time(&self) -> f64 {
        self.program.as_ref().map(|p| p.process_time).unwrap_or(0.0)
    }

    /// Bounding box of this step's program in its local frame.
    pub fn bounds(&self) -> Option<Bounds> {
        self.program.as_ref().map(|p| p.bounds)
    }

    /// Display name of the loaded program.
    pub fn program_name(&self) -> Option<&str> {
        self.program.as_ref().map(|p| p.name.as_str())
    }

    /// Whether the step can be executed.
    pub fn is_ready(&self) -> bool {
        self.program.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engravekit_program::Program;

    #[test]
    fn fresh_steps_are_not_ready() {
        let step = JobStep::new(Position::new(1.0, 2.0, 3.0));
        assert!(!step.is_ready());
        assert_eq!(step.process_time(), 0.0);
        assert!(step.bounds().is_none());
    }

    #[test]
    fn step_reflects_its_program() {
        let mut step = JobStep::new(Position::default());
        let program = Program::parse("part.nc", "G0 X10 F6000\n");
        step.program = Some(JobProgram::from_program(program));
        assert!(step.is_ready());
        assert_eq!(step.program_name(), Some("part.nc"));
        assert!(step.process_time() > 0.0);
    }

    #[test]
    fn step_ids_are_unique() {
        let a = JobStep::new(Position::default());
        let b = JobStep::new(Position::default());
        assert_ne!(a.id, b.id);
    }
}
