//! Algebraic properties of the interpreter.

use engravekit_program::{Program, MIN_COMMAND_SECS};
use proptest::prelude::*;

fn arb_move() -> impl Strategy<Value = (f64, f64, f64, f64)> {
    (
        -100.0..100.0_f64,
        -100.0..100.0_f64,
        -50.0..50.0_f64,
        60.0..12000.0_f64,
    )
}

proptest! {
    #[test]
    fn process_time_equals_sum_of_durations(moves in prop::collection::vec(arb_move(), 1..40)) {
        let mut text = String::new();
        for (x, y, z, f) in &moves {
            text.push_str(&format!("G1 X{:.3} Y{:.3} Z{:.3} F{:.1}\n", x, y, z, f));
        }
        let program = Program::parse("prop", &text);
        let sum: f64 = program.time_list.iter().sum();
        prop_assert!((program.process_time - sum).abs() < 1e-9);
        prop_assert_eq!(program.time_list.len(), moves.len());
        for t in &program.time_list {
            prop_assert!(*t >= MIN_COMMAND_SECS);
        }
    }

    #[test]
    fn bounds_are_componentwise_min_max(moves in prop::collection::vec(arb_move(), 1..40)) {
        let mut text = String::new();
        for (x, y, z, f) in &moves {
            text.push_str(&format!("G0 X{:.3} Y{:.3} Z{:.3} F{:.1}\n", x, y, z, f));
        }
        let program = Program::parse("prop", &text);

        // Visited points are the parsed targets plus the implicit start.
        let mut xs = vec![0.0];
        let mut ys = vec![0.0];
        let mut zs = vec![0.0];
        for c in &program.commands {
            xs.push(c.x);
            ys.push(c.y);
            zs.push(c.z);
        }
        let min = |v: &[f64]| v.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = |v: &[f64]| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        prop_assert!((program.bounds.x.0 - min(&xs)).abs() < 1e-9);
        prop_assert!((program.bounds.x.1 - max(&xs)).abs() < 1e-9);
        prop_assert!((program.bounds.y.0 - min(&ys)).abs() < 1e-9);
        prop_assert!((program.bounds.y.1 - max(&ys)).abs() < 1e-9);
        prop_assert!((program.bounds.z.0 - min(&zs)).abs() < 1e-9);
        prop_assert!((program.bounds.z.1 - max(&zs)).abs() < 1e-9);
    }
}
