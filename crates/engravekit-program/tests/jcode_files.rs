//! J-code expansion against real files on disk.

use engravekit_core::{Error, ProgramError};
use engravekit_program::JobProgram;
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn plain_file_loads_as_single_zero_offset_ref() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "square.nc", "G0 X10 F6000\nG1 Y10 F600\n");

    let job = JobProgram::load(&path).unwrap();
    assert_eq!(job.refs.len(), 1);
    assert!(job.refs[0].offset.is_zero_linear());
    assert_eq!(job.rotary_range, None);
    assert_eq!(job.command_count(), 2);
}

#[test]
fn jcode_references_resolve_relative_to_wrapper() {
    let dir = TempDir::new().unwrap();
    write(&dir, "face.nc", "G0 X10 Y10 F6000\n");
    let wrapper = write(
        &dir,
        "ring.jc",
        "; four faces around the axis\n\
         J0 X0 Y0 Z0 R0\n\
         J1 face.nc\n\
         J0 X5 Y0 Z-2 R90\n\
         J1 face.nc\n",
    );

    let job = JobProgram::load(&wrapper).unwrap();
    assert_eq!(job.refs.len(), 2);
    assert_eq!(job.refs[0].offset.r, 0.0);
    assert_eq!(job.refs[1].offset.x, 5.0);
    assert_eq!(job.refs[1].offset.r, 90.0);
    assert_eq!(job.rotary_range, Some((0.0, 90.0)));

    // Combined bounds: first ref spans [0,10] in X, second shifts to [5,15].
    assert_eq!(job.bounds.x, (0.0, 15.0));
    assert_eq!(job.bounds.z, (-2.0, 0.0));

    // Total time sums over both references.
    let per_ref = job.refs[0].program.process_time;
    assert!((job.process_time - 2.0 * per_ref).abs() < 1e-9);
}

#[test]
fn missing_reference_is_reported() {
    let dir = TempDir::new().unwrap();
    let wrapper = write(&dir, "bad.jc", "J0 X0 Y0 Z0 R0\nJ1 nowhere.nc\n");

    match JobProgram::load(&wrapper) {
        Err(Error::Program(ProgramError::MissingReference { path })) => {
            assert!(path.ends_with("nowhere.nc"));
        }
        other => panic!("expected MissingReference, got {:?}", other),
    }
}

#[test]
fn unexpected_line_in_wrapper_is_rejected() {
    let dir = TempDir::new().unwrap();
    let wrapper = write(&dir, "mixed.jc", "J0 X0 Y0 Z0 R0\nG0 X10\n");

    match JobProgram::load(&wrapper) {
        Err(Error::Program(ProgramError::MalformedLine { line_number, .. })) => {
            assert_eq!(line_number, 2);
        }
        other => panic!("expected MalformedLine, got {:?}", other),
    }
}
