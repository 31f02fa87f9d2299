//! Process exit codes. Part of the CLI contract for scheduled jobs.
//!
//! Failed gateway operations exit with [`ErrorKind::exit_code`]
//! (1 input or settings, 2 rejected, 3 integrity, 4 unreachable, 5 store).

use efris_gateway::ErrorKind;

pub const SUCCESS: i32 = 0;
pub const INTERNAL_ERROR: i32 = 10; // Output could not be produced

/// Exit code for an outcome that carries an error kind.
pub fn for_outcome(kind: Option<ErrorKind>) -> i32 {
    kind.map_or(SUCCESS, ErrorKind::exit_code)
}
