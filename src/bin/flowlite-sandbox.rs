/// Code node sandbox process
///
/// Reads one JSON request from stdin, runs the Lua function it carries and
/// reports back with tagged JSON lines on stdout. Spawned and killed by the
/// server; never run by hand.

use flowlite::runtime::sandbox::{emit, run_stdio, SandboxMessage};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run_stdio() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = emit(&SandboxMessage::Error(format!("sandbox failure: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}
