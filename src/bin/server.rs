//! chatkeeper HTTP server binary.
//! Run with: cargo run --bin chatkeeper-server

use std::process::ExitCode;

use chatkeeper::start_server;

fn main() -> ExitCode {
    start_server::run()
}
