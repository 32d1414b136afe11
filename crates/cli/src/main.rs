use std::process::ExitCode;

fn main() -> ExitCode {
    conduit_cli::run()
}
