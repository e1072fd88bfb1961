use std::process::ExitCode;

fn main() -> ExitCode {
    clearway_cli::run()
}
