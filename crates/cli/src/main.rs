use std::process::ExitCode;

fn main() -> ExitCode {
    taskwire_cli::run()
}
