use std::process::ExitCode;

fn main() -> ExitCode {
    otvet_cli::run()
}
