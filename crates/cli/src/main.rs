use std::process::ExitCode;

fn main() -> ExitCode {
    officeflow_cli::run()
}
