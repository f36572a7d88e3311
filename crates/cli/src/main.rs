use std::process::ExitCode;

fn main() -> ExitCode {
    slotform_cli::run()
}
