use std::process::ExitCode;

fn main() -> ExitCode {
    fixdesk_cli::run()
}
