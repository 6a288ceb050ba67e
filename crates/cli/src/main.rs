use std::process::ExitCode;

fn main() -> ExitCode {
    akka_cli::run()
}
