use std::process::ExitCode;

pub fn main() -> ExitCode {
    academia_app::cli::launch()
}
