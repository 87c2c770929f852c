use clap::Parser;
use tradepilot::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
