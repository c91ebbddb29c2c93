use std::process::ExitCode;

use console::style;
use kiln::{cli, logging, run};

fn main() -> ExitCode {
    let args = cli::parse();

    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("{} {e}", style("warning:").yellow());
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
