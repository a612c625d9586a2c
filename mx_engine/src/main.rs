use std::time::Instant;

use anyhow::Result;
use log::LevelFilter;
use mx_engine::cli::{self, Command};
use mx_engine::executor::RunOutcome;
use mx_engine::runtime;

fn main() -> Result<()> {
    let started = Instant::now();
    let cli = cli::parse()?;
    init_logging(cli.silent);

    let result = match cli.command {
        Command::ListApi => runtime::list_api(),
        Command::Vet(files) => runtime::vet(&files),
        Command::Batch(runs) => runtime::batch(runs),
        Command::Run(args) => runtime::execute(args).map(|outcome| {
            if outcome == RunOutcome::Stopped {
                log::info!("run stopped by operator");
            }
        }),
    };
    log::info!("walltime: {:.3?}", started.elapsed());
    result
}

fn init_logging(silent: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if silent {
        builder.filter_level(LevelFilter::Off);
    }
    builder.format_timestamp(None).init();
}
