use restclient_core::config::{self, LogConfig};
use restclient_core::logging;

mod cli;

use crate::cli::CliCommand;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cfg = match config::load_or_init() {
        Ok(cfg) => cfg,
        Err(err) => {
            logging::init_logging_stderr(&LogConfig::default());
            eprintln!("restclient error: {:#}", err);
            std::process::exit(1);
        }
    };
    // Fall back to stderr when the state dir is not writable.
    if logging::init_logging(&cfg.log).is_err() {
        logging::init_logging_stderr(&cfg.log);
    }

    // Connections and jobs are `!Send`; everything runs on one local set.
    let local = tokio::task::LocalSet::new();
    if let Err(err) = local.run_until(CliCommand::run_from_args(cfg)).await {
        eprintln!("restclient error: {:#}", err);
        std::process::exit(1);
    }
}
