use std::{env, io};

use coordinator::{RunOutcome, config::RunConfig, dataset::Dataset, error::CoordinatorErr};
use log::{info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

const CONFIG_ENV: &str = "HOGWILD_CONFIG";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_ENV).ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("usage: coordinator <config.json>, or set {CONFIG_ENV}"),
            )
        })?;

    let config = RunConfig::from_path(&path)?;
    info!("loading training data from {}", config.train_file.display());

    let dataset = Dataset::from_path(&config.train_file).map_err(CoordinatorErr::from)?;
    info!(samples = dataset.len(); "training data loaded");

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("received SIGINT, aborting run");
            interrupt.cancel();
        }
    });

    let log_path = config.log_path.clone();

    match coordinator::run(config, dataset, token).await? {
        RunOutcome::Completed(log) => {
            info!(
                running_time = log.running_time,
                rounds = log.losses_val.len();
                "run completed"
            );

            if let Some(path) = log_path {
                log.persist(&path)?;
                info!("run log written to {}", path.display());
            }
        }
        RunOutcome::Aborted => warn!("run aborted, no run log was written"),
    }

    Ok(())
}
