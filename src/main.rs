use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use evaluator::api::HttpJobService;
use evaluator::config::CliArgs;
use evaluator::sandbox::{DockerRuntime, run_sweeper};
use evaluator::shutdown::{install_shutdown_handler, wait_startup_delay};
use evaluator::telemetry::LogTelemetry;
use evaluator::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = Arc::new(cli.to_config().context("Invalid configuration")?);
    let shutdown_token = install_shutdown_handler().context("Failed to install signal handlers")?;

    let service = HttpJobService::new(&config).context("Failed to create service client")?;

    // Neither docker nor the grading service is contacted before the delay
    if !wait_startup_delay(config.startup_delay, &shutdown_token).await {
        log::info!("Shutdown complete");
        return Ok(());
    }

    let runtime = DockerRuntime::connect().context("Failed to connect to docker")?;
    runtime.ping().await.context("Docker is not responding")?;
    let runtime = Arc::new(runtime);

    service
        .check_reachable()
        .await
        .with_context(|| format!("Cannot reach {}", config.host))?;

    // ======= PREPARATION END, EXECUTION START =======

    let sweeper = (!config.one_shot).then(|| {
        tokio::spawn(run_sweeper(
            Arc::clone(&runtime),
            config.image_lifetime,
            shutdown_token.clone(),
        ))
    });

    let worker = Worker::new(
        Arc::new(service),
        runtime,
        Arc::clone(&config),
        Arc::new(LogTelemetry),
    );
    worker.run(shutdown_token.clone()).await;

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    shutdown_token.cancel();
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            log::error!("Container sweeper terminated abnormally: {e:?}");
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
