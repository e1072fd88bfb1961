use std::time::Duration;

use anyhow::Result;
use clearway_core::chrono::Utc;
use clearway_core::config::LoadOptions;
use tokio::sync::watch;

use crate::commands::{
    build_runtime, init_logging, load_config, open_service, with_service, CommandResult,
};

/// One sweep at the current time, or a periodic sweep until Ctrl-C with `watch`.
pub fn run(mut options: LoadOptions, watch: bool, interval_secs: Option<u64>) -> CommandResult {
    if interval_secs.is_some() {
        options.overrides.sweep_interval_secs = interval_secs;
    }

    if !watch {
        return with_service("sweep", options, |service| async move {
            match service.sweep_expired_workflows(Utc::now()).await {
                Ok(report) => CommandResult::data("sweep", "report", report),
                Err(error) => {
                    CommandResult::application_failure("sweep", error, service.correlation_id())
                }
            }
        });
    }

    let config = match load_config("sweep", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    init_logging(&config.logging);

    let runtime = match build_runtime("sweep") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let service = match open_service(&config).await {
            Ok(service) => service,
            Err((error_class, message, exit_code)) => {
                return CommandResult::failure("sweep", error_class, message, exit_code);
            }
        };

        let scanner = service.scanner();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = Duration::from_secs(config.sweep.interval_secs);
        let worker = scanner.run_periodic(period, shutdown_rx);
        tokio::pin!(worker);

        let total_expired = tokio::select! {
            total = &mut worker => total,
            signal = wait_for_shutdown() => {
                if let Err(error) = signal {
                    tracing::warn!(
                        event_name = "system.sweep.signal_failed",
                        correlation_id = %service.correlation_id(),
                        error = %error,
                        "could not listen for shutdown signal; stopping"
                    );
                }
                let _ = shutdown_tx.send(true);
                worker.await
            }
        };

        CommandResult::success(
            "sweep",
            format!("periodic sweep stopped after expiring {total_expired} workflow(s)"),
        )
    })
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
