use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use robocar_throttle::bus::MqttBus;
use robocar_throttle::cli::Args;
use robocar_throttle::throttle::ThrottleController;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };
    setup(&args.log_level)?;
    args.validate()?;

    let processor = args.processor().await?;
    let brake = args.brake_controller().await?;

    let cancel = CancellationToken::new();
    let bus = Arc::new(
        MqttBus::connect(&args.mqtt_settings(), cancel.child_token())
            .map_err(|e| eyre!("Unable to connect to mqtt bus: {}", e))?,
    );

    let controller = Arc::new(
        ThrottleController::new(bus.clone(), args.topics(), args.controller_settings())?
            .with_processor(processor)
            .with_brake_controller(brake),
    );
    handle_exit(controller.clone());

    let result = controller.start().await;
    bus.disconnect().await;
    cancel.cancel();

    result.map_err(|e| eyre!("Unable to start service: {}", e))
}

fn setup(log_level: &str) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(log_level);
    Ok(())
}

fn setup_logging_env(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Stop the controller on SIGINT or SIGTERM.
fn handle_exit(controller: Arc<ThrottleController>) {
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                info!("Shutdown signal received");
                controller.stop().await;
            }
            Err(e) => error!("Unable to listen for shutdown signals: {}", e),
        }
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
