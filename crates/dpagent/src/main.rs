//! dpagent entry point.
//!
//! Builds the agent context, wires the dispatcher to its device sessions
//! and runs the serialized event loop until interrupted. The northbound
//! feed and the real device transport are external processes; until their
//! adapters are plugged in, the binary runs against the in-process mock
//! device so the full reconciliation path is exercisable end to end.

use clap::Parser;
use dpagent::{AgentConfig, AgentContext, DeviceSessions, Dispatcher};
use dpagent_device::MockDevice;
use log::{debug, error, info};
use std::process::ExitCode;
use std::time::Duration;

/// Dataplane configuration agent
#[derive(Parser, Debug)]
#[command(name = "dpagent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Capacity of the incremental-change input queue
    #[arg(long, default_value = "1024")]
    change_queue: usize,

    /// Per-entity-type error log capacity
    #[arg(long, default_value = "50")]
    max_errors: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.as_str()),
    )
        .init();

    info!("starting dpagent");
    info!("change queue capacity: {}", args.change_queue);
    info!("error log capacity: {}", args.max_errors);

    let config = AgentConfig::default()
        .with_change_queue_capacity(args.change_queue)
        .with_error_log_capacity(args.max_errors);
    let (ctx, status_rx) = AgentContext::new(config);

    let device = MockDevice::new();
    let (mut dispatcher, handles) = match Dispatcher::new(&ctx, DeviceSessions::mock(&device)) {
        Ok(built) => built,
        Err(err) => {
            error!("dispatcher construction failed: {}", err);
            return ExitCode::FAILURE;
        }
    };

    // read side: drain published post-change states; a real deployment
    // forwards these onto the operational-state feed
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            for event in status_rx.drain() {
                match serde_json::to_string(&event) {
                    Ok(json) => debug!("status: {}", json),
                    Err(err) => debug!("status for {} not serializable: {}", event.name(), err),
                }
            }
        }
    });

    // the handles stay alive here so the loop keeps serving; the
    // northbound watcher enqueues through clones of them
    let _northbound = handles;

    info!("dpagent ready, waiting for desired-state events");
    tokio::select! {
        _ = dispatcher.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    ExitCode::SUCCESS
}
