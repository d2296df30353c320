//! `watch`: run a stream against the simulated control system.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pvstream_core::{ControlSystem, Gateway, SimulatedControlSystem, Statistics, StreamEvent};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::commands::load_config;
use crate::error::CliError;

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let payload = read_payload(&args.stream)?;
    let config = load_config(global)?.to_gateway_config()?;

    let sim = Arc::new(SimulatedControlSystem::with_synthetic_polls());
    let control: Arc<dyn ControlSystem> = sim.clone();
    let gateway = Gateway::new(config, control);
    gateway.start().await?;

    let result = watch(&gateway, &sim, &payload, &args).await;

    if global.verbose > 0 {
        print_statistics(&gateway.statistics());
    }
    gateway.shutdown().await;
    result
}

async fn watch(
    gateway: &Gateway,
    sim: &Arc<SimulatedControlSystem>,
    payload: &str,
    args: &WatchArgs,
) -> Result<(), CliError> {
    let id = gateway.create_stream(payload)?;
    let mut events = gateway.events(id)?;

    let cancel = CancellationToken::new();
    let period = Duration::from_millis(args.simulate_period_ms.max(1));
    let driver = sim.spawn_driver(period, cancel.clone());

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
            () = &mut deadline => {
                debug!("watch duration elapsed");
                break Ok(());
            }
            event = events.next() => {
                let Some(event) = event else { break Ok(()) };
                if let Err(e) = emit(&event) {
                    break Err(e);
                }
            }
        }
    };

    cancel.cancel();
    let _ = driver.await;
    gateway.delete_stream(id)?;
    outcome
}

/// One event per line on stdout.
fn emit(event: &StreamEvent) -> Result<(), CliError> {
    let line = serde_json::to_string(event)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

/// Inline JSON, or `@path` to read the definition from a file.
fn read_payload(arg: &str) -> Result<String, CliError> {
    match arg.strip_prefix('@') {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(arg.to_owned()),
    }
}

fn print_statistics(stats: &[Statistics]) {
    for group in stats {
        eprintln!("{}", group.header);
        for item in &group.entries {
            eprintln!("  {:<24} {}", item.name, item.value);
        }
    }
}
