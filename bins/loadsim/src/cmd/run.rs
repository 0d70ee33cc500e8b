use std::sync::Arc;
use std::time::Duration;

use loadsim_engine::{
    BrokerConnector, LoopbackBroker, MqttConnector, RunMode, SimConfig, Simulator, SimulatorOptions, UnitStatus,
};
use tokio_util::sync::CancellationToken;

use crate::config::{Mode, RunArgs};
use crate::error::CliError;

pub async fn run(args: RunArgs) -> Result<(), CliError> {
    let config = SimConfig::load(&args.settings)?;
    tracing::info!(settings = %args.settings.display(), "loaded settings");

    let linger = Duration::try_from_secs_f64(args.linger)
        .map_err(|_| CliError::Argument(format!("--linger must be a non-negative number, got {}", args.linger)))?;
    let options = SimulatorOptions {
        mode: match args.mode {
            Mode::Pub => RunMode::Publish,
            Mode::Sub => RunMode::Subscribe,
            Mode::Both => RunMode::Both,
        },
        output_dir: args.output.clone(),
        linger,
    };

    let endpoint = Arc::new(config.endpoint()?);
    let connector: Arc<dyn BrokerConnector> = if args.loopback {
        tracing::info!("using in-process loopback broker");
        Arc::new(LoopbackBroker::new())
    } else {
        Arc::new(MqttConnector::new(endpoint))
    };
    let simulator = Simulator::new(&config, connector, options)?;

    // Ctrl+C cancels every unit; they disconnect before the report is built.
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, shutting down");
            signal_token.cancel();
        }
    });

    let report = simulator.run(token).await?;

    println!("Run finished: {} published, {} received", report.published(), report.received());
    for unit in &report.units {
        match &unit.status {
            UnitStatus::Published(r) => {
                println!("  pub  {:<40} {:>6} published ({:?})", unit.name, r.published, r.outcome)
            }
            UnitStatus::Received(r) => {
                println!("  sub  {:<40} {:>6} received, {} with latency", unit.name, r.received, r.with_latency)
            }
            UnitStatus::Failed(reason) => println!("  FAIL {:<40} {reason}", unit.name),
        }
    }

    match report.failures().count() {
        0 => Ok(()),
        n => Err(CliError::UnitsFailed(n)),
    }
}
