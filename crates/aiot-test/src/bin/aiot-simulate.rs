//! Run a node through several simulated duty cycles
//!
//! Settings come from the usual `AIOT_*` variables. The simulation itself
//! reads:
//! - `AIOT_SIM_CYCLES`: number of cycles (default 3)
//! - `AIOT_SIM_LOSS`: link loss rate in `[0, 1]` (default 0.2)
//! - `AIOT_SIM_SEED`: seed for the link loss (default 1)
//!
//! Each cycle sends one command from a fixed rotation; the broker expires
//! the session between cycles the way a suspended node's keepalive lapses.

use std::env;
use std::error::Error;
use std::str::FromStr;

use tracing::info;

use aiot_runtime::{init_logging, RuntimeSettings};
use aiot_test::{
    LinkScript, ScenarioBuilder, SessionBehaviour, SimulatedAdc, SimulatedBroker,
};

const COMMANDS: &[&str] = &["ping", "sleep=60", "sleep=0", "ota=http://10.0.0.2/fw.bin"];

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, Box<dyn Error>> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| format!("invalid value for {}: {:?}", key, v).into()),
        Err(_) => Ok(default),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = RuntimeSettings::from_env()?;
    init_logging(settings.log_format)?;

    let cycles: u32 = env_or("AIOT_SIM_CYCLES", 3)?;
    let loss_rate: f64 = env_or("AIOT_SIM_LOSS", 0.2)?;
    let seed: u64 = env_or("AIOT_SIM_SEED", 1)?;

    let broker = SimulatedBroker::new(SessionBehaviour::Accept);
    info!(cycles, loss_rate, seed, "starting simulation");

    for n in 0..cycles {
        let command = COMMANDS[n as usize % COMMANDS.len()];
        let outcome = ScenarioBuilder::new()
            .with_settings(settings.clone())
            .with_broker(broker.clone())
            .with_link(LinkScript::Flaky {
                loss_rate,
                seed: seed.wrapping_add(n as u64),
            })
            .with_sensor(SimulatedAdc::new(2048, true).with_noise(40, seed))
            .command(command)
            .run()
            .await;

        match &outcome.report {
            Ok(report) => println!(
                "cycle {}: cmd={} exit={:?} sleep={:?} events={:?}",
                n,
                command,
                report.exit,
                report.sleep,
                outcome.events()
            ),
            Err(e) => println!("cycle {}: failed: {}", n, e),
        }
        println!(
            "  retained status: {}",
            outcome.retained_status().unwrap_or_else(|| "-".to_string())
        );

        broker.expire_session();
    }

    Ok(())
}
