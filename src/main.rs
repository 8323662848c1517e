#![warn(clippy::unwrap_used, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]
use std::{
    env, fs,
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use color_eyre::eyre::{self, bail, OptionExt};
use config::HostConfig;
use kerbdv::{SimulationResults, SimulationScheduler, Stage, VesselSnapshot};
use parking_lot::RwLock;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let vessel_path = args
        .next()
        .ok_or_eyre("usage: kerbdv-bin <vessel.ron> [config.toml]")?;
    let config = match args.next() {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    debug!("{config:?}");

    let vessel: VesselSnapshot = ron::from_str(&fs::read_to_string(&vessel_path)?)?;
    info!("Loaded {} parts from {vessel_path}", vessel.parts.len());
    let source = RwLock::new(Some(vessel));

    let (tx, rx) = mpsc::channel();
    let mut scheduler =
        SimulationScheduler::new(config.scheduler.clone(), Arc::new(config.resource_table()))
            .with_on_ready(move || {
                let _ = tx.send(());
            });
    scheduler.set_conditions(config.conditions);

    scheduler.request();
    let started = Instant::now();
    while !scheduler.tick(&source) {
        if started.elapsed() > TIMEOUT {
            bail!("Simulation never started");
        }
        thread::sleep(POLL_INTERVAL);
    }
    rx.recv_timeout(TIMEOUT)?;

    match scheduler.results() {
        Some(SimulationResults::Stages(stages)) => {
            print_stages(&stages);
            info!("Simulation took {:?}", scheduler.time_taken());
            Ok(())
        }
        Some(SimulationResults::Failed(message)) => bail!("Simulation failed: {message}"),
        None => bail!("Simulation produced no results"),
    }
}

fn print_stages(stages: &[Stage]) {
    println!(
        "{:>5} {:>9} {:>9} {:>7} {:>8} {:>6} {:>6} {:>8} {:>9} {:>9}",
        "Stage", "Cost", "Mass", "Isp", "Thrust", "TWR", "maxTWR", "Time", "dV", "dV(tot)"
    );
    for stage in stages.iter().rev() {
        println!(
            "{:>5} {:>9.0} {:>9.3} {:>7.1} {:>8.1} {:>6.2} {:>6.2} {:>8.1} {:>9.1} {:>9.1}",
            stage.number,
            stage.cost,
            stage.total_mass,
            stage.isp,
            stage.thrust,
            stage.thrust_to_weight,
            stage.max_thrust_to_weight,
            stage.time,
            stage.delta_v,
            stage.inverse_total_delta_v,
        );
    }
    if let Some(stage) = stages.last() {
        println!(
            "Total: {:.1} m/s over {:.1} s",
            stage.inverse_total_delta_v,
            stages.iter().map(|s| s.time).sum::<f64>()
        );
    }
}
