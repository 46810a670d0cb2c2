use std::process::ExitCode;

use gas_engine::EntityId;
use serde::Serialize;
use tracing::{error, info};

use super::bootstrap::{AppWiring, SimConfig};
use super::scenario::{load_scenario, Scenario};
use super::world::{ActorSnapshot, SimWorld, WorldError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SimReport {
    pub scenario: String,
    pub ticks_run: u32,
    pub elapsed_seconds: f32,
    pub deaths: Vec<EntityId>,
    pub dumps: usize,
    pub actors: Vec<ActorSnapshot>,
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let scenario_path = app.config.scenario_path(&app.paths);
    let scenario = match load_scenario(&scenario_path, &app.database) {
        Ok(scenario) => scenario,
        Err(err) => {
            error!(error = %err, path = %scenario_path.display(), "scenario_load_failed");
            return ExitCode::FAILURE;
        }
    };
    info!(scenario = %scenario.name, steps = scenario.steps.len(), "scenario_loaded");

    let mut world = SimWorld::new(app.database);
    let report = match run_scenario(&mut world, &scenario, &app.config) {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "simulation_failed");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "report_encode_failed");
            ExitCode::FAILURE
        }
    }
}

/// Fixed-step loop: every step scheduled for a tick runs in file order before
/// the tick advances.
pub(crate) fn run_scenario(
    world: &mut SimWorld,
    scenario: &Scenario,
    config: &SimConfig,
) -> Result<SimReport, WorldError> {
    let last_tick = scenario.last_tick().min(config.max_ticks);
    let dt = config.tick_seconds();
    let mut ticks_run = 0;
    for tick in 0..=last_tick {
        for action in scenario.steps_at(tick) {
            world.apply(action)?;
        }
        ticks_run += 1;
    }

    let report = SimReport {
        scenario: scenario.name.clone(),
        ticks_run,
        elapsed_seconds: ticks_run as f32 * dt,
        deaths: world.deaths(),
        dumps: world.dumps().len(),
        actors: world.snapshots(),
    };
    info!(
        scenario = %report.scenario,
        ticks = report.ticks_run,
        deaths = report.deaths.len(),
        "simulation_finished"
    );
    Ok(report)
}
