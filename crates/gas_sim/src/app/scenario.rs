use std::fs;
use std::path::{Path, PathBuf};

use gas_engine::{DefDatabase, NetRole};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ScenarioError {
    #[error("read scenario '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse scenario json at {json_path}: {source}")]
    Parse {
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("validation failed at {json_path}: {message}")]
    Invalid { json_path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    pub name: String,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ScenarioStep {
    pub tick: u32,
    pub action: StepAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ScenarioRole {
    #[default]
    Authority,
    SimulatedProxy,
}

impl From<ScenarioRole> for NetRole {
    fn from(role: ScenarioRole) -> Self {
        match role {
            ScenarioRole::Authority => NetRole::Authority,
            ScenarioRole::SimulatedProxy => NetRole::SimulatedProxy,
        }
    }
}

/// One scripted input. Entities are addressed by the alias given at spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum StepAction {
    Spawn {
        alias: String,
        character: String,
        #[serde(default)]
        role: ScenarioRole,
    },
    Damage {
        target: String,
        amount: f32,
        #[serde(default)]
        source: Option<String>,
    },
    ApplyEffect {
        target: String,
        effect: String,
        #[serde(default)]
        level: Option<f32>,
    },
    Stun {
        target: String,
    },
    Unstun {
        target: String,
    },
    MontageFinished {
        target: String,
    },
    Dump,
}

impl Scenario {
    pub(crate) fn last_tick(&self) -> u32 {
        self.steps.iter().map(|step| step.tick).max().unwrap_or(0)
    }

    pub(crate) fn steps_at(&self, tick: u32) -> impl Iterator<Item = &StepAction> {
        self.steps
            .iter()
            .filter(move |step| step.tick == tick)
            .map(|step| &step.action)
    }
}

pub(crate) fn load_scenario(path: &Path, database: &DefDatabase) -> Result<Scenario, ScenarioError> {
    let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let scenario = parse_scenario_json(&raw)?;
    validate_scenario(&scenario, database)?;
    Ok(scenario)
}

pub(crate) fn parse_scenario_json(raw: &str) -> Result<Scenario, ScenarioError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, Scenario>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        ScenarioError::Parse {
            json_path: if path.is_empty() { ".".to_string() } else { path },
            source: error.into_inner(),
        }
    })
}

/// Checks def references and aliases before anything runs, so a bad script
/// fails at load instead of halfway through a simulation.
pub(crate) fn validate_scenario(scenario: &Scenario, database: &DefDatabase) -> Result<(), ScenarioError> {
    let mut previous_tick = 0;
    let mut spawned: Vec<&str> = Vec::new();
    for (index, step) in scenario.steps.iter().enumerate() {
        let at = |field: &str| format!("steps[{index}].{field}");
        if step.tick < previous_tick {
            return Err(invalid(
                at("tick"),
                format!("ticks must not decrease (previous {previous_tick}, got {})", step.tick),
            ));
        }
        previous_tick = step.tick;

        match &step.action {
            StepAction::Spawn {
                alias, character, ..
            } => {
                if database.character(character).is_none() {
                    return Err(invalid(at("action.character"), format!("unknown CharacterDef '{character}'")));
                }
                if spawned.contains(&alias.as_str()) {
                    return Err(invalid(at("action.alias"), format!("alias '{alias}' spawned twice")));
                }
                spawned.push(alias.as_str());
            }
            StepAction::ApplyEffect { target, effect, .. } => {
                require_spawned(&spawned, target, &at("action.target"))?;
                if database.effect(effect).is_none() {
                    return Err(invalid(at("action.effect"), format!("unknown EffectDef '{effect}'")));
                }
            }
            StepAction::Damage { target, source, .. } => {
                require_spawned(&spawned, target, &at("action.target"))?;
                if let Some(source) = source {
                    require_spawned(&spawned, source, &at("action.source"))?;
                }
            }
            StepAction::Stun { target }
            | StepAction::Unstun { target }
            | StepAction::MontageFinished { target } => {
                require_spawned(&spawned, target, &at("action.target"))?;
            }
            StepAction::Dump => {}
        }
    }
    Ok(())
}

fn require_spawned(spawned: &[&str], alias: &str, json_path: &str) -> Result<(), ScenarioError> {
    if spawned.contains(&alias) {
        Ok(())
    } else {
        Err(invalid(json_path.to_string(), format!("alias '{alias}' is not spawned by an earlier step")))
    }
}

fn invalid(json_path: String, message: String) -> ScenarioError {
    ScenarioError::Invalid { json_path, message }
}
