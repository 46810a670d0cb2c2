use std::path::PathBuf;

use gas_engine::{
    compile_def_database, resolve_app_paths, AppPaths, ContentCompileError, ContentPlanRequest,
    DefDatabase, StartupError,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ENABLED_MODS_ENV_VAR: &str = "GAS_ENABLED_MODS";
const SCENARIO_ENV_VAR: &str = "GAS_SCENARIO";
const DEFAULT_SCENARIO_FILE: &str = "arena.json";

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("content compile failed: {0}")]
    Content(#[from] ContentCompileError),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SimConfig {
    pub tick_hz: u32,
    pub max_ticks: u32,
    /// Absolute, or relative to the scenarios directory.
    pub scenario: PathBuf,
    pub content_plan_request: ContentPlanRequest,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_hz: 30,
            max_ticks: 10_000,
            scenario: PathBuf::from(DEFAULT_SCENARIO_FILE),
            content_plan_request: ContentPlanRequest::default(),
        }
    }
}

impl SimConfig {
    pub(crate) fn from_env() -> Self {
        Self::from_values(
            std::env::var(ENABLED_MODS_ENV_VAR).ok().as_deref(),
            std::env::var(SCENARIO_ENV_VAR).ok().as_deref(),
        )
    }

    pub(crate) fn from_values(enabled_mods: Option<&str>, scenario: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = enabled_mods {
            config.content_plan_request = ContentPlanRequest::from_mod_list(raw);
        }
        if let Some(path) = scenario.map(str::trim).filter(|path| !path.is_empty()) {
            config.scenario = PathBuf::from(path);
        }
        config
    }

    pub(crate) fn scenario_path(&self, paths: &AppPaths) -> PathBuf {
        if self.scenario.is_absolute() {
            self.scenario.clone()
        } else {
            paths.scenarios_dir.join(&self.scenario)
        }
    }

    pub(crate) fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }
}

pub(crate) struct AppWiring {
    pub(crate) config: SimConfig,
    pub(crate) paths: AppPaths,
    pub(crate) database: DefDatabase,
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    let config = SimConfig::from_env();
    let paths = resolve_app_paths()?;
    let database = compile_def_database(&paths, &config.content_plan_request)?;
    info!(
        root = %paths.root.display(),
        enabled_mods = config.content_plan_request.enabled_mods.len(),
        characters = database.characters().count(),
        abilities = database.ability_count(),
        effects = database.effects().count(),
        "content_loaded"
    );
    Ok(AppWiring {
        config,
        paths,
        database,
    })
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
