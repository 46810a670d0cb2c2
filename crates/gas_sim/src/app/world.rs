use std::cell::RefCell;
use std::rc::Rc;

use gas_engine::{
    native_tags, AttributeInitError, Character, CharacterConfig, CharacterSnapshot,
    DeathQueue, DefDatabase, EntityId, EntityIdAllocator, KinematicBody, LifeState,
    MemoryAbilityBackend, MontageQueue, NetRole, PlayerController, PlayerState,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::scenario::StepAction;

#[derive(Debug, Error)]
pub(crate) enum WorldError {
    #[error("unknown alias '{0}'")]
    UnknownAlias(String),
    #[error("alias '{0}' is already spawned")]
    DuplicateAlias(String),
    #[error("unknown CharacterDef '{0}'")]
    UnknownCharacterDef(String),
    #[error(transparent)]
    AttributeInit(#[from] AttributeInitError),
    #[error("encode snapshot json: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ActorSnapshot {
    pub alias: String,
    pub player: EntityId,
    #[serde(flatten)]
    pub character: CharacterSnapshot,
}

struct Actor {
    alias: String,
    player: PlayerState,
    controller: PlayerController,
    character: Character,
}

/// Every spawned player/character pair plus the shared death queue that
/// turns lethal health changes into `die` calls between steps.
pub(crate) struct SimWorld {
    database: DefDatabase,
    ids: EntityIdAllocator,
    actors: Vec<Actor>,
    death_queue: Rc<RefCell<DeathQueue>>,
    deaths: Rc<RefCell<Vec<EntityId>>>,
    dumps: Vec<String>,
}

impl SimWorld {
    pub(crate) fn new(database: DefDatabase) -> Self {
        Self {
            database,
            ids: EntityIdAllocator::default(),
            actors: Vec::new(),
            death_queue: Rc::new(RefCell::new(DeathQueue::new())),
            deaths: Rc::new(RefCell::new(Vec::new())),
            dumps: Vec::new(),
        }
    }

    pub(crate) fn deaths(&self) -> Vec<EntityId> {
        self.deaths.borrow().clone()
    }

    pub(crate) fn dumps(&self) -> &[String] {
        &self.dumps
    }

    pub(crate) fn character_id(&self, alias: &str) -> Option<EntityId> {
        self.actors
            .iter()
            .find(|actor| actor.alias == alias)
            .map(|actor| actor.character.id())
    }

    pub(crate) fn apply(&mut self, action: &StepAction) -> Result<(), WorldError> {
        match action {
            StepAction::Spawn {
                alias,
                character,
                role,
            } => {
                self.spawn(alias, character, NetRole::from(*role))?;
            }
            StepAction::Damage {
                target,
                amount,
                source,
            } => {
                let source = match source {
                    Some(alias) => Some(
                        self.character_id(alias)
                            .ok_or_else(|| WorldError::UnknownAlias(alias.clone()))?,
                    ),
                    None => None,
                };
                self.damage(target, source, *amount)?;
            }
            StepAction::ApplyEffect {
                target,
                effect,
                level,
            } => self.apply_effect(target, effect, *level)?,
            StepAction::Stun { target } => {
                self.actor(target)?.player.ability_system().add_loose_tag(native_tags().stun);
            }
            StepAction::Unstun { target } => {
                self.actor(target)?
                    .player
                    .ability_system()
                    .remove_loose_tag(native_tags().stun);
            }
            StepAction::MontageFinished { target } => {
                let outcome = self.actor_mut(target)?.character.on_death_montage_completed();
                debug!(alias = %target, ?outcome, "montage_finished");
            }
            StepAction::Dump => self.dump()?,
        }
        self.process_deaths();
        Ok(())
    }

    fn actor(&self, alias: &str) -> Result<&Actor, WorldError> {
        self.actors
            .iter()
            .find(|actor| actor.alias == alias)
            .ok_or_else(|| WorldError::UnknownAlias(alias.to_string()))
    }

    fn actor_mut(&mut self, alias: &str) -> Result<&mut Actor, WorldError> {
        self.actors
            .iter_mut()
            .find(|actor| actor.alias == alias)
            .ok_or_else(|| WorldError::UnknownAlias(alias.to_string()))
    }

    pub(crate) fn spawn(
        &mut self,
        alias: &str,
        character_def: &str,
        role: NetRole,
    ) -> Result<EntityId, WorldError> {
        if self.actor(alias).is_ok() {
            return Err(WorldError::DuplicateAlias(alias.to_string()));
        }
        let def = self
            .database
            .character(character_def)
            .ok_or_else(|| WorldError::UnknownCharacterDef(character_def.to_string()))?;
        let config = CharacterConfig::from_def(def, &self.database);

        let player_id = self.ids.allocate();
        let character_id = self.ids.allocate();
        let backend = MemoryAbilityBackend::from_database(&self.database);
        let mut player = PlayerState::new(player_id, Box::new(backend));
        player.begin_play(self.death_queue.clone());

        let mut character = Character::new(
            character_id,
            role,
            config,
            Box::new(KinematicBody::default()),
            Box::new(MontageQueue::default()),
        );
        let deaths = Rc::clone(&self.deaths);
        character.on_character_died(move |event| deaths.borrow_mut().push(event.entity));

        let mut controller = PlayerController::new();
        if role.has_authority() {
            controller.on_possess(&player, &mut character)?;
        } else {
            character.on_rep_player_state(&player);
            character.initialize_attributes()?;
        }

        info!(
            alias,
            player = %player_id,
            character = %character_id,
            def = character_def,
            health = character.health(),
            "actor_spawned"
        );
        self.actors.push(Actor {
            alias: alias.to_string(),
            player,
            controller,
            character,
        });
        Ok(character_id)
    }

    fn damage(&mut self, alias: &str, source: Option<EntityId>, amount: f32) -> Result<(), WorldError> {
        let actor = self.actor(alias)?;
        let character = &actor.character;
        if !character.role().has_authority() {
            debug!(alias, "damage_ignored_without_authority");
            return Ok(());
        }
        if character.life_state() != LifeState::Alive {
            debug!(alias, state = character.life_state().as_token(), "damage_ignored_not_alive");
            return Ok(());
        }
        character
            .ability_system()
            .receive_damage(source, amount, amount);
        character.set_health(character.health() - amount);
        info!(alias, amount, health = character.health(), "damage_applied");
        Ok(())
    }

    fn apply_effect(&mut self, alias: &str, effect: &str, level: Option<f32>) -> Result<(), WorldError> {
        let actor = self.actor(alias)?;
        let ability_system = actor.character.ability_system();
        let level = level.unwrap_or_else(|| actor.character.character_level());
        let spec = ability_system
            .make_effect_context()
            .and_then(|context| ability_system.make_outgoing_spec(effect, level, context));
        let Some(spec) = spec else {
            warn!(alias, effect, "effect_spec_invalid");
            return Ok(());
        };
        let handle = ability_system.apply_spec_to_self(&spec);
        info!(alias, effect, level, applied = handle.is_some(), "effect_applied");
        Ok(())
    }

    /// Runs `die` for every authoritative character whose health went lethal
    /// during the last step.
    fn process_deaths(&mut self) {
        let pending = self.death_queue.borrow_mut().drain();
        for player_id in pending {
            let Some(actor) = self
                .actors
                .iter_mut()
                .find(|actor| actor.player.id() == player_id)
            else {
                continue;
            };
            if !actor.character.role().has_authority() {
                continue;
            }
            let outcome = actor.character.die();
            debug!(alias = %actor.alias, ?outcome, "death_processed");
        }
        // Dead characters are despawned; release the controller.
        for actor in &mut self.actors {
            if actor.character.life_state() == LifeState::Dead && actor.controller.possessed().is_some() {
                actor.controller.on_unpossess();
            }
        }
    }

    pub(crate) fn snapshots(&self) -> Vec<ActorSnapshot> {
        self.actors
            .iter()
            .map(|actor| ActorSnapshot {
                alias: actor.alias.clone(),
                player: actor.player.id(),
                character: actor.character.snapshot(),
            })
            .collect()
    }

    fn dump(&mut self) -> Result<(), WorldError> {
        let json = serde_json::to_string(&self.snapshots())?;
        info!(snapshot = %json, "world_dump");
        self.dumps.push(json);
        Ok(())
    }
}
