use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, info};

use crate::ability::{AbilityLevelResolver, GameplayAbility};
use crate::ability_system::AbilitySystemRef;
use crate::attributes::{AttributeKind, AttributeSet, AttributeStoreRef};
use crate::content::{CharacterDef, DefDatabase};
use crate::death::{CharacterDied, DeathContext, DeathController, DeathOutcome};
use crate::effects::{AttributeInitError, StartupEffects, StartupOutcome};
use crate::entity::{EntityId, LifeState, NetRole};
use crate::host::{MontagePlayer, MovementBody};
use crate::lifecycle::{AbilityLifecycle, GrantOutcome, LifecycleTarget, RevokeOutcome};
use crate::observer::ListenerToken;
use crate::player::PlayerState;
use crate::tags::native_tags;

/// Static setup of a character: what it grants, applies and plays.
#[derive(Clone, Default)]
pub struct CharacterConfig {
    pub name: String,
    pub abilities: Vec<Rc<dyn GameplayAbility>>,
    pub default_attributes: Option<String>,
    pub startup_effects: Vec<String>,
    pub death_montage: Option<String>,
}

impl fmt::Debug for CharacterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abilities: Vec<&str> = self.abilities.iter().map(|ability| ability.class_name()).collect();
        f.debug_struct("CharacterConfig")
            .field("name", &self.name)
            .field("abilities", &abilities)
            .field("default_attributes", &self.default_attributes)
            .field("startup_effects", &self.startup_effects)
            .field("death_montage", &self.death_montage)
            .finish()
    }
}

impl CharacterConfig {
    pub fn from_def(def: &CharacterDef, database: &DefDatabase) -> Self {
        Self {
            name: def.label.clone(),
            abilities: database.ability_catalog(def),
            default_attributes: def.default_attributes.clone(),
            startup_effects: def.startup_effects.clone(),
            death_montage: def.death_montage.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterSnapshot {
    pub entity: EntityId,
    pub name: String,
    pub life_state: LifeState,
    pub attributes: AttributeSet,
    pub abilities: Vec<String>,
    pub active_abilities: Vec<String>,
    pub active_effects: usize,
    pub dead_tagged: bool,
    pub stunned: bool,
}

/// Transient body of a player. Reaches the player's endpoint and attributes
/// through weak references bound on possession.
pub struct Character {
    id: EntityId,
    role: NetRole,
    name: String,
    ability_system: AbilitySystemRef,
    attributes: AttributeStoreRef,
    lifecycle: AbilityLifecycle,
    startup: StartupEffects,
    death: DeathController,
    body: Box<dyn MovementBody>,
    montage_player: Box<dyn MontagePlayer>,
}

impl fmt::Debug for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Character")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("name", &self.name)
            .field("life_state", &self.death.state())
            .finish_non_exhaustive()
    }
}

impl Character {
    pub fn new(
        id: EntityId,
        role: NetRole,
        config: CharacterConfig,
        body: Box<dyn MovementBody>,
        montage_player: Box<dyn MontagePlayer>,
    ) -> Self {
        Self {
            id,
            role,
            name: config.name,
            ability_system: AbilitySystemRef::unbound(),
            attributes: AttributeStoreRef::unbound(),
            lifecycle: AbilityLifecycle::new(config.abilities),
            startup: StartupEffects::new(config.default_attributes, config.startup_effects),
            death: DeathController::new(config.death_montage),
            body,
            montage_player,
        }
    }

    pub fn with_level_resolver(mut self, resolver: impl AbilityLevelResolver + 'static) -> Self {
        self.lifecycle.set_level_resolver(Box::new(resolver));
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn life_state(&self) -> LifeState {
        self.death.state()
    }

    pub fn ability_system(&self) -> &AbilitySystemRef {
        &self.ability_system
    }

    pub fn attribute_store(&self) -> &AttributeStoreRef {
        &self.attributes
    }

    fn target(&self) -> LifecycleTarget<'_> {
        LifecycleTarget {
            entity: self.id,
            role: self.role,
            ability_system: &self.ability_system,
            attributes: &self.attributes,
        }
    }

    fn bind_player_state(&mut self, player: &PlayerState) {
        self.ability_system = player.ability_system();
        self.attributes = player.attribute_store();
    }

    /// Authoritative spawn path: bind, seed attributes, grant abilities and
    /// apply startup effects. A missing defaults template only aborts the
    /// seeding step; the error is returned once the other steps have run.
    pub fn possessed_by(&mut self, player: &PlayerState) -> Result<(), AttributeInitError> {
        self.bind_player_state(player);
        let defaults = self.initialize_attributes();
        self.add_character_abilities();
        self.add_startup_effects();
        info!(
            entity = %self.id,
            player = %player.id(),
            name = %self.name,
            defaults_applied = defaults.is_ok(),
            "character_spawned"
        );
        defaults.map(|_| ())
    }

    /// Simulated-copy path: only the references are bound.
    pub fn on_rep_player_state(&mut self, player: &PlayerState) {
        self.bind_player_state(player);
        debug!(entity = %self.id, player = %player.id(), "player_state_replicated");
    }

    pub fn add_character_abilities(&self) -> GrantOutcome {
        self.lifecycle.grant(self.target())
    }

    pub fn remove_character_abilities(&self) -> RevokeOutcome {
        self.lifecycle.revoke(self.target())
    }

    pub fn initialize_attributes(
        &self,
    ) -> Result<Option<crate::host::ActiveEffectHandle>, AttributeInitError> {
        self.startup.initialize_attributes(self.target(), &self.name)
    }

    pub fn add_startup_effects(&self) -> StartupOutcome {
        self.startup.apply_startup_catalog(self.target())
    }

    pub fn ability_level(&self, ability: &dyn GameplayAbility) -> u32 {
        self.lifecycle.ability_level(ability)
    }

    pub fn health(&self) -> f32 {
        self.attributes.get(AttributeKind::Health)
    }

    pub fn max_health(&self) -> f32 {
        self.attributes.get(AttributeKind::MaxHealth)
    }

    pub fn mana(&self) -> f32 {
        self.attributes.get(AttributeKind::Mana)
    }

    pub fn max_mana(&self) -> f32 {
        self.attributes.get(AttributeKind::MaxMana)
    }

    pub fn character_level(&self) -> f32 {
        self.attributes.get(AttributeKind::Level)
    }

    pub fn is_alive(&self) -> bool {
        self.health() > 0.0
    }

    /// Writes go through the endpoint when bound so subscribers are told.
    pub fn set_health(&self, health: f32) -> bool {
        self.set_attribute(AttributeKind::Health, health)
    }

    pub fn set_mana(&self, mana: f32) -> bool {
        self.set_attribute(AttributeKind::Mana, mana)
    }

    fn set_attribute(&self, kind: AttributeKind, value: f32) -> bool {
        if self.ability_system.is_valid() {
            self.ability_system.set_numeric_attribute_base(kind, value)
        } else {
            self.attributes.set(kind, value)
        }
    }

    pub fn on_character_died(
        &mut self,
        listener: impl FnMut(&CharacterDied) + 'static,
    ) -> ListenerToken {
        self.death.on_character_died(listener)
    }

    pub fn remove_character_died_listener(&mut self, token: ListenerToken) -> bool {
        self.death.remove_character_died_listener(token)
    }

    pub fn die(&mut self) -> DeathOutcome {
        let context = DeathContext {
            target: LifecycleTarget {
                entity: self.id,
                role: self.role,
                ability_system: &self.ability_system,
                attributes: &self.attributes,
            },
            lifecycle: &self.lifecycle,
            body: self.body.as_mut(),
            montage_player: self.montage_player.as_mut(),
        };
        self.death.die(context)
    }

    pub fn on_death_montage_completed(&mut self) -> DeathOutcome {
        self.death.on_montage_completed(self.id)
    }

    pub fn finish_dying(&mut self) -> DeathOutcome {
        self.death.finish_dying(self.id)
    }

    pub fn snapshot(&self) -> CharacterSnapshot {
        let specs = self.ability_system.activatable_abilities();
        let tags = native_tags();
        CharacterSnapshot {
            entity: self.id,
            name: self.name.clone(),
            life_state: self.death.state(),
            attributes: self.attributes.snapshot().unwrap_or_default(),
            abilities: specs.iter().map(|spec| spec.class_name.clone()).collect(),
            active_abilities: specs
                .iter()
                .filter(|spec| spec.is_active)
                .map(|spec| spec.class_name.clone())
                .collect(),
            active_effects: self.ability_system.active_effect_count(),
            dead_tagged: self.ability_system.has_matching_tag(tags.dead),
            stunned: self.ability_system.has_matching_tag(tags.stun),
        }
    }
}
