use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info};

use crate::ability_system::{AbilitySystemComponent, AbilitySystemRef, SharedAbilitySystem};
use crate::attributes::{
    shared_attribute_set, AttributeKind, AttributeSet, AttributeStoreRef, SharedAttributeSet,
};
use crate::character::Character;
use crate::effects::AttributeInitError;
use crate::entity::EntityId;
use crate::host::AbilityBackend;
use crate::notifications::{AttributeObserver, ChangeNotificationHub};
use crate::tags::native_tags;

/// Persistent per-player state: owns the ability-system endpoint and the
/// attribute set that outlive any one character body.
pub struct PlayerState {
    hub: ChangeNotificationHub,
    id: EntityId,
    ability_system: SharedAbilitySystem,
    attributes: SharedAttributeSet,
    confirm_cancel_text_visible: bool,
}

impl std::fmt::Debug for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerState")
            .field("id", &self.id)
            .field("hub_bound", &self.hub.is_bound())
            .finish_non_exhaustive()
    }
}

impl PlayerState {
    pub fn new(id: EntityId, backend: Box<dyn AbilityBackend>) -> Self {
        let attributes = shared_attribute_set(AttributeSet::new());
        let ability_system =
            AbilitySystemComponent::new(id, backend, Rc::clone(&attributes)).into_shared();
        Self {
            hub: ChangeNotificationHub::new(),
            id,
            ability_system,
            attributes,
            confirm_cancel_text_visible: false,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn ability_system(&self) -> AbilitySystemRef {
        AbilitySystemRef::new(&self.ability_system)
    }

    pub fn attribute_store(&self) -> AttributeStoreRef {
        AttributeStoreRef::new(&self.attributes)
    }

    /// Wires attribute and stun notifications. Later calls are no-ops.
    pub fn begin_play(&mut self, observer: Rc<RefCell<dyn AttributeObserver>>) -> bool {
        let ability_system = self.ability_system();
        self.hub.bind(&ability_system, observer)
    }

    pub fn end_play(&mut self) {
        self.hub.release();
    }

    fn attribute(&self, kind: AttributeKind) -> f32 {
        self.attributes
            .try_borrow()
            .map(|attributes| attributes.get(kind))
            .unwrap_or(0.0)
    }

    pub fn health(&self) -> f32 {
        self.attribute(AttributeKind::Health)
    }

    pub fn max_health(&self) -> f32 {
        self.attribute(AttributeKind::MaxHealth)
    }

    pub fn mana(&self) -> f32 {
        self.attribute(AttributeKind::Mana)
    }

    pub fn max_mana(&self) -> f32 {
        self.attribute(AttributeKind::MaxMana)
    }

    pub fn character_level(&self) -> f32 {
        self.attribute(AttributeKind::Level)
    }

    pub fn is_alive(&self) -> bool {
        self.health() > 0.0
    }

    pub fn is_dead_tagged(&self) -> bool {
        self.ability_system().has_matching_tag(native_tags().dead)
    }

    /// UI hook for targeting abilities waiting on confirm or cancel input.
    pub fn show_ability_confirm_cancel_text(&mut self, show: bool) {
        self.confirm_cancel_text_visible = show;
        debug!(player = %self.id, show, "ability_confirm_cancel_text");
    }

    pub fn confirm_cancel_text_visible(&self) -> bool {
        self.confirm_cancel_text_visible
    }
}

/// Connects a player state to the character it possesses.
#[derive(Debug, Default)]
pub struct PlayerController {
    possessed: Option<EntityId>,
}

impl PlayerController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn possessed(&self) -> Option<EntityId> {
        self.possessed
    }

    pub fn on_possess(
        &mut self,
        player: &PlayerState,
        character: &mut Character,
    ) -> Result<(), AttributeInitError> {
        player
            .ability_system()
            .init_ability_actor_info(player.id(), character.id());
        self.possessed = Some(character.id());
        info!(player = %player.id(), character = %character.id(), "character_possessed");
        character.possessed_by(player)
    }

    pub fn on_unpossess(&mut self) {
        if let Some(character) = self.possessed.take() {
            debug!(character = %character, "character_unpossessed");
        }
    }
}
