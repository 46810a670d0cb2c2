//! Seams to the runtime that actually executes abilities and effects.
//!
//! The coordinator never resolves costs, cooldowns, stacking or prediction
//! itself. It talks to an [`AbilityBackend`] for ability and effect work, a
//! [`MovementBody`] for physics, and a [`MontagePlayer`] for animation.

pub mod memory;

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ability::AbilityId;
use crate::attributes::AttributeSet;
use crate::entity::EntityId;
use crate::tags::{GameplayTag, TagContainer};

/// Opaque handle to a granted ability. Zero is the invalid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbilityHandle(u64);

impl AbilityHandle {
    pub const INVALID: Self = Self(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to an applied effect. Zero is the invalid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActiveEffectHandle(u64);

impl ActiveEffectHandle {
    pub const INVALID: Self = Self(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbilityGrant {
    pub class_name: String,
    pub level: u32,
    pub input_id: AbilityId,
    pub source: EntityId,
    pub ability_tags: TagContainer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbilitySpec {
    pub handle: AbilityHandle,
    pub class_name: String,
    pub level: u32,
    pub input_id: AbilityId,
    pub source: EntityId,
    pub ability_tags: TagContainer,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectContext {
    pub instigator: EntityId,
    pub source_object: Option<EntityId>,
}

impl EffectContext {
    pub fn new(instigator: EntityId) -> Self {
        Self {
            instigator,
            source_object: None,
        }
    }

    pub fn with_source_object(mut self, source_object: EntityId) -> Self {
        self.source_object = Some(source_object);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectSpec {
    pub effect_name: String,
    pub level: f32,
    pub context: EffectContext,
}

/// Ability and effect execution for one ability-system endpoint.
pub trait AbilityBackend {
    /// Returns [`AbilityHandle::INVALID`] when the grant was refused.
    fn grant_ability(&mut self, grant: AbilityGrant) -> AbilityHandle;

    fn revoke_ability(&mut self, handle: AbilityHandle) -> bool;

    fn activatable_abilities(&self) -> Vec<AbilitySpec>;

    fn try_activate_ability(&mut self, handle: AbilityHandle) -> bool;

    /// Cancels active abilities carrying any of `with_tags` (all when `None`)
    /// and none of `without_tags`. Returns how many were canceled.
    fn cancel_abilities(
        &mut self,
        with_tags: Option<&TagContainer>,
        without_tags: Option<&TagContainer>,
    ) -> usize;

    /// `None` stands for an invalid spec (unknown or unusable effect).
    fn make_outgoing_spec(
        &self,
        effect_name: &str,
        level: f32,
        context: EffectContext,
    ) -> Option<EffectSpec>;

    fn apply_spec_to_self(
        &mut self,
        spec: &EffectSpec,
        attributes: &mut AttributeSet,
    ) -> Option<ActiveEffectHandle>;

    fn remove_active_effects_with_tags(
        &mut self,
        tags: &TagContainer,
        attributes: &mut AttributeSet,
    ) -> usize;

    fn active_effect_count(&self) -> usize;

    fn add_loose_tag(&mut self, tag: GameplayTag);

    fn remove_loose_tag(&mut self, tag: GameplayTag);

    /// Count of `tag` and its descendants across loose and effect-granted tags.
    fn tag_count(&self, tag: GameplayTag) -> u32;
}

pub trait MovementBody {
    fn disable_collision(&mut self);
    fn set_gravity_scale(&mut self, scale: f32);
    fn set_velocity(&mut self, velocity: [f32; 3]);
}

pub trait MontagePlayer {
    /// Starts playback. Completion is reported back by the host exactly once.
    fn play_montage(&mut self, montage: &str) -> bool;
}

impl<T: MovementBody> MovementBody for Rc<RefCell<T>> {
    fn disable_collision(&mut self) {
        self.borrow_mut().disable_collision();
    }

    fn set_gravity_scale(&mut self, scale: f32) {
        self.borrow_mut().set_gravity_scale(scale);
    }

    fn set_velocity(&mut self, velocity: [f32; 3]) {
        self.borrow_mut().set_velocity(velocity);
    }
}

impl<T: MontagePlayer> MontagePlayer for Rc<RefCell<T>> {
    fn play_montage(&mut self, montage: &str) -> bool {
        self.borrow_mut().play_montage(montage)
    }
}

impl<T: AbilityBackend> AbilityBackend for Rc<RefCell<T>> {
    fn grant_ability(&mut self, grant: AbilityGrant) -> AbilityHandle {
        self.borrow_mut().grant_ability(grant)
    }

    fn revoke_ability(&mut self, handle: AbilityHandle) -> bool {
        self.borrow_mut().revoke_ability(handle)
    }

    fn activatable_abilities(&self) -> Vec<AbilitySpec> {
        self.borrow().activatable_abilities()
    }

    fn try_activate_ability(&mut self, handle: AbilityHandle) -> bool {
        self.borrow_mut().try_activate_ability(handle)
    }

    fn cancel_abilities(
        &mut self,
        with_tags: Option<&TagContainer>,
        without_tags: Option<&TagContainer>,
    ) -> usize {
        self.borrow_mut().cancel_abilities(with_tags, without_tags)
    }

    fn make_outgoing_spec(
        &self,
        effect_name: &str,
        level: f32,
        context: EffectContext,
    ) -> Option<EffectSpec> {
        self.borrow().make_outgoing_spec(effect_name, level, context)
    }

    fn apply_spec_to_self(
        &mut self,
        spec: &EffectSpec,
        attributes: &mut AttributeSet,
    ) -> Option<ActiveEffectHandle> {
        self.borrow_mut().apply_spec_to_self(spec, attributes)
    }

    fn remove_active_effects_with_tags(
        &mut self,
        tags: &TagContainer,
        attributes: &mut AttributeSet,
    ) -> usize {
        self.borrow_mut().remove_active_effects_with_tags(tags, attributes)
    }

    fn active_effect_count(&self) -> usize {
        self.borrow().active_effect_count()
    }

    fn add_loose_tag(&mut self, tag: GameplayTag) {
        self.borrow_mut().add_loose_tag(tag);
    }

    fn remove_loose_tag(&mut self, tag: GameplayTag) {
        self.borrow_mut().remove_loose_tag(tag);
    }

    fn tag_count(&self, tag: GameplayTag) -> u32 {
        self.borrow().tag_count(tag)
    }
}
