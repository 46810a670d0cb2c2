//! In-memory host used by the simulation binary and by tests.
//!
//! Effects apply their modifiers directly to the attribute set. Infinite
//! effects remember the delta each modifier produced and give it back when
//! they are removed. There is no stacking, prediction, cost or cooldown.

use std::collections::BTreeMap;

use tracing::debug;

use crate::attributes::{AttributeKind, AttributeSet};
use crate::content::{DefDatabase, DurationPolicy, EffectDef, ModifierOp};
use crate::entity::EntityId;
use crate::tags::{GameplayTag, TagContainer};

use super::{
    AbilityBackend, AbilityGrant, AbilityHandle, AbilitySpec, ActiveEffectHandle, EffectContext,
    EffectSpec, MontagePlayer, MovementBody,
};

/// Mutating calls seen by [`MemoryAbilityBackend`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Grant {
        handle: AbilityHandle,
        class_name: String,
        source: EntityId,
    },
    Revoke {
        handle: AbilityHandle,
    },
    Activate {
        handle: AbilityHandle,
    },
    Cancel {
        handle: AbilityHandle,
    },
    ApplyEffect {
        effect: String,
        level: f32,
    },
    RemoveEffect {
        effect: String,
    },
    AddLooseTag {
        tag: GameplayTag,
    },
    RemoveLooseTag {
        tag: GameplayTag,
    },
}

#[derive(Debug, Clone)]
struct ActiveEffect {
    handle: ActiveEffectHandle,
    def: EffectDef,
    deltas: Vec<(AttributeKind, f32)>,
}

#[derive(Debug, Default)]
pub struct MemoryAbilityBackend {
    effect_defs: BTreeMap<String, EffectDef>,
    next_ability_handle: u64,
    next_effect_handle: u64,
    abilities: Vec<AbilitySpec>,
    active_effects: Vec<ActiveEffect>,
    loose_tags: BTreeMap<GameplayTag, u32>,
    calls: Vec<BackendCall>,
}

impl MemoryAbilityBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_database(database: &DefDatabase) -> Self {
        let mut backend = Self::new();
        for def in database.effects() {
            backend.register_effect(def.clone());
        }
        backend
    }

    pub fn register_effect(&mut self, def: EffectDef) {
        self.effect_defs.insert(def.def_name.clone(), def);
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn apply_modifiers(def: &EffectDef, level: f32, attributes: &mut AttributeSet) -> Vec<(AttributeKind, f32)> {
        def.modifiers
            .iter()
            .map(|modifier| {
                let old_value = attributes.get(modifier.attribute);
                let magnitude = modifier.magnitude_at(level);
                let new_value = match modifier.op {
                    ModifierOp::Add => old_value + magnitude,
                    ModifierOp::Multiply => old_value * magnitude,
                    ModifierOp::Override => magnitude,
                };
                attributes.set(modifier.attribute, new_value);
                (modifier.attribute, new_value - old_value)
            })
            .collect()
    }
}

impl AbilityBackend for MemoryAbilityBackend {
    fn grant_ability(&mut self, grant: AbilityGrant) -> AbilityHandle {
        self.next_ability_handle += 1;
        let handle = AbilityHandle::new(self.next_ability_handle);
        self.calls.push(BackendCall::Grant {
            handle,
            class_name: grant.class_name.clone(),
            source: grant.source,
        });
        self.abilities.push(AbilitySpec {
            handle,
            class_name: grant.class_name,
            level: grant.level,
            input_id: grant.input_id,
            source: grant.source,
            ability_tags: grant.ability_tags,
            is_active: false,
        });
        handle
    }

    fn revoke_ability(&mut self, handle: AbilityHandle) -> bool {
        let before_len = self.abilities.len();
        self.abilities.retain(|spec| spec.handle != handle);
        let removed = self.abilities.len() != before_len;
        if removed {
            self.calls.push(BackendCall::Revoke { handle });
        }
        removed
    }

    fn activatable_abilities(&self) -> Vec<AbilitySpec> {
        self.abilities.clone()
    }

    fn try_activate_ability(&mut self, handle: AbilityHandle) -> bool {
        let Some(spec) = self
            .abilities
            .iter_mut()
            .find(|spec| spec.handle == handle && !spec.is_active)
        else {
            return false;
        };
        spec.is_active = true;
        self.calls.push(BackendCall::Activate { handle });
        true
    }

    fn cancel_abilities(
        &mut self,
        with_tags: Option<&TagContainer>,
        without_tags: Option<&TagContainer>,
    ) -> usize {
        let mut canceled = 0;
        for spec in self.abilities.iter_mut().filter(|spec| spec.is_active) {
            let selected = with_tags.map_or(true, |tags| spec.ability_tags.has_any(tags));
            let excluded = without_tags.is_some_and(|tags| spec.ability_tags.has_any(tags));
            if selected && !excluded {
                spec.is_active = false;
                self.calls.push(BackendCall::Cancel { handle: spec.handle });
                canceled += 1;
            }
        }
        canceled
    }

    fn make_outgoing_spec(
        &self,
        effect_name: &str,
        level: f32,
        context: EffectContext,
    ) -> Option<EffectSpec> {
        if !self.effect_defs.contains_key(effect_name) {
            debug!(effect = effect_name, "unknown_effect_def");
            return None;
        }
        Some(EffectSpec {
            effect_name: effect_name.to_string(),
            level,
            context,
        })
    }

    fn apply_spec_to_self(
        &mut self,
        spec: &EffectSpec,
        attributes: &mut AttributeSet,
    ) -> Option<ActiveEffectHandle> {
        let def = self.effect_defs.get(&spec.effect_name)?.clone();
        let deltas = Self::apply_modifiers(&def, spec.level, attributes);
        self.next_effect_handle += 1;
        let handle = ActiveEffectHandle::new(self.next_effect_handle);
        self.calls.push(BackendCall::ApplyEffect {
            effect: spec.effect_name.clone(),
            level: spec.level,
        });
        if def.duration == DurationPolicy::Infinite {
            self.active_effects.push(ActiveEffect {
                handle,
                def,
                deltas,
            });
        }
        Some(handle)
    }

    fn remove_active_effects_with_tags(
        &mut self,
        tags: &TagContainer,
        attributes: &mut AttributeSet,
    ) -> usize {
        let (removed, kept): (Vec<ActiveEffect>, Vec<ActiveEffect>) =
            self.active_effects.drain(..).partition(|effect| {
                effect.def.asset_tags.has_any(tags) || effect.def.granted_tags.has_any(tags)
            });
        self.active_effects = kept;
        for effect in &removed {
            for (attribute, delta) in &effect.deltas {
                attributes.set(*attribute, attributes.get(*attribute) - delta);
            }
            debug!(effect = %effect.def.def_name, handle = effect.handle.raw(), "active_effect_removed");
            self.calls.push(BackendCall::RemoveEffect {
                effect: effect.def.def_name.clone(),
            });
        }
        removed.len()
    }

    fn active_effect_count(&self) -> usize {
        self.active_effects.len()
    }

    fn add_loose_tag(&mut self, tag: GameplayTag) {
        *self.loose_tags.entry(tag).or_insert(0) += 1;
        self.calls.push(BackendCall::AddLooseTag { tag });
    }

    fn remove_loose_tag(&mut self, tag: GameplayTag) {
        let Some(count) = self.loose_tags.get_mut(&tag) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.loose_tags.remove(&tag);
        }
        self.calls.push(BackendCall::RemoveLooseTag { tag });
    }

    fn tag_count(&self, tag: GameplayTag) -> u32 {
        let loose: u32 = self
            .loose_tags
            .iter()
            .filter(|(held, _)| held.matches(tag))
            .map(|(_, count)| *count)
            .sum();
        let granted = self
            .active_effects
            .iter()
            .flat_map(|effect| effect.def.granted_tags.iter())
            .filter(|held| held.matches(tag))
            .count() as u32;
        loose + granted
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicBody {
    collision_enabled: bool,
    gravity_scale: f32,
    velocity: [f32; 3],
}

impl Default for KinematicBody {
    fn default() -> Self {
        Self {
            collision_enabled: true,
            gravity_scale: 1.0,
            velocity: [0.0; 3],
        }
    }
}

impl KinematicBody {
    pub fn collision_enabled(&self) -> bool {
        self.collision_enabled
    }

    pub fn gravity_scale(&self) -> f32 {
        self.gravity_scale
    }

    pub fn velocity(&self) -> [f32; 3] {
        self.velocity
    }
}

impl MovementBody for KinematicBody {
    fn disable_collision(&mut self) {
        self.collision_enabled = false;
    }

    fn set_gravity_scale(&mut self, scale: f32) {
        self.gravity_scale = scale;
    }

    fn set_velocity(&mut self, velocity: [f32; 3]) {
        self.velocity = velocity;
    }
}

/// Records requested montages. Completion is driven by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MontageQueue {
    played: Vec<String>,
}

impl MontageQueue {
    pub fn played(&self) -> &[String] {
        &self.played
    }
}

impl MontagePlayer for MontageQueue {
    fn play_montage(&mut self, montage: &str) -> bool {
        self.played.push(montage.to_string());
        true
    }
}
