use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ability::{AbilityDef, GameplayAbility};
use crate::attributes::AttributeKind;
use crate::tags::TagContainer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DurationPolicy {
    #[default]
    Instant,
    Infinite,
}

impl DurationPolicy {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "Instant" => Some(Self::Instant),
            "Infinite" => Some(Self::Infinite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierOp {
    Add,
    Multiply,
    Override,
}

impl ModifierOp {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "Add" => Some(Self::Add),
            "Multiply" => Some(Self::Multiply),
            "Override" => Some(Self::Override),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeModifier {
    pub attribute: AttributeKind,
    pub op: ModifierOp,
    pub magnitude: f32,
    pub magnitude_per_level: f32,
}

impl AttributeModifier {
    pub fn new(attribute: AttributeKind, op: ModifierOp, magnitude: f32) -> Self {
        Self {
            attribute,
            op,
            magnitude,
            magnitude_per_level: 0.0,
        }
    }

    pub fn with_per_level(mut self, magnitude_per_level: f32) -> Self {
        self.magnitude_per_level = magnitude_per_level;
        self
    }

    /// Level 1 (or below) yields the base magnitude.
    pub fn magnitude_at(&self, level: f32) -> f32 {
        self.magnitude + self.magnitude_per_level * (level - 1.0).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectDef {
    pub def_name: String,
    pub duration: DurationPolicy,
    pub modifiers: Vec<AttributeModifier>,
    pub granted_tags: TagContainer,
    pub asset_tags: TagContainer,
}

impl EffectDef {
    pub fn new(def_name: impl Into<String>) -> Self {
        Self {
            def_name: def_name.into(),
            duration: DurationPolicy::Instant,
            modifiers: Vec::new(),
            granted_tags: TagContainer::new(),
            asset_tags: TagContainer::new(),
        }
    }

    pub fn with_modifier(mut self, modifier: AttributeModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterDef {
    pub def_name: String,
    pub label: String,
    pub default_attributes: Option<String>,
    pub abilities: Vec<String>,
    pub startup_effects: Vec<String>,
    pub death_montage: Option<String>,
}

/// Compiled defs keyed by def name.
#[derive(Debug, Default, Clone)]
pub struct DefDatabase {
    effects: BTreeMap<String, EffectDef>,
    abilities: BTreeMap<String, AbilityDef>,
    characters: BTreeMap<String, CharacterDef>,
}

impl DefDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_effect(&mut self, def: EffectDef) {
        self.effects.insert(def.def_name.clone(), def);
    }

    pub fn insert_ability(&mut self, def: AbilityDef) {
        self.abilities.insert(def.class_name.clone(), def);
    }

    pub fn insert_character(&mut self, def: CharacterDef) {
        self.characters.insert(def.def_name.clone(), def);
    }

    pub fn effect(&self, name: &str) -> Option<&EffectDef> {
        self.effects.get(name)
    }

    pub fn ability(&self, name: &str) -> Option<&AbilityDef> {
        self.abilities.get(name)
    }

    pub fn character(&self, name: &str) -> Option<&CharacterDef> {
        self.characters.get(name)
    }

    pub fn effects(&self) -> impl Iterator<Item = &EffectDef> {
        self.effects.values()
    }

    pub fn characters(&self) -> impl Iterator<Item = &CharacterDef> {
        self.characters.values()
    }

    pub fn ability_count(&self) -> usize {
        self.abilities.len()
    }

    /// Ability classes a character grants, in def order. Names without an
    /// `AbilityDef` are left out.
    pub fn ability_catalog(&self, character: &CharacterDef) -> Vec<Rc<dyn GameplayAbility>> {
        character
            .abilities
            .iter()
            .filter_map(|name| self.abilities.get(name))
            .map(|def| Rc::new(def.clone()) as Rc<dyn GameplayAbility>)
            .collect()
    }
}
