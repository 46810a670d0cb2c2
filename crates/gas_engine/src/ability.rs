use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ability_system::AbilitySystemRef;
use crate::host::AbilitySpec;
use crate::tags::TagContainer;

/// Identifiers shared by ability ids and input bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbilityId {
    #[default]
    None,
    Confirm,
    Cancel,
}

impl AbilityId {
    pub fn as_token(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Confirm => "Confirm",
            Self::Cancel => "Cancel",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "None" => Some(Self::None),
            "Confirm" => Some(Self::Confirm),
            "Cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    pub fn input_index(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Confirm => 1,
            Self::Cancel => 2,
        }
    }
}

impl fmt::Display for AbilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// A grantable ability class.
pub trait GameplayAbility {
    fn class_name(&self) -> &str;

    fn ability_id(&self) -> AbilityId {
        AbilityId::None
    }

    fn input_id(&self) -> AbilityId {
        AbilityId::None
    }

    fn activate_on_granted(&self) -> bool {
        false
    }

    fn ability_tags(&self) -> TagContainer {
        TagContainer::new()
    }

    /// Called after a grant once the endpoint has an avatar. Passive
    /// abilities activate themselves here.
    fn on_avatar_assigned(&self, spec: &AbilitySpec, ability_system: &AbilitySystemRef) {
        if self.activate_on_granted() {
            ability_system.try_activate_ability(spec.handle);
        }
    }
}

/// Data-driven ability class loaded from content defs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbilityDef {
    pub class_name: String,
    pub ability_id: AbilityId,
    pub input_id: AbilityId,
    pub activate_on_granted: bool,
    pub tags: TagContainer,
}

impl AbilityDef {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ability_id: AbilityId::None,
            input_id: AbilityId::None,
            activate_on_granted: false,
            tags: TagContainer::new(),
        }
    }
}

impl GameplayAbility for AbilityDef {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn ability_id(&self) -> AbilityId {
        self.ability_id
    }

    fn input_id(&self) -> AbilityId {
        self.input_id
    }

    fn activate_on_granted(&self) -> bool {
        self.activate_on_granted
    }

    fn ability_tags(&self) -> TagContainer {
        self.tags.clone()
    }
}

pub trait AbilityLevelResolver {
    fn ability_level(&self, ability_id: AbilityId) -> u32;
}

/// Every ability is granted at the same level. Progression is not modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantAbilityLevel(pub u32);

impl Default for ConstantAbilityLevel {
    fn default() -> Self {
        Self(1)
    }
}

impl AbilityLevelResolver for ConstantAbilityLevel {
    fn ability_level(&self, _ability_id: AbilityId) -> u32 {
        self.0
    }
}

impl<F> AbilityLevelResolver for F
where
    F: Fn(AbilityId) -> u32,
{
    fn ability_level(&self, ability_id: AbilityId) -> u32 {
        self(ability_id)
    }
}
