use std::fmt;
use std::rc::Rc;

use tracing::{debug, info};

use crate::ability::{AbilityLevelResolver, ConstantAbilityLevel, GameplayAbility};
use crate::ability_system::AbilitySystemRef;
use crate::attributes::AttributeStoreRef;
use crate::entity::{EntityId, NetRole};
use crate::host::{AbilityGrant, AbilityHandle};

/// The entity-side view the lifecycle steps need: who, with which authority,
/// and which components it can currently reach.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleTarget<'a> {
    pub entity: EntityId,
    pub role: NetRole,
    pub ability_system: &'a AbilitySystemRef,
    pub attributes: &'a AttributeStoreRef,
}

/// Why a gated lifecycle step did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSkip {
    NoAuthority,
    AbilitySystemUnbound,
    AttributesUnbound,
    AlreadyGiven,
    NotGiven,
    AlreadyApplied,
}

impl LifecycleSkip {
    pub fn as_token(self) -> &'static str {
        match self {
            Self::NoAuthority => "no_authority",
            Self::AbilitySystemUnbound => "ability_system_unbound",
            Self::AttributesUnbound => "attributes_unbound",
            Self::AlreadyGiven => "already_given",
            Self::NotGiven => "not_given",
            Self::AlreadyApplied => "already_applied",
        }
    }
}

impl fmt::Display for LifecycleSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted(Vec<AbilityHandle>),
    Skipped(LifecycleSkip),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked(Vec<AbilityHandle>),
    Skipped(LifecycleSkip),
}

/// Grants and revokes a fixed ability catalog at most once per grant cycle.
pub struct AbilityLifecycle {
    catalog: Vec<Rc<dyn GameplayAbility>>,
    level_resolver: Box<dyn AbilityLevelResolver>,
}

impl fmt::Debug for AbilityLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes: Vec<&str> = self.catalog.iter().map(|entry| entry.class_name()).collect();
        f.debug_struct("AbilityLifecycle")
            .field("catalog", &classes)
            .finish_non_exhaustive()
    }
}

impl AbilityLifecycle {
    pub fn new(catalog: Vec<Rc<dyn GameplayAbility>>) -> Self {
        Self {
            catalog,
            level_resolver: Box::new(ConstantAbilityLevel::default()),
        }
    }

    pub fn with_level_resolver(mut self, resolver: impl AbilityLevelResolver + 'static) -> Self {
        self.level_resolver = Box::new(resolver);
        self
    }

    pub fn set_level_resolver(&mut self, resolver: Box<dyn AbilityLevelResolver>) {
        self.level_resolver = resolver;
    }

    pub fn catalog(&self) -> &[Rc<dyn GameplayAbility>] {
        &self.catalog
    }

    pub fn ability_level(&self, entry: &dyn GameplayAbility) -> u32 {
        self.level_resolver.ability_level(entry.ability_id())
    }

    pub fn grant(&self, target: LifecycleTarget<'_>) -> GrantOutcome {
        if let Some(skip) = grant_gate(&target) {
            debug!(entity = %target.entity, reason = %skip, "ability_grant_skipped");
            return GrantOutcome::Skipped(skip);
        }

        let ability_system = target.ability_system;
        let mut handles = Vec::with_capacity(self.catalog.len());
        for entry in &self.catalog {
            let handle = ability_system.give_ability(AbilityGrant {
                class_name: entry.class_name().to_string(),
                level: self.ability_level(entry.as_ref()),
                input_id: entry.input_id(),
                source: target.entity,
                ability_tags: entry.ability_tags(),
            });
            if !handle.is_valid() {
                debug!(
                    entity = %target.entity,
                    ability = entry.class_name(),
                    "ability_grant_refused"
                );
                continue;
            }
            if ability_system.avatar().is_some() {
                if let Some(spec) = ability_system.ability_spec(handle) {
                    entry.on_avatar_assigned(&spec, ability_system);
                }
            }
            handles.push(handle);
        }
        ability_system.set_character_abilities_given(true);

        info!(entity = %target.entity, granted = handles.len(), "abilities_granted");
        GrantOutcome::Granted(handles)
    }

    /// Revokes grants whose source is the target entity and whose class is in
    /// the catalog. Other grants on the same endpoint are left alone.
    pub fn revoke(&self, target: LifecycleTarget<'_>) -> RevokeOutcome {
        if let Some(skip) = revoke_gate(&target) {
            debug!(entity = %target.entity, reason = %skip, "ability_revoke_skipped");
            return RevokeOutcome::Skipped(skip);
        }

        let ability_system = target.ability_system;
        let to_revoke: Vec<AbilityHandle> = ability_system
            .activatable_abilities()
            .into_iter()
            .filter(|spec| spec.source == target.entity && self.contains_class(&spec.class_name))
            .map(|spec| spec.handle)
            .collect();

        for handle in &to_revoke {
            ability_system.clear_ability(*handle);
        }
        ability_system.set_character_abilities_given(false);

        info!(entity = %target.entity, revoked = to_revoke.len(), "abilities_revoked");
        RevokeOutcome::Revoked(to_revoke)
    }

    fn contains_class(&self, class_name: &str) -> bool {
        self.catalog
            .iter()
            .any(|entry| entry.class_name() == class_name)
    }
}

fn grant_gate(target: &LifecycleTarget<'_>) -> Option<LifecycleSkip> {
    if !target.role.has_authority() {
        return Some(LifecycleSkip::NoAuthority);
    }
    if !target.ability_system.is_valid() {
        return Some(LifecycleSkip::AbilitySystemUnbound);
    }
    if !target.attributes.is_valid() {
        return Some(LifecycleSkip::AttributesUnbound);
    }
    if target.ability_system.character_abilities_given() {
        return Some(LifecycleSkip::AlreadyGiven);
    }
    None
}

fn revoke_gate(target: &LifecycleTarget<'_>) -> Option<LifecycleSkip> {
    if !target.role.has_authority() {
        return Some(LifecycleSkip::NoAuthority);
    }
    if !target.ability_system.is_valid() {
        return Some(LifecycleSkip::AbilitySystemUnbound);
    }
    if !target.ability_system.character_abilities_given() {
        return Some(LifecycleSkip::NotGiven);
    }
    None
}
