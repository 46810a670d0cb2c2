use thiserror::Error;
use tracing::{debug, error, info};

use crate::attributes::AttributeKind;
use crate::entity::EntityId;
use crate::host::{ActiveEffectHandle, EffectContext};
use crate::lifecycle::{LifecycleSkip, LifecycleTarget};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeInitError {
    #[error("missing default attributes for {character} ({entity}); set default_attributes on its CharacterDef")]
    MissingDefaultAttributes { entity: EntityId, character: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    Applied {
        handles: Vec<ActiveEffectHandle>,
        skipped_invalid: usize,
    },
    Skipped(LifecycleSkip),
}

/// Default-attribute template plus the effects every spawn starts with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupEffects {
    default_attributes: Option<String>,
    startup_effects: Vec<String>,
}

impl StartupEffects {
    pub fn new(default_attributes: Option<String>, startup_effects: Vec<String>) -> Self {
        Self {
            default_attributes,
            startup_effects,
        }
    }

    pub fn default_attributes(&self) -> Option<&str> {
        self.default_attributes.as_deref()
    }

    pub fn startup_effects(&self) -> &[String] {
        &self.startup_effects
    }

    /// Applies the default-attributes effect at the entity's current level.
    ///
    /// Runs regardless of authority so simulated copies can seed their
    /// values too. Returns `Ok(None)` when nothing could be applied.
    pub fn initialize_attributes(
        &self,
        target: LifecycleTarget<'_>,
        character: &str,
    ) -> Result<Option<ActiveEffectHandle>, AttributeInitError> {
        if !target.ability_system.is_valid() || !target.attributes.is_valid() {
            debug!(entity = %target.entity, "attribute_init_skipped_unbound");
            return Ok(None);
        }
        let Some(default_attributes) = self.default_attributes.as_deref() else {
            error!(
                entity = %target.entity,
                character,
                "missing default attributes; fill in default_attributes on the character def"
            );
            return Err(AttributeInitError::MissingDefaultAttributes {
                entity: target.entity,
                character: character.to_string(),
            });
        };

        let Some(context) = source_context(&target) else {
            return Ok(None);
        };
        let level = target.attributes.get(AttributeKind::Level);
        let Some(spec) = target
            .ability_system
            .make_outgoing_spec(default_attributes, level, context)
        else {
            debug!(
                entity = %target.entity,
                effect = default_attributes,
                "attribute_init_invalid_spec"
            );
            return Ok(None);
        };
        let handle = target.ability_system.apply_spec_to_self(&spec);
        info!(entity = %target.entity, effect = default_attributes, level, "attributes_initialized");
        Ok(handle)
    }

    pub fn apply_startup_catalog(&self, target: LifecycleTarget<'_>) -> StartupOutcome {
        if !target.role.has_authority() {
            return skipped(&target, LifecycleSkip::NoAuthority);
        }
        if !target.ability_system.is_valid() {
            return skipped(&target, LifecycleSkip::AbilitySystemUnbound);
        }
        if target.ability_system.startup_effects_applied() {
            return skipped(&target, LifecycleSkip::AlreadyApplied);
        }
        let Some(context) = source_context(&target) else {
            return skipped(&target, LifecycleSkip::AbilitySystemUnbound);
        };

        let level = target.attributes.get(AttributeKind::Level);
        let mut handles = Vec::with_capacity(self.startup_effects.len());
        let mut skipped_invalid = 0;
        for effect in &self.startup_effects {
            let Some(spec) = target
                .ability_system
                .make_outgoing_spec(effect, level, context)
            else {
                debug!(entity = %target.entity, effect, "startup_effect_skipped_invalid_spec");
                skipped_invalid += 1;
                continue;
            };
            if let Some(handle) = target.ability_system.apply_spec_to_self(&spec) {
                handles.push(handle);
            }
        }
        target.ability_system.set_startup_effects_applied(true);

        info!(
            entity = %target.entity,
            applied = handles.len(),
            skipped_invalid,
            "startup_effects_applied"
        );
        StartupOutcome::Applied {
            handles,
            skipped_invalid,
        }
    }
}

fn source_context(target: &LifecycleTarget<'_>) -> Option<EffectContext> {
    target
        .ability_system
        .make_effect_context()
        .map(|context| context.with_source_object(target.entity))
}

fn skipped(target: &LifecycleTarget<'_>, skip: LifecycleSkip) -> StartupOutcome {
    debug!(entity = %target.entity, reason = %skip, "startup_effects_skipped");
    StartupOutcome::Skipped(skip)
}
