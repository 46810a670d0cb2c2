use std::mem;

use tracing::{debug, info, warn};

use crate::attributes::AttributeChange;
use crate::entity::{EntityId, LifeState};
use crate::host::{MontagePlayer, MovementBody};
use crate::lifecycle::{AbilityLifecycle, LifecycleTarget};
use crate::notifications::AttributeObserver;
use crate::observer::{ListenerToken, Observers};
use crate::tags::{native_tags, TagContainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterDied {
    pub entity: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathOutcome {
    AwaitingMontage,
    Finished,
    Ignored(LifeState),
}

/// Everything the death sequence touches besides the controller itself.
pub struct DeathContext<'a> {
    pub target: LifecycleTarget<'a>,
    pub lifecycle: &'a AbilityLifecycle,
    pub body: &'a mut dyn MovementBody,
    pub montage_player: &'a mut dyn MontagePlayer,
}

/// Alive -> Dying -> Dead state machine for one character.
#[derive(Debug, Default)]
pub struct DeathController {
    state: LifeState,
    death_montage: Option<String>,
    died: Observers<CharacterDied>,
}

impl DeathController {
    pub fn new(death_montage: Option<String>) -> Self {
        Self {
            state: LifeState::Alive,
            death_montage,
            died: Observers::default(),
        }
    }

    pub fn state(&self) -> LifeState {
        self.state
    }

    pub fn death_montage(&self) -> Option<&str> {
        self.death_montage.as_deref()
    }

    pub fn on_character_died(
        &mut self,
        listener: impl FnMut(&CharacterDied) + 'static,
    ) -> ListenerToken {
        self.died.add(listener)
    }

    pub fn remove_character_died_listener(&mut self, token: ListenerToken) -> bool {
        self.died.remove(token)
    }

    /// Runs the death sequence. Only an `Alive` character can start dying;
    /// any later call is ignored.
    pub fn die(&mut self, context: DeathContext<'_>) -> DeathOutcome {
        let DeathContext {
            target,
            lifecycle,
            body,
            montage_player,
        } = context;
        let entity = target.entity;
        if self.state != LifeState::Alive {
            debug!(entity = %entity, state = self.state.as_token(), "die_ignored");
            return DeathOutcome::Ignored(self.state);
        }
        self.state = LifeState::Dying;
        info!(entity = %entity, "character_dying");

        lifecycle.revoke(target);

        body.disable_collision();
        body.set_gravity_scale(0.0);
        body.set_velocity([0.0; 3]);

        let listeners = self.died.broadcast(&CharacterDied { entity });
        info!(entity = %entity, listeners, "character_died");

        let ability_system = target.ability_system;
        if ability_system.is_valid() {
            let tags = native_tags();
            ability_system.cancel_all_abilities();
            let removed =
                ability_system.remove_active_effects_with_tags(&TagContainer::single(tags.remove_on_death));
            ability_system.add_loose_tag(tags.dead);
            debug!(entity = %entity, removed_effects = removed, "death_tags_applied");
        }

        let Some(montage) = self.death_montage.clone() else {
            return self.finish_dying(entity);
        };
        if montage_player.play_montage(&montage) {
            debug!(entity = %entity, montage, "death_montage_started");
            return DeathOutcome::AwaitingMontage;
        }
        warn!(entity = %entity, montage, "death_montage_failed_to_start");
        self.finish_dying(entity)
    }

    /// Completion callback for the death montage.
    pub fn on_montage_completed(&mut self, entity: EntityId) -> DeathOutcome {
        self.finish_dying(entity)
    }

    pub fn finish_dying(&mut self, entity: EntityId) -> DeathOutcome {
        if self.state != LifeState::Dying {
            debug!(entity = %entity, state = self.state.as_token(), "finish_dying_ignored");
            return DeathOutcome::Ignored(self.state);
        }
        self.state = LifeState::Dead;
        info!(entity = %entity, "character_dead");
        DeathOutcome::Finished
    }
}

/// Collects entities whose health dropped to zero or below so the owner can
/// run `die` outside notification dispatch.
#[derive(Debug, Default)]
pub struct DeathQueue {
    pending: Vec<EntityId>,
}

impl DeathQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entity: EntityId) {
        if !self.pending.contains(&entity) {
            self.pending.push(entity);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> Vec<EntityId> {
        mem::take(&mut self.pending)
    }
}

impl AttributeObserver for DeathQueue {
    fn health_changed(&mut self, entity: EntityId, change: &AttributeChange) {
        if change.old_value > 0.0 && change.new_value <= 0.0 {
            debug!(entity = %entity, health = change.new_value, "lethal_health_observed");
            self.push(entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::ability::{AbilityDef, GameplayAbility};
    use crate::ability_system::{AbilitySystemComponent, AbilitySystemRef, SharedAbilitySystem};
    use crate::attributes::{shared_attribute_set, AttributeKind, AttributeSet, AttributeStoreRef, SharedAttributeSet};
    use crate::content::{DurationPolicy, EffectDef};
    use crate::entity::NetRole;
    use crate::host::memory::{KinematicBody, MemoryAbilityBackend, MontageQueue};
    use crate::lifecycle::GrantOutcome;

    struct Fixture {
        _system: SharedAbilitySystem,
        _attributes: SharedAttributeSet,
        ability_system: AbilitySystemRef,
        attribute_store: AttributeStoreRef,
        body: Rc<RefCell<KinematicBody>>,
        montages: MontageQueue,
        lifecycle: AbilityLifecycle,
    }

    impl Fixture {
        fn new(catalog: &[&str]) -> Self {
            let mut backend = MemoryAbilityBackend::default();
            let mut buff = EffectDef::new("GE_Buff");
            buff.duration = DurationPolicy::Infinite;
            buff.asset_tags = TagContainer::single(native_tags().remove_on_death);
            backend.register_effect(buff);
            let attributes = shared_attribute_set(AttributeSet::new().with(AttributeKind::Health, 10.0));
            let system =
                AbilitySystemComponent::new(EntityId(1), Box::new(backend), Rc::clone(&attributes))
                    .into_shared();
            let catalog = catalog
                .iter()
                .map(|name| Rc::new(AbilityDef::new(*name)) as Rc<dyn GameplayAbility>)
                .collect();
            Self {
                ability_system: AbilitySystemRef::new(&system),
                attribute_store: AttributeStoreRef::new(&attributes),
                _system: system,
                _attributes: attributes,
                body: Rc::new(RefCell::new(KinematicBody::default())),
                montages: MontageQueue::default(),
                lifecycle: AbilityLifecycle::new(catalog),
            }
        }

        fn target(&self) -> LifecycleTarget<'_> {
            LifecycleTarget {
                entity: EntityId(1),
                role: NetRole::Authority,
                ability_system: &self.ability_system,
                attributes: &self.attribute_store,
            }
        }

        fn die(&mut self, controller: &mut DeathController) -> DeathOutcome {
            let mut body = Rc::clone(&self.body);
            let context = DeathContext {
                target: LifecycleTarget {
                    entity: EntityId(1),
                    role: NetRole::Authority,
                    ability_system: &self.ability_system,
                    attributes: &self.attribute_store,
                },
                lifecycle: &self.lifecycle,
                body: &mut body,
                montage_player: &mut self.montages,
            };
            controller.die(context)
        }
    }

    #[test]
    fn empty_catalog_without_montage_dies_synchronously() {
        let mut fixture = Fixture::new(&[]);
        let mut controller = DeathController::new(None);

        assert_eq!(fixture.die(&mut controller), DeathOutcome::Finished);
        assert_eq!(controller.state(), LifeState::Dead);
        assert!(fixture.ability_system.activatable_abilities().is_empty());
        assert!(fixture.ability_system.has_matching_tag(native_tags().dead));
        assert!(fixture.montages.played().is_empty());
    }

    #[test]
    fn revoke_and_body_shutdown_precede_broadcast_and_montage() {
        let mut fixture = Fixture::new(&["GA_Fire", "GA_Dash"]);
        assert!(matches!(
            fixture.lifecycle.grant(fixture.target()),
            GrantOutcome::Granted(_)
        ));
        let mut controller = DeathController::new(Some("AM_Death".to_string()));

        let observed = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&observed);
        let asc = fixture.ability_system.clone();
        let body = Rc::clone(&fixture.body);
        controller.on_character_died(move |event| {
            let body = body.borrow();
            sink.borrow_mut().push((
                event.entity,
                asc.activatable_abilities().len(),
                body.collision_enabled(),
                body.gravity_scale(),
            ));
        });

        assert_eq!(fixture.die(&mut controller), DeathOutcome::AwaitingMontage);
        assert_eq!(*observed.borrow(), vec![(EntityId(1), 0, false, 0.0)]);
        assert_eq!(fixture.montages.played(), ["AM_Death".to_string()]);
        assert_eq!(controller.state(), LifeState::Dying);

        assert_eq!(
            controller.on_montage_completed(EntityId(1)),
            DeathOutcome::Finished
        );
        assert_eq!(controller.state(), LifeState::Dead);
        assert_eq!(
            controller.on_montage_completed(EntityId(1)),
            DeathOutcome::Ignored(LifeState::Dead)
        );
    }

    #[test]
    fn second_die_call_is_ignored() {
        let mut fixture = Fixture::new(&[]);
        let mut controller = DeathController::new(Some("AM_Death".to_string()));
        let broadcasts = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&broadcasts);
        controller.on_character_died(move |_| *sink.borrow_mut() += 1);

        fixture.die(&mut controller);
        assert_eq!(
            fixture.die(&mut controller),
            DeathOutcome::Ignored(LifeState::Dying)
        );
        assert_eq!(*broadcasts.borrow(), 1);
        assert_eq!(fixture.montages.played().len(), 1);
    }

    #[test]
    fn death_removes_tagged_effects_and_zeroes_velocity() {
        let mut fixture = Fixture::new(&[]);
        let spec = fixture
            .ability_system
            .make_outgoing_spec(
                "GE_Buff",
                1.0,
                fixture.ability_system.make_effect_context().expect("bound"),
            )
            .expect("known effect");
        assert!(fixture.ability_system.apply_spec_to_self(&spec).is_some());
        fixture.body.borrow_mut().set_velocity([3.0, 0.0, -9.8]);

        let mut controller = DeathController::new(None);
        fixture.die(&mut controller);

        assert_eq!(fixture.ability_system.active_effect_count(), 0);
        assert_eq!(fixture.body.borrow().velocity(), [0.0; 3]);
    }

    #[test]
    fn death_queue_collects_lethal_health_transitions_once() {
        let mut queue = DeathQueue::new();
        let lethal = AttributeChange {
            attribute: AttributeKind::Health,
            old_value: 5.0,
            new_value: -1.0,
        };
        let already_dead = AttributeChange {
            attribute: AttributeKind::Health,
            old_value: -1.0,
            new_value: -4.0,
        };
        let mana_drop = AttributeChange {
            attribute: AttributeKind::Mana,
            old_value: 5.0,
            new_value: 0.0,
        };
        queue.attribute_changed(EntityId(2), &lethal);
        queue.attribute_changed(EntityId(2), &already_dead);
        queue.attribute_changed(EntityId(2), &mana_drop);
        queue.attribute_changed(EntityId(2), &lethal);

        assert_eq!(queue.drain(), vec![EntityId(2)]);
        assert!(queue.is_empty());
    }
}
