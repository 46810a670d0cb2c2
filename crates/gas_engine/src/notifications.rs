use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info};

use crate::ability_system::{AbilitySystemRef, SubscriptionToken};
use crate::attributes::{AttributeChange, AttributeKind};
use crate::entity::EntityId;
use crate::tags::{native_tags, TagContainer};

/// Receiver for the attribute changes a hub is subscribed to.
///
/// Override the per-attribute hooks for UI or gameplay reactions; the
/// defaults only log.
pub trait AttributeObserver {
    fn attribute_changed(&mut self, entity: EntityId, change: &AttributeChange) {
        match change.attribute {
            AttributeKind::Health => self.health_changed(entity, change),
            AttributeKind::MaxHealth => self.max_health_changed(entity, change),
            AttributeKind::Mana => self.mana_changed(entity, change),
            AttributeKind::MaxMana => self.max_mana_changed(entity, change),
            AttributeKind::Level => self.character_level_changed(entity, change),
        }
    }

    fn health_changed(&mut self, entity: EntityId, change: &AttributeChange) {
        log_change(entity, change);
    }

    fn max_health_changed(&mut self, entity: EntityId, change: &AttributeChange) {
        log_change(entity, change);
    }

    fn mana_changed(&mut self, entity: EntityId, change: &AttributeChange) {
        log_change(entity, change);
    }

    fn max_mana_changed(&mut self, entity: EntityId, change: &AttributeChange) {
        log_change(entity, change);
    }

    fn character_level_changed(&mut self, entity: EntityId, change: &AttributeChange) {
        log_change(entity, change);
    }
}

fn log_change(entity: EntityId, change: &AttributeChange) {
    debug!(
        entity = %entity,
        attribute = change.attribute.as_token(),
        old_value = change.old_value,
        new_value = change.new_value,
        "attribute_changed"
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAttributeObserver;

impl AttributeObserver for LoggingAttributeObserver {}

/// Detects the transition of a tag count from zero to positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StunEdge {
    previous: u32,
}

impl StunEdge {
    pub fn starting_at(count: u32) -> Self {
        Self { previous: count }
    }

    /// Records `new_count` and reports whether it is a rising edge.
    pub fn observe(&mut self, new_count: u32) -> bool {
        let rising = self.previous == 0 && new_count > 0;
        self.previous = new_count;
        rising
    }
}

/// Wires attribute and stun-tag subscriptions for one entity.
///
/// Binding happens at most once; tokens are released on `release` or drop.
#[derive(Debug, Default)]
pub struct ChangeNotificationHub {
    entity: Option<EntityId>,
    ability_system: AbilitySystemRef,
    attribute_tokens: Vec<SubscriptionToken>,
    stun_token: Option<SubscriptionToken>,
}

impl ChangeNotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.entity.is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.attribute_tokens.len() + usize::from(self.stun_token.is_some())
    }

    /// Returns false when already bound or when the endpoint is unbound.
    pub fn bind(
        &mut self,
        ability_system: &AbilitySystemRef,
        observer: Rc<RefCell<dyn AttributeObserver>>,
    ) -> bool {
        if self.is_bound() {
            return false;
        }
        let Some(entity) = ability_system.owner() else {
            debug!("notification_hub_bind_skipped_unbound");
            return false;
        };

        for attribute in AttributeKind::ALL {
            let observer = Rc::clone(&observer);
            let token = ability_system.subscribe_attribute(attribute, move |change| {
                if let Ok(mut observer) = observer.try_borrow_mut() {
                    observer.attribute_changed(entity, change);
                }
            });
            self.attribute_tokens.extend(token);
        }

        let tags = native_tags();
        let mut edge = StunEdge::starting_at(ability_system.tag_count(tags.stun));
        let canceller = ability_system.clone();
        self.stun_token = ability_system.subscribe_tag(tags.stun, move |change| {
            if !edge.observe(change.new_count) {
                return;
            }
            let canceled = canceller.cancel_abilities(
                Some(&TagContainer::single(tags.ability)),
                Some(&TagContainer::single(tags.not_canceled_by_stun)),
            );
            info!(entity = %entity, canceled, "stun_canceled_abilities");
        });

        self.entity = Some(entity);
        self.ability_system = ability_system.clone();
        info!(entity = %entity, subscriptions = self.subscription_count(), "notification_hub_bound");
        true
    }

    pub fn release(&mut self) {
        for token in self.attribute_tokens.drain(..) {
            self.ability_system.unsubscribe(token);
        }
        if let Some(token) = self.stun_token.take() {
            self.ability_system.unsubscribe(token);
        }
        if let Some(entity) = self.entity.take() {
            debug!(entity = %entity, "notification_hub_released");
        }
    }
}

impl Drop for ChangeNotificationHub {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::AbilityId;
    use crate::ability_system::{AbilitySystemComponent, SharedAbilitySystem};
    use crate::attributes::{shared_attribute_set, AttributeSet, SharedAttributeSet};
    use crate::host::memory::MemoryAbilityBackend;
    use crate::host::AbilityGrant;

    #[derive(Default)]
    struct Recorder {
        changes: Vec<(EntityId, AttributeKind, f32)>,
    }

    impl AttributeObserver for Recorder {
        fn attribute_changed(&mut self, entity: EntityId, change: &AttributeChange) {
            self.changes.push((entity, change.attribute, change.new_value));
        }
    }

    fn endpoint() -> (SharedAbilitySystem, SharedAttributeSet, AbilitySystemRef) {
        let attributes = shared_attribute_set(AttributeSet::new());
        let system = AbilitySystemComponent::new(
            EntityId(5),
            Box::new(MemoryAbilityBackend::default()),
            Rc::clone(&attributes),
        )
        .into_shared();
        let handle = AbilitySystemRef::new(&system);
        (system, attributes, handle)
    }

    fn grant_active(asc: &AbilitySystemRef, class_name: &str, tags: &[&str]) {
        let handle = asc.give_ability(AbilityGrant {
            class_name: class_name.to_string(),
            level: 1,
            input_id: AbilityId::None,
            source: EntityId(5),
            ability_tags: TagContainer::from_names(tags.iter().copied()),
        });
        assert!(asc.try_activate_ability(handle));
    }

    fn active_classes(asc: &AbilitySystemRef) -> Vec<String> {
        asc.activatable_abilities()
            .into_iter()
            .filter(|spec| spec.is_active)
            .map(|spec| spec.class_name)
            .collect()
    }

    #[test]
    fn stun_edge_fires_only_from_zero() {
        let mut edge = StunEdge::default();
        let fired: Vec<bool> = [1, 2, 1, 0, 3].into_iter().map(|count| edge.observe(count)).collect();
        assert_eq!(fired, vec![true, false, false, false, true]);
    }

    #[test]
    fn bound_hub_forwards_attribute_changes() {
        let (_system, _attributes, asc) = endpoint();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let mut hub = ChangeNotificationHub::new();
        assert!(hub.bind(&asc, recorder.clone()));
        assert!(!hub.bind(&asc, recorder.clone()));
        assert_eq!(hub.subscription_count(), 6);

        asc.set_numeric_attribute_base(AttributeKind::MaxMana, 50.0);
        asc.set_numeric_attribute_base(AttributeKind::Level, 2.0);

        assert_eq!(
            recorder.borrow().changes,
            vec![
                (EntityId(5), AttributeKind::MaxMana, 50.0),
                (EntityId(5), AttributeKind::Level, 2.0),
            ]
        );

        hub.release();
        asc.set_numeric_attribute_base(AttributeKind::Level, 3.0);
        assert_eq!(recorder.borrow().changes.len(), 2);
    }

    #[test]
    fn stun_sequence_cancels_exactly_once() {
        let (_system, _attributes, asc) = endpoint();
        let mut hub = ChangeNotificationHub::new();
        hub.bind(&asc, Rc::new(RefCell::new(LoggingAttributeObserver)));
        let stun = native_tags().stun;

        grant_active(&asc, "GA_Fireball", &["Ability.Skill.Fireball"]);
        asc.add_loose_tag(stun);
        assert!(active_classes(&asc).is_empty());

        grant_active(&asc, "GA_Meteor", &["Ability.Skill.Meteor"]);
        asc.add_loose_tag(stun);
        asc.remove_loose_tag(stun);
        asc.remove_loose_tag(stun);
        assert_eq!(active_classes(&asc), vec!["GA_Meteor".to_string()]);
    }

    #[test]
    fn stun_spares_abilities_marked_not_canceled() {
        let (_system, _attributes, asc) = endpoint();
        let mut hub = ChangeNotificationHub::new();
        hub.bind(&asc, Rc::new(RefCell::new(LoggingAttributeObserver)));

        grant_active(&asc, "GA_Fireball", &["Ability.Skill.Fireball"]);
        grant_active(&asc, "GA_Passive", &["Ability.NoCanceledByStun"]);
        grant_active(&asc, "GA_Untagged", &[]);
        asc.add_loose_tag(native_tags().stun);

        assert_eq!(
            active_classes(&asc),
            vec!["GA_Passive".to_string(), "GA_Untagged".to_string()]
        );
    }

    #[test]
    fn bind_on_unbound_endpoint_does_nothing() {
        let mut hub = ChangeNotificationHub::new();
        assert!(!hub.bind(
            &AbilitySystemRef::unbound(),
            Rc::new(RefCell::new(LoggingAttributeObserver))
        ));
        assert!(!hub.is_bound());
        assert_eq!(hub.subscription_count(), 0);
    }
}
