//! Per-entity ability-system endpoint.
//!
//! The endpoint owns the host backend, the idempotency flags, and the
//! attribute/tag change notification source. It is shared as
//! `Rc<RefCell<AbilitySystemComponent>>` by its owner and reached from
//! everywhere else through [`AbilitySystemRef`], a weak handle whose
//! operations quietly fall back to defaults when the endpoint is gone.
//!
//! Change notifications are queued while the endpoint is borrowed and
//! dispatched after the borrow ends, so handlers are free to call back into
//! the endpoint. Changes raised by those nested calls are drained by the
//! dispatch loop already running.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::attributes::{AttributeChange, AttributeKind, AttributeSet, AttributeStoreRef, SharedAttributeSet};
use crate::entity::EntityId;
use crate::host::{
    AbilityBackend, AbilityGrant, AbilityHandle, AbilitySpec, ActiveEffectHandle, EffectContext,
    EffectSpec,
};
use crate::observer::{ListenerToken, Observers};
use crate::tags::{GameplayTag, TagContainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagCountChange {
    pub tag: GameplayTag,
    pub new_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageReceived {
    pub target: EntityId,
    pub source: Option<EntityId>,
    pub unmitigated: f32,
    pub mitigated: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingChange {
    Attribute(AttributeChange),
    Tag(TagCountChange),
}

type AttributeHandler = Box<dyn FnMut(&AttributeChange)>;
type TagHandler = Box<dyn FnMut(TagCountChange)>;

#[derive(Default)]
struct HandlerTable {
    attribute: Vec<(SubscriptionToken, AttributeKind, AttributeHandler)>,
    tag: Vec<(SubscriptionToken, GameplayTag, TagHandler)>,
}

impl HandlerTable {
    fn remove(&mut self, token: SubscriptionToken) -> bool {
        let before_len = self.attribute.len() + self.tag.len();
        self.attribute.retain(|(entry, _, _)| *entry != token);
        self.tag.retain(|(entry, _, _)| *entry != token);
        before_len != self.attribute.len() + self.tag.len()
    }

    fn dispatch(&mut self, change: PendingChange) {
        match change {
            PendingChange::Attribute(change) => {
                for (_, attribute, handler) in &mut self.attribute {
                    if *attribute == change.attribute {
                        handler(&change);
                    }
                }
            }
            PendingChange::Tag(change) => {
                for (_, tag, handler) in &mut self.tag {
                    if *tag == change.tag {
                        handler(change);
                    }
                }
            }
        }
    }

    fn tokens(&self) -> Vec<SubscriptionToken> {
        self.attribute
            .iter()
            .map(|(token, _, _)| *token)
            .chain(self.tag.iter().map(|(token, _, _)| *token))
            .collect()
    }

    fn absorb(&mut self, other: HandlerTable) {
        self.attribute.extend(other.attribute);
        self.tag.extend(other.tag);
    }
}

#[derive(Default)]
struct NotificationSource {
    next_token: u64,
    handlers: HandlerTable,
    observed_attributes: Option<AttributeSet>,
    observed_tag_counts: BTreeMap<GameplayTag, u32>,
    pending: VecDeque<PendingChange>,
    dispatching: bool,
    in_flight: Vec<SubscriptionToken>,
    released_while_dispatching: Vec<SubscriptionToken>,
}

impl NotificationSource {
    fn alloc_token(&mut self) -> SubscriptionToken {
        self.next_token = self.next_token.saturating_add(1);
        SubscriptionToken(self.next_token)
    }

    /// Queues removal of a handler that is out on dispatch. Only tokens of
    /// handlers still in flight are accepted, each at most once.
    fn release_in_flight(&mut self, token: SubscriptionToken) -> bool {
        if !self.dispatching {
            return false;
        }
        let Some(index) = self.in_flight.iter().position(|entry| *entry == token) else {
            return false;
        };
        self.in_flight.swap_remove(index);
        self.released_while_dispatching.push(token);
        true
    }
}

/// Received-damage listeners plus the bookkeeping that lets a listener be
/// removed while a broadcast has the list checked out.
#[derive(Default)]
struct DamageListeners {
    observers: Observers<DamageReceived>,
    in_flight: Vec<ListenerToken>,
    released_while_broadcasting: Vec<ListenerToken>,
}

impl DamageListeners {
    fn remove(&mut self, token: ListenerToken) -> bool {
        if self.observers.remove(token) {
            return true;
        }
        let Some(index) = self.in_flight.iter().position(|entry| *entry == token) else {
            return false;
        };
        self.in_flight.swap_remove(index);
        self.released_while_broadcasting.push(token);
        true
    }

    fn check_out(&mut self) -> Observers<DamageReceived> {
        let listeners = self.observers.take_listeners();
        self.in_flight.extend(listeners.tokens());
        listeners
    }

    /// Nested broadcasts check in their own listeners only; removals aimed
    /// at an outer broadcast stay queued.
    fn check_in(&mut self, mut listeners: Observers<DamageReceived>) {
        self.released_while_broadcasting
            .retain(|token| !listeners.remove(*token));
        let returning = listeners.tokens();
        self.in_flight.retain(|token| !returning.contains(token));
        let added_during_broadcast = self.observers.take_listeners();
        listeners.absorb(added_during_broadcast);
        self.observers = listeners;
    }
}

pub struct AbilitySystemComponent {
    owner: EntityId,
    avatar: Option<EntityId>,
    backend: Box<dyn AbilityBackend>,
    attributes: SharedAttributeSet,
    character_abilities_given: bool,
    startup_effects_applied: bool,
    notifications: NotificationSource,
    received_damage: DamageListeners,
}

pub type SharedAbilitySystem = Rc<RefCell<AbilitySystemComponent>>;

impl fmt::Debug for AbilitySystemComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilitySystemComponent")
            .field("owner", &self.owner)
            .field("avatar", &self.avatar)
            .field("character_abilities_given", &self.character_abilities_given)
            .field("startup_effects_applied", &self.startup_effects_applied)
            .finish_non_exhaustive()
    }
}

impl AbilitySystemComponent {
    pub fn new(
        owner: EntityId,
        backend: Box<dyn AbilityBackend>,
        attributes: SharedAttributeSet,
    ) -> Self {
        Self {
            owner,
            avatar: None,
            backend,
            attributes,
            character_abilities_given: false,
            startup_effects_applied: false,
            notifications: NotificationSource::default(),
            received_damage: DamageListeners::default(),
        }
    }

    pub fn into_shared(self) -> SharedAbilitySystem {
        Rc::new(RefCell::new(self))
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    pub fn avatar(&self) -> Option<EntityId> {
        self.avatar
    }

    pub fn character_abilities_given(&self) -> bool {
        self.character_abilities_given
    }

    pub fn startup_effects_applied(&self) -> bool {
        self.startup_effects_applied
    }

    pub fn backend(&self) -> &dyn AbilityBackend {
        self.backend.as_ref()
    }

    /// Queues notifications for attribute values and subscribed tag counts
    /// that moved since the last observation.
    fn observe_changes(&mut self) {
        if let Ok(current) = self.attributes.try_borrow() {
            let current = *current;
            if let Some(previous) = self.notifications.observed_attributes.replace(current) {
                for change in current.diff(&previous) {
                    self.notifications
                        .pending
                        .push_back(PendingChange::Attribute(change));
                }
            }
        }

        for (tag, last_count) in self.notifications.observed_tag_counts.iter_mut() {
            let new_count = self.backend.tag_count(*tag);
            if new_count != *last_count {
                *last_count = new_count;
                self.notifications
                    .pending
                    .push_back(PendingChange::Tag(TagCountChange {
                        tag: *tag,
                        new_count,
                    }));
            }
        }
    }

    fn with_attributes<R>(
        &mut self,
        f: impl FnOnce(&mut dyn AbilityBackend, &mut AttributeSet) -> R,
    ) -> Option<R> {
        let mut attributes = self.attributes.try_borrow_mut().ok()?;
        Some(f(self.backend.as_mut(), &mut *attributes))
    }
}

fn dispatch_pending(system: &SharedAbilitySystem) {
    let mut handlers = {
        let Ok(mut asc) = system.try_borrow_mut() else {
            return;
        };
        if asc.notifications.dispatching || asc.notifications.pending.is_empty() {
            return;
        }
        asc.notifications.dispatching = true;
        let handlers = mem::take(&mut asc.notifications.handlers);
        asc.notifications.in_flight = handlers.tokens();
        handlers
    };

    loop {
        let next = {
            let Ok(mut asc) = system.try_borrow_mut() else {
                break;
            };
            for token in mem::take(&mut asc.notifications.released_while_dispatching) {
                handlers.remove(token);
            }
            asc.notifications.pending.pop_front()
        };
        let Some(change) = next else {
            break;
        };
        handlers.dispatch(change);
    }

    if let Ok(mut asc) = system.try_borrow_mut() {
        for token in mem::take(&mut asc.notifications.released_while_dispatching) {
            handlers.remove(token);
        }
        let added_while_dispatching = mem::take(&mut asc.notifications.handlers);
        handlers.absorb(added_while_dispatching);
        asc.notifications.handlers = handlers;
        asc.notifications.in_flight.clear();
        asc.notifications.dispatching = false;
    }
}

/// Weak handle to an ability-system endpoint.
#[derive(Debug, Clone, Default)]
pub struct AbilitySystemRef {
    inner: Weak<RefCell<AbilitySystemComponent>>,
}

impl AbilitySystemRef {
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn new(system: &SharedAbilitySystem) -> Self {
        Self {
            inner: Rc::downgrade(system),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.strong_count() > 0
    }

    fn read<R>(&self, f: impl FnOnce(&AbilitySystemComponent) -> R) -> Option<R> {
        let system = self.inner.upgrade()?;
        let asc = system.try_borrow().ok()?;
        Some(f(&*asc))
    }

    /// Runs a mutation, then observes and dispatches whatever it changed.
    fn mutate<R>(&self, f: impl FnOnce(&mut AbilitySystemComponent) -> R) -> Option<R> {
        let system = self.inner.upgrade()?;
        let result = {
            let Ok(mut asc) = system.try_borrow_mut() else {
                debug!("ability_system_busy_call_dropped");
                return None;
            };
            let result = f(&mut *asc);
            asc.observe_changes();
            result
        };
        dispatch_pending(&system);
        Some(result)
    }

    pub fn owner(&self) -> Option<EntityId> {
        self.read(AbilitySystemComponent::owner)
    }

    pub fn avatar(&self) -> Option<EntityId> {
        self.read(AbilitySystemComponent::avatar).flatten()
    }

    pub fn attribute_store(&self) -> AttributeStoreRef {
        self.read(|asc| AttributeStoreRef::new(&asc.attributes))
            .unwrap_or_default()
    }

    pub fn init_ability_actor_info(&self, owner: EntityId, avatar: EntityId) -> bool {
        self.mutate(|asc| {
            asc.owner = owner;
            asc.avatar = Some(avatar);
        })
        .is_some()
    }

    pub fn character_abilities_given(&self) -> bool {
        self.read(AbilitySystemComponent::character_abilities_given)
            .unwrap_or(false)
    }

    pub fn set_character_abilities_given(&self, given: bool) {
        self.mutate(|asc| asc.character_abilities_given = given);
    }

    pub fn startup_effects_applied(&self) -> bool {
        self.read(AbilitySystemComponent::startup_effects_applied)
            .unwrap_or(false)
    }

    pub fn set_startup_effects_applied(&self, applied: bool) {
        self.mutate(|asc| asc.startup_effects_applied = applied);
    }

    pub fn give_ability(&self, grant: AbilityGrant) -> AbilityHandle {
        self.mutate(|asc| asc.backend.grant_ability(grant))
            .unwrap_or(AbilityHandle::INVALID)
    }

    pub fn clear_ability(&self, handle: AbilityHandle) -> bool {
        self.mutate(|asc| asc.backend.revoke_ability(handle))
            .unwrap_or(false)
    }

    pub fn activatable_abilities(&self) -> Vec<AbilitySpec> {
        self.read(|asc| asc.backend.activatable_abilities())
            .unwrap_or_default()
    }

    pub fn ability_spec(&self, handle: AbilityHandle) -> Option<AbilitySpec> {
        self.activatable_abilities()
            .into_iter()
            .find(|spec| spec.handle == handle)
    }

    pub fn try_activate_ability(&self, handle: AbilityHandle) -> bool {
        self.mutate(|asc| asc.backend.try_activate_ability(handle))
            .unwrap_or(false)
    }

    pub fn cancel_abilities(
        &self,
        with_tags: Option<&TagContainer>,
        without_tags: Option<&TagContainer>,
    ) -> usize {
        self.mutate(|asc| asc.backend.cancel_abilities(with_tags, without_tags))
            .unwrap_or(0)
    }

    pub fn cancel_all_abilities(&self) -> usize {
        self.cancel_abilities(None, None)
    }

    /// Context with the owner as instigator.
    pub fn make_effect_context(&self) -> Option<EffectContext> {
        self.read(|asc| EffectContext::new(asc.owner))
    }

    pub fn make_outgoing_spec(
        &self,
        effect_name: &str,
        level: f32,
        context: EffectContext,
    ) -> Option<EffectSpec> {
        self.read(|asc| asc.backend.make_outgoing_spec(effect_name, level, context))
            .flatten()
    }

    pub fn apply_spec_to_self(&self, spec: &EffectSpec) -> Option<ActiveEffectHandle> {
        self.mutate(|asc| {
            asc.with_attributes(|backend, attributes| backend.apply_spec_to_self(spec, attributes))
        })
        .flatten()
        .flatten()
    }

    pub fn apply_spec_to_target(
        &self,
        spec: &EffectSpec,
        target: &AbilitySystemRef,
    ) -> Option<ActiveEffectHandle> {
        if !self.is_valid() {
            return None;
        }
        target.apply_spec_to_self(spec)
    }

    pub fn remove_active_effects_with_tags(&self, tags: &TagContainer) -> usize {
        self.mutate(|asc| {
            asc.with_attributes(|backend, attributes| {
                backend.remove_active_effects_with_tags(tags, attributes)
            })
        })
        .flatten()
        .unwrap_or(0)
    }

    pub fn active_effect_count(&self) -> usize {
        self.read(|asc| asc.backend.active_effect_count()).unwrap_or(0)
    }

    pub fn add_loose_tag(&self, tag: GameplayTag) {
        self.mutate(|asc| asc.backend.add_loose_tag(tag));
    }

    pub fn remove_loose_tag(&self, tag: GameplayTag) {
        self.mutate(|asc| asc.backend.remove_loose_tag(tag));
    }

    pub fn tag_count(&self, tag: GameplayTag) -> u32 {
        self.read(|asc| asc.backend.tag_count(tag)).unwrap_or(0)
    }

    pub fn has_matching_tag(&self, tag: GameplayTag) -> bool {
        self.tag_count(tag) > 0
    }

    /// Writes an attribute through the endpoint so subscribers hear about it.
    pub fn set_numeric_attribute_base(&self, attribute: AttributeKind, value: f32) -> bool {
        self.mutate(|asc| {
            asc.attributes
                .try_borrow_mut()
                .map(|mut attributes| attributes.set(attribute, value))
                .is_ok()
        })
        .unwrap_or(false)
    }

    pub fn subscribe_attribute(
        &self,
        attribute: AttributeKind,
        handler: impl FnMut(&AttributeChange) + 'static,
    ) -> Option<SubscriptionToken> {
        let system = self.inner.upgrade()?;
        let mut asc = system.try_borrow_mut().ok()?;
        // Writes made before the first listener are not reported.
        let first_listener = asc.notifications.handlers.attribute.is_empty()
            && !asc.notifications.dispatching;
        if first_listener || asc.notifications.observed_attributes.is_none() {
            let current = asc.attributes.try_borrow().map(|attributes| *attributes).ok();
            asc.notifications.observed_attributes = current;
        }
        let token = asc.notifications.alloc_token();
        asc.notifications
            .handlers
            .attribute
            .push((token, attribute, Box::new(handler)));
        Some(token)
    }

    /// The handler receives the tag's new count each time it changes.
    pub fn subscribe_tag(
        &self,
        tag: GameplayTag,
        handler: impl FnMut(TagCountChange) + 'static,
    ) -> Option<SubscriptionToken> {
        let system = self.inner.upgrade()?;
        let mut asc = system.try_borrow_mut().ok()?;
        let current = asc.backend.tag_count(tag);
        asc.notifications
            .observed_tag_counts
            .entry(tag)
            .or_insert(current);
        let token = asc.notifications.alloc_token();
        asc.notifications
            .handlers
            .tag
            .push((token, tag, Box::new(handler)));
        Some(token)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let Some(system) = self.inner.upgrade() else {
            return false;
        };
        let Ok(mut asc) = system.try_borrow_mut() else {
            return false;
        };
        if asc.notifications.handlers.remove(token) {
            return true;
        }
        asc.notifications.release_in_flight(token)
    }

    /// Picks up changes made behind the endpoint's back, such as direct
    /// attribute writes or replicated state, and dispatches them.
    pub fn poll_changes(&self) {
        self.mutate(|_| ());
    }

    pub fn on_received_damage(
        &self,
        listener: impl FnMut(&DamageReceived) + 'static,
    ) -> Option<ListenerToken> {
        let system = self.inner.upgrade()?;
        let mut asc = system.try_borrow_mut().ok()?;
        Some(asc.received_damage.observers.add(listener))
    }

    pub fn remove_received_damage_listener(&self, token: ListenerToken) -> bool {
        let Some(system) = self.inner.upgrade() else {
            return false;
        };
        let Ok(mut asc) = system.try_borrow_mut() else {
            return false;
        };
        asc.received_damage.remove(token)
    }

    /// Broadcasts a damage report to this endpoint's listeners.
    pub fn receive_damage(&self, source: Option<EntityId>, unmitigated: f32, mitigated: f32) -> usize {
        let Some(system) = self.inner.upgrade() else {
            return 0;
        };
        let (target, mut listeners) = {
            let Ok(mut asc) = system.try_borrow_mut() else {
                return 0;
            };
            (asc.owner, asc.received_damage.check_out())
        };
        let notified = listeners.broadcast(&DamageReceived {
            target,
            source,
            unmitigated,
            mitigated,
        });
        if let Ok(mut asc) = system.try_borrow_mut() {
            asc.received_damage.check_in(listeners);
        }
        notified
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::attributes::shared_attribute_set;
    use crate::host::memory::MemoryAbilityBackend;
    use crate::tags::GameplayTag;

    fn endpoint(owner: u64) -> (SharedAbilitySystem, SharedAttributeSet) {
        let attributes = shared_attribute_set(AttributeSet::new());
        let system = AbilitySystemComponent::new(
            EntityId(owner),
            Box::new(MemoryAbilityBackend::default()),
            Rc::clone(&attributes),
        )
        .into_shared();
        (system, attributes)
    }

    #[test]
    fn unbound_ref_falls_back_to_defaults() {
        let unbound = AbilitySystemRef::unbound();
        assert!(!unbound.is_valid());
        assert_eq!(unbound.owner(), None);
        assert!(!unbound.character_abilities_given());
        let grant = AbilityGrant {
            class_name: "GA_Test".to_string(),
            level: 1,
            input_id: crate::ability::AbilityId::None,
            source: EntityId(1),
            ability_tags: TagContainer::new(),
        };
        assert_eq!(unbound.give_ability(grant), AbilityHandle::INVALID);
        assert_eq!(unbound.cancel_all_abilities(), 0);
        assert_eq!(unbound.tag_count(GameplayTag::request("Test.Unbound")), 0);
        assert!(unbound.subscribe_tag(GameplayTag::request("Test.Unbound"), |_| {}).is_none());
        assert!(!unbound.attribute_store().is_valid());
    }

    #[test]
    fn attribute_subscription_sees_base_writes() {
        let (system, _attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        asc.subscribe_attribute(AttributeKind::Health, move |change| {
            sink.borrow_mut().push((change.old_value, change.new_value));
        })
        .expect("subscribe");

        assert!(asc.set_numeric_attribute_base(AttributeKind::Health, 40.0));
        assert!(asc.set_numeric_attribute_base(AttributeKind::Mana, 10.0));
        assert!(asc.set_numeric_attribute_base(AttributeKind::Health, 40.0));

        assert_eq!(*seen.borrow(), vec![(0.0, 40.0)]);
    }

    #[test]
    fn direct_store_writes_are_picked_up_by_poll() {
        let (system, attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        let hits = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&hits);
        asc.subscribe_attribute(AttributeKind::Mana, move |_| *sink.borrow_mut() += 1)
            .expect("subscribe");

        attributes.borrow_mut().set(AttributeKind::Mana, 12.0);
        assert_eq!(*hits.borrow(), 0);
        asc.poll_changes();
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn tag_subscription_reports_each_count_change() {
        let (system, _attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        let tag = GameplayTag::request("Test.Endpoint.Counted");
        let counts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&counts);
        asc.subscribe_tag(tag, move |change| sink.borrow_mut().push(change.new_count))
            .expect("subscribe");

        asc.add_loose_tag(tag);
        asc.add_loose_tag(tag);
        asc.remove_loose_tag(tag);
        asc.remove_loose_tag(tag);

        assert_eq!(*counts.borrow(), vec![1, 2, 1, 0]);
    }

    #[test]
    fn handlers_may_call_back_into_the_endpoint() {
        let (system, _attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        let trigger = GameplayTag::request("Test.Endpoint.Trigger");
        let echo = GameplayTag::request("Test.Endpoint.Echo");
        let echoes = Rc::new(RefCell::new(Vec::new()));

        let reentrant = asc.clone();
        asc.subscribe_tag(trigger, move |change| {
            if change.new_count > 0 {
                reentrant.add_loose_tag(echo);
            }
        })
        .expect("subscribe trigger");
        let sink = Rc::clone(&echoes);
        asc.subscribe_tag(echo, move |change| sink.borrow_mut().push(change.new_count))
            .expect("subscribe echo");

        asc.add_loose_tag(trigger);

        assert_eq!(asc.tag_count(echo), 1);
        assert_eq!(*echoes.borrow(), vec![1]);
    }

    #[test]
    fn unsubscribed_handler_stops_receiving() {
        let (system, _attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        let hits = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&hits);
        let token = asc
            .subscribe_attribute(AttributeKind::Level, move |_| *sink.borrow_mut() += 1)
            .expect("subscribe");

        asc.set_numeric_attribute_base(AttributeKind::Level, 2.0);
        assert!(asc.unsubscribe(token));
        assert!(!asc.unsubscribe(token));
        asc.set_numeric_attribute_base(AttributeKind::Level, 3.0);

        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn received_damage_reaches_listeners_with_owner_as_target() {
        let (system, _attributes) = endpoint(7);
        let asc = AbilitySystemRef::new(&system);
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reports);
        asc.on_received_damage(move |report| sink.borrow_mut().push(*report))
            .expect("listen");

        assert_eq!(asc.receive_damage(Some(EntityId(3)), 30.0, 18.0), 1);
        let reports = reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].target, EntityId(7));
        assert_eq!(reports[0].source, Some(EntityId(3)));
        assert_eq!(reports[0].mitigated, 18.0);
    }

    #[test]
    fn damage_listener_can_remove_itself_mid_broadcast() {
        let (system, _attributes) = endpoint(7);
        let asc = AbilitySystemRef::new(&system);
        let own_token: Rc<RefCell<Option<ListenerToken>>> = Rc::new(RefCell::new(None));
        let removals = Rc::new(RefCell::new(Vec::new()));
        let hits = Rc::new(RefCell::new(0u32));

        let token = {
            let handle = asc.clone();
            let own_token = Rc::clone(&own_token);
            let removals = Rc::clone(&removals);
            let hits = Rc::clone(&hits);
            asc.on_received_damage(move |_| {
                *hits.borrow_mut() += 1;
                if let Some(token) = *own_token.borrow() {
                    removals
                        .borrow_mut()
                        .push(handle.remove_received_damage_listener(token));
                    removals
                        .borrow_mut()
                        .push(handle.remove_received_damage_listener(token));
                }
            })
            .expect("listen")
        };
        *own_token.borrow_mut() = Some(token);

        assert_eq!(asc.receive_damage(None, 5.0, 5.0), 1);
        assert_eq!(asc.receive_damage(None, 5.0, 5.0), 0);

        assert_eq!(*hits.borrow(), 1);
        assert_eq!(*removals.borrow(), vec![true, false]);
        assert!(!asc.remove_received_damage_listener(token));
    }

    #[test]
    fn unsubscribe_during_dispatch_only_accepts_live_tokens() {
        let (system, _attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        let tag = GameplayTag::request("Test.Endpoint.SelfRelease");
        let own_token: Rc<RefCell<Option<SubscriptionToken>>> = Rc::new(RefCell::new(None));
        let results = Rc::new(RefCell::new(Vec::new()));
        let hits = Rc::new(RefCell::new(0u32));

        let stale = asc
            .subscribe_attribute(AttributeKind::Mana, |_| {})
            .expect("subscribe stale");
        assert!(asc.unsubscribe(stale));

        let token = {
            let handle = asc.clone();
            let own_token = Rc::clone(&own_token);
            let results = Rc::clone(&results);
            let hits = Rc::clone(&hits);
            asc.subscribe_tag(tag, move |_| {
                *hits.borrow_mut() += 1;
                let mut results = results.borrow_mut();
                results.push(handle.unsubscribe(SubscriptionToken(999)));
                results.push(handle.unsubscribe(stale));
                if let Some(token) = *own_token.borrow() {
                    results.push(handle.unsubscribe(token));
                    results.push(handle.unsubscribe(token));
                }
            })
            .expect("subscribe")
        };
        *own_token.borrow_mut() = Some(token);

        asc.add_loose_tag(tag);
        asc.add_loose_tag(tag);

        assert_eq!(*hits.borrow(), 1);
        assert_eq!(*results.borrow(), vec![false, false, true, false]);
        assert!(!asc.unsubscribe(token));
    }

    #[test]
    fn late_attribute_subscriber_skips_earlier_writes() {
        let (system, attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        asc.set_character_abilities_given(false);
        attributes.borrow_mut().set(AttributeKind::Health, 50.0);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        asc.subscribe_attribute(AttributeKind::Health, move |change| {
            sink.borrow_mut().push((change.old_value, change.new_value));
        })
        .expect("subscribe");

        asc.add_loose_tag(GameplayTag::request("Test.Endpoint.Unrelated"));
        assert!(seen.borrow().is_empty());

        assert!(asc.set_numeric_attribute_base(AttributeKind::Health, 20.0));
        assert_eq!(*seen.borrow(), vec![(50.0, 20.0)]);
    }

    #[test]
    fn ref_degrades_after_owner_drops_endpoint() {
        let (system, _attributes) = endpoint(1);
        let asc = AbilitySystemRef::new(&system);
        assert_eq!(asc.owner(), Some(EntityId(1)));
        drop(system);
        assert!(!asc.is_valid());
        assert_eq!(asc.owner(), None);
        assert!(asc.activatable_abilities().is_empty());
    }
}
