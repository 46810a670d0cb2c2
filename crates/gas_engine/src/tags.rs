use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub const DEAD_TAG: &str = "State.Dead";
pub const REMOVE_ON_DEATH_TAG: &str = "State.RemoveOnDeath";
pub const STUN_TAG: &str = "State.Debuff.Stun";
pub const ABILITY_TAG: &str = "Ability";
pub const NOT_CANCELED_BY_STUN_TAG: &str = "Ability.NoCanceledByStun";

static REGISTRY: OnceLock<RwLock<TagRegistry>> = OnceLock::new();
static REGISTRY_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_registry_lock_poison_once(operation: &'static str) {
    if REGISTRY_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "tag registry lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Default)]
struct TagRegistry {
    ids_by_name: HashMap<String, GameplayTag>,
    names: Vec<String>,
    parents: Vec<Option<GameplayTag>>,
}

impl TagRegistry {
    fn lookup(&self, name: &str) -> Option<GameplayTag> {
        self.ids_by_name.get(name).copied()
    }

    fn register(&mut self, name: &str) -> GameplayTag {
        if let Some(existing) = self.lookup(name) {
            return existing;
        }
        let parent = name
            .rsplit_once('.')
            .map(|(parent_name, _)| self.register(parent_name));
        let tag = GameplayTag(self.names.len() as u32);
        self.names.push(name.to_string());
        self.parents.push(parent);
        self.ids_by_name.insert(name.to_string(), tag);
        tag
    }

    fn parent_of(&self, tag: GameplayTag) -> Option<GameplayTag> {
        self.parents.get(tag.0 as usize).copied().flatten()
    }
}

fn registry() -> &'static RwLock<TagRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(TagRegistry::default()))
}

fn read_registry() -> RwLockReadGuard<'static, TagRegistry> {
    match registry().read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn_registry_lock_poison_once("read");
            poisoned.into_inner()
        }
    }
}

fn write_registry() -> RwLockWriteGuard<'static, TagRegistry> {
    match registry().write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn_registry_lock_poison_once("write");
            poisoned.into_inner()
        }
    }
}

/// Interned hierarchical label such as `State.Debuff.Stun`.
///
/// Tags are registered process-wide on first request and never removed, so a
/// tag value stays valid for the lifetime of the process. Requesting a child
/// also registers every ancestor (`State.Debuff`, `State`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GameplayTag(u32);

impl GameplayTag {
    pub fn request(name: &str) -> Self {
        let name = name.trim();
        if let Some(tag) = read_registry().lookup(name) {
            return tag;
        }
        write_registry().register(name)
    }

    pub fn name(self) -> String {
        read_registry()
            .names
            .get(self.0 as usize)
            .cloned()
            .unwrap_or_default()
    }

    /// True when `self` equals `other` or is one of its descendants.
    pub fn matches(self, other: GameplayTag) -> bool {
        let registry = read_registry();
        let mut current = Some(self);
        while let Some(tag) = current {
            if tag == other {
                return true;
            }
            current = registry.parent_of(tag);
        }
        false
    }

    pub fn parent(self) -> Option<GameplayTag> {
        read_registry().parent_of(self)
    }
}

impl fmt::Display for GameplayTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagContainer {
    tags: BTreeSet<GameplayTag>,
}

impl TagContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(tag: GameplayTag) -> Self {
        let mut container = Self::new();
        container.insert(tag);
        container
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names.into_iter().map(GameplayTag::request).collect()
    }

    pub fn insert(&mut self, tag: GameplayTag) -> bool {
        self.tags.insert(tag)
    }

    pub fn remove(&mut self, tag: GameplayTag) -> bool {
        self.tags.remove(&tag)
    }

    pub fn contains_exact(&self, tag: GameplayTag) -> bool {
        self.tags.contains(&tag)
    }

    /// True when any member is `tag` or a descendant of it.
    pub fn has_tag(&self, tag: GameplayTag) -> bool {
        self.tags.iter().any(|member| member.matches(tag))
    }

    pub fn has_any(&self, other: &TagContainer) -> bool {
        other.iter().any(|tag| self.has_tag(tag))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = GameplayTag> + '_ {
        self.tags.iter().copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(GameplayTag::name).collect()
    }
}

impl FromIterator<GameplayTag> for TagContainer {
    fn from_iter<I: IntoIterator<Item = GameplayTag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

/// Tags the coordinator relies on, resolved once on first use.
#[derive(Debug, Clone, Copy)]
pub struct NativeTags {
    pub dead: GameplayTag,
    pub remove_on_death: GameplayTag,
    pub stun: GameplayTag,
    pub ability: GameplayTag,
    pub not_canceled_by_stun: GameplayTag,
}

pub fn native_tags() -> &'static NativeTags {
    static NATIVE: OnceLock<NativeTags> = OnceLock::new();
    NATIVE.get_or_init(|| NativeTags {
        dead: GameplayTag::request(DEAD_TAG),
        remove_on_death: GameplayTag::request(REMOVE_ON_DEATH_TAG),
        stun: GameplayTag::request(STUN_TAG),
        ability: GameplayTag::request(ABILITY_TAG),
        not_canceled_by_stun: GameplayTag::request(NOT_CANCELED_BY_STUN_TAG),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requesting_same_name_returns_same_tag() {
        let first = GameplayTag::request("Test.Registry.Same");
        let second = GameplayTag::request(" Test.Registry.Same ");
        assert_eq!(first, second);
        assert_eq!(first.name(), "Test.Registry.Same");
    }

    #[test]
    fn child_matches_parent_but_not_reverse() {
        let child = GameplayTag::request("Test.Hierarchy.Child");
        let parent = GameplayTag::request("Test.Hierarchy");
        let root = GameplayTag::request("Test");

        assert!(child.matches(parent));
        assert!(child.matches(root));
        assert!(!parent.matches(child));
        assert_eq!(child.parent(), Some(parent));
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn sibling_with_shared_prefix_does_not_match() {
        let abilities = GameplayTag::request("Test.Ability");
        let lookalike = GameplayTag::request("Test.AbilityLike");
        assert!(!lookalike.matches(abilities));
    }

    #[test]
    fn container_queries_are_hierarchical() {
        let container = TagContainer::from_names(["Test.Query.Skill.Dash", "Test.Other"]);
        assert!(container.has_tag(GameplayTag::request("Test.Query")));
        assert!(container.has_tag(GameplayTag::request("Test.Query.Skill.Dash")));
        assert!(!container.contains_exact(GameplayTag::request("Test.Query")));
        assert!(!container.has_tag(GameplayTag::request("Test.Query.Skill.Blink")));

        let filter = TagContainer::from_names(["Test.Missing", "Test.Other"]);
        assert!(container.has_any(&filter));
        assert!(!container.has_any(&TagContainer::new()));
    }

    #[test]
    fn native_tags_resolve_to_well_known_names() {
        let tags = native_tags();
        assert_eq!(tags.dead.name(), DEAD_TAG);
        assert_eq!(tags.remove_on_death.name(), REMOVE_ON_DEATH_TAG);
        assert_eq!(tags.stun.name(), STUN_TAG);
        assert!(tags.not_canceled_by_stun.matches(tags.ability));
    }
}
