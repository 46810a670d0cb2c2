use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

const ATTRIBUTE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    Health,
    MaxHealth,
    Mana,
    MaxMana,
    Level,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; ATTRIBUTE_COUNT] = [
        AttributeKind::Health,
        AttributeKind::MaxHealth,
        AttributeKind::Mana,
        AttributeKind::MaxMana,
        AttributeKind::Level,
    ];

    fn index(self) -> usize {
        match self {
            Self::Health => 0,
            Self::MaxHealth => 1,
            Self::Mana => 2,
            Self::MaxMana => 3,
            Self::Level => 4,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::Health => "Health",
            Self::MaxHealth => "MaxHealth",
            Self::Mana => "Mana",
            Self::MaxMana => "MaxMana",
            Self::Level => "Level",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_token().eq_ignore_ascii_case(token.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: AttributeKind,
    pub old_value: f32,
    pub new_value: f32,
}

/// Vital stats of one entity.
///
/// Values are stored as given. Keeping current values inside `[0, max]` is the
/// job of whatever applies modifiers, not of the set itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    values: [f32; ATTRIBUTE_COUNT],
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: AttributeKind) -> f32 {
        self.values[kind.index()]
    }

    pub fn set(&mut self, kind: AttributeKind, value: f32) {
        self.values[kind.index()] = value;
    }

    pub fn with(mut self, kind: AttributeKind, value: f32) -> Self {
        self.set(kind, value);
        self
    }

    /// Attributes whose value differs from `previous`, in `AttributeKind::ALL` order.
    pub fn diff(&self, previous: &AttributeSet) -> Vec<AttributeChange> {
        AttributeKind::ALL
            .into_iter()
            .filter_map(|attribute| {
                let old_value = previous.get(attribute);
                let new_value = self.get(attribute);
                (old_value.to_bits() != new_value.to_bits()).then_some(AttributeChange {
                    attribute,
                    old_value,
                    new_value,
                })
            })
            .collect()
    }
}

pub type SharedAttributeSet = Rc<RefCell<AttributeSet>>;

pub fn shared_attribute_set(initial: AttributeSet) -> SharedAttributeSet {
    Rc::new(RefCell::new(initial))
}

/// Non-owning handle to an entity's attribute set.
///
/// Reads return `0.0` and writes are dropped while the handle is unbound, the
/// set has been destroyed, or the set is mid-mutation.
#[derive(Debug, Clone, Default)]
pub struct AttributeStoreRef {
    inner: Weak<RefCell<AttributeSet>>,
}

impl AttributeStoreRef {
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn new(store: &SharedAttributeSet) -> Self {
        Self {
            inner: Rc::downgrade(store),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn get(&self, kind: AttributeKind) -> f32 {
        self.snapshot()
            .map(|attributes| attributes.get(kind))
            .unwrap_or(0.0)
    }

    pub fn set(&self, kind: AttributeKind, value: f32) -> bool {
        let Some(store) = self.inner.upgrade() else {
            return false;
        };
        let Ok(mut attributes) = store.try_borrow_mut() else {
            return false;
        };
        attributes.set(kind, value);
        true
    }

    pub fn snapshot(&self) -> Option<AttributeSet> {
        let store = self.inner.upgrade()?;
        let attributes = store.try_borrow().ok()?;
        Some(*attributes)
    }
}
