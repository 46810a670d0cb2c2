use std::fmt;
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerToken(u64);

/// Publisher-owned list of listeners for one event type.
///
/// Listeners run synchronously inside `broadcast`. No ordering between
/// listeners is promised.
pub struct Observers<E> {
    next_token: u64,
    listeners: Vec<(ListenerToken, Box<dyn FnMut(&E)>)>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self {
            next_token: 0,
            listeners: Vec::new(),
        }
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}

impl<E> Observers<E> {
    pub fn add(&mut self, listener: impl FnMut(&E) + 'static) -> ListenerToken {
        let token = ListenerToken(self.next_token);
        self.next_token = self.next_token.saturating_add(1);
        self.listeners.push((token, Box::new(listener)));
        token
    }

    pub fn remove(&mut self, token: ListenerToken) -> bool {
        let before_len = self.listeners.len();
        self.listeners
            .retain(|(listener_token, _)| *listener_token != token);
        self.listeners.len() != before_len
    }

    pub fn contains(&self, token: ListenerToken) -> bool {
        self.listeners
            .iter()
            .any(|(listener_token, _)| *listener_token == token)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Returns how many listeners saw the event.
    pub fn broadcast(&mut self, event: &E) -> usize {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
        self.listeners.len()
    }

    /// Moves the listeners out. `self` keeps allocating tokens after theirs.
    pub(crate) fn take_listeners(&mut self) -> Observers<E> {
        Observers {
            next_token: self.next_token,
            listeners: mem::take(&mut self.listeners),
        }
    }

    pub(crate) fn tokens(&self) -> Vec<ListenerToken> {
        self.listeners.iter().map(|(token, _)| *token).collect()
    }

    /// Moves listeners registered on `other` into `self`, keeping their tokens.
    pub(crate) fn absorb(&mut self, other: Observers<E>) {
        self.next_token = self.next_token.max(other.next_token);
        self.listeners.extend(other.listeners);
    }
}
