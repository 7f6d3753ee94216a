use std::collections::HashSet;

/// Source of held-key state for the manually driven car.
pub trait InputState: Send {
    /// True when any of the logical `keys` is currently held.
    fn is_any_key_down(&self, keys: &[String]) -> bool;
}

/// Input source with nothing ever held.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl InputState for NoInput {
    fn is_any_key_down(&self, _keys: &[String]) -> bool {
        false
    }
}

/// Set of currently held logical keys, fed by the host.
#[derive(Debug, Default, Clone)]
pub struct KeySet {
    held: HashSet<String>,
}

impl KeySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, key: impl Into<String>) {
        self.held.insert(key.into());
    }

    pub fn release(&mut self, key: &str) {
        self.held.remove(key);
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}

impl InputState for KeySet {
    fn is_any_key_down(&self, keys: &[String]) -> bool {
        keys.iter().any(|key| self.held.contains(key))
    }
}
