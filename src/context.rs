//! Per-task key-value storage for tandem
//!
//! A [`TaskContext`] is owned by exactly one task's façade and carries the
//! state that must never be visible to other tasks: the transaction record
//! and the query-builder snapshot. Components address their slots by
//! `&'static str` keys and store any `Send` value.

use std::any::Any;
use std::collections::HashMap;

/// Task-scoped key-value map.
///
/// Values are type-erased; readers name the type they expect and get
/// `None` on a key miss or a type mismatch.
#[derive(Default)]
pub struct TaskContext {
    slots: HashMap<&'static str, Box<dyn Any + Send>>,
}

impl TaskContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a slot
    pub fn get<T: Any + Send>(&self, key: &'static str) -> Option<&T> {
        self.slots.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Read a slot mutably
    pub fn get_mut<T: Any + Send>(&mut self, key: &'static str) -> Option<&mut T> {
        self.slots.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Read a slot mutably, inserting its default first if absent
    pub fn get_or_default<T: Any + Send + Default>(&mut self, key: &'static str) -> &mut T {
        self.slots
            .entry(key)
            .or_insert_with(|| Box::<T>::default())
            .downcast_mut::<T>()
            .expect("slot type changed under a stable key")
    }

    /// Store a value, replacing whatever the slot held
    pub fn set<T: Any + Send>(&mut self, key: &'static str, value: T) {
        self.slots.insert(key, Box::new(value));
    }

    /// Remove and return a slot's value
    pub fn take<T: Any + Send>(&mut self, key: &'static str) -> Option<T> {
        let boxed = self.slots.remove(key)?;
        match boxed.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(boxed) => {
                // Wrong type requested; put it back untouched.
                self.slots.insert(key, boxed);
                None
            }
        }
    }

    /// Whether the slot exists
    pub fn contains(&self, key: &'static str) -> bool {
        self.slots.contains_key(key)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.slots.keys().collect();
        keys.sort();
        f.debug_struct("TaskContext").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_take() {
        let mut ctx = TaskContext::new();
        ctx.set("counter", 41_u64);

        assert_eq!(ctx.get::<u64>("counter"), Some(&41));
        *ctx.get_mut::<u64>("counter").unwrap() += 1;
        assert_eq!(ctx.take::<u64>("counter"), Some(42));
        assert!(!ctx.contains("counter"));
    }

    #[test]
    fn test_type_mismatch_is_none() {
        let mut ctx = TaskContext::new();
        ctx.set("flag", true);

        assert_eq!(ctx.get::<String>("flag"), None);
        // A mismatched take leaves the slot in place
        assert_eq!(ctx.take::<String>("flag"), None);
        assert_eq!(ctx.get::<bool>("flag"), Some(&true));
    }

    #[test]
    fn test_get_or_default() {
        let mut ctx = TaskContext::new();
        ctx.get_or_default::<Vec<String>>("list").push("a".into());
        ctx.get_or_default::<Vec<String>>("list").push("b".into());

        assert_eq!(ctx.get::<Vec<String>>("list").map(Vec::len), Some(2));
    }

    #[test]
    fn test_contexts_are_disjoint() {
        let mut a = TaskContext::new();
        let mut b = TaskContext::new();
        a.set("model", "read");
        b.set("model", "write");

        assert_eq!(a.get::<&str>("model"), Some(&"read"));
        assert_eq!(b.get::<&str>("model"), Some(&"write"));
    }
}
