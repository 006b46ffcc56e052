use std::{any::Any, sync::Mutex};

use rustc_hash::FxHashMap;

use crate::{
    base::{locked, warn},
    value::Value,
};

/// Process-local attribute values, keyed like the persistence store.
///
/// Values written by the eager pass for attributes nobody declared stay
/// encoded until the first typed read decodes them.
#[derive(Default)]
pub struct LocalStore {
    cells: Mutex<FxHashMap<String, LocalCell>>,
}

enum LocalCell {
    Value(Box<dyn Any + Send + Sync>),
    Encoded { value_tag: String, payload: String },
}

// Implementations

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read; seeds the cell on first access.
    pub fn get_or_init<T: Value>(
        &self,
        key: &str,
        seed: impl FnOnce() -> T,
        decode: impl FnOnce(&str) -> anyhow::Result<T>,
    ) -> T {
        let encoded = {
            let mut cells = locked(&self.cells);

            if let Some(LocalCell::Value(value)) = cells.get(key) {
                if let Some(value) = value.downcast_ref::<T>() {
                    return value.clone();
                }
            }

            match cells.remove(key) {
                Some(LocalCell::Encoded { value_tag, payload }) => Some((value_tag, payload)),
                Some(LocalCell::Value(_)) => {
                    warn!(key, "local value holds another type, reseeding");
                    None
                }
                None => None,
            }
        };

        // Decoding may resolve references, so it runs without the lock.
        let value = match encoded {
            Some((value_tag, payload)) if value_tag == T::type_tag() => {
                decode(&payload).unwrap_or_else(|err| {
                    warn!(key, %err, "failed to decode local value, reseeding");
                    seed()
                })
            }
            Some((value_tag, _)) => {
                warn!(
                    key,
                    value_tag = %value_tag,
                    expected = %T::type_tag(),
                    "local value type changed, reseeding"
                );
                seed()
            }
            None => seed(),
        };

        self.set(key, value.clone());
        value
    }

    pub fn get<T: Value>(&self, key: &str) -> Option<T> {
        match locked(&self.cells).get(key)? {
            LocalCell::Value(value) => value.downcast_ref::<T>().cloned(),
            LocalCell::Encoded { .. } => None,
        }
    }

    pub fn set<T: Value>(&self, key: &str, value: T) {
        locked(&self.cells).insert(key.to_owned(), LocalCell::Value(Box::new(value)));
    }

    pub fn put_encoded(&self, key: &str, value_tag: &str, payload: &str) {
        locked(&self.cells).insert(
            key.to_owned(),
            LocalCell::Encoded {
                value_tag: value_tag.to_owned(),
                payload: payload.to_owned(),
            },
        );
    }

    pub fn is_encoded(&self, key: &str) -> bool {
        matches!(locked(&self.cells).get(key), Some(LocalCell::Encoded { .. }))
    }

    pub fn contains(&self, key: &str) -> bool {
        locked(&self.cells).contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        locked(&self.cells).remove(key).is_some()
    }

    pub fn clear(&self) {
        locked(&self.cells).clear();
    }

    pub fn len(&self) -> usize {
        locked(&self.cells).len()
    }

    pub fn is_empty(&self) -> bool {
        locked(&self.cells).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never(_: &str) -> anyhow::Result<i32> {
        anyhow::bail!("not encoded")
    }

    #[test]
    fn test_seeds_once() {
        let locals = LocalStore::new();

        assert_eq!(locals.get_or_init("Hero:a:xp:i32", || 5, never), 5);
        locals.set("Hero:a:xp:i32", 9);
        assert_eq!(locals.get_or_init("Hero:a:xp:i32", || 5, never), 9);
    }

    #[test]
    fn test_encoded_cell_decodes_on_first_read() {
        let locals = LocalStore::new();
        locals.put_encoded("Hero:a:xp:i32", "i32", "42");
        assert!(locals.is_encoded("Hero:a:xp:i32"));
        assert_eq!(locals.get::<i32>("Hero:a:xp:i32"), None);

        let value =
            locals.get_or_init("Hero:a:xp:i32", || 0, |payload| Ok(payload.parse::<i32>()?));

        assert_eq!(value, 42);
        assert!(!locals.is_encoded("Hero:a:xp:i32"));
        assert_eq!(locals.get::<i32>("Hero:a:xp:i32"), Some(42));
    }

    #[test]
    fn test_encoded_cell_of_other_type_reseeds() {
        let locals = LocalStore::new();
        locals.put_encoded("Hero:a:xp:i32", "string", "abc");

        assert_eq!(locals.get_or_init("Hero:a:xp:i32", || 7, never), 7);
    }

    #[test]
    fn test_undecodable_cell_reseeds() {
        let locals = LocalStore::new();
        locals.put_encoded("Hero:a:xp:i32", "i32", "abc");

        let value =
            locals.get_or_init("Hero:a:xp:i32", || 3, |payload| Ok(payload.parse::<i32>()?));

        assert_eq!(value, 3);
        assert_eq!(locals.len(), 1);
    }
}
