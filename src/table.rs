//! Open-addressed hash table keyed by interned-string identity, with linear
//! probing and tombstones. Backs both the VM's globals and its string
//! interning set — the same structure, just two separate instances.

use crate::value::{Obj, Value};
use std::rc::Rc;

const MAX_LOAD: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

struct Entry {
    key: Option<Rc<Obj>>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: None,
            value: Value::Nil,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Probes for `key`'s slot starting at `hash mod cap`. An empty (non-
    /// tombstone) slot always terminates the probe; a tombstone is
    /// remembered and returned only if no exact match follows it.
    fn find_entry(entries: &[Entry], key: &Rc<Obj>) -> usize {
        let cap = entries.len();
        let mut index = (key.as_string().hash as usize) % cap;
        let mut tombstone: Option<usize> = None;

        loop {
            let entry = &entries[index];
            match &entry.key {
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if Rc::ptr_eq(k, key) => return index,
                Some(_) => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn adjust_capacity(&mut self, new_capacity: usize) {
        let mut new_entries: Vec<Entry> = (0..new_capacity).map(|_| Entry::empty()).collect();

        let mut count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&new_entries, &key);
                new_entries[index] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                count += 1;
            }
        }

        self.entries = new_entries;
        self.count = count;
    }

    /// Sets `key` to `value`, growing first if the load factor would
    /// exceed 0.75. Returns `true` if `key` was not previously present
    /// (a fresh slot, not a tombstone reuse).
    pub fn set(&mut self, key: Rc<Obj>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let new_capacity = if self.capacity() < INITIAL_CAPACITY {
                INITIAL_CAPACITY
            } else {
                self.capacity() * 2
            };
            self.adjust_capacity(new_capacity);
        }

        let index = Self::find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        if is_new_key && matches!(entry.value, Value::Nil) {
            self.count += 1;
        }

        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: &Rc<Obj>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key);
        let entry = &self.entries[index];
        entry.key.as_ref().map(|_| entry.value.clone())
    }

    pub fn contains_key(&self, key: &Rc<Obj>) -> bool {
        self.get(key).is_some()
    }

    /// Marks `key`'s slot a tombstone. Count is left unchanged, matching
    /// the convention that tombstones still occupy probe-chain space.
    pub fn delete(&mut self, key: &Rc<Obj>) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry {
            key: None,
            value: Value::Bool(true),
        };
        true
    }

    /// By-contents lookup for interning: probes identically to
    /// `find_entry` but compares raw bytes since no `Rc<Obj>` for the
    /// candidate exists yet.
    pub fn find_string(&self, bytes: &str, hash: u32) -> Option<Rc<Obj>> {
        if self.count == 0 {
            return None;
        }
        let cap = self.capacity();
        let mut index = (hash as usize) % cap;

        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key) => {
                    let s = key.as_string();
                    if s.hash == hash && s.bytes == bytes {
                        return Some(Rc::clone(key));
                    }
                }
            }
            index = (index + 1) % cap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{fnv1a_hash, LoxString};

    fn string(bytes: &str) -> Rc<Obj> {
        Rc::new(Obj::String(LoxString {
            bytes: bytes.to_string(),
            hash: fnv1a_hash(bytes.as_bytes()),
        }))
    }

    #[test]
    fn get_returns_last_set_value_for_distinct_keys() {
        let mut table = Table::new();
        let keys: Vec<_> = (0..40).map(|i| string(&format!("key{i}"))).collect();
        for (i, key) in keys.iter().enumerate() {
            table.set(Rc::clone(key), Value::Number(i as f64));
        }
        for (i, key) in keys.iter().enumerate() {
            assert!(matches!(table.get(key), Some(Value::Number(n)) if n == i as f64));
        }
    }

    #[test]
    fn load_factor_never_exceeds_three_quarters() {
        let mut table = Table::new();
        for i in 0..100 {
            table.set(string(&format!("k{i}")), Value::Nil);
            assert!(table.count as f64 <= table.capacity() as f64 * MAX_LOAD);
        }
    }

    #[test]
    fn delete_then_reinsert_reuses_tombstone_without_breaking_probe_chain() {
        let mut table = Table::new();
        let a = string("a");
        let b = string("b");
        table.set(Rc::clone(&a), Value::Number(1.0));
        table.set(Rc::clone(&b), Value::Number(2.0));
        table.delete(&a);
        assert!(table.get(&b).is_some());
        table.set(Rc::clone(&a), Value::Number(3.0));
        assert!(matches!(table.get(&a), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn find_string_matches_by_contents_not_identity() {
        let mut table = Table::new();
        let key = string("hello");
        table.set(Rc::clone(&key), Value::Nil);
        let hash = fnv1a_hash(b"hello");
        let found = table.find_string("hello", hash).expect("should find by contents");
        assert!(Rc::ptr_eq(&found, &key));
        assert!(table.find_string("goodbye", fnv1a_hash(b"goodbye")).is_none());
    }

    #[test]
    fn updates_do_not_increment_count() {
        let mut table = Table::new();
        let key = string("x");
        assert!(table.set(Rc::clone(&key), Value::Number(1.0)));
        assert_eq!(table.count, 1);
        assert!(!table.set(Rc::clone(&key), Value::Number(2.0)));
        assert_eq!(table.count, 1);
    }
}
