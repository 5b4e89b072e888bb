use super::object::ObjString;
use super::value::Value;
use std::rc::Rc;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
struct Entry {
    key: Option<Rc<ObjString>>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Self {
            key: None,
            value: Value::Nil,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

/// Open-addressed, linear-probed table keyed by interned-string identity.
/// Used both for globals (key -> value) and, via `find_string`, as the
/// string intern set itself (where the "value" side is unused).
pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[Entry], key: &Rc<ObjString>) -> usize {
        let capacity = entries.len();
        let mut index = (key.hash as usize) % capacity;
        let mut tombstone: Option<usize> = None;

        loop {
            let entry = &entries[index];
            match &entry.key {
                Some(k) if Rc::ptr_eq(k, key) => return index,
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries: Vec<Entry> = (0..capacity).map(|_| Entry::empty()).collect();

        let mut live = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&entries, &key);
                entries[index] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                live += 1;
            }
        }

        self.entries = entries;
        self.count = live;
    }

    /// Returns `true` if `key` was not already present.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if self.count + 1 > (self.capacity() as f64 * MAX_LOAD) as usize {
            let new_capacity = grow_capacity(self.capacity());
            self.adjust_capacity(new_capacity);
        }

        let index = Self::find_entry(&self.entries, &key);
        let is_new_key = self.entries[index].key.is_none();

        // Reusing a tombstone still counts as "new" here, matching the
        // upstream table: count tracks occupied slots (including old
        // tombstones), not live entries, so it never has to decrease.
        if is_new_key {
            self.count += 1;
        }

        self.entries[index] = Entry {
            key: Some(key),
            value,
        };

        is_new_key
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, key);
        self.entries[index].key.as_ref()?;
        Some(self.entries[index].value.clone())
    }

    pub fn contains(&self, key: &Rc<ObjString>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, key);
        self.entries[index].key.is_some()
    }

    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.entries.is_empty() {
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

    /// Looks a string up by content rather than identity — the one place
    /// the table is probed without already holding an `Rc` to the key.
    pub fn find_string(&self, bytes: &[u8], hash: u32) -> Option<Rc<ObjString>> {
        if self.entries.is_empty() {
            return None;
        }

        let capacity = self.capacity();
        let mut index = (hash as usize) % capacity;

        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None if !entry.is_tombstone() => return None,
                Some(key) if key.hash == hash && key.bytes == bytes => return Some(Rc::clone(key)),
                _ => {}
            }
            index = (index + 1) % capacity;
        }
    }
}

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> Rc<ObjString> {
        Rc::new(ObjString::new(bytes.to_vec()))
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut table = Table::new();
        let k = key(b"x");
        assert!(table.set(Rc::clone(&k), Value::Number(1.0)));
        assert_eq!(table.get(&k), Some(Value::Number(1.0)));
    }

    #[test]
    fn set_on_existing_key_overwrites_and_reports_not_new() {
        let mut table = Table::new();
        let k = key(b"x");
        table.set(Rc::clone(&k), Value::Number(1.0));
        let is_new = table.set(Rc::clone(&k), Value::Number(2.0));
        assert!(!is_new);
        assert_eq!(table.get(&k), Some(Value::Number(2.0)));
    }

    #[test]
    fn delete_then_get_misses_but_probe_chain_survives() {
        let mut table = Table::new();
        let a = key(b"a");
        let b = key(b"b");
        table.set(Rc::clone(&a), Value::Number(1.0));
        table.set(Rc::clone(&b), Value::Number(2.0));
        assert!(table.delete(&a));
        assert_eq!(table.get(&a), None);
        assert_eq!(table.get(&b), Some(Value::Number(2.0)));
    }

    #[test]
    fn grows_past_the_load_factor_and_keeps_every_live_entry() {
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..200 {
            let k = key(format!("key{i}").as_bytes());
            table.set(Rc::clone(&k), Value::Number(i as f64));
            keys.push(k);
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.get(k), Some(Value::Number(i as f64)));
        }
        assert!(table.capacity() * 3 / 4 >= keys.len());
    }

    #[test]
    fn find_string_locates_by_content() {
        let mut table = Table::new();
        let k = key(b"hello");
        table.set(Rc::clone(&k), Value::Nil);
        let found = table.find_string(b"hello", k.hash).unwrap();
        assert!(Rc::ptr_eq(&found, &k));
        assert!(table.find_string(b"nope", fnv1a_hash_for_test(b"nope")).is_none());
    }

    fn fnv1a_hash_for_test(bytes: &[u8]) -> u32 {
        super::super::object::fnv1a_hash(bytes)
    }
}
