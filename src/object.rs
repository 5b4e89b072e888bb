use super::table::Table;
use super::value::Value;
use std::rc::Rc;

/// The only heap object variant this language has. Bytes are owned so a
/// string outlives the source it was scanned from once it has been interned.
pub struct ObjString {
    pub bytes: Vec<u8>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = fnv1a_hash(&bytes);
        Self { bytes, hash }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).expect("interned string bytes are always valid utf-8")
    }
}

/// 32-bit FNV-1a, matching the hash the string table probes by.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// The VM's string heap: a `Table` for content-based dedup, paired with the
/// registry of every live string object it has handed out. The compiler and
/// the VM share one of these, so a constant interned at compile time and one
/// built by runtime concatenation carry the same identity when they match.
pub struct StringInterner {
    table: Table,
    objects: Vec<Rc<ObjString>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            table: Table::new(),
            objects: Vec::new(),
        }
    }

    pub fn intern(&mut self, bytes: Vec<u8>) -> Rc<ObjString> {
        let hash = fnv1a_hash(&bytes);
        if let Some(existing) = self.table.find_string(&bytes, hash) {
            return existing;
        }
        let interned = Rc::new(ObjString::new(bytes));
        self.table.set(Rc::clone(&interned), Value::Nil);
        self.objects.push(Rc::clone(&interned));
        interned
    }

    /// Number of distinct strings currently interned.
    pub fn len(&self) -> usize {
        self.objects.len()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_hash_the_same() {
        let a = ObjString::new(b"hi".to_vec());
        let b = ObjString::new(b"hi".to_vec());
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn different_bytes_usually_hash_differently() {
        let a = ObjString::new(b"hi".to_vec());
        let b = ObjString::new(b"bye".to_vec());
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn interning_the_same_bytes_twice_returns_the_same_object() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"hi".to_vec());
        let b = interner.intern(b"hi".to_vec());
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn interning_distinct_bytes_grows_the_registry() {
        let mut interner = StringInterner::new();
        interner.intern(b"hi".to_vec());
        interner.intern(b"bye".to_vec());
        assert_eq!(interner.len(), 2);
    }
}
