//! Keyspace: databases and the value objects they hold.
//!
//! A database is three dicts: the keyspace proper (key to object), the
//! expires table (key to unix-ms deadline) and the watch registry (key to
//! sessions that WATCHed it). Objects wrap one concrete container each; set
//! values start as a packed integer set and convert one-way to a hash table
//! when a non-integer member arrives or the integer set outgrows the
//! configured threshold.

use crate::dict::Dict;
use crate::intset::IntSet;
use crate::packlist::PackList;
use crate::server::SessionId;

pub type Key = Vec<u8>;

/// A value in the keyspace.
pub enum Object {
    Str(Vec<u8>),
    List(PackList),
    /// Set of integers, packed.
    IntSet(IntSet),
    /// Set after conversion; members are the keys.
    HashSet(Dict<Key, ()>),
    Hash(Dict<Key, Vec<u8>>),
}

impl Object {
    /// Wire-level type name, as reported by TYPE.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Str(_) => "string",
            Object::List(_) => "list",
            Object::IntSet(_) | Object::HashSet(_) => "set",
            Object::Hash(_) => "hash",
        }
    }

    /// Cardinality of a set object.
    pub fn set_len(&self) -> usize {
        match self {
            Object::IntSet(is) => is.len(),
            Object::HashSet(d) => d.len(),
            _ => 0,
        }
    }
}

/// One database.
pub struct Db {
    pub dict: Dict<Key, Object>,
    /// Unix-ms deadlines for volatile keys.
    pub expires: Dict<Key, u64>,
    /// key -> sessions to invalidate when it changes.
    pub watched: Dict<Key, Vec<SessionId>>,
}

impl Default for Db {
    fn default() -> Self {
        Db::new()
    }
}

impl Db {
    pub fn new() -> Db {
        Db {
            dict: Dict::new(),
            expires: Dict::new(),
            watched: Dict::new(),
        }
    }

    /// Remove a key and its expire; reports whether it existed.
    pub fn remove_key(&mut self, key: &Key) -> bool {
        let existed = self.dict.delete(key).is_some();
        if existed {
            self.expires.delete(key);
        }
        existed
    }

    /// Expire deadline for `key`, if any.
    pub fn expire_at(&mut self, key: &Key) -> Option<u64> {
        self.expires.get(key).copied()
    }

    /// Whether `key` has an expire in the past. Does not delete.
    pub fn is_expired(&mut self, key: &Key, now_ms: u64) -> bool {
        match self.expires.get(key) {
            Some(&at) => at <= now_ms,
            None => false,
        }
    }

    /// Drop every key, expire and nothing else (watch registrations
    /// survive a flush so the flush itself can invalidate them).
    pub fn clear_keyspace(&mut self) {
        self.dict.clear();
        self.expires.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(Object::Str(vec![]).type_name(), "string");
        assert_eq!(Object::List(PackList::new()).type_name(), "list");
        assert_eq!(Object::IntSet(IntSet::new()).type_name(), "set");
        assert_eq!(Object::HashSet(Dict::new()).type_name(), "set");
        assert_eq!(Object::Hash(Dict::new()).type_name(), "hash");
    }

    #[test]
    fn remove_key_clears_expire() {
        let mut db = Db::new();
        db.dict.add(b"k".to_vec(), Object::Str(b"v".to_vec()));
        db.expires.add(b"k".to_vec(), 12345);
        assert!(db.remove_key(&b"k".to_vec()));
        assert!(db.expires.get(&b"k".to_vec()).is_none());
        assert!(!db.remove_key(&b"k".to_vec()));
    }

    #[test]
    fn expiry_check_is_inclusive() {
        let mut db = Db::new();
        db.dict.add(b"k".to_vec(), Object::Str(vec![]));
        db.expires.add(b"k".to_vec(), 1_000);
        assert!(!db.is_expired(&b"k".to_vec(), 999));
        assert!(db.is_expired(&b"k".to_vec(), 1_000));
        assert!(db.is_expired(&b"k".to_vec(), 1_001));
    }
}
