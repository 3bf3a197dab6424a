//! Interned string atoms
//!
//! Exception categories, event names, and unknown element tags are compared
//! by identity far more often than they are read, so they are interned once
//! in a process-wide table and carried around as a copyable index.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

static INTERNER: Lazy<RwLock<Interner>> = Lazy::new(|| RwLock::new(Interner::default()));

#[derive(Default)]
struct Interner {
    by_name: HashMap<&'static str, u32>,
    names: Vec<&'static str>,
}

/// A process-unique interned string.
///
/// Equality and hashing are index comparisons; the backing string lives for
/// the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    /// Intern `name`, returning the existing atom if it is already known.
    pub fn intern(name: &str) -> Self {
        {
            let interner = INTERNER.read();
            if let Some(&idx) = interner.by_name.get(name) {
                return Atom(idx);
            }
        }
        let mut interner = INTERNER.write();
        if let Some(&idx) = interner.by_name.get(name) {
            return Atom(idx);
        }
        let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
        let idx = interner.names.len() as u32;
        interner.names.push(leaked);
        interner.by_name.insert(leaked, idx);
        Atom(idx)
    }

    /// Look up an atom without interning; `None` if the string was never seen.
    pub fn try_string(name: &str) -> Option<Self> {
        INTERNER.read().by_name.get(name).map(|&idx| Atom(idx))
    }

    /// The interned string.
    pub fn as_str(&self) -> &'static str {
        INTERNER.read().names[self.0 as usize]
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Atom {
    fn from(name: &str) -> Self {
        Atom::intern(name)
    }
}

impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Atom::intern(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = Atom::intern("badValue");
        let b = Atom::intern("badValue");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "badValue");
    }

    #[test]
    fn distinct_strings_distinct_atoms() {
        assert_ne!(Atom::intern("left"), Atom::intern("right"));
    }

    #[test]
    fn try_string_does_not_intern() {
        assert!(Atom::try_string("never-interned-9f2c").is_none());
        let a = Atom::intern("seen-once");
        assert_eq!(Atom::try_string("seen-once"), Some(a));
    }
}
