// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Class identifier: name + 32-bit magic.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};

/// Portable class identity.
///
/// The magic is a pure function of the name (FNV-1a), so two processes that
/// never exchanged type tables still agree on the identity of a class. Two
/// class ids compare equal iff their magics are equal.
#[derive(Debug, Clone, Copy)]
pub struct ClassId {
    name: &'static str,
    magic: u32,
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

const fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

impl ClassId {
    /// Create a class id; the magic is derived from `name` at compile time.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            magic: fnv1a(name.as_bytes()),
        }
    }

    /// Human-readable class name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// 32-bit identity token; this is what travels on the wire.
    pub const fn magic(&self) -> u32 {
        self.magic
    }

    /// A class id with an empty name is the invalid sentinel.
    pub const fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }
}

impl PartialEq for ClassId {
    fn eq(&self, other: &Self) -> bool {
        self.magic == other.magic
    }
}

impl Eq for ClassId {}

impl Hash for ClassId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.magic.hash(state);
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#010x})", self.name, self.magic)
    }
}

/// Name-keyed table of registered classes.
///
/// Distinct names hashing to the same magic would break wire identity; the
/// table detects that at registration time.
static KNOWN_CLASSES: OnceLock<Mutex<HashMap<u32, &'static str>>> = OnceLock::new();

/// Register a class id in the process-wide table.
///
/// Returns `false` (and logs) when a different name already owns this magic.
/// Re-registering the same name is fine and returns `true`.
pub fn register_class(id: ClassId) -> bool {
    let table = KNOWN_CLASSES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut table = match table.lock() {
        Ok(t) => t,
        Err(poisoned) => poisoned.into_inner(),
    };
    match table.get(&id.magic()) {
        Some(existing) if *existing != id.name() => {
            log::error!(
                "class magic collision: '{}' and '{}' both hash to {:#010x}",
                existing,
                id.name(),
                id.magic()
            );
            false
        }
        Some(_) => true,
        None => {
            table.insert(id.magic(), id.name());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_deterministic() {
        let a = ClassId::new("ServiceRequestEvent");
        let b = ClassId::new("ServiceRequestEvent");
        assert_eq!(a.magic(), b.magic());
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_distinct_magic() {
        let a = ClassId::new("ServiceRequestEvent");
        let b = ClassId::new("ServiceResponseEvent");
        assert_ne!(a.magic(), b.magic());
        assert_ne!(a, b);
    }

    #[test]
    fn display_shows_name_and_magic() {
        let id = ClassId::new("Event");
        let shown = id.to_string();
        assert!(shown.starts_with("Event(0x"));
    }

    #[test]
    fn const_magic_matches_runtime_value() {
        const ID: ClassId = ClassId::new("Event");
        assert_eq!(ID.magic(), ClassId::new("Event").magic());
        assert!(ID.is_valid());
        assert!(!ClassId::new("").is_valid());
    }

    #[test]
    fn registration_accepts_repeats_and_new_names() {
        assert!(register_class(ClassId::new("test.RepeatedClass")));
        assert!(register_class(ClassId::new("test.RepeatedClass")));
        assert!(register_class(ClassId::new("test.OtherClass")));
    }
}
