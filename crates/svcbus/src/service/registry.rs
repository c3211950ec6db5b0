// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Process-wide stub registry.
//!
//! Maps stub addresses to non-owning registration records. Entries are added
//! when a stub is constructed and removed at shutdown. The table lives
//! behind a recursive lock held only for the duration of a lookup, insert,
//! or remove; it is never held across stub callbacks.

use super::address::StubAddress;
use super::error::ServiceError;
use super::interface::Version;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Non-owning registration record of a live stub.
#[derive(Debug, Clone)]
pub struct StubEntry {
    pub address: StubAddress,
    pub version: Version,
}

type RegistryMap = HashMap<StubAddress, StubEntry>;

// Created lazily on first registration, lives until process exit.
static REGISTERED_STUBS: OnceLock<ReentrantMutex<RefCell<RegistryMap>>> = OnceLock::new();

fn registry() -> &'static ReentrantMutex<RefCell<RegistryMap>> {
    REGISTERED_STUBS.get_or_init(|| ReentrantMutex::new(RefCell::new(HashMap::new())))
}

/// Register a newly constructed stub. Fails when an equal address is
/// already present.
pub(crate) fn register_stub(entry: StubEntry) -> Result<(), ServiceError> {
    let guard = registry().lock();
    let mut map = guard.borrow_mut();
    if map.contains_key(&entry.address) {
        return Err(ServiceError::DuplicateStub(entry.address));
    }
    log::debug!("stub registry: registered {}", entry.address);
    map.insert(entry.address.clone(), entry);
    Ok(())
}

/// Remove a stub's registration; returns `false` when it was not present.
pub(crate) fn unregister_stub(address: &StubAddress) -> bool {
    let guard = registry().lock();
    let removed = guard.borrow_mut().remove(address).is_some();
    if removed {
        log::debug!("stub registry: unregistered {}", address);
    }
    removed
}

/// Look up a stub's registration record by address.
pub fn find_stub_by_address(address: &StubAddress) -> Option<StubEntry> {
    let guard = registry().lock();
    let entry = guard.borrow().get(address).cloned();
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: &str) -> StubEntry {
        StubEntry {
            address: StubAddress::new("RegistryTest", role, "worker"),
            version: Version::new(1, 0, 0),
        }
    }

    #[test]
    fn register_lookup_unregister() {
        let e = entry("lifecycle");
        register_stub(e.clone()).unwrap();

        let found = find_stub_by_address(&e.address).unwrap();
        assert_eq!(found.address, e.address);
        assert_eq!(found.version, Version::new(1, 0, 0));

        assert!(unregister_stub(&e.address));
        assert!(find_stub_by_address(&e.address).is_none());
        assert!(!unregister_stub(&e.address));
    }

    #[test]
    fn duplicate_address_rejected() {
        let e = entry("duplicate");
        register_stub(e.clone()).unwrap();

        let err = register_stub(e.clone()).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateStub(addr) if addr == e.address));

        // The original registration is untouched.
        assert!(find_stub_by_address(&e.address).is_some());
        assert!(unregister_stub(&e.address));
    }
}
