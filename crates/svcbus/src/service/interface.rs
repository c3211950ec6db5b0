// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Immutable service-interface descriptors.
//!
//! Generated service code supplies one static [`InterfaceData`] per
//! interface; the stub reads it at construction and never mutates it.

use super::error::ServiceError;
use super::types::{MessageId, INVALID_MESSAGE_ID};
use std::fmt;

/// Implementation version of a service interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Immutable descriptor of a service interface.
///
/// Request ids, response ids, and attribute ids share one integer namespace
/// and must be disjoint within an interface. `request_to_response` parallels
/// `request_ids`; [`INVALID_MESSAGE_ID`] marks a fire-and-forget request
/// with no paired response.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceData {
    pub service_name: &'static str,
    pub version: Version,
    pub request_ids: &'static [MessageId],
    pub response_ids: &'static [MessageId],
    pub attribute_ids: &'static [MessageId],
    pub request_to_response: &'static [MessageId],
}

impl InterfaceData {
    /// Check the descriptor invariants; called once at stub construction.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.service_name.is_empty() {
            return Err(ServiceError::InvalidInterface(
                "empty service name".to_string(),
            ));
        }
        if self.request_to_response.len() != self.request_ids.len() {
            return Err(ServiceError::InvalidInterface(format!(
                "pairing table has {} entries for {} requests",
                self.request_to_response.len(),
                self.request_ids.len()
            )));
        }
        for &id in self
            .request_ids
            .iter()
            .chain(self.response_ids)
            .chain(self.attribute_ids)
        {
            if id == INVALID_MESSAGE_ID {
                return Err(ServiceError::InvalidInterface(
                    "reserved id 0 in id list".to_string(),
                ));
            }
        }
        // The three id namespaces must be disjoint.
        for &req in self.request_ids {
            if self.response_ids.contains(&req) || self.attribute_ids.contains(&req) {
                return Err(ServiceError::InvalidInterface(format!(
                    "id {} appears in more than one id list",
                    req
                )));
            }
        }
        for &resp in self.response_ids {
            if self.attribute_ids.contains(&resp) {
                return Err(ServiceError::InvalidInterface(format!(
                    "id {} appears in more than one id list",
                    resp
                )));
            }
        }
        for &paired in self.request_to_response {
            if paired != INVALID_MESSAGE_ID && !self.response_ids.contains(&paired) {
                return Err(ServiceError::InvalidInterface(format!(
                    "paired response {} is not a response id",
                    paired
                )));
            }
        }
        Ok(())
    }

    pub fn has_request(&self, id: MessageId) -> bool {
        self.request_ids.contains(&id)
    }

    pub fn has_response(&self, id: MessageId) -> bool {
        self.response_ids.contains(&id)
    }

    pub fn has_attribute(&self, id: MessageId) -> bool {
        self.attribute_ids.contains(&id)
    }

    /// Paired response of a request; `None` for fire-and-forget requests
    /// and for ids that are not requests of this interface.
    pub fn response_of(&self, request_id: MessageId) -> Option<MessageId> {
        self.request_ids
            .iter()
            .position(|&id| id == request_id)
            .and_then(|idx| match self.request_to_response[idx] {
                INVALID_MESSAGE_ID => None,
                resp => Some(resp),
            })
    }

    /// Inverse of [`Self::response_of`].
    pub fn request_of(&self, response_id: MessageId) -> Option<MessageId> {
        self.request_to_response
            .iter()
            .position(|&id| id == response_id && id != INVALID_MESSAGE_ID)
            .map(|idx| self.request_ids[idx])
    }

    pub fn request_count(&self) -> usize {
        self.request_ids.len()
    }

    pub fn response_count(&self) -> usize {
        self.response_ids.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attribute_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IFACE: InterfaceData = InterfaceData {
        service_name: "Weather",
        version: Version::new(1, 2, 0),
        request_ids: &[10, 20, 30],
        response_ids: &[11, 21],
        attribute_ids: &[42],
        request_to_response: &[11, 21, INVALID_MESSAGE_ID],
    };

    #[test]
    fn valid_descriptor_passes() {
        assert!(IFACE.validate().is_ok());
    }

    #[test]
    fn pairing_lookups() {
        assert_eq!(IFACE.response_of(10), Some(11));
        assert_eq!(IFACE.response_of(20), Some(21));
        assert_eq!(IFACE.response_of(30), None); // fire-and-forget
        assert_eq!(IFACE.response_of(99), None);
        assert_eq!(IFACE.request_of(11), Some(10));
        assert_eq!(IFACE.request_of(21), Some(20));
        assert_eq!(IFACE.request_of(42), None);
    }

    #[test]
    fn overlapping_namespaces_rejected() {
        let bad = InterfaceData {
            response_ids: &[11, 42],
            ..IFACE
        };
        assert!(matches!(
            bad.validate(),
            Err(ServiceError::InvalidInterface(_))
        ));
    }

    #[test]
    fn reserved_id_rejected() {
        let bad = InterfaceData {
            attribute_ids: &[0],
            ..IFACE
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn mismatched_pairing_table_rejected() {
        let bad = InterfaceData {
            request_to_response: &[11],
            ..IFACE
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn pairing_to_unknown_response_rejected() {
        let bad = InterfaceData {
            request_to_response: &[11, 77, INVALID_MESSAGE_ID],
            ..IFACE
        };
        assert!(bad.validate().is_err());
    }
}
