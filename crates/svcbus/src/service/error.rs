// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Error types for service-endpoint operations.

use super::address::StubAddress;
use super::stub::SessionId;
use std::fmt;

/// Errors surfaced by stub construction and lifecycle operations.
#[derive(Debug)]
pub enum ServiceError {
    /// A stub with an equal address is already registered.
    DuplicateStub(StubAddress),

    /// The interface descriptor is malformed (overlapping id namespaces,
    /// mismatched pairing table, reserved ids in an id list).
    InvalidInterface(String),

    /// The session id was never issued or was already consumed.
    UnknownSession(SessionId),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStub(addr) => write!(f, "stub already registered: {}", addr),
            Self::InvalidInterface(msg) => write!(f, "invalid interface data: {}", msg),
            Self::UnknownSession(sid) => write!(f, "unknown session id: {}", sid),
        }
    }
}

impl std::error::Error for ServiceError {}
