// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Service event types.
//!
//! Events are polymorphic by [`ClassId`]; the declared lineage expresses the
//! hierarchy that a class-based language would express with inheritance:
//!
//! ```text
//! Event
//! +-- StubEvent
//! |   +-- ServiceRequestEvent
//! |   |   +-- RemoteRequestEvent
//! |   +-- NotifyRequestEvent
//! |   |   +-- RemoteNotifyRequestEvent
//! |   +-- StubRegisteredEvent
//! |   +-- ClientConnectionEvent
//! +-- ProxyEvent
//!     +-- ServiceResponseEvent
//! ```
//!
//! A consumer registered for `StubEvent` receives every stub-targeted kind;
//! the stub's own router downcasts to the concrete type.

use super::address::{ProxyAddress, StubAddress};
use super::types::{ConnectionStatus, MessageId, ResultCode};
use crate::runtime::{ClassId, RuntimeClass, RuntimeObject};
use std::any::Any;

/// Root of the event hierarchy.
pub const EVENT_CLASS: ClassId = ClassId::new("Event");
/// Base of all stub-targeted events.
pub const STUB_EVENT_CLASS: ClassId = ClassId::new("StubEvent");
/// Base of all proxy-targeted events.
pub const PROXY_EVENT_CLASS: ClassId = ClassId::new("ProxyEvent");

/// An event that can be posted to a dispatcher.
pub trait ServiceEvent: RuntimeObject + Send + std::fmt::Debug {
    /// Upcast to the runtime-identity view (for checked downcasts).
    fn as_runtime(&self) -> &dyn RuntimeObject;
}

/// Outbound seam the stub emits through; posting never blocks.
pub trait EventSink: Send + Sync {
    fn post_event(&self, event: Box<dyn ServiceEvent>);
}

macro_rules! service_event {
    ($type:ident, $name:literal, [$($ancestor:expr),*]) => {
        impl RuntimeClass for $type {
            const CLASS_ID: ClassId = ClassId::new($name);
            const LINEAGE: &'static [ClassId] =
                &[ClassId::new($name), $($ancestor,)* EVENT_CLASS];
        }

        impl RuntimeObject for $type {
            fn class_id(&self) -> ClassId {
                Self::CLASS_ID
            }
            fn class_lineage(&self) -> &'static [ClassId] {
                Self::LINEAGE
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        impl ServiceEvent for $type {
            fn as_runtime(&self) -> &dyn RuntimeObject {
                self
            }
        }
    };
}

/// A client-initiated service call.
#[derive(Debug, Clone)]
pub struct ServiceRequestEvent {
    pub target_stub: StubAddress,
    pub source_proxy: ProxyAddress,
    pub request_id: MessageId,
    pub sequence_nr: u32,
    pub payload: Vec<u8>,
}

impl ServiceRequestEvent {
    pub fn new(
        target_stub: StubAddress,
        source_proxy: ProxyAddress,
        request_id: MessageId,
        sequence_nr: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            target_stub,
            source_proxy,
            request_id,
            sequence_nr,
            payload,
        }
    }
}

service_event!(ServiceRequestEvent, "ServiceRequestEvent", [STUB_EVENT_CLASS]);

/// Subscribe to / unsubscribe from attribute-update notifications.
#[derive(Debug, Clone)]
pub struct NotifyRequestEvent {
    pub target_stub: StubAddress,
    pub source_proxy: ProxyAddress,
    pub message_id: MessageId,
    pub subscribe: bool,
}

impl NotifyRequestEvent {
    pub fn new(
        target_stub: StubAddress,
        source_proxy: ProxyAddress,
        message_id: MessageId,
        subscribe: bool,
    ) -> Self {
        Self {
            target_stub,
            source_proxy,
            message_id,
            subscribe,
        }
    }
}

service_event!(NotifyRequestEvent, "NotifyRequestEvent", [STUB_EVENT_CLASS]);

/// A stub-emitted reply or attribute update, correlated to the originating
/// call by `(message_id, sequence_nr, target_proxy)`.
#[derive(Debug, Clone)]
pub struct ServiceResponseEvent {
    pub target_proxy: ProxyAddress,
    pub message_id: MessageId,
    pub sequence_nr: u32,
    pub result: ResultCode,
    pub payload: Vec<u8>,
}

impl ServiceResponseEvent {
    pub fn new(
        target_proxy: ProxyAddress,
        message_id: MessageId,
        sequence_nr: u32,
        result: ResultCode,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            target_proxy,
            message_id,
            sequence_nr,
            result,
            payload,
        }
    }
}

service_event!(
    ServiceResponseEvent,
    "ServiceResponseEvent",
    [PROXY_EVENT_CLASS]
);

/// Registration status of a stub, delivered by the routing layer.
#[derive(Debug, Clone)]
pub struct StubRegisteredEvent {
    pub stub: StubAddress,
    pub status: ConnectionStatus,
}

impl StubRegisteredEvent {
    pub fn new(stub: StubAddress, status: ConnectionStatus) -> Self {
        Self { stub, status }
    }
}

service_event!(StubRegisteredEvent, "StubRegisteredEvent", [STUB_EVENT_CLASS]);

/// A proxy client connected to or disconnected from a stub.
#[derive(Debug, Clone)]
pub struct ClientConnectionEvent {
    pub target_stub: StubAddress,
    pub proxy: ProxyAddress,
    pub connected: bool,
}

impl ClientConnectionEvent {
    pub fn new(target_stub: StubAddress, proxy: ProxyAddress, connected: bool) -> Self {
        Self {
            target_stub,
            proxy,
            connected,
        }
    }
}

service_event!(
    ClientConnectionEvent,
    "ClientConnectionEvent",
    [STUB_EVENT_CLASS]
);

/// A service request deserialized from wire bytes by the connection layer.
#[derive(Debug, Clone)]
pub struct RemoteRequestEvent {
    pub request: ServiceRequestEvent,
    pub source_cookie: u64,
    pub target_cookie: u64,
}

service_event!(
    RemoteRequestEvent,
    "RemoteRequestEvent",
    [ServiceRequestEvent::CLASS_ID, STUB_EVENT_CLASS]
);

/// A notify request deserialized from wire bytes by the connection layer.
#[derive(Debug, Clone)]
pub struct RemoteNotifyRequestEvent {
    pub notify: NotifyRequestEvent,
    pub source_cookie: u64,
    pub target_cookie: u64,
}

service_event!(
    RemoteNotifyRequestEvent,
    "RemoteNotifyRequestEvent",
    [NotifyRequestEvent::CLASS_ID, STUB_EVENT_CLASS]
);
