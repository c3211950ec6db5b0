// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Service endpoints.
//!
//! A component exports a service interface through a [`Stub`]; remote
//! components reach it through proxies identified by [`ProxyAddress`]. The
//! stub tracks every pending request and attribute subscription in one
//! insertion-ordered [`ListenerList`] and correlates responses with their
//! originating proxy call by sequence number.

mod address;
mod error;
mod events;
mod interface;
mod listener;
mod registry;
mod stub;
mod types;


pub use address::{ProxyAddress, StubAddress};
pub use error::ServiceError;
pub use events::{
    ClientConnectionEvent, EventSink, NotifyRequestEvent, RemoteNotifyRequestEvent,
    RemoteRequestEvent, ServiceEvent, ServiceRequestEvent, ServiceResponseEvent,
    StubRegisteredEvent, EVENT_CLASS, PROXY_EVENT_CLASS, STUB_EVENT_CLASS,
};
pub use interface::{InterfaceData, Version};
pub use listener::{Listener, ListenerList, SEQUENCE_ANY, SEQUENCE_NOTIFY};
pub use registry::{find_stub_by_address, StubEntry};
pub use stub::{ServiceHandler, SessionId, Stub, INVALID_SESSION_ID};
pub use types::{ConnectionStatus, ResultCode, MessageId, INVALID_MESSAGE_ID};
