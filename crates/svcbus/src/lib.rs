// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! # svcbus - Asynchronous event-driven service framework
//!
//! Components export service interfaces. Each endpoint has two sides: a
//! **Stub** (the implementation side, living inside a component) and a
//! **Proxy** (the client-side handle used by other components). Stubs and
//! proxies exchange requests, responses, and attribute-update notifications
//! asynchronously, across threads in one process or across processes via a
//! TCP connection handled by a routing service.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Service Layer                                |
//! |   Stub dispatch engine | Listener registry | Sessions | Registry    |
//! +---------------------------------------------------------------------+
//! |                        Dispatch Layer                               |
//! |   Per-component FIFO event thread | Consumer routing by class id    |
//! +---------------------------------------------------------------------+
//! |                        IPC Layer                                    |
//! |   Server connection multiplexer | Cookie maps | Frame codec         |
//! +---------------------------------------------------------------------+
//! |                        Foundation                                   |
//! |   Runtime class identity | Synchronization primitives               |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`service::Stub`] | Service-side endpoint: request/response/notification state machine |
//! | [`service::ServiceHandler`] | Trait the concrete service implements |
//! | [`dispatch::Dispatcher`] | Per-component FIFO event-dispatch thread |
//! | [`ipc::ServerConnection`] | TCP accept loop with cookie-addressed clients |
//! | [`runtime::ClassId`] | Portable 32-bit class identity (name + magic) |
//!
//! Events are identified by [`runtime::ClassId`] rather than language RTTI,
//! so type identity survives serialization: the class name travels on the
//! wire and the magic is recomputed from it on receipt.

/// Per-component event dispatching (consumer registration, FIFO delivery).
pub mod dispatch;
/// TCP server connection multiplexer and wire framing.
pub mod ipc;
/// Runtime class identity (portable is-a checks and safe downcasting).
pub mod runtime;
/// Service endpoints: addresses, interface data, listeners, stub dispatch.
pub mod service;
/// Synchronization primitive abstraction (timed lock contract).
pub mod sync;

pub use runtime::{downcast_runtime, ClassId, RuntimeObject};
pub use service::{
    InterfaceData, Listener, ProxyAddress, ResultCode, ServiceHandler, Stub, StubAddress,
};
pub use sync::{SyncObject, DO_NOT_WAIT, WAIT_INFINITE};
