// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Inter-process connection layer.
//!
//! The routing service accepts TCP clients on a [`ServerConnection`] and
//! addresses each by a unique cookie. Payload bytes stay opaque at this
//! layer; each frame carries just enough (target cookie, source cookie,
//! class magic) to route it and to reconstruct the event type on the
//! receiving side.

mod frame;
mod server;

pub use frame::{
    FrameBuffer, FrameError, MessageFrame, DEFAULT_MAX_FRAME_SIZE, FRAME_FIXED_SIZE,
    FRAME_HEADER_SIZE,
};
pub use server::{
    ConnectionError, ConnectionHandle, ServerConnection, COOKIE_LOCAL, COOKIE_ROUTER,
    COOKIE_UNKNOWN, MASTER_LIST_SIZE, MAX_LISTEN_QUEUE,
};

/// Cookie-style item identifier used by the connection layer.
pub type ItemId = u64;
