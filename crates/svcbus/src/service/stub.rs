// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Stub dispatch core.
//!
//! The stub tracks every outstanding request and attribute subscription of
//! one service endpoint and enforces the at-most-one-in-flight rule per
//! request id. A request whose response is still pending is answered with a
//! busy result without ever reaching the service logic, unless the service
//! has unblocked it into a session for deferred completion.
//!
//! All methods run on the owning component's dispatcher thread; the listener
//! list and session map are never touched from anywhere else, which is why
//! neither needs a lock of its own.

use super::address::{ProxyAddress, StubAddress};
use super::error::ServiceError;
use super::events::{
    ClientConnectionEvent, EventSink, NotifyRequestEvent, RemoteNotifyRequestEvent,
    RemoteRequestEvent, ServiceEvent, ServiceRequestEvent, ServiceResponseEvent,
    StubRegisteredEvent,
};
use super::interface::InterfaceData;
use super::listener::{Listener, ListenerList, SEQUENCE_NOTIFY};
use super::registry::{self, StubEntry};
use super::types::{ConnectionStatus, MessageId, ResultCode};
use crate::runtime::downcast_runtime;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one unblocked request within a stub.
pub type SessionId = u32;

/// Reserved; never issued by [`Stub::unblock_current_request`].
pub const INVALID_SESSION_ID: SessionId = 0xFFFF_FFFF;

/// Service logic of a concrete stub.
///
/// The stub base routes incoming events and hands them to these hooks; the
/// implementation replies through the [`Stub`] it receives back.
pub trait ServiceHandler {
    /// A service request was accepted for execution.
    fn process_request(&mut self, stub: &mut Stub, event: &ServiceRequestEvent);

    /// A proxy subscribed to an attribute; the implementation supplies the
    /// current value, typically via [`Stub::subscribe_attribute`].
    fn process_attribute(&mut self, stub: &mut Stub, event: &NotifyRequestEvent);

    /// Push the current value of an attribute to every subscriber,
    /// typically via [`Stub::send_attribute_update`].
    fn send_notification(&mut self, stub: &mut Stub, attr_id: MessageId);

    /// Report a failed or canceled message to its peers.
    fn error_request(&mut self, stub: &mut Stub, msg_id: MessageId, cancel: bool) {
        stub.error_message(msg_id, cancel);
    }

    /// Build a response event to emit through [`Stub::post_response`].
    /// Override to attach custom payload framing; the default builds a
    /// plain [`ServiceResponseEvent`].
    fn create_response_event(
        &self,
        proxy: ProxyAddress,
        msg_id: MessageId,
        sequence_nr: u32,
        result: ResultCode,
        payload: Vec<u8>,
    ) -> ServiceResponseEvent {
        ServiceResponseEvent::new(proxy, msg_id, sequence_nr, result, payload)
    }
}

/// Service-side endpoint: the request/response/notification state machine.
pub struct Stub {
    address: StubAddress,
    interface: &'static InterfaceData,
    connection_status: ConnectionStatus,
    listeners: ListenerList,
    /// The listener of the request currently being executed, if any.
    current: Option<Listener>,
    sessions: HashMap<SessionId, Listener>,
    session_counter: SessionId,
    sink: Arc<dyn EventSink>,
    registered: bool,
}

impl Stub {
    /// Bind a stub to its interface and register it process-wide.
    ///
    /// Fails with [`ServiceError::DuplicateStub`] when an equal address is
    /// already registered, and with [`ServiceError::InvalidInterface`] when
    /// the descriptor is malformed.
    pub fn new(
        role_name: &str,
        thread_name: &str,
        interface: &'static InterfaceData,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ServiceError> {
        interface.validate()?;
        let address = StubAddress::new(interface.service_name, role_name, thread_name);
        registry::register_stub(StubEntry {
            address: address.clone(),
            version: interface.version,
        })?;
        log::debug!("stub {} created (interface v{})", address, interface.version);
        Ok(Self {
            address,
            interface,
            connection_status: ConnectionStatus::Pending,
            listeners: ListenerList::new(),
            current: None,
            sessions: HashMap::new(),
            session_counter: 0,
            sink,
            registered: true,
        })
    }

    pub fn address(&self) -> &StubAddress {
        &self.address
    }

    pub fn interface_data(&self) -> &'static InterfaceData {
        self.interface
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Number of tracked listeners (pending requests plus subscriptions).
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of live (unblocked, not yet completed) sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// True while a previous call's response for `request_id` is pending.
    pub fn is_busy(&self, request_id: MessageId) -> bool {
        self.listeners.busy(request_id)
    }

    /// True when `proxy` is subscribed to updates of `attr_id`.
    pub fn has_subscriber(&self, attr_id: MessageId, proxy: &ProxyAddress) -> bool {
        self.listeners.contains_notification(attr_id, proxy)
    }

    /// Lifecycle hook invoked by the owning component on startup.
    pub fn startup(&mut self) {
        log::info!("stub {} starting up", self.address);
        self.connection_status = ConnectionStatus::Pending;
    }

    /// Lifecycle hook invoked by the owning component on shutdown: cancels
    /// everything outstanding and withdraws the registration.
    pub fn shutdown(&mut self) {
        log::info!("stub {} shutting down", self.address);
        self.cancel_all_requests();
        if self.registered {
            registry::unregister_stub(&self.address);
            self.registered = false;
        }
    }

    // ========================================================================
    // Event routing
    // ========================================================================

    /// Route a stub-targeted event to the matching handler hook by runtime
    /// class. Unknown classes fall through to [`Self::process_generic_event`].
    pub fn process_stub_event(&mut self, handler: &mut dyn ServiceHandler, event: &dyn ServiceEvent) {
        let obj = event.as_runtime();
        if let Some(remote) = downcast_runtime::<RemoteRequestEvent>(obj) {
            self.process_request_event(handler, &remote.request);
        } else if let Some(request) = downcast_runtime::<ServiceRequestEvent>(obj) {
            self.process_request_event(handler, request);
        } else if let Some(remote) = downcast_runtime::<RemoteNotifyRequestEvent>(obj) {
            self.process_notify_event(handler, &remote.notify);
        } else if let Some(notify) = downcast_runtime::<NotifyRequestEvent>(obj) {
            self.process_notify_event(handler, notify);
        } else if let Some(registered) = downcast_runtime::<StubRegisteredEvent>(obj) {
            self.process_stub_registered(&registered.stub, registered.status);
        } else if let Some(connection) = downcast_runtime::<ClientConnectionEvent>(obj) {
            self.client_connected(&connection.proxy, connection.connected);
        } else {
            self.process_generic_event(event);
        }
    }

    fn process_generic_event(&mut self, event: &dyn ServiceEvent) {
        log::warn!(
            "stub {}: ignoring unexpected event {}",
            self.address,
            event.class_id()
        );
    }

    fn process_request_event(&mut self, handler: &mut dyn ServiceHandler, event: &ServiceRequestEvent) {
        if self.can_execute_request(event.request_id, event.sequence_nr, &event.source_proxy) {
            handler.process_request(self, event);
        }
    }

    fn process_notify_event(&mut self, handler: &mut dyn ServiceHandler, event: &NotifyRequestEvent) {
        if !self.interface.has_attribute(event.message_id) {
            log::warn!(
                "stub {}: notify request for unknown attribute {}",
                self.address,
                event.message_id
            );
            return;
        }
        if event.subscribe {
            handler.process_attribute(self, event);
        } else {
            self.unsubscribe_attribute(event.message_id, &event.source_proxy);
        }
    }

    // ========================================================================
    // Request lifecycle
    // ========================================================================

    /// Gate of the at-most-one-in-flight rule.
    ///
    /// Fire-and-forget requests execute immediately without an entry. A
    /// request whose previous call still has its response pending (and was
    /// not unblocked) is answered with a busy result and never reaches the
    /// service logic. Otherwise the pending listener is appended and made
    /// current.
    fn can_execute_request(&mut self, request_id: MessageId, seq: u32, proxy: &ProxyAddress) -> bool {
        if !self.interface.has_request(request_id) {
            log::warn!("stub {}: unknown request id {}", self.address, request_id);
            self.emit_response(
                proxy.clone(),
                request_id,
                seq,
                ResultCode::Invalid,
                Vec::new(),
            );
            return false;
        }
        let response_id = match self.interface.response_of(request_id) {
            None => return true,
            Some(id) => id,
        };
        if self.listeners.busy(request_id) {
            log::debug!(
                "stub {}: request {} busy, rejecting seq {} from {}",
                self.address,
                request_id,
                seq,
                proxy
            );
            self.emit_response(
                proxy.clone(),
                response_id,
                seq,
                ResultCode::MessageSourceBusy,
                Vec::new(),
            );
            return false;
        }
        self.listeners
            .insert_request_pending(request_id, seq, proxy.clone());
        self.current = Some(Listener::new(request_id, seq, proxy.clone()));
        true
    }

    /// Deliver a response to the pending call(s) of its paired request.
    ///
    /// The current listener is served when it belongs to this response's
    /// request (normal completion, or deferred completion after
    /// [`Self::prepare_response`]); otherwise every pending listener of the
    /// paired request is served. Delivered listeners are removed.
    pub fn send_response(&mut self, response_id: MessageId, payload: Vec<u8>) {
        let request_id = match self.interface.request_of(response_id) {
            Some(id) => id,
            None => {
                log::warn!(
                    "stub {}: {} is not a paired response id",
                    self.address,
                    response_id
                );
                return;
            }
        };
        if let Some(current) = self.current.take() {
            if current.message_id == request_id {
                self.listeners.remove(&current);
                self.emit_response(
                    current.proxy,
                    response_id,
                    current.sequence_nr,
                    ResultCode::Ok,
                    payload,
                );
                return;
            }
            // Response for some other request; keep the current listener.
            self.current = Some(current);
        }
        let pending = self.listeners.remove_requests(request_id);
        if pending.is_empty() {
            log::warn!(
                "stub {}: no pending listener for response {}",
                self.address,
                response_id
            );
            return;
        }
        for listener in pending {
            self.emit_response(
                listener.proxy,
                response_id,
                listener.sequence_nr,
                ResultCode::Ok,
                payload.clone(),
            );
        }
    }

    /// Cancel the request currently being executed: its caller receives a
    /// canceled result and the pending entry is dropped.
    pub fn cancel_current_request(&mut self) {
        let current = match self.current.take() {
            Some(listener) => listener,
            None => return,
        };
        self.listeners.remove(&current);
        if let Some(response_id) = self.interface.response_of(current.message_id) {
            self.emit_response(
                current.proxy,
                response_id,
                current.sequence_nr,
                ResultCode::RequestCanceled,
                Vec::new(),
            );
        }
    }

    // ========================================================================
    // Unblocked requests (sessions)
    // ========================================================================

    /// Move the current request into a session so the same request id can
    /// be accepted again while this call is completed later.
    ///
    /// Returns the session id to pass to [`Self::prepare_response`], or
    /// [`INVALID_SESSION_ID`] when no request is being executed.
    pub fn unblock_current_request(&mut self) -> SessionId {
        let current = match self.current.take() {
            Some(listener) => listener,
            None => {
                log::error!(
                    "stub {}: unblock_current_request without a current request",
                    self.address
                );
                return INVALID_SESSION_ID;
            }
        };
        self.listeners.remove(&current);
        let session_id = self.next_session_id();
        self.sessions.insert(session_id, current);
        session_id
    }

    /// Reinstall the saved listener of an unblocked request as current, so
    /// the next [`Self::send_response`] reaches the original caller. The
    /// session is consumed; a second call with the same id fails.
    pub fn prepare_response(&mut self, session_id: SessionId) -> Result<(), ServiceError> {
        match self.sessions.remove(&session_id) {
            Some(listener) => {
                self.current = Some(listener);
                Ok(())
            }
            None => Err(ServiceError::UnknownSession(session_id)),
        }
    }

    fn next_session_id(&mut self) -> SessionId {
        self.session_counter = self.session_counter.wrapping_add(1);
        if self.session_counter == INVALID_SESSION_ID {
            // Wrapping within one stub lifetime is a configuration error.
            log::error!("stub {}: session id counter wrapped", self.address);
            self.session_counter = 1;
        }
        self.session_counter
    }

    // ========================================================================
    // Attribute subscription
    // ========================================================================

    /// Add a subscription and, when newly added, immediately send one
    /// update carrying the current value (`None` = attribute invalid).
    /// Returns `false` for a duplicate subscription.
    pub fn subscribe_attribute(
        &mut self,
        attr_id: MessageId,
        proxy: ProxyAddress,
        current_value: Option<Vec<u8>>,
    ) -> bool {
        if !self.listeners.insert_notification(attr_id, proxy.clone()) {
            return false;
        }
        match current_value {
            Some(value) => {
                self.emit_response(proxy, attr_id, SEQUENCE_NOTIFY, ResultCode::DataOk, value)
            }
            None => self.emit_response(
                proxy,
                attr_id,
                SEQUENCE_NOTIFY,
                ResultCode::DataInvalid,
                Vec::new(),
            ),
        }
        true
    }

    /// Drop a subscription; no event is emitted.
    pub fn unsubscribe_attribute(&mut self, attr_id: MessageId, proxy: &ProxyAddress) {
        self.listeners.remove_notification(attr_id, proxy);
    }

    /// Fan the current attribute value out to every subscriber, in
    /// subscription order.
    pub fn send_attribute_update(&mut self, attr_id: MessageId, value: Vec<u8>, valid: bool) {
        let (result, payload) = if valid {
            (ResultCode::DataOk, value)
        } else {
            (ResultCode::DataInvalid, Vec::new())
        };
        for listener in self.listeners.find_all(attr_id) {
            if listener.is_notification() {
                self.emit_response(
                    listener.proxy,
                    attr_id,
                    SEQUENCE_NOTIFY,
                    result,
                    payload.clone(),
                );
            }
        }
    }

    /// Mark an attribute invalid: every subscriber receives one update with
    /// an invalid-data result and no payload.
    pub fn invalidate_attribute(&mut self, attr_id: MessageId) {
        self.send_attribute_update(attr_id, Vec::new(), false);
    }

    // ========================================================================
    // Bulk error paths
    // ========================================================================

    /// Fail everything outstanding: pending requests (and sessions) receive
    /// an error result, subscriptions an invalid-data update; the listener
    /// list is cleared.
    pub fn error_all_requests(&mut self) {
        self.abort_all(ResultCode::RequestError);
    }

    /// As [`Self::error_all_requests`], but pending requests receive a
    /// canceled result.
    pub fn cancel_all_requests(&mut self) {
        self.abort_all(ResultCode::RequestCanceled);
    }

    fn abort_all(&mut self, request_result: ResultCode) {
        self.current = None;
        for listener in self.listeners.drain() {
            if listener.is_notification() {
                self.emit_response(
                    listener.proxy,
                    listener.message_id,
                    SEQUENCE_NOTIFY,
                    ResultCode::DataInvalid,
                    Vec::new(),
                );
            } else if let Some(response_id) = self.interface.response_of(listener.message_id) {
                self.emit_response(
                    listener.proxy,
                    response_id,
                    listener.sequence_nr,
                    request_result,
                    Vec::new(),
                );
            }
        }
        let sessions: Vec<Listener> = self.sessions.drain().map(|(_, l)| l).collect();
        for listener in sessions {
            if let Some(response_id) = self.interface.response_of(listener.message_id) {
                self.emit_response(
                    listener.proxy,
                    response_id,
                    listener.sequence_nr,
                    request_result,
                    Vec::new(),
                );
            }
        }
    }

    /// Report one failed or canceled message: a request id fails its
    /// pending calls, an attribute id is invalidated, a response id answers
    /// its request's pending calls with an invalid result.
    pub fn error_message(&mut self, msg_id: MessageId, cancel: bool) {
        if self.interface.has_request(msg_id) {
            let result = if cancel {
                ResultCode::RequestCanceled
            } else {
                ResultCode::RequestError
            };
            if let Some(current) = self.current.take() {
                if current.message_id != msg_id {
                    self.current = Some(current);
                }
            }
            if let Some(response_id) = self.interface.response_of(msg_id) {
                for listener in self.listeners.remove_requests(msg_id) {
                    self.emit_response(
                        listener.proxy,
                        response_id,
                        listener.sequence_nr,
                        result,
                        Vec::new(),
                    );
                }
            }
        } else if self.interface.has_attribute(msg_id) {
            self.invalidate_attribute(msg_id);
        } else if self.interface.has_response(msg_id) {
            if let Some(request_id) = self.interface.request_of(msg_id) {
                for listener in self.listeners.remove_requests(request_id) {
                    self.emit_response(
                        listener.proxy,
                        msg_id,
                        listener.sequence_nr,
                        ResultCode::Invalid,
                        Vec::new(),
                    );
                }
            }
        } else {
            log::warn!("stub {}: error_message for unknown id {}", self.address, msg_id);
        }
    }

    // ========================================================================
    // Connection events
    // ========================================================================

    /// A proxy client connected or disconnected. Disconnection purges every
    /// listener and session of that proxy without emitting anything to it.
    pub fn client_connected(&mut self, proxy: &ProxyAddress, is_connected: bool) {
        if is_connected {
            log::debug!("stub {}: client {} connected", self.address, proxy);
            return;
        }
        let removed = self.listeners.remove_all_for_proxy(proxy);
        if !removed.is_empty() {
            log::debug!(
                "stub {}: client {} disconnected, dropped {} listeners",
                self.address,
                proxy,
                removed.len()
            );
        }
        self.sessions.retain(|_, listener| listener.proxy != *proxy);
        if self.current.as_ref().is_some_and(|c| c.proxy == *proxy) {
            self.current = None;
        }
    }

    /// Registration status delivered by the routing layer. A disconnected
    /// status fails everything outstanding.
    pub fn process_stub_registered(&mut self, address: &StubAddress, status: ConnectionStatus) {
        if *address != self.address {
            log::warn!(
                "stub {}: registration status for foreign address {}",
                self.address,
                address
            );
            return;
        }
        log::debug!("stub {}: connection status {:?}", self.address, status);
        self.connection_status = status;
        if status == ConnectionStatus::Disconnected {
            self.error_all_requests();
        }
    }

    /// Emit a prebuilt response event, e.g. one produced by
    /// [`ServiceHandler::create_response_event`].
    pub fn post_response(&self, event: ServiceResponseEvent) {
        self.sink.post_event(Box::new(event));
    }

    fn emit_response(
        &self,
        proxy: ProxyAddress,
        msg_id: MessageId,
        sequence_nr: u32,
        result: ResultCode,
        payload: Vec<u8>,
    ) {
        self.sink.post_event(Box::new(ServiceResponseEvent::new(
            proxy,
            msg_id,
            sequence_nr,
            result,
            payload,
        )));
    }
}

impl Drop for Stub {
    fn drop(&mut self) {
        if self.registered {
            registry::unregister_stub(&self.address);
        }
    }
}
