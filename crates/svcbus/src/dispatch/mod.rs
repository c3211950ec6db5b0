// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Per-component event dispatching.
//!
//! Each component owns exactly one dispatch thread that drains events for
//! all of its stubs in FIFO order; there is no concurrency within a single
//! consumer's callback. Posting an event never blocks; it enqueues to the
//! target component's queue.
//!
//! Consumers register per class id and receive every event whose declared
//! lineage contains that class, so registering for the `StubEvent` base
//! delivers all stub-targeted kinds.

use crate::runtime::{downcast_runtime, register_class, ClassId};
use crate::service::{
    ClientConnectionEvent, EventSink, NotifyRequestEvent, RemoteNotifyRequestEvent,
    RemoteRequestEvent, ServiceEvent, ServiceHandler, ServiceRequestEvent, Stub, StubAddress,
    StubRegisteredEvent,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Receives events on the component's dispatch thread.
pub trait EventConsumer: Send {
    fn process_event(&mut self, event: &dyn ServiceEvent);
}

/// Shared handle to a registered consumer.
pub type ConsumerRef = Arc<Mutex<dyn EventConsumer>>;

enum Envelope {
    Deliver(Box<dyn ServiceEvent>),
    Stop,
}

/// Cheap postable handle to a dispatcher's queue.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Envelope>,
}

impl EventSink for EventSender {
    fn post_event(&self, event: Box<dyn ServiceEvent>) {
        // A send only fails after the dispatcher stopped; late events are
        // dropped by contract.
        let _ = self.tx.send(Envelope::Deliver(event));
    }
}

struct ConsumerTable {
    by_class: Mutex<HashMap<u32, Vec<ConsumerRef>>>,
}

/// One component's event-dispatch thread.
pub struct Dispatcher {
    name: String,
    tx: Sender<Envelope>,
    table: Arc<ConsumerTable>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the dispatch thread for the named component.
    pub fn start(name: &str) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        let table = Arc::new(ConsumerTable {
            by_class: Mutex::new(HashMap::new()),
        });
        let worker_table = Arc::clone(&table);
        let worker = std::thread::Builder::new()
            .name(format!("dispatch-{}", name))
            .spawn(move || Self::run(rx, worker_table))?;
        Ok(Self {
            name: name.to_string(),
            tx,
            table,
            worker: Some(worker),
        })
    }

    fn run(rx: Receiver<Envelope>, table: Arc<ConsumerTable>) {
        while let Ok(envelope) = rx.recv() {
            let event = match envelope {
                Envelope::Stop => break,
                Envelope::Deliver(event) => event,
            };
            // Collect the targets under the lock, call them outside it: a
            // consumer callback may register or unregister consumers.
            let targets: Vec<ConsumerRef> = {
                let by_class = table.by_class.lock();
                let mut targets: Vec<ConsumerRef> = Vec::new();
                for class in event.class_lineage() {
                    if let Some(list) = by_class.get(&class.magic()) {
                        for consumer in list {
                            if !targets.iter().any(|t| Arc::ptr_eq(t, consumer)) {
                                targets.push(Arc::clone(consumer));
                            }
                        }
                    }
                }
                targets
            };
            for consumer in targets {
                consumer.lock().process_event(event.as_ref());
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `consumer` for every event whose lineage contains `class`.
    pub fn register_consumer(&self, class: ClassId, consumer: ConsumerRef) {
        register_class(class);
        self.table
            .by_class
            .lock()
            .entry(class.magic())
            .or_default()
            .push(consumer);
    }

    /// Remove a previously registered consumer for `class`.
    pub fn unregister_consumer(&self, class: ClassId, consumer: &ConsumerRef) {
        let mut by_class = self.table.by_class.lock();
        if let Some(list) = by_class.get_mut(&class.magic()) {
            list.retain(|c| !Arc::ptr_eq(c, consumer));
            if list.is_empty() {
                by_class.remove(&class.magic());
            }
        }
    }

    /// Enqueue an event; never blocks.
    pub fn post(&self, event: Box<dyn ServiceEvent>) {
        let _ = self.tx.send(Envelope::Deliver(event));
    }

    /// A cheap handle stubs emit through.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Drain the queue and join the dispatch thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(Envelope::Stop);
            if worker.join().is_err() {
                log::error!("dispatcher {}: worker thread panicked", self.name);
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Adapter running one stub and its service logic as an event consumer.
///
/// Events addressed to a different stub of the same component are skipped,
/// so several `StubConsumer`s can share one dispatcher.
pub struct StubConsumer<H: ServiceHandler + Send> {
    stub: Stub,
    handler: H,
}

impl<H: ServiceHandler + Send> StubConsumer<H> {
    pub fn new(stub: Stub, handler: H) -> Self {
        Self { stub, handler }
    }

    pub fn stub(&self) -> &Stub {
        &self.stub
    }

    pub fn stub_mut(&mut self) -> &mut Stub {
        &mut self.stub
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

fn event_target(event: &dyn ServiceEvent) -> Option<StubAddress> {
    let obj = event.as_runtime();
    if let Some(remote) = downcast_runtime::<RemoteRequestEvent>(obj) {
        Some(remote.request.target_stub.clone())
    } else if let Some(request) = downcast_runtime::<ServiceRequestEvent>(obj) {
        Some(request.target_stub.clone())
    } else if let Some(remote) = downcast_runtime::<RemoteNotifyRequestEvent>(obj) {
        Some(remote.notify.target_stub.clone())
    } else if let Some(notify) = downcast_runtime::<NotifyRequestEvent>(obj) {
        Some(notify.target_stub.clone())
    } else if let Some(registered) = downcast_runtime::<StubRegisteredEvent>(obj) {
        Some(registered.stub.clone())
    } else if let Some(connection) = downcast_runtime::<ClientConnectionEvent>(obj) {
        Some(connection.target_stub.clone())
    } else {
        None
    }
}

impl<H: ServiceHandler + Send> EventConsumer for StubConsumer<H> {
    fn process_event(&mut self, event: &dyn ServiceEvent) {
        if let Some(target) = event_target(event) {
            if target != *self.stub.address() {
                return;
            }
        }
        self.stub.process_stub_event(&mut self.handler, event);
    }
}
