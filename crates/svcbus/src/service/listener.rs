// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Listener registry: pending requests and attribute subscriptions.
//!
//! One insertion-ordered sequence tracks both kinds of entries,
//! distinguished by a sentinel sequence number. Insertion order defines the
//! delivery order of attribute notifications, so the container is a plain
//! vector rather than a map.

use super::address::ProxyAddress;
use super::types::MessageId;

/// Sentinel: the entry is an attribute-update subscription, not a pending
/// request.
pub const SEQUENCE_NOTIFY: u32 = 0xFFFF_FFFE;

/// Wildcard sequence number used during lookup and removal.
pub const SEQUENCE_ANY: u32 = 0xFFFF_FFFF;

/// One pending request or one active subscription.
#[derive(Debug, Clone)]
pub struct Listener {
    pub message_id: MessageId,
    pub sequence_nr: u32,
    pub proxy: ProxyAddress,
}

impl Listener {
    pub fn new(message_id: MessageId, sequence_nr: u32, proxy: ProxyAddress) -> Self {
        Self {
            message_id,
            sequence_nr,
            proxy,
        }
    }

    /// Containment equality. Message ids must match; additionally either
    /// side's sequence number is [`SEQUENCE_ANY`], or both sequence numbers
    /// and both proxy addresses match.
    pub fn matches(&self, other: &Listener) -> bool {
        self.message_id == other.message_id
            && (self.sequence_nr == SEQUENCE_ANY
                || other.sequence_nr == SEQUENCE_ANY
                || (self.sequence_nr == other.sequence_nr && self.proxy == other.proxy))
    }

    /// True for subscription entries.
    pub fn is_notification(&self) -> bool {
        self.sequence_nr == SEQUENCE_NOTIFY
    }
}

/// Insertion-ordered sequence of listeners, unique per the containment
/// equality of [`Listener::matches`].
#[derive(Debug, Default)]
pub struct ListenerList {
    entries: Vec<Listener>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a pending request at the tail. The same message id may appear
    /// several times with distinct `(sequence, proxy)` pairs; those are
    /// distinct in-flight calls.
    pub fn insert_request_pending(&mut self, msg_id: MessageId, seq: u32, proxy: ProxyAddress) {
        self.entries.push(Listener::new(msg_id, seq, proxy));
    }

    /// Add a subscription entry iff the exact `(msg_id, proxy)` subscription
    /// does not exist yet. Returns `true` on insertion.
    pub fn insert_notification(&mut self, msg_id: MessageId, proxy: ProxyAddress) -> bool {
        if self.contains_notification(msg_id, &proxy) {
            return false;
        }
        self.entries
            .push(Listener::new(msg_id, SEQUENCE_NOTIFY, proxy));
        true
    }

    /// Exact-tuple subscription test; the [`SEQUENCE_ANY`] wildcard is
    /// deliberately not honored here.
    pub fn contains_notification(&self, msg_id: MessageId, proxy: &ProxyAddress) -> bool {
        self.entries.iter().any(|l| {
            l.message_id == msg_id && l.sequence_nr == SEQUENCE_NOTIFY && l.proxy == *proxy
        })
    }

    pub fn remove_notification(&mut self, msg_id: MessageId, proxy: &ProxyAddress) {
        self.entries.retain(|l| {
            !(l.message_id == msg_id && l.sequence_nr == SEQUENCE_NOTIFY && l.proxy == *proxy)
        });
    }

    /// Every entry with the given message id, in insertion order.
    pub fn find_all(&self, msg_id: MessageId) -> Vec<Listener> {
        self.entries
            .iter()
            .filter(|l| l.message_id == msg_id)
            .cloned()
            .collect()
    }

    /// Remove the first entry matching `listener` (containment equality).
    /// Returns `true` when an entry was removed.
    pub fn remove(&mut self, listener: &Listener) -> bool {
        match self.entries.iter().position(|l| l.matches(listener)) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove and return every pending-request entry (not subscriptions)
    /// with the given message id, in insertion order.
    pub fn remove_requests(&mut self, msg_id: MessageId) -> Vec<Listener> {
        let mut removed = Vec::new();
        self.entries.retain(|l| {
            if l.message_id == msg_id && !l.is_notification() {
                removed.push(l.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Purge every entry belonging to `proxy`; returns the removed message
    /// ids in insertion order. Used when a client disconnects.
    pub fn remove_all_for_proxy(&mut self, proxy: &ProxyAddress) -> Vec<MessageId> {
        let mut removed = Vec::new();
        self.entries.retain(|l| {
            if l.proxy == *proxy {
                removed.push(l.message_id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// True iff a previous call's response for `request_id` is still
    /// pending (subscription entries do not count).
    pub fn busy(&self, request_id: MessageId) -> bool {
        self.entries
            .iter()
            .any(|l| l.message_id == request_id && !l.is_notification())
    }

    /// Remove and return all entries, in insertion order.
    pub fn drain(&mut self) -> Vec<Listener> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(tag: u32) -> ProxyAddress {
        ProxyAddress::new("Weather", "client", "worker", tag)
    }

    #[test]
    fn wildcard_containment_equality() {
        let exact = Listener::new(10, 7, proxy(1));
        let same = Listener::new(10, 7, proxy(1));
        let other_seq = Listener::new(10, 8, proxy(1));
        let other_proxy = Listener::new(10, 7, proxy(2));
        let wildcard = Listener::new(10, SEQUENCE_ANY, proxy(9));

        assert!(exact.matches(&same));
        assert!(!exact.matches(&other_seq));
        assert!(!exact.matches(&other_proxy));
        assert!(exact.matches(&wildcard));
        assert!(wildcard.matches(&exact));
        assert!(!exact.matches(&Listener::new(11, 7, proxy(1))));
    }

    #[test]
    fn several_in_flight_calls_for_one_request_id() {
        let mut list = ListenerList::new();
        list.insert_request_pending(10, 7, proxy(1));
        list.insert_request_pending(10, 4, proxy(2));

        let found = list.find_all(10);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].sequence_nr, 7);
        assert_eq!(found[1].sequence_nr, 4);
    }

    #[test]
    fn notification_insert_is_idempotent() {
        let mut list = ListenerList::new();
        assert!(list.insert_notification(42, proxy(1)));
        assert!(!list.insert_notification(42, proxy(1)));
        assert_eq!(list.len(), 1);

        // A different proxy is a distinct subscription.
        assert!(list.insert_notification(42, proxy(2)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn notification_lookup_is_exact_not_wildcard() {
        let mut list = ListenerList::new();
        // A pending request for the same id must not satisfy the
        // subscription test even though its wildcard equality would.
        list.insert_request_pending(42, 7, proxy(1));
        assert!(!list.contains_notification(42, &proxy(1)));
        assert!(list.insert_notification(42, proxy(1)));
    }

    #[test]
    fn remove_notification_leaves_requests_alone() {
        let mut list = ListenerList::new();
        list.insert_request_pending(42, 7, proxy(1));
        list.insert_notification(42, proxy(1));
        list.remove_notification(42, &proxy(1));
        assert_eq!(list.len(), 1);
        assert!(list.busy(42));
    }

    #[test]
    fn find_all_preserves_insertion_order() {
        let mut list = ListenerList::new();
        list.insert_notification(42, proxy(3));
        list.insert_notification(42, proxy(1));
        list.insert_notification(42, proxy(2));

        let order: Vec<u32> = list.find_all(42).iter().map(|l| l.proxy.instance()).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn busy_ignores_subscriptions() {
        let mut list = ListenerList::new();
        list.insert_notification(42, proxy(1));
        assert!(!list.busy(42));
        list.insert_request_pending(10, 7, proxy(1));
        assert!(list.busy(10));
        assert!(!list.busy(20));
    }

    #[test]
    fn remove_all_for_proxy_reports_removed_ids() {
        let mut list = ListenerList::new();
        list.insert_request_pending(10, 7, proxy(1));
        list.insert_request_pending(20, 3, proxy(2));
        list.insert_notification(42, proxy(1));

        let removed = list.remove_all_for_proxy(&proxy(1));
        assert_eq!(removed, vec![10, 42]);
        assert_eq!(list.len(), 1);
        assert!(list.busy(20));
        assert!(!list.busy(10));
    }

    #[test]
    fn remove_requests_takes_only_request_entries() {
        let mut list = ListenerList::new();
        list.insert_request_pending(10, 7, proxy(1));
        list.insert_notification(10, proxy(2));

        let taken = list.remove_requests(10);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].sequence_nr, 7);
        assert_eq!(list.len(), 1);
        assert!(list.contains_notification(10, &proxy(2)));
    }
}
