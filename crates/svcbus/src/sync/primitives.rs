// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Primitive implementations over `parking_lot` mutex/condvar pairs.

use super::{SyncKind, SyncObject, DO_NOT_WAIT, WAIT_INFINITE};
use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// How long a `lock` call may wait.
#[derive(Clone, Copy)]
enum Wait {
    Forever,
    Until(Instant),
    Now,
}

fn wait_bound(timeout_ms: u32) -> Wait {
    match timeout_ms {
        WAIT_INFINITE => Wait::Forever,
        DO_NOT_WAIT => Wait::Now,
        ms => Wait::Until(Instant::now() + Duration::from_millis(u64::from(ms))),
    }
}

// ============================================================================
// Recursive owner-tracked core (mutex, critical section, resource lock)
// ============================================================================

#[derive(Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    recursion: u32,
}

/// Owner-tracked recursive acquisition, shared by the mutex-family variants.
struct RecursiveCore {
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl RecursiveCore {
    fn new() -> Self {
        Self {
            state: Mutex::new(OwnerState::default()),
            released: Condvar::new(),
        }
    }

    fn lock(&self, timeout_ms: u32) -> bool {
        let me = thread::current().id();
        let wait = wait_bound(timeout_ms);
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.recursion = 1;
                    return true;
                }
                Some(owner) if owner == me => {
                    state.recursion += 1;
                    return true;
                }
                Some(_) => match wait {
                    Wait::Now => return false,
                    Wait::Forever => self.released.wait(&mut state),
                    Wait::Until(deadline) => {
                        if Instant::now() >= deadline
                            || self
                                .released
                                .wait_until(&mut state, deadline)
                                .timed_out()
                        {
                            // One last chance: the owner may have released
                            // exactly at the deadline.
                            if state.owner.is_none() {
                                state.owner = Some(me);
                                state.recursion = 1;
                                return true;
                            }
                            return false;
                        }
                    }
                },
            }
        }
    }

    fn unlock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner == me => {
                state.recursion -= 1;
                if state.recursion == 0 {
                    state.owner = None;
                    self.released.notify_one();
                }
                true
            }
            _ => false,
        }
    }
}

macro_rules! recursive_variant {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        pub struct $name {
            core: RecursiveCore,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    core: RecursiveCore::new(),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl SyncObject for $name {
            fn kind(&self) -> SyncKind {
                $kind
            }
            fn lock(&self, timeout_ms: u32) -> bool {
                self.core.lock(timeout_ms)
            }
            fn unlock(&self) -> bool {
                self.core.unlock()
            }
        }
    };
}

recursive_variant!(
    /// Recursive, owner-tracked mutex. Only the owning thread can release it.
    SyncMutex,
    SyncKind::Mutex
);
recursive_variant!(
    /// Intra-process recursive mutex; same semantics as [`SyncMutex`].
    CriticalSection,
    SyncKind::CriticalSection
);
recursive_variant!(
    /// Recursive guard for shared containers (registries, connection maps).
    ResourceLock,
    SyncKind::ResourceLock
);

// ============================================================================
// Event
// ============================================================================

/// Manual- or auto-reset event.
///
/// `lock` waits for the signaled state; an auto-reset event consumes the
/// signal and releases exactly one waiter per `set_event`. `unlock` signals
/// the event (releases waiters).
pub struct SyncEvent {
    signaled: Mutex<bool>,
    signal: Condvar,
    auto_reset: bool,
}

impl SyncEvent {
    /// Create a non-signaled event.
    pub fn new(auto_reset: bool) -> Self {
        Self {
            signaled: Mutex::new(false),
            signal: Condvar::new(),
            auto_reset,
        }
    }

    /// Move to the signaled state, releasing waiters.
    pub fn set_event(&self) -> bool {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        if self.auto_reset {
            self.signal.notify_one();
        } else {
            self.signal.notify_all();
        }
        true
    }

    /// Move to the non-signaled state.
    pub fn reset_event(&self) -> bool {
        *self.signaled.lock() = false;
        true
    }
}

impl SyncObject for SyncEvent {
    fn kind(&self) -> SyncKind {
        SyncKind::Event
    }

    fn lock(&self, timeout_ms: u32) -> bool {
        let wait = wait_bound(timeout_ms);
        let mut signaled = self.signaled.lock();
        loop {
            if *signaled {
                if self.auto_reset {
                    *signaled = false;
                }
                return true;
            }
            match wait {
                Wait::Now => return false,
                Wait::Forever => self.signal.wait(&mut signaled),
                Wait::Until(deadline) => {
                    if Instant::now() >= deadline
                        || self.signal.wait_until(&mut signaled, deadline).timed_out()
                    {
                        if *signaled {
                            if self.auto_reset {
                                *signaled = false;
                            }
                            return true;
                        }
                        return false;
                    }
                }
            }
        }
    }

    fn unlock(&self) -> bool {
        self.set_event()
    }
}

// ============================================================================
// Semaphore
// ============================================================================

/// Counting semaphore. `lock` takes one permit, `unlock` returns one.
pub struct SyncSemaphore {
    permits: Mutex<u32>,
    available: Condvar,
    max_count: u32,
}

impl SyncSemaphore {
    pub fn new(max_count: u32, initial_count: u32) -> Self {
        Self {
            permits: Mutex::new(initial_count.min(max_count)),
            available: Condvar::new(),
            max_count,
        }
    }
}

impl SyncObject for SyncSemaphore {
    fn kind(&self) -> SyncKind {
        SyncKind::Semaphore
    }

    fn lock(&self, timeout_ms: u32) -> bool {
        let wait = wait_bound(timeout_ms);
        let mut permits = self.permits.lock();
        loop {
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            match wait {
                Wait::Now => return false,
                Wait::Forever => self.available.wait(&mut permits),
                Wait::Until(deadline) => {
                    if Instant::now() >= deadline
                        || self
                            .available
                            .wait_until(&mut permits, deadline)
                            .timed_out()
                    {
                        if *permits > 0 {
                            *permits -= 1;
                            return true;
                        }
                        return false;
                    }
                }
            }
        }
    }

    fn unlock(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits >= self.max_count {
            return false;
        }
        *permits += 1;
        self.available.notify_one();
        true
    }

    fn is_valid(&self) -> bool {
        self.max_count > 0
    }
}

// ============================================================================
// Timer
// ============================================================================

/// Deadline object: `lock` succeeds once the armed deadline has passed.
///
/// `unlock` re-arms the timer from now with the original period.
pub struct SyncTimer {
    due: Mutex<Option<Instant>>,
    rearmed: Condvar,
    period: Duration,
}

impl SyncTimer {
    /// Arm a timer that fires `period_ms` milliseconds from now.
    pub fn new(period_ms: u32) -> Self {
        let period = Duration::from_millis(u64::from(period_ms));
        Self {
            due: Mutex::new(Some(Instant::now() + period)),
            rearmed: Condvar::new(),
            period,
        }
    }
}

impl SyncObject for SyncTimer {
    fn kind(&self) -> SyncKind {
        SyncKind::Timer
    }

    fn lock(&self, timeout_ms: u32) -> bool {
        let wait = wait_bound(timeout_ms);
        let mut due = self.due.lock();
        loop {
            let fire_at = match *due {
                Some(at) => at,
                None => return false,
            };
            let now = Instant::now();
            if now >= fire_at {
                return true;
            }
            let bound = match wait {
                Wait::Now => return false,
                Wait::Forever => fire_at,
                Wait::Until(deadline) => {
                    if now >= deadline {
                        return false;
                    }
                    fire_at.min(deadline)
                }
            };
            // Waking early (re-arm) or at the bound both re-evaluate the
            // deadline at the top of the loop.
            let _ = self.rearmed.wait_until(&mut due, bound);
        }
    }

    fn unlock(&self) -> bool {
        let mut due = self.due.lock();
        *due = Some(Instant::now() + self.period);
        self.rearmed.notify_all();
        true
    }

    fn is_valid(&self) -> bool {
        self.due.lock().is_some()
    }
}

// ============================================================================
// No-op lock
// ============================================================================

/// Satisfies the `SyncObject` contract without ever blocking; lets
/// single-threaded configurations share code paths with threaded ones.
pub struct NoLock;

impl SyncObject for NoLock {
    fn kind(&self) -> SyncKind {
        SyncKind::NoLock
    }
    fn lock(&self, _timeout_ms: u32) -> bool {
        true
    }
    fn unlock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mutex_try_lock_on_held_mutex_fails_immediately() {
        let mutex = Arc::new(SyncMutex::new());
        assert!(mutex.lock(WAIT_INFINITE));

        let contender = Arc::clone(&mutex);
        let started = Instant::now();
        let handle = thread::spawn(move || contender.lock(DO_NOT_WAIT));
        assert!(!handle.join().unwrap());
        // "Immediately": no blocking wait happened.
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(mutex.unlock());
    }

    #[test]
    fn mutex_is_recursive_for_the_owner() {
        let mutex = SyncMutex::new();
        assert!(mutex.lock(WAIT_INFINITE));
        assert!(mutex.lock(DO_NOT_WAIT));
        assert!(mutex.unlock());
        assert!(mutex.unlock());
        // Fully released now.
        assert!(!mutex.unlock());
    }

    #[test]
    fn mutex_timed_lock_expires() {
        let mutex = Arc::new(SyncMutex::new());
        assert!(mutex.lock(WAIT_INFINITE));

        let contender = Arc::clone(&mutex);
        let handle = thread::spawn(move || contender.lock(50));
        assert!(!handle.join().unwrap());

        assert!(mutex.unlock());
    }

    #[test]
    fn unlock_from_non_owner_fails() {
        let mutex = Arc::new(SyncMutex::new());
        assert!(mutex.lock(WAIT_INFINITE));

        let stranger = Arc::clone(&mutex);
        assert!(!thread::spawn(move || stranger.unlock()).join().unwrap());

        assert!(mutex.unlock());
    }

    #[test]
    fn mutex_handover_to_waiter() {
        let mutex = Arc::new(SyncMutex::new());
        assert!(mutex.lock(WAIT_INFINITE));

        let waiter = Arc::clone(&mutex);
        let handle = thread::spawn(move || {
            let acquired = waiter.lock(WAIT_INFINITE);
            if acquired {
                waiter.unlock();
            }
            acquired
        });

        thread::sleep(Duration::from_millis(20));
        assert!(mutex.unlock());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn manual_reset_event_releases_all_waiters() {
        let event = Arc::new(SyncEvent::new(false));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let ev = Arc::clone(&event);
                thread::spawn(move || ev.lock(WAIT_INFINITE))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        event.set_event();
        for w in waiters {
            assert!(w.join().unwrap());
        }
        // Manual reset: still signaled.
        assert!(event.lock(DO_NOT_WAIT));
    }

    #[test]
    fn auto_reset_event_consumes_the_signal() {
        let event = SyncEvent::new(true);
        event.set_event();
        assert!(event.lock(DO_NOT_WAIT));
        assert!(!event.lock(DO_NOT_WAIT));
    }

    #[test]
    fn event_timed_wait_expires_unsignaled() {
        let event = SyncEvent::new(false);
        let started = Instant::now();
        assert!(!event.lock(30));
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn semaphore_counts_permits() {
        let sem = SyncSemaphore::new(2, 2);
        assert!(sem.lock(DO_NOT_WAIT));
        assert!(sem.lock(DO_NOT_WAIT));
        assert!(!sem.lock(DO_NOT_WAIT));
        assert!(sem.unlock());
        assert!(sem.lock(DO_NOT_WAIT));
    }

    #[test]
    fn semaphore_rejects_release_above_max() {
        let sem = SyncSemaphore::new(1, 1);
        assert!(!sem.unlock());
        assert!(sem.lock(DO_NOT_WAIT));
        assert!(sem.unlock());
    }

    #[test]
    fn timer_fires_after_deadline() {
        let timer = SyncTimer::new(20);
        assert!(!timer.lock(DO_NOT_WAIT));
        assert!(timer.lock(WAIT_INFINITE));
        // Re-arm pushes the deadline out again.
        assert!(timer.unlock());
        assert!(!timer.lock(DO_NOT_WAIT));
    }

    #[test]
    fn nolock_never_blocks() {
        let nolock = NoLock;
        assert!(nolock.lock(DO_NOT_WAIT));
        assert!(nolock.lock(WAIT_INFINITE));
        assert!(nolock.unlock());
        assert!(nolock.is_valid());
    }
}
