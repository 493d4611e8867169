/*!
A single flow table row and the reservation handle readers hold on it
*/

use openflow::messages::*;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Stable handle of an entry inside its table
pub type EntryId = u64;

/// The entry expired or was deleted and is invisible to lookups
pub const TIMER_EXPIRED: u8 = 1 << 0;
/// The entry is a snapshot taken for a reader while the original is replaced
pub const COPY_ON_WRITE: u8 = 1 << 1;

/// The mutable part of a flow entry, replaced by MODIFY
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    pub cookie: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    /// Bitmap of OFPFF_* flags
    pub flags: u16,
    pub instructions: Vec<OfpInstruction>,
    /// All ports the instructions output to
    pub out_ports: Vec<u32>,
    /// All groups the instructions forward to
    pub out_groups: Vec<u32>,
}

impl FlowState {
    pub fn from_flow_mod(flow_mod: &OfpFlowMod) -> FlowState {
        FlowState {
            cookie: flow_mod.cookie,
            idle_timeout: flow_mod.idle_timeout,
            hard_timeout: flow_mod.hard_timeout,
            flags: flow_mod.flags,
            out_ports: OfpInstruction::output_ports(&flow_mod.instructions),
            out_groups: OfpInstruction::group_ids(&flow_mod.instructions),
            instructions: flow_mod.instructions.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One flow table row.
///
/// The match and priority identify the entry and never change.
/// Readers that keep using an entry after a lookup hold a `Reservation`,
/// which keeps the usage counter above zero and defers the final removal.
#[derive(Debug)]
pub struct FlowEntry {
    id: EntryId,
    table_id: u8,
    match_field: OfpMatch,
    priority: u16,
    state: RwLock<FlowState>,
    created: Instant,
    last_used: Mutex<Instant>,
    usage: AtomicUsize,
    flags: AtomicU8,
    removal_reason: Mutex<Option<OfpFlowRemovedReason>>,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
}

impl FlowEntry {
    pub fn new(id: EntryId, table_id: u8, flow_mod: &OfpFlowMod, now: Instant) -> FlowEntry {
        FlowEntry {
            id,
            table_id,
            match_field: flow_mod.match_field.clone(),
            priority: flow_mod.priority,
            state: RwLock::new(FlowState::from_flow_mod(flow_mod)),
            created: now,
            last_used: Mutex::new(now),
            usage: AtomicUsize::new(0),
            flags: AtomicU8::new(0),
            removal_reason: Mutex::new(None),
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn table_id(&self) -> u8 {
        self.table_id
    }

    pub fn match_field(&self) -> &OfpMatch {
        &self.match_field
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Read access to the replaceable part
    pub fn state(&self) -> RwLockReadGuard<FlowState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<FlowState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cookie(&self) -> u64 {
        self.state().cookie
    }

    pub fn instructions(&self) -> Vec<OfpInstruction> {
        self.state().instructions.clone()
    }

    pub fn sends_flow_removed(&self) -> bool {
        self.state().flags & OFPFF_SEND_FLOW_REM != 0
    }

    /// Checks the cookie against a controller's cookie filter.
    /// A mask of 0 matches every entry.
    pub fn cookie_matches(&self, cookie: u64, cookie_mask: u64) -> bool {
        self.cookie() & cookie_mask == cookie & cookie_mask
    }

    /// Checks the out_port and out_group filters of delete and stats requests
    pub fn forwards_to(&self, out_port: u32, out_group: u32) -> bool {
        let state = self.state();
        (out_port == OFPP_ANY || state.out_ports.contains(&out_port))
            && (out_group == OFPG_ANY || state.out_groups.contains(&out_group))
    }

    /// Strict identity: same match and same priority
    pub fn is_identical(&self, match_field: &OfpMatch, priority: u16) -> bool {
        self.priority == priority && self.match_field.overlaps(match_field, true)
    }

    /// Takes a reservation. Fails for an entry that is not visible any more.
    ///
    /// The counter goes up before the flag is checked and `disable` sets
    /// the flag before its owner reads the counter, so either the
    /// reservation fails or the owner sees it and keeps a tombstone.
    pub fn sem_inc(&self) -> bool {
        self.usage.fetch_add(1, Ordering::SeqCst);
        if self.is_disabled() {
            self.sem_dec();
            return false;
        }
        true
    }

    /// Releases a reservation. Never drops below zero.
    pub fn sem_dec(&self) {
        let mut current = self.usage.load(Ordering::SeqCst);
        while current > 0 {
            match self.usage.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & TIMER_EXPIRED != 0
    }

    pub fn is_copy(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & COPY_ON_WRITE != 0
    }

    /// Makes the entry invisible. Only the first call succeeds and records the reason.
    pub fn disable(&self, reason: OfpFlowRemovedReason) -> bool {
        let previous = self.flags.fetch_or(TIMER_EXPIRED, Ordering::SeqCst);
        if previous & TIMER_EXPIRED != 0 {
            return false;
        }
        *lock(&self.removal_reason) = Some(reason);
        true
    }

    pub fn removal_reason(&self) -> Option<OfpFlowRemovedReason> {
        *lock(&self.removal_reason)
    }

    /// Accounts a packet that hit this entry
    pub fn used(&self, now: Instant, bytes: usize) {
        let flags = self.state().flags;
        if flags & OFPFF_NO_PKT_COUNTS == 0 {
            self.packet_count.fetch_add(1, Ordering::Relaxed);
        }
        if flags & OFPFF_NO_BYT_COUNTS == 0 {
            self.byte_count.fetch_add(bytes as u64, Ordering::Relaxed);
        }
        let mut last_used = lock(&self.last_used);
        if now > *last_used {
            *last_used = now;
        }
    }

    pub fn last_used(&self) -> Instant {
        *lock(&self.last_used)
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.packet_count.store(0, Ordering::Relaxed);
        self.byte_count.store(0, Ordering::Relaxed);
    }

    /// Takes over the counters of a replaced entry
    pub fn copy_counters(&self, other: &FlowEntry) {
        self.packet_count
            .store(other.packet_count(), Ordering::Relaxed);
        self.byte_count.store(other.byte_count(), Ordering::Relaxed);
    }

    /// A detached snapshot of the entry, e.g. to report a replaced entry
    pub fn snapshot(&self) -> FlowEntry {
        let copy = FlowEntry {
            id: self.id,
            table_id: self.table_id,
            match_field: self.match_field.clone(),
            priority: self.priority,
            state: RwLock::new(self.state().clone()),
            created: self.created,
            last_used: Mutex::new(self.last_used()),
            usage: AtomicUsize::new(0),
            flags: AtomicU8::new(self.flags.load(Ordering::SeqCst) | COPY_ON_WRITE),
            removal_reason: Mutex::new(self.removal_reason()),
            packet_count: AtomicU64::new(self.packet_count()),
            byte_count: AtomicU64::new(self.byte_count()),
        };
        copy
    }

    /// The time the entry has been alive as (seconds, nanoseconds)
    pub fn duration(&self, now: Instant) -> (u32, u32) {
        let alive = if now > self.created {
            now - self.created
        } else {
            Duration::from_secs(0)
        };
        (alive.as_secs() as u32, alive.subsec_nanos())
    }

    pub fn flow_stats(&self, now: Instant) -> OfpFlowStats {
        let state = self.state();
        let (duration_sec, duration_nsec) = self.duration(now);
        OfpFlowStats {
            table_id: self.table_id,
            duration_sec,
            duration_nsec,
            priority: self.priority,
            idle_timeout: state.idle_timeout,
            hard_timeout: state.hard_timeout,
            flags: state.flags,
            cookie: state.cookie,
            packet_count: self.packet_count(),
            byte_count: self.byte_count(),
            match_field: self.match_field.clone(),
            instructions: state.instructions.clone(),
        }
    }

    /// The notification for the controller, `None` while the entry is active
    pub fn flow_removed(&self, now: Instant) -> Option<OfpFlowRemoved> {
        let reason = self.removal_reason()?;
        let state = self.state();
        let (duration_sec, duration_nsec) = self.duration(now);
        Some(OfpFlowRemoved {
            cookie: state.cookie,
            priority: self.priority,
            reason,
            table_id: self.table_id,
            duration_sec,
            duration_nsec,
            idle_timeout: state.idle_timeout,
            hard_timeout: state.hard_timeout,
            packet_count: self.packet_count(),
            byte_count: self.byte_count(),
            match_field: self.match_field.clone(),
        })
    }
}

impl fmt::Display for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state();
        let instructions: Vec<String> = state.instructions.iter().map(|i| i.to_string()).collect();
        write!(
            f,
            "table={} priority={} cookie=0x{:x} match={} n_packets={} n_bytes={} idle={} hard={} [{}]",
            self.table_id,
            self.priority,
            state.cookie,
            self.match_field,
            self.packet_count(),
            self.byte_count(),
            state.idle_timeout,
            state.hard_timeout,
            instructions.join(" ")
        )
    }
}

/// A usage reservation on a flow entry.
/// The reservation is released when the handle is dropped.
#[derive(Debug)]
pub struct Reservation {
    entry: Arc<FlowEntry>,
}

impl Reservation {
    /// Reserves `entry`, `None` if it is already disabled
    pub fn new(entry: &Arc<FlowEntry>) -> Option<Reservation> {
        if entry.sem_inc() {
            Some(Reservation {
                entry: entry.clone(),
            })
        } else {
            None
        }
    }

    pub fn entry(&self) -> &Arc<FlowEntry> {
        &self.entry
    }
}

impl Deref for Reservation {
    type Target = FlowEntry;

    fn deref(&self) -> &FlowEntry {
        &self.entry
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.entry.sem_dec();
    }
}
