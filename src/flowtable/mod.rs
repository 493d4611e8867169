/*!
Flow tables: storage, lookup and lifecycle of flow entries

A table is searched by the packet engine and mutated by the protocol side,
possibly from different threads. The entry index sits behind a read/write
lock: lookups take the read lock and reserve their winners before they
release it, FlowMods and expiry take the write lock. Entries leaving the
table are disabled first and kept as tombstones until the last reservation
is gone.
*/

pub mod entry;

pub use self::entry::{EntryId, FlowEntry, FlowState, Reservation};

use openflow;
use openflow::messages::*;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::result;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use timer::TimerQueue;

/// Default capacity of a flow table
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowTableError {
    /// An ADD with CHECK_OVERLAP collides with an existing entry
    Overlap,
    TableFull,
    TableNotFound(u8),
    /// Goto-Table must point to a later, existing table
    BadGotoTable(u8),
    /// An instruction forwards to a group that does not exist
    UnknownGroup(u32),
}

impl error::Error for FlowTableError {
    fn description(&self) -> &str {
        match *self {
            FlowTableError::Overlap => "overlapping flow entry",
            FlowTableError::TableFull => "flow table full",
            FlowTableError::TableNotFound(_) => "no such table",
            FlowTableError::BadGotoTable(_) => "invalid goto table",
            FlowTableError::UnknownGroup(_) => "no such group",
        }
    }
}

impl fmt::Display for FlowTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FlowTableError::TableNotFound(id) => write!(f, "Table {} does not exist", id),
            FlowTableError::BadGotoTable(id) => write!(f, "Cannot go to table {}", id),
            FlowTableError::UnknownGroup(id) => write!(f, "Group {} does not exist", id),
            _ => write!(f, "{}", error::Error::description(self)),
        }
    }
}

impl From<FlowTableError> for openflow::error::Error {
    fn from(e: FlowTableError) -> Self {
        use openflow::error::Error;
        match e {
            FlowTableError::Overlap => Error::FlowModFailed(OfpFlowModFailedCode::Overlap),
            FlowTableError::TableFull => Error::FlowModFailed(OfpFlowModFailedCode::TableFull),
            FlowTableError::TableNotFound(_) => {
                Error::FlowModFailed(OfpFlowModFailedCode::BadTableId)
            }
            FlowTableError::BadGotoTable(_) => {
                Error::BadInstruction(OfpBadInstructionCode::BadTableId)
            }
            FlowTableError::UnknownGroup(_) => Error::BadAction(OfpBadActionCode::BadOutGroup),
        }
    }
}

pub type Result<T> = result::Result<T, FlowTableError>;

/// Reference accounting of the groups flow entries forward to
pub trait GroupRefCounter {
    fn has_group(&self, group_id: u32) -> bool;

    fn inc_ref(&self, group_id: u32);

    fn dec_ref(&self, group_id: u32);
}

/// What happens to packets no entry matches
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissPolicy {
    Controller,
    Continue,
    Drop,
}

/// The capability bitmaps a table announces in its statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableFeatures {
    pub match_fields: u64,
    pub wildcards: u64,
    pub write_actions: u32,
    pub apply_actions: u32,
    pub write_setfields: u64,
    pub apply_setfields: u64,
    pub metadata_match: u64,
    pub metadata_write: u64,
    pub instructions: u32,
}

impl Default for TableFeatures {
    /// Everything the codec knows, except meters
    fn default() -> Self {
        let all_fields = (1u64 << (OxmField::Ipv6Exthdr as u64 + 1)) - 1;
        let all_actions = [
            OfpActionType::Output,
            OfpActionType::CopyTtlOut,
            OfpActionType::CopyTtlIn,
            OfpActionType::SetMplsTtl,
            OfpActionType::DecMplsTtl,
            OfpActionType::PushVlan,
            OfpActionType::PopVlan,
            OfpActionType::PushMpls,
            OfpActionType::PopMpls,
            OfpActionType::SetQueue,
            OfpActionType::Group,
            OfpActionType::SetNwTtl,
            OfpActionType::DecNwTtl,
            OfpActionType::SetField,
            OfpActionType::PushPbb,
            OfpActionType::PopPbb,
        ].iter()
            .fold(0, |bits, t| bits | 1 << (*t as u32));
        let instructions = [
            OfpInstructionType::GotoTable,
            OfpInstructionType::WriteMetadata,
            OfpInstructionType::WriteActions,
            OfpInstructionType::ApplyActions,
            OfpInstructionType::ClearActions,
        ].iter()
            .fold(0, |bits, t| bits | 1 << (*t as u32));
        TableFeatures {
            match_fields: all_fields,
            wildcards: all_fields,
            write_actions: all_actions,
            apply_actions: all_actions,
            write_setfields: all_fields,
            apply_setfields: all_fields,
            metadata_match: u64::max_value(),
            metadata_write: u64::max_value(),
            instructions,
        }
    }
}

/// The outcome of a flow table search
#[derive(Debug)]
pub enum Lookup {
    Miss,
    Matched(Reservation),
    /// Several entries with the same hits and priority match
    Ambiguous(Vec<Reservation>),
}

impl Lookup {
    pub fn is_miss(&self) -> bool {
        match *self {
            Lookup::Miss => true,
            _ => false,
        }
    }

    /// All reserved winners
    pub fn into_vec(self) -> Vec<Reservation> {
        match self {
            Lookup::Miss => vec![],
            Lookup::Matched(r) => vec![r],
            Lookup::Ambiguous(rs) => rs,
        }
    }
}

/// The entries a FlowMod touched
#[derive(Debug, Default)]
pub struct FlowModResult {
    pub added: Option<Arc<FlowEntry>>,
    /// Identical entries an ADD replaced; no notification is due for them
    pub replaced: Vec<Arc<FlowEntry>>,
    pub modified: Vec<Arc<FlowEntry>>,
    /// Entries a DELETE removed, disabled with reason DELETE
    pub removed: Vec<Arc<FlowEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FlowTimer {
    Idle,
    Hard,
}

#[derive(Debug, Default)]
struct TableIndex {
    entries: BTreeMap<EntryId, Arc<FlowEntry>>,
    /// Removed entries that are still reserved
    tombstones: Vec<Arc<FlowEntry>>,
    next_id: EntryId,
}

#[derive(Debug)]
pub struct FlowTable {
    table_id: u8,
    name: String,
    features: TableFeatures,
    max_entries: usize,
    config: AtomicU32,
    index: RwLock<TableIndex>,
    timers: Mutex<TimerQueue<(EntryId, FlowTimer)>>,
    lookup_count: AtomicU64,
    matched_count: AtomicU64,
}

impl FlowTable {
    pub fn new(table_id: u8, max_entries: usize) -> FlowTable {
        FlowTable {
            table_id,
            name: format!("table{}", table_id),
            features: TableFeatures::default(),
            max_entries,
            config: AtomicU32::new(OFPTC_TABLE_MISS_CONTROLLER),
            index: RwLock::new(TableIndex::default()),
            timers: Mutex::new(TimerQueue::new()),
            lookup_count: AtomicU64::new(0),
            matched_count: AtomicU64::new(0),
        }
    }

    pub fn table_id(&self) -> u8 {
        self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn read(&self) -> RwLockReadGuard<TableIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<TableIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    fn timers(&self) -> MutexGuard<TimerQueue<(EntryId, FlowTimer)>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bitmap of OFPTC_* flags
    pub fn config(&self) -> u32 {
        self.config.load(Ordering::Relaxed)
    }

    pub fn set_config(&self, config: u32) {
        self.config.store(config, Ordering::Relaxed);
    }

    pub fn miss_policy(&self) -> MissPolicy {
        match self.config() & OFPTC_TABLE_MISS_MASK {
            OFPTC_TABLE_MISS_CONTROLLER => MissPolicy::Controller,
            OFPTC_TABLE_MISS_CONTINUE => MissPolicy::Continue,
            _ => MissPolicy::Drop,
        }
    }

    /// Entries visible to lookups
    pub fn active_count(&self) -> usize {
        self.read().entries.len()
    }

    /// Visible entries plus removed ones that are still reserved
    pub fn size(&self) -> usize {
        let index = self.read();
        index.entries.len() + index.tombstones.len()
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookup_count.load(Ordering::Relaxed)
    }

    pub fn matched_count(&self) -> u64 {
        self.matched_count.load(Ordering::Relaxed)
    }

    pub fn get(&self, id: EntryId) -> Option<Arc<FlowEntry>> {
        self.read().entries.get(&id).cloned()
    }

    /// A snapshot of all visible entries
    pub fn entries(&self) -> Vec<Arc<FlowEntry>> {
        self.read().entries.values().cloned().collect()
    }

    /// Searches the entries that match `packet` best.
    ///
    /// Entries are ranked by the number of fields they hit, then by the
    /// number of exact hits and last by priority. All winners are reserved
    /// before the table lock is released.
    pub fn find_best_matches(&self, packet: &OfpMatch) -> Lookup {
        self.lookup_count.fetch_add(1, Ordering::Relaxed);
        let mut winners = {
            let index = self.read();
            let mut best = None;
            let mut candidates: Vec<&Arc<FlowEntry>> = vec![];
            for entry in index.entries.values() {
                if entry.is_disabled() {
                    continue;
                }
                let hits = entry.match_field().hits(packet);
                if hits.missed > 0 {
                    continue;
                }
                let rank = (hits.total(), hits.exact, entry.priority());
                match best {
                    Some(top) if rank < top => {}
                    Some(top) if rank == top => candidates.push(entry),
                    _ => {
                        best = Some(rank);
                        candidates.clear();
                        candidates.push(entry);
                    }
                }
            }
            candidates
                .into_iter()
                .filter_map(Reservation::new)
                .collect::<Vec<_>>()
        };
        if !winners.is_empty() {
            self.matched_count.fetch_add(1, Ordering::Relaxed);
        }
        match winners.len() {
            0 => Lookup::Miss,
            1 => Lookup::Matched(winners.remove(0)),
            _ => Lookup::Ambiguous(winners),
        }
    }

    /// Applies a FlowMod to this table. Nothing changes if an error is returned.
    pub fn update(
        &self,
        flow_mod: &OfpFlowMod,
        now: Instant,
        groups: &dyn GroupRefCounter,
    ) -> Result<FlowModResult> {
        self.reclaim();
        match flow_mod.command {
            OfpFlowModCommand::Add => self.add(flow_mod, now, groups),
            OfpFlowModCommand::Modify | OfpFlowModCommand::ModifyStrict => {
                self.modify(flow_mod, now, groups)
            }
            OfpFlowModCommand::Delete | OfpFlowModCommand::DeleteStrict => {
                Ok(FlowModResult {
                    removed: self.delete(flow_mod, groups),
                    ..Default::default()
                })
            }
        }
    }

    fn add(
        &self,
        flow_mod: &OfpFlowMod,
        now: Instant,
        groups: &dyn GroupRefCounter,
    ) -> Result<FlowModResult> {
        let mut index = self.write();
        self.insert(&mut index, flow_mod, now, groups)
    }

    fn insert(
        &self,
        index: &mut TableIndex,
        flow_mod: &OfpFlowMod,
        now: Instant,
        groups: &dyn GroupRefCounter,
    ) -> Result<FlowModResult> {
        if flow_mod.flags & OFPFF_CHECK_OVERLAP != 0
            && index.entries.values().any(|e| {
                !e.is_disabled() && e.match_field().overlaps(&flow_mod.match_field, false)
            }) {
            debug!("Table {}: rejecting overlapping entry {}", self.table_id, flow_mod.match_field);
            return Err(FlowTableError::Overlap);
        }
        let duplicates: Vec<EntryId> = index
            .entries
            .values()
            .filter(|e| e.is_identical(&flow_mod.match_field, flow_mod.priority))
            .map(|e| e.id())
            .collect();
        if duplicates.is_empty() && index.entries.len() >= self.max_entries {
            return Err(FlowTableError::TableFull);
        }

        let entry = Arc::new(FlowEntry::new(index.next_id, self.table_id, flow_mod, now));
        index.next_id += 1;
        let mut result = FlowModResult::default();
        for id in duplicates {
            if let Some(old) = self.unlink(index, id, OfpFlowRemovedReason::Delete, groups) {
                if flow_mod.flags & OFPFF_RESET_COUNTS == 0 {
                    entry.copy_counters(&old);
                }
                result.replaced.push(old);
            }
        }
        for group_id in &entry.state().out_groups {
            groups.inc_ref(*group_id);
        }
        index.entries.insert(entry.id(), entry.clone());
        self.arm_timers(&entry, now);
        debug!("Table {}: added {}", self.table_id, entry);
        result.added = Some(entry);
        Ok(result)
    }

    fn modify(
        &self,
        flow_mod: &OfpFlowMod,
        now: Instant,
        groups: &dyn GroupRefCounter,
    ) -> Result<FlowModResult> {
        let strict = flow_mod.command.is_strict();
        let mut index = self.write();
        let targets: Vec<Arc<FlowEntry>> = index
            .entries
            .values()
            .filter(|e| !e.is_disabled() && selects(e, flow_mod, strict))
            .cloned()
            .collect();
        if targets.is_empty() {
            return self.insert(&mut index, flow_mod, now, groups);
        }

        let replacement = FlowState::from_flow_mod(flow_mod);
        for entry in &targets {
            {
                let mut state = entry.state_mut();
                for group_id in &state.out_groups {
                    groups.dec_ref(*group_id);
                }
                let flags = state.flags;
                *state = replacement.clone();
                state.flags = flags;
                for group_id in &state.out_groups {
                    groups.inc_ref(*group_id);
                }
            }
            if flow_mod.flags & OFPFF_RESET_COUNTS != 0 {
                entry.reset_counters();
            }
            self.arm_timers(entry, now);
            debug!("Table {}: modified {}", self.table_id, entry);
        }
        Ok(FlowModResult {
            modified: targets,
            ..Default::default()
        })
    }

    fn delete(&self, flow_mod: &OfpFlowMod, groups: &dyn GroupRefCounter) -> Vec<Arc<FlowEntry>> {
        let strict = flow_mod.command.is_strict();
        let mut index = self.write();
        let targets: Vec<EntryId> = index
            .entries
            .values()
            .filter(|e| {
                selects(e, flow_mod, strict) && e.forwards_to(flow_mod.out_port, flow_mod.out_group)
            })
            .map(|e| e.id())
            .collect();
        let removed: Vec<Arc<FlowEntry>> = targets
            .into_iter()
            .filter_map(|id| self.unlink(&mut index, id, OfpFlowRemovedReason::Delete, groups))
            .collect();
        if !removed.is_empty() {
            debug!("Table {}: deleted {} entries", self.table_id, removed.len());
        }
        removed
    }

    /// Removes all entries that forward to a group that is gone
    pub fn remove_group_references(
        &self,
        group_id: u32,
        groups: &dyn GroupRefCounter,
    ) -> Vec<Arc<FlowEntry>> {
        let mut index = self.write();
        let targets: Vec<EntryId> = index
            .entries
            .values()
            .filter(|e| e.state().out_groups.contains(&group_id))
            .map(|e| e.id())
            .collect();
        targets
            .into_iter()
            .filter_map(|id| {
                self.unlink(&mut index, id, OfpFlowRemovedReason::GroupDelete, groups)
            })
            .collect()
    }

    /// Takes an entry out of the index. The entry is disabled at once,
    /// a reserved entry stays around as a tombstone.
    fn unlink(
        &self,
        index: &mut TableIndex,
        id: EntryId,
        reason: OfpFlowRemovedReason,
        groups: &dyn GroupRefCounter,
    ) -> Option<Arc<FlowEntry>> {
        let entry = index.entries.remove(&id)?;
        if !entry.disable(reason) {
            return None;
        }
        for group_id in &entry.state().out_groups {
            groups.dec_ref(*group_id);
        }
        {
            let mut timers = self.timers();
            timers.cancel(&(id, FlowTimer::Idle));
            timers.cancel(&(id, FlowTimer::Hard));
        }
        if entry.usage() > 0 {
            trace!("Table {}: entry {} is in use, deferring its removal", self.table_id, id);
            index.tombstones.push(entry.clone());
        }
        Some(entry)
    }

    fn arm_timers(&self, entry: &FlowEntry, now: Instant) {
        let (idle, hard) = {
            let state = entry.state();
            (state.idle_timeout, state.hard_timeout)
        };
        let mut timers = self.timers();
        let id = entry.id();
        if idle > 0 {
            timers.register((id, FlowTimer::Idle), now, Duration::from_secs(u64::from(idle)));
        } else {
            timers.cancel(&(id, FlowTimer::Idle));
        }
        if hard > 0 {
            timers.register((id, FlowTimer::Hard), now, Duration::from_secs(u64::from(hard)));
        } else {
            timers.cancel(&(id, FlowTimer::Hard));
        }
    }

    /// The next idle or hard timeout
    pub fn next_timeout(&self) -> Option<Instant> {
        self.timers().next_deadline()
    }

    /// Removes the entries whose idle or hard timeout has passed.
    ///
    /// An idle timer is checked against the last use of the entry and
    /// rearmed for the rest of the period if the entry was used meanwhile.
    pub fn expire(&self, now: Instant, groups: &dyn GroupRefCounter) -> Vec<Arc<FlowEntry>> {
        self.reclaim();
        let fired = self.timers().expired(now);
        let mut expired = vec![];
        for (id, timer) in fired {
            let entry = match self.get(id) {
                Some(entry) => entry,
                None => continue,
            };
            let reason = match timer {
                FlowTimer::Hard => OfpFlowRemovedReason::HardTimeout,
                FlowTimer::Idle => {
                    let idle = Duration::from_secs(u64::from(entry.state().idle_timeout));
                    let deadline = entry.last_used() + idle;
                    if deadline > now {
                        self.timers()
                            .register((id, FlowTimer::Idle), now, deadline - now);
                        continue;
                    }
                    OfpFlowRemovedReason::IdleTimeout
                }
            };
            let mut index = self.write();
            if let Some(entry) = self.unlink(&mut index, id, reason, groups) {
                debug!("Table {}: {:?} of {}", self.table_id, reason, entry);
                expired.push(entry);
            }
        }
        expired
    }

    /// Drops the tombstones nobody holds a reservation for any more
    pub fn reclaim(&self) -> usize {
        let mut index = self.write();
        let before = index.tombstones.len();
        index.tombstones.retain(|e| e.usage() > 0);
        before - index.tombstones.len()
    }

    /// Removes every entry, without notifications
    pub fn clear(&self, groups: &dyn GroupRefCounter) {
        let mut index = self.write();
        let ids: Vec<EntryId> = index.entries.keys().cloned().collect();
        for id in ids {
            self.unlink(&mut index, id, OfpFlowRemovedReason::Delete, groups);
        }
    }

    fn stats_selects(entry: &FlowEntry, request: &OfpFlowStatsRequest) -> bool {
        !entry.is_disabled()
            && entry.match_field().overlaps(&request.match_field, false)
            && entry.forwards_to(request.out_port, request.out_group)
            && entry.cookie_matches(request.cookie, request.cookie_mask)
    }

    pub fn flow_stats(&self, request: &OfpFlowStatsRequest, now: Instant) -> Vec<OfpFlowStats> {
        self.read()
            .entries
            .values()
            .filter(|e| Self::stats_selects(e, request))
            .map(|e| e.flow_stats(now))
            .collect()
    }

    /// Adds the counters of all selected entries to `aggregate`
    pub fn aggregate_stats(&self, request: &OfpFlowStatsRequest, aggregate: &mut OfpAggregateStats) {
        for entry in self.read().entries.values() {
            if Self::stats_selects(entry, request) {
                aggregate.packet_count += entry.packet_count();
                aggregate.byte_count += entry.byte_count();
                aggregate.flow_count += 1;
            }
        }
    }

    pub fn table_stats(&self) -> OfpTableStats {
        let features = &self.features;
        OfpTableStats {
            table_id: self.table_id,
            name: self.name.clone(),
            match_fields: features.match_fields,
            wildcards: features.wildcards,
            write_actions: features.write_actions,
            apply_actions: features.apply_actions,
            write_setfields: features.write_setfields,
            apply_setfields: features.apply_setfields,
            metadata_match: features.metadata_match,
            metadata_write: features.metadata_write,
            instructions: features.instructions,
            config: self.config(),
            max_entries: self.max_entries as u32,
            active_count: self.active_count() as u32,
            lookup_count: self.lookup_count(),
            matched_count: self.matched_count(),
        }
    }
}

/// Match selection of MODIFY and DELETE, including the cookie filter
fn selects(entry: &FlowEntry, flow_mod: &OfpFlowMod, strict: bool) -> bool {
    let by_match = if strict {
        entry.is_identical(&flow_mod.match_field, flow_mod.priority)
    } else {
        entry.match_field().overlaps(&flow_mod.match_field, false)
    };
    by_match && entry.cookie_matches(flow_mod.cookie, flow_mod.cookie_mask)
}

impl fmt::Display for FlowTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} (id {}): {} entries, lookups {}, matched {}",
            self.name,
            self.table_id,
            self.active_count(),
            self.lookup_count(),
            self.matched_count()
        )?;
        for entry in self.entries() {
            writeln!(f, "  {}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::RefCell;
    use std::collections::{BTreeSet, HashMap};
    use std::thread;

    /// Group accounting for tests: every group exists
    #[derive(Default)]
    pub struct RefLog {
        pub refs: RefCell<HashMap<u32, i32>>,
    }

    impl RefLog {
        pub fn count(&self, group_id: u32) -> i32 {
            self.refs.borrow().get(&group_id).cloned().unwrap_or(0)
        }
    }

    impl GroupRefCounter for RefLog {
        fn has_group(&self, _group_id: u32) -> bool {
            true
        }

        fn inc_ref(&self, group_id: u32) {
            *self.refs.borrow_mut().entry(group_id).or_insert(0) += 1;
        }

        fn dec_ref(&self, group_id: u32) {
            *self.refs.borrow_mut().entry(group_id).or_insert(0) -= 1;
        }
    }

    /// Group accounting that threads can share
    #[derive(Default)]
    struct SharedRefs(Mutex<HashMap<u32, i32>>);

    impl SharedRefs {
        fn count(&self, group_id: u32) -> i32 {
            self.0.lock().unwrap().get(&group_id).cloned().unwrap_or(0)
        }
    }

    impl GroupRefCounter for SharedRefs {
        fn has_group(&self, _group_id: u32) -> bool {
            true
        }

        fn inc_ref(&self, group_id: u32) {
            *self.0.lock().unwrap().entry(group_id).or_insert(0) += 1;
        }

        fn dec_ref(&self, group_id: u32) {
            *self.0.lock().unwrap().entry(group_id).or_insert(0) -= 1;
        }
    }

    struct NoGroups;

    impl GroupRefCounter for NoGroups {
        fn has_group(&self, _group_id: u32) -> bool {
            false
        }

        fn inc_ref(&self, _group_id: u32) {}

        fn dec_ref(&self, _group_id: u32) {}
    }

    fn add(priority: u16, match_field: OfpMatch) -> OfpFlowMod {
        OfpFlowMod::new(
            OfpFlowModCommand::Add,
            0,
            priority,
            match_field,
            vec![OfpInstruction::ApplyActions(vec![OfpAction::output(2)])],
        )
    }

    fn in_port(port: u32) -> OfpMatch {
        OfpMatch::new().with(OfpOxmTlv::new_in_port(port))
    }

    fn packet(port: u32) -> OfpMatch {
        in_port(port).with(OfpOxmTlv::new_eth_type(0x0800))
    }

    #[test]
    fn single_entry_lookup() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        table.update(&add(10, in_port(1)), now, &NoGroups).unwrap();
        match table.find_best_matches(&packet(1)) {
            Lookup::Matched(r) => assert_eq!(10, r.priority()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(1, table.lookup_count());
        assert_eq!(1, table.matched_count());
        assert!(table.find_best_matches(&packet(2)).is_miss());
        assert_eq!(2, table.lookup_count());
        assert_eq!(1, table.matched_count());
    }

    #[test]
    fn exact_hits_beat_wildcards() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        table.update(&add(5, OfpMatch::new()), now, &NoGroups).unwrap();
        table.update(&add(5, in_port(2)), now, &NoGroups).unwrap();
        match table.find_best_matches(&packet(2)) {
            Lookup::Matched(r) => assert_eq!(Some(2), r.match_field().in_port()),
            other => panic!("unexpected {:?}", other),
        }
        match table.find_best_matches(&packet(3)) {
            Lookup::Matched(r) => assert!(r.match_field().is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn winners_share_rank() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        let eth = OfpMatch::new().with(OfpOxmTlv::new_eth_type(0x0800));
        table.update(&add(7, in_port(1)), now, &NoGroups).unwrap();
        table.update(&add(7, eth.clone()), now, &NoGroups).unwrap();
        table.update(&add(3, in_port(1).with(OfpOxmTlv::new_eth_type(0x0806))), now, &NoGroups)
            .unwrap();
        let winners = match table.find_best_matches(&packet(1)) {
            Lookup::Ambiguous(winners) => winners,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(2, winners.len());
        for w in &winners {
            let hits = w.match_field().hits(&packet(1));
            assert_eq!((2, 1, 7), (hits.total(), hits.exact, w.priority()));
            assert_eq!(1, w.usage());
        }
        drop(winners);

        table.update(&add(8, eth), now, &NoGroups).unwrap();
        match table.find_best_matches(&packet(1)) {
            Lookup::Matched(r) => assert_eq!(8, r.priority()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reservations_balance() {
        let table = FlowTable::new(0, 16);
        table.update(&add(1, in_port(1)), Instant::now(), &NoGroups).unwrap();
        let entry = table.entries().remove(0);
        for _ in 0..3 {
            let lookup = table.find_best_matches(&packet(1));
            assert_eq!(1, entry.usage());
            drop(lookup);
        }
        assert_eq!(0, entry.usage());
    }

    #[test]
    fn concurrent_lookups_and_deletes() {
        let table = Arc::new(FlowTable::new(0, 256));
        let now = Instant::now();
        for port in 0..64 {
            table.update(&add(1, in_port(port)), now, &NoGroups).unwrap();
        }
        let entries = table.entries();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let lookup = table.find_best_matches(&packet(i % 64));
                        for r in lookup.into_vec() {
                            assert!(!r.is_disabled() || r.usage() > 0);
                        }
                    }
                })
            })
            .collect();
        for port in 0..64 {
            let mut delete = add(1, in_port(port));
            delete.command = OfpFlowModCommand::DeleteStrict;
            table.update(&delete, now, &NoGroups).unwrap();
        }
        for w in workers {
            w.join().unwrap();
        }
        assert!(entries.iter().all(|e| e.usage() == 0));
        table.reclaim();
        assert_eq!(0, table.size());
    }

    #[test]
    fn concurrent_modifies_and_deletes() {
        let table = Arc::new(FlowTable::new(0, 256));
        let groups = Arc::new(SharedRefs::default());
        let now = Instant::now();
        for port in 0..32 {
            table.update(&add(1, in_port(port)), now, &*groups).unwrap();
        }
        let modifier = {
            let table = table.clone();
            let groups = groups.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let mut modify = OfpFlowMod::new(
                        OfpFlowModCommand::Modify,
                        0,
                        1,
                        OfpMatch::new(),
                        vec![OfpInstruction::ApplyActions(vec![OfpAction::Group(3 + i % 2)])],
                    );
                    modify.hard_timeout = 30;
                    table.update(&modify, now, &*groups).unwrap();
                }
            })
        };
        for port in 0..32 {
            let mut delete = add(1, in_port(port));
            delete.command = OfpFlowModCommand::DeleteStrict;
            table.update(&delete, now, &*groups).unwrap();
        }
        modifier.join().unwrap();

        let entries = table.entries();
        for group_id in 3..5 {
            let referencing = entries
                .iter()
                .filter(|e| e.state().out_groups.contains(&group_id))
                .count();
            assert_eq!(referencing as i32, groups.count(group_id));
        }
        // removed entries keep no timers
        let armed = entries.iter().filter(|e| e.state().hard_timeout > 0).count();
        assert_eq!(armed, table.timers().len());
    }

    fn random_match(rng: &mut StdRng) -> OfpMatch {
        let mut m = OfpMatch::new();
        if rng.gen() {
            m = m.with(OfpOxmTlv::new_in_port(rng.gen_range(1, 4)));
        }
        if rng.gen() {
            m = m.with(OfpOxmTlv::new_eth_type(0x0800));
            if rng.gen() {
                m = m.with(OfpOxmTlv::new_ip_proto(if rng.gen() { 6 } else { 17 }));
            }
        } else if rng.gen() {
            m = m.with(OfpOxmTlv::new_eth_type(0x0806));
        }
        if rng.gen_range(0, 3) == 0 {
            let mask = 0xf0u64 << (4 * rng.gen_range(0u32, 2));
            m = m.with(OfpOxmTlv::new_metadata(rng.gen_range(0, 256), mask));
        }
        m
    }

    fn random_packet(rng: &mut StdRng) -> OfpMatch {
        let mut m = in_port(rng.gen_range(1, 4));
        if rng.gen() {
            m = m
                .with(OfpOxmTlv::new_eth_type(0x0800))
                .with(OfpOxmTlv::new_ip_proto(if rng.gen() { 6 } else { 17 }));
        } else {
            m = m.with(OfpOxmTlv::new_eth_type(0x0806));
        }
        m.with(OfpOxmTlv::new_metadata(rng.gen_range(0, 256), u64::max_value()))
    }

    /// (id, match, priority, hard timeout) of every live entry
    type Model = Vec<(EntryId, OfpMatch, u16, u16)>;

    /// The ids with the best (total hits, exact hits, priority), by a full scan
    fn best_by_scan(model: &Model, packet: &OfpMatch) -> BTreeSet<EntryId> {
        let ranked: Vec<_> = model
            .iter()
            .filter_map(|e| {
                let hits = e.1.hits(packet);
                if hits.missed > 0 {
                    None
                } else {
                    Some(((hits.total(), hits.exact, e.2), e.0))
                }
            })
            .collect();
        let best = ranked.iter().map(|r| r.0).max();
        ranked
            .iter()
            .filter(|r| Some(r.0) == best)
            .map(|r| r.1)
            .collect()
    }

    #[test]
    fn random_tables_rank_like_a_full_scan() {
        let mut rng = StdRng::from_seed([7; 32]);
        let start = Instant::now();
        for round in 0..20 {
            let table = FlowTable::new(0, 1024);
            let mut model = Model::new();
            for _ in 0..rng.gen_range(1, 60) {
                let m = random_match(&mut rng);
                let mut flow_mod = add(rng.gen_range(0, 4), m.clone());
                flow_mod.hard_timeout = rng.gen_range(0, 4);
                let result = table.update(&flow_mod, start, &NoGroups).unwrap();
                let priority = flow_mod.priority;
                model.retain(|e| !(e.1 == m && e.2 == priority));
                model.push((
                    result.added.unwrap().id(),
                    m,
                    priority,
                    flow_mod.hard_timeout,
                ));
            }

            let mut expired = BTreeSet::new();
            for phase in 0..2 {
                if phase == 1 {
                    // expire with some winners still reserved
                    let held: Vec<Reservation> = (0..8)
                        .flat_map(|_| table.find_best_matches(&random_packet(&mut rng)).into_vec())
                        .collect();
                    let now = start + Duration::from_millis(2500);
                    for entry in table.expire(now, &NoGroups) {
                        expired.insert(entry.id());
                    }
                    let due: BTreeSet<EntryId> = model
                        .iter()
                        .filter(|e| e.3 > 0 && e.3 <= 2)
                        .map(|e| e.0)
                        .collect();
                    assert_eq!(due, expired, "round {}", round);
                    model.retain(|e| !expired.contains(&e.0));
                    drop(held);
                }
                for _ in 0..50 {
                    let packet = random_packet(&mut rng);
                    let found: BTreeSet<EntryId> = table
                        .find_best_matches(&packet)
                        .into_vec()
                        .iter()
                        .map(|r| r.id())
                        .collect();
                    assert!(found.is_disjoint(&expired), "round {}", round);
                    assert_eq!(best_by_scan(&model, &packet), found, "round {}", round);
                }
            }
            assert_eq!(model.len(), table.active_count());
        }
    }

    #[test]
    fn hard_timeout_with_reservation() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        let mut flow_mod = add(10, in_port(1));
        flow_mod.hard_timeout = 1;
        flow_mod.flags = OFPFF_SEND_FLOW_REM;
        table.update(&flow_mod, now, &NoGroups).unwrap();
        assert_eq!(Some(now + Duration::from_secs(1)), table.next_timeout());

        let held = table.find_best_matches(&packet(1)).into_vec();
        assert!(table.expire(now, &NoGroups).is_empty());
        let expired = table.expire(now + Duration::from_millis(1100), &NoGroups);
        assert_eq!(1, expired.len());
        let removed = expired[0].flow_removed(now + Duration::from_millis(1100)).unwrap();
        assert_eq!(OfpFlowRemovedReason::HardTimeout, removed.reason);

        // invisible at once, freed when the reservation drains
        assert!(table.find_best_matches(&packet(1)).is_miss());
        assert_eq!(0, table.active_count());
        assert_eq!(1, table.size());
        assert_eq!(0, table.reclaim());
        drop(held);
        assert_eq!(1, table.reclaim());
        assert_eq!(0, table.size());
    }

    #[test]
    fn idle_timeout_follows_use() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        let mut flow_mod = add(10, in_port(1));
        flow_mod.idle_timeout = 10;
        table.update(&flow_mod, now, &NoGroups).unwrap();
        let entry = table.entries().remove(0);
        entry.used(now + Duration::from_secs(6), 64);

        assert!(table.expire(now + Duration::from_secs(10), &NoGroups).is_empty());
        assert_eq!(Some(now + Duration::from_secs(16)), table.next_timeout());
        let expired = table.expire(now + Duration::from_secs(16), &NoGroups);
        assert_eq!(1, expired.len());
        assert_eq!(Some(OfpFlowRemovedReason::IdleTimeout), expired[0].removal_reason());
    }

    #[test]
    fn add_then_delete_strict() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        let m = in_port(4).with(OfpOxmTlv::new_eth_type(0x0806));
        table.update(&add(20, m.clone()), now, &NoGroups).unwrap();
        table.update(&add(21, m.clone()), now, &NoGroups).unwrap();
        let mut delete = add(20, m.clone());
        delete.command = OfpFlowModCommand::DeleteStrict;
        delete.instructions.clear();
        let result = table.update(&delete, now, &NoGroups).unwrap();
        assert_eq!(1, result.removed.len());
        assert_eq!(Some(OfpFlowRemovedReason::Delete), result.removed[0].removal_reason());
        assert!(table
            .entries()
            .iter()
            .all(|e| !e.is_identical(&m, 20)));
        assert_eq!(1, table.active_count());
    }

    #[test]
    fn add_replaces_identical() {
        let table = FlowTable::new(0, 1);
        let now = Instant::now();
        table.update(&add(1, in_port(1)), now, &NoGroups).unwrap();
        table.entries()[0].used(now, 100);
        let result = table.update(&add(1, in_port(1)), now, &NoGroups).unwrap();
        assert_eq!(1, result.replaced.len());
        assert_eq!(1, table.active_count());
        assert_eq!(100, table.entries()[0].byte_count());

        let mut reset = add(1, in_port(1));
        reset.flags = OFPFF_RESET_COUNTS;
        table.update(&reset, now, &NoGroups).unwrap();
        assert_eq!(0, table.entries()[0].byte_count());

        assert_eq!(
            FlowTableError::TableFull,
            table.update(&add(1, in_port(2)), now, &NoGroups).unwrap_err()
        );
    }

    #[test]
    fn check_overlap() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        table.update(&add(5, in_port(1)), now, &NoGroups).unwrap();
        let mut overlapping = add(5, OfpMatch::new().with(OfpOxmTlv::new_eth_type(0x0800)));
        overlapping.flags = OFPFF_CHECK_OVERLAP;
        assert_eq!(
            FlowTableError::Overlap,
            table.update(&overlapping, now, &NoGroups).unwrap_err()
        );
        assert_eq!(1, table.active_count());

        // priority does not matter, any overlap is refused
        overlapping.priority = 6;
        assert_eq!(
            FlowTableError::Overlap,
            table.update(&overlapping, now, &NoGroups).unwrap_err()
        );
        assert_eq!(1, table.active_count());

        let disjoint = OfpMatch::new().with(OfpOxmTlv::new_in_port(2));
        overlapping.match_field = disjoint;
        assert!(table.update(&overlapping, now, &NoGroups).is_ok());
        assert_eq!(2, table.active_count());
    }

    #[test]
    fn modify_in_place_or_insert() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        let mut modify = add(5, in_port(1));
        modify.command = OfpFlowModCommand::ModifyStrict;
        let result = table.update(&modify, now, &NoGroups).unwrap();
        assert!(result.added.is_some());

        let id = table.entries()[0].id();
        modify.instructions = vec![OfpInstruction::ApplyActions(vec![OfpAction::output(9)])];
        modify.cookie = 0x77;
        modify.hard_timeout = 30;
        let result = table.update(&modify, now, &NoGroups).unwrap();
        assert_eq!(1, result.modified.len());
        let entry = table.get(id).unwrap();
        assert_eq!(vec![9], entry.state().out_ports);
        assert_eq!(0x77, entry.cookie());
        assert_eq!(Some(now + Duration::from_secs(30)), table.next_timeout());
    }

    #[test]
    fn delete_filters() {
        let table = FlowTable::new(0, 16);
        let now = Instant::now();
        let mut to_group = add(1, in_port(1));
        to_group.instructions = vec![OfpInstruction::WriteActions(vec![OfpAction::Group(7)])];
        to_group.cookie = 0x10;
        table.update(&to_group, now, &NoGroups).unwrap();
        table.update(&add(1, in_port(2)), now, &NoGroups).unwrap();

        let mut delete = OfpFlowMod::new(OfpFlowModCommand::Delete, 0, 0, OfpMatch::new(), vec![]);
        delete.out_group = 8;
        assert!(table.update(&delete, now, &NoGroups).unwrap().removed.is_empty());
        delete.out_group = OFPG_ANY;
        delete.cookie = 0x20;
        delete.cookie_mask = 0xff;
        assert!(table.update(&delete, now, &NoGroups).unwrap().removed.is_empty());
        delete.cookie_mask = 0;
        delete.out_port = 2;
        let removed = table.update(&delete, now, &NoGroups).unwrap().removed;
        assert_eq!(1, removed.len());
        assert_eq!(Some(2), removed[0].match_field().in_port());
    }

    #[test]
    fn group_references() {
        let table = FlowTable::new(0, 16);
        let groups = RefLog::default();
        let now = Instant::now();
        let mut flow_mod = add(1, in_port(1));
        flow_mod.instructions = vec![OfpInstruction::ApplyActions(vec![OfpAction::Group(3)])];
        table.update(&flow_mod, now, &groups).unwrap();
        flow_mod.match_field = in_port(2);
        table.update(&flow_mod, now, &groups).unwrap();
        assert_eq!(2, groups.count(3));

        let removed = table.remove_group_references(3, &groups);
        assert_eq!(2, removed.len());
        assert_eq!(Some(OfpFlowRemovedReason::GroupDelete), removed[0].removal_reason());
        assert_eq!(0, groups.count(3));
    }

    #[test]
    fn stats() {
        let table = FlowTable::new(2, 16);
        let now = Instant::now();
        table.update(&add(1, in_port(1)), now, &NoGroups).unwrap();
        table.update(&add(1, in_port(2)), now, &NoGroups).unwrap();
        for e in table.entries() {
            e.used(now, 10);
        }
        let mut request = OfpFlowStatsRequest::all();
        assert_eq!(2, table.flow_stats(&request, now).len());
        request.match_field = in_port(2);
        let stats = table.flow_stats(&request, now);
        assert_eq!(1, stats.len());
        assert_eq!(2, stats[0].table_id);
        let mut aggregate = OfpAggregateStats::default();
        table.aggregate_stats(&OfpFlowStatsRequest::all(), &mut aggregate);
        assert_eq!((2, 20, 2), (aggregate.packet_count, aggregate.byte_count, aggregate.flow_count));
        let table_stats = table.table_stats();
        assert_eq!(2, table_stats.active_count);
        assert_eq!(16, table_stats.max_entries);
    }

    #[test]
    fn miss_policy_from_config() {
        let table = FlowTable::new(0, 16);
        assert_eq!(MissPolicy::Controller, table.miss_policy());
        table.set_config(OFPTC_TABLE_MISS_CONTINUE);
        assert_eq!(MissPolicy::Continue, table.miss_policy());
        table.set_config(OFPTC_TABLE_MISS_DROP);
        assert_eq!(MissPolicy::Drop, table.miss_policy());
    }
}
