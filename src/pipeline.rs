/*!
A set of flow tables plus a group table, and the packet walk through them

The walk starts in table 0, follows Goto-Table instructions to later
tables only and executes the accumulated action set at its end. The
results are `Verdict`s that tell the owner where copies of the packet go;
frames are never rewritten here.
*/

use flowtable::{FlowEntry, FlowModResult, FlowTable, FlowTableError, GroupRefCounter, Lookup,
                MissPolicy};
use grouptable::GroupTable;
use openflow::error::{Error, Result};
use openflow::messages::*;
use packet::extract_fields;
use rand;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use timer::HandleTimeout;

/// Groups forwarding to groups are loop free, this only bounds broken chains
const MAX_GROUP_DEPTH: usize = 16;

/// Where a packet ends up
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Output(u32),
    /// All ports except the input port
    Flood,
    /// All ports except the input port, flood restrictions ignored
    All,
    Controller {
        reason: OfpPacketInReason,
        table_id: u8,
        cookie: u64,
        max_len: u16,
    },
}

/// The action set of a packet, at most one action per kind,
/// executed in the order OpenFlow prescribes
#[derive(Debug, Default)]
struct ActionSet {
    actions: BTreeMap<(u8, u8), OfpAction>,
}

impl ActionSet {
    fn slot(action: &OfpAction) -> (u8, u8) {
        let rank = match *action {
            OfpAction::CopyTtlIn => 0,
            OfpAction::PopVlan | OfpAction::PopMpls(_) | OfpAction::PopPbb => 1,
            OfpAction::PushMpls(_) => 2,
            OfpAction::PushPbb(_) => 3,
            OfpAction::PushVlan(_) => 4,
            OfpAction::CopyTtlOut => 5,
            OfpAction::DecMplsTtl | OfpAction::DecNwTtl => 6,
            OfpAction::SetMplsTtl(_) | OfpAction::SetNwTtl(_) | OfpAction::SetField(_) => 7,
            OfpAction::SetQueue(_) => 8,
            OfpAction::Group(_) => 9,
            OfpAction::Output { .. } => 10,
        };
        let kind = match *action {
            // one set-field per header field
            OfpAction::SetField(ref tlv) => 64 + tlv.field() as u8,
            _ => action.typ() as u8,
        };
        (rank, kind)
    }

    fn write(&mut self, actions: &[OfpAction]) {
        for action in actions {
            self.actions.insert(Self::slot(action), action.clone());
        }
    }

    fn clear(&mut self) {
        self.actions.clear();
    }

    /// The actions to execute; a group action overrides the output
    fn into_actions(self) -> Vec<OfpAction> {
        let has_group = self.actions.values().any(|a| a.typ() == OfpActionType::Group);
        self.actions
            .into_iter()
            .map(|(_, action)| action)
            .filter(|a| !(has_group && a.typ() == OfpActionType::Output))
            .collect()
    }
}

/// State of one packet on its way through the pipeline
struct Walk<'a> {
    in_port: u32,
    frame: &'a [u8],
    now: Instant,
    live: &'a dyn Fn(u32) -> bool,
    fields: OfpMatch,
    table_id: u8,
    cookie: u64,
    /// OFPP_TABLE is only allowed for packets sent by a controller
    packet_out: bool,
    verdicts: Vec<Verdict>,
}

pub struct Pipeline {
    tables: Vec<FlowTable>,
    groups: GroupTable,
}

impl Pipeline {
    pub fn new(n_tables: u8, max_entries: usize, max_groups: u32) -> Pipeline {
        Pipeline {
            tables: (0..n_tables).map(|id| FlowTable::new(id, max_entries)).collect(),
            groups: GroupTable::new(max_groups),
        }
    }

    pub fn n_tables(&self) -> u8 {
        self.tables.len() as u8
    }

    pub fn table(&self, table_id: u8) -> Option<&FlowTable> {
        self.tables.get(usize::from(table_id))
    }

    pub fn tables(&self) -> &[FlowTable] {
        &self.tables
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    fn tables_for(&self, table_id: u8) -> Result<Vec<&FlowTable>> {
        if table_id == OFPTT_ALL {
            Ok(self.tables.iter().collect())
        } else {
            self.table(table_id)
                .map(|t| vec![t])
                .ok_or_else(|| FlowTableError::TableNotFound(table_id).into())
        }
    }

    /// Checks the instructions of a FlowMod against this pipeline
    pub fn validate_flow_mod(&self, flow_mod: &OfpFlowMod) -> Result<()> {
        for instruction in &flow_mod.instructions {
            match *instruction {
                OfpInstruction::GotoTable(next) => {
                    if next <= flow_mod.table_id || next >= self.n_tables() {
                        return Err(FlowTableError::BadGotoTable(next).into());
                    }
                }
                OfpInstruction::Meter(_) => {
                    return Err(Error::BadInstruction(OfpBadInstructionCode::UnsupInst))
                }
                _ => {}
            }
            for action in instruction.actions() {
                if let OfpAction::Output { port, .. } = *action {
                    if port == 0 || port == OFPP_ANY || port == OFPP_TABLE {
                        return Err(Error::BadAction(OfpBadActionCode::BadOutPort));
                    }
                }
            }
        }
        for group_id in OfpInstruction::group_ids(&flow_mod.instructions) {
            if !self.groups.has_group(group_id) {
                return Err(FlowTableError::UnknownGroup(group_id).into());
            }
        }
        Ok(())
    }

    /// Validates and applies a FlowMod. Deletes may address all tables.
    pub fn flow_mod(&self, flow_mod: &OfpFlowMod, now: Instant) -> Result<FlowModResult> {
        match flow_mod.command {
            OfpFlowModCommand::Delete | OfpFlowModCommand::DeleteStrict => {}
            _ => {
                if flow_mod.table_id == OFPTT_ALL {
                    return Err(FlowTableError::TableNotFound(OFPTT_ALL).into());
                }
                self.validate_flow_mod(flow_mod)?;
            }
        }
        self.apply_flow_mod(flow_mod, now)
    }

    /// Applies a FlowMod without checking instructions against this pipeline.
    /// Used to mirror what was sent to a remote datapath.
    pub fn apply_flow_mod(&self, flow_mod: &OfpFlowMod, now: Instant) -> Result<FlowModResult> {
        let mut result = FlowModResult::default();
        for table in self.tables_for(flow_mod.table_id)? {
            let mut partial = table.update(flow_mod, now, &self.groups)?;
            result.added = result.added.or(partial.added.take());
            result.replaced.append(&mut partial.replaced);
            result.modified.append(&mut partial.modified);
            result.removed.append(&mut partial.removed);
        }
        Ok(result)
    }

    /// Applies a GroupMod. Flows forwarding to deleted groups are removed
    /// and returned with reason GROUP_DELETE.
    pub fn group_mod(&mut self, group_mod: &OfpGroupMod, now: Instant) -> Result<Vec<Arc<FlowEntry>>> {
        let deleted = self.groups.apply(group_mod, now)?;
        let mut removed = vec![];
        for group_id in deleted {
            for table in &self.tables {
                removed.extend(table.remove_group_references(group_id, &self.groups));
            }
        }
        Ok(removed)
    }

    pub fn table_mod(&self, table_mod: &OfpTableMod) -> Result<()> {
        let config = table_mod.config;
        if config & !OFPTC_TABLE_MISS_MASK != 0 || config & OFPTC_TABLE_MISS_MASK == OFPTC_TABLE_MISS_MASK {
            return Err(Error::TableModFailed(OfpTableModFailedCode::BadConfig));
        }
        let tables = self.tables_for(table_mod.table_id)
            .map_err(|_| Error::TableModFailed(OfpTableModFailedCode::BadTable))?;
        for table in tables {
            table.set_config(config);
        }
        Ok(())
    }

    /// Drops the mirror of a flow a remote datapath reported as removed
    pub fn forget_flow(&self, removed: &OfpFlowRemoved, now: Instant) -> Vec<Arc<FlowEntry>> {
        let mut delete = OfpFlowMod::new(
            OfpFlowModCommand::DeleteStrict,
            removed.table_id,
            removed.priority,
            removed.match_field.clone(),
            vec![],
        );
        delete.cookie = removed.cookie;
        delete.cookie_mask = u64::max_value();
        self.apply_flow_mod(&delete, now)
            .map(|r| r.removed)
            .unwrap_or_default()
    }

    pub fn flow_stats(&self, request: &OfpFlowStatsRequest, now: Instant) -> Result<Vec<OfpFlowStats>> {
        let mut stats = vec![];
        for table in self.tables_for(request.table_id)? {
            stats.extend(table.flow_stats(request, now));
        }
        Ok(stats)
    }

    pub fn aggregate_stats(&self, request: &OfpFlowStatsRequest) -> Result<OfpAggregateStats> {
        let mut aggregate = OfpAggregateStats::default();
        for table in self.tables_for(request.table_id)? {
            table.aggregate_stats(request, &mut aggregate);
        }
        Ok(aggregate)
    }

    pub fn table_stats(&self) -> Vec<OfpTableStats> {
        self.tables.iter().map(FlowTable::table_stats).collect()
    }

    /// Removes all flows and groups
    pub fn clear(&mut self) {
        for table in &self.tables {
            table.clear(&self.groups);
            table.reclaim();
        }
        self.groups.clear();
    }

    /// Runs a packet received on `in_port` through the tables.
    /// `live` tells whether a port can be used by fast failover groups.
    pub fn process(
        &self,
        in_port: u32,
        frame: &[u8],
        now: Instant,
        live: &dyn Fn(u32) -> bool,
    ) -> Vec<Verdict> {
        let mut walk = Walk {
            in_port,
            frame,
            now,
            live,
            fields: extract_fields(in_port, frame),
            table_id: 0,
            cookie: u64::max_value(),
            packet_out: false,
            verdicts: vec![],
        };
        self.walk_tables(&mut walk);
        walk.verdicts
    }

    /// Executes the action list of a PACKET_OUT
    pub fn packet_out(
        &self,
        in_port: u32,
        actions: &[OfpAction],
        frame: &[u8],
        now: Instant,
        live: &dyn Fn(u32) -> bool,
    ) -> Vec<Verdict> {
        let mut walk = Walk {
            in_port,
            frame,
            now,
            live,
            fields: extract_fields(in_port, frame),
            table_id: OFPTT_MAX,
            cookie: u64::max_value(),
            packet_out: true,
            verdicts: vec![],
        };
        self.apply_actions(&mut walk, actions, 0);
        walk.verdicts
    }

    fn walk_tables(&self, walk: &mut Walk) {
        let mut action_set = ActionSet::default();
        let mut table_id = 0;
        loop {
            let table = match self.table(table_id) {
                Some(table) => table,
                None => break,
            };
            walk.table_id = table_id;
            let entry = match table.find_best_matches(&walk.fields) {
                Lookup::Miss => {
                    match table.miss_policy() {
                        MissPolicy::Controller => {
                            walk.verdicts.push(Verdict::Controller {
                                reason: OfpPacketInReason::NoMatch,
                                table_id,
                                cookie: u64::max_value(),
                                max_len: OFPCML_NO_BUFFER,
                            });
                        }
                        MissPolicy::Continue if table_id < OFPTT_MAX => {
                            table_id += 1;
                            continue;
                        }
                        _ => trace!("Table {}: dropping unmatched packet", table_id),
                    }
                    // the action set is only executed at the end of a matched walk
                    return;
                }
                Lookup::Matched(entry) => entry,
                Lookup::Ambiguous(mut entries) => {
                    entries.sort_by_key(|e| e.id());
                    debug!(
                        "Table {}: {} entries match equally, using the oldest",
                        table_id,
                        entries.len()
                    );
                    entries.remove(0)
                }
            };
            entry.used(walk.now, walk.frame.len());
            walk.cookie = entry.cookie();

            let mut next = None;
            for instruction in entry.instructions() {
                match instruction {
                    OfpInstruction::ApplyActions(actions) => self.apply_actions(walk, &actions, 0),
                    OfpInstruction::ClearActions => action_set.clear(),
                    OfpInstruction::WriteActions(actions) => action_set.write(&actions),
                    OfpInstruction::WriteMetadata { metadata, mask } => {
                        let old = walk
                            .fields
                            .get(OxmField::Metadata)
                            .map(|t| t.value_u64())
                            .unwrap_or(0);
                        let new = (old & !mask) | (metadata & mask);
                        walk.fields
                            .add_tlv(OfpOxmTlv::new_metadata(new, u64::max_value()));
                    }
                    OfpInstruction::GotoTable(id) => next = Some(id),
                    OfpInstruction::Meter(_) => {}
                }
            }
            match next {
                Some(id) if id > table_id => table_id = id,
                _ => break,
            }
        }
        let actions = action_set.into_actions();
        self.apply_actions(walk, &actions, 0);
    }

    fn apply_actions(&self, walk: &mut Walk, actions: &[OfpAction], depth: usize) {
        for action in actions {
            match *action {
                OfpAction::Output { port, max_len } => self.output(walk, port, max_len),
                OfpAction::Group(group_id) => self.apply_group(walk, group_id, depth),
                OfpAction::SetField(ref tlv) => {
                    // later lookups see the rewritten value
                    walk.fields.add_tlv(tlv.clone());
                }
                _ => trace!("Not rewriting the frame for {}", action),
            }
        }
    }

    fn output(&self, walk: &mut Walk, port: u32, max_len: u16) {
        let verdict = match port {
            OFPP_CONTROLLER => Verdict::Controller {
                reason: OfpPacketInReason::Action,
                table_id: walk.table_id,
                cookie: walk.cookie,
                max_len,
            },
            OFPP_IN_PORT => Verdict::Output(walk.in_port),
            OFPP_FLOOD => Verdict::Flood,
            OFPP_ALL => Verdict::All,
            OFPP_TABLE if walk.packet_out => {
                let mut verdicts = self.process(walk.in_port, walk.frame, walk.now, walk.live);
                walk.verdicts.append(&mut verdicts);
                return;
            }
            OFPP_TABLE | OFPP_ANY => {
                debug!("Ignoring output to 0x{:x}", port);
                return;
            }
            _ => Verdict::Output(port),
        };
        walk.verdicts.push(verdict);
    }

    fn bucket_live(&self, bucket: &OfpBucket, live: &dyn Fn(u32) -> bool) -> bool {
        if bucket.watch_port == OFPP_ANY && bucket.watch_group == OFPG_ANY {
            return true;
        }
        (bucket.watch_port != OFPP_ANY && live(bucket.watch_port))
            || (bucket.watch_group != OFPG_ANY && self.groups.has_group(bucket.watch_group))
    }

    fn apply_group(&self, walk: &mut Walk, group_id: u32, depth: usize) {
        if depth >= MAX_GROUP_DEPTH {
            warn!("Group chain too deep at group {}", group_id);
            return;
        }
        let group = match self.groups.get(group_id) {
            Some(group) => group,
            None => {
                debug!("Dropping packet for missing group {}", group_id);
                return;
            }
        };
        let buckets = group.buckets();
        let bytes = walk.frame.len();
        let chosen: Vec<usize> = match group.group_type() {
            OfpGroupType::All => (0..buckets.len()).collect(),
            OfpGroupType::Indirect => vec![0],
            OfpGroupType::FastFailover => buckets
                .iter()
                .position(|b| self.bucket_live(b, walk.live))
                .into_iter()
                .collect(),
            OfpGroupType::Select => {
                let live: Vec<usize> = (0..buckets.len())
                    .filter(|i| self.bucket_live(&buckets[*i], walk.live))
                    .collect();
                let total: u32 = live.iter().map(|i| u32::from(buckets[*i].weight)).sum();
                if total == 0 {
                    vec![]
                } else {
                    let mut pick = rand::thread_rng().gen_range(0, total);
                    let mut chosen = vec![];
                    for i in live {
                        let weight = u32::from(buckets[i].weight);
                        if pick < weight {
                            chosen.push(i);
                            break;
                        }
                        pick -= weight;
                    }
                    chosen
                }
            }
        };
        if chosen.is_empty() {
            group.used(None, bytes);
            return;
        }
        for i in chosen {
            if let Some(bucket) = buckets.get(i) {
                group.used(Some(i), bytes);
                self.apply_actions(walk, &bucket.actions, depth + 1);
            }
        }
    }
}

impl HandleTimeout for Pipeline {
    type Output = Vec<Arc<FlowEntry>>;

    /// Expires flow entries in all tables
    fn handle_timeout(&mut self, now: Instant) -> Vec<Arc<FlowEntry>> {
        let mut expired = vec![];
        for table in &self.tables {
            expired.extend(table.expire(now, &self.groups));
        }
        expired
    }

    fn next_timeout(&self) -> Option<Instant> {
        self.tables.iter().filter_map(FlowTable::next_timeout).min()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("tables", &self.tables.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for table in &self.tables {
            write!(f, "{}", table)?;
        }
        write!(f, "{}", self.groups)
    }
}
