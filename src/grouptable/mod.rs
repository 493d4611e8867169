/*!
The group table of a pipeline

Groups may forward to other groups, the resulting graph is kept free of
cycles: every ADD and MODIFY is checked against the table as it would
look after the change, and rejected before anything is committed.
*/

pub mod entry;

pub use self::entry::GroupEntry;

use self::entry::bucket_groups;
use flowtable::GroupRefCounter;
use openflow;
use openflow::messages::*;
use std::collections::{BTreeMap, BTreeSet};
use std::error;
use std::fmt;
use std::result;
use std::time::Instant;

/// Default limit of groups per group type
pub const DEFAULT_MAX_GROUPS: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupTableError {
    Exists(u32),
    /// The group id is reserved or out of range
    InvalidGroup(u32),
    /// MODIFY of a group that does not exist
    UnknownGroup(u32),
    /// The change would make the group reach itself
    Loop(u32),
    BadType(OfpGroupType),
    /// The buckets violate the rules of the group type
    InvalidBucket(u32),
    OutOfGroups,
}

impl error::Error for GroupTableError {
    fn description(&self) -> &str {
        match *self {
            GroupTableError::Exists(_) => "group exists",
            GroupTableError::InvalidGroup(_) => "invalid group id",
            GroupTableError::UnknownGroup(_) => "unknown group",
            GroupTableError::Loop(_) => "group chain loops",
            GroupTableError::BadType(_) => "unsupported group type",
            GroupTableError::InvalidBucket(_) => "invalid bucket",
            GroupTableError::OutOfGroups => "group table full",
        }
    }
}

impl fmt::Display for GroupTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            GroupTableError::BadType(t) => write!(f, "Group type {:?} is not supported", t),
            GroupTableError::OutOfGroups => write!(f, "Group table full"),
            GroupTableError::Exists(id)
            | GroupTableError::InvalidGroup(id)
            | GroupTableError::UnknownGroup(id)
            | GroupTableError::Loop(id)
            | GroupTableError::InvalidBucket(id) => {
                write!(f, "Group {}: {}", id, error::Error::description(self))
            }
        }
    }
}

impl From<GroupTableError> for openflow::error::Error {
    fn from(e: GroupTableError) -> Self {
        use openflow::error::Error;
        Error::GroupModFailed(match e {
            GroupTableError::Exists(_) => OfpGroupModFailedCode::GroupExists,
            GroupTableError::InvalidGroup(_) => OfpGroupModFailedCode::InvalidGroup,
            GroupTableError::UnknownGroup(_) => OfpGroupModFailedCode::UnknownGroup,
            GroupTableError::Loop(_) => OfpGroupModFailedCode::Loop,
            GroupTableError::BadType(_) => OfpGroupModFailedCode::BadType,
            GroupTableError::InvalidBucket(_) => OfpGroupModFailedCode::BadBucket,
            GroupTableError::OutOfGroups => OfpGroupModFailedCode::OutOfGroups,
        })
    }
}

pub type Result<T> = result::Result<T, GroupTableError>;

#[derive(Debug)]
pub struct GroupTable {
    groups: BTreeMap<u32, GroupEntry>,
    features: OfpGroupFeatures,
}

impl Default for GroupTable {
    fn default() -> Self {
        GroupTable::new(DEFAULT_MAX_GROUPS)
    }
}

fn type_index(group_type: OfpGroupType) -> usize {
    group_type as usize
}

impl GroupTable {
    /// A table supporting all group types, `max_groups` of each
    pub fn new(max_groups: u32) -> GroupTable {
        let all_types = [
            OfpGroupType::All,
            OfpGroupType::Select,
            OfpGroupType::Indirect,
            OfpGroupType::FastFailover,
        ].iter()
            .fold(0, |bits, t| bits | 1 << (*t as u32));
        let actions = 1 << (OfpActionType::Output as u32)
            | 1 << (OfpActionType::Group as u32)
            | 1 << (OfpActionType::SetField as u32)
            | 1 << (OfpActionType::PushVlan as u32)
            | 1 << (OfpActionType::PopVlan as u32)
            | 1 << (OfpActionType::SetQueue as u32);
        GroupTable {
            groups: BTreeMap::new(),
            features: OfpGroupFeatures {
                types: all_types,
                capabilities: OFPGFC_SELECT_WEIGHT | OFPGFC_CHAINING | OFPGFC_CHAINING_CHECKS,
                max_groups: [max_groups; 4],
                actions: [actions; 4],
            },
        }
    }

    pub fn features(&self) -> OfpGroupFeatures {
        self.features
    }

    pub fn get(&self, group_id: u32) -> Option<&GroupEntry> {
        self.groups.get(&group_id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.groups.keys().cloned().collect()
    }

    /// Applies a GroupMod, returns the ids of the groups that were removed
    pub fn apply(&mut self, group_mod: &OfpGroupMod, now: Instant) -> Result<Vec<u32>> {
        match group_mod.command {
            OfpGroupModCommand::Add => self.add(group_mod, now).map(|_| vec![]),
            OfpGroupModCommand::Modify => self.modify(group_mod).map(|_| vec![]),
            OfpGroupModCommand::Delete => Ok(self.delete(group_mod.group_id)),
        }
    }

    pub fn add(&mut self, group_mod: &OfpGroupMod, now: Instant) -> Result<()> {
        let group_id = group_mod.group_id;
        if group_id > OFPG_MAX {
            return Err(GroupTableError::InvalidGroup(group_id));
        }
        if self.groups.contains_key(&group_id) {
            return Err(GroupTableError::Exists(group_id));
        }
        self.validate(group_mod)?;
        let same_type = self
            .groups
            .values()
            .filter(|g| g.group_type() == group_mod.group_type)
            .count();
        if same_type as u32 >= self.features.max_groups[type_index(group_mod.group_type)] {
            return Err(GroupTableError::OutOfGroups);
        }
        self.loop_check(group_id, &group_mod.buckets)?;

        let entry = GroupEntry::new(group_mod, now);
        for target in entry.referenced_groups() {
            self.inc_ref(target);
        }
        debug!("Added group {} of type {:?}", group_id, entry.group_type());
        self.groups.insert(group_id, entry);
        Ok(())
    }

    pub fn modify(&mut self, group_mod: &OfpGroupMod) -> Result<()> {
        let group_id = group_mod.group_id;
        if group_id > OFPG_MAX {
            return Err(GroupTableError::InvalidGroup(group_id));
        }
        if !self.groups.contains_key(&group_id) {
            return Err(GroupTableError::UnknownGroup(group_id));
        }
        self.validate(group_mod)?;
        self.loop_check(group_id, &group_mod.buckets)?;

        let rebuilt = match self.groups.get(&group_id) {
            Some(old) => old.rebuild(group_mod),
            None => return Err(GroupTableError::UnknownGroup(group_id)),
        };
        if let Some(old) = self.groups.insert(group_id, rebuilt) {
            for target in old.referenced_groups() {
                self.dec_ref(target);
            }
        }
        for target in bucket_groups(&group_mod.buckets) {
            self.inc_ref(target);
        }
        debug!("Modified group {}", group_id);
        Ok(())
    }

    /// Removes one group or, with OFPG_ALL, every group.
    /// Unknown ids are not an error. Returns the removed ids.
    pub fn delete(&mut self, group_id: u32) -> Vec<u32> {
        let ids = if group_id == OFPG_ALL {
            self.ids()
        } else if self.groups.contains_key(&group_id) {
            vec![group_id]
        } else {
            vec![]
        };
        for id in &ids {
            if let Some(entry) = self.groups.remove(id) {
                if entry.ref_count() > 0 {
                    debug!(
                        "Deleting group {} that is still referenced {} times",
                        id,
                        entry.ref_count()
                    );
                }
                for target in entry.referenced_groups() {
                    self.dec_ref(target);
                }
            }
        }
        ids
    }

    fn validate(&self, group_mod: &OfpGroupMod) -> Result<()> {
        let group_type = group_mod.group_type;
        if self.features.types & (1 << group_type as u32) == 0 {
            return Err(GroupTableError::BadType(group_type));
        }
        let buckets = &group_mod.buckets;
        let valid = match group_type {
            // weights only make sense for select groups
            OfpGroupType::All | OfpGroupType::FastFailover => buckets.iter().all(|b| b.weight == 0),
            OfpGroupType::Select => buckets.iter().all(|b| b.weight > 0),
            OfpGroupType::Indirect => buckets.len() == 1 && buckets[0].weight == 0,
        };
        if valid {
            Ok(())
        } else {
            Err(GroupTableError::InvalidBucket(group_mod.group_id))
        }
    }

    /// Walks all groups reachable from `buckets` and fails if `origin` is among them.
    /// `buckets` stand for the future content of `origin`. Groups that do not
    /// exist end their branch of the walk.
    pub fn loop_check(&self, origin: u32, buckets: &[OfpBucket]) -> Result<()> {
        let mut visited = BTreeSet::new();
        let mut pending = bucket_groups(buckets);
        while let Some(group_id) = pending.pop() {
            if group_id == origin {
                debug!("Group {} would forward to itself", origin);
                return Err(GroupTableError::Loop(origin));
            }
            if !visited.insert(group_id) {
                continue;
            }
            if let Some(entry) = self.groups.get(&group_id) {
                pending.extend(entry.referenced_groups());
            }
        }
        Ok(())
    }

    /// Statistics of one group or, with OFPG_ALL, of every group
    pub fn stats(&self, group_id: u32, now: Instant) -> Vec<OfpGroupStats> {
        if group_id == OFPG_ALL {
            self.groups.values().map(|g| g.stats(now)).collect()
        } else {
            self.groups
                .get(&group_id)
                .map(|g| g.stats(now))
                .into_iter()
                .collect()
        }
    }

    pub fn desc(&self) -> Vec<OfpGroupDesc> {
        self.groups.values().map(GroupEntry::desc).collect()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

impl GroupRefCounter for GroupTable {
    fn has_group(&self, group_id: u32) -> bool {
        self.groups.contains_key(&group_id)
    }

    fn inc_ref(&self, group_id: u32) {
        if let Some(entry) = self.groups.get(&group_id) {
            entry.inc_ref();
        }
    }

    fn dec_ref(&self, group_id: u32) {
        if let Some(entry) = self.groups.get(&group_id) {
            entry.dec_ref();
        }
    }
}

impl fmt::Display for GroupTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for entry in self.groups.values() {
            let buckets: Vec<String> = entry
                .buckets()
                .iter()
                .map(|b| {
                    let actions: Vec<String> = b.actions.iter().map(|a| a.to_string()).collect();
                    format!("weight={} [{}]", b.weight, actions.join(" "))
                })
                .collect();
            writeln!(
                f,
                "group={} type={:?} refs={} {}",
                entry.group_id(),
                entry.group_type(),
                entry.ref_count(),
                buckets.join(", ")
            )?;
        }
        Ok(())
    }
}
