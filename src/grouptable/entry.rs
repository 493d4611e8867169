use openflow::messages::*;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counter {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl Counter {
    fn add(&self, bytes: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn get(&self) -> (u64, u64) {
        (
            self.packets.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

/// A group and its counters
#[derive(Debug)]
pub struct GroupEntry {
    group_id: u32,
    group_type: OfpGroupType,
    buckets: Vec<OfpBucket>,
    ref_count: AtomicU32,
    counter: Counter,
    bucket_counters: Vec<Counter>,
    created: Instant,
}

impl GroupEntry {
    pub fn new(group_mod: &OfpGroupMod, now: Instant) -> GroupEntry {
        GroupEntry {
            group_id: group_mod.group_id,
            group_type: group_mod.group_type,
            buckets: group_mod.buckets.clone(),
            ref_count: AtomicU32::new(0),
            counter: Counter::default(),
            bucket_counters: group_mod.buckets.iter().map(|_| Counter::default()).collect(),
            created: now,
        }
    }

    /// The entry after a MODIFY: new type and buckets, same references and counters
    pub(crate) fn rebuild(&self, group_mod: &OfpGroupMod) -> GroupEntry {
        let (packets, bytes) = self.counter.get();
        GroupEntry {
            group_id: self.group_id,
            group_type: group_mod.group_type,
            buckets: group_mod.buckets.clone(),
            ref_count: AtomicU32::new(self.ref_count()),
            counter: Counter {
                packets: AtomicU64::new(packets),
                bytes: AtomicU64::new(bytes),
            },
            bucket_counters: group_mod.buckets.iter().map(|_| Counter::default()).collect(),
            created: self.created,
        }
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    pub fn group_type(&self) -> OfpGroupType {
        self.group_type
    }

    pub fn buckets(&self) -> &[OfpBucket] {
        &self.buckets
    }

    /// The groups the buckets forward to
    pub fn referenced_groups(&self) -> Vec<u32> {
        bucket_groups(&self.buckets)
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dec_ref(&self) {
        let mut current = self.ref_count.load(Ordering::SeqCst);
        while current > 0 {
            match self.ref_count.compare_exchange(
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

    /// Accounts a packet that was processed by the group and one of its buckets
    pub fn used(&self, bucket: Option<usize>, bytes: usize) {
        self.counter.add(bytes);
        if let Some(counter) = bucket.and_then(|i| self.bucket_counters.get(i)) {
            counter.add(bytes);
        }
    }

    pub fn packet_count(&self) -> u64 {
        self.counter.get().0
    }

    pub fn byte_count(&self) -> u64 {
        self.counter.get().1
    }

    pub fn stats(&self, now: Instant) -> OfpGroupStats {
        let alive = if now > self.created {
            now - self.created
        } else {
            Duration::from_secs(0)
        };
        let (packet_count, byte_count) = self.counter.get();
        OfpGroupStats {
            group_id: self.group_id,
            ref_count: self.ref_count(),
            packet_count,
            byte_count,
            duration_sec: alive.as_secs() as u32,
            duration_nsec: alive.subsec_nanos(),
            bucket_stats: self
                .bucket_counters
                .iter()
                .map(|c| {
                    let (packet_count, byte_count) = c.get();
                    OfpBucketCounter {
                        packet_count,
                        byte_count,
                    }
                })
                .collect(),
        }
    }

    pub fn desc(&self) -> OfpGroupDesc {
        OfpGroupDesc {
            group_type: self.group_type,
            group_id: self.group_id,
            buckets: self.buckets.clone(),
        }
    }
}

pub fn bucket_groups(buckets: &[OfpBucket]) -> Vec<u32> {
    buckets.iter().flat_map(|b| group_ids(&b.actions)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select() -> OfpGroupMod {
        OfpGroupMod {
            command: OfpGroupModCommand::Add,
            group_type: OfpGroupType::Select,
            group_id: 4,
            buckets: vec![
                OfpBucket::new(1, vec![OfpAction::output(1)]),
                OfpBucket::new(3, vec![OfpAction::Group(9)]),
            ],
        }
    }

    #[test]
    fn counters() {
        let now = Instant::now();
        let entry = GroupEntry::new(&select(), now);
        entry.used(Some(1), 60);
        entry.used(Some(1), 40);
        entry.used(None, 10);
        let stats = entry.stats(now + Duration::from_secs(2));
        assert_eq!((3, 110), (stats.packet_count, stats.byte_count));
        assert_eq!(2, stats.bucket_stats.len());
        assert_eq!(0, stats.bucket_stats[0].packet_count);
        assert_eq!(100, stats.bucket_stats[1].byte_count);
        assert_eq!(2, stats.duration_sec);
    }

    #[test]
    fn rebuild_keeps_references() {
        let entry = GroupEntry::new(&select(), Instant::now());
        entry.inc_ref();
        entry.used(Some(0), 5);
        let mut modify = select();
        modify.group_type = OfpGroupType::Indirect;
        modify.buckets.truncate(1);
        let rebuilt = entry.rebuild(&modify);
        assert_eq!(1, rebuilt.ref_count());
        assert_eq!(1, rebuilt.packet_count());
        assert_eq!(OfpGroupType::Indirect, rebuilt.group_type());
        assert_eq!(1, rebuilt.stats(Instant::now()).bucket_stats.len());
    }

    #[test]
    fn ref_count_saturates() {
        let entry = GroupEntry::new(&select(), Instant::now());
        entry.dec_ref();
        assert_eq!(0, entry.ref_count());
        assert_eq!(vec![9], entry.referenced_groups());
    }
}
