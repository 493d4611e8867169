use fwdelem::PeerId;
use openflow::messages::{OfpMessage, OfpType};
use std::collections::{BTreeMap, VecDeque};

/// Which side a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// From a controller, handled by the emulated datapath
    Down,
    /// From a datapath, handled by the controller logic
    Up,
}

/// A message waiting for its dispatch tick
#[derive(Debug, Clone, PartialEq)]
pub struct Queued {
    /// Arrival order across all queues
    pub seq: u64,
    pub direction: Direction,
    pub peer: PeerId,
    pub message: OfpMessage,
}

/// One bounded FIFO per direction and message type.
///
/// A dispatch round takes at most one message out of every queue, so a
/// flood of one type never starves the others.
#[derive(Debug)]
pub struct MessageQueues {
    queues: BTreeMap<(Direction, OfpType), VecDeque<Queued>>,
    capacity: usize,
    next_seq: u64,
}

impl MessageQueues {
    pub fn new(capacity: usize) -> MessageQueues {
        MessageQueues {
            queues: BTreeMap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Appends a message, returns false if its queue is full and it was dropped
    pub fn push(&mut self, direction: Direction, peer: PeerId, message: OfpMessage) -> bool {
        let queue = self.queues
            .entry((direction, message.typ()))
            .or_insert_with(VecDeque::new);
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(Queued {
            seq: self.next_seq,
            direction,
            peer,
            message,
        });
        self.next_seq += 1;
        true
    }

    /// Takes the head of every queue, in arrival order
    pub fn pop_round(&mut self) -> Vec<Queued> {
        let mut round: Vec<Queued> = self.queues
            .values_mut()
            .filter_map(|queue| queue.pop_front())
            .collect();
        self.queues.retain(|_, queue| !queue.is_empty());
        round.sort_by_key(|queued| queued.seq);
        round
    }

    /// Removes all messages of `peer` in `direction` that arrived before `seq`, in arrival order
    pub fn take_earlier(&mut self, direction: Direction, peer: PeerId, seq: u64) -> Vec<Queued> {
        let mut earlier = vec![];
        for (&(dir, _), queue) in self.queues.iter_mut() {
            if dir != direction {
                continue;
            }
            let (taken, kept): (VecDeque<Queued>, VecDeque<Queued>) = queue
                .drain(..)
                .partition(|queued| queued.peer == peer && queued.seq < seq);
            earlier.extend(taken);
            *queue = kept;
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        earlier.sort_by_key(|queued| queued.seq);
        earlier
    }

    /// Drops everything a peer sent, returns the number of dropped messages
    pub fn remove_peer(&mut self, peer: PeerId) -> usize {
        let mut dropped = 0;
        for queue in self.queues.values_mut() {
            let before = queue.len();
            queue.retain(|queued| queued.peer != peer);
            dropped += before - queue.len();
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        dropped
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openflow::messages::{OfpBody, OFP_VERSION_13};

    fn msg(xid: u32, body: OfpBody) -> OfpMessage {
        OfpMessage::new(OFP_VERSION_13, xid, body)
    }

    #[test]
    fn one_per_type_and_round() {
        let mut queues = MessageQueues::new(8);
        queues.push(Direction::Down, 1, msg(1, OfpBody::FeaturesRequest));
        queues.push(Direction::Down, 1, msg(2, OfpBody::FeaturesRequest));
        queues.push(Direction::Down, 1, msg(3, OfpBody::GetConfigRequest));
        queues.push(Direction::Up, 2, msg(4, OfpBody::BarrierReply));
        let round = queues.pop_round();
        let xids: Vec<u32> = round.iter().map(|q| q.message.xid()).collect();
        assert_eq!(vec![1, 3, 4], xids);
        assert_eq!(1, queues.len());
        assert_eq!(2, queues.pop_round()[0].message.xid());
        assert!(queues.is_empty());
    }

    #[test]
    fn bounded() {
        let mut queues = MessageQueues::new(1);
        assert!(queues.push(Direction::Down, 1, msg(1, OfpBody::BarrierRequest)));
        assert!(!queues.push(Direction::Down, 1, msg(2, OfpBody::BarrierRequest)));
        assert!(queues.push(Direction::Up, 1, msg(3, OfpBody::BarrierReply)));
        assert_eq!(2, queues.len());
    }

    #[test]
    fn earlier_messages_of_one_peer() {
        let mut queues = MessageQueues::new(8);
        queues.push(Direction::Down, 1, msg(1, OfpBody::GetConfigRequest));
        queues.push(Direction::Down, 2, msg(2, OfpBody::GetConfigRequest));
        queues.push(Direction::Down, 1, msg(3, OfpBody::FeaturesRequest));
        queues.push(Direction::Down, 1, msg(4, OfpBody::BarrierRequest));
        queues.push(Direction::Down, 1, msg(5, OfpBody::FeaturesRequest));
        let earlier = queues.take_earlier(Direction::Down, 1, 3);
        let xids: Vec<u32> = earlier.iter().map(|q| q.message.xid()).collect();
        assert_eq!(vec![1, 3], xids);
        assert_eq!(3, queues.len());
        assert_eq!(2, queues.remove_peer(1));
        assert_eq!(1, queues.len());
    }
}
