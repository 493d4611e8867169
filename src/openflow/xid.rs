/*!
Transaction id bookkeeping per peer

Every request that expects a reply is registered with the type of the
request. A reply is only accepted if its xid is pending and the types fit.
Recently used xids are kept in a bounded ring and not handed out again.
*/

use openflow::messages::OfpType;
use rand;
use std::collections::{HashMap, VecDeque};
use std::error;
use std::fmt;
use std::result;

/// Default size of the ring of recently used xids
pub const DEFAULT_XID_RING: usize = 16;
/// Default number of requests waiting for a reply. Beyond it the oldest is forgotten.
pub const DEFAULT_MAX_PENDING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XidError {
    /// The xid does not belong to any pending request
    Unknown(u32),
    /// The xid is pending but for another request type
    TypeMismatch {
        xid: u32,
        expected: OfpType,
        received: OfpType,
    },
}

impl error::Error for XidError {
    fn description(&self) -> &str {
        match *self {
            XidError::Unknown(_) => "unknown transaction id",
            XidError::TypeMismatch { .. } => "reply type does not fit the request",
        }
    }
}

impl fmt::Display for XidError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            XidError::Unknown(xid) => write!(f, "Unknown xid 0x{:08x}", xid),
            XidError::TypeMismatch {
                xid,
                expected,
                received,
            } => write!(
                f,
                "xid 0x{:08x} was issued for {:?} but answered by {:?}",
                xid, expected, received
            ),
        }
    }
}

pub type Result<T> = result::Result<T, XidError>;

/// The outstanding transactions of one peer
#[derive(Debug)]
pub struct XidStore {
    /// Request type and issue sequence number per xid
    pending: HashMap<u32, (u64, OfpType)>,
    next_seq: u64,
    max_pending: usize,
    recent: VecDeque<u32>,
    ring_size: usize,
}

impl Default for XidStore {
    fn default() -> Self {
        XidStore::new(DEFAULT_XID_RING)
    }
}

impl XidStore {
    pub fn new(ring_size: usize) -> XidStore {
        XidStore::with_limits(ring_size, DEFAULT_MAX_PENDING)
    }

    pub fn with_limits(ring_size: usize, max_pending: usize) -> XidStore {
        XidStore {
            pending: HashMap::new(),
            next_seq: 0,
            max_pending: max_pending.max(1),
            recent: VecDeque::with_capacity(ring_size),
            ring_size,
        }
    }

    fn gen_xid(&mut self) -> u32 {
        loop {
            let xid: u32 = rand::random();
            if !self.pending.contains_key(&xid) && !self.recent.contains(&xid) {
                if self.ring_size > 0 {
                    if self.recent.len() == self.ring_size {
                        self.recent.pop_front();
                    }
                    self.recent.push_back(xid);
                }
                trace!("Using xid {} for the outgoing message", xid);
                return xid;
            }
        }
    }

    /// Allocates an xid for a request of type `typ` that expects a reply
    pub fn add_request(&mut self, typ: OfpType) -> u32 {
        if self.pending.len() >= self.max_pending {
            self.forget_oldest();
        }
        let xid = self.gen_xid();
        self.pending.insert(xid, (self.next_seq, typ));
        self.next_seq += 1;
        xid
    }

    fn forget_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|&(_, &(seq, _))| seq)
            .map(|(&xid, &(_, typ))| (xid, typ));
        if let Some((xid, typ)) = oldest {
            debug!("No reply to {:?} with xid 0x{:08x}, forgetting it", typ, xid);
            self.pending.remove(&xid);
        }
    }

    /// Allocates an xid for a message that is not answered
    pub fn new_async_xid(&mut self) -> u32 {
        self.gen_xid()
    }

    /// Checks a reply without consuming its transaction.
    /// Used for multipart replies that announce more parts to follow.
    pub fn check(&self, xid: u32, reply: OfpType) -> Result<OfpType> {
        match self.pending.get(&xid) {
            None => Err(XidError::Unknown(xid)),
            Some(&(_, request)) => {
                if reply.request_type() == Some(request) || reply == OfpType::Error {
                    Ok(request)
                } else {
                    Err(XidError::TypeMismatch {
                        xid,
                        expected: request,
                        received: reply,
                    })
                }
            }
        }
    }

    /// Validates a reply and consumes its transaction.
    /// An ERROR answers any request type.
    pub fn validate(&mut self, xid: u32, reply: OfpType) -> Result<OfpType> {
        let request = self.check(xid, reply)?;
        self.pending.remove(&xid);
        Ok(request)
    }

    /// Forgets a pending request, e.g. because its reply timed out
    pub fn cancel(&mut self, xid: u32) -> Option<OfpType> {
        self.pending.remove(&xid).map(|(_, typ)| typ)
    }

    pub fn is_pending(&self, xid: u32) -> bool {
        self.pending.contains_key(&xid)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops all state, on connection loss
    pub fn clear(&mut self) {
        self.pending.clear();
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_pops_once() {
        let mut store = XidStore::default();
        let xid = store.add_request(OfpType::EchoRequest);
        assert_eq!(
            OfpType::EchoRequest,
            store.validate(xid, OfpType::EchoReply).unwrap()
        );
        assert_eq!(
            XidError::Unknown(xid),
            store.validate(xid, OfpType::EchoReply).unwrap_err()
        );
    }

    #[test]
    fn type_mismatch_keeps_request() {
        let mut store = XidStore::default();
        let xid = store.add_request(OfpType::FeaturesRequest);
        match store.validate(xid, OfpType::BarrierReply).unwrap_err() {
            XidError::TypeMismatch { expected, .. } => {
                assert_eq!(OfpType::FeaturesRequest, expected)
            }
            e => panic!("unexpected {:?}", e),
        }
        assert!(store.is_pending(xid));
        assert!(store.validate(xid, OfpType::FeaturesReply).is_ok());
    }

    #[test]
    fn error_answers_any_request() {
        let mut store = XidStore::default();
        let xid = store.add_request(OfpType::MultipartRequest);
        assert!(store.validate(xid, OfpType::Error).is_ok());
        assert_eq!(0, store.pending_count());
    }

    #[test]
    fn check_does_not_consume() {
        let mut store = XidStore::default();
        let xid = store.add_request(OfpType::MultipartRequest);
        assert!(store.check(xid, OfpType::MultipartReply).is_ok());
        assert!(store.check(xid, OfpType::MultipartReply).is_ok());
        assert!(store.validate(xid, OfpType::MultipartReply).is_ok());
    }

    #[test]
    fn async_xids_are_not_pending() {
        let mut store = XidStore::default();
        let xid = store.new_async_xid();
        assert!(!store.is_pending(xid));
        assert!(store.validate(xid, OfpType::EchoReply).is_err());
    }

    #[test]
    fn unanswered_requests_are_bounded() {
        let mut store = XidStore::with_limits(DEFAULT_XID_RING, 3);
        let first = store.add_request(OfpType::EchoRequest);
        let second = store.add_request(OfpType::MultipartRequest);
        let third = store.add_request(OfpType::MultipartRequest);
        assert!(store.validate(second, OfpType::MultipartReply).is_ok());
        let fourth = store.add_request(OfpType::EchoRequest);
        assert_eq!(3, store.pending_count());

        let fifth = store.add_request(OfpType::BarrierRequest);
        assert_eq!(3, store.pending_count());
        assert!(!store.is_pending(first));
        for xid in &[third, fourth, fifth] {
            assert!(store.is_pending(*xid));
        }
        for _ in 0..1000 {
            store.add_request(OfpType::EchoRequest);
        }
        assert_eq!(3, store.pending_count());
    }

    #[test]
    fn recent_ring_is_bounded() {
        let mut store = XidStore::new(4);
        let mut xids = vec![];
        for _ in 0..10 {
            xids.push(store.new_async_xid());
        }
        assert_eq!(4, store.recent.len());
        assert_eq!(&xids[6..], store.recent.iter().cloned().collect::<Vec<_>>().as_slice());
    }
}
