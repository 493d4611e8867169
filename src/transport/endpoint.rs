/*!
The session of one OpenFlow connection.

An endpoint negotiates the version with HELLO, keeps the connection alive
with ECHO and, on the active side, reconnects with a growing delay. Until
the version is agreed only HELLO and ERROR pass in either direction.
*/

use conf;
use openflow::messages::*;
use openflow::negotiate_version;
use openflow::version_name;
use openflow::xid::XidStore;
use std::cmp;
use std::collections::VecDeque;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};
use timer::{HandleTimeout, TimerQueue};

/// Seconds a HELLO_FAILED error has to leave before the connection closes
pub const CLOSE_GRACE: u64 = 1;

/// The backoff starts over after this many failed attempts
const BACKOFF_RESET: u32 = 4;

/// What an endpoint writes its frames to
pub trait Sink: Write {
    /// Tears the connection down
    fn close(&mut self) {}
}

impl Sink for TcpStream {
    fn close(&mut self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            debug!("Shutting down the socket failed: {}", e);
        }
    }
}

impl Sink for Vec<u8> {}

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Accepted from a listening socket, gone when closed
    Passive,
    /// Connected to a remote address, reconnected when closed
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Disconnected,
    Connecting,
    /// The socket is up, the version is not agreed yet
    Connected,
    Established,
}

/// What the owner of an endpoint has to react to
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// The version is agreed, messages flow from now on
    Established(u8),
    Message(OfpMessage),
    Closed,
    /// An active endpoint wants a new connection attempt
    Reconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EndpointTimer {
    Echo,
    EchoReply,
    Grace,
    Reconnect,
}

#[derive(Debug)]
pub struct Endpoint<S: Sink> {
    name: String,
    side: Side,
    state: EndpointState,
    versions: Vec<u8>,
    version: Option<u8>,
    session: conf::Session,
    sink: Option<S>,
    /// Messages waiting for the version to be agreed
    outbound: VecDeque<OfpMessage>,
    timers: TimerQueue<EndpointTimer>,
    xids: XidStore,
    backoff: Duration,
    attempts: u32,
}

impl<S: Sink> Endpoint<S> {
    pub fn new(name: &str, side: Side, versions: &[u8], session: &conf::Session) -> Endpoint<S> {
        Endpoint {
            name: name.to_string(),
            side,
            state: EndpointState::Disconnected,
            versions: versions.to_vec(),
            version: None,
            session: session.clone(),
            sink: None,
            outbound: VecDeque::new(),
            timers: TimerQueue::new(),
            xids: XidStore::new(session.xid_ring),
            backoff: session.reconnect_start,
            attempts: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// The agreed version
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn is_established(&self) -> bool {
        self.state == EndpointState::Established
    }

    pub fn sink_mut(&mut self) -> Option<&mut S> {
        self.sink.as_mut()
    }

    /// A connection attempt of an active endpoint started
    pub fn connecting(&mut self) {
        if self.state == EndpointState::Disconnected {
            self.state = EndpointState::Connecting;
        }
    }

    /// The socket is up, HELLO goes out right away
    pub fn connected(&mut self, sink: S, now: Instant) -> Vec<EndpointEvent> {
        if let Some(mut old) = self.sink.take() {
            old.close();
        }
        self.sink = Some(sink);
        self.state = EndpointState::Connected;
        self.timers.cancel(&EndpointTimer::Reconnect);
        debug!("{} is connected", self.name);

        let own_max = self.versions.iter().cloned().max().unwrap_or(OFP_VERSION);
        let hello = OfpHello::for_versions(&self.versions);
        let xid = self.xids.new_async_xid();
        self.write(&OfpMessage::new(own_max, xid, OfpBody::Hello(hello)), now)
    }

    /// Takes a raw frame. Malformed frames are answered once the version is agreed and dropped before.
    pub fn receive_frame(&mut self, frame: &[u8], now: Instant) -> Vec<EndpointEvent> {
        match OfpMessage::decode(frame) {
            Ok(message) => self.receive(message, now),
            Err(e) => {
                debug!("{} sent a malformed frame: {}", self.name, e);
                let version = match self.version {
                    Some(version) if self.is_established() => version,
                    _ => return vec![],
                };
                match OfpErrorMsg::from_error(&e, frame) {
                    Some(error) => {
                        let xid = if frame.len() >= 8 {
                            (u32::from(frame[4]) << 24) | (u32::from(frame[5]) << 16)
                                | (u32::from(frame[6]) << 8) | u32::from(frame[7])
                        } else {
                            0
                        };
                        self.write(&OfpMessage::new(version, xid, OfpBody::Error(error)), now)
                    }
                    None => vec![],
                }
            }
        }
    }

    pub fn receive(&mut self, message: OfpMessage, now: Instant) -> Vec<EndpointEvent> {
        match self.state {
            EndpointState::Disconnected | EndpointState::Connecting => {
                debug!("{} is not connected, dropping {}", self.name, message);
                vec![]
            }
            EndpointState::Connected => match *message.body() {
                OfpBody::Hello(ref hello) => self.hello(message.version(), hello, now),
                OfpBody::Error(ref error) => {
                    warn!("{} refused the session: {}", self.name, error);
                    if error.is_hello_failed() {
                        self.close(now)
                    } else {
                        vec![]
                    }
                }
                _ => {
                    debug!("{} sent {} before HELLO", self.name, message);
                    vec![]
                }
            },
            EndpointState::Established => match *message.body() {
                OfpBody::EchoRequest(ref data) => {
                    let reply = OfpBody::EchoReply(data.clone());
                    self.write(&OfpMessage::new(message.version(), message.xid(), reply), now)
                }
                OfpBody::EchoReply(_) => {
                    match self.xids.validate(message.xid(), OfpType::EchoReply) {
                        Ok(_) => {
                            self.timers.cancel(&EndpointTimer::EchoReply);
                        }
                        Err(e) => debug!("{} sent an unexpected echo reply: {}", self.name, e),
                    }
                    vec![]
                }
                OfpBody::Hello(_) => {
                    debug!("{} repeated its HELLO", self.name);
                    vec![]
                }
                _ => vec![EndpointEvent::Message(message)],
            },
        }
    }

    fn hello(&mut self, peer_version: u8, hello: &OfpHello, now: Instant) -> Vec<EndpointEvent> {
        let version = match negotiate_version(&self.versions, peer_version, hello) {
            Some(version) => version,
            None => {
                warn!(
                    "{} speaks OpenFlow {} only, closing",
                    self.name,
                    version_name(peer_version)
                );
                let reason = format!("OpenFlow {} is not supported", version_name(peer_version));
                let error = OfpErrorMsg::new_hello_failed(&reason);
                let xid = self.xids.new_async_xid();
                let own_max = self.versions.iter().cloned().max().unwrap_or(OFP_VERSION);
                let events = self.write(&OfpMessage::new(own_max, xid, OfpBody::Error(error)), now);
                if events.is_empty() {
                    self.timers.register(EndpointTimer::Grace, now, Duration::from_secs(CLOSE_GRACE));
                }
                return events;
            }
        };
        info!("{} speaks OpenFlow {}", self.name, version_name(version));
        self.state = EndpointState::Established;
        self.version = Some(version);
        self.attempts = 0;
        self.backoff = self.session.reconnect_start;
        self.timers.register(EndpointTimer::Echo, now, self.session.echo_interval);

        let mut events = vec![EndpointEvent::Established(version)];
        while let Some(queued) = self.outbound.pop_front() {
            // queued before the version was known
            let message = OfpMessage::new(version, queued.xid(), queued.into_body());
            let failed = self.write(&message, now);
            if !failed.is_empty() {
                events.extend(failed);
                break;
            }
        }
        events
    }

    /// Sends a message. Before the version is agreed only HELLO and ERROR
    /// go out, others wait. Without a connection everything waiting is dropped.
    pub fn send(&mut self, message: OfpMessage, now: Instant) -> Vec<EndpointEvent> {
        match self.state {
            EndpointState::Established => self.write(&message, now),
            EndpointState::Connected => match message.typ() {
                OfpType::Hello | OfpType::Error => self.write(&message, now),
                _ => {
                    self.outbound.push_back(message);
                    vec![]
                }
            },
            EndpointState::Disconnected | EndpointState::Connecting => {
                debug!(
                    "{} is not connected, dropping {} and {} waiting messages",
                    self.name,
                    message,
                    self.outbound.len()
                );
                self.outbound.clear();
                vec![]
            }
        }
    }

    fn write(&mut self, message: &OfpMessage, now: Instant) -> Vec<EndpointEvent> {
        let result = match self.sink {
            Some(ref mut sink) => message.encode().and_then(|frame| sink.write_all(&frame)),
            None => return vec![],
        };
        match result {
            Ok(()) => {
                trace!("{} <- {}", self.name, message);
                vec![]
            }
            Err(e) => {
                warn!("Writing {} to {} failed: {}", message, self.name, e);
                self.close(now)
            }
        }
    }

    /// The next reconnect delay, doubling up to the maximum
    fn next_backoff(&mut self) -> Duration {
        let delay = self.backoff;
        self.attempts += 1;
        if self.attempts >= BACKOFF_RESET {
            self.attempts = 0;
            self.backoff = self.session.reconnect_start;
        } else {
            self.backoff = cmp::min(self.backoff * 2, self.session.reconnect_max);
        }
        delay
    }

    /// Closes the connection. Active endpoints schedule a reconnect.
    pub fn close(&mut self, now: Instant) -> Vec<EndpointEvent> {
        let was = self.state;
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
        self.state = EndpointState::Disconnected;
        self.version = None;
        self.outbound.clear();
        self.timers.clear();
        self.xids.clear();

        let mut events = vec![];
        if was == EndpointState::Disconnected {
            return events;
        }
        if was != EndpointState::Connecting {
            info!("{} is closed", self.name);
            events.push(EndpointEvent::Closed);
        }
        if self.side == Side::Active {
            let delay = self.next_backoff();
            info!("Reconnecting {} in {} s", self.name, delay.as_secs());
            self.timers.register(EndpointTimer::Reconnect, now, delay);
        }
        events
    }

    fn echo(&mut self, now: Instant) -> Vec<EndpointEvent> {
        let version = match self.version {
            Some(version) if self.is_established() => version,
            _ => return vec![],
        };
        let xid = self.xids.add_request(OfpType::EchoRequest);
        self.timers.register(EndpointTimer::EchoReply, now, self.session.echo_timeout);
        self.timers.register(EndpointTimer::Echo, now, self.session.echo_interval);
        self.write(&OfpMessage::new(version, xid, OfpBody::EchoRequest(vec![])), now)
    }
}

impl<S: Sink> HandleTimeout for Endpoint<S> {
    type Output = Vec<EndpointEvent>;

    fn handle_timeout(&mut self, now: Instant) -> Vec<EndpointEvent> {
        let mut events = vec![];
        for timer in self.timers.expired(now) {
            match timer {
                EndpointTimer::Echo => events.extend(self.echo(now)),
                EndpointTimer::EchoReply => {
                    warn!("{} did not answer the echo request", self.name);
                    events.extend(self.close(now));
                }
                EndpointTimer::Grace => events.extend(self.close(now)),
                EndpointTimer::Reconnect => {
                    self.connecting();
                    events.push(EndpointEvent::Reconnect);
                }
            }
        }
        events
    }

    fn next_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openflow::SUPPORTED_VERSIONS;
    use std::mem;

    fn endpoint(side: Side) -> Endpoint<Vec<u8>> {
        Endpoint::new("test peer", side, &SUPPORTED_VERSIONS, &conf::Session::default())
    }

    /// Decodes and removes everything written so far
    fn written(ep: &mut Endpoint<Vec<u8>>) -> Vec<OfpMessage> {
        let bytes = match ep.sink_mut() {
            Some(sink) => mem::replace(sink, vec![]),
            None => return vec![],
        };
        let mut messages = vec![];
        let mut rest = &bytes[..];
        while !rest.is_empty() {
            let len = ((rest[2] as usize) << 8) | rest[3] as usize;
            messages.push(OfpMessage::decode(&rest[..len]).unwrap());
            rest = &rest[len..];
        }
        messages
    }

    fn hello(version: u8) -> OfpMessage {
        OfpMessage::new(version, 1, OfpBody::Hello(OfpHello::for_versions(&[version])))
    }

    fn established(now: Instant) -> Endpoint<Vec<u8>> {
        let mut ep = endpoint(Side::Passive);
        ep.connected(vec![], now);
        ep.receive(hello(OFP_VERSION_13), now);
        written(&mut ep);
        ep
    }

    #[test]
    fn hello_negotiation() {
        let now = Instant::now();
        let mut ep = endpoint(Side::Passive);
        assert!(ep.connected(vec![], now).is_empty());
        let out = written(&mut ep);
        assert_eq!(1, out.len());
        assert_eq!(OFP_VERSION_13, out[0].version());
        assert_eq!(
            OfpBody::Hello(OfpHello::for_versions(&SUPPORTED_VERSIONS)),
            *out[0].body()
        );

        let events = ep.receive(hello(OFP_VERSION_12), now);
        assert_eq!(vec![EndpointEvent::Established(OFP_VERSION_12)], events);
        assert_eq!(Some(OFP_VERSION_12), ep.version());
        assert_eq!(Some(now + Duration::from_secs(30)), ep.next_timeout());
    }

    #[test]
    fn only_hello_and_error_before_agreement() {
        let now = Instant::now();
        let mut ep = endpoint(Side::Passive);
        let request = OfpMessage::new(OFP_VERSION_13, 2, OfpBody::FeaturesRequest);
        assert!(ep.receive(request.clone(), now).is_empty());

        ep.connected(vec![], now);
        written(&mut ep);
        assert!(ep.receive(request.clone(), now).is_empty());
        let reply = OfpMessage::new(OFP_VERSION_13, 2, OfpBody::BarrierReply);
        assert!(ep.send(reply.clone(), now).is_empty());
        assert!(written(&mut ep).is_empty());

        ep.receive(hello(OFP_VERSION_13), now);
        assert_eq!(vec![reply], written(&mut ep));
        assert_eq!(
            vec![EndpointEvent::Message(request.clone())],
            ep.receive(request, now)
        );
    }

    #[test]
    fn waiting_messages_take_the_agreed_version() {
        let now = Instant::now();
        let mut ep = endpoint(Side::Active);
        ep.connected(vec![], now);
        written(&mut ep);
        let request = OfpMessage::new(OFP_VERSION_13, 9, OfpBody::FeaturesRequest);
        assert!(ep.send(request, now).is_empty());

        ep.receive(hello(OFP_VERSION_12), now);
        assert_eq!(
            vec![OfpMessage::new(OFP_VERSION_12, 9, OfpBody::FeaturesRequest)],
            written(&mut ep)
        );
    }

    #[test]
    fn incompatible_peer() {
        let now = Instant::now();
        let mut ep = endpoint(Side::Passive);
        ep.connected(vec![], now);
        written(&mut ep);
        let old = OfpMessage::new(OFP_VERSION_10, 1, OfpBody::Hello(OfpHello::default()));
        assert!(ep.receive(old, now).is_empty());
        let out = written(&mut ep);
        match *out[0].body() {
            OfpBody::Error(ref error) => assert!(error.is_hello_failed()),
            ref body => panic!("unexpected {:?}", body),
        }
        assert_eq!(EndpointState::Connected, ep.state());
        assert_eq!(
            vec![EndpointEvent::Closed],
            ep.handle_timeout(now + Duration::from_secs(CLOSE_GRACE))
        );
        assert_eq!(EndpointState::Disconnected, ep.state());
        assert_eq!(None, ep.next_timeout());
    }

    #[test]
    fn echo() {
        let now = Instant::now();
        let mut ep = established(now);
        let request = OfpMessage::new(OFP_VERSION_13, 9, OfpBody::EchoRequest(vec![1, 2]));
        assert!(ep.receive(request, now).is_empty());
        assert_eq!(
            vec![OfpMessage::new(OFP_VERSION_13, 9, OfpBody::EchoReply(vec![1, 2]))],
            written(&mut ep)
        );

        let t1 = now + Duration::from_secs(30);
        assert!(ep.handle_timeout(t1).is_empty());
        let out = written(&mut ep);
        assert_eq!(OfpType::EchoRequest, out[0].typ());
        let reply = OfpMessage::new(OFP_VERSION_13, out[0].xid(), OfpBody::EchoReply(vec![]));
        assert!(ep.receive(reply, t1).is_empty());
        assert!(ep.handle_timeout(t1 + Duration::from_secs(15)).is_empty());
        assert!(ep.is_established());

        let t2 = t1 + Duration::from_secs(30);
        ep.handle_timeout(t2);
        assert_eq!(OfpType::EchoRequest, written(&mut ep)[0].typ());
        assert_eq!(
            vec![EndpointEvent::Closed],
            ep.handle_timeout(t2 + Duration::from_secs(15))
        );
    }

    #[test]
    fn malformed_frames() {
        let now = Instant::now();
        let frame = [OFP_VERSION_13, 200, 0, 8, 0, 0, 0, 7];
        let mut ep = endpoint(Side::Passive);
        ep.connected(vec![], now);
        written(&mut ep);
        assert!(ep.receive_frame(&frame, now).is_empty());
        assert!(written(&mut ep).is_empty());

        let mut ep = established(now);
        assert!(ep.receive_frame(&frame, now).is_empty());
        let out = written(&mut ep);
        assert_eq!(7, out[0].xid());
        match *out[0].body() {
            OfpBody::Error(ref error) => {
                assert_eq!(OfpErrorType::BadRequest as u16, error.typ);
                assert_eq!(OfpBadRequestCode::BadType as u16, error.code);
                assert_eq!(frame.to_vec(), error.data);
            }
            ref body => panic!("unexpected {:?}", body),
        }
    }

    #[test]
    fn reconnect_backoff() {
        let mut now = Instant::now();
        let mut ep = endpoint(Side::Active);
        ep.connecting();
        let mut delays = vec![];
        for _ in 0..5 {
            assert!(ep.close(now).is_empty());
            let deadline = ep.next_timeout().unwrap();
            delays.push((deadline - now).as_secs());
            now = deadline;
            assert_eq!(vec![EndpointEvent::Reconnect], ep.handle_timeout(now));
            assert_eq!(EndpointState::Connecting, ep.state());
        }
        assert_eq!(vec![5, 10, 20, 40, 5], delays);
    }

    #[test]
    fn close_drops_waiting_messages() {
        let now = Instant::now();
        let mut ep = endpoint(Side::Active);
        ep.connecting();
        ep.connected(vec![], now);
        ep.send(OfpMessage::new(OFP_VERSION_13, 3, OfpBody::BarrierRequest), now);
        assert_eq!(vec![EndpointEvent::Closed], ep.close(now));
        ep.connected(vec![], now);
        written(&mut ep);
        ep.receive(hello(OFP_VERSION_13), now);
        assert!(written(&mut ep).is_empty());
        assert_eq!(vec![EndpointEvent::Closed], ep.close(now));
        assert_eq!(Some(now + Duration::from_secs(5)), ep.next_timeout());
    }
}
