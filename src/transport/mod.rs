/*!
Sockets and threads around a forwarding element.

Every listening socket and every connection gets a thread that blocks on
it and reports what happened through one channel. The forwarding element
itself and all sessions live in the thread calling `Runtime::run`, which
is woken up by those events or by the nearest timer deadline.
*/

mod endpoint;

pub use self::endpoint::{Endpoint, EndpointEvent, EndpointState, Side, Sink, CLOSE_GRACE};

use conf;
use fwdelem::{FeOutput, ForwardingElement, FwdBehavior, PeerId};
use openflow::messages::OfpHeader;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use timer::HandleTimeout;

/// Longest sleep without any event or timer
const IDLE_WAKEUP: u64 = 1;

/// Reads one OpenFlow frame, header included
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0; 8];
    reader.read_exact(&mut header)?;
    let length = OfpHeader::deserialize(&header).length() as usize;
    if length < OfpHeader::header_length() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} is shorter than the header", length),
        ));
    }
    let mut frame = vec![0; length];
    frame[..8].copy_from_slice(&header);
    reader.read_exact(&mut frame[8..])?;
    Ok(frame)
}

/// What is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Controller,
    Datapath,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Facing::Controller => write!(f, "controller"),
            Facing::Datapath => write!(f, "datapath"),
        }
    }
}

/// Reports of the socket threads. The epoch tells apart the
/// incarnations of a reconnected peer.
#[derive(Debug)]
enum Event {
    Accepted(Facing, TcpStream),
    Connected(PeerId, TcpStream),
    ConnectFailed(PeerId, io::Error),
    Frame(PeerId, u64, Vec<u8>),
    Disconnected(PeerId, u64, io::Error),
}

#[derive(Debug)]
struct Connection {
    facing: Facing,
    endpoint: Endpoint<TcpStream>,
    epoch: u64,
    /// Where an active connection goes to
    remote: Option<SocketAddr>,
}

pub struct Runtime {
    fe: ForwardingElement,
    versions: Vec<u8>,
    session: conf::Session,
    conns: BTreeMap<PeerId, Connection>,
    listening: Vec<(Facing, SocketAddr)>,
    next_id: PeerId,
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

fn listen(facing: Facing, listener: TcpListener, tx: Sender<Event>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if tx.send(Event::Accepted(facing, stream)).is_err() {
                    return;
                }
            }
            Err(e) => warn!("Accepting a {} failed: {}", facing, e),
        }
    }
}

fn read(id: PeerId, epoch: u64, mut stream: TcpStream, tx: Sender<Event>) {
    loop {
        let event = match read_frame(&mut stream) {
            Ok(frame) => Event::Frame(id, epoch, frame),
            Err(e) => {
                let _ = tx.send(Event::Disconnected(id, epoch, e));
                return;
            }
        };
        if tx.send(event).is_err() {
            return;
        }
    }
}

fn connect(id: PeerId, remote: SocketAddr, tx: Sender<Event>) {
    let event = match TcpStream::connect(remote) {
        Ok(stream) => Event::Connected(id, stream),
        Err(e) => Event::ConnectFailed(id, e),
    };
    let _ = tx.send(event);
}

impl Runtime {
    /// Binds the listening sockets and starts connecting to the controller
    pub fn new(config: &conf::Config, behavior: Box<dyn FwdBehavior>) -> io::Result<Runtime> {
        let now = Instant::now();
        let (tx, rx) = mpsc::channel();
        let mut runtime = Runtime {
            fe: ForwardingElement::new(config, behavior, now),
            versions: config.element.versions.clone(),
            session: config.session.clone(),
            conns: BTreeMap::new(),
            listening: vec![],
            next_id: 1,
            tx,
            rx,
        };

        let listeners = vec![
            (Facing::Controller, &config.controller.listen),
            (Facing::Datapath, &config.datapath.listen),
        ];
        for (facing, conn) in listeners {
            if let Some(ref conn) = *conn {
                let listener = TcpListener::bind(conn.socket)?;
                let addr = listener.local_addr()?;
                info!("Listening for {}s on {}", facing, addr);
                runtime.listening.push((facing, addr));
                let tx = runtime.tx.clone();
                thread::spawn(move || listen(facing, listener, tx));
            }
        }

        if let Some(ref conn) = config.controller.connect {
            let id = runtime.new_id();
            let name = format!("controller {} at {}", id, conn.socket);
            let mut endpoint = Endpoint::new(&name, Side::Active, &runtime.versions, &runtime.session);
            endpoint.connecting();
            runtime.conns.insert(
                id,
                Connection {
                    facing: Facing::Controller,
                    endpoint,
                    epoch: 0,
                    remote: Some(conn.socket),
                },
            );
            runtime.start_connect(id, conn.socket);
        }
        Ok(runtime)
    }

    pub fn fe(&self) -> &ForwardingElement {
        &self.fe
    }

    /// The bound addresses of the listening sockets
    pub fn listening(&self) -> &[(Facing, SocketAddr)] {
        &self.listening
    }

    /// Number of connections, established or not
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    fn new_id(&mut self) -> PeerId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn start_connect(&self, id: PeerId, remote: SocketAddr) {
        info!("Connecting to {}", remote);
        let tx = self.tx.clone();
        thread::spawn(move || connect(id, remote, tx));
    }

    /// Runs until the event channel breaks
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            let timeout = self.timeout(Instant::now());
            self.step(timeout)?;
        }
    }

    /// Handles at most one socket event, then everything that is due
    pub fn step(&mut self, timeout: Duration) -> io::Result<()> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => self.handle_event(event, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "event channel closed",
                ))
            }
        }
        self.tick(Instant::now());
        Ok(())
    }

    fn timeout(&self, now: Instant) -> Duration {
        if self.fe.has_pending() {
            return Duration::from_secs(0);
        }
        match self.next_deadline() {
            Some(deadline) if deadline > now => deadline - now,
            Some(_) => Duration::from_secs(0),
            None => Duration::from_secs(IDLE_WAKEUP),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.conns
            .values()
            .filter_map(|conn| conn.endpoint.next_timeout())
            .chain(self.fe.next_timeout())
            .min()
    }

    fn tick(&mut self, now: Instant) {
        if self.fe.has_pending() {
            let handled = self.fe.dispatch(now);
            trace!("Dispatched {} messages", handled);
        }
        self.fe.handle_timeout(now);

        let ids: Vec<PeerId> = self.conns.keys().cloned().collect();
        for id in ids {
            let events = match self.conns.get_mut(&id) {
                Some(conn) => conn.endpoint.handle_timeout(now),
                None => continue,
            };
            self.handle_endpoint_events(id, events, now);
        }
        self.flush(now);
    }

    fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::Accepted(facing, stream) => {
                let id = self.new_id();
                let name = match stream.peer_addr() {
                    Ok(addr) => format!("{} {} at {}", facing, id, addr),
                    Err(_) => format!("{} {}", facing, id),
                };
                info!("Accepted {}", name);
                let endpoint = Endpoint::new(&name, Side::Passive, &self.versions, &self.session);
                self.conns.insert(
                    id,
                    Connection {
                        facing,
                        endpoint,
                        epoch: 0,
                        remote: None,
                    },
                );
                self.start(id, stream, now);
            }
            Event::Connected(id, stream) => {
                let connecting = self.conns
                    .get(&id)
                    .map_or(false, |conn| conn.endpoint.state() == EndpointState::Connecting);
                if connecting {
                    self.start(id, stream, now);
                }
            }
            Event::ConnectFailed(id, e) => {
                let events = match self.conns.get_mut(&id) {
                    Some(conn) => {
                        warn!("Connecting {} failed: {}", conn.endpoint.name(), e);
                        conn.endpoint.close(now)
                    }
                    None => return,
                };
                self.handle_endpoint_events(id, events, now);
            }
            Event::Frame(id, epoch, frame) => {
                let events = match self.conns.get_mut(&id) {
                    Some(conn) => {
                        if conn.epoch != epoch {
                            return;
                        }
                        conn.endpoint.receive_frame(&frame, now)
                    }
                    None => return,
                };
                self.handle_endpoint_events(id, events, now);
            }
            Event::Disconnected(id, epoch, e) => {
                let events = match self.conns.get_mut(&id) {
                    Some(conn) => {
                        if conn.epoch != epoch {
                            return;
                        }
                        if e.kind() == io::ErrorKind::UnexpectedEof {
                            info!("{} hung up", conn.endpoint.name());
                        } else {
                            warn!("Reading from {} failed: {}", conn.endpoint.name(), e);
                        }
                        conn.endpoint.close(now)
                    }
                    None => return,
                };
                self.handle_endpoint_events(id, events, now);
            }
        }
        self.flush(now);
    }

    /// Puts a fresh socket under an endpoint and starts its reader
    fn start(&mut self, id: PeerId, stream: TcpStream, now: Instant) {
        let tx = self.tx.clone();
        let events = match self.conns.get_mut(&id) {
            Some(conn) => {
                let reader = match stream.try_clone() {
                    Ok(reader) => reader,
                    Err(e) => {
                        error!("Cannot read from {}: {}", conn.endpoint.name(), e);
                        return;
                    }
                };
                conn.epoch += 1;
                let epoch = conn.epoch;
                thread::spawn(move || read(id, epoch, reader, tx));
                conn.endpoint.connected(stream, now)
            }
            None => return,
        };
        self.handle_endpoint_events(id, events, now);
    }

    fn handle_endpoint_events(&mut self, id: PeerId, events: Vec<EndpointEvent>, now: Instant) {
        for event in events {
            let (facing, remote) = match self.conns.get(&id) {
                Some(conn) => (conn.facing, conn.remote),
                None => return,
            };
            match event {
                EndpointEvent::Established(version) => match facing {
                    Facing::Controller => self.fe.ctrl_attach(id, version),
                    Facing::Datapath => self.fe.dpath_attach(id, version, now),
                },
                EndpointEvent::Message(message) => {
                    let queued = match facing {
                        Facing::Controller => self.fe.fe_down(id, message),
                        Facing::Datapath => self.fe.fe_up(id, message, now),
                    };
                    if !queued {
                        debug!("Queue of {} {} is full", facing, id);
                    }
                }
                EndpointEvent::Closed => {
                    match facing {
                        Facing::Controller => self.fe.ctrl_detach(id),
                        Facing::Datapath => self.fe.dpath_detach(id),
                    }
                    if remote.is_none() {
                        self.conns.remove(&id);
                    }
                }
                EndpointEvent::Reconnect => {
                    if let Some(remote) = remote {
                        self.start_connect(id, remote);
                    }
                }
            }
        }
    }

    /// Carries out what the forwarding element produced, until it stays quiet
    fn flush(&mut self, now: Instant) {
        loop {
            let output = self.fe.take_output();
            if output.is_empty() {
                return;
            }
            for out in output {
                let (id, events) = match out {
                    FeOutput::Send(id, message) => match self.conns.get_mut(&id) {
                        Some(conn) => (id, conn.endpoint.send(message, now)),
                        None => continue,
                    },
                    FeOutput::Close(id) => match self.conns.get_mut(&id) {
                        Some(conn) => (id, conn.endpoint.close(now)),
                        None => continue,
                    },
                };
                self.handle_endpoint_events(id, events, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwdelem::SwitchBehavior;
    use openflow::messages::*;
    use std::io::Cursor;

    #[test]
    fn frames() {
        let mut bytes = vec![4, 0, 0, 8, 0, 0, 0, 1];
        bytes.extend_from_slice(&[4, 2, 0, 10, 0, 0, 0, 2, 0xab, 0xcd]);
        let mut reader = Cursor::new(bytes);
        assert_eq!(8, read_frame(&mut reader).unwrap().len());
        assert_eq!(
            vec![4, 2, 0, 10, 0, 0, 0, 2, 0xab, 0xcd],
            read_frame(&mut reader).unwrap()
        );
        assert_eq!(
            io::ErrorKind::UnexpectedEof,
            read_frame(&mut reader).unwrap_err().kind()
        );

        let mut short = Cursor::new(vec![4, 0, 0, 4, 0, 0, 0, 1]);
        assert_eq!(
            io::ErrorKind::InvalidData,
            read_frame(&mut short).unwrap_err().kind()
        );
        let mut truncated = Cursor::new(vec![4, 0, 0, 12, 0, 0, 0, 1, 0]);
        assert!(read_frame(&mut truncated).is_err());
    }

    fn expect(client: &mut TcpStream, typ: OfpType) -> OfpMessage {
        let message = OfpMessage::decode(&read_frame(client).unwrap()).unwrap();
        assert_eq!(typ, message.typ());
        message
    }

    #[test]
    fn controller_session() {
        let config = conf::parse_str(
            "[Element]\ndpid=0x2a\n[Controller]\nlisten=tcp:127.0.0.1:0\n",
        ).unwrap();
        let mut runtime = Runtime::new(&config, Box::new(SwitchBehavior)).unwrap();
        let addr = runtime.listening()[0].1;
        assert_eq!(Facing::Controller, runtime.listening()[0].0);

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let step = Duration::from_millis(200);
        for _ in 0..25 {
            runtime.step(step).unwrap();
            if runtime.connection_count() > 0 {
                break;
            }
        }
        assert_eq!(1, runtime.connection_count());
        expect(&mut client, OfpType::Hello);

        let hello = OfpMessage::new(OFP_VERSION_13, 1, OfpBody::Hello(OfpHello::default()));
        client.write_all(&hello.encode().unwrap()).unwrap();
        let request = OfpMessage::new(OFP_VERSION_13, 2, OfpBody::FeaturesRequest);
        client.write_all(&request.encode().unwrap()).unwrap();
        for _ in 0..5 {
            runtime.step(step).unwrap();
        }
        let reply = expect(&mut client, OfpType::FeaturesReply);
        assert_eq!(2, reply.xid());
        match *reply.body() {
            OfpBody::FeaturesReply(ref features) => assert_eq!(0x2a, features.datapath_id),
            ref body => panic!("unexpected {:?}", body),
        }

        assert!(runtime.fe().core().ctrl(1).is_some());

        drop(client);
        for _ in 0..25 {
            runtime.step(step).unwrap();
            if runtime.connection_count() == 0 {
                break;
            }
        }
        assert_eq!(0, runtime.connection_count());
        assert!(runtime.fe().core().ctrl(1).is_none());
    }
}
