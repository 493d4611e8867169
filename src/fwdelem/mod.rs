/*!
The forwarding element: an emulated datapath toward controllers and a
controller toward datapaths.

Messages coming in from either side are queued per direction and type
and handled on the next `dispatch` round, one message per queue and
round. Everything the element wants to send ends up in an output list
the owner drains with `take_output`, so the element itself never touches
a socket.
*/

mod behavior;
mod peer;
mod queue;

pub use self::behavior::{FwdBehavior, SwitchBehavior};
pub use self::peer::{CtrlPeer, DpathPeer, DpathState};
pub use self::queue::{Direction, MessageQueues, Queued};

use byteorder::{ByteOrder, NetworkEndian};
use conf;
use flowtable::{FlowEntry, FlowModResult};
use openflow::error::{Error, Result};
use openflow::messages::*;
use pipeline::{Pipeline, Verdict};
use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use timer::{HandleTimeout, Scheduler, TimerQueue};

/// Identifies a connection, assigned by the owner of the element
pub type PeerId = u64;

/// Seconds a datapath has for each handshake step
pub const HANDSHAKE_TIMEOUT: u64 = 10;
/// Seconds a datapath has to answer a barrier
pub const BARRIER_TIMEOUT: u64 = 10;

/// Longest frame a port takes. A PACKET_IN carrying all of it and an
/// in_port match still fits one message.
pub const MAX_FRAME_LEN: usize = 0xffff - 8 - 16 - 16 - 2;

const OFPC_FRAG_MASK: u16 = 3;

/// Packs flow statistics into parts that each fit into one reply message
fn split_flow_stats(stats: Vec<OfpFlowStats>) -> Vec<Vec<OfpFlowStats>> {
    let mut parts = vec![];
    let mut part = vec![];
    let mut size = 0;
    for entry in stats {
        let length = entry.length();
        if !part.is_empty() && size + length > MULTIPART_REPLY_BODY_MAX {
            parts.push(mem::replace(&mut part, vec![]));
            size = 0;
        }
        size += length;
        part.push(entry);
    }
    parts.push(part);
    parts
}

/// What the owner of the element has to carry out
#[derive(Debug, Clone, PartialEq)]
pub enum FeOutput {
    Send(PeerId, OfpMessage),
    Close(PeerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeTimer {
    Handshake(PeerId),
    Barrier(PeerId, u32),
}

/// A port of the emulated datapath
#[derive(Debug)]
pub struct EmulatedPort {
    pub desc: OfpPort,
    pub stats: OfpPortStats,
    created: Instant,
}

impl EmulatedPort {
    fn new(port_no: u32, name: &str, datapath_id: u64, now: Instant) -> EmulatedPort {
        let mut hw_addr = [0x02, datapath_id as u8, 0, 0, 0, 0];
        NetworkEndian::write_u32(&mut hw_addr[2..], port_no);
        let features = OFPPF_1GB_FD | OFPPF_COPPER;
        EmulatedPort {
            desc: OfpPort {
                port_no,
                hw_addr,
                name: name.chars().take(OFP_MAX_PORT_NAME_LEN - 1).collect(),
                config: 0,
                state: OFPPS_LIVE,
                curr: features,
                advertised: features,
                supported: features,
                peer: 0,
                curr_speed: 1_000_000,
                max_speed: 1_000_000,
            },
            stats: OfpPortStats {
                port_no,
                ..Default::default()
            },
            created: now,
        }
    }

    pub fn can_receive(&self) -> bool {
        self.desc.config & (OFPPC_PORT_DOWN | OFPPC_NO_RECV) == 0
    }

    pub fn can_forward(&self) -> bool {
        self.desc.is_live() && self.desc.config & OFPPC_NO_FWD == 0
    }

    fn stats(&self, now: Instant) -> OfpPortStats {
        let alive = if now > self.created {
            now - self.created
        } else {
            Duration::from_secs(0)
        };
        OfpPortStats {
            duration_sec: alive.as_secs() as u32,
            duration_nsec: alive.subsec_nanos(),
            ..self.stats.clone()
        }
    }
}

fn expects_reply(typ: OfpType) -> bool {
    match typ {
        OfpType::EchoRequest
        | OfpType::FeaturesRequest
        | OfpType::GetConfigRequest
        | OfpType::MultipartRequest
        | OfpType::BarrierRequest
        | OfpType::QueueGetConfigRequest
        | OfpType::RoleRequest
        | OfpType::GetAsyncRequest => true,
        _ => false,
    }
}

/// Messages a SLAVE controller must not send
fn changes_state(typ: OfpType) -> bool {
    match typ {
        OfpType::SetConfig
        | OfpType::PacketOut
        | OfpType::FlowMod
        | OfpType::GroupMod
        | OfpType::PortMod
        | OfpType::TableMod => true,
        _ => false,
    }
}

#[derive(Debug, PartialEq)]
enum Step {
    NotHandshake,
    Progress,
    Opened,
}

/// The state of the element that behaviors may work on
#[derive(Debug)]
pub struct FeCore {
    element: conf::Element,
    session: conf::Session,
    pipeline: Pipeline,
    switch_config: OfpSwitchConfig,
    ports: BTreeMap<u32, EmulatedPort>,
    ctrls: BTreeMap<PeerId, CtrlPeer>,
    dpaths: BTreeMap<PeerId, DpathPeer>,
    generation_id: Option<u64>,
    timers: TimerQueue<FeTimer>,
    output: Vec<FeOutput>,
    transmitted: Vec<(u32, Vec<u8>)>,
}

impl FeCore {
    pub fn new(config: &conf::Config, now: Instant) -> FeCore {
        let element = config.element.clone();
        let ports = config
            .ports
            .by_number
            .iter()
            .map(|(no, name)| (*no, EmulatedPort::new(*no, name, element.datapath_id, now)))
            .collect();
        FeCore {
            pipeline: Pipeline::new(element.n_tables, element.max_entries, element.max_groups),
            element,
            session: config.session.clone(),
            switch_config: OfpSwitchConfig::default(),
            ports,
            ctrls: BTreeMap::new(),
            dpaths: BTreeMap::new(),
            generation_id: None,
            timers: TimerQueue::new(),
            output: vec![],
            transmitted: vec![],
        }
    }

    pub fn element(&self) -> &conf::Element {
        &self.element
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn switch_config(&self) -> OfpSwitchConfig {
        self.switch_config
    }

    pub fn port(&self, port_no: u32) -> Option<&EmulatedPort> {
        self.ports.get(&port_no)
    }

    pub fn port_descs(&self) -> Vec<OfpPort> {
        self.ports.values().map(|p| p.desc.clone()).collect()
    }

    pub fn ctrl(&self, ctrl: PeerId) -> Option<&CtrlPeer> {
        self.ctrls.get(&ctrl)
    }

    pub fn dpath(&self, dpath: PeerId) -> Option<&DpathPeer> {
        self.dpaths.get(&dpath)
    }

    /// The datapaths that completed the handshake
    pub fn open_dpaths(&self) -> Vec<PeerId> {
        self.dpaths
            .values()
            .filter(|d| d.is_open())
            .map(DpathPeer::id)
            .collect()
    }

    pub fn take_output(&mut self) -> Vec<FeOutput> {
        mem::replace(&mut self.output, vec![])
    }

    fn push(&mut self, peer: PeerId, message: OfpMessage) {
        debug!("Outgoing message to peer {}: {}", peer, message);
        trace!("{:?}", message.body());
        self.output.push(FeOutput::Send(peer, message));
    }

    /// Answers a request of a controller
    pub fn reply(&mut self, ctrl: PeerId, xid: u32, body: OfpBody) {
        match self.ctrls.get(&ctrl).map(CtrlPeer::version) {
            Some(version) => self.push(ctrl, OfpMessage::new(version, xid, body)),
            None => debug!("Controller {} is gone, dropping {:?}", ctrl, body.typ()),
        }
    }

    /// Answers `request` with the ERROR message for `error`
    pub fn send_error(&mut self, peer: PeerId, request: &OfpMessage, error: &Error) {
        let frame = request.encode().unwrap_or_default();
        match OfpErrorMsg::from_error(error, &frame) {
            Some(msg) => {
                debug!("Answering {} from peer {} with {}", request, peer, msg);
                let reply = OfpMessage::new(request.version(), request.xid(), OfpBody::Error(msg));
                self.push(peer, reply);
            }
            None => warn!("{} while handling {} from peer {}", error, request, peer),
        }
    }

    /// Sends an asynchronous message to every controller that is not a slave and wants it
    pub fn notify_ctrls(&mut self, body: OfpBody) {
        let typ = body.typ();
        let reason = match body {
            OfpBody::PacketIn(ref packet_in) => packet_in.reason as u8,
            OfpBody::FlowRemoved(ref removed) => removed.reason as u8,
            OfpBody::PortStatus(ref status) => status.reason as u8,
            _ => 0,
        };
        let mut messages = vec![];
        for ctrl in self.ctrls.values_mut() {
            if ctrl.is_slave() || !ctrl.wants(typ, reason) {
                trace!("Not sending {:?} to {}", typ, ctrl);
                continue;
            }
            let xid = ctrl.xids.new_async_xid();
            messages.push((ctrl.id(), OfpMessage::new(ctrl.version(), xid, body.clone())));
        }
        for (ctrl, message) in messages {
            self.push(ctrl, message);
        }
    }

    /// Sends a message to a datapath and returns its xid.
    /// Requests are registered as pending, barriers get a reply timeout.
    pub fn send_to_dpath(&mut self, dpath: PeerId, body: OfpBody, now: Instant) -> Option<u32> {
        let typ = body.typ();
        let (version, xid) = match self.dpaths.get_mut(&dpath) {
            Some(peer) => {
                let xid = if expects_reply(typ) {
                    peer.xids.add_request(typ)
                } else {
                    peer.xids.new_async_xid()
                };
                (peer.version(), xid)
            }
            None => {
                debug!("Datapath {} is gone, dropping {:?}", dpath, typ);
                return None;
            }
        };
        if typ == OfpType::BarrierRequest {
            self.register_timer(
                FeTimer::Barrier(dpath, xid),
                now,
                Duration::from_secs(BARRIER_TIMEOUT),
            );
        }
        self.push(dpath, OfpMessage::new(version, xid, body));
        Some(xid)
    }

    /// Sends a FlowMod to a datapath and mirrors it in its shadow tables
    pub fn dpath_flow_mod(&mut self, dpath: PeerId, flow_mod: &OfpFlowMod, now: Instant) -> Option<u32> {
        if let Some(peer) = self.dpaths.get(&dpath) {
            if let Err(e) = peer.shadow.apply_flow_mod(flow_mod, now) {
                debug!("Shadow tables of {} refused {:?}: {}", peer, flow_mod.command, e);
            }
        }
        self.send_to_dpath(dpath, OfpBody::FlowMod(flow_mod.clone()), now)
    }

    /// Sends a GroupMod to a datapath and mirrors it in its shadow tables
    pub fn dpath_group_mod(&mut self, dpath: PeerId, group_mod: &OfpGroupMod, now: Instant) -> Option<u32> {
        if let Some(peer) = self.dpaths.get_mut(&dpath) {
            if let Err(e) = peer.shadow.group_mod(group_mod, now) {
                debug!("Shadow tables of datapath {} refused {:?}: {}", dpath, group_mod.command, e);
            }
        }
        self.send_to_dpath(dpath, OfpBody::GroupMod(group_mod.clone()), now)
    }

    pub fn features(&self) -> OfpSwitchFeatures {
        OfpSwitchFeatures {
            datapath_id: self.element.datapath_id,
            n_buffers: self.element.n_buffers,
            n_tables: self.pipeline.n_tables(),
            auxiliary_id: 0,
            capabilities: OFPC_FLOW_STATS | OFPC_TABLE_STATS | OFPC_PORT_STATS | OFPC_GROUP_STATS,
            reserved: 0,
            ports: self.port_descs(),
        }
    }

    pub fn set_switch_config(&mut self, config: OfpSwitchConfig) -> Result<()> {
        if config.flags & !OFPC_FRAG_MASK != 0 {
            return Err(Error::SwitchConfigFailed(OfpSwitchConfigFailedCode::BadFlags));
        }
        self.switch_config = config;
        Ok(())
    }

    /// Applies a FlowMod to the emulated tables.
    /// FLOW_REMOVED goes out for every deleted entry that asks for it.
    pub fn flow_mod(&mut self, flow_mod: &OfpFlowMod, now: Instant) -> Result<FlowModResult> {
        match flow_mod.command {
            OfpFlowModCommand::Delete | OfpFlowModCommand::DeleteStrict => {}
            _ => {
                if flow_mod.buffer_id != OFP_NO_BUFFER {
                    return Err(Error::BadRequest(OfpBadRequestCode::BufferUnknown));
                }
            }
        }
        let result = self.pipeline.flow_mod(flow_mod, now)?;
        debug!(
            "{:?} in table {}: {} added, {} modified, {} removed",
            flow_mod.command,
            flow_mod.table_id,
            result.added.iter().count(),
            result.modified.len(),
            result.removed.len()
        );
        self.flows_removed(&result.removed, now);
        Ok(result)
    }

    /// Applies a GroupMod, flows forwarding to a deleted group are removed
    pub fn group_mod(&mut self, group_mod: &OfpGroupMod, now: Instant) -> Result<()> {
        let removed = self.pipeline.group_mod(group_mod, now)?;
        self.flows_removed(&removed, now);
        Ok(())
    }

    pub fn flows_removed(&mut self, entries: &[Arc<FlowEntry>], now: Instant) {
        for entry in entries {
            if !entry.sends_flow_removed() {
                continue;
            }
            if let Some(removed) = entry.flow_removed(now) {
                self.notify_ctrls(OfpBody::FlowRemoved(removed));
            }
        }
    }

    pub fn table_mod(&mut self, table_mod: &OfpTableMod) -> Result<()> {
        self.pipeline.table_mod(table_mod)
    }

    pub fn port_mod(&mut self, port_mod: &OfpPortMod) -> Result<()> {
        let desc = {
            let port = self.ports
                .get_mut(&port_mod.port_no)
                .ok_or(Error::PortModFailed(OfpPortModFailedCode::BadPort))?;
            if port.desc.hw_addr != port_mod.hw_addr {
                return Err(Error::PortModFailed(OfpPortModFailedCode::BadHwAddr));
            }
            let configurable = OFPPC_PORT_DOWN | OFPPC_NO_RECV | OFPPC_NO_FWD | OFPPC_NO_PACKET_IN;
            if port_mod.mask & !configurable != 0 {
                return Err(Error::PortModFailed(OfpPortModFailedCode::BadConfig));
            }
            if port_mod.advertise & !port.desc.supported != 0 {
                return Err(Error::PortModFailed(OfpPortModFailedCode::BadAdvertise));
            }
            if port_mod.advertise != 0 {
                port.desc.advertised = port_mod.advertise;
            }
            port.desc.config = (port.desc.config & !port_mod.mask) | (port_mod.config & port_mod.mask);
            if port.desc.config & OFPPC_PORT_DOWN != 0 {
                port.desc.state = OFPPS_LINK_DOWN;
            } else {
                port.desc.state = OFPPS_LIVE;
            }
            port.desc.clone()
        };
        info!("Port {} has config 0x{:x} now", desc.port_no, desc.config);
        self.notify_ctrls(OfpBody::PortStatus(OfpPortStatus {
            reason: OfpPortReason::Modify,
            desc,
        }));
        Ok(())
    }

    /// Executes the actions of a PACKET_OUT, OFPP_TABLE runs the pipeline
    pub fn packet_out(&mut self, packet_out: &OfpPacketOut, now: Instant) -> Result<()> {
        if packet_out.buffer_id != OFP_NO_BUFFER {
            return Err(Error::BadRequest(OfpBadRequestCode::BufferUnknown));
        }
        let in_port = packet_out.in_port;
        if in_port != OFPP_CONTROLLER && in_port != OFPP_ANY && in_port != OFPP_LOCAL
            && !self.ports.contains_key(&in_port)
        {
            return Err(Error::BadRequest(OfpBadRequestCode::BadPort));
        }
        for action in &packet_out.actions {
            if let OfpAction::Output { port, .. } = *action {
                if port == 0 || port == OFPP_ANY {
                    return Err(Error::BadAction(OfpBadActionCode::BadOutPort));
                }
            }
        }
        let verdicts = {
            let ports = &self.ports;
            let live = |port_no: u32| ports.get(&port_no).map_or(false, |p| p.desc.is_live());
            self.pipeline
                .packet_out(in_port, &packet_out.actions, &packet_out.data, now, &live)
        };
        self.deliver(in_port, &packet_out.data, verdicts);
        Ok(())
    }

    /// Runs a frame received on `in_port` through the pipeline.
    /// Returns false if the port does not exist or does not receive.
    fn receive(&mut self, in_port: u32, frame: &[u8], now: Instant) -> bool {
        match self.ports.get_mut(&in_port) {
            Some(port) => {
                if !port.can_receive() {
                    port.stats.rx_dropped += 1;
                    return false;
                }
                if frame.len() > MAX_FRAME_LEN {
                    debug!("Dropping frame of {} bytes from port {}", frame.len(), in_port);
                    port.stats.rx_dropped += 1;
                    return false;
                }
                port.stats.rx_packets += 1;
                port.stats.rx_bytes += frame.len() as u64;
            }
            None => {
                debug!("Dropping frame from unknown port {}", in_port);
                return false;
            }
        }
        let verdicts = {
            let ports = &self.ports;
            let live = |port_no: u32| ports.get(&port_no).map_or(false, |p| p.desc.is_live());
            self.pipeline.process(in_port, frame, now, &live)
        };
        trace!("Frame from port {}: {:?}", in_port, verdicts);
        self.deliver(in_port, frame, verdicts);
        true
    }

    fn deliver(&mut self, in_port: u32, frame: &[u8], verdicts: Vec<Verdict>) {
        for verdict in verdicts {
            match verdict {
                Verdict::Output(port_no) => self.transmit(port_no, frame),
                Verdict::Flood | Verdict::All => {
                    let targets: Vec<u32> = self.ports
                        .keys()
                        .cloned()
                        .filter(|p| *p != in_port)
                        .collect();
                    for port_no in targets {
                        self.transmit(port_no, frame);
                    }
                }
                Verdict::Controller {
                    reason,
                    table_id,
                    cookie,
                    ..
                } => self.packet_in(in_port, frame, reason, table_id, cookie),
            }
        }
    }

    fn transmit(&mut self, port_no: u32, frame: &[u8]) {
        match self.ports.get_mut(&port_no) {
            Some(port) => {
                if !port.can_forward() {
                    port.stats.tx_dropped += 1;
                    return;
                }
                port.stats.tx_packets += 1;
                port.stats.tx_bytes += frame.len() as u64;
            }
            None => {
                debug!("Dropping frame for port 0x{:x}", port_no);
                return;
            }
        }
        self.transmitted.push((port_no, frame.to_vec()));
    }

    /// The datapath has no buffers, so the whole frame goes to the controllers
    fn packet_in(&mut self, in_port: u32, frame: &[u8], reason: OfpPacketInReason, table_id: u8, cookie: u64) {
        if let Some(port) = self.ports.get(&in_port) {
            if port.desc.config & OFPPC_NO_PACKET_IN != 0 {
                return;
            }
        }
        let packet_in = OfpPacketIn {
            buffer_id: OFP_NO_BUFFER,
            total_len: frame.len() as u16,
            reason,
            table_id,
            cookie,
            match_field: OfpMatch::new().with(OfpOxmTlv::new_in_port(in_port)),
            data: frame.to_vec(),
        };
        self.notify_ctrls(OfpBody::PacketIn(packet_in));
    }

    fn desc(&self) -> OfpDescStats {
        OfpDescStats {
            mfr_desc: "ofstack".to_string(),
            hw_desc: "Emulated OpenFlow datapath".to_string(),
            sw_desc: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            serial_num: format!("{:016x}", self.element.datapath_id),
            dp_desc: self.element.name.clone(),
        }
    }

    fn port_stats(&self, port_no: u32, now: Instant) -> Result<Vec<OfpPortStats>> {
        if port_no == OFPP_ANY {
            return Ok(self.ports.values().map(|p| p.stats(now)).collect());
        }
        self.ports
            .get(&port_no)
            .map(|p| vec![p.stats(now)])
            .ok_or(Error::BadRequest(OfpBadRequestCode::BadPort))
    }

    fn multipart(&mut self, ctrl: PeerId, xid: u32, request: &OfpMultipartRequest, now: Instant) -> Result<()> {
        let bad_table = |_| Error::BadRequest(OfpBadRequestCode::BadTableId);
        let bodies = match request.body {
            MultipartRequestBody::Desc => vec![MultipartReplyBody::Desc(self.desc())],
            MultipartRequestBody::Flow(ref req) => {
                let stats = self.pipeline.flow_stats(req, now).map_err(bad_table)?;
                if stats.is_empty() {
                    vec![MultipartReplyBody::Flow(stats)]
                } else {
                    split_flow_stats(stats)
                        .into_iter()
                        .map(MultipartReplyBody::Flow)
                        .collect()
                }
            }
            MultipartRequestBody::Aggregate(ref req) => vec![MultipartReplyBody::Aggregate(
                self.pipeline.aggregate_stats(req).map_err(bad_table)?,
            )],
            MultipartRequestBody::Table => vec![MultipartReplyBody::Table(self.pipeline.table_stats())],
            MultipartRequestBody::PortStats(port_no) => {
                vec![MultipartReplyBody::PortStats(self.port_stats(port_no, now)?)]
            }
            MultipartRequestBody::Group(group_id) => {
                vec![MultipartReplyBody::Group(self.pipeline.groups().stats(group_id, now))]
            }
            MultipartRequestBody::GroupDesc => {
                vec![MultipartReplyBody::GroupDesc(self.pipeline.groups().desc())]
            }
            MultipartRequestBody::GroupFeatures => {
                vec![MultipartReplyBody::GroupFeatures(self.pipeline.groups().features())]
            }
            MultipartRequestBody::PortDesc => vec![MultipartReplyBody::PortDesc(self.port_descs())],
            MultipartRequestBody::Other(typ, _) => {
                debug!("Controller {} asked for multipart type {}", ctrl, typ);
                return Err(Error::BadRequest(OfpBadRequestCode::BadMultipart));
            }
        };
        let last = bodies.len() - 1;
        for (i, body) in bodies.into_iter().enumerate() {
            let mut reply = OfpMultipartReply::new(body);
            if i < last {
                reply.flags |= OFPMPF_REPLY_MORE;
            }
            self.reply(ctrl, xid, OfpBody::MultipartReply(reply));
        }
        Ok(())
    }

    /// Changes the role of a controller. MASTER and SLAVE requests carry a
    /// generation id that must not be older than the last one seen.
    pub fn role_request(&mut self, ctrl: PeerId, request: OfpRole) -> Result<OfpRole> {
        match request.role {
            OfpControllerRole::Master | OfpControllerRole::Slave => {
                if let Some(current) = self.generation_id {
                    if (request.generation_id.wrapping_sub(current) as i64) < 0 {
                        return Err(Error::RoleRequestFailed(OfpRoleRequestFailedCode::Stale));
                    }
                }
                self.generation_id = Some(request.generation_id);
            }
            _ => {}
        }
        if request.role == OfpControllerRole::Master {
            for (id, other) in self.ctrls.iter_mut() {
                if *id != ctrl && other.role() == OfpControllerRole::Master {
                    other.set_role(OfpControllerRole::Slave);
                    info!("{} was demoted", other);
                }
            }
        }
        let role = match self.ctrls.get_mut(&ctrl) {
            Some(peer) => {
                peer.set_role(request.role);
                peer.role()
            }
            None => return Err(Error::RoleRequestFailed(OfpRoleRequestFailedCode::Unsup)),
        };
        Ok(OfpRole {
            role,
            generation_id: self.generation_id.unwrap_or(0),
        })
    }

    fn advance_handshake(&mut self, dpath: PeerId, state: DpathState, request: OfpBody, now: Instant) {
        if let Some(peer) = self.dpaths.get_mut(&dpath) {
            peer.set_state(state);
        }
        self.send_to_dpath(dpath, request, now);
        self.register_timer(
            FeTimer::Handshake(dpath),
            now,
            Duration::from_secs(HANDSHAKE_TIMEOUT),
        );
    }

    fn open_dpath(&mut self, dpath: PeerId) {
        if let Some(peer) = self.dpaths.get_mut(&dpath) {
            peer.set_state(DpathState::Open);
            info!("{} is open with {} ports", peer, peer.ports.len());
        }
        self.cancel_timer(&FeTimer::Handshake(dpath));
    }

    fn dpath_features(&mut self, dpath: PeerId, features: &OfpSwitchFeatures, now: Instant) {
        let (max_entries, max_groups) = (self.element.max_entries, self.element.max_groups);
        let advance = match self.dpaths.get_mut(&dpath) {
            Some(peer) => {
                peer.set_features(features, max_entries, max_groups);
                peer.state() == DpathState::FeaturesRequested
            }
            None => false,
        };
        if advance {
            self.advance_handshake(dpath, DpathState::ConfigRequested, OfpBody::GetConfigRequest, now);
        }
    }

    fn dpath_config(&mut self, dpath: PeerId, config: OfpSwitchConfig, now: Instant) {
        let advance = match self.dpaths.get_mut(&dpath) {
            Some(peer) => {
                peer.config = config;
                peer.state() == DpathState::ConfigRequested
            }
            None => false,
        };
        if advance {
            let request = OfpMultipartRequest::new(MultipartRequestBody::Table);
            self.advance_handshake(
                dpath,
                DpathState::TablesRequested,
                OfpBody::MultipartRequest(request),
                now,
            );
        }
    }

    fn dpath_multipart(&mut self, dpath: PeerId, reply: &OfpMultipartReply, now: Instant) -> Step {
        let (state, version) = match self.dpaths.get_mut(&dpath) {
            Some(peer) => {
                match (peer.state(), &reply.body) {
                    (DpathState::TablesRequested, &MultipartReplyBody::Table(ref tables)) => {
                        peer.tables.extend(tables.iter().cloned());
                    }
                    (DpathState::PortsRequested, &MultipartReplyBody::PortDesc(ref ports)) => {
                        for port in ports {
                            peer.ports.insert(port.port_no, port.clone());
                        }
                    }
                    _ => return Step::NotHandshake,
                }
                (peer.state(), peer.version())
            }
            None => return Step::NotHandshake,
        };
        if reply.has_more() {
            return Step::Progress;
        }
        if state == DpathState::TablesRequested && version >= OFP_VERSION_13 {
            let request = OfpMultipartRequest::new(MultipartRequestBody::PortDesc);
            self.advance_handshake(
                dpath,
                DpathState::PortsRequested,
                OfpBody::MultipartRequest(request),
                now,
            );
            return Step::Progress;
        }
        self.open_dpath(dpath);
        Step::Opened
    }
}

impl Scheduler for FeCore {
    type Kind = FeTimer;

    fn register_timer(&mut self, kind: FeTimer, now: Instant, delay: Duration) {
        self.timers.register(kind, now, delay);
    }

    fn cancel_timer(&mut self, kind: &FeTimer) -> bool {
        self.timers.cancel(kind)
    }

    fn pending_timer(&self, kind: &FeTimer) -> bool {
        self.timers.pending(kind)
    }
}

/// The element with its behavior and dispatch queues
pub struct ForwardingElement {
    core: FeCore,
    behavior: Box<dyn FwdBehavior>,
    queues: MessageQueues,
}

impl ForwardingElement {
    pub fn new(config: &conf::Config, behavior: Box<dyn FwdBehavior>, now: Instant) -> ForwardingElement {
        info!(
            "Forwarding element {} with {} tables and {} ports",
            config.element.name,
            config.element.n_tables,
            config.ports.by_number.len()
        );
        ForwardingElement {
            core: FeCore::new(config, now),
            behavior,
            queues: MessageQueues::new(config.session.queue_capacity),
        }
    }

    pub fn core(&self) -> &FeCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut FeCore {
        &mut self.core
    }

    pub fn ctrl_attach(&mut self, ctrl: PeerId, version: u8) {
        if self.core.ctrls.contains_key(&ctrl) {
            return;
        }
        let peer = CtrlPeer::new(ctrl, version, self.core.session.xid_ring);
        info!("Attached {}", peer);
        self.core.ctrls.insert(ctrl, peer);
        self.behavior.ctrl_open(&mut self.core, ctrl);
    }

    pub fn ctrl_detach(&mut self, ctrl: PeerId) {
        if let Some(peer) = self.core.ctrls.remove(&ctrl) {
            info!("Detached {}", peer);
            let dropped = self.queues.remove_peer(ctrl);
            if dropped > 0 {
                debug!("Dropped {} queued messages of controller {}", dropped, ctrl);
            }
            self.behavior.ctrl_close(&mut self.core, ctrl);
        }
    }

    /// Attaches a datapath and starts the handshake with it
    pub fn dpath_attach(&mut self, dpath: PeerId, version: u8, now: Instant) {
        if self.core.dpaths.contains_key(&dpath) {
            return;
        }
        let peer = DpathPeer::new(dpath, version, self.core.session.xid_ring);
        info!("Attached {}", peer);
        self.core.dpaths.insert(dpath, peer);
        self.core.send_to_dpath(dpath, OfpBody::FeaturesRequest, now);
        self.core.register_timer(
            FeTimer::Handshake(dpath),
            now,
            Duration::from_secs(HANDSHAKE_TIMEOUT),
        );
    }

    pub fn dpath_detach(&mut self, dpath: PeerId) {
        if let Some(peer) = self.core.dpaths.remove(&dpath) {
            info!("Detached {}", peer);
            self.core.timers.cancel_where(|timer| match *timer {
                FeTimer::Handshake(id) | FeTimer::Barrier(id, _) => id == dpath,
            });
            self.queues.remove_peer(dpath);
            if peer.is_open() {
                self.behavior.dpath_close(&mut self.core, dpath);
            }
        }
    }

    fn close_dpath(&mut self, dpath: PeerId) {
        self.core.output.push(FeOutput::Close(dpath));
        self.dpath_detach(dpath);
    }

    /// Accepts a message from a controller for the next dispatch round
    pub fn fe_down(&mut self, ctrl: PeerId, message: OfpMessage) -> bool {
        if self.core.dpaths.contains_key(&ctrl) {
            debug!("Dropping {} from datapath {} sent as controller", message, ctrl);
            return false;
        }
        if !self.core.ctrls.contains_key(&ctrl) {
            self.ctrl_attach(ctrl, message.version());
        }
        if !message.typ().is_controller_to_switch() {
            debug!("Dropping {} from controller {}", message, ctrl);
            return false;
        }
        self.enqueue(Direction::Down, ctrl, message)
    }

    /// Accepts a message from a datapath for the next dispatch round
    pub fn fe_up(&mut self, dpath: PeerId, message: OfpMessage, now: Instant) -> bool {
        if self.core.ctrls.contains_key(&dpath) {
            debug!("Dropping {} from controller {} sent as datapath", message, dpath);
            return false;
        }
        if !self.core.dpaths.contains_key(&dpath) {
            self.dpath_attach(dpath, message.version(), now);
        }
        if !message.typ().is_switch_to_controller() {
            debug!("Dropping {} from datapath {}", message, dpath);
            return false;
        }
        self.enqueue(Direction::Up, dpath, message)
    }

    fn enqueue(&mut self, direction: Direction, peer: PeerId, message: OfpMessage) -> bool {
        let typ = message.typ();
        if self.queues.push(direction, peer, message) {
            true
        } else {
            warn!("{:?} queue for {:?} is full, dropping message of peer {}", direction, typ, peer);
            false
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.queues.is_empty()
    }

    /// Handles one message of every non-empty queue, returns how many were handled
    pub fn dispatch(&mut self, now: Instant) -> usize {
        let round = self.queues.pop_round();
        let handled = round.len();
        for queued in round {
            self.dispatch_one(queued, now);
        }
        self.flush_frames();
        handled
    }

    fn dispatch_one(&mut self, queued: Queued, now: Instant) {
        match queued.direction {
            Direction::Down => {
                if queued.message.typ() == OfpType::BarrierRequest {
                    for earlier in self.queues.take_earlier(Direction::Down, queued.peer, queued.seq) {
                        self.dispatch_one(earlier, now);
                    }
                }
                self.recv_down(queued.peer, &queued.message, now);
            }
            Direction::Up => self.recv_up(queued.peer, &queued.message, now),
        }
    }

    fn recv_down(&mut self, ctrl: PeerId, message: &OfpMessage, now: Instant) {
        debug!("Incoming message from controller {}: {}", ctrl, message);
        trace!("{:?}", message.body());
        if let Err(e) = self.handle_down(ctrl, message, now) {
            self.core.send_error(ctrl, message, &e);
        }
    }

    fn handle_down(&mut self, ctrl: PeerId, message: &OfpMessage, now: Instant) -> Result<()> {
        let (version, slave) = match self.core.ctrls.get(&ctrl) {
            Some(peer) => (peer.version(), peer.is_slave()),
            None => {
                debug!("Dropping {} from detached controller {}", message, ctrl);
                return Ok(());
            }
        };
        if message.version() != version {
            return Err(Error::BadRequest(OfpBadRequestCode::BadVersion));
        }
        if slave && changes_state(message.typ()) {
            return Err(Error::BadRequest(OfpBadRequestCode::IsSlave));
        }
        let xid = message.xid();
        let core = &mut self.core;
        match *message.body() {
            OfpBody::FeaturesRequest => {
                let features = core.features();
                core.reply(ctrl, xid, OfpBody::FeaturesReply(features));
            }
            OfpBody::GetConfigRequest => {
                let config = core.switch_config();
                core.reply(ctrl, xid, OfpBody::GetConfigReply(config));
            }
            OfpBody::SetConfig(config) => core.set_switch_config(config)?,
            OfpBody::FlowMod(ref flow_mod) => {
                self.behavior.handle_flow_mod(core, ctrl, flow_mod, now)?
            }
            OfpBody::GroupMod(ref group_mod) => {
                self.behavior.handle_group_mod(core, ctrl, group_mod, now)?
            }
            OfpBody::PortMod(ref port_mod) => self.behavior.handle_port_mod(core, ctrl, port_mod)?,
            OfpBody::TableMod(ref table_mod) => core.table_mod(table_mod)?,
            OfpBody::PacketOut(ref packet_out) => {
                self.behavior.handle_packet_out(core, ctrl, packet_out, now)?
            }
            OfpBody::MultipartRequest(ref request) => core.multipart(ctrl, xid, request, now)?,
            OfpBody::BarrierRequest => core.reply(ctrl, xid, OfpBody::BarrierReply),
            OfpBody::RoleRequest(role) => {
                let reply = core.role_request(ctrl, role)?;
                core.reply(ctrl, xid, OfpBody::RoleReply(reply));
            }
            OfpBody::GetAsyncRequest => {
                let config = core.ctrls
                    .get(&ctrl)
                    .map(CtrlPeer::async_config)
                    .unwrap_or_default();
                core.reply(ctrl, xid, OfpBody::GetAsyncReply(config));
            }
            OfpBody::SetAsync(config) => {
                if let Some(peer) = core.ctrls.get_mut(&ctrl) {
                    peer.set_async_config(config);
                }
            }
            OfpBody::Error(ref error) => warn!("Controller {} reported {}", ctrl, error),
            _ => debug!("Ignoring {} from controller {}", message, ctrl),
        }
        Ok(())
    }

    fn recv_up(&mut self, dpath: PeerId, message: &OfpMessage, now: Instant) {
        debug!("Incoming message from datapath {}: {}", dpath, message);
        trace!("{:?}", message.body());
        let typ = message.typ();
        let xid = message.xid();
        let open = match self.core.dpaths.get_mut(&dpath) {
            Some(peer) => {
                if typ.request_type().is_some() || peer.xids.is_pending(xid) {
                    let more = match *message.body() {
                        OfpBody::MultipartReply(ref reply) => reply.has_more(),
                        _ => false,
                    };
                    let checked = if more {
                        peer.xids.check(xid, typ)
                    } else {
                        peer.xids.validate(xid, typ)
                    };
                    if let Err(e) = checked {
                        debug!("Dropping {} from datapath {}: {}", message, dpath, e);
                        return;
                    }
                }
                peer.is_open()
            }
            None => {
                debug!("Dropping {} from detached datapath {}", message, dpath);
                return;
            }
        };

        let core = &mut self.core;
        match *message.body() {
            OfpBody::FeaturesReply(ref features) => core.dpath_features(dpath, features, now),
            OfpBody::GetConfigReply(config) => core.dpath_config(dpath, config, now),
            OfpBody::MultipartReply(ref reply) => match core.dpath_multipart(dpath, reply, now) {
                Step::NotHandshake => self.behavior.handle_stats_reply(core, dpath, xid, reply),
                Step::Progress => {}
                Step::Opened => self.behavior.dpath_open(core, dpath, now),
            },
            OfpBody::PacketIn(ref packet_in) => self.behavior.handle_packet_in(core, dpath, packet_in),
            OfpBody::FlowRemoved(ref removed) => {
                if let Some(peer) = core.dpaths.get(&dpath) {
                    peer.shadow.forget_flow(removed, now);
                }
                self.behavior.handle_flow_removed(core, dpath, removed);
            }
            OfpBody::PortStatus(ref status) => {
                if let Some(peer) = core.dpaths.get_mut(&dpath) {
                    peer.update_port(status);
                }
                self.behavior.handle_port_status(core, dpath, status);
            }
            OfpBody::BarrierReply => {
                core.cancel_timer(&FeTimer::Barrier(dpath, xid));
                self.behavior.handle_barrier_reply(core, dpath, xid);
            }
            OfpBody::Error(ref error) => {
                core.cancel_timer(&FeTimer::Barrier(dpath, xid));
                self.behavior.handle_error(core, dpath, xid, error);
                if !open {
                    warn!("Handshake with datapath {} failed", dpath);
                    self.close_dpath(dpath);
                }
            }
            _ => debug!("Ignoring {} from datapath {}", message, dpath),
        }
    }

    /// Runs a frame that arrived on a port of the emulated datapath through the pipeline
    pub fn inject_packet(&mut self, in_port: u32, frame: &[u8], now: Instant) -> bool {
        let accepted = self.core.receive(in_port, frame, now);
        self.flush_frames();
        accepted
    }

    fn flush_frames(&mut self) {
        for (port_no, frame) in mem::replace(&mut self.core.transmitted, vec![]) {
            self.behavior.port_output(&mut self.core, port_no, &frame);
        }
    }

    pub fn take_output(&mut self) -> Vec<FeOutput> {
        self.core.take_output()
    }
}

impl HandleTimeout for ForwardingElement {
    type Output = ();

    /// Expires flows, handshakes and barriers
    fn handle_timeout(&mut self, now: Instant) {
        let expired = self.core.pipeline.handle_timeout(now);
        self.core.flows_removed(&expired, now);
        for table in self.core.pipeline.tables() {
            table.reclaim();
        }
        for peer in self.core.dpaths.values_mut() {
            let expired = peer.shadow.handle_timeout(now);
            if !expired.is_empty() {
                trace!("{} shadow entries of {} expired", expired.len(), peer);
            }
        }
        for timer in self.core.timers.expired(now) {
            match timer {
                FeTimer::Handshake(dpath) => {
                    warn!("Handshake with datapath {} timed out", dpath);
                    self.close_dpath(dpath);
                }
                FeTimer::Barrier(dpath, xid) => {
                    if let Some(peer) = self.core.dpaths.get_mut(&dpath) {
                        peer.xids.cancel(xid);
                    }
                    self.behavior.handle_barrier_timeout(&mut self.core, dpath, xid);
                }
            }
        }
        self.flush_frames();
    }

    fn next_timeout(&self) -> Option<Instant> {
        let shadows = self.core
            .dpaths
            .values()
            .filter_map(|peer| peer.shadow.next_timeout());
        self.core
            .pipeline
            .next_timeout()
            .into_iter()
            .chain(self.core.timers.next_deadline())
            .chain(shadows)
            .min()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use packet::tests::udp_frame;

    pub const CTRL: PeerId = 1;
    pub const DPATH: PeerId = 5;

    pub fn config() -> conf::Config {
        let mut ports = conf::Ports::default();
        for no in 1..4 {
            ports.by_number.insert(no, format!("eth{}", no));
        }
        conf::Config {
            element: conf::Element::default(),
            controller: conf::Controller::default(),
            datapath: conf::Datapath::default(),
            session: conf::Session::default(),
            ports,
        }
    }

    pub fn msg(xid: u32, body: OfpBody) -> OfpMessage {
        OfpMessage::new(OFP_VERSION_13, xid, body)
    }

    /// The messages sent, without the closed connections
    pub fn sent(fe: &mut ForwardingElement) -> Vec<(PeerId, OfpMessage)> {
        fe.take_output()
            .into_iter()
            .filter_map(|out| match out {
                FeOutput::Send(peer, message) => Some((peer, message)),
                FeOutput::Close(_) => None,
            })
            .collect()
    }

    pub fn run(fe: &mut ForwardingElement, now: Instant) {
        while fe.has_pending() {
            fe.dispatch(now);
        }
    }

    fn switch(now: Instant) -> ForwardingElement {
        let mut fe = ForwardingElement::new(&config(), Box::new(SwitchBehavior), now);
        fe.ctrl_attach(CTRL, OFP_VERSION_13);
        fe
    }

    fn forward(in_port: u32, out_port: u32) -> OfpFlowMod {
        OfpFlowMod::new(
            OfpFlowModCommand::Add,
            0,
            10,
            OfpMatch::new().with(OfpOxmTlv::new_in_port(in_port)),
            vec![OfpInstruction::ApplyActions(vec![OfpAction::output(out_port)])],
        )
    }

    fn error_of(message: &OfpMessage) -> (u16, u16) {
        match *message.body() {
            OfpBody::Error(ref error) => (error.typ, error.code),
            ref body => panic!("expected an error, got {:?}", body),
        }
    }

    fn role(role: OfpControllerRole, generation_id: u64) -> OfpBody {
        OfpBody::RoleRequest(OfpRole {
            role,
            generation_id,
        })
    }

    #[test]
    fn features_and_config() {
        let now = Instant::now();
        let mut fe = switch(now);
        assert!(fe.fe_down(CTRL, msg(7, OfpBody::FeaturesRequest)));
        assert!(fe.fe_down(CTRL, msg(8, OfpBody::GetConfigRequest)));
        run(&mut fe, now);
        let out = sent(&mut fe);
        assert_eq!(2, out.len());
        match *out[0].1.body() {
            OfpBody::FeaturesReply(ref features) => {
                assert_eq!(1, features.datapath_id);
                assert_eq!(4, features.n_tables);
                assert_eq!(3, features.ports.len());
            }
            ref body => panic!("unexpected {:?}", body),
        }
        assert_eq!(7, out[0].1.xid());
        assert_eq!(
            OfpBody::GetConfigReply(OfpSwitchConfig::default()),
            *out[1].1.body()
        );
    }

    #[test]
    fn wrong_direction_is_dropped() {
        let now = Instant::now();
        let mut fe = switch(now);
        assert!(!fe.fe_down(CTRL, msg(1, OfpBody::BarrierReply)));
        assert!(!fe.has_pending());
    }

    #[test]
    fn unknown_controller_is_attached() {
        let now = Instant::now();
        let mut fe = switch(now);
        assert!(fe.fe_down(9, msg(3, OfpBody::BarrierRequest)));
        run(&mut fe, now);
        assert_eq!(vec![(9, msg(3, OfpBody::BarrierReply))], sent(&mut fe));
        assert!(fe.core().ctrl(9).is_some());
    }

    #[test]
    fn flow_mod_errors_go_back() {
        let now = Instant::now();
        let mut fe = switch(now);
        let mut flow_mod = forward(1, 2);
        flow_mod.instructions.push(OfpInstruction::GotoTable(0));
        fe.fe_down(CTRL, msg(4, OfpBody::FlowMod(flow_mod)));
        run(&mut fe, now);
        let out = sent(&mut fe);
        assert_eq!(1, out.len());
        assert_eq!(4, out[0].1.xid());
        assert_eq!(
            (
                OfpErrorType::BadInstruction as u16,
                OfpBadInstructionCode::BadTableId as u16
            ),
            error_of(&out[0].1)
        );
        assert_eq!(0, fe.core().pipeline().table(0).unwrap().active_count());
    }

    #[test]
    fn slaves_may_not_change_state() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.fe_down(CTRL, msg(1, role(OfpControllerRole::Slave, 1)));
        fe.fe_down(CTRL, msg(2, OfpBody::FlowMod(forward(1, 2))));
        run(&mut fe, now);
        let out = sent(&mut fe);
        assert_eq!(
            OfpBody::RoleReply(OfpRole {
                role: OfpControllerRole::Slave,
                generation_id: 1,
            }),
            *out[0].1.body()
        );
        assert_eq!(
            (
                OfpErrorType::BadRequest as u16,
                OfpBadRequestCode::IsSlave as u16
            ),
            error_of(&out[1].1)
        );
    }

    #[test]
    fn master_election() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.ctrl_attach(2, OFP_VERSION_13);
        fe.fe_down(CTRL, msg(1, role(OfpControllerRole::Master, 5)));
        run(&mut fe, now);
        fe.fe_down(2, msg(2, role(OfpControllerRole::Master, 6)));
        run(&mut fe, now);
        assert_eq!(OfpControllerRole::Slave, fe.core().ctrl(CTRL).unwrap().role());
        assert_eq!(OfpControllerRole::Master, fe.core().ctrl(2).unwrap().role());
        sent(&mut fe);

        fe.fe_down(CTRL, msg(3, role(OfpControllerRole::Master, 4)));
        run(&mut fe, now);
        let out = sent(&mut fe);
        assert_eq!(
            (
                OfpErrorType::RoleRequestFailed as u16,
                OfpRoleRequestFailedCode::Stale as u16
            ),
            error_of(&out[0].1)
        );
        assert_eq!(OfpControllerRole::Slave, fe.core().ctrl(CTRL).unwrap().role());
    }

    #[test]
    fn barrier_waits_for_earlier_messages() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.fe_down(CTRL, msg(1, OfpBody::GetConfigRequest));
        fe.fe_down(CTRL, msg(2, OfpBody::GetConfigRequest));
        fe.fe_down(CTRL, msg(3, OfpBody::BarrierRequest));
        fe.fe_down(CTRL, msg(4, OfpBody::GetConfigRequest));
        assert_eq!(2, fe.dispatch(now));
        let xids: Vec<u32> = sent(&mut fe).iter().map(|o| o.1.xid()).collect();
        assert_eq!(vec![1, 2, 3], xids);
        run(&mut fe, now);
        assert_eq!(4, sent(&mut fe)[0].1.xid());
    }

    #[test]
    fn unknown_multipart() {
        let now = Instant::now();
        let mut fe = switch(now);
        let request = OfpMultipartRequest::new(MultipartRequestBody::Other(0xfffe, vec![]));
        fe.fe_down(CTRL, msg(6, OfpBody::MultipartRequest(request)));
        run(&mut fe, now);
        assert_eq!(
            (
                OfpErrorType::BadRequest as u16,
                OfpBadRequestCode::BadMultipart as u16
            ),
            error_of(&sent(&mut fe)[0].1)
        );
    }

    #[test]
    fn forwarding_and_port_stats() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.fe_down(CTRL, msg(1, OfpBody::FlowMod(forward(1, 2))));
        run(&mut fe, now);
        assert!(sent(&mut fe).is_empty());

        let frame = udp_frame(1000, 53);
        assert!(fe.inject_packet(1, &frame, now));
        assert!(!fe.inject_packet(9, &frame, now));
        let port = fe.core().port(2).unwrap();
        assert_eq!(1, port.stats.tx_packets);
        assert_eq!(frame.len() as u64, port.stats.tx_bytes);
        assert_eq!(1, fe.core().port(1).unwrap().stats.rx_packets);

        let request = OfpMultipartRequest::new(MultipartRequestBody::PortStats(OFPP_ANY));
        fe.fe_down(CTRL, msg(2, OfpBody::MultipartRequest(request)));
        let request = OfpMultipartRequest::new(MultipartRequestBody::PortStats(9));
        fe.fe_down(CTRL, msg(3, OfpBody::MultipartRequest(request)));
        run(&mut fe, now);
        let out = sent(&mut fe);
        match *out[0].1.body() {
            OfpBody::MultipartReply(ref reply) => match reply.body {
                MultipartReplyBody::PortStats(ref stats) => assert_eq!(3, stats.len()),
                ref body => panic!("unexpected {:?}", body),
            },
            ref body => panic!("unexpected {:?}", body),
        }
        assert_eq!(
            (
                OfpErrorType::BadRequest as u16,
                OfpBadRequestCode::BadPort as u16
            ),
            error_of(&out[1].1)
        );
    }

    fn flow_stats_replies(fe: &mut ForwardingElement, now: Instant) -> Vec<OfpMessage> {
        let request = OfpMultipartRequest::new(MultipartRequestBody::Flow(OfpFlowStatsRequest::all()));
        fe.fe_down(CTRL, msg(2, OfpBody::MultipartRequest(request)));
        run(fe, now);
        sent(fe).into_iter().map(|o| o.1).collect()
    }

    fn flow_stats_of(message: &OfpMessage) -> (u16, usize) {
        match *message.body() {
            OfpBody::MultipartReply(OfpMultipartReply {
                flags,
                body: MultipartReplyBody::Flow(ref stats),
            }) => (flags, stats.len()),
            ref body => panic!("unexpected {:?}", body),
        }
    }

    #[test]
    fn many_small_flow_stats_fit_one_reply() {
        let now = Instant::now();
        let mut fe = switch(now);
        for priority in 0..100 {
            let mut flow_mod = forward(1, 2);
            flow_mod.priority = priority;
            fe.fe_down(CTRL, msg(1, OfpBody::FlowMod(flow_mod)));
        }
        run(&mut fe, now);
        let replies = flow_stats_replies(&mut fe, now);
        assert_eq!(1, replies.len());
        assert_eq!((0, 100), flow_stats_of(&replies[0]));
    }

    #[test]
    fn large_flow_stats_are_split_by_size() {
        let now = Instant::now();
        let mut fe = switch(now);
        for priority in 0..64 {
            let mut flow_mod = forward(1, 2);
            flow_mod.priority = priority;
            flow_mod.instructions = vec![OfpInstruction::ApplyActions(vec![OfpAction::output(2); 70])];
            fe.fe_down(CTRL, msg(1, OfpBody::FlowMod(flow_mod)));
        }
        run(&mut fe, now);
        assert_eq!(64, fe.core().pipeline().tables()[0].active_count());
        let replies = flow_stats_replies(&mut fe, now);
        assert!(replies.len() > 1);
        let mut total = 0;
        for (i, reply) in replies.iter().enumerate() {
            assert!(reply.encode().unwrap().len() <= 0xffff);
            let (flags, count) = flow_stats_of(reply);
            let more = if i + 1 < replies.len() { OFPMPF_REPLY_MORE } else { 0 };
            assert_eq!(more, flags);
            assert_eq!(2, reply.xid());
            total += count;
        }
        assert_eq!(64, total);
    }

    #[test]
    fn oversized_frames_are_dropped() {
        let now = Instant::now();
        let mut fe = switch(now);
        assert!(!fe.inject_packet(1, &vec![0; MAX_FRAME_LEN + 1], now));
        assert!(sent(&mut fe).is_empty());
        let port = fe.core().port(1).unwrap();
        assert_eq!(1, port.stats.rx_dropped);
        assert_eq!(0, port.stats.rx_packets);

        let mut frame = udp_frame(1, 2);
        frame.resize(MAX_FRAME_LEN, 0);
        assert!(fe.inject_packet(1, &frame, now));
        let out = sent(&mut fe);
        match *out[0].1.body() {
            OfpBody::PacketIn(ref packet_in) => {
                assert_eq!(MAX_FRAME_LEN, packet_in.total_len as usize);
                assert_eq!(MAX_FRAME_LEN, packet_in.data.len());
            }
            ref body => panic!("unexpected {:?}", body),
        }
        assert_eq!(0xffff, out[0].1.encode().unwrap().len());
    }

    #[test]
    fn packet_in_skips_slaves() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.ctrl_attach(2, OFP_VERSION_12);
        fe.fe_down(2, OfpMessage::new(OFP_VERSION_12, 1, role(OfpControllerRole::Slave, 0)));
        run(&mut fe, now);
        sent(&mut fe);

        assert!(fe.inject_packet(3, &udp_frame(1, 2), now));
        let out = sent(&mut fe);
        assert_eq!(1, out.len());
        assert_eq!(CTRL, out[0].0);
        match *out[0].1.body() {
            OfpBody::PacketIn(ref packet_in) => {
                assert_eq!(OfpPacketInReason::NoMatch, packet_in.reason);
                assert_eq!(OFP_NO_BUFFER, packet_in.buffer_id);
                assert_eq!(
                    Some(&OfpOxmTlv::new_in_port(3)),
                    packet_in.match_field.get(OxmField::InPort)
                );
            }
            ref body => panic!("unexpected {:?}", body),
        }
    }

    #[test]
    fn flow_removed_on_hard_timeout() {
        let now = Instant::now();
        let mut fe = switch(now);
        let mut flow_mod = forward(1, 2);
        flow_mod.hard_timeout = 1;
        flow_mod.flags = OFPFF_SEND_FLOW_REM;
        fe.fe_down(CTRL, msg(1, OfpBody::FlowMod(flow_mod)));
        run(&mut fe, now);
        assert_eq!(Some(now + Duration::from_secs(1)), fe.next_timeout());

        fe.handle_timeout(now + Duration::from_secs(2));
        let out = sent(&mut fe);
        assert_eq!(1, out.len());
        match *out[0].1.body() {
            OfpBody::FlowRemoved(ref removed) => {
                assert_eq!(OfpFlowRemovedReason::HardTimeout, removed.reason);
                assert_eq!(10, removed.priority);
            }
            ref body => panic!("unexpected {:?}", body),
        }
        let table = fe.core().pipeline().table(0).unwrap();
        assert_eq!(0, table.active_count());
    }

    #[test]
    fn group_delete_removes_flows() {
        let now = Instant::now();
        let mut fe = switch(now);
        let group = OfpGroupMod {
            command: OfpGroupModCommand::Add,
            group_type: OfpGroupType::All,
            group_id: 1,
            buckets: vec![OfpBucket::new(0, vec![OfpAction::output(2)])],
        };
        let mut flow_mod = forward(1, 2);
        flow_mod.flags = OFPFF_SEND_FLOW_REM;
        flow_mod.instructions = vec![OfpInstruction::ApplyActions(vec![OfpAction::Group(1)])];
        fe.fe_down(CTRL, msg(1, OfpBody::GroupMod(group.clone())));
        run(&mut fe, now);
        fe.fe_down(CTRL, msg(2, OfpBody::FlowMod(flow_mod)));
        run(&mut fe, now);
        assert!(sent(&mut fe).is_empty());

        let delete = OfpGroupMod {
            command: OfpGroupModCommand::Delete,
            buckets: vec![],
            ..group
        };
        fe.fe_down(CTRL, msg(3, OfpBody::GroupMod(delete)));
        run(&mut fe, now);
        match *sent(&mut fe)[0].1.body() {
            OfpBody::FlowRemoved(ref removed) => {
                assert_eq!(OfpFlowRemovedReason::GroupDelete, removed.reason)
            }
            ref body => panic!("unexpected {:?}", body),
        }
    }

    #[test]
    fn port_mod() {
        let now = Instant::now();
        let mut fe = switch(now);
        let hw_addr = fe.core().port(1).unwrap().desc.hw_addr;
        let mut port_mod = OfpPortMod {
            port_no: 1,
            hw_addr,
            config: OFPPC_PORT_DOWN,
            mask: OFPPC_PORT_DOWN,
            advertise: 0,
        };
        fe.fe_down(CTRL, msg(1, OfpBody::PortMod(port_mod.clone())));
        run(&mut fe, now);
        match *sent(&mut fe)[0].1.body() {
            OfpBody::PortStatus(ref status) => {
                assert_eq!(OfpPortReason::Modify, status.reason);
                assert!(!status.desc.is_live());
            }
            ref body => panic!("unexpected {:?}", body),
        }
        assert!(!fe.inject_packet(1, &udp_frame(1, 2), now));

        port_mod.hw_addr = [0; 6];
        fe.fe_down(CTRL, msg(2, OfpBody::PortMod(port_mod)));
        run(&mut fe, now);
        assert_eq!(
            (
                OfpErrorType::PortModFailed as u16,
                OfpPortModFailedCode::BadHwAddr as u16
            ),
            error_of(&sent(&mut fe)[0].1)
        );
    }

    #[test]
    fn packet_out_floods() {
        let now = Instant::now();
        let mut fe = switch(now);
        let packet_out = OfpPacketOut {
            buffer_id: OFP_NO_BUFFER,
            in_port: 1,
            actions: vec![OfpAction::output(OFPP_FLOOD)],
            data: udp_frame(5, 6),
        };
        fe.fe_down(CTRL, msg(1, OfpBody::PacketOut(packet_out)));
        run(&mut fe, now);
        assert!(sent(&mut fe).is_empty());
        assert_eq!(0, fe.core().port(1).unwrap().stats.tx_packets);
        assert_eq!(1, fe.core().port(2).unwrap().stats.tx_packets);
        assert_eq!(1, fe.core().port(3).unwrap().stats.tx_packets);
    }

    /// Answers the last request sent to the datapath
    pub fn answer(fe: &mut ForwardingElement, body: OfpBody, now: Instant) {
        let (peer, request) = sent(fe).pop().unwrap();
        assert_eq!(DPATH, peer);
        fe.fe_up(DPATH, OfpMessage::new(request.version(), request.xid(), body), now);
        run(fe, now);
    }

    pub fn handshake(fe: &mut ForwardingElement, now: Instant) {
        fe.dpath_attach(DPATH, OFP_VERSION_13, now);
        let features = OfpSwitchFeatures {
            datapath_id: 0x42,
            n_tables: 2,
            ..Default::default()
        };
        answer(fe, OfpBody::FeaturesReply(features), now);
        answer(fe, OfpBody::GetConfigReply(OfpSwitchConfig::default()), now);
        let tables = vec![OfpTableStats::default(), OfpTableStats::default()];
        answer(
            fe,
            OfpBody::MultipartReply(OfpMultipartReply::new(MultipartReplyBody::Table(tables))),
            now,
        );
        let ports = vec![OfpPort {
            port_no: 7,
            ..Default::default()
        }];
        answer(
            fe,
            OfpBody::MultipartReply(OfpMultipartReply::new(MultipartReplyBody::PortDesc(ports))),
            now,
        );
    }

    #[test]
    fn datapath_handshake() {
        let now = Instant::now();
        let mut fe = switch(now);
        handshake(&mut fe, now);
        let dpath = fe.core().dpath(DPATH).unwrap();
        assert_eq!(DpathState::Open, dpath.state());
        assert_eq!(0x42, dpath.features.datapath_id);
        assert_eq!(2, dpath.tables.len());
        assert!(dpath.ports.contains_key(&7));
        assert_eq!(2, dpath.shadow.n_tables());
        assert_eq!(vec![DPATH], fe.core().open_dpaths());
        assert_eq!(None, fe.next_timeout());
    }

    #[test]
    fn datapath_12_has_no_port_desc() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.dpath_attach(DPATH, OFP_VERSION_12, now);
        let features = OfpSwitchFeatures {
            n_tables: 1,
            ports: vec![OfpPort {
                port_no: 3,
                ..Default::default()
            }],
            ..Default::default()
        };
        answer(&mut fe, OfpBody::FeaturesReply(features), now);
        answer(&mut fe, OfpBody::GetConfigReply(OfpSwitchConfig::default()), now);
        answer(
            &mut fe,
            OfpBody::MultipartReply(OfpMultipartReply::new(MultipartReplyBody::Table(vec![]))),
            now,
        );
        let dpath = fe.core().dpath(DPATH).unwrap();
        assert!(dpath.is_open());
        assert!(dpath.ports.contains_key(&3));
    }

    #[test]
    fn stale_replies_are_dropped() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.dpath_attach(DPATH, OFP_VERSION_13, now);
        let (_, request) = sent(&mut fe).pop().unwrap();
        let reply = OfpBody::FeaturesReply(OfpSwitchFeatures::default());
        fe.fe_up(DPATH, msg(request.xid().wrapping_add(1), reply.clone()), now);
        run(&mut fe, now);
        assert!(sent(&mut fe).is_empty());
        assert_eq!(
            DpathState::FeaturesRequested,
            fe.core().dpath(DPATH).unwrap().state()
        );
        fe.fe_up(DPATH, msg(request.xid(), reply.clone()), now);
        run(&mut fe, now);
        assert_eq!(
            DpathState::ConfigRequested,
            fe.core().dpath(DPATH).unwrap().state()
        );
        fe.fe_up(DPATH, msg(request.xid(), reply), now);
        run(&mut fe, now);
        assert_eq!(1, sent(&mut fe).len());
    }

    #[test]
    fn handshake_timeout_closes() {
        let now = Instant::now();
        let mut fe = switch(now);
        fe.dpath_attach(DPATH, OFP_VERSION_13, now);
        fe.take_output();
        fe.handle_timeout(now + Duration::from_secs(HANDSHAKE_TIMEOUT - 1));
        assert!(fe.take_output().is_empty());
        fe.handle_timeout(now + Duration::from_secs(HANDSHAKE_TIMEOUT));
        assert_eq!(vec![FeOutput::Close(DPATH)], fe.take_output());
        assert!(fe.core().dpath(DPATH).is_none());
    }

    #[test]
    fn barrier_timeout_cancels_the_request() {
        let now = Instant::now();
        let mut fe = switch(now);
        handshake(&mut fe, now);
        let xid = fe.core_mut()
            .send_to_dpath(DPATH, OfpBody::BarrierRequest, now)
            .unwrap();
        assert!(fe.core().pending_timer(&FeTimer::Barrier(DPATH, xid)));
        fe.handle_timeout(now + Duration::from_secs(BARRIER_TIMEOUT));
        assert!(!fe.core().dpath(DPATH).unwrap().xids.is_pending(xid));

        let xid = fe.core_mut()
            .send_to_dpath(DPATH, OfpBody::BarrierRequest, now)
            .unwrap();
        fe.fe_up(DPATH, msg(xid, OfpBody::BarrierReply), now);
        run(&mut fe, now);
        assert!(!fe.core().pending_timer(&FeTimer::Barrier(DPATH, xid)));
    }
}
