use fwdelem::PeerId;
use openflow::messages::*;
use openflow::xid::XidStore;
use pipeline::Pipeline;
use std::collections::BTreeMap;
use std::fmt;

/// A controller attached to the emulated datapath
#[derive(Debug)]
pub struct CtrlPeer {
    id: PeerId,
    version: u8,
    role: OfpControllerRole,
    async_config: OfpAsyncConfig,
    /// For the notifications sent to the controller
    pub xids: XidStore,
}

impl CtrlPeer {
    pub fn new(id: PeerId, version: u8, xid_ring: usize) -> CtrlPeer {
        CtrlPeer {
            id,
            version,
            role: OfpControllerRole::Equal,
            async_config: OfpAsyncConfig::default(),
            xids: XidStore::new(xid_ring),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn role(&self) -> OfpControllerRole {
        self.role
    }

    pub fn set_role(&mut self, role: OfpControllerRole) {
        if role != OfpControllerRole::NoChange {
            self.role = role;
        }
    }

    pub fn is_slave(&self) -> bool {
        self.role == OfpControllerRole::Slave
    }

    pub fn async_config(&self) -> OfpAsyncConfig {
        self.async_config
    }

    pub fn set_async_config(&mut self, config: OfpAsyncConfig) {
        self.async_config = config;
    }

    /// Checks whether an asynchronous message is wanted, given its type and reason
    pub fn wants(&self, typ: OfpType, reason: u8) -> bool {
        let index = if self.is_slave() { 1 } else { 0 };
        let mask = match typ {
            OfpType::PacketIn => self.async_config.packet_in_mask[index],
            OfpType::FlowRemoved => self.async_config.flow_removed_mask[index],
            OfpType::PortStatus => self.async_config.port_status_mask[index],
            _ => return true,
        };
        reason < 32 && mask & (1 << reason) != 0
    }
}

impl fmt::Display for CtrlPeer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "controller {} ({:?})", self.id, self.role)
    }
}

/// How far the handshake with a datapath got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpathState {
    FeaturesRequested,
    ConfigRequested,
    TablesRequested,
    PortsRequested,
    Open,
}

/// A datapath controlled by this element, with a mirror of its tables
#[derive(Debug)]
pub struct DpathPeer {
    id: PeerId,
    version: u8,
    state: DpathState,
    /// For the requests sent to the datapath
    pub xids: XidStore,
    pub features: OfpSwitchFeatures,
    pub config: OfpSwitchConfig,
    pub tables: Vec<OfpTableStats>,
    pub ports: BTreeMap<u32, OfpPort>,
    /// The FlowMods and GroupMods sent to the datapath
    pub shadow: Pipeline,
}

impl DpathPeer {
    pub fn new(id: PeerId, version: u8, xid_ring: usize) -> DpathPeer {
        DpathPeer {
            id,
            version,
            state: DpathState::FeaturesRequested,
            xids: XidStore::new(xid_ring),
            features: OfpSwitchFeatures::default(),
            config: OfpSwitchConfig::default(),
            tables: vec![],
            ports: BTreeMap::new(),
            shadow: Pipeline::new(0, 0, 0),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn state(&self) -> DpathState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DpathState) {
        debug!("Datapath {} went from {:?} to {:?}", self.id, self.state, state);
        self.state = state;
    }

    pub fn is_open(&self) -> bool {
        self.state == DpathState::Open
    }

    /// Takes over the FEATURES_REPLY and sizes the shadow tables accordingly
    pub fn set_features(&mut self, features: &OfpSwitchFeatures, max_entries: usize, max_groups: u32) {
        self.features = features.clone();
        for port in &features.ports {
            self.ports.insert(port.port_no, port.clone());
        }
        self.shadow = Pipeline::new(features.n_tables, max_entries, max_groups);
    }

    pub fn update_port(&mut self, status: &OfpPortStatus) {
        match status.reason {
            OfpPortReason::Delete => {
                self.ports.remove(&status.desc.port_no);
            }
            _ => {
                self.ports.insert(status.desc.port_no, status.desc.clone());
            }
        }
    }
}

impl fmt::Display for DpathPeer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "datapath {} (dpid 0x{:016x}, {:?})",
            self.id, self.features.datapath_id, self.state
        )
    }
}
