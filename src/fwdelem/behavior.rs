use flowtable::FlowModResult;
use fwdelem::{FeCore, PeerId};
use openflow::error::Result;
use openflow::messages::*;
use std::time::Instant;

/// The business logic of a forwarding element.
///
/// The `handle_*` methods coming from controllers default to the emulated
/// datapath, the ones coming from datapaths default to doing nothing.
/// The `flow_mod_*` and `group_mod_*` hooks run after the local tables
/// accepted a modification.
pub trait FwdBehavior {
    fn handle_flow_mod(
        &mut self,
        fe: &mut FeCore,
        _ctrl: PeerId,
        flow_mod: &OfpFlowMod,
        now: Instant,
    ) -> Result<()> {
        let result = fe.flow_mod(flow_mod, now)?;
        match flow_mod.command {
            OfpFlowModCommand::Add => self.flow_mod_add(fe, flow_mod, &result, now),
            OfpFlowModCommand::Modify | OfpFlowModCommand::ModifyStrict => {
                self.flow_mod_modify(fe, flow_mod, &result, now)
            }
            OfpFlowModCommand::Delete | OfpFlowModCommand::DeleteStrict => {
                self.flow_mod_delete(fe, flow_mod, &result, now)
            }
        }
        Ok(())
    }

    fn flow_mod_add(&mut self, _fe: &mut FeCore, _flow_mod: &OfpFlowMod, _result: &FlowModResult, _now: Instant) {}

    fn flow_mod_modify(&mut self, _fe: &mut FeCore, _flow_mod: &OfpFlowMod, _result: &FlowModResult, _now: Instant) {}

    fn flow_mod_delete(&mut self, _fe: &mut FeCore, _flow_mod: &OfpFlowMod, _result: &FlowModResult, _now: Instant) {}

    fn handle_group_mod(
        &mut self,
        fe: &mut FeCore,
        _ctrl: PeerId,
        group_mod: &OfpGroupMod,
        now: Instant,
    ) -> Result<()> {
        fe.group_mod(group_mod, now)?;
        match group_mod.command {
            OfpGroupModCommand::Add => self.group_mod_add(fe, group_mod, now),
            OfpGroupModCommand::Modify => self.group_mod_modify(fe, group_mod, now),
            OfpGroupModCommand::Delete => self.group_mod_delete(fe, group_mod, now),
        }
        Ok(())
    }

    fn group_mod_add(&mut self, _fe: &mut FeCore, _group_mod: &OfpGroupMod, _now: Instant) {}

    fn group_mod_modify(&mut self, _fe: &mut FeCore, _group_mod: &OfpGroupMod, _now: Instant) {}

    fn group_mod_delete(&mut self, _fe: &mut FeCore, _group_mod: &OfpGroupMod, _now: Instant) {}

    fn handle_port_mod(&mut self, fe: &mut FeCore, _ctrl: PeerId, port_mod: &OfpPortMod) -> Result<()> {
        fe.port_mod(port_mod)
    }

    fn handle_packet_out(
        &mut self,
        fe: &mut FeCore,
        _ctrl: PeerId,
        packet_out: &OfpPacketOut,
        now: Instant,
    ) -> Result<()> {
        fe.packet_out(packet_out, now)
    }

    /// A frame leaves the emulated datapath
    fn port_output(&mut self, _fe: &mut FeCore, port_no: u32, frame: &[u8]) {
        trace!("{} bytes out of port {}", frame.len(), port_no);
    }

    fn handle_stats_reply(&mut self, _fe: &mut FeCore, _dpath: PeerId, _xid: u32, _reply: &OfpMultipartReply) {}

    fn handle_packet_in(&mut self, _fe: &mut FeCore, _dpath: PeerId, _packet_in: &OfpPacketIn) {}

    fn handle_flow_removed(&mut self, _fe: &mut FeCore, _dpath: PeerId, _removed: &OfpFlowRemoved) {}

    fn handle_port_status(&mut self, _fe: &mut FeCore, _dpath: PeerId, _status: &OfpPortStatus) {}

    fn handle_barrier_reply(&mut self, _fe: &mut FeCore, _dpath: PeerId, _xid: u32) {}

    fn handle_barrier_timeout(&mut self, _fe: &mut FeCore, dpath: PeerId, xid: u32) {
        warn!("Barrier 0x{:08x} to datapath {} was not answered in time", xid, dpath);
    }

    fn handle_error(&mut self, _fe: &mut FeCore, dpath: PeerId, xid: u32, error: &OfpErrorMsg) {
        warn!("Datapath {} answered 0x{:08x} with {}", dpath, xid, error);
    }

    /// The handshake with a datapath is complete
    fn dpath_open(&mut self, _fe: &mut FeCore, _dpath: PeerId, _now: Instant) {}

    fn dpath_close(&mut self, _fe: &mut FeCore, _dpath: PeerId) {}

    fn ctrl_open(&mut self, _fe: &mut FeCore, _ctrl: PeerId) {}

    fn ctrl_close(&mut self, _fe: &mut FeCore, _ctrl: PeerId) {}
}

/// The plain emulated datapath
#[derive(Debug, Default)]
pub struct SwitchBehavior;

impl FwdBehavior for SwitchBehavior {}
