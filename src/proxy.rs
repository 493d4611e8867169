/*!
Stacking of forwarding elements.

The proxy applies what its controllers configure to its own tables and
passes it on to every datapath below it, while notifications of those
datapaths travel up to the controllers. A datapath that completes its
handshake late receives the current groups and flows in one go.
*/

use flowtable::FlowModResult;
use fwdelem::{FeCore, FwdBehavior, PeerId};
use openflow::error::Result;
use openflow::messages::*;
use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct ProxyBehavior {
    relayed: u64,
}

impl ProxyBehavior {
    pub fn new() -> ProxyBehavior {
        ProxyBehavior::default()
    }

    /// Number of notifications passed up to the controllers
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    fn forward_flow_mod(fe: &mut FeCore, flow_mod: &OfpFlowMod, now: Instant) {
        for dpath in fe.open_dpaths() {
            fe.dpath_flow_mod(dpath, flow_mod, now);
        }
    }

    fn forward_group_mod(fe: &mut FeCore, group_mod: &OfpGroupMod, now: Instant) {
        for dpath in fe.open_dpaths() {
            fe.dpath_group_mod(dpath, group_mod, now);
        }
    }

    fn relay(&mut self, fe: &mut FeCore, body: OfpBody) {
        self.relayed += 1;
        fe.notify_ctrls(body);
    }

    /// Groups in an order where every group comes after the groups it refers to
    fn group_replay(fe: &FeCore) -> Vec<OfpGroupMod> {
        let mut pending = fe.pipeline().groups().desc();
        let mut added = BTreeSet::new();
        let mut replay = vec![];
        while !pending.is_empty() {
            let (ready, blocked): (Vec<OfpGroupDesc>, Vec<OfpGroupDesc>) =
                pending.into_iter().partition(|desc| {
                    desc.buckets
                        .iter()
                        .flat_map(|bucket| group_ids(&bucket.actions))
                        .all(|id| added.contains(&id))
                });
            if ready.is_empty() {
                warn!("{} groups refer to groups that do not exist", blocked.len());
                break;
            }
            for desc in ready {
                added.insert(desc.group_id);
                replay.push(OfpGroupMod {
                    command: OfpGroupModCommand::Add,
                    group_type: desc.group_type,
                    group_id: desc.group_id,
                    buckets: desc.buckets,
                });
            }
            pending = blocked;
        }
        replay
    }

    fn flow_replay(fe: &FeCore) -> Vec<OfpFlowMod> {
        let mut replay = vec![];
        for table in fe.pipeline().tables() {
            for entry in table.entries() {
                if entry.is_disabled() {
                    continue;
                }
                let state = entry.state();
                replay.push(OfpFlowMod {
                    cookie: state.cookie,
                    idle_timeout: state.idle_timeout,
                    hard_timeout: state.hard_timeout,
                    flags: state.flags,
                    ..OfpFlowMod::new(
                        OfpFlowModCommand::Add,
                        entry.table_id(),
                        entry.priority(),
                        entry.match_field().clone(),
                        state.instructions.clone(),
                    )
                });
            }
        }
        replay
    }
}

impl FwdBehavior for ProxyBehavior {
    fn flow_mod_add(&mut self, fe: &mut FeCore, flow_mod: &OfpFlowMod, _result: &FlowModResult, now: Instant) {
        ProxyBehavior::forward_flow_mod(fe, flow_mod, now);
    }

    fn flow_mod_modify(&mut self, fe: &mut FeCore, flow_mod: &OfpFlowMod, _result: &FlowModResult, now: Instant) {
        ProxyBehavior::forward_flow_mod(fe, flow_mod, now);
    }

    fn flow_mod_delete(&mut self, fe: &mut FeCore, flow_mod: &OfpFlowMod, _result: &FlowModResult, now: Instant) {
        ProxyBehavior::forward_flow_mod(fe, flow_mod, now);
    }

    fn group_mod_add(&mut self, fe: &mut FeCore, group_mod: &OfpGroupMod, now: Instant) {
        ProxyBehavior::forward_group_mod(fe, group_mod, now);
    }

    fn group_mod_modify(&mut self, fe: &mut FeCore, group_mod: &OfpGroupMod, now: Instant) {
        ProxyBehavior::forward_group_mod(fe, group_mod, now);
    }

    fn group_mod_delete(&mut self, fe: &mut FeCore, group_mod: &OfpGroupMod, now: Instant) {
        ProxyBehavior::forward_group_mod(fe, group_mod, now);
    }

    fn handle_packet_out(
        &mut self,
        fe: &mut FeCore,
        _ctrl: PeerId,
        packet_out: &OfpPacketOut,
        now: Instant,
    ) -> Result<()> {
        fe.packet_out(packet_out, now)?;
        for dpath in fe.open_dpaths() {
            fe.send_to_dpath(dpath, OfpBody::PacketOut(packet_out.clone()), now);
        }
        Ok(())
    }

    fn handle_packet_in(&mut self, fe: &mut FeCore, dpath: PeerId, packet_in: &OfpPacketIn) {
        trace!("Relaying packet in from datapath {}", dpath);
        self.relay(fe, OfpBody::PacketIn(packet_in.clone()));
    }

    fn handle_flow_removed(&mut self, fe: &mut FeCore, _dpath: PeerId, removed: &OfpFlowRemoved) {
        self.relay(fe, OfpBody::FlowRemoved(removed.clone()));
    }

    fn handle_port_status(&mut self, fe: &mut FeCore, _dpath: PeerId, status: &OfpPortStatus) {
        self.relay(fe, OfpBody::PortStatus(status.clone()));
    }

    fn dpath_open(&mut self, fe: &mut FeCore, dpath: PeerId, now: Instant) {
        let groups = ProxyBehavior::group_replay(fe);
        let flows = ProxyBehavior::flow_replay(fe);
        if groups.is_empty() && flows.is_empty() {
            return;
        }
        info!(
            "Replaying {} groups and {} flows to datapath {}",
            groups.len(),
            flows.len(),
            dpath
        );
        for group_mod in &groups {
            fe.dpath_group_mod(dpath, group_mod, now);
        }
        for flow_mod in &flows {
            fe.dpath_flow_mod(dpath, flow_mod, now);
        }
        fe.send_to_dpath(dpath, OfpBody::BarrierRequest, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwdelem::tests::*;
    use fwdelem::ForwardingElement;

    fn proxy(now: Instant) -> ForwardingElement {
        let mut fe = ForwardingElement::new(&config(), Box::new(ProxyBehavior::new()), now);
        fe.ctrl_attach(CTRL, OFP_VERSION_13);
        fe
    }

    fn forward(in_port: u32, group_id: Option<u32>) -> OfpFlowMod {
        let action = match group_id {
            Some(id) => OfpAction::Group(id),
            None => OfpAction::output(2),
        };
        OfpFlowMod::new(
            OfpFlowModCommand::Add,
            0,
            10,
            OfpMatch::new().with(OfpOxmTlv::new_in_port(in_port)),
            vec![OfpInstruction::ApplyActions(vec![action])],
        )
    }

    fn group(group_id: u32, action: OfpAction) -> OfpGroupMod {
        OfpGroupMod {
            command: OfpGroupModCommand::Add,
            group_type: OfpGroupType::Indirect,
            group_id,
            buckets: vec![OfpBucket::new(0, vec![action])],
        }
    }

    fn types_to(out: &[(PeerId, OfpMessage)], peer: PeerId) -> Vec<OfpType> {
        out.iter()
            .filter(|o| o.0 == peer)
            .map(|o| o.1.typ())
            .collect()
    }

    #[test]
    fn flow_mods_are_forwarded() {
        let now = Instant::now();
        let mut fe = proxy(now);
        handshake(&mut fe, now);
        assert!(sent(&mut fe).is_empty());

        fe.fe_down(CTRL, msg(1, OfpBody::FlowMod(forward(1, None))));
        run(&mut fe, now);
        let out = sent(&mut fe);
        assert_eq!(vec![OfpType::FlowMod], types_to(&out, DPATH));
        assert!(types_to(&out, CTRL).is_empty());
        assert_eq!(1, fe.core().pipeline().table(0).unwrap().active_count());
        let shadow = &fe.core().dpath(DPATH).unwrap().shadow;
        assert_eq!(1, shadow.table(0).unwrap().active_count());
    }

    #[test]
    fn refused_flow_mods_stay_local() {
        let now = Instant::now();
        let mut fe = proxy(now);
        handshake(&mut fe, now);
        sent(&mut fe);

        fe.fe_down(CTRL, msg(1, OfpBody::FlowMod(forward(1, Some(9)))));
        run(&mut fe, now);
        let out = sent(&mut fe);
        assert!(types_to(&out, DPATH).is_empty());
        assert_eq!(vec![OfpType::Error], types_to(&out, CTRL));
    }

    #[test]
    fn notifications_are_relayed() {
        let now = Instant::now();
        let mut fe = proxy(now);
        handshake(&mut fe, now);
        fe.fe_down(CTRL, msg(1, OfpBody::FlowMod(forward(1, None))));
        run(&mut fe, now);
        sent(&mut fe);

        let packet_in = OfpPacketIn {
            buffer_id: OFP_NO_BUFFER,
            total_len: 3,
            reason: OfpPacketInReason::Action,
            table_id: 0,
            cookie: 0,
            match_field: OfpMatch::new().with(OfpOxmTlv::new_in_port(7)),
            data: vec![1, 2, 3],
        };
        fe.fe_up(DPATH, msg(0, OfpBody::PacketIn(packet_in.clone())), now);
        let removed = OfpFlowRemoved {
            cookie: 0,
            priority: 10,
            reason: OfpFlowRemovedReason::IdleTimeout,
            table_id: 0,
            duration_sec: 1,
            duration_nsec: 0,
            idle_timeout: 1,
            hard_timeout: 0,
            packet_count: 0,
            byte_count: 0,
            match_field: OfpMatch::new().with(OfpOxmTlv::new_in_port(1)),
        };
        fe.fe_up(DPATH, msg(0, OfpBody::FlowRemoved(removed)), now);
        run(&mut fe, now);

        let out = sent(&mut fe);
        assert_eq!(
            vec![OfpType::PacketIn, OfpType::FlowRemoved],
            types_to(&out, CTRL)
        );
        assert_eq!(OfpBody::PacketIn(packet_in), *out[0].1.body());
        let shadow = &fe.core().dpath(DPATH).unwrap().shadow;
        assert_eq!(0, shadow.table(0).unwrap().active_count());
        assert_eq!(1, fe.core().pipeline().table(0).unwrap().active_count());
    }

    #[test]
    fn late_datapaths_get_a_replay() {
        let now = Instant::now();
        let mut fe = proxy(now);
        fe.fe_down(CTRL, msg(1, OfpBody::GroupMod(group(1, OfpAction::output(3)))));
        fe.fe_down(CTRL, msg(2, OfpBody::GroupMod(group(0, OfpAction::Group(1)))));
        fe.fe_down(CTRL, msg(3, OfpBody::FlowMod(forward(1, Some(0)))));
        run(&mut fe, now);
        assert!(sent(&mut fe).is_empty());

        handshake(&mut fe, now);
        let out = sent(&mut fe);
        assert_eq!(
            vec![
                OfpType::GroupMod,
                OfpType::GroupMod,
                OfpType::FlowMod,
                OfpType::BarrierRequest,
            ],
            types_to(&out, DPATH)
        );
        match *out[0].1.body() {
            OfpBody::GroupMod(ref group_mod) => assert_eq!(1, group_mod.group_id),
            ref body => panic!("unexpected {:?}", body),
        }
        let shadow = &fe.core().dpath(DPATH).unwrap().shadow;
        assert_eq!(2, shadow.groups().len());
        assert_eq!(1, shadow.table(0).unwrap().active_count());
    }
}
