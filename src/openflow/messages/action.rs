/*!
Actions, instructions and group buckets

All three are TLV lists with a 4 byte type/length header whose length
includes the header and is a multiple of 8.
*/

use byteorder::{NetworkEndian, WriteBytesExt};
use openflow::error::{Error, Result};
use openflow::messages::codec::{list_length, pack_list, pad_len, unpack_list, Codec, WireReader};
use openflow::messages::oxm::OfpOxmTlv;
use openflow::messages::*;
use std::fmt;
use std::io;
use std::io::Write;

/// Action types, numbered as in OpenFlow 1.3
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpActionType {
    /// Output to switch port.
    Output = 0,
    /// Copy TTL "outwards" -- from next-to-outermost to outermost
    CopyTtlOut = 11,
    /// Copy TTL "inwards" -- from outermost to next-to-outermost
    CopyTtlIn = 12,
    /// MPLS TTL
    SetMplsTtl = 15,
    /// Decrement MPLS TTL
    DecMplsTtl = 16,
    /// Push a new VLAN tag
    PushVlan = 17,
    /// Pop the outer VLAN tag
    PopVlan = 18,
    /// Push a new MPLS tag
    PushMpls = 19,
    /// Pop the outer MPLS tag
    PopMpls = 20,
    /// Set queue id when outputting to a port
    SetQueue = 21,
    /// Apply group.
    Group = 22,
    /// IP TTL.
    SetNwTtl = 23,
    /// Decrement IP TTL.
    DecNwTtl = 24,
    /// Set a header field using OXM TLV format.
    SetField = 25,
    /// Push a new PBB service tag (I-TAG)
    PushPbb = 26,
    /// Pop the outer PBB service tag (I-TAG)
    PopPbb = 27,
}

/// A single action of an action list or action set
#[derive(Debug, Clone, PartialEq)]
pub enum OfpAction {
    /// Output to `port`. `max_len` is the number of bytes to send
    /// when `port` is OFPP_CONTROLLER.
    Output { port: u32, max_len: u16 },
    CopyTtlOut,
    CopyTtlIn,
    SetMplsTtl(u8),
    DecMplsTtl,
    /// The ethertype of the pushed tag
    PushVlan(u16),
    PopVlan,
    PushMpls(u16),
    /// The ethertype of the payload after the pop
    PopMpls(u16),
    SetQueue(u32),
    Group(u32),
    SetNwTtl(u8),
    DecNwTtl,
    SetField(OfpOxmTlv),
    PushPbb(u16),
    PopPbb,
}

impl OfpAction {
    /// Output to `port` sending the whole packet to a controller
    pub fn output(port: u32) -> OfpAction {
        OfpAction::Output {
            port,
            max_len: OFPCML_NO_BUFFER,
        }
    }

    pub fn typ(&self) -> OfpActionType {
        match *self {
            OfpAction::Output { .. } => OfpActionType::Output,
            OfpAction::CopyTtlOut => OfpActionType::CopyTtlOut,
            OfpAction::CopyTtlIn => OfpActionType::CopyTtlIn,
            OfpAction::SetMplsTtl(_) => OfpActionType::SetMplsTtl,
            OfpAction::DecMplsTtl => OfpActionType::DecMplsTtl,
            OfpAction::PushVlan(_) => OfpActionType::PushVlan,
            OfpAction::PopVlan => OfpActionType::PopVlan,
            OfpAction::PushMpls(_) => OfpActionType::PushMpls,
            OfpAction::PopMpls(_) => OfpActionType::PopMpls,
            OfpAction::SetQueue(_) => OfpActionType::SetQueue,
            OfpAction::Group(_) => OfpActionType::Group,
            OfpAction::SetNwTtl(_) => OfpActionType::SetNwTtl,
            OfpAction::DecNwTtl => OfpActionType::DecNwTtl,
            OfpAction::SetField(_) => OfpActionType::SetField,
            OfpAction::PushPbb(_) => OfpActionType::PushPbb,
            OfpAction::PopPbb => OfpActionType::PopPbb,
        }
    }
}

fn bad_action_len() -> Error {
    Error::BadAction(OfpBadActionCode::BadLen)
}

impl Codec for OfpAction {
    fn length(&self) -> usize {
        match *self {
            OfpAction::Output { .. } => 16,
            OfpAction::SetField(ref tlv) => {
                let len = 4 + tlv.length();
                len + pad_len(len)
            }
            _ => 8,
        }
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.typ() as u16)?;
        stream.write_u16::<NetworkEndian>(self.length() as u16)?;
        match *self {
            OfpAction::Output { port, max_len } => {
                stream.write_u32::<NetworkEndian>(port)?;
                stream.write_u16::<NetworkEndian>(max_len)?;
                stream.write_all(&[0; 6])
            }
            OfpAction::SetMplsTtl(ttl) | OfpAction::SetNwTtl(ttl) => {
                stream.write_all(&[ttl, 0, 0, 0])
            }
            OfpAction::PushVlan(ethertype)
            | OfpAction::PushMpls(ethertype)
            | OfpAction::PopMpls(ethertype)
            | OfpAction::PushPbb(ethertype) => {
                stream.write_u16::<NetworkEndian>(ethertype)?;
                stream.write_all(&[0; 2])
            }
            OfpAction::SetQueue(id) | OfpAction::Group(id) => stream.write_u32::<NetworkEndian>(id),
            OfpAction::SetField(ref tlv) => {
                tlv.pack(stream)?;
                stream.write_all(&vec![0; pad_len(4 + tlv.length())])
            }
            _ => stream.write_all(&[0; 4]),
        }
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpAction> {
        let typ = reader.peek_u16(0).map_err(|_| bad_action_len())?;
        let len = reader.peek_u16(2).map_err(|_| bad_action_len())? as usize;
        if len < 8 || len % 8 != 0 || len > reader.remaining() {
            return Err(bad_action_len());
        }
        let mut action = WireReader::with_short(reader.bytes(len)?, bad_action_len);
        action.skip(4)?;

        let expect_len = |expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(bad_action_len())
            }
        };
        let parsed = match typ {
            0 => {
                expect_len(16)?;
                let port = action.u32()?;
                let max_len = action.u16()?;
                OfpAction::Output { port, max_len }
            }
            11 => OfpAction::CopyTtlOut,
            12 => OfpAction::CopyTtlIn,
            15 => OfpAction::SetMplsTtl(action.u8()?),
            16 => OfpAction::DecMplsTtl,
            17 => OfpAction::PushVlan(action.u16()?),
            18 => OfpAction::PopVlan,
            19 => OfpAction::PushMpls(action.u16()?),
            20 => OfpAction::PopMpls(action.u16()?),
            21 => OfpAction::SetQueue(action.u32()?),
            22 => OfpAction::Group(action.u32()?),
            23 => OfpAction::SetNwTtl(action.u8()?),
            24 => OfpAction::DecNwTtl,
            25 => {
                let tlv = OfpOxmTlv::unpack(&mut action).map_err(|e| match e {
                    Error::BadMatch(OfpBadMatchCode::BadField) => {
                        Error::BadAction(OfpBadActionCode::BadSetType)
                    }
                    Error::BadMatch(OfpBadMatchCode::BadMask) => {
                        Error::BadAction(OfpBadActionCode::BadSetArgument)
                    }
                    _ => Error::BadAction(OfpBadActionCode::BadSetLen),
                })?;
                if len != 4 + tlv.length() + pad_len(4 + tlv.length()) {
                    return Err(Error::BadAction(OfpBadActionCode::BadSetLen));
                }
                OfpAction::SetField(tlv)
            }
            26 => OfpAction::PushPbb(action.u16()?),
            27 => OfpAction::PopPbb,
            _ => return Err(Error::BadAction(OfpBadActionCode::BadType)),
        };
        if typ != 0 && typ != 25 {
            expect_len(8)?;
        }
        Ok(parsed)
    }
}

impl fmt::Display for OfpAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OfpAction::Output { port, .. } => match port {
                OFPP_CONTROLLER => write!(f, "output:controller"),
                OFPP_IN_PORT => write!(f, "output:in_port"),
                OFPP_FLOOD => write!(f, "output:flood"),
                OFPP_ALL => write!(f, "output:all"),
                OFPP_LOCAL => write!(f, "output:local"),
                OFPP_TABLE => write!(f, "output:table"),
                _ => write!(f, "output:{}", port),
            },
            OfpAction::Group(id) => write!(f, "group:{}", id),
            OfpAction::SetQueue(id) => write!(f, "set_queue:{}", id),
            OfpAction::SetField(ref tlv) => write!(f, "set_field:{}", tlv),
            ref other => write!(f, "{:?}", other.typ()),
        }
    }
}

/// The ports all `Output` actions of the list send to
pub fn output_ports(actions: &[OfpAction]) -> Vec<u32> {
    actions
        .iter()
        .filter_map(|a| match *a {
            OfpAction::Output { port, .. } => Some(port),
            _ => None,
        })
        .collect()
}

/// The groups all `Group` actions of the list refer to
pub fn group_ids(actions: &[OfpAction]) -> Vec<u32> {
    actions
        .iter()
        .filter_map(|a| match *a {
            OfpAction::Group(id) => Some(id),
            _ => None,
        })
        .collect()
}

/// Instruction types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpInstructionType {
    /// Setup the next table in the lookup pipeline
    GotoTable = 1,
    /// Setup the metadata field for use later in pipeline
    WriteMetadata = 2,
    /// Write the action(s) onto the datapath action set
    WriteActions = 3,
    /// Applies the action(s) immediately
    ApplyActions = 4,
    /// Clears all actions from the datapath action set
    ClearActions = 5,
    /// Apply meter (rate limiter)
    Meter = 6,
}

/// A flow entry's instruction
#[derive(Debug, Clone, PartialEq)]
pub enum OfpInstruction {
    GotoTable(u8),
    WriteMetadata { metadata: u64, mask: u64 },
    WriteActions(Vec<OfpAction>),
    ApplyActions(Vec<OfpAction>),
    ClearActions,
    Meter(u32),
}

impl OfpInstruction {
    pub fn typ(&self) -> OfpInstructionType {
        match *self {
            OfpInstruction::GotoTable(_) => OfpInstructionType::GotoTable,
            OfpInstruction::WriteMetadata { .. } => OfpInstructionType::WriteMetadata,
            OfpInstruction::WriteActions(_) => OfpInstructionType::WriteActions,
            OfpInstruction::ApplyActions(_) => OfpInstructionType::ApplyActions,
            OfpInstruction::ClearActions => OfpInstructionType::ClearActions,
            OfpInstruction::Meter(_) => OfpInstructionType::Meter,
        }
    }

    /// The actions embedded in this instruction, empty for all others
    pub fn actions(&self) -> &[OfpAction] {
        match *self {
            OfpInstruction::WriteActions(ref actions) | OfpInstruction::ApplyActions(ref actions) => {
                actions
            }
            _ => &[],
        }
    }

    /// The output ports referenced by an instruction set
    pub fn output_ports(instructions: &[OfpInstruction]) -> Vec<u32> {
        instructions
            .iter()
            .flat_map(|i| output_ports(i.actions()))
            .collect()
    }

    /// The groups referenced by an instruction set
    pub fn group_ids(instructions: &[OfpInstruction]) -> Vec<u32> {
        instructions
            .iter()
            .flat_map(|i| group_ids(i.actions()))
            .collect()
    }

    /// The target of the instruction set's Goto-Table instruction
    pub fn goto_table(instructions: &[OfpInstruction]) -> Option<u8> {
        instructions.iter().filter_map(|i| match *i {
            OfpInstruction::GotoTable(table_id) => Some(table_id),
            _ => None,
        }).next()
    }
}

fn bad_instruction_len() -> Error {
    Error::BadInstruction(OfpBadInstructionCode::BadLen)
}

impl Codec for OfpInstruction {
    fn length(&self) -> usize {
        match *self {
            OfpInstruction::WriteMetadata { .. } => 24,
            OfpInstruction::WriteActions(ref actions) | OfpInstruction::ApplyActions(ref actions) => {
                8 + list_length(actions)
            }
            _ => 8,
        }
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.typ() as u16)?;
        stream.write_u16::<NetworkEndian>(self.length() as u16)?;
        match *self {
            OfpInstruction::GotoTable(table_id) => stream.write_all(&[table_id, 0, 0, 0]),
            OfpInstruction::WriteMetadata { metadata, mask } => {
                stream.write_all(&[0; 4])?;
                stream.write_u64::<NetworkEndian>(metadata)?;
                stream.write_u64::<NetworkEndian>(mask)
            }
            OfpInstruction::WriteActions(ref actions) | OfpInstruction::ApplyActions(ref actions) => {
                stream.write_all(&[0; 4])?;
                pack_list(actions, stream)
            }
            OfpInstruction::ClearActions => stream.write_all(&[0; 4]),
            OfpInstruction::Meter(meter_id) => stream.write_u32::<NetworkEndian>(meter_id),
        }
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpInstruction> {
        let typ = reader.peek_u16(0).map_err(|_| bad_instruction_len())?;
        let len = reader.peek_u16(2).map_err(|_| bad_instruction_len())? as usize;
        if len < 8 || len % 8 != 0 || len > reader.remaining() {
            return Err(bad_instruction_len());
        }
        let mut instr = WireReader::with_short(reader.bytes(len)?, bad_instruction_len);
        instr.skip(4)?;

        let fixed = |expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(bad_instruction_len())
            }
        };
        Ok(match typ {
            1 => {
                fixed(8)?;
                OfpInstruction::GotoTable(instr.u8()?)
            }
            2 => {
                fixed(24)?;
                instr.skip(4)?;
                let metadata = instr.u64()?;
                let mask = instr.u64()?;
                OfpInstruction::WriteMetadata { metadata, mask }
            }
            3 | 4 => {
                instr.skip(4)?;
                let mut actions = WireReader::with_short(instr.rest(), bad_action_len);
                let actions = unpack_list(&mut actions)?;
                if typ == 3 {
                    OfpInstruction::WriteActions(actions)
                } else {
                    OfpInstruction::ApplyActions(actions)
                }
            }
            5 => {
                fixed(8)?;
                OfpInstruction::ClearActions
            }
            6 => {
                fixed(8)?;
                OfpInstruction::Meter(instr.u32()?)
            }
            _ => return Err(Error::BadInstruction(OfpBadInstructionCode::UnknownInst)),
        })
    }
}

impl fmt::Display for OfpInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OfpInstruction::GotoTable(table_id) => write!(f, "goto_table:{}", table_id),
            OfpInstruction::WriteMetadata { metadata, mask } => {
                write!(f, "write_metadata:0x{:x}/0x{:x}", metadata, mask)
            }
            OfpInstruction::WriteActions(ref actions) | OfpInstruction::ApplyActions(ref actions) => {
                let list: Vec<String> = actions.iter().map(|a| a.to_string()).collect();
                let name = if self.typ() == OfpInstructionType::WriteActions {
                    "write_actions"
                } else {
                    "apply_actions"
                };
                write!(f, "{}({})", name, list.join(","))
            }
            OfpInstruction::ClearActions => write!(f, "clear_actions"),
            OfpInstruction::Meter(meter_id) => write!(f, "meter:{}", meter_id),
        }
    }
}

/// Bucket for use in groups.
#[derive(Debug, Clone, PartialEq)]
pub struct OfpBucket {
    /// Relative weight of bucket. Only defined for select groups.
    pub weight: u16,
    /// Port whose state affects whether this bucket is live.
    /// Only required for fast failover groups.
    pub watch_port: u32,
    /// Group whose state affects whether this bucket is live.
    /// Only required for fast failover groups.
    pub watch_group: u32,
    /// 0 or more actions associated with the bucket.
    /// The action list length is inferred from the length of the bucket.
    pub actions: Vec<OfpAction>,
}

impl OfpBucket {
    /// A bucket that does not watch anything
    pub fn new(weight: u16, actions: Vec<OfpAction>) -> OfpBucket {
        OfpBucket {
            weight,
            watch_port: OFPP_ANY,
            watch_group: OFPG_ANY,
            actions,
        }
    }
}

fn bad_bucket() -> Error {
    Error::GroupModFailed(OfpGroupModFailedCode::BadBucket)
}

impl Codec for OfpBucket {
    fn length(&self) -> usize {
        16 + list_length(&self.actions)
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.length() as u16)?;
        stream.write_u16::<NetworkEndian>(self.weight)?;
        stream.write_u32::<NetworkEndian>(self.watch_port)?;
        stream.write_u32::<NetworkEndian>(self.watch_group)?;
        stream.write_all(&[0; 4])?;
        pack_list(&self.actions, stream)
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpBucket> {
        let len = reader.peek_u16(0).map_err(|_| bad_bucket())? as usize;
        if len < 16 || len % 8 != 0 || len > reader.remaining() {
            return Err(bad_bucket());
        }
        let mut bucket = WireReader::with_short(reader.bytes(len)?, bad_bucket);
        bucket.skip(2)?;
        let weight = bucket.u16()?;
        let watch_port = bucket.u32()?;
        let watch_group = bucket.u32()?;
        bucket.skip(4)?;
        let mut actions = WireReader::with_short(bucket.rest(), bad_action_len);
        Ok(OfpBucket {
            weight,
            watch_port,
            watch_group,
            actions: unpack_list(&mut actions)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Codec + fmt::Debug + PartialEq>(testee: &T) -> Vec<u8> {
        let mut ser = vec![];
        testee.pack(&mut ser).unwrap();
        assert_eq!(testee.length(), ser.len());
        let mut reader = WireReader::new(&ser);
        assert_eq!(*testee, T::unpack(&mut reader).unwrap());
        assert_eq!(0, reader.remaining());
        ser
    }

    #[test]
    fn action_output_serialization() {
        let testee = OfpAction::Output {
            port: 0x11223344,
            max_len: 0,
        };
        assert_eq!(
            vec![0, 0, 0, 16, 0x11, 0x22, 0x33, 0x44, 0, 0, 0, 0, 0, 0, 0, 0],
            roundtrip(&testee)
        );
    }

    #[test]
    fn set_field_is_padded() {
        let testee = OfpAction::SetField(OfpOxmTlv::new_vlan_vid(OFPVID_PRESENT | 10));
        // 4 header + 6 tlv + 6 padding
        assert_eq!(16, roundtrip(&testee).len());
    }

    #[test]
    fn unknown_action_type() {
        let ser = vec![0, 99, 0, 8, 0, 0, 0, 0];
        match OfpAction::unpack(&mut WireReader::new(&ser)).unwrap_err() {
            Error::BadAction(OfpBadActionCode::BadType) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn action_length_must_be_aligned() {
        let ser = vec![0, 22, 0, 6, 0, 0, 0, 1];
        match OfpAction::unpack(&mut WireReader::new(&ser)).unwrap_err() {
            Error::BadAction(OfpBadActionCode::BadLen) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn instructions() {
        let apply = OfpInstruction::ApplyActions(vec![
            OfpAction::output(OFPP_CONTROLLER),
            OfpAction::Group(7),
        ]);
        assert_eq!(8 + 16 + 8, roundtrip(&apply).len());
        roundtrip(&OfpInstruction::GotoTable(3));
        roundtrip(&OfpInstruction::WriteMetadata {
            metadata: 0xabcd,
            mask: 0xffff,
        });
        roundtrip(&OfpInstruction::ClearActions);

        let set = vec![apply, OfpInstruction::GotoTable(3)];
        assert_eq!(vec![OFPP_CONTROLLER], OfpInstruction::output_ports(&set));
        assert_eq!(vec![7], OfpInstruction::group_ids(&set));
        assert_eq!(Some(3), OfpInstruction::goto_table(&set));
    }

    #[test]
    fn unknown_instruction() {
        let ser = vec![0, 42, 0, 8, 0, 0, 0, 0];
        match OfpInstruction::unpack(&mut WireReader::new(&ser)).unwrap_err() {
            Error::BadInstruction(OfpBadInstructionCode::UnknownInst) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn bucket_serialization() {
        let testee = OfpBucket::new(5, vec![OfpAction::output(2)]);
        let ser = roundtrip(&testee);
        assert_eq!(&[0, 32, 0, 5], &ser[..4]);
    }

    #[test]
    fn short_bucket() {
        let ser = vec![0, 8, 0, 0, 0, 0, 0, 0];
        match OfpBucket::unpack(&mut WireReader::new(&ser)).unwrap_err() {
            Error::GroupModFailed(OfpGroupModFailedCode::BadBucket) => {}
            e => panic!("unexpected {:?}", e),
        }
    }
}
