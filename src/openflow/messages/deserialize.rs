/*!
All deserialization routines for the OpenFlow message primitives

The header uses a special deserialization because its size is known.
Use the trait `Deserialize` for any other deserialization implementation.
*/

use byteorder::{ByteOrder, NetworkEndian};
use openflow::error::{Error, Result};
use openflow::messages::codec::{pad_len, unpack_list, Codec, WireReader};
use openflow::messages::multipart::VersionedCodec;
use openflow::messages::*;

impl OfpHeader {
    /// Deserializes an OpenFlow header
    pub fn deserialize(bytes: &[u8; 8]) -> OfpHeader {
        OfpHeader {
            version: bytes[0],
            typ: bytes[1],
            length: NetworkEndian::read_u16(&bytes[2..4]),
            xid: NetworkEndian::read_u32(&bytes[4..]),
        }
    }

    /// Returns the body length in byte, 0 for a malformed length field
    pub fn body_length(&self) -> usize {
        (self.length as usize).saturating_sub(OfpHeader::header_length())
    }

    /// Checks whether the version is one this stack can talk
    pub fn is_supported_version(&self) -> bool {
        self.version == OFP_VERSION_12 || self.version == OFP_VERSION_13
    }
}

/// To be implemented by all OpenFlow message parts that are received.
pub trait Deserialize: Sized {
    /// Deserialize the body bytes of a message of protocol `version`
    /// Fails on providing a too small or too large buffer
    fn deserialize(version: u8, bytes: &[u8]) -> Result<Self> {
        if Self::min_length(version) > bytes.len() || Self::max_length(version) < bytes.len() {
            return Err(Error::bad_len());
        }
        let mut reader = WireReader::new(bytes);
        let parsed = Self::deserialize_len_ok(version, &mut reader)?;
        if reader.remaining() > 0 {
            return Err(Error::bad_len());
        }
        Ok(parsed)
    }

    /// Deserializes from the reader (network byte order).
    /// Implementers can rely on the buffer's size to be greater or equal Self::min_length().
    /// All bytes have to be consumed.
    fn deserialize_len_ok(version: u8, reader: &mut WireReader) -> Result<Self>;

    /// The minimum length of the message part in bytes
    fn min_length(version: u8) -> usize;

    /// The maximum length of the message part in bytes
    /// May not return a value greater than 0xFFF7
    /// If Self is fixed size, you probably have to
    /// override this implementation.
    fn max_length(_version: u8) -> usize {
        0xffff - OfpHeader::header_length()
    }
}

impl Deserialize for OfpHello {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpHello> {
        let mut hello = OfpHello::default();
        // Unknown or malformed elements are ignored
        while reader.remaining() >= 4 {
            let typ = reader.u16()?;
            let len = reader.u16()? as usize;
            if len < 4 || len - 4 > reader.remaining() {
                break;
            }
            let mut element = reader.sub(len - 4)?;
            if typ == OFPHET_VERSIONBITMAP && element.remaining() >= 4 {
                hello.version_bitmap = Some(element.u32()?);
            }
            let padding = pad_len(len);
            if padding > reader.remaining() {
                break;
            }
            reader.skip(padding)?;
        }
        reader.rest();
        Ok(hello)
    }

    fn min_length(_version: u8) -> usize {
        0
    }
}

impl Deserialize for OfpErrorMsg {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpErrorMsg> {
        Ok(OfpErrorMsg {
            typ: reader.u16()?,
            code: reader.u16()?,
            data: reader.rest().to_vec(),
        })
    }

    fn min_length(_version: u8) -> usize {
        4
    }
}

impl Deserialize for OfpSwitchFeatures {
    fn deserialize_len_ok(version: u8, reader: &mut WireReader) -> Result<OfpSwitchFeatures> {
        let datapath_id = reader.u64()?;
        let n_buffers = reader.u32()?;
        let n_tables = reader.u8()?;
        let auxiliary_id = if version >= OFP_VERSION_13 {
            let auxiliary_id = reader.u8()?;
            reader.skip(2)?;
            auxiliary_id
        } else {
            reader.skip(3)?;
            0
        };
        let capabilities = reader.u32()?;
        let reserved = reader.u32()?;
        let ports = if version >= OFP_VERSION_13 {
            vec![]
        } else {
            unpack_list(reader)?
        };
        Ok(OfpSwitchFeatures {
            datapath_id,
            n_buffers,
            n_tables,
            auxiliary_id,
            capabilities,
            reserved,
            ports,
        })
    }

    fn min_length(_version: u8) -> usize {
        24
    }

    fn max_length(version: u8) -> usize {
        if version >= OFP_VERSION_13 {
            24
        } else {
            0xffff - OfpHeader::header_length()
        }
    }
}

impl Deserialize for OfpSwitchConfig {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpSwitchConfig> {
        Ok(OfpSwitchConfig {
            flags: reader.u16()?,
            miss_send_len: reader.u16()?,
        })
    }

    fn min_length(_version: u8) -> usize {
        4
    }

    fn max_length(_version: u8) -> usize {
        4
    }
}

fn bad_type() -> Error {
    Error::BadRequest(OfpBadRequestCode::BadType)
}

impl Deserialize for OfpPacketIn {
    fn deserialize_len_ok(version: u8, reader: &mut WireReader) -> Result<OfpPacketIn> {
        let buffer_id = reader.u32()?;
        let total_len = reader.u16()?;
        let reason = OfpPacketInReason::from_u8(reader.u8()?).ok_or_else(bad_type)?;
        let table_id = reader.u8()?;
        let cookie = if version >= OFP_VERSION_13 {
            reader.u64()?
        } else {
            0
        };
        let match_field = OfpMatch::unpack(reader)?;
        reader.skip(2)?;
        Ok(OfpPacketIn {
            buffer_id,
            total_len,
            reason,
            table_id,
            cookie,
            match_field,
            data: reader.rest().to_vec(),
        })
    }

    fn min_length(version: u8) -> usize {
        let fixed = if version >= OFP_VERSION_13 { 16 } else { 8 };
        fixed + 8 + 2
    }
}

impl Deserialize for OfpFlowRemoved {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpFlowRemoved> {
        let cookie = reader.u64()?;
        let priority = reader.u16()?;
        let reason = OfpFlowRemovedReason::from_u8(reader.u8()?).ok_or_else(bad_type)?;
        Ok(OfpFlowRemoved {
            cookie,
            priority,
            reason,
            table_id: reader.u8()?,
            duration_sec: reader.u32()?,
            duration_nsec: reader.u32()?,
            idle_timeout: reader.u16()?,
            hard_timeout: reader.u16()?,
            packet_count: reader.u64()?,
            byte_count: reader.u64()?,
            match_field: OfpMatch::unpack(reader)?,
        })
    }

    fn min_length(_version: u8) -> usize {
        40 + 8
    }
}

impl Deserialize for OfpPortStatus {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpPortStatus> {
        let reason = OfpPortReason::from_u8(reader.u8()?).ok_or_else(bad_type)?;
        reader.skip(7)?;
        Ok(OfpPortStatus {
            reason,
            desc: OfpPort::unpack(reader)?,
        })
    }

    fn min_length(_version: u8) -> usize {
        72
    }

    fn max_length(_version: u8) -> usize {
        72
    }
}

impl Deserialize for OfpPacketOut {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpPacketOut> {
        let buffer_id = reader.u32()?;
        let in_port = reader.u32()?;
        let actions_len = reader.u16()? as usize;
        reader.skip(6)?;
        if actions_len > reader.remaining() {
            return Err(Error::BadAction(OfpBadActionCode::BadLen));
        }
        let mut actions = WireReader::with_short(reader.bytes(actions_len)?, || {
            Error::BadAction(OfpBadActionCode::BadLen)
        });
        Ok(OfpPacketOut {
            buffer_id,
            in_port,
            actions: unpack_list(&mut actions)?,
            data: reader.rest().to_vec(),
        })
    }

    fn min_length(_version: u8) -> usize {
        16
    }
}

impl Deserialize for OfpFlowMod {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpFlowMod> {
        let cookie = reader.u64()?;
        let cookie_mask = reader.u64()?;
        let table_id = reader.u8()?;
        let command = OfpFlowModCommand::from_u8(reader.u8()?)
            .ok_or(Error::FlowModFailed(OfpFlowModFailedCode::BadCommand))?;
        let idle_timeout = reader.u16()?;
        let hard_timeout = reader.u16()?;
        let priority = reader.u16()?;
        let buffer_id = reader.u32()?;
        let out_port = reader.u32()?;
        let out_group = reader.u32()?;
        let flags = reader.u16()?;
        reader.skip(2)?;
        let match_field = OfpMatch::unpack(reader)?;
        let mut instructions = WireReader::with_short(reader.rest(), || {
            Error::BadInstruction(OfpBadInstructionCode::BadLen)
        });
        Ok(OfpFlowMod {
            cookie,
            cookie_mask,
            table_id,
            command,
            idle_timeout,
            hard_timeout,
            priority,
            buffer_id,
            out_port,
            out_group,
            flags,
            match_field,
            instructions: unpack_list(&mut instructions)?,
        })
    }

    fn min_length(_version: u8) -> usize {
        40 + 8
    }
}

impl Deserialize for OfpGroupMod {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpGroupMod> {
        let command = OfpGroupModCommand::from_u16(reader.u16()?)
            .ok_or(Error::GroupModFailed(OfpGroupModFailedCode::BadCommand))?;
        let group_type = OfpGroupType::from_u8(reader.u8()?)
            .ok_or(Error::GroupModFailed(OfpGroupModFailedCode::BadType))?;
        reader.skip(1)?;
        Ok(OfpGroupMod {
            command,
            group_type,
            group_id: reader.u32()?,
            buckets: unpack_list(reader)?,
        })
    }

    fn min_length(_version: u8) -> usize {
        8
    }
}

impl Deserialize for OfpPortMod {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpPortMod> {
        let port_no = reader.u32()?;
        reader.skip(4)?;
        let mut hw_addr = [0; 6];
        hw_addr.copy_from_slice(reader.bytes(6)?);
        reader.skip(2)?;
        let port_mod = OfpPortMod {
            port_no,
            hw_addr,
            config: reader.u32()?,
            mask: reader.u32()?,
            advertise: reader.u32()?,
        };
        reader.skip(4)?;
        Ok(port_mod)
    }

    fn min_length(_version: u8) -> usize {
        32
    }

    fn max_length(_version: u8) -> usize {
        32
    }
}

impl Deserialize for OfpTableMod {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpTableMod> {
        let table_id = reader.u8()?;
        reader.skip(3)?;
        Ok(OfpTableMod {
            table_id,
            config: reader.u32()?,
        })
    }

    fn min_length(_version: u8) -> usize {
        8
    }

    fn max_length(_version: u8) -> usize {
        8
    }
}

impl Deserialize for OfpMultipartRequest {
    fn deserialize_len_ok(version: u8, reader: &mut WireReader) -> Result<OfpMultipartRequest> {
        OfpMultipartRequest::unpack_versioned(version, reader)
    }

    fn min_length(_version: u8) -> usize {
        8
    }
}

impl Deserialize for OfpMultipartReply {
    fn deserialize_len_ok(version: u8, reader: &mut WireReader) -> Result<OfpMultipartReply> {
        OfpMultipartReply::unpack_versioned(version, reader)
    }

    fn min_length(_version: u8) -> usize {
        8
    }
}

impl Deserialize for OfpRole {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpRole> {
        let role = OfpControllerRole::from_u32(reader.u32()?)
            .ok_or(Error::RoleRequestFailed(OfpRoleRequestFailedCode::BadRole))?;
        reader.skip(4)?;
        Ok(OfpRole {
            role,
            generation_id: reader.u64()?,
        })
    }

    fn min_length(_version: u8) -> usize {
        16
    }

    fn max_length(_version: u8) -> usize {
        16
    }
}

impl Deserialize for OfpAsyncConfig {
    fn deserialize_len_ok(_version: u8, reader: &mut WireReader) -> Result<OfpAsyncConfig> {
        let mut masks = [0u32; 6];
        for mask in masks.iter_mut() {
            *mask = reader.u32()?;
        }
        Ok(OfpAsyncConfig {
            packet_in_mask: [masks[0], masks[1]],
            port_status_mask: [masks[2], masks[3]],
            flow_removed_mask: [masks[4], masks[5]],
        })
    }

    fn min_length(_version: u8) -> usize {
        24
    }

    fn max_length(_version: u8) -> usize {
        24
    }
}

fn empty_body(bytes: &[u8], body: OfpBody) -> Result<OfpBody> {
    if bytes.is_empty() {
        Ok(body)
    } else {
        Err(Error::bad_len())
    }
}

impl OfpMessage {
    /// Decodes a complete frame, header included.
    ///
    /// HELLO is accepted with any version. All other messages must carry
    /// OpenFlow 1.2 or 1.3 and a type that exists in that version.
    pub fn decode(frame: &[u8]) -> Result<OfpMessage> {
        if frame.len() < OfpHeader::header_length() {
            return Err(Error::bad_len());
        }
        let mut header_bytes = [0; 8];
        header_bytes.copy_from_slice(&frame[..8]);
        let header = OfpHeader::deserialize(&header_bytes);
        if header.length() as usize != frame.len() {
            return Err(Error::bad_len());
        }
        let version = header.version();
        let bytes = &frame[8..];

        let typ = OfpType::from_u8(header.typ()).ok_or_else(bad_type)?;
        if typ != OfpType::Hello && !header.is_supported_version() {
            return Err(Error::BadRequest(OfpBadRequestCode::BadVersion));
        }
        let body = match typ {
            OfpType::Hello => OfpBody::Hello(OfpHello::deserialize(version, bytes)?),
            OfpType::Error => OfpBody::Error(OfpErrorMsg::deserialize(version, bytes)?),
            OfpType::EchoRequest => OfpBody::EchoRequest(bytes.to_vec()),
            OfpType::EchoReply => OfpBody::EchoReply(bytes.to_vec()),
            OfpType::FeaturesRequest => empty_body(bytes, OfpBody::FeaturesRequest)?,
            OfpType::FeaturesReply => {
                OfpBody::FeaturesReply(OfpSwitchFeatures::deserialize(version, bytes)?)
            }
            OfpType::GetConfigRequest => empty_body(bytes, OfpBody::GetConfigRequest)?,
            OfpType::GetConfigReply => {
                OfpBody::GetConfigReply(OfpSwitchConfig::deserialize(version, bytes)?)
            }
            OfpType::SetConfig => OfpBody::SetConfig(OfpSwitchConfig::deserialize(version, bytes)?),
            OfpType::PacketIn => OfpBody::PacketIn(OfpPacketIn::deserialize(version, bytes)?),
            OfpType::FlowRemoved => {
                OfpBody::FlowRemoved(OfpFlowRemoved::deserialize(version, bytes)?)
            }
            OfpType::PortStatus => OfpBody::PortStatus(OfpPortStatus::deserialize(version, bytes)?),
            OfpType::PacketOut => OfpBody::PacketOut(OfpPacketOut::deserialize(version, bytes)?),
            OfpType::FlowMod => OfpBody::FlowMod(OfpFlowMod::deserialize(version, bytes)?),
            OfpType::GroupMod => OfpBody::GroupMod(OfpGroupMod::deserialize(version, bytes)?),
            OfpType::PortMod => OfpBody::PortMod(OfpPortMod::deserialize(version, bytes)?),
            OfpType::TableMod => OfpBody::TableMod(OfpTableMod::deserialize(version, bytes)?),
            OfpType::MultipartRequest => {
                OfpBody::MultipartRequest(OfpMultipartRequest::deserialize(version, bytes)?)
            }
            OfpType::MultipartReply => {
                OfpBody::MultipartReply(OfpMultipartReply::deserialize(version, bytes)?)
            }
            OfpType::BarrierRequest => empty_body(bytes, OfpBody::BarrierRequest)?,
            OfpType::BarrierReply => empty_body(bytes, OfpBody::BarrierReply)?,
            OfpType::RoleRequest => OfpBody::RoleRequest(OfpRole::deserialize(version, bytes)?),
            OfpType::RoleReply => OfpBody::RoleReply(OfpRole::deserialize(version, bytes)?),
            OfpType::GetAsyncRequest if version >= OFP_VERSION_13 => {
                empty_body(bytes, OfpBody::GetAsyncRequest)?
            }
            OfpType::GetAsyncReply if version >= OFP_VERSION_13 => {
                OfpBody::GetAsyncReply(OfpAsyncConfig::deserialize(version, bytes)?)
            }
            OfpType::SetAsync if version >= OFP_VERSION_13 => {
                OfpBody::SetAsync(OfpAsyncConfig::deserialize(version, bytes)?)
            }
            _ => return Err(bad_type()),
        };
        Ok(OfpMessage::new(version, header.xid(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_deserialization() {
        let expected = OfpHeader {
            version: 3,
            typ: 1,
            length: 0x5234,
            xid: 0x12345678,
        };
        let bytes = [3, 1, 0x52, 0x34, 0x12, 0x34, 0x56, 0x78];
        assert_eq!(expected, OfpHeader::deserialize(&bytes));
    }

    #[test]
    fn min_lengths() {
        assert_eq!(0, OfpHello::min_length(OFP_VERSION_13));
        assert_eq!(24, OfpSwitchFeatures::min_length(OFP_VERSION_13));
        assert_eq!(4, OfpErrorMsg::min_length(OFP_VERSION_12));
        assert_eq!(48, OfpFlowMod::min_length(OFP_VERSION_13));
    }

    #[test]
    fn max_lengths() {
        assert_eq!(0xFFF7, OfpHello::max_length(OFP_VERSION_13));
        assert_eq!(24, OfpSwitchFeatures::max_length(OFP_VERSION_13));
        assert_eq!(0xFFF7, OfpSwitchFeatures::max_length(OFP_VERSION_12));
        assert_eq!(0xFFF7, OfpErrorMsg::max_length(OFP_VERSION_13));
    }

    #[test]
    fn hello_with_bitmap() {
        let frame = [4, 0, 0, 16, 0, 0, 0, 1, 0, 1, 0, 8, 0, 0, 0, 0x18];
        let msg = OfpMessage::decode(&frame).unwrap();
        match *msg.body() {
            OfpBody::Hello(ref hello) => assert_eq!(Some(0x18), hello.version_bitmap),
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn hello_of_unsupported_version_decodes() {
        let frame = [1, 0, 0, 8, 0, 0, 0, 1];
        let msg = OfpMessage::decode(&frame).unwrap();
        assert_eq!(OFP_VERSION_10, msg.version());
        assert_eq!(OfpType::Hello, msg.typ());
    }

    #[test]
    fn length_mismatch() {
        let frame = [4, 2, 0, 12, 0, 0, 0, 1, 1, 2];
        match OfpMessage::decode(&frame).unwrap_err() {
            Error::BadRequest(OfpBadRequestCode::BadLen) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn bad_version() {
        let frame = [1, 2, 0, 8, 0, 0, 0, 1];
        match OfpMessage::decode(&frame).unwrap_err() {
            Error::BadRequest(OfpBadRequestCode::BadVersion) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn async_config_is_13_only() {
        let frame = [3, 26, 0, 8, 0, 0, 0, 1];
        match OfpMessage::decode(&frame).unwrap_err() {
            Error::BadRequest(OfpBadRequestCode::BadType) => {}
            e => panic!("unexpected {:?}", e),
        }
        let frame = [4, 26, 0, 8, 0, 0, 0, 1];
        assert_eq!(
            OfpType::GetAsyncRequest,
            OfpMessage::decode(&frame).unwrap().typ()
        );
    }

    #[test]
    fn barrier_with_body_is_rejected() {
        let frame = [4, 20, 0, 9, 0, 0, 0, 1, 0];
        assert!(OfpMessage::decode(&frame).is_err());
    }

    #[test]
    fn features_reply_per_version() {
        let mut body = vec![0, 0, 0, 0, 0, 0, 0, 7, 0, 0, 1, 0, 4, 0, 0, 0, 0, 0, 0, 0xf, 0, 0, 0, 0];
        let mut frame = vec![4, 6, 0, 32, 0, 0, 0, 1];
        frame.extend_from_slice(&body);
        match OfpMessage::decode(&frame).unwrap().into_body() {
            OfpBody::FeaturesReply(features) => {
                assert_eq!(7, features.datapath_id);
                assert_eq!(256, features.n_buffers);
                assert_eq!(4, features.n_tables);
                assert!(features.ports.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        // 1.2 carries the ports
        body.extend_from_slice(&[0; 64]);
        let mut frame = vec![3, 6, 0, 96, 0, 0, 0, 1];
        frame.extend_from_slice(&body);
        match OfpMessage::decode(&frame).unwrap().into_body() {
            OfpBody::FeaturesReply(features) => assert_eq!(1, features.ports.len()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
