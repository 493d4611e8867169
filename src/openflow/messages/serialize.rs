/*!
All serialization and construction routines for the OpenFlow message primitives

Use the trait `OfpPacket` for serialization implementations of message
bodies that are sent. Other primitives that are part of a message
implement `Codec` or `VersionedCodec`.
*/

use byteorder::{NetworkEndian, WriteBytesExt};
use openflow::messages::codec::{list_length, pack_list, Codec};
use openflow::messages::multipart::VersionedCodec;
use openflow::messages::*;
use std::io;
use std::io::Write;

impl OfpHeader {
    /// Constructs an `OfpHeader` for a message without body
    pub fn new(version: u8, typ: OfpType, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ: typ as u8,
            length: OfpHeader::header_length() as u16,
            xid,
        }
    }

    /// Returns the fixed header length of 8 (in byte)
    pub fn header_length() -> usize {
        8
    }

    /// Serializes this header on the given stream
    pub fn serialize<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_all(&[self.version, self.typ])?;
        stream.write_u16::<NetworkEndian>(self.length)?;
        stream.write_u32::<NetworkEndian>(self.xid)
    }
}

/// A message body that is sent. Must be implemented for all OpenFlow message bodies.
pub trait OfpPacket {
    /// Serializes this packet's body for protocol `version`.
    /// Implementers have to output network byte order on the given stream.
    fn serialize_body<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()>;
}

impl OfpPacket for OfpHello {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        if let Some(bitmap) = self.version_bitmap {
            stream.write_u16::<NetworkEndian>(OFPHET_VERSIONBITMAP)?;
            stream.write_u16::<NetworkEndian>(8)?;
            stream.write_u32::<NetworkEndian>(bitmap)?;
        }
        Ok(())
    }
}

impl OfpPacket for OfpErrorMsg {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.typ)?;
        stream.write_u16::<NetworkEndian>(self.code)?;
        stream.write_all(&self.data)
    }
}

impl OfpPacket for OfpSwitchFeatures {
    fn serialize_body<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u64::<NetworkEndian>(self.datapath_id)?;
        stream.write_u32::<NetworkEndian>(self.n_buffers)?;
        if version >= OFP_VERSION_13 {
            stream.write_all(&[self.n_tables, self.auxiliary_id, 0, 0])?;
        } else {
            stream.write_all(&[self.n_tables, 0, 0, 0])?;
        }
        stream.write_u32::<NetworkEndian>(self.capabilities)?;
        stream.write_u32::<NetworkEndian>(self.reserved)?;
        if version < OFP_VERSION_13 {
            pack_list(&self.ports, stream)?;
        }
        Ok(())
    }
}

impl OfpPacket for OfpSwitchConfig {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.flags)?;
        stream.write_u16::<NetworkEndian>(self.miss_send_len)
    }
}

impl OfpPacket for OfpPacketIn {
    fn serialize_body<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.buffer_id)?;
        stream.write_u16::<NetworkEndian>(self.total_len)?;
        stream.write_all(&[self.reason as u8, self.table_id])?;
        if version >= OFP_VERSION_13 {
            stream.write_u64::<NetworkEndian>(self.cookie)?;
        }
        self.match_field.pack(stream)?;
        stream.write_all(&[0; 2])?;
        stream.write_all(&self.data)
    }
}

impl OfpPacket for OfpFlowRemoved {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u64::<NetworkEndian>(self.cookie)?;
        stream.write_u16::<NetworkEndian>(self.priority)?;
        stream.write_all(&[self.reason as u8, self.table_id])?;
        stream.write_u32::<NetworkEndian>(self.duration_sec)?;
        stream.write_u32::<NetworkEndian>(self.duration_nsec)?;
        stream.write_u16::<NetworkEndian>(self.idle_timeout)?;
        stream.write_u16::<NetworkEndian>(self.hard_timeout)?;
        stream.write_u64::<NetworkEndian>(self.packet_count)?;
        stream.write_u64::<NetworkEndian>(self.byte_count)?;
        self.match_field.pack(stream)
    }
}

impl OfpPacket for OfpPortStatus {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_all(&[self.reason as u8, 0, 0, 0, 0, 0, 0, 0])?;
        self.desc.pack(stream)
    }
}

impl OfpPacket for OfpPacketOut {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.buffer_id)?;
        stream.write_u32::<NetworkEndian>(self.in_port)?;
        stream.write_u16::<NetworkEndian>(list_length(&self.actions) as u16)?;
        stream.write_all(&[0; 6])?;
        pack_list(&self.actions, stream)?;
        stream.write_all(&self.data)
    }
}

impl OfpPacket for OfpFlowMod {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u64::<NetworkEndian>(self.cookie)?;
        stream.write_u64::<NetworkEndian>(self.cookie_mask)?;
        stream.write_all(&[self.table_id, self.command as u8])?;
        stream.write_u16::<NetworkEndian>(self.idle_timeout)?;
        stream.write_u16::<NetworkEndian>(self.hard_timeout)?;
        stream.write_u16::<NetworkEndian>(self.priority)?;
        stream.write_u32::<NetworkEndian>(self.buffer_id)?;
        stream.write_u32::<NetworkEndian>(self.out_port)?;
        stream.write_u32::<NetworkEndian>(self.out_group)?;
        stream.write_u16::<NetworkEndian>(self.flags)?;
        stream.write_all(&[0; 2])?;
        self.match_field.pack(stream)?;
        pack_list(&self.instructions, stream)
    }
}

impl OfpPacket for OfpGroupMod {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.command as u16)?;
        stream.write_all(&[self.group_type as u8, 0])?;
        stream.write_u32::<NetworkEndian>(self.group_id)?;
        pack_list(&self.buckets, stream)
    }
}

impl OfpPacket for OfpPortMod {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.port_no)?;
        stream.write_all(&[0; 4])?;
        stream.write_all(&self.hw_addr)?;
        stream.write_all(&[0; 2])?;
        stream.write_u32::<NetworkEndian>(self.config)?;
        stream.write_u32::<NetworkEndian>(self.mask)?;
        stream.write_u32::<NetworkEndian>(self.advertise)?;
        stream.write_all(&[0; 4])
    }
}

impl OfpPacket for OfpTableMod {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_all(&[self.table_id, 0, 0, 0])?;
        stream.write_u32::<NetworkEndian>(self.config)
    }
}

impl OfpPacket for OfpMultipartRequest {
    fn serialize_body<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        self.pack_versioned(version, stream)
    }
}

impl OfpPacket for OfpMultipartReply {
    fn serialize_body<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        self.pack_versioned(version, stream)
    }
}

impl OfpPacket for OfpRole {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.role as u32)?;
        stream.write_all(&[0; 4])?;
        stream.write_u64::<NetworkEndian>(self.generation_id)
    }
}

impl OfpPacket for OfpAsyncConfig {
    fn serialize_body<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.packet_in_mask[0])?;
        stream.write_u32::<NetworkEndian>(self.packet_in_mask[1])?;
        stream.write_u32::<NetworkEndian>(self.port_status_mask[0])?;
        stream.write_u32::<NetworkEndian>(self.port_status_mask[1])?;
        stream.write_u32::<NetworkEndian>(self.flow_removed_mask[0])?;
        stream.write_u32::<NetworkEndian>(self.flow_removed_mask[1])
    }
}

impl OfpPacket for OfpBody {
    fn serialize_body<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        match *self {
            OfpBody::Hello(ref hello) => hello.serialize_body(version, stream),
            OfpBody::Error(ref error) => error.serialize_body(version, stream),
            OfpBody::EchoRequest(ref data) | OfpBody::EchoReply(ref data) => {
                stream.write_all(data)
            }
            OfpBody::FeaturesReply(ref features) => features.serialize_body(version, stream),
            OfpBody::GetConfigReply(ref config) | OfpBody::SetConfig(ref config) => {
                config.serialize_body(version, stream)
            }
            OfpBody::PacketIn(ref packet_in) => packet_in.serialize_body(version, stream),
            OfpBody::FlowRemoved(ref removed) => removed.serialize_body(version, stream),
            OfpBody::PortStatus(ref status) => status.serialize_body(version, stream),
            OfpBody::PacketOut(ref packet_out) => packet_out.serialize_body(version, stream),
            OfpBody::FlowMod(ref flow_mod) => flow_mod.serialize_body(version, stream),
            OfpBody::GroupMod(ref group_mod) => group_mod.serialize_body(version, stream),
            OfpBody::PortMod(ref port_mod) => port_mod.serialize_body(version, stream),
            OfpBody::TableMod(ref table_mod) => table_mod.serialize_body(version, stream),
            OfpBody::MultipartRequest(ref request) => request.serialize_body(version, stream),
            OfpBody::MultipartReply(ref reply) => reply.serialize_body(version, stream),
            OfpBody::RoleRequest(ref role) | OfpBody::RoleReply(ref role) => {
                role.serialize_body(version, stream)
            }
            OfpBody::GetAsyncReply(ref config) | OfpBody::SetAsync(ref config) => {
                config.serialize_body(version, stream)
            }
            OfpBody::FeaturesRequest
            | OfpBody::GetConfigRequest
            | OfpBody::BarrierRequest
            | OfpBody::BarrierReply
            | OfpBody::GetAsyncRequest => Ok(()),
        }
    }
}

impl OfpMessage {
    /// Constructs an OfpHeader with the given body length
    pub fn header(&self, body_length: usize) -> OfpHeader {
        OfpHeader {
            version: self.version,
            typ: self.typ() as u8,
            length: (OfpHeader::header_length() + body_length) as u16,
            xid: self.xid,
        }
    }

    /// Serializes this message with network byte order.
    pub fn serialize<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        let mut body = vec![];
        self.body.serialize_body(self.version, &mut body)?;
        if body.len() > 0xffff - OfpHeader::header_length() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not fit into a single message", self),
            ));
        }
        let header = self.header(body.len());
        trace!("Outgoing message: {:?}", header);
        header.serialize(stream)?;
        stream.write_all(&body)
    }

    /// Serializes this message into a fresh buffer
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut frame = vec![];
        self.serialize(&mut frame)?;
        Ok(frame)
    }
}
