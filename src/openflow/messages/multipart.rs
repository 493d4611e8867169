/*!
Multipart messages, called statistics messages in OpenFlow 1.2

Some of the reply bodies changed their layout between 1.2 and 1.3.
These implement `VersionedCodec` instead of `Codec`.
*/

use byteorder::{NetworkEndian, WriteBytesExt};
use openflow::error::{Error, Result};
use openflow::messages::codec::{
    list_length, pack_list, unpack_list, write_string, Codec, WireReader,
};
use openflow::messages::*;
use std::io;
use std::io::Write;

/// More requests to follow.
pub const OFPMPF_REQ_MORE: u16 = 1 << 0;
/// More replies to follow.
pub const OFPMPF_REPLY_MORE: u16 = 1 << 0;

/// Support weight for select groups.
pub const OFPGFC_SELECT_WEIGHT: u32 = 1 << 0;
/// Support liveness for select groups.
pub const OFPGFC_SELECT_LIVENESS: u32 = 1 << 1;
/// Support chaining groups.
pub const OFPGFC_CHAINING: u32 = 1 << 2;
/// Check chaining for loops and delete.
pub const OFPGFC_CHAINING_CHECKS: u32 = 1 << 3;

const DESC_STR_LEN: usize = 256;
const SERIAL_NUM_LEN: usize = 32;
const OFP_MAX_TABLE_NAME_LEN: usize = 32;

/// Room for the body of one multipart reply after the message and multipart headers
pub const MULTIPART_REPLY_BODY_MAX: usize = 0xffff - 8 - 8;

/// A wire structure whose layout depends on the negotiated protocol version
pub trait VersionedCodec: Sized {
    /// Serializes the structure for `version` on the given stream
    fn pack_versioned<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()>;

    /// Deserializes one structure encoded for `version`
    fn unpack_versioned(version: u8, reader: &mut WireReader) -> Result<Self>;
}

fn pack_versioned_list<T: VersionedCodec, S: Write>(
    list: &[T],
    version: u8,
    stream: &mut S,
) -> io::Result<()> {
    for item in list {
        item.pack_versioned(version, stream)?;
    }
    Ok(())
}

fn unpack_versioned_list<T: VersionedCodec>(version: u8, reader: &mut WireReader) -> Result<Vec<T>> {
    let mut list = vec![];
    while reader.remaining() > 0 {
        list.push(T::unpack_versioned(version, reader)?);
    }
    Ok(list)
}

/// The multipart message kinds this stack understands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpMultipartType {
    /// Description of this OpenFlow switch.
    Desc = 0,
    /// Individual flow statistics.
    Flow = 1,
    /// Aggregate flow statistics.
    Aggregate = 2,
    /// Flow table statistics.
    Table = 3,
    /// Port statistics.
    PortStats = 4,
    /// Queue statistics for a port
    Queue = 5,
    /// Group counter statistics.
    Group = 6,
    /// Group description.
    GroupDesc = 7,
    /// Group features.
    GroupFeatures = 8,
    /// Port description, 1.3 only.
    PortDesc = 13,
}

/* ## ------------------------------ ## */
/* ## Port description.              ## */
/* ## ------------------------------ ## */

impl Codec for OfpPort {
    fn length(&self) -> usize {
        64
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.port_no)?;
        stream.write_all(&[0; 4])?;
        stream.write_all(&self.hw_addr)?;
        stream.write_all(&[0; 2])?;
        write_string(stream, &self.name, OFP_MAX_PORT_NAME_LEN)?;
        stream.write_u32::<NetworkEndian>(self.config)?;
        stream.write_u32::<NetworkEndian>(self.state)?;
        stream.write_u32::<NetworkEndian>(self.curr)?;
        stream.write_u32::<NetworkEndian>(self.advertised)?;
        stream.write_u32::<NetworkEndian>(self.supported)?;
        stream.write_u32::<NetworkEndian>(self.peer)?;
        stream.write_u32::<NetworkEndian>(self.curr_speed)?;
        stream.write_u32::<NetworkEndian>(self.max_speed)
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpPort> {
        let port_no = reader.u32()?;
        reader.skip(4)?;
        let mut hw_addr = [0; 6];
        hw_addr.copy_from_slice(reader.bytes(6)?);
        reader.skip(2)?;
        Ok(OfpPort {
            port_no,
            hw_addr,
            name: reader.string(OFP_MAX_PORT_NAME_LEN)?,
            config: reader.u32()?,
            state: reader.u32()?,
            curr: reader.u32()?,
            advertised: reader.u32()?,
            supported: reader.u32()?,
            peer: reader.u32()?,
            curr_speed: reader.u32()?,
            max_speed: reader.u32()?,
        })
    }
}

/* ## ------------------------------ ## */
/* ## Request bodies.                ## */
/* ## ------------------------------ ## */

/// Body for flow and aggregate statistics requests
#[derive(Debug, Clone, PartialEq)]
pub struct OfpFlowStatsRequest {
    /// ID of table to read (from OfpTableStats), OFPTT_ALL for all tables.
    pub table_id: u8,
    /// Require matching entries to include this as an output port.
    /// A value of OFPP_ANY indicates no restriction.
    pub out_port: u32,
    /// Require matching entries to include this as an output group.
    /// A value of OFPG_ANY indicates no restriction.
    pub out_group: u32,
    /// Require matching entries to contain this cookie value
    pub cookie: u64,
    /// Mask used to restrict the cookie bits that must match.
    /// A value of 0 indicates no restriction.
    pub cookie_mask: u64,
    /// Fields to match. Variable size.
    pub match_field: OfpMatch,
}

impl OfpFlowStatsRequest {
    /// Requests all flows of all tables
    pub fn all() -> OfpFlowStatsRequest {
        OfpFlowStatsRequest {
            table_id: OFPTT_ALL,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            cookie: 0,
            cookie_mask: 0,
            match_field: OfpMatch::new(),
        }
    }
}

impl Codec for OfpFlowStatsRequest {
    fn length(&self) -> usize {
        32 + self.match_field.length()
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_all(&[self.table_id, 0, 0, 0])?;
        stream.write_u32::<NetworkEndian>(self.out_port)?;
        stream.write_u32::<NetworkEndian>(self.out_group)?;
        stream.write_all(&[0; 4])?;
        stream.write_u64::<NetworkEndian>(self.cookie)?;
        stream.write_u64::<NetworkEndian>(self.cookie_mask)?;
        self.match_field.pack(stream)
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpFlowStatsRequest> {
        let table_id = reader.u8()?;
        reader.skip(3)?;
        let out_port = reader.u32()?;
        let out_group = reader.u32()?;
        reader.skip(4)?;
        Ok(OfpFlowStatsRequest {
            table_id,
            out_port,
            out_group,
            cookie: reader.u64()?,
            cookie_mask: reader.u64()?,
            match_field: OfpMatch::unpack(reader)?,
        })
    }
}

/// The type specific part of a multipart request
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartRequestBody {
    Desc,
    Flow(OfpFlowStatsRequest),
    Aggregate(OfpFlowStatsRequest),
    Table,
    /// Port number or OFPP_ANY for all ports
    PortStats(u32),
    /// Group id or OFPG_ALL for all groups
    Group(u32),
    GroupDesc,
    GroupFeatures,
    PortDesc,
    /// Any multipart type that is not interpreted, with its raw body
    Other(u16, Vec<u8>),
}

impl MultipartRequestBody {
    pub fn typ(&self) -> u16 {
        match *self {
            MultipartRequestBody::Desc => OfpMultipartType::Desc as u16,
            MultipartRequestBody::Flow(_) => OfpMultipartType::Flow as u16,
            MultipartRequestBody::Aggregate(_) => OfpMultipartType::Aggregate as u16,
            MultipartRequestBody::Table => OfpMultipartType::Table as u16,
            MultipartRequestBody::PortStats(_) => OfpMultipartType::PortStats as u16,
            MultipartRequestBody::Group(_) => OfpMultipartType::Group as u16,
            MultipartRequestBody::GroupDesc => OfpMultipartType::GroupDesc as u16,
            MultipartRequestBody::GroupFeatures => OfpMultipartType::GroupFeatures as u16,
            MultipartRequestBody::PortDesc => OfpMultipartType::PortDesc as u16,
            MultipartRequestBody::Other(typ, _) => typ,
        }
    }
}

/// Multipart request (controller -> datapath)
#[derive(Debug, Clone, PartialEq)]
pub struct OfpMultipartRequest {
    /// OFPMPF_REQ_* flags.
    pub flags: u16,
    pub body: MultipartRequestBody,
}

impl OfpMultipartRequest {
    pub fn new(body: MultipartRequestBody) -> OfpMultipartRequest {
        OfpMultipartRequest { flags: 0, body }
    }
}

impl VersionedCodec for OfpMultipartRequest {
    fn pack_versioned<S: Write>(&self, _version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.body.typ())?;
        stream.write_u16::<NetworkEndian>(self.flags)?;
        stream.write_all(&[0; 4])?;
        match self.body {
            MultipartRequestBody::Flow(ref req) | MultipartRequestBody::Aggregate(ref req) => {
                req.pack(stream)
            }
            MultipartRequestBody::PortStats(id) | MultipartRequestBody::Group(id) => {
                stream.write_u32::<NetworkEndian>(id)?;
                stream.write_all(&[0; 4])
            }
            MultipartRequestBody::Other(_, ref raw) => stream.write_all(raw),
            _ => Ok(()),
        }
    }

    fn unpack_versioned(version: u8, reader: &mut WireReader) -> Result<OfpMultipartRequest> {
        let typ = reader.u16()?;
        let flags = reader.u16()?;
        reader.skip(4)?;
        let body = match typ {
            0 => MultipartRequestBody::Desc,
            1 => MultipartRequestBody::Flow(OfpFlowStatsRequest::unpack(reader)?),
            2 => MultipartRequestBody::Aggregate(OfpFlowStatsRequest::unpack(reader)?),
            3 => MultipartRequestBody::Table,
            4 => {
                let port_no = reader.u32()?;
                reader.skip(4)?;
                MultipartRequestBody::PortStats(port_no)
            }
            6 => {
                let group_id = reader.u32()?;
                reader.skip(4)?;
                MultipartRequestBody::Group(group_id)
            }
            7 => MultipartRequestBody::GroupDesc,
            8 => MultipartRequestBody::GroupFeatures,
            13 if version >= OFP_VERSION_13 => MultipartRequestBody::PortDesc,
            _ => MultipartRequestBody::Other(typ, reader.rest().to_vec()),
        };
        if reader.remaining() > 0 {
            return Err(Error::bad_len());
        }
        Ok(OfpMultipartRequest { flags, body })
    }
}

/* ## ------------------------------ ## */
/* ## Reply bodies.                  ## */
/* ## ------------------------------ ## */

/// Body of reply to a Desc multipart request.
/// Each entry is a null-terminated ASCII string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfpDescStats {
    /// Manufacturer description.
    pub mfr_desc: String,
    /// Hardware description.
    pub hw_desc: String,
    /// Software description.
    pub sw_desc: String,
    /// Serial number.
    pub serial_num: String,
    /// Human readable description of datapath.
    pub dp_desc: String,
}

impl Codec for OfpDescStats {
    fn length(&self) -> usize {
        4 * DESC_STR_LEN + SERIAL_NUM_LEN
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        write_string(stream, &self.mfr_desc, DESC_STR_LEN)?;
        write_string(stream, &self.hw_desc, DESC_STR_LEN)?;
        write_string(stream, &self.sw_desc, DESC_STR_LEN)?;
        write_string(stream, &self.serial_num, SERIAL_NUM_LEN)?;
        write_string(stream, &self.dp_desc, DESC_STR_LEN)
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpDescStats> {
        Ok(OfpDescStats {
            mfr_desc: reader.string(DESC_STR_LEN)?,
            hw_desc: reader.string(DESC_STR_LEN)?,
            sw_desc: reader.string(DESC_STR_LEN)?,
            serial_num: reader.string(SERIAL_NUM_LEN)?,
            dp_desc: reader.string(DESC_STR_LEN)?,
        })
    }
}

/// Body of reply to a Flow multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct OfpFlowStats {
    /// ID of table flow came from.
    pub table_id: u8,
    /// Time flow has been alive in seconds.
    pub duration_sec: u32,
    /// Time flow has been alive in nanoseconds beyond duration_sec.
    pub duration_nsec: u32,
    /// Priority of the entry.
    pub priority: u16,
    /// Number of seconds idle before expiration.
    pub idle_timeout: u16,
    /// Number of seconds before expiration.
    pub hard_timeout: u16,
    /// Bitmap of OFPFF_* flags, 1.3 only.
    pub flags: u16,
    /// Opaque controller-issued identifier.
    pub cookie: u64,
    /// Number of packets in flow.
    pub packet_count: u64,
    /// Number of bytes in flow.
    pub byte_count: u64,
    /// Description of fields. Variable size.
    pub match_field: OfpMatch,
    /// Instruction set - 0 or more.
    pub instructions: Vec<OfpInstruction>,
}

impl OfpFlowStats {
    /// Encoded size, the same for 1.2 and 1.3
    pub fn length(&self) -> usize {
        48 + self.match_field.length() + list_length(&self.instructions)
    }
}

impl VersionedCodec for OfpFlowStats {
    fn pack_versioned<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.length() as u16)?;
        stream.write_all(&[self.table_id, 0])?;
        stream.write_u32::<NetworkEndian>(self.duration_sec)?;
        stream.write_u32::<NetworkEndian>(self.duration_nsec)?;
        stream.write_u16::<NetworkEndian>(self.priority)?;
        stream.write_u16::<NetworkEndian>(self.idle_timeout)?;
        stream.write_u16::<NetworkEndian>(self.hard_timeout)?;
        if version >= OFP_VERSION_13 {
            stream.write_u16::<NetworkEndian>(self.flags)?;
            stream.write_all(&[0; 4])?;
        } else {
            stream.write_all(&[0; 6])?;
        }
        stream.write_u64::<NetworkEndian>(self.cookie)?;
        stream.write_u64::<NetworkEndian>(self.packet_count)?;
        stream.write_u64::<NetworkEndian>(self.byte_count)?;
        self.match_field.pack(stream)?;
        pack_list(&self.instructions, stream)
    }

    fn unpack_versioned(version: u8, reader: &mut WireReader) -> Result<OfpFlowStats> {
        let length = reader.peek_u16(0)? as usize;
        if length < 48 {
            return Err(reader.short());
        }
        let mut entry = reader.sub(length)?;
        entry.skip(2)?;
        let table_id = entry.u8()?;
        entry.skip(1)?;
        let duration_sec = entry.u32()?;
        let duration_nsec = entry.u32()?;
        let priority = entry.u16()?;
        let idle_timeout = entry.u16()?;
        let hard_timeout = entry.u16()?;
        let flags = if version >= OFP_VERSION_13 {
            let flags = entry.u16()?;
            entry.skip(4)?;
            flags
        } else {
            entry.skip(6)?;
            0
        };
        Ok(OfpFlowStats {
            table_id,
            duration_sec,
            duration_nsec,
            priority,
            idle_timeout,
            hard_timeout,
            flags,
            cookie: entry.u64()?,
            packet_count: entry.u64()?,
            byte_count: entry.u64()?,
            match_field: OfpMatch::unpack(&mut entry)?,
            instructions: unpack_list(&mut entry)?,
        })
    }
}

/// Body of reply to an Aggregate multipart request.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OfpAggregateStats {
    /// Number of packets in flows.
    pub packet_count: u64,
    /// Number of bytes in flows.
    pub byte_count: u64,
    /// Number of flows.
    pub flow_count: u32,
}

impl Codec for OfpAggregateStats {
    fn length(&self) -> usize {
        24
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u64::<NetworkEndian>(self.packet_count)?;
        stream.write_u64::<NetworkEndian>(self.byte_count)?;
        stream.write_u32::<NetworkEndian>(self.flow_count)?;
        stream.write_all(&[0; 4])
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpAggregateStats> {
        let stats = OfpAggregateStats {
            packet_count: reader.u64()?,
            byte_count: reader.u64()?,
            flow_count: reader.u32()?,
        };
        reader.skip(4)?;
        Ok(stats)
    }
}

/// Body of reply to a Table multipart request.
///
/// 1.3 only carries the identifier and counters, the
/// description fields are transported by 1.2 only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfpTableStats {
    /// Identifier of table. Lower numbered tables are consulted first.
    pub table_id: u8,
    pub name: String,
    /// Bitmap of (1 << OxmField) that indicate the fields the table can match on.
    pub match_fields: u64,
    /// Bitmap of (1 << OxmField) wildcards that are supported by the table.
    pub wildcards: u64,
    /// Bitmap of (1 << OfpActionType) that are supported by the table with OFPIT_WRITE_ACTIONS.
    pub write_actions: u32,
    /// Bitmap of (1 << OfpActionType) that are supported by the table with OFPIT_APPLY_ACTIONS.
    pub apply_actions: u32,
    /// Bitmap of (1 << OxmField) header fields that can be set with OFPIT_WRITE_ACTIONS.
    pub write_setfields: u64,
    /// Bitmap of (1 << OxmField) header fields that can be set with OFPIT_APPLY_ACTIONS.
    pub apply_setfields: u64,
    /// Bits of metadata table can match.
    pub metadata_match: u64,
    /// Bits of metadata table can write.
    pub metadata_write: u64,
    /// Bitmap of (1 << OfpInstructionType) values supported.
    pub instructions: u32,
    /// Bitmap of OFPTC_* values
    pub config: u32,
    /// Max number of entries supported.
    pub max_entries: u32,
    /// Number of active entries.
    pub active_count: u32,
    /// Number of packets looked up in table.
    pub lookup_count: u64,
    /// Number of packets that hit table.
    pub matched_count: u64,
}

impl VersionedCodec for OfpTableStats {
    fn pack_versioned<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        if version >= OFP_VERSION_13 {
            stream.write_all(&[self.table_id, 0, 0, 0])?;
        } else {
            stream.write_all(&[self.table_id, 0, 0, 0, 0, 0, 0, 0])?;
            write_string(stream, &self.name, OFP_MAX_TABLE_NAME_LEN)?;
            stream.write_u64::<NetworkEndian>(self.match_fields)?;
            stream.write_u64::<NetworkEndian>(self.wildcards)?;
            stream.write_u32::<NetworkEndian>(self.write_actions)?;
            stream.write_u32::<NetworkEndian>(self.apply_actions)?;
            stream.write_u64::<NetworkEndian>(self.write_setfields)?;
            stream.write_u64::<NetworkEndian>(self.apply_setfields)?;
            stream.write_u64::<NetworkEndian>(self.metadata_match)?;
            stream.write_u64::<NetworkEndian>(self.metadata_write)?;
            stream.write_u32::<NetworkEndian>(self.instructions)?;
            stream.write_u32::<NetworkEndian>(self.config)?;
            stream.write_u32::<NetworkEndian>(self.max_entries)?;
        }
        stream.write_u32::<NetworkEndian>(self.active_count)?;
        stream.write_u64::<NetworkEndian>(self.lookup_count)?;
        stream.write_u64::<NetworkEndian>(self.matched_count)
    }

    fn unpack_versioned(version: u8, reader: &mut WireReader) -> Result<OfpTableStats> {
        let mut stats = OfpTableStats::default();
        stats.table_id = reader.u8()?;
        if version >= OFP_VERSION_13 {
            reader.skip(3)?;
        } else {
            reader.skip(7)?;
            stats.name = reader.string(OFP_MAX_TABLE_NAME_LEN)?;
            stats.match_fields = reader.u64()?;
            stats.wildcards = reader.u64()?;
            stats.write_actions = reader.u32()?;
            stats.apply_actions = reader.u32()?;
            stats.write_setfields = reader.u64()?;
            stats.apply_setfields = reader.u64()?;
            stats.metadata_match = reader.u64()?;
            stats.metadata_write = reader.u64()?;
            stats.instructions = reader.u32()?;
            stats.config = reader.u32()?;
            stats.max_entries = reader.u32()?;
        }
        stats.active_count = reader.u32()?;
        stats.lookup_count = reader.u64()?;
        stats.matched_count = reader.u64()?;
        Ok(stats)
    }
}

/// Body of reply to a PortStats multipart request.
/// If a counter is unsupported, set the field to all ones.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfpPortStats {
    pub port_no: u32,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_frame_err: u64,
    pub rx_over_err: u64,
    pub rx_crc_err: u64,
    pub collisions: u64,
    /// Time port has been alive in seconds, 1.3 only.
    pub duration_sec: u32,
    /// Time port has been alive in nanoseconds beyond duration_sec, 1.3 only.
    pub duration_nsec: u32,
}

impl OfpPortStats {
    fn counters(&self) -> [u64; 12] {
        [
            self.rx_packets,
            self.tx_packets,
            self.rx_bytes,
            self.tx_bytes,
            self.rx_dropped,
            self.tx_dropped,
            self.rx_errors,
            self.tx_errors,
            self.rx_frame_err,
            self.rx_over_err,
            self.rx_crc_err,
            self.collisions,
        ]
    }
}

impl VersionedCodec for OfpPortStats {
    fn pack_versioned<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.port_no)?;
        stream.write_all(&[0; 4])?;
        for counter in &self.counters() {
            stream.write_u64::<NetworkEndian>(*counter)?;
        }
        if version >= OFP_VERSION_13 {
            stream.write_u32::<NetworkEndian>(self.duration_sec)?;
            stream.write_u32::<NetworkEndian>(self.duration_nsec)?;
        }
        Ok(())
    }

    fn unpack_versioned(version: u8, reader: &mut WireReader) -> Result<OfpPortStats> {
        let port_no = reader.u32()?;
        reader.skip(4)?;
        let mut stats = OfpPortStats {
            port_no,
            rx_packets: reader.u64()?,
            tx_packets: reader.u64()?,
            rx_bytes: reader.u64()?,
            tx_bytes: reader.u64()?,
            rx_dropped: reader.u64()?,
            tx_dropped: reader.u64()?,
            rx_errors: reader.u64()?,
            tx_errors: reader.u64()?,
            rx_frame_err: reader.u64()?,
            rx_over_err: reader.u64()?,
            rx_crc_err: reader.u64()?,
            collisions: reader.u64()?,
            ..Default::default()
        };
        if version >= OFP_VERSION_13 {
            stats.duration_sec = reader.u32()?;
            stats.duration_nsec = reader.u32()?;
        }
        Ok(stats)
    }
}

/// Used in group stats replies.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OfpBucketCounter {
    /// Number of packets processed by bucket.
    pub packet_count: u64,
    /// Number of bytes processed by bucket.
    pub byte_count: u64,
}

/// Body of reply to a Group multipart request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfpGroupStats {
    /// Group identifier.
    pub group_id: u32,
    /// Number of flows or groups that directly forward to this group.
    pub ref_count: u32,
    /// Number of packets processed by group.
    pub packet_count: u64,
    /// Number of bytes processed by group.
    pub byte_count: u64,
    /// Time group has been alive in seconds, 1.3 only.
    pub duration_sec: u32,
    /// Time group has been alive in nanoseconds beyond duration_sec, 1.3 only.
    pub duration_nsec: u32,
    pub bucket_stats: Vec<OfpBucketCounter>,
}

impl VersionedCodec for OfpGroupStats {
    fn pack_versioned<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        let fixed = if version >= OFP_VERSION_13 { 40 } else { 32 };
        let length = fixed + 16 * self.bucket_stats.len();
        stream.write_u16::<NetworkEndian>(length as u16)?;
        stream.write_all(&[0; 2])?;
        stream.write_u32::<NetworkEndian>(self.group_id)?;
        stream.write_u32::<NetworkEndian>(self.ref_count)?;
        stream.write_all(&[0; 4])?;
        stream.write_u64::<NetworkEndian>(self.packet_count)?;
        stream.write_u64::<NetworkEndian>(self.byte_count)?;
        if version >= OFP_VERSION_13 {
            stream.write_u32::<NetworkEndian>(self.duration_sec)?;
            stream.write_u32::<NetworkEndian>(self.duration_nsec)?;
        }
        for counter in &self.bucket_stats {
            stream.write_u64::<NetworkEndian>(counter.packet_count)?;
            stream.write_u64::<NetworkEndian>(counter.byte_count)?;
        }
        Ok(())
    }

    fn unpack_versioned(version: u8, reader: &mut WireReader) -> Result<OfpGroupStats> {
        let fixed = if version >= OFP_VERSION_13 { 40 } else { 32 };
        let length = reader.peek_u16(0)? as usize;
        if length < fixed || (length - fixed) % 16 != 0 {
            return Err(reader.short());
        }
        let mut entry = reader.sub(length)?;
        entry.skip(4)?;
        let group_id = entry.u32()?;
        let ref_count = entry.u32()?;
        entry.skip(4)?;
        let mut stats = OfpGroupStats {
            group_id,
            ref_count,
            packet_count: entry.u64()?,
            byte_count: entry.u64()?,
            ..Default::default()
        };
        if version >= OFP_VERSION_13 {
            stats.duration_sec = entry.u32()?;
            stats.duration_nsec = entry.u32()?;
        }
        while entry.remaining() > 0 {
            stats.bucket_stats.push(OfpBucketCounter {
                packet_count: entry.u64()?,
                byte_count: entry.u64()?,
            });
        }
        Ok(stats)
    }
}

/// Body of reply to a GroupDesc multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct OfpGroupDesc {
    /// One of OfpGroupType.
    pub group_type: OfpGroupType,
    /// Group identifier.
    pub group_id: u32,
    pub buckets: Vec<OfpBucket>,
}

impl Codec for OfpGroupDesc {
    fn length(&self) -> usize {
        8 + list_length(&self.buckets)
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.length() as u16)?;
        stream.write_all(&[self.group_type as u8, 0])?;
        stream.write_u32::<NetworkEndian>(self.group_id)?;
        pack_list(&self.buckets, stream)
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpGroupDesc> {
        let length = reader.peek_u16(0)? as usize;
        if length < 8 {
            return Err(reader.short());
        }
        let mut entry = reader.sub(length)?;
        entry.skip(2)?;
        let group_type = OfpGroupType::from_u8(entry.u8()?)
            .ok_or(Error::GroupModFailed(OfpGroupModFailedCode::BadType))?;
        entry.skip(1)?;
        Ok(OfpGroupDesc {
            group_type,
            group_id: entry.u32()?,
            buckets: unpack_list(&mut entry)?,
        })
    }
}

/// Body of reply to a GroupFeatures multipart request.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OfpGroupFeatures {
    /// Bitmap of (1 << OfpGroupType) values supported.
    pub types: u32,
    /// Bitmap of OFPGFC_* capability supported.
    pub capabilities: u32,
    /// Maximum number of groups for each type.
    pub max_groups: [u32; 4],
    /// Bitmaps of (1 << OfpActionType) values supported.
    pub actions: [u32; 4],
}

impl Codec for OfpGroupFeatures {
    fn length(&self) -> usize {
        40
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u32::<NetworkEndian>(self.types)?;
        stream.write_u32::<NetworkEndian>(self.capabilities)?;
        for value in self.max_groups.iter().chain(self.actions.iter()) {
            stream.write_u32::<NetworkEndian>(*value)?;
        }
        Ok(())
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpGroupFeatures> {
        let mut features = OfpGroupFeatures {
            types: reader.u32()?,
            capabilities: reader.u32()?,
            ..Default::default()
        };
        for i in 0..4 {
            features.max_groups[i] = reader.u32()?;
        }
        for i in 0..4 {
            features.actions[i] = reader.u32()?;
        }
        Ok(features)
    }
}

/// The type specific part of a multipart reply
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartReplyBody {
    Desc(OfpDescStats),
    Flow(Vec<OfpFlowStats>),
    Aggregate(OfpAggregateStats),
    Table(Vec<OfpTableStats>),
    PortStats(Vec<OfpPortStats>),
    Group(Vec<OfpGroupStats>),
    GroupDesc(Vec<OfpGroupDesc>),
    GroupFeatures(OfpGroupFeatures),
    PortDesc(Vec<OfpPort>),
    /// Any multipart type that is not interpreted, with its raw body
    Other(u16, Vec<u8>),
}

impl MultipartReplyBody {
    pub fn typ(&self) -> u16 {
        match *self {
            MultipartReplyBody::Desc(_) => OfpMultipartType::Desc as u16,
            MultipartReplyBody::Flow(_) => OfpMultipartType::Flow as u16,
            MultipartReplyBody::Aggregate(_) => OfpMultipartType::Aggregate as u16,
            MultipartReplyBody::Table(_) => OfpMultipartType::Table as u16,
            MultipartReplyBody::PortStats(_) => OfpMultipartType::PortStats as u16,
            MultipartReplyBody::Group(_) => OfpMultipartType::Group as u16,
            MultipartReplyBody::GroupDesc(_) => OfpMultipartType::GroupDesc as u16,
            MultipartReplyBody::GroupFeatures(_) => OfpMultipartType::GroupFeatures as u16,
            MultipartReplyBody::PortDesc(_) => OfpMultipartType::PortDesc as u16,
            MultipartReplyBody::Other(typ, _) => typ,
        }
    }
}

/// Multipart reply (datapath -> controller)
#[derive(Debug, Clone, PartialEq)]
pub struct OfpMultipartReply {
    /// OFPMPF_REPLY_* flags.
    pub flags: u16,
    pub body: MultipartReplyBody,
}

impl OfpMultipartReply {
    pub fn new(body: MultipartReplyBody) -> OfpMultipartReply {
        OfpMultipartReply { flags: 0, body }
    }

    /// Whether more replies of the same transaction follow
    pub fn has_more(&self) -> bool {
        self.flags & OFPMPF_REPLY_MORE != 0
    }
}

impl VersionedCodec for OfpMultipartReply {
    fn pack_versioned<S: Write>(&self, version: u8, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(self.body.typ())?;
        stream.write_u16::<NetworkEndian>(self.flags)?;
        stream.write_all(&[0; 4])?;
        match self.body {
            MultipartReplyBody::Desc(ref desc) => desc.pack(stream),
            MultipartReplyBody::Flow(ref flows) => pack_versioned_list(flows, version, stream),
            MultipartReplyBody::Aggregate(ref aggregate) => aggregate.pack(stream),
            MultipartReplyBody::Table(ref tables) => pack_versioned_list(tables, version, stream),
            MultipartReplyBody::PortStats(ref ports) => pack_versioned_list(ports, version, stream),
            MultipartReplyBody::Group(ref groups) => pack_versioned_list(groups, version, stream),
            MultipartReplyBody::GroupDesc(ref groups) => pack_list(groups, stream),
            MultipartReplyBody::GroupFeatures(ref features) => features.pack(stream),
            MultipartReplyBody::PortDesc(ref ports) => pack_list(ports, stream),
            MultipartReplyBody::Other(_, ref raw) => stream.write_all(raw),
        }
    }

    fn unpack_versioned(version: u8, reader: &mut WireReader) -> Result<OfpMultipartReply> {
        let typ = reader.u16()?;
        let flags = reader.u16()?;
        reader.skip(4)?;
        let body = match typ {
            0 => MultipartReplyBody::Desc(OfpDescStats::unpack(reader)?),
            1 => MultipartReplyBody::Flow(unpack_versioned_list(version, reader)?),
            2 => MultipartReplyBody::Aggregate(OfpAggregateStats::unpack(reader)?),
            3 => MultipartReplyBody::Table(unpack_versioned_list(version, reader)?),
            4 => MultipartReplyBody::PortStats(unpack_versioned_list(version, reader)?),
            6 => MultipartReplyBody::Group(unpack_versioned_list(version, reader)?),
            7 => MultipartReplyBody::GroupDesc(unpack_list(reader)?),
            8 => MultipartReplyBody::GroupFeatures(OfpGroupFeatures::unpack(reader)?),
            13 if version >= OFP_VERSION_13 => MultipartReplyBody::PortDesc(unpack_list(reader)?),
            _ => MultipartReplyBody::Other(typ, reader.rest().to_vec()),
        };
        if reader.remaining() > 0 {
            return Err(Error::bad_len());
        }
        Ok(OfpMultipartReply { flags, body })
    }
}
