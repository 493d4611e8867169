/*!
The OpenFlow message primitives for protocol versions 1.2 and 1.3

This is based on the openflow.h from OpenFlow Switch Specification 1.3.5
and the differences documented for 1.2.
The type names are changed to align with the Rust conventions.
Structures whose layout differs between the two versions are kept as one
Rust type and encoded according to the negotiated version.
*/

pub mod action;
pub mod codec;
pub mod deserialize;
pub mod multipart;
pub mod oxm;
pub mod serialize;

pub use self::action::*;
pub use self::multipart::*;
pub use self::oxm::*;

use std::fmt;

/* Copyright (c) 2008 The Board of Trustees of The Leland Stanford Junior University
 * Copyright (c) 2011, 2012 Open Networking Foundation
 *
 * We are making the OpenFlow specification and associated documentation
 * (Software) available for public use and benefit with the expectation
 * that others will use, modify and enhance the Software and contribute
 * those enhancements back to the community. However, since we would
 * like to make the Software available for broadest use, with as few
 * restrictions as possible permission is hereby granted, free of
 * charge, to any person obtaining a copy of this Software to deal in
 * the Software under the copyrights without restriction, including
 * without limitation the rights to use, copy, modify, merge, publish,
 * distribute, sublicense, and/or sell copies of the Software, and to
 * permit persons to whom the Software is furnished to do so, subject to
 * the following conditions:
 *
 * The above copyright notice and this permission notice shall be
 * included in all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
 * EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
 * MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
 * NONINFRINGEMENT.  IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
 * BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
 * ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
 * CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 *
 * The name and trademarks of copyright holder(s) may NOT be used in
 * advertising or publicity pertaining to the Software or any
 * derivatives without specific, written prior permission.
 */

/// Version number:
/// OpenFlow versions released: 0x01 = 1.0 ; 0x02 = 1.1 ; 0x03 = 1.2; 0x04 = 1.3.
///
/// The most significant bit in the version field is reserved and must be set to zero.
pub const OFP_VERSION: u8 = OFP_VERSION_13;
/// OpenFlow 1.0, only recognised during version negotiation
pub const OFP_VERSION_10: u8 = 0x01;
/// OpenFlow 1.2
pub const OFP_VERSION_12: u8 = 0x03;
/// OpenFlow 1.3
pub const OFP_VERSION_13: u8 = 0x04;

/// The IANA assigned OpenFlow TCP port
pub const OFP_TCP_PORT: u16 = 6653;

/// Maximum number of physical and logical switch ports. Ports are numbered starting from 1.
pub const OFPP_MAX: u32 = 0xffff_ff00;
/// Send the packet out the input port. This reserved port must be
/// explicitly used in order to send back out of the input port.
pub const OFPP_IN_PORT: u32 = 0xffff_fff8;
/// Submit the packet to the first flow table.
/// NB: This destination port can only be used in packet-out messages.
pub const OFPP_TABLE: u32 = 0xffff_fff9;
/// Process with normal L2/L3 switching.
pub const OFPP_NORMAL: u32 = 0xffff_fffa;
/// All physical ports in VLAN, except input port and those blocked or link down.
pub const OFPP_FLOOD: u32 = 0xffff_fffb;
/// All physical ports except input port.
pub const OFPP_ALL: u32 = 0xffff_fffc;
/// Send to controller.
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
/// Local openflow "port".
pub const OFPP_LOCAL: u32 = 0xffff_fffe;
/// Special value used in some requests when no port is specified (i.e. wildcarded).
pub const OFPP_ANY: u32 = 0xffff_ffff;

/// Last usable group number.
pub const OFPG_MAX: u32 = 0xffff_ff00;
/// Represents all groups for group delete commands.
pub const OFPG_ALL: u32 = 0xffff_fffc;
/// Wildcard group used only for flow stats requests. Selects all flows regardless of group.
pub const OFPG_ANY: u32 = 0xffff_ffff;

/// Last usable table number.
pub const OFPTT_MAX: u8 = 0xfe;
/// Wildcard table used for table config, flow stats and flow deletes.
pub const OFPTT_ALL: u8 = 0xff;

/// A reserved buffer ID to express that no buffer is assigned
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
/// Indicates that no buffering should be applied and the whole packet is to be sent to the controller.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;
/// Default number of bytes of new flow that datapath should send to the controller.
pub const OFP_DEFAULT_MISS_SEND_LEN: u16 = 128;

/// Value used in `idle_timeout` and `hard_timeout` to indicate that the entry is permanent.
pub const OFP_FLOW_PERMANENT: u16 = 0;
/// By default, choose a priority in the middle.
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

/* Flow mod flags */
/// Send flow removed message when flow expires or is deleted.
pub const OFPFF_SEND_FLOW_REM: u16 = 1 << 0;
/// Check for overlapping entries first.
pub const OFPFF_CHECK_OVERLAP: u16 = 1 << 1;
/// Reset flow packet and byte counts.
pub const OFPFF_RESET_COUNTS: u16 = 1 << 2;
/// Don't keep track of packet count.
pub const OFPFF_NO_PKT_COUNTS: u16 = 1 << 3;
/// Don't keep track of byte count.
pub const OFPFF_NO_BYT_COUNTS: u16 = 1 << 4;

/* Capabilities supported by the datapath */
/// Flow statistics.
pub const OFPC_FLOW_STATS: u32 = 1 << 0;
/// Table statistics.
pub const OFPC_TABLE_STATS: u32 = 1 << 1;
/// Port statistics.
pub const OFPC_PORT_STATS: u32 = 1 << 2;
/// Group statistics.
pub const OFPC_GROUP_STATS: u32 = 1 << 3;

/* Flags to configure the table */
/// Send to controller on a table miss.
pub const OFPTC_TABLE_MISS_CONTROLLER: u32 = 0;
/// Continue to the next table in the pipeline.
pub const OFPTC_TABLE_MISS_CONTINUE: u32 = 1 << 0;
/// Drop the packet.
pub const OFPTC_TABLE_MISS_DROP: u32 = 1 << 1;
/// Mask of the table-miss bits.
pub const OFPTC_TABLE_MISS_MASK: u32 = 3;

/* Port configuration and state */
/// Port is administratively down.
pub const OFPPC_PORT_DOWN: u32 = 1 << 0;
/// Drop all packets received by port.
pub const OFPPC_NO_RECV: u32 = 1 << 2;
/// Drop packets forwarded to port.
pub const OFPPC_NO_FWD: u32 = 1 << 5;
/// Do not send packet-in msgs for port.
pub const OFPPC_NO_PACKET_IN: u32 = 1 << 6;
/// No physical link present.
pub const OFPPS_LINK_DOWN: u32 = 1 << 0;
/// Live for Fast Failover Group.
pub const OFPPS_LIVE: u32 = 1 << 2;
/// 1 Gb full-duplex rate support.
pub const OFPPF_1GB_FD: u32 = 1 << 5;
/// Copper medium.
pub const OFPPF_COPPER: u32 = 1 << 11;

/// A marker to express the endpoint
/// of any end-to-end network protocol
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProtocolEndpoint {
    /// The endpoint is the source
    Src,
    /// The endpoint is the destination
    Dst,
}

/// A message's type, the most fundamental to
/// distinguish information between messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OfpType {
    /* Immutable messages. */
    /// Symmetric message
    Hello = 0,
    /// Symmetric message
    Error = 1,
    /// Symmetric message
    EchoRequest = 2,
    /// Symmetric message
    EchoReply = 3,
    /// Symmetric message
    Experimenter = 4,

    /* Switch configuration messages. */
    /// Controller/switch message
    FeaturesRequest = 5,
    /// Controller/switch message
    FeaturesReply = 6,
    /// Controller/switch message
    GetConfigRequest = 7,
    /// Controller/switch message
    GetConfigReply = 8,
    /// Controller/switch message
    SetConfig = 9,

    /* Asynchronous messages. */
    /// Async message
    PacketIn = 10,
    /// Async message
    FlowRemoved = 11,
    /// Async message
    PortStatus = 12,

    /* Controller command messages. */
    /// Controller/switch message
    PacketOut = 13,
    /// Controller/switch message
    FlowMod = 14,
    /// Controller/switch message
    GroupMod = 15,
    /// Controller/switch message
    PortMod = 16,
    /// Controller/switch message
    TableMod = 17,

    /* Multipart messages, called statistics in 1.2. */
    /// Controller/switch message
    MultipartRequest = 18,
    /// Controller/switch message
    MultipartReply = 19,

    /* Barrier messages. */
    /// Controller/switch message
    BarrierRequest = 20,
    /// Controller/switch message
    BarrierReply = 21,

    /* Queue Configuration messages. */
    /// Controller/switch message
    QueueGetConfigRequest = 22,
    /// Controller/switch message
    QueueGetConfigReply = 23,

    /* Controller role change request messages. */
    /// Controller/switch message
    RoleRequest = 24,
    /// Controller/switch message
    RoleReply = 25,

    /* Asynchronous message configuration, 1.3 only. */
    /// Controller/switch message
    GetAsyncRequest = 26,
    /// Controller/switch message
    GetAsyncReply = 27,
    /// Controller/switch message
    SetAsync = 28,

    /* Meters and rate limiters configuration messages, 1.3 only. */
    /// Controller/switch message
    MeterMod = 29,
}

impl OfpType {
    pub fn from_u8(t: u8) -> Option<OfpType> {
        use self::OfpType::*;
        Some(match t {
            0 => Hello,
            1 => Error,
            2 => EchoRequest,
            3 => EchoReply,
            4 => Experimenter,
            5 => FeaturesRequest,
            6 => FeaturesReply,
            7 => GetConfigRequest,
            8 => GetConfigReply,
            9 => SetConfig,
            10 => PacketIn,
            11 => FlowRemoved,
            12 => PortStatus,
            13 => PacketOut,
            14 => FlowMod,
            15 => GroupMod,
            16 => PortMod,
            17 => TableMod,
            18 => MultipartRequest,
            19 => MultipartReply,
            20 => BarrierRequest,
            21 => BarrierReply,
            22 => QueueGetConfigRequest,
            23 => QueueGetConfigReply,
            24 => RoleRequest,
            25 => RoleReply,
            26 => GetAsyncRequest,
            27 => GetAsyncReply,
            28 => SetAsync,
            29 => MeterMod,
            _ => return None,
        })
    }

    /// The request type a reply type answers
    pub fn request_type(&self) -> Option<OfpType> {
        use self::OfpType::*;
        match *self {
            EchoReply => Some(EchoRequest),
            FeaturesReply => Some(FeaturesRequest),
            GetConfigReply => Some(GetConfigRequest),
            MultipartReply => Some(MultipartRequest),
            BarrierReply => Some(BarrierRequest),
            QueueGetConfigReply => Some(QueueGetConfigRequest),
            RoleReply => Some(RoleRequest),
            GetAsyncReply => Some(GetAsyncRequest),
            _ => None,
        }
    }

    /// Messages a controller may send to a datapath
    pub fn is_controller_to_switch(&self) -> bool {
        use self::OfpType::*;
        match *self {
            FeaturesRequest | GetConfigRequest | SetConfig | PacketOut | FlowMod | GroupMod
            | PortMod | TableMod | MultipartRequest | BarrierRequest | RoleRequest
            | GetAsyncRequest | SetAsync | Error => true,
            _ => false,
        }
    }

    /// Messages a datapath may send to a controller
    pub fn is_switch_to_controller(&self) -> bool {
        use self::OfpType::*;
        match *self {
            FeaturesReply | GetConfigReply | PacketIn | FlowRemoved | PortStatus
            | MultipartReply | BarrierReply | RoleReply | GetAsyncReply | Error => true,
            _ => false,
        }
    }

    /// Messages that are always accepted regardless of the session state
    pub fn is_session_control(&self) -> bool {
        *self == OfpType::Hello || *self == OfpType::Error
    }
}

/// Header on all OpenFlow packets.
#[derive(Debug, Clone, PartialEq)]
pub struct OfpHeader {
    /// OFP_VERSION.
    version: u8,
    /// This packet's OfpType.
    typ: u8,
    /// This packet's length including this OfpHeader.
    length: u16,
    /// Transaction id associated with this packet.
    /// Replies use the same id as was in the request
    /// to facilitate pairing.
    xid: u32,
}

impl OfpHeader {
    /// Gets the packet's OpenFlow version
    pub fn version(&self) -> u8 {
        self.version
    }
    /// Gets this packet's `OfpType`'s numerical respresentation.
    pub fn typ(&self) -> u8 {
        self.typ
    }
    /// Gets the packet's length including the header
    pub fn length(&self) -> u16 {
        self.length
    }
    /// Gets the packet's transaction id
    pub fn xid(&self) -> u32 {
        self.xid
    }
}

/// A decoded OpenFlow message: version, transaction id and a typed body
#[derive(Debug, Clone, PartialEq)]
pub struct OfpMessage {
    version: u8,
    xid: u32,
    body: OfpBody,
}

impl OfpMessage {
    pub fn new(version: u8, xid: u32, body: OfpBody) -> OfpMessage {
        OfpMessage { version, xid, body }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn typ(&self) -> OfpType {
        self.body.typ()
    }

    pub fn body(&self) -> &OfpBody {
        &self.body
    }

    pub fn into_body(self) -> OfpBody {
        self.body
    }
}

impl fmt::Display for OfpMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}(version: 0x{:02x}, xid: 0x{:08x})",
            self.typ(),
            self.version,
            self.xid
        )
    }
}

/// The type specific part of an OpenFlow message
#[derive(Debug, Clone, PartialEq)]
pub enum OfpBody {
    Hello(OfpHello),
    Error(OfpErrorMsg),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(OfpSwitchFeatures),
    GetConfigRequest,
    GetConfigReply(OfpSwitchConfig),
    SetConfig(OfpSwitchConfig),
    PacketIn(OfpPacketIn),
    FlowRemoved(OfpFlowRemoved),
    PortStatus(OfpPortStatus),
    PacketOut(OfpPacketOut),
    FlowMod(OfpFlowMod),
    GroupMod(OfpGroupMod),
    PortMod(OfpPortMod),
    TableMod(OfpTableMod),
    MultipartRequest(OfpMultipartRequest),
    MultipartReply(OfpMultipartReply),
    BarrierRequest,
    BarrierReply,
    RoleRequest(OfpRole),
    RoleReply(OfpRole),
    GetAsyncRequest,
    GetAsyncReply(OfpAsyncConfig),
    SetAsync(OfpAsyncConfig),
}

impl OfpBody {
    pub fn typ(&self) -> OfpType {
        match *self {
            OfpBody::Hello(_) => OfpType::Hello,
            OfpBody::Error(_) => OfpType::Error,
            OfpBody::EchoRequest(_) => OfpType::EchoRequest,
            OfpBody::EchoReply(_) => OfpType::EchoReply,
            OfpBody::FeaturesRequest => OfpType::FeaturesRequest,
            OfpBody::FeaturesReply(_) => OfpType::FeaturesReply,
            OfpBody::GetConfigRequest => OfpType::GetConfigRequest,
            OfpBody::GetConfigReply(_) => OfpType::GetConfigReply,
            OfpBody::SetConfig(_) => OfpType::SetConfig,
            OfpBody::PacketIn(_) => OfpType::PacketIn,
            OfpBody::FlowRemoved(_) => OfpType::FlowRemoved,
            OfpBody::PortStatus(_) => OfpType::PortStatus,
            OfpBody::PacketOut(_) => OfpType::PacketOut,
            OfpBody::FlowMod(_) => OfpType::FlowMod,
            OfpBody::GroupMod(_) => OfpType::GroupMod,
            OfpBody::PortMod(_) => OfpType::PortMod,
            OfpBody::TableMod(_) => OfpType::TableMod,
            OfpBody::MultipartRequest(_) => OfpType::MultipartRequest,
            OfpBody::MultipartReply(_) => OfpType::MultipartReply,
            OfpBody::BarrierRequest => OfpType::BarrierRequest,
            OfpBody::BarrierReply => OfpType::BarrierReply,
            OfpBody::RoleRequest(_) => OfpType::RoleRequest,
            OfpBody::RoleReply(_) => OfpType::RoleReply,
            OfpBody::GetAsyncRequest => OfpType::GetAsyncRequest,
            OfpBody::GetAsyncReply(_) => OfpType::GetAsyncReply,
            OfpBody::SetAsync(_) => OfpType::SetAsync,
        }
    }
}

/* ## -------------------------- ## */
/* ## Symmetric messages.        ## */
/* ## -------------------------- ## */

/// Hello element types, 1.3 only.
pub const OFPHET_VERSIONBITMAP: u16 = 1;

/// OFPT_HELLO. This message includes zero or more hello elements having
/// variable size. Unknown elements types must be ignored/skipped, to allow
/// for future extensions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfpHello {
    /// Bitmap of the supported versions, bit n set means version n is supported.
    /// Only the first 32 versions can be announced.
    pub version_bitmap: Option<u32>,
}

impl OfpHello {
    /// Builds a HELLO announcing the given versions
    pub fn for_versions(versions: &[u8]) -> OfpHello {
        let bitmap = versions
            .iter()
            .filter(|v| **v < 32)
            .fold(0u32, |acc, v| acc | (1 << *v));
        OfpHello {
            version_bitmap: Some(bitmap),
        }
    }
}

/// Values for 'type' in `OfpErrorMsg`. These values are immutable: they will
/// not change in future versions of the protocol (although new values may be added).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpErrorType {
    /// Hello protocol failed.
    HelloFailed = 0,
    /// Request was not understood.
    BadRequest = 1,
    /// Error in action description.
    BadAction = 2,
    /// Error in instruction list.
    BadInstruction = 3,
    /// Error in match.
    BadMatch = 4,
    /// Problem modifying flow entry.
    FlowModFailed = 5,
    /// Problem modifying group entry.
    GroupModFailed = 6,
    /// Port mod request failed.
    PortModFailed = 7,
    /// Table mod request failed.
    TableModFailed = 8,
    /// Queue operation failed.
    QueueOpFailed = 9,
    /// Switch config request failed.
    SwitchConfigFailed = 10,
    /// Controller Role request failed.
    RoleRequestFailed = 11,
    /// Error in meter.
    MeterModFailed = 12,
    /// Setting table features failed.
    TableFeaturesFailed = 13,
    /// Experimenter error messages.
    Experimenter = 0xffff,
}

impl OfpErrorType {
    pub fn from_u16(t: u16) -> Option<OfpErrorType> {
        use self::OfpErrorType::*;
        Some(match t {
            0 => HelloFailed,
            1 => BadRequest,
            2 => BadAction,
            3 => BadInstruction,
            4 => BadMatch,
            5 => FlowModFailed,
            6 => GroupModFailed,
            7 => PortModFailed,
            8 => TableModFailed,
            9 => QueueOpFailed,
            10 => SwitchConfigFailed,
            11 => RoleRequestFailed,
            12 => MeterModFailed,
            13 => TableFeaturesFailed,
            0xffff => Experimenter,
            _ => return None,
        })
    }
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::HelloFailed`.
///
/// 'data' contains an ASCII text string that may give failure details.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpHelloFailedCode {
    /// No compatible version.
    Incompatible = 0,
    /// Permissions error.
    Eperm = 1,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::BadRequest`.
///
/// 'data' contains at least the first 64 bytes of the failed request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpBadRequestCode {
    /// ofp_header.version not supported.
    BadVersion = 0,
    /// ofp_header.type not supported.
    BadType = 1,
    /// ofp_multipart_request.type not supported.
    BadMultipart = 2,
    /// Experimenter id not supported.
    BadExperimenter = 3,
    /// Experimenter type not supported.
    BadExpType = 4,
    /// Permissions error.
    Eperm = 5,
    /// Wrong request length for type.
    BadLen = 6,
    /// Specified buffer has already been used.
    BufferEmpty = 7,
    /// Specified buffer does not exist.
    BufferUnknown = 8,
    /// Specified table-id invalid or does not exist.
    BadTableId = 9,
    /// Denied because controller is slave.
    IsSlave = 10,
    /// Invalid port.
    BadPort = 11,
    /// Invalid packet in packet-out.
    BadPacket = 12,
    /// ofp_multipart_request overflowed the assigned buffer.
    MultipartBufferOverflow = 13,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::BadAction`.
///
/// 'data' contains at least the first 64 bytes of the failed request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpBadActionCode {
    /// Unknown action type.
    BadType = 0,
    /// Length problem in actions.
    BadLen = 1,
    /// Unknown experimenter id specified.
    BadExperimenter = 2,
    /// Unknown action for experimenter id.
    BadExpType = 3,
    /// Problem validating output port.
    BadOutPort = 4,
    /// Bad action argument.
    BadArgument = 5,
    /// Permissions error.
    Eperm = 6,
    /// Can't handle this many actions.
    TooMany = 7,
    /// Problem validating output queue.
    BadQueue = 8,
    /// Invalid group id in forward action.
    BadOutGroup = 9,
    /// Action can't apply for this match, or Set-Field missing prerequisite.
    MatchInconsistent = 10,
    /// Action order is unsupported for the action list in an Apply-Actions instruction
    UnsupportedOrder = 11,
    /// Actions uses an unsupported tag/encap.
    BadTag = 12,
    /// Unsupported type in SET_FIELD action.
    BadSetType = 13,
    /// Length problem in SET_FIELD action.
    BadSetLen = 14,
    /// Bad argument in SET_FIELD action.
    BadSetArgument = 15,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::BadInstruction`.
///
/// 'data' contains at least the first 64 bytes of the failed request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpBadInstructionCode {
    /// Unknown instruction.
    UnknownInst = 0,
    /// Switch or table does not support the instruction.
    UnsupInst = 1,
    /// Invalid Table-ID specified.
    BadTableId = 2,
    /// Metadata value unsupported by datapath.
    UnsupMetadata = 3,
    /// Metadata mask value unsupported by datapath.
    UnsupMetadataMask = 4,
    /// Unknown experimenter id specified.
    BadExperimenter = 5,
    /// Unknown instruction for experimenter id.
    BadExpType = 6,
    /// Length problem in instructions.
    BadLen = 7,
    /// Permissions error.
    Eperm = 8,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::BadMatch`.
///
/// 'data' contains at least the first 64 bytes of the failed request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpBadMatchCode {
    /// Unsupported match type specified by the match
    BadType = 0,
    /// Length problem in match.
    BadLen = 1,
    /// Match uses an unsupported tag/encap.
    BadTag = 2,
    /// Unsupported datalink addr mask.
    BadDlAddrMask = 3,
    /// Unsupported network addr mask.
    BadNwAddrMask = 4,
    /// Unsupported combination of fields masked or omitted in the match.
    BadWildcards = 5,
    /// Unsupported field type in the match.
    BadField = 6,
    /// Unsupported value in a match field.
    BadValue = 7,
    /// Unsupported mask specified in the match.
    BadMask = 8,
    /// A prerequisite was not met.
    BadPrereq = 9,
    /// A field type was duplicated.
    DupField = 10,
    /// Permissions error.
    Eperm = 11,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::FlowModFailed`.
///
/// 'data' contains at least the first 64 bytes of the failed request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpFlowModFailedCode {
    /// Unspecified error.
    Unknown = 0,
    /// Flow not added because table was full.
    TableFull = 1,
    /// Table does not exist
    BadTableId = 2,
    /// Attempted to add overlapping flow with CHECK_OVERLAP flag set.
    Overlap = 3,
    /// Permissions error.
    Eperm = 4,
    /// Flow not added because of unsupported idle/hard timeout.
    BadTimeout = 5,
    /// Unsupported or unknown command.
    BadCommand = 6,
    /// Unsupported or unknown flags.
    BadFlags = 7,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::GroupModFailed`.
///
/// 'data' contains at least the first 64 bytes of the failed request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpGroupModFailedCode {
    /// Group not added because a group ADD attempted to replace an already-present group.
    GroupExists = 0,
    /// Group not added because Group specified is invalid.
    InvalidGroup = 1,
    /// Switch does not support unequal load sharing with select groups.
    WeightUnsupported = 2,
    /// The group table is full.
    OutOfGroups = 3,
    /// The maximum number of action buckets for a group has been exceeded.
    OutOfBuckets = 4,
    /// Switch does not support groups that forward to groups.
    ChainingUnsupported = 5,
    /// This group cannot watch the watch_port or watch_group specified.
    WatchUnsupported = 6,
    /// Group entry would cause a loop.
    Loop = 7,
    /// Group not modified because a group MODIFY attempted to modify a non-existent group.
    UnknownGroup = 8,
    /// Group not deleted because another group is forwarding to it.
    ChainedGroup = 9,
    /// Unsupported or unknown group type.
    BadType = 10,
    /// Unsupported or unknown command.
    BadCommand = 11,
    /// Error in bucket.
    BadBucket = 12,
    /// Error in watch port/group.
    BadWatch = 13,
    /// Permissions error.
    Eperm = 14,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::PortModFailed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpPortModFailedCode {
    /// Specified port number does not exist.
    BadPort = 0,
    /// Specified hardware address does not match the port number.
    BadHwAddr = 1,
    /// Specified config is invalid.
    BadConfig = 2,
    /// Specified advertise is invalid.
    BadAdvertise = 3,
    /// Permissions error.
    Eperm = 4,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::TableModFailed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpTableModFailedCode {
    /// Specified table does not exist.
    BadTable = 0,
    /// Specified config is invalid.
    BadConfig = 1,
    /// Permissions error.
    Eperm = 2,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::SwitchConfigFailed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpSwitchConfigFailedCode {
    /// Specified flags is invalid.
    BadFlags = 0,
    /// Specified len is invalid.
    BadLen = 1,
    /// Permissions error.
    Eperm = 2,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::RoleRequestFailed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpRoleRequestFailedCode {
    /// Stale Message: old generation_id.
    Stale = 0,
    /// Controller role change unsupported.
    Unsup = 1,
    /// Invalid role.
    BadRole = 2,
}

/// Error message (datapath -> controller).
#[derive(Debug, Clone, PartialEq)]
pub struct OfpErrorMsg {
    pub typ: u16,
    pub code: u16,
    /// Variable-length data. Interpreted based on the type and code. No padding.
    pub data: Vec<u8>,
}

impl OfpErrorMsg {
    fn first_64_bytes(frame: &[u8]) -> Vec<u8> {
        let len = if frame.len() < 64 { frame.len() } else { 64 };
        frame[..len].to_vec()
    }

    /// Constructs a Hello Failed error
    pub fn new_hello_failed(reason: &str) -> OfpErrorMsg {
        OfpErrorMsg {
            typ: OfpErrorType::HelloFailed as u16,
            code: OfpHelloFailedCode::Incompatible as u16,
            data: reason.as_bytes().to_vec(),
        }
    }

    /// Constructs the error reply for `error` that was caused by `frame`.
    /// Transport errors do not have a wire representation.
    pub fn from_error(error: &::openflow::error::Error, frame: &[u8]) -> Option<OfpErrorMsg> {
        error.wire_code().map(|(typ, code)| OfpErrorMsg {
            typ: typ as u16,
            code,
            data: Self::first_64_bytes(frame),
        })
    }

    /// Gets the error type, if known
    pub fn error_type(&self) -> Option<OfpErrorType> {
        OfpErrorType::from_u16(self.typ)
    }

    /// Checks if this `OfpErrorMsg` describes a failed version negotiation
    pub fn is_hello_failed(&self) -> bool {
        self.typ == OfpErrorType::HelloFailed as u16
    }

    /// Checks if this `OfpErrorMsg` describes the target OpenFlow Table being full
    pub fn check_table_full(&self) -> bool {
        self.typ == OfpErrorType::FlowModFailed as u16
            && self.code == OfpFlowModFailedCode::TableFull as u16
    }
}

impl fmt::Display for OfpErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.error_type() {
            Some(typ) => write!(f, "OpenFlow Error: {:?}, code({})", typ, self.code),
            None => write!(f, "OpenFlow Error: type({}), code({})", self.typ, self.code),
        }
    }
}

/* ## ---------------------------------- ## */
/* ## Switch configuration and features. ## */
/* ## ---------------------------------- ## */

/// Switch features.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfpSwitchFeatures {
    /// Datapath unique ID. The lower 48-bits are for
    /// a MAC address, while the upper 16-bits are
    /// implementer-defined.
    pub datapath_id: u64,
    /// Max packets buffered at once.
    pub n_buffers: u32,
    /// Number of tables supported by datapath.
    pub n_tables: u8,
    /// Identify auxiliary connections, 1.3 only.
    pub auxiliary_id: u8,
    /// Bitmap of support OFPC_* capabilities.
    pub capabilities: u32,
    pub reserved: u32,
    /// Port info, 1.2 only. 1.3 uses a port description multipart request.
    pub ports: Vec<OfpPort>,
}

/// Switch configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfpSwitchConfig {
    /// Bitmap of OFPC_* flags.
    pub flags: u16,
    /// Max bytes of packet that datapath
    /// should send to the controller.
    pub miss_send_len: u16,
}

impl Default for OfpSwitchConfig {
    fn default() -> Self {
        OfpSwitchConfig {
            flags: 0,
            miss_send_len: OFP_DEFAULT_MISS_SEND_LEN,
        }
    }
}

/// Maximum length of a port name, including the trailing zero
pub const OFP_MAX_PORT_NAME_LEN: usize = 16;

/// Description of a port
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OfpPort {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    /// Null-terminated on the wire
    pub name: String,
    /// Bitmap of OFPPC_* flags.
    pub config: u32,
    /// Bitmap of OFPPS_* flags.
    pub state: u32,
    /* Bitmaps of OFPPF_* that describe features. All bits zeroed if
     * unsupported or unavailable. */
    /// Current features.
    pub curr: u32,
    /// Features being advertised by the port.
    pub advertised: u32,
    /// Features supported by the port.
    pub supported: u32,
    /// Features advertised by peer.
    pub peer: u32,
    /// Current port bitrate in kbps.
    pub curr_speed: u32,
    /// Max port bitrate in kbps
    pub max_speed: u32,
}

impl OfpPort {
    /// Checks whether the port may be used by a fast failover bucket
    pub fn is_live(&self) -> bool {
        self.config & OFPPC_PORT_DOWN == 0 && self.state & OFPPS_LINK_DOWN == 0
    }
}

/// What changed about the physical port
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpPortReason {
    /// The port was added.
    Add = 0,
    /// The port was removed.
    Delete = 1,
    /// Some attribute of the port has changed.
    Modify = 2,
}

impl OfpPortReason {
    pub fn from_u8(r: u8) -> Option<OfpPortReason> {
        match r {
            0 => Some(OfpPortReason::Add),
            1 => Some(OfpPortReason::Delete),
            2 => Some(OfpPortReason::Modify),
            _ => None,
        }
    }
}

/// A physical port has changed in the datapath
#[derive(Debug, Clone, PartialEq)]
pub struct OfpPortStatus {
    /// One of OfpPortReason.
    pub reason: OfpPortReason,
    pub desc: OfpPort,
}

/// Modify behavior of the physical port
#[derive(Debug, Clone, PartialEq)]
pub struct OfpPortMod {
    pub port_no: u32,
    /// The hardware address is not configurable.
    /// This is used to sanity-check the request,
    /// so it must be the same as returned in an ofp_port struct.
    pub hw_addr: [u8; 6],
    /// Bitmap of OFPPC_* flags.
    pub config: u32,
    /// Bitmap of OFPPC_* flags to be changed.
    pub mask: u32,
    /// Bitmap of OFPPF_*. Zero all bits to prevent any action taking place.
    pub advertise: u32,
}

/// Configure/Modify behavior of a flow table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfpTableMod {
    /// ID of the table, OFPTT_ALL indicates all tables
    pub table_id: u8,
    /// Bitmap of OFPTC_* flags
    pub config: u32,
}

/* ## ------------------------- ## */
/* ## Asynchronous messages.    ## */
/* ## ------------------------- ## */

/// Why is this packet being sent to the controller?
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpPacketInReason {
    /// No matching flow (table-miss flow entry).
    NoMatch = 0,
    /// Action explicitly output to controller.
    Action = 1,
    /// Packet has invalid TTL
    InvalidTtl = 2,
}

impl OfpPacketInReason {
    pub fn from_u8(r: u8) -> Option<OfpPacketInReason> {
        match r {
            0 => Some(OfpPacketInReason::NoMatch),
            1 => Some(OfpPacketInReason::Action),
            2 => Some(OfpPacketInReason::InvalidTtl),
            _ => None,
        }
    }
}

/// Packet received on port (datapath -> controller).
#[derive(Debug, Clone, PartialEq)]
pub struct OfpPacketIn {
    /// ID assigned by datapath.
    pub buffer_id: u32,
    /// Full length of frame.
    pub total_len: u16,
    /// Reason packet is being sent (one of OfpPacketInReason)
    pub reason: OfpPacketInReason,
    /// ID of the table that was looked up
    pub table_id: u8,
    /// Cookie of the flow entry that was looked up, 1.3 only.
    pub cookie: u64,
    /// Packet metadata. Variable size.
    pub match_field: OfpMatch,
    /// Ethernet frame
    pub data: Vec<u8>,
}

/// Why was this flow removed?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfpFlowRemovedReason {
    /// Flow idle time exceeded idle_timeout.
    IdleTimeout = 0,
    /// Time exceeded hard_timeout.
    HardTimeout = 1,
    /// Evicted by a DELETE flow mod.
    Delete = 2,
    /// Group was removed.
    GroupDelete = 3,
}

impl OfpFlowRemovedReason {
    pub fn from_u8(r: u8) -> Option<OfpFlowRemovedReason> {
        match r {
            0 => Some(OfpFlowRemovedReason::IdleTimeout),
            1 => Some(OfpFlowRemovedReason::HardTimeout),
            2 => Some(OfpFlowRemovedReason::Delete),
            3 => Some(OfpFlowRemovedReason::GroupDelete),
            _ => None,
        }
    }
}

/// Flow removed (datapath -> controller).
#[derive(Debug, Clone, PartialEq)]
pub struct OfpFlowRemoved {
    /// Opaque controller-issued identifier.
    pub cookie: u64,
    /// Priority level of flow entry.
    pub priority: u16,
    /// One of OfpFlowRemovedReason.
    pub reason: OfpFlowRemovedReason,
    /// ID of the table
    pub table_id: u8,
    /// Time flow was alive in seconds.
    pub duration_sec: u32,
    /// Time flow was alive in nanoseconds beyond duration_sec.
    pub duration_nsec: u32,
    /// Idle timeout from original flow mod.
    pub idle_timeout: u16,
    /// Hard timeout from original flow mod.
    pub hard_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    /// Description of fields. Variable size.
    pub match_field: OfpMatch,
}

/// Send packet (controller -> datapath).
#[derive(Debug, Clone, PartialEq)]
pub struct OfpPacketOut {
    /// ID assigned by datapath (OFP_NO_BUFFER if none).
    pub buffer_id: u32,
    /// Packet's input port or OFPP_CONTROLLER.
    pub in_port: u32,
    /// Action list - 0 or more.
    pub actions: Vec<OfpAction>,
    /// Packet data. The length is inferred from the length field in the header.
    /// (Only meaningful if buffer_id == OFP_NO_BUFFER.)
    pub data: Vec<u8>,
}

/* ## --------------------------- ## */
/* ## OpenFlow Flow Modification. ## */
/* ## --------------------------- ## */

/// The command that is embedded in a flow mod message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpFlowModCommand {
    /// New flow.
    Add = 0,
    /// Modify all matching flows.
    Modify = 1,
    /// Modify entry strictly matching wildcards and priority.
    ModifyStrict = 2,
    /// Delete all matching flows.
    Delete = 3,
    /// Delete entry strictly matching wildcards and priority.
    DeleteStrict = 4,
}

impl OfpFlowModCommand {
    pub fn from_u8(c: u8) -> Option<OfpFlowModCommand> {
        use self::OfpFlowModCommand::*;
        Some(match c {
            0 => Add,
            1 => Modify,
            2 => ModifyStrict,
            3 => Delete,
            4 => DeleteStrict,
            _ => return None,
        })
    }

    /// The strict variants require identical match and priority
    pub fn is_strict(&self) -> bool {
        *self == OfpFlowModCommand::ModifyStrict || *self == OfpFlowModCommand::DeleteStrict
    }
}

/// Flow setup and teardown (controller -> datapath).
#[derive(Debug, Clone, PartialEq)]
pub struct OfpFlowMod {
    /// Opaque controller-issued identifier.
    pub cookie: u64,
    /// Mask used to restrict the cookie bits
    /// that must match when the command is
    /// OfpFlowModCommand::Modify* or OfpFlowModCommand::Delete*.
    /// A value of 0 indicates no restriction.
    pub cookie_mask: u64,
    /// ID of the table to put the flow in.
    /// For OfpFlowModCommand::Delete* commands,
    /// OFPTT_ALL can also be used to delete
    /// matching flows from all tables.
    pub table_id: u8,
    /// One of OfpFlowModCommand.
    pub command: OfpFlowModCommand,
    /// Idle time before discarding (seconds).
    pub idle_timeout: u16,
    /// Max time before discarding (seconds).
    pub hard_timeout: u16,
    /// Priority level of flow entry.
    pub priority: u16,
    /// Buffered packet to apply to, or
    /// OFP_NO_BUFFER.
    /// Not meaningful for OfpFlowModCommand::Delete*.
    pub buffer_id: u32,
    /// For OfpFlowModCommand::Delete* commands, require
    /// matching entries to include this as an
    /// output port.  A value of OFPP_ANY
    /// indicates no restriction.
    pub out_port: u32,
    /// For OfpFlowModCommand::Delete* commands, require
    /// matching entries to include this as an
    /// output group.  A value of OFPG_ANY
    /// indicates no restriction.
    pub out_group: u32,
    /// Bitmap of OFPFF_* flags.
    pub flags: u16,
    /// Fields to match. Variable size.
    pub match_field: OfpMatch,

    /* The variable size and padded match is always followed by instructions. */
    /// Instruction set - 0 or more.
    /// The length of the instruction
    /// set is inferred from the
    /// length field in the header.
    pub instructions: Vec<OfpInstruction>,
}

impl OfpFlowMod {
    /// Constructs an `OfpFlowMod` with the given fields.
    /// The other fields are set to their neutral value.
    pub fn new(
        command: OfpFlowModCommand,
        table_id: u8,
        priority: u16,
        match_field: OfpMatch,
        instructions: Vec<OfpInstruction>,
    ) -> OfpFlowMod {
        OfpFlowMod {
            cookie: 0,
            cookie_mask: 0,
            table_id,
            command,
            idle_timeout: OFP_FLOW_PERMANENT,
            hard_timeout: OFP_FLOW_PERMANENT,
            priority,
            buffer_id: OFP_NO_BUFFER,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            flags: 0,
            match_field,
            instructions,
        }
    }
}

/* ## ---------------------------- ## */
/* ## OpenFlow Group Modification. ## */
/* ## ---------------------------- ## */

/// Group commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpGroupModCommand {
    /// New group.
    Add = 0,
    /// Modify all matching groups.
    Modify = 1,
    /// Delete all matching groups.
    Delete = 2,
}

impl OfpGroupModCommand {
    pub fn from_u16(c: u16) -> Option<OfpGroupModCommand> {
        match c {
            0 => Some(OfpGroupModCommand::Add),
            1 => Some(OfpGroupModCommand::Modify),
            2 => Some(OfpGroupModCommand::Delete),
            _ => None,
        }
    }
}

/// Group types. Values in the range [128, 255] are reserved for experimental use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfpGroupType {
    /// All (multicast/broadcast) group.
    All = 0,
    /// Select group.
    Select = 1,
    /// Indirect group.
    Indirect = 2,
    /// Fast failover group.
    FastFailover = 3,
}

impl OfpGroupType {
    pub fn from_u8(t: u8) -> Option<OfpGroupType> {
        match t {
            0 => Some(OfpGroupType::All),
            1 => Some(OfpGroupType::Select),
            2 => Some(OfpGroupType::Indirect),
            3 => Some(OfpGroupType::FastFailover),
            _ => None,
        }
    }
}

/// Group setup and teardown (controller -> datapath).
#[derive(Debug, Clone, PartialEq)]
pub struct OfpGroupMod {
    /// One of OfpGroupModCommand.
    pub command: OfpGroupModCommand,
    /// One of OfpGroupType.
    pub group_type: OfpGroupType,
    /// Group identifier.
    pub group_id: u32,
    /// The length of the bucket array is inferred from the length field in the header.
    pub buckets: Vec<OfpBucket>,
}

/* ## ---------------------- ## */
/* ## Controller roles.      ## */
/* ## ---------------------- ## */

/// Controller roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfpControllerRole {
    /// Don't change current role.
    NoChange = 0,
    /// Default role, full access.
    Equal = 1,
    /// Full access, at most one master.
    Master = 2,
    /// Read-only access.
    Slave = 3,
}

impl OfpControllerRole {
    pub fn from_u32(r: u32) -> Option<OfpControllerRole> {
        match r {
            0 => Some(OfpControllerRole::NoChange),
            1 => Some(OfpControllerRole::Equal),
            2 => Some(OfpControllerRole::Master),
            3 => Some(OfpControllerRole::Slave),
            _ => None,
        }
    }
}

/// Role request and reply message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfpRole {
    /// One of OfpControllerRole.
    pub role: OfpControllerRole,
    /// Master Election Generation Id
    pub generation_id: u64,
}

/// Asynchronous message configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfpAsyncConfig {
    /// Bitmasks of OFPR_* values.
    pub packet_in_mask: [u32; 2],
    /// Bitmasks of OFPPR_* values.
    pub port_status_mask: [u32; 2],
    /// Bitmasks of OFPRR_* values.
    pub flow_removed_mask: [u32; 2],
}

impl Default for OfpAsyncConfig {
    /// Index 0 applies to master and equal controllers, index 1 to slaves
    fn default() -> Self {
        OfpAsyncConfig {
            packet_in_mask: [0b011, 0],
            port_status_mask: [0b111, 0b111],
            flow_removed_mask: [0b1111, 0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_numbers() {
        for t in 0..30 {
            assert_eq!(t, OfpType::from_u8(t).unwrap() as u8);
        }
        assert!(OfpType::from_u8(30).is_none());
    }

    #[test]
    fn reply_types() {
        assert_eq!(
            Some(OfpType::FeaturesRequest),
            OfpType::FeaturesReply.request_type()
        );
        assert_eq!(
            Some(OfpType::MultipartRequest),
            OfpType::MultipartReply.request_type()
        );
        assert_eq!(None, OfpType::PacketIn.request_type());
    }

    #[test]
    fn directions() {
        assert!(OfpType::FlowMod.is_controller_to_switch());
        assert!(!OfpType::FlowMod.is_switch_to_controller());
        assert!(OfpType::PacketIn.is_switch_to_controller());
        assert!(!OfpType::Hello.is_controller_to_switch());
    }

    #[test]
    fn hello_bitmap() {
        let hello = OfpHello::for_versions(&[OFP_VERSION_12, OFP_VERSION_13]);
        assert_eq!(Some(0b11000), hello.version_bitmap);
    }

    #[test]
    fn error_from_protocol_error() {
        let err = ::openflow::error::Error::bad_len();
        let frame = vec![7; 100];
        let msg = OfpErrorMsg::from_error(&err, &frame).unwrap();
        assert_eq!(1, msg.typ);
        assert_eq!(6, msg.code);
        assert_eq!(64, msg.data.len());
    }
}
