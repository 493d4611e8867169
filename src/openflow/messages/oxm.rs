/*!
The OpenFlow Extensible Match (OXM)

A match is a set of OXM TLVs, at most one per field. Besides the wire
format this module implements the two questions flow tables ask about
matches: how well does a match hit a packet, and do two matches overlap.
*/

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use ipnetwork::Ipv4Network;
use openflow::error::{Error, Result};
use openflow::messages::codec::{pad_len, Codec, WireReader};
use openflow::messages::{OfpBadMatchCode, ProtocolEndpoint};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::io::Write;
use std::net::Ipv4Addr;

/// The match type indicates the match structure (set of fields that compose the match) in use.
///
/// The match type is placed in the type field at the beginning
/// of all match structures. The "OpenFlow Extensible Match" type corresponds
/// to OXM TLV format described below and must be supported by all OpenFlow
/// switches.
pub const OFPMT_OXM: u16 = 1;

/// OXM Class IDs.
/// Basic class for OpenFlow, the only class that is supported.
pub const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;

/// Bit that indicate that a VLAN id is set.
pub const OFPVID_PRESENT: u16 = 0x1000;
/// No VLAN id was set.
pub const OFPVID_NONE: u16 = 0x0000;

/// OXM Flow match field types for OpenFlow basic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OxmField {
    /// Switch input port.
    InPort = 0,
    /// Switch physical input port.
    InPhyPort = 1,
    /// Metadata passed between tables.
    Metadata = 2,
    /// Ethernet destination address.
    EthDst = 3,
    /// Ethernet source address.
    EthSrc = 4,
    /// Ethernet frame type.
    EthType = 5,
    /// VLAN id.
    VlanVid = 6,
    /// VLAN priority.
    VlanPcp = 7,
    /// IP DSCP (6 bits in ToS field).
    IpDscp = 8,
    /// IP ECN (2 bits in ToS field).
    IpEcn = 9,
    /// IP protocol.
    IpProto = 10,
    /// IPv4 source address.
    Ipv4Src = 11,
    /// IPv4 destination address.
    Ipv4Dst = 12,
    /// TCP source port.
    TcpSrc = 13,
    /// TCP destination port.
    TcpDst = 14,
    /// UDP source port.
    UdpSrc = 15,
    /// UDP destination port.
    UdpDst = 16,
    /// SCTP source port.
    SctpSrc = 17,
    /// SCTP destination port.
    SctpDst = 18,
    /// ICMP type.
    Icmpv4Type = 19,
    /// ICMP code.
    Icmpv4Code = 20,
    /// ARP opcode.
    ArpOp = 21,
    /// ARP source IPv4 address.
    ArpSpa = 22,
    /// ARP target IPv4 address.
    ArpTpa = 23,
    /// ARP source hardware address.
    ArpSha = 24,
    /// ARP target hardware address.
    ArpTha = 25,
    /// IPv6 source address.
    Ipv6Src = 26,
    /// IPv6 destination address.
    Ipv6Dst = 27,
    /// IPv6 Flow Label
    Ipv6Flabel = 28,
    /// ICMPv6 type.
    Icmpv6Type = 29,
    /// ICMPv6 code.
    Icmpv6Code = 30,
    /// Target address for ND.
    Ipv6NdTarget = 31,
    /// Source link-layer for ND.
    Ipv6NdSll = 32,
    /// Target link-layer for ND.
    Ipv6NdTll = 33,
    /// MPLS label.
    MplsLabel = 34,
    /// MPLS TC.
    MplsTc = 35,
    /// MPLS BoS bit.
    MplsBos = 36,
    /// PBB I-SID.
    PbbIsid = 37,
    /// Logical Port Metadata.
    TunnelId = 38,
    /// IPv6 Extension Header pseudo-field
    Ipv6Exthdr = 39,
}

impl OxmField {
    pub fn from_u8(f: u8) -> Option<OxmField> {
        use self::OxmField::*;
        Some(match f {
            0 => InPort,
            1 => InPhyPort,
            2 => Metadata,
            3 => EthDst,
            4 => EthSrc,
            5 => EthType,
            6 => VlanVid,
            7 => VlanPcp,
            8 => IpDscp,
            9 => IpEcn,
            10 => IpProto,
            11 => Ipv4Src,
            12 => Ipv4Dst,
            13 => TcpSrc,
            14 => TcpDst,
            15 => UdpSrc,
            16 => UdpDst,
            17 => SctpSrc,
            18 => SctpDst,
            19 => Icmpv4Type,
            20 => Icmpv4Code,
            21 => ArpOp,
            22 => ArpSpa,
            23 => ArpTpa,
            24 => ArpSha,
            25 => ArpTha,
            26 => Ipv6Src,
            27 => Ipv6Dst,
            28 => Ipv6Flabel,
            29 => Icmpv6Type,
            30 => Icmpv6Code,
            31 => Ipv6NdTarget,
            32 => Ipv6NdSll,
            33 => Ipv6NdTll,
            34 => MplsLabel,
            35 => MplsTc,
            36 => MplsBos,
            37 => PbbIsid,
            38 => TunnelId,
            39 => Ipv6Exthdr,
            _ => return None,
        })
    }

    /// The length of the field's value in bytes, without mask
    pub fn value_len(&self) -> usize {
        use self::OxmField::*;
        match *self {
            VlanPcp | IpDscp | IpEcn | IpProto | Icmpv4Type | Icmpv4Code | Icmpv6Type
            | Icmpv6Code | MplsTc | MplsBos => 1,
            EthType | VlanVid | TcpSrc | TcpDst | UdpSrc | UdpDst | SctpSrc | SctpDst | ArpOp
            | Ipv6Exthdr => 2,
            PbbIsid => 3,
            InPort | InPhyPort | Ipv4Src | Ipv4Dst | ArpSpa | ArpTpa | Ipv6Flabel | MplsLabel => 4,
            EthDst | EthSrc | ArpSha | ArpTha | Ipv6NdSll | Ipv6NdTll => 6,
            Metadata | TunnelId => 8,
            Ipv6Src | Ipv6Dst | Ipv6NdTarget => 16,
        }
    }

    /// Whether the field may carry a mask
    pub fn maskable(&self) -> bool {
        use self::OxmField::*;
        match *self {
            Metadata | EthDst | EthSrc | VlanVid | Ipv4Src | Ipv4Dst | ArpSpa | ArpTpa
            | ArpSha | ArpTha | Ipv6Src | Ipv6Dst | Ipv6Flabel | PbbIsid | TunnelId
            | Ipv6Exthdr => true,
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        use self::OxmField::*;
        match *self {
            InPort => "in_port",
            InPhyPort => "in_phy_port",
            Metadata => "metadata",
            EthDst => "eth_dst",
            EthSrc => "eth_src",
            EthType => "eth_type",
            VlanVid => "vlan_vid",
            VlanPcp => "vlan_pcp",
            IpDscp => "ip_dscp",
            IpEcn => "ip_ecn",
            IpProto => "ip_proto",
            Ipv4Src => "ipv4_src",
            Ipv4Dst => "ipv4_dst",
            TcpSrc => "tcp_src",
            TcpDst => "tcp_dst",
            UdpSrc => "udp_src",
            UdpDst => "udp_dst",
            SctpSrc => "sctp_src",
            SctpDst => "sctp_dst",
            Icmpv4Type => "icmpv4_type",
            Icmpv4Code => "icmpv4_code",
            ArpOp => "arp_op",
            ArpSpa => "arp_spa",
            ArpTpa => "arp_tpa",
            ArpSha => "arp_sha",
            ArpTha => "arp_tha",
            Ipv6Src => "ipv6_src",
            Ipv6Dst => "ipv6_dst",
            Ipv6Flabel => "ipv6_flabel",
            Icmpv6Type => "icmpv6_type",
            Icmpv6Code => "icmpv6_code",
            Ipv6NdTarget => "ipv6_nd_target",
            Ipv6NdSll => "ipv6_nd_sll",
            Ipv6NdTll => "ipv6_nd_tll",
            MplsLabel => "mpls_label",
            MplsTc => "mpls_tc",
            MplsBos => "mpls_bos",
            PbbIsid => "pbb_isid",
            TunnelId => "tunnel_id",
            Ipv6Exthdr => "ipv6_exthdr",
        }
    }
}

/// An OpenFlow TLV (Type, Length, Value) for
/// the OpenFlow Extensible Match format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfpOxmTlv {
    field: OxmField,
    /// Always stored with the mask applied
    value: Vec<u8>,
    /// `None` for an exact match
    mask: Option<Vec<u8>>,
}

/// Construction of an OXM TLV.
impl OfpOxmTlv {
    /// An exact match on `field`
    pub fn new(field: OxmField, value: Vec<u8>) -> OfpOxmTlv {
        OfpOxmTlv {
            field,
            value,
            mask: None,
        }
    }

    /// A masked match on `field`. The value is normalized to the mask and
    /// an all-ones mask degrades to an exact match.
    pub fn new_masked(field: OxmField, value: Vec<u8>, mask: Vec<u8>) -> OfpOxmTlv {
        if mask.iter().all(|b| *b == 0xff) {
            return OfpOxmTlv::new(field, value);
        }
        let value = value.iter().zip(&mask).map(|(v, m)| v & m).collect();
        OfpOxmTlv {
            field,
            value,
            mask: Some(mask),
        }
    }

    /// OpenFlow port on which the packet was received.
    /// May be a physical port, a logical port, or the reserved port OFPP_LOCAL
    /// Prereqs: None.
    /// Format: 32-bit integer in network byte order.
    pub fn new_in_port(in_port: u32) -> OfpOxmTlv {
        let mut port_bytes = vec![0; 4];
        NetworkEndian::write_u32(&mut port_bytes, in_port);
        OfpOxmTlv::new(OxmField::InPort, port_bytes)
    }

    /// Table metadata.
    /// Prereqs: None.
    /// Format: 64-bit integer in network byte order.
    /// Masking: Arbitrary masks.
    pub fn new_metadata(metadata: u64, mask: u64) -> OfpOxmTlv {
        let mut value = vec![0; 8];
        NetworkEndian::write_u64(&mut value, metadata);
        let mut mask_bytes = vec![0; 8];
        NetworkEndian::write_u64(&mut mask_bytes, mask);
        OfpOxmTlv::new_masked(OxmField::Metadata, value, mask_bytes)
    }

    /// Source or destination address in Ethernet header.
    /// Prereqs: None.
    /// Format: 48-bit Ethernet MAC address.
    pub fn new_eth_addr(addr: [u8; 6], endpoint: &ProtocolEndpoint) -> OfpOxmTlv {
        let field = match *endpoint {
            ProtocolEndpoint::Src => OxmField::EthSrc,
            ProtocolEndpoint::Dst => OxmField::EthDst,
        };
        OfpOxmTlv::new(field, addr.to_vec())
    }

    /// Packet's Ethernet type.
    /// Prereqs: None.
    /// Format: 16-bit integer in network byte order.
    pub fn new_eth_type(eth_type: u16) -> OfpOxmTlv {
        let mut value = vec![0; 2];
        NetworkEndian::write_u16(&mut value, eth_type);
        OfpOxmTlv::new(OxmField::EthType, value)
    }

    /// 802.1Q VID, OFPVID_NONE to match packets without a VLAN tag.
    /// Prereqs: None.
    /// Format: 16-bit integer in network byte order with bit 13 indicating presence of VLAN header
    pub fn new_vlan_vid(vid: u16) -> OfpOxmTlv {
        let mut value = vec![0; 2];
        NetworkEndian::write_u16(&mut value, vid);
        OfpOxmTlv::new(OxmField::VlanVid, value)
    }

    /// The "protocol" byte in the IP header.
    /// Prereqs: OxmField::EthType must be either 0x0800 or 0x86dd.
    /// Format: 8-bit integer.
    pub fn new_ip_proto(proto: u8) -> OfpOxmTlv {
        OfpOxmTlv::new(OxmField::IpProto, vec![proto])
    }

    /// The source or destination address in the IP header.
    /// Prereqs: OxmField::EthType must match 0x0800 exactly.
    /// Format: 32-bit integer in network byte order.
    /// Masking: Arbitrary masks.
    pub fn new_ipv4(cidr: &Ipv4Network, endpoint: &ProtocolEndpoint) -> OfpOxmTlv {
        let field = match *endpoint {
            ProtocolEndpoint::Src => OxmField::Ipv4Src,
            ProtocolEndpoint::Dst => OxmField::Ipv4Dst,
        };
        OfpOxmTlv::new_masked(
            field,
            cidr.network().octets().to_vec(),
            cidr.mask().octets().to_vec(),
        )
    }

    /// The source or destination port in the TCP header.
    /// Prereqs:
    /// OxmField::EthType must be either 0x0800 or 0x86dd.
    /// OxmField::IpProto must match 6 exactly.
    /// Format: 16-bit integer in network byte order.
    pub fn new_tcp_port(port: u16, endpoint: &ProtocolEndpoint) -> OfpOxmTlv {
        let field = match *endpoint {
            ProtocolEndpoint::Src => OxmField::TcpSrc,
            ProtocolEndpoint::Dst => OxmField::TcpDst,
        };
        let mut port_bytes = vec![0; 2];
        NetworkEndian::write_u16(&mut port_bytes, port);
        OfpOxmTlv::new(field, port_bytes)
    }

    /// The source or destination port in the UDP header.
    /// Prereqs:
    /// OxmField::EthType must be either 0x0800 or 0x86dd.
    /// OxmField::IpProto must match 17 exactly.
    /// Format: 16-bit integer in network byte order.
    pub fn new_udp_port(port: u16, endpoint: &ProtocolEndpoint) -> OfpOxmTlv {
        let field = match *endpoint {
            ProtocolEndpoint::Src => OxmField::UdpSrc,
            ProtocolEndpoint::Dst => OxmField::UdpDst,
        };
        let mut port_bytes = vec![0; 2];
        NetworkEndian::write_u16(&mut port_bytes, port);
        OfpOxmTlv::new(field, port_bytes)
    }

    pub fn field(&self) -> OxmField {
        self.field
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn mask(&self) -> Option<&[u8]> {
        self.mask.as_ref().map(|m| m.as_slice())
    }

    pub fn is_exact(&self) -> bool {
        self.mask.is_none()
    }

    /// The value interpreted as big-endian unsigned integer, for fields up to 8 bytes
    pub fn value_u64(&self) -> u64 {
        self.value
            .iter()
            .take(8)
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    fn mask_byte(&self, i: usize) -> u8 {
        match self.mask {
            Some(ref m) => m[i],
            None => 0xff,
        }
    }

    /// Checks whether a concrete packet value satisfies this TLV
    pub fn matches_value(&self, value: &[u8]) -> bool {
        value.len() == self.value.len()
            && value
                .iter()
                .enumerate()
                .all(|(i, v)| v & self.mask_byte(i) == self.value[i])
    }

    /// Checks whether a value exists that satisfies both TLVs
    fn compatible(&self, other: &OfpOxmTlv) -> bool {
        self.value.len() == other.value.len()
            && (0..self.value.len()).all(|i| {
                (self.value[i] ^ other.value[i]) & self.mask_byte(i) & other.mask_byte(i) == 0
            })
    }
}

impl Codec for OfpOxmTlv {
    fn length(&self) -> usize {
        let mask_len = self.mask.as_ref().map(|m| m.len()).unwrap_or(0);
        4 + self.value.len() + mask_len
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        let class = u32::from(OFPXMC_OPENFLOW_BASIC);
        let hasmask_u32 = if self.mask.is_some() { 1 } else { 0 };
        let header = (class << 16) | ((self.field as u32) << 9) | (hasmask_u32 << 8)
            | (self.length() - 4) as u32;
        stream.write_u32::<NetworkEndian>(header)?;
        stream.write_all(&self.value)?;
        if let Some(ref mask) = self.mask {
            stream.write_all(mask)?;
        }
        Ok(())
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpOxmTlv> {
        let header = reader.u32()?;
        let class = (header >> 16) as u16;
        let field = ((header >> 9) & 0x7f) as u8;
        let hasmask = (header >> 8) & 1 == 1;
        let len = (header & 0xff) as usize;

        let body = reader.bytes(len)?;
        if class != OFPXMC_OPENFLOW_BASIC {
            return Err(Error::BadMatch(OfpBadMatchCode::BadField));
        }
        let field = OxmField::from_u8(field).ok_or(Error::BadMatch(OfpBadMatchCode::BadField))?;
        let value_len = field.value_len();
        let expected = if hasmask { 2 * value_len } else { value_len };
        if len != expected {
            return Err(Error::BadMatch(OfpBadMatchCode::BadLen));
        }
        if hasmask && !field.maskable() {
            return Err(Error::BadMatch(OfpBadMatchCode::BadMask));
        }

        let value = body[..value_len].to_vec();
        Ok(if hasmask {
            OfpOxmTlv::new_masked(field, value, body[value_len..].to_vec())
        } else {
            OfpOxmTlv::new(field, value)
        })
    }
}

impl fmt::Display for OfpOxmTlv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}=", self.field.name())?;
        match self.field {
            OxmField::Ipv4Src | OxmField::Ipv4Dst | OxmField::ArpSpa | OxmField::ArpTpa => {
                let addr = Ipv4Addr::new(self.value[0], self.value[1], self.value[2], self.value[3]);
                match self.mask {
                    None => write!(f, "{}", addr),
                    Some(ref m) => {
                        let mask = NetworkEndian::read_u32(m);
                        let prefix = (!mask).leading_zeros();
                        match Ipv4Network::new(addr, prefix as u8) {
                            Ok(ref net) if mask.count_ones() == prefix => write!(f, "{}", net),
                            _ => write!(f, "{}/{}", addr, Ipv4Addr::from(mask)),
                        }
                    }
                }
            }
            OxmField::EthDst
            | OxmField::EthSrc
            | OxmField::ArpSha
            | OxmField::ArpTha
            | OxmField::Ipv6NdSll
            | OxmField::Ipv6NdTll => {
                let hex: Vec<String> = self.value.iter().map(|b| format!("{:02x}", b)).collect();
                write!(f, "{}", hex.join(":"))?;
                if let Some(ref m) = self.mask {
                    let hex: Vec<String> = m.iter().map(|b| format!("{:02x}", b)).collect();
                    write!(f, "/{}", hex.join(":"))?;
                }
                Ok(())
            }
            _ if self.value.len() <= 8 => {
                write!(f, "0x{:x}", self.value_u64())?;
                if let Some(ref m) = self.mask {
                    let mask = m.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                    write!(f, "/0x{:x}", mask)?;
                }
                Ok(())
            }
            _ => write!(f, "{:?}", self.value),
        }
    }
}

/// The result of matching a packet's field values against a match.
///
/// Every field the packet carries is either an exact hit, a wildcard hit
/// (masked or not constrained by the match) or a miss. Fields the match
/// constrains but the packet does not carry are misses as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hits {
    pub exact: usize,
    pub wildcard: usize,
    pub missed: usize,
}

impl Hits {
    pub fn total(&self) -> usize {
        self.exact + self.wildcard
    }
}

/// Fields to match against flows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OfpMatch {
    /* On the wire followed by:
     *   - Exactly (length - 4) (possibly 0) bytes containing OXM TLVs, then
     *   - Exactly ((length + 7)/8*8 - length) (between 0 and 7) bytes of
     *     all-zero bytes
     * In summary, OfpMatch is padded as needed, to make its overall size
     * a multiple of 8, to preserve alignment in structures using it.
     */
    /// 0 or more OXM match fields
    oxm_fields: BTreeMap<OxmField, OfpOxmTlv>,
}

impl OfpMatch {
    /// Constructs an empty match.
    pub fn new() -> OfpMatch {
        OfpMatch::default()
    }

    /// Adds a single match field to the match, replacing a previous TLV of the same field.
    pub fn add_tlv(&mut self, oxm_tlv: OfpOxmTlv) -> &mut OfpMatch {
        self.oxm_fields.insert(oxm_tlv.field, oxm_tlv);
        self
    }

    /// Builder variant of `add_tlv`
    pub fn with(mut self, oxm_tlv: OfpOxmTlv) -> OfpMatch {
        self.add_tlv(oxm_tlv);
        self
    }

    pub fn remove(&mut self, field: OxmField) -> Option<OfpOxmTlv> {
        self.oxm_fields.remove(&field)
    }

    pub fn get(&self, field: OxmField) -> Option<&OfpOxmTlv> {
        self.oxm_fields.get(&field)
    }

    pub fn tlvs(&self) -> impl Iterator<Item = &OfpOxmTlv> {
        self.oxm_fields.values()
    }

    pub fn len(&self) -> usize {
        self.oxm_fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oxm_fields.is_empty()
    }

    /// The value of the in_port field, if present
    pub fn in_port(&self) -> Option<u32> {
        self.get(OxmField::InPort).map(|t| t.value_u64() as u32)
    }

    /// Length of OfpMatch (excluding padding), the value of its length field
    pub fn oxm_length(&self) -> usize {
        4 + self.oxm_fields.values().map(Codec::length).sum::<usize>()
    }

    /// Padding of OfpMatch
    pub fn pad_len(&self) -> usize {
        pad_len(self.oxm_length())
    }

    /// Counts how this match hits the concrete field values of a packet
    pub fn hits(&self, packet: &OfpMatch) -> Hits {
        let mut hits = Hits::default();
        for (field, pkt_tlv) in &packet.oxm_fields {
            match self.oxm_fields.get(field) {
                None => hits.wildcard += 1,
                Some(tlv) => {
                    if !tlv.matches_value(&pkt_tlv.value) {
                        hits.missed += 1;
                    } else if tlv.is_exact() {
                        hits.exact += 1;
                    } else {
                        hits.wildcard += 1;
                    }
                }
            }
        }
        hits.missed += self
            .oxm_fields
            .keys()
            .filter(|f| !packet.oxm_fields.contains_key(f))
            .count();
        hits
    }

    /// Non-strict: at least one packet exists that satisfies both matches.
    /// Strict: both matches are identical.
    pub fn overlaps(&self, other: &OfpMatch, strict: bool) -> bool {
        if strict {
            return self == other;
        }
        self.oxm_fields.iter().all(|(field, tlv)| match other.oxm_fields.get(field) {
            Some(other_tlv) => tlv.compatible(other_tlv),
            None => true,
        })
    }
}

impl Codec for OfpMatch {
    fn length(&self) -> usize {
        self.oxm_length() + self.pad_len()
    }

    fn pack<S: Write>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_u16::<NetworkEndian>(OFPMT_OXM)?;
        stream.write_u16::<NetworkEndian>(self.oxm_length() as u16)?;
        for oxm in self.oxm_fields.values() {
            oxm.pack(stream)?;
        }
        // make its overall size a multiple of 8; fill with zeros
        stream.write_all(&vec![0; self.pad_len()])
    }

    fn unpack(reader: &mut WireReader) -> Result<OfpMatch> {
        let bad_len = || Error::BadMatch(OfpBadMatchCode::BadLen);
        let typ = reader.u16()?;
        let length = reader.u16()? as usize;
        if typ != OFPMT_OXM {
            return Err(Error::BadMatch(OfpBadMatchCode::BadType));
        }
        if length < 4 || reader.remaining() < length - 4 + pad_len(length) {
            return Err(bad_len());
        }
        let mut tlvs = WireReader::with_short(reader.bytes(length - 4)?, bad_len);
        reader.skip(pad_len(length))?;

        let mut mat = OfpMatch::new();
        while tlvs.remaining() > 0 {
            let tlv = OfpOxmTlv::unpack(&mut tlvs)?;
            if mat.oxm_fields.contains_key(&tlv.field) {
                return Err(Error::BadMatch(OfpBadMatchCode::DupField));
            }
            mat.add_tlv(tlv);
        }
        Ok(mat)
    }
}

impl fmt::Display for OfpMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tlvs: Vec<String> = self.oxm_fields.values().map(|t| t.to_string()).collect();
        write!(f, "{{{}}}", tlvs.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ipv4(net: &str, endpoint: ProtocolEndpoint) -> OfpOxmTlv {
        OfpOxmTlv::new_ipv4(&Ipv4Network::from_str(net).unwrap(), &endpoint)
    }

    #[test]
    fn oxm_tlv_serialization() {
        let testee = OfpOxmTlv::new_in_port(0x11223344);
        assert_eq!(8, testee.length());
        let mut ser = vec![];
        testee.pack(&mut ser).unwrap();
        assert_eq!(vec![0x80, 0, 0, 4, 0x11, 0x22, 0x33, 0x44], ser);
    }

    #[test]
    fn masked_tlv_serialization() {
        let testee = ipv4("10.1.0.0/16", ProtocolEndpoint::Src);
        let mut ser = vec![];
        testee.pack(&mut ser).unwrap();
        assert_eq!(
            vec![0x80, 0, 0x17, 8, 10, 1, 0, 0, 255, 255, 0, 0],
            ser
        );
        let parsed = OfpOxmTlv::unpack(&mut WireReader::new(&ser)).unwrap();
        assert_eq!(testee, parsed);
    }

    #[test]
    fn match_serialization() {
        let mut testee = OfpMatch::new();
        testee.add_tlv(OfpOxmTlv::new_in_port(1));
        assert_eq!(12, testee.oxm_length());
        assert_eq!(4, testee.pad_len());
        let mut ser = vec![];
        testee.pack(&mut ser).unwrap();
        assert_eq!(16, ser.len());
        assert_eq!(16, testee.length());

        let mut reader = WireReader::new(&ser);
        assert_eq!(testee, OfpMatch::unpack(&mut reader).unwrap());
        assert_eq!(0, reader.remaining());
    }

    #[test]
    fn empty_match_is_8_bytes() {
        let mut ser = vec![];
        OfpMatch::new().pack(&mut ser).unwrap();
        assert_eq!(vec![0, 1, 0, 4, 0, 0, 0, 0], ser);
    }

    #[test]
    fn rejects_duplicate_fields() {
        let ser = vec![
            0, 1, 0, 20, 0x80, 0, 0, 4, 0, 0, 0, 1, 0x80, 0, 0, 4, 0, 0, 0, 2, 0, 0, 0, 0,
        ];
        match OfpMatch::unpack(&mut WireReader::new(&ser)).unwrap_err() {
            Error::BadMatch(OfpBadMatchCode::DupField) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn rejects_truncated_match() {
        let ser = vec![0, 1, 0, 12, 0x80, 0, 0, 4, 0, 0];
        match OfpMatch::unpack(&mut WireReader::new(&ser)).unwrap_err() {
            Error::BadMatch(OfpBadMatchCode::BadLen) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn rejects_mask_on_unmaskable_field() {
        let ser = vec![0x80, 0, 0x01, 8, 0, 0, 0, 1, 0xff, 0xff, 0, 0];
        match OfpOxmTlv::unpack(&mut WireReader::new(&ser)).unwrap_err() {
            Error::BadMatch(OfpBadMatchCode::BadMask) => {}
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn hit_counting() {
        let packet = OfpMatch::new()
            .with(OfpOxmTlv::new_in_port(2))
            .with(OfpOxmTlv::new_eth_type(0x0800))
            .with(OfpOxmTlv::new_ipv4(
                &Ipv4Network::from_str("10.1.2.3/32").unwrap(),
                &ProtocolEndpoint::Src,
            ));

        let wildcard = OfpMatch::new();
        assert_eq!(
            Hits { exact: 0, wildcard: 3, missed: 0 },
            wildcard.hits(&packet)
        );

        let specific = OfpMatch::new()
            .with(OfpOxmTlv::new_in_port(2))
            .with(ipv4("10.1.0.0/16", ProtocolEndpoint::Src));
        assert_eq!(
            Hits { exact: 1, wildcard: 2, missed: 0 },
            specific.hits(&packet)
        );

        let other_port = OfpMatch::new().with(OfpOxmTlv::new_in_port(3));
        assert_eq!(1, other_port.hits(&packet).missed);

        let needs_tcp = OfpMatch::new().with(OfpOxmTlv::new_tcp_port(80, &ProtocolEndpoint::Dst));
        assert_eq!(1, needs_tcp.hits(&packet).missed);
    }

    #[test]
    fn overlap() {
        let net16 = OfpMatch::new().with(ipv4("10.1.0.0/16", ProtocolEndpoint::Src));
        let net24 = OfpMatch::new().with(ipv4("10.1.2.0/24", ProtocolEndpoint::Src));
        let other = OfpMatch::new().with(ipv4("10.2.0.0/16", ProtocolEndpoint::Src));
        let port = OfpMatch::new().with(OfpOxmTlv::new_in_port(1));

        assert!(net16.overlaps(&net24, false));
        assert!(net24.overlaps(&net16, false));
        assert!(!net16.overlaps(&other, false));
        // disjoint field sets always overlap
        assert!(port.overlaps(&net16, false));
        assert!(OfpMatch::new().overlaps(&port, false));

        assert!(!net16.overlaps(&net24, true));
        assert!(net16.overlaps(&net16.clone(), true));
    }

    #[test]
    fn display() {
        let m = OfpMatch::new()
            .with(OfpOxmTlv::new_in_port(1))
            .with(ipv4("10.1.0.0/16", ProtocolEndpoint::Dst));
        assert_eq!("{in_port=0x1, ipv4_dst=10.1.0.0/16}", m.to_string());
    }
}
