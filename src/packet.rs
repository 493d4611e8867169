/*!
Header field extraction from Ethernet frames

The result is an `OfpMatch` with exact values only, the form flow tables
use to look up packets. Truncated headers end the extraction at the last
complete layer.
*/

use byteorder::{ByteOrder, NetworkEndian};
use openflow::messages::*;

pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_VLAN: u16 = 0x8100;
pub const ETH_TYPE_IPV6: u16 = 0x86dd;

pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;
pub const IP_PROTO_SCTP: u8 = 132;

const ETH_HEADER_LEN: usize = 14;

fn u16_tlv(field: OxmField, value: u16) -> OfpOxmTlv {
    let mut bytes = vec![0; 2];
    NetworkEndian::write_u16(&mut bytes, value);
    OfpOxmTlv::new(field, bytes)
}

/// Extracts the OpenFlow match fields of `frame` received on `in_port`.
///
/// The match always contains the input port, the metadata (0)
/// and the VLAN id (OFPVID_NONE for untagged frames).
pub fn extract_fields(in_port: u32, frame: &[u8]) -> OfpMatch {
    let mut fields = OfpMatch::new()
        .with(OfpOxmTlv::new_in_port(in_port))
        .with(OfpOxmTlv::new_metadata(0, u64::max_value()));

    if frame.len() < ETH_HEADER_LEN {
        fields.add_tlv(OfpOxmTlv::new_vlan_vid(OFPVID_NONE));
        return fields;
    }
    let mut dst = [0; 6];
    dst.copy_from_slice(&frame[0..6]);
    let mut src = [0; 6];
    src.copy_from_slice(&frame[6..12]);
    fields.add_tlv(OfpOxmTlv::new_eth_addr(dst, &ProtocolEndpoint::Dst));
    fields.add_tlv(OfpOxmTlv::new_eth_addr(src, &ProtocolEndpoint::Src));

    let mut eth_type = NetworkEndian::read_u16(&frame[12..14]);
    let mut offset = ETH_HEADER_LEN;
    if eth_type == ETH_TYPE_VLAN {
        if frame.len() < offset + 4 {
            fields.add_tlv(OfpOxmTlv::new_vlan_vid(OFPVID_NONE));
            return fields;
        }
        let tci = NetworkEndian::read_u16(&frame[offset..offset + 2]);
        fields.add_tlv(OfpOxmTlv::new_vlan_vid(OFPVID_PRESENT | (tci & 0x0fff)));
        fields.add_tlv(OfpOxmTlv::new(OxmField::VlanPcp, vec![(tci >> 13) as u8]));
        eth_type = NetworkEndian::read_u16(&frame[offset + 2..offset + 4]);
        offset += 4;
    } else {
        fields.add_tlv(OfpOxmTlv::new_vlan_vid(OFPVID_NONE));
    }
    fields.add_tlv(OfpOxmTlv::new_eth_type(eth_type));

    let payload = &frame[offset..];
    match eth_type {
        ETH_TYPE_IPV4 => extract_ipv4(&mut fields, payload),
        ETH_TYPE_ARP => extract_arp(&mut fields, payload),
        _ => {}
    }
    fields
}

fn extract_arp(fields: &mut OfpMatch, arp: &[u8]) {
    // Ethernet/IPv4 ARP only
    if arp.len() < 28 {
        return;
    }
    fields.add_tlv(u16_tlv(OxmField::ArpOp, NetworkEndian::read_u16(&arp[6..8])));
    fields.add_tlv(OfpOxmTlv::new(OxmField::ArpSha, arp[8..14].to_vec()));
    fields.add_tlv(OfpOxmTlv::new(OxmField::ArpSpa, arp[14..18].to_vec()));
    fields.add_tlv(OfpOxmTlv::new(OxmField::ArpTha, arp[18..24].to_vec()));
    fields.add_tlv(OfpOxmTlv::new(OxmField::ArpTpa, arp[24..28].to_vec()));
}

fn extract_ipv4(fields: &mut OfpMatch, ip: &[u8]) {
    if ip.len() < 20 {
        return;
    }
    let header_len = usize::from(ip[0] & 0x0f) * 4;
    let proto = ip[9];
    fields.add_tlv(OfpOxmTlv::new(OxmField::IpDscp, vec![ip[1] >> 2]));
    fields.add_tlv(OfpOxmTlv::new(OxmField::IpEcn, vec![ip[1] & 0x03]));
    fields.add_tlv(OfpOxmTlv::new_ip_proto(proto));
    fields.add_tlv(OfpOxmTlv::new(OxmField::Ipv4Src, ip[12..16].to_vec()));
    fields.add_tlv(OfpOxmTlv::new(OxmField::Ipv4Dst, ip[16..20].to_vec()));

    // fragments after the first do not carry the transport header
    let fragment_offset = NetworkEndian::read_u16(&ip[6..8]) & 0x1fff;
    if header_len < 20 || ip.len() < header_len || fragment_offset != 0 {
        return;
    }
    let l4 = &ip[header_len..];
    match proto {
        IP_PROTO_TCP | IP_PROTO_UDP | IP_PROTO_SCTP if l4.len() >= 4 => {
            let src = NetworkEndian::read_u16(&l4[0..2]);
            let dst = NetworkEndian::read_u16(&l4[2..4]);
            match proto {
                IP_PROTO_TCP => {
                    fields.add_tlv(OfpOxmTlv::new_tcp_port(src, &ProtocolEndpoint::Src));
                    fields.add_tlv(OfpOxmTlv::new_tcp_port(dst, &ProtocolEndpoint::Dst));
                }
                IP_PROTO_UDP => {
                    fields.add_tlv(OfpOxmTlv::new_udp_port(src, &ProtocolEndpoint::Src));
                    fields.add_tlv(OfpOxmTlv::new_udp_port(dst, &ProtocolEndpoint::Dst));
                }
                _ => {
                    fields.add_tlv(u16_tlv(OxmField::SctpSrc, src));
                    fields.add_tlv(u16_tlv(OxmField::SctpDst, dst));
                }
            }
        }
        IP_PROTO_ICMP if l4.len() >= 2 => {
            fields.add_tlv(OfpOxmTlv::new(OxmField::Icmpv4Type, vec![l4[0]]));
            fields.add_tlv(OfpOxmTlv::new(OxmField::Icmpv4Code, vec![l4[1]]));
        }
        _ => {}
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// A minimal Ethernet/IPv4/UDP frame
    pub fn udp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut frame = vec![
            0x02, 0, 0, 0, 0, 0x02, // dst
            0x02, 0, 0, 0, 0, 0x01, // src
            0x08, 0x00, // IPv4
            0x45, 0x00, 0, 28, 0, 0, 0, 0, 64, 17, 0, 0, // ..proto UDP
            10, 0, 0, 1, // src ip
            10, 0, 0, 2, // dst ip
        ];
        frame.extend_from_slice(&[(src_port >> 8) as u8, src_port as u8]);
        frame.extend_from_slice(&[(dst_port >> 8) as u8, dst_port as u8]);
        frame.extend_from_slice(&[0, 8, 0, 0]);
        frame
    }

    #[test]
    fn udp_fields() {
        let fields = extract_fields(3, &udp_frame(1000, 53));
        assert_eq!(Some(3), fields.in_port());
        assert_eq!(
            0x0800,
            fields.get(OxmField::EthType).unwrap().value_u64()
        );
        assert_eq!(
            u64::from(OFPVID_NONE),
            fields.get(OxmField::VlanVid).unwrap().value_u64()
        );
        assert_eq!(17, fields.get(OxmField::IpProto).unwrap().value_u64());
        assert_eq!(
            &[10, 0, 0, 2],
            fields.get(OxmField::Ipv4Dst).unwrap().value()
        );
        assert_eq!(53, fields.get(OxmField::UdpDst).unwrap().value_u64());
        assert!(fields.get(OxmField::TcpDst).is_none());
        assert!(fields.tlvs().all(|t| t.is_exact()));
    }

    #[test]
    fn vlan_tag() {
        let mut frame = udp_frame(1, 2);
        let tag = [0x81, 0x00, 0x20, 0x0a];
        for (i, b) in tag.iter().enumerate() {
            frame.insert(12 + i, *b);
        }
        let fields = extract_fields(1, &frame);
        assert_eq!(
            u64::from(OFPVID_PRESENT | 10),
            fields.get(OxmField::VlanVid).unwrap().value_u64()
        );
        assert_eq!(1, fields.get(OxmField::VlanPcp).unwrap().value_u64());
        assert_eq!(0x0800, fields.get(OxmField::EthType).unwrap().value_u64());
    }

    #[test]
    fn truncated_frame() {
        let fields = extract_fields(1, &[0; 6]);
        assert_eq!(3, fields.len());
        let mut frame = udp_frame(1, 2);
        frame.truncate(30);
        let fields = extract_fields(1, &frame);
        assert!(fields.get(OxmField::EthType).is_some());
        assert!(fields.get(OxmField::IpProto).is_none());
    }

    #[test]
    fn arp() {
        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(&[2, 0, 0, 0, 0, 1, 0x08, 0x06]);
        frame.extend_from_slice(&[0, 1, 8, 0, 6, 4, 0, 1]);
        frame.extend_from_slice(&[2, 0, 0, 0, 0, 1, 10, 0, 0, 1]);
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 0, 10, 0, 0, 2]);
        let fields = extract_fields(1, &frame);
        assert_eq!(1, fields.get(OxmField::ArpOp).unwrap().value_u64());
        assert_eq!(&[10, 0, 0, 2], fields.get(OxmField::ArpTpa).unwrap().value());
    }
}
