/*!
The OpenFlow protocol layer for versions 1.2 and 1.3.

`messages` holds the wire structures with their codec, `error` the error
taxonomy that maps onto OpenFlow error messages and `xid` the bookkeeping
of outstanding request/reply transactions.
*/

pub mod error;
pub mod messages;
pub mod xid;

use openflow::messages::{OfpHello, OFP_VERSION_10, OFP_VERSION_12, OFP_VERSION_13};

/// All versions this stack speaks, lowest first
pub const SUPPORTED_VERSIONS: [u8; 2] = [OFP_VERSION_12, OFP_VERSION_13];

/// Checks whether `version` can be negotiated
pub fn is_supported(version: u8) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Human readable version number, for logging
pub fn version_name(version: u8) -> &'static str {
    match version {
        OFP_VERSION_10 => "1.0",
        0x02 => "1.1",
        OFP_VERSION_12 => "1.2",
        OFP_VERSION_13 => "1.3",
        _ => "unknown",
    }
}

/// Determines the version both sides agree on.
///
/// If both HELLOs carry a version bitmap, the highest common version wins.
/// Otherwise the lower of both header versions is taken. The result has
/// to be one of the `own` versions.
pub fn negotiate_version(own: &[u8], peer_version: u8, peer_hello: &OfpHello) -> Option<u8> {
    let own_max = own.iter().cloned().max()?;
    if let Some(bitmap) = peer_hello.version_bitmap {
        return own
            .iter()
            .cloned()
            .filter(|v| *v < 32 && bitmap & (1 << *v) != 0)
            .max();
    }
    let agreed = if peer_version < own_max {
        peer_version
    } else {
        own_max
    };
    if own.contains(&agreed) {
        Some(agreed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_with_bitmap() {
        let hello = OfpHello::for_versions(&[OFP_VERSION_10, OFP_VERSION_12]);
        assert_eq!(
            Some(OFP_VERSION_12),
            negotiate_version(&SUPPORTED_VERSIONS, OFP_VERSION_13, &hello)
        );
        let hello = OfpHello::for_versions(&[OFP_VERSION_10]);
        assert_eq!(
            None,
            negotiate_version(&SUPPORTED_VERSIONS, OFP_VERSION_10, &hello)
        );
    }

    #[test]
    fn negotiate_without_bitmap() {
        let hello = OfpHello::default();
        assert_eq!(
            Some(OFP_VERSION_13),
            negotiate_version(&SUPPORTED_VERSIONS, 0x05, &hello)
        );
        assert_eq!(
            Some(OFP_VERSION_12),
            negotiate_version(&SUPPORTED_VERSIONS, OFP_VERSION_12, &hello)
        );
        assert_eq!(
            None,
            negotiate_version(&SUPPORTED_VERSIONS, OFP_VERSION_10, &hello)
        );
        assert_eq!(
            Some(OFP_VERSION_12),
            negotiate_version(&[OFP_VERSION_12], OFP_VERSION_13, &hello)
        );
    }
}
