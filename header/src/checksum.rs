//! Internet checksum over the header, the IP pseudo header and a
//! covered prefix of the application data.
//!
//! A region of odd length is summed as if a single zero byte were
//! appended. The header and options region and the pseudo header are
//! always word aligned, so the pad can only ever apply to the covered
//! application data.

use std::net::IpAddr;

/// Ones-complement sum of a byte region.
pub fn sum(data: &[u8]) -> u32 {
    let mut acc: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        acc += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        acc += u32::from(u16::from_be_bytes([*last, 0]));
    }
    acc
}

/// Sum of the IP pseudo header: addresses, protocol number and the
/// DCCP datagram length. Both addresses must be of the same family.
pub fn pseudo_header(src: IpAddr, dst: IpAddr, proto: u8, len: usize) -> Option<u32> {
    let mut acc = match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => sum(&s.octets()) + sum(&d.octets()),
        (IpAddr::V6(s), IpAddr::V6(d)) => sum(&s.octets()) + sum(&d.octets()),
        _ => return None,
    };
    acc += u32::from(proto);
    acc += sum(&(len as u32).to_be_bytes());
    Some(acc)
}

/// Folds the carries into sixteen bits.
pub fn fold(mut acc: u32) -> u16 {
    while acc >> 16 != 0 {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    acc as u16
}

/// A region that sums to all-ones, checksum field included, verifies.
pub fn verifies(acc: u32) -> bool {
    fold(acc) == !0
}

/// The value to place in the checksum field: the complement of the
/// sum computed with the field zeroed.
pub fn finish(acc: u32) -> u16 {
    !fold(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_pairs() {
        assert_eq!(sum(&[0x12, 0x34, 0x56, 0x78]), 0x1234 + 0x5678);
    }

    #[test]
    fn test_sum_odd_pads_with_zero() {
        assert_eq!(sum(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
        assert_eq!(sum(&[0xff]), 0xff00);
    }

    #[test]
    fn test_fold_carries() {
        assert_eq!(fold(0x1_fffe), 0xffff);
        assert_eq!(fold(0xffff), 0xffff);
        assert_eq!(fold(0x2_0001), 3);
    }

    #[test]
    fn test_round_trip() {
        let data = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02];
        let cs = finish(sum(&data));
        let mut buf = data.to_vec();
        buf.extend_from_slice(&cs.to_be_bytes());
        assert!(verifies(sum(&buf)));
    }

    #[test]
    fn test_pseudo_header_families() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        assert!(pseudo_header(v4, v4, 33, 20).is_some());
        assert!(pseudo_header(v6, v6, 33, 20).is_some());
        assert!(pseudo_header(v4, v6, 33, 20).is_none());
    }
}
