//! # DCCP header codec
//! Bit-exact parsing and emission of the DCCP generic header, the
//! acknowledgement and code subheaders, the type-length-value options
//! list and the Internet checksum over the IP pseudo header.
//!
//! ```text
//! 0               8               16                              32
//! +-------------- +---------------+-------------------------------+
//! | Source Port                   | Dest Port                     |
//! +---------------+---------------+-------------------------------+
//! | Data Offset   | CCVal | CsCov | Checksum                      |
//! +-------+-------+-------+-------+-------------------------------+
//! | Res   | Type    |X|         Sequence Number (24 or 48 bits)
//! +-------+---------+-+---------------------------------------------
//! ```
//!
//! Everything here is a pure function over byte buffers. The
//! connection invokes the codec lock free on owned buffers and merges
//! the result under its lock.
#![deny(missing_docs)]
mod checksum;
mod options;
mod read;
mod types;
mod write;

pub use crate::options::{read_options, sanitize_options, write_options, Opt};
pub use crate::read::read_generic_header;
pub use crate::types::{
    ack_subheader_size, fixed_header_size, generic_header_size, is_option_single_byte,
    is_option_valid_for_type, type_and_x_compatible, PacketType, MAX_DATA_OPTION_SIZE,
    OPT_ACK_VECTOR_0, OPT_ACK_VECTOR_1, OPT_CHANGE_L, OPT_CHANGE_R, OPT_CONFIRM_L, OPT_CONFIRM_R,
    OPT_DATA_DROPPED, OPT_ELAPSED_TIME, OPT_LOSS_EVENT_RATE, OPT_MANDATORY, OPT_NDP_COUNT,
    OPT_PADDING, OPT_RECEIVE_RATE, OPT_SLOW_RECEIVER, OPT_TIMESTAMP, OPT_TIMESTAMP_ECHO,
};
pub use crate::write::write_generic_header;

use failure::Fail;

/// Reset codes carried in the code subheader of a Reset packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ResetCode {
    /// No particular reason.
    Unspecified = 0,
    /// Normal connection close.
    Closed = 1,
    /// Connection aborted by the application.
    Aborted = 2,
    /// No connection exists for this packet.
    NoConnection = 3,
    /// A received packet was malformed.
    PacketError = 4,
    /// A received option was malformed.
    OptionError = 5,
    /// A mandatory option could not be processed.
    MandatoryError = 6,
    /// Server refused the connection.
    ConnectionRefused = 7,
    /// Request carried an unknown service code.
    BadServiceCode = 8,
    /// Server too busy to serve the connection.
    TooBusy = 9,
    /// An init cookie failed verification.
    BadInitCookie = 10,
    /// Peer sent too aggressively.
    AggressionPenalty = 11,
}

/// Error kinds surfaced by the codec. Any of them causes the packet
/// to be dropped; none of them tears down a connection.
#[derive(Clone, Copy, Debug, Eq, Fail, PartialEq)]
pub enum Error {
    /// Buffer too short to hold the fixed header.
    #[fail(display = "buffer too short")]
    Size,
    /// Illegal combination of type and other fields.
    #[fail(display = "illegal field combination")]
    Semantic,
    /// A field is out of range or reserved padding is nonzero.
    #[fail(display = "field out of range")]
    Numeric,
    /// Options region is not a multiple of four bytes.
    #[fail(display = "options region not word aligned")]
    Align,
    /// Malformed option sequence or misplaced mandatory marker.
    #[fail(display = "malformed option sequence")]
    Option,
    /// Checksum verification failed.
    #[fail(display = "checksum verification failed")]
    Checksum,
}

/// Codec result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The decoded form of any DCCP packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GenericHeader {
    /// Sending port.
    pub source_port: u16,
    /// Receiving port.
    pub dest_port: u16,
    /// 4-bit value maintained by the congestion control.
    pub ccval: u8,
    /// Checksum coverage, in words of application data; zero covers
    /// all of it.
    pub cscov: u8,
    /// Packet type.
    pub ty: PacketType,
    /// Extended sequence number flag.
    pub x: bool,
    /// Sequence number, 24 or 48 bits per `x`.
    pub seq_no: u64,
    /// Acknowledgement number, present per packet type.
    pub ack_no: Option<u64>,
    /// Service code, present on Request and Response.
    pub service_code: Option<u32>,
    /// Reset code and data, present on Reset.
    pub reset: Option<[u8; 4]>,
    /// Sanitized options.
    pub options: Vec<Opt>,
    /// Application data.
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    const PROTO: u8 = 33;

    fn src() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    fn dst() -> IpAddr {
        "10.0.0.2".parse().unwrap()
    }

    fn header(ty: PacketType, x: bool) -> GenericHeader {
        GenericHeader {
            source_port: 4000,
            dest_port: 5000,
            ccval: 2,
            cscov: 0,
            ty,
            x,
            seq_no: if x { 0x0102030405 } else { 0x010203 },
            ack_no: if ty.has_ack_no() {
                Some(if x { 0x0504030201 } else { 0x050403 })
            } else {
                None
            },
            service_code: match ty {
                PacketType::Request | PacketType::Response => Some(42),
                _ => None,
            },
            reset: match ty {
                PacketType::Reset => Some([1, 0, 0, 7]),
                _ => None,
            },
            options: vec![Opt::with_data(OPT_TIMESTAMP, vec![1, 2, 3, 4])],
            data: b"hello".to_vec(),
        }
    }

    // Recomputes the checksum field of a hand-mutated buffer so that
    // errors later in the decode pipeline become observable.
    fn refresh_checksum(buf: &mut [u8]) {
        buf[6..8].copy_from_slice(&[0, 0]);
        let data_offset = buf[4] as usize * 4;
        let mut acc = crate::checksum::sum(&buf[..data_offset]);
        acc += crate::checksum::pseudo_header(src(), dst(), PROTO, buf.len()).unwrap();
        acc += crate::checksum::sum(&buf[data_offset..]);
        let cs = crate::checksum::finish(acc);
        buf[6..8].copy_from_slice(&cs.to_be_bytes());
    }

    #[test]
    fn test_round_trip_every_type() {
        let long = [
            PacketType::Request,
            PacketType::Response,
            PacketType::Data,
            PacketType::Ack,
            PacketType::DataAck,
            PacketType::CloseReq,
            PacketType::Close,
            PacketType::Reset,
            PacketType::Sync,
            PacketType::SyncAck,
        ];
        let short = [PacketType::Data, PacketType::Ack, PacketType::DataAck];
        for (&ty, x) in long
            .iter()
            .map(|t| (t, true))
            .chain(short.iter().map(|t| (t, false)))
        {
            let gh = header(ty, x);
            let buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
            let parsed = read_generic_header(&buf, src(), dst(), PROTO, true).unwrap();
            assert_eq!(parsed, gh, "{:?} x={}", ty, x);
            let buf2 = write_generic_header(&parsed, src(), dst(), PROTO, true).unwrap();
            assert_eq!(buf, buf2, "{:?} x={}", ty, x);
        }
    }

    #[test]
    fn test_minimum_packet() {
        // A short-seqno Data packet with no options and no payload is
        // exactly twelve bytes and decodes.
        let gh = GenericHeader {
            options: vec![],
            data: vec![],
            ..header(PacketType::Data, false)
        };
        let buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, true).unwrap(),
            gh
        );
        // Eleven bytes is too short for any header.
        assert_eq!(
            read_generic_header(&buf[..11], src(), dst(), PROTO, true),
            Err(Error::Size)
        );
    }

    #[test]
    fn test_short_seq_no_requires_feature() {
        let gh = header(PacketType::Data, false);
        let buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, false),
            Err(Error::Semantic)
        );
        assert_eq!(
            write_generic_header(&gh, src(), dst(), PROTO, false),
            Err(Error::Semantic)
        );
    }

    #[test]
    fn test_checksum_rejected() {
        let gh = header(PacketType::Ack, true);
        let mut buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        *buf.last_mut().unwrap() ^= 0xff;
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, true),
            Err(Error::Checksum)
        );
    }

    #[test]
    fn test_partial_coverage_ignores_tail() {
        // CsCov of one word: corrupting the uncovered tail of the
        // application data must not trip the checksum.
        let mut gh = header(PacketType::DataAck, true);
        gh.cscov = 1;
        gh.data = b"12345678".to_vec();
        let mut buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        let parsed = read_generic_header(&buf, src(), dst(), PROTO, true).unwrap();
        assert_eq!(parsed.cscov, 1);
        assert_ne!(parsed.data, gh.data);
    }

    #[test]
    fn test_coverage_overruns_data() {
        let mut gh = header(PacketType::DataAck, true);
        gh.cscov = 3;
        gh.data = b"1234".to_vec();
        assert_eq!(
            write_generic_header(&gh, src(), dst(), PROTO, true),
            Err(Error::Numeric)
        );
    }

    #[test]
    fn test_nonzero_seq_no_padding() {
        let gh = header(PacketType::Ack, true);
        let mut buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        // The byte in front of a 48-bit sequence number is reserved.
        buf[9] = 1;
        refresh_checksum(&mut buf);
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, true),
            Err(Error::Numeric)
        );
    }

    #[test]
    fn test_nonzero_ack_no_padding() {
        let gh = header(PacketType::Ack, true);
        let mut buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        // Two reserved bytes in front of a 48-bit ack number.
        buf[16] = 1;
        refresh_checksum(&mut buf);
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, true),
            Err(Error::Numeric)
        );
    }

    #[test]
    fn test_data_offset_bounds() {
        let gh = header(PacketType::Ack, true);
        let mut buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        // Below the fixed header size for (Ack, X=1).
        buf[4] = 5;
        refresh_checksum(&mut buf);
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, true),
            Err(Error::Numeric)
        );
        // Past the end of the buffer.
        buf[4] = 0xff;
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, true),
            Err(Error::Numeric)
        );
    }

    #[test]
    fn test_reset_code_subheader() {
        let gh = GenericHeader {
            options: vec![],
            data: vec![],
            ..header(PacketType::Reset, true)
        };
        let buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        let parsed = read_generic_header(&buf, src(), dst(), PROTO, true).unwrap();
        assert_eq!(parsed.ty, PacketType::Reset);
        assert_eq!(parsed.service_code, None);
        let reset = parsed.reset.unwrap();
        assert_eq!(reset.len(), 4);
        assert_eq!(reset[0], ResetCode::Closed as u8);
    }

    #[test]
    fn test_double_mandatory_rejected() {
        let gh = GenericHeader {
            options: vec![],
            data: vec![],
            ..header(PacketType::Ack, true)
        };
        let mut buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        buf.extend_from_slice(&[OPT_MANDATORY, OPT_MANDATORY, OPT_SLOW_RECEIVER, OPT_PADDING]);
        buf[4] += 1; // one more option word
        refresh_checksum(&mut buf);
        assert_eq!(
            read_generic_header(&buf, src(), dst(), PROTO, true),
            Err(Error::Option)
        );
    }

    #[test]
    fn test_mandatory_survives_round_trip() {
        let mut gh = header(PacketType::Ack, true);
        gh.options = vec![Opt {
            ty: OPT_SLOW_RECEIVER,
            data: vec![],
            mandatory: true,
        }];
        let buf = write_generic_header(&gh, src(), dst(), PROTO, true).unwrap();
        let parsed = read_generic_header(&buf, src(), dst(), PROTO, true).unwrap();
        assert_eq!(parsed.options, gh.options);
    }
}
