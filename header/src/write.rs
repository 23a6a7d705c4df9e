//! Generic header encoding: the byte-exact inverse of decoding.

use crate::checksum;
use crate::options::{options_wire_len, write_options};
use crate::types::{
    ack_subheader_size, fixed_header_size, type_and_x_compatible, PacketType, WORD_SIZE,
};
use crate::{Error, GenericHeader, Result};
use bytes::{BufMut, BytesMut};
use std::net::IpAddr;

const SEQ_NO_SHORT_MAX: u64 = (1 << 24) - 1;
const SEQ_NO_MAX: u64 = (1 << 48) - 1;

/// Serializes a header into a whole DCCP datagram, computing the
/// checksum over the pseudo header of the given addresses. Any value
/// obtained from a successful decode encodes back to the identical
/// byte string.
pub fn write_generic_header(
    gh: &GenericHeader,
    src_ip: IpAddr,
    dst_ip: IpAddr,
    proto: u8,
    allow_short_seq_no: bool,
) -> Result<Vec<u8>> {
    if !type_and_x_compatible(gh.ty, gh.x, allow_short_seq_no) {
        return Err(Error::Semantic);
    }
    if gh.ack_no.is_some() != gh.ty.has_ack_no() {
        return Err(Error::Semantic);
    }
    let needs_service = matches!(gh.ty, PacketType::Request | PacketType::Response);
    if gh.service_code.is_some() != needs_service {
        return Err(Error::Semantic);
    }
    if gh.reset.is_some() != (gh.ty == PacketType::Reset) {
        return Err(Error::Semantic);
    }
    if gh.ccval > 0x0f || gh.cscov > 0x0f {
        return Err(Error::Numeric);
    }
    let seq_max = if gh.x { SEQ_NO_MAX } else { SEQ_NO_SHORT_MAX };
    if gh.seq_no > seq_max {
        return Err(Error::Numeric);
    }
    if let Some(ack_no) = gh.ack_no {
        if ack_no > seq_max {
            return Err(Error::Numeric);
        }
    }

    let data_offset = fixed_header_size(gh.ty, gh.x) + options_wire_len(&gh.options);
    if data_offset / WORD_SIZE > u8::MAX as usize {
        return Err(Error::Size);
    }
    let len = data_offset + gh.data.len();
    if gh.cscov > 0 && gh.cscov as usize * WORD_SIZE > gh.data.len() {
        return Err(Error::Numeric);
    }

    let mut buf = BytesMut::with_capacity(len);

    // (1a) Generic header.
    buf.put_u16(gh.source_port);
    buf.put_u16(gh.dest_port);
    buf.put_u8((data_offset / WORD_SIZE) as u8);
    buf.put_u8(gh.ccval << 4 | gh.cscov & 0x0f);
    buf.put_u16(0); // checksum, filled in below
    buf.put_u8((gh.ty as u8) << 1 | gh.x as u8);
    if gh.x {
        buf.put_u8(0);
        buf.put_uint(gh.seq_no, 6);
    } else {
        buf.put_uint(gh.seq_no, 3);
    }

    // (1b) Acknowledgement number subheader.
    match ack_subheader_size(gh.ty, gh.x) {
        0 => {}
        4 => {
            buf.put_u8(0);
            buf.put_uint(gh.ack_no.unwrap(), 3);
        }
        8 => {
            buf.put_u16(0);
            buf.put_uint(gh.ack_no.unwrap(), 6);
        }
        _ => unreachable!(),
    }

    // (1c) Code subheader.
    if let Some(service_code) = gh.service_code {
        buf.put_u32(service_code);
    }
    if let Some(reset) = gh.reset {
        buf.put_slice(&reset);
    }

    // (2) Options and padding.
    write_options(&mut buf, &gh.options);
    debug_assert_eq!(buf.len(), data_offset);

    // (3) Application data.
    buf.put_slice(&gh.data);

    let appcov = if gh.cscov == 0 {
        gh.data.len()
    } else {
        gh.cscov as usize * WORD_SIZE
    };
    let mut acc = checksum::sum(&buf[..data_offset]);
    acc += checksum::pseudo_header(src_ip, dst_ip, proto, len).ok_or(Error::Semantic)?;
    acc += checksum::sum(&buf[data_offset..data_offset + appcov]);
    let cs = checksum::finish(acc);
    buf[6..8].copy_from_slice(&cs.to_be_bytes());

    Ok(buf.to_vec())
}
