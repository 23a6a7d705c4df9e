//! Generic header decoding.

use crate::checksum;
use crate::options::{read_options, sanitize_options};
use crate::types::{
    fixed_header_size, type_and_x_compatible, PacketType, WORD_SIZE,
};
use crate::{Error, GenericHeader, Result};
use byteorder::{BigEndian, ByteOrder};
use std::net::IpAddr;

/// Number of application data bytes covered by the checksum. CsCov
/// zero covers everything; a nonzero CsCov covers CsCov words and
/// must not claim more data than the packet carries.
fn checksum_app_coverage(cscov: u8, app_len: usize) -> Result<usize> {
    if cscov == 0 {
        return Ok(app_len);
    }
    let covered = cscov as usize * WORD_SIZE;
    if covered > app_len {
        return Err(Error::Numeric);
    }
    Ok(covered)
}

/// Decodes a whole DCCP datagram into a `GenericHeader`.
///
/// The IP addresses and protocol number identify the enclosing IP
/// packet and enter the checksum through the pseudo header.
pub fn read_generic_header(
    buf: &[u8],
    src_ip: IpAddr,
    dst_ip: IpAddr,
    proto: u8,
    allow_short_seq_no: bool,
) -> Result<GenericHeader> {
    if buf.len() < 12 {
        return Err(Error::Size);
    }
    let mut k = 0;

    // (1a) Generic header.
    let source_port = BigEndian::read_u16(&buf[k..k + 2]);
    k += 2;
    let dest_port = BigEndian::read_u16(&buf[k..k + 2]);
    k += 2;

    let data_offset = buf[k] as usize * WORD_SIZE;
    k += 1;

    let ccval = buf[k] >> 4;
    let cscov = buf[k] & 0x0f;
    k += 1;

    // The checksum field participates implicitly in the verification
    // below.
    k += 2;

    // The 3-bit Res field is ignored.
    let ty = PacketType::from_wire((buf[k] >> 1) & 0x0f).ok_or(Error::Semantic)?;
    let x = buf[k] & 0x01 == 1;
    k += 1;

    if !type_and_x_compatible(ty, x, allow_short_seq_no) {
        return Err(Error::Semantic);
    }

    if data_offset < fixed_header_size(ty, x) || data_offset > buf.len() {
        return Err(Error::Numeric);
    }

    let appcov = checksum_app_coverage(cscov, buf.len() - data_offset)?;
    let mut acc = checksum::sum(&buf[..data_offset]);
    acc += checksum::pseudo_header(src_ip, dst_ip, proto, buf.len()).ok_or(Error::Semantic)?;
    acc += checksum::sum(&buf[data_offset..data_offset + appcov]);
    if !checksum::verifies(acc) {
        return Err(Error::Checksum);
    }

    let seq_no = if x {
        if buf[k] != 0 {
            return Err(Error::Numeric);
        }
        k += 1;
        let n = BigEndian::read_u48(&buf[k..k + 6]);
        k += 6;
        n
    } else {
        let n = u64::from(BigEndian::read_u24(&buf[k..k + 3]));
        k += 3;
        n
    };

    // (1b) Acknowledgement number subheader.
    let ack_no = match crate::types::ack_subheader_size(ty, x) {
        0 => None,
        4 => {
            if buf[k] != 0 {
                return Err(Error::Numeric);
            }
            k += 1;
            let n = u64::from(BigEndian::read_u24(&buf[k..k + 3]));
            k += 3;
            Some(n)
        }
        8 => {
            if BigEndian::read_u16(&buf[k..k + 2]) != 0 {
                return Err(Error::Numeric);
            }
            k += 2;
            let n = BigEndian::read_u48(&buf[k..k + 6]);
            k += 6;
            Some(n)
        }
        _ => unreachable!(),
    };

    // (1c) Code subheader: service code, or reset code and data.
    let mut service_code = None;
    let mut reset = None;
    match ty {
        PacketType::Request | PacketType::Response => {
            service_code = Some(BigEndian::read_u32(&buf[k..k + 4]));
            k += 4;
        }
        PacketType::Reset => {
            let mut code = [0; 4];
            code.copy_from_slice(&buf[k..k + 4]);
            reset = Some(code);
            k += 4;
        }
        _ => {}
    }

    // (2) Options and padding.
    let opts = read_options(&buf[k..data_offset])?;
    let options = sanitize_options(ty, opts)?;

    // (3) Application data.
    let data = buf[data_offset..].to_vec();

    Ok(GenericHeader {
        source_port,
        dest_port,
        ccval,
        cscov,
        ty,
        x,
        seq_no,
        ack_no,
        service_code,
        reset,
        options,
        data,
    })
}
