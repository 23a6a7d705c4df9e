//! Options list parsing, sanitization and serialization.

use crate::types::{
    is_option_single_byte, is_option_valid_for_type, PacketType, OPT_MANDATORY, OPT_PADDING,
    WORD_SIZE,
};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// A decoded option. Padding bytes and Mandatory markers never appear
/// here; a marker folds into the `mandatory` flag of the option it
/// precedes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Opt {
    /// Option type byte.
    pub ty: u8,
    /// Option payload, empty for single-byte options.
    pub data: Vec<u8>,
    /// Whether the option was preceded by a Mandatory marker.
    pub mandatory: bool,
}

impl Opt {
    /// A plain option without payload.
    pub fn single(ty: u8) -> Opt {
        Opt {
            ty,
            data: Vec::new(),
            mandatory: false,
        }
    }

    /// A multi-byte option.
    pub fn with_data(ty: u8, data: Vec<u8>) -> Opt {
        Opt {
            ty,
            data,
            mandatory: false,
        }
    }
}

/// Parses the raw options region. The region must be word aligned.
/// Multi-byte options carry a length byte that includes the two-byte
/// type and length prefix; a truncated trailing option terminates the
/// walk silently.
pub fn read_options(buf: &[u8]) -> Result<Vec<Opt>> {
    if buf.len() % WORD_SIZE != 0 {
        return Err(Error::Align);
    }

    let mut opts = Vec::new();
    let mut k = 0;
    while k < buf.len() {
        let t = buf[k];
        k += 1;

        if is_option_single_byte(t) {
            opts.push(Opt::single(t));
            continue;
        }

        if k >= buf.len() {
            break;
        }
        let l = buf[k] as usize;
        k += 1;
        if l < 2 || k + l - 2 > buf.len() {
            break;
        }

        opts.push(Opt::with_data(t, buf[k..k + l - 2].to_vec()));
        k += l - 2;
    }

    Ok(opts)
}

/// Walks a parsed option list, folding Mandatory markers into flags,
/// discarding padding and options illegal for the packet type. An
/// illegal or repeated marker, a marker in front of an illegal
/// option, or a trailing marker is an error.
pub fn sanitize_options(ty: PacketType, opts: Vec<Opt>) -> Result<Vec<Opt>> {
    let mut r = Vec::with_capacity(opts.len());
    let mut next_is_mandatory = false;
    for mut opt in opts {
        if !is_option_valid_for_type(opt.ty, ty) {
            if next_is_mandatory {
                return Err(Error::Option);
            }
            continue;
        }
        match opt.ty {
            OPT_MANDATORY => {
                if next_is_mandatory {
                    return Err(Error::Option);
                }
                next_is_mandatory = true;
            }
            OPT_PADDING => {
                next_is_mandatory = false;
            }
            _ => {
                opt.mandatory = next_is_mandatory;
                next_is_mandatory = false;
                r.push(opt);
            }
        }
    }
    if next_is_mandatory {
        return Err(Error::Option);
    }
    Ok(r)
}

/// On-wire length of a sanitized option list, markers and trailing
/// padding included.
pub fn options_wire_len(opts: &[Opt]) -> usize {
    let mut n = 0;
    for opt in opts {
        if opt.mandatory {
            n += 1;
        }
        n += 1;
        if !is_option_single_byte(opt.ty) {
            n += 1 + opt.data.len();
        }
    }
    (n + WORD_SIZE - 1) / WORD_SIZE * WORD_SIZE
}

/// Serializes a sanitized option list, re-emitting Mandatory markers
/// and padding the region to a word boundary.
pub fn write_options(buf: &mut BytesMut, opts: &[Opt]) {
    let mut n = 0;
    for opt in opts {
        if opt.mandatory {
            buf.put_u8(OPT_MANDATORY);
            n += 1;
        }
        buf.put_u8(opt.ty);
        n += 1;
        if !is_option_single_byte(opt.ty) {
            buf.put_u8((opt.data.len() + 2) as u8);
            buf.put_slice(&opt.data);
            n += 1 + opt.data.len();
        }
    }
    while n % WORD_SIZE != 0 {
        buf.put_u8(OPT_PADDING);
        n += 1;
    }
}
