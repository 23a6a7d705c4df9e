//! Packet types, size tables and the option catalog.
//!
//! The size tables are what make header parsing position
//! deterministic: every field offset follows from (type, X) alone.

/// Width of the 32-bit words the wire format is aligned to.
pub const WORD_SIZE: usize = 4;

/// Approximate upper bound on the options carried by a Data or
/// DataAck packet, reserved when computing the user-visible MTU.
pub const MAX_DATA_OPTION_SIZE: u32 = 24;

/// The ten DCCP packet types.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum PacketType {
    /// Client connection initiation.
    Request = 0,
    /// Server answer to a Request.
    Response = 1,
    /// Application data without an acknowledgement.
    Data = 2,
    /// Pure acknowledgement.
    Ack = 3,
    /// Application data plus an acknowledgement.
    DataAck = 4,
    /// Server asks the client to close.
    CloseReq = 5,
    /// Connection close.
    Close = 6,
    /// Connection teardown with a reason code.
    Reset = 7,
    /// Sequence number resynchronization probe.
    Sync = 8,
    /// Answer to a Sync.
    SyncAck = 9,
}

impl PacketType {
    /// Decodes the 4-bit on-wire type field.
    pub fn from_wire(t: u8) -> Option<PacketType> {
        Some(match t {
            0 => PacketType::Request,
            1 => PacketType::Response,
            2 => PacketType::Data,
            3 => PacketType::Ack,
            4 => PacketType::DataAck,
            5 => PacketType::CloseReq,
            6 => PacketType::Close,
            7 => PacketType::Reset,
            8 => PacketType::Sync,
            9 => PacketType::SyncAck,
            _ => return None,
        })
    }

    /// Whether packets of this type carry an acknowledgement number.
    pub fn has_ack_no(self) -> bool {
        !matches!(self, PacketType::Request | PacketType::Data)
    }
}

/// Checks that the extended sequence number flag is legal for the
/// packet type. Short sequence numbers are limited to Data, Ack and
/// DataAck, and only when the short-seqno feature is on.
pub fn type_and_x_compatible(ty: PacketType, x: bool, allow_short_seq_no: bool) -> bool {
    if x {
        return true;
    }
    allow_short_seq_no
        && matches!(
            ty,
            PacketType::Data | PacketType::Ack | PacketType::DataAck
        )
}

/// Size of the generic header in bytes, by X.
pub fn generic_header_size(x: bool) -> usize {
    if x {
        16
    } else {
        12
    }
}

/// Size of the acknowledgement number subheader in bytes.
pub fn ack_subheader_size(ty: PacketType, x: bool) -> usize {
    if !ty.has_ack_no() {
        0
    } else if x {
        8
    } else {
        4
    }
}

/// Size of the code subheader in bytes: a 32-bit service code on
/// Request and Response, a 32-bit reset code plus data on Reset.
pub fn code_subheader_size(ty: PacketType) -> usize {
    match ty {
        PacketType::Request | PacketType::Response | PacketType::Reset => 4,
        _ => 0,
    }
}

/// Total fixed header size for (type, X): everything before the
/// options region.
pub fn fixed_header_size(ty: PacketType, x: bool) -> usize {
    generic_header_size(x) + ack_subheader_size(ty, x) + code_subheader_size(ty)
}

/// Single byte of padding.
pub const OPT_PADDING: u8 = 0;
/// Marks the following option as mandatory.
pub const OPT_MANDATORY: u8 = 1;
/// Receiver asks the sender to slow down.
pub const OPT_SLOW_RECEIVER: u8 = 2;
/// Feature negotiation, Change L.
pub const OPT_CHANGE_L: u8 = 32;
/// Feature negotiation, Confirm L.
pub const OPT_CONFIRM_L: u8 = 33;
/// Feature negotiation, Change R.
pub const OPT_CHANGE_R: u8 = 34;
/// Feature negotiation, Confirm R.
pub const OPT_CONFIRM_R: u8 = 35;
/// Count of non-data packets.
pub const OPT_NDP_COUNT: u8 = 37;
/// Ack vector, nonce 0.
pub const OPT_ACK_VECTOR_0: u8 = 38;
/// Ack vector, nonce 1.
pub const OPT_ACK_VECTOR_1: u8 = 39;
/// Data dropped report.
pub const OPT_DATA_DROPPED: u8 = 40;
/// Sender timestamp.
pub const OPT_TIMESTAMP: u8 = 41;
/// Echo of a received timestamp.
pub const OPT_TIMESTAMP_ECHO: u8 = 42;
/// Time the acknowledged packet was held before the ack.
pub const OPT_ELAPSED_TIME: u8 = 43;
/// CCID3 inverse loss event rate report.
pub const OPT_LOSS_EVENT_RATE: u8 = 192;
/// CCID3 receive rate report.
pub const OPT_RECEIVE_RATE: u8 = 194;

/// Options below 32 consist of the type byte alone.
pub fn is_option_single_byte(t: u8) -> bool {
    t < 32
}

/// Which option types are legal on which packet types. Unknown
/// options are legal nowhere and get dropped during sanitization.
pub fn is_option_valid_for_type(opt: u8, ty: PacketType) -> bool {
    match opt {
        OPT_PADDING | OPT_NDP_COUNT | OPT_TIMESTAMP | OPT_TIMESTAMP_ECHO => true,
        OPT_MANDATORY => ty != PacketType::Data,
        OPT_SLOW_RECEIVER => !matches!(ty, PacketType::Request | PacketType::Response),
        OPT_CHANGE_L | OPT_CONFIRM_L | OPT_CHANGE_R | OPT_CONFIRM_R => ty != PacketType::Data,
        OPT_ACK_VECTOR_0 | OPT_ACK_VECTOR_1 | OPT_DATA_DROPPED | OPT_ELAPSED_TIME => {
            ty.has_ack_no()
        }
        OPT_LOSS_EVENT_RATE | OPT_RECEIVE_RATE => ty.has_ack_no(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_header_sizes() {
        assert_eq!(fixed_header_size(PacketType::Request, true), 20);
        assert_eq!(fixed_header_size(PacketType::Response, true), 28);
        assert_eq!(fixed_header_size(PacketType::Data, true), 16);
        assert_eq!(fixed_header_size(PacketType::Data, false), 12);
        assert_eq!(fixed_header_size(PacketType::Ack, true), 24);
        assert_eq!(fixed_header_size(PacketType::Ack, false), 16);
        assert_eq!(fixed_header_size(PacketType::DataAck, true), 24);
        assert_eq!(fixed_header_size(PacketType::DataAck, false), 16);
        assert_eq!(fixed_header_size(PacketType::Reset, true), 28);
        assert_eq!(fixed_header_size(PacketType::Sync, true), 24);
        assert_eq!(fixed_header_size(PacketType::SyncAck, true), 24);
        assert_eq!(fixed_header_size(PacketType::Close, true), 24);
        assert_eq!(fixed_header_size(PacketType::CloseReq, true), 24);
    }

    #[test]
    fn test_type_x_compatibility() {
        for &ty in &[PacketType::Data, PacketType::Ack, PacketType::DataAck] {
            assert!(type_and_x_compatible(ty, false, true));
            assert!(!type_and_x_compatible(ty, false, false));
            assert!(type_and_x_compatible(ty, true, false));
        }
        for &ty in &[
            PacketType::Request,
            PacketType::Response,
            PacketType::CloseReq,
            PacketType::Close,
            PacketType::Reset,
            PacketType::Sync,
            PacketType::SyncAck,
        ] {
            assert!(!type_and_x_compatible(ty, false, true));
            assert!(type_and_x_compatible(ty, true, true));
        }
    }

    #[test]
    fn test_option_catalog() {
        assert!(is_option_valid_for_type(OPT_PADDING, PacketType::Data));
        assert!(!is_option_valid_for_type(OPT_MANDATORY, PacketType::Data));
        assert!(is_option_valid_for_type(OPT_MANDATORY, PacketType::Request));
        assert!(!is_option_valid_for_type(OPT_SLOW_RECEIVER, PacketType::Request));
        assert!(!is_option_valid_for_type(OPT_RECEIVE_RATE, PacketType::Data));
        assert!(is_option_valid_for_type(OPT_RECEIVE_RATE, PacketType::Ack));
        // Unknown options are valid nowhere.
        assert!(!is_option_valid_for_type(77, PacketType::Ack));
    }
}
