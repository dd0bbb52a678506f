//! Virtual power-on data (ATR) presented in place of a real card's answer to reset.
//!
//! The layout is fixed: an ISO header, historical bytes describing a C1 SAM, the unit's
//! software version and serial number, then the status bytes.

use std::fmt;

use hsmpool_driver::UnitInfo;

/// Length of the virtual ATR
pub const ATR_LEN: usize = 19;

const TEMPLATE: [u8; ATR_LEN] = [
    // ISO header
    0x3B, 0x3F, 0x96, 0x00, //
    // historical bytes
    0x80, 0x5A, //
    // platform
    0x00, //
    // application type: SAM
    0x80, //
    // application subtype: C1
    0xC1, //
    // software issuer
    0x08, //
    // software version [10], software revision [11]
    0x00, 0x00, //
    // serial number [12-15]
    0x00, 0x00, 0x00, 0x00, //
    // status
    0x82, 0x90, 0x00,
];

const VERSION_OFFSET: usize = 10;

// The serial field only carries the low 24 bits: byte 12 stays zero and the most significant
// byte of the serial number is dropped.
const SERIAL_OFFSET: usize = 13;

/// Power-on data of one allocated channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualAtr([u8; ATR_LEN]);

impl VirtualAtr {
    /// Patch the template with the unit's version and serial number
    #[must_use]
    pub fn new(info: &UnitInfo) -> Self {
        let mut bytes = TEMPLATE;
        bytes[VERSION_OFFSET] = info.version;
        let serial = info.serial_number.to_be_bytes();
        bytes[SERIAL_OFFSET..SERIAL_OFFSET + 3].copy_from_slice(&serial[1..]);
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Upper-case hex rendering
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl AsRef<[u8]> for VirtualAtr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for VirtualAtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
