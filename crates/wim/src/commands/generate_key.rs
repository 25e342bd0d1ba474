use bytes::{BufMut, BytesMut};
use wim_apdu_core::Command;

use crate::constants::{cla, ins};
use crate::types::KeyUsage;

/// P1 of the capability probe
pub const GENERATE_KEY_PROBE: u8 = 0x00;
/// P1 of the actual generation
pub const GENERATE_KEY_RUN: u8 = 0x80;

/// Ask whether the card can generate a key of this size and usage
pub fn generate_key_probe(modulus_bits: u16, usage: KeyUsage) -> Command {
    let mut data = BytesMut::with_capacity(3);
    data.put_u16(modulus_bits);
    data.put_u8(usage.keygen_flag());
    Command::new(cla::PROPRIETARY, ins::GENERATE_KEY, GENERATE_KEY_PROBE, 0x00)
        .with_data(data.freeze())
        .with_le(256)
}
