use bytes::Bytes;
use wim_apdu_core::Command;

use crate::constants::{cla, ins};

/// READ BINARY of `length` bytes at `offset` in the selected EF
pub fn read_binary(offset: u16, length: usize) -> Command {
    Command::with_p1p2(cla::ISO, ins::READ_BINARY, offset & 0x7FFF).with_le(length)
}

/// UPDATE BINARY of `data` at `offset` in the selected EF
pub fn update_binary(offset: u16, data: impl Into<Bytes>) -> Command {
    Command::with_p1p2(cla::ISO, ins::UPDATE_BINARY, offset & 0x7FFF).with_data(data)
}
