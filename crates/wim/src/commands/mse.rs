use bytes::{BufMut, BytesMut};
use wim_apdu_core::Command;

use crate::constants::{cla, ins};
use crate::types::Path;

/// MANAGE SECURITY ENVIRONMENT: RESTORE
pub fn mse_restore(se_id: u8) -> Command {
    Command::new(cla::ISO, ins::MSE, 0xF3, se_id)
}

/// MANAGE SECURITY ENVIRONMENT: SET the digital signature template
///
/// Binds the key by reference (tag 84) and by the path of its file (tag 81).
pub fn mse_set_signing_key(key_reference: u8, key_path: &Path) -> Command {
    let path = key_path.to_bytes();
    let mut data = BytesMut::with_capacity(5 + path.len());
    data.put_slice(&[0x84, 0x01, key_reference]);
    data.put_u8(0x81);
    data.put_u8(path.len() as u8);
    data.put_slice(&path);
    Command::new(cla::ISO, ins::MSE, 0x41, 0xB6).with_data(data.freeze())
}
