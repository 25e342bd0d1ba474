use bytes::Bytes;
use wim_apdu_core::Command;

use crate::constants::{cla, ins};

/// PERFORM SECURITY OPERATION: COMPUTE DIGITAL SIGNATURE over a DigestInfo
pub fn pso_compute_signature(digest_info: impl Into<Bytes>) -> Command {
    Command::new(cla::ISO, ins::PSO, 0x9E, 0x9A)
        .with_data(digest_info)
        .with_le(256)
}
