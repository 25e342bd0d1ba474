use bytes::Bytes;
use wim_apdu_core::Command;

use crate::constants::{MF_FID, cla, ins};
use crate::types::Path;

/// SELECT by DF name, returning the FCI
pub fn select_application(aid: &[u8]) -> Command {
    Command::new(cla::ISO, ins::SELECT, 0x04, 0x00)
        .with_data(Bytes::copy_from_slice(aid))
        .with_le(256)
}

/// SELECT by path from the MF, returning the FCP template
///
/// The leading `3F00` of an absolute path is implied by P1 = 08 and is not sent.
/// Selecting the MF itself uses its file identifier.
pub fn select_path(path: &Path) -> Command {
    let fids = match path.split_first() {
        Some((&MF_FID, rest)) => rest,
        _ => &path[..],
    };
    if fids.is_empty() {
        return Command::new(cla::ISO, ins::SELECT, 0x00, 0x04)
            .with_data(Bytes::copy_from_slice(&MF_FID.to_be_bytes()))
            .with_le(256);
    }
    let data: Bytes = fids.iter().flat_map(|fid| fid.to_be_bytes()).collect();
    Command::new(cla::ISO, ins::SELECT, 0x08, 0x04)
        .with_data(data)
        .with_le(256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_path() {
        let path = Path::from(vec![0x3F00, 0x5015, 0x4401]);
        let command = select_path(&path).to_bytes().unwrap();
        assert_eq!(
            command.as_ref(),
            &[0x00, 0xA4, 0x08, 0x04, 0x04, 0x50, 0x15, 0x44, 0x01, 0x00]
        );

        let command = select_path(&Path::from(vec![0x3F00])).to_bytes().unwrap();
        assert_eq!(command.as_ref(), &[0x00, 0xA4, 0x00, 0x04, 0x02, 0x3F, 0x00, 0x00]);
    }

    #[test]
    fn test_select_application() {
        let command = select_application(crate::constants::WIM_AID);
        assert_eq!(command.p1p2(), 0x0400);
        assert_eq!(command.payload().len(), 12);
    }
}
