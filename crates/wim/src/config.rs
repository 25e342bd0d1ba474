//! Configuration options for a WIM card session

use crate::constants::{
    DEFAULT_SE_ID, GENERIC_RSA_SE_OWNER, MAX_CHUNK, ODF_FID, TOKEN_INFO_FID, UNUSED_SPACE_FID,
    WIM_AID, WIM_APPLICATION_PATH,
};
use crate::types::Path;

/// Configuration options for a WIM card session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WimConfig {
    /// AID used to select the WIM application
    pub application_aid: &'static [u8],

    /// Path of the PKCS#15 application DF; relative paths are resolved against it
    pub application_path: &'static [u16],

    /// File identifier of EF(ODF)
    pub odf_fid: u16,

    /// File identifier of EF(TokenInfo)
    pub token_info_fid: u16,

    /// File identifier of EF(UnusedSpace)
    pub unused_space_fid: u16,

    /// Largest number of bytes moved by a single READ or UPDATE BINARY
    pub max_chunk: usize,

    /// Security environment used when TokenInfo declares no generic RSA one
    pub default_se_id: u8,

    /// Owner OID identifying the generic RSA security environment in TokenInfo
    pub generic_rsa_se_owner: &'static str,
}

impl Default for WimConfig {
    fn default() -> Self {
        Self {
            application_aid: WIM_AID,
            application_path: WIM_APPLICATION_PATH,
            odf_fid: ODF_FID,
            token_info_fid: TOKEN_INFO_FID,
            unused_space_fid: UNUSED_SPACE_FID,
            max_chunk: MAX_CHUNK,
            default_se_id: DEFAULT_SE_ID,
            generic_rsa_se_owner: GENERIC_RSA_SE_OWNER,
        }
    }
}

impl WimConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application AID
    pub const fn with_application_aid(mut self, aid: &'static [u8]) -> Self {
        self.application_aid = aid;
        self
    }

    /// Set the application DF path
    pub const fn with_application_path(mut self, path: &'static [u16]) -> Self {
        self.application_path = path;
        self
    }

    /// Set the EF(UnusedSpace) file identifier
    pub const fn with_unused_space_fid(mut self, fid: u16) -> Self {
        self.unused_space_fid = fid;
        self
    }

    /// Set the I/O chunk size
    pub const fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    /// Set the fallback security environment
    pub const fn with_default_se_id(mut self, se_id: u8) -> Self {
        self.default_se_id = se_id;
        self
    }

    pub(crate) fn application_path(&self) -> Path {
        Path::from(self.application_path.to_vec())
    }

    pub(crate) fn odf_path(&self) -> Path {
        self.application_path().join(self.odf_fid)
    }

    pub(crate) fn token_info_path(&self) -> Path {
        self.application_path().join(self.token_info_fid)
    }

    pub(crate) fn unused_space_path(&self) -> Path {
        self.application_path().join(self.unused_space_fid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = WimConfig::new();
        assert_eq!(config.odf_path().to_string(), "3F00/5015/5031");
        assert_eq!(config.token_info_path().to_string(), "3F00/5015/5032");
        assert_eq!(config.unused_space_path().to_string(), "3F00/5015/5033");
        assert_eq!(config.max_chunk, 240);
    }

    #[test]
    fn test_builder() {
        let config = WimConfig::new().with_max_chunk(64).with_default_se_id(3);
        assert_eq!(config.max_chunk, 64);
        assert_eq!(config.default_se_id, 3);
    }
}
