//! RSA signatures computed by the card

use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};
use wim_apdu_core::CardTransport;

use crate::commands::{mse_restore, mse_set_signing_key, pso_compute_signature};
use crate::connection::Connection;
use crate::constants::SHA1_DIGEST_INFO_PREFIX;
use crate::types::PrivateKey;
use crate::{Error, Result};

/// Hash `data` with SHA-1 and have the card sign it with `key`
///
/// The key's PIN must already be verified.
pub fn sign<T: CardTransport>(
    connection: &mut Connection<T>,
    se_id: u8,
    key: &PrivateKey,
    data: &[u8],
) -> Result<Bytes> {
    let digest = Sha1::digest(data);
    sign_digest(connection, se_id, key, &digest)
}

/// Sign a precomputed SHA-1 digest
#[instrument(level = "debug", skip_all, fields(key = %hex::encode_upper(&key.id), se_id = se_id))]
pub fn sign_digest<T: CardTransport>(
    connection: &mut Connection<T>,
    se_id: u8,
    key: &PrivateKey,
    digest: &[u8],
) -> Result<Bytes> {
    connection.execute(&mse_restore(se_id))?;
    connection.execute(&mse_set_signing_key(key.key_reference, &key.path))?;

    let mut digest_info = BytesMut::with_capacity(SHA1_DIGEST_INFO_PREFIX.len() + digest.len());
    digest_info.put_slice(SHA1_DIGEST_INFO_PREFIX);
    digest_info.put_slice(digest);

    let response = connection.execute(&pso_compute_signature(digest_info.freeze()))?;
    // the card prefixes the signature with one byte
    if response.len() < 2 {
        return Err(Error::MalformedEncoding("signature response too short"));
    }
    debug!(length = response.len() - 1, "Signature computed");
    Ok(response.slice(1..))
}
