//! Decryption-key cache and AES-128-CBC segment decryption.
//!
//! Keys are fetched through the session's [`Fetch`] handle and cached by
//! key URI for the lifetime of the session. Padding problems are malformed
//! *content*, never programming errors: they surface as
//! [`HlsError::Malformed`] so the session can fail the stream gracefully.

use std::collections::HashMap;
use std::sync::Arc;

use aes::Aes128;
use aulos_net::Fetch;
use bytes::Bytes;
use cbc::{
    Decryptor,
    cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding},
};
use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::{HlsError, HlsResult};

const AES_BLOCK_SIZE: usize = 16;

/// Session-owned cache of 16-byte segment keys, keyed by key URI.
pub struct KeyCache {
    fetch: Arc<dyn Fetch>,
    keys: Mutex<HashMap<String, [u8; 16]>>,
}

impl KeyCache {
    #[must_use]
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self {
            fetch,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Get the key at `url`, fetching and caching it on first use.
    ///
    /// Returns the key and whether it came from the cache.
    pub async fn get_key(&self, url: &Url) -> HlsResult<([u8; 16], bool)> {
        if let Some(key) = self.keys.lock().get(url.as_str()) {
            trace!(key_url = %url, "segment key served from cache");
            return Ok((*key, true));
        }

        let bytes = self.fetch.fetch_bytes(url, None).await?;
        let key: [u8; 16] = bytes.as_ref().try_into().map_err(|_| {
            HlsError::Key(format!(
                "key at {url} has {} bytes, expected 16",
                bytes.len()
            ))
        })?;

        debug!(key_url = %url, "segment key fetched");
        self.keys.lock().insert(url.to_string(), key);
        Ok((key, false))
    }
}

/// Build the 16-byte IV for a segment: an explicit hex attribute if the
/// playlist declared one, else the big-endian sequence number.
pub fn build_iv(iv_hex: Option<&str>, sequence: i64) -> HlsResult<[u8; 16]> {
    match iv_hex {
        Some(raw) => {
            let digits = raw
                .strip_prefix("0x")
                .or_else(|| raw.strip_prefix("0X"))
                .unwrap_or(raw);
            let decoded = hex::decode(digits)
                .map_err(|e| HlsError::Malformed(format!("bad IV attribute {raw:?}: {e}")))?;
            decoded.as_slice().try_into().map_err(|_| {
                HlsError::Malformed(format!(
                    "IV attribute {raw:?} has {} bytes, expected 16",
                    decoded.len()
                ))
            })
        }
        None => {
            let mut iv = [0u8; 16];
            iv[8..].copy_from_slice(&(sequence as u64).to_be_bytes());
            Ok(iv)
        }
    }
}

/// AES-128-CBC decrypt a whole segment and strip PKCS7 padding.
///
/// The pad length must be 1–16 and every pad byte must equal it; anything
/// else is malformed content.
pub fn decrypt_segment(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> HlsResult<Bytes> {
    if data.is_empty() || !data.len().is_multiple_of(AES_BLOCK_SIZE) {
        return Err(HlsError::Malformed(format!(
            "encrypted segment length {} is not a positive multiple of {}",
            data.len(),
            AES_BLOCK_SIZE
        )));
    }

    let mut buf = data.to_vec();
    let decryptor = Decryptor::<Aes128>::new(key.into(), iv.into());
    decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| HlsError::Malformed(format!("CBC decrypt failed: {e}")))?;

    let pad = usize::from(buf[buf.len() - 1]);
    if pad == 0 || pad > AES_BLOCK_SIZE || pad > buf.len() {
        return Err(HlsError::Malformed(format!(
            "inconsistent pkcs7 padding: pad length {pad}"
        )));
    }
    if !buf[buf.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(HlsError::Malformed(
            "inconsistent pkcs7 padding: pad bytes differ".to_string(),
        ));
    }

    buf.truncate(buf.len() - pad);
    Ok(Bytes::from(buf))
}
