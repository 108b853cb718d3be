//! Bearer-token codec.
//!
//! A token is `base64url(key_be4 ‖ nonce ‖ ciphertext)`: the tenant key in
//! clear so decoding can find the app, then the user id encrypted under the
//! app's fingerprint-derived AES-256-GCM cipher with a fresh nonce. Tokens
//! are opaque to clients and only valid while they match the session store.
use crate::apps::AppRegistry;
use crate::error::{Error, Result};
use crate::id;
use crate::model::App;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::sync::Arc;

const KEY_PREFIX_LEN: usize = 4;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypt a fresh token for `(app, user_id)`.
pub fn new_token(app: &App, user_id: &str) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(&app.cipher_key).map_err(|_| Error::InvalidToken)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, user_id.as_bytes())
        .map_err(|_| Error::InvalidToken)?;
    let mut raw = Vec::with_capacity(KEY_PREFIX_LEN + NONCE_LEN + ciphertext.len());
    raw.extend_from_slice(&app.key.to_be_bytes());
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Decrypt a token back to `(app, user_id)`. Any structural or crypto
/// failure is reported as `InvalidToken` without further detail.
pub fn dec_token(apps: &AppRegistry, token: &str) -> Result<(Arc<App>, String)> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| Error::InvalidToken)?;
    if raw.len() < KEY_PREFIX_LEN + NONCE_LEN + TAG_LEN {
        return Err(Error::InvalidToken);
    }
    let key = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let app = apps.find_by_key(key).ok_or(Error::InvalidToken)?;
    let cipher = Aes256Gcm::new_from_slice(&app.cipher_key).map_err(|_| Error::InvalidToken)?;
    let nonce = Nonce::from_slice(&raw[KEY_PREFIX_LEN..KEY_PREFIX_LEN + NONCE_LEN]);
    let plaintext = cipher
        .decrypt(nonce, &raw[KEY_PREFIX_LEN + NONCE_LEN..])
        .map_err(|_| Error::InvalidToken)?;
    let user_id = String::from_utf8(plaintext).map_err(|_| Error::InvalidToken)?;
    // The embedded user id must itself belong to the prefixed tenant.
    match id::dec_id(&user_id) {
        Ok((id_key, _)) if id_key == app.key => Ok((app, user_id)),
        _ => Err(Error::InvalidToken),
    }
}
