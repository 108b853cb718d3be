//! Opaque entity ids.
//!
//! Ids are fixed-width hex strings over a 16-byte layout: bytes 0..4 carry
//! the big-endian tenant key, the high nibble of byte 4 carries the entity
//! tag, and the remaining 92 bits are random. Decoding recovers the tenant
//! key and tag; the random remainder is never interpreted.
use crate::error::{Error, Result};
use crate::model::App;
use rand::RngCore;

pub const USER_TAG: u8 = 0x1;
pub const ROLE_TAG: u8 = 0x2;

const RAW_LEN: usize = 16;

pub fn new_user_id(key: u32) -> String {
    new_id(key, USER_TAG)
}

pub fn new_role_id(key: u32) -> String {
    new_id(key, ROLE_TAG)
}

fn new_id(key: u32, tag: u8) -> String {
    let mut raw = [0u8; RAW_LEN];
    rand::thread_rng().fill_bytes(&mut raw);
    raw[..4].copy_from_slice(&key.to_be_bytes());
    raw[4] = (tag << 4) | (raw[4] & 0x0f);
    hex::encode(raw)
}

/// Decode an id into `(tenant_key, tag)`.
pub fn dec_id(id: &str) -> Result<(u32, u8)> {
    let raw = hex::decode(id).map_err(|_| Error::invalid_argument("malformed id"))?;
    if raw.len() != RAW_LEN {
        return Err(Error::invalid_argument("malformed id"));
    }
    let key = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    Ok((key, raw[4] >> 4))
}

/// True iff every id decodes to the given app's tenant key.
pub fn id_belongs_to_app<'a>(app: &App, ids: impl IntoIterator<Item = &'a str>) -> bool {
    ids.into_iter()
        .all(|id| matches!(dec_id(id), Ok((key, _)) if key == app.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AppSpec;

    fn app(key: u32) -> App {
        App::parse(
            AppSpec {
                id: format!("app{key}"),
                key,
                secret: String::new(),
                fingerprint: String::new(),
                permissions: Vec::new(),
            },
            &[],
        )
        .expect("parse")
    }

    #[test]
    fn ids_are_fixed_width_and_decode() {
        let id = new_user_id(7);
        assert_eq!(id.len(), RAW_LEN * 2);
        assert_eq!(dec_id(&id).expect("decode"), (7, USER_TAG));
        let id = new_role_id(0xdead_beef);
        assert_eq!(dec_id(&id).expect("decode"), (0xdead_beef, ROLE_TAG));
    }

    #[test]
    fn ids_carry_entropy() {
        assert_ne!(new_user_id(7), new_user_id(7));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(dec_id("zz").is_err());
        assert!(dec_id("00112233").is_err());
        assert!(dec_id("").is_err());
    }

    #[test]
    fn ownership_check_requires_every_id() {
        let a = app(7);
        let mine = new_user_id(7);
        let theirs = new_user_id(8);
        assert!(id_belongs_to_app(&a, [mine.as_str()]));
        assert!(!id_belongs_to_app(&a, [mine.as_str(), theirs.as_str()]));
        assert!(!id_belongs_to_app(&a, ["garbage"]));
    }

    #[test]
    fn no_id_decodes_to_two_tenants() {
        let a = app(7);
        let b = app(9);
        let id = new_user_id(7);
        assert!(id_belongs_to_app(&a, [id.as_str()]));
        assert!(!id_belongs_to_app(&b, [id.as_str()]));
    }
}
