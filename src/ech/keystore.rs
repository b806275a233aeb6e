//! ECH key store and lifecycle.
//!
//! Keys move through `active → grace_period → retired` and are deleted 30
//! days after retirement. A key is advertised to clients only while active
//! (30 days) but stays decryptable for slaves through a 180-day grace
//! window, so a key is usable for roughly 210 days total.

use std::collections::HashSet;
use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::models::{now_ts, EchKey, EchKeyStatus};
use crate::storage::{Store, StoreError};

use super::secretbox::{SecretBox, SecretBoxError};
use super::wire::{self, EchConfig};

/// Advertised lifetime of an active key.
pub const ACTIVE_LIFETIME_SECS: i64 = 30 * 86_400;

/// Post-expiry window during which slaves can still decrypt with the key.
pub const GRACE_LIFETIME_SECS: i64 = 180 * 86_400;

/// Retired keys are garbage-collected after this long.
pub const RETIRED_RETENTION_SECS: i64 = 30 * 86_400;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] SecretBoxError),

    #[error("all 255 ECH config ids are reserved")]
    ExhaustedConfigIds,

    #[error("no active ECH key")]
    NotFound,
}

/// Decrypted key material handed to slaves.
pub struct EchKeyMaterial {
    pub config_id: u8,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub config: Vec<u8>,
}

/// Outcome of one rotation tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub transitioned: usize,
    pub retired: usize,
    pub generated: bool,
    pub deleted: usize,
}

/// Process-wide ECH key manager.
pub struct EchKeystore {
    store: Arc<Store>,
    secret: SecretBox,
}

impl EchKeystore {
    pub fn new(store: Arc<Store>, secret: SecretBox) -> Self {
        Self { store, secret }
    }

    /// Generate, encrypt, and persist a fresh active key.
    pub fn generate(&self, now: i64) -> Result<EchKey, KeystoreError> {
        let config_id = self.allocate_config_id()?;

        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let seed = clamp_scalar(seed);
        let private = StaticSecret::from(seed);
        let public = PublicKey::from(&private);

        let config = EchConfig::for_public_key(config_id, public.to_bytes()).encode();

        let mut key = EchKey {
            id: 0,
            config_id,
            public_key: self.secret.encrypt(public.as_bytes())?,
            private_key: self.secret.encrypt(&seed)?,
            config: self.secret.encrypt(&config)?,
            kem_id: wire::KEM_X25519_HKDF_SHA256,
            kdf_id: wire::KDF_HKDF_SHA256,
            aead_id: wire::AEAD_AES_128_GCM,
            status: EchKeyStatus::Active,
            activated_at: now,
            expires_at: now + ACTIVE_LIFETIME_SECS,
            retired_at: None,
        };
        self.store.ech_insert(&mut key)?;
        tracing::info!(config_id, expires_at = key.expires_at, "generated ECH key");
        Ok(key)
    }

    /// Idempotent: returns the newest active key, generating one only when
    /// none exists. Racing callers may each generate a key; multiple active
    /// keys are legal and `active_key` picks the newest.
    pub fn ensure_active(&self, now: i64) -> Result<EchKey, KeystoreError> {
        if let Some(key) = self.active_key()? {
            return Ok(key);
        }
        self.generate(now)
    }

    /// Newest active key by `activated_at`, if any.
    pub fn active_key(&self) -> Result<Option<EchKey>, KeystoreError> {
        Ok(self
            .store
            .ech_all()?
            .into_iter()
            .filter(|k| k.status == EchKeyStatus::Active)
            .max_by_key(|k| (k.activated_at, k.id)))
    }

    /// All keys slaves may decrypt with: active first, then grace-period,
    /// newest `activated_at` first within each status.
    pub fn decryptable_keys(&self) -> Result<Vec<EchKey>, KeystoreError> {
        let mut keys: Vec<EchKey> = self
            .store
            .ech_all()?
            .into_iter()
            .filter(|k| matches!(k.status, EchKeyStatus::Active | EchKeyStatus::GracePeriod))
            .collect();
        keys.sort_by_key(|k| (k.status, std::cmp::Reverse((k.activated_at, k.id))));
        Ok(keys)
    }

    /// Decrypt a key's stored blobs. Fails closed per key.
    pub fn decrypt_material(&self, key: &EchKey) -> Result<EchKeyMaterial, KeystoreError> {
        Ok(EchKeyMaterial {
            config_id: key.config_id,
            public_key: self.secret.decrypt(&key.public_key)?,
            private_key: self.secret.decrypt(&key.private_key)?,
            config: self.secret.decrypt(&key.config)?,
        })
    }

    /// ECHConfigList bytes for the newest active key, with that key.
    pub fn active_config_list(&self) -> Result<Option<(Vec<u8>, EchKey)>, KeystoreError> {
        let Some(key) = self.active_key()? else {
            return Ok(None);
        };
        let config = self.secret.decrypt(&key.config)?;
        Ok(Some((wire::encode_config_list(&[config]), key)))
    }

    /// One rotation tick. Phases run in this exact order, each in its own
    /// write transaction:
    ///
    /// 1. active keys past `expires_at` move to grace
    /// 2. grace keys past `expires_at + grace` retire
    /// 3. if no active key remains, generate one
    /// 4. retired keys past retention are deleted
    pub fn rotate(&self, now: i64) -> Result<RotationReport, KeystoreError> {
        let transitioned = self.store.ech_transition_expired(now)?;
        let retired = self.store.ech_retire_graced(now, GRACE_LIFETIME_SECS)?;

        let generated = if self.active_key()?.is_none() {
            self.generate(now)?;
            true
        } else {
            false
        };

        let deleted = self.store.ech_gc_retired(now, RETIRED_RETENTION_SECS)?;

        Ok(RotationReport {
            transitioned,
            retired,
            generated,
            deleted,
        })
    }

    /// Pick the next free config id in [1, 255].
    ///
    /// Ids currently held by active or grace-period keys are reserved; the
    /// scan starts just after the most recently allocated id and wraps.
    fn allocate_config_id(&self) -> Result<u8, KeystoreError> {
        let reserved: HashSet<u8> = self
            .store
            .ech_all()?
            .into_iter()
            .filter(|k| matches!(k.status, EchKeyStatus::Active | EchKeyStatus::GracePeriod))
            .map(|k| k.config_id)
            .collect();

        let mut candidate = self.store.ech_last_config_id()?;
        for _ in 0..255 {
            candidate = candidate % 255 + 1;
            if !reserved.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(KeystoreError::ExhaustedConfigIds)
    }
}

/// RFC 7748 scalar clamping.
fn clamp_scalar(mut s: [u8; 32]) -> [u8; 32] {
    s[0] &= 248;
    s[31] &= 127;
    s[31] |= 64;
    s
}

/// Convenience wrapper used by paths that want "now".
impl EchKeystore {
    pub fn ensure_active_now(&self) -> Result<EchKey, KeystoreError> {
        self.ensure_active(now_ts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_store, raw_ech_key};

    fn keystore() -> (EchKeystore, tempfile::TempDir) {
        let (store, dir) = open_store();
        (
            EchKeystore::new(Arc::new(store), SecretBox::new(&[5u8; 32])),
            dir,
        )
    }

    #[test]
    fn clamping_matches_rfc_7748() {
        let s = clamp_scalar([0xff; 32]);
        assert_eq!(s[0] & 0b0000_0111, 0);
        assert_eq!(s[31] & 0b1000_0000, 0);
        assert_eq!(s[31] & 0b0100_0000, 0b0100_0000);
    }

    #[test]
    fn generated_key_round_trips_through_wire_codec() {
        let (ks, _dir) = keystore();
        let key = ks.generate(1_000).unwrap();

        let material = ks.decrypt_material(&key).unwrap();
        assert_eq!(material.public_key.len(), 32);
        assert_eq!(material.private_key.len(), 32);

        // The stored config is bit-exact compatible with the stored key.
        let (decoded, _) = EchConfig::decode(&material.config).unwrap();
        assert_eq!(decoded.config_id, key.config_id);
        assert_eq!(decoded.public_key, material.public_key);
        assert_eq!(decoded.cipher_suites, wire::CIPHER_SUITES.to_vec());

        // X25519 is deterministic: recompute the public key from the secret.
        let seed: [u8; 32] = material.private_key.clone().try_into().unwrap();
        let public = PublicKey::from(&StaticSecret::from(seed));
        assert_eq!(public.as_bytes().as_slice(), material.public_key);
    }

    #[test]
    fn ensure_active_is_idempotent() {
        let (ks, _dir) = keystore();
        let a = ks.ensure_active(1_000).unwrap();
        let b = ks.ensure_active(2_000).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn active_key_prefers_newest_activation() {
        let (ks, _dir) = keystore();
        let old = ks.generate(1_000).unwrap();
        let new = ks.generate(5_000).unwrap();
        assert_ne!(old.config_id, new.config_id);
        assert_eq!(ks.active_key().unwrap().unwrap().id, new.id);
    }

    #[test]
    fn config_ids_skip_reserved_and_wrap() {
        let (ks, _dir) = keystore();
        let a = ks.generate(1_000).unwrap();
        let b = ks.generate(1_000).unwrap();
        assert_eq!(b.config_id, a.config_id % 255 + 1);
    }

    #[test]
    fn exhausted_config_ids_is_an_error() {
        let (store, _dir) = open_store();
        for id in 1..=255u16 {
            let mut key = raw_ech_key(id as u8, EchKeyStatus::Active, 0, i64::MAX);
            store.ech_insert(&mut key).unwrap();
        }
        let ks = EchKeystore::new(Arc::new(store), SecretBox::new(&[5u8; 32]));
        assert!(matches!(
            ks.generate(1_000),
            Err(KeystoreError::ExhaustedConfigIds)
        ));
    }

    #[test]
    fn rotation_tick_runs_all_phases_in_order() {
        let (store, _dir) = open_store();
        let store = Arc::new(store);
        let ks = EchKeystore::new(store.clone(), SecretBox::new(&[5u8; 32]));

        let now = 1_000_000;
        // K1: active, already expired.
        let mut k1 = raw_ech_key(1, EchKeyStatus::Active, now - 100, now - 1);
        store.ech_insert(&mut k1).unwrap();
        // K2: grace, past the grace window.
        let mut k2 = raw_ech_key(
            2,
            EchKeyStatus::GracePeriod,
            now - 200,
            now - GRACE_LIFETIME_SECS - 1,
        );
        store.ech_insert(&mut k2).unwrap();

        let report = ks.rotate(now).unwrap();
        assert_eq!(report.transitioned, 1);
        assert_eq!(report.retired, 1);
        assert!(report.generated);
        assert_eq!(report.deleted, 0);

        let decryptable = ks.decryptable_keys().unwrap();
        assert_eq!(decryptable.len(), 2);
        // Active (the fresh K3) first, then K1 in grace.
        assert_eq!(decryptable[0].status, EchKeyStatus::Active);
        assert_eq!(decryptable[1].config_id, 1);
        assert_eq!(decryptable[1].status, EchKeyStatus::GracePeriod);
    }

    #[test]
    fn rotation_is_idempotent() {
        let (store, _dir) = open_store();
        let store = Arc::new(store);
        let ks = EchKeystore::new(store, SecretBox::new(&[5u8; 32]));

        let now = 1_000_000;
        ks.generate(now).unwrap();
        let first = ks.rotate(now).unwrap();
        assert_eq!(first, RotationReport::default());
        let second = ks.rotate(now).unwrap();
        assert_eq!(second, RotationReport::default());
    }

    #[test]
    fn decryptable_keys_never_include_retired() {
        let (store, _dir) = open_store();
        let mut retired = raw_ech_key(9, EchKeyStatus::Retired, 0, 1);
        store.ech_insert(&mut retired).unwrap();
        let ks = EchKeystore::new(Arc::new(store), SecretBox::new(&[5u8; 32]));
        assert!(ks.decryptable_keys().unwrap().is_empty());
    }
}
