//! # ECH Key Material
//!
//! Everything around Encrypted Client Hello (draft-ietf-tls-esni-18) key
//! material: the at-rest envelope codec, the binary wire codec for
//! ECHConfig/ECHConfigList, the key store with its
//! `active → grace_period → retired → deleted` lifecycle, and the daily
//! rotation scheduler.
//!
//! The center never performs HPKE decryption itself; front-door slaves pull
//! decryptable keypairs and do that at the TLS edge.

pub mod keystore;
pub mod rotation;
pub mod secretbox;
pub mod wire;

pub use keystore::EchKeystore;
pub use rotation::RotationScheduler;
pub use secretbox::SecretBox;
