//! Post-quantum key bundles minted from whitened output.
//!
//! A mint takes 64 whitened bytes, binds them to the owner label through
//! SHA3-512, and splits the digest into two 32-byte seeds:
//!
//! - an ML-KEM-768 keypair generated from a ChaCha20 stream keyed by the first
//! - an ML-DSA-65 keypair from the second, used as the FIPS 204 `ξ` seed
//!
//! The signing key then signs the encapsulation key (the attestation), and
//! the bundle is written as one JSON document named `<uuid>.json` through a
//! temp file and an atomic rename. Seeds are zeroized as soon as the keys
//! exist; secret key material never reaches `Debug` output or logs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ml_dsa::{EncodedVerifyingKey, KeyGen, MlDsa65, Signature, VerifyingKey};
use ml_kem::kem::{DecapsulationKey, EncapsulationKey};
use ml_kem::{Encoded, EncodedSizeUser, KemCore, MlKem768, MlKem768Params};
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_512};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::config::validate_owner_label;
use crate::error::{EngineError, Result};

/// Whitened bytes consumed per mint.
pub const MINT_SEED_BYTES: usize = 64;

pub const KEM_ALGORITHM: &str = "ML-KEM-768";
pub const SIGNATURE_ALGORITHM: &str = "ML-DSA-65";

const BUNDLE_FORMAT_VERSION: u32 = 1;
const SEED_DOMAIN: &[u8] = b"chaosmagnet/vault/seed/v1";
const ATTESTATION_CONTEXT: &[u8] = b"chaosmagnet/vault/attest/v1";

/// One keypair, hex encoded.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyPairRecord {
    pub algorithm: String,
    pub public_key: String,
    pub secret_key: String,
}

impl Drop for KeyPairRecord {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPairRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairRecord")
            .field("algorithm", &self.algorithm)
            .field("public_key_len", &(self.public_key.len() / 2))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A persisted KEM + signature bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub format_version: u32,
    pub id: Uuid,
    pub owner_label: String,
    /// RFC 3339 UTC.
    pub created_at: String,
    pub kem: KeyPairRecord,
    pub signature: KeyPairRecord,
    /// ML-DSA signature over the raw ML-KEM encapsulation key, hex.
    pub attestation: String,
}

/// The public half of a bundle, safe to hand to anyone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicBundle {
    pub id: Uuid,
    pub owner_label: String,
    pub created_at: String,
    pub kem_algorithm: String,
    pub kem_public_key: String,
    pub signature_algorithm: String,
    pub signature_public_key: String,
    pub attestation: String,
}

/// Listing entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BundleSummary {
    pub id: Uuid,
    pub owner_label: String,
    pub created_at: String,
}

fn key_error(what: &str) -> EngineError {
    EngineError::KeyGeneration(format!("malformed {what}"))
}

impl KeyBundle {
    /// Derive a bundle from `seed`. Same seed and label give the same keys.
    pub fn derive(owner_label: &str, seed: &[u8]) -> Result<Self> {
        let owner_label = validate_owner_label(owner_label)?;
        if seed.len() < MINT_SEED_BYTES {
            return Err(EngineError::KeyGeneration(format!(
                "seed of {} bytes, need {MINT_SEED_BYTES}",
                seed.len()
            )));
        }

        let mut h = Sha3_512::new();
        h.update(SEED_DOMAIN);
        h.update((owner_label.len() as u64).to_le_bytes());
        h.update(owner_label.as_bytes());
        h.update(seed);
        let mut digest = Zeroizing::new([0u8; 64]);
        digest.copy_from_slice(&h.finalize());

        let mut kem_seed = Zeroizing::new([0u8; 32]);
        let mut dsa_seed = Zeroizing::new([0u8; 32]);
        kem_seed.copy_from_slice(&digest[..32]);
        dsa_seed.copy_from_slice(&digest[32..]);

        let mut rng = ChaCha20Rng::from_seed(*kem_seed);
        let (dk, ek) = MlKem768::generate(&mut rng);
        let ek_bytes = ek.as_bytes();
        let dk_bytes = Zeroizing::new(dk.as_bytes().to_vec());

        let xi = (*dsa_seed).into();
        let dsa = MlDsa65::key_gen_internal(&xi);
        let attestation = dsa
            .signing_key()
            .sign_deterministic(ek_bytes.as_slice(), ATTESTATION_CONTEXT)
            .map_err(|_| EngineError::KeyGeneration("attestation signing failed".into()))?;
        let sk_bytes = Zeroizing::new(dsa.signing_key().encode().to_vec());

        Ok(Self {
            format_version: BUNDLE_FORMAT_VERSION,
            id: Uuid::new_v4(),
            owner_label: owner_label.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            kem: KeyPairRecord {
                algorithm: KEM_ALGORITHM.into(),
                public_key: hex::encode(ek_bytes.as_slice()),
                secret_key: hex::encode(dk_bytes.as_slice()),
            },
            signature: KeyPairRecord {
                algorithm: SIGNATURE_ALGORITHM.into(),
                public_key: hex::encode(dsa.verifying_key().encode().as_slice()),
                secret_key: hex::encode(sk_bytes.as_slice()),
            },
            attestation: hex::encode(attestation.encode().as_slice()),
        })
    }

    pub fn encapsulation_key(&self) -> Result<EncapsulationKey<MlKem768Params>> {
        let bytes = hex::decode(&self.kem.public_key).map_err(|_| key_error("KEM public key"))?;
        let enc = Encoded::<EncapsulationKey<MlKem768Params>>::try_from(bytes.as_slice())
            .map_err(|_| key_error("KEM public key"))?;
        Ok(EncapsulationKey::from_bytes(&enc))
    }

    pub fn decapsulation_key(&self) -> Result<DecapsulationKey<MlKem768Params>> {
        let bytes = Zeroizing::new(
            hex::decode(&self.kem.secret_key).map_err(|_| key_error("KEM secret key"))?,
        );
        let enc = Encoded::<DecapsulationKey<MlKem768Params>>::try_from(bytes.as_slice())
            .map_err(|_| key_error("KEM secret key"))?;
        Ok(DecapsulationKey::from_bytes(&enc))
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey<MlDsa65>> {
        let bytes =
            hex::decode(&self.signature.public_key).map_err(|_| key_error("signature public key"))?;
        let enc = EncodedVerifyingKey::<MlDsa65>::try_from(bytes.as_slice())
            .map_err(|_| key_error("signature public key"))?;
        Ok(VerifyingKey::<MlDsa65>::decode(&enc))
    }

    /// Check that the bundle's signing key signed its encapsulation key.
    pub fn verify_attestation(&self) -> Result<bool> {
        let vk = self.verifying_key()?;
        let ek = hex::decode(&self.kem.public_key).map_err(|_| key_error("KEM public key"))?;
        let sig_bytes = hex::decode(&self.attestation).map_err(|_| key_error("attestation"))?;
        let Ok(sig) = Signature::<MlDsa65>::try_from(sig_bytes.as_slice()) else {
            return Ok(false);
        };
        Ok(vk.verify_with_context(&ek, ATTESTATION_CONTEXT, &sig))
    }

    pub fn public_view(&self) -> PublicBundle {
        PublicBundle {
            id: self.id,
            owner_label: self.owner_label.clone(),
            created_at: self.created_at.clone(),
            kem_algorithm: self.kem.algorithm.clone(),
            kem_public_key: self.kem.public_key.clone(),
            signature_algorithm: self.signature.algorithm.clone(),
            signature_public_key: self.signature.public_key.clone(),
            attestation: self.attestation.clone(),
        }
    }
}

/// Directory of persisted bundles.
///
/// Readiness is probed once at construction and refreshed by each persist,
/// so [`Vault::is_ready`] never touches the filesystem.
#[derive(Debug, Clone)]
pub struct Vault {
    dir: PathBuf,
    ready: Arc<AtomicBool>,
}

impl Vault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let ready = Arc::new(AtomicBool::new(probe_dir(&dir)));
        Self { dir, ready }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the directory was writable at the last probe.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write `bundle` atomically. On any error nothing is left under its name.
    pub fn persist(&self, bundle: &KeyBundle) -> Result<PathBuf> {
        let written = self.write_bundle(bundle);
        let ready = written.is_ok() || probe_dir(&self.dir);
        self.ready.store(ready, Ordering::Relaxed);
        written
    }

    fn write_bundle(&self, bundle: &KeyBundle) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let json = Zeroizing::new(serde_json::to_vec_pretty(bundle)?);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        let path = self.path_for(&bundle.id);
        tmp.persist_noclobber(&path)
            .map_err(|e| EngineError::Persistence(e.error.to_string()))?;
        Ok(path)
    }

    /// Derive and persist a bundle in one step.
    pub fn mint(&self, owner_label: &str, seed: &[u8]) -> Result<KeyBundle> {
        let bundle = KeyBundle::derive(owner_label, seed)?;
        self.persist(&bundle)?;
        Ok(bundle)
    }

    /// Load a bundle by id.
    pub fn load(&self, id: &str) -> Result<KeyBundle> {
        let id = Uuid::parse_str(id.trim())
            .map_err(|_| EngineError::Configuration(format!("'{id}' is not a bundle id")))?;
        let data = Zeroizing::new(fs::read(self.path_for(&id))?);
        let bundle: KeyBundle = serde_json::from_slice(&data)?;
        if bundle.id != id {
            return Err(EngineError::Persistence(format!(
                "bundle file {id} holds bundle {}",
                bundle.id
            )));
        }
        Ok(bundle)
    }

    /// All readable bundles, oldest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<BundleSummary>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match self.load(stem) {
                Ok(b) => out.push(BundleSummary {
                    id: b.id,
                    owner_label: b.owner_label.clone(),
                    created_at: b.created_at.clone(),
                }),
                Err(e) => log::debug!("skipping {}: {e}", entry.path().display()),
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

/// The directory exists (or can be created) and is writable.
fn probe_dir(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}
