use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as Base64, Engine as _};
use keyring::Entry;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

const KEYRING_SERVICE: &str = "astral.storefront.vault";
const VERSION_PREFIX: &str = "v1:";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 120_000;

#[derive(Clone)]
enum MasterSource {
    Keyring { account: String },
    Static(Vec<u8>),
}

/// Encrypts small secrets (the admin session token) before they are written
/// to local state. The master secret lives in the OS keyring unless one is
/// injected, which headless deployments and tests do.
#[derive(Clone)]
pub struct CryptoVault {
    source: MasterSource,
}

impl CryptoVault {
    pub fn from_database_path(path: &Path) -> AppResult<Self> {
        let account = account_from_path(path);
        Entry::new(KEYRING_SERVICE, &account)
            .map_err(|err| AppError::other(format!("cannot open system keyring: {err}")))?;
        Ok(Self {
            source: MasterSource::Keyring { account },
        })
    }

    pub fn with_master_secret(master: &[u8]) -> AppResult<Self> {
        if master.len() != KEY_LEN {
            return Err(AppError::validation("master secret must be 32 bytes"));
        }
        Ok(Self {
            source: MasterSource::Static(master.to_vec()),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> AppResult<String> {
        let master = self.master_secret()?;
        encrypt_with_master(&master, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> AppResult<Vec<u8>> {
        let master = self.master_secret()?;
        decrypt_with_master(&master, ciphertext)
    }

    fn master_secret(&self) -> AppResult<Vec<u8>> {
        match &self.source {
            MasterSource::Static(secret) => Ok(secret.clone()),
            MasterSource::Keyring { account } => {
                let entry = keyring_entry(account)?;
                match entry.get_password() {
                    Ok(secret) => decode_master_secret(&secret),
                    Err(keyring::Error::NoEntry) => create_master_secret(entry),
                    Err(err) => Err(AppError::other(format!("cannot read system keyring: {err}"))),
                }
            }
        }
    }
}

fn keyring_entry(account: &str) -> AppResult<Entry> {
    Entry::new(KEYRING_SERVICE, account)
        .map_err(|err| AppError::other(format!("cannot open system keyring: {err}")))
}

fn create_master_secret(entry: Entry) -> AppResult<Vec<u8>> {
    let mut secret = vec![0u8; KEY_LEN];
    OsRng.fill_bytes(&mut secret);
    let encoded = Base64.encode(&secret);
    entry
        .set_password(&encoded)
        .map_err(|err| AppError::other(format!("cannot write system keyring: {err}")))?;
    Ok(secret)
}

pub(crate) fn encrypt_with_master(master_secret: &[u8], plaintext: &[u8]) -> AppResult<String> {
    if master_secret.len() != KEY_LEN {
        return Err(AppError::other("invalid master secret length"));
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(master_secret, &salt);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| AppError::other("cannot initialize cipher"))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| AppError::other("encryption failed"))?;

    let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);

    Ok(format!("{VERSION_PREFIX}{}", Base64.encode(payload)))
}

pub(crate) fn decrypt_with_master(master_secret: &[u8], ciphertext: &str) -> AppResult<Vec<u8>> {
    if master_secret.len() != KEY_LEN {
        return Err(AppError::other("invalid master secret length"));
    }

    let encoded = ciphertext
        .strip_prefix(VERSION_PREFIX)
        .ok_or_else(|| AppError::other("unsupported ciphertext format"))?;

    let decoded = Base64
        .decode(encoded.as_bytes())
        .map_err(|_| AppError::other("ciphertext is not valid base64"))?;

    if decoded.len() <= SALT_LEN + NONCE_LEN {
        return Err(AppError::other("ciphertext too short"));
    }

    let (salt, rest) = decoded.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext_bytes) = rest.split_at(NONCE_LEN);

    let key = derive_key(master_secret, salt);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| AppError::other("cannot initialize cipher"))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext_bytes)
        .map_err(|_| AppError::other("decryption failed"))
}

fn derive_key(master: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(master, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn decode_master_secret(encoded: &str) -> AppResult<Vec<u8>> {
    let secret = Base64
        .decode(encoded.as_bytes())
        .map_err(|_| AppError::other("keyring credential is corrupt"))?;
    if secret.len() != KEY_LEN {
        return Err(AppError::other("keyring credential has wrong length"));
    }
    Ok(secret)
}

fn account_from_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"astral.storefront.local-state.v1");
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in digest[..16].iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("admin-token-{}", hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_and_decrypt_roundtrip() {
        let master = [42u8; KEY_LEN];
        let ciphertext = encrypt_with_master(&master, b"session-token").unwrap();
        let decrypted = decrypt_with_master(&master, &ciphertext).unwrap();
        assert_eq!(decrypted, b"session-token");
    }

    #[test]
    fn encrypt_produces_unique_ciphertext() {
        let master = [7u8; KEY_LEN];
        let first = encrypt_with_master(&master, b"repeatable").unwrap();
        let second = encrypt_with_master(&master, b"repeatable").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn decrypt_with_wrong_master_fails() {
        let master = [1u8; KEY_LEN];
        let other = [2u8; KEY_LEN];
        let ciphertext = encrypt_with_master(&master, b"secret").unwrap();
        assert!(decrypt_with_master(&other, &ciphertext).is_err());
    }

    #[test]
    fn static_vault_rejects_short_secret() {
        assert!(CryptoVault::with_master_secret(&[0u8; 8]).is_err());
        let vault = CryptoVault::with_master_secret(&[9u8; KEY_LEN]).unwrap();
        let sealed = vault.encrypt(b"abc").unwrap();
        assert_eq!(vault.decrypt(&sealed).unwrap(), b"abc");
    }
}
