//! Encrypts and decrypts values in the engine's vault format.
//!
//! Only the `AES256` cipher is supported, in envelope versions `1.1` and `1.2` (the latter carries
//! a secret label). A payload is protected as follows:
//!
//! 1. 80 bytes are derived from the password and a random 32-byte salt with PBKDF2-HMAC-SHA256
//!    (10000 rounds): an AES key, an HMAC key and a counter IV.
//! 2. The PKCS#7-padded plaintext is encrypted with AES-256 in CTR mode.
//! 3. The ciphertext is signed with HMAC-SHA256.
//! 4. Salt, signature and ciphertext are hex encoded, joined with newlines, hex encoded again and
//!    wrapped at 80 columns below a `$ANSIBLE_VAULT;<version>;AES256[;<label>]` header.
//!
//! Passwords come from the vault password file named in the engine configuration, plus any
//! labelled secrets in its `vault_identity_list`. [SecretHelper] looks them up afresh on every
//! call.
//!
//! The format is implemented here instead of by running `ansible-vault`, which would start a
//! Python interpreter per value and needs the engine installed even for decryption alone. The
//! output is interchangeable with the engine's own: the tests decrypt an envelope the engine
//! produced.

use crate::config::{self, AnsibleConfig, EngineDefaults};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = "$ANSIBLE_VAULT";
const CIPHER: &str = "AES256";
const DEFAULT_LABEL: &str = "default";
const ITERATIONS: u32 = 10_000;
const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const LINE_WIDTH: usize = 80;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("failed to read engine configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("failed to read vault password file {path}: {source}")]
    PasswordFile { path: PathBuf, source: io::Error },

    #[error("vault password script {path} failed: {reason}")]
    PasswordScript { path: PathBuf, reason: String },

    #[error("vault password from {path} is empty")]
    EmptyPassword { path: PathBuf },

    #[error("no vault secrets available")]
    NoSecrets,

    #[error("input is not vault encrypted data")]
    NotVault,

    #[error("unsupported vault format version {0}")]
    UnsupportedVersion(String),

    #[error("unsupported vault cipher {0}")]
    UnsupportedCipher(String),

    #[error("malformed vault data: {0}")]
    Malformed(&'static str),

    #[error("no vault secret could decrypt the data")]
    DecryptionFailed,

    #[error("decrypted data is not valid UTF-8")]
    NotUtf8,
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// A vault password.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultSecret {
    bytes: Vec<u8>,
}

impl fmt::Debug for VaultSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultSecret(<redacted>)")
    }
}

impl VaultSecret {
    pub fn new(password: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: password.into(),
        }
    }

    /// Reads a password from `path`. Executable files are run and their output is the password.
    /// Surrounding whitespace is stripped either way.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_error = |source| VaultError::PasswordFile {
            path: path.to_path_buf(),
            source,
        };

        let metadata = fs::metadata(path).map_err(file_error)?;
        let raw = if is_executable(&metadata) {
            tracing::debug!(path = %path.display(), "running vault password script");
            let output = Command::new(path)
                .stdin(Stdio::null())
                .output()
                .map_err(|err| VaultError::PasswordScript {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                })?;
            if !output.status.success() {
                return Err(VaultError::PasswordScript {
                    path: path.to_path_buf(),
                    reason: format!(
                        "{}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                });
            }
            output.stdout
        } else {
            fs::read(path).map_err(file_error)?
        };

        let password = raw.trim_ascii();
        if password.is_empty() {
            return Err(VaultError::EmptyPassword {
                path: path.to_path_buf(),
            });
        }
        Ok(Self::new(password))
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Encrypts and decrypts with a set of labelled secrets.
#[derive(Clone, Debug, Default)]
pub struct VaultLib {
    secrets: Vec<(String, VaultSecret)>,
}

impl VaultLib {
    pub fn new(secrets: Vec<(String, VaultSecret)>) -> Self {
        Self { secrets }
    }

    pub fn secrets(&self) -> &[(String, VaultSecret)] {
        &self.secrets
    }

    /// Encrypts `plaintext` with the first secret. Secrets labelled other than `default` produce
    /// a `1.2` envelope naming the label.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let (label, secret) = self.secrets.first().ok_or(VaultError::NoSecrets)?;
        let salt: [u8; SALT_LEN] = rand::random();
        let keys = DerivedKeys::new(secret, &salt);

        let mut data = pad(plaintext);
        keys.apply_keystream(&mut data)?;
        let signature = keys.mac(&data)?.finalize().into_bytes();

        let inner = format!(
            "{}\n{}\n{}",
            hex::encode(salt),
            hex::encode(signature),
            hex::encode(&data)
        );
        let body = hex::encode(inner);

        let mut envelope = match label.as_str() {
            DEFAULT_LABEL => format!("{HEADER};1.1;{CIPHER}"),
            label => format!("{HEADER};1.2;{CIPHER};{label}"),
        };
        envelope.push('\n');
        for line in body.as_bytes().chunks(LINE_WIDTH) {
            // Hex digits are ASCII.
            envelope.push_str(&String::from_utf8_lossy(line));
            envelope.push('\n');
        }
        Ok(envelope)
    }

    /// Decrypts an envelope. The secret whose label the envelope names is tried first, then all
    /// others in order.
    pub fn decrypt(&self, vaulttext: &str) -> Result<Vec<u8>> {
        if self.secrets.is_empty() {
            return Err(VaultError::NoSecrets);
        }
        let envelope = Envelope::parse(vaulttext)?;

        let preferred = envelope.label.as_deref();
        let ordered = self
            .secrets
            .iter()
            .filter(|(label, _)| Some(label.as_str()) == preferred)
            .chain(
                self.secrets
                    .iter()
                    .filter(|(label, _)| Some(label.as_str()) != preferred),
            );

        for (label, secret) in ordered {
            let keys = DerivedKeys::new(secret, &envelope.salt);
            if keys.mac(&envelope.ciphertext)?.verify_slice(&envelope.signature).is_err() {
                tracing::debug!(label = %label, "vault secret does not match");
                continue;
            }
            let mut data = envelope.ciphertext.clone();
            keys.apply_keystream(&mut data)?;
            return unpad(data);
        }
        Err(VaultError::DecryptionFailed)
    }
}

struct Envelope {
    label: Option<String>,
    salt: Vec<u8>,
    signature: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Envelope {
    fn parse(vaulttext: &str) -> Result<Self> {
        let mut lines = vaulttext.trim().lines().map(str::trim);
        let header = lines.next().ok_or(VaultError::NotVault)?;
        let mut fields = header.split(';');
        if fields.next() != Some(HEADER) {
            return Err(VaultError::NotVault);
        }

        let version = fields.next().ok_or(VaultError::Malformed("missing version"))?;
        let cipher = fields.next().ok_or(VaultError::Malformed("missing cipher"))?;
        let label = match version {
            "1.1" => None,
            "1.2" => fields.next().map(str::to_string),
            other => return Err(VaultError::UnsupportedVersion(other.to_string())),
        };
        if cipher != CIPHER {
            return Err(VaultError::UnsupportedCipher(cipher.to_string()));
        }

        let body: String = lines.collect();
        let inner = unhex(&body)?;
        let inner = std::str::from_utf8(&inner).map_err(|_| VaultError::Malformed("body"))?;
        let mut parts = inner.splitn(3, '\n');
        let mut next_part = || {
            parts
                .next()
                .ok_or(VaultError::Malformed("expected salt, signature and ciphertext"))
                .and_then(unhex)
        };
        let salt = next_part()?;
        let signature = next_part()?;
        let ciphertext = next_part()?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(VaultError::Malformed("ciphertext length"));
        }

        Ok(Self {
            label,
            salt,
            signature,
            ciphertext,
        })
    }
}

fn unhex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text.trim()).map_err(|_| VaultError::Malformed("invalid hex"))
}

/// The AES key, HMAC key and IV derived from a password and salt.
struct DerivedKeys {
    bytes: [u8; 2 * KEY_LEN + IV_LEN],
}

impl DerivedKeys {
    fn new(secret: &VaultSecret, salt: &[u8]) -> Self {
        let mut bytes = [0; 2 * KEY_LEN + IV_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(&secret.bytes, salt, ITERATIONS, &mut bytes);
        Self { bytes }
    }

    fn cipher_key(&self) -> &[u8] {
        &self.bytes[..KEY_LEN]
    }

    fn mac_key(&self) -> &[u8] {
        &self.bytes[KEY_LEN..2 * KEY_LEN]
    }

    fn iv(&self) -> &[u8] {
        &self.bytes[2 * KEY_LEN..]
    }

    /// Encrypts or decrypts `data` in place.
    fn apply_keystream(&self, data: &mut [u8]) -> Result<()> {
        let mut cipher = Aes256Ctr::new_from_slices(self.cipher_key(), self.iv())
            .map_err(|_| VaultError::Malformed("key length"))?;
        cipher.apply_keystream(data);
        Ok(())
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.mac_key())
            .map_err(|_| VaultError::Malformed("key length"))?;
        mac.update(data);
        Ok(mac)
    }
}

/// PKCS#7 padding to the AES block size. Aligned input gains a full block.
fn pad(plaintext: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_LEN - plaintext.len() % BLOCK_LEN;
    let mut data = Vec::with_capacity(plaintext.len() + pad_len);
    data.extend_from_slice(plaintext);
    // pad_len is at most BLOCK_LEN.
    data.resize(plaintext.len() + pad_len, pad_len as u8);
    data
}

fn unpad(mut data: Vec<u8>) -> Result<Vec<u8>> {
    let pad_len = usize::from(*data.last().ok_or(VaultError::Malformed("padding"))?);
    if pad_len == 0
        || pad_len > BLOCK_LEN
        || pad_len > data.len()
        || data[data.len() - pad_len..].iter().any(|&b| usize::from(b) != pad_len)
    {
        return Err(VaultError::Malformed("padding"));
    }
    data.truncate(data.len() - pad_len);
    Ok(data)
}

/// Builds a [VaultLib] from the engine configuration on every call.
#[derive(Clone, Debug)]
pub struct SecretHelper {
    config_file: PathBuf,
}

impl Default for SecretHelper {
    fn default() -> Self {
        Self::new(config::ANSIBLE_CFG)
    }
}

impl SecretHelper {
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
        }
    }

    /// The vault password file: `vault_password_file` in the `defaults` section of the
    /// configuration, or [config::default_vault_password_file] when it is not set.
    pub fn vault_password_file(&self) -> Result<PathBuf> {
        let config = self.config()?;
        Ok(password_file(&config))
    }

    /// Loads every configured secret: the password file under the `default` label, then each
    /// `label@path` entry of `vault_identity_list`.
    pub fn vault_lib(&self) -> Result<VaultLib> {
        let config = self.config()?;
        let path = password_file(&config);
        tracing::debug!(path = %path.display(), "loading vault password file");
        let mut secrets = vec![(DEFAULT_LABEL.to_string(), VaultSecret::from_file(&path)?)];

        let defaults = EngineDefaults::resolve(&config, |name| std::env::var(name).ok());
        for identity in &defaults.vault_identity_list {
            let (label, source) = match identity.split_once('@') {
                Some((label, source)) => (label, source),
                None => (DEFAULT_LABEL, identity.as_str()),
            };
            if source == "prompt" || source == "prompt_ask_vault_pass" {
                tracing::warn!(label, "skipping vault identity that needs a prompt");
                continue;
            }
            let secret = VaultSecret::from_file(config::expand_user(source))?;
            secrets.push((label.to_string(), secret));
        }
        Ok(VaultLib::new(secrets))
    }

    /// Decrypts `value`, or returns `None` if that fails for any reason.
    pub fn decrypt(&self, value: &str) -> Option<String> {
        let decrypted = self
            .vault_lib()
            .and_then(|vault| vault.decrypt(value))
            .and_then(|bytes| String::from_utf8(bytes).map_err(|_| VaultError::NotUtf8));
        match decrypted {
            Ok(plaintext) => Some(plaintext),
            Err(err) => {
                tracing::debug!(%err, "vault decryption failed");
                None
            }
        }
    }

    pub fn encrypt(&self, value: &str) -> Result<String> {
        self.vault_lib()?.encrypt(value.as_bytes())
    }

    fn config(&self) -> Result<AnsibleConfig> {
        AnsibleConfig::load(&self.config_file).map_err(VaultError::Config)
    }
}

fn password_file(config: &AnsibleConfig) -> PathBuf {
    match config.get("defaults", "vault_password_file") {
        Some(path) => config::expand_user(path),
        None => config::default_vault_password_file(),
    }
}

/// Decrypts `value` with the system's configured vault secrets. Returns `None` on any failure.
pub fn vault_decrypt(value: &str) -> Option<String> {
    SecretHelper::default().decrypt(value)
}

/// Encrypts `value` with the system's configured vault password.
pub fn vault_encrypt(value: &str) -> Result<String> {
    SecretHelper::default().encrypt(value)
}
