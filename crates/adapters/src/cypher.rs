//! Envelope encryption of a single logical file.
//!
//! Mirrors the shape of `sops` closely enough to be recognizable without
//! reimplementing it: a policy file maps a repository path to a set of
//! `age` recipients and an `unencrypted_key_regex` naming leaves left in
//! plaintext. Encryption generates one random AES-256-GCM data key per
//! document, encrypts every matching scalar leaf under it, and wraps the
//! data key once per recipient. The resulting document still has a root
//! YAML mapping, recognizable field structure, and a `sops:` metadata
//! block — an operator can `git show` a secret file and see which
//! recipients can unwrap it without decrypting anything.

use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use dump_core::traits::{Cypher, CypherError};

const DATA_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Deserialize)]
struct PolicyFile {
    rules: Vec<PolicyRuleRaw>,
}

#[derive(Debug, Deserialize)]
struct PolicyRuleRaw {
    path_regex: String,
    age: Vec<String>,
    #[serde(default)]
    unencrypted_key_regex: Option<String>,
}

struct PolicyRule {
    path_regex: Regex,
    recipients: Vec<age::x25519::Recipient>,
    unencrypted_key_regex: Option<Regex>,
}

/// `.sops.yaml`-shaped encryption policy, resolved per-path.
pub struct Policy {
    rules: Vec<PolicyRule>,
}

impl Policy {
    pub fn load(path: &Path) -> Result<Self, CypherError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: PolicyFile =
            serde_yaml::from_str(&raw).map_err(|e| CypherError::InvalidPolicy(e.to_string()))?;

        let rules = parsed
            .rules
            .into_iter()
            .map(|rule| {
                let path_regex = Regex::new(&rule.path_regex)
                    .map_err(|e| CypherError::InvalidPolicy(format!("bad path_regex: {e}")))?;
                let unencrypted_key_regex = rule
                    .unencrypted_key_regex
                    .map(|r| Regex::new(&r))
                    .transpose()
                    .map_err(|e| CypherError::InvalidPolicy(format!("bad unencrypted_key_regex: {e}")))?;
                let recipients = rule
                    .age
                    .iter()
                    .map(|r| {
                        age::x25519::Recipient::from_str(r)
                            .map_err(|e| CypherError::InvalidPolicy(format!("bad age recipient {r}: {e}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PolicyRule { path_regex, recipients, unencrypted_key_regex })
            })
            .collect::<Result<Vec<_>, CypherError>>()?;

        Ok(Self { rules })
    }

    fn resolve(&self, path: &str) -> Result<&PolicyRule, CypherError> {
        self.rules
            .iter()
            .find(|rule| rule.path_regex.is_match(path))
            .ok_or_else(|| CypherError::NoMatchingRule(path.to_string()))
    }
}

pub struct SopsLikeCypher {
    policy: Policy,
}

impl SopsLikeCypher {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }
}

#[derive(Serialize, Deserialize)]
struct SopsMetadata {
    age: Vec<WrappedKey>,
    path: String,
    version: String,
}

#[derive(Serialize, Deserialize)]
struct WrappedKey {
    recipient: String,
    enc: String,
}

impl Cypher for SopsLikeCypher {
    fn encrypt(&self, path: &Path, plaintext_yaml: &[u8]) -> Result<Vec<u8>, CypherError> {
        let path_str = path_key(path);
        let rule = self.policy.resolve(&path_str)?;

        let mut document: Value =
            serde_yaml::from_slice(plaintext_yaml).map_err(|e| CypherError::Yaml(e.to_string()))?;

        let mut data_key = [0u8; DATA_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut data_key);
        let cipher = Aes256Gcm::new_from_slice(&data_key).map_err(|e| CypherError::Crypto(e.to_string()))?;

        encrypt_leaves(&mut document, &cipher, rule.unencrypted_key_regex.as_ref(), &[]);

        let sops = SopsMetadata {
            age: wrap_for_recipients(&data_key, &rule.recipients)?,
            path: path_str,
            version: "1".to_string(),
        };

        if let Value::Mapping(map) = &mut document {
            let sops_value = serde_yaml::to_value(sops).map_err(|e| CypherError::Yaml(e.to_string()))?;
            map.insert(Value::String("sops".to_string()), sops_value);
        }

        serde_yaml::to_string(&document).map(String::into_bytes).map_err(|e| CypherError::Yaml(e.to_string()))
    }

    fn decrypt(&self, path: &Path) -> Result<Vec<u8>, CypherError> {
        let bytes = std::fs::read(path)?;
        let mut document: Value = serde_yaml::from_slice(&bytes).map_err(|e| CypherError::Yaml(e.to_string()))?;

        let Value::Mapping(map) = &mut document else {
            return Err(CypherError::Yaml("document root is not a mapping".to_string()));
        };
        let sops_value = map
            .remove(Value::String("sops".to_string()))
            .ok_or_else(|| CypherError::Yaml("missing sops metadata".to_string()))?;
        let sops: SopsMetadata = serde_yaml::from_value(sops_value).map_err(|e| CypherError::Yaml(e.to_string()))?;

        let data_key = unwrap_with_local_identity(&sops.age)?;
        let cipher = Aes256Gcm::new_from_slice(&data_key).map_err(|e| CypherError::Crypto(e.to_string()))?;

        decrypt_leaves(&mut document, &cipher)?;

        serde_yaml::to_string(&document).map(String::into_bytes).map_err(|e| CypherError::Yaml(e.to_string()))
    }
}

/// Forward-slash path string used as both the regex-match key and the AAD
/// binding a ciphertext to the file it was computed for.
fn path_key(path: &Path) -> String {
    path.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

fn encrypt_leaves(value: &mut Value, cipher: &Aes256Gcm, unencrypted_key_regex: Option<&Regex>, path: &[String]) {
    match value {
        Value::Mapping(map) => {
            let keys: Vec<Value> = map.keys().cloned().collect();
            for key in keys {
                let Value::String(key_name) = &key else { continue };
                if unencrypted_key_regex.is_some_and(|re| re.is_match(key_name)) {
                    continue;
                }
                let mut child_path = path.to_vec();
                child_path.push(key_name.clone());
                if let Some(child) = map.get_mut(&key) {
                    encrypt_leaves(child, cipher, unencrypted_key_regex, &child_path);
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                encrypt_leaves(item, cipher, unencrypted_key_regex, path);
            }
        }
        leaf => {
            if let Some(encoded) = encrypt_scalar(leaf, cipher) {
                *leaf = Value::String(encoded);
            }
        }
    }
}

fn encrypt_scalar(value: &Value, cipher: &Aes256Gcm) -> Option<String> {
    let (kind, plaintext) = match value {
        Value::String(s) => ("str", s.clone()),
        Value::Number(n) => ("int", n.to_string()),
        Value::Bool(b) => ("bool", b.to_string()),
        Value::Null => ("null", String::new()),
        _ => return None,
    };

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, plaintext.as_bytes()).ok()?;

    let engine = base64::engine::general_purpose::STANDARD;
    Some(format!(
        "ENC[AES256_GCM,data:{},iv:{},type:{}]",
        engine.encode(ciphertext),
        engine.encode(nonce_bytes),
        kind
    ))
}

fn decrypt_leaves(value: &mut Value, cipher: &Aes256Gcm) -> Result<(), CypherError> {
    match value {
        Value::Mapping(map) => {
            let keys: Vec<Value> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    decrypt_leaves(child, cipher)?;
                }
            }
            Ok(())
        }
        Value::Sequence(items) => {
            for item in items {
                decrypt_leaves(item, cipher)?;
            }
            Ok(())
        }
        Value::String(s) => {
            if let Some(decoded) = decrypt_scalar(s, cipher)? {
                *value = decoded;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn decrypt_scalar(encoded: &str, cipher: &Aes256Gcm) -> Result<Option<Value>, CypherError> {
    let Some(inner) = encoded.strip_prefix("ENC[").and_then(|s| s.strip_suffix(']')) else {
        return Ok(None);
    };

    let mut data = None;
    let mut iv = None;
    let mut kind = None;
    for field in inner.split(',') {
        let Some((k, v)) = field.split_once(':') else { continue };
        match k {
            "data" => data = Some(v),
            "iv" => iv = Some(v),
            "type" => kind = Some(v),
            _ => {}
        }
    }
    let (Some(data), Some(iv), Some(kind)) = (data, iv, kind) else {
        return Err(CypherError::Crypto(format!("malformed ciphertext envelope: {encoded}")));
    };

    let engine = base64::engine::general_purpose::STANDARD;
    let ciphertext = engine.decode(data).map_err(|e| CypherError::Crypto(e.to_string()))?;
    let nonce_bytes = engine.decode(iv).map_err(|e| CypherError::Crypto(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext =
        cipher.decrypt(nonce, ciphertext.as_slice()).map_err(|e| CypherError::Crypto(e.to_string()))?;
    let plaintext = String::from_utf8(plaintext).map_err(|e| CypherError::Crypto(e.to_string()))?;

    let value = match kind {
        "str" => Value::String(plaintext),
        "bool" => Value::Bool(plaintext.parse().map_err(|_| CypherError::Crypto("bad bool".to_string()))?),
        "null" => Value::Null,
        "int" => serde_yaml::from_str(&plaintext).map_err(|e| CypherError::Crypto(e.to_string()))?,
        other => return Err(CypherError::Crypto(format!("unknown scalar kind: {other}"))),
    };
    Ok(Some(value))
}

fn wrap_for_recipients(
    data_key: &[u8; DATA_KEY_LEN],
    recipients: &[age::x25519::Recipient],
) -> Result<Vec<WrappedKey>, CypherError> {
    recipients
        .iter()
        .map(|recipient| {
            let boxed: Vec<Box<dyn age::Recipient + Send>> = vec![Box::new(recipient.clone())];
            let encryptor = age::Encryptor::with_recipients(boxed)
                .map_err(|e| CypherError::Crypto(format!("failed to build recipient set: {e}")))?;
            let mut wrapped = Vec::new();
            let mut writer =
                encryptor.wrap_output(&mut wrapped).map_err(|e| CypherError::Crypto(e.to_string()))?;
            writer.write_all(data_key).map_err(|e| CypherError::Crypto(e.to_string()))?;
            writer.finish().map_err(|e| CypherError::Crypto(e.to_string()))?;

            let engine = base64::engine::general_purpose::STANDARD;
            Ok(WrappedKey { recipient: recipient.to_string(), enc: engine.encode(wrapped) })
        })
        .collect()
}

/// Unwraps the data key using the identity file named by
/// `SOPS_AGE_KEY_FILE`, trying every wrapped entry until one succeeds
/// (mirrors sops trying each configured key group).
fn unwrap_with_local_identity(wrapped_keys: &[WrappedKey]) -> Result<[u8; DATA_KEY_LEN], CypherError> {
    let identity_path = std::env::var("SOPS_AGE_KEY_FILE")
        .map_err(|_| CypherError::Crypto("SOPS_AGE_KEY_FILE not set".to_string()))?;
    let identities = age::IdentityFile::from_file(identity_path)
        .map_err(|e| CypherError::Crypto(e.to_string()))?
        .into_identities()
        .map_err(|e| CypherError::Crypto(e.to_string()))?;

    let engine = base64::engine::general_purpose::STANDARD;
    for wrapped in wrapped_keys {
        let Ok(bytes) = engine.decode(&wrapped.enc) else { continue };
        let Ok(decryptor) = age::Decryptor::new(bytes.as_slice()) else { continue };
        let age::Decryptor::Recipients(decryptor) = decryptor else { continue };
        let ids: Vec<&dyn age::Identity> = identities.iter().map(|i| i.as_ref() as &dyn age::Identity).collect();
        if let Ok(mut reader) = decryptor.decrypt(ids.into_iter()) {
            let mut data_key = [0u8; DATA_KEY_LEN];
            if reader.read_exact(&mut data_key).is_ok() {
                return Ok(data_key);
            }
        }
    }
    Err(CypherError::Crypto("no configured identity could unwrap the data key".to_string()))
}
