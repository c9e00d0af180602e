//! Credential checks for incoming SSH connections.
//!
//! Credentials come from the `[auth]` config section. The handshake layer
//! only asks yes/no questions; it never sees the stored secrets.

use std::collections::HashMap;

use russh::MethodSet;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// Key types accepted in `authorized_keys` lines.
const KEY_TYPES: &[&str] = &[
    "ssh-ed25519",
    "ssh-rsa",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// One public key from an `authorized_keys` style line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    pub key_type: String,
    /// Base64 wire encoding, as it appears in the line.
    pub key_data: String,
    pub comment: Option<String>,
}

impl AuthorizedKey {
    /// Parse `[options] key-type base64-data [comment]`.
    ///
    /// Returns `None` for blank lines, comments, unknown key types and key
    /// data that does not decode.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut tokens = line.split_whitespace();
        let mut key_type = tokens.next()?;
        if !KEY_TYPES.contains(&key_type) {
            // Leading options field
            key_type = tokens.next()?;
            if !KEY_TYPES.contains(&key_type) {
                return None;
            }
        }

        let key_data = tokens.next()?;
        russh_keys::parse_public_key_base64(key_data).ok()?;

        let comment: Vec<&str> = tokens.collect();
        Some(Self {
            key_type: key_type.to_string(),
            key_data: key_data.to_string(),
            comment: (!comment.is_empty()).then(|| comment.join(" ")),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Credentials {
    password: Option<String>,
    keys: Vec<AuthorizedKey>,
}

/// Answers authentication questions from the configured credential set.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    allow_anonymous: bool,
    users: HashMap<String, Credentials>,
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|user| {
                let keys = user
                    .authorized_keys
                    .iter()
                    .filter_map(|line| {
                        let key = AuthorizedKey::parse(line);
                        if key.is_none() {
                            tracing::warn!(user = %user.name, "Skipping unparsable authorized key");
                        }
                        key
                    })
                    .collect();
                let credentials = Credentials {
                    password: user.password.clone(),
                    keys,
                };
                (user.name.clone(), credentials)
            })
            .collect();

        Self {
            allow_anonymous: config.allow_anonymous,
            users,
        }
    }

    /// Authentication methods to advertise.
    pub fn methods(&self) -> MethodSet {
        let mut methods = MethodSet::empty();
        if self.allow_anonymous {
            methods |= MethodSet::NONE;
        }
        if self.users.values().any(|c| c.password.is_some()) {
            methods |= MethodSet::PASSWORD;
        }
        if self.users.values().any(|c| !c.keys.is_empty()) {
            methods |= MethodSet::PUBLICKEY;
        }
        methods
    }

    pub fn check_none(&self, _user: &str) -> bool {
        self.allow_anonymous
    }

    pub fn check_password(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .and_then(|c| c.password.as_deref())
            .is_some_and(|expected| expected.as_bytes().ct_eq(password.as_bytes()).into())
    }

    /// `key_data` is the base64 wire encoding of the offered key.
    pub fn check_public_key(&self, user: &str, key_data: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|c| c.keys.iter().any(|k| k.key_data == key_data))
    }
}
