use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use subtle::ConstantTimeEq;

/// The literal written to logs in place of any token value.
pub const TOKEN_MASK: &str = "***DYNAMIC_TOKEN***";

/// A per-query shared secret authenticating bridge connections.
///
/// `Debug` and `Display` print [`TOKEN_MASK`]; the raw value is only
/// reachable through [`DynamicToken::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct DynamicToken(String);

impl DynamicToken {
    /// Generates a fresh 128-bit random token.
    pub fn generate() -> Self {
        let raw: u128 = rand::thread_rng().gen();
        Self(format!("{raw:032x}"))
    }

    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret, for embedding in the producer query. Never log this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &[u8]) -> bool {
        self.0.as_bytes().ct_eq(presented).into()
    }
}

impl fmt::Debug for DynamicToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(TOKEN_MASK)
    }
}

impl fmt::Display for DynamicToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(TOKEN_MASK)
    }
}

/// Replaces every occurrence of `secret` in `text` with [`TOKEN_MASK`].
/// Applied to SQL and diagnostics before they reach a log line.
pub fn mask_secret(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, TOKEN_MASK)
}

/// Expected tokens on one worker: a per-query dynamic token plus an optional
/// statically configured fallback.
pub struct TokenStore {
    require_token: bool,
    static_fallback: Option<DynamicToken>,
    per_query: Mutex<HashMap<String, DynamicToken>>,
}

impl TokenStore {
    pub fn new(require_token: bool, static_fallback: Option<DynamicToken>) -> Self {
        Self {
            require_token: require_token || static_fallback.is_some(),
            static_fallback,
            per_query: Mutex::new(HashMap::new()),
        }
    }

    /// Whether connections must present a token frame in their handshake.
    pub fn token_required(&self) -> bool {
        self.require_token
    }

    pub fn register(&self, query_id: &str, token: DynamicToken) {
        self.per_query
            .lock()
            .unwrap()
            .insert(query_id.to_string(), token);
    }

    /// Drops the query's token; called when the query is deregistered.
    pub fn invalidate(&self, query_id: &str) {
        self.per_query.lock().unwrap().remove(query_id);
    }

    /// Accepts the query's registered token or the static fallback.
    pub fn verify(&self, query_id: &str, presented: Option<&[u8]>) -> bool {
        if !self.require_token {
            return true;
        }
        let Some(presented) = presented else {
            return false;
        };
        if let Some(expected) = self.per_query.lock().unwrap().get(query_id) {
            if expected.matches(presented) {
                return true;
            }
        }
        if let Some(fallback) = &self.static_fallback {
            return fallback.matches(presented);
        }
        false
    }
}
