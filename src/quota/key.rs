//! Quota key generation and handling.

/// Number of client characters left visible in log output.
const VISIBLE_PREFIX: usize = 8;

/// A key that identifies one client's counter under one policy.
///
/// Each policy gets its own namespace, so exhausting the `auth` quota
/// never touches the same client's `general` counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    /// The policy namespace
    pub policy: String,
    /// Client identity (IP, user id, or custom)
    pub client: String,
}

impl QuotaKey {
    /// Create a new quota key.
    pub fn new(policy: &str, client: &str) -> Self {
        Self {
            policy: policy.to_string(),
            client: client.to_string(),
        }
    }

    /// The string form used as the counter store key.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}", self.policy, self.client)
    }

    /// Log-safe rendering that hides most of the client identity.
    pub fn masked(&self) -> String {
        let visible: String = self.client.chars().take(VISIBLE_PREFIX).collect();
        format!("{}:{}***", self.policy, visible)
    }
}

impl std::fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.policy, self.client)
    }
}
