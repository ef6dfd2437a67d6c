//! Named policy configuration and route matching.
//!
//! This module loads the set of named policies (general, auth, sensitive,
//! per-user, or any custom name) and the path-prefix rules that pick which
//! policy guards a request.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::info;

use super::policy::{key_by_ip, key_by_user, Policy, DEFAULT_WARN_THRESHOLD};
use crate::error::{Result, TollgateError};

/// Policy for general API routes.
pub const GENERAL_POLICY: &str = "general";
/// Policy for authentication endpoints.
pub const AUTH_POLICY: &str = "auth";
/// Policy for sensitive operations.
pub const SENSITIVE_POLICY: &str = "sensitive";
/// Policy keyed by authenticated user.
pub const USER_POLICY: &str = "user";

const FIFTEEN_MINUTES: u64 = 15 * 60;
const ONE_HOUR: u64 = 60 * 60;

/// Policy and routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Policy used when no route rule matches
    #[serde(default = "default_policy_name")]
    pub default_policy: String,
    /// Named policies
    #[serde(default = "default_policies")]
    pub policies: BTreeMap<String, PolicyRule>,
    /// Path prefix to policy assignments
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy_name(),
            policies: default_policies(),
            routes: Vec::new(),
        }
    }
}

/// Limits for one named policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Window length in seconds
    pub window_secs: u64,
    /// Requests allowed per window
    pub max_requests: u64,
    /// How clients are identified
    #[serde(default)]
    pub key: KeyStrategy,
    /// Fraction of the quota that triggers a near-limit warning
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,
}

/// Built-in client identification strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    #[default]
    Ip,
    User,
}

/// Assigns a policy to every path under `path_prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub path_prefix: String,
    pub policy: String,
}

fn default_policy_name() -> String {
    GENERAL_POLICY.to_string()
}

fn default_warn_threshold() -> f64 {
    DEFAULT_WARN_THRESHOLD
}

fn default_policies() -> BTreeMap<String, PolicyRule> {
    let rule = |window_secs, max_requests, key| PolicyRule {
        window_secs,
        max_requests,
        key,
        warn_threshold: DEFAULT_WARN_THRESHOLD,
    };

    BTreeMap::from([
        (GENERAL_POLICY.to_string(), rule(FIFTEEN_MINUTES, 100, KeyStrategy::Ip)),
        (AUTH_POLICY.to_string(), rule(FIFTEEN_MINUTES, 5, KeyStrategy::Ip)),
        (SENSITIVE_POLICY.to_string(), rule(ONE_HOUR, 10, KeyStrategy::Ip)),
        (USER_POLICY.to_string(), rule(FIFTEEN_MINUTES, 1000, KeyStrategy::User)),
    ])
}

impl PolicyRule {
    /// Build a validated policy from this rule.
    pub fn to_policy(&self, name: &str) -> Result<Policy> {
        let policy = Policy::new(name, Duration::from_secs(self.window_secs), self.max_requests)?
            .with_warn_threshold(self.warn_threshold)?;

        Ok(match self.key {
            KeyStrategy::Ip => policy.with_key_fn(key_by_ip),
            KeyStrategy::User => policy.with_key_fn(key_by_user),
        })
    }
}

impl RulesConfig {
    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse policy rules: {}", e)))
    }

    /// Validate the rules and build the runtime policy set.
    pub fn build(&self) -> Result<PolicySet> {
        let default_rule = self.policies.get(&self.default_policy).ok_or_else(|| {
            TollgateError::InvalidConfig(format!(
                "default policy '{}' is not defined",
                self.default_policy
            ))
        })?;

        let mut set = PolicySet::new(default_rule.to_policy(&self.default_policy)?);
        for (name, rule) in &self.policies {
            if name != &self.default_policy {
                set.insert(rule.to_policy(name)?);
            }
        }
        for route in &self.routes {
            set.add_route(&route.path_prefix, &route.policy)?;
        }

        info!(
            policies = set.policies.len(),
            routes = set.routes.len(),
            default_policy = %self.default_policy,
            "Policy rules loaded"
        );
        Ok(set)
    }
}

/// Runtime collection of named policies plus route assignments.
#[derive(Debug, Clone)]
pub struct PolicySet {
    policies: HashMap<String, Policy>,
    /// Kept sorted longest prefix first
    routes: Vec<RouteRule>,
    default_policy: String,
}

impl PolicySet {
    /// Create a set whose fallback is `default`.
    pub fn new(default: Policy) -> Self {
        let default_policy = default.name().to_string();
        let mut policies = HashMap::new();
        policies.insert(default_policy.clone(), default);
        Self {
            policies,
            routes: Vec::new(),
            default_policy,
        }
    }

    /// Add or replace a named policy.
    pub fn insert(&mut self, policy: Policy) {
        self.policies.insert(policy.name().to_string(), policy);
    }

    /// Route every path under `path_prefix` to the policy named `policy`.
    pub fn add_route(&mut self, path_prefix: &str, policy: &str) -> Result<()> {
        if !self.policies.contains_key(policy) {
            return Err(TollgateError::InvalidConfig(format!(
                "route '{}' refers to unknown policy '{}'",
                path_prefix, policy
            )));
        }
        if !path_prefix.starts_with('/') {
            return Err(TollgateError::InvalidConfig(format!(
                "route prefix '{}' must start with '/'",
                path_prefix
            )));
        }

        self.routes.push(RouteRule {
            path_prefix: path_prefix.to_string(),
            policy: policy.to_string(),
        });
        self.routes
            .sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Ok(())
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// The policy guarding `path`: the longest matching route, else the default.
    pub fn resolve(&self, path: &str) -> &Policy {
        self.routes
            .iter()
            .find(|route| prefix_matches(&route.path_prefix, path))
            .and_then(|route| self.policies.get(&route.policy))
            .unwrap_or_else(|| self.default_policy())
    }

    pub fn default_policy(&self) -> &Policy {
        // The default is inserted at construction and never removed
        &self.policies[&self.default_policy]
    }

    /// Names of all configured policies.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Prefix match on whole path segments, so `/auth` does not match `/authors`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_define_standard_policies() {
        let set = RulesConfig::default().build().unwrap();

        assert_eq!(set.names(), vec!["auth", "general", "sensitive", "user"]);
        assert_eq!(set.default_policy().name(), GENERAL_POLICY);

        let auth = set.get(AUTH_POLICY).unwrap();
        assert_eq!(auth.max_requests(), 5);
        assert_eq!(auth.window(), Duration::from_secs(900));

        let sensitive = set.get(SENSITIVE_POLICY).unwrap();
        assert_eq!(sensitive.window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_rules_yaml() {
        let yaml = r#"
default_policy: api
policies:
  api:
    window_secs: 60
    max_requests: 100
  login:
    window_secs: 900
    max_requests: 5
    warn_threshold: 0.8
  account:
    window_secs: 3600
    max_requests: 50
    key: user
routes:
  - path_prefix: /auth
    policy: login
  - path_prefix: /account
    policy: account
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.policies.len(), 3);
        assert_eq!(config.policies["account"].key, KeyStrategy::User);
        assert_eq!(config.policies["api"].warn_threshold, DEFAULT_WARN_THRESHOLD);

        let set = config.build().unwrap();
        assert_eq!(set.resolve("/auth/login").name(), "login");
        assert_eq!(set.resolve("/account").name(), "account");
        assert_eq!(set.resolve("/items").name(), "api");
        assert_eq!(set.get("login").unwrap().warn_threshold(), 0.8);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut set = RulesConfig::default().build().unwrap();
        set.add_route("/api", GENERAL_POLICY).unwrap();
        set.add_route("/api/auth", AUTH_POLICY).unwrap();
        set.add_route("/api/auth/reset", SENSITIVE_POLICY).unwrap();

        assert_eq!(set.resolve("/api/auth/reset/confirm").name(), SENSITIVE_POLICY);
        assert_eq!(set.resolve("/api/auth/login").name(), AUTH_POLICY);
        assert_eq!(set.resolve("/api/items").name(), GENERAL_POLICY);
    }

    #[test]
    fn test_prefix_matches_whole_segments() {
        let mut set = RulesConfig::default().build().unwrap();
        set.add_route("/auth", AUTH_POLICY).unwrap();

        assert_eq!(set.resolve("/auth").name(), AUTH_POLICY);
        assert_eq!(set.resolve("/authors").name(), GENERAL_POLICY);
    }

    #[test]
    fn test_route_to_unknown_policy_rejected() {
        let mut set = RulesConfig::default().build().unwrap();
        let err = set.add_route("/x", "missing").unwrap_err();
        assert!(matches!(err, TollgateError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_default_policy_rejected() {
        let yaml = r#"
default_policy: nope
policies:
  api:
    window_secs: 60
    max_requests: 100
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(config.build().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
policies:
  general:
    window_secs: 0
    max_requests: 100
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.build(), Err(TollgateError::InvalidPolicy(_))));
    }
}
