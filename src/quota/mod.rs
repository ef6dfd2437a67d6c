//! Quota accounting and admission decisions.

mod backend;
mod clock;
mod counter;
mod engine;
mod key;
mod policy;
mod rules;
mod store;
mod sweeper;

pub use backend::QuotaBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::CounterEntry;
pub use engine::{Outcome, QuotaPolicyEngine, UNKNOWN_CLIENT};
pub use key::QuotaKey;
pub use policy::{key_by_ip, key_by_user, KeyError, KeyFn, Policy, RequestContext, DEFAULT_WARN_THRESHOLD};
pub use rules::{
    KeyStrategy, PolicyRule, PolicySet, RouteRule, RulesConfig, AUTH_POLICY, GENERAL_POLICY,
    SENSITIVE_POLICY, USER_POLICY,
};
pub use store::{CounterStore, StoreSettings, StoreStats, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_ENTRY_AGE};
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};
