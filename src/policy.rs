//! Hold-or-deliver decision

use crate::config::ProxyConfig;
use crate::inspect::MessageMeta;

/// Outcome of inspecting an APPENDed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Hold,
}

/// Pure decision over extracted metadata and configuration: hold when
/// quarantine is enabled and the amount reaches the threshold.
#[must_use]
pub fn decide(meta: &MessageMeta, config: &ProxyConfig) -> Verdict {
    if config.quarantine_enabled && meta.amount >= config.min_amount {
        Verdict::Hold
    } else {
        Verdict::Deliver
    }
}
