//! Fee ladder used to escalate resubmissions

use ethers::types::U256;

/// Fee offered for one publication attempt, in wei.
///
/// `U256` is `Copy`, so every hand-off is an independent value and no attempt
/// can observe a later escalation.
pub type FeeBid = U256;

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Bump `cur` by `step`, clamped to `max`
pub fn next_bid(cur: FeeBid, step: FeeBid, max: FeeBid) -> FeeBid {
    std::cmp::min(cur.saturating_add(step), max)
}

/// Convert a gwei amount to wei
pub fn gwei_to_wei(gwei: u64) -> FeeBid {
    U256::from(gwei) * U256::from(WEI_PER_GWEI)
}

/// Convert wei to fractional gwei for display and metrics
pub fn wei_to_gwei(wei: FeeBid) -> f64 {
    ethers::utils::format_units(wei, "gwei")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(f64::MAX)
}
