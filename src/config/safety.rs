use super::target::ConnectionTarget;

/// Outcome of the startup check that keeps restore drills away from the
/// production database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// Targets are distinct, proceed.
    Ok,
    /// Verification resolves to the production host (regardless of port).
    /// Ephemeral databases will be created next to live data.
    Warn(String),
    /// Verification target is the production target. Starting up would point
    /// restore traffic and `DROP DATABASE` at live data.
    Blocked(String),
}

/// Compares the verification target against production.
///
/// Runs once at process start, before any credential is used. [`SafetyVerdict::Blocked`]
/// is the only startup condition that must end the process with a nonzero
/// exit and no retry.
pub fn check(
    production: &ConnectionTarget,
    verification: Option<&ConnectionTarget>,
) -> SafetyVerdict {
    let Some(verification) = verification else {
        return SafetyVerdict::Ok;
    };

    if production.raw() == verification.raw() {
        return SafetyVerdict::Blocked(format!(
            "verification target equals production target ({production})"
        ));
    }

    // Port is deliberately ignored: two ports on one host still share the
    // machine, so the drill load lands next to live data either way.
    if production.host == verification.host {
        return SafetyVerdict::Warn(format!(
            "verification target shares the production host {}, \
             ephemeral databases will be provisioned next to live data",
            production.host
        ));
    }

    SafetyVerdict::Ok
}
