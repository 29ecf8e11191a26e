//! Fatal error taxonomy.
//!
//! Almost every failure funnels into the reset path; the few that must not
//! (the venue refusing our credentials or our account-event subscription)
//! are typed so the supervisor can surface them instead of restarting
//! forever.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("authentication refused: {0}")]
    AuthRefused(String),
    #[error("two-factor authentication required but no code is configured")]
    MfaRequired,
    #[error("two-factor authentication rejected: {0}")]
    MfaRejected(String),
    #[error("account event subscription refused by the venue")]
    SubscriptionRefused,
}

/// True when `error` carries a `FatalError` anywhere in its chain.
pub fn is_fatal(error: &anyhow::Error) -> bool {
    error.downcast_ref::<FatalError>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_survives_context_chains() {
        let error = anyhow::Error::new(FatalError::SubscriptionRefused).context("bot loop");
        assert!(is_fatal(&error));

        let error = anyhow::anyhow!("connection reset");
        assert!(!is_fatal(&error));
    }
}
