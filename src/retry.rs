//! Failover policy: which failures let a balancer move to the next candidate.
//!
//! The default, [`DialPhaseOnly`], fails over only when a connection could not
//! be established. A failure after the connection existed may depend on the
//! request itself, so it is returned to the caller instead of being replayed
//! against another upstream.

use crate::Error;

/// Decides whether a failed attempt may be retried on another address or host.
///
/// # Examples
///
/// ```
/// use upstream::{Error, FailoverPolicy};
///
/// /// Also fail over when the upstream times out mid-request.
/// struct FailoverOnTimeout;
///
/// impl FailoverPolicy for FailoverOnTimeout {
///     fn should_failover(&self, error: &Error) -> bool {
///         error.is_dial_phase() || matches!(error, Error::Timeout)
///     }
/// }
/// ```
pub trait FailoverPolicy: Send + Sync {
    /// Returns `true` if the balancer should try the next candidate after
    /// `error`, `false` to abort and return `error`.
    fn should_failover(&self, error: &Error) -> bool;
}

impl<F> FailoverPolicy for F
where
    F: Fn(&Error) -> bool + Send + Sync,
{
    fn should_failover(&self, error: &Error) -> bool {
        self(error)
    }
}

/// Fails over on dial-phase errors only ([`Error::is_dial_phase`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct DialPhaseOnly;

impl FailoverPolicy for DialPhaseOnly {
    fn should_failover(&self, error: &Error) -> bool {
        error.is_dial_phase()
    }
}
