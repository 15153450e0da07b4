/*!
The [`CollapseError`] taxonomy.

Every failure signal raised by the collapser or the resilient cache wrapper
is one of these variants. They surface to callers unchanged in kind: the
same error is fanned out to every affected waiter rather than re-wrapped per
recipient.
*/

use std::fmt;

/**
An opaque, boxed error from a caller-supplied collaborator (a bulk
provider or a cache delegate).
*/
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/**
Failure signals produced by the collapser or the resilient cache.
*/
#[derive(thiserror::Error, Debug)]
pub enum CollapseError {
    /**
    The bulk provider (or cache delegate) returned an error.

    Fanned out unchanged to every pending item in the batch it came from.
    */
    #[error("provider call failed: {0}")]
    Provider(#[source] BoxError),

    /**
    The operation didn't complete before its deadline.
    */
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /**
    A circuit breaker is `Open` and rejected the call without invoking
    the delegate.
    */
    #[error("call not permitted: circuit breaker `{0}` is open")]
    CallNotPermitted(String),

    /**
    The bulk provider returned an empty or otherwise malformed response.

    Affected items complete without a value rather than with this error;
    it's surfaced only through logging/metrics, never to a waiter.
    */
    #[error("bulk provider violated its contract: {0}")]
    ContractViolation(String),

    /**
    The collapser was cancelled.
    */
    #[error("collapser was cancelled")]
    Cancelled,
}

impl CollapseError {
    /**
    Wrap an arbitrary error as a [`CollapseError::Provider`].
    */
    pub fn provider(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        CollapseError::Provider(Box::new(err))
    }

    /**
    Build a [`CollapseError::Provider`] from a message, for collaborators
    that don't expose a typed error.
    */
    pub fn provider_msg(msg: impl Into<String>) -> Self {
        CollapseError::Provider(Box::new(Message(msg.into())))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

impl Clone for CollapseError {
    // Waiters in the same batch all need the same error; the inner
    // `BoxError` isn't `Clone`, so callers see it flattened to its message
    // on every clone but the first.
    fn clone(&self) -> Self {
        match self {
            CollapseError::Provider(err) => CollapseError::provider_msg(err.to_string()),
            CollapseError::Timeout(d) => CollapseError::Timeout(*d),
            CollapseError::CallNotPermitted(name) => CollapseError::CallNotPermitted(name.clone()),
            CollapseError::ContractViolation(msg) => CollapseError::ContractViolation(msg.clone()),
            CollapseError::Cancelled => CollapseError::Cancelled,
        }
    }
}
