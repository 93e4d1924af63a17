//! Retry classification over an error's source chain.
//!
//! Structured variants are matched first. Plain message keywords are only a
//! compatibility shim for providers that report failures as strings.

use paperflow_core::{AgentError, ProviderError};
use std::error::Error as StdError;
use std::io;

const RETRYABLE_KEYWORDS: &[&str] = &[
    "timeout",
    "connection",
    "503",
    "502",
    "504",
    "rate limit",
    "throttle",
    "i/o error",
    "quota",
    "overloaded",
    "capacity",
    "temporarily unavailable",
    "service unavailable",
    "internal server error",
];

const NON_RETRYABLE_KEYWORDS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid_api_key",
    "authentication failed",
    "access denied",
    "400",
    "bad request",
    "malformed",
    "invalid request",
];

/// Verdict for a single error in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    NonRetryable,
    Unknown,
}

/// Whether a failed operation is worth retrying.
///
/// Any non-retryable link in the chain wins over retryable ones; an error
/// with no recognizable link is not retried.
pub fn is_retryable(error: &(dyn StdError + 'static)) -> bool {
    let mut retryable = false;
    for link in std::iter::successors(Some(error), |e: &&(dyn StdError + 'static)| (*e).source()) {
        match classify_link(link) {
            Verdict::NonRetryable => return false,
            Verdict::Retryable => retryable = true,
            Verdict::Unknown => {}
        }
    }
    retryable
}

/// Classify one error without looking at its sources.
pub fn classify_link(error: &(dyn StdError + 'static)) -> Verdict {
    let structured = structured_verdict(error);
    if structured == Verdict::NonRetryable {
        return structured;
    }
    match (structured, keyword_verdict(&error.to_string())) {
        (_, Verdict::NonRetryable) => Verdict::NonRetryable,
        (Verdict::Retryable, _) | (_, Verdict::Retryable) => Verdict::Retryable,
        _ => Verdict::Unknown,
    }
}

fn structured_verdict(error: &(dyn StdError + 'static)) -> Verdict {
    if let Some(agent) = error.downcast_ref::<AgentError>() {
        return match agent {
            AgentError::CircuitOpen { .. }
            | AgentError::InvalidTask(_)
            | AgentError::NotRegistered(_)
            | AgentError::Cancelled => Verdict::NonRetryable,
            _ => Verdict::Unknown,
        };
    }

    if let Some(provider) = error.downcast_ref::<ProviderError>() {
        return match provider {
            ProviderError::RateLimited { .. }
            | ProviderError::Overloaded(_)
            | ProviderError::Timeout(_)
            | ProviderError::Network(_) => Verdict::Retryable,
            ProviderError::AuthenticationFailed(_)
            | ProviderError::MalformedRequest(_)
            | ProviderError::NotConfigured(_) => Verdict::NonRetryable,
            ProviderError::ApiError { status_code, .. } => status_verdict(*status_code),
        };
    }

    if let Some(io_err) = error.downcast_ref::<io::Error>() {
        return match io_err.kind() {
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::Interrupted
            | io::ErrorKind::UnexpectedEof => Verdict::Retryable,
            _ => Verdict::Unknown,
        };
    }

    if error.is::<tokio::time::error::Elapsed>() {
        return Verdict::Retryable;
    }

    Verdict::Unknown
}

/// HTTP status classification.
pub fn status_verdict(status: u16) -> Verdict {
    match status {
        408 | 429 | 500..=599 => Verdict::Retryable,
        400 | 401 | 403 | 404 | 422 => Verdict::NonRetryable,
        _ => Verdict::Unknown,
    }
}

fn keyword_verdict(message: &str) -> Verdict {
    let message = message.to_lowercase();
    if NON_RETRYABLE_KEYWORDS.iter().any(|k| message.contains(k)) {
        Verdict::NonRetryable
    } else if RETRYABLE_KEYWORDS.iter().any(|k| message.contains(k)) {
        Verdict::Retryable
    } else {
        Verdict::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperflow_core::AgentType;
    use std::fmt;

    /// A string-only error with an optional source, like a wrapped SDK error.
    #[derive(Debug)]
    struct Opaque {
        message: &'static str,
        source: Option<Box<dyn StdError + 'static>>,
    }

    impl fmt::Display for Opaque {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for Opaque {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.source.as_deref()
        }
    }

    fn opaque(message: &'static str) -> Opaque {
        Opaque {
            message,
            source: None,
        }
    }

    fn rejected(message: &str) -> AgentError {
        AgentError::Rejected {
            agent_type: AgentType::ContentSummarizer,
            message: message.into(),
        }
    }

    #[test]
    fn structured_provider_errors() {
        assert!(is_retryable(&AgentError::from(ProviderError::Timeout("30s".into()))));
        assert!(is_retryable(&AgentError::from(ProviderError::Network("reset".into()))));
        assert!(is_retryable(&AgentError::from(ProviderError::RateLimited {
            retry_after_secs: 2
        })));
        assert!(is_retryable(&AgentError::from(ProviderError::ApiError {
            status_code: 502,
            message: "gateway".into(),
        })));
        assert!(!is_retryable(&AgentError::from(ProviderError::AuthenticationFailed(
            "key revoked".into()
        ))));
        assert!(!is_retryable(&AgentError::from(ProviderError::MalformedRequest(
            "bad json".into()
        ))));
    }

    #[test]
    fn circuit_open_is_never_retried() {
        let err = AgentError::CircuitOpen {
            agent_type: AgentType::QualityChecker,
        };
        assert!(!is_retryable(&err));
        assert!(!is_retryable(&err.context("checking quality")));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert!(is_retryable(&rejected("Upstream returned 503 Service Unavailable")));
        assert!(is_retryable(&rejected("Request THROTTLED, quota exceeded")));
        assert!(!is_retryable(&rejected("401 Unauthorized")));
        assert!(!is_retryable(&rejected("Invalid request: missing field")));
    }

    #[test]
    fn non_retryable_overrides_retryable() {
        assert!(!is_retryable(&rejected("connection closed: 403 forbidden")));

        let chain = Opaque {
            message: "request timeout",
            source: Some(Box::new(opaque("invalid_api_key"))),
        };
        assert!(!is_retryable(&chain));
    }

    #[test]
    fn walks_the_whole_chain() {
        let chain = Opaque {
            message: "summarization failed",
            source: Some(Box::new(io::Error::new(io::ErrorKind::ConnectionReset, "peer"))),
        };
        assert!(is_retryable(&chain));

        let deep = Opaque {
            message: "outer",
            source: Some(Box::new(Opaque {
                message: "middle",
                source: Some(Box::new(opaque("model is overloaded"))),
            })),
        };
        assert!(is_retryable(&deep));
    }

    #[test]
    fn unknown_errors_are_not_retried() {
        assert!(!is_retryable(&opaque("something odd happened")));
        assert!(!is_retryable(&rejected("empty document")));
    }

    #[test]
    fn status_table() {
        assert_eq!(status_verdict(503), Verdict::Retryable);
        assert_eq!(status_verdict(429), Verdict::Retryable);
        assert_eq!(status_verdict(401), Verdict::NonRetryable);
        assert_eq!(status_verdict(422), Verdict::NonRetryable);
        assert_eq!(status_verdict(302), Verdict::Unknown);
    }
}
