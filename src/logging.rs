//! Logging setup and per-component log scopes.
//!
//! The backend is `env_logger`, installed once by [`init`]. Components do not
//! reach for a global prefix; each one is handed a [`LogContext`] when it is
//! built and prints it at the start of every line.
use std::{fmt, sync::Arc, sync::Once};

static INIT: Once = Once::new();

/// Install the `env_logger` backend. Defaults to `info`; `RUST_LOG` overrides.
///
/// Safe to call more than once; only the first call has any effect.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    });
}

/// Scope label carried by a component and printed with its log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    scope: Arc<str>,
}

impl LogContext {
    pub fn new(scope: impl AsRef<str>) -> Self {
        Self {
            scope: Arc::from(scope.as_ref()),
        }
    }

    /// Nested scope, e.g. `server` -> `server/127.0.0.1:4000`.
    pub fn child(&self, label: impl fmt::Display) -> Self {
        Self::new(format!("{}/{label}", self.scope))
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.scope)
    }
}
