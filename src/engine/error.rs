//! Gateway error taxonomy.

use std::fmt;

use crate::db::BindSet;

/// Typed failure surfaced by the gateway engine.
///
/// `Request` covers configuration and pre-execution resolution faults;
/// `Procedure` covers faults raised by or attributed to the invoked
/// procedure and carries the context needed for postmortem diagnosis.
/// Neither kind is ever retried automatically: a failed invocation may
/// have left partial side effects behind.
#[derive(Debug)]
pub enum GatewayError {
    /// Configuration or resolution fault before execution.
    Request(String),

    /// Execution fault with the CGI environment, invocation text, and
    /// bindings that were in effect.
    Procedure {
        message: String,
        cgi: Vec<(String, String)>,
        sql: String,
        binds: BindSet,
    },
}

impl GatewayError {
    pub fn request(msg: impl Into<String>) -> Self {
        GatewayError::Request(msg.into())
    }

    pub fn procedure(
        msg: impl Into<String>,
        cgi: Vec<(String, String)>,
        sql: impl Into<String>,
        binds: BindSet,
    ) -> Self {
        GatewayError::Procedure {
            message: msg.into(),
            cgi,
            sql: sql.into(),
            binds,
        }
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, GatewayError::Procedure { .. })
    }

    /// Human-readable message without the diagnostic context.
    pub fn message(&self) -> &str {
        match self {
            GatewayError::Request(msg) => msg,
            GatewayError::Procedure { message, .. } => message,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Request(msg) => write!(f, "request error: {}", msg),
            GatewayError::Procedure { message, .. } => {
                write!(f, "procedure error: {}", message)
            }
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_distinguishes_kinds() {
        let req = GatewayError::request("no such procedure");
        assert_eq!(req.to_string(), "request error: no such procedure");
        assert!(!req.is_procedure());

        let proc_err = GatewayError::procedure(
            "ORA-06502",
            vec![("REQUEST_METHOD".into(), "GET".into())],
            "begin p; end;",
            BindSet::new(),
        );
        assert_eq!(proc_err.to_string(), "procedure error: ORA-06502");
        assert!(proc_err.is_procedure());
        assert_eq!(proc_err.message(), "ORA-06502");
    }
}
