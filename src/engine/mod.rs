//! Gateway protocol engine.
//!
//! One request flows through the stages strictly in order: exclusion
//! check, validation hook, upload bridging, call-plan resolution,
//! invocation, output parsing. No stage retries and no stage starts
//! before the previous one finishes. The engine holds no cross-request
//! mutable state; concurrency lives entirely in the connection pool.

pub mod assemble;
pub mod cgi;
pub mod envelope;
pub mod error;
pub mod invoke;
pub mod output;
pub mod plan;
pub mod upload;

use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::db::{Bind, BindSet, BindValue, Connection, DbError, OutSpec};

pub use cgi::CgiEnv;
pub use error::GatewayError;
pub use output::ResponseModel;
pub use plan::{ArgValue, CallPlanBuilder};
pub use upload::UploadedFile;

/// Poison the session when the driver reports it unusable, so the pool
/// discards it instead of handing a dead session to the next request.
pub(crate) fn discard_if_fatal(e: &DbError, conn: &mut dyn Connection) {
    if e.is_fatal() {
        warn!("database session lost, discarding: {}", e);
        conn.mark_broken();
    }
}

/// One incoming procedure request, immutable once built.
#[derive(Debug)]
pub struct ProcedureRequest {
    /// Procedure identifier from the URL, `!` marker and all.
    pub procedure: String,
    /// Ordered argument mapping; repeated HTTP parameters are already
    /// folded into multi-valued entries.
    pub args: Vec<(String, ArgValue)>,
    pub cgi: CgiEnv,
    pub files: Vec<UploadedFile>,
}

/// The engine. Cheap to share; every per-request resource arrives as an
/// argument.
pub struct Gateway {
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the full pipeline for one request on an exclusively owned
    /// connection.
    pub async fn handle(
        &self,
        request: &ProcedureRequest,
        conn: &mut dyn Connection,
    ) -> Result<ResponseModel, GatewayError> {
        if self.is_excluded(&request.procedure) {
            info!(procedure = %request.procedure, "request names an excluded procedure");
            return Ok(ResponseModel::denied());
        }

        if let Some(func) = &self.config.validation_function {
            if !self.validate(func, &request.procedure, conn).await? {
                info!(procedure = %request.procedure, "request denied by validation function");
                return Ok(ResponseModel::denied());
            }
        }

        // Uploads run only for authorized requests, so a denied request
        // leaves no document-table rows behind.
        if !request.files.is_empty() {
            if let Some(table) = &self.config.document_table {
                upload::upload_files(&request.files, table, &request.cgi, conn).await?;
            } else {
                debug!(
                    files = request.files.len(),
                    "no document table configured, skipping uploads"
                );
            }
        }

        let builder = CallPlanBuilder::new(&self.config.path_aliases);
        let plan = builder
            .build(&request.procedure, &request.args, conn)
            .await?;
        let raw = invoke::invoke(&plan, &request.cgi, conn).await?;
        Ok(output::parse(raw))
    }

    /// Deny list for schema-internal packages. Matches on the lowercased
    /// name; `:` never appears in a legitimate procedure identifier.
    fn is_excluded(&self, procedure: &str) -> bool {
        if procedure.contains(':') {
            return true;
        }
        let lowered = procedure
            .strip_prefix('!')
            .unwrap_or(procedure)
            .to_lowercase();
        self.config
            .exclusion_prefixes
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
    }

    /// Invoke the configured request-validation function. A false result
    /// is a soft-deny; an execution failure is a request fault.
    async fn validate(
        &self,
        func: &str,
        procedure: &str,
        conn: &mut dyn Connection,
    ) -> Result<bool, GatewayError> {
        let block = format!(
            "begin\n  if {}(:proc_name) then\n    :result := 1;\n  else\n    :result := 0;\n  end if;\nend;",
            func
        );
        let mut binds = BindSet::new();
        binds.insert(
            "proc_name",
            Bind::In(BindValue::Str(procedure.to_string())),
        );
        binds.insert("result", Bind::Out(OutSpec::Int));

        let outcome = match conn.execute(&block, &binds).await {
            Ok(outcome) => outcome,
            Err(e) => {
                discard_if_fatal(&e, conn);
                return Err(GatewayError::request(format!(
                    "validation function {} failed: {}",
                    func, e
                )));
            }
        };
        Ok(outcome.int_out("result") == Some(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn gateway() -> Gateway {
        Gateway::new(GatewayConfig::default())
    }

    #[test]
    fn exclusion_covers_internal_packages() {
        let g = gateway();
        assert!(g.is_excluded("sys.kill_session"));
        assert!(g.is_excluded("DBMS_OUTPUT.put_line"));
        assert!(g.is_excluded("utl_http.request"));
        assert!(g.is_excluded("owa_util.cellsprint"));
        assert!(g.is_excluded("!dbms_sql.execute"));
        assert!(g.is_excluded("weird:name"));
        assert!(!g.is_excluded("portal.home"));
        assert!(!g.is_excluded("myowa.page"));
    }
}
