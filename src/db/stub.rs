//! No-database backend.
//!
//! Answers the invocation protocol with a canned page so the binary can
//! run, be smoke-tested, and be benchmarked without an Oracle client
//! linked in. Useful for measuring the HTTP path in isolation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{Bind, BindSet, BindValue, Connection, ConnectionPool, DbError, Outcome, Row};

/// Bounded pool of stub connections. The permit count models pool size so
/// exhaustion behaves like a real pool: acquire suspends until a
/// connection is released.
pub struct StubPool {
    permits: Arc<Semaphore>,
}

impl StubPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }
}

#[async_trait]
impl ConnectionPool for StubPool {
    async fn acquire(&self) -> Result<Box<dyn Connection>, DbError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed)?;
        Ok(Box::new(StubConnection { _permit: permit }))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Stub session: every out-bind gets a canned value shaped by its spec.
pub struct StubConnection {
    _permit: OwnedSemaphorePermit,
}

const STUB_PAGE: &[&str] = &[
    "Content-type: text/html\n",
    "\n",
    "<html><body>plsgate stub backend</body></html>\n",
];

#[async_trait]
impl Connection for StubConnection {
    async fn execute(&mut self, _text: &str, binds: &BindSet) -> Result<Outcome, DbError> {
        let mut outcome = Outcome::new();
        for (name, bind) in binds.iter() {
            let spec = match bind {
                Bind::Out(spec) | Bind::InOut { spec, .. } => spec,
                Bind::In(_) => continue,
            };
            let value = match spec {
                super::OutSpec::StrArray { .. } => {
                    BindValue::StrArray(STUB_PAGE.iter().map(|s| s.to_string()).collect())
                }
                super::OutSpec::Int => BindValue::Int(STUB_PAGE.len() as i64),
                super::OutSpec::Str { .. } => BindValue::Null,
                super::OutSpec::Blob => BindValue::Null,
            };
            outcome = outcome.with(name, value);
        }
        Ok(outcome)
    }

    async fn query(&mut self, _sql: &str, _binds: &[BindValue]) -> Result<Vec<Row>, DbError> {
        // Empty catalog: every argument binds as a scalar.
        Ok(Vec::new())
    }

    fn mark_broken(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::OutSpec;

    #[tokio::test]
    async fn stub_fills_out_binds_by_spec() {
        let pool = StubPool::new(1);
        let mut conn = pool.acquire().await.unwrap();

        let mut binds = BindSet::new();
        binds.insert("inval", Bind::In(BindValue::Str("x".into())));
        binds.insert(
            "lines",
            Bind::Out(OutSpec::StrArray {
                max_entries: 10,
                max_len: 256,
            }),
        );
        binds.insert(
            "count",
            Bind::InOut {
                value: BindValue::Int(10),
                spec: OutSpec::Int,
            },
        );

        let outcome = conn.execute("begin null; end;", &binds).await.unwrap();
        assert!(outcome.value("inval").is_none());
        assert_eq!(outcome.int_out("count"), Some(3));
        let lines = outcome.value("lines").unwrap().as_str_array().unwrap();
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_acquires() {
        let pool = StubPool::new(1);
        let first = pool.acquire().await.unwrap();
        // Second acquire must not complete while the first is held.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            pool.acquire(),
        )
        .await;
        assert!(pending.is_err());
        drop(first);
        assert!(pool.acquire().await.is_ok());
    }
}
