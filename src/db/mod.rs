//! Database collaborator boundary.
//!
//! The gateway engine never talks to a concrete driver. It depends on the
//! [`Connection`] and [`ConnectionPool`] traits; a deployment supplies a
//! driver-backed pool, and [`StubPool`] ships in-tree for running and
//! benchmarking without a database.
//!
//! Bind descriptors are a closed union: direction and shape are encoded in
//! the type so an out-bind without size bounds, or an in-bind carrying an
//! out spec, cannot be constructed.

mod stub;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

pub use stub::{StubConnection, StubPool};

/// A scalar or array value crossing the SQL boundary.
#[derive(Clone, PartialEq)]
pub enum BindValue {
    Null,
    Str(String),
    Int(i64),
    StrArray(Vec<String>),
    Blob(Bytes),
}

impl fmt::Debug for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Null => write!(f, "Null"),
            BindValue::Str(s) => write!(f, "Str({:?})", s),
            BindValue::Int(n) => write!(f, "Int({})", n),
            BindValue::StrArray(v) => write!(f, "StrArray(len={})", v.len()),
            // Blob contents are never diagnostic material
            BindValue::Blob(b) => write!(f, "Blob({} bytes)", b.len()),
        }
    }
}

impl BindValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BindValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            BindValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<&[String]> {
        match self {
            BindValue::StrArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Bytes> {
        match self {
            BindValue::Blob(b) => Some(b),
            _ => None,
        }
    }
}

/// Declared shape of an out-bind, with the size bounds the driver needs
/// to allocate the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutSpec {
    Str { max_len: usize },
    Int,
    Blob,
    StrArray { max_entries: usize, max_len: usize },
}

/// One bind in a statement: direction plus value and/or out spec.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    In(BindValue),
    Out(OutSpec),
    InOut { value: BindValue, spec: OutSpec },
}

impl Bind {
    pub fn direction(&self) -> &'static str {
        match self {
            Bind::In(_) => "in",
            Bind::Out(_) => "out",
            Bind::InOut { .. } => "in/out",
        }
    }
}

/// Ordered, collision-free mapping of placeholder name to bind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindSet {
    binds: Vec<(String, Bind)>,
}

impl BindSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bind. Returns false (and leaves the set unchanged) if the
    /// placeholder name is already present.
    pub fn insert(&mut self, name: impl Into<String>, bind: Bind) -> bool {
        let name = name.into();
        if self.get(&name).is_some() {
            return false;
        }
        self.binds.push((name, bind));
        true
    }

    pub fn get(&self, name: &str) -> Option<&Bind> {
        self.binds.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bind)> {
        self.binds.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.binds.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.binds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }
}

/// Out-bind values returned by an execution.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    out: Vec<(String, BindValue)>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: BindValue) -> Self {
        self.out.push((name.into(), value));
        self
    }

    pub fn value(&self, name: &str) -> Option<&BindValue> {
        self.out.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Remove and return an out value, avoiding a copy for large payloads.
    pub fn take(&mut self, name: &str) -> Option<BindValue> {
        let idx = self.out.iter().position(|(n, _)| n == name)?;
        Some(self.out.remove(idx).1)
    }

    pub fn str_out(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(BindValue::as_str)
    }

    pub fn int_out(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(BindValue::as_int)
    }
}

/// One row of a catalog query: column values in select-list order.
pub type Row = Vec<Option<String>>;

/// Driver-level failure.
#[derive(Debug)]
pub enum DbError {
    /// The statement executed and the database raised.
    Execute { code: i32, message: String },
    /// The session is unusable; the pool must discard it.
    Disconnected(String),
    /// Pool has no free session and gave up waiting.
    PoolTimeout,
    /// Pool is shutting down.
    PoolClosed,
    /// Driver returned data the gateway cannot interpret.
    Malformed(String),
}

impl DbError {
    /// True when the session itself is poisoned and must not be reused.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Disconnected(_))
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Execute { code, message } => write!(f, "ORA-{:05}: {}", code, message),
            DbError::Disconnected(msg) => write!(f, "connection lost: {}", msg),
            DbError::PoolTimeout => write!(f, "timed out waiting for a pooled connection"),
            DbError::PoolClosed => write!(f, "connection pool is closed"),
            DbError::Malformed(msg) => write!(f, "malformed driver result: {}", msg),
        }
    }
}

impl std::error::Error for DbError {}

/// A single database session, exclusively owned by one request at a time.
///
/// Dropping a future returned by [`execute`](Connection::execute) abandons
/// the round-trip from the gateway's point of view; whether the server-side
/// call is cancelled is the driver's contract. Implementations should mark
/// the session broken in that case so the pool discards it.
#[async_trait]
pub trait Connection: Send {
    /// Execute an anonymous block with named binds, returning out-bind
    /// values keyed by placeholder name.
    async fn execute(&mut self, text: &str, binds: &BindSet) -> Result<Outcome, DbError>;

    /// Run a query with positional in-binds, returning rows of
    /// string-converted columns. Used for catalog introspection only.
    async fn query(&mut self, sql: &str, binds: &[BindValue]) -> Result<Vec<Row>, DbError>;

    /// Mark the session unusable; the pool drops it instead of reusing it.
    fn mark_broken(&mut self);
}

/// Source of pooled connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Acquire an exclusive connection. Suspends when the pool is
    /// exhausted; callers bound the wait with their own timeout.
    async fn acquire(&self) -> Result<Box<dyn Connection>, DbError>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_set_rejects_duplicates() {
        let mut set = BindSet::new();
        assert!(set.insert("a_name", Bind::In(BindValue::Str("x".into()))));
        assert!(!set.insert("a_name", Bind::In(BindValue::Null)));
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("a_name"),
            Some(&Bind::In(BindValue::Str("x".into())))
        );
    }

    #[test]
    fn bind_set_preserves_order() {
        let mut set = BindSet::new();
        set.insert("b", Bind::In(BindValue::Null));
        set.insert("a", Bind::In(BindValue::Null));
        set.insert("c", Bind::Out(OutSpec::Int));
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn outcome_take_removes_value() {
        let mut out = Outcome::new()
            .with("n", BindValue::Int(7))
            .with("s", BindValue::Str("hi".into()));
        assert_eq!(out.take("n"), Some(BindValue::Int(7)));
        assert_eq!(out.take("n"), None);
        assert_eq!(out.str_out("s"), Some("hi"));
    }

    #[test]
    fn blob_debug_hides_contents() {
        let v = BindValue::Blob(Bytes::from_static(b"secret-bytes"));
        assert_eq!(format!("{:?}", v), "Blob(12 bytes)");
    }
}
