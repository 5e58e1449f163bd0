//! End-to-end engine tests over a scripted database connection.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use plsgate::config::GatewayConfig;
use plsgate::db::{Bind, BindSet, BindValue, Connection, DbError, Outcome, Row};
use plsgate::engine::envelope::binds;
use plsgate::engine::{ArgValue, CgiEnv, Gateway, ProcedureRequest, UploadedFile};

/// Scripted connection. Every executed statement is recorded; the
/// response depends on which stage of the protocol the text belongs to.
#[derive(Clone)]
struct MockConnection {
    executed: Arc<Mutex<Vec<(String, BindSet)>>>,
    queried: Arc<Mutex<Vec<String>>>,
    /// Value the validation function reports.
    validate_result: i64,
    /// name_resolve outcome as (schema, part1, part2).
    resolved: Option<(String, Option<String>, Option<String>)>,
    /// Catalog rows for the argument-type query.
    arg_rows: Vec<Row>,
    /// Page rows the procedure writes.
    page: Vec<String>,
    page_count: i64,
    /// Optional (tag, size, content) download.
    download: Option<(String, i64, Bytes)>,
}

impl MockConnection {
    fn new() -> Self {
        Self {
            executed: Arc::new(Mutex::new(Vec::new())),
            queried: Arc::new(Mutex::new(Vec::new())),
            validate_result: 1,
            resolved: None,
            arg_rows: Vec::new(),
            page: Vec::new(),
            page_count: 0,
            download: None,
        }
    }

    fn with_page(mut self, lines: &[&str]) -> Self {
        self.page = lines.iter().map(|l| l.to_string()).collect();
        self.page_count = self.page.len() as i64;
        self
    }

    fn executed_texts(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    fn executed_binds(&self, index: usize) -> BindSet {
        self.executed.lock().unwrap()[index].1.clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, text: &str, binds_in: &BindSet) -> Result<Outcome, DbError> {
        self.executed
            .lock()
            .unwrap()
            .push((text.to_string(), binds_in.clone()));

        if text.contains("name_resolve") {
            let (schema, part1, part2) = self
                .resolved
                .clone()
                .ok_or(DbError::Execute {
                    code: 6564,
                    message: "object does not exist".into(),
                })?;
            let mut outcome = Outcome::new().with("schema", BindValue::Str(schema));
            if let Some(p1) = part1 {
                outcome = outcome.with("part1", BindValue::Str(p1));
            }
            if let Some(p2) = part2 {
                outcome = outcome.with("part2", BindValue::Str(p2));
            }
            return Ok(outcome);
        }

        if text.contains(":proc_name") {
            return Ok(Outcome::new().with("result", BindValue::Int(self.validate_result)));
        }

        if text.starts_with("insert into") {
            return Ok(Outcome::new());
        }

        // The invocation envelope.
        let mut outcome = Outcome::new()
            .with(binds::PAGE_LINES, BindValue::StrArray(self.page.clone()))
            .with(binds::PAGE_COUNT, BindValue::Int(self.page_count));
        if let Some((tag, size, content)) = &self.download {
            outcome = outcome
                .with(binds::DOC_INFO, BindValue::Str(tag.clone()))
                .with(binds::DOC_SIZE, BindValue::Int(*size))
                .with(binds::DOC_BLOB, BindValue::Blob(content.clone()));
        }
        Ok(outcome)
    }

    async fn query(&mut self, sql: &str, _binds: &[BindValue]) -> Result<Vec<Row>, DbError> {
        self.queried.lock().unwrap().push(sql.to_string());
        Ok(self.arg_rows.clone())
    }

    fn mark_broken(&mut self) {}
}

fn request(procedure: &str, args: Vec<(String, ArgValue)>) -> ProcedureRequest {
    let mut cgi = CgiEnv::new();
    cgi.insert("REQUEST_METHOD", "GET");
    cgi.insert("PATH_INFO", format!("/{}", procedure));
    ProcedureRequest {
        procedure: procedure.to_string(),
        args,
        cgi,
        files: Vec::new(),
    }
}

fn single(name: &str, value: &str) -> (String, ArgValue) {
    (name.to_string(), ArgValue::Single(value.to_string()))
}

#[tokio::test]
async fn excluded_procedure_is_denied_without_db_work() {
    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = MockConnection::new();

    let model = gateway
        .handle(&request("dbms_output.put_line", vec![]), &mut conn)
        .await
        .unwrap();

    assert_eq!(model.status, 200);
    assert_eq!(model.body, "access denied");
    assert!(conn.executed_texts().is_empty());
}

#[tokio::test]
async fn validation_deny_suppresses_invocation_and_uploads() {
    let mut config = GatewayConfig::default();
    config.validation_function = Some("security.is_allowed".to_string());
    config.document_table = Some("wwv_documents".to_string());
    let gateway = Gateway::new(config);

    let mut conn = MockConnection::new();
    conn.validate_result = 0;

    let mut req = request("app.page", vec![]);
    req.files.push(UploadedFile {
        field_name: "a_doc".to_string(),
        file_name: "notes.txt".to_string(),
        mime_type: "text/plain".to_string(),
        content: Bytes::from_static(b"hello"),
    });

    let model = gateway.handle(&req, &mut conn).await.unwrap();

    assert_eq!(model.body, "access denied");
    let texts = conn.executed_texts();
    // Only the validation block ran: no insert, no envelope.
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("security.is_allowed"));
}

#[tokio::test]
async fn flexible_mode_runs_end_to_end() {
    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = MockConnection::new().with_page(&[
        "Status: 302 Found\n",
        "Location: /pls/next\n",
        "\n",
        "redirecting",
    ]);

    let args = vec![single("x", "1"), single("y", "two")];
    let model = gateway
        .handle(&request("!print_args", args), &mut conn)
        .await
        .unwrap();

    assert_eq!(model.status, 302);
    assert!(model
        .headers
        .iter()
        .any(|(n, v)| n == "Location" && v == "/pls/next"));
    assert_eq!(model.body, "redirecting");

    let texts = conn.executed_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("print_args(:arg_names, :arg_values);"));

    let envelope_binds = conn.executed_binds(0);
    match envelope_binds.get("arg_names") {
        Some(Bind::In(BindValue::StrArray(names))) => {
            assert_eq!(names, &vec!["x".to_string(), "y".to_string()]);
        }
        other => panic!("expected name array bind, got {:?}", other),
    }
}

#[tokio::test]
async fn fixed_mode_resolves_catalog_types() {
    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = MockConnection::new().with_page(&["ok"]);
    conn.resolved = Some((
        "APP".to_string(),
        Some("DOCS".to_string()),
        Some("LIST".to_string()),
    ));
    conn.arg_rows = vec![
        vec![Some("X".to_string()), Some("VARCHAR2".to_string())],
        vec![Some("TAGS".to_string()), Some("PL/SQL TABLE".to_string())],
    ];

    let args = vec![single("x", "1"), single("tags", "a")];
    let model = gateway
        .handle(&request("docs.list", args), &mut conn)
        .await
        .unwrap();
    assert_eq!(model.status, 200);
    assert_eq!(model.body, "ok");

    // Packaged lookup path: name_resolve then the package-qualified
    // arguments query.
    let queried = conn.queried.lock().unwrap().clone();
    assert_eq!(queried.len(), 1);
    assert!(queried[0].contains("package_name = :2"));

    let texts = conn.executed_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("name_resolve"));
    assert!(texts[1].contains("docs.list(x=>:a_x, tags=>:a_tags);"));

    // The table-typed argument binds as an array even with one value.
    let envelope_binds = conn.executed_binds(1);
    match envelope_binds.get("a_tags") {
        Some(Bind::In(BindValue::StrArray(values))) => {
            assert_eq!(values, &vec!["a".to_string()]);
        }
        other => panic!("expected array bind for tags, got {:?}", other),
    }
    match envelope_binds.get("a_x") {
        Some(Bind::In(BindValue::Str(v))) => assert_eq!(v, "1"),
        other => panic!("expected scalar bind for x, got {:?}", other),
    }
}

#[tokio::test]
async fn zero_argument_request_skips_catalog() {
    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = MockConnection::new().with_page(&["home page"]);

    let model = gateway
        .handle(&request("portal.home", vec![]), &mut conn)
        .await
        .unwrap();
    assert_eq!(model.body, "home page");

    let texts = conn.executed_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("portal.home;"));
    assert!(conn.queried.lock().unwrap().is_empty());
}

#[tokio::test]
async fn alias_calls_configured_target() {
    let mut config = GatewayConfig::default();
    config
        .path_aliases
        .insert("home".to_string(), "portal.resolve".to_string());
    let gateway = Gateway::new(config);
    let mut conn = MockConnection::new().with_page(&["aliased"]);

    let model = gateway
        .handle(&request("home", vec![]), &mut conn)
        .await
        .unwrap();
    assert_eq!(model.body, "aliased");

    let texts = conn.executed_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("portal.resolve(:a_path);"));

    let envelope_binds = conn.executed_binds(0);
    match envelope_binds.get("a_path") {
        Some(Bind::In(BindValue::Str(path))) => assert_eq!(path, "home"),
        other => panic!("expected alias path bind, got {:?}", other),
    }
}

#[tokio::test]
async fn uploads_insert_before_invocation() {
    let mut config = GatewayConfig::default();
    config.document_table = Some("wwv_documents".to_string());
    let gateway = Gateway::new(config);
    let mut conn = MockConnection::new().with_page(&["stored"]);

    let mut req = request("app.receive", vec![]);
    req.files.push(UploadedFile {
        field_name: "a_doc".to_string(),
        file_name: "report.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        content: Bytes::from_static(b"%PDF"),
    });

    let model = gateway.handle(&req, &mut conn).await.unwrap();
    assert_eq!(model.body, "stored");

    let texts = conn.executed_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].starts_with("insert into wwv_documents"));
    assert!(texts[1].contains("app.receive;"));
}

#[tokio::test]
async fn uploads_skipped_without_document_table() {
    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = MockConnection::new().with_page(&["no table"]);

    let mut req = request("app.receive", vec![]);
    req.files.push(UploadedFile {
        field_name: "a_doc".to_string(),
        file_name: "report.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        content: Bytes::from_static(b"%PDF"),
    });

    let model = gateway.handle(&req, &mut conn).await.unwrap();
    assert_eq!(model.body, "no table");

    let texts = conn.executed_texts();
    assert_eq!(texts.len(), 1);
    assert!(!texts[0].starts_with("insert into"));
}

#[tokio::test]
async fn binary_download_reaches_the_model() {
    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = MockConnection::new().with_page(&[
        "Content-Type: image/png\n",
        "\n",
    ]);
    conn.download = Some((
        "B".to_string(),
        4,
        Bytes::from_static(b"\x89PNG"),
    ));

    let model = gateway
        .handle(&request("images.fetch", vec![]), &mut conn)
        .await
        .unwrap();

    let file = model.file.expect("download should be carried");
    assert_eq!(file.size, 4);
    assert_eq!(file.content.as_ref(), b"\x89PNG");
}

#[tokio::test]
async fn procedure_failure_carries_diagnostics() {
    struct FailingEnvelope {
        inner: MockConnection,
    }

    #[async_trait]
    impl Connection for FailingEnvelope {
        async fn execute(&mut self, text: &str, binds_in: &BindSet) -> Result<Outcome, DbError> {
            if text.contains("owa.get_page") {
                return Err(DbError::Execute {
                    code: 20000,
                    message: "app.fail: boom".into(),
                });
            }
            self.inner.execute(text, binds_in).await
        }
        async fn query(&mut self, sql: &str, b: &[BindValue]) -> Result<Vec<Row>, DbError> {
            self.inner.query(sql, b).await
        }
        fn mark_broken(&mut self) {}
    }

    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = FailingEnvelope {
        inner: MockConnection::new(),
    };

    let err = gateway
        .handle(&request("app.fail", vec![]), &mut conn)
        .await
        .unwrap_err();
    assert!(err.is_procedure());
    assert!(err.message().contains("boom"));
    match err {
        plsgate::GatewayError::Procedure { cgi, sql, .. } => {
            assert!(cgi.iter().any(|(n, _)| n == "REQUEST_METHOD"));
            assert!(sql.contains("owa.get_page"));
        }
        other => panic!("expected procedure error, got {:?}", other),
    }
}

#[tokio::test]
async fn lost_session_is_marked_broken() {
    struct DroppedSession {
        inner: MockConnection,
        broken: bool,
    }

    #[async_trait]
    impl Connection for DroppedSession {
        async fn execute(&mut self, text: &str, binds_in: &BindSet) -> Result<Outcome, DbError> {
            if text.contains("owa.get_page") {
                return Err(DbError::Disconnected(
                    "end-of-file on communication channel".into(),
                ));
            }
            self.inner.execute(text, binds_in).await
        }
        async fn query(&mut self, sql: &str, b: &[BindValue]) -> Result<Vec<Row>, DbError> {
            self.inner.query(sql, b).await
        }
        fn mark_broken(&mut self) {
            self.broken = true;
        }
    }

    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = DroppedSession {
        inner: MockConnection::new(),
        broken: false,
    };

    let err = gateway
        .handle(&request("app.page", vec![]), &mut conn)
        .await
        .unwrap_err();
    assert!(err.is_procedure());
    assert!(conn.broken, "lost session must be discarded, not reused");
}

#[tokio::test]
async fn gateway_header_is_stamped() {
    let gateway = Gateway::new(GatewayConfig::default());
    let mut conn = MockConnection::new().with_page(&["plain"]);

    let model = gateway
        .handle(&request("portal.home", vec![]), &mut conn)
        .await
        .unwrap();

    assert!(model
        .headers
        .iter()
        .any(|(n, v)| n == "X-Gateway" && v.starts_with("plsgate/")));
}
