//! CGI pseudo-environment.
//!
//! Stored procedures written against the gateway contract read request
//! metadata through `owa_util.get_cgi_env`; the engine feeds that layer
//! two parallel name/value arrays built here.

use std::net::SocketAddr;

use crate::core::Request;

/// CGI variable names the gateway always or conditionally sets.
mod keys {
    pub const SERVER_SOFTWARE: &str = "SERVER_SOFTWARE";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
    pub const GATEWAY_INTERFACE: &str = "GATEWAY_INTERFACE";
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const PATH_INFO: &str = "PATH_INFO";
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const REMOTE_PORT: &str = "REMOTE_PORT";
    pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
    pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
    pub const HTTPS: &str = "HTTPS";
    pub const HTTP_HOST: &str = "HTTP_HOST";
    pub const HTTP_USER_AGENT: &str = "HTTP_USER_AGENT";
    pub const HTTP_ACCEPT: &str = "HTTP_ACCEPT";
    pub const HTTP_ACCEPT_ENCODING: &str = "HTTP_ACCEPT_ENCODING";
    pub const HTTP_ACCEPT_LANGUAGE: &str = "HTTP_ACCEPT_LANGUAGE";
    pub const HTTP_REFERER: &str = "HTTP_REFERER";
    pub const HTTP_COOKIE: &str = "HTTP_COOKIE";
    pub const PLSQL_GATEWAY: &str = "PLSQL_GATEWAY";
    pub const GATEWAY_IVERSION: &str = "GATEWAY_IVERSION";
    pub const REQUEST_IANA_CHARSET: &str = "REQUEST_IANA_CHARSET";
}

/// Ordered CGI name/value mapping handed to the invocation envelope.
#[derive(Debug, Clone, Default)]
pub struct CgiEnv {
    vars: Vec<(String, String)>,
}

impl CgiEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        self.vars.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn values(&self) -> Vec<String> {
        self.vars.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Owned copy for error diagnostics.
    pub fn to_vec(&self) -> Vec<(String, String)> {
        self.vars.clone()
    }

    /// Derive the pseudo-environment from request metadata.
    pub fn from_request(
        req: &Request,
        remote: SocketAddr,
        mount_path: &str,
        procedure: &str,
        tls: bool,
    ) -> Self {
        let mut env = Self::new();

        env.insert(
            keys::SERVER_SOFTWARE,
            format!("plsgate/{}", crate::PKG_VERSION),
        );
        env.insert(keys::GATEWAY_INTERFACE, "CGI/1.1");
        env.insert(keys::SERVER_PROTOCOL, protocol_name(req.version()));

        let (server_name, server_port) = split_host(req.host(), tls);
        env.insert(keys::SERVER_NAME, server_name);
        env.insert(keys::SERVER_PORT, server_port);

        env.insert(keys::REQUEST_METHOD, req.method().as_str());
        env.insert(keys::QUERY_STRING, req.query().unwrap_or(""));
        env.insert(keys::SCRIPT_NAME, mount_path);
        env.insert(keys::PATH_INFO, format!("/{}", procedure));

        env.insert(keys::REMOTE_ADDR, remote.ip().to_string());
        env.insert(keys::REMOTE_PORT, remote.port().to_string());

        if let Some(ct) = req.content_type() {
            env.insert(keys::CONTENT_TYPE, ct);
        }
        if let Some(len) = req.content_length() {
            env.insert(keys::CONTENT_LENGTH, len.to_string());
        }
        if tls {
            env.insert(keys::HTTPS, "on");
        }

        for (key, header) in [
            (keys::HTTP_HOST, "host"),
            (keys::HTTP_USER_AGENT, "user-agent"),
            (keys::HTTP_ACCEPT, "accept"),
            (keys::HTTP_ACCEPT_ENCODING, "accept-encoding"),
            (keys::HTTP_ACCEPT_LANGUAGE, "accept-language"),
            (keys::HTTP_REFERER, "referer"),
            (keys::HTTP_COOKIE, "cookie"),
        ] {
            if let Some(value) = req.header(header) {
                env.insert(key, value);
            }
        }

        env.insert(keys::PLSQL_GATEWAY, "plsgate");
        env.insert(keys::GATEWAY_IVERSION, "3");
        env.insert(keys::REQUEST_IANA_CHARSET, "UTF-8");

        env
    }
}

fn protocol_name(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2.0",
        _ => "HTTP/1.1",
    }
}

/// Split a Host header into name and port, defaulting the port from the
/// transport. Handles bracketed IPv6 literals without a port.
fn split_host(host: Option<&str>, tls: bool) -> (String, String) {
    let default_port = if tls { "443" } else { "80" };
    match host {
        Some(h) if !h.is_empty() => {
            if let Some(colon) = h.rfind(':') {
                if h.starts_with('[') && !h.contains("]:") {
                    (h.to_string(), default_port.to_string())
                } else {
                    (h[..colon].to_string(), h[colon + 1..].to_string())
                }
            } else {
                (h.to_string(), default_port.to_string())
            }
        }
        _ => ("localhost".to_string(), default_port.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;

    fn request(uri: &str) -> Request {
        let http_req = http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("host", "example.com:8080")
            .header("user-agent", "test/1.0")
            .header("cookie", "session=abc")
            .body(Bytes::new())
            .unwrap();
        Request::from(http_req)
    }

    #[test]
    fn builds_parallel_arrays_in_order() {
        let req = request("/pls/portal.home?x=1");
        let remote: SocketAddr = "10.0.0.1:51000".parse().unwrap();
        let env = CgiEnv::from_request(&req, remote, "/pls", "portal.home", false);

        assert_eq!(env.names().len(), env.values().len());
        assert_eq!(env.get("REQUEST_METHOD"), Some("GET"));
        assert_eq!(env.get("QUERY_STRING"), Some("x=1"));
        assert_eq!(env.get("SCRIPT_NAME"), Some("/pls"));
        assert_eq!(env.get("PATH_INFO"), Some("/portal.home"));
        assert_eq!(env.get("SERVER_NAME"), Some("example.com"));
        assert_eq!(env.get("SERVER_PORT"), Some("8080"));
        assert_eq!(env.get("REMOTE_ADDR"), Some("10.0.0.1"));
        assert_eq!(env.get("HTTP_COOKIE"), Some("session=abc"));
        assert_eq!(env.get("HTTPS"), None);
        assert_eq!(env.get("GATEWAY_INTERFACE"), Some("CGI/1.1"));
    }

    #[test]
    fn tls_sets_https_and_default_port() {
        let http_req = http::Request::builder()
            .method(Method::GET)
            .uri("/pls/p")
            .header("host", "secure.example.com")
            .body(Bytes::new())
            .unwrap();
        let req = Request::from(http_req);
        let remote: SocketAddr = "10.0.0.1:51000".parse().unwrap();
        let env = CgiEnv::from_request(&req, remote, "/pls", "p", true);

        assert_eq!(env.get("HTTPS"), Some("on"));
        assert_eq!(env.get("SERVER_PORT"), Some("443"));
    }

    #[test]
    fn ipv6_host_without_port() {
        let (name, port) = split_host(Some("[::1]"), false);
        assert_eq!(name, "[::1]");
        assert_eq!(port, "80");
        let (name, port) = split_host(Some("[::1]:9000"), false);
        assert_eq!(name, "[::1]");
        assert_eq!(port, "9000");
    }
}
