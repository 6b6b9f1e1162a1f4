// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use crate::error::{Error, Result};
use crate::iotools::{CancelToken, Cancellable};

use std::fmt::Debug;
use std::io::{ErrorKind, Read};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::thread::spawn;
use std::time::Duration;

use log::debug;

/// The header that carries the API key
pub const CREDENTIAL_HEADER: &str = "Gram-Key";

/// The header that carries the project scope
pub const PROJECT_HEADER: &str = "Gram-Project";

/// Replaces the value of headers that must never be logged
pub fn redact<'a>(name: &str, value: &'a str) -> &'a str {
    if name.eq_ignore_ascii_case(CREDENTIAL_HEADER) || name.eq_ignore_ascii_case(PROJECT_HEADER) {
        "[REDACTED]"
    } else {
        value
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<_> = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), redact(k, v)))
            .collect();

        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &self.body.len())
            .finish()
    }
}

impl Request {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: "POST".into(),
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// The path component of the URL, without query or fragment
    pub fn path(&self) -> &str {
        let rest = match self.url.find("://") {
            Some(n) => &self.url[n + 3..],
            None => &self.url,
        };

        let rest = match rest.find('/') {
            Some(n) => &rest[n..],
            None => return "/",
        };

        rest.split(['?', '#']).next().unwrap_or(rest)
    }
}

pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read + Send>,
}

impl Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("Content-Type").unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can send one HTTP request
///
/// Implementations return every response they receive, whatever its status;
/// only failures to get a response at all are errors.
pub trait Transport {
    fn send(&self, request: Request) -> Result<Response>;
}

/// A blocking HTTP transport with bounded timeouts
pub struct HttpTransport {
    agent: ureq::Agent,
    token: CancelToken,
}

impl HttpTransport {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    const POLL: Duration = Duration::from_millis(50);

    pub fn new(timeout: Duration, token: CancelToken) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Self::CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build();

        Self { agent, token }
    }

    fn exchange(agent: &ureq::Agent, request: &Request, token: CancelToken) -> Result<Response> {
        let mut req = agent.request(&request.method, &request.url);
        for (k, v) in &request.headers {
            req = req.set(k, v);
        }

        let rep = match req.send_bytes(&request.body) {
            Ok(rep) => rep,
            Err(ureq::Error::Status(_, rep)) => rep,
            Err(e) => return Err(Error::Http(Box::new(e))),
        };

        let status = rep.status();
        let headers = rep
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = rep.header(&name)?.to_owned();
                Some((name, value))
            })
            .collect();

        let body = Cancellable::new(rep.into_reader(), token);

        Ok(Response {
            status,
            headers,
            body: Box::new(body),
        })
    }
}

impl Transport for HttpTransport {
    /// Sends the request on a worker thread and waits for the response
    ///
    /// The wait ends early when the token is cancelled. The abandoned call
    /// then runs into its own timeout in the background.
    fn send(&self, request: Request) -> Result<Response> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (tx, rx) = channel();
        let agent = self.agent.clone();
        let token = self.token.clone();
        spawn(move || {
            let result = Self::exchange(&agent, &request, token);
            if tx.send(result).is_err() {
                debug!("dropping response to cancelled {} {}", request.method, request.url);
            }
        });

        loop {
            match rx.recv_timeout(Self::POLL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) if self.token.is_cancelled() => {
                    return Err(Error::Cancelled)
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    let msg = "HTTP worker exited without a response";
                    return Err(Error::Io(std::io::Error::new(ErrorKind::Other, msg)));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Write;
    use std::net::TcpListener;
    use std::thread::sleep;
    use std::time::Instant;

    #[test]
    fn path() {
        let req = Request::post("https://app.getgram.ai/rpc/deployments.create?x=1");
        assert_eq!(req.path(), "/rpc/deployments.create");

        let req = Request::post("http://localhost:8080");
        assert_eq!(req.path(), "/");

        let req = Request::post("/rpc/assets.list#frag");
        assert_eq!(req.path(), "/rpc/assets.list");
    }

    #[test]
    fn debug_hides_credential() {
        let req = Request::post("https://h/rpc/deployments.create")
            .header("gram-key", "gram_secret_value")
            .header("Gram-Project", "petstore")
            .header("Idempotency-Key", "sha256:00ff");

        let dbg = format!("{:?}", req);
        assert!(!dbg.contains("gram_secret_value"));
        assert!(!dbg.contains("petstore"));
        assert!(dbg.contains("[REDACTED]"));
        assert!(dbg.contains("sha256:00ff"));
    }

    #[test]
    fn response_headers_ignore_case() {
        let rep = Response {
            status: 502,
            headers: vec![("content-type".into(), "text/html".into())],
            body: Box::new(std::io::empty()),
        };

        assert_eq!(rep.content_type(), "text/html");
        assert!(!rep.is_success());
    }

    #[test]
    fn cancel_aborts_waiting_call() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/rpc/deployments.create", listener.local_addr().unwrap());

        // Accept the connection and never answer.
        spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut sink = Vec::new();
            stream.read_to_end(&mut sink).ok();
        });

        let token = CancelToken::default();
        let canceller = token.clone();
        spawn(move || {
            sleep(Duration::from_millis(300));
            canceller.cancel();
        });

        let start = Instant::now();
        let transport = HttpTransport::new(Duration::from_secs(10), token);
        let result = transport.send(Request::post(url).body(b"{}".to_vec()));

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancelled_token_sends_nothing() {
        let token = CancelToken::default();
        token.cancel();

        // Nothing listens here; a connection attempt would fail with `Http`.
        let transport = HttpTransport::new(Duration::from_secs(1), token);
        let result = transport.send(Request::post("http://127.0.0.1:9/rpc/deployments.create"));
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn response_from_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/rpc/deployments.create", listener.local_addr().unwrap());

        spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !seen.ends_with(b"\r\n\r\n{}") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }

            let reply = "HTTP/1.1 502 Bad Gateway\r\nContent-Type: text/html\r\nContent-Length: 6\r\nConnection: close\r\n\r\n<html>";
            stream.write_all(reply.as_bytes()).unwrap();
        });

        let transport = HttpTransport::new(Duration::from_secs(10), CancelToken::default());
        let mut rep = transport
            .send(Request::post(url).body(b"{}".to_vec()))
            .unwrap();

        assert_eq!(rep.status, 502);
        assert_eq!(rep.content_type(), "text/html");

        let mut body = Vec::new();
        rep.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"<html>");
    }
}
