// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use super::transport::{redact, Request, Response, Transport};
use crate::error::{Error, Result};

use std::io::{Cursor, Read};
use std::sync::Arc;

use log::debug;

/// One captured request/response pair
///
/// Sensitive header values are already redacted. The bodies share their
/// buffers with the request and response that were actually exchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub request_body: Arc<[u8]>,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub response_body: Arc<[u8]>,
}

/// Receives captured exchanges
pub trait Recorder {
    fn record(&self, exchange: &Exchange);
}

impl<F: Fn(&Exchange)> Recorder for F {
    fn record(&self, exchange: &Exchange) {
        self(exchange)
    }
}

/// Writes exchanges to the `gram::diagnostic` log target at debug level
#[derive(Copy, Clone, Debug, Default)]
pub struct LogRecorder;

impl Recorder for LogRecorder {
    fn record(&self, x: &Exchange) {
        const TARGET: &str = "gram::diagnostic";

        debug!(target: TARGET, "request: {} {}", x.method, x.url);
        for (name, value) in &x.headers {
            debug!(target: TARGET, "  {}: {}", name, value);
        }
        if !x.request_body.is_empty() {
            debug!(target: TARGET, "request body:\n{}", String::from_utf8_lossy(&x.request_body));
        }

        match x.status {
            Some(status) => {
                let ctype = x.content_type.as_deref().unwrap_or("");
                debug!(target: TARGET, "response: HTTP {}, Content-Type: {}", status, ctype);
                debug!(target: TARGET, "response body:\n{}", String::from_utf8_lossy(&x.response_body));
            }
            None => debug!(target: TARGET, "no response"),
        }
    }
}

/// A transport that captures deployment traffic for troubleshooting
///
/// Requests whose path mentions `deployments` are recorded together with
/// their response. The response body is read into memory once; the recorder
/// and the caller each get their own view of the same bytes, so whatever
/// decodes the response sees exactly what the server sent. The request is
/// only ever inspected by reference and reaches the inner transport as is.
pub struct DiagnosticTransport<T: Transport, R: Recorder = LogRecorder> {
    inner: T,
    recorder: R,
}

impl<T: Transport> DiagnosticTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            recorder: LogRecorder,
        }
    }
}

impl<T: Transport, R: Recorder> DiagnosticTransport<T, R> {
    const WATCH: &'static str = "deployments";

    #[cfg(test)]
    pub fn with_recorder<Q: Recorder>(self, recorder: Q) -> DiagnosticTransport<T, Q> {
        DiagnosticTransport {
            inner: self.inner,
            recorder,
        }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport, R: Recorder> Transport for DiagnosticTransport<T, R> {
    fn send(&self, request: Request) -> Result<Response> {
        let method = request.method.clone();
        let url = request.url.clone();
        let context = |e: Error| Error::Transport {
            method: method.clone(),
            url: url.clone(),
            source: Box::new(e),
        };

        if !request.path().contains(Self::WATCH) {
            return self.inner.send(request).map_err(context);
        }

        let mut exchange = Exchange {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), redact(k, v).to_owned()))
                .collect(),
            request_body: Arc::from(request.body.as_slice()),
            status: None,
            content_type: None,
            response_body: Arc::from(&[][..]),
        };

        let mut response = match self.inner.send(request) {
            Ok(response) => response,
            Err(e) => {
                self.recorder.record(&exchange);
                return Err(context(e));
            }
        };

        exchange.status = Some(response.status);
        exchange.content_type = response.header("Content-Type").map(str::to_owned);

        let mut body = Vec::new();
        if let Err(e) = response.body.read_to_end(&mut body) {
            self.recorder.record(&exchange);
            return Err(context(e.into()));
        }

        let body: Arc<[u8]> = body.into();
        exchange.response_body = body.clone();
        response.body = Box::new(Cursor::new(body));

        self.recorder.record(&exchange);
        Ok(response)
    }
}
