// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use super::diagnostic::DiagnosticTransport;
use super::transport::{HttpTransport, Request, Response, Transport, CREDENTIAL_HEADER, PROJECT_HEADER};
use crate::config::{Config, Secret};
use crate::error::{Error, Result};
use crate::iotools::CancelToken;
use crate::manifest::{Manifest, SourceType};
use crate::source::resolve;

use std::fmt::Display;
use std::io::Read;
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};

/// A token the server uses to recognise retries of the same deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::EmptyIdempotencyKey);
        }

        Ok(Self(key))
    }

    /// Derives a key from everything that makes a deployment what it is
    ///
    /// Every field is length-prefixed so that moving bytes between
    /// neighbouring fields changes the digest.
    pub fn derive(project: &Secret, assets: &[Asset]) -> Self {
        fn field(ctx: &mut Context, bytes: &[u8]) {
            ctx.update(&(bytes.len() as u64).to_be_bytes());
            ctx.update(bytes);
        }

        let mut ctx = Context::new(&SHA256);
        field(&mut ctx, project.expose().as_bytes());
        for asset in assets {
            field(&mut ctx, asset.name.as_bytes());
            field(&mut ctx, asset.kind.as_str().as_bytes());
            field(&mut ctx, asset.content_type.as_bytes());
            field(&mut ctx, asset.content.as_bytes());
        }

        let hex: String = ctx
            .finish()
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        Self(format!("sha256:{}", hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdempotencyKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One source, fully read and ready to be sent
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: SourceType,

    pub content_type: String,

    pub content: String,
}

/// Everything needed for one create-deployment call
#[derive(Clone, Debug)]
pub struct Submission {
    pub credential: Secret,
    pub project: Secret,
    pub idempotency_key: IdempotencyKey,
    pub assets: Vec<Asset>,
}

impl Submission {
    fn into_request(self, url: String) -> Result<Request> {
        #[derive(Serialize)]
        struct Body<'a> {
            idempotency_key: &'a str,
            openapiv3_assets: &'a [Asset],
        }

        let body = serde_json::to_vec(&Body {
            idempotency_key: self.idempotency_key.as_str(),
            openapiv3_assets: &self.assets,
        })
        .map_err(Error::Encode)?;

        Ok(Request::post(url)
            .header(CREDENTIAL_HEADER, self.credential.expose())
            .header(PROJECT_HEADER, self.project.expose())
            .header("Idempotency-Key", self.idempotency_key.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(body))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AssetSummary {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

/// What the server says it created
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeploymentResult {
    pub id: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub idempotency_key: Option<String>,

    #[serde(default)]
    pub openapiv3_assets: Vec<AssetSummary>,
}

// Accept the deployment either bare or wrapped in a `deployment` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { deployment: DeploymentResult },
    Bare(DeploymentResult),
}

impl From<Envelope> for DeploymentResult {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Wrapped { deployment } => deployment,
            Envelope::Bare(deployment) => deployment,
        }
    }
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    name: Option<String>,
    message: String,
}

fn decode(mut response: Response) -> Result<DeploymentResult> {
    let status = response.status;
    let content_type = response.content_type().to_owned();

    let mut body = Vec::new();
    response.body.read_to_end(&mut body)?;

    let fail = |source| Error::Decode {
        status,
        content_type: content_type.clone(),
        source,
    };

    if response.is_success() {
        return serde_json::from_slice::<Envelope>(&body)
            .map(Into::into)
            .map_err(fail);
    }

    let remote: RemoteError = serde_json::from_slice(&body).map_err(fail)?;
    Err(Error::Remote {
        status,
        name: remote.name,
        message: remote.message,
    })
}

/// Explains decode failures caused by the server answering with a web page
fn enhance(err: Error) -> Error {
    let html = matches!(
        &err,
        Error::Decode { content_type, .. } if content_type.to_ascii_lowercase().contains("text/html")
    );

    if html {
        Error::HtmlResponse {
            source: Box::new(err),
        }
    } else {
        err
    }
}

/// Creates deployments from manifests
pub struct Deployments<T: Transport> {
    transport: T,
    url: String,
    token: CancelToken,
    progress: bool,
}

impl Deployments<DiagnosticTransport<HttpTransport>> {
    /// A client talking HTTP to the configured host, with diagnostics
    pub fn connect(config: &Config, token: CancelToken) -> Self {
        let http = HttpTransport::new(config.timeout, token.clone());
        Self::new(config, DiagnosticTransport::new(http), token)
    }
}

impl<T: Transport> Deployments<T> {
    pub const PATH: &'static str = "/rpc/deployments.create";

    pub fn new(config: &Config, transport: T, token: CancelToken) -> Self {
        Self {
            transport,
            url: config.url(Self::PATH),
            token,
            progress: false,
        }
    }

    /// Show a progress bar while reading sources
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolves and reads every source, in manifest order
    ///
    /// The first source that fails aborts the whole thing.
    pub fn collect(&self, manifest: &Manifest) -> Result<Vec<Asset>> {
        let progress = if self.progress {
            let tmpl = "{prefix} {elapsed:>4} {wide_bar} {bytes:>12} {bytes_per_sec:>12} {eta:>4}";
            let pb = ProgressBar::new(0);
            pb.set_prefix("sources");
            pb.set_style(ProgressStyle::default_bar().template(tmpl));
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut assets = Vec::with_capacity(manifest.sources().len());
        for (index, source) in manifest.sources().iter().enumerate() {
            let fail = |e| Error::SourceResolutionFailed {
                index,
                location: source.location.clone(),
                source: Box::new(e),
            };

            let resolved = resolve(source, manifest.base_dir()).map_err(fail)?;
            progress.inc_length(resolved.size);

            let mut content = Vec::with_capacity(resolved.size as usize);
            progress
                .wrap_read(resolved.content)
                .read_to_end(&mut content)
                .map_err(|e| fail(e.into()))?;

            let content = String::from_utf8(content).map_err(|_| {
                fail(Error::InvalidContent {
                    location: source.location.clone(),
                })
            })?;

            assets.push(Asset {
                name: resolved.name,
                kind: resolved.source_type,
                content_type: resolved.content_type,
                content,
            });
        }

        progress.finish_and_clear();
        Ok(assets)
    }

    /// Builds the submission without sending it
    pub fn prepare(
        &self,
        manifest: &Manifest,
        credential: &Secret,
        project: &Secret,
        key: Option<IdempotencyKey>,
    ) -> Result<Submission> {
        let assets = self.collect(manifest)?;
        let idempotency_key = key.unwrap_or_else(|| IdempotencyKey::derive(project, &assets));

        Ok(Submission {
            credential: credential.clone(),
            project: project.clone(),
            idempotency_key,
            assets,
        })
    }

    /// Sends one submission; never retries
    pub fn submit(&self, submission: Submission) -> Result<DeploymentResult> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(
            "creating deployment with {} assets (idempotency key {})",
            submission.assets.len(),
            submission.idempotency_key
        );

        let request = submission.into_request(self.url.clone())?;
        self.transport
            .send(request)
            .and_then(decode)
            .map_err(|e| self.interrupted(e))
            .map_err(enhance)
    }

    pub fn create(
        &self,
        manifest: &Manifest,
        credential: &Secret,
        project: &Secret,
        key: Option<IdempotencyKey>,
    ) -> Result<DeploymentResult> {
        let submission = self.prepare(manifest, credential, project, key)?;
        self.submit(submission)
    }

    // A failure after cancellation is the cancellation, whatever it looks like.
    fn interrupted(&self, err: Error) -> Error {
        if self.token.is_cancelled() {
            Error::Cancelled
        } else {
            err
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    use tempfile::{tempdir, TempDir};

    const SPEC: &str = "openapi: 3.0.0\ninfo:\n  title: Petstore\n  version: 1.0.0\npaths: {}\n";

    /// A server that remembers idempotency keys
    #[derive(Default)]
    struct Remote {
        keys: Mutex<HashMap<String, String>>,
        requests: Mutex<Vec<Request>>,
    }

    impl Transport for Remote {
        fn send(&self, request: Request) -> Result<Response> {
            let key = request
                .headers
                .iter()
                .find(|(k, _)| k == "Idempotency-Key")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();

            let mut keys = self.keys.lock().unwrap();
            let next = format!("dep_{}", keys.len() + 1);
            let id = keys.entry(key).or_insert(next).clone();
            self.requests.lock().unwrap().push(request);

            let body = format!(r#"{{"id":"{}"}}"#, id).into_bytes();
            Ok(Response {
                status: 200,
                headers: vec![("Content-Type".into(), "application/json".into())],
                body: Box::new(std::io::Cursor::new(body)),
            })
        }
    }

    /// A server that always answers the same way
    struct Fixed(u16, &'static str, &'static [u8]);

    impl Transport for Fixed {
        fn send(&self, _: Request) -> Result<Response> {
            Ok(Response {
                status: self.0,
                headers: vec![("Content-Type".into(), self.1.into())],
                body: Box::new(self.2),
            })
        }
    }

    /// A server that must never be reached
    struct Unreachable;

    impl Transport for Unreachable {
        fn send(&self, request: Request) -> Result<Response> {
            panic!("unexpected request: {:?}", request)
        }
    }

    fn config() -> Config {
        Config {
            scheme: "https".into(),
            host: "app.getgram.ai".into(),
            timeout: Duration::from_secs(30),
        }
    }

    fn deployments<T: Transport>(transport: T) -> Deployments<T> {
        Deployments::new(&config(), transport, CancelToken::default())
    }

    fn project(dir: &TempDir, sources: &[(&str, &str)]) -> PathBuf {
        let mut entries = Vec::new();
        for (name, body) in sources {
            std::fs::write(dir.path().join(name), body).unwrap();
            entries.push(format!(
                r#"{{"type":"openapiv3","location":"./{}"}}"#,
                name
            ));
        }

        let path = dir.path().join("gram.json");
        let manifest = format!(
            r#"{{"schema_version":"1.0.0","sources":[{}]}}"#,
            entries.join(",")
        );
        std::fs::write(&path, manifest).unwrap();
        path
    }

    fn manifest_with(dir: &TempDir, locations: &[&str]) -> Manifest {
        let entries: Vec<_> = locations
            .iter()
            .map(|l| format!(r#"{{"type":"openapiv3","location":"{}"}}"#, l))
            .collect();
        let path = dir.path().join("gram.json");
        std::fs::write(
            &path,
            format!(r#"{{"schema_version":"1.0.0","sources":[{}]}}"#, entries.join(",")),
        )
        .unwrap();
        Manifest::load(path).unwrap()
    }

    fn key() -> Secret {
        Secret::new("gram_test_key")
    }

    fn slug() -> Secret {
        Secret::new("petstore")
    }

    #[test]
    fn end_to_end() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let client = deployments(Remote::default());

        let submission = client.prepare(&manifest, &key(), &slug(), None).unwrap();
        assert_eq!(submission.assets.len(), 1);
        assert_eq!(submission.assets[0].name, "a");
        assert_eq!(submission.assets[0].content_type, "application/yaml");
        assert_eq!(submission.assets[0].content, SPEC);

        let result = client.submit(submission).unwrap();
        assert_eq!(result.id, "dep_1");
        assert!(result.openapiv3_assets.is_empty());

        let requests = client.transport().requests.lock().unwrap();
        assert_eq!(requests.len(), 1);

        let req = &requests[0];
        assert_eq!(req.url, "https://app.getgram.ai/rpc/deployments.create");
        assert!(req.headers.contains(&("Gram-Key".into(), "gram_test_key".into())));
        assert!(req.headers.contains(&("Gram-Project".into(), "petstore".into())));

        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["openapiv3_assets"][0]["type"], "openapiv3");
        assert_eq!(body["openapiv3_assets"][0]["content_type"], "application/yaml");
        assert_eq!(body["openapiv3_assets"][0]["content"], SPEC);
    }

    #[test]
    fn same_key_same_deployment() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let client = deployments(Remote::default());
        let retry = IdempotencyKey::new("release-42").unwrap();

        let first = client
            .create(&manifest, &key(), &slug(), Some(retry.clone()))
            .unwrap();
        let second = client
            .create(&manifest, &key(), &slug(), Some(retry))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(client.transport().keys.lock().unwrap().len(), 1);

        let other = client
            .create(&manifest, &key(), &slug(), Some(IdempotencyKey::new("release-43").unwrap()))
            .unwrap();
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn derived_key_is_stable() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC), ("b.json", "{}")])).unwrap();
        let client = deployments(Remote::default());

        let first = client.create(&manifest, &key(), &slug(), None).unwrap();
        let second = client.create(&manifest, &key(), &slug(), None).unwrap();
        assert_eq!(first.id, second.id);

        let keys = client.transport().keys.lock().unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.keys().all(|k| k.starts_with("sha256:") && k.len() == 7 + 64));
    }

    #[test]
    fn derived_key_tracks_content() {
        let asset = |content: &str| Asset {
            name: "a".into(),
            kind: SourceType::OpenApiV3,
            content_type: "application/yaml".into(),
            content: content.into(),
        };

        let one = IdempotencyKey::derive(&slug(), &[asset("x: 1")]);
        let two = IdempotencyKey::derive(&slug(), &[asset("x: 2")]);
        let elsewhere = IdempotencyKey::derive(&Secret::new("other"), &[asset("x: 1")]);

        assert_eq!(one, IdempotencyKey::derive(&slug(), &[asset("x: 1")]));
        assert_ne!(one, two);
        assert_ne!(one, elsewhere);
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(
            IdempotencyKey::new(""),
            Err(Error::EmptyIdempotencyKey)
        ));
        assert!("  ".parse::<IdempotencyKey>().is_err());
        assert_eq!("k1".parse::<IdempotencyKey>().unwrap().as_str(), "k1");
    }

    #[test]
    fn sources_keep_manifest_order() {
        let dir = tempdir().unwrap();
        let path = project(
            &dir,
            &[("z.yaml", "z: 1\n"), ("a.json", "{}"), ("m.yml", "m: 1\n")],
        );
        let manifest = Manifest::load(path).unwrap();

        let assets = deployments(Unreachable).collect(&manifest).unwrap();
        let names: Vec<_> = assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["z", "a", "m"]);
        assert_eq!(assets[1].content_type, "application/json");
    }

    #[test]
    fn first_failure_aborts() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ok.yaml"), SPEC).unwrap();
        let manifest = manifest_with(
            &dir,
            &["./ok.yaml", "https://example.com/remote.yaml", "./missing.yaml"],
        );

        match deployments(Unreachable).create(&manifest, &key(), &slug(), None) {
            Err(Error::SourceResolutionFailed {
                index,
                location,
                source,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(location, "https://example.com/remote.yaml");
                assert!(matches!(*source, Error::NotImplemented { .. }));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn missing_local_source() {
        let dir = tempdir().unwrap();
        let manifest = manifest_with(&dir, &["./missing.yaml"]);

        match deployments(Unreachable).collect(&manifest) {
            Err(Error::SourceResolutionFailed { index, source, .. }) => {
                assert_eq!(index, 0);
                assert!(matches!(*source, Error::InvalidPath { .. }));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn binary_source_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blob.yaml"), [0xff, 0xfe, 0x00]).unwrap();
        let manifest = manifest_with(&dir, &["blob.yaml"]);

        match deployments(Unreachable).collect(&manifest) {
            Err(Error::SourceResolutionFailed { source, .. }) => {
                assert!(matches!(*source, Error::InvalidContent { .. }));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn html_page_explained() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let page = b"<html><body>Internal Server Error</body></html>";
        let client = deployments(Fixed(500, "text/html; charset=utf-8", page));

        match client.create(&manifest, &key(), &slug(), None) {
            Err(Error::HtmlResponse { source }) => match *source {
                Error::Decode {
                    status,
                    ref content_type,
                    ..
                } => {
                    assert_eq!(status, 500);
                    assert_eq!(content_type, "text/html; charset=utf-8");
                }
                ref other => panic!("unexpected source: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn other_decode_errors_unchanged() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let client = deployments(Fixed(200, "application/json", b"{\"oops\":true}"));

        assert!(matches!(
            client.create(&manifest, &key(), &slug(), None),
            Err(Error::Decode { status: 200, .. })
        ));
    }

    #[test]
    fn remote_error_surfaced() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let body = br#"{"name":"unauthorized","message":"invalid api key"}"#;
        let client = deployments(Fixed(401, "application/json", body));

        match client.create(&manifest, &key(), &slug(), None) {
            Err(Error::Remote {
                status,
                name,
                message,
            }) => {
                assert_eq!(status, 401);
                assert_eq!(name.as_deref(), Some("unauthorized"));
                assert_eq!(message, "invalid api key");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn wrapped_result_with_metadata() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let body = br#"{"deployment":{"id":"dep_9","status":"created","openapiv3_assets":[{"id":"asset_1","name":"a"}]}}"#;
        let client = deployments(Fixed(200, "application/json", body));

        let result = client.create(&manifest, &key(), &slug(), None).unwrap();
        assert_eq!(result.id, "dep_9");
        assert_eq!(result.status.as_deref(), Some("created"));
        assert_eq!(
            result.openapiv3_assets,
            [AssetSummary {
                id: Some("asset_1".into()),
                name: Some("a".into()),
            }]
        );
    }

    #[test]
    fn cancelled_before_call() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let token = CancelToken::default();
        let client = Deployments::new(&config(), Unreachable, token.clone());

        token.cancel();
        assert!(matches!(
            client.create(&manifest, &key(), &slug(), None),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn cancelled_during_call() {
        /// Cancels while "on the wire" and returns an HTML page
        struct Interrupting(CancelToken);

        impl Transport for Interrupting {
            fn send(&self, _: Request) -> Result<Response> {
                self.0.cancel();
                Ok(Response {
                    status: 502,
                    headers: vec![("Content-Type".into(), "text/html".into())],
                    body: Box::new(&b"<html></html>"[..]),
                })
            }
        }

        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let token = CancelToken::default();
        let client = Deployments::new(&config(), Interrupting(token.clone()), token);

        assert!(matches!(
            client.create(&manifest, &key(), &slug(), None),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn through_diagnostic_transport() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(project(&dir, &[("a.yaml", SPEC)])).unwrap();
        let client = deployments(DiagnosticTransport::new(Remote::default()));

        let result = client.create(&manifest, &key(), &slug(), None).unwrap();
        assert_eq!(result.id, "dep_1");
        assert_eq!(client.transport().inner().requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn relative_to_manifest() {
        let dir = tempdir().unwrap();
        let path = project(&dir, &[("a.yaml", SPEC)]);
        let manifest = Manifest::load(&path).unwrap();

        assert_eq!(manifest.base_dir(), path.parent().unwrap());
        assert!(Path::new(&manifest.sources()[0].location).is_relative());
        assert_eq!(deployments(Unreachable).collect(&manifest).unwrap().len(), 1);
    }
}
