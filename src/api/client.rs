use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{EventStream, JobApi, WatchEvent};
use crate::auth::Token;
use crate::error::{RehearseError, Result};
use crate::jobs::{ObjectMeta, ProwJob};

/// Job-execution API client speaking the Kubernetes REST dialect for `ProwJob`
/// resources.
pub struct HttpJobApi {
    client: Client,
    api_url: Url,
    token: Option<Token>,
}

impl HttpJobApi {
    /// Creates a client for the cluster API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or `base_url` is not a valid URL.
    pub fn new(base_url: &str, token: Option<Token>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("rehearse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RehearseError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut api_url = Url::parse(base_url)
            .map_err(|e| RehearseError::Config(format!("Invalid base URL: {e}")))?;
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    fn prowjobs_url(&self, namespace: &str) -> Result<Url> {
        self.api_url
            .join(&format!("apis/prow.k8s.io/v1/namespaces/{namespace}/prowjobs"))
            .map_err(|e| RehearseError::Config(format!("Invalid job API URL: {e}")))
    }
}

async fn api_error(response: reqwest::Response) -> RehearseError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());
    RehearseError::Api { status, message }
}

#[derive(Deserialize)]
struct Created {
    metadata: ObjectMeta,
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn create(&self, job: &ProwJob) -> Result<String> {
        let url = self.prowjobs_url(&job.metadata.namespace)?;
        let response = self
            .auth_request(self.client.post(url).json(job))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let created: Created = response.json().await?;
        if created.metadata.name.is_empty() {
            return Err(RehearseError::Api {
                status: status.as_u16(),
                message: format!("created job {} has no name", job.spec.job),
            });
        }

        Ok(created.metadata.name)
    }

    async fn watch(&self, namespace: &str, label_selector: Option<&str>) -> Result<EventStream> {
        let url = self.prowjobs_url(namespace)?;
        let mut request = self.client.get(url).query(&[("watch", "true")]);
        if let Some(selector) = label_selector {
            request = request.query(&[("labelSelector", selector)]);
        }

        let response = self.auth_request(request).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        debug!("Established job watch in namespace {namespace}");
        Ok(decode_watch_frames(response.bytes_stream().boxed()).boxed())
    }
}

#[derive(Deserialize)]
struct WatchFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: Value,
}

enum Frame {
    Event(WatchEvent),
    Skip,
    Close,
}

fn decode_frame(line: &[u8]) -> Frame {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Frame::Skip;
    }

    let frame: WatchFrame = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(e) => {
            return Frame::Event(WatchEvent::Unexpected(format!(
                "undecodable watch frame ({e})"
            )))
        }
    };

    match frame.kind.as_str() {
        // Usually an expired resource version; a fresh watch recovers from it.
        "ERROR" => {
            debug!("Job watch ended by the server: {}", frame.object);
            Frame::Close
        }
        "BOOKMARK" => Frame::Skip,
        _ => Frame::Event(WatchEvent::decode(frame.object)),
    }
}

struct FrameReader<S> {
    chunks: S,
    buffer: Vec<u8>,
    finished: bool,
}

/// Splits a chunked body of newline-delimited watch frames into events.
///
/// Transport errors and server-side `ERROR` frames end the stream.
fn decode_watch_frames<S, B, E>(chunks: S) -> impl Stream<Item = WatchEvent> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let reader = FrameReader {
        chunks,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(end) = reader.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=end).collect();
                match decode_frame(&line) {
                    Frame::Event(event) => return Some((event, reader)),
                    Frame::Skip => continue,
                    Frame::Close => return None,
                }
            }

            if reader.finished {
                // A truncated trailing frame is a closed connection, not a protocol error
                let line = std::mem::take(&mut reader.buffer);
                return match decode_frame(&line) {
                    Frame::Event(event @ WatchEvent::Job(_)) => Some((event, reader)),
                    _ => None,
                };
            }

            match reader.chunks.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    debug!("Job watch interrupted: {e}");
                    return None;
                }
                None => reader.finished = true,
            }
        }
    })
}
