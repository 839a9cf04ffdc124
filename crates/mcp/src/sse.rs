//! Legacy HTTP+SSE: a long-lived event stream plus a POST endpoint.
//!
//! The server announces where to POST with an `endpoint` event, then sends
//! every message as a `message` event on the stream. The SDK no longer
//! ships this transport, so it is exposed here as the sink and stream pair
//! the SDK accepts in place of one.

use std::pin::Pin;
use std::time::Duration;

use futures::{Sink, Stream, StreamExt};
use reqwest::Url;
use reqwest::header::ACCEPT;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event_stream::{EventDecoder, SseEvent};

pub(crate) type Outgoing = Pin<Box<dyn Sink<ClientJsonRpcMessage, Error = Error> + Send>>;
pub(crate) type Incoming = Pin<Box<dyn Stream<Item = ServerJsonRpcMessage> + Send>>;

pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url> {
    Url::parse(endpoint).map_err(|err| Error::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    })
}

/// Open the stream and wait up to `timeout` for the `endpoint` event.
///
/// The returned stream ends when the server closes the event stream.
pub(crate) async fn connect(endpoint: &str, timeout: Duration) -> Result<(Outgoing, Incoming)> {
    let url = parse_endpoint(endpoint)?;
    let http = reqwest::Client::new();
    let response = tokio::time::timeout(
        timeout,
        http.get(url.clone()).header(ACCEPT, "text/event-stream").send(),
    )
    .await
    .map_err(|_| Error::Timeout {
        method: "connect".to_string(),
    })??;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }

    let (announce, announced) = oneshot::channel();
    let (messages, inbox) = mpsc::unbounded_channel();
    let reader = AbortOnDrop(tokio::spawn(read_stream(response, announce, messages)));

    let path = match tokio::time::timeout(timeout, announced).await {
        Ok(Ok(path)) => path,
        Ok(Err(_)) => return Err(Error::Closed),
        Err(_) => {
            return Err(Error::Timeout {
                method: "endpoint".to_string(),
            });
        }
    };
    let post_url = url.join(&path).map_err(|err| Error::InvalidEndpoint {
        endpoint: path.clone(),
        reason: err.to_string(),
    })?;
    debug!(%post_url, "event stream open");

    let poster = Poster {
        http,
        url: post_url,
    };
    let outgoing = futures::sink::unfold(poster, |poster: Poster, message: ClientJsonRpcMessage| async move {
        poster.post(&message).await?;
        Ok::<_, Error>(poster)
    });
    // The reader lives as long as the stream does.
    let incoming = futures::stream::unfold((inbox, reader), |(mut inbox, reader)| async move {
        let message = inbox.recv().await?;
        Some((message, (inbox, reader)))
    });
    Ok((Box::pin(outgoing), Box::pin(incoming)))
}

struct Poster {
    http: reqwest::Client,
    url: Url,
}

impl Poster {
    async fn post(&self, message: &ClientJsonRpcMessage) -> Result<()> {
        let response = self.http.post(self.url.clone()).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn read_stream(
    response: reqwest::Response,
    announce: oneshot::Sender<String>,
    messages: mpsc::UnboundedSender<ServerJsonRpcMessage>,
) {
    let mut announce = Some(announce);
    let mut decoder = EventDecoder::new();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => {
                for event in decoder.push(&chunk) {
                    deliver(event, &mut announce, &messages);
                }
            }
            Err(err) => {
                warn!(error = %err, "event stream failed");
                break;
            }
        }
    }
    if let Some(event) = decoder.finish() {
        deliver(event, &mut announce, &messages);
    }
    debug!("event stream ended");
}

fn deliver(
    event: SseEvent,
    announce: &mut Option<oneshot::Sender<String>>,
    messages: &mpsc::UnboundedSender<ServerJsonRpcMessage>,
) {
    match event.event.as_str() {
        "endpoint" => match announce.take() {
            Some(tx) => {
                let _ = tx.send(event.data.trim().to_string());
            }
            None => debug!(data = %event.data, "ignoring repeated endpoint event"),
        },
        "message" => match serde_json::from_str::<ServerJsonRpcMessage>(&event.data) {
            Ok(message) => {
                let _ = messages.send(message);
            }
            Err(err) => debug!(error = %err, "skipping malformed message event"),
        },
        other => debug!(event = other, "ignoring event"),
    }
}
