// ABOUTME: Streaming relay from a backend chat stream to a downstream sink.
// ABOUTME: Forwards fragments in arrival order, then publishes a generated title once the stream completes.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use xlm_grpc::EcosystemTransport;

use crate::error::{GatewayError, Result};
use crate::events::{RelayEvent, RequestId, TokenEvent};
use crate::session::SessionRequest;
use crate::sink::EventSink;
use crate::title::{Title, TitleGenerator};

/// Lazy, finite and non-restartable sequence of response fragments.
pub type TokenEvents = Pin<Box<dyn Stream<Item = Result<TokenEvent>> + Send>>;

/// What a completed relay run delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub request_id: RequestId,
    pub fragments: usize,
    /// Concatenation of every forwarded fragment.
    pub text: String,
    pub title: Title,
}

pub struct StreamingRelay {
    transport: Arc<dyn EcosystemTransport>,
    titles: TitleGenerator,
    stream_timeout: Duration,
}

impl StreamingRelay {
    pub fn new(
        transport: Arc<dyn EcosystemTransport>,
        titles: TitleGenerator,
        stream_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            titles,
            stream_timeout,
        }
    }

    /// Open one streaming chat call.
    pub async fn stream_chat(&self, request: &SessionRequest) -> Result<TokenEvents> {
        let tokens = self.transport.async_chat(request.as_chat()).await?;
        Ok(Box::pin(tokens.map(|token| {
            token
                .map(|text| TokenEvent { text })
                .map_err(GatewayError::from)
        })))
    }

    /// Relay `request` to `sink` until the stream ends, fails, times out or is cancelled.
    ///
    /// Each fragment is published before the next one is polled. Fragments
    /// already published stay published when the run fails; a title is only
    /// generated after the stream completes. Returning drops the upstream
    /// stream, which cancels the call on the backend.
    pub async fn relay(
        &self,
        request: SessionRequest,
        request_id: RequestId,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome> {
        let deadline = Instant::now() + self.stream_timeout;
        let timed_out = || GatewayError::Timeout {
            operation: "asyncChat",
            after: self.stream_timeout,
        };

        debug!(
            request_id = %request_id,
            provider = %request.provider(),
            model = %request.model(),
            "Opening chat stream"
        );

        let mut tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            _ = sleep_until(deadline) => return Err(timed_out()),
            opened = self.stream_chat(&request) => opened?,
        };

        let mut forwarded: Vec<String> = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(request_id = %request_id, fragments = forwarded.len(), "Relay cancelled");
                    return Err(GatewayError::Cancelled);
                }
                _ = sleep_until(deadline) => {
                    warn!(request_id = %request_id, fragments = forwarded.len(), "Chat stream deadline reached");
                    return Err(timed_out());
                }
                next = tokens.next() => next,
            };

            let token = match next {
                Some(Ok(token)) => token,
                Some(Err(e)) => {
                    error!(
                        request_id = %request_id,
                        fragments = forwarded.len(),
                        error = %e,
                        "Chat stream failed"
                    );
                    return Err(e);
                }
                None => break,
            };

            trace!(request_id = %request_id, token = %token.text, "Relaying token");
            let published = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                published = sink.publish(RelayEvent::token(request_id, &token)) => published,
            };
            if let Err(e) = published {
                warn!(request_id = %request_id, fragments = forwarded.len(), "Sink closed, abandoning chat stream");
                return Err(e);
            }
            forwarded.push(token.text);
        }
        drop(tokens);

        let text = forwarded.concat();
        let title = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            title = self.titles.generate(&request, text.trim()) => title,
        };
        sink.publish(RelayEvent::title(request_id, title.as_str()))
            .await?;

        info!(
            request_id = %request_id,
            fragments = forwarded.len(),
            title = %title,
            placeholder = title.is_placeholder(),
            "Chat relayed"
        );

        Ok(RelayOutcome {
            request_id,
            fragments: forwarded.len(),
            text,
            title,
        })
    }
}
