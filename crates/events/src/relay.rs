//! Forwards a job channel to one consumer until the terminal payload.

use std::future::Future;

use futures::{Sink, SinkExt};
use quboflow_core::messages::is_terminal_payload;

use crate::bus::{RecvError, Subscription};

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The terminal payload was delivered and the consumer closed.
    Completed,
    /// The consumer went away first.
    ConsumerGone,
    /// The bus shut down before a terminal payload arrived.
    ChannelClosed,
}

/// Forward every payload from `subscription` to `sink`, verbatim and in
/// order, until a terminal payload has been delivered.
///
/// `disconnected` resolves when the consumer goes away without a failed
/// send being observable (for example a WebSocket close frame). The
/// subscription is dropped, and so unsubscribed, on every exit path. Never
/// returns an error: consumer failures end the relay quietly.
pub async fn relay<S, D>(mut subscription: Subscription, mut sink: S, disconnected: D) -> RelayOutcome
where
    S: Sink<String> + Unpin,
    D: Future<Output = ()>,
{
    tokio::pin!(disconnected);

    loop {
        let payload = tokio::select! {
            biased;
            _ = &mut disconnected => return RelayOutcome::ConsumerGone,
            received = subscription.recv() => received,
        };

        let payload = match payload {
            Ok(payload) => payload,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    channel = subscription.channel(),
                    skipped,
                    "Relay subscriber lagged; payloads dropped",
                );
                continue;
            }
            Err(RecvError::Closed) => {
                let _ = sink.close().await;
                return RelayOutcome::ChannelClosed;
            }
        };

        let terminal = is_terminal_payload(&payload);
        if sink.send(payload).await.is_err() {
            tracing::debug!(channel = subscription.channel(), "Relay consumer gone");
            return RelayOutcome::ConsumerGone;
        }
        if terminal {
            let _ = sink.close().await;
            tracing::debug!(channel = subscription.channel(), "Relay completed");
            return RelayOutcome::Completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc;
    use futures::StreamExt;

    use super::*;
    use crate::bus::JobBus;

    #[tokio::test]
    async fn forwards_progress_then_final_then_closes() {
        let bus = JobBus::default();
        let sub = bus.subscribe("job-1");
        let (tx, rx) = mpsc::unbounded();

        let handle = tokio::spawn(relay(sub, tx, std::future::pending()));

        let payloads = [
            r#"{"iteration":0,"cost":1.0}"#,
            r#"{"iteration":1,"cost":0.5}"#,
            r#"{"final":true,"description":"d","result":{}}"#,
        ];
        for p in payloads {
            bus.publish("job-1", p);
        }

        assert_eq!(handle.await.unwrap(), RelayOutcome::Completed);
        let received: Vec<String> = rx.collect().await;
        assert_eq!(received, payloads);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn error_payload_is_terminal() {
        let bus = JobBus::default();
        let sub = bus.subscribe("job-1");
        let (tx, rx) = mpsc::unbounded();
        let handle = tokio::spawn(relay(sub, tx, std::future::pending()));

        bus.publish("job-1", r#"{"error":"ExecutionError: x"}"#);
        bus.publish("job-1", r#"{"iteration":9,"cost":0.0}"#);

        assert_eq!(handle.await.unwrap(), RelayOutcome::Completed);
        let received: Vec<String> = rx.collect().await;
        assert_eq!(received, vec![r#"{"error":"ExecutionError: x"}"#]);
    }

    #[tokio::test]
    async fn consumer_disconnect_ends_relay_and_unsubscribes() {
        let bus = JobBus::default();
        let sub = bus.subscribe("job-1");
        let (tx, rx) = mpsc::unbounded::<String>();
        drop(rx);

        let handle = tokio::spawn(relay(sub, tx, std::future::pending()));
        bus.publish("job-1", r#"{"iteration":0,"cost":1.0}"#);

        assert_eq!(handle.await.unwrap(), RelayOutcome::ConsumerGone);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_signal_ends_idle_relay() {
        let bus = JobBus::default();
        let sub = bus.subscribe("job-1");
        let (tx, _rx) = mpsc::unbounded::<String>();

        let outcome = relay(sub, tx, tokio::time::sleep(Duration::from_millis(20))).await;
        assert_eq!(outcome, RelayOutcome::ConsumerGone);
        assert_eq!(bus.channel_count(), 0);
    }
}
