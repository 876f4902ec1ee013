//! Pluggable push notification sink. A production deployment swaps in a
//! real APNs/FCM sink behind the same trait; retry/backoff for vendor
//! outages is that sink's responsibility, not the worker's.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct PushNotification<'a> {
    pub device_token: &'a str,
    pub platform: &'a str,
    pub body: &'a str,
}

#[async_trait]
pub trait PushSink: Send + Sync {
    async fn send(&self, notification: PushNotification<'_>);
}

/// Fire-and-forget stub sink: logs what would have been sent. No retry, no
/// vendor wire format.
pub struct LoggingPushSink;

#[async_trait]
impl PushSink for LoggingPushSink {
    async fn send(&self, notification: PushNotification<'_>) {
        tracing::info!(
            platform = notification.platform,
            token = notification.device_token,
            "push notification dispatched"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_sink_does_not_panic() {
        let sink = LoggingPushSink;
        sink.send(PushNotification {
            device_token: "tok-1",
            platform: "ios",
            body: "hi",
        })
        .await;
    }
}
