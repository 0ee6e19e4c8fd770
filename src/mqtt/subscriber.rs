use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{payload_to_message, MessageBuffer};
use crate::app::produce_use_case::DeepintProducer;
use crate::config::MqttConfig;
use crate::constants::MESSAGE_CHANNEL_CAPACITY;
use crate::error::{ConnectorError, Result};
use crate::types::RawMessage;

/// Subscribe to the configured topic and hand buffered payloads to `producer`
/// until `shutdown` is cancelled.
///
/// Payloads go through a channel to a forwarder task, so the MQTT event loop
/// keeps answering keep-alives while a produce call is in flight. Connection
/// errors are retried after `reconnect_delay`; the subscriber gives up after
/// `max_reconnect_attempts` consecutive failures (0 = never). Pending messages
/// are flushed before returning.
#[instrument(
    name = "mqtt_subscriber",
    skip_all,
    fields(host = %config.host, topic = %config.topic)
)]
pub async fn run_subscriber(
    config: MqttConfig,
    producer: Arc<DeepintProducer>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
    let forwarder = tokio::spawn(forward_messages(
        rx,
        producer,
        config.max_batch_size,
        config.flush_interval(),
    ));

    let outcome = receive_messages(&config, tx, &shutdown).await;

    if let Err(e) = forwarder.await {
        error!(error = %e, "message forwarder task failed");
    }
    info!("MQTT subscriber stopped");
    outcome
}

async fn receive_messages(
    config: &MqttConfig,
    tx: mpsc::Sender<RawMessage>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut failures = 0u32;

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        match run_connection(config, &tx, shutdown, &mut failures).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                failures += 1;
                error!(error = %e, attempt = failures, "MQTT connection error");

                if config.max_reconnect_attempts > 0 && failures >= config.max_reconnect_attempts {
                    error!(
                        max_attempts = config.max_reconnect_attempts,
                        "max reconnect attempts reached, stopping MQTT subscriber"
                    );
                    return Err(e);
                }

                warn!(delay_ms = config.reconnect_delay_ms, "reconnecting to MQTT broker");
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(config.reconnect_delay()) => {}
                }
            }
        }
    }
}

async fn run_connection(
    config: &MqttConfig,
    tx: &mpsc::Sender<RawMessage>,
    shutdown: &CancellationToken,
    failures: &mut u32,
) -> Result<()> {
    let mut options = MqttOptions::new(config.client_id(), config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);
    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    client.subscribe(config.topic.clone(), config.qos()?).await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown signal received");
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(
                            topic = %publish.topic,
                            bytes = publish.payload.len(),
                            "message received"
                        );
                        if tx.send(payload_to_message(&publish.payload)).await.is_err() {
                            warn!("message forwarder stopped, closing MQTT connection");
                            let _ = client.disconnect().await;
                            return Ok(());
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        *failures = 0;
                        info!("connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!(topic = %config.topic, "subscribed to MQTT topic");
                    }
                    Ok(_) => {}
                    Err(e) => return Err(ConnectorError::Connection(e)),
                }
            }
        }
    }
}

/// Batch messages from `rx` into produce calls.
///
/// A batch is produced once `max_batch_size` messages are buffered or when
/// `flush_interval` ticks with a partial buffer. Whatever is pending when the
/// channel closes is produced before returning.
pub async fn forward_messages(
    mut rx: mpsc::Receiver<RawMessage>,
    producer: Arc<DeepintProducer>,
    max_batch_size: usize,
    flush_interval: Duration,
) {
    let mut buffer = MessageBuffer::new(max_batch_size);
    let mut ticker = tokio::time::interval(flush_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    if buffer.push(message) {
                        flush(&producer, &mut buffer).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                flush(&producer, &mut buffer).await;
            }
        }
    }

    flush(&producer, &mut buffer).await;
}

async fn flush(producer: &DeepintProducer, buffer: &mut MessageBuffer) {
    if buffer.is_empty() {
        return;
    }
    let messages = buffer.drain();
    let report = producer.produce(&messages).await;
    debug!(
        received = report.received,
        decoded = report.decoded,
        published = report.published(),
        "produce call finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::{Mutex, Semaphore};

    use crate::app::ports::{FailureLogPort, SourceUpdatePort};
    use crate::app::produce_use_case::ProduceOptions;
    use crate::batch::Batch;
    use crate::error::PublishError;
    use crate::types::{CauseTag, RouteIdentity, TaskStatus, UpdateMode, UpdateTask};

    #[derive(Default)]
    struct RecordingSource {
        batches: Mutex<Vec<Batch>>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl SourceUpdatePort for RecordingSource {
        async fn update_instances(
            &self,
            _route: &RouteIdentity,
            batch: &Batch,
            _mode: UpdateMode,
        ) -> std::result::Result<UpdateTask, PublishError> {
            self.batches.lock().await.push(batch.clone());
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            Ok(UpdateTask {
                task_id: "task".to_string(),
            })
        }

        async fn resolve_task(
            &self,
            _route: &RouteIdentity,
            _task: &UpdateTask,
        ) -> std::result::Result<TaskStatus, PublishError> {
            Ok(TaskStatus::Success)
        }
    }

    struct NoopFailureLog;

    #[async_trait]
    impl FailureLogPort for NoopFailureLog {
        async fn record(&self, _cause: CauseTag, _payload: &str, _route: &RouteIdentity) {}
    }

    fn producer(source: Arc<RecordingSource>) -> Arc<DeepintProducer> {
        Arc::new(DeepintProducer::new(
            RouteIdentity::new("org", "ws", "src"),
            None,
            source,
            Arc::new(NoopFailureLog),
            ProduceOptions::default(),
        ))
    }

    fn reading(co2: u32) -> RawMessage {
        format!(r#"{{"co2": {}}}"#, co2)
    }

    async fn wait_for_batches(source: &RecordingSource, count: usize) -> Vec<Batch> {
        for _ in 0..200 {
            let batches = source.batches.lock().await;
            if batches.len() >= count {
                return batches.clone();
            }
            drop(batches);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} produce calls", count);
    }

    #[tokio::test]
    async fn test_full_buffer_triggers_produce() {
        let source = Arc::new(RecordingSource::default());
        let (tx, rx) = mpsc::channel(8);
        let forwarder = tokio::spawn(forward_messages(
            rx,
            producer(source.clone()),
            2,
            Duration::from_secs(3600),
        ));

        tx.send(reading(400)).await.unwrap();
        tx.send(reading(401)).await.unwrap();

        let batches = wait_for_batches(&source, 1).await;
        assert_eq!(batches[0].len(), 2);

        drop(tx);
        forwarder.await.unwrap();
        assert_eq!(source.batches.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_buffer_flushed_on_interval() {
        let source = Arc::new(RecordingSource::default());
        let (tx, rx) = mpsc::channel(8);
        let forwarder = tokio::spawn(forward_messages(
            rx,
            producer(source.clone()),
            10,
            Duration::from_millis(50),
        ));

        tx.send(reading(420)).await.unwrap();

        let batches = wait_for_batches(&source, 1).await;
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0].records()[0]["co2"], 420);

        drop(tx);
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_messages_flushed_when_channel_closes() {
        let source = Arc::new(RecordingSource::default());
        let (tx, rx) = mpsc::channel(8);
        let forwarder = tokio::spawn(forward_messages(
            rx,
            producer(source.clone()),
            10,
            Duration::from_secs(3600),
        ));

        tx.send(reading(430)).await.unwrap();
        tx.send(reading(431)).await.unwrap();
        drop(tx);
        forwarder.await.unwrap();

        let batches = source.batches.lock().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_messages_accepted_while_produce_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(RecordingSource {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel(8);
        let forwarder = tokio::spawn(forward_messages(
            rx,
            producer(source.clone()),
            1,
            Duration::from_secs(3600),
        ));

        tx.send(reading(500)).await.unwrap();
        wait_for_batches(&source, 1).await;

        for co2 in 501..506 {
            assert!(tx.try_send(reading(co2)).is_ok());
        }

        gate.add_permits(16);
        drop(tx);
        forwarder.await.unwrap();

        let batches = source.batches.lock().await;
        assert_eq!(batches.len(), 6);
        assert_eq!(batches[5].records()[0]["co2"], 505);
    }

    #[tokio::test]
    async fn test_subscriber_stops_after_max_reconnect_attempts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            topic: "co2/#".to_string(),
            reconnect_delay_ms: 10,
            max_reconnect_attempts: 2,
            ..Default::default()
        };
        let source = Arc::new(RecordingSource::default());

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            run_subscriber(config, producer(source.clone()), CancellationToken::new()),
        )
        .await
        .expect("subscriber should give up");

        assert!(matches!(outcome, Err(ConnectorError::Connection(_))));
        assert!(source.batches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_returns_cleanly() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let config = MqttConfig {
            topic: "co2/#".to_string(),
            ..Default::default()
        };

        let outcome = run_subscriber(
            config,
            producer(Arc::new(RecordingSource::default())),
            shutdown,
        )
        .await;

        assert!(outcome.is_ok());
    }
}
