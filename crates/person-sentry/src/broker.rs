use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use person_sentry_types::{Alert, Frame};

use crate::pipeline::{Disposition, FramePipeline};
use crate::publish::{AlertPublisher, PublishError};
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker failure: {0}")]
    Amqp(#[from] lapin::Error),
}

/// AMQP binding: an exclusive queue bound to the frame fanout exchange on
/// the consume side, the alert fanout exchange on the publish side. Both
/// exchanges are declared durable, matching the producers.
pub struct Broker {
    channel: Channel,
    frame_queue: String,
    consumer_tag: String,
    alert_exchange: String,
}

impl Broker {
    pub async fn connect(settings: &Settings) -> Result<Self, BrokerError> {
        let connection =
            Connection::connect(&settings.broker_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        // One unacked delivery at a time: backpressure is the queue itself.
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        for exchange in [&settings.frame_exchange, &settings.alert_exchange] {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Fanout,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        // Broker-named exclusive queue, dropped with the connection. Frames
        // are live data; there is nothing to keep across restarts.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                queue.name().as_str(),
                &settings.frame_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            broker = %settings.broker_url,
            queue = queue.name().as_str(),
            frame_exchange = %settings.frame_exchange,
            alert_exchange = %settings.alert_exchange,
            "connected"
        );

        Ok(Self {
            channel,
            frame_queue: queue.name().as_str().to_string(),
            consumer_tag: settings.consumer_tag.clone(),
            alert_exchange: settings.alert_exchange.clone(),
        })
    }

    pub fn alert_publisher(&self) -> AmqpAlertPublisher {
        AmqpAlertPublisher {
            channel: self.channel.clone(),
            exchange: self.alert_exchange.clone(),
        }
    }

    /// Consumes frames until the shutdown signal flips or the stream ends.
    /// A delivery is acked only after the whole frame was processed, so a
    /// crash mid-frame redelivers it. Shutdown is only observed between
    /// frames; the frame in flight always completes.
    pub async fn consume_frames(
        &self,
        pipeline: &mut FramePipeline,
        requeue_on_store_outage: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        let mut consumer = self
            .channel
            .basic_consume(
                &self.frame_queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        loop {
            let delivery = tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, draining");
                    break;
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(err)) => {
                        error!(%err, "frame stream error");
                        return Err(err.into());
                    }
                    None => {
                        warn!("frame stream closed by broker");
                        break;
                    }
                },
            };

            let mut delivery = delivery;
            let frame = Frame::received_now(std::mem::take(&mut delivery.data));
            let report = pipeline.process_frame(&frame).await;
            info!(
                detections = report.detections,
                new_identities = report.new_identities,
                alerts = report.alerts_published,
                skipped = report.skipped_detections,
                store_faults = report.store_faults,
                "frame processed"
            );

            match report.disposition(requeue_on_store_outage) {
                Disposition::Acknowledge => delivery.ack(BasicAckOptions::default()).await?,
                Disposition::Requeue => {
                    warn!("identity store out, returning frame to the queue");
                    delivery
                        .reject(BasicRejectOptions { requeue: true })
                        .await?
                }
            }
        }

        Ok(())
    }
}

/// Publishes alerts to the alert fanout exchange. Fire and forget: the
/// publish is handed to the channel and no broker confirm is awaited.
pub struct AmqpAlertPublisher {
    channel: Channel,
    exchange: String,
}

#[async_trait]
impl AlertPublisher for AmqpAlertPublisher {
    async fn publish(&self, alert: &Alert) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(alert)?;
        self.channel
            .basic_publish(
                &self.exchange,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|err| PublishError::transport(err.to_string()))?;
        Ok(())
    }
}
