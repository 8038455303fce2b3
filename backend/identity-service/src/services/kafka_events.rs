/// Domain event publishing for identity service
///
/// Publishing is fire-and-forget from the flows' point of view: callers log failures and move on.
/// The Kafka producer returns once the record is queued; delivery is awaited on a background task.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{IdentityError, Result};

pub const USER_CREATED: &str = "user.created";
pub const USER_EMAIL_CHANGED: &str = "user.email_changed";
pub const USER_STATUS_CHANGED: &str = "user.status_changed";

#[derive(Debug, Clone, Serialize)]
pub struct UserEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub user_id: Uuid,
    pub email: String,
    pub trace_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl UserEvent {
    pub fn new(event_type: &'static str, user_id: Uuid, email: &str, trace_id: &str) -> Self {
        Self {
            event_type,
            user_id,
            email: email.to_string(),
            trace_id: trace_id.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &UserEvent) -> Result<()>;
}

/// Kafka event producer service
#[derive(Clone)]
pub struct KafkaEventProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventProducer {
    /// Create a new Kafka event producer
    ///
    /// ## Arguments
    ///
    /// * `brokers` - Comma-separated list of Kafka brokers
    /// * `topic` - Topic for user lifecycle events
    /// * `delivery_timeout` - How long librdkafka keeps trying to deliver one record
    pub fn new(brokers: &str, topic: &str, delivery_timeout: Duration) -> Result<Self> {
        let producer = rdkafka::config::ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", "identity-service")
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .create::<FutureProducer>()
            .map_err(|e| {
                IdentityError::Internal(format!("Failed to create Kafka producer: {}", e))
            })?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventProducer {
    async fn publish(&self, event: &UserEvent) -> Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| IdentityError::Internal(format!("Failed to serialize event: {}", e)))?;

        // Keyed by user so one user's events stay ordered within a partition
        let partition_key = event.user_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .key(&partition_key)
            .payload(&payload);

        // Only a full local queue fails here
        let delivery = self.producer.send_result(record).map_err(|(error, _)| {
            warn!("Failed to enqueue Kafka event: {:?}", error);
            IdentityError::Internal(format!("Failed to publish event to Kafka: {}", error))
        })?;

        let event_type = event.event_type;
        let user_id = event.user_id;
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => {
                    debug!(event_type, %user_id, partition, offset, "Kafka event delivered");
                }
                Ok(Err((error, _))) => {
                    warn!(event_type, %user_id, error = %error, "Kafka event delivery failed");
                }
                Err(_) => {
                    warn!(event_type, %user_id, "Kafka event delivery canceled");
                }
            }
        });

        Ok(())
    }
}

/// Publisher used when no brokers are configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &UserEvent) -> Result<()> {
        info!(
            event_type = event.event_type,
            user_id = %event.user_id,
            trace_id = %event.trace_id,
            "Domain event (no broker configured)"
        );
        Ok(())
    }
}
