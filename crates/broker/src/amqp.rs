//! AMQP-backed broker implementation (lapin).

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicPublishOptions, ExchangeDeclareOptions,
    ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use crate::envelope::{CONTENT_TYPE_JSON, Delivery, MessageEnvelope};
use crate::error::Result;
use crate::traits::{Broker, ExchangeKind, ExchangeSpec, QueueArgs};

/// Persistent delivery mode (survives broker restart).
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// [`Broker`] implementation over one AMQP connection and channel.
///
/// Channels are not safe for concurrent use from multiple consumer loops;
/// each consumer process should hold its own `AmqpBroker`.
pub struct AmqpBroker {
    _connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connects to the broker and opens a channel.
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        tracing::info!(%url, "connected to AMQP broker");
        Ok(Self {
            _connection: connection,
            channel,
        })
    }
}

fn headers_to_table(headers: &std::collections::BTreeMap<String, serde_json::Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        let amqp_value = match value {
            serde_json::Value::Bool(b) => AMQPValue::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AMQPValue::LongLongInt(i)
                } else {
                    AMQPValue::Double(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => AMQPValue::LongString(LongString::from(s.as_str())),
            other => AMQPValue::LongString(LongString::from(other.to_string())),
        };
        table.insert(key.as_str().into(), amqp_value);
    }
    table
}

fn table_to_headers(
    table: Option<&FieldTable>,
) -> std::collections::BTreeMap<String, serde_json::Value> {
    let mut headers = std::collections::BTreeMap::new();
    let Some(table) = table else {
        return headers;
    };
    for (key, value) in table.inner() {
        let json = match value {
            AMQPValue::Boolean(b) => serde_json::Value::from(*b),
            AMQPValue::ShortShortInt(i) => serde_json::Value::from(*i),
            AMQPValue::ShortShortUInt(i) => serde_json::Value::from(*i),
            AMQPValue::ShortInt(i) => serde_json::Value::from(*i),
            AMQPValue::ShortUInt(i) => serde_json::Value::from(*i),
            AMQPValue::LongInt(i) => serde_json::Value::from(*i),
            AMQPValue::LongUInt(i) => serde_json::Value::from(*i),
            AMQPValue::LongLongInt(i) => serde_json::Value::from(*i),
            AMQPValue::Timestamp(t) => serde_json::Value::from(*t),
            AMQPValue::Float(f) => serde_json::Value::from(*f),
            AMQPValue::Double(f) => serde_json::Value::from(*f),
            AMQPValue::LongString(s) => {
                serde_json::Value::from(String::from_utf8_lossy(s.as_bytes()).into_owned())
            }
            other => serde_json::Value::from(format!("{other:?}")),
        };
        headers.insert(key.to_string(), json);
    }
    headers
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };
        let (kind, arguments) = match spec.kind {
            ExchangeKind::Topic => (lapin::ExchangeKind::Topic, FieldTable::default()),
            ExchangeKind::DelayedMessage => {
                let mut arguments = FieldTable::default();
                arguments.insert(
                    "x-delayed-type".into(),
                    AMQPValue::LongString(LongString::from("topic")),
                );
                (
                    lapin::ExchangeKind::Custom("x-delayed-message".to_string()),
                    arguments,
                )
            }
        };
        self.channel
            .exchange_declare(&spec.name, kind, options, arguments)
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str, args: &QueueArgs) -> Result<()> {
        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        let mut arguments = FieldTable::default();
        if let Some(ttl) = args.message_ttl_ms {
            arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl as i64));
        }
        if let Some(exchange) = &args.dead_letter_exchange {
            arguments.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(LongString::from(exchange.as_str())),
            );
        }
        if let Some(routing_key) = &args.dead_letter_routing_key {
            arguments.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(LongString::from(routing_key.as_str())),
            );
        }
        self.channel.queue_declare(name, options, arguments).await?;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        self.channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await?;
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<()> {
        self.channel
            .exchange_delete(name, ExchangeDeleteOptions::default())
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: MessageEnvelope,
    ) -> Result<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_message_id(envelope.message_id.as_str().into())
            .with_headers(headers_to_table(&envelope.headers));

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &envelope.body,
                properties,
            )
            .await?
            .await?;
        metrics::counter!("broker_messages_published_total").increment(1);
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await?;
        Ok(message.map(|m| Delivery {
            queue: queue.to_string(),
            exchange: m.delivery.exchange.to_string(),
            routing_key: m.delivery.routing_key.to_string(),
            headers: table_to_headers(m.delivery.properties.headers().as_ref()),
            body: m.delivery.data,
            delivery_tag: m.delivery.delivery_tag,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }
}
