//! Kafka REST Proxy (v2 API, JSON embedded format) binding.
//!
//! Publishing is buffered per topic and sent on `flush`. Each record is keyed
//! by the message's `nodeId` so all messages of one node land in one partition.

use rand::Rng;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{BusError, MessageBus, Subscription};

const KAFKA_JSON_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";
const KAFKA_CONTENT_TYPE: &str = "application/vnd.kafka.v2+json";

/// Extra time allowed on top of a poll's server-side timeout.
const POLL_GRACE: Duration = Duration::from_secs(5);

/// Client for producing to and consuming from a Kafka REST Proxy.
pub struct RestProxyBus {
    client: Client,
    base_url: String,
    pending: Mutex<BTreeMap<String, Vec<Value>>>,
}

impl RestProxyBus {
    /// Create the HTTP client and verify the proxy is reachable.
    pub fn connect(base_url: &str) -> Result<Self, BusError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BusError::Connect(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let url = format!("{}/topics", base_url);
        let response = client
            .get(&url)
            .header("Accept", KAFKA_CONTENT_TYPE)
            .send()
            .map_err(|e| BusError::Connect(format!("Network error: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BusError::Connect(format!("{} answered {}", url, status.as_u16())));
        }

        log::info!("Connected to REST proxy at {}", base_url);
        Ok(Self {
            client,
            base_url,
            pending: Mutex::new(BTreeMap::new()),
        })
    }

    fn produce(&self, topic: &str, messages: &[Value]) -> Result<(), BusError> {
        let url = format!("{}/topics/{}", self.base_url, topic);
        let records: Vec<Value> = messages
            .iter()
            .map(|message| match message.get("nodeId") {
                Some(key) => json!({ "key": key, "value": message }),
                None => json!({ "value": message }),
            })
            .collect();

        let response = self
            .client
            .post(&url)
            .header("Content-Type", KAFKA_JSON_CONTENT_TYPE)
            .header("Accept", KAFKA_CONTENT_TYPE)
            .json(&json!({ "records": records }))
            .send()
            .map_err(|e| BusError::Publish(format!("Network error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            Err(BusError::Publish(format!("{} ({}): {}", topic, status.as_u16(), body)))
        }
    }
}

impl MessageBus for RestProxyBus {
    fn publish(&self, topic: &str, message: &Value) -> Result<(), BusError> {
        let mut pending = self.pending.lock().map_err(|_| BusError::Publish("buffer poisoned".to_string()))?;
        pending.entry(topic.to_string()).or_default().push(message.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), BusError> {
        let batches = {
            let mut pending = self.pending.lock().map_err(|_| BusError::Publish("buffer poisoned".to_string()))?;
            std::mem::take(&mut *pending)
        };

        // Keep going on failure so one bad topic does not hold back the others.
        let mut first_error = None;
        for (topic, messages) in batches {
            if messages.is_empty() {
                continue;
            }
            if let Err(err) = self.produce(&topic, &messages) {
                log::warn!("Dropping {} buffered messages for {}: {}", messages.len(), topic, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError> {
        let group = format!("node-sim-consumer-{}", rand::thread_rng().gen_range(0..100_000));
        let url = format!("{}/consumers/{}", self.base_url, group);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", KAFKA_CONTENT_TYPE)
            .json(&json!({
                "name": format!("{}-instance", group),
                "format": "json",
                "auto.offset.reset": "latest",
            }))
            .send()
            .map_err(|e| BusError::Subscribe(format!("Network error: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(BusError::Subscribe(format!("Consumer creation failed ({}): {}", status, body)));
        }
        let instance: ConsumerInstance = response
            .json()
            .map_err(|e| BusError::Subscribe(format!("Invalid consumer response: {}", e)))?;

        let subscription = RestProxySubscription {
            client: self.client.clone(),
            base_uri: instance.base_uri,
        };

        let response = self
            .client
            .post(format!("{}/subscription", subscription.base_uri))
            .header("Content-Type", KAFKA_CONTENT_TYPE)
            .json(&json!({ "topics": [topic] }))
            .send()
            .map_err(|e| BusError::Subscribe(format!("Network error: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            Box::new(subscription).close();
            return Err(BusError::Subscribe(format!("Subscribing to {} failed ({})", topic, status)));
        }

        log::info!("Consumer {} subscribed to {}", instance.instance_id, topic);
        Ok(Box::new(subscription))
    }
}

#[derive(Deserialize)]
struct ConsumerInstance {
    instance_id: String,
    base_uri: String,
}

#[derive(Deserialize)]
struct ConsumerRecord {
    value: Value,
}

struct RestProxySubscription {
    client: Client,
    base_uri: String,
}

impl Subscription for RestProxySubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Value>, BusError> {
        let response = self
            .client
            .get(format!("{}/records", self.base_uri))
            .query(&[("timeout", timeout.as_millis().to_string())])
            .header("Accept", KAFKA_JSON_CONTENT_TYPE)
            .timeout(timeout + POLL_GRACE)
            .send()
            .map_err(|e| BusError::Poll(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BusError::Poll(format!("Server error ({}): {}", status.as_u16(), body)));
        }

        let records: Vec<ConsumerRecord> = response.json().map_err(|e| BusError::Poll(format!("Invalid records: {}", e)))?;
        Ok(records.into_iter().map(|record| record.value).collect())
    }

    fn close(self: Box<Self>) {
        let result = self
            .client
            .delete(&self.base_uri)
            .header("Content-Type", KAFKA_CONTENT_TYPE)
            .send();
        match result {
            Ok(response) if response.status().is_success() => log::debug!("Consumer instance {} deleted", self.base_uri),
            Ok(response) => log::warn!("Consumer instance delete answered {}", response.status().as_u16()),
            Err(e) => log::warn!("Consumer instance delete failed: {}", e),
        }
    }
}
