//! MQTT-backed telemetry bus.
//!
//! Every key is a retained topic `<prefix>/<table>/<key>`. Writes go out with
//! QoS 0 through `try_publish` so a slow broker never blocks a pipeline
//! worker. Values other participants are allowed to set (`Enabled`, the
//! `control` table) are subscribed to and cached locally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::{LastWill, Packet};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;

use crate::error::TelemetryError;

use super::{TelemetryBus, TelemetryTable, TelemetryValue};

pub const DEFAULT_PREFIX: &str = "vision";
const STATUS_KEY: &str = "status";
const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct MqttSettings {
    /// `host:port`, optionally with an `mqtt://`/`mqtts://` scheme.
    pub broker: String,
    pub client_id: String,
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Force TLS even without an `mqtts://` scheme.
    pub use_tls: bool,
}

impl MqttSettings {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            client_id: format!("visiond-{}", std::process::id()),
            prefix: DEFAULT_PREFIX.to_string(),
            username: None,
            password: None,
            use_tls: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

fn build_transport(endpoint: &MqttEndpoint) -> Transport {
    if endpoint.use_tls {
        Transport::tls_with_default_config()
    } else {
        Transport::tcp()
    }
}

pub(crate) fn topic(prefix: &str, table: &str, key: &str) -> String {
    format!("{}/{}/{}", prefix, table, key)
}

/// Link state shared by the connection thread and every table.
#[derive(Default)]
struct Link {
    connected: AtomicBool,
    stopping: AtomicBool,
    values: Mutex<HashMap<String, TelemetryValue>>,
}

impl Link {
    fn store(&self, topic: String, value: TelemetryValue) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic, value);
    }

    fn load(&self, topic: &str) -> Option<TelemetryValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    fn record_incoming(&self, topic: &[u8], payload: &[u8]) {
        let (Ok(topic), Ok(payload)) = (std::str::from_utf8(topic), std::str::from_utf8(payload))
        else {
            log::debug!("MqttBus: ignoring non-UTF-8 publish");
            return;
        };
        self.store(topic.to_string(), TelemetryValue::parse(payload));
    }

    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            if connected {
                log::info!("MqttBus: connected");
            } else {
                log::warn!("MqttBus: connection lost");
            }
        }
    }
}

pub struct MqttBus {
    client: Client,
    prefix: Arc<str>,
    link: Arc<Link>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttBus {
    /// Starts the connection thread. The broker does not have to be up yet;
    /// the bus reports disconnected until the first ConnAck.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker, settings.use_tls)?;
        let status_topic = format!("{}/{}", settings.prefix, STATUS_KEY);

        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        let will = LastWill::new(
            status_topic.clone(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        );
        options.set_last_will(will);
        options.set_transport(build_transport(&endpoint));

        let (client, connection) = Client::new(options, 64);
        let link = Arc::new(Link::default());
        let prefix: Arc<str> = Arc::from(settings.prefix.as_str());

        let handle = {
            let client = client.clone();
            let link = Arc::clone(&link);
            let prefix = Arc::clone(&prefix);
            std::thread::Builder::new()
                .name("telemetry-mqtt".to_string())
                .spawn(move || run_connection(connection, client, link, prefix, status_topic))
                .context("spawn MQTT connection thread")?
        };

        log::info!(
            "MqttBus: broker {}:{} (TLS: {}, auth: {}, prefix: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some(),
            settings.prefix
        );
        Ok(Self {
            client,
            prefix,
            link,
            connection_handle: Some(handle),
        })
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        self.link.stopping.store(true, Ordering::SeqCst);
        let status_topic = format!("{}/{}", self.prefix, STATUS_KEY);
        let _ = self
            .client
            .try_publish(status_topic, QoS::AtMostOnce, true, PAYLOAD_OFFLINE.as_bytes().to_vec());
        let result = self.client.try_disconnect().map_err(|e| anyhow!("MQTT disconnect: {}", e));
        let _ = handle.join();
        self.link.set_connected(false);
        result
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::debug!("MqttBus: {}", e);
        }
    }
}

fn run_connection(
    mut connection: Connection,
    client: Client,
    link: Arc<Link>,
    prefix: Arc<str>,
    status_topic: String,
) {
    for event in connection.iter() {
        if link.stopping.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                link.set_connected(true);
                // Clean session: subscriptions do not survive a reconnect.
                for filter in [
                    format!("{}/+/Enabled", prefix),
                    format!("{}/control/#", prefix),
                ] {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        log::warn!("MqttBus: subscribe {} failed: {}", filter, e);
                    }
                }
                let _ = client.try_publish(
                    status_topic.as_str(),
                    QoS::AtLeastOnce,
                    true,
                    PAYLOAD_ONLINE.as_bytes().to_vec(),
                );
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                link.record_incoming(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect(_))) => link.set_connected(false),
            Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                if link.connected.load(Ordering::SeqCst) {
                    log::warn!("MQTT connection error: {}", e);
                } else {
                    log::debug!("MQTT connection error: {}", e);
                }
                link.set_connected(false);
                if link.stopping.load(Ordering::SeqCst) {
                    break;
                }
                // The next iteration reconnects.
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}

impl TelemetryBus for MqttBus {
    fn table(&self, name: &str) -> Arc<dyn TelemetryTable> {
        Arc::new(MqttTable {
            name: name.to_string(),
            prefix: Arc::clone(&self.prefix),
            client: self.client.clone(),
            link: Arc::clone(&self.link),
        })
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }
}

pub struct MqttTable {
    name: String,
    prefix: Arc<str>,
    client: Client,
    link: Arc<Link>,
}

impl TelemetryTable for MqttTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, value: TelemetryValue) -> Result<(), TelemetryError> {
        if !self.link.connected.load(Ordering::SeqCst) {
            return Err(TelemetryError::Unreachable);
        }
        let topic = topic(&self.prefix, &self.name, key);
        self.client
            .try_publish(topic.as_str(), QoS::AtMostOnce, true, value.to_string().into_bytes())
            .map_err(|e| TelemetryError::Publish {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;
        self.link.store(topic, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<TelemetryValue> {
        self.link.load(&topic(&self.prefix, &self.name, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_schemes() {
        let plain = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        assert_eq!(plain.host, "127.0.0.1");
        assert_eq!(plain.port, 1883);
        assert!(!plain.use_tls);

        let tls = parse_mqtt_endpoint("mqtts://broker.local:8883", false).unwrap();
        assert_eq!(tls.host, "broker.local");
        assert!(tls.use_tls);

        let forced = parse_mqtt_endpoint("mqtt://10.0.0.2:1883", true).unwrap();
        assert!(forced.use_tls);

        assert!(parse_mqtt_endpoint("ws://broker:80", false).is_err());
    }

    #[test]
    fn parse_endpoint_ipv6_and_errors() {
        let v6 = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.port, 1883);

        assert!(parse_mqtt_endpoint("broker", false).is_err());
        assert!(parse_mqtt_endpoint("broker:notaport", false).is_err());
        assert!(parse_mqtt_endpoint("[::1]", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
    }

    #[test]
    fn topics_nest_table_under_prefix() {
        assert_eq!(topic("vision", "front", "Ring.0.distance"), "vision/front/Ring.0.distance");
    }

    #[test]
    fn incoming_publishes_are_cached_by_topic() {
        let link = Link::default();
        link.record_incoming(b"vision/front/Enabled", b"false");
        link.record_incoming(b"vision/control/RobotStop", b"1");
        link.record_incoming(b"vision/front/Bad", &[0xff, 0xfe]);
        assert_eq!(link.load("vision/front/Enabled"), Some(TelemetryValue::Bool(false)));
        assert_eq!(link.load("vision/control/RobotStop"), Some(TelemetryValue::Number(1.0)));
        assert_eq!(link.load("vision/front/Bad"), None);
    }

    #[test]
    fn unreachable_broker_reports_disconnected() {
        // Nothing listens on port 1; the connection thread only ever sees errors.
        let mut settings = MqttSettings::new("127.0.0.1:1");
        settings.client_id = "robot-vision-test".to_string();
        let bus = MqttBus::connect(&settings).unwrap();
        assert!(!bus.is_connected());
        let table = bus.table("front");
        assert_eq!(table.put_number("FPS", 30.0), Err(TelemetryError::Unreachable));
        assert!(table.get_bool("Enabled", true));
        bus.disconnect().ok();
    }
}
