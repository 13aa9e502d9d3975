use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{Notification, Notifier};

pub const DEFAULT_MQTT_TOPIC: &str = "speedtrap/violations";
pub const DEFAULT_MQTT_CLIENT_ID: &str = "speedtrapd";
const REQUEST_CHANNEL_CAPACITY: usize = 10;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    /// `host:port`
    pub broker_addr: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_addr: "127.0.0.1:1883".to_string(),
            topic: DEFAULT_MQTT_TOPIC.to_string(),
            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
            username: None,
            password: None,
        }
    }
}

/// Publishes violation alerts as JSON with QoS 1.
///
/// Publishing never blocks the frame loop: a full request queue is reported as
/// a send failure.
pub struct MqttNotifier {
    client: Client,
    topic: String,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttNotifier {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let (host, port) = parse_broker_addr(&settings.broker_addr)?;
        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user.clone(), settings.password.clone().unwrap_or_default());
        }

        let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
        let connection_handle = Some(spawn_connection(connection));
        log::info!(
            "mqtt notifier publishing to {} on {}",
            settings.topic,
            settings.broker_addr
        );
        Ok(Self {
            client,
            topic: settings.topic.clone(),
            connection_handle,
        })
    }
}

fn spawn_connection(mut connection: Connection) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn send(&mut self, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_vec(notification)?;
        self.client
            .try_publish(self.topic.clone(), QoS::AtLeastOnce, false, payload)
            .context("mqtt publish rejected")?;
        Ok(())
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        if let Err(e) = self.client.disconnect() {
            log::debug!("mqtt disconnect: {}", e);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim().trim_start_matches("mqtt://");
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("mqtt broker address must be host:port, got '{}'", addr))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("invalid mqtt broker port '{}'", port))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(anyhow!("mqtt broker host must not be empty"));
    }
    Ok((host.to_string(), port))
}
