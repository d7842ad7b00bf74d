use std::sync::Arc;

use tokio::sync::broadcast;
use url::Url;

use crate::cache::StateCache;
use crate::client::ProtocolClient;
use crate::error::{DeviceError, Result};
use crate::protocol::ApiRequest;
use crate::subscriber::{NotificationSubscriber, SUBSCRIBE_NOTIFICATIONS};
use crate::subscription::{DeviceEvent, EventReceiver};
use crate::types::{
    CapabilityMatrix, InterfaceInfo, PlayingContentInfo, PowerStatus, ServiceApiInfo, SystemInfo,
    Terminal, VolumeInfo, SERVICE_AUDIO, SERVICE_AV_CONTENT, SERVICE_GUIDE, SERVICE_SYSTEM,
};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Relative volume adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
}

impl VolumeStep {
    fn as_request_value(self) -> &'static str {
        match self {
            VolumeStep::Up => "+1",
            VolumeStep::Down => "-1",
        }
    }
}

/// One connected device: the HTTP control client, the state cache, and a
/// notification subscriber per service group.
///
/// Built by [`SonyDevice::create`], which runs the whole probe sequence
/// against the device and refuses incompatible or too-old peers before any
/// state is kept for them. Commands target the active zone when the device
/// has explicit zone outputs; without one they apply to all outputs.
pub struct SonyDevice {
    /// Friendly name; discovery replaces this with the description document's
    /// `friendlyName` when available
    pub name: String,
    pub manufacturer: String,
    pub udn: String,
    pub system_info: SystemInfo,
    client: Arc<ProtocolClient>,
    cache: Arc<StateCache>,
    events_tx: broadcast::Sender<DeviceEvent>,
    stop_tx: broadcast::Sender<()>,
}

impl SonyDevice {
    /// Probe and connect a device at `base_url`.
    ///
    /// The sequence is strictly ordered; any rejection aborts construction:
    /// 1. `getInterfaceInformation`: reject unsupported product categories.
    /// 2. `getSupportedApiInfo`: build and install the capability matrix.
    /// 3. Check `getSystemInformation` v1.4 is supported.
    /// 4. Fetch [`SystemInfo`].
    /// 5. Subscribe to all notification groups.
    pub async fn create(base_url: Url, ircc_url: Option<Url>, udn: String) -> Result<SonyDevice> {
        let client = Arc::new(ProtocolClient::new(base_url, ircc_url)?);

        let interface: InterfaceInfo = client
            .call_unchecked(SERVICE_SYSTEM, &ApiRequest::interface_information())
            .await?
            .first_result()?;
        if !interface.is_compatible_category() {
            return Err(DeviceError::IncompatibleCategory(
                interface.product_category,
            ));
        }

        let api_info: Vec<ServiceApiInfo> = client
            .call_unchecked(SERVICE_GUIDE, &ApiRequest::supported_api_info())
            .await?
            .first_result()?;
        let matrix = CapabilityMatrix::from_api_info(&api_info);

        let system_request = ApiRequest::system_information();
        if !matrix.supports(SERVICE_SYSTEM, &system_request.method, &system_request.version) {
            return Err(DeviceError::UnsupportedVersion(format!(
                "device does not support {} v{}",
                system_request.method, system_request.version
            )));
        }
        client.install_capabilities(matrix);

        let system_info: SystemInfo = client
            .call(SERVICE_SYSTEM, &system_request)
            .await?
            .first_result()?;

        let cache = Arc::new(StateCache::new(client.clone()));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = broadcast::channel(1);

        let device = SonyDevice {
            name: if system_info.name.is_empty() {
                system_info.model.clone()
            } else {
                system_info.name.clone()
            },
            manufacturer: "Sony Corporation".to_string(),
            udn,
            system_info,
            client,
            cache,
            events_tx,
            stop_tx,
        };
        device.subscribe();
        tracing::info!(
            "Device {} ({}) connected",
            device.name,
            device.system_info.unique_id()
        );
        Ok(device)
    }

    /// Stable identifier for the device, from the system information fields.
    pub fn unique_id(&self) -> &str {
        self.system_info.unique_id()
    }

    /// Subscribe to the typed event stream.
    pub fn events(&self) -> EventReceiver {
        EventReceiver::new(self.events_tx.subscribe())
    }

    /// Tear down all notification subscribers. Each sends an advisory
    /// disable-all and closes its socket normally; no reconnects fire after
    /// this call.
    pub fn unsubscribe(&self) {
        let _ = self.stop_tx.send(());
    }

    fn subscribe(&self) {
        for group in SUBSCRIBE_NOTIFICATIONS {
            let url = match self.client.notification_url(group.service) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(
                        "Device {} cannot derive notification URL for {}: {}",
                        self.name,
                        group.service,
                        e
                    );
                    continue;
                }
            };
            NotificationSubscriber::spawn(
                self.name.clone(),
                group,
                url,
                self.cache.clone(),
                self.events_tx.clone(),
                self.stop_tx.subscribe(),
            );
        }
    }

    /// Whether the device is powered on (activating counts as on).
    pub async fn get_power_state(&self) -> Result<bool> {
        let status: PowerStatus = self
            .client
            .call(SERVICE_SYSTEM, &ApiRequest::power_status())
            .await?
            .first_result()?;
        Ok(status.is_on())
    }

    /// Volume and mute state for the active zone, or the device-wide entry
    /// when the device has no explicit zones. Served from the cache, which is
    /// kept current by volume notifications.
    pub async fn get_volume_state(&self) -> Result<VolumeInfo> {
        let volumes = self.cache.volume_info().await?;
        let zone = self.cache.active_zone().await?;

        let entry = match &zone {
            Some(zone) => volumes.iter().find(|v| v.output == zone.uri),
            None => volumes.iter().find(|v| v.output.is_empty()),
        };
        entry.cloned().ok_or_else(|| {
            DeviceError::InvalidResponse(
                "no volume information for the active output".to_string(),
            )
        })
    }

    /// All terminals: the device-reported list merged with supported
    /// catalog terminals.
    pub async fn get_terminals(&self) -> Result<Vec<Terminal>> {
        self.cache.terminals().await
    }

    /// Input terminals.
    pub async fn get_inputs(&self) -> Result<Vec<Terminal>> {
        self.cache.inputs().await
    }

    /// Zone (output) terminals.
    pub async fn get_zones(&self) -> Result<Vec<Terminal>> {
        self.cache.zones().await
    }

    /// The currently active zone, or `None` for single-implicit-zone devices.
    pub async fn get_active_zone(&self) -> Result<Option<Terminal>> {
        self.cache.active_zone().await
    }

    /// The input terminal currently playing on the active zone, resolved by
    /// the source URI of the playing content.
    pub async fn get_active_input(&self) -> Result<Option<Terminal>> {
        let zone = self.cache.active_zone().await?;
        let request = ApiRequest::playing_content_info(zone.as_ref().map(|z| z.uri.as_str()));
        let playing: Vec<PlayingContentInfo> = self
            .client
            .call(SERVICE_AV_CONTENT, &request)
            .await?
            .first_result()?;

        // More than one entry means several zones play different content at
        // once; there is no single active input then.
        match playing.as_slice() {
            [info] => self.cache.terminal_by_source(info.source_uri()).await,
            _ => Ok(None),
        }
    }

    /// Step the volume up or down on the active zone. Returns the step that
    /// was applied.
    pub async fn set_volume(&self, step: VolumeStep) -> Result<VolumeStep> {
        let output = self.active_zone_uri().await?.unwrap_or_default();
        self.client
            .call(
                SERVICE_AUDIO,
                &ApiRequest::set_audio_volume(&output, step.as_request_value()),
            )
            .await?;
        Ok(step)
    }

    /// Power the device on or off. Returns the requested state.
    pub async fn set_power(&self, on: bool) -> Result<bool> {
        self.client
            .call(SERVICE_SYSTEM, &ApiRequest::set_power_status(on))
            .await?;
        Ok(on)
    }

    /// Mute or unmute the active zone. Returns the requested state.
    pub async fn set_mute(&self, mute: bool) -> Result<bool> {
        let output = self.active_zone_uri().await?;
        self.client
            .call(
                SERVICE_AUDIO,
                &ApiRequest::set_audio_mute(mute, output.as_deref()),
            )
            .await?;
        Ok(mute)
    }

    /// Select a terminal as the playing source on the active zone.
    pub async fn set_source(&self, terminal: &Terminal) -> Result<()> {
        let output = self.active_zone_uri().await?;
        self.client
            .call(
                SERVICE_AV_CONTENT,
                &ApiRequest::set_play_content(&terminal.uri, output.as_deref()),
            )
            .await?;
        Ok(())
    }

    /// Pause whatever is playing on the active zone.
    pub async fn set_pause(&self) -> Result<()> {
        let output = self.active_zone_uri().await?;
        self.client
            .call(
                SERVICE_AV_CONTENT,
                &ApiRequest::pause_playing_content(output.as_deref()),
            )
            .await?;
        Ok(())
    }

    /// Send a base64 infrared remote code over the legacy IRCC surface.
    /// Fails with [`DeviceError::RemoteControlUnavailable`] when the device
    /// description carried no IRCC service.
    pub async fn set_remote_key(&self, code: &str) -> Result<()> {
        self.client.send_ircc(code).await
    }

    async fn active_zone_uri(&self) -> Result<Option<String>> {
        Ok(self.cache.active_zone().await?.map(|zone| zone.uri))
    }
}

impl Drop for SonyDevice {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SonyDevice {
        // Unroutable base; any test that accidentally reaches the network
        // fails with a transport error instead of passing.
        let base = Url::parse("http://192.0.2.1:10000/sony").unwrap();
        let client = Arc::new(ProtocolClient::new(base, None).unwrap());
        let cache = Arc::new(StateCache::new(client.clone()));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = broadcast::channel(1);
        SonyDevice {
            name: "Test Receiver".to_string(),
            manufacturer: "Sony Corporation".to_string(),
            udn: "uuid:test".to_string(),
            system_info: SystemInfo::default(),
            client,
            cache,
            events_tx,
            stop_tx,
        }
    }

    fn zone(uri: &str, active: &str) -> Terminal {
        Terminal {
            active: active.to_string(),
            connection: "connected".to_string(),
            icon_url: String::new(),
            label: String::new(),
            meta: "meta:zone:output".to_string(),
            outputs: Vec::new(),
            title: String::new(),
            uri: uri.to_string(),
        }
    }

    fn volume(output: &str, volume: i64) -> VolumeInfo {
        VolumeInfo {
            output: output.to_string(),
            volume,
            mute: "off".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn volume_step_maps_to_relative_request_values() {
        assert_eq!(VolumeStep::Up.as_request_value(), "+1");
        assert_eq!(VolumeStep::Down.as_request_value(), "-1");
    }

    #[tokio::test]
    async fn volume_state_follows_the_active_zone() {
        let device = device();
        device.cache.prime_terminals(vec![
            zone("extOutput:zone?zone=1", "inactive"),
            zone("extOutput:zone?zone=2", "active"),
        ]);
        device.cache.prime_volumes(vec![
            volume("extOutput:zone?zone=1", 18),
            volume("extOutput:zone?zone=2", 42),
        ]);

        let state = device.get_volume_state().await.unwrap();
        assert_eq!(state.output, "extOutput:zone?zone=2");
        assert_eq!(state.volume, 42);
    }

    #[tokio::test]
    async fn volume_state_prefers_device_wide_entry_without_zones() {
        let device = device();
        device
            .cache
            .prime_terminals(vec![zone("extInput:hdmi?port=1", "")]);
        device
            .cache
            .prime_volumes(vec![volume("", 25), volume("headphone", 5)]);

        let state = device.get_volume_state().await.unwrap();
        assert_eq!(state.output, "");
        assert_eq!(state.volume, 25);
    }

    #[tokio::test]
    async fn unmatched_outputs_are_an_error() {
        let device = device();
        device.cache.prime_terminals(Vec::new());
        device.cache.prime_volumes(vec![volume("headphone", 7)]);

        match device.get_volume_state().await {
            Err(DeviceError::InvalidResponse(_)) => {}
            other => panic!("expected InvalidResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_outputs_is_an_error() {
        let device = device();
        device.cache.prime_terminals(Vec::new());
        device.cache.prime_volumes(Vec::new());

        match device.get_volume_state().await {
            Err(DeviceError::InvalidResponse(_)) => {}
            other => panic!("expected InvalidResponse, got {other:?}"),
        }
    }
}
