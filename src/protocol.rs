use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{DeviceError, Result};
use crate::types::{PlayingContentInfo, PowerStatus, Terminal, VolumeInfo};

/// Notification method names pushed by devices over the notification socket
pub const NOTIFY_POWER: &str = "notifyPowerStatus";
pub const NOTIFY_VOLUME: &str = "notifyVolumeInformation";
pub const NOTIFY_TERMINAL: &str = "notifyExternalTerminalStatus";
pub const NOTIFY_CONTENT: &str = "notifyPlayingContentInfo";

/// A versioned JSON request to one of the device's API services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
    pub version: String,
}

impl ApiRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value, version: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            version: version.into(),
        }
    }

    /// `getSupportedApiInfo`: fetches the service/method/version matrix (`guide` service)
    pub fn supported_api_info() -> Self {
        Self::new(5, "getSupportedApiInfo", json!([{ "services": null }]), "1.0")
    }

    /// `getInterfaceInformation`: product category and interface version (`system` service)
    pub fn interface_information() -> Self {
        Self::new(33, "getInterfaceInformation", json!([]), "1.0")
    }

    /// `getSystemInformation`: identity fields for the device (`system` service)
    pub fn system_information() -> Self {
        Self::new(65, "getSystemInformation", json!([]), "1.4")
    }

    /// `getPowerStatus` (`system` service)
    pub fn power_status() -> Self {
        Self::new(50, "getPowerStatus", json!([]), "1.1")
    }

    /// `getVolumeInformation`: volume and mute for every output (`audio` service)
    pub fn volume_information() -> Self {
        Self::new(33, "getVolumeInformation", json!([{}]), "1.1")
    }

    /// `getCurrentExternalTerminalsStatus` (`avContent` service)
    pub fn external_terminals_status() -> Self {
        Self::new(66, "getCurrentExternalTerminalsStatus", json!([]), "1.0")
    }

    /// `getSchemeList`: URI schemes the device can handle (`avContent` service)
    pub fn scheme_list() -> Self {
        Self::new(1, "getSchemeList", json!([]), "1.0")
    }

    /// `getPlayingContentInfo` for one output, or all outputs when `output` is `None`
    /// (`avContent` service)
    pub fn playing_content_info(output: Option<&str>) -> Self {
        let params = match output {
            Some(uri) => json!([{ "output": uri }]),
            None => json!([{}]),
        };
        Self::new(37, "getPlayingContentInfo", params, "1.2")
    }

    /// `setAudioVolume` with a relative step; `output` of `""` affects all outputs
    /// (`audio` service)
    pub fn set_audio_volume(output: &str, volume: &str) -> Self {
        Self::new(
            98,
            "setAudioVolume",
            json!([{ "output": output, "volume": volume }]),
            "1.1",
        )
    }

    /// `setPowerStatus` (`system` service)
    pub fn set_power_status(active: bool) -> Self {
        let status = if active { "active" } else { "off" };
        Self::new(55, "setPowerStatus", json!([{ "status": status }]), "1.1")
    }

    /// `setAudioMute`; the output field is omitted when no zone is targeted
    /// (`audio` service)
    pub fn set_audio_mute(mute: bool, output: Option<&str>) -> Self {
        let mute = if mute { "on" } else { "off" };
        let params = match output {
            Some(uri) => json!([{ "mute": mute, "output": uri }]),
            None => json!([{ "mute": mute }]),
        };
        Self::new(601, "setAudioMute", params, "1.1")
    }

    /// `setPlayContent`: selects the playing content or active input
    /// (`avContent` service)
    pub fn set_play_content(uri: &str, output: Option<&str>) -> Self {
        let params = match output {
            Some(zone) => json!([{ "uri": uri, "output": zone }]),
            None => json!([{ "uri": uri }]),
        };
        Self::new(47, "setPlayContent", params, "1.2")
    }

    /// `pausePlayingContent` (`avContent` service)
    pub fn pause_playing_content(output: Option<&str>) -> Self {
        let params = match output {
            Some(uri) => json!([{ "output": uri }]),
            None => json!([{}]),
        };
        Self::new(31, "pausePlayingContent", params, "1.1")
    }

    /// `switchNotifications`: subscription management over the notification socket.
    /// An empty request with id 1 probes the device's current notification
    /// partition; id 2 applies the computed enable/disable sets.
    pub fn switch_notifications(
        id: u64,
        disabled: &[ApiNotification],
        enabled: &[ApiNotification],
    ) -> Self {
        Self::new(
            id,
            "switchNotifications",
            json!([{ "disabled": disabled, "enabled": enabled }]),
            "1.0",
        )
    }
}

/// A response from the device: either `{id, result}` or `{id, error}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ApiResponse {
    /// Convert a device-reported `error` field into [`DeviceError::Api`].
    /// The field is `[code, message]` on conforming devices; anything else is
    /// reported verbatim with the default code 1.
    pub fn into_result(self) -> Result<ApiResponse> {
        match &self.error {
            None => Ok(self),
            Some(err) => {
                let code = err
                    .get(0)
                    .and_then(Value::as_i64)
                    .unwrap_or(1);
                let message = match err.get(1).and_then(Value::as_str) {
                    Some(text) => text.to_string(),
                    None => format!("device API got an error: {err}"),
                };
                Err(DeviceError::Api { code, message })
            }
        }
    }

    /// Deserialize `result[0]`, the payload slot used by every query this
    /// crate sends.
    pub fn first_result<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .result
            .as_ref()
            .and_then(|r| r.get(0))
            .ok_or_else(|| DeviceError::InvalidResponse("missing result[0]".to_string()))?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// One notification name/version pair as exchanged in `switchNotifications`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiNotification {
    pub name: String,
    pub version: String,
}

/// The device's current partition of its notifications, reported in the
/// response to a `switchNotifications` probe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationSets {
    #[serde(default)]
    pub enabled: Vec<ApiNotification>,
    #[serde(default)]
    pub disabled: Vec<ApiNotification>,
    #[serde(default)]
    pub rejected: Vec<ApiNotification>,
    #[serde(default)]
    pub unsupported: Vec<ApiNotification>,
}

/// A push notification, decoded by its method name
#[derive(Debug, Clone)]
pub enum Notification {
    Power(PowerStatus),
    Volume(VolumeInfo),
    PlayingContent(PlayingContentInfo),
    Terminals(Vec<Terminal>),
    /// A method this crate does not implement; logged and otherwise ignored
    Unrecognized { method: String },
}

impl Notification {
    /// Decode a notification payload `{method, params, version}`.
    /// The method name determines the true shape of `params`.
    pub fn from_value(value: &Value) -> Result<Notification> {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| DeviceError::InvalidResponse("notification without method".to_string()))?;
        let params = value.get("params").cloned().unwrap_or_else(|| json!([]));

        let first = || -> Result<Value> {
            params
                .get(0)
                .cloned()
                .ok_or_else(|| DeviceError::InvalidResponse(format!("{method} without params[0]")))
        };

        match method {
            NOTIFY_POWER => Ok(Notification::Power(serde_json::from_value(first()?)?)),
            NOTIFY_VOLUME => Ok(Notification::Volume(serde_json::from_value(first()?)?)),
            NOTIFY_CONTENT => Ok(Notification::PlayingContent(serde_json::from_value(first()?)?)),
            NOTIFY_TERMINAL => Ok(Notification::Terminals(serde_json::from_value(params)?)),
            _ => Ok(Notification::Unrecognized {
                method: method.to_string(),
            }),
        }
    }
}
