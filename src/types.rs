use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// API service names exposed by the device's control endpoint
pub const SERVICE_SYSTEM: &str = "system";
pub const SERVICE_AUDIO: &str = "audio";
pub const SERVICE_AV_CONTENT: &str = "avContent";
pub const SERVICE_GUIDE: &str = "guide";

/// Product categories this crate supports
pub(crate) const COMPATIBLE_DEVICE_CATEGORIES: &[&str] = &["homeTheaterSystem", "personalAudio"];

/// URI prefix identifying output (zone) terminals
const EXT_OUTPUT_PREFIX: &str = "extOutput:";

fn neg_one() -> i64 {
    -1
}

/// General system information for a device, fetched once at creation.
/// The name/model fields may later be overridden by values found in the
/// discovery description document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInfo {
    /// Product name for the device, or "" if not available
    pub name: String,
    /// Unique name of the product model
    pub model: String,
    /// Device category
    pub product: String,
    /// Serial number, or "" if not available
    pub serial: String,
    /// Ethernet MAC address, or "" if not available
    pub mac_addr: String,
    /// Wireless MAC address, or "" if undefined
    pub wireless_mac_addr: String,
    /// Bluetooth address
    pub bd_addr: String,
    /// General device ID
    #[serde(rename = "deviceID")]
    pub device_id: String,
    /// Generation number as an X.Y.Z value
    pub generation: String,
    /// Firmware version information
    pub version: String,
    /// Country code (ISO 3166-1 alpha-3)
    pub area: String,
    /// Sales region (ISO 3166-1 alpha-3)
    pub region: String,
    /// Language code (ISO 3166-1 alpha-3)
    pub language: String,
    /// Network SSID the device is connected to
    pub ssid: String,
}

impl SystemInfo {
    /// Stable identifier for the device: serial number when present, falling
    /// back to the Ethernet and then the wireless MAC address.
    pub fn unique_id(&self) -> &str {
        if !self.serial.is_empty() {
            &self.serial
        } else if !self.mac_addr.is_empty() {
            &self.mac_addr
        } else {
            &self.wireless_mac_addr
        }
    }
}

/// Information returned by `getInterfaceInformation`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfaceInfo {
    pub interface_version: String,
    pub model_name: String,
    pub product_category: String,
    pub product_name: String,
    pub server_name: String,
}

impl InterfaceInfo {
    pub(crate) fn is_compatible_category(&self) -> bool {
        COMPATIBLE_DEVICE_CATEGORIES.contains(&self.product_category.as_str())
    }
}

/// One entry of the `getSupportedApiInfo` response: a service and the
/// methods/versions it supports
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceApiInfo {
    pub service: String,
    #[serde(default)]
    pub apis: Vec<ApiMethodInfo>,
    #[serde(default)]
    pub notifications: Vec<ApiMethodInfo>,
    #[serde(default)]
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMethodInfo {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<ApiVersionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiVersionInfo {
    #[serde(default)]
    pub version: String,
}

/// Mapping service → method → supported versions, populated once at device
/// creation and consulted before every outgoing request
#[derive(Debug, Clone, Default)]
pub struct CapabilityMatrix {
    services: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl CapabilityMatrix {
    pub fn from_api_info(infos: &[ServiceApiInfo]) -> Self {
        let mut services = HashMap::new();
        for info in infos {
            let methods: &mut HashMap<String, HashSet<String>> =
                services.entry(info.service.clone()).or_default();
            for api in &info.apis {
                let versions = methods.entry(api.name.clone()).or_default();
                versions.extend(api.versions.iter().map(|v| v.version.clone()));
            }
        }
        Self { services }
    }

    /// True iff the device reported support for this method/version pair
    /// on the given service.
    pub fn supports(&self, service: &str, method: &str, version: &str) -> bool {
        self.services
            .get(service)
            .and_then(|methods| methods.get(method))
            .is_some_and(|versions| versions.contains(version))
    }
}

/// The device power status as reported by `getPowerStatus` and
/// `notifyPowerStatus`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PowerStatus {
    /// One of `activating`, `active`, `standby`, `shuttingDown`
    pub status: String,
    /// Additional detail for the standby state, or ""
    pub standby_detail: String,
}

impl PowerStatus {
    /// The device counts as powered on while activating or active.
    pub fn is_on(&self) -> bool {
        self.status == "activating" || self.status == "active"
    }
}

/// One external input or output terminal of the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Terminal {
    /// `active`, `inactive`, or "" when the status could not be determined.
    /// For `meta:zone:output` terminals this means the zone is enabled; for
    /// all others it means the terminal is a selected input source.
    #[serde(default)]
    pub active: String,
    /// `connected`, `unconnected`, or `unknown`
    #[serde(default)]
    pub connection: String,
    #[serde(default)]
    pub icon_url: String,
    /// Label the user assigned to the terminal
    #[serde(default)]
    pub label: String,
    /// Semantic type tag in `meta:` URI form, e.g. `meta:hdmi`
    #[serde(default)]
    pub meta: String,
    /// For inputs, the URIs of the output terminals it can route to
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Human-readable terminal name, e.g. `HDMI 2`
    #[serde(default)]
    pub title: String,
    /// Stable terminal identifier, e.g. `extInput:hdmi?port=2`
    pub uri: String,
}

impl Terminal {
    pub fn is_active(&self) -> bool {
        self.active == "active"
    }

    /// Output terminals (zones) follow the `extOutput:` naming convention.
    pub fn is_output(&self) -> bool {
        self.uri.starts_with(EXT_OUTPUT_PREFIX)
    }
}

/// Per-output volume and mute state. The -1/-1/0 sentinel values mean the
/// device does not support absolute volume on that output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeInfo {
    pub max_volume: i64,
    pub min_volume: i64,
    /// `on`, `off`, `toggle`, or "" when unknown
    pub mute: String,
    /// Output URI; "" refers to all outputs of the device
    pub output: String,
    pub step: i64,
    pub volume: i64,
}

impl Default for VolumeInfo {
    fn default() -> Self {
        Self {
            max_volume: neg_one(),
            min_volume: neg_one(),
            mute: String::new(),
            output: String::new(),
            step: 0,
            volume: neg_one(),
        }
    }
}

/// Playing content or selected input, as reported by `getPlayingContentInfo`
/// and `notifyPlayingContentInfo`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayingContentInfo {
    /// Base URI of the content source, or "" if undefined
    pub source: String,
    /// Full URI of the playing content
    pub uri: String,
    /// Output the content plays on, when scoped to one zone
    pub output: String,
}

impl PlayingContentInfo {
    /// Source URI with the generic URI field as fallback.
    pub fn source_uri(&self) -> &str {
        if !self.source.is_empty() {
            &self.source
        } else {
            &self.uri
        }
    }
}

/// One entry of the `getSchemeList` response
#[derive(Debug, Clone, Deserialize)]
pub struct SchemeEntry {
    pub scheme: String,
}

/// A virtual terminal that never appears in the device's own terminal-status
/// query, gated on the URI schemes the device reports supporting
#[derive(Debug, Clone)]
pub struct CatalogTerminal {
    /// Gating scheme from `getSchemeList`
    pub scheme: &'static str,
    /// If `false`, the user cannot directly select this device resource URI.
    /// The inverted sense relative to the name is deliberate and load-bearing
    /// for [`crate::cache::is_readonly_terminal`].
    pub readonly: bool,
    pub terminal: Terminal,
}

fn catalog_entry(
    scheme: &'static str,
    readonly: bool,
    title: &str,
    uri: &str,
    meta: &str,
) -> CatalogTerminal {
    CatalogTerminal {
        scheme,
        readonly,
        terminal: Terminal {
            active: String::new(),
            connection: "connected".to_string(),
            icon_url: String::new(),
            label: String::new(),
            meta: meta.to_string(),
            outputs: Vec::new(),
            title: title.to_string(),
            uri: uri.to_string(),
        },
    }
}

/// The fixed catalog of virtual terminals missing from
/// `getCurrentExternalTerminalsStatus`.
pub(crate) fn device_terminal_catalog() -> Vec<CatalogTerminal> {
    vec![
        catalog_entry("dlna", true, "DLNA Music", "dlna:music", "meta:pc"),
        catalog_entry("storage", true, "USB Storage", "storage:usb1", "meta:usbdac"),
        catalog_entry("radio", true, "FM Radio", "radio:fm", "meta:tuner"),
        catalog_entry("netService", false, "Audio Network", "netService:audio", "meta:source"),
        catalog_entry("multiroom", false, "Multiroom Audio", "multiroom:audio", "meta:source"),
        catalog_entry("cast", false, "Cast Audio", "cast:audio", "meta:source"),
        catalog_entry("extInput", false, "AirPlay", "extInput:airPlay", "meta:btaudio"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_matrix_supports_reported_pairs() {
        let infos: Vec<ServiceApiInfo> = serde_json::from_value(serde_json::json!([
            {
                "service": "system",
                "apis": [
                    { "name": "getSystemInformation", "versions": [{ "version": "1.4" }] },
                    { "name": "getPowerStatus", "versions": [{ "version": "1.1" }, { "version": "1.2" }] }
                ],
                "notifications": [],
                "protocols": ["websocket:jsonizer"]
            }
        ]))
        .unwrap();

        let matrix = CapabilityMatrix::from_api_info(&infos);
        assert!(matrix.supports("system", "getSystemInformation", "1.4"));
        assert!(matrix.supports("system", "getPowerStatus", "1.2"));
        assert!(!matrix.supports("system", "getSystemInformation", "1.0"));
        assert!(!matrix.supports("audio", "getSystemInformation", "1.4"));
    }

    #[test]
    fn unique_id_falls_back_through_mac_addresses() {
        let mut info = SystemInfo {
            serial: "S12345".to_string(),
            mac_addr: "00:11:22:33:44:55".to_string(),
            wireless_mac_addr: "66:77:88:99:aa:bb".to_string(),
            ..Default::default()
        };
        assert_eq!(info.unique_id(), "S12345");

        info.serial.clear();
        assert_eq!(info.unique_id(), "00:11:22:33:44:55");

        info.mac_addr.clear();
        assert_eq!(info.unique_id(), "66:77:88:99:aa:bb");
    }

    #[test]
    fn power_is_on_for_activating_and_active() {
        for (status, expected) in [
            ("activating", true),
            ("active", true),
            ("standby", false),
            ("shuttingDown", false),
            ("", false),
        ] {
            let power = PowerStatus {
                status: status.to_string(),
                standby_detail: String::new(),
            };
            assert_eq!(power.is_on(), expected, "status {status:?}");
        }
    }

    #[test]
    fn zone_terminals_follow_ext_output_convention() {
        let zone = Terminal {
            uri: "extOutput:zone?zone=1".to_string(),
            ..volume_test_terminal()
        };
        let input = Terminal {
            uri: "extInput:hdmi?port=1".to_string(),
            ..volume_test_terminal()
        };
        assert!(zone.is_output());
        assert!(!input.is_output());
    }

    fn volume_test_terminal() -> Terminal {
        Terminal {
            active: String::new(),
            connection: "connected".to_string(),
            icon_url: String::new(),
            label: String::new(),
            meta: String::new(),
            outputs: Vec::new(),
            title: String::new(),
            uri: String::new(),
        }
    }

    #[test]
    fn volume_info_defaults_to_sentinels() {
        let info: VolumeInfo = serde_json::from_str(r#"{"output": "extOutput:zone?zone=1"}"#).unwrap();
        assert_eq!(info.volume, -1);
        assert_eq!(info.min_volume, -1);
        assert_eq!(info.max_volume, -1);
        assert_eq!(info.step, 0);
    }
}
