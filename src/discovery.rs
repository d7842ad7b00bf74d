use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::sleep;
use url::Url;

use crate::device::SonyDevice;
use crate::error::{DeviceError, Result};
use crate::ssdp::{self, SsdpResponse};

/// SSDP search target answered by devices exposing the Audio Control API
pub const SEARCH_TARGET: &str = "urn:schemas-sony-com:service:ScalarWebAPI:1";

const SEARCH_INTERVAL: Duration = Duration::from_secs(5);
const DESCRIPTION_TIMEOUT: Duration = Duration::from_secs(10);

const IRCC_SERVICE_ID: &str = "urn:schemas-sony-com:serviceId:IRCC";

/// Registry state for one USN
enum DeviceEntry {
    /// Registration is in flight; further responses for this USN are ignored
    Pending,
    Built(Arc<SonyDevice>),
    /// Permanently rejected: wrong search target, structurally incompatible
    /// description, or a failed device probe. Never retried.
    Incompatible,
}

/// Discovery manager for Audio Control API devices
///
/// Searches the local network every five seconds and registers each new
/// responder: the UPnP description document is fetched and parsed, and a
/// [`SonyDevice`] is built from its control endpoints. Devices are
/// deduplicated by USN; incompatible responders are remembered and never
/// probed again for the lifetime of the discoverer.
///
/// # Example
///
/// ```no_run
/// use sony_audio_control::Discoverer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut discoverer = Discoverer::new()?;
///     let mut found = discoverer.subscribe_found();
///     discoverer.start()?;
///
///     let device = found.recv().await?;
///     println!("Found {} at {}", device.name, device.udn);
///
///     discoverer.stop().await;
///     Ok(())
/// }
/// ```
pub struct Discoverer {
    registry: Arc<Mutex<HashMap<String, DeviceEntry>>>,
    last_errors: Arc<Mutex<HashMap<String, String>>>,
    found_tx: Arc<broadcast::Sender<Arc<SonyDevice>>>,
    stop_tx: Option<broadcast::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
    http: reqwest::Client,
}

impl Discoverer {
    pub fn new() -> Result<Self> {
        let (found_tx, _) = broadcast::channel(16);
        let http = reqwest::Client::builder()
            .timeout(DESCRIPTION_TIMEOUT)
            .build()?;
        Ok(Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            last_errors: Arc::new(Mutex::new(HashMap::new())),
            found_tx: Arc::new(found_tx),
            stop_tx: None,
            task_handle: None,
            http,
        })
    }

    /// Subscribe to device-found events. Every successfully registered device
    /// is published exactly once.
    pub fn subscribe_found(&self) -> broadcast::Receiver<Arc<SonyDevice>> {
        self.found_tx.subscribe()
    }

    /// Snapshot of all successfully registered devices
    pub fn devices(&self) -> Vec<Arc<SonyDevice>> {
        let registry = self.registry.lock().unwrap();
        registry
            .values()
            .filter_map(|entry| match entry {
                DeviceEntry::Built(device) => Some(device.clone()),
                _ => None,
            })
            .collect()
    }

    /// Start the periodic multicast search. An already-running discoverer is
    /// restarted; the registry is preserved.
    pub fn start(&mut self) -> Result<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        self.stop_tx = Some(stop_tx);

        let registry = self.registry.clone();
        let last_errors = self.last_errors.clone();
        let found_tx = self.found_tx.clone();
        let http = self.http.clone();

        let handle = tokio::spawn(async move {
            loop {
                run_search_once(&registry, &last_errors, &found_tx, &http).await;
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Discovery stopped");
                        break;
                    }
                    _ = sleep(SEARCH_INTERVAL) => {}
                }
            }
        });
        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the periodic search. In-flight registrations are allowed to
    /// finish; the registry and found-event channel stay usable.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
    }
}

async fn run_search_once(
    registry: &Arc<Mutex<HashMap<String, DeviceEntry>>>,
    last_errors: &Arc<Mutex<HashMap<String, String>>>,
    found_tx: &Arc<broadcast::Sender<Arc<SonyDevice>>>,
    http: &reqwest::Client,
) {
    let responses = match ssdp::search(SEARCH_TARGET).await {
        Ok(responses) => responses,
        Err(e) => {
            tracing::warn!("SSDP search failed: {}", e);
            return;
        }
    };

    for response in responses {
        // The pending marker goes in under the lock, before any asynchronous
        // work, so a duplicate response from the same search burst cannot
        // start a second registration.
        let job = {
            let mut registry = registry.lock().unwrap();
            classify_response(&mut registry, &response)
        };
        if let Some((usn, location)) = job {
            let registry = registry.clone();
            let last_errors = last_errors.clone();
            let found_tx = found_tx.clone();
            let http = http.clone();
            tokio::spawn(async move {
                register(&registry, &last_errors, &found_tx, &http, usn, location).await;
            });
        }
    }
}

/// Apply the registration rules to one search response. Returns the
/// (usn, location) pair when a registration should start; in that case the
/// USN has already been marked pending.
fn classify_response(
    registry: &mut HashMap<String, DeviceEntry>,
    response: &SsdpResponse,
) -> Option<(String, String)> {
    if response.status != 200 {
        return None;
    }
    let (Some(usn), Some(location)) = (response.usn.as_ref(), response.location.as_ref()) else {
        return None;
    };
    if registry.contains_key(usn) {
        return None;
    }

    // A responder advertising a different target answered our search target
    // anyway; remember it so we never look at it again.
    if response.st.as_deref() != Some(SEARCH_TARGET) {
        tracing::debug!(
            "Ignoring {} permanently: unexpected search target {:?}",
            usn,
            response.st
        );
        registry.insert(usn.clone(), DeviceEntry::Incompatible);
        return None;
    }

    let Ok(url) = Url::parse(location) else {
        tracing::debug!("Ignoring response from {} with unparseable location", usn);
        return None;
    };
    // Devices that answer the search but serve no description document
    // advertise a bare "/" location.
    if url.path() == "/" {
        tracing::debug!("Ignoring {} permanently: no description document", usn);
        registry.insert(usn.clone(), DeviceEntry::Incompatible);
        return None;
    }

    registry.insert(usn.clone(), DeviceEntry::Pending);
    Some((usn.clone(), location.clone()))
}

/// Control endpoints and identity extracted from a device description
#[derive(Debug)]
struct DeviceEndpoints {
    base_url: Url,
    ircc_url: Option<Url>,
    udn: String,
    friendly_name: String,
    manufacturer: String,
    model_name: String,
}

async fn register(
    registry: &Arc<Mutex<HashMap<String, DeviceEntry>>>,
    last_errors: &Arc<Mutex<HashMap<String, String>>>,
    found_tx: &Arc<broadcast::Sender<Arc<SonyDevice>>>,
    http: &reqwest::Client,
    usn: String,
    location: String,
) {
    let xml = match fetch_description(http, &location).await {
        Ok(xml) => xml,
        Err(e) => {
            // Transient transport failure: drop the pending marker so the
            // next poll retries, with per-location log flood suppression.
            log_on_change(last_errors, &location, &e.to_string());
            registry.lock().unwrap().remove(&usn);
            return;
        }
    };
    last_errors.lock().unwrap().remove(&location);

    let description_url = match Url::parse(&location) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("Discarding description from {}: {}", location, e);
            registry.lock().unwrap().remove(&usn);
            return;
        }
    };

    let endpoints = match extract_endpoints(&xml, &description_url) {
        Ok(endpoints) => endpoints,
        Err(DeviceError::Xml(e)) => {
            // Malformed XML may be transient (truncated response); retry.
            tracing::warn!("Cannot parse description from {}: {}", location, e);
            registry.lock().unwrap().remove(&usn);
            return;
        }
        Err(e) => {
            // Structurally incompatible description; never retry.
            tracing::info!("Device at {} is not controllable: {}", location, e);
            registry.lock().unwrap().insert(usn, DeviceEntry::Incompatible);
            return;
        }
    };

    match SonyDevice::create(endpoints.base_url, endpoints.ircc_url, endpoints.udn).await {
        Ok(mut device) => {
            if !endpoints.friendly_name.is_empty() {
                device.name = endpoints.friendly_name;
            }
            if !endpoints.manufacturer.is_empty() {
                device.manufacturer = endpoints.manufacturer;
            }
            if !endpoints.model_name.is_empty() {
                device.system_info.model = endpoints.model_name;
            }
            let device = Arc::new(device);
            registry
                .lock()
                .unwrap()
                .insert(usn, DeviceEntry::Built(device.clone()));
            let _ = found_tx.send(device);
        }
        Err(e) => {
            tracing::info!("Device at {} rejected: {}", location, e);
            registry.lock().unwrap().insert(usn, DeviceEntry::Incompatible);
        }
    }
}

async fn fetch_description(http: &reqwest::Client, location: &str) -> Result<String> {
    let response = http.get(location).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

fn log_on_change(
    last_errors: &Arc<Mutex<HashMap<String, String>>>,
    location: &str,
    message: &str,
) {
    let mut errors = last_errors.lock().unwrap();
    let changed = !errors
        .get(location)
        .is_some_and(|previous| previous == message);
    if changed {
        tracing::warn!("Cannot fetch description from {}: {}", location, message);
        errors.insert(location.to_string(), message.to_string());
    }
}

#[derive(Deserialize)]
struct DescriptionRoot {
    device: DeviceDescription,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DeviceDescription {
    #[serde(rename = "friendlyName")]
    friendly_name: String,
    manufacturer: String,
    #[serde(rename = "modelName")]
    model_name: String,
    #[serde(rename = "UDN")]
    udn: String,
    #[serde(rename = "serviceList")]
    service_list: Option<ServiceList>,
    // quick-xml strips namespace prefixes, so the av:-prefixed element
    // arrives under its local name.
    #[serde(rename = "X_ScalarWebAPI_DeviceInfo")]
    scalar_web_api: Option<ScalarWebApiInfo>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ServiceList {
    #[serde(rename = "service")]
    services: Vec<ServiceEntry>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ServiceEntry {
    #[serde(rename = "serviceId")]
    service_id: String,
    #[serde(rename = "controlURL")]
    control_url: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ScalarWebApiInfo {
    #[serde(rename = "X_ScalarWebAPI_BaseURL")]
    base_url: String,
}

/// Pull the control endpoints out of a UPnP description document.
///
/// The vendor-private `av:X_ScalarWebAPI_DeviceInfo` block carries the JSON
/// API base URL; its absence, or a missing base URL or UDN, marks the device
/// as structurally incompatible. A relative IRCC control URL is resolved
/// against the description's own location.
fn extract_endpoints(xml: &str, description_url: &Url) -> Result<DeviceEndpoints> {
    let root: DescriptionRoot = quick_xml::de::from_str(xml)?;
    let device = root.device;

    let api_info = device.scalar_web_api.ok_or_else(|| {
        DeviceError::InvalidResponse("description has no ScalarWebAPI device info".to_string())
    })?;
    if api_info.base_url.is_empty() {
        return Err(DeviceError::InvalidResponse(
            "ScalarWebAPI device info has no base URL".to_string(),
        ));
    }
    if device.udn.is_empty() {
        return Err(DeviceError::InvalidResponse(
            "description has no UDN".to_string(),
        ));
    }
    let base_url = Url::parse(&api_info.base_url)?;

    let ircc_url = device
        .service_list
        .iter()
        .flat_map(|list| &list.services)
        .find(|service| service.service_id == IRCC_SERVICE_ID)
        .filter(|service| !service.control_url.is_empty())
        .map(|service| description_url.join(&service.control_url))
        .transpose()?;

    Ok(DeviceEndpoints {
        base_url,
        ircc_url,
        udn: device.udn,
        friendly_name: device.friendly_name,
        manufacturer: device.manufacturer,
        model_name: device.model_name,
    })
}
