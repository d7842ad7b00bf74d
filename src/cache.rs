use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::ProtocolClient;
use crate::error::Result;
use crate::protocol::ApiRequest;
use crate::types::{
    device_terminal_catalog, SchemeEntry, Terminal, VolumeInfo, SERVICE_AUDIO, SERVICE_AV_CONTENT,
};

/// Lazy per-device cache of terminal topology and volume state.
///
/// Each entry is fetched at most once; the entry mutex is held across the
/// fetch so concurrent first readers share a single in-flight request.
/// Push notifications mutate the cached entries in place; nothing ever
/// invalidates them.
pub struct StateCache {
    client: Arc<ProtocolClient>,
    terminals: Mutex<Option<Vec<Terminal>>>,
    volumes: Mutex<Option<Vec<VolumeInfo>>>,
}

impl StateCache {
    pub fn new(client: Arc<ProtocolClient>) -> Self {
        Self {
            client,
            terminals: Mutex::new(None),
            volumes: Mutex::new(None),
        }
    }

    /// All external terminals of the device: the dynamic list from
    /// `getCurrentExternalTerminalsStatus` merged with the static catalog
    /// entries whose gating scheme the device reports supporting.
    pub async fn terminals(&self) -> Result<Vec<Terminal>> {
        let mut cached = self.terminals.lock().await;
        if let Some(terminals) = cached.as_ref() {
            return Ok(terminals.clone());
        }

        let response = self
            .client
            .call(SERVICE_AV_CONTENT, &ApiRequest::external_terminals_status())
            .await?;
        let dynamic: Vec<Terminal> = response.first_result()?;
        let schemes = self.schemes().await?;
        let merged = merge_catalog_terminals(dynamic, &schemes);

        *cached = Some(merged.clone());
        Ok(merged)
    }

    /// Volume and mute state for every output, fetched once and then kept
    /// current by volume notifications.
    pub async fn volume_info(&self) -> Result<Vec<VolumeInfo>> {
        let mut cached = self.volumes.lock().await;
        if let Some(volumes) = cached.as_ref() {
            return Ok(volumes.clone());
        }

        let response = self
            .client
            .call(SERVICE_AUDIO, &ApiRequest::volume_information())
            .await?;
        let volumes: Vec<VolumeInfo> = response.first_result()?;

        *cached = Some(volumes.clone());
        Ok(volumes)
    }

    /// Terminals that are inputs
    pub async fn inputs(&self) -> Result<Vec<Terminal>> {
        Ok(self
            .terminals()
            .await?
            .into_iter()
            .filter(|t| !t.is_output())
            .collect())
    }

    /// Terminals that are zones, i.e. outputs
    pub async fn zones(&self) -> Result<Vec<Terminal>> {
        Ok(self
            .terminals()
            .await?
            .into_iter()
            .filter(Terminal::is_output)
            .collect())
    }

    /// The zone terminal currently marked active. `None` means the device
    /// has a single implicit zone with no explicit output terminals.
    pub async fn active_zone(&self) -> Result<Option<Terminal>> {
        Ok(self.zones().await?.into_iter().find(Terminal::is_active))
    }

    /// Find a terminal by the source URI reported in a playing-content
    /// notification.
    pub async fn terminal_by_source(&self, source: &str) -> Result<Option<Terminal>> {
        Ok(self
            .terminals()
            .await?
            .into_iter()
            .find(|t| t.uri == source))
    }

    /// Upsert one volume entry from a `notifyVolumeInformation` push.
    /// Seeds the cache when no fetch has happened yet, so the pushed value is
    /// visible to later reads without a redundant network call.
    pub async fn apply_volume_update(&self, update: &VolumeInfo) {
        let mut cached = self.volumes.lock().await;
        match cached.as_mut() {
            Some(volumes) => {
                if let Some(entry) = volumes.iter_mut().find(|v| v.output == update.output) {
                    *entry = update.clone();
                } else {
                    volumes.push(update.clone());
                }
            }
            None => *cached = Some(vec![update.clone()]),
        }
    }

    /// Upsert terminals from a `notifyExternalTerminalStatus` push. Only an
    /// already-populated cache is touched; seeding from a notification would
    /// bypass the static-catalog merge.
    pub async fn apply_terminal_updates(&self, updates: Vec<Terminal>) {
        let mut cached = self.terminals.lock().await;
        if let Some(terminals) = cached.as_mut() {
            for update in updates {
                if let Some(entry) = terminals.iter_mut().find(|t| t.uri == update.uri) {
                    *entry = update;
                } else {
                    terminals.push(update);
                }
            }
        }
    }

    async fn schemes(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .call(SERVICE_AV_CONTENT, &ApiRequest::scheme_list())
            .await?;
        let entries: Vec<SchemeEntry> = response.first_result()?;
        Ok(entries.into_iter().map(|e| e.scheme).collect())
    }

    #[cfg(test)]
    pub(crate) fn prime_terminals(&self, terminals: Vec<Terminal>) {
        *self.terminals.try_lock().unwrap() = Some(terminals);
    }

    #[cfg(test)]
    pub(crate) fn prime_volumes(&self, volumes: Vec<VolumeInfo>) {
        *self.volumes.try_lock().unwrap() = Some(volumes);
    }
}

/// Union of the device-reported terminals with the static catalog: read-only
/// catalog entries are added only when their scheme is supported, the rest
/// unconditionally.
fn merge_catalog_terminals(mut terminals: Vec<Terminal>, schemes: &[String]) -> Vec<Terminal> {
    for entry in device_terminal_catalog() {
        if entry.readonly {
            if schemes.iter().any(|s| s == entry.scheme) {
                terminals.push(entry.terminal);
            }
        } else {
            terminals.push(entry.terminal);
        }
    }
    terminals
}

/// True iff the terminal matches a static catalog URI the user cannot select
/// directly. The catalog flag has an inverted sense: `readonly == false`
/// literally means "cannot be selected", and that polarity is preserved here.
pub fn is_readonly_terminal(terminal: &Terminal) -> bool {
    device_terminal_catalog()
        .iter()
        .any(|entry| !entry.readonly && entry.terminal.uri == terminal.uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn cache() -> StateCache {
        // Points at nothing routable; tests that would hit the network fail
        // with a transport error instead of passing.
        let base = Url::parse("http://192.0.2.1:10000/sony").unwrap();
        let client = ProtocolClient::new(base, None).unwrap();
        StateCache::new(Arc::new(client))
    }

    fn terminal(uri: &str, active: &str) -> Terminal {
        Terminal {
            active: active.to_string(),
            connection: "connected".to_string(),
            icon_url: String::new(),
            label: String::new(),
            meta: String::new(),
            outputs: Vec::new(),
            title: String::new(),
            uri: uri.to_string(),
        }
    }

    #[test]
    fn catalog_merge_gates_readonly_entries_on_scheme_support() {
        let dynamic = vec![terminal("extInput:hdmi?port=1", "")];
        let schemes = vec!["extInput".to_string(), "dlna".to_string()];
        let merged = merge_catalog_terminals(dynamic, &schemes);

        let uris: Vec<&str> = merged.iter().map(|t| t.uri.as_str()).collect();
        // dlna is readonly and supported; storage/radio are readonly and not
        // supported; the four non-readonly entries are always present.
        assert!(uris.contains(&"dlna:music"));
        assert!(!uris.contains(&"storage:usb1"));
        assert!(!uris.contains(&"radio:fm"));
        assert!(uris.contains(&"netService:audio"));
        assert!(uris.contains(&"multiroom:audio"));
        assert!(uris.contains(&"cast:audio"));
        assert!(uris.contains(&"extInput:airPlay"));
    }

    #[test]
    fn readonly_means_not_selectable_in_the_catalog_sense() {
        assert!(is_readonly_terminal(&terminal("netService:audio", "")));
        assert!(is_readonly_terminal(&terminal("cast:audio", "")));
        // Entries with readonly == true in the catalog are selectable.
        assert!(!is_readonly_terminal(&terminal("dlna:music", "")));
        // Dynamic terminals never match the catalog.
        assert!(!is_readonly_terminal(&terminal("extInput:hdmi?port=1", "")));
    }

    #[tokio::test]
    async fn cached_terminals_are_served_without_a_second_fetch() {
        let cache = cache();
        cache.prime_terminals(vec![
            terminal("extInput:hdmi?port=1", ""),
            terminal("extOutput:zone?zone=1", "active"),
        ]);

        // Both calls must come from the cache; a fetch attempt would error on
        // the unroutable address.
        let first = cache.terminals().await.unwrap();
        let second = cache.terminals().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn zone_views_partition_by_output_convention() {
        let cache = cache();
        cache.prime_terminals(vec![
            terminal("extInput:hdmi?port=1", ""),
            terminal("extOutput:zone?zone=1", "inactive"),
            terminal("extOutput:zone?zone=2", "active"),
        ]);

        let inputs = cache.inputs().await.unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].uri, "extInput:hdmi?port=1");

        let zones = cache.zones().await.unwrap();
        assert_eq!(zones.len(), 2);

        let active = cache.active_zone().await.unwrap().unwrap();
        assert_eq!(active.uri, "extOutput:zone?zone=2");
    }

    #[tokio::test]
    async fn active_zone_is_none_without_output_terminals() {
        let cache = cache();
        cache.prime_terminals(vec![terminal("extInput:hdmi?port=1", "active")]);
        assert!(cache.active_zone().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn volume_notification_seeds_an_unpopulated_cache() {
        let cache = cache();
        let update = VolumeInfo {
            output: "extOutput:zone?zone=1".to_string(),
            volume: 20,
            mute: "off".to_string(),
            ..Default::default()
        };
        cache.apply_volume_update(&update).await;

        // Served from the seeded cache, no network fetch.
        let volumes = cache.volume_info().await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].volume, 20);
    }

    #[tokio::test]
    async fn volume_notification_updates_matching_output_in_place() {
        let cache = cache();
        cache.prime_volumes(vec![
            VolumeInfo {
                output: "extOutput:zone?zone=1".to_string(),
                volume: 10,
                ..Default::default()
            },
            VolumeInfo {
                output: "extOutput:zone?zone=2".to_string(),
                volume: 30,
                ..Default::default()
            },
        ]);

        cache
            .apply_volume_update(&VolumeInfo {
                output: "extOutput:zone?zone=1".to_string(),
                volume: 25,
                ..Default::default()
            })
            .await;

        let volumes = cache.volume_info().await.unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].volume, 25);
        assert_eq!(volumes[1].volume, 30);
    }

    #[tokio::test]
    async fn terminal_notification_upserts_into_populated_cache() {
        let cache = cache();
        cache.prime_terminals(vec![terminal("extOutput:zone?zone=1", "inactive")]);

        cache
            .apply_terminal_updates(vec![
                terminal("extOutput:zone?zone=1", "active"),
                terminal("extInput:hdmi?port=3", ""),
            ])
            .await;

        let terminals = cache.terminals().await.unwrap();
        assert_eq!(terminals.len(), 2);
        assert_eq!(terminals[0].active, "active");
        assert_eq!(terminals[1].uri, "extInput:hdmi?port=3");
    }

    #[tokio::test]
    async fn terminal_notification_is_dropped_before_first_fetch() {
        let cache = cache();
        cache
            .apply_terminal_updates(vec![terminal("extOutput:zone?zone=1", "active")])
            .await;
        // The cache stays unpopulated; the next terminals() call would fetch.
        assert!(cache.terminals.try_lock().unwrap().is_none());
    }
}
