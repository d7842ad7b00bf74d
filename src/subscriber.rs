use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use url::Url;

use crate::cache::StateCache;
use crate::error::{DeviceError, Result};
use crate::protocol::{
    ApiNotification, ApiRequest, Notification, NotificationSets, NOTIFY_CONTENT, NOTIFY_POWER,
    NOTIFY_TERMINAL, NOTIFY_VOLUME,
};
use crate::subscription::DeviceEvent;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Reserved request ids on the notification socket: id 1 probes the device's
/// current notification partition, id 2 applies the computed sets.
const PROBE_REQUEST_ID: u64 = 1;
const SUBSCRIBE_REQUEST_ID: u64 = 2;

/// One logical notification group: a service name (which doubles as the
/// WebSocket endpoint name) and the notifications wanted from it
pub(crate) struct ServiceGroup {
    pub service: &'static str,
    pub notifications: &'static [&'static str],
}

pub(crate) const SUBSCRIBE_NOTIFICATIONS: &[ServiceGroup] = &[
    ServiceGroup {
        service: "system",
        notifications: &[NOTIFY_POWER],
    },
    ServiceGroup {
        service: "audio",
        notifications: &[NOTIFY_VOLUME],
    },
    ServiceGroup {
        service: "avContent",
        notifications: &[NOTIFY_TERMINAL, NOTIFY_CONTENT],
    },
];

/// How a connection attempt ended
#[derive(Debug, PartialEq, Eq)]
enum CloseReason {
    /// Normal closure; the subscriber is done
    Normal,
    /// Anything else; schedule one reconnect after the fixed delay
    Abnormal,
}

/// Only a close frame carrying the normal code ends the subscription for
/// good; any other code, and a close without a frame, gets one reconnect.
fn close_reason(frame: Option<&CloseFrame<'_>>) -> CloseReason {
    if frame.is_some_and(|f| f.code == CloseCode::Normal) {
        CloseReason::Normal
    } else {
        CloseReason::Abnormal
    }
}

/// An inbound message on the notification socket, classified by its id field
#[derive(Debug)]
enum Inbound {
    /// Response to the id=1 capability probe
    Probe(NotificationSets),
    /// Echo of some other subscription-management request; logged only
    Echo(u64),
    /// A live push notification
    Push(Notification),
}

/// Owns one WebSocket per (device, service) and keeps the subscription alive.
///
/// Runs the two-phase subscribe handshake on every (re)connect: an empty
/// `switchNotifications` probe discovers the device's current partition of
/// notifications, then a second request moves the desired names from the
/// disabled set to the enabled set. Desired names the device never offered
/// (rejected, unsupported, or missing entirely) are left untouched; device
/// models differ in which notification types they carry.
pub(crate) struct NotificationSubscriber {
    device_name: String,
    service: &'static str,
    desired: &'static [&'static str],
    url: Url,
    cache: Arc<StateCache>,
    events: broadcast::Sender<DeviceEvent>,
}

impl NotificationSubscriber {
    pub fn spawn(
        device_name: String,
        group: &'static ServiceGroup,
        url: Url,
        cache: Arc<StateCache>,
        events: broadcast::Sender<DeviceEvent>,
        stop_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let subscriber = Self {
            device_name,
            service: group.service,
            desired: group.notifications,
            url,
            cache,
            events,
        };
        tokio::spawn(subscriber.run(stop_rx))
    }

    async fn run(self, mut stop_rx: broadcast::Receiver<()>) {
        loop {
            match self.connect_once(&mut stop_rx).await {
                Ok(CloseReason::Normal) => {
                    tracing::debug!(
                        "Device {} socket for {} closed",
                        self.device_name,
                        self.service
                    );
                    break;
                }
                Ok(CloseReason::Abnormal) => {
                    tracing::debug!(
                        "Device {} lost connection on {}, reconnecting...",
                        self.device_name,
                        self.service
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Device {} subscription to {} failed: {}",
                        self.device_name,
                        self.service,
                        e
                    );
                }
            }

            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    /// One connection lifetime: open, probe, subscribe, dispatch until close.
    async fn connect_once(
        &self,
        stop_rx: &mut broadcast::Receiver<()>,
    ) -> Result<CloseReason> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        tracing::debug!(
            "Device {} opened a socket {}",
            self.device_name,
            self.url
        );
        let (mut write, mut read) = ws.split();

        // Empty probe: the response carries the device's full current
        // partition into enabled/disabled/rejected/unsupported.
        let probe = ApiRequest::switch_notifications(PROBE_REQUEST_ID, &[], &[]);
        write
            .send(Message::Text(serde_json::to_string(&probe)?))
            .await?;

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    // Advisory disable-all, then a clean close so the close
                    // handler never schedules a reconnect.
                    let bye = ApiRequest::switch_notifications(PROBE_REQUEST_ID, &[], &[]);
                    if let Ok(text) = serde_json::to_string(&bye) {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        })))
                        .await;
                    return Ok(CloseReason::Normal);
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_message(&text, &mut write).await {
                            tracing::error!(
                                "Device {} error handling {} message: {}",
                                self.device_name,
                                self.service,
                                e
                            );
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(close_reason(frame.as_ref()));
                    }
                    Some(Err(e)) => {
                        // A transport error alone does not force a reconnect;
                        // the stream ending or a close frame decides that.
                        tracing::error!(
                            "Device {} has a communication error: {}",
                            self.device_name,
                            e
                        );
                    }
                    None => return Ok(CloseReason::Abnormal),
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    async fn handle_message<S>(&self, text: &str, write: &mut S) -> Result<()>
    where
        S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let value: Value = serde_json::from_str(text)?;
        match classify_inbound(&value)? {
            Inbound::Probe(sets) => {
                tracing::debug!(
                    "Device {} received initial {} message {}",
                    self.device_name,
                    self.service,
                    text
                );
                let plan = plan_subscription(self.desired, sets.enabled, sets.disabled);
                for name in &plan.missing {
                    tracing::debug!(
                        "Device {} has no notifier {} in the disabled set for {}",
                        self.device_name,
                        name,
                        self.service
                    );
                }
                let request = ApiRequest::switch_notifications(
                    SUBSCRIBE_REQUEST_ID,
                    &plan.disabled,
                    &plan.enabled,
                );
                tracing::debug!(
                    "Device {} sent subscribe message {}",
                    self.device_name,
                    serde_json::to_string(&request)?
                );
                write
                    .send(Message::Text(serde_json::to_string(&request)?))
                    .await?;
            }
            Inbound::Echo(id) => {
                tracing::debug!(
                    "Device {} received subscription status (id {}) {}",
                    self.device_name,
                    id,
                    text
                );
            }
            Inbound::Push(notification) => {
                tracing::debug!(
                    "Device {} received notification {}",
                    self.device_name,
                    text
                );
                self.dispatch(notification).await;
            }
        }
        Ok(())
    }

    /// Apply one push notification: mutate the cache, emit typed events.
    async fn dispatch(&self, notification: Notification) {
        match notification {
            Notification::Power(status) => {
                let _ = self.events.send(DeviceEvent::Power(status.is_on()));
            }
            Notification::Volume(info) => {
                self.cache.apply_volume_update(&info).await;
                if info.volume != -1 {
                    let _ = self.events.send(DeviceEvent::Volume(info.volume));
                }
                match info.mute.as_str() {
                    "on" => {
                        let _ = self.events.send(DeviceEvent::Mute(true));
                    }
                    "off" => {
                        let _ = self.events.send(DeviceEvent::Mute(false));
                    }
                    _ => {}
                }
            }
            Notification::PlayingContent(info) => {
                let _ = self
                    .events
                    .send(DeviceEvent::Source(info.source_uri().to_string()));
            }
            Notification::Terminals(terminals) => {
                self.cache.apply_terminal_updates(terminals).await;
            }
            Notification::Unrecognized { method } => {
                tracing::error!(
                    "Device {} sent a notification this crate does not implement: {}",
                    self.device_name,
                    method
                );
            }
        }
    }
}

/// Classify an inbound socket message: anything with a numeric id is a
/// subscription-management response, anything without one is a live
/// notification.
fn classify_inbound(value: &Value) -> Result<Inbound> {
    match value.get("id").and_then(Value::as_u64) {
        Some(PROBE_REQUEST_ID) => {
            let sets = value
                .get("result")
                .and_then(|r| r.get(0))
                .cloned()
                .ok_or_else(|| {
                    DeviceError::InvalidResponse("probe response without result[0]".to_string())
                })?;
            Ok(Inbound::Probe(serde_json::from_value(sets)?))
        }
        Some(id) => Ok(Inbound::Echo(id)),
        None => Ok(Inbound::Push(Notification::from_value(value)?)),
    }
}

/// The second-phase `switchNotifications` payload computed from the probe
struct SubscriptionPlan {
    enabled: Vec<ApiNotification>,
    disabled: Vec<ApiNotification>,
    /// Desired names the device did not report as disabled; left untouched
    missing: Vec<String>,
}

/// Move every desired notification found in the device's disabled set over to
/// the enabled set. Desired names that are already enabled, rejected, or
/// unsupported stay where the device put them.
fn plan_subscription(
    desired: &[&str],
    mut enabled: Vec<ApiNotification>,
    disabled: Vec<ApiNotification>,
) -> SubscriptionPlan {
    let mut remaining = Vec::with_capacity(disabled.len());
    for notification in disabled {
        if desired.contains(&notification.name.as_str()) {
            enabled.push(notification);
        } else {
            remaining.push(notification);
        }
    }
    let missing = desired
        .iter()
        .filter(|name| !enabled.iter().any(|n| n.name == **name))
        .map(|name| name.to_string())
        .collect();
    SubscriptionPlan {
        enabled,
        disabled: remaining,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(name: &str) -> ApiNotification {
        ApiNotification {
            name: name.to_string(),
            version: "1.0".to_string(),
        }
    }

    #[test]
    fn plan_moves_desired_intersection_to_enabled() {
        let plan = plan_subscription(
            &["notifyPowerStatus"],
            vec![],
            vec![
                notification("notifyPowerStatus"),
                notification("notifyVolumeInformation"),
            ],
        );
        assert_eq!(plan.enabled, vec![notification("notifyPowerStatus")]);
        assert_eq!(plan.disabled, vec![notification("notifyVolumeInformation")]);
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn plan_enables_exactly_the_probe_scenario() {
        // Probe response: everything desired sits in the disabled set.
        let plan = plan_subscription(
            &["notifyPowerStatus"],
            vec![],
            vec![notification("notifyPowerStatus")],
        );
        assert_eq!(plan.enabled, vec![notification("notifyPowerStatus")]);
        assert!(plan.disabled.is_empty());
    }

    #[test]
    fn desired_names_absent_from_disabled_are_left_untouched() {
        // Some models omit notification types entirely; that is not fatal.
        let plan = plan_subscription(
            &["notifyExternalTerminalStatus", "notifyPlayingContentInfo"],
            vec![],
            vec![notification("notifyPlayingContentInfo")],
        );
        assert_eq!(plan.enabled, vec![notification("notifyPlayingContentInfo")]);
        assert_eq!(plan.missing, vec!["notifyExternalTerminalStatus".to_string()]);
    }

    #[test]
    fn already_enabled_notifications_are_preserved() {
        let plan = plan_subscription(
            &["notifyVolumeInformation"],
            vec![notification("notifyPowerStatus")],
            vec![notification("notifyVolumeInformation")],
        );
        assert_eq!(
            plan.enabled,
            vec![
                notification("notifyPowerStatus"),
                notification("notifyVolumeInformation"),
            ]
        );
        assert!(plan.disabled.is_empty());
        assert!(plan.missing.is_empty());
    }

    fn close_frame(code: CloseCode) -> CloseFrame<'static> {
        CloseFrame {
            code,
            reason: "".into(),
        }
    }

    #[test]
    fn normal_close_never_schedules_a_reconnect() {
        let frame = close_frame(CloseCode::Normal);
        assert_eq!(close_reason(Some(&frame)), CloseReason::Normal);
    }

    #[test]
    fn abnormal_close_codes_schedule_a_reconnect() {
        for code in [
            CloseCode::Away,
            CloseCode::Error,
            CloseCode::Protocol,
            CloseCode::Abnormal,
            CloseCode::Restart,
        ] {
            let frame = close_frame(code);
            assert_eq!(
                close_reason(Some(&frame)),
                CloseReason::Abnormal,
                "code {code:?}"
            );
        }
    }

    #[test]
    fn close_without_a_frame_schedules_a_reconnect() {
        assert_eq!(close_reason(None), CloseReason::Abnormal);
    }

    #[test]
    fn messages_with_an_id_are_never_dispatched_as_events() {
        let echo = serde_json::json!({
            "id": 2,
            "result": [{ "enabled": [], "disabled": [], "rejected": [], "unsupported": [] }]
        });
        match classify_inbound(&echo).unwrap() {
            Inbound::Echo(2) => {}
            other => panic!("expected Echo(2), got {other:?}"),
        }
    }

    #[test]
    fn probe_response_is_parsed_into_notification_sets() {
        let probe = serde_json::json!({
            "id": 1,
            "result": [{
                "enabled": [],
                "disabled": [{ "name": "notifyPowerStatus", "version": "1.0" }],
                "rejected": [],
                "unsupported": []
            }]
        });
        match classify_inbound(&probe).unwrap() {
            Inbound::Probe(sets) => {
                assert!(sets.enabled.is_empty());
                assert_eq!(sets.disabled, vec![notification("notifyPowerStatus")]);
            }
            other => panic!("expected Probe, got {other:?}"),
        }
    }

    #[test]
    fn messages_without_an_id_are_live_notifications() {
        let push = serde_json::json!({
            "method": "notifyPowerStatus",
            "params": [{ "status": "standby" }],
            "version": "1.0"
        });
        match classify_inbound(&push).unwrap() {
            Inbound::Push(Notification::Power(status)) => assert!(!status.is_on()),
            other => panic!("expected Push(Power), got {other:?}"),
        }
    }
}
