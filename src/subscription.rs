use tokio::sync::broadcast;

use crate::error::{DeviceError, Result};

/// A typed state-change event pushed by a device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Power state changed; `true` while activating or active
    Power(bool),
    /// Volume level changed on some output
    Volume(i64),
    /// Mute state changed on some output
    Mute(bool),
    /// The playing content or active input changed; carries the source URI
    Source(String),
}

/// Receiver for device events
pub struct EventReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next device event.
    ///
    /// Fails with [`DeviceError::ConnectionClosed`] once the device has been
    /// torn down and all senders dropped.
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => DeviceError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                DeviceError::Channel(format!("lagged by {} events", n))
            }
        })
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(DeviceError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(DeviceError::Channel(format!("lagged by {} events", n)))
            }
        }
    }
}
