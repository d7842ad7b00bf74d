//! Rust library for discovering and controlling Sony audio devices
//!
//! This library provides an async API for devices speaking the Sony Audio
//! Control API (home theater receivers, soundbars, wireless speakers). It
//! supports:
//!
//! - Discovery via SSDP multicast search
//! - Capability negotiation against the device's supported-API matrix
//! - Power, volume, mute, input and playback control
//! - Infrared remote codes over the legacy IRCC service
//! - Real-time state updates pushed over per-service WebSockets
//!
//! # Quick Start
//!
//! ```no_run
//! use sony_audio_control::{DeviceEvent, Discoverer, VolumeStep};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Start discovery
//!     let mut discoverer = Discoverer::new()?;
//!     let mut found = discoverer.subscribe_found();
//!     discoverer.start()?;
//!
//!     // Wait for the first compatible device
//!     let device = found.recv().await?;
//!     println!("Found {}: powered on = {}", device.name, device.get_power_state().await?);
//!
//!     // Control it
//!     device.set_power(true).await?;
//!     device.set_volume(VolumeStep::Up).await?;
//!
//!     // Follow live state changes
//!     let mut events = device.events();
//!     while let Ok(event) = events.recv().await {
//!         if let DeviceEvent::Volume(volume) = event {
//!             println!("Volume is now {}", volume);
//!             break;
//!         }
//!     }
//!
//!     discoverer.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Direct Connection
//!
//! If you know the control URL of a device, you can skip discovery:
//!
//! ```no_run
//! use sony_audio_control::SonyDevice;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let base_url = Url::parse("http://192.168.1.40:10000/sony")?;
//!     let device = SonyDevice::create(base_url, None, "uuid:manual".to_string()).await?;
//!     let inputs = device.get_inputs().await?;
//!     if let Some(input) = inputs.first() {
//!         device.set_source(input).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Discovery**: SSDP search, description parsing, and device registration
//! - **Device**: High-level command and read API for one device
//! - **Cache**: Lazy per-device terminal and volume state, kept live by pushes
//! - **Subscriber**: Per-service WebSocket notification state machines
//! - **Client**: Versioned JSON calls checked against device capabilities
//! - **Protocol**: JSON request/response/notification structures
//! - **Types**: Domain types and data structures

mod cache;
mod client;
mod device;
mod discovery;
mod error;
mod protocol;
mod ssdp;
mod subscriber;
mod subscription;
mod types;

// Public exports
pub use cache::is_readonly_terminal;
pub use device::{SonyDevice, VolumeStep};
pub use discovery::{Discoverer, SEARCH_TARGET};
pub use error::{DeviceError, Result};
pub use subscription::{DeviceEvent, EventReceiver};
pub use types::{
    ApiMethodInfo, ApiVersionInfo, CapabilityMatrix, InterfaceInfo, PlayingContentInfo,
    PowerStatus, ServiceApiInfo, SystemInfo, Terminal, VolumeInfo,
};
