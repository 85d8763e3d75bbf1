//! Device module: ADB connection, observation capture and command transport.

mod connection;
mod observation;
mod transport;

pub use connection::{AdbConnection, AdbError, ConnectionType, DeviceInfo};
pub use observation::{
    bounds_center, parse_focused_window, parse_ui_dump, summarize_screen, Observation, UiElement,
};
pub(crate) use transport::duration_ms;
pub use transport::{AdbTransport, DeviceTransport, TransportResponse};
