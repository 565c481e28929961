//! Host-side test tooling for the device protocol engine.
//!
//! Everything a test suite needs to talk to an [`hdc_device::Engine`]
//! without hardware: a scripted [`MockTransport`], host-side packetizing
//! and deframing helpers, and a reference device fixture with a core and a
//! demo feature.
//!
//! This crate is std-only and never ships on a device.

// Test tooling favors readable assertions over error plumbing, and its
// slice handling is exercised by the suites rather than audited per-site.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

mod fixtures;
mod host;
mod transport;

pub use fixtures::{
    demo_device, demo_engine, transact, DemoApp, DemoEngine, CMD_RESET, EVT_BUTTON,
    FEATURE_BLINKY, FEATURE_CORE, PROP_CALIBRATION, PROP_DEVICE_NAME, PROP_LED_BLINKING_RATE,
    PROP_UC_DEVID, STATE_OFF, STATE_RUNNING, UC_DEVID,
};
pub use host::{deframe, frame_message, frame_request, DeframeError};
pub use transport::MockTransport;
