//! The reference device used by the integration suites: a core feature
//! with stored properties and a reset command, plus a demo "blinky"
//! feature with an application-backed computed property.

use hdc_device::descriptor::{
    ArgDescriptor, CommandDescriptor, DeviceDescriptor, EventDescriptor, FeatureDescriptor,
    PropertyBacking, PropertyDescriptor, PropertyValue, StateDescriptor,
};
use hdc_device::{
    CommandContext, CommandError, DataType, Engine, PropertyBuf, Reply, ReservedException,
};

use crate::transport::MockTransport;

/// Feature id of the core feature.
pub const FEATURE_CORE: u8 = 0x00;
/// Feature id of the demo LED feature.
pub const FEATURE_BLINKY: u8 = 0x01;

/// Core state: halted.
pub const STATE_OFF: u8 = 0x00;
/// Core state: normal operation.
pub const STATE_RUNNING: u8 = 0x01;

/// Core command: reboot the device.
pub const CMD_RESET: u8 = 0x01;

/// Core property: microcontroller device id (read-only).
pub const PROP_UC_DEVID: u8 = 0x10;
/// Core property: writable device name (UTF-8).
pub const PROP_DEVICE_NAME: u8 = 0x11;
/// Core property: writable calibration blob.
pub const PROP_CALIBRATION: u8 = 0x12;
/// Blinky property: blink rate in Hz, clamped by its setter.
pub const PROP_LED_BLINKING_RATE: u8 = 0x01;

/// Blinky event: a button edge.
pub const EVT_BUTTON: u8 = 0x01;

/// Value of the read-only `uc_devid` property.
pub const UC_DEVID: u32 = 0x1234_5678;

/// Mutable application state behind the demo device.
#[derive(Debug)]
pub struct DemoApp {
    /// Current LED blink rate in Hz.
    pub led_blinking_rate: u8,
    /// How many times the reset command ran.
    pub reset_count: u32,
}

impl DemoApp {
    /// Application state as it looks right after boot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            led_blinking_rate: 5,
            reset_count: 0,
        }
    }
}

impl Default for DemoApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply first, then announce the state transition; a real firmware would
/// flush and hit the reset vector afterwards.
fn reset(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let reply = ctx.reply_void();
    let _ = ctx.set_feature_state(STATE_OFF);
    if let Some(app) = ctx.app::<DemoApp>() {
        app.reset_count = app.reset_count.saturating_add(1);
    }
    Ok(reply)
}

fn led_rate_get(ctx: &mut CommandContext<'_>, out: &mut PropertyBuf) -> Result<(), CommandError> {
    let rate = ctx
        .app::<DemoApp>()
        .ok_or_else(|| {
            CommandError::with_detail(
                ReservedException::CommandFailed.wire(),
                "application state missing",
            )
        })?
        .led_blinking_rate;
    let _ = out.push(rate);
    Ok(())
}

fn led_rate_set(ctx: &mut CommandContext<'_>, value: &[u8]) -> Result<(), CommandError> {
    let &[raw] = value else {
        return Err(ReservedException::InvalidArgs.into());
    };
    let app = ctx.app::<DemoApp>().ok_or_else(|| {
        CommandError::with_detail(
            ReservedException::CommandFailed.wire(),
            "application state missing",
        )
    })?;
    app.led_blinking_rate = raw.clamp(1, 20);
    Ok(())
}

static CORE_STATES: [StateDescriptor<'static>; 2] = [
    StateDescriptor {
        id: STATE_OFF,
        name: "off",
        doc: None,
    },
    StateDescriptor {
        id: STATE_RUNNING,
        name: "running",
        doc: Some("Normal operation."),
    },
];

static CORE_COMMANDS: [CommandDescriptor<'static>; 1] = [CommandDescriptor {
    id: CMD_RESET,
    name: "Reset",
    doc: Some("Reboots the device."),
    args: &[],
    returns: &[],
    raises: &[],
    handler: reset,
}];

static CORE_PROPERTIES: [PropertyDescriptor<'static>; 3] = [
    PropertyDescriptor {
        id: PROP_UC_DEVID,
        name: "uc_devid",
        dtype: DataType::UInt32,
        read_only: true,
        backing: PropertyBacking::Stored {
            init: PropertyValue::U32(UC_DEVID),
            capacity: 0,
        },
        doc: Some("Microcontroller device id."),
    },
    PropertyDescriptor {
        id: PROP_DEVICE_NAME,
        name: "device_name",
        dtype: DataType::Utf8,
        read_only: false,
        backing: PropertyBacking::Stored {
            init: PropertyValue::Utf8("demo"),
            capacity: 16,
        },
        doc: None,
    },
    PropertyDescriptor {
        id: PROP_CALIBRATION,
        name: "calibration",
        dtype: DataType::Blob,
        read_only: false,
        backing: PropertyBacking::Stored {
            init: PropertyValue::Blob(&[1, 2, 3]),
            capacity: 8,
        },
        doc: None,
    },
];

static BUTTON_EVENT_ARGS: [ArgDescriptor<'static>; 2] = [
    ArgDescriptor::named(DataType::UInt8, "button_id"),
    ArgDescriptor::named(DataType::UInt8, "button_state"),
];

static BLINKY_EVENTS: [EventDescriptor<'static>; 1] = [EventDescriptor {
    id: EVT_BUTTON,
    name: "ButtonEvent",
    doc: None,
    args: &BUTTON_EVENT_ARGS,
}];

static BLINKY_PROPERTIES: [PropertyDescriptor<'static>; 1] = [PropertyDescriptor {
    id: PROP_LED_BLINKING_RATE,
    name: "led_blinking_rate",
    dtype: DataType::UInt8,
    read_only: false,
    backing: PropertyBacking::Computed {
        get: led_rate_get,
        set: Some(led_rate_set),
    },
    doc: Some("Blink rate in Hz, clamped to 1..=20."),
}];

static FEATURES: [FeatureDescriptor<'static>; 2] = [
    FeatureDescriptor {
        id: FEATURE_CORE,
        name: "core",
        class_name: "DemoCore",
        class_version: "1.0",
        doc: "Core feature of the demo device.",
        states: &CORE_STATES,
        commands: &CORE_COMMANDS,
        properties: &CORE_PROPERTIES,
        events: &[],
        initial_state: STATE_RUNNING,
        initial_log_threshold: 30,
    },
    FeatureDescriptor {
        id: FEATURE_BLINKY,
        name: "blinky",
        class_name: "Blinky",
        class_version: "0.2",
        doc: "Drives the demo LED.",
        states: &[],
        commands: &[],
        properties: &BLINKY_PROPERTIES,
        events: &BLINKY_EVENTS,
        initial_state: 0,
        initial_log_threshold: 20,
    },
];

static DEVICE: DeviceDescriptor<'static> = DeviceDescriptor {
    features: &FEATURES,
};

/// The reference device descriptor.
#[must_use]
pub fn demo_device() -> &'static DeviceDescriptor<'static> {
    &DEVICE
}

/// Engine geometry used across the suites: 128-byte requests, 512-byte
/// TX buffers, 256-byte value pool.
pub type DemoEngine = Engine<'static, MockTransport, 131, 512, 256>;

/// A freshly constructed engine over the reference device.
#[must_use]
pub fn demo_engine() -> DemoEngine {
    Engine::new(demo_device(), MockTransport::new()).expect("demo descriptors are valid")
}

/// Frame one request, run one work iteration and return the deframed
/// reply messages.
pub fn transact(
    engine: &mut DemoEngine,
    app: &mut dyn std::any::Any,
    request: &[u8],
) -> Vec<Vec<u8>> {
    engine
        .transport_mut()
        .push_burst(&crate::host::frame_request(request));
    engine.work(app);
    let wire = engine.transport_mut().take_wire();
    crate::host::deframe(&wire).expect("device output must deframe")
}
