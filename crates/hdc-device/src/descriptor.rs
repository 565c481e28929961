//! The introspected object model: immutable tables describing a device's
//! features and their states, commands, properties and events.
//!
//! Descriptors are plain `'d`-borrowed data, in practice `static` tables
//! built by the application. They never change after the engine is
//! constructed; the only mutable per-feature state lives in
//! [`FeatureRuntime`]. Everything here is validated once, at engine
//! construction, so the dispatch paths can rely on well-formed tables.

use crate::command::{CommandHandler, PropertyGetter, PropertySetter};
use crate::dtype::DataType;
use crate::event::LogLevel;

/// Maximum number of features one device may declare.
pub const MAX_FEATURES: usize = 8;

/// Maximum number of argument (or return) descriptors per command or event.
pub const MAX_TUPLE_ARGS: usize = 4;

/// Upper bound on one property value, including storage capacity.
pub const MAX_PROPERTY_SIZE: usize = 256;

/// Maximum number of directly stored properties across the whole device.
pub const MAX_STORED_PROPERTIES: usize = 32;

/// First id reserved for the engine in every id scope.
pub const FIRST_RESERVED_ID: u8 = 0xF0;

/// Root descriptor: the ordered sequence of features, Core (id 0) included.
#[derive(Debug, Clone, Copy)]
pub struct DeviceDescriptor<'d> {
    /// All features of the device. One of them must carry id 0.
    pub features: &'d [FeatureDescriptor<'d>],
}

/// One feature: a named group of states, commands, properties and events.
#[derive(Debug, Clone, Copy)]
pub struct FeatureDescriptor<'d> {
    /// Feature id; 0 is the mandatory Core feature.
    pub id: u8,
    /// Feature name as shown to the host.
    pub name: &'d str,
    /// Name of the feature's implementation class.
    pub class_name: &'d str,
    /// Version of the feature's implementation class.
    pub class_version: &'d str,
    /// Human-readable description.
    pub doc: &'d str,
    /// Declared feature states. May be empty, which disables state
    /// validation for this feature.
    pub states: &'d [StateDescriptor<'d>],
    /// Application commands (ids `0x00..=0xEF`).
    pub commands: &'d [CommandDescriptor<'d>],
    /// Application properties (ids `0x00..=0xEF`).
    pub properties: &'d [PropertyDescriptor<'d>],
    /// Application events (ids `0x00..=0xEF`).
    pub events: &'d [EventDescriptor<'d>],
    /// State the feature starts in.
    pub initial_state: u8,
    /// Log-event threshold the feature starts with; coerced to the valid
    /// set at engine construction.
    pub initial_log_threshold: u8,
}

impl<'d> FeatureDescriptor<'d> {
    /// A feature with the given identity and no members; fill in the
    /// tables with struct-update syntax.
    #[must_use]
    pub const fn new(id: u8, name: &'d str, class_name: &'d str, class_version: &'d str) -> Self {
        Self {
            id,
            name,
            class_name,
            class_version,
            doc: "",
            states: &[],
            commands: &[],
            properties: &[],
            events: &[],
            initial_state: 0,
            initial_log_threshold: LogLevel::Warning as u8,
        }
    }
}

/// One named feature state.
#[derive(Debug, Clone, Copy)]
pub struct StateDescriptor<'d> {
    /// State id, unique within the feature.
    pub id: u8,
    /// State name.
    pub name: &'d str,
    /// Optional description.
    pub doc: Option<&'d str>,
}

/// One remotely callable command.
#[derive(Debug, Clone, Copy)]
pub struct CommandDescriptor<'d> {
    /// Command id, unique within the feature; `0x00..=0xEF`.
    pub id: u8,
    /// Command name.
    pub name: &'d str,
    /// Optional description.
    pub doc: Option<&'d str>,
    /// Argument descriptors, at most [`MAX_TUPLE_ARGS`].
    pub args: &'d [ArgDescriptor<'d>],
    /// Return-value descriptors, at most [`MAX_TUPLE_ARGS`].
    pub returns: &'d [ArgDescriptor<'d>],
    /// Exceptions this command may raise.
    pub raises: &'d [ExceptionDescriptor<'d>],
    /// The handler invoked on dispatch.
    pub handler: CommandHandler,
}

impl<'d> CommandDescriptor<'d> {
    /// A command with no declared arguments, returns or exceptions.
    #[must_use]
    pub const fn new(id: u8, name: &'d str, handler: CommandHandler) -> Self {
        Self {
            id,
            name,
            doc: None,
            args: &[],
            returns: &[],
            raises: &[],
            handler,
        }
    }
}

/// One typed property.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDescriptor<'d> {
    /// Property id, unique within the feature; `0x00..=0xEF`.
    pub id: u8,
    /// Property name.
    pub name: &'d str,
    /// Value type.
    pub dtype: DataType,
    /// Read-only properties reject `SetPropertyValue`.
    pub read_only: bool,
    /// Where the value lives.
    pub backing: PropertyBacking<'d>,
    /// Optional description.
    pub doc: Option<&'d str>,
}

impl<'d> PropertyDescriptor<'d> {
    /// A writable, undocumented property.
    #[must_use]
    pub const fn new(id: u8, name: &'d str, dtype: DataType, backing: PropertyBacking<'d>) -> Self {
        Self {
            id,
            name,
            dtype,
            read_only: false,
            backing,
            doc: None,
        }
    }
}

/// Where a property's value lives and how it is accessed.
///
/// Exactly one of the two variants applies to a well-formed property; the
/// C-style "function pointer or raw data pointer" pair becomes a sum type.
#[derive(Debug, Clone, Copy)]
pub enum PropertyBacking<'d> {
    /// Value bytes live in the engine's value pool, serialized in wire
    /// format. `capacity` is meaningful for UTF-8/BLOB only and bounds the
    /// stored size.
    Stored {
        /// Value the slot is initialized with; its dtype must match the
        /// property's declared dtype.
        init: PropertyValue<'d>,
        /// Slot size for variable-size dtypes; ignored for fixed widths.
        capacity: usize,
    },
    /// Value is produced (and optionally consumed) by callbacks.
    Computed {
        /// Serializes the current value.
        get: PropertyGetter,
        /// Applies a new value; required unless the property is read-only.
        set: Option<PropertySetter>,
    },
}

impl<'d> PropertyBacking<'d> {
    /// Fixed-width stored value.
    #[must_use]
    pub const fn stored(init: PropertyValue<'d>) -> Self {
        Self::Stored { init, capacity: 0 }
    }

    /// Variable-size stored value with an explicit slot capacity.
    #[must_use]
    pub const fn stored_with_capacity(init: PropertyValue<'d>, capacity: usize) -> Self {
        Self::Stored { init, capacity }
    }

    /// Read-only computed value.
    #[must_use]
    pub const fn computed(get: PropertyGetter) -> Self {
        Self::Computed { get, set: None }
    }

    /// Read-write computed value.
    #[must_use]
    pub const fn computed_rw(get: PropertyGetter, set: PropertySetter) -> Self {
        Self::Computed {
            get,
            set: Some(set),
        }
    }
}

/// A typed initial value for a stored property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue<'d> {
    /// Unsigned 8-bit.
    U8(u8),
    /// Unsigned 16-bit.
    U16(u16),
    /// Unsigned 32-bit.
    U32(u32),
    /// Signed 8-bit.
    I8(i8),
    /// Signed 16-bit.
    I16(i16),
    /// Signed 32-bit.
    I32(i32),
    /// Single-precision float.
    F32(f32),
    /// Double-precision float.
    F64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    Utf8(&'d str),
    /// Raw bytes.
    Blob(&'d [u8]),
    /// A data-type identifier.
    Dtype(DataType),
}

impl PropertyValue<'_> {
    /// The data type this value serializes as.
    #[must_use]
    pub const fn dtype(&self) -> DataType {
        match self {
            Self::U8(_) => DataType::UInt8,
            Self::U16(_) => DataType::UInt16,
            Self::U32(_) => DataType::UInt32,
            Self::I8(_) => DataType::Int8,
            Self::I16(_) => DataType::Int16,
            Self::I32(_) => DataType::Int32,
            Self::F32(_) => DataType::Float,
            Self::F64(_) => DataType::Double,
            Self::Bool(_) => DataType::Bool,
            Self::Utf8(_) => DataType::Utf8,
            Self::Blob(_) => DataType::Blob,
            Self::Dtype(_) => DataType::Dtype,
        }
    }
}

/// One asynchronous, device-initiated event.
#[derive(Debug, Clone, Copy)]
pub struct EventDescriptor<'d> {
    /// Event id, unique within the feature; `0x00..=0xEF`.
    pub id: u8,
    /// Event name.
    pub name: &'d str,
    /// Optional description.
    pub doc: Option<&'d str>,
    /// Payload descriptors, at most [`MAX_TUPLE_ARGS`].
    pub args: &'d [ArgDescriptor<'d>],
}

impl<'d> EventDescriptor<'d> {
    /// An event without payload descriptors.
    #[must_use]
    pub const fn new(id: u8, name: &'d str) -> Self {
        Self {
            id,
            name,
            doc: None,
            args: &[],
        }
    }
}

/// One typed command failure.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionDescriptor<'d> {
    /// Exception id; `0x00` means "no error" and is never declared,
    /// `0xF0..` are reserved for the engine.
    pub id: u8,
    /// Exception name.
    pub name: &'d str,
    /// Optional description.
    pub doc: Option<&'d str>,
}

/// One argument or return value of a command or event.
#[derive(Debug, Clone, Copy)]
pub struct ArgDescriptor<'d> {
    /// Value type.
    pub dtype: DataType,
    /// Optional name.
    pub name: Option<&'d str>,
    /// Optional description.
    pub doc: Option<&'d str>,
}

impl<'d> ArgDescriptor<'d> {
    /// An anonymous argument of the given type.
    #[must_use]
    pub const fn new(dtype: DataType) -> Self {
        Self {
            dtype,
            name: None,
            doc: None,
        }
    }

    /// A named argument of the given type.
    #[must_use]
    pub const fn named(dtype: DataType, name: &'d str) -> Self {
        Self {
            dtype,
            name: Some(name),
            doc: None,
        }
    }
}

/// The two mutable per-feature slots.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeatureRuntime {
    /// Current feature state, as published by the `feature_state` property
    /// and the state-transition event.
    pub feature_state: u8,
    /// Minimum severity a log event needs to reach the host.
    pub log_event_threshold: u8,
}

/// Which id scope a descriptor-integrity error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorKind {
    /// A feature state.
    State,
    /// A command.
    Command,
    /// A property.
    Property,
    /// An event.
    Event,
    /// An exception.
    Exception,
}

impl core::fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::State => "state",
            Self::Command => "command",
            Self::Property => "property",
            Self::Event => "event",
            Self::Exception => "exception",
        };
        f.write_str(s)
    }
}

/// Why a property descriptor is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PropertyDefect {
    /// A writable computed property has no setter.
    #[error("writable computed property has no setter")]
    NeedsSetter,
    /// A variable-size stored property declares no capacity.
    #[error("variable-size storage needs a capacity")]
    NeedsCapacity,
    /// The declared capacity exceeds what one property value may hold.
    #[error("storage capacity exceeds 255 bytes")]
    CapacityTooLarge,
    /// The initial value's type differs from the declared dtype.
    #[error("initial value does not match the declared dtype")]
    InitMismatch,
    /// The initial value does not fit the declared capacity.
    #[error("initial value does not fit the declared capacity")]
    InitTooLarge,
}

/// Programming errors in the descriptor tables or the engine's geometry,
/// surfaced at construction instead of at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The device declares no features at all.
    #[error("device must declare at least one feature")]
    NoFeatures,
    /// More features than the engine can track.
    #[error("device declares more than {} features", MAX_FEATURES)]
    TooManyFeatures,
    /// No feature carries id 0.
    #[error("mandatory core feature (id 0) is missing")]
    MissingCoreFeature,
    /// Two features share an id.
    #[error("duplicate feature id {0:#04x}")]
    DuplicateFeatureId(u8),
    /// Two descriptors of the same kind share an id within one feature.
    #[error("duplicate {kind} id {id:#04x} on feature {feature:#04x}")]
    DuplicateId {
        /// Owning feature id.
        feature: u8,
        /// Id scope.
        kind: DescriptorKind,
        /// The colliding id.
        id: u8,
    },
    /// An application descriptor uses an id reserved for the engine.
    #[error("{kind} id {id:#04x} on feature {feature:#04x} lies in the reserved range")]
    ReservedId {
        /// Owning feature id.
        feature: u8,
        /// Id scope.
        kind: DescriptorKind,
        /// The offending id.
        id: u8,
    },
    /// More than [`MAX_TUPLE_ARGS`] argument or return descriptors.
    #[error("more than {} argument descriptors on feature {feature:#04x}, member {id:#04x}", MAX_TUPLE_ARGS)]
    TooManyArgs {
        /// Owning feature id.
        feature: u8,
        /// Command or event id.
        id: u8,
    },
    /// The configured initial state is not in the feature's state table.
    #[error("initial state {state:#04x} of feature {feature:#04x} is not declared")]
    UnknownInitialState {
        /// Owning feature id.
        feature: u8,
        /// The undeclared state.
        state: u8,
    },
    /// A property descriptor violates the well-formedness rules.
    #[error("property {property:#04x} on feature {feature:#04x} is malformed: {defect}")]
    InvalidProperty {
        /// Owning feature id.
        feature: u8,
        /// Property id.
        property: u8,
        /// What exactly is wrong.
        defect: PropertyDefect,
    },
    /// The stored property values do not fit the engine's value pool.
    #[error("stored property values exceed the engine's value pool")]
    ValuePoolOverflow,
    /// More stored properties than the engine can track.
    #[error("more than {} stored properties", MAX_STORED_PROPERTIES)]
    TooManyStoredProperties,
    /// A descriptor string would corrupt the streamed JSON description.
    #[error("descriptor string on feature {0:#04x} contains '\"', '\\' or control characters")]
    UnsafeText(u8),
    /// `RX_CAP` cannot hold a minimal request packet.
    #[error("receive buffer cannot hold a minimal request")]
    RxBufferTooSmall,
    /// `TX_CAP` cannot hold a minimal packet.
    #[error("transmit buffers cannot hold a minimal packet")]
    TxBufferTooSmall,
}

/// Strings are streamed into the JSON description unescaped, so anything
/// that would need escaping is rejected up front.
fn text_is_json_safe(s: &str) -> bool {
    !s.bytes().any(|b| b == b'"' || b == b'\\' || b < 0x20)
}

fn check_text(feature: u8, s: &str) -> Result<(), InitError> {
    if text_is_json_safe(s) {
        Ok(())
    } else {
        Err(InitError::UnsafeText(feature))
    }
}

fn check_opt_text(feature: u8, s: Option<&str>) -> Result<(), InitError> {
    match s {
        Some(s) => check_text(feature, s),
        None => Ok(()),
    }
}

fn check_args(feature: u8, member: u8, args: &[ArgDescriptor<'_>]) -> Result<(), InitError> {
    if args.len() > MAX_TUPLE_ARGS {
        return Err(InitError::TooManyArgs {
            feature,
            id: member,
        });
    }
    for arg in args {
        check_opt_text(feature, arg.name)?;
        check_opt_text(feature, arg.doc)?;
    }
    Ok(())
}

fn check_unique(
    feature: u8,
    kind: DescriptorKind,
    ids: impl Iterator<Item = u8> + Clone,
) -> Result<(), InitError> {
    for (i, id) in ids.clone().enumerate() {
        if ids.clone().skip(i.saturating_add(1)).any(|other| other == id) {
            return Err(InitError::DuplicateId { feature, kind, id });
        }
    }
    Ok(())
}

fn check_property(feature: u8, prop: &PropertyDescriptor<'_>) -> Result<(), InitError> {
    let defect = |defect| InitError::InvalidProperty {
        feature,
        property: prop.id,
        defect,
    };
    match &prop.backing {
        PropertyBacking::Computed { set, .. } => {
            if !prop.read_only && set.is_none() {
                return Err(defect(PropertyDefect::NeedsSetter));
            }
        }
        PropertyBacking::Stored { init, capacity } => {
            if init.dtype() != prop.dtype {
                return Err(defect(PropertyDefect::InitMismatch));
            }
            match prop.dtype.fixed_size() {
                Some(_) => {}
                None => {
                    if *capacity == 0 {
                        return Err(defect(PropertyDefect::NeedsCapacity));
                    }
                    if *capacity >= MAX_PROPERTY_SIZE {
                        return Err(defect(PropertyDefect::CapacityTooLarge));
                    }
                    let init_len = match init {
                        PropertyValue::Utf8(s) => s.len().saturating_add(1), // NUL
                        PropertyValue::Blob(b) => b.len(),
                        _ => 0,
                    };
                    if init_len > *capacity {
                        return Err(defect(PropertyDefect::InitTooLarge));
                    }
                }
            }
        }
    }
    if let PropertyBacking::Stored {
        init: PropertyValue::Utf8(s),
        ..
    } = &prop.backing
    {
        // A NUL inside the initial text would truncate the readback.
        if s.bytes().any(|b| b == 0) {
            return Err(defect(PropertyDefect::InitMismatch));
        }
    }
    Ok(())
}

fn check_feature(feature: &FeatureDescriptor<'_>) -> Result<(), InitError> {
    let fid = feature.id;
    check_text(fid, feature.name)?;
    check_text(fid, feature.class_name)?;
    check_text(fid, feature.class_version)?;
    check_text(fid, feature.doc)?;

    check_unique(fid, DescriptorKind::State, feature.states.iter().map(|s| s.id))?;
    for state in feature.states {
        check_text(fid, state.name)?;
        check_opt_text(fid, state.doc)?;
    }
    if !feature.states.is_empty()
        && !feature.states.iter().any(|s| s.id == feature.initial_state)
    {
        return Err(InitError::UnknownInitialState {
            feature: fid,
            state: feature.initial_state,
        });
    }

    check_unique(fid, DescriptorKind::Command, feature.commands.iter().map(|c| c.id))?;
    for cmd in feature.commands {
        if cmd.id >= FIRST_RESERVED_ID {
            return Err(InitError::ReservedId {
                feature: fid,
                kind: DescriptorKind::Command,
                id: cmd.id,
            });
        }
        check_text(fid, cmd.name)?;
        check_opt_text(fid, cmd.doc)?;
        check_args(fid, cmd.id, cmd.args)?;
        check_args(fid, cmd.id, cmd.returns)?;
        check_unique(fid, DescriptorKind::Exception, cmd.raises.iter().map(|e| e.id))?;
        for exc in cmd.raises {
            // 0x00 is "no error"; ids at 0xF0 and above may only name the
            // engine's own exceptions.
            let reserved_ok = crate::command::ReservedException::from_wire(exc.id).is_some();
            if exc.id == 0 || (exc.id >= FIRST_RESERVED_ID && !reserved_ok) {
                return Err(InitError::ReservedId {
                    feature: fid,
                    kind: DescriptorKind::Exception,
                    id: exc.id,
                });
            }
            check_text(fid, exc.name)?;
            check_opt_text(fid, exc.doc)?;
        }
    }

    check_unique(fid, DescriptorKind::Event, feature.events.iter().map(|e| e.id))?;
    for event in feature.events {
        if event.id >= FIRST_RESERVED_ID {
            return Err(InitError::ReservedId {
                feature: fid,
                kind: DescriptorKind::Event,
                id: event.id,
            });
        }
        check_text(fid, event.name)?;
        check_opt_text(fid, event.doc)?;
        check_args(fid, event.id, event.args)?;
    }

    check_unique(fid, DescriptorKind::Property, feature.properties.iter().map(|p| p.id))?;
    for prop in feature.properties {
        if prop.id >= FIRST_RESERVED_ID {
            return Err(InitError::ReservedId {
                feature: fid,
                kind: DescriptorKind::Property,
                id: prop.id,
            });
        }
        check_text(fid, prop.name)?;
        check_opt_text(fid, prop.doc)?;
        check_property(fid, prop)?;
    }
    Ok(())
}

/// Validate the whole descriptor tree; returns the index of the Core
/// feature on success.
pub(crate) fn validate(device: &DeviceDescriptor<'_>) -> Result<usize, InitError> {
    if device.features.is_empty() {
        return Err(InitError::NoFeatures);
    }
    if device.features.len() > MAX_FEATURES {
        return Err(InitError::TooManyFeatures);
    }
    for (i, feature) in device.features.iter().enumerate() {
        if device
            .features
            .iter()
            .skip(i.saturating_add(1))
            .any(|other| other.id == feature.id)
        {
            return Err(InitError::DuplicateFeatureId(feature.id));
        }
        check_feature(feature)?;
    }
    device
        .features
        .iter()
        .position(|f| f.id == 0)
        .ok_or(InitError::MissingCoreFeature)
}
