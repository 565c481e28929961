//! The property engine: generic get/set over declared properties, the
//! engine-owned value pool backing stored properties, and the two mandatory
//! commands and properties every feature carries.
//!
//! Stored values live in one statically sized byte pool inside the engine,
//! serialized exactly as they travel on the wire (little-endian). Reading a
//! stored property is a bounded copy; writing is a size-checked copy back.
//! Computed properties delegate to the descriptor's getter/setter callbacks.

use crate::command::{CommandContext, CommandError, Reply, ReservedException};
use crate::descriptor::{
    ArgDescriptor, CommandDescriptor, DeviceDescriptor, ExceptionDescriptor, FeatureDescriptor,
    PropertyBacking, PropertyDescriptor, PropertyValue, InitError, MAX_PROPERTY_SIZE,
    MAX_STORED_PROPERTIES,
};
use crate::dtype::DataType;
use crate::event::LogLevel;

/// Id of the mandatory `GetPropertyValue` command.
pub const CMD_GET_PROPERTY_VALUE: u8 = 0xF0;

/// Id of the mandatory `SetPropertyValue` command.
pub const CMD_SET_PROPERTY_VALUE: u8 = 0xF1;

/// Id of the mandatory `log_event_threshold` property.
pub const PROP_LOG_EVENT_THRESHOLD: u8 = 0xF0;

/// Id of the mandatory, read-only `feature_state` property.
pub const PROP_FEATURE_STATE: u8 = 0xF1;

/// Bounded scratch buffer holding one serialized property value.
pub type PropertyBuf = heapless::Vec<u8, MAX_PROPERTY_SIZE>;

/// Location of one stored property inside the value pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSlot {
    pub feature_index: u8,
    pub property_index: u8,
    pub offset: u16,
    pub len: u16,
}

/// Borrowed view of the value pool, handed to command contexts.
pub(crate) struct PoolView<'a> {
    pub bytes: &'a mut [u8],
    pub slots: &'a [PoolSlot],
}

impl PoolView<'_> {
    fn find(&self, feature_index: usize, property_index: usize) -> Option<PoolSlot> {
        self.slots
            .iter()
            .find(|s| {
                s.feature_index as usize == feature_index
                    && s.property_index as usize == property_index
            })
            .copied()
    }

    pub(crate) fn get(&self, feature_index: usize, property_index: usize) -> Option<&[u8]> {
        let slot = self.find(feature_index, property_index)?;
        self.bytes
            .get(slot.offset as usize..)
            .and_then(|tail| tail.get(..slot.len as usize))
    }

    pub(crate) fn get_mut(
        &mut self,
        feature_index: usize,
        property_index: usize,
    ) -> Option<&mut [u8]> {
        let slot = self.find(feature_index, property_index)?;
        self.bytes
            .get_mut(slot.offset as usize..)
            .and_then(|tail| tail.get_mut(..slot.len as usize))
    }
}

/// Serialize `value` into `out`, which must be the slot-sized target.
pub(crate) fn encode_value(value: &PropertyValue<'_>, out: &mut [u8]) {
    fn put(out: &mut [u8], src: &[u8]) {
        if let Some(dst) = out.get_mut(..src.len()) {
            dst.copy_from_slice(src);
        }
    }
    match value {
        PropertyValue::U8(v) => put(out, &[*v]),
        PropertyValue::U16(v) => put(out, &v.to_le_bytes()),
        PropertyValue::U32(v) => put(out, &v.to_le_bytes()),
        PropertyValue::I8(v) => put(out, &v.to_le_bytes()),
        PropertyValue::I16(v) => put(out, &v.to_le_bytes()),
        PropertyValue::I32(v) => put(out, &v.to_le_bytes()),
        PropertyValue::F32(v) => put(out, &v.to_le_bytes()),
        PropertyValue::F64(v) => put(out, &v.to_le_bytes()),
        PropertyValue::Bool(v) => put(out, &[u8::from(*v)]),
        PropertyValue::Dtype(d) => put(out, &[d.wire()]),
        PropertyValue::Utf8(s) => {
            put(out, s.as_bytes());
            if let Some(nul) = out.get_mut(s.len()) {
                *nul = 0;
            }
        }
        PropertyValue::Blob(b) => put(out, b),
    }
}

/// Carve the value pool out of `bytes`, one slot per stored property,
/// serializing the initial values.
pub(crate) fn build_pool(
    device: &DeviceDescriptor<'_>,
    bytes: &mut [u8],
    slots: &mut heapless::Vec<PoolSlot, MAX_STORED_PROPERTIES>,
) -> Result<(), InitError> {
    let mut offset = 0usize;
    for (feature_index, feature) in device.features.iter().enumerate() {
        for (property_index, prop) in feature.properties.iter().enumerate() {
            let PropertyBacking::Stored { init, capacity } = &prop.backing else {
                continue;
            };
            let len = prop.dtype.fixed_size().unwrap_or(*capacity);
            let end = offset.checked_add(len).ok_or(InitError::ValuePoolOverflow)?;
            let slot_bytes = bytes
                .get_mut(offset..end)
                .ok_or(InitError::ValuePoolOverflow)?;
            encode_value(init, slot_bytes);
            // Bounds: at most MAX_STORED_PROPERTIES slots of at most 255
            // bytes each, so every u8/u16 below holds its value exactly.
            #[allow(clippy::cast_possible_truncation)]
            let slot = PoolSlot {
                feature_index: feature_index as u8,
                property_index: property_index as u8,
                offset: offset as u16,
                len: len as u16,
            };
            slots
                .push(slot)
                .map_err(|_| InitError::TooManyStoredProperties)?;
            offset = end;
        }
    }
    Ok(())
}

/// Mutable counterpart of [`stored_bytes`], with the property's dtype for
/// size checking.
pub(crate) fn stored_bytes_mut<'p>(
    device: &DeviceDescriptor<'_>,
    bytes: &'p mut [u8],
    slots: &[PoolSlot],
    feature_id: u8,
    property_id: u8,
) -> Option<(&'p mut [u8], DataType)> {
    let feature_index = device.features.iter().position(|f| f.id == feature_id)?;
    let feature = device.features.get(feature_index)?;
    let (property_index, prop) = feature
        .properties
        .iter()
        .enumerate()
        .find(|(_, p)| p.id == property_id)?;
    let slot = slots.iter().find(|s| {
        s.feature_index as usize == feature_index && s.property_index as usize == property_index
    })?;
    let slot_bytes = bytes
        .get_mut(slot.offset as usize..)
        .and_then(|tail| tail.get_mut(..slot.len as usize))?;
    Some((slot_bytes, prop.dtype))
}

/// Look up a stored property's pool bytes by wire ids, for application-side
/// readback through the engine.
pub(crate) fn stored_bytes<'p>(
    device: &DeviceDescriptor<'_>,
    bytes: &'p [u8],
    slots: &[PoolSlot],
    feature_id: u8,
    property_id: u8,
) -> Option<&'p [u8]> {
    let feature_index = device.features.iter().position(|f| f.id == feature_id)?;
    let feature = device.features.get(feature_index)?;
    let property_index = feature.properties.iter().position(|p| p.id == property_id)?;
    let slot = slots.iter().find(|s| {
        s.feature_index as usize == feature_index && s.property_index as usize == property_index
    })?;
    bytes
        .get(slot.offset as usize..)
        .and_then(|tail| tail.get(..slot.len as usize))
}

/// Descriptor of the mandatory `log_event_threshold` property.
pub(crate) static LOG_EVENT_THRESHOLD_PROP: PropertyDescriptor<'static> = PropertyDescriptor {
    id: PROP_LOG_EVENT_THRESHOLD,
    name: "log_event_threshold",
    dtype: DataType::UInt8,
    read_only: false,
    backing: PropertyBacking::Computed {
        get: threshold_get,
        set: Some(threshold_set),
    },
    doc: Some("Minimum severity a Log event needs to reach the host."),
};

/// Descriptor of the mandatory `feature_state` property.
pub(crate) static FEATURE_STATE_PROP: PropertyDescriptor<'static> = PropertyDescriptor {
    id: PROP_FEATURE_STATE,
    name: "feature_state",
    dtype: DataType::UInt8,
    read_only: true,
    backing: PropertyBacking::Computed {
        get: feature_state_get,
        set: None,
    },
    doc: Some("Current state of this feature."),
};

/// The two mandatory properties, in the order they appear in the JSON
/// description.
pub(crate) static MANDATORY_PROPERTIES: [&PropertyDescriptor<'static>; 2] =
    [&LOG_EVENT_THRESHOLD_PROP, &FEATURE_STATE_PROP];

fn threshold_get(ctx: &mut CommandContext<'_>, out: &mut PropertyBuf) -> Result<(), CommandError> {
    // One byte always fits the scratch buffer.
    let _ = out.push(ctx.runtime.log_event_threshold);
    Ok(())
}

fn threshold_set(ctx: &mut CommandContext<'_>, value: &[u8]) -> Result<(), CommandError> {
    let &[raw] = value else {
        return Err(CommandError::with_detail(
            ReservedException::InvalidArgs.wire(),
            "expected a single threshold byte",
        ));
    };
    ctx.runtime.log_event_threshold = LogLevel::coerce(raw);
    Ok(())
}

fn feature_state_get(
    ctx: &mut CommandContext<'_>,
    out: &mut PropertyBuf,
) -> Result<(), CommandError> {
    let _ = out.push(ctx.runtime.feature_state);
    Ok(())
}

/// Resolve a property id on `feature`, mandatory properties included.
/// The index is only meaningful for user properties (pool lookups).
fn resolve<'d>(
    feature: &'d FeatureDescriptor<'d>,
    property_id: u8,
) -> Option<(usize, &'d PropertyDescriptor<'d>)> {
    if let Some(found) = feature
        .properties
        .iter()
        .enumerate()
        .find(|(_, p)| p.id == property_id)
    {
        return Some(found);
    }
    match property_id {
        PROP_LOG_EVENT_THRESHOLD => Some((usize::MAX, &LOG_EVENT_THRESHOLD_PROP)),
        PROP_FEATURE_STATE => Some((usize::MAX, &FEATURE_STATE_PROP)),
        _ => None,
    }
}

/// Serialize the current value of `property_id` into `out`.
pub(crate) fn read_property(
    ctx: &mut CommandContext<'_>,
    property_id: u8,
    out: &mut PropertyBuf,
) -> Result<(), CommandError> {
    let feature = ctx.feature;
    let Some((index, prop)) = resolve(feature, property_id) else {
        return Err(ReservedException::UnknownProperty.into());
    };
    match &prop.backing {
        PropertyBacking::Computed { get, .. } => get(ctx, out),
        PropertyBacking::Stored { .. } => {
            let Some(slot) = ctx.pool.get(ctx.feature_index, index) else {
                debug_assert!(false, "stored property without a pool slot");
                return Err(ReservedException::UnknownProperty.into());
            };
            let value = match prop.dtype {
                // Text reads back up to (excluding) its NUL terminator.
                DataType::Utf8 => {
                    let len = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
                    slot.get(..len).unwrap_or(slot)
                }
                _ => slot,
            };
            // Slots are at most 255 bytes, the scratch buffer holds 256.
            let _ = out.extend_from_slice(value);
            Ok(())
        }
    }
}

fn validate_size(prop: &PropertyDescriptor<'_>, len: usize) -> Result<(), CommandError> {
    match prop.dtype.fixed_size() {
        Some(width) => {
            if len != width {
                return Err(CommandError::with_detail(
                    ReservedException::InvalidArgs.wire(),
                    "value size does not match the property dtype",
                ));
            }
        }
        None => {
            // One byte stays reserved: the NUL terminator for UTF-8, and
            // the same strict bound is applied to BLOB values.
            let capacity = match &prop.backing {
                PropertyBacking::Stored { capacity, .. } => *capacity,
                PropertyBacking::Computed { .. } => MAX_PROPERTY_SIZE,
            };
            if len >= capacity {
                return Err(CommandError::with_detail(
                    ReservedException::InvalidArgs.wire(),
                    "value exceeds the property's capacity",
                ));
            }
        }
    }
    Ok(())
}

fn write_stored(
    ctx: &mut CommandContext<'_>,
    index: usize,
    dtype: DataType,
    value: &[u8],
) -> Result<(), CommandError> {
    let feature_index = ctx.feature_index;
    let Some(slot) = ctx.pool.get_mut(feature_index, index) else {
        debug_assert!(false, "stored property without a pool slot");
        return Err(ReservedException::UnknownProperty.into());
    };
    if let Some(dst) = slot.get_mut(..value.len()) {
        dst.copy_from_slice(value);
    }
    if dtype == DataType::Utf8 {
        if let Some(nul) = slot.get_mut(value.len()) {
            *nul = 0;
        }
    }
    Ok(())
}

fn get_property_value(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let &[property_id] = ctx.args() else {
        return Err(CommandError::with_detail(
            ReservedException::InvalidArgs.wire(),
            "expected exactly one property id byte",
        ));
    };
    let mut value = PropertyBuf::new();
    read_property(ctx, property_id, &mut value)?;
    Ok(ctx.reply(value.as_slice()))
}

fn set_property_value(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let Some((&property_id, new_value)) = ctx.args().split_first() else {
        return Err(CommandError::with_detail(
            ReservedException::InvalidArgs.wire(),
            "missing property id",
        ));
    };
    let (index, prop) = match resolve(ctx.feature, property_id) {
        Some(found) => found,
        None => return Err(ReservedException::UnknownProperty.into()),
    };
    if prop.read_only {
        return Err(ReservedException::ReadOnlyProperty.into());
    }
    validate_size(prop, new_value.len())?;
    match &prop.backing {
        PropertyBacking::Computed { set: Some(set), .. } => set(ctx, new_value)?,
        PropertyBacking::Computed { set: None, .. } => {
            return Err(ReservedException::ReadOnlyProperty.into());
        }
        PropertyBacking::Stored { .. } => write_stored(ctx, index, prop.dtype, new_value)?,
    }
    // The reply carries the value actually in effect, which may differ
    // from the requested one when a setter clamps or discretizes.
    let mut actual = PropertyBuf::new();
    read_property(ctx, property_id, &mut actual)?;
    Ok(ctx.reply(actual.as_slice()))
}

static GET_ARGS: [ArgDescriptor<'static>; 1] =
    [ArgDescriptor::named(DataType::UInt8, "property_id")];
static GET_RETURNS: [ArgDescriptor<'static>; 1] =
    [ArgDescriptor::named(DataType::Blob, "property_value")];
static GET_RAISES: [ExceptionDescriptor<'static>; 1] =
    [ReservedException::UnknownProperty.descriptor()];

static SET_ARGS: [ArgDescriptor<'static>; 2] = [
    ArgDescriptor::named(DataType::UInt8, "property_id"),
    ArgDescriptor::named(DataType::Blob, "new_value"),
];
static SET_RETURNS: [ArgDescriptor<'static>; 1] =
    [ArgDescriptor::named(DataType::Blob, "actual_new_value")];
static SET_RAISES: [ExceptionDescriptor<'static>; 2] = [
    ReservedException::UnknownProperty.descriptor(),
    ReservedException::ReadOnlyProperty.descriptor(),
];

/// Descriptor of the mandatory `GetPropertyValue` command.
pub(crate) static GET_PROPERTY_VALUE: CommandDescriptor<'static> = CommandDescriptor {
    id: CMD_GET_PROPERTY_VALUE,
    name: "GetPropertyValue",
    doc: Some("Reads the current value of a property."),
    args: &GET_ARGS,
    returns: &GET_RETURNS,
    raises: &GET_RAISES,
    handler: get_property_value,
};

/// Descriptor of the mandatory `SetPropertyValue` command.
pub(crate) static SET_PROPERTY_VALUE: CommandDescriptor<'static> = CommandDescriptor {
    id: CMD_SET_PROPERTY_VALUE,
    name: "SetPropertyValue",
    doc: Some("Writes a property and returns the value actually in effect."),
    args: &SET_ARGS,
    returns: &SET_RETURNS,
    raises: &SET_RAISES,
    handler: set_property_value,
};

/// The two mandatory commands, in JSON order.
pub(crate) static MANDATORY_COMMANDS: [&CommandDescriptor<'static>; 2] =
    [&GET_PROPERTY_VALUE, &SET_PROPERTY_VALUE];

/// Resolve an engine-implemented command id.
pub(crate) fn mandatory_command(command_id: u8) -> Option<&'static CommandDescriptor<'static>> {
    match command_id {
        CMD_GET_PROPERTY_VALUE => Some(&GET_PROPERTY_VALUE),
        CMD_SET_PROPERTY_VALUE => Some(&SET_PROPERTY_VALUE),
        _ => None,
    }
}
