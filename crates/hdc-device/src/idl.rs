//! Streaming generator of the device's JSON self-description.
//!
//! The document is streamed fragment by fragment into the transmit
//! composer and never materialized in RAM. Descriptor strings are written
//! unescaped; engine construction rejects strings that would need
//! escaping, so the output is always well-formed JSON.

use core::fmt::Write as _;

use crate::descriptor::{
    ArgDescriptor, CommandDescriptor, DeviceDescriptor, EventDescriptor, ExceptionDescriptor,
    FeatureDescriptor, PropertyBacking, PropertyDescriptor, StateDescriptor,
};
use crate::event::{FEATURE_STATE_TRANSITION_EVENT, LOG_EVENT};
use crate::message::{MessageType, MetaId};
use crate::property::{MANDATORY_COMMANDS, MANDATORY_PROPERTIES};
use crate::txbuf::MessageTx;

struct Json<'a> {
    tx: &'a mut dyn MessageTx,
}

impl Json<'_> {
    fn raw(&mut self, s: &str) {
        self.tx.push(s.as_bytes());
    }

    fn string(&mut self, s: &str) {
        self.raw("\"");
        self.raw(s);
        self.raw("\"");
    }

    fn number(&mut self, n: u32) {
        let _ = write!(self, "{n}");
    }

    fn boolean(&mut self, b: bool) {
        self.raw(if b { "true" } else { "false" });
    }

    /// `,"name":"value"` — or nothing when the field is absent.
    fn opt_string_field(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.raw(",\"");
            self.raw(name);
            self.raw("\":");
            self.string(value);
        }
    }
}

impl core::fmt::Write for Json<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.raw(s);
        Ok(())
    }
}

fn sep(out: &mut Json<'_>, first: &mut bool) {
    if *first {
        *first = false;
    } else {
        out.raw(",");
    }
}

/// Stream the whole description as one Meta reply message.
pub(crate) fn stream(tx: &mut dyn MessageTx, device: &DeviceDescriptor<'_>, max_request: u32) {
    tx.begin();
    tx.push(&[MessageType::Meta.wire(), MetaId::IdlJson.wire()]);
    let mut out = Json { tx };
    out.raw("{\"version\":");
    out.string(crate::PROTOCOL_VERSION);
    out.raw(",\"max_req\":");
    out.number(max_request);
    out.raw(",\"features\":[");
    let mut first = true;
    for feature in device.features {
        sep(&mut out, &mut first);
        write_feature(&mut out, feature);
    }
    out.raw("]}");
    out.tx.end();
}

fn write_feature(out: &mut Json<'_>, feature: &FeatureDescriptor<'_>) {
    out.raw("{\"id\":");
    out.number(feature.id.into());
    out.raw(",\"name\":");
    out.string(feature.name);
    out.raw(",\"cls\":");
    out.string(feature.class_name);
    out.raw(",\"version\":");
    out.string(feature.class_version);
    out.raw(",\"doc\":");
    out.string(feature.doc);

    out.raw(",\"states\":[");
    let mut first = true;
    for state in feature.states {
        sep(out, &mut first);
        write_state(out, state);
    }

    out.raw("],\"commands\":[");
    let mut first = true;
    for command in feature.commands {
        sep(out, &mut first);
        write_command(out, command);
    }
    for command in MANDATORY_COMMANDS {
        sep(out, &mut first);
        write_command(out, command);
    }

    out.raw("],\"events\":[");
    let mut first = true;
    for event in feature.events {
        sep(out, &mut first);
        write_event(out, event);
    }
    sep(out, &mut first);
    write_event(out, &LOG_EVENT);
    sep(out, &mut first);
    write_event(out, &FEATURE_STATE_TRANSITION_EVENT);

    out.raw("],\"properties\":[");
    let mut first = true;
    for property in feature.properties {
        sep(out, &mut first);
        write_property(out, property);
    }
    for property in MANDATORY_PROPERTIES {
        sep(out, &mut first);
        write_property(out, property);
    }
    out.raw("]}");
}

fn write_state(out: &mut Json<'_>, state: &StateDescriptor<'_>) {
    out.raw("{\"id\":");
    out.number(state.id.into());
    out.raw(",\"name\":");
    out.string(state.name);
    out.opt_string_field("doc", state.doc);
    out.raw("}");
}

fn write_command(out: &mut Json<'_>, command: &CommandDescriptor<'_>) {
    out.raw("{\"id\":");
    out.number(command.id.into());
    out.raw(",\"name\":");
    out.string(command.name);
    out.opt_string_field("doc", command.doc);
    write_args(out, "args", command.args);
    write_args(out, "returns", command.returns);
    if !command.raises.is_empty() {
        out.raw(",\"raises\":[");
        let mut first = true;
        for exception in command.raises {
            sep(out, &mut first);
            write_exception(out, exception);
        }
        out.raw("]");
    }
    out.raw("}");
}

fn write_exception(out: &mut Json<'_>, exception: &ExceptionDescriptor<'_>) {
    out.raw("{\"id\":");
    out.number(exception.id.into());
    out.raw(",\"name\":");
    out.string(exception.name);
    out.opt_string_field("doc", exception.doc);
    out.raw("}");
}

fn write_event(out: &mut Json<'_>, event: &EventDescriptor<'_>) {
    out.raw("{\"id\":");
    out.number(event.id.into());
    out.raw(",\"name\":");
    out.string(event.name);
    out.opt_string_field("doc", event.doc);
    write_args(out, "args", event.args);
    out.raw("}");
}

fn write_args(out: &mut Json<'_>, name: &str, args: &[ArgDescriptor<'_>]) {
    if args.is_empty() {
        return;
    }
    out.raw(",\"");
    out.raw(name);
    out.raw("\":[");
    let mut first = true;
    for arg in args {
        sep(out, &mut first);
        out.raw("{\"dtype\":");
        out.string(arg.dtype.name());
        out.opt_string_field("name", arg.name);
        out.opt_string_field("doc", arg.doc);
        out.raw("}");
    }
    out.raw("]");
}

fn write_property(out: &mut Json<'_>, property: &PropertyDescriptor<'_>) {
    out.raw("{\"id\":");
    out.number(property.id.into());
    out.raw(",\"name\":");
    out.string(property.name);
    out.raw(",\"dtype\":");
    out.string(property.dtype.name());
    if property.dtype.is_variable_size() {
        if let PropertyBacking::Stored { capacity, .. } = &property.backing {
            if *capacity > 0 {
                out.raw(",\"size\":");
                // Capacities are validated to fit one property value.
                out.number(u32::try_from(*capacity).unwrap_or(u32::MAX));
            }
        }
    }
    out.raw(",\"ro\":");
    out.boolean(property.read_only);
    out.opt_string_field("doc", property.doc);
    out.raw("}");
}
