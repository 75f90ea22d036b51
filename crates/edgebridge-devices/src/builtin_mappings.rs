//! Built-in capability mappings.
//!
//! The standard table of Bus facades and the Edge resources they occupy.
//! Paths follow the IPSO object/instance/resource layout; ranges and
//! units are published as static resources next to the value.

use crate::protocol::{
    AddressEntry, CapabilityMapping, Handler, Operation, Sender, ValueType,
};
use serde_json::{json, Value};

use Operation::{Get, Put};

const FACADE_PREFIX: &str = "Facades/";

/// A read-only measurement pushed to the Edge as it changes.
fn sensor(facade: &str, state: &str, path: &str, initial: Value, ty: ValueType) -> CapabilityMapping {
    CapabilityMapping::new(format!("{}{}", FACADE_PREFIX, facade))
        .with_state(state)
        .with_handler("get", Handler::GetState)
        .with_sender("send", Sender::Identity)
        .with_entry(
            AddressEntry::new(path)
                .with_operations(&[Get])
                .with_value(initial)
                .with_type(ty)
                .with_get_handler("get")
                .with_state_sender("send")
                .with_initial_push(),
        )
}

/// A read-only flag with a custom outbound transform.
fn flag(facade: &str, state: &str, path: &str, send: Sender) -> CapabilityMapping {
    CapabilityMapping::new(format!("{}{}", FACADE_PREFIX, facade))
        .with_state(state)
        .with_handler("get", Handler::GetState)
        .with_sender("send", send)
        .with_entry(
            AddressEntry::new(path)
                .with_operations(&[Get])
                .with_value(json!(false))
                .with_type(ValueType::Boolean)
                .with_get_handler("get")
                .with_state_sender("send")
                .with_initial_push(),
        )
}

/// A read/write control.
fn control(
    facade: &str,
    state: &str,
    path: &str,
    initial: Value,
    ty: ValueType,
    put: Handler,
    send: Sender,
) -> CapabilityMapping {
    CapabilityMapping::new(format!("{}{}", FACADE_PREFIX, facade))
        .with_state(state)
        .with_handler("get", Handler::GetState)
        .with_handler("put", put)
        .with_sender("send", send)
        .with_entry(
            AddressEntry::new(path)
                .with_operations(&[Get, Put])
                .with_value(initial)
                .with_type(ty)
                .with_get_handler("get")
                .with_put_handler("put")
                .with_state_sender("send")
                .with_initial_push(),
        )
}

/// An event-only capability.
fn trigger(facade: &str, event: &str, path: &str, send: Sender) -> CapabilityMapping {
    CapabilityMapping::new(format!("{}{}", FACADE_PREFIX, facade))
        .with_event(event)
        .with_sender("send", send)
        .with_entry(
            AddressEntry::new(path)
                .with_operations(&[Get])
                .with_value(json!(false))
                .with_type(ValueType::Boolean)
                .with_event_sender("send"),
        )
}

fn fixed(path: &str, value: Value, ty: ValueType) -> AddressEntry {
    AddressEntry::new(path)
        .with_operations(&[Get])
        .with_value(value)
        .with_type(ty)
}

fn ranged(mapping: CapabilityMapping, object: &str, min: Value, max: Value) -> CapabilityMapping {
    mapping
        .with_static_entry(fixed(&format!("{}/5603", object), min, ValueType::Float))
        .with_static_entry(fixed(&format!("{}/5604", object), max, ValueType::Float))
}

fn set_state() -> Handler {
    Handler::SetState
}

fn on_off(on: Value, off: Value) -> Handler {
    Handler::SetBoolean { on, off }
}

fn equals(value: Value) -> Sender {
    Sender::Equals { value }
}

fn truthy() -> Sender {
    Sender::Truthy { numeric: false }
}

fn setpoint(facade: &str, state: &str, instance: u32) -> CapabilityMapping {
    control(
        facade,
        state,
        &format!("/3308/{}/5900", instance),
        json!(0.0),
        ValueType::Float,
        set_state(),
        Sender::Identity,
    )
}

fn thermostat_text(facade: &str, state: &str, instance: u32, initial: &str) -> CapabilityMapping {
    control(
        facade,
        state,
        &format!("/3341/{}/5527", instance),
        json!(initial),
        ValueType::String,
        set_state(),
        Sender::Identity,
    )
}

fn relay_status(facade: &str, state: &str, instance: u32) -> CapabilityMapping {
    flag(facade, state, &format!("/3200/{}/5500", instance), equals(json!("open")))
}

/// The standard capability table.
pub fn builtin_capability_mappings() -> Vec<CapabilityMapping> {
    vec![
        // ========== Temperature ==========
        ranged(
            sensor("HasTemperature", "temperature", "/3303/0/5700", json!(1.0), ValueType::Float),
            "/3303/0",
            json!(0.0),
            json!(200.0),
        ),
        control(
            "TemperatureDisplayMode",
            "temperatureDisplayMode",
            "/3303/0/5701",
            json!("celsius"),
            ValueType::String,
            set_state(),
            Sender::Identity,
        ),
        sensor("ThermostatReturnTemperature", "returnTemperature", "/3303/1/5700", json!(0.0), ValueType::Float),
        sensor("ThermostatSupplyTemperature", "supplyTemperature", "/3303/2/5700", json!(0.0), ValueType::Float),
        ranged(
            control(
                "HasWhiteTemp",
                "K",
                "/3303/3/5700",
                json!(1000),
                ValueType::Int,
                set_state(),
                Sender::Identity,
            ),
            "/3303/3",
            json!(1000),
            json!(10000),
        ),
        // ========== Thermostat ==========
        setpoint("CoolTemperatureLevel", "coolTemperatureLevel", 1),
        setpoint("HeatTemperatureLevel", "heatTemperatureLevel", 2),
        setpoint("OccupiedCoolTemperatureLevel", "occupiedCoolTemperatureLevel", 4),
        setpoint("OccupiedHeatTemperatureLevel", "occupiedHeatTemperatureLevel", 5),
        setpoint("UnoccupiedCoolTemperatureLevel", "unoccupiedCoolTemperatureLevel", 7),
        setpoint("UnoccupiedHeatTemperatureLevel", "unoccupiedHeatTemperatureLevel", 8),
        setpoint("ThermostatDeadband", "deadband", 9),
        thermostat_text("ThermostatMode", "thermostatMode", 0, "off"),
        thermostat_text("OccupancyMode", "occupancyMode", 1, "unoccupied"),
        thermostat_text("ThermostatFanMode", "thermostatFanMode", 2, "auto"),
        sensor("ThermostatModeStatus", "thermostatModeStatus", "/3341/5/5527", json!("OFF"), ValueType::String),
        sensor("ThermostatFanStatus", "thermostatFanStatus", "/3341/6/5527", json!("off"), ValueType::String),
        relay_status("ThermostatGStatus", "gStatus", 0),
        relay_status("ThermostatW1Status", "w1Status", 1),
        relay_status("ThermostatW2Status", "w2Status", 2),
        relay_status("ThermostatY1Status", "y1Status", 3),
        relay_status("ThermostatY2Status", "y2Status", 4),
        // ========== Lighting ==========
        control(
            "Switchable",
            "power",
            "/3311/0/5850",
            json!(false),
            ValueType::Boolean,
            on_off(json!("on"), json!("off")),
            equals(json!("on")),
        ),
        control(
            "Dimmable",
            "brightness",
            "/3311/0/5851",
            json!(0),
            ValueType::Int,
            Handler::SetScaled { divisor: 100.0 },
            Sender::Scale { factor: 100.0 },
        ),
        control(
            "Colorable",
            "hsl",
            "/3335/0/5706",
            json!("0,0,0"),
            ValueType::String,
            Handler::SetHsl,
            Sender::HslString,
        )
        .with_static_entry(fixed("/3335/0/5701", json!("0,0,0"), ValueType::String)),
        ranged(
            sensor("HasLuminance", "luminance", "/3301/0/5700", json!(0), ValueType::Int),
            "/3301/0",
            json!(0),
            json!(65535),
        ),
        // ========== Inputs ==========
        control(
            "Button",
            "pressed",
            "/3347/0/5850",
            json!(false),
            ValueType::Boolean,
            on_off(json!(true), json!(false)),
            Sender::Truthy { numeric: true },
        ),
        flag("HasMotion", "motion", "/3302/0/5500", truthy()),
        flag("HasTamper", "tamper", "/3306/0/5850", truthy()),
        flag("Triggerable", "triggered", "/3306/1/5850", truthy()),
        trigger("HumidityTrigger", "humidityTrigger", "/3306/2/5850", equals(json!("on"))),
        trigger("TemperatureTrigger", "temperatureTrigger", "/3306/3/5850", equals(json!("on"))),
        flag("HasVibration", "vibration", "/3338/0/5850", truthy()),
        flag("HasContact", "contact", "/3345/0/5500", truthy()),
        flag("Flipflop", "flipflop", "/3342/0/5500", equals(json!("on"))),
        CapabilityMapping::new(format!("{}HasPassCode", FACADE_PREFIX))
            .with_state("passCode")
            .with_handler("put", set_state())
            .with_sender("send", Sender::BracketList)
            .with_entry(
                AddressEntry::new("/11001/0/5527")
                    .with_operations(&[Put])
                    .with_value(json!("[]"))
                    .with_type(ValueType::String)
                    .with_put_handler("put")
                    .with_state_sender("send"),
            ),
        control(
            "HasPTZ",
            "ptz",
            "/3332/0/5702",
            json!({}),
            ValueType::Opaque,
            set_state(),
            Sender::Identity,
        ),
        // ========== Power and security ==========
        sensor("HasBattery", "battery", "/3305/0/5800", json!(0.0), ValueType::Float)
            .with_static_entry(fixed("/3305/0/5803", json!(0), ValueType::Float))
            .with_static_entry(fixed("/3305/0/5804", json!(100), ValueType::Float)),
        sensor("HasEnergyConsumption", "energy", "/3331/0/5805", json!(0.0), ValueType::Float),
        ranged(
            control(
                "Regulator",
                "regulator",
                "/3337/0/5536",
                json!(0.0),
                ValueType::Float,
                set_state(),
                Sender::Identity,
            ),
            "/3337/0",
            json!(0),
            json!(100),
        ),
        control(
            "HasLock",
            "lock",
            "/8/0/5500",
            json!(false),
            ValueType::Boolean,
            on_off(json!("lock"), json!("unlock")),
            equals(json!("lock")),
        ),
        control(
            "Override",
            "override",
            "/3201/0/5550",
            json!(false),
            ValueType::Boolean,
            set_state(),
            Sender::Identity,
        ),
        // ========== Environment ==========
        ranged(
            sensor("HasHumidity", "humidity", "/3304/0/5700", json!(0.0), ValueType::Float),
            "/3304/0",
            json!(0),
            json!(100),
        ),
        ranged(
            sensor("HasSmokeAlarm", "smoke", "/3340/0/5700", json!(0.0), ValueType::Float),
            "/3340/0",
            json!(0),
            json!(255),
        ),
        sensor("HasWaterLeakDetector", "leak", "/10272/0/5700", json!(0.0), ValueType::Float),
        ranged(
            sensor("HasUltraviolet", "ultraviolet", "/3300/0/5700", json!(0.0), ValueType::Float),
            "/3300/0",
            json!(0),
            json!(65535),
        ),
        // ========== Radio ==========
        ranged(
            sensor("SignalStrength", "rssi", "/3370/0/6035", json!(0), ValueType::Int),
            "/3370/0",
            json!(-200),
            json!(0),
        )
        .with_static_entry(fixed("/3370/0/5701", json!("dBm"), ValueType::String)),
    ]
}
