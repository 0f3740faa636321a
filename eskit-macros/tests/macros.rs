//! 宏行为验证：字段注入、Entity 实现与事件类型标签

use eskit_domain::domain_event::DomainEvent;
use eskit_domain::entity::Entity;
use eskit_domain::value_object::Version;
use eskit_macros::{entity, event};
use serde::{Deserialize, Serialize};

#[entity]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Device {
    label: String,
}

#[entity(id = u64)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sensor {}

#[event(version = 3)]
enum DeviceEvent {
    Registered { label: String },
    #[event(event_type = "device.renamed")]
    Renamed { label: String },
    #[event(event_version = 1)]
    Decommissioned,
}

#[test]
fn entity_macro_injects_id_and_version() {
    let device = Device::new("d-1".to_string());
    assert_eq!(device.id(), "d-1");
    assert_eq!(device.version(), Version::new());
    assert_eq!(device.label, "");

    let mut device = device;
    device.set_version(Version::from_value(4));
    assert_eq!(device.version().value(), 4);
}

#[test]
fn entity_macro_supports_custom_id_type() {
    let sensor = Sensor::new(42);
    assert_eq!(*sensor.id(), 42);
    assert!(sensor.version().is_new());
}

#[test]
fn injected_fields_serialize_with_the_entity() {
    let mut device = Device::new("d-1".to_string());
    device.set_version(Version::from_value(2));
    device.label = "rack-3".into();

    let json = serde_json::to_value(&device).unwrap();
    assert_eq!(json["id"], "d-1");
    assert_eq!(json["version"], 2);
    assert_eq!(json["label"], "rack-3");

    let restored: Device = serde_json::from_value(json).unwrap();
    assert_eq!(restored.id(), "d-1");
    assert_eq!(restored.version().value(), 2);
}

#[test]
fn event_macro_generates_type_tags_and_versions() {
    let registered = DeviceEvent::Registered { label: "x".into() };
    assert_eq!(registered.event_type(), "DeviceEvent.Registered");
    assert_eq!(registered.event_version(), 3);

    // 变体级覆写
    let renamed = DeviceEvent::Renamed { label: "y".into() };
    assert_eq!(renamed.event_type(), "device.renamed");
    assert_eq!(renamed.event_version(), 3);

    let gone = DeviceEvent::Decommissioned;
    assert_eq!(gone.event_type(), "DeviceEvent.Decommissioned");
    assert_eq!(gone.event_version(), 1);
}

#[test]
fn event_macro_applies_serde_derives() {
    let e = DeviceEvent::Registered { label: "x".into() };
    let json = serde_json::to_string(&e).unwrap();
    let back: DeviceEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(e, back);
}
