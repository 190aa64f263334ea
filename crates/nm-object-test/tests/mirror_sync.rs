//! Mirror synchronization tests
//!
//! Drives an object mirror end to end through the mock bus: dispatch,
//! coalesced notification, refresh paths and their logging.

use std::cell::RefCell;
use std::rc::Rc;

use nm_object::{
    BusError, BusMethod, DispatchOutcome, Field, MarshalError, PropertyInfo, Value,
    DBUS_ERROR_UNKNOWN_PROPERTY,
};
use nm_object_test::{
    device_fixtures, device_path, props, run_local, settle, settle_for, LogCapture,
    NotifyRecorder, TestBus, TestDevice, TEST_INTERFACE, TEST_TIMEOUT,
};
use pretty_assertions::assert_eq;

/// Scenario:
/// 1. `{"Speed": 100}` arrives: field becomes 100, one notification
/// 2. `{"Speed": "bogus"}` arrives: field stays 100, a mismatch is logged,
///    nothing is queued
#[test]
fn test_apply_then_reject() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        let recorder = NotifyRecorder::attach(&device.mirror);
        // Let the change subscription start.
        settle().await;
        let logs = LogCapture::start();

        env.bus
            .emit_properties_changed(&path, TEST_INTERFACE, props([("Speed", Value::U32(100))]));
        settle().await;
        assert_eq!(device.speed.get(), 100);
        assert_eq!(recorder.names(), vec!["speed"]);

        env.bus.emit_properties_changed(
            &path,
            TEST_INTERFACE,
            props([("Speed", Value::from("bogus"))]),
        );
        settle().await;
        assert_eq!(device.speed.get(), 100);
        assert_eq!(recorder.names(), vec!["speed"]);
        assert!(device.mirror.pending_notifications().is_empty());

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("could not demarshal property"));
        for field in [
            "object_type=\"TestDevice\"",
            "property=speed",
            "expected=\"uint32\"",
            "actual=\"string\"",
        ] {
            assert!(warnings[0].contains(field), "{} missing in {}", field, warnings[0]);
        }
    });
}

#[test]
fn test_null_object_path_clears_field() {
    run_local(async {
        let env = TestBus::new();
        let device = TestDevice::new(env.mirror(&device_path(1))).unwrap();
        device
            .ip4_config
            .replace(Some("/org/freedesktop/NetworkManager/IP4Config/7".to_string()));

        let outcome = device.mirror.dispatch("Ip4Config", &Value::null_object_path());
        assert_eq!(outcome, DispatchOutcome::Applied);
        assert_eq!(device.ip4_config.get(), None);

        device.mirror.dispatch("Driver", &Value::from("e1000e"));
        device.mirror.dispatch("Driver", &Value::null_object_path());
        assert_eq!(device.driver.get(), "");
    });
}

#[test]
fn test_mutations_in_one_tick_coalesce() {
    run_local(async {
        let env = TestBus::new();
        let device = TestDevice::new(env.mirror(&device_path(1))).unwrap();
        let recorder = NotifyRecorder::attach(&device.mirror);

        device.mirror.dispatch("Carrier", &Value::Bool(true));
        device.mirror.dispatch("Speed", &Value::U32(10));
        device.mirror.dispatch("Carrier", &Value::Bool(false));
        device.mirror.dispatch("Driver", &Value::from("igb"));
        device.mirror.dispatch("Speed", &Value::U32(1000));

        assert!(device.mirror.notify_scheduled());
        assert_eq!(
            device.mirror.pending_notifications(),
            vec!["carrier", "speed", "driver"]
        );
        assert!(recorder.names().is_empty());

        settle().await;
        assert_eq!(recorder.names(), vec!["carrier", "speed", "driver"]);
        assert!(!device.mirror.notify_scheduled());
        assert_eq!(device.speed.get(), 1000);
        assert!(!device.carrier.get());
    });
}

#[test]
fn test_handler_mutation_goes_to_next_batch() {
    run_local(async {
        let env = TestBus::new();
        let device = Rc::new(TestDevice::new(env.mirror(&device_path(1))).unwrap());
        let recorder = NotifyRecorder::attach(&device.mirror);

        // During the flush of "speed", flip the carrier and check that it
        // lands in a fresh batch rather than the one being emitted.
        let observed = Rc::new(RefCell::new(Vec::new()));
        let sink = observed.clone();
        device.mirror.connect_notify(move |mirror, name| {
            if name == "speed" {
                mirror.dispatch("Carrier", &Value::Bool(true));
                sink.borrow_mut()
                    .push((mirror.notify_scheduled(), mirror.pending_notifications()));
            }
        });

        device.mirror.dispatch("Speed", &Value::U32(100));
        settle().await;

        assert_eq!(
            *observed.borrow(),
            vec![(true, vec!["carrier".to_string()])]
        );
        assert_eq!(recorder.names(), vec!["speed", "carrier"]);
        assert_eq!(recorder.count("carrier"), 1);
        assert!(!device.mirror.notify_scheduled());
    });
}

#[test]
fn test_shadowing_follows_registration_order() {
    run_local(async {
        let env = TestBus::new();
        let mirror = env.mirror(&device_path(1));
        let base_driver = Field::new(String::new());
        let team_driver = Field::new(String::new());
        mirror.register_properties(
            "org.freedesktop.NetworkManager.Device",
            vec![PropertyInfo::new("driver", &base_driver)],
        );
        mirror.register_properties(
            "org.freedesktop.NetworkManager.Device.Team",
            vec![PropertyInfo::new("driver", &team_driver)],
        );

        mirror.dispatch("Driver", &Value::from("team"));
        assert_eq!(team_driver.get(), "team");
        assert_eq!(base_driver.get(), "");

        // An ignored entry in the first table still wins.
        mirror.register_properties(
            "org.freedesktop.NetworkManager.Device.Extra",
            vec![PropertyInfo::ignored("driver")],
        );
        assert_eq!(
            mirror.dispatch("Driver", &Value::from("bond")),
            DispatchOutcome::Ignored
        );
        assert_eq!(team_driver.get(), "team");
    });
}

#[test]
fn test_unknown_property_is_silent() {
    run_local(async {
        let env = TestBus::new();
        let device = TestDevice::new(env.mirror(&device_path(1))).unwrap();
        let logs = LogCapture::start();

        let outcome = device.mirror.dispatch("Mtu", &Value::U32(1500));
        assert_eq!(outcome, DispatchOutcome::Unknown);
        assert!(!device.mirror.notify_scheduled());
        assert!(device.mirror.pending_notifications().is_empty());
        assert!(logs.warnings().is_empty());
        if cfg!(debug_assertions) {
            assert!(logs.contents().contains("unhandled property"));
        }
    });
}

#[test]
fn test_ignored_property_logs_nothing() {
    run_local(async {
        let env = TestBus::new();
        let device = TestDevice::new(env.mirror(&device_path(1))).unwrap();
        let logs = LogCapture::start();

        let outcome = device
            .mirror
            .dispatch("HwAddress", &Value::from("00:11:22:33:44:55"));
        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(logs.contents().is_empty());
        assert!(!device.mirror.notify_scheduled());
    });
}

#[test]
fn test_reload_property_no_reply_is_not_a_warning() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(100, "igb"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        device.speed.replace(7);
        let logs = LogCapture::start();

        env.bus.hang(BusMethod::Get, TEST_INTERFACE);
        device.mirror.reload_property(TEST_INTERFACE, "Speed").await;
        assert_eq!(device.speed.get(), 7);
        assert!(logs.warnings().is_empty());

        env.bus.fail(
            BusMethod::Get,
            TEST_INTERFACE,
            BusError::remote(nm_object::DBUS_ERROR_NO_REPLY, "Get"),
        );
        device.mirror.reload_property(TEST_INTERFACE, "Speed").await;
        assert!(logs.warnings().is_empty());
    });
}

#[test]
fn test_reload_property_other_failure_warns() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(100, "igb"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        let logs = LogCapture::start();

        env.bus.fail(
            BusMethod::Get,
            TEST_INTERFACE,
            BusError::remote(DBUS_ERROR_UNKNOWN_PROPERTY, "No such property 'Speed'"),
        );
        device.mirror.reload_property(TEST_INTERFACE, "Speed").await;

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("could not get property"));
        assert!(warnings[0].contains("object_type=\"TestDevice\""), "{}", warnings[0]);
        assert!(warnings[0].contains("Speed"));
        assert!(warnings[0].contains(&path));
        assert_eq!(device.speed.get(), 0);
    });
}

#[test]
fn test_set_property_failure_names_the_object() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(100, "igb"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        let logs = LogCapture::start();

        env.bus.fail(
            BusMethod::Set,
            TEST_INTERFACE,
            BusError::remote("org.freedesktop.DBus.Error.AccessDenied", "denied"),
        );
        device
            .mirror
            .set_property(TEST_INTERFACE, "Speed", Value::U32(10));
        settle().await;

        assert!(logs.warnings().is_empty());
        if cfg!(debug_assertions) {
            let failures: Vec<String> = logs
                .lines_at("DEBUG")
                .into_iter()
                .filter(|line| line.contains("set property failed"))
                .collect();
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("object_type=\"TestDevice\""), "{}", failures[0]);
            assert!(failures[0].contains(&path));
            assert!(failures[0].contains("AccessDenied"));
        }
    });
}

#[test]
fn test_invalidated_property_is_fetched() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(100, "igb"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        device.mirror.reload_properties().await.unwrap();
        let recorder = NotifyRecorder::attach(&device.mirror);
        settle().await;
        let gets = env.bus.call_count(BusMethod::Get);

        // The signal names the property but carries no value.
        env.bus
            .emit_invalidated(&path, TEST_INTERFACE, props([("Speed", Value::U32(2500))]));
        settle().await;

        assert_eq!(env.bus.call_count(BusMethod::Get), gets + 1);
        assert_eq!(device.speed.get(), 2500);
        assert_eq!(recorder.names(), vec!["speed"]);
    });
}

#[test]
fn test_reload_property_applies_value() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(2500, "igc"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        let recorder = NotifyRecorder::attach(&device.mirror);

        device.mirror.reload_property(TEST_INTERFACE, "Speed").await;
        assert_eq!(device.speed.get(), 2500);
        settle().await;
        assert_eq!(recorder.names(), vec!["speed"]);
    });
}

#[test]
fn test_reapply_same_tick_vs_next_tick() {
    run_local(async {
        let env = TestBus::new();
        let device = TestDevice::new(env.mirror(&device_path(1))).unwrap();
        let recorder = NotifyRecorder::attach(&device.mirror);

        device.mirror.dispatch("Speed", &Value::U32(10));
        device.mirror.dispatch("Speed", &Value::U32(10));
        settle().await;
        assert_eq!(recorder.count("speed"), 1);

        device.mirror.dispatch("Speed", &Value::U32(10));
        settle().await;
        assert_eq!(recorder.count("speed"), 2);
    });
}

#[test]
fn test_batch_with_bad_entry_applies_the_rest() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        let recorder = NotifyRecorder::attach(&device.mirror);

        device.mirror.process_properties_changed(&props([
            ("Speed", Value::from("fast")),
            ("Carrier", Value::Bool(true)),
            ("Driver", Value::from("r8169")),
            ("Bogus", Value::U8(1)),
        ]));
        settle().await;

        assert_eq!(device.speed.get(), 0);
        assert!(device.carrier.get());
        assert_eq!(device.driver.get(), "r8169");
        let mut names = recorder.names();
        names.sort();
        assert_eq!(names, vec!["carrier", "driver"]);
    });
}

#[test]
fn test_reload_properties_retains_earlier_interfaces() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        let mirror = env.mirror(&path);

        let speed = Field::new(0u32);
        let ports: Field<Vec<String>> = Field::default();
        mirror.register_properties(
            "org.example.Ports",
            vec![PropertyInfo::with_marshal(
                "slaves",
                nm_object::marshal_object_path_array,
                &ports,
            )],
        );
        mirror.register_properties(TEST_INTERFACE, vec![PropertyInfo::new("speed", &speed)]);

        env.bus
            .add_object(&path, TEST_INTERFACE, props([("Speed", Value::U32(40_000))]));
        // "org.example.Ports" is not published: its GetAll fails.

        let err = mirror.reload_properties().await.unwrap_err();
        assert_eq!(err.name(), nm_object::DBUS_ERROR_UNKNOWN_INTERFACE);
        assert_eq!(speed.get(), 40_000);
        assert!(!mirror.is_initialized());
        assert_eq!(env.bus.call_count(BusMethod::GetAll), 2);
    });
}

#[test]
fn test_reload_properties_times_out() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(1, "x"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();

        env.bus.hang(BusMethod::GetAll, TEST_INTERFACE);
        let err = device.mirror.reload_properties().await.unwrap_err();
        assert!(err.is_no_reply());
        assert_eq!(err, BusError::no_reply("GetAll", TEST_TIMEOUT));
    });
}

#[test]
fn test_ensure_initialized_failure_is_logged() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(3);
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        let logs = LogCapture::start();

        device.mirror.ensure_initialized().await;
        assert!(!device.mirror.is_initialized());

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("could not initialize"));
        assert!(warnings[0].contains("TestDevice"));
        assert!(warnings[0].contains(&path));

        // Publishing the object lets the next call succeed.
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(100, "igb"));
        device.mirror.ensure_initialized().await;
        assert!(device.mirror.is_initialized());
        assert_eq!(device.speed.get(), 100);
        assert_eq!(device.driver.get(), "igb");
    });
}

#[test]
fn test_ensure_initialized_runs_once() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(100, "igb"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();

        device.mirror.ensure_initialized().await;
        device.mirror.ensure_initialized().await;
        assert_eq!(env.bus.call_count(BusMethod::GetAll), 1);
    });
}

#[test]
fn test_set_property_waits_for_remote_change() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        env.bus
            .add_object(&path, TEST_INTERFACE, device_fixtures::test_device(100, "igb"));
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        device.mirror.reload_properties().await.unwrap();
        settle().await;

        device
            .mirror
            .set_property(TEST_INTERFACE, "Speed", Value::U32(10));
        assert_eq!(device.speed.get(), 100);
        settle().await;
        assert_eq!(env.bus.sets().len(), 1);
        assert_eq!(device.speed.get(), 100);

        // The new value arrives only through the change stream.
        env.bus.set_echo(true);
        device
            .mirror
            .set_property(TEST_INTERFACE, "Speed", Value::U32(25));
        settle().await;
        assert_eq!(device.speed.get(), 25);
    });
}

#[test]
fn test_set_property_failure_is_absorbed() {
    run_local(async {
        let env = TestBus::new();
        let path = device_path(1);
        let device = TestDevice::new(env.mirror(&path)).unwrap();
        let logs = LogCapture::start();

        env.bus.hang(BusMethod::Set, TEST_INTERFACE);
        device
            .mirror
            .set_property(TEST_INTERFACE, "Speed", Value::U32(10));
        settle_for(TEST_TIMEOUT * 2).await;

        assert!(logs.warnings().is_empty());
        assert_eq!(device.speed.get(), 0);
        assert_eq!(env.bus.call_count(BusMethod::Set), 1);
    });
}

#[test]
fn test_busy_field_is_rejected_not_panicking() {
    run_local(async {
        let env = TestBus::new();
        let device = TestDevice::new(env.mirror(&device_path(1))).unwrap();
        device.driver.replace("e1000e".to_string());

        let held = device.driver.borrow();
        let outcome = device.mirror.dispatch("Driver", &Value::from("igb"));
        drop(held);

        assert_eq!(
            outcome,
            DispatchOutcome::Rejected(MarshalError::FieldBusy { expected: "string" })
        );
        assert_eq!(device.driver.get(), "e1000e");
    });
}
