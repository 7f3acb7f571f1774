use serde_json::json;

use crate::common::TestHarness;
use wsim_core::components::{BeaconConfig, MobilityConfig, SinkConfig};
use wsim_core::noise::Averaging;
use wsim_core::{create_model, model_kinds, Modulation, Position, SimConfig, SimError, StopReason};

#[test]
fn test_partial_json_keeps_defaults() {
    let config = SimConfig::from_json(
        r#"{
            "seed": 7,
            "simulation_end": 5000000,
            "noise": { "channels": 4, "averaging": "Mean" },
            "medium": { "propagation": { "exponent": 3.0 } }
        }"#,
    )
    .unwrap();

    assert_eq!(config.seed, 7);
    assert_eq!(config.simulation_end, Some(5_000_000));
    assert_eq!(config.milestone_period, None);
    assert_eq!(config.noise.channels, 4);
    assert_eq!(config.noise.averaging, Averaging::Mean);
    assert_eq!(config.noise.white_noise_dbm, -100.0);
    assert_eq!(config.medium.propagation.exponent, 3.0);
    assert_eq!(config.medium.propagation.reference_loss_db, 40.0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = SimConfig::from_json(r#"{ "noise": { "channels": 0 } }"#).unwrap_err();
    assert!(matches!(err, SimError::Config(_)));

    let err = SimConfig::from_json(r#"{ "milestone_period": 0 }"#).unwrap_err();
    assert!(matches!(err, SimError::Config(_)));

    let err = SimConfig::from_json("{ not json").unwrap_err();
    assert!(matches!(err, SimError::Config(_)));
}

#[test]
fn test_models_from_kind_and_json() {
    assert_eq!(model_kinds(), vec!["Beacon", "Sink"]);

    let beacon = create_model("Beacon", json!({ "period": 500000, "modulation": { "kind": "Qpsk" } }))
        .unwrap()
        .unwrap();
    assert_eq!(beacon.kind(), "Beacon");
    let config: BeaconConfig = serde_json::from_value(beacon.encode_config()).unwrap();
    assert_eq!(config.period, 500_000);
    assert_eq!(config.modulation, Modulation::Qpsk);
    assert_eq!(config.payload_bytes, BeaconConfig::default().payload_bytes);

    let sink = create_model("Sink", serde_json::Value::Null).unwrap().unwrap();
    let config: SinkConfig = serde_json::from_value(sink.encode_config()).unwrap();
    assert_eq!(config, SinkConfig::default());

    assert!(create_model("Router", json!({})).unwrap().is_none());
    assert!(create_model("Beacon", json!({ "period": "soon" })).is_err());
}

#[test]
fn test_mobility_config_tags() {
    let stat: MobilityConfig = serde_json::from_value(json!({
        "kind": "Static",
        "position": { "x": 1.0, "y": 2.0, "z": 0.0 }
    }))
    .unwrap();
    assert_eq!(
        stat,
        MobilityConfig::Static {
            position: Position::new(1.0, 2.0, 0.0)
        }
    );

    let linear: MobilityConfig = serde_json::from_value(json!({
        "kind": "Linear",
        "origin": { "x": 0.0, "y": 0.0, "z": 0.0 },
        "velocity": { "x": 10.0, "y": 0.0, "z": 0.0 },
        "start": 0,
        "update_period": null
    }))
    .unwrap();
    let mut mobility = linear.build();
    assert_eq!(mobility.position(2_000_000_000).x, 20.0);
    assert_eq!(mobility.next_update(0), None);
}

#[test]
fn test_invalid_model_config_is_rejected() {
    let inverted = json!({ "band": { "low": 2401.0, "high": 2400.0 } });
    assert!(matches!(create_model("Beacon", inverted), Err(SimError::Config(_))));
    assert!(matches!(create_model("Beacon", json!({ "period": 0 })), Err(SimError::Config(_))));

    let inverted = json!({ "bands": [{ "low": 2401.0, "high": 2400.0 }] });
    assert!(matches!(create_model("Sink", inverted), Err(SimError::Config(_))));
    assert!(matches!(create_model("Sink", json!({ "per_threshold": 2.0 })), Err(SimError::Config(_))));
}

#[test]
fn test_beacon_on_missing_channel_aborts_cleanly() {
    let mut h = TestHarness::with_config(SimConfig::default().with_end(1_000_000));
    h.add_sink(0, Position::default());
    let config = BeaconConfig {
        channel: 16,
        ..BeaconConfig::default()
    };
    h.add_beacon(1, 0, Position::new(10.0, 0.0, 0.0), config);

    let report = h.run();

    assert!(matches!(report.reason, StopReason::Aborted(SimError::Config(_))));
    assert_eq!(report.clock, 0);
    assert_eq!(h.sim.context().spectrum().active_signal_count(), 0);
}
