use domain::{AckFrame, DecodedFix, ProtocolTag, TelemetryRecord};

#[test]
fn decoded_fix_defaults() {
    let fix = DecodedFix::new("864000000000001", ProtocolTag::Gt06, 1_700_000_000_000, 22.5, 114.0);
    assert_eq!(fix.device_id, "864000000000001");
    assert!(fix.gps_valid);
    assert!(fix.sequence_no.is_none());
    assert!(fix.ignition.is_none());
}

#[test]
fn telemetry_record_serializes_protocol_as_snake_case() {
    let record = TelemetryRecord {
        device_id: "dev-1".to_string(),
        vehicle_id: None,
        protocol: ProtocolTag::Teltonika,
        timestamp_ms: 1000,
        received_at_ms: 2000,
        lat: 1.0,
        lng: 2.0,
        speed_kmh: 0.0,
        heading_deg: 0.0,
        altitude_m: None,
        gps_valid: true,
        hdop: None,
        satellites: Some(7),
        ignition: Some(true),
        fuel_percent: None,
        alarm_code: None,
        odometer_m: None,
        sequence_no: Some(3),
    };
    let json = serde_json::to_value(&record).expect("json");
    assert_eq!(json["protocol"], "teltonika");
    assert_eq!(json["vehicle_id"], serde_json::Value::Null);
    assert_eq!(json["sequence_no"], 3);
}

#[test]
fn ack_frame_text() {
    assert_eq!(AckFrame::text("LOAD").bytes, b"LOAD".to_vec());
}

#[test]
fn now_is_positive() {
    assert!(domain::now_epoch_ms() > 0);
}
