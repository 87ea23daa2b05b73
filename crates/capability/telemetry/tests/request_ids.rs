use fleet_telemetry::new_request_ids;

#[test]
fn request_ids_are_distinct_uuids() {
    let first = new_request_ids();
    let second = new_request_ids();
    assert_eq!(first.request_id.len(), 36);
    assert_ne!(first.request_id, first.trace_id);
    assert_ne!(first.request_id, second.request_id);
}
