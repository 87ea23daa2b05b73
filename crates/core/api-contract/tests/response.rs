use api_contract::{ApiResponse, PushAcceptedDto};

#[test]
fn push_accepted_wraps_in_success_envelope() {
    let response = ApiResponse::success(PushAcceptedDto { accepted: 1 });
    assert!(response.success);
    assert_eq!(response.data.map(|data| data.accepted), Some(1));
    assert!(response.error.is_none());
}

#[test]
fn unavailable_ingest_carries_error_code() {
    let response = ApiResponse::<PushAcceptedDto>::error("INGEST.UNAVAILABLE", "pipeline closed");
    assert!(!response.success);
    assert!(response.data.is_none());
    let error = response.error.unwrap();
    assert_eq!(error.code, "INGEST.UNAVAILABLE");
    assert_eq!(error.message, "pipeline closed");
}
