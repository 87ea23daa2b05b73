//! OsmAnd HTTP 推送入口

use crate::{FixHandler, IngestError};
use domain::{ProtocolTag, now_epoch_ms};
use fleet_protocol::{SessionContext, decoder_for};
use fleet_telemetry::{record_decode_failure, record_fixes_decoded, record_frame};
use tracing::{debug, warn};

/// 解码一次 OsmAnd 推送（查询串或表单体）并交给处理器，返回接收的点数
///
/// 解码失败映射为 [`IngestError::BadRequest`]，由 HTTP 层转成 400。
pub async fn ingest_http_push(
    payload: &[u8],
    handler: &dyn FixHandler,
) -> Result<usize, IngestError> {
    let tag = ProtocolTag::Osmand;
    let decoder = decoder_for(tag).ok_or(IngestError::UnknownProtocol)?;
    let received_at_ms = now_epoch_ms();
    record_frame(tag);

    let decoded = decoder
        .decode(payload, &SessionContext::default())
        .map_err(|err| {
            record_decode_failure(tag);
            warn!(target: "fleet.ingest", protocol = %tag, reason = %err, "http_push_rejected");
            IngestError::BadRequest(err.to_string())
        })?;

    let count = decoded.fixes.len();
    record_fixes_decoded(tag, count as u64);
    for fix in decoded.fixes {
        debug!(target: "fleet.ingest", protocol = %tag, device_id = %fix.device_id, "http_push_fix");
        handler.handle(fix, received_at_ms).await?;
    }
    Ok(count)
}
