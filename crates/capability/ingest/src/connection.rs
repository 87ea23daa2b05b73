//! 单连接处理

use crate::{FixHandler, IngestError};
use domain::{AckFrame, ProtocolTag, now_epoch_ms};
use fleet_protocol::{
    DecodeError, Detection, Frame, FrameAssembler, FrameError, ProtocolDetector, decoder_for,
};
use fleet_session::{ConnectionId, SessionError, SessionRegistry};
use fleet_telemetry::{
    record_checksum_failure, record_connection_accepted, record_connection_closed,
    record_decode_failure, record_fix_dropped, record_fixes_decoded, record_frame,
    record_frame_overflow, record_identity_conflict, record_unknown_protocol,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;
/// 日志中原始帧最多输出的字节数
const LOG_FRAME_BYTES: usize = 64;

pub(crate) struct ConnectionShared {
    pub(crate) detector: ProtocolDetector,
    pub(crate) max_frame_buffer_bytes: usize,
    pub(crate) detect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) handler: Arc<dyn FixHandler>,
}

enum ReadOutcome {
    Data(usize),
    Closed,
    Cancelled,
}

struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    stream: TcpStream,
    assembler: FrameAssembler,
    shared: Arc<ConnectionShared>,
    cancel: CancellationToken,
    buf: Vec<u8>,
}

/// 处理一个连接直到关闭；错误只记录日志
pub(crate) async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    shared: Arc<ConnectionShared>,
    cancel: CancellationToken,
) {
    record_connection_accepted();
    let id = shared
        .registry
        .register(remote_addr, cancel.clone(), now_epoch_ms());
    info!(target: "fleet.ingest", connection_id = id, remote = %remote_addr, "connection_accepted");

    let mut connection = Connection {
        id,
        remote_addr,
        stream,
        assembler: FrameAssembler::new(shared.max_frame_buffer_bytes),
        shared,
        cancel,
        buf: vec![0u8; READ_CHUNK],
    };
    let result = connection.run().await;

    let session = connection.shared.registry.remove(id);
    record_connection_closed();
    let protocol = connection.assembler.protocol();
    let device_id = session
        .and_then(|session| session.device_id)
        .unwrap_or_else(|| "-".to_string());
    match result {
        Ok(()) => info!(
            target: "fleet.ingest",
            connection_id = id,
            remote = %remote_addr,
            protocol = ?protocol,
            device_id = %device_id,
            "connection_closed"
        ),
        Err(err) => warn!(
            target: "fleet.ingest",
            connection_id = id,
            remote = %remote_addr,
            protocol = ?protocol,
            device_id = %device_id,
            reason = %err,
            "connection_closed"
        ),
    }
}

impl Connection {
    async fn run(&mut self) -> Result<(), IngestError> {
        let Some(tag) = self.detect().await? else {
            return Ok(());
        };
        let frames = self.assembler.drain().map_err(overflow)?;
        self.process(tag, frames).await?;

        loop {
            let n = match self.read(self.shared.read_timeout, "read").await? {
                ReadOutcome::Data(n) => n,
                ReadOutcome::Closed | ReadOutcome::Cancelled => return Ok(()),
            };
            self.shared.registry.touch(self.id, now_epoch_ms());
            let frames = self.assembler.feed(&self.buf[..n]).map_err(overflow)?;
            self.process(tag, frames).await?;
        }
    }

    /// 识别阶段：连接被关闭或取消时返回 `None`
    async fn detect(&mut self) -> Result<Option<ProtocolTag>, IngestError> {
        let deadline = tokio::time::Instant::now() + self.shared.detect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let n = match self.read(remaining, "detect").await {
                Ok(ReadOutcome::Data(n)) => n,
                Ok(ReadOutcome::Closed | ReadOutcome::Cancelled) => return Ok(None),
                Err(IngestError::Timeout(stage)) => {
                    record_unknown_protocol();
                    return Err(IngestError::Timeout(stage));
                }
                Err(err) => return Err(err),
            };
            self.assembler.feed(&self.buf[..n]).map_err(overflow)?;
            let max_probe = self.shared.detector.max_probe();
            match self.shared.detector.detect(self.assembler.probe(max_probe)) {
                Detection::Detected(tag) => {
                    self.assembler.assign(tag);
                    self.shared.registry.set_protocol(self.id, tag);
                    self.shared.registry.touch(self.id, now_epoch_ms());
                    info!(
                        target: "fleet.ingest",
                        connection_id = self.id,
                        remote = %self.remote_addr,
                        protocol = %tag,
                        "protocol_detected"
                    );
                    return Ok(Some(tag));
                }
                Detection::NeedMore => continue,
                Detection::Unknown => {
                    record_unknown_protocol();
                    warn!(
                        target: "fleet.ingest",
                        connection_id = self.id,
                        remote = %self.remote_addr,
                        head = %hex::encode(self.assembler.probe(LOG_FRAME_BYTES)),
                        reason = "no_rule_matched",
                        "protocol_unknown"
                    );
                    return Err(IngestError::UnknownProtocol);
                }
            }
        }
    }

    async fn read(
        &mut self,
        timeout: Duration,
        stage: &'static str,
    ) -> Result<ReadOutcome, IngestError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(ReadOutcome::Cancelled),
            read = tokio::time::timeout(timeout, self.stream.read(&mut self.buf)) => match read {
                Err(_) => Err(IngestError::Timeout(stage)),
                Ok(Ok(0)) => Ok(ReadOutcome::Closed),
                Ok(Ok(n)) => Ok(ReadOutcome::Data(n)),
                Ok(Err(err)) => Err(IngestError::Io(err)),
            },
        }
    }

    async fn process(&mut self, tag: ProtocolTag, frames: Vec<Frame>) -> Result<(), IngestError> {
        if frames.is_empty() {
            return Ok(());
        }
        let Some(decoder) = decoder_for(tag) else {
            return Err(IngestError::UnknownProtocol);
        };
        for frame in frames {
            record_frame(tag);
            let received_at_ms = now_epoch_ms();
            let context = self
                .shared
                .registry
                .context(self.id)
                .ok_or(SessionError::NotRegistered(self.id))?;
            let device_id = context.device_id.clone();

            let decoded = match decoder.decode(frame.as_bytes(), &context) {
                Ok(decoded) => decoded,
                Err(err) => {
                    self.log_decode_failure(tag, device_id.as_deref(), &frame, &err);
                    continue;
                }
            };

            if let Err(err) = self.shared.registry.apply_update(self.id, &decoded.update) {
                if matches!(err, SessionError::IdentityConflict { .. }) {
                    record_identity_conflict();
                }
                return Err(err.into());
            }
            if let Some(ack) = &decoded.ack {
                self.write_ack(ack).await?;
            }

            for dropped in &decoded.dropped {
                record_fix_dropped(tag);
                warn!(
                    target: "fleet.protocol",
                    connection_id = self.id,
                    protocol = %tag,
                    device_id = decoded.update.identity.as_deref().or(device_id.as_deref()).unwrap_or("-"),
                    index = dropped.index,
                    reason = %dropped.reason,
                    "fix_dropped"
                );
            }
            record_fixes_decoded(tag, decoded.fixes.len() as u64);
            debug!(
                target: "fleet.ingest",
                connection_id = self.id,
                protocol = %tag,
                bytes = frame.bytes.len(),
                fixes = decoded.fixes.len(),
                "frame_decoded"
            );

            for fix in decoded.fixes {
                if let Err(err) = self.shared.handler.handle(fix, received_at_ms).await {
                    warn!(
                        target: "fleet.ingest",
                        connection_id = self.id,
                        protocol = %tag,
                        error = %err,
                        "fix_handler_failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn write_ack(&mut self, ack: &AckFrame) -> Result<(), IngestError> {
        tokio::time::timeout(self.shared.write_timeout, self.stream.write_all(&ack.bytes))
            .await
            .map_err(|_| IngestError::Timeout("ack write"))??;
        Ok(())
    }

    fn log_decode_failure(
        &self,
        tag: ProtocolTag,
        device_id: Option<&str>,
        frame: &Frame,
        err: &DecodeError,
    ) {
        let head = hex::encode(&frame.as_bytes()[..frame.bytes.len().min(LOG_FRAME_BYTES)]);
        if err.is_integrity() {
            record_checksum_failure(tag);
            warn!(
                target: "fleet.protocol",
                connection_id = self.id,
                protocol = %tag,
                device_id = device_id.unwrap_or("-"),
                frame = %head,
                reason = %err,
                "frame_checksum_mismatch"
            );
        } else {
            record_decode_failure(tag);
            warn!(
                target: "fleet.protocol",
                connection_id = self.id,
                protocol = %tag,
                device_id = device_id.unwrap_or("-"),
                frame = %head,
                reason = %err,
                "frame_decode_failed"
            );
        }
    }
}

fn overflow(err: FrameError) -> IngestError {
    record_frame_overflow();
    IngestError::Frame(err)
}
