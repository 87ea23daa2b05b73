//! 分片有界队列 + 每分片一个写入 worker

use crate::dedup::DedupCache;
use crate::error::{PipelineError, SinkError};
use crate::sink::TelemetrySink;
use domain::{TelemetryRecord, now_epoch_ms};
use fleet_telemetry::{
    queue_depth_add, queue_depth_sub, record_dropped_duplicate, record_dropped_shed,
    record_end_to_end_latency_ms, record_write_failure, record_write_latency_ms,
    record_write_success,
};
use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pipeline 参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub shards: usize,
    /// 单分片队列上限
    pub queue_capacity: usize,
    pub batch_size: usize,
    /// 队列满时提交方最多等待的时长，超时后丢弃最旧记录
    pub submit_wait: Duration,
    pub write_timeout: Duration,
    pub dedup_window: Duration,
    pub dedup_max_per_device: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shards: 8,
            queue_capacity: 4_096,
            batch_size: 100,
            submit_wait: Duration::from_millis(50),
            write_timeout: Duration::from_secs(10),
            dedup_window: Duration::from_secs(15 * 60),
            dedup_max_per_device: 512,
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        self.shards = self.shards.max(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.batch_size = self.batch_size.max(1);
        self
    }
}

/// 提交结果。
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Queued,
    /// 窗口内已提交过相同 `(device_id, timestamp, sequence_no)`
    Duplicate,
    /// 已入队，但为此丢弃了同分片中最旧的一条
    Shed { dropped: Box<TelemetryRecord> },
}

struct Shard {
    queue: Mutex<VecDeque<TelemetryRecord>>,
    /// 有新记录或关闭时唤醒 worker
    ready: Notify,
    /// worker 取走记录后唤醒等待中的提交方
    space: Notify,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            ready: Notify::new(),
            space: Notify::new(),
        }
    }
}

struct PipelineInner {
    sink: Arc<dyn TelemetrySink>,
    config: PipelineConfig,
    shards: Vec<Shard>,
    dedup: DedupCache,
    closed: AtomicBool,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    maintenance: CancellationToken,
}

/// 接入流水线：去重 → 按设备哈希分片入队 → worker 批量写入下游。
///
/// 同一设备总落在同一分片，分片内先进先出，保持该设备的提交顺序。
#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<PipelineInner>,
}

impl IngestionPipeline {
    /// 创建并启动 worker（需在 tokio 运行时内调用）
    pub fn start(sink: Arc<dyn TelemetrySink>, config: PipelineConfig) -> Self {
        let config = config.sanitized();
        let window_ms = i64::try_from(config.dedup_window.as_millis()).unwrap_or(i64::MAX);
        let shards = (0..config.shards)
            .map(|_| Shard::new(config.queue_capacity))
            .collect();
        let inner = Arc::new(PipelineInner {
            sink,
            dedup: DedupCache::new(window_ms, config.dedup_max_per_device),
            shards,
            config,
            closed: AtomicBool::new(false),
            workers: std::sync::Mutex::new(Vec::new()),
            maintenance: CancellationToken::new(),
        });

        let mut handles: Vec<JoinHandle<()>> = (0..inner.shards.len())
            .map(|index| tokio::spawn(run_worker(inner.clone(), index)))
            .collect();
        handles.push(tokio::spawn(run_dedup_pruner(inner.clone())));
        if let Ok(mut workers) = inner.workers.lock() {
            workers.extend(handles);
        }
        info!(
            target: "fleet.pipeline",
            shards = inner.config.shards,
            queue_capacity = inner.config.queue_capacity,
            batch_size = inner.config.batch_size,
            "pipeline_started"
        );
        Self { inner }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 当前排队记录总数
    pub async fn queue_depth(&self) -> usize {
        let mut depth = 0;
        for shard in &self.inner.shards {
            depth += shard.queue.lock().await.len();
        }
        depth
    }

    /// 提交一条记录；不会无限阻塞
    pub async fn submit(&self, record: TelemetryRecord) -> Result<SubmitOutcome, PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }
        if self.inner.dedup.is_duplicate(&record, now_epoch_ms()) {
            record_dropped_duplicate();
            debug!(
                target: "fleet.pipeline",
                device_id = %record.device_id,
                protocol = %record.protocol,
                timestamp_ms = record.timestamp_ms,
                sequence_no = ?record.sequence_no,
                reason = "duplicate",
                "record_dropped"
            );
            return Ok(SubmitOutcome::Duplicate);
        }

        let shard = &self.inner.shards[self.shard_index(&record.device_id)];
        let capacity = self.inner.config.queue_capacity;
        let deadline = tokio::time::Instant::now() + self.inner.config.submit_wait;
        loop {
            let space = shard.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();
            {
                let mut queue = shard.queue.lock().await;
                if self.is_closed() {
                    return Err(PipelineError::Closed);
                }
                if queue.len() < capacity {
                    queue.push_back(record);
                    drop(queue);
                    queue_depth_add(1);
                    shard.ready.notify_one();
                    return Ok(SubmitOutcome::Queued);
                }
            }
            if tokio::time::timeout_at(deadline, space).await.is_err() {
                break;
            }
        }

        let dropped = {
            let mut queue = shard.queue.lock().await;
            if self.is_closed() {
                return Err(PipelineError::Closed);
            }
            let dropped = if queue.len() >= capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(record);
            dropped
        };
        shard.ready.notify_one();
        match dropped {
            Some(dropped) => {
                record_dropped_shed();
                self.inner.dedup.forget(&dropped);
                warn!(
                    target: "fleet.pipeline",
                    device_id = %dropped.device_id,
                    protocol = %dropped.protocol,
                    timestamp_ms = dropped.timestamp_ms,
                    reason = "queue_full",
                    "record_shed"
                );
                Ok(SubmitOutcome::Shed {
                    dropped: Box::new(dropped),
                })
            }
            None => {
                queue_depth_add(1);
                Ok(SubmitOutcome::Queued)
            }
        }
    }

    /// 停止接收新记录，等待 worker 写完已排队的记录后退出
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.maintenance.cancel();
        for shard in &self.inner.shards {
            shard.ready.notify_one();
            shard.space.notify_waiters();
        }
        let handles = match self.inner.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(target: "fleet.pipeline", error = %err, "pipeline_worker_join_failed");
            }
        }
        info!(target: "fleet.pipeline", "pipeline_stopped");
    }

    fn shard_index(&self, device_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        device_id.hash(&mut hasher);
        (hasher.finish() % self.inner.shards.len() as u64) as usize
    }
}

async fn run_worker(inner: Arc<PipelineInner>, index: usize) {
    let shard = &inner.shards[index];
    loop {
        let ready = shard.ready.notified();
        let batch: Vec<TelemetryRecord> = {
            let mut queue = shard.queue.lock().await;
            let take = queue.len().min(inner.config.batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            if inner.closed.load(Ordering::Acquire) {
                break;
            }
            ready.await;
            continue;
        }
        shard.space.notify_waiters();
        queue_depth_sub(batch.len() as u64);
        write_batch(&inner, index, &batch).await;
    }
    debug!(target: "fleet.pipeline", shard = index, "pipeline_worker_stopped");
}

async fn write_batch(inner: &PipelineInner, shard: usize, batch: &[TelemetryRecord]) {
    let started_at = Instant::now();
    let timeout = inner.config.write_timeout;
    let result = match tokio::time::timeout(timeout, inner.sink.write_batch(batch)).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::Timeout(timeout.as_millis() as u64)),
    };
    let count = batch.len() as u64;
    match result {
        Ok(()) => {
            record_write_success(count);
            record_write_latency_ms(started_at.elapsed().as_millis() as u64);
            let now_ms = now_epoch_ms();
            for record in batch {
                if let Ok(latency_ms) = u64::try_from(now_ms.saturating_sub(record.received_at_ms))
                {
                    record_end_to_end_latency_ms(latency_ms);
                }
            }
            debug!(target: "fleet.pipeline", shard, count, "sink_write_ok");
        }
        Err(err) => {
            record_write_failure(count);
            for record in batch {
                // 未落地的记录不占去重窗口，终端补传时仍可写入
                inner.dedup.forget(record);
                warn!(
                    target: "fleet.pipeline",
                    shard,
                    device_id = %record.device_id,
                    protocol = %record.protocol,
                    timestamp_ms = record.timestamp_ms,
                    reason = "sink_write_failed",
                    error = %err,
                    "record_dropped"
                );
            }
        }
    }
}

async fn run_dedup_pruner(inner: Arc<PipelineInner>) {
    let period = (inner.config.dedup_window / 4).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = inner.maintenance.cancelled() => break,
            _ = ticker.tick() => {
                let devices = inner.dedup.prune(now_epoch_ms());
                debug!(target: "fleet.pipeline", devices, "dedup_pruned");
            }
        }
    }
}
