use async_trait::async_trait;
use domain::{ProtocolTag, TelemetryRecord, now_epoch_ms};
use fleet_pipeline::{IngestionPipeline, PipelineConfig, SinkError, SubmitOutcome, TelemetrySink};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// 每批写入固定耗时的下游
struct SlowSink {
    delay: Duration,
    written: AtomicUsize,
}

#[async_trait]
impl TelemetrySink for SlowSink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.write_batch(std::slice::from_ref(record)).await
    }

    async fn write_batch(&self, records: &[TelemetryRecord]) -> Result<(), SinkError> {
        tokio::time::sleep(self.delay).await;
        self.written.fetch_add(records.len(), Ordering::Relaxed);
        Ok(())
    }
}

fn record(device: usize, tick: usize) -> TelemetryRecord {
    TelemetryRecord {
        device_id: format!("86418003{device:07}"),
        vehicle_id: None,
        protocol: ProtocolTag::Gt06,
        timestamp_ms: 1_710_498_030_000 + tick as i64 * 1_000,
        received_at_ms: now_epoch_ms(),
        lat: 22.5,
        lng: 114.0,
        speed_kmh: 40.0,
        heading_deg: 90.0,
        altitude_m: None,
        gps_valid: true,
        hdop: None,
        satellites: Some(9),
        ignition: Some(true),
        fuel_percent: None,
        alarm_code: None,
        odometer_m: None,
        sequence_no: Some(tick as u64),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_thousand_devices_with_slow_sink_shed_instead_of_growing() {
    const DEVICES: usize = 10_000;
    const TICKS: usize = 2;
    const SHARDS: usize = 4;
    const CAPACITY: usize = 64;

    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(20),
        written: AtomicUsize::new(0),
    });
    let pipeline = IngestionPipeline::start(
        sink.clone(),
        PipelineConfig {
            shards: SHARDS,
            queue_capacity: CAPACITY,
            batch_size: 50,
            submit_wait: Duration::from_millis(5),
            ..PipelineConfig::default()
        },
    );

    let mut tasks = Vec::with_capacity(DEVICES);
    for device in 0..DEVICES {
        let pipeline = pipeline.clone();
        tasks.push(tokio::spawn(async move {
            let mut shed = 0usize;
            let mut slowest = Duration::ZERO;
            for tick in 0..TICKS {
                let started = Instant::now();
                let outcome = pipeline.submit(record(device, tick)).await.unwrap();
                slowest = slowest.max(started.elapsed());
                match outcome {
                    SubmitOutcome::Queued => {}
                    SubmitOutcome::Shed { .. } => shed += 1,
                    SubmitOutcome::Duplicate => panic!("unexpected duplicate"),
                }
                assert!(pipeline.queue_depth().await <= SHARDS * CAPACITY);
            }
            (shed, slowest)
        }));
    }

    let mut shed = 0;
    let mut slowest = Duration::ZERO;
    for task in tasks {
        let (task_shed, task_slowest) = task.await.unwrap();
        shed += task_shed;
        slowest = slowest.max(task_slowest);
    }

    assert!(shed > 0, "slow sink must force shedding");
    assert!(
        slowest < Duration::from_secs(2),
        "submit blocked for {slowest:?}"
    );
    assert!(pipeline.queue_depth().await <= SHARDS * CAPACITY);

    pipeline.shutdown().await;
    let written = sink.written.load(Ordering::Relaxed);
    assert_eq!(written + shed, DEVICES * TICKS);
}

#[tokio::test]
async fn retransmitted_record_is_written_once() {
    let sink = Arc::new(SlowSink {
        delay: Duration::ZERO,
        written: AtomicUsize::new(0),
    });
    let pipeline = IngestionPipeline::start(sink.clone(), PipelineConfig::default());
    let first = pipeline.submit(record(7, 3)).await.unwrap();
    let again = pipeline.submit(record(7, 3)).await.unwrap();
    assert_eq!(first, SubmitOutcome::Queued);
    assert_eq!(again, SubmitOutcome::Duplicate);
    pipeline.shutdown().await;
    assert_eq!(sink.written.load(Ordering::Relaxed), 1);
}
