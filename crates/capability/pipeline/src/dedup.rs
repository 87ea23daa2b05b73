//! 按设备的近期去重窗口
//!
//! key 为 `(timestamp_ms, sequence_no)`；每台设备一个窗口，按 `DashMap` 分片加锁。
//! 条目在窗口时长后或超过单设备容量时按插入顺序淘汰，之后同 key 的记录不再去重。

use dashmap::DashMap;
use domain::TelemetryRecord;
use std::collections::{HashMap, VecDeque};

type DedupKey = (i64, Option<u64>);

#[derive(Default)]
struct DeviceWindow {
    seen: HashMap<DedupKey, u64>,
    order: VecDeque<(DedupKey, i64, u64)>,
    counter: u64,
}

impl DeviceWindow {
    fn expire(&mut self, now_ms: i64, window_ms: i64, capacity: usize) {
        while let Some(&(key, seen_at_ms, token)) = self.order.front() {
            let stale = now_ms.saturating_sub(seen_at_ms) > window_ms;
            if !stale && self.order.len() <= capacity {
                break;
            }
            self.order.pop_front();
            if self.seen.get(&key) == Some(&token) {
                self.seen.remove(&key);
            }
        }
    }

    fn check_and_insert(
        &mut self,
        key: DedupKey,
        now_ms: i64,
        window_ms: i64,
        capacity: usize,
    ) -> bool {
        self.expire(now_ms, window_ms, capacity);
        if self.seen.contains_key(&key) {
            return true;
        }
        self.counter = self.counter.saturating_add(1);
        let token = self.counter;
        self.seen.insert(key, token);
        self.order.push_back((key, now_ms, token));
        self.expire(now_ms, window_ms, capacity);
        false
    }
}

pub(crate) struct DedupCache {
    devices: DashMap<String, DeviceWindow>,
    window_ms: i64,
    max_per_device: usize,
}

impl DedupCache {
    pub(crate) fn new(window_ms: i64, max_per_device: usize) -> Self {
        Self {
            devices: DashMap::new(),
            window_ms,
            max_per_device,
        }
    }

    /// 窗口内已见过返回 `true`；否则记下并返回 `false`
    pub(crate) fn is_duplicate(&self, record: &TelemetryRecord, now_ms: i64) -> bool {
        if self.max_per_device == 0 || self.window_ms <= 0 {
            return false;
        }
        let key = (record.timestamp_ms, record.sequence_no);
        if let Some(mut window) = self.devices.get_mut(&record.device_id) {
            return window.check_and_insert(key, now_ms, self.window_ms, self.max_per_device);
        }
        self.devices
            .entry(record.device_id.clone())
            .or_default()
            .check_and_insert(key, now_ms, self.window_ms, self.max_per_device)
    }

    /// 撤销一条记录的去重登记，让终端补传的同一记录可以再次入队
    pub(crate) fn forget(&self, record: &TelemetryRecord) {
        let key = (record.timestamp_ms, record.sequence_no);
        if let Some(mut window) = self.devices.get_mut(&record.device_id) {
            if window.seen.remove(&key).is_some() {
                window.order.retain(|(entry, _, _)| *entry != key);
            }
        }
    }

    /// 清理过期条目与空窗口，返回剩余设备数
    pub(crate) fn prune(&self, now_ms: i64) -> usize {
        self.devices.retain(|_, window| {
            window.expire(now_ms, self.window_ms, self.max_per_device);
            !window.order.is_empty()
        });
        self.devices.len()
    }
}
