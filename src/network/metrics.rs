use std::sync::atomic::{AtomicU64, Ordering};

pub static LOCAL_WRITES_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static FORWARDED_WRITES_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static HEARTBEATS_SENT_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static ELECTIONS_STARTED_TOTAL: AtomicU64 = AtomicU64::new(0);

pub fn record_local_write() {
    LOCAL_WRITES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_forwarded_write() {
    FORWARDED_WRITES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_heartbeats(sent: usize) {
    HEARTBEATS_SENT_TOTAL.fetch_add(sent as u64, Ordering::Relaxed);
}

pub fn record_election() {
    ELECTIONS_STARTED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub local_writes: u64,
    pub forwarded_writes: u64,
    pub heartbeats_sent: u64,
    pub elections_started: u64,
}

pub fn snapshot() -> Counters {
    Counters {
        local_writes: LOCAL_WRITES_TOTAL.load(Ordering::Relaxed),
        forwarded_writes: FORWARDED_WRITES_TOTAL.load(Ordering::Relaxed),
        heartbeats_sent: HEARTBEATS_SENT_TOTAL.load(Ordering::Relaxed),
        elections_started: ELECTIONS_STARTED_TOTAL.load(Ordering::Relaxed),
    }
}
