//! Ring buffer + worker control plane: a length-prefixed byte FIFO guarded
//! by one mutex and one condition variable, decoupling the caller thread
//! from the dedicated I/O worker thread of an open endpoint direction.
//!
//! Records are self-delimited: `[u32 LE length L][L bytes]`, `L` excluding
//! the length word itself (`spec.md` §4.6). The worker side (socket recv/
//! send loop) lives in `transport.rs`, which owns the socket; this module
//! only owns the shared queue, the close/error latch, and the token-bucket
//! pacing math the tx worker consults before every send.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};

struct State {
    data: VecDeque<u8>,
    capacity: usize,
    close_req: bool,
    error: Option<TransportError>,
}

impl State {
    fn available(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    fn push_record(&mut self, payload: &[u8]) -> Result<()> {
        let needed = payload.len() + 4;
        if needed > self.available() {
            return Err(TransportError::BufferFull);
        }
        self.data.extend((payload.len() as u32).to_le_bytes());
        self.data.extend(payload.iter().copied());
        Ok(())
    }

    fn pop_record(&mut self) -> Option<Vec<u8>> {
        if self.data.len() < 4 {
            return None;
        }
        let len_bytes: Vec<u8> = self.data.iter().take(4).copied().collect();
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        if self.data.len() < 4 + len {
            // Length prefix present but payload not fully written yet; should
            // not happen since pushes are atomic under the lock, guarded
            // here defensively rather than panicking.
            return None;
        }
        self.data.drain(0..4);
        Some(self.data.drain(0..len).collect())
    }
}

/// Shared FIFO handle. Cheap to clone — internally an `Arc` — so the
/// caller-facing `Transport` and the worker thread can each hold one.
#[derive(Clone)]
pub struct RingBuffer {
    mutex: Arc<Mutex<State>>,
    cond: Arc<Condvar>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            mutex: Arc::new(Mutex::new(State {
                data: VecDeque::with_capacity(capacity.min(64 * 1024)),
                capacity,
                close_req: false,
                error: None,
            })),
            cond: Arc::new(Condvar::new()),
        }
    }

    /// Push one record and wake any waiter. Fails with `BufferFull` — a
    /// transient condition, per the propagation policy — if there isn't
    /// room; the caller is expected to drop or retry, never block here.
    pub fn push(&self, payload: &[u8]) -> Result<()> {
        let mut state = self.mutex.lock().unwrap();
        state.push_record(payload)?;
        self.cond.notify_all();
        Ok(())
    }

    /// Pop one record, blocking up to `timeout` for one to appear. Returns
    /// `Ok(None)` on timeout with nothing available, and surfaces any
    /// latched worker error before reporting emptiness.
    pub fn pop_blocking(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut state = self.mutex.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = state.pop_record() {
                return Ok(Some(record));
            }
            if let Some(err) = state.error.take() {
                return Err(err);
            }
            if state.close_req {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, timeout_result) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            if timeout_result.timed_out() && state.data.len() < 4 {
                return Ok(None);
            }
        }
    }

    /// Non-blocking pop used by the tx worker once it has been woken.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        let mut state = self.mutex.lock().unwrap();
        state.pop_record()
    }

    /// Block until a record is available or `close_req` is set, without a
    /// wall-clock deadline — the worker's long-lived wait.
    pub fn wait_for_record_or_close(&self) {
        let mut state = self.mutex.lock().unwrap();
        while state.data.len() < 4 && !state.close_req {
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn request_close(&self) {
        let mut state = self.mutex.lock().unwrap();
        state.close_req = true;
        self.cond.notify_all();
    }

    pub fn is_close_requested(&self) -> bool {
        self.mutex.lock().unwrap().close_req
    }

    /// Latch a fatal worker-observed error; the next facade call to
    /// surface it takes precedence over emptiness. The original error kind
    /// is preserved rather than collapsed to a string, so the facade can
    /// still distinguish a socket failure from a `BufferOverrun` from a
    /// codec failure.
    pub fn latch_error(&self, error: TransportError) {
        let mut state = self.mutex.lock().unwrap();
        state.error = Some(error);
        self.cond.notify_all();
    }

    pub fn take_error(&self) -> Option<TransportError> {
        self.mutex.lock().unwrap().error.take()
    }
}

/// Token-bucket pacing for the transmit worker, following the formulas in
/// `spec.md` §4.6: `target_time = start_time + sent_bits * 1e6 / bitrate`,
/// `max_delay = max_packet_size * 8 * 1e6 / bitrate + 1`, with a
/// `burst_interval` reset when real time has drifted far enough ahead of
/// the accounted window.
pub struct TokenBucket {
    bitrate_bps: u64,
    burst_interval: Duration,
    start: Instant,
    sent_bits: u64,
}

impl TokenBucket {
    pub fn new(bitrate_bps: u64, burst_bits: u64, now: Instant) -> Self {
        let burst_interval = if bitrate_bps > 0 {
            Duration::from_micros(burst_bits * 1_000_000 / bitrate_bps)
        } else {
            Duration::ZERO
        };
        TokenBucket {
            bitrate_bps,
            burst_interval,
            start: now,
            sent_bits: 0,
        }
    }

    /// Compute how long to sleep before sending `packet_bytes` now, and
    /// account for having sent it. Returns `Duration::ZERO` when no pacing
    /// is configured (`bitrate_bps == 0`) or the schedule is already caught
    /// up.
    pub fn delay_for(&mut self, now: Instant, packet_bytes: usize) -> Duration {
        if self.bitrate_bps == 0 {
            return Duration::ZERO;
        }

        if now.duration_since(self.start) > self.burst_interval {
            self.start = now;
            self.sent_bits = 0;
        }

        let target = self.start
            + Duration::from_micros(self.sent_bits * 1_000_000 / self.bitrate_bps);
        let max_delay = Duration::from_micros(
            (packet_bytes as u64 * 8 * 1_000_000 / self.bitrate_bps) + 1,
        );

        let sleep = if now < target {
            (target - now).min(max_delay)
        } else {
            Duration::ZERO
        };

        // Resuming later than the capped delay means real time has fallen
        // behind the accounted schedule; reset the window rather than
        // accumulate unbounded debt.
        if target.saturating_duration_since(now) > max_delay {
            self.start = now;
            self.sent_bits = 0;
        }

        self.sent_bits += packet_bytes as u64 * 8;
        sleep
    }
}
