//! Byte-rate limiting for part uploads.
//!
//! The limiter is split in two so that other tasks can steer a transfer that
//! is already in flight: [`RateLimiter`] is the shared handle (the input and
//! schedule tasks call [`RateLimiter::set_limit`] on it), and
//! [`ThrottledReader`] wraps the byte source handed to the transport,
//! consulting the handle on every read.
//!
//! The limiter is average-rate, not burst-bounded: the byte budget is
//! `rate * elapsed` over the current throttle window, and a read that finds
//! the budget spent sleeps until the next byte is due. Changing the limit
//! rebases the window, so the new rate applies from the next read onward.
//!
//! Timing uses `tokio::time`, which makes the throttle fully deterministic
//! under `start_paused` tests.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Smallest sleep issued while waiting for budget.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Point-in-time snapshot of transfer progress, cheap to take concurrently
/// with reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimiterStatus {
    /// Configured limit in bytes per second; `0` means unlimited.
    pub limit: u64,
    /// Average observed rate over the current pass, bytes per second.
    pub cur_rate: u64,
    /// Bytes delivered in the current pass.
    pub bytes: u64,
    /// Fraction of the current transfer delivered, `0.0..=1.0`.
    pub progress: f64,
    /// Estimated time until the current transfer finishes, if computable.
    pub time_remaining: Option<Duration>,
    /// Fraction of the whole upload delivered, counting prior parts.
    pub total_progress: f64,
    /// Estimated time until the whole upload finishes, if computable.
    pub total_time_remaining: Option<Duration>,
}

/// What the next read is allowed to do.
enum Quota {
    Unlimited,
    Ready(u64),
    Wait(Duration),
}

#[derive(Debug, Default)]
struct Accounting {
    /// Start of the current pass, for status and ETA.
    pass_start: Option<Instant>,
    /// Bytes delivered this pass.
    pass_bytes: u64,
    /// Start of the current throttle window (rebased on rate changes).
    window_start: Option<Instant>,
    /// Bytes delivered this throttle window.
    window_bytes: u64,
}

impl Accounting {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Shared limiter handle.
///
/// One handle lives for the whole upload; each part wraps its own
/// [`ThrottledReader`] around it. Mutators may be called from any task while
/// a read is in flight.
#[derive(Debug)]
pub struct RateLimiter {
    rate: AtomicU64,
    bypass_first_pass: bool,
    /// Completed full passes over the current source. Pass 0 is exempt from
    /// throttling when `bypass_first_pass` is set (the transport may scan the
    /// body once to hash it before transmitting).
    passes: AtomicU32,
    acct: Mutex<Accounting>,
    transfer_size: AtomicU64,
    total_offset: AtomicU64,
    total_size: AtomicU64,
}

impl RateLimiter {
    /// Create a handle with an initial rate (`0` = unlimited).
    ///
    /// `bypass_first_pass` disables throttling until the source has been
    /// fully read once. Callers set it when the wire is unencrypted and the
    /// transport therefore reads the stream a first time to compute a
    /// checksum; throttling that pass would double wall time. This is an
    /// optimization, never a correctness requirement - [`Self::passes`]
    /// exposes what actually happened.
    #[must_use]
    pub fn new(rate: u64, bypass_first_pass: bool) -> Arc<Self> {
        Arc::new(Self {
            rate: AtomicU64::new(rate),
            bypass_first_pass,
            passes: AtomicU32::new(0),
            acct: Mutex::new(Accounting::default()),
            transfer_size: AtomicU64::new(0),
            total_offset: AtomicU64::new(0),
            total_size: AtomicU64::new(0),
        })
    }

    /// Hot-swap the rate; effective from the next read. Negative values
    /// clamp to `0` (unlimited).
    pub fn set_limit(&self, rate: i64) {
        self.rate.store(rate.max(0) as u64, Ordering::Relaxed);
        // Rebase the throttle window so the new rate is applied to bytes
        // from now on rather than averaged against the whole pass.
        let mut acct = self.acct.lock();
        acct.window_start = None;
        acct.window_bytes = 0;
    }

    /// The configured limit in bytes per second; `0` means unlimited.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    /// Total bytes this reader will deliver in the current transfer, for the
    /// per-part ETA.
    pub fn set_transfer_size(&self, n: u64) {
        self.transfer_size.store(n, Ordering::Relaxed);
    }

    /// Bytes already uploaded in prior parts and the final file size, for
    /// the overall ETA.
    pub fn set_total(&self, offset: u64, total: u64) {
        self.total_offset.store(offset, Ordering::Relaxed);
        self.total_size.store(total, Ordering::Relaxed);
    }

    /// Completed full passes over the current source.
    #[must_use]
    pub fn passes(&self) -> u32 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Snapshot progress. May be called concurrently with reads.
    #[must_use]
    pub fn status(&self) -> LimiterStatus {
        let limit = self.rate.load(Ordering::Relaxed);
        let transfer_size = self.transfer_size.load(Ordering::Relaxed);
        let total_offset = self.total_offset.load(Ordering::Relaxed);
        let total_size = self.total_size.load(Ordering::Relaxed);

        let (bytes, elapsed) = {
            let acct = self.acct.lock();
            let elapsed = acct
                .pass_start
                .map_or(0.0, |start| start.elapsed().as_secs_f64());
            (acct.pass_bytes, elapsed)
        };

        let cur_rate = if elapsed > 0.0 {
            (bytes as f64 / elapsed) as u64
        } else {
            0
        };
        let eta = |remaining: u64| -> Option<Duration> {
            if remaining == 0 {
                Some(Duration::ZERO)
            } else if cur_rate == 0 {
                None
            } else {
                Some(Duration::from_secs_f64(remaining as f64 / cur_rate as f64))
            }
        };

        let done_total = total_offset.saturating_add(bytes);
        LimiterStatus {
            limit,
            cur_rate,
            bytes,
            progress: if transfer_size > 0 {
                (bytes as f64 / transfer_size as f64).min(1.0)
            } else {
                0.0
            },
            time_remaining: eta(transfer_size.saturating_sub(bytes)),
            total_progress: if total_size > 0 {
                (done_total as f64 / total_size as f64).min(1.0)
            } else {
                0.0
            },
            total_time_remaining: eta(total_size.saturating_sub(done_total)),
        }
    }

    /// Start a fresh logical transfer (a new part): clears the pass counter
    /// and all accounting.
    fn begin_transfer(&self) {
        self.passes.store(0, Ordering::Relaxed);
        self.acct.lock().reset();
    }

    /// Start a new pass over the same source (after a seek). Accounting
    /// resets; the pass counter does not, which is what engages throttling
    /// after a bypassed first pass.
    fn begin_pass(&self) {
        self.acct.lock().reset();
    }

    fn complete_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, n: u64) {
        let mut acct = self.acct.lock();
        let now = Instant::now();
        acct.pass_start.get_or_insert(now);
        acct.window_start.get_or_insert(now);
        acct.pass_bytes += n;
        acct.window_bytes += n;
    }

    fn quota(&self) -> Quota {
        let rate = self.rate.load(Ordering::Relaxed);
        if rate == 0 {
            return Quota::Unlimited;
        }
        if self.bypass_first_pass && self.passes.load(Ordering::Relaxed) == 0 {
            return Quota::Unlimited;
        }

        let mut acct = self.acct.lock();
        let now = Instant::now();
        let window_start = *acct.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(window_start).as_secs_f64();
        let budget = (rate as f64 * elapsed) as u64;
        if budget > acct.window_bytes {
            Quota::Ready(budget - acct.window_bytes)
        } else {
            let due = (acct.window_bytes + 1) as f64 / rate as f64;
            let wait = Duration::from_secs_f64(due - elapsed).max(MIN_WAIT);
            Quota::Wait(wait)
        }
    }
}

/// A reader that delivers bytes from `R` no faster than the shared limiter
/// allows. I/O errors from the source propagate verbatim; EOF is never
/// synthesized.
#[derive(Debug)]
pub struct ThrottledReader<R> {
    inner: R,
    limiter: Arc<RateLimiter>,
    sleep: Option<Pin<Box<Sleep>>>,
    scratch: Vec<u8>,
    eof_seen: bool,
}

impl<R> ThrottledReader<R> {
    /// Wrap `inner`, beginning a fresh transfer on the limiter.
    pub fn new(inner: R, limiter: Arc<RateLimiter>) -> Self {
        limiter.begin_transfer();
        Self {
            inner,
            limiter,
            sleep: None,
            scratch: Vec::new(),
            eof_seen: false,
        }
    }

    /// The shared limiter handle.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if let Some(sleep) = this.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                this.sleep = None;
            }

            let want = match this.limiter.quota() {
                Quota::Unlimited => buf.remaining(),
                Quota::Ready(n) => n.min(buf.remaining() as u64) as usize,
                Quota::Wait(delay) => {
                    this.sleep = Some(Box::pin(tokio::time::sleep(delay)));
                    continue;
                }
            };

            if this.scratch.len() < want {
                this.scratch.resize(want, 0);
            }
            let mut limited = ReadBuf::new(&mut this.scratch[..want]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
            let n = limited.filled().len();
            if n == 0 {
                if !this.eof_seen {
                    this.eof_seen = true;
                    this.limiter.complete_pass();
                }
                return Poll::Ready(Ok(()));
            }
            this.eof_seen = false;
            this.limiter.record(n as u64);
            buf.put_slice(&this.scratch[..n]);
            return Poll::Ready(Ok(()));
        }
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> AsyncSeek for ThrottledReader<R> {
    fn start_seek(self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        this.sleep = None;
        this.eof_seen = false;
        // A seek starts a new pass; per-pass accounting resets.
        this.limiter.begin_pass();
        Pin::new(&mut this.inner).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().inner).poll_complete(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    use super::*;

    fn payload(len: usize) -> Cursor<Vec<u8>> {
        Cursor::new(vec![0xA5; len])
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_rate_passes_through() {
        let limiter = RateLimiter::new(0, false);
        let mut reader = ThrottledReader::new(payload(1_000_000), Arc::clone(&limiter));
        let start = Instant::now();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 1_000_000);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.passes(), 1);
    }

    // Observed duration stays within 10% of len/rate for len >= 10*rate.
    #[tokio::test(start_paused = true)]
    async fn average_rate_is_honored() {
        for (rate, len) in [(1_000u64, 10_000usize), (4_096, 65_536), (10_000, 100_000)] {
            let limiter = RateLimiter::new(rate, false);
            let mut reader = ThrottledReader::new(payload(len), Arc::clone(&limiter));
            let start = Instant::now();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            assert_eq!(out.len(), len);

            let expected = len as f64 / rate as f64;
            let observed = start.elapsed().as_secs_f64();
            let skew = (observed - expected).abs() / expected;
            assert!(
                skew <= 0.1,
                "rate {rate}: expected ~{expected}s, observed {observed}s"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_pass_bypass_then_throttle() {
        let limiter = RateLimiter::new(1_000, true);
        let mut reader = ThrottledReader::new(payload(5_000), Arc::clone(&limiter));

        let start = Instant::now();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO, "first pass must not throttle");
        assert_eq!(limiter.passes(), 1);

        reader.seek(io::SeekFrom::Start(0)).await.unwrap();
        let start = Instant::now();
        out.clear();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 5_000);
        let observed = start.elapsed().as_secs_f64();
        assert!(
            (observed - 5.0).abs() <= 0.5,
            "second pass should take ~5s, took {observed}s"
        );
        assert_eq!(limiter.passes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn set_limit_applies_on_next_read() {
        let limiter = RateLimiter::new(1_000, false);
        let mut reader = ThrottledReader::new(payload(2_000), Arc::clone(&limiter));

        let start = Instant::now();
        let mut buf = vec![0u8; 1_000];
        reader.read_exact(&mut buf).await.unwrap();
        let first_half = start.elapsed().as_secs_f64();
        assert!((first_half - 1.0).abs() <= 0.1);

        limiter.set_limit(0);
        let start = Instant::now();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), 1_000);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn set_limit_clamps_negative_to_unlimited() {
        let limiter = RateLimiter::new(5_000, false);
        limiter.set_limit(-1);
        assert_eq!(limiter.limit(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_progress_and_eta() {
        let limiter = RateLimiter::new(1_000, false);
        limiter.set_transfer_size(2_000);
        limiter.set_total(6_000, 8_000);
        let mut reader = ThrottledReader::new(payload(2_000), Arc::clone(&limiter));
        let mut buf = vec![0u8; 1_000];
        reader.read_exact(&mut buf).await.unwrap();

        let status = limiter.status();
        assert_eq!(status.bytes, 1_000);
        assert!((status.progress - 0.5).abs() < 0.01);
        let cur = status.cur_rate as f64;
        assert!((cur - 1_000.0).abs() / 1_000.0 < 0.1, "cur_rate {cur}");
        let part_eta = status.time_remaining.unwrap().as_secs_f64();
        assert!((part_eta - 1.0).abs() < 0.2, "part eta {part_eta}");
        // 6000 prior + 1000 now out of 8000.
        assert!((status.total_progress - 0.875).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn io_errors_propagate_verbatim() {
        struct Failing;
        impl AsyncRead for Failing {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Poll::Ready(Err(io::Error::other("disk on fire")))
            }
        }
        let limiter = RateLimiter::new(0, false);
        let mut reader = ThrottledReader::new(Failing, limiter);
        let err = reader.read_to_end(&mut Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }
}
