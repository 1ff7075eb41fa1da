use std::time::{Duration, Instant};

use bytes::Bytes;

const N: usize = 5;
const NONCE_LEN: usize = 8;

// Stores and calculates average of last N latencies
pub(crate) struct PingStats {
    history: [Option<Duration>; N],
    idx: usize,
    last_nonce: Option<[u8; NONCE_LEN]>,
    last_ping: Instant,
}

impl PingStats {
    pub(crate) fn new() -> Self {
        Self {
            history: [None; N],
            idx: 0,
            last_nonce: None,
            last_ping: Instant::now(),
        }
    }

    /// Fresh nonce for the next ping payload.
    pub(crate) fn new_ping(&mut self) -> Bytes {
        let mut buf = [0; NONCE_LEN];
        rand::fill(&mut buf);
        self.last_nonce = Some(buf);
        self.last_ping = Instant::now();
        Bytes::copy_from_slice(&buf)
    }

    /// Records the round trip if `payload` answers the last ping.
    pub(crate) fn on_pong(&mut self, payload: &[u8]) -> Result<Duration, PongError> {
        let expected = self.last_nonce.ok_or(PongError::Unsolicited)?;
        if payload != expected {
            return Err(PongError::Nonce(expected));
        }
        self.last_nonce = None;
        let rtt = self.last_ping.elapsed();
        self.add(rtt);
        Ok(rtt)
    }

    pub(crate) fn add(&mut self, rtt: Duration) {
        self.history[self.idx] = Some(rtt);
        self.idx = (self.idx + 1) % N;
    }

    pub(crate) fn average(&self) -> Option<Duration> {
        let mut sum = Duration::ZERO;
        let mut count = 0;
        for v in self.history.iter().flatten() {
            sum += *v;
            count += 1;
        }
        sum.checked_div(count)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PongError {
    /// No ping is outstanding.
    Unsolicited,
    /// Payload did not match the outstanding nonce.
    Nonce([u8; NONCE_LEN]),
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn matching_pong_records_latency() {
        let mut stats = PingStats::new();
        assert_eq!(stats.average(), None);

        let nonce = stats.new_ping();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(stats.on_pong(&nonce).is_ok());
        assert!(stats.average().is_some());

        // same nonce twice is no longer outstanding
        assert_eq!(stats.on_pong(&nonce), Err(PongError::Unsolicited));
    }

    #[test]
    fn mismatched_pong_is_rejected() {
        let mut stats = PingStats::new();
        let nonce = stats.new_ping();
        let mut other = nonce.to_vec();
        other[0] ^= 0xFF;
        assert!(matches!(stats.on_pong(&other), Err(PongError::Nonce(_))));
        assert_eq!(stats.average(), None);
    }

    #[test]
    fn unsolicited_pong_is_rejected() {
        let mut stats = PingStats::new();
        assert_eq!(stats.on_pong(b"anything"), Err(PongError::Unsolicited));
    }

    proptest! {
        #[test]
        fn average_covers_only_last_five(samples in proptest::collection::vec(1u64..10_000, 1..40)) {
            let mut stats = PingStats::new();
            for ms in &samples {
                stats.add(Duration::from_millis(*ms));
            }
            let tail = &samples[samples.len().saturating_sub(N)..];
            let expected = Duration::from_millis(tail.iter().sum::<u64>())
                / u32::try_from(tail.len()).unwrap();
            prop_assert_eq!(stats.average(), Some(expected));
        }
    }
}
