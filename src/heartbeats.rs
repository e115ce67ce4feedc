use log::trace;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum HeartbeatState {
    Idle,
    // Nothing has been written for half the interval; send a heartbeat frame.
    SendHeartbeat,
    // Nothing has been read for two intervals; the server is considered gone.
    Expired,
}

// Tracks socket activity against the negotiated heartbeat interval.
#[derive(Debug)]
pub(crate) struct Heartbeats {
    interval: Option<Duration>,
    last_read: Instant,
    last_write: Instant,
}

impl Heartbeats {
    pub(crate) fn new(interval_secs: u16, now: Instant) -> Heartbeats {
        let interval = if interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(u64::from(interval_secs)))
        };
        Heartbeats {
            interval,
            last_read: now,
            last_write: now,
        }
    }

    pub(crate) fn record_read(&mut self, now: Instant) {
        self.last_read = now;
    }

    pub(crate) fn record_write(&mut self, now: Instant) {
        self.last_write = now;
    }

    // How long a blocking read may wait before heartbeats need looking at again.
    pub(crate) fn poll_interval(&self) -> Option<Duration> {
        self.interval.map(|interval| interval / 2)
    }

    pub(crate) fn check(&self, now: Instant) -> HeartbeatState {
        let interval = match self.interval {
            Some(interval) => interval,
            None => return HeartbeatState::Idle,
        };
        let since_read = now.saturating_duration_since(self.last_read);
        let since_write = now.saturating_duration_since(self.last_write);
        if since_read >= interval * 2 {
            trace!(
                "no frames from server for {:?} (interval = {:?})",
                since_read,
                interval
            );
            HeartbeatState::Expired
        } else if since_write >= interval / 2 {
            HeartbeatState::SendHeartbeat
        } else {
            HeartbeatState::Idle
        }
    }
}
