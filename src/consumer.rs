use crate::errors::*;
use crate::session::Shared;
use crate::{Channel, Delivery, Result};
use log::{debug, trace, warn};
use snafu::OptionExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// A flag for stopping [`Consumer::listen`](struct.Consumer.html#method.listen) and
/// [`Deliveries`](struct.Deliveries.html) from another thread.
///
/// Clones share the flag. A stop takes effect before the next wait begins, so a stopped
/// listener returns within one poll interval (see
/// [`ConnectionTuning`](struct.ConnectionTuning.html)).
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> StopToken {
        StopToken::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A subscription to a queue.
///
/// Consumers hold only a weak handle on their session, so they can be moved to a worker
/// thread. Dropping a consumer cancels it; errors from the cancel are logged.
pub struct Consumer {
    session: Weak<Shared>,
    channel_id: u16,
    tag: String,
    queue: String,
    cancelled: bool,
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if let Err(err) = self.cancel_impl() {
            match err.kind() {
                // The channel or connection went first and took the consumer with it.
                ErrorKind::ChannelClosed | ErrorKind::ConnectionClosed => {
                    debug!("consumer {} already gone: {}", self.tag, err)
                }
                _ => warn!("error cancelling consumer {} on drop: {}", self.tag, err),
            }
        }
    }
}

impl Consumer {
    pub(crate) fn new(channel: &Channel, tag: String, queue: String) -> Consumer {
        Consumer {
            session: channel.session().clone(),
            channel_id: channel.number(),
            tag,
            queue,
            cancelled: false,
        }
    }

    /// The consumer tag the server assigned.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Name of the queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Number of the channel this consumer was started on.
    pub fn channel_number(&self) -> u16 {
        self.channel_id
    }

    fn interrupted(&self, err: Error) -> Error {
        Error::DeliveryInterrupted {
            channel_id: self.channel_id,
            source: Box::new(err),
        }
    }

    /// Block until the next message arrives.
    ///
    /// Fails with [`ErrorKind::DeliveryInterrupted`](enum.ErrorKind.html#variant.DeliveryInterrupted)
    /// if the channel, the connection, or the consumer itself is closed while waiting.
    pub fn pop(&self) -> Result<Delivery> {
        loop {
            if let Some(delivery) = self.wait_slice(None)? {
                return Ok(delivery);
            }
        }
    }

    /// Wait up to `timeout` for the next message. Returns `Ok(None)` if none arrived in time.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.wait_slice(Some(deadline))? {
                return Ok(Some(delivery));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    // One poll interval of waiting, cut short at `deadline`.
    fn wait_slice(&self, deadline: Option<Instant>) -> Result<Option<Delivery>> {
        let shared = self
            .session
            .upgrade()
            .context(ClientClosedConnectionSnafu)
            .map_err(|err| self.interrupted(err))?;
        let mut slice = shared.tuning().delivery_poll_interval;
        if let Some(deadline) = deadline {
            slice = Duration::min(slice, deadline.saturating_duration_since(Instant::now()));
        }
        let delivery = shared
            .wait_for_delivery(self.channel_id, &self.tag, slice)
            .map_err(|err| self.interrupted(err))?;
        if let Some(delivery) = &delivery {
            trace!(
                "consumer {} received delivery {} ({} bytes)",
                self.tag,
                delivery.delivery_tag(),
                delivery.content().len()
            );
        }
        Ok(delivery)
    }

    /// Iterate over incoming messages until `stop` fires. The iterator yields an error at most
    /// once, then ends.
    pub fn deliveries<'a>(&'a self, stop: &'a StopToken) -> Deliveries<'a> {
        Deliveries {
            consumer: self,
            stop,
            done: false,
        }
    }

    /// Call `on_message` with every incoming message, in order, until `stop` fires.
    ///
    /// Returns `Ok(())` once stopped, or the error that ended the wait.
    pub fn listen<F>(&self, stop: &StopToken, mut on_message: F) -> Result<()>
    where
        F: FnMut(Delivery),
    {
        for delivery in self.deliveries(stop) {
            on_message(delivery?);
        }
        debug!("consumer {} stopped listening", self.tag);
        Ok(())
    }

    /// Cancel this consumer.
    pub fn cancel(mut self) -> Result<()> {
        self.cancel_impl()
    }

    fn cancel_impl(&mut self) -> Result<()> {
        if self.cancelled {
            return Ok(());
        }
        self.cancelled = true;
        let shared = match self.session.upgrade() {
            Some(shared) => shared,
            None => return Ok(()),
        };
        let channel_id = self.channel_id;
        let tag = &self.tag;
        let queue = &self.queue;
        shared
            .on_channel(channel_id, |transport| transport.basic_cancel(channel_id, tag))
            .map_err(|err| {
                err.or_rejected(|code, text| Error::ConsumeRejected {
                    queue: queue.clone(),
                    code,
                    text,
                })
            })?;
        debug!("cancelled consumer {} on channel {}", tag, channel_id);
        Ok(())
    }
}

/// Iterator over a consumer's messages; see [`Consumer::deliveries`](struct.Consumer.html#method.deliveries).
pub struct Deliveries<'a> {
    consumer: &'a Consumer,
    stop: &'a StopToken,
    done: bool,
}

impl Iterator for Deliveries<'_> {
    type Item = Result<Delivery>;

    fn next(&mut self) -> Option<Result<Delivery>> {
        while !self.done && !self.stop.is_stopped() {
            match self.consumer.wait_slice(None) {
                Ok(Some(delivery)) => return Some(Ok(delivery)),
                Ok(None) => (),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}
