//! Fan-out of fused positions to registered subscribers (map marker, status
//! display). Delivery is in registration order, once per published output.

use crossbeam::channel::Sender;

use crate::types::PositionOutput;

/// Returned by a subscriber that can no longer receive; it gets dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkClosed;

pub trait PositionSubscriber: Send {
    fn deliver(&mut self, output: &PositionOutput) -> Result<(), SinkClosed>;
}

impl<F> PositionSubscriber for F
where
    F: FnMut(&PositionOutput) + Send,
{
    fn deliver(&mut self, output: &PositionOutput) -> Result<(), SinkClosed> {
        self(output);
        Ok(())
    }
}

/// Publishes into a crossbeam channel; closes when the receiver is gone.
pub struct ChannelSubscriber {
    tx: Sender<PositionOutput>,
}

impl ChannelSubscriber {
    pub fn new(tx: Sender<PositionOutput>) -> Self {
        Self { tx }
    }
}

impl PositionSubscriber for ChannelSubscriber {
    fn deliver(&mut self, output: &PositionOutput) -> Result<(), SinkClosed> {
        self.tx.send(output.clone()).map_err(|_| SinkClosed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct OutputSink {
    subscribers: Vec<(SubscriptionId, Box<dyn PositionSubscriber>)>,
    next_id: u64,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<S>(&mut self, subscriber: S) -> SubscriptionId
    where
        S: PositionSubscriber + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    /// Returns false if `id` was not (or no longer) registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn publish(&mut self, output: &PositionOutput) {
        self.subscribers.retain_mut(|(id, subscriber)| {
            let open = subscriber.deliver(output).is_ok();
            if !open {
                log::debug!("Dropping closed subscriber {:?}", id);
            }
            open
        });
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
