//! Live line fan-out
//!
//! Every subscriber owns a bounded queue. Publishing never waits: a subscriber
//! whose queue is full is dropped from the fan-out set and its stream ends
//! with [`Error::SubscriberLagged`]. Subscriptions are registered before the
//! backlog is read and deduplicated by line number, so a line stored while a
//! subscriber is catching up is delivered exactly once. A live line that
//! skips ahead of the cursor sends the subscriber back to storage, so a line
//! stored earlier but published later is not lost.

use dashmap::DashMap;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ContentReader;
use crate::{
    config::StreamConfig,
    metrics,
    models::{ItemId, Line},
    Error, Result,
};

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Line>,
    lagged: Arc<AtomicBool>,
}

type SubscriberMap = DashMap<ItemId, Vec<Subscriber>>;

/// Streaming hub: point reads and live tails of item lines
#[derive(Clone)]
pub struct StreamHub {
    subscribers: Arc<SubscriberMap>,
    next_id: Arc<AtomicU64>,
    reader: ContentReader,
    queue_size: usize,
    page_size: usize,
}

impl StreamHub {
    #[must_use]
    pub fn new(reader: ContentReader, config: &StreamConfig) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            reader,
            queue_size: config.subscriber_queue_size.max(1),
            page_size: config.backlog_page_size.max(1),
        }
    }

    /// Stored lines with `number >= offset`, ascending, at most `limit`
    pub async fn get_lines(&self, item_id: &ItemId, offset: i64, limit: Option<usize>) -> Result<Vec<Line>> {
        self.reader.read_lines(item_id, offset, limit).await
    }

    /// Open a live tail starting at `offset`.
    ///
    /// The stream replays stored lines first, then follows new ones. It ends
    /// when dropped, when `cancel` fires, or after yielding
    /// [`Error::SubscriberLagged`].
    #[must_use]
    pub fn subscribe(&self, item_id: ItemId, offset: i64, cancel: Option<CancellationToken>) -> LineSubscription {
        let (sender, receiver) = mpsc::channel(self.queue_size);
        let lagged = Arc::new(AtomicBool::new(false));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers.entry(item_id.clone()).or_default().push(Subscriber {
            id,
            sender,
            lagged: lagged.clone(),
        });
        metrics::stream::SUBSCRIBERS.inc();
        debug!(item_id = %item_id, subscriber = id, offset, "Subscriber registered");

        let state = SubscriptionState {
            registration: Registration {
                subscribers: self.subscribers.clone(),
                item_id: item_id.clone(),
                id,
            },
            reader: self.reader.clone(),
            item_id,
            next_expected: offset.max(0),
            page_size: self.page_size,
            pending: VecDeque::new(),
            backlog_done: false,
            receiver,
            lagged,
            cancel: cancel.unwrap_or_default(),
            finished: false,
        };

        LineSubscription {
            inner: futures::stream::unfold(state, |mut state| async move {
                let next = state.next_line().await?;
                Some((next, state))
            })
            .boxed(),
        }
    }

    /// Fan a freshly stored line out to the item's subscribers.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, item_id: &ItemId, line: &Line) -> usize {
        let Some(mut subscribers) = self.subscribers.get_mut(item_id) else {
            return 0;
        };

        let mut sent = 0;
        subscribers.retain(|sub| match sub.sender.try_send(line.clone()) {
            Ok(()) => {
                sent += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                sub.lagged.store(true, Ordering::SeqCst);
                metrics::stream::SUBSCRIBERS_DROPPED.inc();
                warn!(item_id = %item_id, subscriber = sub.id, "Subscriber queue full, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });

        let empty = subscribers.is_empty();
        drop(subscribers);
        if empty {
            self.subscribers.remove_if(item_id, |_, subs| subs.is_empty());
        }

        sent
    }

    /// Number of live subscribers for an item
    #[must_use]
    pub fn subscriber_count(&self, item_id: &ItemId) -> usize {
        self.subscribers.get(item_id).map_or(0, |subs| subs.len())
    }
}

/// Removes the subscriber from the fan-out set when the subscription goes away
struct Registration {
    subscribers: Arc<SubscriberMap>,
    item_id: ItemId,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(mut subs) = self.subscribers.get_mut(&self.item_id) {
            subs.retain(|sub| sub.id != self.id);
            let empty = subs.is_empty();
            drop(subs);
            if empty {
                self.subscribers.remove_if(&self.item_id, |_, subs| subs.is_empty());
            }
        }
        metrics::stream::SUBSCRIBERS.dec();
        debug!(item_id = %self.item_id, subscriber = self.id, "Subscriber unregistered");
    }
}

struct SubscriptionState {
    registration: Registration,
    reader: ContentReader,
    item_id: ItemId,
    /// Lowest line number not yet delivered
    next_expected: i64,
    page_size: usize,
    pending: VecDeque<Line>,
    backlog_done: bool,
    receiver: mpsc::Receiver<Line>,
    lagged: Arc<AtomicBool>,
    cancel: CancellationToken,
    finished: bool,
}

impl SubscriptionState {
    async fn next_line(&mut self) -> Option<Result<Line>> {
        loop {
            if self.finished || self.cancel.is_cancelled() {
                return None;
            }

            if let Some(line) = self.pending.pop_front() {
                if let Some(line) = self.accept(line) {
                    return Some(Ok(line));
                }
                continue;
            }

            if !self.backlog_done {
                let page = tokio::select! {
                    () = self.cancel.cancelled() => return None,
                    page = self.reader.read_lines(&self.item_id, self.next_expected, Some(self.page_size)) => page,
                };
                match page {
                    Ok(page) if page.is_empty() => self.backlog_done = true,
                    Ok(page) => {
                        // A short page means the stored backlog is exhausted
                        self.backlog_done = page.len() < self.page_size;
                        self.pending.extend(page);
                    }
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            let received = tokio::select! {
                () = self.cancel.cancelled() => return None,
                line = self.receiver.recv() => line,
            };
            match received {
                Some(line) if line.number > self.next_expected => {
                    // Ingestion stores before publishing, so this line and
                    // any published out of order are all in storage
                    self.backlog_done = false;
                }
                Some(line) => {
                    if let Some(line) = self.accept(line) {
                        return Some(Ok(line));
                    }
                }
                None => {
                    self.finished = true;
                    if self.lagged.load(Ordering::SeqCst) {
                        return Some(Err(Error::SubscriberLagged {
                            item_id: self.registration.item_id.clone(),
                        }));
                    }
                    return None;
                }
            }
        }
    }

    /// Drop lines already delivered, advance the cursor otherwise
    fn accept(&mut self, line: Line) -> Option<Line> {
        if line.number < self.next_expected {
            return None;
        }
        self.next_expected = line.number + 1;
        Some(line)
    }
}

/// A live, ordered feed of an item's lines
pub struct LineSubscription {
    inner: BoxStream<'static, Result<Line>>,
}

impl Stream for LineSubscription {
    type Item = Result<Line>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiRef, Item, ItemType, ItemUnit};
    use crate::repository::{MemoryRegistryStore, RegistryStore};
    use crate::storage::{MemoryLineBuffer, MemoryStorage, StorageUnits};
    use std::time::Duration;

    struct Fixture {
        hub: StreamHub,
        units: Arc<StorageUnits>,
        item: Item,
    }

    async fn fixture(config: StreamConfig) -> Fixture {
        let store = MemoryRegistryStore::new();
        let units = Arc::new(
            StorageUnits::builder()
                .buffer("buffer", Arc::new(MemoryLineBuffer::new()))
                .permanent("fs", Arc::new(MemoryStorage::new()))
                .register(&store)
                .await
                .unwrap(),
        );
        let item = Item::new(ItemType::StepLog, ApiRef::default()).unwrap();
        let mut tx = store.begin().await.unwrap();
        let item = tx.insert_item(&item).await.unwrap();
        tx.upsert_item_unit(&ItemUnit::new(item.id.clone(), units.buffer_id().clone()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let reader = ContentReader::new(Arc::new(store), units.clone());
        Fixture {
            hub: StreamHub::new(reader, &config),
            units,
            item,
        }
    }

    impl Fixture {
        /// Store then publish, the way ingestion does
        async fn ingest(&self, number: i64) {
            let line = Line::new(number, format!("[EMERGENCY] line {number}\n"));
            self.units.lines().append(&self.item.id, &line).await.unwrap();
            self.hub.publish(&self.item.id, &line);
        }
    }

    async fn take_numbers(sub: &mut LineSubscription, n: usize) -> Vec<i64> {
        let mut numbers = Vec::new();
        for _ in 0..n {
            let line = tokio::time::timeout(Duration::from_secs(5), sub.next())
                .await
                .expect("line should arrive")
                .expect("stream should not end")
                .unwrap();
            numbers.push(line.number);
        }
        numbers
    }

    #[tokio::test]
    async fn test_backlog_then_live_in_order() {
        let f = fixture(StreamConfig::default()).await;
        for n in 0..10 {
            f.ingest(n).await;
        }

        let mut sub = f.hub.subscribe(f.item.id.clone(), 0, None);
        for n in 10..20 {
            f.ingest(n).await;
        }

        assert_eq!(take_numbers(&mut sub, 20).await, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_offset_resumes_mid_stream() {
        let f = fixture(StreamConfig::default()).await;
        for n in 0..20 {
            f.ingest(n).await;
        }

        let mut sub = f.hub.subscribe(f.item.id.clone(), 15, None);
        assert_eq!(take_numbers(&mut sub, 5).await, vec![15, 16, 17, 18, 19]);

        // Nothing further is pending
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_backlog_is_paged() {
        let f = fixture(StreamConfig {
            subscriber_queue_size: 100,
            backlog_page_size: 3,
        })
        .await;
        for n in 0..10 {
            f.ingest(n).await;
        }

        let mut sub = f.hub.subscribe(f.item.id.clone(), 2, None);
        assert_eq!(take_numbers(&mut sub, 8).await, (2..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_line_stored_during_catch_up_is_delivered_once() {
        let f = fixture(StreamConfig::default()).await;
        for n in 0..5 {
            f.ingest(n).await;
        }

        // Registered, backlog not yet read: line 5 lands both in storage and in the queue
        let mut sub = f.hub.subscribe(f.item.id.clone(), 0, None);
        f.ingest(5).await;
        f.ingest(6).await;

        assert_eq!(take_numbers(&mut sub, 7).await, (0..7).collect::<Vec<_>>());
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_line_published_out_of_order_is_delivered() {
        let f = fixture(StreamConfig::default()).await;
        for n in 0..5 {
            f.ingest(n).await;
        }
        let mut sub = f.hub.subscribe(f.item.id.clone(), 0, None);
        assert_eq!(take_numbers(&mut sub, 5).await, (0..5).collect::<Vec<_>>());

        // Both stored, published 6 then 5
        let five = Line::new(5, "[EMERGENCY] line 5\n");
        let six = Line::new(6, "[EMERGENCY] line 6\n");
        f.units.lines().append(&f.item.id, &five).await.unwrap();
        f.units.lines().append(&f.item.id, &six).await.unwrap();
        f.hub.publish(&f.item.id, &six);
        f.hub.publish(&f.item.id, &five);

        assert_eq!(take_numbers(&mut sub, 2).await, vec![5, 6]);
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_real_gap_is_skipped() {
        let f = fixture(StreamConfig::default()).await;
        f.ingest(0).await;
        let mut sub = f.hub.subscribe(f.item.id.clone(), 0, None);
        assert_eq!(take_numbers(&mut sub, 1).await, vec![0]);

        f.ingest(3).await;
        f.ingest(4).await;
        assert_eq!(take_numbers(&mut sub, 2).await, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_overflow_disconnects_only_slow_subscriber() {
        let f = fixture(StreamConfig {
            subscriber_queue_size: 2,
            backlog_page_size: 100,
        })
        .await;

        let mut slow = f.hub.subscribe(f.item.id.clone(), 0, None);
        let mut fast = f.hub.subscribe(f.item.id.clone(), 0, None);

        f.ingest(0).await;
        assert_eq!(take_numbers(&mut fast, 1).await, vec![0]);
        f.ingest(1).await;
        assert_eq!(take_numbers(&mut fast, 1).await, vec![1]);
        // slow has not polled: its queue holds 0 and 1, line 2 overflows it
        f.ingest(2).await;
        assert_eq!(f.hub.subscriber_count(&f.item.id), 1);
        assert_eq!(take_numbers(&mut fast, 1).await, vec![2]);

        // Backlog replay delivers what is stored, then the stream reports the lag and ends
        let mut results = Vec::new();
        while let Some(item) = slow.next().await {
            results.push(item);
        }
        let last = results.pop().unwrap();
        assert!(matches!(last, Err(Error::SubscriberLagged { .. })));
        let numbers: Vec<i64> = results.into_iter().map(|r| r.unwrap().number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let f = fixture(StreamConfig::default()).await;
        let sub = f.hub.subscribe(f.item.id.clone(), 0, None);
        assert_eq!(f.hub.subscriber_count(&f.item.id), 1);
        drop(sub);
        assert_eq!(f.hub.subscriber_count(&f.item.id), 0);
        assert_eq!(f.hub.publish(&f.item.id, &Line::new(0, "x")), 0);
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let f = fixture(StreamConfig::default()).await;
        let cancel = CancellationToken::new();
        let mut sub = f.hub.subscribe(f.item.id.clone(), 0, Some(cancel.clone()));

        let waiter = tokio::spawn(async move { sub.next().await.is_none() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert!(waiter.await.unwrap());
    }
}
