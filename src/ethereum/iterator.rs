use alloy::rpc::types::Log;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    event::{EventSchema, LogDecoder},
    subscription::{LogStream, Subscription},
    BindingError,
};

/// Iterates over the decoded events delivered by a log subscription.
///
/// The iterator races the log channel against the subscription's
/// error/completion channel. Once the subscription completes, logs that were
/// already delivered are still decoded before the end of the stream is
/// reported. Any error, from the subscription or from decoding, stops the
/// iteration for good.
pub struct EventIterator<D: LogDecoder = EventSchema> {
    decoder: D,
    current: Option<D::Output>,

    logs: mpsc::Receiver<Log>,
    sub: Subscription,
    /// The subscription finished delivering logs.
    done: bool,
    fail: Option<BindingError>,
}

impl<D: LogDecoder> std::fmt::Debug for EventIterator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIterator")
            .field("event", &self.decoder.event_name())
            .field("done", &self.done)
            .field("fail", &self.fail)
            .finish_non_exhaustive()
    }
}

impl<D: LogDecoder> EventIterator<D> {
    pub fn new(decoder: D, stream: LogStream) -> Self {
        Self {
            decoder,
            current: None,
            logs: stream.logs,
            sub: stream.sub,
            done: false,
            fail: None,
        }
    }

    /// Moves to the next event. Returns `false` at the end of the stream or
    /// after a failure; [`EventIterator::error`] tells the two apart.
    pub async fn advance(&mut self) -> bool {
        loop {
            if self.fail.is_some() {
                return false;
            }

            if self.done {
                return match self.logs.try_recv() {
                    Ok(log) => self.unpack(log),
                    Err(_) => false,
                };
            }

            tokio::select! {
                Some(log) = self.logs.recv() => return self.unpack(log),
                result = self.sub.err() => {
                    self.done = true;
                    if let Err(err) = result {
                        warn!(event = self.decoder.event_name(), "Log subscription failed: {}", err);
                        self.fail = Some(err);
                    } else {
                        debug!(event = self.decoder.event_name(), "Log subscription completed");
                    }
                }
            }
        }
    }

    fn unpack(&mut self, log: Log) -> bool {
        match self.decoder.decode(&log) {
            Ok(event) => {
                self.current = Some(event);
                true
            }
            Err(err) => {
                warn!(event = self.decoder.event_name(), "Failed to decode log: {}", err);
                self.current = None;
                self.fail = Some(err);
                false
            }
        }
    }

    /// The event produced by the last successful [`EventIterator::advance`].
    pub fn event(&self) -> Option<&D::Output> {
        self.current.as_ref()
    }

    pub fn take_event(&mut self) -> Option<D::Output> {
        self.current.take()
    }

    /// The error that stopped the iteration, if any.
    pub fn error(&self) -> Option<&BindingError> {
        self.fail.as_ref()
    }

    /// Releases the underlying subscription. Buffered logs stay readable.
    pub fn close(&mut self) {
        self.sub.unsubscribe();
    }

    /// Drains the iterator, failing with the terminal error if one occurs.
    pub async fn collect_all(mut self) -> Result<Vec<D::Output>, BindingError> {
        let mut events = Vec::new();
        while self.advance().await {
            if let Some(event) = self.take_event() {
                events.push(event);
            }
        }
        self.close();
        match self.fail.take() {
            Some(err) => Err(err),
            None => Ok(events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::event::tests::{deposit_log, deposit_schema, make_log};
    use alloy::{
        dyn_abi::DynSolValue,
        primitives::{Address, U256},
    };
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn amount_of(event: &crate::ethereum::DecodedEvent) -> U256 {
        match event.get("amount") {
            Some(DynSolValue::Uint(v, _)) => *v,
            other => panic!("unexpected amount {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_buffered_logs_then_completion() {
        let schema = deposit_schema();
        for n in 0..8u64 {
            let logs: Vec<Log> = (0..n)
                .map(|i| deposit_log(&schema, Address::repeat_byte(1), i, i))
                .collect();
            let mut it = EventIterator::new(schema.clone(), LogStream::from_logs(logs));

            let mut seen = Vec::new();
            while it.advance().await {
                seen.push(amount_of(it.event().unwrap()));
            }

            let expected: Vec<U256> = (0..n).map(U256::from).collect();
            assert_eq!(seen, expected);
            assert!(it.error().is_none());
            assert!(!it.advance().await);
        }
    }

    #[tokio::test]
    async fn test_completion_before_drain_keeps_logs() {
        let schema = deposit_schema();
        let (tx, rx) = mpsc::channel(16);
        for i in 0..5u64 {
            tx.send(deposit_log(&schema, Address::repeat_byte(2), i, i))
                .await
                .unwrap();
        }

        // Completion is already observable while all five logs are queued.
        let mut it = EventIterator::new(schema, LogStream::new(rx, Subscription::completed(Ok(()))));

        let mut count = 0u64;
        while it.advance().await {
            assert_eq!(amount_of(it.event().unwrap()), U256::from(count));
            count += 1;
        }
        assert_eq!(count, 5);
        assert!(it.error().is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn test_live_producer_is_drained_in_order() {
        let schema = deposit_schema();
        let (tx, rx) = mpsc::channel(2);
        let producer_schema = schema.clone();
        let sub = Subscription::new(move |_quit| async move {
            for i in 0..10u64 {
                let log = deposit_log(&producer_schema, Address::repeat_byte(3), i, i);
                if tx.send(log).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            Ok(())
        });

        let events = EventIterator::new(schema, LogStream::new(rx, sub))
            .collect_all()
            .await
            .unwrap();
        let amounts: Vec<U256> = events.iter().map(amount_of).collect();
        assert_eq!(amounts, (0..10u64).map(U256::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_decode_error_is_sticky() {
        let schema = deposit_schema();
        let good = deposit_log(&schema, Address::repeat_byte(4), 1, 1);
        let bad = make_log(vec![schema.selector()], vec![0u8; 32], 2);
        let logs = vec![good.clone(), bad, good];

        let mut it = EventIterator::new(schema, LogStream::from_logs(logs));
        assert!(it.advance().await);
        assert!(!it.advance().await);
        assert!(it.event().is_none());

        let first = it.error().map(|e| e.to_string()).unwrap();
        for _ in 0..3 {
            assert!(!it.advance().await);
            assert!(matches!(it.error(), Some(BindingError::DecodeLog { .. })));
            assert_eq!(it.error().map(|e| e.to_string()).unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_subscription_error_is_terminal() {
        let schema = deposit_schema();
        let (tx, rx) = mpsc::channel(4);
        let (fail_tx, fail_rx) = oneshot::channel::<()>();
        let producer_schema = schema.clone();
        let sub = Subscription::new(move |_quit| async move {
            for i in 0..2u64 {
                let _ = tx
                    .send(deposit_log(&producer_schema, Address::repeat_byte(5), i, i))
                    .await;
            }
            let _ = fail_rx.await;
            Err::<(), _>(BindingError::SubscriptionClosed("node went away".into()))
        });

        let mut it = EventIterator::new(schema, LogStream::new(rx, sub));
        assert!(it.advance().await);
        assert!(it.advance().await);

        fail_tx.send(()).unwrap();
        assert!(!it.advance().await);
        assert!(matches!(it.error(), Some(BindingError::SubscriptionClosed(_))));
        assert!(!it.advance().await);
    }

    fn crash() -> Result<(), BindingError> {
        panic!("log feed crashed")
    }

    #[tokio::test]
    async fn test_crashed_feed_is_not_a_clean_end() {
        let schema = deposit_schema();
        let (tx, rx) = mpsc::channel(4);
        let (crash_tx, crash_rx) = oneshot::channel::<()>();
        let producer_schema = schema.clone();
        let sub = Subscription::new(move |_quit| async move {
            let _ = tx
                .send(deposit_log(&producer_schema, Address::repeat_byte(6), 1, 1))
                .await;
            let _ = crash_rx.await;
            crash()
        });

        let mut it = EventIterator::new(schema, LogStream::new(rx, sub));
        assert!(it.advance().await);

        crash_tx.send(()).unwrap();
        assert!(!it.advance().await);
        assert!(matches!(it.error(), Some(BindingError::SubscriptionClosed(_))));
        assert!(format!("{:?}", it).contains("Deposit"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let schema = deposit_schema();
        let (tx, rx) = mpsc::channel::<Log>(1);
        let sub = Subscription::new(move |quit| async move {
            let _keep = tx;
            let _ = quit.await;
            Ok(())
        });

        let mut it = EventIterator::new(schema, LogStream::new(rx, sub));
        it.close();
        it.close();
        it.close();

        // Cancelling the feed ends the iteration cleanly.
        let advanced = tokio::time::timeout(Duration::from_secs(1), it.advance())
            .await
            .expect("iterator should finish after close");
        assert!(!advanced);
        assert!(it.error().is_none());
        it.close();
    }

    #[tokio::test]
    async fn test_three_deposits_end_to_end() {
        let schema = deposit_schema();
        let senders = [
            Address::repeat_byte(0x0a),
            Address::repeat_byte(0x0b),
            Address::repeat_byte(0x0c),
        ];
        let logs: Vec<Log> = senders
            .iter()
            .enumerate()
            .map(|(i, who)| deposit_log(&schema, *who, (i as u64 + 1) * 10, 100 + i as u64))
            .collect();

        let events = EventIterator::new(schema, LogStream::from_logs(logs))
            .collect_all()
            .await
            .unwrap();

        assert_eq!(events.len(), 3);
        for (i, event) in events.iter().enumerate() {
            let indexed: Vec<_> = event.indexed().collect();
            let body: Vec<_> = event.body().collect();
            assert_eq!(indexed.len(), 1);
            assert_eq!(body.len(), 1);
            assert_eq!(indexed[0].value, DynSolValue::Address(senders[i]));
            assert_eq!(
                body[0].value,
                DynSolValue::Uint(U256::from((i as u64 + 1) * 10), 256)
            );
            assert_eq!(event.raw.block_number, Some(100 + i as u64));
        }
    }
}
