// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Event loop infrastructure for asynchronous message processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::{mpsc, Notify};

use crate::error::{Result, StrataError};

/// Trait defining actions to be performed in response to events in an event loop.
#[async_trait]
pub trait EventAction<E>: Send + Sync {
    /// Called when the event loop starts.
    fn on_start(&self);

    /// Called when the event loop stops.
    fn on_stop(&self);

    /// Called when an event is received. Follow-up events may be posted through `tx_event`.
    async fn on_receive(&self, event: E, tx_event: &EventSender<E>) -> Result<()>;

    /// Called when an error occurs during event processing.
    fn on_error(&self, error: StrataError);
}

/// An asynchronous event loop that drains one channel with a single worker, so events
/// posted by the same producer are handled in the order they were posted.
#[derive(Clone)]
pub struct EventLoop<E> {
    /// The name of this event loop for logging purposes.
    pub name: String,
    /// The buffer size for the event channel.
    pub buffer_size: usize,
    stopped: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    action: Arc<dyn EventAction<E>>,
    tx_event: Option<mpsc::Sender<E>>,
}

impl<E: Send + 'static> EventLoop<E> {
    /// Creates a new event loop with the specified name, buffer size, and action handler.
    pub fn new(name: String, buffer_size: usize, action: Arc<dyn EventAction<E>>) -> Self {
        Self {
            name,
            buffer_size,
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            action,
            tx_event: None,
        }
    }

    fn run(&self, tx_event: EventSender<E>, mut rx_event: mpsc::Receiver<E>) {
        let name = self.name.clone();
        let stopped = self.stopped.clone();
        let shutdown = self.shutdown.clone();
        let action = self.action.clone();
        tokio::spawn(async move {
            info!("Starting the event loop {name}");
            while !stopped.load(Ordering::SeqCst) {
                let event = tokio::select! {
                    event = rx_event.recv() => event,
                    _ = shutdown.notified() => break,
                };
                match event {
                    Some(event) => {
                        if let Err(e) = action.on_receive(event, &tx_event).await {
                            error!("Fail to process event due to {e}");
                            action.on_error(e);
                        }
                    }
                    None => {
                        info!("Event Channel closed, shutting down");
                        break;
                    }
                }
            }
            info!("The event loop {name} has been stopped");
        });
    }

    /// Starts the event loop, spawning a background task to process events.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StrataError::General(format!(
                "{} has already been stopped",
                self.name
            )));
        }
        if self.tx_event.is_some() {
            return Err(StrataError::General(format!(
                "{} has already been started",
                self.name
            )));
        }
        self.action.on_start();

        let (tx_event, rx_event) = mpsc::channel::<E>(self.buffer_size);
        self.tx_event = Some(tx_event.clone());
        self.run(EventSender::new(tx_event), rx_event);

        Ok(())
    }

    /// Stops the event loop. Calling it more than once is a no-op.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
            self.action.on_stop();
        }
    }

    /// Whether [`EventLoop::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns an event sender for posting events to this loop.
    pub fn get_sender(&self) -> Result<EventSender<E>> {
        Ok(EventSender {
            tx_event: self.tx_event.as_ref().cloned().ok_or_else(|| {
                StrataError::General(format!("Event loop {} is not started", self.name))
            })?,
        })
    }
}

/// A sender handle for posting events to an event loop.
pub struct EventSender<E> {
    tx_event: mpsc::Sender<E>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx_event: self.tx_event.clone(),
        }
    }
}

impl<E> EventSender<E> {
    /// Creates a new event sender wrapping the given channel sender.
    pub fn new(tx_event: mpsc::Sender<E>) -> Self {
        Self { tx_event }
    }

    /// Posts an event to the event loop asynchronously.
    pub async fn post_event(&self, event: E) -> Result<()> {
        self.tx_event
            .send(event)
            .await
            .map_err(|e| StrataError::General(format!("Fail to send event due to {e}")))
    }

    /// Posts events in order, stopping at the first failure.
    pub async fn post_events(&self, events: impl IntoIterator<Item = E>) -> Result<()> {
        for event in events {
            self.post_event(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    struct Doubler {
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl EventAction<u32> for Doubler {
        fn on_start(&self) {}

        fn on_stop(&self) {}

        async fn on_receive(&self, event: u32, tx_event: &EventSender<u32>) -> Result<()> {
            self.recorder.seen.lock().unwrap().push(event);
            if event < 8 {
                tx_event.post_event(event * 2).await?;
            }
            Ok(())
        }

        fn on_error(&self, _error: StrataError) {}
    }

    #[tokio::test]
    async fn test_events_are_processed_in_order() -> Result<()> {
        let recorder = Arc::new(Recorder::default());
        let mut event_loop = EventLoop::new(
            "test".to_owned(),
            16,
            Arc::new(Doubler {
                recorder: recorder.clone(),
            }),
        );
        assert!(event_loop.get_sender().is_err());
        event_loop.start()?;
        event_loop.get_sender()?.post_event(1).await?;

        for _ in 0..100 {
            if recorder.seen.lock().unwrap().len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2, 4, 8]);

        event_loop.stop();
        event_loop.stop();
        assert!(event_loop.is_stopped());
        assert!(event_loop.start().is_err());
        Ok(())
    }
}
