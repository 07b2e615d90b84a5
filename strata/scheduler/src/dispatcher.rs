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


//! Delivers every event to the one handler registered for its category.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};

use strata_core::error::{Result, StrataError};
use strata_core::event_loop::{EventAction, EventSender};

use crate::event::{Event, EventCategory};

/// Handles the events of one category. Follow-up events are returned rather than
/// delivered, so no entity lock is held while another entity handles an event.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Event) -> Result<Vec<Event>>;
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventCategory, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn register(
        &mut self,
        category: EventCategory,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        if self.handlers.contains_key(&category) {
            return Err(StrataError::Internal(format!(
                "A handler for {category:?} events is already registered"
            )));
        }
        self.handlers.insert(category, handler);
        Ok(())
    }

    /// Handles `event` and then every follow-up event it causes, in the order they were
    /// produced. A failing handler is logged and the remaining events are still delivered.
    pub fn dispatch(&self, event: Event) -> Result<()> {
        let mut queue = VecDeque::from([event]);
        let mut failed = 0usize;
        while let Some(event) = queue.pop_front() {
            match self.deliver(event) {
                Ok(follow_ups) => queue.extend(follow_ups),
                Err(e) => {
                    error!("Fail to handle event due to {e}");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            debug!("{failed} events failed while draining the dispatch queue");
        }
        Ok(())
    }

    fn deliver(&self, event: Event) -> Result<Vec<Event>> {
        let category = event.category();
        let handler = self.handlers.get(&category).ok_or_else(|| {
            StrataError::Internal(format!("No handler registered for {category:?} events"))
        })?;
        debug!("Dispatching {event:?}");
        handler.handle(event)
    }
}

#[async_trait]
impl EventAction<Event> for Dispatcher {
    fn on_start(&self) {
        info!("Starting Dispatcher");
    }

    fn on_stop(&self) {
        info!("Stopping Dispatcher")
    }

    async fn on_receive(&self, event: Event, _tx_event: &EventSender<Event>) -> Result<()> {
        self.dispatch(event)
    }

    fn on_error(&self, error: StrataError) {
        error!("Error received by Dispatcher: {error:?}");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::SchedulerEvent;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler for Recording {
        fn handle(&self, event: Event) -> Result<Vec<Event>> {
            self.seen.lock().push(format!("{event:?}"));
            match event {
                Event::Scheduler(SchedulerEvent::ShutdownRequested) => Ok(vec![
                    Event::Scheduler(SchedulerEvent::Tick),
                    Event::Scheduler(SchedulerEvent::NodesUpdated(vec![])),
                ]),
                Event::Scheduler(SchedulerEvent::Tick) => {
                    Err(StrataError::Internal("tick failed".to_owned()))
                }
                _ => Ok(vec![]),
            }
        }
    }

    #[test]
    fn follow_up_events_are_delivered_in_order() -> Result<()> {
        let handler = Arc::new(Recording::default());
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(EventCategory::Scheduler, handler.clone())?;
        dispatcher.dispatch(Event::Scheduler(SchedulerEvent::ShutdownRequested))?;
        assert_eq!(
            *handler.seen.lock(),
            vec![
                "SchedulerShutdownRequested.".to_owned(),
                "SchedulerTick.".to_owned(),
                "SchedulerNodesUpdated.".to_owned(),
            ]
        );
        Ok(())
    }

    #[test]
    fn one_handler_per_category() -> Result<()> {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(EventCategory::Scheduler, Arc::new(Recording::default()))?;
        assert!(dispatcher
            .register(EventCategory::Scheduler, Arc::new(Recording::default()))
            .is_err());
        assert!(dispatcher
            .dispatch(Event::Scheduler(SchedulerEvent::Tick))
            .is_ok());
        Ok(())
    }
}
