//! Event sink that records every engine event

#![allow(dead_code)]

use ladder_dl::download::{EngineEvent, EventSink};
use std::sync::Mutex;

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, EngineEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn events_for(&self, reference: &str) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == reference)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Event tags in emission order, e.g. `["ATTEMPT", "FAILED", ...]`.
    pub fn tags(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.tag()).collect()
    }

    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|(_, e)| pred(e)).count()
    }

    /// Indices carried by `AttemptStarted` events, in order.
    pub fn started_indices(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::AttemptStarted { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    /// `Failed` events tied to a single attempt.
    pub fn attempt_failures(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::Failed { index: Some(_), .. }))
    }

    /// Terminal `Failed` events for the whole request.
    pub fn terminal_failures(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::Failed { index: None, .. }))
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, reference: &str, event: &EngineEvent) {
        self.events.lock().unwrap().push((reference.to_string(), event.clone()));
    }
}
