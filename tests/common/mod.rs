#![allow(dead_code)]

use shellbridge::{EventSink, KernelEvent, SecretProvider};

/// Collects every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<KernelEvent>,
}

impl EventSink for RecordingSink {
    fn send(&mut self, event: KernelEvent) {
        self.events.push(event);
    }
}

impl RecordingSink {
    /// All stream text concatenated in arrival order.
    pub fn stream_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                KernelEvent::Stream { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn display_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, KernelEvent::Display { .. }))
            .count()
    }

    pub fn update_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, KernelEvent::UpdateDisplay { .. }))
            .count()
    }
}

/// Panics when asked for a secret; for paths that must never request one.
pub struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn get_secret(&mut self, prompt: &str) -> String {
        panic!("unexpected secret request for prompt {:?}", prompt);
    }
}
