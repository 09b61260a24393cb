//! Ordered table of task events with one time per trial

use crate::error::{EphysError, EphysResult};
use ndarray::Array1;

/// Ordered event name → per-trial times
///
/// Declaration order defines each event's successor, which is the default
/// end of a time-locked window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventTable {
    events: Vec<(String, Array1<f64>)>,
}

impl EventTable {
    pub fn new() -> Self {
        EventTable { events: Vec::new() }
    }

    /// Append an event; names must be unique and all events must cover the
    /// same number of trials
    pub fn with_event(mut self, name: &str, times: impl Into<Array1<f64>>) -> EphysResult<Self> {
        self.push(name, times.into())?;
        Ok(self)
    }

    pub fn push(&mut self, name: &str, times: Array1<f64>) -> EphysResult<()> {
        if self.index_of(name).is_some() {
            return Err(EphysError::InvalidEvents {
                reason: format!("duplicate event '{}'", name),
            });
        }
        if let Some(num_trials) = self.num_trials() {
            if times.len() != num_trials {
                return Err(EphysError::InvalidEvents {
                    reason: format!(
                        "event '{}' has {} trials, expected {}",
                        name,
                        times.len(),
                        num_trials
                    ),
                });
            }
        }
        self.events.push((name.to_string(), times));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Trial count shared by every event, or `None` for an empty table
    pub fn num_trials(&self) -> Option<usize> {
        self.events.first().map(|(_, times)| times.len())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Array1<f64>> {
        self.index_of(name).map(|i| &self.events[i].1)
    }

    /// Times of `event`, failing on unknown names
    pub fn times(&self, event: &str) -> EphysResult<&Array1<f64>> {
        self.get(event).ok_or_else(|| EphysError::UnknownEvent {
            event: event.to_string(),
        })
    }

    /// Name and times of the event declared right after `event`
    pub fn successor(&self, event: &str) -> EphysResult<(&str, &Array1<f64>)> {
        let index = self.index_of(event).ok_or_else(|| EphysError::UnknownEvent {
            event: event.to_string(),
        })?;
        self.events
            .get(index + 1)
            .map(|(name, times)| (name.as_str(), times))
            .ok_or_else(|| EphysError::NoSuccessorEvent {
                event: event.to_string(),
            })
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.events.iter().position(|(n, _)| n == name)
    }
}
