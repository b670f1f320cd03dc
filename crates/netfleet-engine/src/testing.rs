//! Scripted sessions and event capture for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use netfleet_common::models::EventLevel;

use crate::session::{DeviceSession, SessionConnector, SessionError};
use crate::worker::EventSink;

/// A canned answer to one command.
#[derive(Debug, Clone)]
pub enum Reply {
    Output(String),
    /// The device dropped the session, as it does on reboot.
    Closed,
    Timeout,
}

impl Reply {
    pub fn output(text: impl Into<String>) -> Self {
        Reply::Output(text.into())
    }
}

#[derive(Default)]
struct Script {
    replies: HashMap<(String, String), VecDeque<Reply>>,
    unreachable: HashSet<String>,
    sent: HashMap<String, Vec<String>>,
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
}

/// Connector whose devices answer from a script.
///
/// Replies queued for one command are consumed in order; the last one
/// repeats. Commands with no script are rejected.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    delay: Duration,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn reply(&self, device: &str, command: &str, reply: Reply) {
        self.script()
            .replies
            .entry((device.to_string(), command.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn unreachable(&self, device: &str) {
        self.script().unreachable.insert(device.to_string());
    }

    /// Commands sent to `device`, in order.
    pub fn sent(&self, device: &str) -> Vec<String> {
        self.script().sent.get(device).cloned().unwrap_or_default()
    }

    /// Most sessions ever open to `device` at the same time.
    pub fn max_concurrent_sessions(&self, device: &str) -> usize {
        self.script().max_active.get(device).copied().unwrap_or(0)
    }
}

impl SessionConnector for ScriptedConnector {
    fn connect(&self, device_ip: &str) -> Result<Box<dyn DeviceSession>, SessionError> {
        let mut script = self.script();
        if script.unreachable.contains(device_ip) {
            return Err(SessionError::Connect {
                host: device_ip.to_string(),
                reason: "Connection refused".into(),
            });
        }
        let active = script.active.entry(device_ip.to_string()).or_default();
        *active += 1;
        let now = *active;
        let max = script.max_active.entry(device_ip.to_string()).or_default();
        *max = (*max).max(now);

        Ok(Box::new(ScriptedSession {
            device: device_ip.to_string(),
            connector: self.clone(),
        }))
    }
}

struct ScriptedSession {
    device: String,
    connector: ScriptedConnector,
}

impl DeviceSession for ScriptedSession {
    fn send_command(&mut self, command: &str) -> Result<String, SessionError> {
        if !self.connector.delay.is_zero() {
            thread::sleep(self.connector.delay);
        }
        let mut script = self.connector.script();
        script
            .sent
            .entry(self.device.clone())
            .or_default()
            .push(command.to_string());

        let key = (self.device.clone(), command.to_string());
        let reply = match script.replies.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match reply {
            Some(Reply::Output(text)) => Ok(text),
            Some(Reply::Closed) => Err(SessionError::Closed),
            Some(Reply::Timeout) => Err(SessionError::Timeout(1)),
            None => Err(SessionError::Rejected(format!("no script for {command:?}"))),
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        let mut script = self.connector.script();
        if let Some(active) = script.active.get_mut(&self.device) {
            *active = active.saturating_sub(1);
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(EventLevel, String)>>,
}

impl RecordingSink {
    fn events(&self) -> MutexGuard<'_, Vec<(EventLevel, String)>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn levels(&self) -> Vec<EventLevel> {
        self.events().iter().map(|(l, _)| *l).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, level: EventLevel, message: String) {
        self.events().push((level, message));
    }
}
