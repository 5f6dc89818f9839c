use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::time::Duration;
use vigil_protocol::{ConfigState, Detection};

pub const GRID_CELLS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connecting,
    Open,
    #[default]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Online,
    Offline,
    Detected,
}

impl LogKind {
    pub fn label(&self) -> &'static str {
        match self {
            LogKind::Info => "INFO",
            LogKind::Online => "ONLINE",
            LogKind::Offline => "OFFLINE",
            LogKind::Detected => "DETECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub kind: LogKind,
    pub message: String,
}

/// Most recent entries first; the oldest is evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, kind: LogKind, message: impl Into<String>) {
        self.entries.push_front(LogEntry {
            at: Local::now(),
            kind,
            message: message.into(),
        });
        self.entries.truncate(self.capacity);
    }

    pub fn head(&self) -> Option<&LogEntry> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub updates: u64,
    pub configs: u64,
    pub unknown: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone)]
pub struct DashboardState {
    pub connection: ConnectionState,
    pub retry_in: Option<Duration>,
    pub detections: Vec<Detection>,
    /// Synthetic match confidence in percent, present while detections are shown.
    pub confidence: Option<f32>,
    pub grid: [u8; GRID_CELLS],
    pub config: ConfigState,
    /// False until the first `config` frame of the current connection.
    pub config_synced: bool,
    pub log: LogRing,
    pub stats: FrameStats,
}

impl DashboardState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            connection: ConnectionState::default(),
            retry_in: None,
            detections: Vec::new(),
            confidence: None,
            grid: [0; GRID_CELLS],
            config: ConfigState::default(),
            config_synced: false,
            log: LogRing::new(log_capacity),
            stats: FrameStats::default(),
        }
    }

    pub fn primary(&self) -> Option<&Detection> {
        self.detections.first()
    }

    pub fn detection_visible(&self) -> bool {
        !self.detections.is_empty()
    }

    /// Drops everything scoped to a single connection. The log survives.
    pub fn reset_session(&mut self) {
        self.detections.clear();
        self.confidence = None;
        self.grid = [0; GRID_CELLS];
        self.config = ConfigState::default();
        self.config_synced = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_after_capacity() {
        let mut log = LogRing::new(50);
        for n in 1..=51 {
            log.push(LogKind::Info, format!("entry {n}"));
        }
        assert_eq!(log.len(), 50);
        assert_eq!(log.head().map(|e| e.message.as_str()), Some("entry 51"));
        assert!(log.iter().all(|e| e.message != "entry 1"));
        assert_eq!(log.iter().last().map(|e| e.message.as_str()), Some("entry 2"));
    }

    #[test]
    fn session_reset_keeps_log() {
        let mut state = DashboardState::new(50);
        state.detections.push(Detection::new("P-001"));
        state.config_synced = true;
        state.log.push(LogKind::Online, "STREAM_ACTIVE");

        state.reset_session();

        assert!(!state.detection_visible());
        assert!(!state.config_synced);
        assert_eq!(state.log.len(), 1);
    }
}
