mod client;
mod config;
mod controls;
mod error;
mod feed_server;
mod presentation;
mod reconciler;
mod reconnect;
mod state;
mod transport;

pub use crate::client::{DashboardClient, SendOutcome};
pub use crate::config::{ClientConfig, ConfigOverrides, DEFAULT_HOST, WS_PATH};
pub use crate::controls::ControlInput;
pub use crate::error::{ClientError, ConfigError, ControlError, FeedError};
pub use crate::feed_server::{
    FeedHub, FeedInbound, FeedOutbound, FeedServer, INBOUND_CAP, OUTBOUND_CAP,
};
pub use crate::presentation::{render, DashboardView, GAUGE_CIRCUMFERENCE};
pub use crate::reconciler::{Applied, NoiseSource, RandomNoise, Reconciler};
pub use crate::reconnect::{
    Clock, ManualClock, ReconnectPolicy, Reconnector, Schedule, SystemClock,
};
pub use crate::state::{
    ConnectionState, DashboardState, FrameStats, LogEntry, LogKind, LogRing,
};
pub use crate::transport::{CloseReason, TransportCommand, TransportEvent, TransportHandle};
pub use vigil_protocol::{
    ClientCommand, ConfigPatch, ConfigState, Detection, FrameError, InboundFrame,
};
