use crate::config::ClientConfig;
use crate::controls::ControlInput;
use crate::error::{ClientError, ControlError};
use crate::presentation::{render, DashboardView};
use crate::reconciler::{Applied, NoiseSource, RandomNoise, Reconciler};
use crate::state::{ConnectionState, DashboardState};
use crate::transport::{TransportEvent, TransportHandle};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use vigil_protocol::{ClientCommand, ConfigPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Not connected or the queue was full. Never retried.
    Dropped,
}

/// One dashboard session: state, reconciler and the transport feeding them.
///
/// All state mutation happens on the task calling [`DashboardClient::pump`].
pub struct DashboardClient<N: NoiseSource = RandomNoise> {
    config: ClientConfig,
    state: DashboardState,
    reconciler: Reconciler<N>,
    transport: Option<TransportHandle>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    /// Connection the last `Online` reported; cleared on close.
    session: Option<u64>,
    gave_up: bool,
}

impl DashboardClient<RandomNoise> {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_noise(config, RandomNoise::new())
    }
}

impl<N: NoiseSource> DashboardClient<N> {
    pub fn with_noise(config: ClientConfig, noise: N) -> Self {
        Self {
            state: DashboardState::new(config.log_capacity),
            config,
            reconciler: Reconciler::new(noise),
            transport: None,
            events: None,
            session: None,
            gave_up: false,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn view(&self) -> DashboardView {
        render(&self.state)
    }

    /// False once a capped reconnect policy has given up.
    pub fn is_active(&self) -> bool {
        !self.gave_up && self.transport.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Starts the transport. Calling it while one is running does nothing;
    /// after the transport gave up it starts a fresh one.
    pub fn connect(&mut self) {
        if self.is_active() {
            debug!("transport already running; connect ignored");
            return;
        }
        let (handle, events) = TransportHandle::spawn(
            self.config.endpoint.clone(),
            self.config.reconnect,
            self.config.command_buffer,
        );
        self.transport = Some(handle);
        self.events = Some(events);
        self.session = None;
        self.gave_up = false;
    }

    pub fn send(&mut self, patch: ConfigPatch) -> SendOutcome {
        if self.state.connection != ConnectionState::Open {
            debug!(?patch, "not connected; dropping command");
            return SendOutcome::Dropped;
        }
        if patch.is_empty() {
            return SendOutcome::Dropped;
        }
        let (Some(transport), Some(session)) = (self.transport.as_ref(), self.session) else {
            return SendOutcome::Dropped;
        };
        if transport.try_send(session, ClientCommand::Command(patch)) {
            SendOutcome::Sent
        } else {
            warn!("command queue unavailable; dropping command");
            SendOutcome::Dropped
        }
    }

    pub fn control(&mut self, input: ControlInput) -> Result<SendOutcome, ControlError> {
        let patch = input.apply(&mut self.state.config)?;
        Ok(self.send(patch))
    }

    /// Waits for the next transport event and applies it.
    /// Returns `None` when not connected or once the transport has stopped.
    pub async fn pump(&mut self) -> Option<TransportEvent> {
        let event = self.events.as_mut()?.recv().await?;
        self.handle_event(&event);
        Some(event)
    }

    pub fn handle_event(&mut self, event: &TransportEvent) -> Option<Applied> {
        match event {
            TransportEvent::Online { session } => self.session = Some(*session),
            TransportEvent::Closed { .. } => self.session = None,
            TransportEvent::GaveUp { .. } => self.gave_up = true,
            _ => {}
        }
        self.reconciler.apply_event(&mut self.state, event)
    }

    pub async fn teardown(&mut self) -> Result<(), ClientError> {
        self.events = None;
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await?;
        }
        self.session = None;
        self.state.connection = ConnectionState::Closed;
        self.state.retry_in = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LogKind;

    struct FixedNoise;

    impl NoiseSource for FixedNoise {
        fn confidence(&mut self) -> f32 {
            94.2
        }

        fn grid_cell(&mut self) -> u8 {
            10
        }
    }

    fn open_client() -> DashboardClient<FixedNoise> {
        let mut client = DashboardClient::with_noise(ClientConfig::default(), FixedNoise);
        client.handle_event(&TransportEvent::Online { session: 1 });
        client
    }

    fn frame(text: &str) -> TransportEvent {
        TransportEvent::Frame(text.to_string())
    }

    #[test]
    fn update_then_empty_update() {
        let mut client = open_client();
        let before = client.state().log.len();

        client.handle_event(&frame(r#"{"type":"update","data":[{"id":"P-001"}]}"#));
        let view = client.view();
        assert!(view.detection.is_some());
        assert_eq!(view.gallery.len(), 1);
        assert_eq!(view.gallery[0].id, "P-001");
        assert_eq!(client.state().log.len(), before + 1);
        let head = client.state().log.head().unwrap();
        assert_eq!(head.kind, LogKind::Detected);
        assert!(head.message.contains("P-001"));

        client.handle_event(&frame(r#"{"type":"update","data":[]}"#));
        let view = client.view();
        assert!(view.detection.is_none());
        assert!(view.gallery.is_empty());
    }

    #[test]
    fn loosely_typed_detection_is_still_shown() {
        let mut client = open_client();
        client.handle_event(&frame(r#"{"type":"update","data":[{"id":"P-001","age":27}]}"#));

        let view = client.view();
        assert_eq!(view.detection.unwrap().target_label, "P-001 | TRUSTED");
        assert_eq!(view.gallery.len(), 1);
        assert_eq!(view.gallery[0].caption.as_deref(), Some("27"));
        assert_eq!(client.state().stats.malformed, 0);
    }

    #[test]
    fn config_frame_sets_controls() {
        let mut client = open_client();
        client.handle_event(&frame(
            r#"{"type":"config","data":{"global_detect":true,"auto_reg":false,"threshold":0.75}}"#,
        ));
        let view = client.view();
        assert_eq!(view.threshold.value, 0.75);
        assert!(view.global_detect.active);
        assert!(!view.auto_reg.active);
    }

    #[test]
    fn local_edit_then_server_config_wins() {
        let mut client = DashboardClient::with_noise(ClientConfig::default(), FixedNoise);
        let outcome = client.control(ControlInput::Threshold(0.2)).unwrap();
        // Not connected: optimistic local update, nothing sent.
        assert_eq!(outcome, SendOutcome::Dropped);
        assert_eq!(client.state().config.threshold, 0.2);

        client.handle_event(&frame(
            r#"{"type":"config","data":{"global_detect":false,"auto_reg":true,"threshold":0.9}}"#,
        ));
        assert_eq!(client.state().config.threshold, 0.9);
        assert!(client.state().config.auto_reg);
    }

    #[test]
    fn send_while_closed_is_dropped() {
        let mut client = DashboardClient::with_noise(ClientConfig::default(), FixedNoise);
        assert_eq!(client.state().connection, ConnectionState::Closed);
        assert_eq!(
            client.send(ConfigPatch::global_detect(true)),
            SendOutcome::Dropped
        );
    }

    #[test]
    fn malformed_frame_keeps_connection() {
        let mut client = open_client();
        assert_eq!(client.handle_event(&frame("<<garbage>>")), None);
        assert_eq!(client.state().connection, ConnectionState::Open);
        assert_eq!(client.state().stats.malformed, 1);
    }
}
