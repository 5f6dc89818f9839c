use crate::state::{ConnectionState, DashboardState, LogKind};
use crate::transport::TransportEvent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use vigil_protocol::{ConfigState, FrameError, InboundFrame};

pub const CONFIDENCE_FLOOR: f32 = 94.2;
pub const CONFIDENCE_SPAN: f32 = 2.0;
const MATCH_SCORE: &str = "0.942";

/// Cosmetic randomness: the synthetic confidence and the vector grid cells.
pub trait NoiseSource: Send {
    /// Percent, within `[CONFIDENCE_FLOOR, CONFIDENCE_FLOOR + CONFIDENCE_SPAN)`.
    fn confidence(&mut self) -> f32;
    /// Cell opacity in `0..100`.
    fn grid_cell(&mut self) -> u8;
}

pub struct RandomNoise {
    rng: StdRng,
}

impl RandomNoise {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomNoise {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseSource for RandomNoise {
    fn confidence(&mut self) -> f32 {
        CONFIDENCE_FLOOR + self.rng.gen::<f32>() * CONFIDENCE_SPAN
    }

    fn grid_cell(&mut self) -> u8 {
        self.rng.gen_range(0..100)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Detections { primary: String, count: usize },
    Cleared,
    Config(ConfigState),
    Ignored { kind: String },
}

pub struct Reconciler<N: NoiseSource = RandomNoise> {
    noise: N,
}

impl<N: NoiseSource> Reconciler<N> {
    pub fn new(noise: N) -> Self {
        Self { noise }
    }

    /// Decodes one frame and applies it. A bad frame is logged, counted and dropped.
    pub fn apply_text(
        &mut self,
        state: &mut DashboardState,
        text: &str,
    ) -> Result<Applied, FrameError> {
        match InboundFrame::decode(text) {
            Ok(frame) => Ok(self.apply(state, frame)),
            Err(e) => {
                state.stats.malformed += 1;
                warn!(error = %e, len = text.len(), "dropping malformed frame");
                Err(e)
            }
        }
    }

    pub fn apply(&mut self, state: &mut DashboardState, frame: InboundFrame) -> Applied {
        match frame {
            InboundFrame::Update(people) => {
                state.stats.updates += 1;
                state.detections = people;

                let Some(primary) = state.primary().map(|p| p.id.clone()) else {
                    state.confidence = None;
                    return Applied::Cleared;
                };

                state.confidence = Some(self.noise.confidence());
                for cell in state.grid.iter_mut() {
                    *cell = self.noise.grid_cell();
                }
                state.log.push(
                    LogKind::Detected,
                    format!("{primary} DETECTED (Match_Score: {MATCH_SCORE})"),
                );
                Applied::Detections {
                    primary,
                    count: state.detections.len(),
                }
            }
            InboundFrame::Config(config) => {
                state.stats.configs += 1;
                state.config = config;
                state.config_synced = true;
                Applied::Config(config)
            }
            InboundFrame::Unknown { kind, .. } => {
                state.stats.unknown += 1;
                debug!(kind = %kind, "ignoring frame of unknown type");
                Applied::Ignored { kind }
            }
        }
    }

    pub fn apply_event(
        &mut self,
        state: &mut DashboardState,
        event: &TransportEvent,
    ) -> Option<Applied> {
        match event {
            TransportEvent::Connecting { attempt } => {
                debug!(attempt, "connecting");
                state.connection = ConnectionState::Connecting;
                state.retry_in = None;
            }
            TransportEvent::Online { .. } => {
                state.connection = ConnectionState::Open;
                state.retry_in = None;
                state.reset_session();
                state.log.push(LogKind::Online, "STREAM_ACTIVE");
                state
                    .log
                    .push(LogKind::Info, "NEURAL_NET_LOAD_SUCCESSFUL [CORE_V4]");
            }
            TransportEvent::Frame(text) => return self.apply_text(state, text).ok(),
            TransportEvent::Error(msg) => {
                warn!(error = %msg, "websocket error");
            }
            TransportEvent::Closed { reason } => {
                info!(%reason, "websocket closed");
                state.connection = ConnectionState::Closed;
                state.log.push(LogKind::Offline, "WEBSOCKET_DISCONNECTED");
            }
            TransportEvent::RetryScheduled { delay, .. } => {
                state.retry_in = Some(*delay);
            }
            TransportEvent::GaveUp { attempts } => {
                state.retry_in = None;
                state.log.push(
                    LogKind::Offline,
                    format!("RECONNECT_ABANDONED after {attempts} attempts"),
                );
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CloseReason;
    use std::time::Duration;

    struct FixedNoise;

    impl NoiseSource for FixedNoise {
        fn confidence(&mut self) -> f32 {
            95.0
        }

        fn grid_cell(&mut self) -> u8 {
            42
        }
    }

    fn update(ids: &[&str]) -> String {
        let people: Vec<String> = ids.iter().map(|id| format!(r#"{{"id":"{id}"}}"#)).collect();
        format!(r#"{{"type":"update","data":[{}]}}"#, people.join(","))
    }

    #[test]
    fn detections_are_replaced_not_accumulated() {
        let mut r = Reconciler::new(FixedNoise);
        let mut state = DashboardState::new(50);

        let sequence: [&[&str]; 4] = [&["A", "B"], &["C"], &[], &["D", "E", "F"]];
        for ids in sequence {
            r.apply_text(&mut state, &update(ids)).unwrap();
            let got: Vec<&str> = state.detections.iter().map(|d| d.id.as_str()).collect();
            assert_eq!(got, ids);
        }
        assert_eq!(state.stats.updates, 4);
    }

    #[test]
    fn non_empty_update_logs_primary_and_sets_noise() {
        let mut r = Reconciler::new(FixedNoise);
        let mut state = DashboardState::new(50);

        let applied = r.apply_text(&mut state, &update(&["P-001", "P-002"])).unwrap();
        assert_eq!(
            applied,
            Applied::Detections {
                primary: "P-001".to_string(),
                count: 2
            }
        );
        assert_eq!(state.confidence, Some(95.0));
        assert!(state.grid.iter().all(|c| *c == 42));
        assert_eq!(state.log.len(), 1);
        let head = state.log.head().unwrap();
        assert_eq!(head.kind, LogKind::Detected);
        assert_eq!(head.message, "P-001 DETECTED (Match_Score: 0.942)");

        assert_eq!(r.apply_text(&mut state, &update(&[])).unwrap(), Applied::Cleared);
        assert_eq!(state.confidence, None);
        assert_eq!(state.log.len(), 1);
    }

    #[test]
    fn config_overwrites_local_edits() {
        let mut r = Reconciler::new(FixedNoise);
        let mut state = DashboardState::new(50);
        state.config.global_detect = false;
        state.config.auto_reg = true;
        state.config.threshold = 0.1;

        r.apply_text(
            &mut state,
            r#"{"type":"config","data":{"global_detect":true,"auto_reg":false,"threshold":0.75}}"#,
        )
        .unwrap();

        assert!(state.config.global_detect);
        assert!(!state.config.auto_reg);
        assert_eq!(state.config.threshold, 0.75);
        assert!(state.config_synced);
    }

    #[test]
    fn malformed_and_unknown_frames_leave_state_alone() {
        let mut r = Reconciler::new(FixedNoise);
        let mut state = DashboardState::new(50);
        r.apply_text(&mut state, &update(&["keep"])).unwrap();

        assert!(r.apply_text(&mut state, "{\"type\":").is_err());
        assert!(r.apply_text(&mut state, r#"{"type":"update","data":"nope"}"#).is_err());
        assert_eq!(
            r.apply_text(&mut state, r#"{"type":"snapshot","data":{}}"#).unwrap(),
            Applied::Ignored {
                kind: "snapshot".to_string()
            }
        );

        assert_eq!(state.detections.len(), 1);
        assert_eq!(state.stats.malformed, 2);
        assert_eq!(state.stats.unknown, 1);
    }

    #[test]
    fn online_resets_session_and_close_logs_offline() {
        let mut r = Reconciler::new(FixedNoise);
        let mut state = DashboardState::new(50);
        r.apply_text(&mut state, &update(&["P-009"])).unwrap();

        r.apply_event(&mut state, &TransportEvent::Online { session: 1 });
        assert_eq!(state.connection, ConnectionState::Open);
        assert!(state.detections.is_empty());
        assert_eq!(state.log.head().unwrap().kind, LogKind::Info);

        r.apply_event(
            &mut state,
            &TransportEvent::Closed {
                reason: CloseReason::Normal,
            },
        );
        r.apply_event(
            &mut state,
            &TransportEvent::RetryScheduled {
                attempt: 1,
                delay: Duration::from_millis(2000),
            },
        );
        assert_eq!(state.connection, ConnectionState::Closed);
        assert_eq!(state.retry_in, Some(Duration::from_millis(2000)));
        let head = state.log.head().unwrap();
        assert_eq!(head.kind, LogKind::Offline);
        assert_eq!(head.message, "WEBSOCKET_DISCONNECTED");
    }

    #[test]
    fn random_noise_stays_in_band() {
        let mut noise = RandomNoise::seeded(7);
        for _ in 0..1000 {
            let c = noise.confidence();
            assert!((CONFIDENCE_FLOOR..=CONFIDENCE_FLOOR + CONFIDENCE_SPAN).contains(&c));
            assert!(noise.grid_cell() < 100);
        }
    }
}
