use crate::state::{ConnectionState, DashboardState, LogKind};
use std::fmt;

/// Stroke length of the confidence arc (r = 72).
pub const GAUGE_CIRCUMFERENCE: f32 = 452.4;
const GRID_COLUMNS: usize = 16;
const SHADES: &[u8] = b" .:-=+*#%@";

pub fn gauge_offset(percent: f32) -> f32 {
    GAUGE_CIRCUMFERENCE - (percent / 100.0) * GAUGE_CIRCUMFERENCE
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeView {
    pub percent: f32,
    pub offset: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBox {
    pub target_label: String,
    pub gauge: Option<GaugeView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryCard {
    pub id: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleView {
    pub label: &'static str,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliderView {
    pub value: f32,
    pub display: String,
    pub bar_width_pct: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub time: String,
    pub kind: LogKind,
    pub label: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub status: String,
    /// `None` hides the detection panel.
    pub detection: Option<DetectionBox>,
    pub grid: Vec<u8>,
    pub gallery: Vec<GalleryCard>,
    pub global_detect: ToggleView,
    pub auto_reg: ToggleView,
    pub threshold: SliderView,
    pub log: Vec<LogLine>,
}

pub fn render(state: &DashboardState) -> DashboardView {
    let detection = state.primary().map(|primary| DetectionBox {
        target_label: format!("{} | TRUSTED", primary.id),
        gauge: state.confidence.map(|percent| GaugeView {
            percent,
            offset: gauge_offset(percent),
            text: format!("{percent:.1}"),
        }),
    });

    let gallery = state
        .detections
        .iter()
        .map(|p| GalleryCard {
            id: p.id.clone(),
            caption: match (p.gender.as_deref(), p.age.as_deref()) {
                (Some(g), Some(a)) => Some(format!("{g} / {a}")),
                (Some(v), None) | (None, Some(v)) => Some(v.to_string()),
                (None, None) => None,
            },
        })
        .collect();

    let threshold = state.config.threshold;

    DashboardView {
        status: status_line(state),
        detection,
        grid: state.grid.to_vec(),
        gallery,
        global_detect: ToggleView {
            label: "GLOBAL_DETECT",
            active: state.config.global_detect,
        },
        auto_reg: ToggleView {
            label: "AUTO_REG",
            active: state.config.auto_reg,
        },
        threshold: SliderView {
            value: threshold,
            display: format!("{threshold:.2}"),
            bar_width_pct: threshold * 100.0,
        },
        log: state
            .log
            .iter()
            .map(|e| LogLine {
                time: e.at.format("%H:%M:%S%.3f").to_string(),
                kind: e.kind,
                label: e.kind.label(),
                message: e.message.clone(),
            })
            .collect(),
    }
}

fn status_line(state: &DashboardState) -> String {
    match (state.connection, state.retry_in) {
        (ConnectionState::Open, _) => "ONLINE".to_string(),
        (ConnectionState::Connecting, _) => "CONNECTING".to_string(),
        (ConnectionState::Closed, Some(retry)) => {
            format!("OFFLINE (retry in {:.1}s)", retry.as_secs_f32())
        }
        (ConnectionState::Closed, None) => "OFFLINE".to_string(),
    }
}

fn shade(opacity: u8) -> char {
    let idx = (opacity as usize * SHADES.len()) / 100;
    SHADES[idx.min(SHADES.len() - 1)] as char
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.status)?;

        match &self.detection {
            Some(d) => {
                write!(f, "target: {}", d.target_label)?;
                if let Some(g) = &d.gauge {
                    write!(f, "  confidence: {}%", g.text)?;
                }
                writeln!(f)?;
            }
            None => writeln!(f, "target: -")?,
        }

        for row in self.grid.chunks(GRID_COLUMNS) {
            let line: String = row.iter().map(|c| shade(*c)).collect();
            writeln!(f, "  |{line}|")?;
        }

        let toggle = |t: &ToggleView| if t.active { "on" } else { "off" };
        writeln!(
            f,
            "{}={}  {}={}  threshold={}",
            self.global_detect.label,
            toggle(&self.global_detect),
            self.auto_reg.label,
            toggle(&self.auto_reg),
            self.threshold.display
        )?;

        if !self.gallery.is_empty() {
            let cards: Vec<String> = self
                .gallery
                .iter()
                .map(|c| match &c.caption {
                    Some(cap) => format!("{} ({cap})", c.id),
                    None => c.id.clone(),
                })
                .collect();
            writeln!(f, "gallery: {}", cards.join(", "))?;
        }

        for line in &self.log {
            writeln!(f, "[{}] {}: {}", line.time, line.label, line.message)?;
        }
        Ok(())
    }
}
