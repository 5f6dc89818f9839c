use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const UPDATE: &str = "update";
pub const CONFIG: &str = "config";
pub const COMMAND: &str = "command";

/// Only `id` is required. The optional fields decode leniently: a value of the
/// wrong shape becomes `None` instead of failing the whole `update` frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub id: String,
    /// `[x1, y1, x2, y2]` in frame pixels.
    #[serde(
        default,
        deserialize_with = "lenient_rect",
        skip_serializing_if = "Option::is_none"
    )]
    pub rect: Option<[i32; 4]>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub centroid: Option<Vec<f32>>,
    #[serde(
        default,
        deserialize_with = "lenient_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub age: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub gender: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Detection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rect: None,
            centroid: None,
            age: None,
            gender: None,
            extra: Map::new(),
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Numbers are rounded to whole pixels.
fn lenient_rect<'de, D>(deserializer: D) -> Result<Option<[i32; 4]>, D::Error>
where
    D: Deserializer<'de>,
{
    let rect: Option<[f64; 4]> = lenient(deserializer)?;
    Ok(rect.map(|r| r.map(|v| v.round() as i32)))
}

/// Accepts strings and numbers; `27` becomes `"27"`.
fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ConfigState {
    pub global_detect: bool,
    pub auto_reg: bool,
    pub threshold: f32,
}

impl Default for ConfigState {
    fn default() -> Self {
        Self {
            global_detect: false,
            auto_reg: false,
            threshold: 0.5,
        }
    }
}

/// Any subset of [`ConfigState`]; the `data` of an outbound command.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_detect: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

impl ConfigPatch {
    pub fn global_detect(value: bool) -> Self {
        Self {
            global_detect: Some(value),
            ..Self::default()
        }
    }

    pub fn auto_reg(value: bool) -> Self {
        Self {
            auto_reg: Some(value),
            ..Self::default()
        }
    }

    pub fn threshold(value: f32) -> Self {
        Self {
            threshold: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.global_detect.is_none() && self.auto_reg.is_none() && self.threshold.is_none()
    }

    pub fn apply_to(&self, config: &mut ConfigState) {
        if let Some(v) = self.global_detect {
            config.global_detect = v;
        }
        if let Some(v) = self.auto_reg {
            config.auto_reg = v;
        }
        if let Some(v) = self.threshold {
            config.threshold = v;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum ClientCommand {
    Command(ConfigPatch),
}

impl ClientCommand {
    pub fn patch(&self) -> &ConfigPatch {
        match self {
            ClientCommand::Command(patch) => patch,
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Update(Vec<Detection>),
    Config(ConfigState),
    Unknown { kind: String, raw: Value },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame has no string `type` discriminator")]
    MissingType,
    #[error("invalid `{kind}` payload: {source}")]
    BadPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let mut raw: Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;
        let Some(kind) = raw.get("type").and_then(Value::as_str).map(str::to_string) else {
            return Err(FrameError::MissingType);
        };

        if kind != UPDATE && kind != CONFIG {
            return Ok(InboundFrame::Unknown { kind, raw });
        }

        let data = raw
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        let decoded = if kind == UPDATE {
            serde_json::from_value(data).map(InboundFrame::Update)
        } else {
            serde_json::from_value(data).map(InboundFrame::Config)
        };
        decoded.map_err(|source| FrameError::BadPayload { kind, source })
    }

    pub fn kind(&self) -> &str {
        match self {
            InboundFrame::Update(_) => UPDATE,
            InboundFrame::Config(_) => CONFIG,
            InboundFrame::Unknown { kind, .. } => kind,
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        let out = match self {
            InboundFrame::Update(people) => serde_json::to_string(&Envelope {
                kind: UPDATE,
                data: people,
            }),
            InboundFrame::Config(config) => serde_json::to_string(&Envelope {
                kind: CONFIG,
                data: config,
            }),
            InboundFrame::Unknown { raw, .. } => serde_json::to_string(raw),
        };
        out.map_err(FrameError::Encode)
    }
}
