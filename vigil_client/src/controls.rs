use crate::error::ControlError;
use std::str::FromStr;
use vigil_protocol::{ConfigPatch, ConfigState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlInput {
    ToggleGlobalDetect,
    ToggleAutoReg,
    Threshold(f32),
}

impl ControlInput {
    /// Optimistically updates `config` and returns the patch naming only the changed field.
    pub fn apply(self, config: &mut ConfigState) -> Result<ConfigPatch, ControlError> {
        let patch = match self {
            ControlInput::ToggleGlobalDetect => ConfigPatch::global_detect(!config.global_detect),
            ControlInput::ToggleAutoReg => ConfigPatch::auto_reg(!config.auto_reg),
            ControlInput::Threshold(v) => {
                if !v.is_finite() {
                    return Err(ControlError::InvalidThreshold(v));
                }
                ConfigPatch::threshold(v.clamp(0.0, 1.0))
            }
        };
        patch.apply_to(config);
        Ok(patch)
    }
}

impl FromStr for ControlInput {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let head = parts.next().unwrap_or_default().to_ascii_lowercase();
        match (head.as_str(), parts.next(), parts.next()) {
            ("global" | "global_detect", None, None) => Ok(ControlInput::ToggleGlobalDetect),
            ("auto" | "auto_reg", None, None) => Ok(ControlInput::ToggleAutoReg),
            ("threshold" | "t", Some(v), None) => v
                .parse::<f32>()
                .map(ControlInput::Threshold)
                .map_err(|_| ControlError::UnknownInput(s.to_string())),
            _ => Err(ControlError::UnknownInput(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_flip_and_emit_single_field() {
        let mut config = ConfigState::default();
        let patch = ControlInput::ToggleGlobalDetect.apply(&mut config).unwrap();
        assert!(config.global_detect);
        assert_eq!(patch, ConfigPatch::global_detect(true));

        let patch = ControlInput::ToggleAutoReg.apply(&mut config).unwrap();
        assert!(config.auto_reg);
        assert_eq!(patch, ConfigPatch::auto_reg(true));
        assert!(patch.threshold.is_none());
    }

    #[test]
    fn threshold_is_clamped_and_nan_rejected() {
        let mut config = ConfigState::default();
        let patch = ControlInput::Threshold(1.7).apply(&mut config).unwrap();
        assert_eq!(patch.threshold, Some(1.0));
        assert_eq!(config.threshold, 1.0);

        assert!(matches!(
            ControlInput::Threshold(f32::NAN).apply(&mut config),
            Err(ControlError::InvalidThreshold(_))
        ));
        assert_eq!(config.threshold, 1.0);
    }

    #[test]
    fn parses_console_lines() {
        assert_eq!("global".parse(), Ok(ControlInput::ToggleGlobalDetect));
        assert_eq!(" AUTO ".parse(), Ok(ControlInput::ToggleAutoReg));
        assert_eq!("threshold 0.8".parse(), Ok(ControlInput::Threshold(0.8)));
        assert!("threshold".parse::<ControlInput>().is_err());
        assert!("reboot now".parse::<ControlInput>().is_err());
    }
}
