use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct AnalysisParams {
    pub score_threshold: f64,
    pub mask_threshold: f64,
    pub class_count: u32,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.8,
            mask_threshold: 0.8,
            class_count: 2,
        }
    }
}

impl AnalysisParams {
    // Thresholds are probabilities; the model needs at least one class
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("score_threshold", self.score_threshold),
            ("mask_threshold", self.mask_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.class_count == 0 {
            return Err("class_count must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AnalysisParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let params = AnalysisParams { score_threshold: 1.5, ..Default::default() };
        let err = params.validate().unwrap_err();
        assert!(err.contains("score_threshold"));

        let params = AnalysisParams { mask_threshold: f64::NAN, ..Default::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_zero_classes() {
        let params = AnalysisParams { class_count: 0, ..Default::default() };
        assert!(params.validate().is_err());
    }
}
