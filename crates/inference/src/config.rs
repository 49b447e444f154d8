use crate::backend::Runtime;
use crate::processing::DEFAULT_MIN_BOX_BORDER;
use crate::processing::anchors::grid_cells;
use common::{env_list, env_or};
use preprocess::Roi;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

pub use common::Environment;

pub const DEFAULT_NUM_LABELS: usize = 80;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub environment: Environment,
    pub model_path: PathBuf,
    pub runtime: Runtime,
    /// Number of classes the model scores
    pub num_labels: usize,
    /// Expected (cell, anchor) rows across all scales
    pub grids: usize,
    pub input_layers: Vec<String>,
    /// Outputs to materialize; empty means every model output
    pub output_layers: Vec<String>,
    /// Per-scale output tensors in stride order (8, 16, 32)
    pub output_tensors: Vec<String>,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub roi: Option<Roi>,
    pub min_box_border: f32,
    pub labels_path: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            model_path: PathBuf::from("models/yolov5s.onnx"),
            runtime: Runtime::Cpu,
            num_labels: DEFAULT_NUM_LABELS,
            grids: grid_cells(640),
            input_layers: vec!["images".to_string()],
            output_layers: Vec::new(),
            output_tensors: Vec::new(),
            confidence_threshold: 0.5,
            nms_threshold: 0.5,
            roi: None,
            min_box_border: DEFAULT_MIN_BOX_BORDER,
            labels_path: None,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);

        let runtime = env::var("RUNTIME")
            .map(|s| Runtime::from_name(&s))
            .unwrap_or(defaults.runtime);

        let roi = match env::var("ROI") {
            Ok(raw) => parse_roi(&raw)?,
            Err(_) => None,
        };

        Ok(Self {
            environment: Environment::from_env(),
            model_path,
            runtime,
            num_labels: env_or("NUM_LABELS", defaults.num_labels),
            grids: env_or("GRIDS", defaults.grids),
            input_layers: env_list("INPUT_LAYERS").unwrap_or(defaults.input_layers),
            output_layers: env_list("OUTPUT_LAYERS").unwrap_or(defaults.output_layers),
            output_tensors: env_list("OUTPUT_TENSORS").unwrap_or(defaults.output_tensors),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            nms_threshold: env_or("NMS_THRESHOLD", defaults.nms_threshold),
            roi,
            min_box_border: env_or("MIN_BOX_BORDER", defaults.min_box_border),
            labels_path: env::var("LABELS_PATH").ok().map(PathBuf::from),
        })
    }

    /// Check the invariants a detector needs before loading a model.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model_path.as_os_str().is_empty() {
            anyhow::bail!("Model path is empty");
        }

        if self.input_layers.is_empty() {
            anyhow::bail!("At least one input layer is required");
        }

        if self.num_labels == 0 {
            anyhow::bail!("Number of labels must be positive");
        }

        if self.output_tensors.len() != 3 {
            anyhow::bail!(
                "Expected 3 output tensors (strides 8, 16, 32), got {}",
                self.output_tensors.len()
            );
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self
            .output_tensors
            .iter()
            .find(|t| !seen.insert(t.as_str()))
        {
            anyhow::bail!("Output tensor '{}' listed more than once", dup);
        }

        for (name, value) in [
            ("confidence", self.confidence_threshold),
            ("NMS", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} threshold {} outside [0, 1]", name, value);
            }
        }

        if self.min_box_border < 0.0 {
            anyhow::bail!("Minimum box border must not be negative");
        }

        Ok(())
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            model_path: PathBuf::from("/models/yolov5s.onnx"),
            output_tensors: vec![
                "output0".to_string(),
                "output1".to_string(),
                "output2".to_string(),
            ],
            ..Self::default()
        }
    }
}

/// Parse `x,y,width,height`. An empty string or zero-area rectangle means no ROI.
pub fn parse_roi(raw: &str) -> anyhow::Result<Option<Roi>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Invalid ROI '{}': {}", raw, e))?;

    let [x, y, width, height] = parts[..] else {
        anyhow::bail!("Invalid ROI '{}': expected x,y,width,height", raw);
    };

    let roi = Roi::new(x, y, width, height);
    Ok((!roi.is_empty()).then_some(roi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 13] = [
        "ENVIRONMENT",
        "MODEL_PATH",
        "RUNTIME",
        "NUM_LABELS",
        "GRIDS",
        "INPUT_LAYERS",
        "OUTPUT_LAYERS",
        "OUTPUT_TENSORS",
        "CONFIDENCE_THRESHOLD",
        "NMS_THRESHOLD",
        "ROI",
        "MIN_BOX_BORDER",
        "LABELS_PATH",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe { env::remove_var(var) };
        }
    }

    /// Test defaults when nothing is set
    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = DetectorConfig::from_env().unwrap();

        assert_eq!(config.num_labels, 80);
        assert_eq!(config.grids, 25200);
        assert_eq!(config.runtime, Runtime::Cpu);
        assert_eq!(config.input_layers, vec!["images"]);
        assert!(config.output_tensors.is_empty());
        assert_eq!(config.roi, None);
        assert_eq!(config.min_box_border, 16.0);
    }

    /// Test every variable is picked up
    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("ENVIRONMENT", "production");
            env::set_var("MODEL_PATH", "/opt/models/custom.onnx");
            env::set_var("RUNTIME", "GPU_FLOAT16");
            env::set_var("NUM_LABELS", "3");
            env::set_var("OUTPUT_TENSORS", "p3, p4, p5");
            env::set_var("CONFIDENCE_THRESHOLD", "0.3");
            env::set_var("NMS_THRESHOLD", "0.45");
            env::set_var("ROI", "100,100,200,200");
            env::set_var("LABELS_PATH", "/opt/models/labels.txt");
        }

        let config = DetectorConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.model_path, PathBuf::from("/opt/models/custom.onnx"));
        assert_eq!(config.runtime, Runtime::GpuFloat16);
        assert_eq!(config.num_labels, 3);
        assert_eq!(config.output_tensors, vec!["p3", "p4", "p5"]);
        assert_eq!(config.confidence_threshold, 0.3);
        assert_eq!(config.nms_threshold, 0.45);
        assert_eq!(config.roi, Some(Roi::new(100, 100, 200, 200)));
        assert_eq!(
            config.labels_path,
            Some(PathBuf::from("/opt/models/labels.txt"))
        );
        assert!(config.validate().is_ok());
    }

    /// Test malformed ROI is a configuration error
    #[test]
    #[serial]
    fn test_from_env_bad_roi() {
        clear_env();
        unsafe { env::set_var("ROI", "1,2,three,4") };
        let result = DetectorConfig::from_env();
        clear_env();

        assert!(result.is_err(), "Malformed ROI should be rejected");
    }

    /// Test an empty ROI variable leaves the ROI unset
    #[test]
    #[serial]
    fn test_from_env_empty_roi() {
        clear_env();
        unsafe { env::set_var("ROI", "") };
        let result = DetectorConfig::from_env();
        clear_env();

        let config = result.expect("Empty ROI should not be an error");
        assert_eq!(config.roi, None);
    }

    /// Test ROI parsing and the zero-area rule
    #[test]
    fn test_parse_roi() {
        assert_eq!(
            parse_roi(" 10, 20, 30, 40 ").unwrap(),
            Some(Roi::new(10, 20, 30, 40))
        );
        assert_eq!(parse_roi("0,0,0,0").unwrap(), None);
        assert_eq!(parse_roi("").unwrap(), None, "Empty ROI means no ROI");
        assert_eq!(parse_roi("  ").unwrap(), None);
        assert!(parse_roi("1,2,3").is_err());
        assert!(parse_roi("1,2,3,4,5").is_err());
        assert!(parse_roi("-1,2,3,4").is_err());
    }

    /// Test the test default passes validation
    #[test]
    fn test_validate_accepts_default() {
        assert!(DetectorConfig::test_default().validate().is_ok());
    }

    /// Test each validation rule
    #[test]
    fn test_validate_rejects_invalid() {
        let cases: Vec<(&str, DetectorConfig)> = vec![
            (
                "empty model path",
                DetectorConfig {
                    model_path: PathBuf::new(),
                    ..DetectorConfig::test_default()
                },
            ),
            (
                "no input layers",
                DetectorConfig {
                    input_layers: vec![],
                    ..DetectorConfig::test_default()
                },
            ),
            (
                "two output tensors",
                DetectorConfig {
                    output_tensors: vec!["a".to_string(), "b".to_string()],
                    ..DetectorConfig::test_default()
                },
            ),
            (
                "duplicate output tensors",
                DetectorConfig {
                    output_tensors: vec!["a".to_string(), "b".to_string(), "a".to_string()],
                    ..DetectorConfig::test_default()
                },
            ),
            (
                "confidence above one",
                DetectorConfig {
                    confidence_threshold: 1.5,
                    ..DetectorConfig::test_default()
                },
            ),
            (
                "negative nms",
                DetectorConfig {
                    nms_threshold: -0.1,
                    ..DetectorConfig::test_default()
                },
            ),
            (
                "zero labels",
                DetectorConfig {
                    num_labels: 0,
                    ..DetectorConfig::test_default()
                },
            ),
        ];

        for (case, config) in cases {
            assert!(config.validate().is_err(), "Should reject {}", case);
        }
    }
}
