//! Runtime configuration for the demo binary.
//!
//! JSON-deserialized; every section except the input/output paths is
//! optional and falls back to documented defaults via `resolve()` helpers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::potential::SmoothEdge;
use crate::solver::DeconvolveParams;

#[derive(Debug, Deserialize)]
pub struct DemoConfig {
    /// Grayscale input image.
    #[serde(rename = "input")]
    pub input: PathBuf,
    #[serde(default)]
    pub kernel: KernelConfig,
    /// Standard deviation of the synthetic Gaussian noise added after the
    /// blur (0 disables noise).
    #[serde(default)]
    pub noise_sigma: f64,
    /// Solver variant: "dual", "primal" or "bp".
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub regularizer: RegularizerConfig,
    #[serde(default)]
    pub solver: DeconvolveParams,
    pub output: DemoOutputConfig,
}

fn default_method() -> String {
    "dual".to_string()
}

/// Gaussian blur kernel knobs.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub radius: Option<usize>,
    pub sigma: Option<f64>,
}

impl KernelConfig {
    pub fn resolve(&self) -> (usize, f64) {
        (self.radius.unwrap_or(10), self.sigma.unwrap_or(5.0))
    }
}

/// Edge-potential and label-grid knobs.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RegularizerConfig {
    pub weight: Option<f64>,
    pub width: Option<f64>,
    pub num_labels: Option<usize>,
}

impl RegularizerConfig {
    pub fn resolve(&self) -> (SmoothEdge, usize, f64) {
        let edge = SmoothEdge {
            weight: self.weight.unwrap_or(50.0),
            width: self.width.unwrap_or(9.0),
        };
        let num_labels = self.num_labels.unwrap_or(16);
        let label_scale = 255.0 / (num_labels as f64 - 1.0);
        (edge, num_labels, label_scale)
    }
}

#[derive(Debug, Deserialize)]
pub struct DemoOutputConfig {
    #[serde(rename = "dir")]
    pub dir: PathBuf,
    #[serde(rename = "blurred_image")]
    pub blurred_image: PathBuf,
    #[serde(rename = "restored_image")]
    pub restored_image: PathBuf,
    #[serde(rename = "report_json")]
    pub report_json: Option<PathBuf>,
}

impl DemoOutputConfig {
    pub fn blurred_path(&self) -> PathBuf {
        resolve_path(&self.dir, &self.blurred_image)
    }

    pub fn restored_path(&self) -> PathBuf {
        resolve_path(&self.dir, &self.restored_image)
    }

    pub fn report_path(&self) -> Option<PathBuf> {
        self.report_json.as_ref().map(|p| resolve_path(&self.dir, p))
    }
}

pub fn load_config(path: &Path) -> Result<DemoConfig, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let json = r#"{
            "input": "cameraman.png",
            "output": {
                "dir": "out",
                "blurred_image": "blur.png",
                "restored_image": "restored.png",
                "report_json": null
            }
        }"#;
        let config: DemoConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.method, "dual");
        let (edge, num_labels, label_scale) = config.regularizer.resolve();
        assert_eq!(edge.weight, 50.0);
        assert_eq!(num_labels, 16);
        assert!((label_scale - 17.0).abs() < 1e-12);
        let (radius, sigma) = config.kernel.resolve();
        assert_eq!(radius, 10);
        assert_eq!(sigma, 5.0);
        assert_eq!(config.solver.max_iterations, 100);
    }
}
