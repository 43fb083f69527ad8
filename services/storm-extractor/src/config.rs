//! Run configuration loaded from YAML.
//!
//! `${VAR}` and `${VAR:-default}` references are expanded from the
//! environment before parsing, then `STORM_*` variables override the
//! extraction section.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use storm_common::{AreaMask, GridSpec, StormResult};
use storm_processor::ExtractionConfig;
use tracing::info;

/// Everything needed to run extraction over one archive.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Root of the hourly Zarr archive
    pub data_root: PathBuf,
    /// SQLite storm catalog
    pub database: PathBuf,
    /// Layout of the hourly grids
    pub grid: GridSpec,
    /// Transposition domain ring; empty means the whole grid
    #[serde(default)]
    pub polygon: Vec<(f64, f64)>,
    /// Watershed ring; when set, its cell count becomes the storm size
    #[serde(default)]
    pub watershed: Option<Vec<(f64, f64)>>,
    /// Precipitation-frequency grid used to normalize storm means
    #[serde(default)]
    pub reference: Option<ReferenceConfig>,
    pub por_start: DateTime<Utc>,
    pub por_end: DateTime<Utc>,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    pub path: PathBuf,
    pub grid: GridSpec,
    /// Sample points per storm-cell edge
    #[serde(default = "default_subdivisions")]
    pub subdivisions: usize,
}

fn default_subdivisions() -> usize {
    4
}

impl RunConfig {
    /// Parse YAML content, expanding environment references first.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let mut config: RunConfig =
            serde_yaml::from_str(&expanded).context("Failed to parse run config YAML")?;
        if let Some(ring) = &config.watershed {
            let cells = AreaMask::from_polygon(config.grid, ring)
                .context("Invalid watershed polygon")?
                .valid_count();
            info!(cells, "Storm size taken from watershed");
            config.extraction.target_cell_count = cells;
        }
        config.extraction.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.por_end > self.por_start,
            "por_end ({}) must be after por_start ({})",
            self.por_end,
            self.por_start
        );
        anyhow::ensure!(!self.grid.is_empty(), "grid must have at least one cell");
        if let Some(reference) = &self.reference {
            anyhow::ensure!(
                reference.subdivisions > 0,
                "reference.subdivisions must be > 0"
            );
        }
        self.extraction
            .validate()
            .context("Invalid extraction settings")?;
        Ok(())
    }

    /// Transposition domain over the configured grid.
    pub fn mask(&self) -> StormResult<AreaMask> {
        if self.polygon.is_empty() {
            AreaMask::full(self.grid)
        } else {
            AreaMask::from_polygon(self.grid, &self.polygon)
        }
    }
}

/// Load and validate a run configuration file.
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run config from {:?}", path))?;
    let config = RunConfig::from_yaml(&content)
        .with_context(|| format!("Invalid run config {:?}", path))?;

    info!(
        path = %path.display(),
        data_root = %config.data_root.display(),
        duration_hours = config.extraction.duration_hours,
        target_cells = config.extraction.target_cell_count,
        "Loaded run config"
    );
    Ok(config)
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(pos) = rest.find("${") {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
        result.push_str(&resolve_var(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn resolve_var(expr: &str) -> Result<String> {
    match expr.split_once(":-") {
        Some((name, default)) => match std::env::var(name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        },
        None => std::env::var(expr.trim())
            .with_context(|| format!("Environment variable {} not set", expr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
data_root: ${STORM_EXTRACTOR_TEST_UNSET_ROOT:-/tmp/aorc}
database: /tmp/storms.db
grid: { nx: 10, ny: 8, dx: 1.0, dy: -1.0, first_x: 0.5, first_y: 7.5 }
por_start: "1979-02-01T00:00:00Z"
por_end: "1979-03-01T00:00:00Z"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RunConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/aorc"));
        assert_eq!(config.grid.nx, 10);
        assert!(config.reference.is_none());
        assert_eq!(config.mask().unwrap().valid_count(), 80);
    }

    #[test]
    fn test_polygon_mask() {
        let yaml = format!(
            "{}polygon:\n  - [2.0, 2.0]\n  - [6.0, 2.0]\n  - [6.0, 6.0]\n  - [2.0, 6.0]\n",
            MINIMAL
        );
        let config = RunConfig::from_yaml(&yaml).unwrap();
        // Centers 2.5..5.5 in both axes
        assert_eq!(config.mask().unwrap().valid_count(), 16);
    }

    #[test]
    fn test_watershed_sets_target_size() {
        let yaml = format!(
            "{}watershed:\n  - [2.0, 2.0]\n  - [4.0, 2.0]\n  - [4.0, 5.0]\n  - [2.0, 5.0]\nextraction:\n  target_cell_count: 50\n",
            MINIMAL
        );
        let config = RunConfig::from_yaml(&yaml).unwrap();
        // Centers 2.5..3.5 across, 2.5..4.5 down
        assert_eq!(config.extraction.target_cell_count, 6);
        // The watershed does not restrict the search area
        assert_eq!(config.mask().unwrap().valid_count(), 80);

        let outside = format!(
            "{}watershed:\n  - [20.0, 20.0]\n  - [21.0, 20.0]\n  - [21.0, 21.0]\n",
            MINIMAL
        );
        assert!(RunConfig::from_yaml(&outside).is_err());
    }

    #[test]
    fn test_reversed_period_rejected() {
        let yaml = MINIMAL.replace("1979-03-01", "1979-01-01");
        assert!(RunConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_invalid_extraction_rejected() {
        let yaml = format!("{}extraction:\n  step_hours: 0\n", MINIMAL);
        assert!(RunConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_env_vars("bin: ${PATH}").unwrap(), format!("bin: {}", path));
        assert_eq!(
            expand_env_vars("a: ${STORM_EXTRACTOR_TEST_UNSET:-fallback}").unwrap(),
            "a: fallback"
        );
        assert!(expand_env_vars("a: ${STORM_EXTRACTOR_TEST_UNSET}").is_err());
        assert!(expand_env_vars("a: ${UNCLOSED").is_err());
    }

    #[test]
    fn test_load_bundled_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/storm.yaml");
        let config = load_run_config(&path).unwrap();
        let reference = config.reference.as_ref().unwrap();
        assert_eq!(reference.subdivisions, 4);
        assert!(config.mask().unwrap().valid_count() > 0);
    }
}
