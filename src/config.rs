use crate::catalog::BoundarySource;
use crate::source::CsvExport;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub boundaries: BoundaryConfig,
    pub records: RecordsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoundaryConfig {
    pub path: PathBuf, // GeoJSON or Shapefile
    #[serde(default = "default_name_property")]
    pub name_property: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordsConfig {
    pub students_csv: PathBuf,
    pub enrollments_csv: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_name_property() -> String {
    "name".to_string()
}

fn default_port() -> u16 {
    5000
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn boundary_source(&self) -> BoundarySource {
        BoundarySource::new(&self.boundaries.path, &self.boundaries.name_property)
    }

    pub fn record_source(&self) -> CsvExport {
        CsvExport::new(&self.records.students_csv, &self.records.enrollments_csv)
    }
}
