//! The pulse configuration file.
//!
//! A YAML document naming the destination identity every sample is attributed
//! to, plus optional Prometheus export settings. Unknown keys are rejected and
//! an empty identity fails [`Config::from_path`].
//!
//! The collection interval is not configurable: the harvest cadence belongs to
//! whoever drives the [`Collector`](crate::collector::Collector).

use std::{
    fs,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
};

use rustc_hash::FxHashMap;
use serde::Deserialize;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The instrumentation key was empty or only whitespace.
    #[error("instrumentation_key must not be empty")]
    EmptyInstrumentationKey,
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Destination identity all aggregated data is attributed to, regardless
    /// of the identity on individual items.
    pub instrumentation_key: String,
    /// Address on which to expose harvested samples for prometheus scraping.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
    /// Labels attached to every published sample.
    #[serde(default)]
    pub global_labels: FxHashMap<String, String>,
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Load configuration from the YAML file at `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read, is not valid YAML for
    /// this struct, or fails validation.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        contents.parse()
    }

    fn validate(&self) -> Result<(), Error> {
        if self.instrumentation_key.trim().is_empty() {
            return Err(Error::EmptyInstrumentationKey);
        }
        Ok(())
    }
}
