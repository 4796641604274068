//! Build configuration for color index construction.

use crate::constants::DEFAULT_RAM_LIMIT_GIB;
use crate::error::{IndexError, Result};
use std::path::PathBuf;

/// Configuration parameters for building a color index.
#[derive(Debug, Clone)]
pub struct BuildConfiguration {
    /// Number of threads for parallel operations (0 = all available cores)
    pub num_threads: usize,

    /// RAM limit in GiB for external sorting, partitioned across threads
    pub ram_limit_gib: usize,

    /// Directory for temporary spill files during construction
    pub tmp_dirname: PathBuf,

    /// Verbose output during construction
    pub verbose: bool,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        Self {
            num_threads: 0, // 0 = use all available cores
            ram_limit_gib: DEFAULT_RAM_LIMIT_GIB,
            tmp_dirname: PathBuf::from("iris_tmp"),
            verbose: true,
        }
    }
}

impl BuildConfiguration {
    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.ram_limit_gib == 0 {
            return Err(IndexError::InvalidInput(
                "ram_limit_gib must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Log configuration parameters via tracing.
    pub fn print(&self) {
        tracing::info!("Build Configuration:");
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::info!("  ram_limit_gib = {}", self.ram_limit_gib);
        tracing::debug!("  tmp_dirname = {:?}", self.tmp_dirname);
        tracing::debug!("  verbose = {}", self.verbose);
    }
}
