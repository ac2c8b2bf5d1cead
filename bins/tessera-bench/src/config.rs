use clap::Parser;

use tessera_engine::DriverConfig;

use crate::error::BenchError;

#[derive(Parser, Clone, Debug)]
#[command(
    name = "tessera-bench",
    about = "Prepared-statement workload against a simulated cluster"
)]
pub struct Cli {
    /// Path to a TOML driver config; defaults apply when omitted
    #[arg(long, env = "TESSERA_CONFIG")]
    pub config: Option<String>,

    /// Nodes in the simulated cluster
    #[arg(long, default_value_t = 3)]
    pub nodes: usize,

    /// Distinct statements prepared concurrently in the massive phase
    #[arg(long, default_value_t = 100)]
    pub prepares: usize,

    /// Simulated per-request latency
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,
}

impl Cli {
    pub fn driver_config(&self) -> Result<DriverConfig, BenchError> {
        let config = match &self.config {
            Some(path) => DriverConfig::load(path)?,
            None => DriverConfig::default(),
        };
        config.validate()?;
        if self.nodes == 0 {
            return Err(BenchError::Args("--nodes must be at least 1".to_string()));
        }
        Ok(config)
    }
}
