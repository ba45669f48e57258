pub mod cli;
pub mod toml_config;

pub use toml_config::{EmissorConfig, ServiceConfig};

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use crate::utils::validation::{validate_file_extension, validate_path, Validate};
#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "nfse-emissor")]
#[command(about = "Emite NFS-e no padrão nacional a partir de registros extraídos")]
pub struct CliConfig {
    #[arg(long, short, default_value = "nfse.toml")]
    pub config: String,

    /// CSV with `cpf,nome,hash` columns
    #[arg(long)]
    pub records: Option<String>,

    /// Overrides `[output] path`
    #[arg(long)]
    pub output_path: Option<String>,

    #[arg(long, help = "Emit each record through the synchronous endpoint")]
    pub sync: bool,

    #[arg(long, help = "Only check that the API answers")]
    pub health_check: bool,

    #[arg(long, help = "Build, sign and verify the first record without submitting")]
    pub dry_run: bool,

    #[arg(long, help = "Log as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("config", &self.config)?;
        validate_file_extension("config", &self.config, &["toml"])?;
        if let Some(records) = &self.records {
            validate_file_extension("records", records, &["csv"])?;
        } else if !self.health_check {
            return Err(crate::utils::error::EmissorError::MissingConfigError {
                field: "records".to_string(),
            });
        }
        if let Some(output) = &self.output_path {
            validate_path("output_path", output)?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_cli_arguments() {
        let cli = CliConfig::parse_from(["nfse-emissor", "--config", "nfse.toml", "--records", "lote.csv", "--sync"]);
        assert!(cli.sync);
        assert!(cli.validate().is_ok());

        let health = CliConfig::parse_from(["nfse-emissor", "--health-check"]);
        assert!(health.validate().is_ok());

        let missing = CliConfig::parse_from(["nfse-emissor"]);
        assert!(missing.validate().is_err());

        let wrong = CliConfig::parse_from(["nfse-emissor", "--records", "lote.xlsx"]);
        assert!(wrong.validate().is_err());
    }
}
