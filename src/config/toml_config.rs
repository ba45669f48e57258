use crate::adapters::http::{RetryPolicy, DEFAULT_TIMEOUT};
use crate::core::builder::service_code;
use crate::domain::model::{
    Address, EmitterType, Environment, FederalWithholding, Provider, ServiceLine, SimplesNacional, TaxId,
};
use crate::utils::error::{EmissorError, Result};
use crate::utils::validation::{
    validate_digits, validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, Validate,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MUNICIPIO: &str = "4218707";
pub const DEFAULT_SERIE: &str = "00001";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissorConfig {
    pub api: ApiConfig,
    pub certificate: CertificateConfig,
    pub prestador: ProviderConfig,
    #[serde(default)]
    pub servico: ServiceConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub ambiente: Environment,
    pub timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_initial_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_seconds.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry_attempts.unwrap_or(default.max_attempts),
            initial_delay: self
                .retry_initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default.initial_delay),
            max_delay: self
                .retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default.max_delay),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    pub cert_path: String,
    pub key_path: String,
    /// Present the certificate as client identity on the TLS handshake.
    #[serde(default = "default_true")]
    pub mtls: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub cnpj: Option<String>,
    pub cpf: Option<String>,
    pub inscricao_municipal: Option<String>,
    pub razao_social: String,
    #[serde(default = "default_municipio")]
    pub codigo_municipio: String,
    pub endereco: Option<Address>,
    #[serde(default)]
    pub simples_nacional: SimplesNacional,
    #[serde(default)]
    pub regime_especial: u8,
}

fn default_municipio() -> String {
    DEFAULT_MUNICIPIO.to_string()
}

impl ProviderConfig {
    pub fn to_provider(&self) -> Result<Provider> {
        let tax_id = match (self.cnpj.as_deref(), self.cpf.as_deref()) {
            (Some(cnpj), None) => TaxId::cnpj(cnpj)?,
            (None, Some(cpf)) => TaxId::cpf(cpf)?,
            _ => {
                return Err(EmissorError::InvalidConfigValueError {
                    field: "prestador.cnpj".to_string(),
                    value: format!("{:?}/{:?}", self.cnpj, self.cpf),
                    reason: "exactly one of cnpj or cpf must be set".to_string(),
                })
            }
        };

        Ok(Provider {
            tax_id,
            inscricao_municipal: self.inscricao_municipal.clone(),
            razao_social: self.razao_social.clone(),
            endereco: self.endereco.clone(),
            simples_nacional: self.simples_nacional,
            regime_especial: self.regime_especial,
            codigo_municipio: self.codigo_municipio.clone(),
        })
    }
}

/// Service options shared by every record of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub valor: Decimal,
    pub aliquota_iss: Decimal,
    pub item_lista: String,
    pub descricao: String,
    pub discriminacao: Option<String>,
    pub simples_nacional: bool,
    pub incentivador_cultural: bool,
    pub deducoes: Decimal,
    pub retencoes: FederalWithholding,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            valor: Decimal::new(10000, 2),
            aliquota_iss: Decimal::new(20, 1),
            item_lista: "1.09".to_string(),
            descricao: "Prestação de serviços".to_string(),
            discriminacao: None,
            simples_nacional: false,
            incentivador_cultural: false,
            deducoes: Decimal::ZERO,
            retencoes: FederalWithholding::default(),
        }
    }
}

impl ServiceConfig {
    pub fn service_line(&self) -> ServiceLine {
        ServiceLine {
            descricao: self.descricao.clone(),
            valor: self.valor,
            aliquota_iss: self.aliquota_iss,
            item_lista: self.item_lista.clone(),
            discriminacao: self.discriminacao.clone(),
            deducoes: self.deducoes,
            retencoes: self.retencoes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub serie: String,
    /// First `nDPS`; a random start in 1000..=9999 when absent.
    pub sequence_start: Option<u64>,
    pub app_version: Option<String>,
    pub emitter_type: EmitterType,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            serie: DEFAULT_SERIE.to_string(),
            sequence_start: None,
            app_version: None,
            emitter_type: EmitterType::Provider,
        }
    }
}

impl BatchConfig {
    pub fn app_version(&self) -> String {
        self.app_version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: "./output".to_string(),
        }
    }
}

impl EmissorConfig {
    /// Loads and parses a TOML file; `${VAR}` references are resolved first.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EmissorError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content)
            .map_err(|e| EmissorError::config(format!("TOML parsing error: {}", e)))
    }

    /// Replaces `${VAR}` with the environment value; unknown names stay as is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| EmissorError::config(format!("invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_url("api.base_url", &self.api.base_url)?;
        if let Some(attempts) = self.api.retry_attempts {
            validate_positive_number("api.retry_attempts", attempts as usize, 1)?;
        }
        if let Some(timeout) = self.api.timeout_seconds {
            validate_positive_number("api.timeout_seconds", timeout as usize, 1)?;
        }

        validate_path("certificate.cert_path", &self.certificate.cert_path)?;
        validate_path("certificate.key_path", &self.certificate.key_path)?;

        validate_non_empty_string("prestador.razao_social", &self.prestador.razao_social)?;
        validate_digits("prestador.codigo_municipio", &self.prestador.codigo_municipio, 7)?;
        self.prestador.to_provider()?;

        validate_range(
            "servico.aliquota_iss",
            self.servico.aliquota_iss,
            Decimal::ZERO,
            Decimal::from(5),
        )?;
        if self.servico.valor <= Decimal::ZERO {
            return Err(EmissorError::InvalidConfigValueError {
                field: "servico.valor".to_string(),
                value: self.servico.valor.to_string(),
                reason: "Value must be positive".to_string(),
            });
        }
        validate_non_empty_string("servico.descricao", &self.servico.descricao)?;
        service_code(&self.servico.item_lista).map_err(|e| EmissorError::InvalidConfigValueError {
            field: "servico.item_lista".to_string(),
            value: self.servico.item_lista.clone(),
            reason: e.to_string(),
        })?;

        validate_positive_number("batch.max_batch_size", self.batch.max_batch_size, 1)?;
        validate_digits("batch.serie", &self.batch.serie, 5)?;

        validate_path("output.path", &self.output.path)?;

        tracing::debug!("✅ Configuração validada");
        Ok(())
    }
}

impl Validate for EmissorConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[api]
base_url = "https://sefin.producaorestrita.nfse.gov.br"

[certificate]
cert_path = "certs/cert.pem"
key_path = "certs/key.pem"

[prestador]
cnpj = "12.345.678/0001-90"
razao_social = "Prestadora Teste Ltda"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = EmissorConfig::from_toml_str(MINIMAL).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.ambiente, Environment::Homologacao);
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert_eq!(config.api.retry_policy(), RetryPolicy::default());
        assert!(config.certificate.mtls);
        assert_eq!(config.servico, ServiceConfig::default());
        assert_eq!(config.servico.valor, dec!(100.00));
        assert_eq!(config.batch.max_batch_size, 50);
        assert_eq!(config.batch.serie, "00001");
        assert_eq!(config.prestador.codigo_municipio, "4218707");

        let provider = config.prestador.to_provider().unwrap();
        assert_eq!(provider.tax_id, TaxId::Cnpj("12345678000190".to_string()));
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[api]
base_url = "https://sefin.nfse.gov.br"
ambiente = "PRODUCAO"
timeout_seconds = 60
retry_attempts = 5
retry_initial_delay_ms = 500
retry_max_delay_ms = 4000

[certificate]
cert_path = "cert.pem"
key_path = "key.pem"
mtls = false

[prestador]
cnpj = "12345678000190"
razao_social = "Prestadora Teste Ltda"
simples_nacional = "optante_me_epp"

[servico]
valor = "89.00"
aliquota_iss = 2.0
item_lista = "04.01.01"
discriminacao = "Referente a janeiro"

[batch]
max_batch_size = 20
serie = "00002"
sequence_start = 500

[output]
path = "./out"
"#;
        let config = EmissorConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.ambiente, Environment::Producao);
        assert_eq!(config.api.retry_policy().max_attempts, 5);
        assert_eq!(config.api.retry_policy().initial_delay, Duration::from_millis(500));
        assert!(!config.certificate.mtls);
        assert_eq!(config.servico.valor, dec!(89.00));
        assert_eq!(config.servico.aliquota_iss, dec!(2.0));
        assert_eq!(config.servico.descricao, "Prestação de serviços");
        assert_eq!(config.batch.sequence_start, Some(500));
        assert_eq!(config.prestador.simples_nacional, SimplesNacional::OptanteMeEpp);
    }

    #[test]
    fn test_unknown_service_option_is_rejected() {
        let toml_content = format!("{}\n[servico]\nvalr = 10.0\n", MINIMAL);
        assert!(EmissorConfig::from_toml_str(&toml_content).is_err());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("NFSE_TEST_KEY_PATH", "/secure/key.pem");
        let toml_content = MINIMAL.replace("certs/key.pem", "${NFSE_TEST_KEY_PATH}");

        let config = EmissorConfig::from_toml_str(&toml_content).unwrap();
        assert_eq!(config.certificate.key_path, "/secure/key.pem");

        std::env::remove_var("NFSE_TEST_KEY_PATH");
    }

    #[test]
    fn test_config_validation() {
        let bad_url = MINIMAL.replace("https://sefin.producaorestrita.nfse.gov.br", "invalid-url");
        assert!(EmissorConfig::from_toml_str(&bad_url).unwrap().validate().is_err());

        let bad_iss = format!("{}\n[servico]\naliquota_iss = 7.5\n", MINIMAL);
        assert!(EmissorConfig::from_toml_str(&bad_iss).unwrap().validate().is_err());

        let both_ids = MINIMAL.replace(
            "razao_social = \"Prestadora Teste Ltda\"",
            "razao_social = \"Prestadora Teste Ltda\"\ncpf = \"52998224725\"",
        );
        assert!(EmissorConfig::from_toml_str(&both_ids).unwrap().validate().is_err());
    }

    #[test]
    fn test_unparseable_service_code_fails_at_startup() {
        let bad_item = format!("{}\n[servico]\nitem_lista = \"1.2.3.4\"\n", MINIMAL);
        let err = EmissorConfig::from_toml_str(&bad_item).unwrap().validate().unwrap_err();
        match &err {
            EmissorError::InvalidConfigValueError { field, .. } => assert_eq!(field, "servico.item_lista"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.severity().exit_code(), 1);

        let six_digits = format!("{}\n[servico]\nitem_lista = \"010901\"\n", MINIMAL);
        assert!(EmissorConfig::from_toml_str(&six_digits).unwrap().validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = EmissorConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.prestador.razao_social, "Prestadora Teste Ltda");
    }
}
