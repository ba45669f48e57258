use crate::utils::error::{EmissorError, Result};
use crate::utils::validation::{classify_document, clean_document, DocumentKind};
use chrono::{DateTime, Duration, FixedOffset, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Brasília time; the national API compares timestamps in this offset.
pub fn brasilia_offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("-03:00 is a valid offset")
}

/// Emission timestamp with the one-minute margin that keeps `dhEmi` behind
/// the authority's clock.
pub fn emission_timestamp_now() -> DateTime<FixedOffset> {
    (Utc::now().with_timezone(&brasilia_offset()) - Duration::minutes(1)).trunc_subsecs(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Producao,
    Homologacao,
}

impl Environment {
    /// `tpAmb` value.
    pub fn flag(&self) -> &'static str {
        match self {
            Environment::Producao => "1",
            Environment::Homologacao => "2",
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Homologacao
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "numero", rename_all = "UPPERCASE")]
pub enum TaxId {
    Cpf(String),
    Cnpj(String),
}

impl TaxId {
    pub fn cpf(value: &str) -> Result<Self> {
        let digits = clean_document(value);
        if digits.len() != 11 {
            return Err(EmissorError::validation(format!(
                "CPF must have 11 digits, got '{}'",
                value
            )));
        }
        Ok(TaxId::Cpf(digits))
    }

    pub fn cnpj(value: &str) -> Result<Self> {
        let digits = clean_document(value);
        if digits.len() != 14 {
            return Err(EmissorError::validation(format!(
                "CNPJ must have 14 digits, got '{}'",
                value
            )));
        }
        Ok(TaxId::Cnpj(digits))
    }

    pub fn digits(&self) -> &str {
        match self {
            TaxId::Cpf(v) | TaxId::Cnpj(v) => v,
        }
    }

    /// Element name used inside `prest` and `toma`.
    pub fn tag(&self) -> &'static str {
        match self {
            TaxId::Cpf(_) => "CPF",
            TaxId::Cnpj(_) => "CNPJ",
        }
    }

    /// Inscription type digit of the DPS identifier.
    pub fn type_indicator(&self) -> char {
        match self {
            TaxId::Cpf(_) => '1',
            TaxId::Cnpj(_) => '2',
        }
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digits())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub logradouro: String,
    pub numero: String,
    #[serde(default)]
    pub complemento: Option<String>,
    pub bairro: String,
    pub codigo_municipio: String,
    pub cep: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimplesNacional {
    NaoOptante,
    OptanteMeEpp,
    Mei,
}

impl SimplesNacional {
    /// `opSimpNac` value.
    pub fn code(&self) -> &'static str {
        match self {
            SimplesNacional::NaoOptante => "1",
            SimplesNacional::OptanteMeEpp => "2",
            SimplesNacional::Mei => "3",
        }
    }
}

impl Default for SimplesNacional {
    fn default() -> Self {
        SimplesNacional::NaoOptante
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub tax_id: TaxId,
    pub inscricao_municipal: Option<String>,
    pub razao_social: String,
    pub endereco: Option<Address>,
    pub simples_nacional: SimplesNacional,
    /// `regEspTrib`; 0 means no special regime.
    pub regime_especial: u8,
    /// IBGE code of the municipality that issues the document.
    pub codigo_municipio: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub cpf: Option<String>,
    pub cnpj: Option<String>,
    pub nome: String,
    pub telefone: Option<String>,
    pub email: Option<String>,
}

impl Recipient {
    pub fn with_cpf(cpf: &str, nome: &str) -> Self {
        Self {
            cpf: Some(cpf.to_string()),
            nome: nome.to_string(),
            ..Default::default()
        }
    }

    pub fn with_cnpj(cnpj: &str, nome: &str) -> Self {
        Self {
            cnpj: Some(cnpj.to_string()),
            nome: nome.to_string(),
            ..Default::default()
        }
    }

    /// Resolves the single tax id form; both or neither is a validation error.
    pub fn tax_id(&self) -> Result<TaxId> {
        let cpf = self.cpf.as_deref().filter(|v| !v.trim().is_empty());
        let cnpj = self.cnpj.as_deref().filter(|v| !v.trim().is_empty());
        match (cpf, cnpj) {
            (Some(cpf), None) => TaxId::cpf(cpf),
            (None, Some(cnpj)) => TaxId::cnpj(cnpj),
            (Some(_), Some(_)) => Err(EmissorError::validation(format!(
                "recipient '{}' has both CPF and CNPJ",
                self.nome
            ))),
            (None, None) => Err(EmissorError::validation(format!(
                "recipient '{}' has neither CPF nor CNPJ",
                self.nome
            ))),
        }
    }
}

/// Federal withholding rates in percent; zero means not withheld.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederalWithholding {
    #[serde(default)]
    pub pis: Decimal,
    #[serde(default)]
    pub cofins: Decimal,
    #[serde(default)]
    pub inss: Decimal,
    #[serde(default)]
    pub ir: Decimal,
    #[serde(default)]
    pub csll: Decimal,
}

impl FederalWithholding {
    pub fn is_empty(&self) -> bool {
        self.rates().iter().all(|r| r.is_zero())
    }

    pub fn total_rate(&self) -> Decimal {
        self.rates().iter().copied().sum()
    }

    fn rates(&self) -> [Decimal; 5] {
        [self.pis, self.cofins, self.inss, self.ir, self.csll]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub descricao: String,
    pub valor: Decimal,
    pub aliquota_iss: Decimal,
    /// National classification code in dotted form, e.g. `1.09` or `04.01.01`.
    pub item_lista: String,
    pub discriminacao: Option<String>,
    pub deducoes: Decimal,
    pub retencoes: FederalWithholding,
}

impl ServiceLine {
    pub fn validate(&self) -> Result<()> {
        if self.descricao.trim().is_empty() {
            return Err(EmissorError::validation("service description is empty"));
        }
        if self.valor <= Decimal::ZERO {
            return Err(EmissorError::validation(format!(
                "service value must be positive, got {}",
                self.valor
            )));
        }
        if self.aliquota_iss < Decimal::ZERO || self.aliquota_iss > Decimal::from(5) {
            return Err(EmissorError::validation(format!(
                "ISS rate must be within [0, 5], got {}",
                self.aliquota_iss
            )));
        }
        if self.deducoes < Decimal::ZERO || self.deducoes >= self.valor {
            return Err(EmissorError::validation(format!(
                "deductions must be within [0, {}), got {}",
                self.valor, self.deducoes
            )));
        }
        if self.retencoes.rates().iter().any(|r| r.is_sign_negative()) {
            return Err(EmissorError::validation("withholding rates cannot be negative"));
        }
        Ok(())
    }

    /// Taxable base: value minus deductions.
    pub fn base(&self) -> Decimal {
        self.valor - self.deducoes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitterType {
    Provider,
    Recipient,
    Intermediary,
}

impl EmitterType {
    /// `tpEmit` value.
    pub fn code(&self) -> &'static str {
        match self {
            EmitterType::Provider => "1",
            EmitterType::Recipient => "2",
            EmitterType::Intermediary => "3",
        }
    }
}

impl Default for EmitterType {
    fn default() -> Self {
        EmitterType::Provider
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRequest {
    pub provider: Provider,
    pub recipient: Option<Recipient>,
    pub service: ServiceLine,
    pub emitted_at: DateTime<FixedOffset>,
    pub environment: Environment,
    pub series: String,
    pub sequence: u64,
    pub emitter_type: EmitterType,
    /// Carried for the record; the 1.01 layout has no element for it.
    pub cultural_incentive: bool,
    pub app_version: String,
}

impl DocumentRequest {
    pub fn validate(&self) -> Result<()> {
        if let Some(recipient) = &self.recipient {
            recipient.tax_id()?;
            if recipient.nome.trim().is_empty() {
                return Err(EmissorError::validation("recipient name is empty"));
            }
        }
        if self.sequence == 0 {
            return Err(EmissorError::validation("sequence number must start at 1"));
        }
        self.service.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub xml: String,
    pub id: String,
    pub digest_value: String,
    pub signature_value: String,
    /// Base64 DER of the signing certificate, unwrapped.
    pub certificate: String,
}

/// One line handed over by the extraction step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub cnpj: Option<String>,
    pub nome: String,
    pub hash: String,
}

impl InputRecord {
    pub fn new(cpf: &str, nome: &str, hash: &str) -> Self {
        Self {
            cpf: Some(cpf.to_string()),
            cnpj: None,
            nome: nome.to_string(),
            hash: hash.to_string(),
        }
    }

    pub fn recipient(&self) -> Recipient {
        Recipient {
            cpf: self.cpf.clone(),
            cnpj: self.cnpj.clone(),
            nome: self.nome.clone(),
            telefone: None,
            email: None,
        }
    }

    /// Check-digit classification of the recipient document, when one is given.
    pub fn document_kind(&self) -> Option<DocumentKind> {
        self.cpf
            .as_deref()
            .or(self.cnpj.as_deref())
            .filter(|d| !d.trim().is_empty())
            .map(classify_document)
    }

    pub fn display_tax_id(&self) -> String {
        self.cpf
            .clone()
            .or_else(|| self.cnpj.clone())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Sucesso,
    Erro,
    Alerta,
    Processando,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeStatus::Sucesso => "sucesso",
            OutcomeStatus::Erro => "erro",
            OutcomeStatus::Alerta => "alerta",
            OutcomeStatus::Processando => "processando",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub hash_transacao: String,
    pub documento_tomador: String,
    pub nome_tomador: String,
    pub status: OutcomeStatus,
    pub chave_acesso: Option<String>,
    pub protocolo: Option<String>,
    pub mensagem: String,
    pub timestamp: DateTime<FixedOffset>,
    /// NFS-e XML returned by the synchronous endpoint; stored beside the report.
    #[serde(skip)]
    pub nfse_xml: Option<String>,
}

impl SubmissionOutcome {
    pub fn for_record(record: &InputRecord, status: OutcomeStatus, mensagem: impl Into<String>) -> Self {
        Self {
            hash_transacao: record.hash.clone(),
            documento_tomador: record.display_tax_id(),
            nome_tomador: record.nome.clone(),
            status,
            chave_acesso: None,
            protocolo: None,
            mensagem: mensagem.into(),
            timestamp: Utc::now().with_timezone(&brasilia_offset()),
            nfse_xml: None,
        }
    }

    pub fn error(record: &InputRecord, mensagem: impl Into<String>) -> Self {
        Self::for_record(record, OutcomeStatus::Erro, mensagem)
    }
}

/// 50-digit key issued by the authority for an authorized NFS-e.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    pub const LEN: usize = 50;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccessKey {
    type Error = EmissorError;

    fn try_from(value: String) -> Result<Self> {
        if value.len() != Self::LEN || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EmissorError::validation(format!(
                "access key must be {} digits, got '{}'",
                Self::LEN,
                value
            )));
        }
        Ok(AccessKey(value))
    }
}

impl std::str::FromStr for AccessKey {
    type Err = EmissorError;

    fn from_str(s: &str) -> Result<Self> {
        AccessKey::try_from(s.to_string())
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub sucesso: usize,
    pub erro: usize,
    pub alerta: usize,
    pub processando: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[SubmissionOutcome]) -> Self {
        let mut summary = BatchSummary {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Sucesso => summary.sucesso += 1,
                OutcomeStatus::Erro => summary.erro += 1,
                OutcomeStatus::Alerta => summary.alerta += 1,
                OutcomeStatus::Processando => summary.processando += 1,
            }
        }
        summary
    }
}
