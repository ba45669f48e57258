use crate::adapters::certificate::SigningCredentials;
use crate::domain::model::{
    DocumentRequest, EmitterType, Environment, FederalWithholding, Provider, Recipient, ServiceLine,
    SimplesNacional, TaxId,
};
use chrono::{DateTime, FixedOffset};
use rust_decimal_macros::dec;

pub const CERT: &str = include_str!("../../tests/fixtures/cert.pem");
pub const KEY: &str = include_str!("../../tests/fixtures/key.pem");
pub const EXPIRED_CERT: &str = include_str!("../../tests/fixtures/expired_cert.pem");

pub fn credentials() -> SigningCredentials {
    SigningCredentials::from_pem(CERT, KEY).unwrap()
}

pub fn expired_credentials() -> SigningCredentials {
    SigningCredentials::from_pem(EXPIRED_CERT, KEY).unwrap()
}

pub fn sample_provider() -> Provider {
    Provider {
        tax_id: TaxId::Cnpj("12345678000190".to_string()),
        inscricao_municipal: Some("12345".to_string()),
        razao_social: "Prestadora Teste Ltda".to_string(),
        endereco: None,
        simples_nacional: SimplesNacional::NaoOptante,
        regime_especial: 0,
        codigo_municipio: "4218707".to_string(),
    }
}

pub fn sample_request() -> DocumentRequest {
    DocumentRequest {
        provider: sample_provider(),
        recipient: Some(Recipient::with_cpf("12345678900", "Ana Silva")),
        service: ServiceLine {
            descricao: "Prestação de serviços".to_string(),
            valor: dec!(100.00),
            aliquota_iss: dec!(2.0),
            item_lista: "1.09".to_string(),
            discriminacao: None,
            deducoes: dec!(0),
            retencoes: FederalWithholding::default(),
        },
        emitted_at: DateTime::<FixedOffset>::parse_from_rfc3339("2026-01-10T09:59:00-03:00").unwrap(),
        environment: Environment::Homologacao,
        series: "00001".to_string(),
        sequence: 1001,
        emitter_type: EmitterType::Provider,
        cultural_incentive: false,
        app_version: "0.1.0".to_string(),
    }
}
