//! DPS document builder, national layout 1.01.
//!
//! Element order inside `infDPS` is fixed by the schema; the authority rejects
//! documents with reordered or prefixed elements.

use crate::core::xml::XmlElement;
use crate::domain::model::{DocumentRequest, EmitterType, Provider, Recipient, ServiceLine};
use crate::utils::error::{EmissorError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

pub const NFSE_NS: &str = "http://www.sped.fazenda.gov.br/nfse";
pub const LAYOUT_VERSION: &str = "1.01";

/// Amounts computed while building `valores`, already rounded to cents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuesBlock {
    pub v_serv: Decimal,
    pub deducoes: Decimal,
    pub base: Decimal,
    pub v_issqn: Decimal,
    pub v_pis: Option<Decimal>,
    pub v_cofins: Option<Decimal>,
    pub v_ret_cp: Option<Decimal>,
    pub v_ret_irrf: Option<Decimal>,
    pub v_ret_csll: Option<Decimal>,
    /// ISS plus every federal rate, in percent.
    pub total_percent: Decimal,
}

/// Unsigned DPS tree. Moved into the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpsDocument {
    pub root: XmlElement,
    pub id: String,
    pub values: ValuesBlock,
}

#[derive(Debug, Clone, Default)]
pub struct DpsBuilder;

impl DpsBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, request: &DocumentRequest) -> Result<DpsDocument> {
        request.validate()?;

        let id = document_id(
            &request.provider.codigo_municipio,
            &request.provider,
            &request.series,
            request.sequence,
        )?;
        let c_trib_nac = service_code(&request.service.item_lista)?;

        let mut root = XmlElement::new("DPS", Some(NFSE_NS)).with_attribute("versao", LAYOUT_VERSION);
        let inf = root.add_child("infDPS");
        inf.set_attribute("Id", &id);

        inf.add_text_child("tpAmb", request.environment.flag())
            .add_text_child(
                "dhEmi",
                request.emitted_at.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            )
            .add_text_child("verAplic", request.app_version.as_str())
            .add_text_child("serie", request.series.as_str())
            .add_text_child("nDPS", request.sequence.to_string())
            .add_text_child("dCompet", request.emitted_at.format("%Y-%m-%d").to_string())
            .add_text_child("tpEmit", request.emitter_type.code())
            .add_text_child("cLocEmi", request.provider.codigo_municipio.as_str());

        add_provider(inf.add_child("prest"), &request.provider, request.emitter_type);

        if let Some(recipient) = &request.recipient {
            add_recipient(inf.add_child("toma"), recipient)?;
        }

        add_service(
            inf.add_child("serv"),
            &request.service,
            &request.provider.codigo_municipio,
            &c_trib_nac,
        );

        let values = compute_values(&request.service);
        add_values(inf.add_child("valores"), &request.service, &values);

        debug!("🧾 DPS {} montada (vServ {}, vISSQN {})", id, money(values.v_serv), money(values.v_issqn));

        Ok(DpsDocument { root, id, values })
    }
}

fn add_provider(prest: &mut XmlElement, provider: &Provider, emitter: EmitterType) {
    prest.add_text_child(provider.tax_id.tag(), provider.tax_id.digits());
    if let Some(im) = provider.inscricao_municipal.as_deref().filter(|v| !v.is_empty()) {
        prest.add_text_child("IM", im);
    }

    // E0121/E0128: name and address are refused when the provider is the emitter.
    if emitter != EmitterType::Provider {
        prest.add_text_child("xNome", provider.razao_social.as_str());
        if let Some(address) = &provider.endereco {
            let end = prest.add_child("end");
            end.add_child("endNac")
                .add_text_child("cMun", address.codigo_municipio.as_str())
                .add_text_child("CEP", address.cep.as_str());
            end.add_text_child("xLgr", address.logradouro.as_str())
                .add_text_child("nro", address.numero.as_str());
            if let Some(complemento) = address.complemento.as_deref().filter(|v| !v.is_empty()) {
                end.add_text_child("xCpl", complemento);
            }
            end.add_text_child("xBairro", address.bairro.as_str());
        }
    }

    prest
        .add_child("regTrib")
        .add_text_child("opSimpNac", provider.simples_nacional.code())
        .add_text_child("regEspTrib", provider.regime_especial.to_string());
}

fn add_recipient(toma: &mut XmlElement, recipient: &Recipient) -> Result<()> {
    let tax_id = recipient.tax_id()?;
    toma.add_text_child(tax_id.tag(), tax_id.digits())
        .add_text_child("xNome", recipient.nome.trim());
    if let Some(fone) = recipient.telefone.as_deref().filter(|v| !v.is_empty()) {
        toma.add_text_child("fone", fone);
    }
    if let Some(email) = recipient.email.as_deref().filter(|v| !v.is_empty()) {
        toma.add_text_child("email", email);
    }
    Ok(())
}

fn add_service(serv: &mut XmlElement, service: &ServiceLine, municipality: &str, c_trib_nac: &str) {
    serv.add_child("locPrest")
        .add_text_child("cLocPrestacao", municipality);
    serv.add_child("cServ")
        .add_text_child("cTribNac", c_trib_nac)
        .add_text_child("xDescServ", service.descricao.as_str());
    if let Some(text) = service.discriminacao.as_deref().filter(|v| !v.trim().is_empty()) {
        serv.add_child("infoCompl").add_text_child("xInfComp", text);
    }
}

fn compute_values(service: &ServiceLine) -> ValuesBlock {
    let base = service.base();
    let amount = |rate: Decimal| -> Option<Decimal> {
        (rate > Decimal::ZERO).then(|| round_money(base * rate / Decimal::ONE_HUNDRED))
    };
    let r = &service.retencoes;

    ValuesBlock {
        v_serv: round_money(service.valor),
        deducoes: round_money(service.deducoes),
        base: round_money(base),
        v_issqn: round_money(base * service.aliquota_iss / Decimal::ONE_HUNDRED),
        v_pis: amount(r.pis),
        v_cofins: amount(r.cofins),
        v_ret_cp: amount(r.inss),
        v_ret_irrf: amount(r.ir),
        v_ret_csll: amount(r.csll),
        total_percent: service.aliquota_iss + r.total_rate(),
    }
}

fn add_values(valores: &mut XmlElement, service: &ServiceLine, values: &ValuesBlock) {
    valores
        .add_child("vServPrest")
        .add_text_child("vServ", money(values.v_serv));

    if values.deducoes > Decimal::ZERO {
        valores
            .add_child("vDescCondIncond")
            .add_text_child("vDescIncond", money(values.deducoes));
    }

    let trib = valores.add_child("trib");
    trib.add_child("tribMun")
        .add_text_child("tribISSQN", "1")
        .add_text_child("tpRetISSQN", "1");

    let r = &service.retencoes;
    if !r.is_empty() {
        let fed = trib.add_child("tribFed");
        if r.pis > Decimal::ZERO || r.cofins > Decimal::ZERO {
            let pc = fed.add_child("piscofins");
            pc.add_text_child("CST", "01")
                .add_text_child("vBCPisCofins", money(values.base));
            if r.pis > Decimal::ZERO {
                pc.add_text_child("pAliqPis", money(r.pis));
            }
            if r.cofins > Decimal::ZERO {
                pc.add_text_child("pAliqCofins", money(r.cofins));
            }
            if let Some(v) = values.v_pis {
                pc.add_text_child("vPis", money(v));
            }
            if let Some(v) = values.v_cofins {
                pc.add_text_child("vCofins", money(v));
            }
            pc.add_text_child("tpRetPisCofins", "1");
        }
        if let Some(v) = values.v_ret_cp {
            fed.add_text_child("vRetCP", money(v));
        }
        if let Some(v) = values.v_ret_irrf {
            fed.add_text_child("vRetIRRF", money(v));
        }
        if let Some(v) = values.v_ret_csll {
            fed.add_text_child("vRetCSLL", money(v));
        }
    }

    trib.add_child("totTrib")
        .add_text_child("pTotTribSN", money(values.total_percent));
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Two decimals, half away from zero.
pub fn money(value: Decimal) -> String {
    format!("{:.2}", round_money(value))
}

/// `cTribNac` from a dotted classification code: `04.01.01` -> `040101`,
/// `1.09` -> `010900`, `040101` as is.
pub fn service_code(item_lista: &str) -> Result<String> {
    let code = item_lista.trim();
    let invalid = || EmissorError::schema(format!("invalid service classification code '{}'", item_lista));

    if !code.contains('.') {
        if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(code.to_string());
        }
        return Err(invalid());
    }

    let parts: Vec<&str> = code.split('.').collect();
    if !(2..=3).contains(&parts.len())
        || parts
            .iter()
            .any(|p| p.is_empty() || p.len() > 2 || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(invalid());
    }

    let mut out: String = parts.iter().map(|p| format!("{:0>2}", p)).collect();
    if parts.len() == 2 {
        out.push_str("00");
    }
    Ok(out)
}

/// `DPS` + municipality(7) + inscription type(1) + tax id(14) + series(5) +
/// sequence(15).
pub fn document_id(municipality: &str, provider: &Provider, series: &str, sequence: u64) -> Result<String> {
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    if municipality.len() != 7 || !all_digits(municipality) {
        return Err(EmissorError::schema(format!(
            "municipality code must be 7 digits, got '{}'",
            municipality
        )));
    }
    if series.len() != 5 || !all_digits(series) {
        return Err(EmissorError::schema(format!("series must be 5 digits, got '{}'", series)));
    }
    let tax_id = provider.tax_id.digits();
    if tax_id.is_empty() || tax_id.len() > 14 || !all_digits(tax_id) {
        return Err(EmissorError::schema(format!(
            "provider tax id does not fit the identifier: '{}'",
            tax_id
        )));
    }
    let sequence_text = format!("{:015}", sequence);
    if sequence_text.len() != 15 {
        return Err(EmissorError::schema(format!("sequence {} exceeds 15 digits", sequence)));
    }

    Ok(format!(
        "DPS{}{}{:0>14}{}{}",
        municipality,
        provider.tax_id.type_indicator(),
        tax_id,
        series,
        sequence_text
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::domain::model::{
        Address, Environment, FederalWithholding, SimplesNacional, TaxId,
    };
    use chrono::{DateTime, FixedOffset};
    use rust_decimal_macros::dec;

    fn provider() -> Provider {
        Provider {
            tax_id: TaxId::Cnpj("12345678000190".to_string()),
            inscricao_municipal: Some("12345".to_string()),
            razao_social: "Prestadora Teste Ltda".to_string(),
            endereco: Some(Address {
                logradouro: "Rua Lauro Muller".to_string(),
                numero: "100".to_string(),
                complemento: None,
                bairro: "Centro".to_string(),
                codigo_municipio: "4218707".to_string(),
                cep: "88701100".to_string(),
            }),
            simples_nacional: SimplesNacional::NaoOptante,
            regime_especial: 0,
            codigo_municipio: "4218707".to_string(),
        }
    }

    fn request(valor: Decimal, aliquota: Decimal) -> DocumentRequest {
        DocumentRequest {
            provider: provider(),
            recipient: Some(Recipient::with_cpf("12345678900", "Ana Silva")),
            service: ServiceLine {
                descricao: "Consultoria em tecnologia".to_string(),
                valor,
                aliquota_iss: aliquota,
                item_lista: "1.09".to_string(),
                discriminacao: None,
                deducoes: Decimal::ZERO,
                retencoes: FederalWithholding::default(),
            },
            emitted_at: DateTime::<FixedOffset>::parse_from_rfc3339("2026-01-10T09:59:00-03:00").unwrap(),
            environment: Environment::Homologacao,
            series: "00001".to_string(),
            sequence: 1234,
            emitter_type: EmitterType::Provider,
            cultural_incentive: false,
            app_version: "0.1.0".to_string(),
        }
    }

    fn child_names(el: &XmlElement) -> Vec<&str> {
        el.elements().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_iss_of_one_hundred_at_two_percent() {
        let doc = DpsBuilder::new().build(&request(dec!(100.00), dec!(2.0))).unwrap();
        assert_eq!(doc.values.v_issqn, dec!(2.00));
        assert_eq!(doc.root.find_text("vServ").as_deref(), Some("100.00"));
    }

    #[test]
    fn test_iss_of_eighty_nine_at_two_percent() {
        let doc = DpsBuilder::new().build(&request(dec!(89.00), dec!(2.0))).unwrap();
        assert_eq!(money(doc.values.v_serv), "89.00");
        assert_eq!(money(doc.values.v_issqn), "1.78");
    }

    #[test]
    fn test_identifier_layout() {
        let doc = DpsBuilder::new().build(&request(dec!(100), dec!(2))).unwrap();
        assert_eq!(doc.id.len(), 45);
        assert_eq!(doc.id, "DPS421870721234567800019000001000000000001234");
        let inf = doc.root.find("infDPS").unwrap();
        assert_eq!(inf.attribute("Id"), Some(doc.id.as_str()));
    }

    #[test]
    fn test_cpf_provider_identifier_is_padded() {
        let mut p = provider();
        p.tax_id = TaxId::Cpf("52998224725".to_string());
        let id = document_id("4218707", &p, "00001", 7).unwrap();
        assert_eq!(id, "DPS421870710005299822472500001000000000000007");
        assert_eq!(id.len(), 45);
    }

    #[test]
    fn test_identifier_rejects_bad_lengths() {
        assert!(matches!(
            document_id("421870", &provider(), "00001", 1),
            Err(EmissorError::SchemaError { .. })
        ));
        assert!(document_id("4218707", &provider(), "1", 1).is_err());
    }

    #[test]
    fn test_element_order() {
        let doc = DpsBuilder::new().build(&request(dec!(100), dec!(2))).unwrap();
        assert_eq!(doc.root.attribute("versao"), Some("1.01"));
        let inf = doc.root.find("infDPS").unwrap();
        assert_eq!(
            child_names(inf),
            vec![
                "tpAmb", "dhEmi", "verAplic", "serie", "nDPS", "dCompet", "tpEmit", "cLocEmi", "prest", "toma",
                "serv", "valores"
            ]
        );
        assert_eq!(inf.find_text("dhEmi").as_deref(), Some("2026-01-10T09:59:00-03:00"));
        assert_eq!(inf.find_text("dCompet").as_deref(), Some("2026-01-10"));
        assert_eq!(inf.find_text("nDPS").as_deref(), Some("1234"));
        assert_eq!(inf.find_text("tpAmb").as_deref(), Some("2"));
        assert_eq!(child_names(inf.child("prest").unwrap()), vec!["CNPJ", "IM", "regTrib"]);
        assert_eq!(child_names(inf.child("toma").unwrap()), vec!["CPF", "xNome"]);
    }

    #[test]
    fn test_provider_name_and_address_when_not_emitter() {
        let mut req = request(dec!(100), dec!(2));
        req.emitter_type = EmitterType::Recipient;
        let doc = DpsBuilder::new().build(&req).unwrap();
        let prest = doc.root.find("prest").unwrap();
        assert_eq!(child_names(prest), vec!["CNPJ", "IM", "xNome", "end", "regTrib"]);
        assert_eq!(
            child_names(prest.child("end").unwrap()),
            vec!["endNac", "xLgr", "nro", "xBairro"]
        );
    }

    #[test]
    fn test_service_code_forms() {
        assert_eq!(service_code("1.09").unwrap(), "010900");
        assert_eq!(service_code("04.01.01").unwrap(), "040101");
        assert_eq!(service_code("040101").unwrap(), "040101");
        assert!(matches!(service_code("1.2.3.4"), Err(EmissorError::SchemaError { .. })));
        assert!(service_code("abc").is_err());
        assert!(service_code("1.234").is_err());
        assert!(service_code("1..2").is_err());
    }

    #[test]
    fn test_recipient_tax_id_must_be_single() {
        let mut both = request(dec!(100), dec!(2));
        both.recipient = Some(Recipient {
            cpf: Some("12345678900".to_string()),
            cnpj: Some("11222333000181".to_string()),
            nome: "Ana".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            DpsBuilder::new().build(&both),
            Err(EmissorError::ValidationError { .. })
        ));

        let mut neither = request(dec!(100), dec!(2));
        neither.recipient = Some(Recipient {
            nome: "Ana".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            DpsBuilder::new().build(&neither),
            Err(EmissorError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_recipient_is_optional() {
        let mut req = request(dec!(100), dec!(2));
        req.recipient = None;
        let doc = DpsBuilder::new().build(&req).unwrap();
        assert!(doc.root.find("toma").is_none());
    }

    #[test]
    fn test_deductions_and_federal_withholding() {
        let mut req = request(dec!(1000.00), dec!(5));
        req.service.deducoes = dec!(100.00);
        req.service.discriminacao = Some("Referente a janeiro".to_string());
        req.service.retencoes = FederalWithholding {
            pis: dec!(0.65),
            cofins: dec!(3),
            inss: Decimal::ZERO,
            ir: dec!(1.5),
            csll: dec!(1),
        };

        let doc = DpsBuilder::new().build(&req).unwrap();
        let valores = doc.root.find("valores").unwrap();
        assert_eq!(child_names(valores), vec!["vServPrest", "vDescCondIncond", "trib"]);
        assert_eq!(valores.find_text("vDescIncond").as_deref(), Some("100.00"));

        let fed = valores.find("tribFed").unwrap();
        assert_eq!(child_names(fed), vec!["piscofins", "vRetIRRF", "vRetCSLL"]);
        assert_eq!(
            child_names(fed.child("piscofins").unwrap()),
            vec!["CST", "vBCPisCofins", "pAliqPis", "pAliqCofins", "vPis", "vCofins", "tpRetPisCofins"]
        );
        assert_eq!(fed.find_text("vBCPisCofins").as_deref(), Some("900.00"));
        assert_eq!(fed.find_text("vPis").as_deref(), Some("5.85"));
        assert_eq!(fed.find_text("vCofins").as_deref(), Some("27.00"));
        assert_eq!(fed.find_text("vRetIRRF").as_deref(), Some("13.50"));
        assert_eq!(valores.find_text("pTotTribSN").as_deref(), Some("11.15"));
        assert_eq!(doc.values.v_issqn, dec!(45.00));
        assert_eq!(doc.root.find_text("xInfComp").as_deref(), Some("Referente a janeiro"));
    }

    #[test]
    fn test_money_rounds_half_away_from_zero() {
        assert_eq!(money(dec!(0.125)), "0.13");
        assert_eq!(money(dec!(0.135)), "0.14");
        assert_eq!(money(dec!(7)), "7.00");
    }

    fn tax_id_strategy() -> impl Strategy<Value = TaxId> {
        prop_oneof![
            "[0-9]{11}".prop_map(TaxId::Cpf),
            "[0-9]{14}".prop_map(TaxId::Cnpj),
        ]
    }

    proptest! {
        #[test]
        fn prop_identifier_is_always_45_chars(
            tax_id in tax_id_strategy(),
            sequence in 1u64..=999_999_999_999_999,
        ) {
            let mut p = provider();
            p.tax_id = tax_id;
            let id = document_id("4218707", &p, "00001", sequence).unwrap();
            prop_assert_eq!(id.len(), 45);
            prop_assert!(id.starts_with("DPS4218707"));
            prop_assert!(id[3..].bytes().all(|b| b.is_ascii_digit()));
            let expected_suffix = format!("{:015}", sequence);
            prop_assert!(id.ends_with(&expected_suffix));
        }
    }
}
