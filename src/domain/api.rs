//! Wire types of the national NFS-e API (Sefin emission and ADN reception).
//!
//! The bulk endpoint answers in PascalCase while the synchronous one uses
//! camelCase; message fields accept both spellings.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct DpsEmissionRequest {
    #[serde(rename = "dpsXmlGZipB64")]
    pub dps_xml_gzip_b64: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReceptionRequest {
    #[serde(rename = "LoteXmlGZipB64")]
    pub lote_xml_gzip_b64: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingMessage {
    #[serde(rename = "Codigo", alias = "codigo", default, deserialize_with = "string_or_number")]
    pub codigo: Option<String>,
    #[serde(rename = "Descricao", alias = "descricao", default)]
    pub descricao: Option<String>,
    #[serde(rename = "Complemento", alias = "complemento", default)]
    pub complemento: Option<String>,
    #[serde(rename = "Parametros", alias = "parametros", default)]
    pub parametros: Option<Vec<String>>,
}

impl ProcessingMessage {
    /// `codigo: descricao`, with empty parts kept empty.
    pub fn summary(&self) -> String {
        format!(
            "{}: {}",
            self.codigo.as_deref().unwrap_or(""),
            self.descricao.as_deref().unwrap_or("")
        )
    }
}

/// One entry of the `Lote` array, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDocumentResult {
    #[serde(rename = "ChaveAcesso", default)]
    pub chave_acesso: Option<String>,
    #[serde(rename = "NsuRecepcao", default, deserialize_with = "string_or_number")]
    pub nsu_recepcao: Option<String>,
    #[serde(rename = "StatusProcessamento", default)]
    pub status_processamento: Option<String>,
    #[serde(rename = "Alertas", default)]
    pub alertas: Option<Vec<ProcessingMessage>>,
    #[serde(rename = "Erros", default)]
    pub erros: Option<Vec<ProcessingMessage>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceptionResponse {
    #[serde(rename = "Lote", default)]
    pub lote: Vec<BatchDocumentResult>,
    #[serde(rename = "TipoAmbiente", default, deserialize_with = "string_or_number")]
    pub tipo_ambiente: Option<String>,
    #[serde(rename = "VersaoAplicativo", default)]
    pub versao_aplicativo: Option<String>,
    #[serde(rename = "DataHoraProcessamento", default)]
    pub data_hora_processamento: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmissionResponse {
    #[serde(default)]
    pub id_dps: Option<String>,
    #[serde(default)]
    pub chave_acesso: Option<String>,
    #[serde(rename = "nfseXmlGZipB64", default)]
    pub nfse_xml_gzip_b64: Option<String>,
    #[serde(default)]
    pub alertas: Vec<ProcessingMessage>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub tipo_ambiente: Option<String>,
    #[serde(default)]
    pub versao_aplicativo: Option<String>,
    #[serde(default)]
    pub data_hora_processamento: Option<String>,
}

/// Some fields arrive as numbers in one environment and strings in another.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_response_parses_pascal_case() {
        let body = serde_json::json!({
            "Lote": [{
                "ChaveAcesso": "42187072212345678000190000000000000126010000000001",
                "NsuRecepcao": 98765,
                "StatusProcessamento": "PROCESSADO",
                "Alertas": null,
                "Erros": [{"Codigo": "E0015", "Descricao": "Competencia posterior"}]
            }],
            "TipoAmbiente": 2,
            "VersaoAplicativo": "SefinNac_1.2",
            "DataHoraProcessamento": "2026-01-10T10:00:00-03:00"
        });

        let parsed: BatchReceptionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.lote.len(), 1);
        assert_eq!(parsed.lote[0].nsu_recepcao.as_deref(), Some("98765"));
        assert_eq!(parsed.lote[0].alertas, None);
        assert_eq!(parsed.lote[0].erros.as_ref().unwrap()[0].summary(), "E0015: Competencia posterior");
        assert_eq!(parsed.tipo_ambiente.as_deref(), Some("2"));
    }

    #[test]
    fn test_emission_response_parses_camel_case() {
        let body = serde_json::json!({
            "idDps": "DPS421870721234567800019000001000000000001001",
            "chaveAcesso": "42187072212345678000190000000000000126010000000001",
            "nfseXmlGZipB64": "H4sI",
            "alertas": [{"codigo": "A001", "descricao": "Aviso", "parametros": ["x"]}]
        });

        let parsed: EmissionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.alertas[0].codigo.as_deref(), Some("A001"));
        assert_eq!(parsed.alertas[0].parametros, Some(vec!["x".to_string()]));
        assert!(parsed.nfse_xml_gzip_b64.is_some());
    }

    #[test]
    fn test_request_field_names() {
        let single = serde_json::to_value(DpsEmissionRequest {
            dps_xml_gzip_b64: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(single, serde_json::json!({"dpsXmlGZipB64": "abc"}));

        let batch = serde_json::to_value(BatchReceptionRequest {
            lote_xml_gzip_b64: vec!["a".to_string(), "b".to_string()],
        })
        .unwrap();
        assert_eq!(batch, serde_json::json!({"LoteXmlGZipB64": ["a", "b"]}));
    }
}
