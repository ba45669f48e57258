//! Input records from CSV and the outcome report written after a run.

use crate::domain::model::{BatchSummary, InputRecord, SubmissionOutcome};
use crate::domain::ports::Storage;
use crate::utils::error::{EmissorError, Result};
use serde::Serialize;

pub const OUTCOMES_CSV: &str = "outcomes.csv";
pub const OUTCOMES_JSON: &str = "outcomes.json";

/// Reads `cpf,nome,hash` rows (an optional `cnpj` column is honored).
pub fn read_records(data: &[u8]) -> Result<Vec<InputRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut records = Vec::new();
    for row in reader.deserialize::<InputRecord>() {
        records.push(row?);
    }
    Ok(records)
}

pub fn outcomes_csv(outcomes: &[SubmissionOutcome]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for outcome in outcomes {
        writer.serialize(outcome)?;
    }
    writer
        .into_inner()
        .map_err(|e| EmissorError::IoError(e.into_error()))
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    resumo: &'a BatchSummary,
    resultados: &'a [SubmissionOutcome],
}

pub fn outcomes_json(outcomes: &[SubmissionOutcome], summary: &BatchSummary) -> Result<Vec<u8>> {
    let report = Report {
        resumo: summary,
        resultados: outcomes,
    };
    Ok(serde_json::to_vec_pretty(&report)?)
}

/// Writes `outcomes.csv`, `outcomes.json` and one `nfse/<chave>.xml` per
/// returned NFS-e; returns the written names.
pub async fn write_report<S: Storage>(storage: &S, outcomes: &[SubmissionOutcome]) -> Result<Vec<String>> {
    let summary = BatchSummary::from_outcomes(outcomes);
    storage.write_file(OUTCOMES_CSV, &outcomes_csv(outcomes)?).await?;
    storage
        .write_file(OUTCOMES_JSON, &outcomes_json(outcomes, &summary)?)
        .await?;
    tracing::info!("💾 Relatório gravado: {} e {}", OUTCOMES_CSV, OUTCOMES_JSON);

    let mut written = vec![OUTCOMES_CSV.to_string(), OUTCOMES_JSON.to_string()];
    for outcome in outcomes {
        if let Some(xml) = &outcome.nfse_xml {
            let name = format!(
                "nfse/{}.xml",
                outcome.chave_acesso.as_deref().unwrap_or(&outcome.hash_transacao)
            );
            storage.write_file(&name, xml.as_bytes()).await?;
            written.push(name);
        }
    }
    if written.len() > 2 {
        tracing::info!("💾 {} NFS-e gravadas em nfse/", written.len() - 2);
    }
    Ok(written)
}
