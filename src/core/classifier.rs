use crate::domain::api::{BatchDocumentResult, ProcessingMessage};
use crate::domain::model::OutcomeStatus;

/// Uniform reading of one `Lote` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: OutcomeStatus,
    pub message: String,
    pub chave_acesso: Option<String>,
    pub nsu: Option<String>,
}

/// Errors win over an authorized status; alerts only count when the entry
/// is neither rejected nor authorized.
pub fn classify(entry: &BatchDocumentResult) -> Classification {
    let raw_status = entry.status_processamento.as_deref().unwrap_or("").trim();
    let upper = raw_status.to_uppercase();

    let (status, message) = match (non_empty(&entry.erros), non_empty(&entry.alertas)) {
        (Some(erros), _) => (OutcomeStatus::Erro, join(erros)),
        _ if upper == "PROCESSADO" || upper == "AUTORIZADO" => (
            OutcomeStatus::Sucesso,
            format!("Autorizado - NSU: {}", entry.nsu_recepcao.as_deref().unwrap_or("")),
        ),
        (None, Some(alertas)) => (OutcomeStatus::Alerta, join(alertas)),
        (None, None) => (OutcomeStatus::Processando, format!("Status: {}", raw_status)),
    };

    Classification {
        status,
        message,
        chave_acesso: entry.chave_acesso.clone(),
        nsu: entry.nsu_recepcao.clone(),
    }
}

fn non_empty(messages: &Option<Vec<ProcessingMessage>>) -> Option<&[ProcessingMessage]> {
    messages.as_deref().filter(|m| !m.is_empty())
}

fn join(messages: &[ProcessingMessage]) -> String {
    messages
        .iter()
        .map(ProcessingMessage::summary)
        .collect::<Vec<_>>()
        .join("; ")
}
