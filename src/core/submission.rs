//! Batch and single emission: build, sign, encode, submit, classify.

use crate::adapters::certificate::SigningCredentials;
use crate::config::toml_config::ServiceConfig;
use crate::core::builder::{DpsBuilder, ValuesBlock};
use crate::core::classifier::classify;
use crate::core::codec;
use crate::core::sequence::SequenceCounter;
use crate::core::signer::DpsSigner;
use crate::domain::model::{
    emission_timestamp_now, BatchSummary, DocumentRequest, EmitterType, Environment, InputRecord,
    OutcomeStatus, Provider, SignedDocument, SimplesNacional, SubmissionOutcome,
};
use crate::domain::ports::DfeTransport;
use crate::utils::error::Result;
use crate::utils::validation::DocumentKind;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upper bound the reception endpoint accepts per call.
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    pub environment: Environment,
    pub series: String,
    pub app_version: String,
    pub max_batch_size: usize,
    pub emitter_type: EmitterType,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Homologacao,
            series: "00001".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            max_batch_size: MAX_BATCH_SIZE,
            emitter_type: EmitterType::Provider,
        }
    }
}

/// A record taken through build, sign and encode, not yet submitted.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub signed: SignedDocument,
    pub values: ValuesBlock,
    pub payload: String,
}

pub struct SubmissionService<T: DfeTransport> {
    transport: T,
    builder: DpsBuilder,
    signer: DpsSigner,
    credentials: Arc<SigningCredentials>,
    counter: Arc<SequenceCounter>,
    provider: Provider,
    settings: SubmissionSettings,
}

impl<T: DfeTransport> SubmissionService<T> {
    pub fn new(
        transport: T,
        builder: DpsBuilder,
        credentials: Arc<SigningCredentials>,
        counter: Arc<SequenceCounter>,
        provider: Provider,
        settings: SubmissionSettings,
    ) -> Self {
        Self {
            transport,
            builder,
            signer: DpsSigner::new(),
            credentials,
            counter,
            provider,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn health_check(&self) -> bool {
        self.transport.health_check().await
    }

    pub fn chunk_size(&self) -> usize {
        self.settings.max_batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    fn document_request(&self, record: &InputRecord, config: &ServiceConfig) -> DocumentRequest {
        let mut provider = self.provider.clone();
        if config.simples_nacional && provider.simples_nacional == SimplesNacional::NaoOptante {
            provider.simples_nacional = SimplesNacional::OptanteMeEpp;
        }

        DocumentRequest {
            provider,
            recipient: Some(record.recipient()),
            service: config.service_line(),
            emitted_at: emission_timestamp_now(),
            environment: self.settings.environment,
            series: self.settings.series.clone(),
            sequence: self.counter.next(),
            emitter_type: self.settings.emitter_type,
            cultural_incentive: config.incentivador_cultural,
            app_version: self.settings.app_version.clone(),
        }
    }

    /// Build, sign (with self-verification) and encode one record.
    pub fn prepare(&self, record: &InputRecord, config: &ServiceConfig) -> Result<PreparedDocument> {
        if record.document_kind() == Some(DocumentKind::Invalid) {
            warn!(
                "⚠️ Documento do tomador {} com dígito verificador inválido ({})",
                record.display_tax_id(),
                record.hash
            );
        }
        let request = self.document_request(record, config);
        let document = self.builder.build(&request)?;
        let values = document.values.clone();
        let signed = self.signer.sign(document, &self.credentials)?;
        let payload = codec::encode(signed.xml.as_bytes())?;
        Ok(PreparedDocument {
            signed,
            values,
            payload,
        })
    }

    /// Submits `records` through the bulk endpoint in sequential chunks.
    /// Always returns one outcome per record, in input order.
    pub async fn emitir_lote<F>(
        &self,
        records: &[InputRecord],
        config: &ServiceConfig,
        mut on_progress: F,
    ) -> Vec<SubmissionOutcome>
    where
        F: FnMut(usize, usize),
    {
        let total = records.len();
        let chunk_size = self.chunk_size();
        let chunk_count = total.div_ceil(chunk_size);
        let mut outcomes = Vec::with_capacity(total);

        info!("🚀 Iniciando emissão em lote: {} registros, {} lote(s)", total, chunk_count);

        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            info!("📦 Lote {}/{}: {} registros", index + 1, chunk_count, chunk.len());
            outcomes.extend(self.process_chunk(chunk, config).await);
            on_progress(outcomes.len(), total);
        }

        let summary = BatchSummary::from_outcomes(&outcomes);
        info!(
            "📊 Emissão concluída: {} total, {} sucesso, {} erro, {} alerta, {} processando",
            summary.total, summary.sucesso, summary.erro, summary.alerta, summary.processando
        );
        outcomes
    }

    async fn process_chunk(&self, chunk: &[InputRecord], config: &ServiceConfig) -> Vec<SubmissionOutcome> {
        let mut slots: Vec<Option<SubmissionOutcome>> = vec![None; chunk.len()];
        let mut payloads = Vec::with_capacity(chunk.len());
        let mut submitted = Vec::with_capacity(chunk.len());

        for (i, record) in chunk.iter().enumerate() {
            match self.prepare(record, config) {
                Ok(prepared) => {
                    debug!("📝 {} pronto para envio ({})", prepared.signed.id, record.hash);
                    payloads.push(prepared.payload);
                    submitted.push(i);
                }
                Err(e) => {
                    warn!("⚠️ Registro {} descartado: {}", record.hash, e);
                    slots[i] = Some(SubmissionOutcome::error(record, e.to_string()));
                }
            }
        }

        if !payloads.is_empty() {
            match self.transport.submit_batch(&payloads).await {
                Ok(response) => {
                    if response.lote.len() != submitted.len() {
                        warn!(
                            "⚠️ Resposta com {} entradas para {} documentos enviados",
                            response.lote.len(),
                            submitted.len()
                        );
                    }
                    for (position, &i) in submitted.iter().enumerate() {
                        let record = &chunk[i];
                        let outcome = match response.lote.get(position) {
                            Some(entry) => {
                                let classification = classify(entry);
                                let mut outcome =
                                    SubmissionOutcome::for_record(record, classification.status, classification.message);
                                outcome.chave_acesso = classification.chave_acesso;
                                outcome.protocolo = classification.nsu;
                                outcome
                            }
                            None => SubmissionOutcome::for_record(
                                record,
                                OutcomeStatus::Processando,
                                "Sem retorno individual no lote",
                            ),
                        };
                        slots[i] = Some(outcome);
                    }
                }
                Err(e) => {
                    error!("❌ Falha no envio do lote: {}", e);
                    let message = e.user_friendly_message();
                    for &i in &submitted {
                        slots[i] = Some(SubmissionOutcome::error(&chunk[i], format!("{}: {}", message, e)));
                    }
                }
            }
        }

        slots
            .into_iter()
            .zip(chunk)
            .map(|(slot, record)| slot.unwrap_or_else(|| SubmissionOutcome::error(record, "Registro não processado")))
            .collect()
    }

    /// Synchronous emission of a single record through the Sefin endpoint.
    pub async fn emitir_unico(&self, record: &InputRecord, config: &ServiceConfig) -> SubmissionOutcome {
        let prepared = match self.prepare(record, config) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("⚠️ Registro {} descartado: {}", record.hash, e);
                return SubmissionOutcome::error(record, e.to_string());
            }
        };

        match self.transport.emit_dps(&prepared.payload).await {
            Ok(response) => {
                let (status, message) = if response.alertas.is_empty() {
                    (OutcomeStatus::Sucesso, "NFS-e emitida".to_string())
                } else {
                    let joined = response
                        .alertas
                        .iter()
                        .map(|a| a.summary())
                        .collect::<Vec<_>>()
                        .join("; ");
                    (OutcomeStatus::Alerta, joined)
                };
                info!(
                    "✅ {} emitida: {}",
                    prepared.signed.id,
                    response.chave_acesso.as_deref().unwrap_or("sem chave")
                );
                let nfse_xml = response.nfse_xml_gzip_b64.as_deref().and_then(|b64| {
                    codec::decode_to_string(b64)
                        .map_err(|e| warn!("⚠️ NFS-e retornada para {} ilegível: {}", prepared.signed.id, e))
                        .ok()
                });
                let mut outcome = SubmissionOutcome::for_record(record, status, message);
                outcome.nfse_xml = nfse_xml;
                outcome.chave_acesso = response.chave_acesso;
                outcome.protocolo = response.id_dps.or(Some(prepared.signed.id));
                outcome
            }
            Err(e) => {
                error!("❌ Falha na emissão de {}: {}", prepared.signed.id, e);
                SubmissionOutcome::error(record, format!("{}: {}", e.user_friendly_message(), e))
            }
        }
    }
}
