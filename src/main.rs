use clap::Parser;
use nfse_emissor::core::builder::{money, DpsBuilder};
use nfse_emissor::core::report;
use nfse_emissor::core::sequence::SequenceCounter;
use nfse_emissor::domain::model::BatchSummary;
use nfse_emissor::utils::error::EmissorError;
use nfse_emissor::utils::{logger, validation::Validate};
use nfse_emissor::{
    CliConfig, EmissorConfig, LocalStorage, NfseApiClient, SigningCredentials, SubmissionService,
    SubmissionSettings,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Iniciando nfse-emissor");
    if cli.verbose {
        tracing::debug!("Argumentos: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        tracing::error!("❌ Argumentos inválidos: {}", e);
        tracing::error!("💡 Sugestão: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    match run(&cli).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ Execução interrompida: {} (categoria {:?}, severidade {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Sugestão: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Sugestão: {}", e.recovery_suggestion());

            std::process::exit(e.severity().exit_code());
        }
    }

    Ok(())
}

async fn run(cli: &CliConfig) -> nfse_emissor::Result<i32> {
    let config = EmissorConfig::from_file(&cli.config)?;
    config.validate()?;
    tracing::info!(
        "⚙️ Ambiente {:?}, API {}",
        config.api.ambiente,
        config.api.base_url
    );

    let credentials = Arc::new(
        SigningCredentials::load(&config.certificate.cert_path, &config.certificate.key_path).await?,
    );
    let identity = config.certificate.mtls.then(|| credentials.identity_pem());
    let client = NfseApiClient::new(
        &config.api.base_url,
        config.api.timeout(),
        identity,
        config.api.retry_policy(),
    )?;

    let counter = Arc::new(
        config
            .batch
            .sequence_start
            .map(SequenceCounter::new)
            .unwrap_or_else(SequenceCounter::random_seeded),
    );
    tracing::info!("🔢 Primeiro nDPS desta execução: {}", counter.peek());
    let settings = SubmissionSettings {
        environment: config.api.ambiente,
        series: config.batch.serie.clone(),
        app_version: config.batch.app_version(),
        max_batch_size: config.batch.max_batch_size,
        emitter_type: config.batch.emitter_type,
    };
    let service = SubmissionService::new(
        client,
        DpsBuilder::new(),
        credentials,
        counter,
        config.prestador.to_provider()?,
        settings,
    );

    if cli.health_check {
        let healthy = service.health_check().await;
        println!(
            "{} {}",
            if healthy { "✅ API disponível:" } else { "❌ API indisponível:" },
            service.transport().base_url()
        );
        return Ok(if healthy { 0 } else { 2 });
    }

    let records_path = cli
        .records
        .as_deref()
        .ok_or_else(|| EmissorError::MissingConfigError {
            field: "records".to_string(),
        })?;
    let records = report::read_records(&tokio::fs::read(records_path).await?)?;
    tracing::info!("📋 {} registros carregados de {}", records.len(), records_path);

    if cli.dry_run {
        let first = records
            .first()
            .ok_or_else(|| EmissorError::validation("records file is empty"))?;
        let prepared = service.prepare(first, &config.servico)?;
        println!("✅ {} assinado e verificado", prepared.signed.id);
        println!(
            "   vServ {} | vISSQN {} | payload {} bytes",
            money(prepared.values.v_serv),
            money(prepared.values.v_issqn),
            prepared.payload.len()
        );
        return Ok(0);
    }

    let outcomes = if cli.sync {
        let mut outcomes = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            outcomes.push(service.emitir_unico(record, &config.servico).await);
            tracing::info!("⏳ Progresso: {}/{}", index + 1, records.len());
        }
        outcomes
    } else {
        service
            .emitir_lote(&records, &config.servico, |done, total| {
                tracing::info!("⏳ Progresso: {}/{}", done, total);
            })
            .await
    };

    let output_path = cli
        .output_path
        .clone()
        .unwrap_or_else(|| config.output.path.clone());
    let storage = LocalStorage::new(output_path);
    let written = report::write_report(&storage, &outcomes).await?;

    let summary = BatchSummary::from_outcomes(&outcomes);
    println!("✅ Processados: {}", summary.total);
    println!(
        "   sucesso {} | erro {} | alerta {} | processando {}",
        summary.sucesso, summary.erro, summary.alerta, summary.processando
    );
    println!(
        "📁 {} arquivo(s) salvos em: {}",
        written.len(),
        storage.base_path().display()
    );

    Ok(if summary.erro > 0 { 2 } else { 0 })
}
