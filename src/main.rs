mod api;
mod database;
mod llm;
mod pipeline;
mod present;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = settings::Args::parse();
    let settings = settings::Settings::from_file(args.config.as_deref())
        .context("failed to load configuration")?;

    let database = database::Database::connect(&settings.database.url)
        .await
        .context("failed to open database")?;
    let model = llm::OllamaModel::new(&settings.model.ollama_url, &settings.model.name)
        .context("failed to create model client")?;

    let app = Arc::new(api::App {
        model,
        database,
        settings: settings.pipeline_settings(),
    });

    info!("sql-assistant-server listening on {}", settings.web.address);
    api::serve(app, settings.web.address).await;

    Ok(())
}
