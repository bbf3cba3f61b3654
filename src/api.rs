//! Thin HTTP front end. Handlers construct a pipeline, drive it to
//! completion, and serialize the report; no query or model logic lives here.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::info;
use warp::{http::StatusCode, Filter};

use crate::database::{DataSource, Database};
use crate::llm::OllamaModel;
use crate::pipeline::{analysis::AnalysisPipeline, query::QueryPipeline, PipelineSettings};
use crate::present;

pub(crate) struct App {
    pub model: OllamaModel,
    pub database: Database,
    pub settings: PipelineSettings,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

pub(crate) async fn serve(app: Arc<App>, addr: SocketAddr) {
    let ask = warp::path("ask")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .and_then(handle_ask);
    let analyze = warp::path("analyze")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .and_then(handle_analyze);
    let schema = warp::path("schema")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_app(app))
        .and_then(handle_schema);

    warp::serve(ask.or(analyze).or(schema)).run(addr).await;
}

fn with_app(app: Arc<App>) -> impl Filter<Extract = (Arc<App>,), Error = Infallible> + Clone {
    warp::any().map(move || app.clone())
}

async fn handle_ask(request: AskRequest, app: Arc<App>) -> Result<impl warp::Reply, Infallible> {
    info!("question received: {}", request.question);
    let pipeline = QueryPipeline::new(&app.model, &app.database, &app.settings);
    let report = pipeline.run(&request.question).await;
    let reply = present::query_reply(&report);
    Ok(json_reply(
        &WithReply { report, reply },
        StatusCode::OK,
    ))
}

async fn handle_analyze(
    request: AskRequest,
    app: Arc<App>,
) -> Result<impl warp::Reply, Infallible> {
    info!("analysis question received: {}", request.question);
    let pipeline = AnalysisPipeline::new(&app.model, &app.database, &app.settings);
    let report = pipeline.run(&request.question).await;
    let reply = present::analysis_reply(&report);
    Ok(json_reply(
        &WithReply { report, reply },
        StatusCode::OK,
    ))
}

/// Direct schema exposure; no model call involved.
async fn handle_schema(app: Arc<App>) -> Result<impl warp::Reply, Infallible> {
    match app.database.inspect_schema().await {
        Ok(schema) => {
            let description = present::schema_overview(&schema);
            Ok(json_reply(
                &serde_json::json!({ "schema": schema, "description": description }),
                StatusCode::OK,
            ))
        }
        Err(e) => Ok(json_reply(
            &serde_json::json!({ "error": e.to_string() }),
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}

#[derive(Debug, Serialize)]
struct WithReply<T: Serialize> {
    #[serde(flatten)]
    report: T,
    reply: String,
}

fn json_reply(
    value: &impl Serialize,
    status: StatusCode,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(value), status)
}
