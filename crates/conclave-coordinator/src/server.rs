//! HTTP edge for the coordination server.
//!
//! `POST /startPipeline` acknowledges with 201 immediately; the merged
//! result is delivered asynchronously through the results client once the
//! run resolves. All handler state lives on an explicit per-process
//! [`ServerContext`] rather than module-level globals.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use conclave_model::{PipelineSpec, StepSpec};

use crate::manager::{RemotePipelineManager, StartPipelineRequest};
use crate::results::ResultsClient;

/// Per-process server state: the pipeline manager and the results client.
pub struct ServerContext {
  pub manager: RemotePipelineManager,
  pub results: ResultsClient,
}

#[derive(Debug, Deserialize)]
struct StartPipelineBody {
  run: RunStart,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunStart {
  id: String,
  clients: Vec<String>,
  pipeline_snapshot: PipelineSnapshot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineSnapshot {
  consortium_id: String,
  computation_id: String,
  steps: Vec<StepSpec>,
}

/// Build the coordination router.
pub fn router(ctx: Arc<ServerContext>) -> Router {
  Router::new()
    .route("/startPipeline", post(start_pipeline))
    .with_state(ctx)
}

/// Serve the coordination API on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, ctx: Arc<ServerContext>) -> std::io::Result<()> {
  let listener = TcpListener::bind(addr).await?;
  info!(%addr, "coordination server listening");
  axum::serve(listener, router(ctx)).await
}

async fn start_pipeline(
  State(ctx): State<Arc<ServerContext>>,
  Json(body): Json<StartPipelineBody>,
) -> StatusCode {
  let run = body.run;
  info!(run_id = %run.id, "pipeline is starting");

  let handle = ctx.manager.start_pipeline(StartPipelineRequest {
    run_id: run.id.clone(),
    consortium_id: run.pipeline_snapshot.consortium_id,
    computation_id: run.pipeline_snapshot.computation_id,
    clients: run.clients,
    spec: PipelineSpec {
      steps: run.pipeline_snapshot.steps,
    },
  });

  // Fire-and-forget: the caller gets 201 now, the results-save call happens
  // when the run resolves.
  let run_id = run.id;
  let ctx = Arc::clone(&ctx);
  tokio::spawn(async move {
    match handle.result().await {
      Ok(results) => {
        info!(run_id = %run_id, "pipeline is done, sending results");
        if let Err(err) = ctx.results.save_results(&run_id, &results).await {
          error!(run_id = %run_id, %err, "run resolved but results were not persisted");
        }
      }
      Err(err) => {
        error!(run_id = %run_id, %err, "pipeline failed");
      }
    }
  });

  StatusCode::CREATED
}
