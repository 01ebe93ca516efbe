// Batch ingestion entry point.
//
// Runs the staged geography pipeline (or a single named source) against
// the engine database and exits with a categorised code: 0 success,
// 2 invalid input, 3 precondition failed, 4 ingestion failure. The
// failure reason is emitted on the telemetry bus before exit.

use std::path::PathBuf;
use std::process::ExitCode;

use newswire_crawler::error::CrawlError;
use newswire_crawler::events::TelemetryEvent;
use newswire_crawler::service::CrawlEngine;

struct Invocation {
    data_dir: PathBuf,
    max_depth: u32,
    force: bool,
    /// Run a single source instead of the full pipeline
    source: Option<(String, String)>,
}

fn parse_args() -> Result<Invocation, String> {
    let mut invocation = Invocation {
        data_dir: PathBuf::from("./newswire-data"),
        max_depth: 3,
        force: false,
        source: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-dir" => {
                invocation.data_dir =
                    PathBuf::from(args.next().ok_or("--data-dir needs a value")?);
            }
            "--max-depth" => {
                invocation.max_depth = args
                    .next()
                    .ok_or("--max-depth needs a value")?
                    .parse()
                    .map_err(|e| format!("bad --max-depth: {e}"))?;
            }
            "--force" => invocation.force = true,
            "--source" => {
                let spec = args.next().ok_or("--source needs source@version")?;
                let (source, version) = spec
                    .split_once('@')
                    .ok_or("--source expects source@version")?;
                invocation.source = Some((source.to_string(), version.to_string()));
            }
            other => return Err(format!("unknown argument {other:?}")),
        }
    }
    Ok(invocation)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let invocation = match parse_args() {
        Ok(inv) => inv,
        Err(message) => {
            eprintln!("newswire-ingest: {message}");
            return ExitCode::from(2);
        }
    };

    let engine = match CrawlEngine::open(&invocation.data_dir).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("newswire-ingest: failed to open engine: {e}");
            return ExitCode::from(4);
        }
    };

    // Mirror telemetry onto the log while the batch runs.
    let mut events = engine.bus().subscribe();
    let log_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TelemetryEvent::Milestone { name, .. } => log::info!("milestone: {name}"),
                TelemetryEvent::Problem { code, message, .. } => {
                    log::warn!("problem [{code}]: {message}");
                }
                TelemetryEvent::Shutdown { .. } => break,
                _ => {}
            }
        }
    });

    let outcome = match &invocation.source {
        Some((source, version)) => engine
            .start_ingestion(source, version, invocation.force)
            .await
            .map(|run_id| log::info!("ingestion run {run_id} completed")),
        None => engine
            .run_geography(invocation.max_depth, invocation.force)
            .await,
    };

    let code = match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            engine.bus().publish(TelemetryEvent::problem(
                None,
                e.severity(),
                e.code(),
                e.to_string(),
                None,
            ));
            eprintln!("newswire-ingest: {e}");
            match e {
                CrawlError::InvalidInput(_) => ExitCode::from(2),
                CrawlError::PreconditionFailed { .. } => ExitCode::from(3),
                _ => ExitCode::from(4),
            }
        }
    };

    engine
        .bus()
        .shutdown(newswire_crawler::events::ShutdownReason::Completed);
    let _ = log_task.await;
    code
}
