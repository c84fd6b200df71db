use agrisurvey_rs::api_client::ApiConfig;
use agrisurvey_rs::connectivity::ConnectivityTracker;
use agrisurvey_rs::models::{FileBlob, Resource, ResourceType, Submission};
use agrisurvey_rs::sync::SyncOutcome;
use agrisurvey_rs::OfflineClient;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, rename_all = "snake_case")]
struct Args {
    /// Command to execute: status, list_queue, create, update, delete, sync, clear_queue
    #[arg(short, long)]
    command: String,

    /// API base URL (or set AGRISURVEY_API_URL)
    #[arg(long, name = "api_url")]
    api_url: Option<String>,

    /// Bearer token (or set AGRISURVEY_ACCESS_TOKEN)
    #[arg(long, name = "access_token")]
    access_token: Option<String>,

    /// Queue database file (or set AGRISURVEY_QUEUE_PATH)
    #[arg(long, name = "queue_path")]
    queue_path: Option<String>,

    /// Resource type: farm, crop, soil-sample, water-sample, pest-disease
    #[arg(short, long)]
    resource: Option<String>,

    /// Record fields as JSON (for create and update)
    #[arg(long)]
    json: Option<String>,

    /// Photo to attach (for create and update)
    #[arg(long)]
    photo: Option<String>,

    /// Target record id (for update and delete)
    #[arg(long)]
    id: Option<String>,

    /// Treat the server as unreachable for this invocation
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Log level
    #[arg(long, name = "log_level", default_value = "info")]
    log_level: String,
}

// example usage:
// ./target/release/agrisurvey_cli --command status
// ./target/release/agrisurvey_cli --command create --resource farm --json '{"route": "b5a8e1c2-7f0e-4b8e-9d6a-2c4e5f7a8b90", "name": "Hillside", "owner_name": "A. Mwangi", "size_ha": 4.5}' --offline
// ./target/release/agrisurvey_cli --command create --resource soil-sample --json '{"farm": "temp-1712345678901-4f9a1c2be", "sample_date": "2024-03-02", "pH": 6.4}' --photo ./core.jpg --offline
// ./target/release/agrisurvey_cli --command update --resource crop --id 42 --json '{"farm": "7", "crop_type": "Maize", "planting_date": "2024-03-01"}'
// ./target/release/agrisurvey_cli --command delete --resource water-sample --id 42
// ./target/release/agrisurvey_cli --command list_queue
// ./target/release/agrisurvey_cli --command sync
// ./target/release/agrisurvey_cli --command clear_queue

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!("agrisurvey_rs={}", args.log_level))
        .init();

    let mut config = ApiConfig::from_env()?;
    if let Some(url) = &args.api_url {
        config.set_api_url(url)?;
    }
    if let Some(token) = &args.access_token {
        config.access_token = Some(token.clone());
    }
    if let Some(path) = &args.queue_path {
        config.queue_path = path.into();
    }

    let connectivity = ConnectivityTracker::new(!args.offline);
    let client = OfflineClient::from_config(config, connectivity)?;
    if !args.offline {
        client.probe_connectivity().await;
    }

    match args.command.as_str() {
        "status" => {
            let status = serde_json::json!({
                "online": client.is_online(),
                "pending": client.queue_count().await?,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        "list_queue" => {
            let items: Vec<serde_json::Value> = client
                .queued_items()
                .await?
                .iter()
                .map(|record| {
                    serde_json::json!({
                        "id": record.id,
                        "resource_type": record.resource_type,
                        "action": record.action,
                        "target_id": record.mutation.target_id(),
                        "temp_id": record.temp_id,
                        "enqueued_at": record.enqueued_at,
                        "retry_count": record.retry_count,
                        "last_error": record.last_error,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        "create" => {
            let payload = parse_submission(&args)?;
            let response = client.create(payload).await?;
            if response.is_offline() {
                info!("Server unreachable, create queued for sync");
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "update" => {
            let id = args.id.clone().ok_or_else(|| anyhow!("--id required for update"))?;
            let payload = parse_submission(&args)?;
            let response = client.update(id, payload).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "delete" => {
            let resource_type = parse_resource(&args)?;
            let id = args.id.clone().ok_or_else(|| anyhow!("--id required for delete"))?;
            let response = client.delete(resource_type, id).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "sync" => {
            let mut events = client.subscribe_sync_status();
            let outcome = client.trigger_sync().await?;

            loop {
                match events.try_recv() {
                    Ok(status) => println!("{}", serde_json::to_string(&status)?),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("{} status events skipped", skipped);
                    }
                    Err(_) => break,
                }
            }

            match outcome {
                SyncOutcome::Completed(report) => {
                    if report.failed > 0 {
                        eprintln!(
                            "{} of {} mutations failed and remain queued",
                            report.failed, report.total
                        );
                        std::process::exit(1);
                    }
                }
                SyncOutcome::Skipped(reason) => {
                    eprintln!("Sync skipped: {:?}", reason);
                    std::process::exit(1);
                }
                SyncOutcome::Aborted(e) => {
                    eprintln!("Sync aborted: {}", e);
                    std::process::exit(1);
                }
            }
        }
        "clear_queue" => {
            let discarded = client.clear_queue().await?;
            println!("Discarded {} pending mutations", discarded);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_resource(args: &Args) -> Result<ResourceType> {
    let resource = args
        .resource
        .as_deref()
        .ok_or_else(|| anyhow!("--resource required for {}", args.command))?;
    resource.parse::<ResourceType>().map_err(|e| anyhow!(e))
}

fn parse_submission(args: &Args) -> Result<Submission> {
    let resource_type = parse_resource(args)?;
    let json = args
        .json
        .as_deref()
        .ok_or_else(|| anyhow!("--json required for {}", args.command))?;
    let value: serde_json::Value = serde_json::from_str(json).context("Invalid --json")?;
    let resource = Resource::from_value(resource_type, value)
        .with_context(|| format!("--json is not a valid {}", resource_type))?;

    let photo = args.photo.as_ref().map(FileBlob::from_path);
    if photo.is_some() && !resource.accepts_photo() {
        return Err(anyhow!("{} records do not take a photo", resource_type));
    }
    Ok(resource.replace_photo(photo).0)
}
