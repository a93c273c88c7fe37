use anyhow::{Context, bail};
use distributed_backup::peer::protocol::*;

const COMMANDS: [&str; 5] = ["BACKUP", "RESTORE", "DELETE", "RECLAIM", "STATE"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} [<peer_url>] <COMMAND> [args]", args[0]);
        eprintln!("Commands:");
        eprintln!("  BACKUP <path> <replication degree>");
        eprintln!("  RESTORE <path>");
        eprintln!("  DELETE <path>");
        eprintln!("  RECLAIM <max bytes>");
        eprintln!("  STATE");
        eprintln!("Without <peer_url> the PEER_URL environment variable is used.");

        std::process::exit(1);
    }

    let (peer_url, command) = if COMMANDS.contains(&args[1].to_uppercase().as_str()) {
        let url = std::env::var("PEER_URL").unwrap_or_else(|_| "http://127.0.0.1:7000".to_string());
        (url, &args[1..])
    } else {
        (args[1].clone(), &args[2..])
    };

    let peer_url = normalize_url(&peer_url);
    let client = reqwest::Client::new();

    let Some(name) = command.first() else {
        bail!("missing command");
    };

    match name.to_uppercase().as_str() {
        "BACKUP" => {
            let path = argument(command, 1, "path")?;
            let replication_degree = argument(command, 2, "replication degree")?
                .parse::<u32>()
                .context("replication degree must be a positive number")?;
            let req = BackupRequest {
                path: absolute(path),
                replication_degree,
            };
            post(&client, &peer_url, ENDPOINT_BACKUP, &req).await
        }
        "RESTORE" => {
            let req = PathRequest {
                path: absolute(argument(command, 1, "path")?),
            };
            post(&client, &peer_url, ENDPOINT_RESTORE, &req).await
        }
        "DELETE" => {
            let req = PathRequest {
                path: absolute(argument(command, 1, "path")?),
            };
            post(&client, &peer_url, ENDPOINT_DELETE, &req).await
        }
        "RECLAIM" => {
            let max_bytes = argument(command, 1, "max bytes")?
                .parse::<u64>()
                .context("max bytes must be a number")?;
            post(&client, &peer_url, ENDPOINT_RECLAIM, &ReclaimRequest { max_bytes }).await
        }
        "STATE" => {
            let url = format!("{}{}", peer_url, ENDPOINT_STATE);
            let resp = client.get(url).send().await?.error_for_status()?;
            let state: StateResponse = resp.json().await?;
            println!("{}", state.state);
            Ok(())
        }
        other => bail!("unknown command {}", other),
    }
}

async fn post<T: serde::Serialize>(
    client: &reqwest::Client,
    peer_url: &str,
    endpoint: &str,
    body: &T,
) -> anyhow::Result<()> {
    let url = format!("{}{}", peer_url, endpoint);
    tracing::debug!("POST {}", url);

    let resp = client.post(url).json(body).send().await?;
    let status = resp.status();
    let response: CommandResponse = resp
        .json()
        .await
        .with_context(|| format!("invalid response from peer (HTTP {})", status))?;

    match (response.success, response.detail) {
        (true, Some(detail)) => println!("Success: {}", detail),
        (true, None) => println!("Success"),
        (false, Some(detail)) => println!("Failure: {}", detail),
        (false, None) => println!("Failure"),
    }

    Ok(())
}

fn argument<'a>(command: &'a [String], index: usize, name: &str) -> anyhow::Result<&'a str> {
    command
        .get(index)
        .map(String::as_str)
        .with_context(|| format!("{} expects a {} argument", command[0], name))
}

/// Relative paths resolve against the client's working directory.
fn absolute(path: &str) -> String {
    std::path::absolute(path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.to_string())
}

fn normalize_url(candidate: &str) -> String {
    let trimmed = candidate.trim();
    let normalized = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    normalized.trim_end_matches('/').to_string()
}
