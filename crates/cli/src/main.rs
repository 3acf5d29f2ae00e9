//! ShopGuard CLI - operator commands against the daemon's JSON-RPC surface

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9531";

#[derive(Parser)]
#[command(name = "shopguard")]
#[command(about = "ShopGuard resilience layer CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "SHOPGUARD_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue, circuit and outbox status
    Status,

    /// Queue an operation for delivery
    Enqueue {
        /// Operation kind (diagnostic, device, backup, report, client, quote, appointment)
        kind: String,

        /// Payload as JSON string
        #[arg(long)]
        payload: String,

        /// Priority: low, medium, high
        #[arg(short, long, default_value = "medium")]
        priority: String,
    },

    /// List permanently failed operations
    Failed,

    /// Move failed operations back to pending
    Retry {
        /// Operation ID
        #[arg(required_unless_present = "all")]
        operation_id: Option<String>,

        /// Retry every failed operation
        #[arg(long, conflicts_with = "operation_id")]
        all: bool,
    },

    /// Delete a queued operation
    Remove {
        /// Operation ID
        operation_id: String,
    },

    /// Run a drain pass now
    Drain,

    /// Show circuit breakers
    Circuits {
        /// Reset this circuit to closed
        #[arg(long)]
        reset: Option<String>,
    },

    /// Rollout flags
    Flag {
        #[command(subcommand)]
        command: FlagCommands,
    },

    /// Canary rollouts
    Canary {
        #[command(subcommand)]
        command: CanaryCommands,
    },

    /// Run maintenance operations
    Maintenance {
        /// Force VACUUM even if not needed
        #[arg(long)]
        force_vacuum: bool,
    },
}

#[derive(Subcommand)]
enum FlagCommands {
    /// Create or update a flag (re-enables it)
    Set {
        name: String,

        /// Rollout percentage (0-100)
        #[arg(short, long)]
        percentage: u32,

        /// Targeting rules as JSON array
        #[arg(long)]
        rules: Option<String>,
    },

    /// List flags
    List,

    /// Evaluate a flag for a caller
    Eval {
        name: String,

        /// Stable caller identifier
        #[arg(long)]
        caller: Option<String>,

        /// Caller attributes as key=value
        #[arg(long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum CanaryCommands {
    /// Start a canary rollout
    Start {
        /// Version being rolled out
        version: String,

        /// Health check target (URL)
        #[arg(long)]
        target: String,

        /// Initial cohort percentage
        #[arg(long, default_value = "10")]
        percentage: u32,

        /// Error rate (percent) that triggers rollback
        #[arg(long, default_value = "5.0")]
        threshold: f64,

        /// Monitoring window in seconds
        #[arg(long, default_value = "300")]
        duration: u64,

        /// Sample interval in seconds
        #[arg(long, default_value = "30")]
        interval: u64,
    },

    /// Show canary state
    State {
        /// Flag name (canary_<version>)
        flag: Option<String>,
    },
}

fn parse_attribute(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

#[derive(Tabled)]
struct OperationRow {
    id: String,
    kind: String,
    priority: String,
    status: String,
    attempts: String,
    last_error: String,
}

impl OperationRow {
    fn from_value(op: &Value) -> Self {
        Self {
            id: text(&op["id"]),
            kind: text(&op["kind"]),
            priority: text(&op["priority"]),
            status: text(&op["status"]),
            attempts: format!("{}/{}", op["attempts"], op["max_attempts"]),
            last_error: text(&op["last_error"]),
        }
    }
}

#[derive(Tabled)]
struct CircuitRow {
    name: String,
    state: String,
    failures: String,
    retry_after_ms: String,
}

#[derive(Tabled)]
struct FlagRow {
    name: String,
    enabled: String,
    percentage: String,
    rules: usize,
}

#[derive(Tabled)]
struct CanaryRow {
    flag: String,
    version: String,
    phase: String,
    samples: usize,
    reason: String,
}

/// Display form of a JSON scalar ("-" for null)
fn text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_operations(ops: &[Value]) {
    if ops.is_empty() {
        println!("{}", "No operations".yellow());
        return;
    }
    let rows: Vec<OperationRow> = ops.iter().map(OperationRow::from_value).collect();
    println!("{}", Table::new(rows));
}

fn colored_state(state: &str) -> String {
    match state {
        "CLOSED" => state.green().to_string(),
        "HALF_OPEN" => state.yellow().to_string(),
        _ => state.red().to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let url = cli.rpc_url.as_str();

    match cli.command {
        Commands::Status => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match call_rpc(url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    let queue = &stats["queue"];
                    println!("  {} {}", "RPC URL:".bold(), url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Pending:".bold(), queue["pending"]);
                    println!("  {} {}", "Processing:".bold(), queue["processing"]);
                    println!("  {} {}", "Completed:".bold(), queue["completed"]);
                    println!("  {} {}", "Failed:".bold(), queue["failed"]);
                    println!();
                    println!("  {} {}", "Open circuits:".bold(), stats["open_circuits"]);
                    println!(
                        "  {} {:.2}%",
                        "Error rate:".bold(),
                        stats["metrics"]["error_rate"].as_f64().unwrap_or(0.0)
                    );
                    println!(
                        "  {} sent {} / failed {} / dropped {}",
                        "Notifications:".bold(),
                        stats["outbox"]["sent"],
                        stats["outbox"]["failed"],
                        stats["outbox"]["dropped"]
                    );
                    println!(
                        "  {} {:.2} MB",
                        "DB Size:".bold(),
                        stats["db"]["db_size_mb"].as_f64().unwrap_or(0.0)
                    );
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Enqueue {
            kind,
            payload,
            priority,
        } => {
            let payload_json: Value =
                serde_json::from_str(&payload).context("Invalid JSON payload")?;
            let params = json!({
                "kind": kind,
                "payload": payload_json,
                "priority": priority,
            });

            let result = call_rpc(url, "queue.enqueue.v1", params).await?;
            println!("{}", "✓ Operation queued".green().bold());
            println!("  {} {}", "ID:".bold(), text(&result["operation_id"]));
            println!("  {} {}", "Status:".bold(), text(&result["status"]));
        }

        Commands::Failed => {
            let result = call_rpc(url, "queue.failed.v1", json!({})).await?;
            let ops = result["operations"].as_array().cloned().unwrap_or_default();
            println!("{}", format!("Failed operations ({})", ops.len()).cyan().bold());
            print_operations(&ops);
        }

        Commands::Retry { operation_id, all } => {
            if all {
                let result = call_rpc(url, "queue.retry_all.v1", json!({})).await?;
                println!(
                    "{}",
                    format!("✓ {} operations requeued", result["requeued"]).green().bold()
                );
            } else if let Some(id) = operation_id {
                let op = call_rpc(url, "queue.retry.v1", json!({ "operation_id": id })).await?;
                println!("{}", format!("✓ Operation {} requeued", id).green().bold());
                print_operations(&[op]);
            }
        }

        Commands::Remove { operation_id } => {
            call_rpc(url, "queue.remove.v1", json!({ "operation_id": operation_id })).await?;
            println!("{}", format!("✓ Operation {} removed", operation_id).green().bold());
        }

        Commands::Drain => {
            let report = call_rpc(url, "queue.drain.v1", json!({})).await?;
            if report["skipped_offline"].as_bool().unwrap_or(false) {
                println!("{}", "○ Offline, drain skipped".yellow());
            } else {
                println!("{}", "✓ Drain pass finished".green().bold());
                for key in ["attempted", "completed", "retried", "failed", "deferred"] {
                    println!("  {} {}", format!("{}:", key).bold(), report[key]);
                }
            }
        }

        Commands::Circuits { reset } => {
            if let Some(name) = reset {
                let result = call_rpc(url, "circuit.reset.v1", json!({ "name": name })).await?;
                if result["reset"].as_bool().unwrap_or(false) {
                    println!("{}", format!("✓ Circuit {} reset", name).green().bold());
                } else {
                    println!("{}", format!("○ Circuit {} has no state yet", name).yellow());
                }
            }

            let result = call_rpc(url, "circuit.status.v1", json!({})).await?;
            let circuits = result["circuits"].as_array().cloned().unwrap_or_default();
            if circuits.is_empty() {
                println!("{}", "No circuits have seen traffic".yellow());
            } else {
                let rows: Vec<CircuitRow> = circuits
                    .iter()
                    .map(|c| CircuitRow {
                        name: text(&c["name"]),
                        state: colored_state(c["state"].as_str().unwrap_or("-")),
                        failures: format!(
                            "{}/{}",
                            c["consecutive_failures"], c["failure_threshold"]
                        ),
                        retry_after_ms: text(&c["retry_after_ms"]),
                    })
                    .collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Flag { command } => match command {
            FlagCommands::Set {
                name,
                percentage,
                rules,
            } => {
                let rules: Value = match rules {
                    Some(raw) => serde_json::from_str(&raw).context("Invalid JSON rules")?,
                    None => json!([]),
                };
                let params = json!({
                    "name": name,
                    "rollout_percentage": percentage,
                    "targeting_rules": rules,
                });
                let flag = call_rpc(url, "flag.upsert.v1", params).await?;
                println!(
                    "{}",
                    format!("✓ Flag {} at {}%", name, flag["rollout_percentage"])
                        .green()
                        .bold()
                );
            }
            FlagCommands::List => {
                let result = call_rpc(url, "flag.list.v1", json!({})).await?;
                let flags = result["flags"].as_array().cloned().unwrap_or_default();
                let rows: Vec<FlagRow> = flags
                    .iter()
                    .map(|f| FlagRow {
                        name: text(&f["name"]),
                        enabled: text(&f["enabled"]),
                        percentage: format!("{}%", f["rollout_percentage"]),
                        rules: f["targeting_rules"].as_array().map_or(0, Vec::len),
                    })
                    .collect();
                println!("{}", Table::new(rows));
            }
            FlagCommands::Eval {
                name,
                caller,
                attributes,
            } => {
                let attributes: serde_json::Map<String, Value> = attributes
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                let params = json!({
                    "name": name,
                    "caller": { "caller_id": caller, "attributes": attributes },
                });
                let result = call_rpc(url, "flag.evaluate.v1", params).await?;
                if result["enabled"].as_bool().unwrap_or(false) {
                    println!("{} {}", name.bold(), "ENABLED".green());
                } else {
                    println!("{} {}", name.bold(), "DISABLED".red());
                }
            }
        },

        Commands::Canary { command } => match command {
            CanaryCommands::Start {
                version,
                target,
                percentage,
                threshold,
                duration,
                interval,
            } => {
                let params = json!({
                    "version": version,
                    "canary_percentage": percentage,
                    "health_check_target": target,
                    "rollback_error_rate_threshold": threshold,
                    "monitoring_duration_secs": duration,
                    "sample_interval_secs": interval,
                });
                let state = call_rpc(url, "canary.start.v1", params).await?;
                println!(
                    "{}",
                    format!("✓ Canary {} started at {}%", version, percentage)
                        .green()
                        .bold()
                );
                println!("  {} {}", "Flag:".bold(), text(&state["flag_name"]));
            }
            CanaryCommands::State { flag } => {
                let result = call_rpc(url, "canary.state.v1", json!({ "flag": flag })).await?;
                let canaries = result["canaries"].as_array().cloned().unwrap_or_default();
                if canaries.is_empty() {
                    println!("{}", "No canaries".yellow());
                } else {
                    let rows: Vec<CanaryRow> = canaries
                        .iter()
                        .map(|c| CanaryRow {
                            flag: text(&c["flag_name"]),
                            version: text(&c["version"]),
                            phase: text(&c["phase"]),
                            samples: c["samples"].as_array().map_or(0, Vec::len),
                            reason: text(&c["reason"]),
                        })
                        .collect();
                    println!("{}", Table::new(rows));
                }
            }
        },

        Commands::Maintenance { force_vacuum } => {
            println!("{}", "Running maintenance...".cyan().bold());
            println!();

            let params = json!({ "force_vacuum": force_vacuum });
            match call_rpc(url, "admin.maintenance.v1", params).await {
                Ok(result) => {
                    println!("  ✓ Maintenance completed");
                    if result["vacuum_run"].as_bool().unwrap_or(false) {
                        println!("  {} VACUUM executed", "✓".green());
                    } else {
                        println!("  ○ VACUUM skipped (not needed)");
                    }
                    let size_before_mb =
                        result["db_size_before"].as_i64().unwrap_or(0) as f64 / (1024.0 * 1024.0);
                    let size_after_mb =
                        result["db_size_after"].as_i64().unwrap_or(0) as f64 / (1024.0 * 1024.0);
                    println!(
                        "  {} {:.2} MB → {:.2} MB",
                        "DB Size:".bold(),
                        size_before_mb,
                        size_after_mb
                    );
                    println!(
                        "  {} {} operations kept",
                        "Queue:".bold(),
                        result["stats"]["operation_count"]
                    );
                }
                Err(e) => {
                    println!("  {} Maintenance failed: {}", "✗".red(), e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_retry_requires_id_or_all() {
        assert!(Cli::try_parse_from(["shopguard", "retry"]).is_err());
        assert!(Cli::try_parse_from(["shopguard", "retry", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["shopguard", "retry", "op-1"]).is_ok());
    }

    #[test]
    fn test_parse_attribute() {
        assert_eq!(
            parse_attribute("shop=north"),
            Ok(("shop".to_string(), "north".to_string()))
        );
        assert!(parse_attribute("north").is_err());
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(text(&Value::Null), "-");
        assert_eq!(text(&json!("PENDING")), "PENDING");
        assert_eq!(text(&json!(3)), "3");
    }
}
