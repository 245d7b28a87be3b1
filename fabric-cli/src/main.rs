//! Operator CLI for the cluster control plane (§2 crate table: serve,
//! status, settings, models): a clap-subcommand layout with config/logging
//! bootstrap (`config::load_and_apply` + a tracing init call before
//! `Args::parse`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fabric_cli::client::FabricClient;
use fabric_cli::{auto_start, serve_cmd};
use fabric_store::{ExecModeOverride, RuntimeOverride};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8500";

#[derive(Parser, Debug)]
#[command(name = "fabric")]
#[command(about = "Operator CLI for the fabric cluster control plane")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Control-plane base URL (default http://127.0.0.1:8500 or FABRIC_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Do not auto-start the server when it isn't reachable
    #[arg(long, global = true)]
    no_auto_start: bool,

    /// Output raw JSON instead of a human summary
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control-plane HTTP server in the foreground
    Serve(ServeArgs),
    /// Print cluster status (§4.7)
    Status(StatusArgs),
    /// Inventory / exec-mode settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Managed-model CRUD and lifecycle
    Models {
        #[command(subcommand)]
        action: ModelsCommand,
    },
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Listen address (default 127.0.0.1:8500)
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
    #[arg(long, value_name = "PATH")]
    inventory: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    models_file: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    recipes_dir: Option<PathBuf>,
    #[arg(long, value_name = "ID")]
    node_id: Option<String>,
    #[arg(long, env = "FABRIC_AGENT_TOKEN", value_name = "TOKEN")]
    agent_token: Option<String>,
    #[arg(long, default_value_t = 10)]
    status_ttl_secs: u64,
}

#[derive(clap::Args, Debug)]
struct StatusArgs {
    /// "full" (default) or "summary"
    #[arg(long, value_name = "VIEW")]
    view: Option<String>,
    /// Comma-separated: metrics,storage,dgx
    #[arg(long, value_name = "FLAGS")]
    include: Option<String>,
    /// Force a synchronous refresh, bypassing the TTL cache
    #[arg(long)]
    force: bool,
    /// Accept a stale cached value rather than blocking on refresh
    #[arg(long)]
    allow_stale: bool,
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Show the current exec-mode / inventory override
    Get,
    /// Apply a new exec-mode and/or inventory file override
    Set {
        #[arg(long, value_enum)]
        exec_mode: Option<ExecModeArg>,
        #[arg(long, value_name = "PATH")]
        inventory_file: Option<PathBuf>,
    },
    /// Write a fresh inventory from a YAML file describing cluster nodes, and point settings at it
    Wizard {
        /// YAML file with `nodes: [...]` (plus optional `rdma`/`agent` blocks)
        #[arg(value_name = "PATH")]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ExecModeArg {
    Auto,
    Local,
    Agent,
}

impl From<ExecModeArg> for ExecModeOverride {
    fn from(value: ExecModeArg) -> Self {
        match value {
            ExecModeArg::Auto => ExecModeOverride::Auto,
            ExecModeArg::Local => ExecModeOverride::Local,
            ExecModeArg::Agent => ExecModeOverride::Agent,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ModelsCommand {
    /// List managed models and their live process state
    List,
    /// Unload a specific model, or every model with --all
    Unload {
        #[arg(value_name = "MODEL_ID", required_unless_present = "all")]
        model_id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Create or update a managed model from a JSON/YAML request file
    Set {
        #[arg(value_name = "PATH")]
        file: PathBuf,
    },
    /// Delete a managed model entry (unloading it first)
    Delete {
        #[arg(value_name = "MODEL_ID")]
        model_id: String,
    },
}

fn resolve_server_url(args: &Args) -> String {
    args.server.clone().unwrap_or_else(|| std::env::var("FABRIC_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()))
}

fn print_value(value: &serde_json::Value, json: bool) {
    let rendered = if json {
        serde_json::to_string(value).unwrap_or_default()
    } else {
        serde_json::to_string_pretty(value).unwrap_or_default()
    };
    println!("{rendered}");
}

fn read_request_file(path: &PathBuf) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fabric_config::load_and_apply("fabric", None::<&std::path::Path>).ok();
    let json_logs = matches!(std::env::var("FABRIC_LOG_FORMAT").as_deref(), Ok("json"));
    let _tracing_guard = fabric_config::init_tracing("fabric", json_logs);

    let args = Args::parse();

    if let Command::Serve(sa) = &args.cmd {
        let opts = serve_cmd::ServeOptions {
            addr: sa.addr.clone(),
            inventory_path: sa.inventory.clone(),
            models_path: sa.models_file.clone(),
            overrides_path: None,
            group_policy_path: None,
            recipes_dir: sa.recipes_dir.clone(),
            local_node_id: sa.node_id.clone(),
            agent_bearer_token: sa.agent_token.clone(),
            status_ttl_secs: sa.status_ttl_secs,
        };
        if let Err(e) = serve_cmd::run(opts).await {
            eprintln!("fabric: serve error: {e}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let server_url = resolve_server_url(&args);
    let client = FabricClient::new(server_url.clone());

    if !args.no_auto_start {
        if let Err(e) = auto_start::ensure_server_or_spawn(client.http(), &server_url).await {
            eprintln!("fabric: {e}");
            std::process::exit(1);
        }
    }

    let result = match &args.cmd {
        Command::Serve(_) => unreachable!("handled above"),
        Command::Status(sa) => client.status(sa.view.as_deref(), sa.include.as_deref(), sa.force, sa.allow_stale).await,
        Command::Settings { action } => match action {
            SettingsCommand::Get => client.get_settings().await,
            SettingsCommand::Set { exec_mode, inventory_file } => {
                let current = client.get_settings().await?;
                let exec_mode = exec_mode
                    .map(|m| ExecModeOverride::from(*m))
                    .or_else(|| current.get("execMode").and_then(|v| v.as_str()).and_then(parse_exec_mode))
                    .unwrap_or_default();
                let inventory_file = inventory_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .or_else(|| current.get("inventoryFile").and_then(|v| v.as_str()).map(str::to_string));
                client.put_settings(&RuntimeOverride { exec_mode, inventory_file }).await
            }
            SettingsCommand::Wizard { file } => {
                let body = read_request_file(file)?;
                client.settings_wizard(&body).await
            }
        },
        Command::Models { action } => match action {
            ModelsCommand::List => client.list_models().await,
            ModelsCommand::Unload { model_id, all } => {
                if *all {
                    client.unload_all().await
                } else {
                    client.unload_one(model_id.as_deref().expect("clap enforces model_id or --all")).await
                }
            }
            ModelsCommand::Set { file } => {
                let body = read_request_file(file)?;
                client.upsert_model(&body).await
            }
            ModelsCommand::Delete { model_id } => client.delete_model(model_id).await,
        },
    };

    match result {
        Ok(value) => {
            print_value(&value, args.json);
            Ok(())
        }
        Err(e) => {
            eprintln!("fabric: {e}");
            std::process::exit(1);
        }
    }
}

fn parse_exec_mode(raw: &str) -> Option<ExecModeOverride> {
    match raw {
        "auto" => Some(ExecModeOverride::Auto),
        "local" => Some(ExecModeOverride::Local),
        "agent" => Some(ExecModeOverride::Agent),
        _ => None,
    }
}
