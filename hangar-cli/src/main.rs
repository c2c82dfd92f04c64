//! `hangar` - command-line probe for console resource endpoints.
//!
//! Reads go through the same sync engine the console uses, so retries,
//! coalescing and debounced search behave exactly as they do there.

mod config;
mod telemetry;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use hangar_client::{build_http_client, ListParams, Lookup, ResourceClient, RestTransport};
use hangar_core::EntityKind;
use hangar_sync::{SyncEngine, TracingSink};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::config::CliConfig;

type JsonClient = ResourceClient<RestTransport<Value, Value>>;

#[derive(Debug, Parser)]
#[command(name = "hangar", version, about = "Query console resources through the Hangar sync engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "HANGAR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// API base URL; overrides the configuration file.
    #[arg(long, env = "HANGAR_API_URL", global = true)]
    base_url: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "HANGAR_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List records of an entity.
    List {
        #[arg(value_parser = parse_entity)]
        entity: EntityKind,
        #[command(flatten)]
        filters: ListArgs,
    },
    /// Fetch one record by id.
    Get {
        #[arg(value_parser = parse_entity)]
        entity: EntityKind,
        id: String,
    },
    /// Read search terms from stdin, one per line, and list matches once
    /// typing settles.
    WatchSearch {
        #[arg(value_parser = parse_entity)]
        entity: EntityKind,
        #[command(flatten)]
        filters: ListArgs,
    },
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    per_page: Option<u32>,
    /// Extra filter as `name=value`; repeatable.
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
    #[arg(long)]
    include_deleted: bool,
}

impl ListArgs {
    fn to_params(&self) -> ListParams {
        let mut params = ListParams::new().include_deleted(self.include_deleted);
        if let Some(search) = &self.search {
            params = params.search(search);
        }
        if let Some(page) = self.page {
            params = params.page(page);
        }
        if let Some(per_page) = self.per_page {
            params = params.per_page(per_page);
        }
        for (name, value) in &self.filters {
            params = params.filter(name.clone(), value.clone());
        }
        params
    }
}

fn parse_entity(raw: &str) -> Result<EntityKind, String> {
    EntityKind::from_namespace(raw).ok_or_else(|| {
        let known: Vec<&str> = EntityKind::ALL.iter().map(|k| k.namespace()).collect();
        format!("unknown entity '{}', expected one of: {}", raw, known.join(", "))
    })
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("filter '{}' must look like name=value", raw)),
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json).wrap_err("failed to initialise logging")?;

    let config = CliConfig::load(cli.config.as_deref(), cli.base_url.as_deref())
        .wrap_err("failed to load configuration")?;
    let http = build_http_client(config.request_timeout(), &config.auth)?;
    let engine = SyncEngine::new(config.sync.clone(), Arc::new(TracingSink));
    info!(base_url = %config.api_base_url, "hangar ready");

    let client = |entity: EntityKind| -> color_eyre::Result<JsonClient> {
        let transport = RestTransport::new(http.clone(), &config.api_base_url, entity.namespace())?;
        Ok(ResourceClient::build(entity, transport, &engine))
    };

    match cli.command {
        Command::List { entity, filters } => {
            let page = client(entity)?.list(&filters.to_params()).await?;
            print_json(page.as_ref())?;
        }
        Command::Get { entity, id } => match client(entity)?.get_by_id(&id).await? {
            Lookup::Found(record) => print_json(record.as_ref())?,
            Lookup::Disabled => return Err(eyre!("an id is required")),
        },
        Command::WatchSearch { entity, filters } => {
            watch_search(client(entity)?, &engine, filters.to_params()).await?;
        }
    }

    debug!(stats = ?engine.stats(), "done");
    Ok(())
}

/// Debounce stdin lines into search terms and list each settled term.
async fn watch_search(client: JsonClient, engine: &SyncEngine, base: ListParams) -> color_eyre::Result<()> {
    let mut search = engine.debounced::<String>();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if open => match line? {
                Some(line) => search.input(line),
                None => open = false,
            },
            term = search.settled() => {
                let Some(term) = term else { break };
                let params = base.clone().search(&term);
                let page = client.list(&params).await?;
                info!(term = %term, matches = page.len(), "search settled");
                print_json(page.as_ref())?;
                engine.collect_garbage();
            }
            _ = tokio::time::sleep(engine.config().debounce.quiet_period() * 2), if !open => break,
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
