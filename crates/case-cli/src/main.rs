// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;

use anyhow::{Context, Result};
use case_cli::commands::{self, CallerIdentity};
use case_cli::format::{self, OutputFormat};
use case_committee::calibrate::WeightsFile;
use case_resolver::ResolverConfig;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "case", version, about = "Case orchestration operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format.
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormatArg,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormatArg {
    Json,
    Table,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(v: OutputFormatArg) -> Self {
        match v {
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Table => OutputFormat::Table,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List cases from a running case-daemon.
    List {
        /// The case-daemon's base URL.
        #[arg(long, default_value = "http://localhost:8080")]
        daemon_url: String,
        /// Caller role: SalesUser | SalesManager | OpsAuditor.
        #[arg(long, default_value = "OpsAuditor")]
        role: String,
        /// Caller tenant id.
        #[arg(long)]
        tenant_id: String,
        /// Caller user id.
        #[arg(long)]
        user_id: String,
        /// Filter by status.
        #[arg(long)]
        status: Option<String>,
        /// Filter by customer substring.
        #[arg(long)]
        customer: Option<String>,
    },

    /// Show one case and its working order.
    Show {
        /// The case-daemon's base URL.
        #[arg(long, default_value = "http://localhost:8080")]
        daemon_url: String,
        #[arg(long, default_value = "OpsAuditor")]
        role: String,
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        user_id: String,
        /// The case id to show.
        case_id: Uuid,
    },

    /// Show a case's audit trail.
    Audit {
        /// The case-daemon's base URL.
        #[arg(long, default_value = "http://localhost:8080")]
        daemon_url: String,
        #[arg(long, default_value = "OpsAuditor")]
        role: String,
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        user_id: String,
        /// The case id to audit.
        case_id: Uuid,
    },

    /// Run the extractor alone against a local file, without a daemon.
    Parse {
        /// Path to the spreadsheet file.
        file: PathBuf,
        /// Tenant id to stamp the extracted order with.
        #[arg(long, default_value = "dry-run-tenant")]
        tenant_id: String,
        /// Decoder service endpoint, required for non-CSV files.
        #[arg(long)]
        decoder_endpoint: Option<String>,
    },

    /// Run the extractor then the committee against a local file.
    Committee {
        /// Path to the spreadsheet file.
        file: PathBuf,
        #[arg(long, default_value = "dry-run-tenant")]
        tenant_id: String,
        #[arg(long)]
        decoder_endpoint: Option<String>,
        /// Comma-separated `vendor_family/model` provider identifiers.
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
        /// Base URL each provider id is joined onto.
        #[arg(long)]
        committee_endpoint_base: String,
        /// Path to a saved committee weights file, if any.
        #[arg(long)]
        weights_file: Option<PathBuf>,
        /// Selection/aggregation ambiguity margin.
        #[arg(long, default_value_t = 0.1)]
        ambiguity_margin: f64,
        /// Deterministic provider-selection seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Run the resolver against an already-extracted order and a local
    /// catalog JSON file.
    Resolve {
        /// Path to a `CanonicalOrder` JSON file (e.g. from `parse --format json`).
        order_file: PathBuf,
        /// Path to a `{"customers": [...], "items": [...]}` catalog file.
        catalog_file: PathBuf,
    },

    /// Print a JSON schema for a case-orchestration type.
    Schema {
        /// Which schema to print.
        #[arg(value_enum)]
        kind: SchemaArg,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum SchemaArg {
    Case,
    CanonicalOrder,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { EnvFilter::new("case=debug") } else { EnvFilter::new("case=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let format: OutputFormat = cli.format.into();
    let result = run(cli.command, &format).await;

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(command: Commands, format: &OutputFormat) -> Result<()> {
    match command {
        Commands::List { daemon_url, role, tenant_id, user_id, status, customer } => {
            let identity = CallerIdentity { role, tenant_id, user_id };
            let mut query = Vec::new();
            if let Some(status) = status {
                query.push(("status", status));
            }
            if let Some(customer) = customer {
                query.push(("customer", customer));
            }
            let cases = commands::cases_list(&daemon_url, &identity, &query).await?;
            println!("{}", format::format_case_list(&cases, format));
            Ok(())
        }
        Commands::Show { daemon_url, role, tenant_id, user_id, case_id } => {
            let identity = CallerIdentity { role, tenant_id, user_id };
            let body = commands::case_show(&daemon_url, &identity, case_id).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
                OutputFormat::Table => {
                    let case: case_core::Case = serde_json::from_value(body["case"].clone()).context("parse case from response")?;
                    println!("{}", format::format_case(&case, format));
                    if let Some(order) = body.get("order").filter(|v| !v.is_null()) {
                        let order: case_core::CanonicalOrder = serde_json::from_value(order.clone()).context("parse order from response")?;
                        println!();
                        println!("{}", format::format_order(&order, format));
                    }
                }
            }
            Ok(())
        }
        Commands::Audit { daemon_url, role, tenant_id, user_id, case_id } => {
            let identity = CallerIdentity { role, tenant_id, user_id };
            let events = commands::case_audit(&daemon_url, &identity, case_id).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
            Ok(())
        }
        Commands::Parse { file, tenant_id, decoder_endpoint } => {
            let order = commands::dry_run_parse(&file, &tenant_id, decoder_endpoint.as_deref()).await?;
            println!("{}", format::format_order(&order, format));
            Ok(())
        }
        Commands::Committee { file, tenant_id, decoder_endpoint, providers, committee_endpoint_base, weights_file, ambiguity_margin, seed } => {
            let weights = match weights_file {
                Some(path) => WeightsFile::load(&path).with_context(|| format!("load weights file '{}'", path.display()))?,
                None => WeightsFile::default(),
            };
            let (order, result) = commands::dry_run_committee(&file, &tenant_id, decoder_endpoint.as_deref(), &providers, &committee_endpoint_base, &weights, ambiguity_margin, seed).await?;
            println!("{}", format::format_order(&order, format));
            println!();
            println!("{}", format::format_committee_result(&result, format));
            Ok(())
        }
        Commands::Resolve { order_file, catalog_file } => {
            let content = std::fs::read_to_string(&order_file).with_context(|| format!("read order file '{}'", order_file.display()))?;
            let mut order: case_core::CanonicalOrder = serde_json::from_str(&content).with_context(|| format!("parse order from '{}'", order_file.display()))?;
            commands::dry_run_resolve(&mut order, &catalog_file, &ResolverConfig::default())?;
            println!("{}", format::format_order(&order, format));
            Ok(())
        }
        Commands::Schema { kind } => {
            let value = match kind {
                SchemaArg::Case => serde_json::to_value(schemars::schema_for!(case_core::Case))?,
                SchemaArg::CanonicalOrder => serde_json::to_value(schemars::schema_for!(case_core::CanonicalOrder))?,
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}
