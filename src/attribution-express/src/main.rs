//! Attribution Express: batch multi-touch marketing attribution.
//!
//! Reads an attribution query, a JSON-lines export of touch rows and the
//! ad-platform reports, runs the user pipeline (and the KPI pipeline when
//! KPI data is given) and writes the combined header/row matrix as JSON.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use attribution_core::config::AppConfig;
use attribution_core::marketing::MarketingReports;
use attribution_core::query::{AttributionQuery, QueryUnit, ResolvedQuery};
use attribution_core::types::QueryResult;
use attribution_engine::extractor::{ColumnContract, JsonLinesCursor};
use attribution_engine::formatter::AttributionReport;
use attribution_engine::pipeline::{JsonSink, KpiInput};
use attribution_engine::{
    combine_results, dispatch, run_attribution, AttributionInput, ConversionRecord, ResultSink,
};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "attribution-express")]
#[command(about = "Batch multi-touch marketing attribution")]
#[command(version)]
struct Cli {
    /// Config file layered under the environment
    #[arg(long, env = "ATTRIBUTION_EXPRESS__CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one attribution query
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Query JSON: a bare attribution query or a `{"cl": ..., "query": ...}` unit
    #[arg(long)]
    query: PathBuf,

    /// Touch rows, one JSON array per line
    #[arg(long)]
    rows: PathBuf,

    /// Ad-platform reports (click ids, id reports, performance)
    #[arg(long)]
    reports: Option<PathBuf>,

    /// Goal and linked-event conversions keyed by user id
    #[arg(long)]
    conversions: Option<PathBuf>,

    /// KPI groups and KPI values
    #[arg(long)]
    kpi: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Node identifier (overrides config)
    #[arg(long, env = "ATTRIBUTION_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// Pretty-print the result
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attribution_express=info,attribution_engine=info".into()),
        )
        .json()
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    config.validate()?;

    match cli.command {
        Command::Run(args) => {
            if let Some(node_id) = args.node_id.clone() {
                config.node_id = node_id;
            }
            if args.pretty {
                config.input.pretty_output = true;
            }
            info!(
                node_id = %config.node_id,
                lookback_days = config.attribution.default_lookback_days,
                content_groups = config.input.content_groups.len(),
                "Configuration loaded"
            );

            let mut sink: Box<dyn ResultSink> = match &args.output {
                Some(path) => Box::new(JsonSink::new(
                    BufWriter::new(
                        File::create(path)
                            .with_context(|| format!("creating {}", path.display()))?,
                    ),
                    config.input.pretty_output,
                )),
                None => Box::new(JsonSink::new(io::stdout(), config.input.pretty_output)),
            };

            match run(&args, &config).await {
                Ok(result) => {
                    info!(rows = result.rows.len(), "Attribution result written");
                    sink.accept(&result)?;
                }
                Err(e) => {
                    error!(error = %e, "Attribution run failed");
                    sink.accept(&QueryResult::default())?;
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("decoding {}", path.display()))
}

/// Accepts either a query unit or a bare attribution query.
fn load_query(path: &Path, config: &AppConfig) -> anyhow::Result<ResolvedQuery> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let query = match serde_json::from_str::<QueryUnit>(&raw) {
        Ok(unit) => dispatch(&unit, &config.attribution)?,
        Err(_) => AttributionQuery::from_json(&raw)?.resolve(&config.attribution)?,
    };
    Ok(query)
}

struct PipelineJob {
    rows: PathBuf,
    query: Arc<ResolvedQuery>,
    reports: Arc<MarketingReports>,
    contract: ColumnContract,
    conversions: Vec<ConversionRecord>,
    kpi_groups: Option<HashMap<String, String>>,
    diagnostics_cap: usize,
}

impl PipelineJob {
    fn run(self) -> anyhow::Result<AttributionReport> {
        let file = File::open(&self.rows)
            .with_context(|| format!("opening {}", self.rows.display()))?;
        let mut cursor = JsonLinesCursor::new(BufReader::new(file));
        let mut input = AttributionInput::new(&self.query, &self.reports)
            .with_contract(self.contract.clone())
            .with_conversions(&self.conversions)
            .with_diagnostics_cap(self.diagnostics_cap);
        // The KPI side adds conversions only; reach and spend come from the
        // user side when the two are combined.
        if let Some(groups) = &self.kpi_groups {
            input = input.with_kpi_groups(groups).conversions_only();
        }
        Ok(run_attribution(&mut cursor, &input)?)
    }
}

async fn run(args: &RunArgs, config: &AppConfig) -> anyhow::Result<QueryResult> {
    let query = Arc::new(load_query(&args.query, config)?);
    let reports: Arc<MarketingReports> = Arc::new(match &args.reports {
        Some(path) => read_json(path)?,
        None => MarketingReports::default(),
    });
    let conversions: Vec<ConversionRecord> = match &args.conversions {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let contract = ColumnContract::new(config.input.content_groups.clone());

    info!(
        key = query.attribution_key.as_str(),
        window = %query.window(),
        conversions = conversions.len(),
        has_reports = !reports.is_empty(),
        kpi = args.kpi.is_some(),
        "Running attribution"
    );

    let primary = PipelineJob {
        rows: args.rows.clone(),
        query: query.clone(),
        reports: reports.clone(),
        contract: contract.clone(),
        conversions,
        kpi_groups: None,
        diagnostics_cap: config.attribution.diagnostics_cap,
    };
    let primary = tokio::task::spawn_blocking(move || primary.run());

    let kpi = match &args.kpi {
        Some(path) => {
            let kpi: KpiInput = read_json(path)?;
            let job = PipelineJob {
                rows: args.rows.clone(),
                query,
                reports,
                contract,
                conversions: kpi.conversions,
                kpi_groups: Some(kpi.user_groups),
                diagnostics_cap: config.attribution.diagnostics_cap,
            };
            Some(tokio::task::spawn_blocking(move || job.run()))
        }
        None => None,
    };

    let mut report = primary.await??;
    if let Some(kpi) = kpi {
        report = combine_results(report, kpi.await??)?;
    }
    Ok(report.finalize()?)
}
