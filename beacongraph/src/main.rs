// beacongraph/src/main.rs
//
// beacongraph — APT domain detection over proxy logs.
//
// Four subcommands covering the full workflow:
//   build    — parse a historical log and persist per-user feature graphs
//   analyze  — run the detection pipeline against a graph store
//   inject   — plant a periodic synthetic beacon into a log (evaluation)
//   roc      — analyze in evaluation mode and export the ROC curve as CSV
//
// Usage:
//   beacongraph build --input access.log --output graphs/ --k 20
//   beacongraph analyze --graphs graphs/ --user 10.0.0.1 --prune-threshold 0.02
//   beacongraph inject --input access.log --output infected.log \
//       --domain apt.example.test --user 10.0.0.1 --period-ms 1000
//   beacongraph roc --graphs graphs/ --user 0.0.0.0 --marker .apt --output roc.csv

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use beacongraph::logparse::{LogFormat, LogParser};
use beacongraph::pipeline::{AnalysisParams, Analyzer};
use beacongraph::store::GraphStore;
use beacongraph::{batch, eval, inject};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "beacongraph",
    about   = "APT command-and-control domain detection over proxy logs",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Squid,
    Json,
}

impl From<Format> for LogFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Squid => LogFormat::Squid,
            Format::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Parse a proxy log and build the per-user feature graph store.
    Build {
        #[arg(long, help = "Proxy log to read")]
        input: PathBuf,

        #[arg(long, value_enum, default_value = "squid")]
        format: Format,

        #[arg(long, help = "Graph store directory")]
        output: PathBuf,

        #[arg(long, default_value_t = 20, help = "Neighbors per node")]
        k: usize,

        #[arg(long, help = "Rebuild users whose graphs already exist")]
        overwrite: bool,
    },

    /// Run the detection pipeline and print the ranked clusters.
    Analyze {
        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Plant a periodic synthetic beacon into a log for evaluation.
    Inject {
        #[arg(long, help = "Proxy log to read")]
        input: PathBuf,

        #[arg(long, help = "Infected log to write")]
        output: PathBuf,

        #[arg(long, help = "Beacon domain to plant")]
        domain: String,

        #[arg(long, help = "Client address the beacon fires from")]
        user: String,

        #[arg(long, value_enum, default_value = "squid")]
        format: Format,

        #[arg(long, default_value_t = 1_000, help = "Beacon period in ms")]
        period_ms: i64,
    },

    /// Analyze in evaluation mode and export the ROC curve.
    Roc {
        #[command(flatten)]
        analysis: AnalysisArgs,

        #[arg(long, default_value = ".apt", help = "Marker suffix of injected domains")]
        marker: String,

        #[arg(long, help = "CSV file to write (fpr,tpr rows)")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct AnalysisArgs {
    #[arg(long, help = "Graph store directory")]
    graphs: PathBuf,

    #[arg(long, help = "User address, subnet, or 0.0.0.0 for everyone")]
    user: String,

    #[arg(long, value_delimiter = ',', num_args = 3, default_value = "0.5,0.4,0.1",
          help = "Weights over time,domain,url")]
    feature_weights: Vec<f64>,

    #[arg(long, value_delimiter = ',', num_args = 2, default_value = "0.5,0.5",
          help = "Re-split of the time weight over symmetric,ordered")]
    ordered_weights: Vec<f64>,

    #[arg(long, default_value_t = 0.0)]
    prune_threshold: f64,

    #[arg(long, help = "Interpret --prune-threshold as a z-score")]
    prune_zscore: bool,

    #[arg(long, default_value_t = f64::MAX)]
    max_cluster_size: f64,

    #[arg(long, help = "Interpret --max-cluster-size as a z-score")]
    cluster_zscore: bool,

    #[arg(long, help = "Whitelist file (one domain per line)")]
    whitelist: Option<PathBuf>,

    #[arg(long, help = "Extra whitelist domain for this run")]
    whitelist_extra: Option<String>,

    #[arg(long, default_value_t = 0, help = "Minimum requests for a domain to be ranked")]
    min_requests: usize,

    #[arg(long, value_delimiter = ',', num_args = 3, default_value = "0.3,0.3,0.4",
          help = "Weights over parents,children,requests")]
    ranking_weights: Vec<f64>,
}

impl AnalysisArgs {
    fn to_params(&self, apt_eval: Option<String>) -> Result<AnalysisParams> {
        Ok(AnalysisParams {
            user: self.user.clone(),
            feature_weights: self
                .feature_weights
                .clone()
                .try_into()
                .map_err(|_| anyhow::anyhow!("--feature-weights needs 3 values"))?,
            feature_ordered_weights: self
                .ordered_weights
                .clone()
                .try_into()
                .map_err(|_| anyhow::anyhow!("--ordered-weights needs 2 values"))?,
            prune_threshold: self.prune_threshold,
            max_cluster_size: self.max_cluster_size,
            prune_is_zscore: self.prune_zscore,
            cluster_is_zscore: self.cluster_zscore,
            whitelist_enabled: self.whitelist.is_some(),
            whitelist_path: self.whitelist.clone(),
            whitelist_extra: self.whitelist_extra.clone(),
            min_requests: self.min_requests,
            ranking_weights: self
                .ranking_weights
                .clone()
                .try_into()
                .map_err(|_| anyhow::anyhow!("--ranking-weights needs 3 values"))?,
            apt_eval,
        })
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("beacongraph=info".parse()?),
        )
        .compact()
        .init();

    match Cli::parse().command {
        Command::Build {
            input,
            format,
            output,
            k,
            overwrite,
        } => {
            let file = File::open(&input)
                .with_context(|| format!("cannot open {}", input.display()))?;
            let requests =
                LogParser::new().parse_reader(BufReader::new(file), format.into())?;
            println!("Parsed {} requests from {}", requests.len(), input.display());

            let store = GraphStore::new(&output);
            let users = batch::build_store(&store, requests, k, overwrite)?;
            println!("Built graphs for {} users into {}", users.len(), output.display());
        }

        Command::Analyze { analysis } => {
            let store = GraphStore::new(&analysis.graphs);
            let params = analysis.to_params(None)?;
            let output = Analyzer::new(&store).analyze(&params)?;

            println!("{}", output.stdout);
            for (i, cluster) in output.filtered.iter().enumerate() {
                let mut names: Vec<&str> =
                    cluster.nodes().map(|d| d.name()).collect();
                names.sort();
                println!("cluster {:>3}: {}", i, names.join(" "));
            }
        }

        Command::Inject {
            input,
            output,
            domain,
            user,
            format,
            period_ms,
        } => {
            let reader = BufReader::new(
                File::open(&input)
                    .with_context(|| format!("cannot open {}", input.display()))?,
            );
            let writer = BufWriter::new(
                File::create(&output)
                    .with_context(|| format!("cannot create {}", output.display()))?,
            );
            let report =
                inject::periodic_apt(reader, writer, &domain, &user, format.into(), period_ms)?;
            println!(
                "Injected {} requests for {} into {}",
                report.injected,
                report.domain,
                output.display()
            );
        }

        Command::Roc {
            analysis,
            marker,
            output,
        } => {
            let store = GraphStore::new(&analysis.graphs);
            let params = analysis.to_params(Some(marker.clone()))?;
            let result = Analyzer::new(&store).analyze(&params)?;

            let points = eval::roc_points(&result.ranking, &marker);
            let writer = BufWriter::new(
                File::create(&output)
                    .with_context(|| format!("cannot create {}", output.display()))?,
            );
            eval::export_csv(&points, writer)?;
            println!("{}", result.stdout);
            println!(
                "ROC: {} points, AUC {:.4}, written to {}",
                points.len(),
                eval::auc(&points),
                output.display()
            );
        }
    }

    Ok(())
}
