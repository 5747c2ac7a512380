use clap::{Parser, Subcommand};

use mpanalytics::metrics::{self, format_delta, format_value, MetricKey, PeriodSummary};
use mpanalytics::{
    check_periods, generate_default_periods, FetchOptions, JsonDirSource, Period, SellerAnalytics,
};

#[derive(Parser)]
#[command(name = "mpanalytics", about = "Marketplace seller analytics CLI")]
struct Cli {
    /// Data directory (default: ~/.mpanalytics/data)
    #[arg(long, global = true)]
    data: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Maximum number of entity fetches in flight
    #[arg(long, default_value_t = 2)]
    max_concurrent: usize,

    /// Pause after each fetch settles before its slot is reused (ms)
    #[arg(long, default_value_t = 200)]
    delay_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl mpanalytics::FetchProgress for StderrProgress {
    fn on_entity_queued(&self, entity_id: &str, index: usize, total: usize) {
        eprintln!("[{}/{}] Queued {}", index + 1, total, entity_id);
    }

    fn on_entity_loaded(&self, entity_id: &str, records: usize) {
        eprintln!("  {entity_id}: {records} daily records");
    }

    fn on_entity_failed(&self, entity_id: &str, error: &mpanalytics::Error) {
        eprintln!("  {entity_id}: failed: {error}");
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect comparison periods
    Periods {
        #[command(subcommand)]
        action: PeriodsAction,
    },
    /// List entities in the data directory
    Entities {
        #[arg(long)]
        json: bool,
    },
    /// List known metric keys
    Metrics {
        #[arg(long)]
        json: bool,
    },
    /// Compare one metric across periods, per entity
    Compare {
        /// Metric key, e.g. orders, ordersAmount, ctr
        #[arg(long)]
        metric: String,
        /// Entity id (repeatable; default: all entities)
        #[arg(long = "entity")]
        entities: Vec<String>,
        /// Period as FROM..TO (repeatable; default: last four 3-day windows)
        #[arg(long = "period")]
        periods: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Period summaries with derived ratios, per entity and combined
    Summary {
        #[arg(long = "entity")]
        entities: Vec<String>,
        #[arg(long = "period")]
        periods: Vec<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PeriodsAction {
    /// Print the default comparison windows
    Default {
        #[arg(long)]
        json: bool,
    },
    /// Check a set of periods for invalid dates and overlaps
    Check {
        /// Period as FROM..TO (repeatable)
        #[arg(long = "period", required = true)]
        periods: Vec<String>,
        #[arg(long)]
        json: bool,
    },
}

/// Parse CLI periods, falling back to the default windows when none are given.
fn parse_periods(raw: &[String]) -> anyhow::Result<Vec<Period>> {
    if raw.is_empty() {
        return Ok(generate_default_periods());
    }
    let periods = raw
        .iter()
        .enumerate()
        .map(|(i, s)| Period::parse_range(i as u32 + 1, s))
        .collect::<mpanalytics::Result<Vec<_>>>()?;
    Ok(periods)
}

/// Like [`parse_periods`] but keeps malformed input so it can be reported.
fn parse_periods_lenient(raw: &[String]) -> Vec<Period> {
    raw.iter()
        .enumerate()
        .map(|(i, s)| {
            let id = i as u32 + 1;
            Period::parse_range(id, s).unwrap_or_else(|_| {
                let (from, to) = s.split_once("..").unwrap_or((s.as_str(), s.as_str()));
                Period {
                    id,
                    name: mpanalytics::period::period_name(id),
                    date_from: from.trim().to_string(),
                    date_to: to.trim().to_string(),
                }
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let options = FetchOptions {
        max_concurrent: cli.max_concurrent,
        delay_between_starts: std::time::Duration::from_millis(cli.delay_ms),
    };
    let data_dir = match &cli.data {
        Some(path) => std::path::PathBuf::from(path),
        None => JsonDirSource::default_dir()?,
    };
    let dw = SellerAnalytics::new(JsonDirSource::new(&data_dir), options);
    let progress = StderrProgress;

    match cli.command {
        Commands::Periods { action } => handle_periods(action)?,
        Commands::Entities { json } => {
            let entities = dw.entities().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entities)?);
            } else if entities.is_empty() {
                println!("No entities in {}.", data_dir.display());
            } else {
                for e in &entities {
                    let kind = match e.kind {
                        mpanalytics::EntityKind::Product => "product",
                        mpanalytics::EntityKind::Campaign => "campaign",
                    };
                    println!("{} [{kind}] {}", e.id, e.name.as_deref().unwrap_or(""));
                }
            }
        }
        Commands::Metrics { json } => print_metric_catalogue(json)?,
        Commands::Compare {
            metric,
            entities,
            periods,
            json,
        } => {
            let key: MetricKey = metric.parse()?;
            let periods = parse_periods(&periods)?;
            let cmp = dw.compare(&entities, &periods, key, &progress).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&cmp)?);
            } else {
                print_comparison(&cmp);
            }
        }
        Commands::Summary {
            entities,
            periods,
            json,
        } => {
            let periods = parse_periods(&periods)?;
            let report = dw.summarize(&entities, &periods, &progress).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary_report(&report);
            }
        }
    }

    Ok(())
}

fn handle_periods(action: PeriodsAction) -> anyhow::Result<()> {
    match action {
        PeriodsAction::Default { json } => {
            let periods = generate_default_periods();
            if json {
                println!("{}", serde_json::to_string_pretty(&periods)?);
            } else {
                for p in &periods {
                    println!("{p}");
                }
            }
        }
        PeriodsAction::Check { periods, json } => {
            let periods = parse_periods_lenient(&periods);
            let check = check_periods(&periods);
            if json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else if check.is_valid() {
                println!("OK: {} periods, no overlaps.", periods.len());
            } else {
                println!("Invalid: {}", check.describe());
            }
            if !check.is_valid() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn print_metric_catalogue(json: bool) -> anyhow::Result<()> {
    if json {
        let rows: Vec<serde_json::Value> = MetricKey::all()
            .iter()
            .map(|k| {
                let d = k.descriptor();
                serde_json::json!({
                    "key": k.as_str(),
                    "label": d.label,
                    "aggregation": d.aggregation,
                    "format": d.format,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for k in MetricKey::all() {
        let d = k.descriptor();
        println!(
            "{:<16} {:<22} {:?}/{:?}",
            k.as_str(),
            d.label,
            d.aggregation,
            d.format
        );
    }
    Ok(())
}

fn print_failures(report: &mpanalytics::FetchReport) {
    for f in &report.failures {
        println!("  ! {}: {}", f.entity_id, f.error);
    }
}

fn print_comparison(cmp: &mpanalytics::MetricComparison) {
    let descriptor = cmp.metric.descriptor();
    println!("{} ({})", descriptor.label, cmp.metric);
    for entity in &cmp.entities {
        println!("\n{}", entity.entity_id);
        for (row, period) in entity.rows.iter().zip(&cmp.periods) {
            println!(
                "  {:<12} {}..{}  {:>14}  {}",
                row.period_name,
                period.date_from,
                period.date_to,
                format_value(row.value, descriptor.format),
                format_delta(row.delta)
            );
        }
    }
    print_failures(&cmp.fetch);
}

fn print_summary_rows(rows: &[metrics::PeriodSummaryRow]) {
    for row in rows {
        println!("  {}", row.period_name);
        let Some(summary) = row.summary.as_ref() else {
            println!("    no data");
            continue;
        };
        for key in PeriodSummary::keys() {
            let delta = row
                .deltas
                .iter()
                .find(|d| d.key == *key)
                .and_then(|d| d.delta);
            println!(
                "    {:<18} {:>14}  {}",
                key.descriptor().label,
                format_value(summary.get(*key), key.descriptor().format),
                format_delta(delta)
            );
        }
    }
}

fn print_summary_report(report: &mpanalytics::SummaryReport) {
    for entity in &report.entities {
        println!("\n{}", entity.entity_id);
        print_summary_rows(&entity.rows);
    }
    if report.entities.len() > 1 {
        println!("\nAll entities");
        print_summary_rows(&report.combined);
    }
    print_failures(&report.fetch);
}
