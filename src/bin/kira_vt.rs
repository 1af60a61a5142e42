use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_variant_trends::app::{App, LocationQuery, LogSink, TrendRequest};
use kira_variant_trends::config::{ConfigLoader, ResolvedConfig, parse_country_list};
use kira_variant_trends::domain::{DateRange, EpochDay, Granularity, MutationKey, SourceProfile};
use kira_variant_trends::error::TrendsError;
use kira_variant_trends::output::JsonOutput;
use kira_variant_trends::pipeline::IngestRequest;
use kira_variant_trends::source::SourceFilter;
use kira_variant_trends::stats::Correction;
use kira_variant_trends::store::Store;

#[derive(Parser)]
#[command(name = "kira-vt")]
#[command(about = "Weekly mutation-prevalence trends from viral surveillance metadata")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "JSON config file (defaults to ./kira-vt.json)")]
    config: Option<String>,

    #[arg(long, global = true, help = "Store root directory (defaults to ./.kira-vt)")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build the rollup store from a metadata export")]
    Ingest(IngestArgs),
    #[command(about = "Weekly mutation trends for a location")]
    Trend(TrendArgs),
    #[command(about = "Characterizing mutations of lineages")]
    Characterize(CharacterizeArgs),
    #[command(about = "Expand PARENT* lineage groups for a location and week")]
    Groups(GroupsArgs),
    #[command(about = "Lineages observed for a location and/or week")]
    Lineages(LineagesArgs),
    #[command(about = "Daily lineage counts for a location, small shares folded into Others")]
    Daily(DailyArgs),
    #[command(about = "Per-lineage history of one mutation")]
    History(HistoryArgs),
    #[command(about = "Per-lineage weekly counts of one mutation in a location")]
    Breakdown(BreakdownArgs),
    #[command(about = "Known locations at one granularity")]
    Locations(LocationsArgs),
    #[command(about = "Show dataset info")]
    Info,
}

#[derive(Args)]
struct IngestArgs {
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    source: Option<SourceProfile>,

    #[arg(long, help = "Comma-separated country names, or `all`")]
    countries: Option<String>,

    #[arg(long)]
    begin: Option<String>,

    #[arg(long)]
    end: Option<String>,

    #[arg(long)]
    regenerate: bool,
}

#[derive(Args, Clone)]
struct LocationArgs {
    #[arg(long)]
    location: String,

    #[arg(long, value_enum, default_value_t = Granularity::Country)]
    granularity: Granularity,
}

impl LocationArgs {
    fn query(&self) -> LocationQuery {
        LocationQuery {
            granularity: self.granularity,
            name: self.location.clone(),
        }
    }
}

#[derive(Args)]
struct TrendArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[arg(long, help = "Last day of the target week (defaults to the latest date)")]
    end: Option<String>,

    #[arg(long = "lineage", value_delimiter = ',')]
    lineages: Vec<String>,

    #[arg(long)]
    min_support: Option<f64>,

    #[arg(long, value_enum)]
    correction: Option<Correction>,
}

#[derive(Args)]
struct CharacterizeArgs {
    #[arg(long = "lineage", value_delimiter = ',', required = true)]
    lineages: Vec<String>,
}

#[derive(Args)]
struct GroupsArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[arg(long)]
    end: Option<String>,

    #[arg(long = "lineage", value_delimiter = ',', required = true)]
    lineages: Vec<String>,
}

#[derive(Args)]
struct LineagesArgs {
    #[arg(long)]
    location: Option<String>,

    #[arg(long, value_enum, default_value_t = Granularity::Country)]
    granularity: Granularity,

    #[arg(long)]
    end: Option<String>,
}

#[derive(Args)]
struct DailyArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[arg(long)]
    begin: String,

    #[arg(long)]
    end: Option<String>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long, help = "PROTEIN_MUTATION, e.g. Spike_D614G")]
    mutation: String,
}

#[derive(Args)]
struct BreakdownArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[arg(long)]
    end: Option<String>,

    #[arg(long)]
    mutation: String,
}

#[derive(Args)]
struct LocationsArgs {
    #[arg(long, value_enum, default_value_t = Granularity::Country)]
    granularity: Granularity,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<TrendsError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TrendsError) -> u8 {
    match error {
        TrendsError::UnknownLocation { .. }
        | TrendsError::StoreNotReady(_)
        | TrendsError::MissingConfig => 2,
        TrendsError::Unavailable => 3,
        TrendsError::MissingColumns { .. } | TrendsError::EmptyInput => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve_or_default(cli.config.as_deref())?;
    let store = resolve_store(cli.store.or_else(|| config.store.clone()))?;
    let app = App::new(store).with_correction(config.correction);

    match cli.command {
        Commands::Ingest(args) => run_ingest(args, &app, &config),
        Commands::Trend(args) => run_trend(args, app, &config),
        Commands::Characterize(args) => {
            let mutations: Vec<String> = app
                .characterizing_mutations(&args.lineages)?
                .iter()
                .map(ToString::to_string)
                .collect();
            JsonOutput::print_characterizing(&mutations).into_diagnostic()
        }
        Commands::Groups(args) => {
            let end = resolve_end(&app, args.end.as_deref())?;
            let groups = app.resolve_lineage_groups(&args.location.query(), end, &args.lineages)?;
            JsonOutput::print_groups(&groups).into_diagnostic()
        }
        Commands::Lineages(args) => {
            let end = args
                .end
                .as_deref()
                .map(str::parse::<EpochDay>)
                .transpose()?;
            let location = args.location.map(|name| LocationQuery {
                granularity: args.granularity,
                name,
            });
            let lineages = app.lineage_availability(location.as_ref(), end)?;
            JsonOutput::print_lineages(&lineages).into_diagnostic()
        }
        Commands::Daily(args) => {
            let begin: EpochDay = args.begin.parse()?;
            let end = resolve_end(&app, args.end.as_deref())?;
            let days = app.daily_lineage_breakdown(&args.location.query(), begin, end)?;
            JsonOutput::print_daily(&days).into_diagnostic()
        }
        Commands::History(args) => {
            let key: MutationKey = args.mutation.parse()?;
            let history = app.mutation_history(&key)?;
            JsonOutput::print_history(&history).into_diagnostic()
        }
        Commands::Breakdown(args) => {
            let key: MutationKey = args.mutation.parse()?;
            let end = resolve_end(&app, args.end.as_deref())?;
            let breakdown = app.mutation_breakdown(&args.location.query(), end, &key)?;
            JsonOutput::print_breakdown(&breakdown).into_diagnostic()
        }
        Commands::Locations(args) => {
            let locations = app.locations(args.granularity)?;
            JsonOutput::print_locations(&locations).into_diagnostic()
        }
        Commands::Info => {
            let info = app.dataset_info()?;
            JsonOutput::print_info(&info).into_diagnostic()
        }
    }
}

fn resolve_store(root: Option<PathBuf>) -> miette::Result<Store> {
    match root {
        Some(root) => {
            let root = Utf8PathBuf::from_path_buf(root).map_err(|path| {
                TrendsError::Filesystem(format!("non-utf8 store path: {}", path.display()))
            })?;
            Ok(Store::at(root))
        }
        None => Ok(Store::new()?),
    }
}

fn resolve_end(app: &App, end: Option<&str>) -> miette::Result<EpochDay> {
    if let Some(end) = end {
        return Ok(end.parse()?);
    }
    app.snapshot()?
        .last_update()
        .ok_or_else(|| TrendsError::StoreNotReady(app.store().db_path().into_std_path_buf()))
        .map_err(Into::into)
}

fn run_ingest(args: IngestArgs, app: &App, config: &ResolvedConfig) -> miette::Result<()> {
    let input = args
        .input
        .or_else(|| config.input.clone())
        .ok_or(TrendsError::MissingInput)?;
    let countries = match args.countries.as_deref() {
        Some(value) => parse_country_list(value),
        None => config.countries.clone(),
    };
    let begin = match args.begin.as_deref() {
        Some(value) => Some(value.parse::<EpochDay>()?),
        None => config.date_range.begin,
    };
    let end = match args.end.as_deref() {
        Some(value) => Some(value.parse::<EpochDay>()?),
        None => config.date_range.end,
    };

    let request = IngestRequest {
        profile: args.source.unwrap_or(config.source),
        filter: SourceFilter {
            countries,
            date_range: DateRange::new(begin, end),
        },
        force_regenerate: args.regenerate,
    };
    let outcome = app.ingest_path(&input, &request, &LogSink)?;
    JsonOutput::print_ingest(&outcome).into_diagnostic()
}

fn run_trend(args: TrendArgs, app: App, config: &ResolvedConfig) -> miette::Result<()> {
    let app = app.with_correction(args.correction.unwrap_or(config.correction));
    let min_support = args.min_support.unwrap_or(config.min_support);
    let end = resolve_end(&app, args.end.as_deref())?;

    let request = TrendRequest {
        location: args.location.query(),
        lineages: (!args.lineages.is_empty()).then(|| args.lineages.clone()),
        end,
        min_support,
    };
    if request.lineages.is_some() {
        let analysis = app.lineage_analysis(&request)?;
        JsonOutput::print_analysis(&analysis).into_diagnostic()
    } else {
        let report = app.compute_trend(&request)?;
        JsonOutput::print_trend(&report).into_diagnostic()
    }
}
