use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dosing_core::carb_math::CarbStatus;
use dosing_core::*;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dosekit")]
#[command(about = "Insulin and carb effect timelines for dosing loops", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the user config path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Glucose effect of insulin per interval over a window
    Effects {
        /// JSON request file
        input: PathBuf,

        /// Window start (RFC 3339); overrides the request
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Window end (RFC 3339); overrides the request
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },

    /// Insulin on board over a window
    Iob {
        /// JSON request file
        input: PathBuf,

        #[arg(long)]
        start: Option<DateTime<Utc>>,

        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Ignore basal delivery after this time
        #[arg(long)]
        basal_dosing_end: Option<DateTime<Utc>>,
    },

    /// Observed absorption of each carb entry
    Carbs {
        /// JSON request file
        input: PathBuf,
    },

    /// Time of the most recent bolus in the last 24 hours
    LastBolus {
        /// JSON request file
        input: PathBuf,

        /// Reference time (defaults to the request's `now`, then the clock)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

/// Everything a query may need, as the host exports it
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Request {
    doses: Vec<Dose>,
    carb_entries: Vec<CarbEntry>,
    carb_effects: Vec<EffectSample>,
    basal_schedule: Schedule,
    sensitivity_schedule: Schedule,
    carb_ratio_schedule: Schedule,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: Option<DateTime<Utc>>,
}

impl Request {
    fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let request: Request = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded request with {} doses, {} carb entries, {} carb effects",
            request.doses.len(),
            request.carb_entries.len(),
            request.carb_effects.len()
        );
        Ok(request)
    }

    fn window_start(&self, start: Option<DateTime<Utc>>) -> Result<DateTime<Utc>> {
        start.or(self.start).ok_or_else(|| {
            Error::Config("a window start is required (--start or \"start\")".into())
        })
    }
}

/// Flat row for CSV output of carb statuses
#[derive(Serialize)]
struct CarbRow {
    start: DateTime<Utc>,
    total_grams: f64,
    observed_grams: f64,
    clamped_grams: f64,
    remaining_grams: f64,
    observed_end: DateTime<Utc>,
    estimated_minutes_remaining: f64,
}

impl From<&CarbStatus> for CarbRow {
    fn from(status: &CarbStatus) -> Self {
        Self {
            start: status.entry.start,
            total_grams: status.absorption.total_grams,
            observed_grams: status.observed_grams,
            clamped_grams: status.absorption.clamped_grams,
            remaining_grams: status.absorption.remaining_grams,
            observed_end: status.absorption.observed_end,
            estimated_minutes_remaining: status.absorption.estimated_minutes_remaining,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        dosing_core::logging::init_with_level("debug");
    } else {
        dosing_core::logging::init();
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Effects { input, start, end } => {
            cmd_effects(&Request::load(&input)?, start, end, &settings, cli.format)
        }
        Commands::Iob {
            input,
            start,
            end,
            basal_dosing_end,
        } => cmd_iob(
            &Request::load(&input)?,
            start,
            end,
            basal_dosing_end,
            &settings,
            cli.format,
        ),
        Commands::Carbs { input } => cmd_carbs(&Request::load(&input)?, &settings, cli.format),
        Commands::LastBolus { input, now } => cmd_last_bolus(&Request::load(&input)?, now),
    }
}

fn cmd_effects(
    request: &Request,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    settings: &Settings,
    format: Format,
) -> Result<()> {
    let effects = compute_glucose_effects(
        &request.doses,
        request.window_start(start)?,
        end.or(request.end),
        &request.basal_schedule,
        &request.sensitivity_schedule,
        &settings.insulin_model()?,
        settings.effect_timing(),
    )?;

    tracing::info!("Computed {} glucose effect samples", effects.len());
    write_rows(&effects, format)
}

fn cmd_iob(
    request: &Request,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    basal_dosing_end: Option<DateTime<Utc>>,
    settings: &Settings,
    format: Format,
) -> Result<()> {
    let values = compute_insulin_on_board(
        &request.doses,
        request.window_start(start)?,
        end.or(request.end),
        &request.basal_schedule,
        &settings.insulin_model()?,
        settings.effect_timing(),
        basal_dosing_end,
    )?;

    tracing::info!("Computed {} insulin on board values", values.len());
    write_rows(&values, format)
}

fn cmd_carbs(request: &Request, settings: &Settings, format: Format) -> Result<()> {
    let mut entries = request.carb_entries.clone();
    entries.sort_by_key(|entry| entry.start);

    let statuses = map_carb_absorption(
        &entries,
        &request.carb_effects,
        &request.carb_ratio_schedule,
        &request.sensitivity_schedule,
        &settings.carb_absorption(),
    )?;

    match format {
        Format::Json => write_json(&statuses),
        Format::Csv => {
            let rows: Vec<CarbRow> = statuses.iter().map(CarbRow::from).collect();
            write_csv(&rows)
        }
    }
}

fn cmd_last_bolus(request: &Request, now: Option<DateTime<Utc>>) -> Result<()> {
    let now = now.or(request.now).unwrap_or_else(Utc::now);

    match last_bolus_time(&request.doses, now) {
        Some(time) => println!("{}", time.to_rfc3339()),
        None => println!("No bolus in the last 24 hours"),
    }
    Ok(())
}

fn write_rows<T: Serialize>(rows: &[T], format: Format) -> Result<()> {
    match format {
        Format::Json => write_json(rows),
        Format::Csv => write_csv(rows),
    }
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn write_csv<T: Serialize>(rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    for row in rows {
        writer.serialize(row).map_err(io::Error::from)?;
    }
    writer.flush()?;
    Ok(())
}
