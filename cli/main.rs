#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use retinol::aicc::CandidateSet;
use retinol::analysis::{run_analysis, write_outputs};
use retinol::config::{AnalysisConfig, CandidateModel};
use retinol::data::{Dataset, LoadOptions, RowId, Variable, load_dataset};
use retinol::design::ModelSpec;
use retinol::diagnostics::{
    DEFAULT_VIF_THRESHOLD, DiagnosticSeries, DiagnosticsError, InfluenceMeasures,
    InfluenceThresholds, flag_influential, normality_summary, variance_inflation,
};
use retinol::hier_part::{DEFAULT_MAX_PREDICTORS, PartitionOptions, hierarchical_partition};
use retinol::ols::LinearModel;
use retinol::report::{
    AiccTable, CoefficientTable, InfluenceTable, NormalityLine, PartitionTable, StepwiseTable,
    VifTable, write_series,
};
use retinol::stepwise::{StepwiseOptions, stepwise_aic};

#[derive(Clone, Copy, ValueEnum)]
pub enum DelimiterCli {
    Tab,
    Comma,
}

#[derive(Args)]
pub struct DataArgs {
    /// Path to the study table (header row with the fourteen variable names)
    #[arg(value_name = "DATA")]
    pub data: PathBuf,

    /// Field separator of the table
    #[arg(long, value_enum, default_value_t = DelimiterCli::Tab)]
    pub delimiter: DelimiterCli,

    /// Row ids to drop before fitting, e.g. --exclude 62,118
    #[arg(long, value_delimiter = ',', value_parser = parse_row_id)]
    pub exclude: Vec<RowId>,
}

#[derive(Args)]
pub struct ModelArgs {
    /// Response variable
    #[arg(long, default_value = "RETPLASMA")]
    pub response: Variable,

    /// Comma-separated predictor list, e.g. AGE,FAT,ALCOHOL
    #[arg(long, value_delimiter = ',', required = true)]
    pub predictors: Vec<Variable>,
}

#[derive(Args)]
pub struct FitArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Write the diagnostic plot series to this TSV file
    #[arg(long, value_name = "PATH")]
    pub series: Option<PathBuf>,

    /// VIF above which a column is reported as collinear
    #[arg(long, default_value_t = DEFAULT_VIF_THRESHOLD)]
    pub vif_threshold: f64,

    #[command(flatten)]
    pub influence: InfluenceArgs,
}

/// Cut-offs for flagging influential observations.
#[derive(Args)]
pub struct InfluenceArgs {
    /// Flag leverage above this multiple of p/n
    #[arg(long, default_value_t = 2.0)]
    pub leverage_factor: f64,

    /// Flag |standardized residual| above this value
    #[arg(long, default_value_t = 3.0)]
    pub std_residual: f64,

    /// Flag Cook's distance above this multiple of 1/n
    #[arg(long, default_value_t = 4.0)]
    pub cooks_factor: f64,
}

impl InfluenceArgs {
    fn thresholds(&self) -> Result<InfluenceThresholds, DiagnosticsError> {
        let thresholds = InfluenceThresholds {
            leverage_factor: self.leverage_factor,
            std_residual: self.std_residual,
            cooks_factor: self.cooks_factor,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }
}

#[derive(Args)]
pub struct VifArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, default_value_t = DEFAULT_VIF_THRESHOLD)]
    pub vif_threshold: f64,
}

#[derive(Args)]
pub struct CompareArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Response shared by every candidate
    #[arg(long, default_value = "RETPLASMA")]
    pub response: Variable,

    /// Candidate as NAME=A,B,C; repeat for each model
    #[arg(
        long = "model",
        value_name = "NAME=PREDICTORS",
        required = true,
        value_parser = parse_candidate
    )]
    pub models: Vec<CandidateModel>,
}

#[derive(Args)]
pub struct StepwiseArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Maximum number of add/remove moves (default: twice the predictor count)
    #[arg(long, value_name = "N")]
    pub max_steps: Option<usize>,
}

#[derive(Args)]
pub struct HierPartArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Fit the subsets on the calling thread only
    #[arg(long)]
    pub serial: bool,

    /// Refuse to partition more predictors than this
    #[arg(long, default_value_t = DEFAULT_MAX_PREDICTORS)]
    pub max_predictors: usize,
}

#[derive(Parser)]
#[command(
    name = "retinol",
    about = "Linear-regression analysis of the plasma retinol study",
    long_about = "Fits ordinary least squares models to the plasma retinol table, screens \
                 them for collinearity and influential observations, and compares candidate \
                 models by AICc, stepwise AIC and hierarchical partitioning."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit one model and print coefficients, VIF and influence diagnostics
    #[command(about = "Fit a model (optional output: diagnostic series TSV)")]
    Fit(FitArgs),

    /// Variance inflation factors of a model's predictor columns
    #[command(about = "Variance inflation factors")]
    Vif(VifArgs),

    /// Rank named candidate models by AICc
    #[command(about = "Compare candidate models by AICc")]
    Compare(CompareArgs),

    /// Bidirectional stepwise AIC selection from the full model
    #[command(about = "Stepwise AIC selection")]
    Stepwise(StepwiseArgs),

    /// Independent and joint contributions of each predictor to R²
    #[command(about = "Hierarchical partitioning of R²")]
    Hierpart(HierPartArgs),

    /// Run the complete workflow described by a configuration file
    #[command(about = "Run the full analysis (outputs: report.txt, diagnostic TSVs)")]
    Run {
        /// Path to the analysis configuration (.toml)
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
    },

    /// Write the study configuration as an editable TOML file
    #[command(about = "Write the default study configuration (outputs: analysis.toml)")]
    InitConfig {
        #[arg(value_name = "PATH", default_value = "analysis.toml")]
        path: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Fit(args)) => run_fit(args),
        Some(Commands::Vif(args)) => run_vif(args),
        Some(Commands::Compare(args)) => run_compare(args),
        Some(Commands::Stepwise(args)) => run_stepwise(args),
        Some(Commands::Hierpart(args)) => run_hierpart(args),
        Some(Commands::Run { config }) => run_config(config),
        Some(Commands::InitConfig { path }) => init_config(path),
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn parse_row_id(s: &str) -> Result<RowId, String> {
    let id: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a row id"))?;
    RowId::new(id).ok_or_else(|| "row ids are 1-based; 0 is not a valid row id".to_string())
}

fn parse_candidate(s: &str) -> Result<CandidateModel, String> {
    let (name, list) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=A,B,C but got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("candidate '{s}' has an empty name"));
    }
    let predictors = list
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.parse::<Variable>().map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CandidateModel {
        name: name.to_string(),
        predictors,
    })
}

/// Loads the table and applies the exclusions.
fn load_working(args: &DataArgs) -> Result<Arc<Dataset>, Box<dyn std::error::Error>> {
    let options = LoadOptions {
        delimiter: match args.delimiter {
            DelimiterCli::Tab => b'\t',
            DelimiterCli::Comma => b',',
        },
        ..LoadOptions::default()
    };
    println!("Loading data from: {}", args.data.display());
    let data = load_dataset(&args.data, &options)?;
    if args.exclude.is_empty() {
        println!("Loaded {} observations", data.len());
        return Ok(Arc::new(data));
    }
    let working = data.excluding(&args.exclude)?;
    println!(
        "Loaded {} observations; {} remain after excluding rows {}",
        data.len(),
        working.len(),
        args.exclude
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(Arc::new(working))
}

fn spec_from(args: &ModelArgs) -> Result<ModelSpec, Box<dyn std::error::Error>> {
    Ok(ModelSpec::new(args.response, args.predictors.iter().copied())?)
}

pub fn run_fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let thresholds = args.influence.thresholds()?;
    let data = load_working(&args.data)?;
    let spec = spec_from(&args.model)?;
    let model = LinearModel::fit(data, &spec)?;
    let vif = variance_inflation(model.design())?;

    println!();
    println!("{}", CoefficientTable { model: &model, vif: Some(&vif) });
    let over = vif.exceeding(args.vif_threshold);
    if !over.is_empty() {
        println!(
            "[WARN] VIF above {}: {}",
            args.vif_threshold,
            over.iter()
                .map(|e| format!("{} ({:.2})", e.column, e.vif))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let measures = InfluenceMeasures::from_model(&model);
    let flags = flag_influential(&measures, &thresholds);
    print!("{}", NormalityLine(&normality_summary(model.residuals().view())?));
    println!("{}", InfluenceTable(&flags));

    if let Some(path) = args.series {
        let series = DiagnosticSeries::from_measures(&measures)?;
        write_series(&series, &path)?;
        println!("Diagnostic series written to: {}", path.display());
    }
    Ok(())
}

pub fn run_vif(args: VifArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data = load_working(&args.data)?;
    let spec = spec_from(&args.model)?;
    let model = LinearModel::fit(data, &spec)?;
    let report = variance_inflation(model.design())?;
    println!();
    print!(
        "{}",
        VifTable {
            report: &report,
            threshold: args.vif_threshold
        }
    );
    Ok(())
}

pub fn run_compare(args: CompareArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data = load_working(&args.data)?;
    let mut set = CandidateSet::new();
    for candidate in args.models {
        let spec = ModelSpec::new(args.response, candidate.predictors.iter().copied())?;
        let model = LinearModel::fit(Arc::clone(&data), &spec)?;
        println!("Fitted '{}': {}", candidate.name, spec);
        set.push(candidate.name, model)?;
    }
    let ranked = set.rank()?;
    println!();
    print!("{}", AiccTable(&ranked));
    Ok(())
}

pub fn run_stepwise(args: StepwiseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data = load_working(&args.data)?;
    let spec = spec_from(&args.model)?;
    let options = StepwiseOptions {
        max_steps: args.max_steps,
    };
    let result = stepwise_aic(data, &spec, &options)?;
    println!();
    println!("{}", StepwiseTable(&result));
    print!(
        "{}",
        CoefficientTable {
            model: &result.model,
            vif: None
        }
    );
    Ok(())
}

pub fn run_hierpart(args: HierPartArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data = load_working(&args.data)?;
    let spec = spec_from(&args.model)?;
    let options = PartitionOptions {
        max_predictors: args.max_predictors,
        parallel: !args.serial,
    };
    let partition = hierarchical_partition(&data, &spec, &options, None)?;
    println!();
    print!("{}", PartitionTable(&partition));
    Ok(())
}

pub fn run_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading configuration from: {}", path.display());
    let config = AnalysisConfig::load(&path)?;
    let report = run_analysis(&config)?;
    let outputs = write_outputs(&report, &config.output_dir)?;
    println!("{report}");
    println!("Report written to: {}", outputs.report.display());
    println!(
        "Diagnostic series written to: {} and {}",
        outputs.screening_series.display(),
        outputs.full_series.display()
    );
    Ok(())
}

pub fn init_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!("'{}' already exists; refusing to overwrite", path.display()).into());
    }
    AnalysisConfig::retinol_study().save(&path)?;
    println!("Study configuration written to: {}", path.display());
    Ok(())
}
