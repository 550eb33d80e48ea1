use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use arrow::util::pretty::pretty_format_batches;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use sn_composite::config::RunConfig;
use sn_composite::data::filter::{filtered_indices, mean_of, unique_by};
use sn_composite::data::model::SpectralDataset;
use sn_composite::export::{summary_batch, write_curve_csv, write_set, ExportFormat};
use sn_composite::pipeline::{
    build, correct, extinction_curve, prepare_selection, CompositeSet, ExtinctionConfig,
    ExtinctionLaw, Fm99Variant, Grid,
};

#[derive(Parser)]
#[command(name = "sn-composite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one composite per configured selection
    Build {
        /// Dataset JSON: `{"spectra": [{"wavelength", "flux", "ivar", "metadata"}]}`
        #[arg(short, long)]
        dataset: PathBuf,

        /// TOML run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "composites")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,
    },

    /// Print an extinction curve as CSV
    Curve {
        #[arg(long)]
        min: f64,

        #[arg(long)]
        max: f64,

        #[arg(long, default_value_t = 10.0)]
        step: f64,

        /// Color excess E(B-V) for the correction column
        #[arg(long, default_value_t = 0.0)]
        ebv: f64,

        #[arg(long, value_enum, default_value_t = LawArg::Fitzpatrick99)]
        law: LawArg,

        /// Parameter set for Fitzpatrick (1999)
        #[arg(long, value_enum, default_value_t = VariantArg::MilkyWay)]
        variant: VariantArg,

        #[arg(long, default_value_t = 3.1)]
        rv: f64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Csv,
    Parquet,
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Parquet => ExportFormat::Parquet,
            FormatArg::Json => ExportFormat::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LawArg {
    Fitzpatrick99,
    Cardelli89,
    Odonnell94,
}

impl From<LawArg> for ExtinctionLaw {
    fn from(arg: LawArg) -> Self {
        match arg {
            LawArg::Fitzpatrick99 => ExtinctionLaw::Fitzpatrick99,
            LawArg::Cardelli89 => ExtinctionLaw::Cardelli89,
            LawArg::Odonnell94 => ExtinctionLaw::ODonnell94,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VariantArg {
    MilkyWay,
    Lmc2,
    LmcAverage,
}

impl From<VariantArg> for Fm99Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::MilkyWay => Fm99Variant::MilkyWay,
            VariantArg::Lmc2 => Fm99Variant::Lmc2,
            VariantArg::LmcAverage => Fm99Variant::LmcAverage,
        }
    }
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            dataset,
            config,
            output,
            format,
        } => run_build(&dataset, config.as_deref(), &output, format.into()),
        Commands::Curve {
            min,
            max,
            step,
            ebv,
            law,
            variant,
            rv,
        } => {
            let config = ExtinctionConfig::new(law.into(), rv).with_variant(variant.into());
            run_curve(Grid::new(min, max, step)?, ebv, &config)
        }
    }
}

fn load_dataset(path: &Path) -> Result<SpectralDataset> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let dataset: SpectralDataset = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parsing dataset {}", path.display()))?;
    info!(
        "loaded {} spectra with columns {:?}",
        dataset.len(),
        dataset.column_names
    );
    Ok(dataset)
}

fn run_build(
    dataset: &Path,
    config: Option<&Path>,
    output: &Path,
    format: ExportFormat,
) -> Result<()> {
    let config = match config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    let dataset = load_dataset(dataset)?;
    if !dataset.has_column(&config.catalog.redshift) {
        warn!(
            "no spectrum carries redshift column '{}'",
            config.catalog.redshift
        );
    }

    let set = build_set(&dataset, &config);
    if set.is_empty() {
        bail!("no composite could be built");
    }

    write_set(&set, output, format)?;
    println!("{}", pretty_format_batches(&[summary_batch(&set)?])?);
    Ok(())
}

/// One composite per selection. A selection that yields nothing is logged
/// and left out.
fn build_set(dataset: &SpectralDataset, config: &RunConfig) -> CompositeSet {
    let settings = config.prepare_settings();
    let composite_config = config.composite_config();
    let mut set = CompositeSet::new();

    for selection in config.selections() {
        let mut indices = filtered_indices(dataset, &selection);
        if let Some(column) = &config.catalog.unique_by {
            indices = unique_by(dataset, &indices, column);
        }
        if indices.is_empty() {
            warn!("selection '{}' matches no spectra", selection.label);
            continue;
        }

        let batch = prepare_selection(dataset, &indices, &settings);
        if batch.is_empty() {
            warn!(
                "selection '{}': all {} spectra rejected",
                selection.label,
                indices.len()
            );
            continue;
        }

        let composite = match build(&batch.spectra, &composite_config) {
            Ok(composite) => composite.with_label(selection.label.as_str()),
            Err(err) => {
                warn!("skipping selection '{}': {err}", selection.label);
                continue;
            }
        };
        if let Some(z) = mean_of(dataset, &batch.indices, &config.catalog.redshift) {
            info!(
                "'{}': {} members, mean {} {z:.4}",
                selection.label,
                composite.members().len(),
                config.catalog.redshift
            );
        }
        set.push(composite);
    }
    set
}

fn run_curve(grid: Grid, ebv: f64, config: &ExtinctionConfig) -> Result<()> {
    config.validate()?;
    let wavelength = grid.wavelengths();
    let k = extinction_curve(&wavelength, config)?;
    let correction = correct(&wavelength, ebv, config)?;
    write_curve_csv(&wavelength, &k, &correction, std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_composite::data::filter::{Constraint, Selection};
    use sn_composite::data::model::Spectrum;

    fn flat(flux: f64, kind: &str, name: &str) -> Spectrum {
        let wave = (0..200).map(|i| 4000.0 + i as f64 * 10.0).collect();
        Spectrum::new(wave, vec![flux; 200], vec![4.0; 200])
            .unwrap()
            .with_metadata("redshift", 0.0)
            .with_metadata("kind", kind)
            .with_metadata("name", name)
    }

    fn config() -> RunConfig {
        RunConfig {
            selections: vec![
                Selection::new("dark").with(Constraint::one_of("kind", ["dark"])),
                Selection::new("bright").with(Constraint::one_of("kind", ["bright"])),
                Selection::new("none").with(Constraint::one_of("kind", ["missing"])),
            ],
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_failed_selection_does_not_stop_the_rest() {
        let dataset = SpectralDataset::from_spectra(vec![
            flat(0.0, "dark", "sn-a"),
            flat(0.0, "dark", "sn-b"),
            flat(2.0, "bright", "sn-c"),
            flat(3.0, "bright", "sn-d"),
        ]);
        let set = build_set(&dataset, &config());
        assert_eq!(set.len(), 1);
        let composite = set.iter().next().unwrap();
        assert_eq!(composite.label(), "bright");
        assert_eq!(composite.members().len(), 2);
    }

    #[test]
    fn test_every_selection_failing_gives_empty_set() {
        let dataset = SpectralDataset::from_spectra(vec![flat(0.0, "dark", "sn-a")]);
        assert!(build_set(&dataset, &config()).is_empty());
    }
}
