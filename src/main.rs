//! inrep-cat CLI: validate item banks and evaluate CAT designs by simulation.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use ndarray::Array1;
use tracing_subscriber::EnvFilter;

use inrep_cat::{
    conditional_statistics, population_statistics, CatConfig, CatEngine, ConditionalStats,
    ModelFamily, PopulationStats,
};

#[derive(Parser)]
#[command(name = "inrep-cat", version, about = "Computerized adaptive testing engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an item bank against a configuration
    Validate {
        /// Item bank JSON (array of item rows)
        #[arg(long)]
        bank: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// IRT model when no config is given: 1PL, 2PL, 3PL, GRM
        #[arg(long, default_value = "2PL")]
        model: String,
    },

    /// Simulate sessions and report conditional bias, MSE and test length
    Simulate {
        /// Item bank JSON (array of item rows)
        #[arg(long)]
        bank: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// IRT model when no config is given: 1PL, 2PL, 3PL, GRM
        #[arg(long, default_value = "2PL")]
        model: String,

        /// True abilities to simulate (comma-separated)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "-2,-1,0,1,2")]
        theta: Vec<f64>,

        /// Sessions per true ability
        #[arg(long, default_value = "100")]
        replications: usize,

        /// Draw this many simulees from the prior instead of fixed thetas
        #[arg(long)]
        population: Option<usize>,

        /// Base random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print the default configuration as TOML
    DefaultConfig {
        /// IRT model: 1PL, 2PL, 3PL, GRM
        #[arg(long, default_value = "2PL")]
        model: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inrep_cat=warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate {
            bank,
            config,
            model,
        } => validate(&bank, config.as_deref(), &model),
        Commands::Simulate {
            bank,
            config,
            model,
            theta,
            replications,
            population,
            seed,
            format,
        } => {
            let design = match population {
                Some(n) => Design::Population(n),
                None => Design::Conditional {
                    thetas: &theta,
                    replications,
                },
            };
            simulate(&bank, config.as_deref(), &model, design, seed, &format)
        }
        Commands::DefaultConfig { model } => default_config(&model),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>, model: &str) -> Result<CatConfig> {
    match path {
        Some(path) => CatConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => {
            let model: ModelFamily = model.parse()?;
            Ok(CatConfig::new(model))
        }
    }
}

fn validate(bank_path: &Path, config_path: Option<&Path>, model: &str) -> Result<()> {
    let config = load_config(config_path, model)?;
    let bank = config
        .load_bank(bank_path)
        .with_context(|| format!("failed to load item bank {}", bank_path.display()))?;
    CatEngine::new(&bank, &config)?;

    let grid = Array1::linspace(config.estimator.theta_min, config.estimator.theta_max, 121);
    let curve = bank.information_curve(&grid);
    let (peak_idx, peak_info) = curve
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &info)| {
            if info > best.1 {
                (i, info)
            } else {
                best
            }
        });

    println!(
        "Item bank: {} items ({}, up to {} categories)",
        bank.len(),
        bank.model(),
        bank.max_categories()
    );
    println!(
        "Bank information peaks at theta {:.2} (I = {:.2}, SE = {:.3})",
        grid[peak_idx],
        peak_info,
        1.0 / peak_info.sqrt()
    );
    println!(
        "Estimator: {}, selection: {}, stopping: {}-{} items",
        config.estimator.method,
        config.selection.criterion,
        config.stopping.min_items,
        config.stopping.max_items
    );
    if bank.len() < config.stopping.max_items {
        println!(
            "  WARNING: bank has fewer items than max_items ({} < {})",
            bank.len(),
            config.stopping.max_items
        );
    }
    println!("Configuration valid.");
    Ok(())
}

enum Design<'a> {
    Conditional {
        thetas: &'a [f64],
        replications: usize,
    },
    Population(usize),
}

fn simulate(
    bank_path: &Path,
    config_path: Option<&Path>,
    model: &str,
    design: Design<'_>,
    seed: u64,
    format: &str,
) -> Result<()> {
    let config = load_config(config_path, model)?;
    let bank = config
        .load_bank(bank_path)
        .with_context(|| format!("failed to load item bank {}", bank_path.display()))?;
    let engine = CatEngine::new(&bank, &config)?;

    match design {
        Design::Conditional {
            thetas,
            replications,
        } => {
            anyhow::ensure!(!thetas.is_empty(), "at least one theta is required");
            anyhow::ensure!(replications >= 1, "replications must be at least 1");
            let stats = conditional_statistics(&engine, thetas, replications, seed)?;
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
                "text" => print_summary(&stats, replications),
                other => anyhow::bail!("unknown format: {other}"),
            }
        }
        Design::Population(n) => {
            anyhow::ensure!(n >= 1, "population must be at least 1");
            let stats = population_statistics(&engine, n, seed)?;
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
                "text" => print_population(&stats),
                other => anyhow::bail!("unknown format: {other}"),
            }
        }
    }
    Ok(())
}

fn default_config(model: &str) -> Result<()> {
    let config = CatConfig::new(model.parse()?);
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn print_summary(stats: &[ConditionalStats], replications: usize) {
    let mut table = Table::new();
    table.set_header(vec!["Theta", "Bias", "MSE", "Mean items", "Mean SE"]);

    for s in stats {
        table.add_row(vec![
            Cell::new(format!("{:.2}", s.true_theta)),
            Cell::new(format!("{:+.3}", s.bias)),
            Cell::new(format!("{:.3}", s.mse)),
            Cell::new(format!("{:.1}", s.mean_items)),
            Cell::new(format!("{:.3}", s.mean_se)),
        ]);
    }

    println!("{table}");
    println!("{replications} replication(s) per theta.");
}

fn print_population(stats: &PopulationStats) {
    let mut table = Table::new();
    table.set_header(vec!["Simulees", "Bias", "RMSE", "Mean items", "Mean SE"]);
    table.add_row(vec![
        Cell::new(stats.n_simulees),
        Cell::new(format!("{:+.3}", stats.bias)),
        Cell::new(format!("{:.3}", stats.rmse)),
        Cell::new(format!("{:.1}", stats.mean_items)),
        Cell::new(format!("{:.3}", stats.mean_se)),
    ]);
    println!("{table}");
}
