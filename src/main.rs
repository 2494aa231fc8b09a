use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use yelp_warehouse::{Pipeline, PipelineConfig, PipelineReport, Stage};

#[derive(Parser)]
#[command(name = "yelp-warehouse")]
#[command(about = "Load the Yelp dataset into SQLite, narrow it to a subset and export parquet")]
#[command(version)]
struct Cli {
    /// TOML config file; every key is optional
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the source JSON files, the store and the exports
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage, rebuilding the store unless fresh_store = false
    Run,
    /// Run a single stage against an existing store
    Stage {
        #[arg(value_enum)]
        stage: Stage,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => {
            println!("🗄️  Yelp Warehouse - full rebuild");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            let report = Pipeline::new(&config).run()?;
            print_summary(&report);
        }
        Commands::Stage { stage } => {
            Pipeline::new(&config).run_stage(stage)?;
            println!("✓ Stage {:?} complete", stage);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &cli.data_dir {
        let layout = PipelineConfig::from_data_dir(dir);
        config.store_path = layout.store_path;
        config.sources = layout.sources;
        config.export_dir = layout.export_dir;
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(report: &PipelineReport) {
    println!("\n📂 Loaders");
    for load in &report.loads {
        println!(
            "✓ {:<8} {:>10} records  {:>10} rows  ({} skipped)",
            load.kind.name(),
            load.records,
            load.rows_written,
            load.skipped
        );
    }

    println!("\n🔧 Normalization");
    println!(
        "✓ Feature maps: {} businesses ({} raw rows)",
        report.attributes.businesses, report.attributes.raw_rows
    );
    println!(
        "✓ Schedules:    {} businesses ({} overnight intervals)",
        report.hours.businesses, report.hours.overnight
    );

    println!("\n🧹 Cleanup");
    println!("✓ Businesses removed: {}", report.cleanup.businesses_removed);
    println!("✓ Orphan rows removed: {}", report.cleanup.orphans_total());
    println!("✓ Users removed: {}", report.cleanup.users_removed);

    println!("\n📦 Export");
    for file in &report.export.files {
        println!("✓ {} ({} rows)", file.path.display(), file.rows);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Run {} complete", report.run_id);
}
