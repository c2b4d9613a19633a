pub mod aggregate;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod point;
pub mod server;
pub mod source;
pub mod types;

use aggregate::{aggregate, Mode};
use catalog::CatalogCache;
use clap::{Parser, Subcommand};
use serde_json::json;
use source::RecordSource;
use std::path::PathBuf;
use std::sync::Arc;
use types::EnrollmentFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the region aggregation API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Aggregate one batch and print the result as JSON
    Summarize {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Only count students per region
        #[arg(long)]
        counts: bool,
        #[arg(long, value_name = "ID")]
        course: Option<String>,
        #[arg(long, value_name = "ID")]
        semester: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            tracing::info!("Serving with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;

            // A bad boundary file fails here, before the server binds.
            let catalogs = CatalogCache::new();
            let state = server::AppState::new(
                &catalogs,
                app_config.boundary_source(),
                Arc::new(app_config.record_source()),
            )?;

            server::start_server(app_config.server.port, state).await?;
        }
        Commands::Summarize {
            config,
            counts,
            course,
            semester,
        } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let catalog = catalog::load_catalog(&app_config.boundary_source())?;
            let source = app_config.record_source();

            let output = if counts {
                let records = source.student_locations()?;
                json!(aggregate(&catalog, &records, Mode::CountOnly).finalize().counts)
            } else {
                let filter = EnrollmentFilter {
                    course_id: course,
                    semester_id: semester,
                }
                .normalized();
                let batch = source.enrollment_gpas(&filter)?;
                let summary = aggregate(&catalog, &batch.records, Mode::Weighted).finalize();
                serde_json::to_value(server::GpaByRegionResponse {
                    average_gpa: summary.averages,
                    student_counts: summary.counts,
                    course_info: batch.course,
                })?
            };

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
