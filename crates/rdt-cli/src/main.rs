//! rdt-cli entry point: the operator's door into the workspace without a
//! running daemon — database bootstrap, config inspection, and one-off
//! journey registration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rdt_monitor::JourneyMonitor;
use rdt_schemas::MonitoringStatus;
use std::process::Command;

#[derive(Parser)]
#[command(name = "rdt")]
#[command(about = "Rail delay tracker operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Register a new journey for monitoring
    Register {
        #[arg(long)]
        journey_id: String,
        #[arg(long)]
        user_id: String,
        /// Service date, YYYY-MM-DD
        #[arg(long)]
        service_date: chrono::NaiveDate,
        #[arg(long)]
        origin: String,
        #[arg(long)]
        destination: String,
        /// Scheduled departure, RFC 3339
        #[arg(long)]
        departure: chrono::DateTime<chrono::Utc>,
        /// Scheduled arrival, RFC 3339
        #[arg(long)]
        arrival: chrono::DateTime<chrono::Utc>,
    },

    /// Cancel a monitored journey on explicit request (not an observed
    /// upstream cancellation — that path runs inside the detection cycle).
    Cancel {
        #[arg(long)]
        journey_id: String,
    },

    /// Run the HTTP daemon (thin wrapper over the rdt-daemon binary)
    Serve,
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = rdt_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let row: (i64,) = sqlx::query_as("select count(*) from delay_tracker.monitored_journeys")
                        .fetch_one(&pool)
                        .await
                        .context("db status query failed")?;
                    println!("db_ok=true monitored_journeys={}", row.0);
                }
                DbCmd::Migrate => {
                    rdt_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            let loaded = rdt_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Register { journey_id, user_id, service_date, origin, destination, departure, arrival } => {
            let pool = rdt_db::connect_from_env().await?;

            let now = chrono::Utc::now();
            let monitor = JourneyMonitor::with_default_interval();
            let next_check_at = monitor.next_check_at_on_registration(now, departure);

            let mut tx = pool.begin().await.context("register: begin")?;

            let journey = rdt_db::create_journey(
                &mut *tx,
                &rdt_db::NewMonitoredJourney {
                    journey_id: journey_id.clone(),
                    user_id: user_id.clone(),
                    service_date,
                    origin_code: origin.clone(),
                    destination_code: destination.clone(),
                    scheduled_departure: departure,
                    scheduled_arrival: arrival,
                    monitoring_status: MonitoringStatus::PendingRid,
                    next_check_at: Some(next_check_at),
                },
            )
            .await
            .context("register: create journey")?;

            let event = rdt_outbox::build_journey_monitoring_started(
                journey.id,
                &journey.journey_id,
                &journey.user_id,
                &origin,
                &destination,
                departure,
                None,
            );
            rdt_db::insert_outbox_event(&mut *tx, &event).await.context("register: journey.monitoring_started outbox")?;

            tx.commit().await.context("register: commit")?;

            println!("monitored_journey_id={}", journey.id);
            println!("journey_id={}", journey.journey_id);
            println!("next_check_at={}", next_check_at.to_rfc3339());
        }

        Commands::Cancel { journey_id } => {
            let pool = rdt_db::connect_from_env().await?;

            let journey = rdt_db::find_journey_by_external_id(&pool, &journey_id)
                .await
                .context("cancel: lookup journey")?
                .with_context(|| format!("journey_id {journey_id} not found"))?;

            let current = journey.status().context("cancel: decode current status")?;
            let monitor = JourneyMonitor::with_default_interval();
            let next_check_at = monitor
                .apply_transition(current, MonitoringStatus::Cancelled, chrono::Utc::now())
                .map_err(anyhow::Error::new)
                .context("cancel: invalid transition")?;

            let mut tx = pool.begin().await.context("cancel: begin")?;

            rdt_db::update_status(&mut *tx, journey.id, MonitoringStatus::Cancelled, None, next_check_at)
                .await
                .context("cancel: update status")?;

            let event = rdt_outbox::build_journey_cancelled(journey.id, &journey.journey_id, &journey.user_id, None);
            rdt_db::insert_outbox_event(&mut *tx, &event).await.context("cancel: journey.cancelled outbox")?;

            tx.commit().await.context("cancel: commit")?;

            println!("monitored_journey_id={}", journey.id);
            println!("journey_id={}", journey.journey_id);
            println!("monitoring_status=cancelled");
        }

        Commands::Serve => {
            let status = Command::new("rdt-daemon").status().context("failed to launch rdt-daemon")?;
            if !status.success() {
                anyhow::bail!("rdt-daemon exited with {status}");
            }
        }
    }

    Ok(())
}
