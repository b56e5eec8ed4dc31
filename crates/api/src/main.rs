// Bistro API Server
// Multi-tenant REST API: one schema per restaurant, one pool per schema

mod config;
mod handlers;
mod middleware;
mod routes;

use anyhow::Context;
use bistro_database::{Database, TenantRepository};
use bistro_tenant::{PgPoolFactory, Tenancy, TenantGate};
use clap::{Parser, Subcommand};
use config::Config;
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Bistro multi-tenant API server
#[derive(Parser)]
#[command(name = "bistro-api", version, about = "Multi-tenant restaurant API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Provision a tenant: registry record, schema and baseline tables
    CreateTenant {
        #[arg(long)]
        name: String,
        #[arg(long)]
        slug: String,
    },
    /// Soft-deactivate a tenant
    DeactivateTenant {
        #[arg(long)]
        id: Uuid,
    },
    /// Create the landlord tenant registry table
    MigrateLandlord,
    /// Re-apply baseline migrations to every active tenant schema
    MigrateTenants,
}

pub struct AppState {
    pub config: Config,
    pub landlord: Database,
    pub tenancy: Arc<Tenancy<PgPoolFactory>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,bistro_api=debug,bistro_tenant=debug,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let landlord = Database::new(config.database.clone())
        .await
        .context("Failed to connect to landlord database")?;
    landlord.ping().await.context("Landlord database ping failed")?;
    tracing::info!("Landlord database connected");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, landlord).await,
        Command::MigrateLandlord => {
            TenantRepository::new(landlord.pool().clone())
                .ensure_schema()
                .await
                .context("Failed to create tenant registry")?;
            tracing::info!("Tenant registry is up to date");
            Ok(())
        }
        Command::CreateTenant { name, slug } => {
            let tenancy = connect_tenancy(&config, &landlord).await?;
            let tenant = tenancy.create_tenant(&name, &slug).await?;
            println!("{}", serde_json::to_string_pretty(&tenant)?);
            tenancy.shutdown().await;
            Ok(())
        }
        Command::DeactivateTenant { id } => {
            let tenancy = connect_tenancy(&config, &landlord).await?;
            let tenant = tenancy.deactivate_tenant(id).await?;
            tracing::info!(
                tenant_id = %tenant.id,
                slug = %tenant.slug,
                "Tenant deactivated; running servers stop serving it once their directory cache expires"
            );
            tenancy.shutdown().await;
            Ok(())
        }
        Command::MigrateTenants => {
            let tenancy = connect_tenancy(&config, &landlord).await?;
            let report = tenancy.migrate_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            tenancy.shutdown().await;
            if report.failed.is_empty() {
                Ok(())
            } else {
                anyhow::bail!("{} tenant schema(s) failed to migrate", report.failed.len())
            }
        }
    }
}

async fn connect_tenancy(config: &Config, landlord: &Database) -> anyhow::Result<Tenancy<PgPoolFactory>> {
    Tenancy::connect(config.tenancy.clone(), landlord, &config.cluster)
        .await
        .context("Failed to initialize tenancy")
}

async fn serve(config: Config, landlord: Database) -> anyhow::Result<()> {
    tracing::info!("Starting Bistro API Server");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Server: {}:{}", config.server_host, config.server_port);

    let tenancy = Arc::new(connect_tenancy(&config, &landlord).await?);
    tenancy.start_sweeper();
    tracing::info!(
        max_live_pools = config.tenancy.max_live_pools,
        max_connections_per_pool = config.tenancy.max_connections_per_pool,
        connection_ceiling = config.tenancy.connection_ceiling(),
        "Tenant pool registry initialized"
    );
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN not set - admin API is disabled");
    }

    let gate = TenantGate::new(tenancy.clone(), routes::route_policy())?;
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = Arc::new(AppState {
        config,
        landlord: landlord.clone(),
        tenancy: tenancy.clone(),
    });

    let app = routes::create_router(state, gate).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("Server ready at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Draining tenant pools");
    tenancy.shutdown().await;
    landlord.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
