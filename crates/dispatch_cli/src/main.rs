mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use dispatch_core::city::CityProfileCache;
use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatch::DispatchCoordinator;
use dispatch_core::geo::{GeoPoint, GridPoint};
use dispatch_core::http::HttpBackend;
use dispatch_core::providers::{OrderSearch, OrderStore};
use dispatch_core::tracking::{TrackingPoller, TrackingRequest};
use dispatch_core::{DispatchError, DispatchResult, OrderStatus};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dispatchctl",
    about = "Operator CLI for the dispatch backend",
    long_about = "Convert coordinates, create and assign orders, and track vehicles\n\
                  against the dispatch REST API. Results are printed as JSON lines."
)]
struct Cli {
    /// JSON config file; DISPATCH_* variables override it
    #[arg(long, env = "DISPATCH_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Backend base URL, overrides the config
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Bearer token forwarded to the backend, overrides the config
    #[arg(long, global = true)]
    token: Option<String>,
    /// Per-request timeout in milliseconds, overrides the config
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Emit logs as JSON
    #[arg(long, env = "DISPATCH_LOG_JSON", global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a grid cell to latitude/longitude
    ToGeo {
        #[arg(long)]
        city: String,
        x: i32,
        y: i32,
    },
    /// Convert latitude/longitude to a grid cell
    ToGrid {
        #[arg(long)]
        city: String,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
    },
    /// Print the operating boundary polygon of a city
    Boundary {
        #[arg(long)]
        city: String,
    },
    /// Create an order after checking both endpoints
    CreateOrder(CreateOrderArgs),
    /// Assign a specific vehicle to a pending order
    Assign { order_id: String, vehicle_id: String },
    /// Assign the nearest idle vehicle to a pending order
    AutoAssign { order_id: String },
    /// Auto-assign several orders; without ids, pending orders are looked up
    BulkAssign {
        order_ids: Vec<String>,
        /// City filter for the pending-order lookup
        #[arg(long)]
        city: Option<String>,
        /// Maximum number of pending orders to look up
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Cancel an order
    Cancel {
        order_id: String,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
    /// Follow an assigned order until the trip completes or Ctrl-C
    Track {
        order_id: String,
        /// Vehicle to follow, defaults to the order's assigned vehicle
        #[arg(long)]
        vehicle: Option<String>,
    },
}

#[derive(Args)]
struct CreateOrderArgs {
    #[arg(long)]
    city: String,
    #[arg(long, allow_negative_numbers = true)]
    pickup_lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    pickup_lon: f64,
    #[arg(long, allow_negative_numbers = true)]
    dropoff_lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    dropoff_lon: f64,
}

// ── helpers ────────────────────────────────────────────────────────

fn emit<T: Serialize>(value: &T) -> DispatchResult<()> {
    let line = serde_json::to_string(value)
        .map_err(|err| DispatchError::InvalidPayload(format!("cannot encode output: {err}")))?;
    println!("{line}");
    Ok(())
}

#[derive(Serialize)]
struct ErrorLine<'a> {
    error: &'a str,
    message: String,
}

fn load_config(cli: &Cli) -> DispatchResult<DispatchConfig> {
    let mut config = match &cli.config {
        Some(path) => DispatchConfig::from_json_file(path)?.with_env_overrides()?,
        None => DispatchConfig::from_env()?,
    };
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.clone());
    }
    if let Some(token) = &cli.token {
        config = config.with_bearer_token(token.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config = config.with_request_timeout_ms(timeout_ms);
    }
    Ok(config)
}

/// Backend handles shared by every command.
struct Context {
    config: DispatchConfig,
    backend: Arc<HttpBackend>,
    cities: Arc<CityProfileCache>,
}

impl Context {
    fn new(config: DispatchConfig) -> DispatchResult<Self> {
        let backend = Arc::new(HttpBackend::new(&config)?);
        let cities = Arc::new(
            CityProfileCache::new(backend.clone()).with_load_timeout(config.request_timeout()),
        );
        Ok(Self {
            config,
            backend,
            cities,
        })
    }

    fn coordinator(&self) -> DispatchCoordinator {
        DispatchCoordinator::new(self.cities.clone(), self.backend.clone(), self.backend.clone())
            .with_config(&self.config)
            .with_bulk_finder(self.backend.clone())
    }
}

// ── commands ───────────────────────────────────────────────────────

async fn run(ctx: Context, command: Commands) -> DispatchResult<()> {
    match command {
        Commands::ToGeo { city, x, y } => {
            ctx.cities.try_load().await?;
            emit(&ctx.cities.grid_to_geo(GridPoint::new(x, y), &city)?)
        }
        Commands::ToGrid { city, lat, lon } => {
            ctx.cities.try_load().await?;
            emit(&ctx.cities.geo_to_grid(GeoPoint::new(lat, lon), &city)?)
        }
        Commands::Boundary { city } => {
            let polygon = ctx
                .coordinator()
                .validator()
                .build_boundary_polygon_with_retry(&city)
                .await?;
            emit(&polygon)
        }
        Commands::CreateOrder(args) => {
            let order = ctx
                .coordinator()
                .create_order(
                    GeoPoint::new(args.pickup_lat, args.pickup_lon),
                    GeoPoint::new(args.dropoff_lat, args.dropoff_lon),
                    &args.city,
                )
                .await?;
            emit(&order)
        }
        Commands::Assign {
            order_id,
            vehicle_id,
        } => emit(&ctx.coordinator().assign_vehicle(&order_id, &vehicle_id).await?),
        Commands::AutoAssign { order_id } => {
            emit(&ctx.coordinator().auto_assign_nearest(&order_id).await?)
        }
        Commands::BulkAssign {
            order_ids,
            city,
            limit,
        } => {
            let coordinator = ctx.coordinator();
            let report = if order_ids.is_empty() {
                coordinator
                    .bulk_auto_assign_pending(&OrderSearch {
                        city_id: city,
                        limit,
                    })
                    .await?
            } else {
                coordinator.bulk_auto_assign(&order_ids).await
            };
            emit(&report)
        }
        Commands::Cancel { order_id, reason } => {
            emit(&ctx.coordinator().cancel_order(&order_id, &reason).await?)
        }
        Commands::Track { order_id, vehicle } => track(&ctx, order_id, vehicle).await,
    }
}

async fn track(ctx: &Context, order_id: String, vehicle: Option<String>) -> DispatchResult<()> {
    let order = ctx.backend.get(&order_id).await?;
    let vehicle_id = vehicle
        .or_else(|| order.assigned_vehicle_id.clone())
        .ok_or_else(|| DispatchError::InvalidState {
            order_id: order_id.clone(),
            from: order.status,
            to: OrderStatus::EnRouteToPickup,
        })?;
    ctx.cities.try_load().await?;
    let request = TrackingRequest {
        pickup: ctx.cities.geo_to_grid(order.pickup, &order.city_id)?,
        dropoff: ctx.cities.geo_to_grid(order.dropoff, &order.city_id)?,
        order_id,
        vehicle_id,
    };

    let poller = TrackingPoller::start(
        request,
        ctx.backend.clone(),
        Some(ctx.backend.clone()),
        ctx.config.tracking(),
    )
    .await;
    let mut updates = poller.subscribe();
    let first = updates.borrow_and_update().clone();
    emit(&first)?;

    let mut stopped = first.is_stopped();
    while !stopped {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = updates.borrow_and_update().clone();
                stopped = session.is_stopped();
                emit(&session)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                poller.stop();
                stopped = true;
            }
        }
    }
    poller.join().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    let result = match load_config(&cli).and_then(Context::new) {
        Ok(ctx) => run(ctx, cli.command).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = err.kind(), error = %err, "command failed");
            let _ = emit(&ErrorLine {
                error: err.kind(),
                message: err.to_string(),
            });
            ExitCode::FAILURE
        }
    }
}
