/**
 * INFRASTRUCTURE LAYER - Application Entry Point
 *
 * Main: the conductor - orchestrating repositories, workflows, and
 * routes into one running service.
 *
 * Startup flow:
 * 1. Initialize logging (tracing)
 * 2. Load configuration from environment
 * 3. Create the database connection pool
 * 4. Initialize repositories
 * 5. Initialize workflows with their repository dependencies
 * 6. Build the router
 * 7. Start the HTTP server
 */

mod auth;
mod config;
mod db;
mod error;
mod gateway;
mod handler;
mod ledger;
mod repository;
mod workflow;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::AllowAdminChecker;
use gateway::stripe::StripeGatewayAdapter;
use repository::route_passes::RoutePassRepository;
use repository::tickets::TicketRepository;
use repository::transactions::TransactionRepository;
use repository::trips::TripRepository;
use workflow::cancel::CancelSaleWorkflow;
use workflow::refund::RefundWorkflow;
use workflow::route_pass_purchase::RoutePassPurchaseWorkflow;
use workflow::sale::SaleWorkflow;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bukr_ledger=info,tower_http=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let cfg = config::Config::from_env();

    let addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!("bukr ledger engine starting on {}", addr);

    let app = if cfg.database_url.is_empty() {
        tracing::warn!("DATABASE_URL not set — running in health-only mode");
        Router::new().route("/health", get(handler::health)).layer(CorsLayer::permissive())
    } else {
        let pool = db::create_pool(&cfg.database_url).await;
        build_router(pool, cfg)
    };

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Dependency injection: repositories first, workflows on top of them,
/// handlers only ever see the workflows (never a repository directly).
fn build_router(pool: sqlx::PgPool, cfg: config::Config) -> Router {
    let trip_repo = TripRepository::new(pool.clone());
    let ticket_repo = TicketRepository::new(pool.clone());
    let pass_repo = RoutePassRepository::new(pool.clone());
    let transaction_repo = TransactionRepository::new(pool.clone());

    let gateway: Arc<dyn gateway::PaymentGatewayAdapter> = Arc::new(StripeGatewayAdapter::new(&cfg));
    let admin_checker: Arc<dyn auth::AdminRoleChecker> = Arc::new(AllowAdminChecker);

    let sale = SaleWorkflow::new(pool.clone(), cfg.clone(), trip_repo.clone(), ticket_repo.clone(), pass_repo.clone(), transaction_repo.clone());
    let cancel = CancelSaleWorkflow::new(pool.clone(), ticket_repo.clone(), transaction_repo.clone());
    let route_pass_purchase = RoutePassPurchaseWorkflow::new(pool.clone(), trip_repo.clone(), pass_repo.clone(), transaction_repo.clone());
    let refund = RefundWorkflow::new(pool.clone(), cfg.idempotency_tag.clone(), ticket_repo, pass_repo, transaction_repo, admin_checker);

    let state = Arc::new(handler::AppState { sale, cancel, route_pass_purchase, refund, gateway });

    let ledger_routes = Router::new()
        .route("/sale", post(handler::sell_tickets))
        .route("/sale/cancel", post(handler::cancel_sale))
        .route("/route-passes/purchase", post(handler::purchase_route_pass))
        .route("/refund/ticket", post(handler::refund_ticket))
        .route("/refund/route-pass", post(handler::refund_route_pass))
        .with_state(state);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(handler::health))
        .nest("/api/v1/ledger", ledger_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
