/// Product Inventory Backend Application
///
/// This is the main entry point for the Product Inventory Backend service.
/// The application provides REST API endpoints for creating products with
/// variants and sub-variants and for tracking stock levels through
/// purchase/sale transactions.
///
/// # Architecture
///
/// The application follows a modular architecture with:
/// - Repository layer for data access
/// - Service layer for business logic
/// - API layer for HTTP endpoints
/// - Metrics for monitoring
///
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use app_config::AppConfig;
use repository::{PgProductsRepository, PgStockRepository};
use server::Server;
use service::{ProductService, ProductServiceImpl, StockService, StockServiceImpl};
use tokio_postgres::NoTls;

/// Initialize the tracing subscriber for logging
fn init_logger() -> Result<()> {
    tracing_subscriber::fmt::init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    if let Err(err) = init_logger() {
        eprintln!("Failed to initialize logger: {}", err);
        return Err(anyhow::anyhow!("Failed to initialize logger"));
    }

    info!("Product Inventory Backend starting...");

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize database pool and apply migrations
    let db_pool = match db::init_db_pool(&config).await {
        Ok(pool) => {
            info!("Database initialized successfully");
            pool
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            error!("Database connection is required for application to function properly");
            return Err(anyhow::anyhow!("Failed to initialize database"));
        }
    };

    // The products repository runs its paginated reads on a dedicated
    // connection (tokio_postgres::Client is not Clone); transactional
    // writes go through the pool held by the services.
    let dsn = format!(
        "host={} port={} user={} password={} dbname={} sslmode=disable",
        config.db_host, config.db_port, config.db_user, config.db_password, config.db_name
    );
    let (products_client, products_connection) = match tokio_postgres::connect(&dsn, NoTls).await {
        Ok((client, connection)) => {
            info!("Successfully connected to database for products repository");
            (client, connection)
        }
        Err(e) => {
            error!("Failed to connect to database for products repository: {}", e);
            return Err(anyhow::anyhow!(
                "Failed to connect to database for products repository"
            ));
        }
    };
    tokio::spawn(async move {
        if let Err(e) = products_connection.await {
            error!("Products connection error: {}", e);
        }
    });

    // Initialize repositories
    let products_repo = PgProductsRepository::new(products_client);
    let stock_repo = PgStockRepository::new();

    // Initialize services
    let product_service: Arc<dyn ProductService> =
        Arc::new(ProductServiceImpl::new(db_pool.clone(), products_repo));
    let stock_service: Arc<dyn StockService> =
        Arc::new(StockServiceImpl::new(db_pool, stock_repo));

    // Start HTTP server
    let http_port = config.http_port.to_string();
    info!("Using HTTP port: {}", http_port);

    let http_server = Server::new(
        http_port,
        product_service,
        stock_service,
        config.static_dir.clone(),
    );
    if let Err(err) = http_server.start().await {
        error!("HTTP server error: {}", err);
        return Err(err);
    }

    info!("Application stopped");
    Ok(())
}
