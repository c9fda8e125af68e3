use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Database connection establishment failed");
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Applies every pending migration from [`crate::migrator::Migrator`]
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_pool() -> Result<DbPool, ServiceError> {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        establish_connection_with_config(&config).await
    }

    #[tokio::test]
    async fn test_run_migrations_is_repeatable() {
        let pool = setup_test_pool()
            .await
            .expect("Failed to establish connection");
        assert!(run_migrations(&pool).await.is_ok());
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn migrated_sqlite_schema_stores_money_columns() {
        use crate::entities::product;
        use rust_decimal_macros::dec;
        use sea_orm::{ActiveModelTrait, EntityTrait, Set};

        let pool = setup_test_pool()
            .await
            .expect("Failed to establish connection");
        run_migrations(&pool).await.expect("migrations");

        let now = chrono::Utc::now();
        let id = uuid::Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set("Widget".into()),
            price: Set(dec!(25.50)),
            currency: Set("usd".into()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&pool)
        .await
        .expect("insert product");

        let stored = product::Entity::find_by_id(id).one(&pool).await.unwrap().unwrap();
        assert_eq!(stored.price, dec!(25.50));
    }

    #[test]
    fn db_config_follows_app_config() {
        let mut app = AppConfig::new(
            "postgres://localhost/shop".into(),
            "0.0.0.0".into(),
            8080,
            "development".into(),
        );
        app.db_max_connections = 32;
        app.db_acquire_timeout_secs = 3;

        let cfg = DbConfig::from(&app);
        assert_eq!(cfg.url, "postgres://localhost/shop");
        assert_eq!(cfg.max_connections, 32);
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(3));
    }
}
