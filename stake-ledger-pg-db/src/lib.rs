// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Postgres connection pool for the stake ledger, with optional TLS and embedded migrations.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use diesel::migration::{Migration, MigrationSource, MigrationVersion};
use diesel::pg::Pg;
use diesel::ConnectionError;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::{
    pooled_connection::{
        bb8::{Pool, PooledConnection},
        AsyncDieselConnectionManager,
    },
    AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::EmbeddedMigrations;
use futures::FutureExt;
use tracing::info;
use url::Url;

use tls::{build_tls_config, establish_tls_connection};

pub mod tls;

#[derive(clap::Args, Debug, Clone)]
pub struct DbArgs {
    // Number of connections to keep in the pool.
    #[arg(long, default_value_t = Self::default().db_connection_pool_size)]
    pub db_connection_pool_size: u32,

    // Time spent waiting for a connection from the pool to become available, in milliseconds.
    #[arg(long, default_value_t = Self::default().db_connection_timeout_ms)]
    pub db_connection_timeout_ms: u64,

    // Time spent waiting for statements to complete, in milliseconds.
    #[arg(long)]
    pub db_statement_timeout_ms: Option<u64>,

    // Verify the server certificate. Off by default, like libpq.
    #[arg(long)]
    pub tls_verify_cert: bool,

    // Extra CA certificate (PEM or DER) trusted when verifying the server.
    #[arg(long)]
    pub tls_ca_cert_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<AsyncPgConnection>,
    database_url: String,
    tls_config: rustls::ClientConfig,
}

pub struct Connection<'a>(PooledConnection<'a, AsyncPgConnection>);

impl DbArgs {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connection_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.db_statement_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for DbArgs {
    fn default() -> Self {
        Self {
            db_connection_pool_size: 16,
            db_connection_timeout_ms: 60_000,
            db_statement_timeout_ms: None,
            tls_verify_cert: false,
            tls_ca_cert_path: None,
        }
    }
}

impl Db {
    // Pool whose connections may read and write. Clones share the pool.
    pub async fn for_write(database_url: Url, args: DbArgs) -> anyhow::Result<Self> {
        let tls_config = build_tls_config(args.tls_verify_cert, args.tls_ca_cert_path.as_deref())?;
        let pool = pool(&database_url, &args, tls_config.clone()).await?;
        Ok(Self {
            pool,
            database_url: database_url.to_string(),
            tls_config,
        })
    }

    // Fails once [DbArgs::connection_timeout] elapses without a free connection.
    pub async fn connect(&self) -> anyhow::Result<Connection<'_>> {
        Ok(Connection(self.pool.get().await?))
    }

    pub fn state(&self) -> bb8::State {
        self.pool.state()
    }

    // Round trip used as a startup health check.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.connect().await?;
        diesel::sql_query("SELECT 1").execute(&mut conn).await?;
        Ok(())
    }

    // Applies every pending migration from `migrations` over a dedicated TLS connection. Diesel's
    // harness is synchronous, so it runs on the blocking pool.
    pub async fn run_migrations(
        &self,
        migrations: &'static EmbeddedMigrations,
    ) -> anyhow::Result<Vec<MigrationVersion<'static>>> {
        use diesel_migrations::MigrationHarness;

        info!("[Db] Running migrations");
        let conn = establish_tls_connection(&self.database_url, self.tls_config.clone())
            .await
            .map_err(|e| anyhow!("Failed to connect for migrations: {e}"))?;
        let mut wrapper: AsyncConnectionWrapper<AsyncPgConnection> = conn.into();

        let applied: Vec<MigrationVersion<'static>> = tokio::task::spawn_blocking(move || {
            wrapper
                .run_pending_migrations(LedgerMigrations(migrations))
                .map(|versions| versions.iter().map(MigrationVersion::as_owned).collect())
        })
        .await?
        .map_err(|e| anyhow!("Failed to run migrations: {e:?}"))?;

        info!("[Db] Applied {} migrations", applied.len());
        Ok(applied)
    }

    async fn drop_public_tables(&self) -> anyhow::Result<()> {
        let mut conn = self.connect().await?;
        diesel::sql_query(
            "
            DO $$ DECLARE
                r RECORD;
            BEGIN
            FOR r IN (SELECT tablename FROM pg_tables WHERE schemaname = 'public')
                LOOP
                    EXECUTE 'DROP TABLE IF EXISTS ' || quote_ident(r.tablename) || ' CASCADE';
                END LOOP;
            END $$;",
        )
        .execute(&mut conn)
        .await?;
        info!("[Db] Dropped all tables");
        Ok(())
    }
}

// Drops every table in the public schema, migration bookkeeping included, then re-applies
// `migrations` when given.
pub async fn reset_database(
    database_url: Url,
    args: DbArgs,
    migrations: Option<&'static EmbeddedMigrations>,
) -> anyhow::Result<()> {
    let db = Db::for_write(database_url, args).await?;
    db.drop_public_tables().await?;
    if let Some(migrations) = migrations {
        db.run_migrations(migrations).await?;
    }
    Ok(())
}

impl<'a> Deref for Connection<'a> {
    type Target = PooledConnection<'a, AsyncPgConnection>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Connection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

async fn pool(
    database_url: &Url,
    args: &DbArgs,
    tls_config: rustls::ClientConfig,
) -> anyhow::Result<Pool<AsyncPgConnection>> {
    let statement_timeout = args.statement_timeout();

    let mut config = ManagerConfig::default();
    config.custom_setup = Box::new(move |url| {
        let tls_config = tls_config.clone();

        async move {
            let mut conn = establish_tls_connection(url, tls_config).await?;

            if let Some(timeout) = statement_timeout {
                diesel::sql_query(format!("SET statement_timeout = {}", timeout.as_millis()))
                    .execute(&mut conn)
                    .await
                    .map_err(ConnectionError::CouldntSetupConfiguration)?;
            }

            Ok(conn)
        }
        .boxed()
    });

    let manager = AsyncDieselConnectionManager::new_with_config(database_url.as_str(), config);

    Ok(Pool::builder()
        .max_size(args.db_connection_pool_size)
        .connection_timeout(args.connection_timeout())
        .build(manager)
        .await?)
}

struct LedgerMigrations(&'static EmbeddedMigrations);

impl MigrationSource<Pg> for LedgerMigrations {
    fn migrations(&self) -> diesel::migration::Result<Vec<Box<dyn Migration<Pg>>>> {
        self.0.migrations()
    }
}
