use crate::models::{Dsn, MysqlConfig, QueryOutcome, Record, RowError};
use crate::services::bridge_service::LocalBridge;
use crate::services::transport::{Dialer, TransportRegistry};
use crate::utils::error::{Result, TunnelError};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Statement run by the CLI when no other query is given
pub const DEFAULT_QUERY: &str = "SELECT id, name FROM `table` ORDER BY id";

/// A MySQL connection whose network traffic goes through a registered
/// transport instead of the local network stack.
pub struct TunneledDatabase {
    conn: Option<Conn>,
    bridge: LocalBridge,
    dialer: Arc<dyn Dialer>,
    dsn: Dsn,
}

impl TunneledDatabase {
    /// Connect to the database described by `config` through `transport`
    pub async fn open(
        config: &MysqlConfig,
        transport: &str,
        registry: &TransportRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let dsn = Dsn::for_mysql(config, transport);
        Self::open_dsn(&dsn, registry, config.connect_timeout()).await
    }

    /// Connect using an explicit DSN; the connection is pinged before
    /// it is handed out.
    pub async fn open_dsn(
        dsn: &Dsn,
        registry: &TransportRegistry,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let dialer = registry.get(&dsn.transport).await.ok_or_else(|| {
            TunnelError::Config(format!("transport '{}' is not registered", dsn.transport))
        })?;

        tracing::info!("Opening database {}", dsn.redacted());

        // From here on, returning early drops the bridge, which stops it.
        // The driver opens exactly one connection.
        let bridge = LocalBridge::start_with_limit(dialer.clone(), &dsn.address(), Some(1)).await?;
        let opts = driver_opts(dsn, bridge.local_addr())?;

        let mut conn = match tokio::time::timeout(connect_timeout, Conn::new(opts)).await {
            Err(_) => {
                return Err(TunnelError::Connect(format!(
                    "timed out after {:?} connecting to {}",
                    connect_timeout,
                    dsn.address()
                )))
            }
            Ok(Err(e)) => {
                return Err(TunnelError::Connect(format!("{}: {}", dsn.address(), e)));
            }
            Ok(Ok(conn)) => conn,
        };

        if let Err(e) = conn.ping().await {
            let _ = conn.disconnect().await;
            return Err(TunnelError::Connect(format!(
                "ping to {} failed: {}",
                dsn.address(),
                e
            )));
        }

        tracing::info!("Connected to database {} via '{}'", dsn.database, dsn.transport);
        Ok(Self {
            conn: Some(conn),
            bridge,
            dialer,
            dsn: dsn.clone(),
        })
    }

    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn ping(&mut self) -> Result<()> {
        let conn = self.conn_mut()?;
        match conn.ping().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.classify(e)),
        }
    }

    /// Run `sql` and decode every row as `(id, name)`.
    ///
    /// Rows that fail to decode are collected in
    /// [`QueryOutcome::errors`] alongside the ones that succeeded.
    pub async fn query_records(&mut self, sql: &str) -> Result<QueryOutcome> {
        let conn = self.conn_mut()?;
        let rows: Vec<Row> = match conn.query(sql).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.classify(e)),
        };

        let mut outcome = QueryOutcome::default();
        for (index, row) in rows.into_iter().enumerate() {
            match mysql_async::from_row_opt::<(i64, String)>(row) {
                Ok((id, name)) => outcome.records.push(Record::new(id, name)),
                Err(e) => {
                    tracing::warn!("Row {} could not be decoded: {}", index, e);
                    outcome.errors.push(RowError {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            "Query returned {} row(s), {} undecodable",
            outcome.row_count(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Disconnect from the database, then stop the bridge.
    ///
    /// Call before closing the tunnel the transport belongs to.
    pub async fn close(mut self) -> Result<()> {
        let result = match self.conn.take() {
            Some(conn) => conn
                .disconnect()
                .await
                .map_err(|e| TunnelError::Connect(format!("Disconnect failed: {}", e))),
            None => Ok(()),
        };
        self.bridge.stop();
        tracing::info!("Closed database session {}", self.dsn.redacted());
        result
    }

    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| TunnelError::Query("database session is closed".to_string()))
    }

    /// A failed statement over a dead tunnel is a dial failure, not a
    /// query failure.
    fn classify(&self, error: mysql_async::Error) -> TunnelError {
        if self.dialer.is_closed() {
            TunnelError::Dial(format!("tunnel closed: {}", error))
        } else {
            TunnelError::Query(error.to_string())
        }
    }
}

/// Driver options pointing at the bridge instead of the real address
fn driver_opts(dsn: &Dsn, bridge_addr: SocketAddr) -> Result<Opts> {
    let mut init = Vec::new();
    if let Some(charset) = dsn.param("charset") {
        if !charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TunnelError::Config(format!("invalid charset '{}'", charset)));
        }
        init.push(format!("SET NAMES {}", charset));
    }

    let builder = OptsBuilder::default()
        .ip_or_hostname(bridge_addr.ip().to_string())
        .tcp_port(bridge_addr.port())
        // A loopback address would otherwise make the driver switch to the
        // local unix socket, bypassing the bridge.
        .prefer_socket(false)
        .user(Some(dsn.user.clone()))
        .pass(dsn.password.clone())
        .db_name(Some(dsn.database.clone()))
        .init(init);

    Ok(builder.into())
}
