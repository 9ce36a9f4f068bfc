use anyhow::{Context, Result};
use async_trait::async_trait;
use sluice_bridge::IngestError;
use sqlx::{AnyPool, Row};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// An open session against the producer database.
#[async_trait]
pub trait ProducerSession: Send {
    /// Executes a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Runs a query and returns the first column of every row.
    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>>;
}

/// Opens producer sessions with the configured service credentials.
#[async_trait]
pub trait ProducerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ProducerSession>>;
}

/// Driver-backed connector over a sqlx connection pool. A vendor driver can
/// replace this by implementing [`ProducerConnector`].
pub struct SqlxProducerConnector {
    pool: AnyPool,
}

impl SqlxProducerConnector {
    pub async fn new(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPool::connect(url)
            .await
            .with_context(|| "connecting to the producer database")?;
        Ok(Self { pool })
    }
}

struct SqlxProducerSession {
    connection: sqlx::pool::PoolConnection<sqlx::Any>,
}

#[async_trait]
impl ProducerSession for SqlxProducerSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql)
            .execute(&mut *self.connection)
            .await
            .with_context(|| "executing producer statement")?;
        Ok(result.rows_affected())
    }

    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut *self.connection)
            .await
            .with_context(|| "querying producer")?;
        let mut values = vec![];
        for row in rows {
            values.push(row.try_get::<String, _>(0)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl ProducerConnector for SqlxProducerConnector {
    async fn connect(&self) -> Result<Box<dyn ProducerSession>> {
        let connection = self
            .pool
            .acquire()
            .await
            .with_context(|| "acquiring producer connection")?;
        Ok(Box::new(SqlxProducerSession { connection }))
    }
}

/// End users reach the band statement through string interpolation, so the
/// name must not be able to terminate the band or the statement.
fn validate_end_user(end_user: &str) -> bool {
    !end_user.is_empty()
        && end_user.len() <= 128
        && !end_user
            .chars()
            .any(|c| c == '\'' || c == ';' || c == '=' || c.is_control())
}

/// Opens producer sessions, binding the end user's identity onto data
/// sessions via the session query band.
pub struct ConnectionFactory {
    connector: Arc<dyn ProducerConnector>,
    enforce_proxy_authentication: bool,
}

impl ConnectionFactory {
    pub fn new(connector: Arc<dyn ProducerConnector>, enforce_proxy_authentication: bool) -> Self {
        Self {
            connector,
            enforce_proxy_authentication,
        }
    }

    /// A session carrying the end user's identity. When enforcement is on,
    /// a rejected band closes the session and fails the ingestion; there is
    /// no fallback to the service identity for data queries.
    pub async fn data_session(
        &self,
        end_user: &str,
    ) -> std::result::Result<Box<dyn ProducerSession>, IngestError> {
        if !validate_end_user(end_user) {
            error!("rejecting malformed end user name");
            return Err(IngestError::AuthFailure);
        }
        let mut session = self
            .connector
            .connect()
            .await
            .map_err(|e| IngestError::ProducerExec(format!("{e:#}")))?;
        let band = format!("SET QUERY_BAND = 'PROXYUSER={end_user};' FOR SESSION;");
        if let Err(e) = session.execute(&band).await {
            if self.enforce_proxy_authentication {
                error!("identity band rejected for {end_user}: {e:#}");
                return Err(IngestError::AuthFailure);
            }
            warn!("identity band rejected for {end_user}, keeping service identity: {e:#}");
        } else {
            debug!("identity band set for {end_user}");
        }
        Ok(session)
    }

    /// A service-identity session for metadata lookups; no band is set.
    pub async fn metadata_session(&self) -> Result<Box<dyn ProducerSession>> {
        self.connector.connect().await
    }

    /// Schemas visible to the connector: the producer dictionary merged with
    /// the configured defaults. Falls back to the defaults alone when the
    /// dictionary lookup fails.
    pub async fn list_schemas(&self, default_schemas: &[String]) -> Vec<String> {
        let looked_up = async {
            let mut session = self.metadata_session().await?;
            session
                .query_strings("SELECT DatabaseName FROM DBC.DatabasesV ORDER BY DatabaseName")
                .await
        }
        .await;
        let mut schemas = match looked_up {
            Ok(names) => names,
            Err(e) => {
                warn!("schema listing failed, serving configured defaults: {e:#}");
                vec![]
            }
        };
        for name in default_schemas {
            if !schemas.contains(name) {
                schemas.push(name.clone());
            }
        }
        schemas.sort();
        schemas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records statements; fails any whose text contains `fail_on`.
    struct ScriptedConnector {
        statements: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    struct ScriptedSession {
        statements: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ProducerSession for ScriptedSession {
        async fn execute(&mut self, sql: &str) -> Result<u64> {
            self.statements.lock().unwrap().push(sql.to_string());
            if let Some(marker) = &self.fail_on {
                if sql.contains(marker.as_str()) {
                    anyhow::bail!("scripted failure");
                }
            }
            Ok(0)
        }

        async fn query_strings(&mut self, _sql: &str) -> Result<Vec<String>> {
            anyhow::bail!("scripted failure")
        }
    }

    #[async_trait]
    impl ProducerConnector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn ProducerSession>> {
            Ok(Box::new(ScriptedSession {
                statements: self.statements.clone(),
                fail_on: self.fail_on.clone(),
            }))
        }
    }

    fn scripted(fail_on: Option<&str>) -> (Arc<ScriptedConnector>, Arc<Mutex<Vec<String>>>) {
        let statements = Arc::new(Mutex::new(vec![]));
        (
            Arc::new(ScriptedConnector {
                statements: statements.clone(),
                fail_on: fail_on.map(str::to_string),
            }),
            statements,
        )
    }

    #[tokio::test]
    async fn test_band_set_before_data_queries() {
        let (connector, statements) = scripted(None);
        let factory = ConnectionFactory::new(connector, true);
        let _session = factory.data_session("alice").await.unwrap();
        assert_eq!(
            statements.lock().unwrap().as_slice(),
            ["SET QUERY_BAND = 'PROXYUSER=alice;' FOR SESSION;"]
        );
    }

    #[tokio::test]
    async fn test_band_failure_is_auth_failure() {
        let (connector, _) = scripted(Some("QUERY_BAND"));
        let factory = ConnectionFactory::new(connector, true);
        assert!(matches!(
            factory.data_session("alice").await,
            Err(IngestError::AuthFailure)
        ));
    }

    #[tokio::test]
    async fn test_band_failure_tolerated_when_not_enforced() {
        let (connector, _) = scripted(Some("QUERY_BAND"));
        let factory = ConnectionFactory::new(connector, false);
        assert!(factory.data_session("alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_end_user_rejected() {
        let (connector, statements) = scripted(None);
        let factory = ConnectionFactory::new(connector, true);
        for end_user in ["", "x'; DROP TABLE t; --", "a;b", "a=b"] {
            assert!(matches!(
                factory.data_session(end_user).await,
                Err(IngestError::AuthFailure)
            ));
        }
        assert!(statements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schema_listing_falls_back_to_defaults() {
        let (connector, _) = scripted(None);
        let factory = ConnectionFactory::new(connector, true);
        let defaults = vec!["finance".to_string(), "sales".to_string()];
        assert_eq!(
            factory.list_schemas(&defaults).await,
            vec!["finance".to_string(), "sales".to_string()]
        );
    }
}
