//! Endpoint registry: read access to producer-configured webhook endpoints.
//!
//! Endpoint CRUD belongs to the system that owns the registry; delivery only
//! reads. `SqliteEndpointRegistry::upsert` exists for that owning side and
//! for tests.

use rusqlite::{params, Connection, OptionalExtension, Row};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use super::{lock_conn, open_file, open_in_memory, parse_uuid};
use crate::error::CourierResult;
use crate::types::Endpoint;

/// Read interface over registered endpoints.
#[cfg_attr(test, mockall::automock)]
pub trait EndpointRegistry: Send + Sync {
    /// Active endpoints subscribed to `event_type`, restricted to endpoints
    /// that are unscoped or scoped to `product_id`.
    fn list_active_endpoints(
        &self,
        event_type: &str,
        product_id: Option<String>,
    ) -> CourierResult<Vec<Endpoint>>;

    /// Look up an endpoint by ID, active or not.
    fn get_endpoint(&self, id: Uuid) -> CourierResult<Option<Endpoint>>;
}

/// SQLite-backed endpoint registry.
pub struct SqliteEndpointRegistry {
    conn: Mutex<Connection>,
}

const ENDPOINT_COLUMNS: &str = "id, producer_id, name, url, secret, event_types, is_active, product_id";

impl SqliteEndpointRegistry {
    /// Create a new registry at the given path.
    pub fn new(path: impl AsRef<Path>) -> CourierResult<Self> {
        let registry = Self {
            conn: Mutex::new(open_file(path)?),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    /// Create an in-memory registry (for testing)
    pub fn in_memory() -> CourierResult<Self> {
        let registry = Self {
            conn: Mutex::new(open_in_memory()?),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> CourierResult<()> {
        let conn = lock_conn!(self.conn);
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_endpoints (
                id TEXT PRIMARY KEY,
                producer_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL,
                secret TEXT NOT NULL,
                event_types TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                product_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_endpoints_active ON webhook_endpoints(is_active);
            CREATE INDEX IF NOT EXISTS idx_endpoints_producer ON webhook_endpoints(producer_id);
        "#,
        )?;
        Ok(())
    }

    /// Insert or replace an endpoint.
    pub fn upsert(&self, endpoint: &Endpoint) -> CourierResult<()> {
        let mut event_types: Vec<&String> = endpoint.event_types.iter().collect();
        event_types.sort();
        let event_types = serde_json::to_string(&event_types)?;

        let conn = lock_conn!(self.conn);
        conn.execute(
            r#"INSERT OR REPLACE INTO webhook_endpoints
               (id, producer_id, name, url, secret, event_types, is_active, product_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                endpoint.id.to_string(),
                endpoint.producer_id,
                endpoint.name,
                endpoint.url,
                endpoint.secret.expose_secret(),
                event_types,
                endpoint.is_active as i32,
                endpoint.product_id,
            ],
        )?;
        Ok(())
    }

    /// Set the active flag of an endpoint.
    pub fn set_active(&self, id: Uuid, is_active: bool) -> CourierResult<bool> {
        let conn = lock_conn!(self.conn);
        let changed = conn.execute(
            "UPDATE webhook_endpoints SET is_active = ?2 WHERE id = ?1",
            params![id.to_string(), is_active as i32],
        )?;
        Ok(changed == 1)
    }

    fn row_to_endpoint(row: &Row<'_>) -> CourierResult<Endpoint> {
        let id: String = row.get(0)?;
        let secret: String = row.get(4)?;
        let event_types: String = row.get(5)?;
        let is_active: i32 = row.get(6)?;

        Ok(Endpoint {
            id: parse_uuid(&id)?,
            producer_id: row.get(1)?,
            name: row.get(2)?,
            url: row.get(3)?,
            secret: SecretString::new(secret),
            event_types: serde_json::from_str::<HashSet<String>>(&event_types)?,
            is_active: is_active != 0,
            product_id: row.get(7)?,
        })
    }
}

impl EndpointRegistry for SqliteEndpointRegistry {
    fn list_active_endpoints(
        &self,
        event_type: &str,
        product_id: Option<String>,
    ) -> CourierResult<Vec<Endpoint>> {
        let conn = lock_conn!(self.conn);
        let sql = format!(
            "SELECT {} FROM webhook_endpoints \
             WHERE is_active = 1 AND (product_id IS NULL OR product_id = ?1) \
             ORDER BY id",
            ENDPOINT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![product_id.as_deref()], |row| Ok(Self::row_to_endpoint(row)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut endpoints = Vec::with_capacity(rows.len());
        for endpoint in rows {
            let endpoint = endpoint?;
            if endpoint.subscribes_to(event_type, product_id.as_deref()) {
                endpoints.push(endpoint);
            }
        }
        Ok(endpoints)
    }

    fn get_endpoint(&self, id: Uuid) -> CourierResult<Option<Endpoint>> {
        let conn = lock_conn!(self.conn);
        let sql = format!("SELECT {} FROM webhook_endpoints WHERE id = ?1", ENDPOINT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_endpoint(row)))
            .optional()?
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_active_by_event_type() {
        let registry = SqliteEndpointRegistry::in_memory().unwrap();
        let approved = Endpoint::new("prod-1", "https://a.example/hook", "s1")
            .with_events(["compra.aprovada"]);
        let canceled = Endpoint::new("prod-1", "https://b.example/hook", "s2")
            .with_events(["assinatura.cancelada"]);
        let disabled = Endpoint::new("prod-1", "https://c.example/hook", "s3")
            .with_events(["compra.aprovada"])
            .with_active(false);
        for ep in [&approved, &canceled, &disabled] {
            registry.upsert(ep).unwrap();
        }

        let found = registry.list_active_endpoints("compra.aprovada", None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, approved.id);
    }

    #[test]
    fn test_product_scope() {
        let registry = SqliteEndpointRegistry::in_memory().unwrap();
        let any = Endpoint::new("prod-1", "https://a.example/hook", "s1")
            .with_events(["compra.aprovada"]);
        let scoped = Endpoint::new("prod-1", "https://b.example/hook", "s2")
            .with_events(["compra.aprovada"])
            .with_product("course-1");
        registry.upsert(&any).unwrap();
        registry.upsert(&scoped).unwrap();

        let for_course_1 = registry
            .list_active_endpoints("compra.aprovada", Some("course-1".to_string()))
            .unwrap();
        assert_eq!(for_course_1.len(), 2);

        let for_course_2 = registry
            .list_active_endpoints("compra.aprovada", Some("course-2".to_string()))
            .unwrap();
        assert_eq!(for_course_2.len(), 1);
        assert_eq!(for_course_2[0].id, any.id);
    }

    #[test]
    fn test_get_endpoint_includes_inactive() {
        let registry = SqliteEndpointRegistry::in_memory().unwrap();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "whsec_abc")
            .with_name("CRM")
            .with_events(["compra.aprovada"]);
        registry.upsert(&ep).unwrap();
        assert!(registry.set_active(ep.id, false).unwrap());

        let loaded = registry.get_endpoint(ep.id).unwrap().unwrap();
        assert!(!loaded.is_active);
        assert_eq!(loaded.name, "CRM");
        assert_eq!(loaded.secret.expose_secret(), "whsec_abc");
        assert!(registry.get_endpoint(Uuid::new_v4()).unwrap().is_none());
    }
}
