//! HTTP adapter for the shared master store.
//!
//! The master exposes a JSON API; this client is the only place that knows
//! its shape. Sync surface:
//!
//! ```text
//! GET    /api/ping
//! GET    /api/sync/<table>?since=<ts>      incremental pull
//! GET    /api/sync/<table>/snapshot        full table, tombstones included
//! GET    /api/sync/<table>/live            non-tombstoned records
//! GET    /api/sync/<table>/count
//! POST   /api/sync/<table>                 upsert by uuid -> { "outcome": ... }
//! POST   /api/admin/<table>/<id>/soft-delete
//! POST   /api/admin/<table>/<id>/parent    { "column", "parent_id" }
//! POST   /api/admin/<table>/reassign       { "column", "from", "to" } -> { "changed" }
//! DELETE /api/admin/<table>/<id>
//! DELETE /api/admin/<table>/null-identities -> { "deleted" }
//! ```
//!
//! Transport failures map to [`SyncError::Connectivity`] and are retried by
//! the caller; a 422 maps to [`SyncError::Validation`]. `synced` flags are
//! only ever updated after a confirmed round-trip, so a timeout can cost a
//! retry but never data.

use chrono::NaiveDateTime;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::SyncError;
use crate::models::{SyncMeta, SyncModel};
use crate::settings::MasterSettings;
use crate::store::{MasterStore, ParentKey, TableKind, UpsertOutcome};

const QUERY_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub struct HttpMasterStore {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct OutcomeResponse {
    outcome: UpsertOutcome,
}

#[derive(Deserialize)]
struct CountResponse {
    count: i64,
}

#[derive(Deserialize)]
struct ChangedResponse {
    changed: usize,
}

#[derive(Deserialize)]
struct DeletedResponse {
    deleted: usize,
}

impl HttpMasterStore {
    /// Build a client for the configured target. Does not touch the
    /// network; call [`MasterStore::ping`] to verify reachability.
    pub fn connect(settings: &MasterSettings) -> Result<Self, SyncError> {
        let base_url = settings.url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::Configuration("empty master url".into()));
        }
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout())
            .build()
            .map_err(|e| SyncError::Configuration(format!("cannot build http client: {}", e)))?;
        Ok(HttpMasterStore {
            base_url,
            api_key: settings.api_key.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.decorate(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.decorate(self.client.post(format!("{}{}", self.base_url, path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.decorate(self.client.delete(format!("{}{}", self.base_url, path)))
    }

    fn decorate(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    /// Send, then turn the response into `T` or the right error class.
    fn run<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, SyncError> {
        let resp = req
            .send()
            .map_err(|e| SyncError::Connectivity(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }
        Err(Self::fail(status, body))
    }

    fn run_empty(&self, req: RequestBuilder) -> Result<(), SyncError> {
        let resp = req
            .send()
            .map_err(|e| SyncError::Connectivity(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().unwrap_or_default();
        Err(Self::fail(status, body))
    }

    fn fail(status: StatusCode, body: String) -> SyncError {
        match status {
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => SyncError::Integrity(body),
            s if s.is_server_error() => SyncError::Connectivity(format!("{}: {}", s, body)),
            s => SyncError::Master {
                status: s.as_u16(),
                body,
            },
        }
    }
}

impl MasterStore for HttpMasterStore {
    fn ping(&self) -> Result<(), SyncError> {
        self.run_empty(self.get("/api/ping"))
    }

    fn fetch_since<M: SyncModel>(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<M>, SyncError> {
        let mut req = self.get(&format!("/api/sync/{}", M::TABLE.name()));
        if let Some(at) = since {
            req = req.query(&[("since", at.format(QUERY_TS_FORMAT).to_string())]);
        }
        self.run(req)
    }

    fn fetch_snapshot<M: SyncModel>(&self) -> Result<Vec<M>, SyncError> {
        self.run(self.get(&format!("/api/sync/{}/snapshot", M::TABLE.name())))
    }

    fn list_live<M: SyncModel>(&self) -> Result<Vec<M>, SyncError> {
        self.run(self.get(&format!("/api/sync/{}/live", M::TABLE.name())))
    }

    fn upsert<M: SyncModel>(&self, rec: &M) -> Result<UpsertOutcome, SyncError> {
        let req = self.post(&format!("/api/sync/{}", M::TABLE.name())).json(rec);
        let resp = req
            .send()
            .map_err(|e| SyncError::Connectivity(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        if status.is_success() {
            let parsed: OutcomeResponse = serde_json::from_str(&body)?;
            return Ok(parsed.outcome);
        }
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(SyncError::Validation {
                table: M::TABLE.name(),
                uuid: rec.uuid().unwrap_or("-").to_string(),
                reason: body,
            });
        }
        Err(Self::fail(status, body))
    }

    fn count(&self, table: TableKind) -> Result<i64, SyncError> {
        let parsed: CountResponse = self.run(self.get(&format!("/api/sync/{}/count", table)))?;
        Ok(parsed.count)
    }

    fn soft_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError> {
        self.run_empty(self.post(&format!("/api/admin/{}/{}/soft-delete", table, id)))
    }

    fn hard_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError> {
        self.run_empty(self.delete(&format!("/api/admin/{}/{}", table, id)))
    }

    fn set_parent(
        &self,
        table: TableKind,
        id: i32,
        fk: ParentKey,
        parent_id: i32,
    ) -> Result<(), SyncError> {
        self.run_empty(
            self.post(&format!("/api/admin/{}/{}/parent", table, id))
                .json(&json!({ "column": fk.column(), "parent_id": parent_id })),
        )
    }

    fn reassign_parent(
        &self,
        table: TableKind,
        fk: ParentKey,
        from: i32,
        to: i32,
    ) -> Result<usize, SyncError> {
        let parsed: ChangedResponse = self.run(
            self.post(&format!("/api/admin/{}/reassign", table))
                .json(&json!({ "column": fk.column(), "from": from, "to": to })),
        )?;
        Ok(parsed.changed)
    }

    fn purge_null_identities(&self, table: TableKind) -> Result<usize, SyncError> {
        let parsed: DeletedResponse =
            self.run(self.delete(&format!("/api/admin/{}/null-identities", table)))?;
        Ok(parsed.deleted)
    }
}
