//! Supabase REST (`PostgREST`) table service.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};

use crate::config::{BackendConfig, SyncConfig};
use crate::sync::{RemoteRow, RemoteTableService, SyncError, SyncResult};
use crate::util::describe_api_error;

/// Talks to `{supabase_url}/rest/v1` on behalf of a signed-in user.
///
/// Row-level security on the backend is expected to enforce ownership; the
/// `owner_id` filter here only narrows the scan.
#[derive(Clone)]
pub struct PostgrestTableService {
    rest_url: String,
    anon_key: String,
    access_token: String,
    page_size: usize,
    client: Client,
}

impl std::fmt::Debug for PostgrestTableService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgrestTableService")
            .field("rest_url", &self.rest_url)
            .field("access_token", &"[REDACTED]")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl PostgrestTableService {
    pub fn new(
        backend: &BackendConfig,
        access_token: impl Into<String>,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            rest_url: backend.rest_url(),
            anon_key: backend.supabase_anon_key.clone(),
            access_token: access_token.into(),
            page_size: config.pull_page_size.max(1),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, urlencoding::encode(table))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.access_token)
    }
}

impl RemoteTableService for PostgrestTableService {
    async fn upsert(&self, table: &str, rows: &[RemoteRow]) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let request = self.authorized(
            self.client
                .post(self.table_url(table))
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(rows),
        );
        ensure_success(table, request.send().await?).await?;

        tracing::debug!(table, rows = rows.len(), "Upserted remote rows");
        Ok(())
    }

    async fn query_by_owner(
        &self,
        table: &str,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRow>> {
        let mut rows = Vec::new();
        let mut offset = 0;

        loop {
            let request = self.authorized(
                self.client
                    .get(self.table_url(table))
                    .query(&page_query(owner_id, since, self.page_size, offset)),
            );
            let response = ensure_success(table, request.send().await?).await?;
            let page = response.json::<Vec<RemoteRow>>().await?;

            let fetched = page.len();
            rows.extend(page);
            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }

        tracing::debug!(table, rows = rows.len(), incremental = since.is_some(), "Queried remote rows");
        Ok(rows)
    }
}

fn page_query(
    owner_id: &str,
    since: Option<DateTime<Utc>>,
    limit: usize,
    offset: usize,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "*".to_string()),
        ("owner_id", format!("eq.{owner_id}")),
        ("order", "updated_at.asc,id.asc".to_string()),
        ("limit", limit.to_string()),
        ("offset", offset.to_string()),
    ];
    if let Some(since) = since {
        query.push((
            "updated_at",
            format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ));
    }
    query
}

async fn ensure_success(table: &str, response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::remote(
        table,
        Some(status.as_u16()),
        describe_api_error(status.as_u16(), &body),
    ))
}
