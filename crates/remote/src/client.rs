//! HTTP client for a PostgREST-style table API (Supabase REST).
//!
//! Every table is exposed at `{base_url}/rest/v1/{table}`; filters travel as
//! query parameters (`column=op.value`) and rows as JSON arrays.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use gatekeeper_core::remote::{Filter, RemoteQuery, RemoteRows, RemoteStore};

use crate::error::{RemoteApiError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
const REST_PATH: &str = "rest/v1";

const PREFER_RETURN: &str = "return=representation";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";
const PREFER_COUNT: &str = "count=exact";

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    code: Option<String>,
    message: String,
    #[serde(default)]
    details: Option<String>,
}

/// Client for the remote table API.
///
/// Stateless per call; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PostgrestClient {
    /// Creates a client for `base_url` authenticated with `api_key`.
    ///
    /// Fails when either value is empty or the URL does not parse, which the
    /// connection manager treats as "run offline".
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(RemoteApiError::invalid_request("Remote URL is empty"));
        }
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(RemoteApiError::auth("Remote API key is empty"));
        }
        reqwest::Url::parse(base_url).map_err(|e| {
            RemoteApiError::invalid_request(format!("Invalid remote URL '{}': {}", base_url, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, table)
    }

    fn headers(&self, prefer: Option<&'static str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let key_value = HeaderValue::from_str(&self.api_key)
            .map_err(|_| RemoteApiError::auth("Invalid API key format"))?;
        headers.insert("apikey", key_value);

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| RemoteApiError::auth("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_static(prefer));
        }
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("Remote response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("Remote response error ({}): {}", status, preview);
    }

    /// Parses a row-array response and the total from `Content-Range`, if any.
    async fn parse_rows(response: reqwest::Response) -> Result<RemoteRows> {
        let status = response.status();
        let count = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                let mut message = match error.code {
                    Some(code) => format!("{}: {}", code, error.message),
                    None => error.message,
                };
                if let Some(details) = error.details {
                    message.push_str(&format!(" ({})", details));
                }
                return Err(RemoteApiError::api(status.as_u16(), message));
            }
            return Err(RemoteApiError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        if body.trim().is_empty() {
            return Ok(RemoteRows {
                rows: Vec::new(),
                count,
            });
        }
        let rows = match serde_json::from_str::<Value>(&body)? {
            Value::Array(rows) => rows,
            Value::Object(row) => vec![Value::Object(row)],
            other => {
                return Err(RemoteApiError::api(
                    status.as_u16(),
                    format!("Unexpected response body: {}", other),
                ))
            }
        };
        Ok(RemoteRows { rows, count })
    }

    pub async fn select_rows(&self, table: &str, query: &RemoteQuery) -> Result<RemoteRows> {
        let mut params = vec![(
            "select".to_string(),
            query.columns.clone().unwrap_or_else(|| "*".to_string()),
        )];
        params.extend(filter_params(&query.filters)?);
        if let Some(order) = &query.order {
            let direction = if order.descending { "desc" } else { "asc" };
            params.push((
                "order".to_string(),
                format!("{}.{}.nullslast", order.column, direction),
            ));
        }
        if let Some((from, to)) = query.range {
            params.push(("offset".to_string(), from.to_string()));
            params.push((
                "limit".to_string(),
                (to.saturating_sub(from) + 1).to_string(),
            ));
        }

        let prefer = query.count.then_some(PREFER_COUNT);
        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.headers(prefer)?)
            .query(&params)
            .send()
            .await?;
        Self::parse_rows(response).await
    }

    pub async fn insert_rows(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        self.post_rows(table, rows, PREFER_RETURN).await
    }

    pub async fn upsert_rows(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        self.post_rows(table, rows, PREFER_UPSERT).await
    }

    async fn post_rows(
        &self,
        table: &str,
        rows: Vec<Value>,
        prefer: &'static str,
    ) -> Result<Vec<Value>> {
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.headers(Some(prefer))?)
            .json(&Value::Array(rows))
            .send()
            .await?;
        Ok(Self::parse_rows(response).await?.rows)
    }

    pub async fn update_rows(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>> {
        let params = scoped_filter_params(filters)?;
        let response = self
            .client
            .patch(self.table_url(table))
            .headers(self.headers(Some(PREFER_RETURN))?)
            .query(&params)
            .json(&patch)
            .send()
            .await?;
        Ok(Self::parse_rows(response).await?.rows)
    }

    pub async fn delete_rows(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let params = scoped_filter_params(filters)?;
        let response = self
            .client
            .delete(self.table_url(table))
            .headers(self.headers(Some(PREFER_RETURN))?)
            .query(&params)
            .send()
            .await?;
        Ok(Self::parse_rows(response).await?.rows)
    }
}

#[async_trait]
impl RemoteStore for PostgrestClient {
    async fn select(
        &self,
        table: &str,
        query: &RemoteQuery,
    ) -> gatekeeper_core::Result<RemoteRows> {
        Ok(self.select_rows(table, query).await?)
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> gatekeeper_core::Result<Vec<Value>> {
        Ok(self.insert_rows(table, rows).await?)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> gatekeeper_core::Result<Vec<Value>> {
        Ok(self.update_rows(table, filters, patch).await?)
    }

    async fn upsert(&self, table: &str, rows: Vec<Value>) -> gatekeeper_core::Result<Vec<Value>> {
        Ok(self.upsert_rows(table, rows).await?)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> gatekeeper_core::Result<Vec<Value>> {
        Ok(self.delete_rows(table, filters).await?)
    }
}

/// Total row count from a `Content-Range` header such as `0-24/120` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// Update and delete must always be scoped; an unfiltered request would hit every row.
fn scoped_filter_params(filters: &[Filter]) -> Result<Vec<(String, String)>> {
    if filters.is_empty() {
        return Err(RemoteApiError::invalid_request(
            "Refusing to update or delete without a filter",
        ));
    }
    filter_params(filters)
}

fn filter_params(filters: &[Filter]) -> Result<Vec<(String, String)>> {
    filters
        .iter()
        .map(|filter| {
            Ok(match filter {
                Filter::Eq(column, Value::Null) => (column.clone(), "is.null".to_string()),
                Filter::Eq(column, value) => (column.clone(), format!("eq.{}", literal(value)?)),
                Filter::Gte(column, value) => (column.clone(), format!("gte.{}", literal(value)?)),
                Filter::Lte(column, value) => (column.clone(), format!("lte.{}", literal(value)?)),
                Filter::In(column, values) => {
                    let items = values
                        .iter()
                        .map(|v| literal(v).map(|s| quote_list_item(&s)))
                        .collect::<Result<Vec<_>>>()?;
                    (column.clone(), format!("in.({})", items.join(",")))
                }
                Filter::OrIlike { columns, term } => {
                    let pattern = quote_list_item(&format!("*{}*", term));
                    let clauses = columns
                        .iter()
                        .map(|c| format!("{}.ilike.{}", c, pattern))
                        .collect::<Vec<_>>();
                    ("or".to_string(), format!("({})", clauses.join(",")))
                }
            })
        })
        .collect()
}

fn literal(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Array(_) | Value::Object(_) => Err(RemoteApiError::invalid_request(format!(
            "Unsupported filter value: {}",
            value
        ))),
    }
}

/// Quotes list members that contain PostgREST list delimiters.
fn quote_list_item(value: &str) -> String {
    if value.contains([',', '(', ')', '"', ':']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        request_line: String,
        headers: HashMap<String, String>,
        body: String,
    }

    #[derive(Debug, Clone)]
    struct MockResponse {
        status: u16,
        body: String,
        content_range: Option<String>,
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Some(CapturedRequest {
            request_line,
            headers,
            body: String::from_utf8_lossy(&body).to_string(),
        })
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            201 => "Created",
            400 => "Bad Request",
            401 => "Unauthorized",
            500 => "Internal Server Error",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        response: &MockResponse,
    ) -> std::io::Result<()> {
        let range = response
            .content_range
            .as_ref()
            .map(|r| format!("Content-Range: {}\r\n", r))
            .unwrap_or_default();
        let raw = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            response.status,
            status_text(response.status),
            range,
            response.body.len(),
            response.body
        );
        stream.write_all(raw.as_bytes()).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        responses: Vec<MockResponse>,
    ) -> (String, Arc<TokioMutex<Vec<CapturedRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
        let captured_clone = Arc::clone(&captured);

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let Some(request) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured_clone.lock().await.push(request);
                let response = scripted.lock().await.pop_front().unwrap_or(MockResponse {
                    status: 500,
                    body: r#"{"message":"unexpected request"}"#.to_string(),
                    content_range: None,
                });
                let _ = write_http_response(&mut stream, &response).await;
            }
        });

        (format!("http://{}", addr), captured)
    }

    #[tokio::test]
    async fn select_encodes_filters_and_reads_count() {
        let (base_url, captured) = start_mock_server(vec![MockResponse {
            status: 200,
            body: r#"[{"id":"T-1","salesman":"ana"}]"#.to_string(),
            content_range: Some("0-0/41".to_string()),
        }])
        .await;
        let client = PostgrestClient::new(&base_url, "anon-key").expect("client");

        let query = RemoteQuery::new()
            .eq("salesman", "ana")
            .or_ilike(&["client_name", "salesman"], "acme")
            .order("submission_date", true)
            .range(10, 19)
            .with_count();
        let result = client
            .select_rows("transactions", &query)
            .await
            .expect("select");

        assert_eq!(result.rows, vec![json!({"id": "T-1", "salesman": "ana"})]);
        assert_eq!(result.count, Some(41));

        let requests = captured.lock().await;
        let request = &requests[0];
        assert!(request.request_line.starts_with("GET /rest/v1/transactions?"));
        assert!(request.request_line.contains("select=*"));
        assert!(request.request_line.contains("salesman=eq.ana"));
        assert!(request
            .request_line
            .contains("or=%28client_name.ilike.*acme*%2Csalesman.ilike.*acme*%29"));
        assert!(request
            .request_line
            .contains("order=submission_date.desc.nullslast"));
        assert!(request.request_line.contains("offset=10"));
        assert!(request.request_line.contains("limit=10"));
        assert_eq!(request.headers.get("apikey").map(String::as_str), Some("anon-key"));
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer anon-key")
        );
        assert_eq!(
            request.headers.get("prefer").map(String::as_str),
            Some("count=exact")
        );
    }

    #[tokio::test]
    async fn insert_posts_array_and_returns_representation() {
        let (base_url, captured) = start_mock_server(vec![MockResponse {
            status: 201,
            body: r#"[{"id":11,"transaction_id":"T-2"}]"#.to_string(),
            content_range: None,
        }])
        .await;
        let client = PostgrestClient::new(&base_url, "anon-key").expect("client");

        let rows = client
            .insert_rows("fixed_costs", vec![json!({"transaction_id": "T-2"})])
            .await
            .expect("insert");
        assert_eq!(rows[0]["id"], json!(11));

        let requests = captured.lock().await;
        assert!(requests[0].request_line.starts_with("POST /rest/v1/fixed_costs "));
        assert_eq!(
            serde_json::from_str::<Value>(&requests[0].body).expect("body"),
            json!([{"transaction_id": "T-2"}])
        );
        assert_eq!(
            requests[0].headers.get("prefer").map(String::as_str),
            Some(PREFER_RETURN)
        );
    }

    #[tokio::test]
    async fn api_error_carries_status_and_message() {
        let (base_url, _captured) = start_mock_server(vec![MockResponse {
            status: 400,
            body: r#"{"code":"PGRST204","message":"Could not find the 'bogus' column","details":null}"#
                .to_string(),
            content_range: None,
        }])
        .await;
        let client = PostgrestClient::new(&base_url, "anon-key").expect("client");

        let err = client
            .update_rows(
                "transactions",
                &[Filter::eq("id", "T-3")],
                json!({"bogus": 1}),
            )
            .await
            .expect_err("should fail");
        assert_eq!(err.status_code(), Some(400));
        assert!(err.to_string().contains("PGRST204"));

        let core: gatekeeper_core::Error = err.into();
        assert!(core.is_remote_unavailable());
    }

    #[tokio::test]
    async fn unscoped_delete_is_refused_locally() {
        let client = PostgrestClient::new("http://127.0.0.1:9", "anon-key").expect("client");
        let err = client
            .delete_rows("fixed_costs", &[])
            .await
            .expect_err("unscoped");
        assert!(matches!(err, RemoteApiError::InvalidRequest(_)));
    }

    #[test]
    fn construction_rejects_missing_configuration() {
        assert!(matches!(
            PostgrestClient::new("", "key"),
            Err(RemoteApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            PostgrestClient::new("https://x.supabase.co", "  "),
            Err(RemoteApiError::Auth(_))
        ));
        assert!(PostgrestClient::new("not a url", "key").is_err());
    }

    #[test]
    fn filter_values_are_encoded_for_lists() {
        let params = filter_params(&[
            Filter::In(
                "variable_name".to_string(),
                vec![json!("tipoCambio"), json!("a,b")],
            ),
            Filter::Eq("approval_date".to_string(), Value::Null),
        ])
        .expect("params");
        assert_eq!(
            params[0],
            (
                "variable_name".to_string(),
                "in.(tipoCambio,\"a,b\")".to_string()
            )
        );
        assert_eq!(params[1].1, "is.null");
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
    }
}
