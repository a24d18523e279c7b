//! Minimal Cosmos DB REST client shared by the document-DB backends.
//!
//! Covers exactly what the stores need: ensure database/container, upsert,
//! point-read, delete, and SQL queries. Requests are signed with the
//! account master key per the Cosmos REST auth scheme (HMAC-SHA256 over
//! verb, resource type, resource link, and the `x-ms-date` header).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Diagnostic)]
pub enum CosmosError {
    #[error("cosmos request failed: {0}")]
    #[diagnostic(code(safetydesk::cosmos::http))]
    Http(#[from] reqwest::Error),

    #[error("cosmos returned {status} for {verb} {link}: {body}")]
    #[diagnostic(code(safetydesk::cosmos::status))]
    Status {
        status: u16,
        verb: &'static str,
        link: String,
        body: String,
    },

    #[error("cosmos account key is not valid base64")]
    #[diagnostic(code(safetydesk::cosmos::key))]
    InvalidKey,

    #[error("cosmos response could not be parsed: {0}")]
    #[diagnostic(code(safetydesk::cosmos::parse))]
    Parse(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SqlQuery<'a> {
    query: &'a str,
    parameters: Vec<SqlParameter>,
}

#[derive(Serialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

impl SqlParameter {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

/// Master-key-authenticated Cosmos account handle scoped to one database.
#[derive(Clone)]
pub struct CosmosClient {
    http: reqwest::Client,
    endpoint: String,
    key: Vec<u8>,
    pub database: String,
}

impl CosmosClient {
    pub fn new(
        endpoint: impl Into<String>,
        account_key_base64: &str,
        database: impl Into<String>,
    ) -> Result<Self, CosmosError> {
        let key = BASE64
            .decode(account_key_base64)
            .map_err(|_| CosmosError::InvalidKey)?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            key,
            database: database.into(),
        })
    }

    fn auth_header(&self, verb: &str, resource_type: &str, resource_link: &str, date: &str) -> String {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_lowercase(),
            resource_type,
            resource_link,
            date.to_lowercase()
        );
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        let token = format!("type=master&ver=1.0&sig={signature}");
        url::form_urlencoded::byte_serialize(token.as_bytes()).collect()
    }

    fn rfc1123_now() -> String {
        chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    async fn request(
        &self,
        verb: reqwest::Method,
        resource_type: &str,
        resource_link: &str,
        path: &str,
        body: Option<Value>,
        extra_headers: &[(&str, String)],
        accept_statuses: &[u16],
    ) -> Result<Option<Value>, CosmosError> {
        let date = Self::rfc1123_now();
        let auth = self.auth_header(verb.as_str(), resource_type, resource_link, &date);
        let url = format!("{}/{}", self.endpoint, path);
        let mut request = self
            .http
            .request(verb.clone(), &url)
            .header("authorization", auth)
            .header("x-ms-date", date)
            .header("x-ms-version", "2018-12-31");
        for (name, value) in extra_headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if (200..300).contains(&status) || accept_statuses.contains(&status) {
            if text.is_empty() {
                Ok(None)
            } else {
                Ok(Some(serde_json::from_str(&text)?))
            }
        } else {
            Err(CosmosError::Status {
                status,
                verb: verb_name(&verb),
                link: resource_link.to_string(),
                body: text,
            })
        }
    }

    /// Create the database if it does not exist.
    pub async fn ensure_database(&self) -> Result<(), CosmosError> {
        self.request(
            reqwest::Method::POST,
            "dbs",
            "",
            "dbs",
            Some(serde_json::json!({ "id": self.database })),
            &[],
            &[409],
        )
        .await?;
        Ok(())
    }

    /// Create a container with a `/pk` partition key if it does not exist.
    pub async fn ensure_container(&self, container: &str) -> Result<(), CosmosError> {
        let link = format!("dbs/{}", self.database);
        self.request(
            reqwest::Method::POST,
            "colls",
            &link,
            &format!("{link}/colls"),
            Some(serde_json::json!({
                "id": container,
                "partitionKey": { "paths": ["/pk"], "kind": "Hash" }
            })),
            &[],
            &[409],
        )
        .await?;
        Ok(())
    }

    /// Upsert a document. The document must carry `id` and `pk` fields.
    pub async fn upsert_document(&self, container: &str, pk: &str, doc: Value) -> Result<(), CosmosError> {
        let link = format!("dbs/{}/colls/{}", self.database, container);
        self.request(
            reqwest::Method::POST,
            "docs",
            &link,
            &format!("{link}/docs"),
            Some(doc),
            &[
                ("x-ms-documentdb-is-upsert", "true".to_string()),
                ("x-ms-documentdb-partitionkey", format!("[\"{pk}\"]")),
            ],
            &[],
        )
        .await?;
        Ok(())
    }

    /// Point-read a document; `None` on 404.
    pub async fn read_document<T: DeserializeOwned>(
        &self,
        container: &str,
        pk: &str,
        id: &str,
    ) -> Result<Option<T>, CosmosError> {
        let link = format!("dbs/{}/colls/{}/docs/{}", self.database, container, id);
        let value = self
            .request(
                reqwest::Method::GET,
                "docs",
                &link,
                &link,
                None,
                &[("x-ms-documentdb-partitionkey", format!("[\"{pk}\"]"))],
                &[404],
            )
            .await?;
        match value {
            Some(value) if value.get("code").is_none() => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }

    /// Delete a document; `false` when it was already absent.
    pub async fn delete_document(&self, container: &str, pk: &str, id: &str) -> Result<bool, CosmosError> {
        let link = format!("dbs/{}/colls/{}/docs/{}", self.database, container, id);
        let date = Self::rfc1123_now();
        let auth = self.auth_header("delete", "docs", &link, &date);
        let response = self
            .http
            .delete(format!("{}/{}", self.endpoint, link))
            .header("authorization", auth)
            .header("x-ms-date", date)
            .header("x-ms-version", "2018-12-31")
            .header("x-ms-documentdb-partitionkey", format!("[\"{pk}\"]"))
            .send()
            .await?;
        match response.status().as_u16() {
            204 => Ok(true),
            404 => Ok(false),
            status => Err(CosmosError::Status {
                status,
                verb: "delete",
                link,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Run a cross-partition SQL query and deserialize the documents.
    pub async fn query<T: DeserializeOwned>(
        &self,
        container: &str,
        query: &str,
        parameters: Vec<SqlParameter>,
    ) -> Result<Vec<T>, CosmosError> {
        let link = format!("dbs/{}/colls/{}", self.database, container);
        let body = serde_json::to_value(SqlQuery { query, parameters })?;
        let value = self
            .request(
                reqwest::Method::POST,
                "docs",
                &link,
                &format!("{link}/docs"),
                Some(body),
                &[
                    ("x-ms-documentdb-isquery", "true".to_string()),
                    (
                        "content-type",
                        "application/query+json".to_string(),
                    ),
                    (
                        "x-ms-documentdb-query-enablecrosspartition",
                        "true".to_string(),
                    ),
                    ("x-ms-max-item-count", "1000".to_string()),
                ],
                &[],
            )
            .await?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let parsed: QueryResponse = serde_json::from_value(value)?;
        parsed
            .documents
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(CosmosError::from))
            .collect()
    }

    /// Whether the account answers at all.
    pub async fn health_check(&self) -> bool {
        let date = Self::rfc1123_now();
        let auth = self.auth_header("get", "dbs", &format!("dbs/{}", self.database), &date);
        self.http
            .get(format!("{}/dbs/{}", self.endpoint, self.database))
            .header("authorization", auth)
            .header("x-ms-date", date)
            .header("x-ms-version", "2018-12-31")
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn verb_name(method: &reqwest::Method) -> &'static str {
    match method.as_str() {
        "GET" => "get",
        "POST" => "post",
        "PUT" => "put",
        "DELETE" => "delete",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_header_is_deterministic_and_urlencoded() {
        let client = CosmosClient::new("https://acct.example.com", "c2VjcmV0", "ohs").unwrap();
        let a = client.auth_header("get", "dbs", "dbs/ohs", "mon, 01 jan 2024 00:00:00 gmt");
        let b = client.auth_header("get", "dbs", "dbs/ohs", "mon, 01 jan 2024 00:00:00 gmt");
        assert_eq!(a, b);
        assert!(a.starts_with("type%3Dmaster"));
    }

    #[test]
    fn rejects_non_base64_key() {
        assert!(matches!(
            CosmosClient::new("https://acct.example.com", "not base64!!", "ohs"),
            Err(CosmosError::InvalidKey)
        ));
    }
}
