//! Firestore REST backend.
//
// Values travel in Firestore's typed JSON encoding (`stringValue`,
// `timestampValue`, `mapValue`, ...). Batches go through `documents:commit`,
// which applies all writes atomically.

use super::{Document, DocumentStore, FieldFilter, FieldValue, Fields, WriteBatch};
use crate::gcp::AccessTokenProvider;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::DateTime;
use log::{debug, info};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const LIST_PAGE_SIZE: &str = "300";

pub struct FirestoreStore {
    client: Client,
    tokens: Arc<AccessTokenProvider>,
    base_url: String,
    database_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Value>,
    next_page_token: Option<String>,
}

impl FirestoreStore {
    pub fn new(
        client: Client,
        tokens: Arc<AccessTokenProvider>,
        project_id: &str,
        database: &str,
    ) -> Self {
        info!("Using Firestore database '{}' in project '{}'", database, project_id);
        Self {
            client,
            tokens,
            base_url: FIRESTORE_BASE_URL.to_string(),
            database_path: format!("projects/{}/databases/{}", project_id, database),
        }
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database_path)
    }

    fn document_name(&self, collection: &str, document_id: &str) -> String {
        format!("{}/{}/{}", self.documents_root(), collection, document_id)
    }

    async fn check(response: Response, operation: &str) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!("Firestore {} failed with status {}: {}", operation, status, body));
        }
        serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse Firestore {} response: {}", operation, e))
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let url = format!("{}/{}/{}", self.base_url, self.documents_root(), collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.tokens.access_token().await?;
            let mut request =
                self.client.get(&url).bearer_auth(token).query(&[("pageSize", LIST_PAGE_SIZE)]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Failed to list collection {}", collection))?;
            let page: ListDocumentsResponse = serde_json::from_value(
                Self::check(response, "list").await?,
            )?;

            for raw in &page.documents {
                documents.push(decode_document(raw)?);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!("Listed {} documents from {}", documents.len(), collection);
        Ok(documents)
    }

    async fn find_first(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Option<Document>> {
        let (parent, collection_id) = match collection.rsplit_once('/') {
            Some((parent, id)) => (format!("{}/{}", self.documents_root(), parent), id),
            None => (self.documents_root(), collection),
        };
        let url = format!("{}/{}:runQuery", self.base_url, parent);
        let body = json!({ "structuredQuery": structured_query(collection_id, filters) });

        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to query collection {}", collection))?;

        let results = Self::check(response, "runQuery").await?;
        let first = results
            .as_array()
            .into_iter()
            .flatten()
            .find_map(|item| item.get("document"));

        first.map(decode_document).transpose()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let count = batch.len();
        let writes: Vec<Value> = batch
            .into_writes()
            .into_iter()
            .map(|write| {
                let mut entry = json!({
                    "update": {
                        "name": self.document_name(&write.collection, &write.document_id),
                        "fields": encode_fields(&write.fields),
                    },
                    "currentDocument": { "exists": false },
                });
                if !write.server_timestamps.is_empty() {
                    entry["updateTransforms"] = Value::Array(
                        write
                            .server_timestamps
                            .iter()
                            .map(|field| json!({ "fieldPath": field, "setToServerValue": "REQUEST_TIME" }))
                            .collect(),
                    );
                }
                entry
            })
            .collect();

        let url = format!("{}/{}/documents:commit", self.base_url, self.database_path);
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "writes": writes }))
            .send()
            .await
            .context("Failed to send Firestore commit")?;

        Self::check(response, "commit").await?;
        debug!("Firestore committed {} writes", count);
        Ok(())
    }
}

fn structured_query(collection_id: &str, filters: &[FieldFilter]) -> Value {
    let mut field_filters: Vec<Value> = filters
        .iter()
        .map(|filter| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": filter.field },
                    "op": "EQUAL",
                    "value": encode_value(&filter.value),
                }
            })
        })
        .collect();

    let mut query = json!({
        "from": [{ "collectionId": collection_id }],
        "limit": 1,
    });
    match field_filters.len() {
        0 => {}
        1 => query["where"] = field_filters.remove(0),
        _ => {
            query["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": field_filters }
            })
        }
    }
    query
}

pub(crate) fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Boolean(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Double(d) => json!({ "doubleValue": d }),
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(ts) => json!({ "timestampValue": ts.to_rfc3339() }),
        FieldValue::Array(values) => {
            json!({ "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        FieldValue::Map(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

fn encode_fields(fields: &Fields) -> Value {
    let map: Map<String, Value> =
        fields.iter().map(|(k, v)| (k.clone(), encode_value(v))).collect();
    Value::Object(map)
}

pub(crate) fn decode_value(raw: &Value) -> Result<FieldValue> {
    let object = raw.as_object().ok_or_else(|| anyhow!("Firestore value is not an object"))?;
    let (kind, inner) =
        object.iter().next().ok_or_else(|| anyhow!("Firestore value has no type tag"))?;

    let value = match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => FieldValue::Boolean(inner.as_bool().unwrap_or_default()),
        "integerValue" => {
            // Integers arrive as decimal strings
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>()?,
                other => other.as_i64().ok_or_else(|| anyhow!("Invalid integerValue: {}", other))?,
            };
            FieldValue::Integer(parsed)
        }
        "doubleValue" => FieldValue::Double(
            inner.as_f64().ok_or_else(|| anyhow!("Invalid doubleValue: {}", inner))?,
        ),
        "stringValue" | "referenceValue" => {
            FieldValue::String(inner.as_str().unwrap_or_default().to_string())
        }
        "timestampValue" => {
            let text = inner.as_str().ok_or_else(|| anyhow!("Invalid timestampValue"))?;
            FieldValue::Timestamp(DateTime::parse_from_rfc3339(text)?)
        }
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<Result<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            FieldValue::Array(values)
        }
        "mapValue" => FieldValue::Map(decode_fields(inner.get("fields"))?),
        other => {
            debug!("Ignoring unsupported Firestore value type {}", other);
            FieldValue::Null
        }
    };
    Ok(value)
}

fn decode_fields(raw: Option<&Value>) -> Result<Fields> {
    let mut fields = Fields::new();
    if let Some(Value::Object(map)) = raw {
        for (key, value) in map {
            fields.insert(key.clone(), decode_value(value)?);
        }
    }
    Ok(fields)
}

fn decode_document(raw: &Value) -> Result<Document> {
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Firestore document without a name"))?;
    let id = name.rsplit('/').next().unwrap_or(name).to_string();
    Ok(Document { id, fields: decode_fields(raw.get("fields"))? })
}
