//! Minimal JSON client for the row store's HTTP API.
//!
//! Carries exactly the surface the sync service needs: field DDL, row
//! listing and scalar cell updates. No reconciliation logic lives here.

use anyhow::anyhow;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RowStoreConfig;

#[derive(Debug, Clone)]
pub struct RowStoreClient {
    http_client: reqwest::Client,
    config: RowStoreConfig,
}

impl RowStoreClient {
    pub fn create(config: RowStoreConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(res: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(anyhow!(
            "row store returned HTTP {} with content '{}'",
            status.as_u16(),
            body
        ))
    }

    pub async fn list_fields(&self, table: &str) -> anyhow::Result<Vec<Field>> {
        let res = self
            .authorize(
                self.http_client
                    .get(self.url(&format!("tables/{table}/fields"))),
            )
            .send()
            .await?;
        Ok(Self::check(res).await?.json().await?)
    }

    pub async fn list_rows(&self, table: &str) -> anyhow::Result<Vec<Row>> {
        let res = self
            .authorize(
                self.http_client
                    .get(self.url(&format!("tables/{table}/rows"))),
            )
            .send()
            .await?;
        let listing: RowListRes = Self::check(res).await?.json().await?;
        Ok(listing.rows)
    }

    pub async fn get_row(&self, table: &str, row_id: &str) -> anyhow::Result<Option<Row>> {
        let rows = self.list_rows(table).await?;
        Ok(rows.into_iter().find(|row| row.id == row_id))
    }

    /// Writes a single cell of one row.
    pub async fn update_scalar(
        &self,
        table: &str,
        row_id: &str,
        column: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({ column: value });
        let res = self
            .authorize(
                self.http_client
                    .patch(self.url(&format!("tables/{table}/rows/{row_id}"))),
            )
            .json(&body)
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    /// Creates a text column if the table does not have it yet.
    pub async fn ensure_field(&self, table: &str, name: &str) -> anyhow::Result<()> {
        let fields = self.list_fields(table).await?;
        if fields.iter().any(|field| field.name == name) {
            return Ok(());
        }

        let body = serde_json::json!({ "name": name, "type": "text" });
        let res = self
            .authorize(
                self.http_client
                    .post(self.url(&format!("tables/{table}/fields"))),
            )
            .json(&body)
            .send()
            .await?;
        Self::check(res).await?;
        tracing::info!(table, field = name, "created missing column");
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Row {
    #[serde(deserialize_with = "de_row_id")]
    pub id: String,
    #[serde(flatten)]
    pub cells: serde_json::Map<String, Value>,
}

impl Row {
    /// Returns the trimmed content of a cell if it holds a non-empty string.
    pub fn text_cell(&self, column: &str) -> Option<&str> {
        match self.cells.get(column) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Deserialize)]
struct RowListRes {
    #[serde(default)]
    rows: Vec<Row>,
}

/// Row ids arrive as numbers from some backends and strings from others.
pub(crate) fn de_row_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n.to_string(),
        Raw::Str(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_numeric_ids() {
        let raw = r#"{
            "rows": [
                { "id": 7, "image_folder": "https://drive.example.com/folders/abc", "name": "Chair" },
                { "id": "row-8", "image_folder": "  ", "name": "Table" }
            ]
        }"#;

        let listing: RowListRes = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.rows.len(), 2);

        let first = &listing.rows[0];
        assert_eq!(first.id, "7");
        assert_eq!(
            first.text_cell("image_folder"),
            Some("https://drive.example.com/folders/abc")
        );

        // Blank and missing cells both read as empty.
        let second = &listing.rows[1];
        assert_eq!(second.id, "row-8");
        assert_eq!(second.text_cell("image_folder"), None);
        assert_eq!(second.text_cell("missing"), None);
    }

    #[test]
    fn parses_fields() {
        let raw = r#"[{ "name": "image_folder", "type": "text" }]"#;
        let fields: Vec<Field> = serde_json::from_str(raw).unwrap();
        assert_eq!(fields[0].name, "image_folder");
        assert_eq!(fields[0].field_type, "text");
    }
}
