//! Flux query client.
//!
//! The script is sent as-is; nothing is validated locally. Results come back
//! as annotated CSV and are decoded by [`AnnotatedCsvParser`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use serde::Serialize;
use tracing::{debug, trace};

use crate::client::Connection;
use crate::error::Result;
use crate::parser::AnnotatedCsvParser;
use crate::table::{FluxRecord, FluxTable};
use crate::transport::{ApiRequest, ApiResponse};

/// Query payload for the InfluxDB API.
#[derive(Debug, Serialize)]
struct QueryPayload {
    query: String,
    #[serde(rename = "type")]
    query_type: String,
    dialect: QueryDialect,
}

/// CSV dialect settings for query responses.
#[derive(Debug, Serialize)]
struct QueryDialect {
    annotations: Vec<String>,
    #[serde(rename = "commentPrefix")]
    comment_prefix: String,
    #[serde(rename = "dateTimeFormat")]
    date_time_format: String,
    delimiter: String,
    header: bool,
}

impl Default for QueryDialect {
    fn default() -> Self {
        Self {
            annotations: vec![
                "datatype".to_string(),
                "group".to_string(),
                "default".to_string(),
            ],
            comment_prefix: "#".to_string(),
            date_time_format: "RFC3339".to_string(),
            delimiter: ",".to_string(),
            header: true,
        }
    }
}

impl QueryPayload {
    fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            query_type: "flux".to_string(),
            dialect: QueryDialect::default(),
        }
    }
}

/// Query handle lent by [`PlatformClient::query_client`](crate::PlatformClient::query_client).
///
/// Holds no per-query state, so one handle (or clones of it) can run any
/// number of queries concurrently.
#[derive(Clone)]
pub struct QueryClient {
    connection: Arc<Connection>,
}

impl QueryClient {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    async fn send(&self, flux: String, org_id: &str) -> Result<ApiResponse> {
        let request = ApiRequest::post("/api/v2/query")
            .query("orgID", org_id)
            .header("Accept", "application/csv")
            .json(&QueryPayload::new(flux))?;
        self.connection.execute(request).await
    }

    /// Run a Flux script and collect the result into tables.
    ///
    /// Tables are returned in the order they first appear; records keep the
    /// server's order within a table. Each `yield` of the script contributes
    /// its own tables even when their indices repeat. An empty result is an empty
    /// `Vec`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let tables = query_client.query(r#"
    ///     from(bucket: "my-bucket")
    ///       |> range(start: 0)
    ///       |> filter(fn: (r) => r._measurement == "weather_outdoor")
    ///       |> last()
    /// "#, &org_id).await?;
    ///
    /// for table in &tables {
    ///     for record in &table.records {
    ///         println!("{:?} = {:?}", record.field(), record.value());
    ///     }
    /// }
    /// ```
    pub async fn query(&self, flux: impl Into<String>, org_id: &str) -> Result<Vec<FluxTable>> {
        let response = self.send(flux.into(), org_id).await?;
        let mut parser = AnnotatedCsvParser::new(response.into_reader());

        let mut tables: Vec<FluxTable> = Vec::new();
        // Table indices restart for every `yield`, so a table is identified
        // by its result name and index together.
        let mut slots: HashMap<(String, i64), usize> = HashMap::new();

        while let Some(record) = parser.next().await? {
            let key = (
                record.get_str("result").unwrap_or_default().to_string(),
                record.table,
            );
            let slot = match slots.get(&key) {
                Some(&slot) => slot,
                None => {
                    let columns = parser
                        .metadata()
                        .map(|m| m.columns.clone())
                        .unwrap_or_default();
                    trace!(result = %key.0, table = record.table, columns = columns.len(), "New table");
                    tables.push(FluxTable::new(record.table, columns));
                    slots.insert(key, tables.len() - 1);
                    tables.len() - 1
                }
            };
            tables[slot].records.push(record);
        }

        debug!(tables = tables.len(), "Query decoded");
        Ok(tables)
    }

    /// Run a Flux script and return results as an async stream of records.
    ///
    /// Records are yielded as they are decoded, so result sets of any size
    /// can be processed with constant memory. The stream ends after the
    /// first error.
    pub async fn query_stream(
        &self,
        flux: impl Into<String>,
        org_id: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<FluxRecord>> + Send>>> {
        let response = self.send(flux.into(), org_id).await?;
        let mut parser = AnnotatedCsvParser::new(response.into_reader());

        let s = stream! {
            loop {
                match parser.next().await {
                    Ok(Some(record)) => yield Ok(record),
                    Ok(None) => break,       // EOF
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(s))
    }

    /// Run a Flux script and return the undecoded annotated CSV.
    pub async fn query_raw(&self, flux: impl Into<String>, org_id: &str) -> Result<String> {
        self.send(flux.into(), org_id).await?.text().await
    }
}
