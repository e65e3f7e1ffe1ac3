//! # influxdb-platform
//!
//! Async client for InfluxDB 2.x covering the whole life of a tenant:
//! onboarding an instance, writing points, and running Flux queries.
//!
//! ## Quick Start
//!
//! ```ignore
//! use influxdb_platform::onboarding::{self, OnboardingRequest};
//! use influxdb_platform::{FieldValue, PlatformClient, Point, PointTime, WritePrecision};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let url = "http://localhost:8086";
//!     let request = OnboardingRequest::new("admin", "11111111", "Testing", "my-bucket");
//!     let creds = onboarding::onboard_or_discover(url, &request).await?;
//!
//!     let platform = PlatformClient::create(url, creds.token())?;
//!
//!     let writer = platform.write_client();
//!     let point = Point::new(
//!         "weather_outdoor",
//!         [("home", "100"), ("sensor", "120")],
//!         [("pressure", FieldValue::from(980)), ("wind_speed", FieldValue::from(10))],
//!         Some(PointTime::new(chrono::Utc::now(), WritePrecision::Seconds)),
//!     )?;
//!     writer.write_point(creds.bucket_id(), creds.org_id(), &point).await?;
//!     writer.close().await?;
//!
//!     let tables = platform.query_client().query(r#"
//!         from(bucket: "my-bucket")
//!           |> range(start: 0)
//!           |> filter(fn: (r) => r._measurement == "weather_outdoor")
//!           |> last()
//!     "#, creds.org_id()).await?;
//!
//!     for record in tables.iter().flat_map(|t| &t.records) {
//!         println!("{:?} = {:?}", record.field(), record.value());
//!     }
//!
//!     platform.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Validated points**: a [`Point`] with no fields cannot be constructed
//! - **Buffered writes**: batching with guaranteed flush on close
//! - **Typed results**: values are decoded by the server-declared column type
//! - **Streaming**: [`QueryClient::query_stream`] yields records one at a time
//! - **Pluggable transport**: anything implementing [`Transport`] can stand in
//!   for HTTP

pub mod client;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod parser;
pub mod point;
pub mod query;
pub mod table;
pub mod transport;
pub mod value;
pub mod write;

// Re-export main types at crate root
pub use client::{Health, PlatformClient};
pub use config::{ClientOptions, WriteOptions};
pub use error::{Error, Result};
pub use onboarding::{Credentials, OnboardingRequest};
pub use point::{FieldValue, Point, PointTime, WritePrecision};
pub use query::QueryClient;
pub use table::{DataType, FluxColumn, FluxRecord, FluxTable, FluxTableMetadata};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use value::Value;
pub use write::WriteClient;

// Re-export parser for advanced use cases
pub use parser::AnnotatedCsvParser;
