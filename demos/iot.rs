//! IoT walkthrough: onboard a fresh InfluxDB, record three weather samples
//! and ask the usual questions about them.
//!
//! Run with: `cargo run --example iot`
//!
//! Set `RUST_LOG=influxdb_platform=debug` to watch the requests go out.

use chrono::{Duration, TimeZone, Utc};
use influxdb_platform::onboarding::{self, OnboardingRequest};
use influxdb_platform::{FieldValue, FluxTable, PlatformClient, Point, PointTime, WritePrecision};
use tracing_subscriber::EnvFilter;

const URL: &str = "http://localhost:8086";

fn sample(pressure: i64, wind_speed: i64, precipitation: i64, offset: i64) -> influxdb_platform::Result<Point> {
    let base = Utc
        .timestamp_opt(1_548_851_316, 0)
        .single()
        .ok_or_else(|| influxdb_platform::Error::Validation("bad base time".into()))?;
    Point::new(
        "weather_outdoor",
        [("home", "100"), ("sensor", "120")],
        [
            ("pressure", FieldValue::from(pressure)),
            ("wind_speed", FieldValue::from(wind_speed)),
            ("precipitation", FieldValue::from(precipitation)),
            ("battery_voltage", FieldValue::from(2.6)),
        ],
        Some(PointTime::new(base + Duration::seconds(offset), WritePrecision::Seconds)),
    )
}

fn print_tables(title: &str, tables: &[FluxTable]) {
    println!("\n=== {} ===", title);
    println!(
        "{:<6} {:<26} {:<26} {:<26} {:<16} {:<16} {}",
        "table", "_start", "_stop", "_time", "_measurement", "_field", "_value"
    );
    for record in tables.iter().flat_map(|t| &t.records) {
        let show = |name: &str| record.get(name).map(|v| v.to_string()).unwrap_or_default();
        println!(
            "{:<6} {:<26} {:<26} {:<26} {:<16} {:<16} {}",
            record.table,
            show("_start"),
            show("_stop"),
            show("_time"),
            show("_measurement"),
            show("_field"),
            show("_value"),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let request = OnboardingRequest::new("my-user", "my-password", "my-org", "my-bucket");
    let creds = onboarding::onboard_or_discover(URL, &request).await?;
    println!("bucket {} in org {}", creds.bucket_id(), creds.org_id());

    let platform = PlatformClient::create(URL, creds.token())?;

    let writer = platform.write_client();
    for point in [
        sample(980, 10, 860, 0)?,
        sample(860, 12, 865, 10)?,
        sample(880, 11, 865, 20)?,
    ] {
        writer.write_point(creds.bucket_id(), creds.org_id(), &point).await?;
    }
    writer.close().await?;

    let base = format!(
        r#"from(bucketID: "{}")
  |> range(start: 0)
  |> filter(fn: (r) => r._measurement == "weather_outdoor")
  |> filter(fn: (r) => r.home == "100")
  |> filter(fn: (r) => r.sensor == "120")"#,
        creds.bucket_id()
    );

    let query = platform.query_client();
    let questions = [
        ("Last measurement", format!("{}\n  |> last()", base)),
        (
            "Average pressure",
            format!("{}\n  |> filter(fn: (r) => r._field == \"pressure\")\n  |> mean()", base),
        ),
        (
            "Maximum wind speed",
            format!("{}\n  |> filter(fn: (r) => r._field == \"wind_speed\")\n  |> max()", base),
        ),
        ("All measurements", base.clone()),
    ];

    for (title, flux) in questions {
        let tables = query.query(flux, creds.org_id()).await?;
        print_tables(title, &tables);
    }

    platform.close();
    Ok(())
}
