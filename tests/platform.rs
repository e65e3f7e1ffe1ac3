//! Client tests against an in-memory platform.
//!
//! `FakePlatform` implements `Transport` and answers the v2 endpoints the
//! clients use: setup, sign-in, bucket/org/authorization listing, write and
//! query. Queries understand just enough Flux for these tests: `==` filters on
//! `r.<column>`, and a trailing `last()`, `mean()` or `max()`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use influxdb_platform::onboarding::{self, OnboardingRequest};
use influxdb_platform::{
    ApiRequest, ApiResponse, Error, FieldValue, PlatformClient, Point, PointTime, Transport,
    Value, WriteOptions, WritePrecision,
};

const USERNAME: &str = "admin";
const PASSWORD: &str = "11111111";
const ORG_ID: &str = "0261487478164c85";
const BUCKET_ID: &str = "1b5a9c7e3f2d4b60";
const TOKEN: &str = "fake-token-xyz";
const SESSION: &str = "influxdb-oss-session=s3ss10n";

// ============================================================================
// Fake platform
// ============================================================================

#[derive(Clone, Debug)]
struct StoredPoint {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: Vec<(String, String)>,
    time: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    onboarded: bool,
    points: Vec<StoredPoint>,
}

#[derive(Default)]
struct FakePlatform {
    state: Mutex<State>,
    calls: AtomicUsize,
    writes: AtomicUsize,
}

impl FakePlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn reply(status: u16, body: impl Into<String>) -> ApiResponse {
    ApiResponse::from_bytes(status, body.into())
}

fn has_token(req: &ApiRequest) -> bool {
    req.header_value("Authorization") == Some(format!("Token {}", TOKEN).as_str())
}

fn has_session(req: &ApiRequest) -> bool {
    req.header_value("Cookie") == Some(SESSION)
}

#[async_trait]
impl Transport for FakePlatform {
    async fn send(&self, req: ApiRequest) -> influxdb_platform::Result<ApiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let unauthorized = || reply(401, r#"{"code":"unauthorized","message":"unauthorized access"}"#);

        let response = match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/api/v2/setup") => {
                if state.onboarded {
                    reply(422, r#"{"code":"conflict","message":"onboarding has already been completed"}"#)
                } else {
                    state.onboarded = true;
                    reply(
                        201,
                        format!(
                            r#"{{"bucket":{{"id":"{}","name":"my-bucket"}},"org":{{"id":"{}","name":"Testing"}},"auth":{{"token":"{}"}}}}"#,
                            BUCKET_ID, ORG_ID, TOKEN
                        ),
                    )
                }
            }
            ("POST", "/api/v2/signin") => {
                // admin:11111111
                if req.header_value("Authorization") == Some("Basic YWRtaW46MTExMTExMTE=") {
                    reply(204, "").with_header("Set-Cookie", format!("{}; Path=/api/", SESSION))
                } else {
                    unauthorized()
                }
            }
            ("POST", "/api/v2/signout") if has_session(&req) => reply(204, ""),
            ("GET", "/api/v2/buckets") if has_session(&req) => reply(
                200,
                format!(
                    r#"{{"buckets":[{{"id":"0000","name":"_monitoring"}},{{"id":"{}","name":"my-bucket"}}]}}"#,
                    BUCKET_ID
                ),
            ),
            ("GET", "/api/v2/orgs") if has_session(&req) => reply(
                200,
                format!(r#"{{"orgs":[{{"id":"{}","name":"Testing"}}]}}"#, ORG_ID),
            ),
            ("GET", "/api/v2/authorizations") if has_session(&req) => reply(
                200,
                format!(r#"{{"authorizations":[{{"token":"{}","status":"active"}}]}}"#, TOKEN),
            ),
            ("POST", "/api/v2/write") if has_token(&req) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                if req.query_value("bucket") != Some(BUCKET_ID) || req.query_value("orgID") != Some(ORG_ID) {
                    reply(404, r#"{"code":"not found","message":"bucket not found"}"#)
                } else {
                    let precision = req.query_value("precision").unwrap_or("ns").to_string();
                    let body = String::from_utf8(req.body.clone().unwrap_or_default().to_vec()).unwrap();
                    for line in body.lines() {
                        state.points.push(parse_line(line, &precision));
                    }
                    reply(204, "")
                }
            }
            ("POST", "/api/v2/query") if has_token(&req) => {
                let payload: serde_json::Value =
                    serde_json::from_slice(req.body.as_deref().unwrap_or_default()).unwrap();
                let flux = payload["query"].as_str().unwrap_or_default();
                reply(200, run_query(&state.points, flux))
            }
            (_, "/api/v2/write" | "/api/v2/query" | "/api/v2/buckets" | "/api/v2/orgs"
                | "/api/v2/authorizations" | "/api/v2/signout") => unauthorized(),
            _ => reply(404, r#"{"code":"not found","message":"path not found"}"#),
        };
        Ok(response)
    }
}

/// Parse one unescaped line of line protocol.
fn parse_line(line: &str, precision: &str) -> StoredPoint {
    let mut parts = line.split(' ');
    let series = parts.next().unwrap();
    let fields = parts.next().unwrap();
    let ts: i64 = parts.next().unwrap().parse().unwrap();

    let mut series = series.split(',');
    let measurement = series.next().unwrap().to_string();
    let tags = series
        .map(|kv| {
            let (k, v) = kv.split_once('=').unwrap();
            (k.to_string(), v.to_string())
        })
        .collect();
    let fields = fields
        .split(',')
        .map(|kv| {
            let (k, v) = kv.split_once('=').unwrap();
            (k.to_string(), v.to_string())
        })
        .collect();
    let time = match precision {
        "s" => Utc.timestamp_opt(ts, 0).unwrap(),
        "ms" => Utc.timestamp_millis_opt(ts).unwrap(),
        _ => Utc.timestamp_nanos(ts),
    };

    StoredPoint {
        measurement,
        tags,
        fields,
        time,
    }
}

/// Flux `r.<column> == "<value>"` filters.
fn filters(flux: &str) -> Vec<(String, String)> {
    flux.split("r.")
        .skip(1)
        .filter_map(|rest| {
            let (column, rest) = rest.split_once(" == \"")?;
            let (value, _) = rest.split_once('"')?;
            Some((column.to_string(), value.to_string()))
        })
        .collect()
}

/// Annotated CSV type and cell of a line protocol field value.
fn typed(raw: &str) -> (&'static str, String) {
    if let Some(i) = raw.strip_suffix('i') {
        ("long", i.to_string())
    } else if raw.starts_with('"') {
        ("string", raw.trim_matches('"').to_string())
    } else if raw == "true" || raw == "false" {
        ("boolean", raw.to_string())
    } else {
        ("double", raw.to_string())
    }
}

fn run_query(points: &[StoredPoint], flux: &str) -> String {
    let filters = filters(flux);

    // One table per (measurement, field), like a plain `from |> range`.
    let mut series: BTreeMap<(String, String), Vec<(&StoredPoint, String)>> = BTreeMap::new();
    for p in points {
        for (field, raw) in &p.fields {
            let matches = filters.iter().all(|(col, val)| match col.as_str() {
                "_measurement" => &p.measurement == val,
                "_field" => field == val,
                tag => p.tags.get(tag) == Some(val),
            });
            if matches {
                series
                    .entry((p.measurement.clone(), field.clone()))
                    .or_default()
                    .push((p, raw.clone()));
            }
        }
    }

    let mut csv = String::new();
    for (index, ((measurement, field), mut rows)) in series.into_iter().enumerate() {
        rows.sort_by_key(|(p, _)| p.time);
        let tag_keys: Vec<String> = rows[0].0.tags.keys().cloned().collect();
        let (mut data_type, _) = typed(&rows[0].1);

        // (time, value) pairs after aggregation
        let out: Vec<(Option<DateTime<Utc>>, String)> = if flux.contains("last()") {
            let (p, raw) = rows.last().unwrap();
            vec![(Some(p.time), typed(raw).1)]
        } else if flux.contains("max()") {
            let (p, raw) = rows
                .iter()
                .max_by(|a, b| {
                    let x: f64 = typed(&a.1).1.parse().unwrap();
                    let y: f64 = typed(&b.1).1.parse().unwrap();
                    x.total_cmp(&y)
                })
                .unwrap();
            vec![(Some(p.time), typed(raw).1)]
        } else if flux.contains("mean()") {
            let sum: f64 = rows.iter().map(|(_, raw)| typed(raw).1.parse::<f64>().unwrap()).sum();
            data_type = "double";
            vec![(None, format!("{}", sum / rows.len() as f64))]
        } else {
            rows.iter().map(|(p, raw)| (Some(p.time), typed(raw).1)).collect()
        };

        let with_time = out[0].0.is_some();
        let mut types = vec!["string", "long", "dateTime:RFC3339", "dateTime:RFC3339"];
        let mut groups = vec!["false", "false", "true", "true"];
        let mut header = vec!["result", "table", "_start", "_stop"];
        if with_time {
            types.push("dateTime:RFC3339");
            groups.push("false");
            header.push("_time");
        }
        types.extend([data_type, "string", "string"]);
        groups.extend(["false", "true", "true"]);
        header.extend(["_value", "_field", "_measurement"]);
        for k in &tag_keys {
            types.push("string");
            groups.push("true");
            header.push(k);
        }

        csv.push_str(&format!("#datatype,{}\n", types.join(",")));
        csv.push_str(&format!("#group,{}\n", groups.join(",")));
        csv.push_str(&format!("#default,_result{}\n", ",".repeat(types.len() - 1)));
        csv.push_str(&format!(",{}\n", header.join(",")));
        for (time, value) in out {
            let mut row = vec![
                String::new(),
                index.to_string(),
                "1970-01-01T00:00:00Z".to_string(),
                "2030-01-01T00:00:00Z".to_string(),
            ];
            if let Some(t) = time {
                row.push(t.to_rfc3339_opts(SecondsFormat::AutoSi, true));
            }
            row.extend([value, field.clone(), measurement.clone()]);
            for k in &tag_keys {
                row.push(rows[0].0.tags[k].clone());
            }
            csv.push_str(&format!(",{}\n", row.join(",")));
        }
        csv.push('\n');
    }
    csv
}

// ============================================================================
// Helpers
// ============================================================================

fn onboarding_request() -> OnboardingRequest {
    OnboardingRequest::new(USERNAME, PASSWORD, "Testing", "my-bucket")
}

fn weather(pressure: i64, wind_speed: i64, precipitation: i64, offset_secs: i64) -> Point {
    let now = Utc.timestamp_opt(1548851316, 0).unwrap();
    Point::new(
        "weather_outdoor",
        [("home", "100"), ("sensor", "120")],
        [
            ("pressure", FieldValue::from(pressure)),
            ("wind_speed", FieldValue::from(wind_speed)),
            ("precipitation", FieldValue::from(precipitation)),
            ("battery_voltage", FieldValue::from(2.6)),
        ],
        Some(PointTime::new(
            now + chrono::Duration::seconds(offset_secs),
            WritePrecision::Seconds,
        )),
    )
    .unwrap()
}

fn flux(tail: &str) -> String {
    format!(
        "from(bucketID: \"{}\")\n  |> range(start: 0)\n  |> filter(fn: (r) => r._measurement == \"weather_outdoor\")\n{}",
        BUCKET_ID, tail
    )
}

async fn write_weather(platform: &PlatformClient) {
    let writer = platform.write_client();
    writer.write_point(BUCKET_ID, ORG_ID, &weather(980, 10, 860, 0)).await.unwrap();
    writer.write_point(BUCKET_ID, ORG_ID, &weather(860, 12, 865, 10)).await.unwrap();
    writer.write_point(BUCKET_ID, ORG_ID, &weather(880, 11, 865, 20)).await.unwrap();
    writer.close().await.unwrap();
}

// ============================================================================
// Onboarding
// ============================================================================

#[tokio::test]
async fn test_onboarding_token_authenticates_client() {
    let fake = FakePlatform::new();
    let creds = onboarding::onboard_with(fake.clone(), &onboarding_request())
        .await
        .unwrap();
    assert_eq!(creds.org_id(), ORG_ID);

    let platform = PlatformClient::with_transport(fake.clone(), creds.token());
    let tables = platform
        .query_client()
        .query(flux(""), creds.org_id())
        .await
        .unwrap();
    assert!(tables.is_empty());
}

#[tokio::test]
async fn test_second_onboarding_fails_and_discovery_recovers() {
    let fake = FakePlatform::new();
    let first = onboarding::onboard_with(fake.clone(), &onboarding_request())
        .await
        .unwrap();

    let err = onboarding::onboard_with(fake.clone(), &onboarding_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyOnboarded));

    let found = onboarding::discover_with(fake.clone(), USERNAME, PASSWORD)
        .await
        .unwrap();
    assert_eq!(found.bucket_id(), first.bucket_id());
    assert_eq!(found.org_id(), first.org_id());
    assert_eq!(found.token(), first.token());

    let again = onboarding::onboard_or_discover_with(fake, &onboarding_request())
        .await
        .unwrap();
    assert_eq!(again, first);
}

#[tokio::test]
async fn test_wrong_token_is_auth_error() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake, "stolen");
    let err = platform
        .query_client()
        .query(flux(""), ORG_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth { .. }));
}

// ============================================================================
// Writing
// ============================================================================

#[tokio::test]
async fn test_zero_field_point_never_reaches_network() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake.clone(), TOKEN);
    let writer = platform.write_client();

    let fields: Vec<(String, FieldValue)> = Vec::new();
    let err = Point::new("weather_outdoor", [("home", "100")], fields, None).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = writer
        .write_record(BUCKET_ID, ORG_ID, WritePrecision::Seconds, "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    writer.close().await.unwrap();
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn test_buffered_points_sent_on_close() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake.clone(), TOKEN)
        .with_write_options(WriteOptions::default().with_batch_size(100));

    let writer = platform.write_client();
    writer.write_point(BUCKET_ID, ORG_ID, &weather(980, 10, 860, 0)).await.unwrap();
    writer.write_point(BUCKET_ID, ORG_ID, &weather(860, 12, 865, 10)).await.unwrap();
    assert_eq!(fake.writes(), 0);

    writer.close().await.unwrap();
    assert_eq!(fake.writes(), 1);

    let tables = platform
        .query_client()
        .query(flux("  |> filter(fn: (r) => r._field == \"pressure\")"), ORG_ID)
        .await
        .unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].records.len(), 2);
}

#[tokio::test]
async fn test_write_to_unknown_bucket_fails_loudly() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake, TOKEN);
    let writer = platform.write_client();

    let err = writer
        .write_point("nope", ORG_ID, &weather(980, 10, 860, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Server { status: 404, .. }));
    assert_eq!(writer.pending().await, 1);
}

// ============================================================================
// Round trip and queries
// ============================================================================

#[tokio::test]
async fn test_write_read_round_trip() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake, TOKEN);

    let fields = [
        ("level", FieldValue::Integer(-7)),
        ("ratio", FieldValue::Float(0.25)),
        ("open", FieldValue::Boolean(true)),
        ("state", FieldValue::String("north".to_string())),
    ];
    let point = Point::new(
        "gate",
        [("site", "dock-3")],
        fields.clone(),
        Some(PointTime::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            WritePrecision::Seconds,
        )),
    )
    .unwrap();

    let writer = platform.write_client();
    writer.write_point(BUCKET_ID, ORG_ID, &point).await.unwrap();
    writer.close().await.unwrap();

    let tables = platform
        .query_client()
        .query(
            format!(
                "from(bucketID: \"{}\") |> range(start: 0) |> filter(fn: (r) => r._measurement == \"gate\") |> filter(fn: (r) => r.site == \"dock-3\")",
                BUCKET_ID
            ),
            ORG_ID,
        )
        .await
        .unwrap();

    let records: Vec<_> = tables.iter().flat_map(|t| &t.records).collect();
    assert_eq!(records.len(), fields.len());
    for (name, value) in &fields {
        let record = records
            .iter()
            .find(|r| r.field() == Some(*name))
            .unwrap_or_else(|| panic!("field {} missing", name));
        assert_eq!(record.value().unwrap(), value);
        assert_eq!(record.tags().get("site"), Some(&"dock-3"));
        assert_eq!(record.time().unwrap().timestamp(), 1_700_000_000);
    }
}

#[tokio::test]
async fn test_weather_last_mean_max() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake, TOKEN);
    write_weather(&platform).await;
    let query = platform.query_client();

    // Last measurement
    let tables = query
        .query(
            flux("  |> filter(fn: (r) => r.home == \"100\")\n  |> filter(fn: (r) => r.sensor == \"120\")\n  |> last()"),
            ORG_ID,
        )
        .await
        .unwrap();
    let last = weather(880, 11, 865, 20);
    let records: Vec<_> = tables.iter().flat_map(|t| &t.records).collect();
    assert_eq!(records.len(), 4);
    for record in records {
        let field = record.field().unwrap();
        assert_eq!(record.value().unwrap(), &last.fields()[field]);
        assert_eq!(record.time().unwrap().timestamp(), 1548851336);
        assert_eq!(record.measurement(), Some("weather_outdoor"));
    }

    // Average pressure
    let tables = query
        .query(flux("  |> filter(fn: (r) => r._field == \"pressure\")\n  |> mean()"), ORG_ID)
        .await
        .unwrap();
    assert_eq!(tables.len(), 1);
    let mean = tables[0].records[0].value().and_then(Value::as_f64).unwrap();
    assert!((mean - 906.6666666666666).abs() < 1e-9);
    assert!(tables[0].records[0].time().is_none());

    // Max wind speed
    let tables = query
        .query(flux("  |> filter(fn: (r) => r._field == \"wind_speed\")\n  |> max()"), ORG_ID)
        .await
        .unwrap();
    assert_eq!(tables[0].records.len(), 1);
    assert_eq!(tables[0].records[0].value(), Some(&Value::Long(12)));
}

#[tokio::test]
async fn test_select_all_keeps_order_per_table() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake, TOKEN);
    write_weather(&platform).await;

    let tables = platform.query_client().query(flux(""), ORG_ID).await.unwrap();
    assert_eq!(tables.len(), 4);

    let pressure = tables
        .iter()
        .find(|t| t.records[0].field() == Some("pressure"))
        .unwrap();
    let values: Vec<i64> = pressure.records.iter().filter_map(|r| r.get_long("_value")).collect();
    assert_eq!(values, vec![980, 860, 880]);
}

#[tokio::test]
async fn test_no_matching_points_is_empty() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake, TOKEN);
    write_weather(&platform).await;

    let tables = platform
        .query_client()
        .query(
            "from(bucketID: \"x\") |> range(start: 0) |> filter(fn: (r) => r._measurement == \"nonexistent\")",
            ORG_ID,
        )
        .await
        .unwrap();
    assert!(tables.is_empty());
}

#[tokio::test]
async fn test_concurrent_queries_share_client() {
    let fake = FakePlatform::new();
    let platform = PlatformClient::with_transport(fake, TOKEN);
    write_weather(&platform).await;

    let a = platform.query_client();
    let b = a.clone();
    let pressure = flux("  |> filter(fn: (r) => r._field == \"pressure\")");
    let wind = flux("  |> filter(fn: (r) => r._field == \"wind_speed\")");
    let (x, y) = tokio::join!(a.query(pressure, ORG_ID), b.query(wind, ORG_ID));
    assert_eq!(x.unwrap()[0].records.len(), 3);
    assert_eq!(y.unwrap()[0].records.len(), 3);
}
