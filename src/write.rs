//! Write client.
//!
//! Points are encoded to line protocol when they are handed over and kept in a
//! buffer until `batch_size` lines are pending, [`WriteClient::flush`] is
//! called, or the handle is closed. One async mutex guards the buffer and is
//! held for the whole flush, so writes issued while a flush is in flight wait
//! for it to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::Connection;
use crate::config::WriteOptions;
use crate::error::{Error, Result};
use crate::point::{Point, WritePrecision};
use crate::transport::ApiRequest;

/// One encoded line and where it goes.
#[derive(Debug)]
struct PendingLine {
    bucket: String,
    org: String,
    precision: WritePrecision,
    line: String,
}

impl PendingLine {
    fn same_destination(&self, other: &PendingLine) -> bool {
        self.bucket == other.bucket && self.org == other.org && self.precision == other.precision
    }
}

/// Buffered writer lent by [`PlatformClient::write_client`](crate::PlatformClient::write_client).
///
/// Call [`close`](Self::close) when done: it sends whatever is still buffered
/// and reports any failure. Lines that could not be sent stay buffered, so a
/// failed flush can be retried.
pub struct WriteClient {
    connection: Arc<Connection>,
    options: WriteOptions,
    buffer: Mutex<Vec<PendingLine>>,
    closed: AtomicBool,
}

impl WriteClient {
    pub(crate) fn new(connection: Arc<Connection>, options: WriteOptions) -> Self {
        Self {
            connection,
            options,
            buffer: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Write one point to a bucket of an organization.
    pub async fn write_point(&self, bucket_id: &str, org_id: &str, point: &Point) -> Result<()> {
        self.write_points(bucket_id, org_id, std::iter::once(point)).await
    }

    /// Write several points to the same bucket.
    pub async fn write_points<'a, I>(&self, bucket_id: &str, org_id: &str, points: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        check_destination(bucket_id, org_id)?;
        let lines = points
            .into_iter()
            .map(|p| (p.precision(), p.to_line_protocol()))
            .collect();
        self.enqueue(bucket_id, org_id, lines).await
    }

    /// Write pre-encoded line protocol (one or more lines).
    ///
    /// Blank lines are skipped; a record with no lines at all is rejected.
    pub async fn write_record(
        &self,
        bucket_id: &str,
        org_id: &str,
        precision: WritePrecision,
        record: &str,
    ) -> Result<()> {
        check_destination(bucket_id, org_id)?;
        let lines: Vec<_> = record
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| (precision, l.to_string()))
            .collect();
        if lines.is_empty() {
            return Err(Error::Validation("record is empty".to_string()));
        }
        self.enqueue(bucket_id, org_id, lines).await
    }

    /// Number of lines waiting to be sent.
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Send everything that is buffered.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let mut buffer = self.buffer.lock().await;
        self.flush_buffer(&mut buffer).await
    }

    /// Flush and release the handle.
    ///
    /// The handle is closed even if the flush fails; the flush error is
    /// returned. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut buffer = self.buffer.lock().await;
        let result = self.flush_buffer(&mut buffer).await;
        match &result {
            Ok(()) => debug!("Write client closed"),
            Err(e) => warn!(error = %e, unsent = buffer.len(), "Write client closed with unsent lines"),
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.connection.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        bucket_id: &str,
        org_id: &str,
        lines: Vec<(WritePrecision, String)>,
    ) -> Result<()> {
        self.ensure_open()?;
        if lines.is_empty() {
            return Ok(());
        }

        let mut buffer = self.buffer.lock().await;
        buffer.extend(lines.into_iter().map(|(precision, line)| PendingLine {
            bucket: bucket_id.to_string(),
            org: org_id.to_string(),
            precision,
            line,
        }));

        if buffer.len() >= self.options.batch_size {
            self.flush_buffer(&mut buffer).await?;
        }
        Ok(())
    }

    /// Send buffered lines, one request per run of lines sharing bucket, org
    /// and precision. Stops at the first failure, keeping that run and
    /// everything after it.
    async fn flush_buffer(&self, buffer: &mut Vec<PendingLine>) -> Result<()> {
        while let Some(first) = buffer.first() {
            let run = buffer
                .iter()
                .take_while(|l| l.same_destination(first))
                .count();

            let body = buffer[..run]
                .iter()
                .map(|l| l.line.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let request = ApiRequest::post("/api/v2/write")
                .query("orgID", first.org.as_str())
                .query("bucket", first.bucket.as_str())
                .query("precision", first.precision.as_str())
                .body("text/plain; charset=utf-8", body);

            self.connection.execute(request).await?;
            debug!(
                lines = run,
                bucket = %buffer[0].bucket,
                precision = %buffer[0].precision,
                "Wrote points"
            );
            buffer.drain(..run);
        }
        Ok(())
    }
}

impl Drop for WriteClient {
    fn drop(&mut self) {
        let unsent = self.buffer.get_mut().len();
        if unsent > 0 {
            warn!(unsent, "Write client dropped with unsent lines; call close() to flush");
        }
    }
}

fn check_destination(bucket_id: &str, org_id: &str) -> Result<()> {
    if bucket_id.is_empty() {
        return Err(Error::Validation("bucket id is empty".to_string()));
    }
    if org_id.is_empty() {
        return Err(Error::Validation("organization id is empty".to_string()));
    }
    Ok(())
}
