//! Telemetry upload.
//!
//! A batch of [`Measurement`]s is encoded by a [`MeasurementSerializer`]
//! and POSTed to `/telemetry/proto` in one request.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::client::{CloudClient, CloudError};
use super::endpoints;
use crate::transport::ContentType;

/// Readings per upload; extra readings are dropped (oldest first).
pub const MAX_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementKind {
    Temperature,
    Humidity,
    Pressure,
    Co2,
    Voc,
    Pm25,
    Battery,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub kind: MeasurementKind,
    pub value: f32,
    /// Epoch ms.
    pub timestamp_ms: i64,
}

impl Measurement {
    pub fn new(kind: MeasurementKind, value: f32, timestamp_ms: i64) -> Self {
        Self {
            kind,
            value,
            timestamp_ms,
        }
    }
}

/// Wire encoding for a measurement batch.
pub trait MeasurementSerializer: Send + Sync {
    fn content_type(&self) -> ContentType;

    fn encode(&self, batch: &[Measurement]) -> Result<Vec<u8>, CloudError>;
}

/// Compact binary encoding via `postcard`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostcardSerializer;

impl MeasurementSerializer for PostcardSerializer {
    fn content_type(&self) -> ContentType {
        ContentType::OctetStream
    }

    fn encode(&self, batch: &[Measurement]) -> Result<Vec<u8>, CloudError> {
        postcard::to_allocvec(batch).map_err(|_| CloudError::ParseError)
    }
}

pub struct TelemetryService {
    client: Arc<CloudClient>,
    serializer: Box<dyn MeasurementSerializer>,
}

impl TelemetryService {
    pub fn new(client: Arc<CloudClient>, serializer: Box<dyn MeasurementSerializer>) -> Self {
        Self { client, serializer }
    }

    pub fn send(&self, measurements: &[Measurement]) -> Result<(), CloudError> {
        if measurements.is_empty() {
            return Ok(());
        }
        let batch = if measurements.len() > MAX_BATCH_SIZE {
            warn!(
                "Telemetry: {} readings, sending newest {}",
                measurements.len(),
                MAX_BATCH_SIZE
            );
            &measurements[measurements.len() - MAX_BATCH_SIZE..]
        } else {
            measurements
        };

        let body = self.serializer.encode(batch)?;
        if body.is_empty() {
            warn!("Telemetry: encoder produced no bytes");
            return Err(CloudError::ParseError);
        }
        self.client
            .post(endpoints::TELEMETRY, &body, self.serializer.content_type())?;
        info!("Telemetry: {} readings ({} bytes) sent", batch.len(), body.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::client::test_support::client;
    use crate::transport::Method;

    struct Empty;

    impl MeasurementSerializer for Empty {
        fn content_type(&self) -> ContentType {
            ContentType::Protobuf
        }
        fn encode(&self, _: &[Measurement]) -> Result<Vec<u8>, CloudError> {
            Ok(Vec::new())
        }
    }

    fn reading(i: i64) -> Measurement {
        Measurement::new(MeasurementKind::Temperature, 21.5, 1_700_000_000_000 + i)
    }

    #[test]
    fn empty_batch_sends_nothing() {
        let (c, t, _) = client();
        let svc = TelemetryService::new(Arc::new(c), Box::new(PostcardSerializer));
        assert_eq!(svc.send(&[]), Ok(()));
        assert!(t.sent().is_empty());
    }

    #[test]
    fn posts_postcard_batch() {
        let (c, t, _) = client();
        let svc = TelemetryService::new(Arc::new(c), Box::new(PostcardSerializer));
        let batch = [reading(0), reading(1)];
        svc.send(&batch).unwrap();

        let sent = t.sent();
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[0].path, "/telemetry/proto");
        assert_eq!(sent[0].content_type, ContentType::OctetStream);
        let back: Vec<Measurement> = postcard::from_bytes(&sent[0].body).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn oversized_batch_keeps_newest() {
        let (c, t, _) = client();
        let svc = TelemetryService::new(Arc::new(c), Box::new(PostcardSerializer));
        let batch: Vec<Measurement> = (0..(MAX_BATCH_SIZE as i64 + 5)).map(reading).collect();
        svc.send(&batch).unwrap();
        let back: Vec<Measurement> = postcard::from_bytes(&t.sent()[0].body).unwrap();
        assert_eq!(back.len(), MAX_BATCH_SIZE);
        assert_eq!(back[0], reading(5));
    }

    #[test]
    fn empty_encoding_is_parse_error() {
        let (c, t, _) = client();
        let svc = TelemetryService::new(Arc::new(c), Box::new(Empty));
        assert_eq!(svc.send(&[reading(0)]), Err(CloudError::ParseError));
        assert!(t.sent().is_empty());
    }

    #[test]
    fn server_error_surfaces() {
        let (c, t, _) = client();
        let svc = TelemetryService::new(Arc::new(c), Box::new(PostcardSerializer));
        t.reply(500, "");
        assert_eq!(svc.send(&[reading(0)]), Err(CloudError::ServerError));
    }
}
