use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Destination for final scan reports. `store` is idempotent: a second call
/// with the same id and payload is a no-op, a second call with a different
/// payload is rejected.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist the report payload, returning the object key.
    async fn store(&self, id: Uuid, payload: &[u8]) -> Result<String, SinkError>;

    /// Retrieve a previously stored payload.
    async fn fetch(&self, id: Uuid) -> Result<Option<Vec<u8>>, SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("storage operation failed: {0}")]
    Storage(#[from] S3Error),

    #[error("result for job already stored with different content")]
    ContentMismatch,

    #[error("storage configuration error: {0}")]
    Config(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Storage(_))
    }
}

/// Result sink backed by S3-compatible object storage. Each report is
/// written under a deterministic key with a SHA-256 content marker object
/// beside it; the marker is written last and arbitrates duplicate stores.
pub struct ObjectResultSink {
    bucket: Box<Bucket>,
}

impl ObjectResultSink {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, SinkError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| SinkError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| SinkError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    async fn get_optional(&self, key: &str) -> Result<Option<Vec<u8>>, SinkError> {
        match self.bucket.get_object(key).await {
            Ok(response) => Ok(Some(response.to_vec())),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(SinkError::Storage(e)),
        }
    }
}

pub fn report_key(id: Uuid) -> String {
    format!("scans/scan_{id}.json")
}

fn marker_key(id: Uuid) -> String {
    format!("scans/scan_{id}.sha256")
}

pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[async_trait]
impl ResultSink for ObjectResultSink {
    async fn store(&self, id: Uuid, payload: &[u8]) -> Result<String, SinkError> {
        let key = report_key(id);
        let digest = payload_digest(payload);

        if let Some(existing) = self.get_optional(&marker_key(id)).await? {
            if existing == digest.as_bytes() {
                // Duplicate completion signal; the artifact is already final.
                return Ok(key);
            }
            return Err(SinkError::ContentMismatch);
        }

        self.bucket
            .put_object_with_content_type(&key, payload, "application/json")
            .await?;

        self.bucket
            .put_object_with_content_type(&marker_key(id), digest.as_bytes(), "text/plain")
            .await?;

        Ok(key)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Vec<u8>>, SinkError> {
        self.get_optional(&report_key(id)).await
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryResultSink;
    use super::*;

    #[tokio::test]
    async fn duplicate_store_with_same_payload_is_a_noop() {
        let sink = MemoryResultSink::default();
        let id = Uuid::new_v4();
        let payload = br#"{"site":"https://example.com"}"#;

        let key_first = sink.store(id, payload).await.unwrap();
        let key_second = sink.store(id, payload).await.unwrap();

        assert_eq!(key_first, key_second);
        assert_eq!(
            sink.store_calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
        assert_eq!(sink.artifact_count(), 1);
        assert_eq!(sink.fetch(id).await.unwrap().unwrap(), payload.to_vec());
    }

    #[tokio::test]
    async fn store_with_different_payload_is_rejected() {
        let sink = MemoryResultSink::default();
        let id = Uuid::new_v4();

        sink.store(id, b"first").await.unwrap();
        let err = sink.store(id, b"second").await.unwrap_err();

        assert!(matches!(err, SinkError::ContentMismatch));
        assert_eq!(sink.fetch(id).await.unwrap().unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn fetch_of_unknown_id_is_none() {
        let sink = MemoryResultSink::default();
        assert!(sink.fetch(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[test]
    fn digest_is_stable_hex() {
        let digest = payload_digest(b"abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
