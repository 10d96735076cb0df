// ABOUTME: S3 collaborators for the photos and resized-variant buckets
// ABOUTME: Existence checks, original fetches, and cache writes with metadata

use anyhow::{anyhow, Result};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::warn;

use crate::CACHE_FOR_A_YEAR;

/// Check whether a resized variant already exists. `Ok(false)` means the
/// store confirmed absence; any other head failure is returned for the
/// caller to decide on.
pub async fn variant_exists(client: &Client, bucket: &str, key: &str) -> Result<bool> {
    match client.head_object().bucket(bucket).key(key).send().await {
        Ok(_) => Ok(true),
        Err(err) => match err.into_service_error() {
            e if e.is_not_found() => Ok(false),
            e => Err(anyhow!("existence check for {}/{} failed: {}", bucket, key, e)),
        },
    }
}

/// Fetch the original image bytes. `Ok(None)` only when the store confirms
/// the key does not exist; transport, permission, and throttling failures
/// are errors, not absence.
pub async fn fetch_original(client: &Client, bucket: &str, key: &str) -> Result<Option<Bytes>> {
    let object = match client.get_object().bucket(bucket).key(key).send().await {
        Ok(object) => object,
        Err(err) => match err.into_service_error() {
            e if e.is_no_such_key() => return Ok(None),
            e => return Err(anyhow!("fetching {}/{} failed: {}", bucket, key, e)),
        },
    };

    let body = object
        .body
        .collect()
        .await
        .map_err(|e| anyhow!("reading body of {}/{} failed: {}", bucket, key, e))?;
    Ok(Some(body.into_bytes()))
}

/// Store a resized variant with its one-year cache directive and the
/// `original` provenance metadata line. Retried once: a missed write only
/// costs a redundant future transcode, never corruption. The write has no
/// create-if-absent precondition; concurrent writers last-write-win.
pub async fn store_variant(
    client: &Client,
    bucket: &str,
    key: &str,
    body: Bytes,
    original: &str,
) -> Result<()> {
    match put_variant(client, bucket, key, body.clone(), original).await {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!("Storing {} failed, retrying once: {:#}", key, first);
            put_variant(client, bucket, key, body, original).await
        }
    }
}

async fn put_variant(
    client: &Client,
    bucket: &str,
    key: &str,
    body: Bytes,
    original: &str,
) -> Result<()> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type("image/webp")
        .cache_control(CACHE_FOR_A_YEAR)
        .metadata("original", original)
        .send()
        .await
        .map_err(|e| {
            anyhow!("storing {}/{} failed: {}", bucket, key, DisplayErrorContext(&e))
        })?;
    Ok(())
}
