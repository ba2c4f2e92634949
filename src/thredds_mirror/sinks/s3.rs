use std::env;
use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use tracing::debug;

use crate::sinks::Sink;
use crate::util::errors::MirrorResult;

/// Object-store sink backed by the S3 API. Publishing streams the
/// temporary file through the library's multi-part upload; the temp file
/// itself is left in place for the caller to clean up.
pub struct S3Sink {
    region: Region,
    credentials: Credentials,
}

impl S3Sink {
    /// Credentials and region come from the usual AWS environment
    /// (`AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`/`AWS_REGION`), with
    /// `S3_ENDPOINT` selecting a custom endpoint for non-AWS stores.
    pub fn from_env() -> MirrorResult<S3Sink> {
        let credentials =
            Credentials::default().context("failed to resolve S3 credentials")?;
        let region_name =
            env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let region = match env::var("S3_ENDPOINT") {
            Ok(endpoint) => Region::Custom {
                region: region_name,
                endpoint,
            },
            Err(_) => region_name
                .parse()
                .with_context(|| format!("invalid AWS region `{}`", region_name))?,
        };
        Ok(S3Sink {
            region,
            credentials,
        })
    }

    fn bucket_and_key<'a>(&self, dest_uri: &'a str) -> MirrorResult<(Bucket, &'a str)> {
        let (bucket_name, key) = split_s3_uri(dest_uri)?;
        let bucket = Bucket::new(
            bucket_name,
            self.region.clone(),
            self.credentials.clone(),
        )
        .with_context(|| format!("failed to open bucket `{}`", bucket_name))?;
        Ok((bucket, key))
    }
}

/// Splits `s3://bucket/key...` into its bucket and key parts.
pub fn split_s3_uri(dest_uri: &str) -> MirrorResult<(&str, &str)> {
    let rest = match dest_uri.strip_prefix("s3://") {
        Some(rest) => rest,
        None => bail!("expected an s3:// destination, got `{}`", dest_uri),
    };
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => bail!("destination `{}` is missing a bucket or key", dest_uri),
    }
}

impl Sink for S3Sink {
    fn publish(&self, temp: &Path, dest_uri: &str) -> MirrorResult<()> {
        let (bucket, key) = self.bucket_and_key(dest_uri)?;
        let mut reader = File::open(temp)
            .with_context(|| format!("failed to open `{}`", temp.display()))?;
        bucket
            .put_object_stream(&mut reader, key)
            .with_context(|| format!("failed to upload to `{}`", dest_uri))?;
        debug!("uploaded {} to {}", temp.display(), dest_uri);
        Ok(())
    }

    fn exists(&self, dest_uri: &str) -> MirrorResult<bool> {
        let (bucket, key) = self.bucket_and_key(dest_uri)?;
        let (_, code) = bucket
            .head_object(key)
            .with_context(|| format!("failed to probe `{}`", dest_uri))?;
        match u32::from(code) {
            code if (200..300).contains(&code) => Ok(true),
            404 => Ok(false),
            code => bail!("unexpected status {} probing `{}`", code, dest_uri),
        }
    }

    fn remove(&self, dest_uri: &str) -> MirrorResult<()> {
        let (bucket, key) = self.bucket_and_key(dest_uri)?;
        bucket
            .delete_object(key)
            .with_context(|| format!("failed to delete `{}`", dest_uri))?;
        Ok(())
    }
}
