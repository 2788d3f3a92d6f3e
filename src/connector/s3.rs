//! Object-store connector (S3). A bucket plays the role of a database and
//! its keys the role of tables; querying a key downloads and parses the
//! file as CSV.

use crate::config::ConnectionConfig;
use crate::error::DbrelayError;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use secrecy::ExposeSecret;
use std::fmt;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct S3Handle {
    client: aws_sdk_s3::Client,
    pub bucket: String,
}

impl fmt::Debug for S3Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Handle")
            .field("bucket", &self.bucket)
            .finish()
    }
}

fn connection_error(e: impl fmt::Display) -> DbrelayError {
    DbrelayError::Connection {
        message: e.to_string(),
    }
}

pub fn build(config: &ConnectionConfig) -> Result<S3Handle, DbrelayError> {
    let access_key_id = config
        .access_key_id
        .as_deref()
        .ok_or_else(|| DbrelayError::Config {
            message: "no accessKeyId supplied for s3".to_string(),
        })?;
    let secret_access_key =
        config
            .secret_access_key
            .as_ref()
            .ok_or_else(|| DbrelayError::Config {
                message: "no secretAccessKey supplied for s3".to_string(),
            })?;
    let bucket = config.bucket.as_deref().ok_or_else(|| DbrelayError::Config {
        message: "no bucket supplied for s3".to_string(),
    })?;

    let credentials = Credentials::new(
        access_key_id,
        secret_access_key.expose_secret(),
        None,
        None,
        "dbrelay",
    );
    let sdk_config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(DEFAULT_REGION.to_string()))
        .credentials_provider(credentials)
        .build();

    Ok(S3Handle {
        client: aws_sdk_s3::Client::from_conf(sdk_config),
        bucket: bucket.to_string(),
    })
}

/// Validate the credentials and bucket by listing a single object.
pub async fn probe(handle: &S3Handle) -> Result<(), DbrelayError> {
    handle
        .client
        .list_objects_v2()
        .bucket(&handle.bucket)
        .max_keys(1)
        .send()
        .await
        .map_err(connection_error)?;
    Ok(())
}

/// List the keys of every object in the bucket.
pub async fn list_files(handle: &S3Handle) -> Result<Vec<String>, DbrelayError> {
    let response = handle
        .client
        .list_objects_v2()
        .bucket(&handle.bucket)
        .send()
        .await
        .map_err(connection_error)?;

    Ok(response
        .contents()
        .iter()
        .filter_map(|object| object.key().map(str::to_string))
        .collect())
}

/// Download one object as text.
pub async fn fetch_key(handle: &S3Handle, key: &str) -> Result<String, DbrelayError> {
    let response = handle
        .client
        .get_object()
        .bucket(&handle.bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| DbrelayError::Query {
            message: e.to_string(),
        })?;

    let bytes = response
        .body
        .collect()
        .await
        .map_err(|e| DbrelayError::Query {
            message: e.to_string(),
        })?
        .into_bytes();

    String::from_utf8(bytes.to_vec()).map_err(|e| DbrelayError::Query {
        message: format!("object {} is not valid utf-8: {}", key, e),
    })
}
