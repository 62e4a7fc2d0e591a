use std::str::FromStr;
use std::time::Duration;

use rusoto_core::Region;
use rusoto_credential::AwsCredentials;
use rusoto_s3::util::{PreSignedRequest, PreSignedRequestOption};
use rusoto_s3::{GetObjectRequest, PutObjectRequest};

use crate::config::StorageConfig;
use crate::manifest::{HttpMethod, ManifestError};

/// Produces a time-limited URL granting one HTTP method on one object key
pub trait ObjectSigner: Send + Sync {
    fn presign(&self, key: &str, method: HttpMethod) -> String;
}

/// SigV4 presigned S3 URLs, signed locally without a network round trip
pub struct S3Signer {
    bucket: String,
    region: Region,
    credentials: AwsCredentials,
    expires_in: Duration,
}

impl S3Signer {
    pub fn new(config: &StorageConfig, credentials: AwsCredentials) -> Result<Self, ManifestError> {
        let region = Region::from_str(&config.region)
            .map_err(|e| ManifestError::Config(format!("region {:?}: {}", config.region, e)))?;
        if config.bucket.is_empty() {
            return Err(ManifestError::Config("bucket name is empty".to_string()));
        }
        Ok(S3Signer {
            bucket: config.bucket.clone(),
            region,
            credentials,
            expires_in: config.url_validity,
        })
    }
}

impl ObjectSigner for S3Signer {
    fn presign(&self, key: &str, method: HttpMethod) -> String {
        let option = PreSignedRequestOption { expires_in: self.expires_in };
        match method {
            HttpMethod::Get => {
                let request = GetObjectRequest {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    ..Default::default()
                };
                request.get_presigned_url(&self.region, &self.credentials, &option)
            }
            HttpMethod::Put => {
                let request = PutObjectRequest {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    ..Default::default()
                };
                request.get_presigned_url(&self.region, &self.credentials, &option)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn storage(region: &str) -> StorageConfig {
        StorageConfig {
            bucket: "kemia-test".to_string(),
            region: region.to_string(),
            root: "kemia".to_string(),
            url_validity: Duration::from_secs(3600),
        }
    }

    fn credentials() -> AwsCredentials {
        AwsCredentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", None, None)
    }

    #[test]
    fn test_presigned_put_url() {
        let signer = S3Signer::new(&storage("ca-central-1"), credentials()).unwrap();
        let url = Url::parse(&signer.presign("kemia/jobs/j1/result.json", HttpMethod::Put)).unwrap();
        assert!(url.path().ends_with("/kemia/jobs/j1/result.json"));
        let query = url.query().unwrap();
        assert!(query.contains("X-Amz-Expires=3600"));
        assert!(query.contains("X-Amz-Signature="));
        assert!(query.contains("AKIDEXAMPLE"));
    }

    #[test]
    fn test_get_and_put_signatures_differ() {
        let signer = S3Signer::new(&storage("ca-central-1"), credentials()).unwrap();
        let get = signer.presign("kemia/archive/j1.zip", HttpMethod::Get);
        let put = signer.presign("kemia/archive/j1.zip", HttpMethod::Put);
        assert_ne!(get, put);
    }

    #[test]
    fn test_bad_region_is_a_config_error() {
        let err = S3Signer::new(&storage("moon-base-1"), credentials()).err().unwrap();
        assert!(matches!(err, ManifestError::Config(_)));
    }
}
