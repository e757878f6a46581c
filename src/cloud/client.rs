use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use rusoto_core::{HttpClient, Region};
use rusoto_credential::ProfileProvider;
use rusoto_s3::S3Client;

use crate::constants::DEFAULT_CUSTOM_REGION;

/// Resolve the region to talk to.
///
/// A custom endpoint (MinIO, Ceph and other S3-compatible stores) always
/// yields `Region::Custom`; otherwise an unparsable name falls back to the
/// default region resolution of rusoto (environment, then us-east-1).
pub fn resolve_region(region_name: Option<&str>, endpoint: Option<&str>) -> Region {
    if let Some(endpoint) = endpoint {
        return Region::Custom {
            name: region_name.unwrap_or(DEFAULT_CUSTOM_REGION).to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        };
    }

    match region_name {
        Some(name) => match name.parse::<Region>() {
            Ok(r) => r,
            Err(_) => {
                warn!("Invalid region '{}', using default", name);
                Region::default()
            }
        },
        None => Region::default(),
    }
}

/// Create an S3 client with the specified region, endpoint and profile.
///
/// Without a profile the standard rusoto credential chain is used
/// (environment, shared credentials file, container and instance roles).
pub fn create_s3_client(
    region_name: Option<&str>,
    endpoint: Option<&str>,
    profile: Option<&str>,
) -> Result<Arc<S3Client>> {
    let region = resolve_region(region_name, endpoint);
    debug!("Using S3 region {:?}", region);

    let s3_client = match profile {
        Some(profile_name) => {
            let mut provider = ProfileProvider::new()
                .context("Failed to create AWS profile provider")?;
            provider.set_profile(profile_name);

            let http_client = HttpClient::new().context("Failed to create HTTP client")?;
            debug!("Using AWS profile '{}'", profile_name);
            Arc::new(S3Client::new_with(http_client, provider, region))
        }
        None => Arc::new(S3Client::new(region)),
    };

    Ok(s3_client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_endpoint_region() {
        let region = resolve_region(None, Some("http://localhost:9000/"));
        assert_eq!(
            region,
            Region::Custom {
                name: DEFAULT_CUSTOM_REGION.to_string(),
                endpoint: "http://localhost:9000".to_string(),
            }
        );

        let region = resolve_region(Some("eu-west-1"), Some("https://s3.example.com"));
        match region {
            Region::Custom { name, .. } => assert_eq!(name, "eu-west-1"),
            other => panic!("expected custom region, got {:?}", other),
        }
    }

    #[test]
    fn test_named_region() {
        assert_eq!(resolve_region(Some("us-west-2"), None), Region::UsWest2);
    }
}
