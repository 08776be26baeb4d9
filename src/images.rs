//! ==============================================================================
//! images.rs - camera image resolver
//! ==============================================================================
//!
//! purpose:
//!     turns the opaque storage keys of the latest record into temporary
//!     GetObject urls the browser can load directly.
//!
//! behaviour:
//!     - all keys are signed concurrently, the caller waits for the whole batch
//!     - a key that fails to sign is dropped, the rest keep their order
//!     - nothing is cached across refreshes, every poll signs from scratch
//!
//! credentials:
//!     - identity pool configured: guest credentials from cognito identity,
//!       reused until shortly before they expire
//!     - otherwise: the default aws credential chain (env, profile, imds, ...)
//!
//! relationships:
//!     - used by: poller.rs (after every successful fetch)
//!     - uses: aws-sdk-s3 presigning, aws-sdk-cognitoidentity
//!
//! ==============================================================================

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::domain::{now_ms, ResolvedImage};

/// how long before expiry cached guest credentials are replaced
const CREDENTIAL_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SignError {
    #[error("no storage credentials available")]
    NoCredentials,

    #[error("could not obtain storage credentials: {0}")]
    Credentials(String),

    #[error("could not presign object: {0}")]
    Presign(String),
}

pub trait UrlSigner: Send + Sync + 'static {
    fn presign(&self, key: &str) -> impl Future<Output = Result<ResolvedImage, SignError>> + Send;
}

/// sign every key concurrently; failed keys are left out, order is kept
pub async fn resolve_all<S: UrlSigner>(signer: &S, keys: &[String]) -> Vec<ResolvedImage> {
    let pending: Vec<_> = keys.iter().map(|key| signer.presign(key)).collect();
    let results = join_all(pending).await;

    keys.iter()
        .zip(results)
        .filter_map(|(key, result)| match result {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "dropping image that could not be signed");
                None
            }
        })
        .collect()
}

// ==============================================================================
// s3 presigner
// ==============================================================================

struct GuestSession {
    s3: aws_sdk_s3::Client,
    expires_at: Option<SystemTime>,
}

impl GuestSession {
    fn is_fresh(&self) -> bool {
        credentials_fresh(self.expires_at, SystemTime::now())
    }
}

fn credentials_fresh(expires_at: Option<SystemTime>, now: SystemTime) -> bool {
    match expires_at {
        Some(at) => now + CREDENTIAL_REFRESH_MARGIN < at,
        None => true,
    }
}

enum CredentialSource {
    DefaultChain(aws_sdk_s3::Client),
    IdentityPool {
        cognito: aws_sdk_cognitoidentity::Client,
        pool_id: String,
        identity_id: Mutex<Option<String>>,
        session: Mutex<Option<GuestSession>>,
    },
}

pub struct S3Presigner {
    bucket: String,
    region: String,
    expiry: Duration,
    source: CredentialSource,
}

impl S3Presigner {
    pub async fn connect(region: &str, storage: &StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let source = match &storage.identity_pool_id {
            Some(pool_id) => CredentialSource::IdentityPool {
                cognito: aws_sdk_cognitoidentity::Client::new(&sdk_config),
                pool_id: pool_id.clone(),
                identity_id: Mutex::new(None),
                session: Mutex::new(None),
            },
            None => CredentialSource::DefaultChain(aws_sdk_s3::Client::new(&sdk_config)),
        };

        Self {
            bucket: storage.bucket.clone(),
            region: region.to_string(),
            expiry: Duration::from_secs(storage.url_expiry_seconds),
            source,
        }
    }

    async fn client(&self) -> Result<aws_sdk_s3::Client, SignError> {
        match &self.source {
            CredentialSource::DefaultChain(s3) => Ok(s3.clone()),
            CredentialSource::IdentityPool {
                cognito,
                pool_id,
                identity_id,
                session,
            } => {
                let mut session = session.lock().await;
                if let Some(current) = session.as_ref().filter(|s| s.is_fresh()) {
                    return Ok(current.s3.clone());
                }

                let fresh = self.guest_session(cognito, pool_id, identity_id).await?;
                let s3 = fresh.s3.clone();
                *session = Some(fresh);
                Ok(s3)
            }
        }
    }

    async fn guest_session(
        &self,
        cognito: &aws_sdk_cognitoidentity::Client,
        pool_id: &str,
        identity_id: &Mutex<Option<String>>,
    ) -> Result<GuestSession, SignError> {
        let mut identity_id = identity_id.lock().await;
        let id = match identity_id.as_ref() {
            Some(id) => id.clone(),
            None => {
                let out = cognito
                    .get_id()
                    .identity_pool_id(pool_id)
                    .send()
                    .await
                    .map_err(|e| SignError::Credentials(e.to_string()))?;
                let id = out.identity_id().ok_or(SignError::NoCredentials)?.to_string();
                *identity_id = Some(id.clone());
                id
            }
        };

        let out = cognito
            .get_credentials_for_identity()
            .identity_id(&id)
            .send()
            .await
            .map_err(|e| SignError::Credentials(e.to_string()))?;
        let creds = out.credentials().ok_or(SignError::NoCredentials)?;
        let (Some(access_key), Some(secret_key)) = (creds.access_key_id(), creds.secret_key()) else {
            return Err(SignError::NoCredentials);
        };

        let expires_at = creds
            .expiration()
            .and_then(|t| u64::try_from(t.secs()).ok())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));

        let credentials = Credentials::new(
            access_key,
            secret_key,
            creds.session_token().map(str::to_string),
            expires_at,
            "cognito-identity",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .build();

        tracing::debug!(identity = %id, "obtained guest storage credentials");
        Ok(GuestSession {
            s3: aws_sdk_s3::Client::from_conf(config),
            expires_at,
        })
    }
}

impl UrlSigner for S3Presigner {
    async fn presign(&self, key: &str) -> Result<ResolvedImage, SignError> {
        let s3 = self.client().await?;
        let presigning =
            PresigningConfig::expires_in(self.expiry).map_err(|e| SignError::Presign(e.to_string()))?;

        let request = s3
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| SignError::Presign(e.to_string()))?;

        Ok(ResolvedImage {
            key: key.to_string(),
            url: request.uri().to_string(),
            expires_at_ms: now_ms() + self.expiry.as_millis() as u64,
        })
    }
}
