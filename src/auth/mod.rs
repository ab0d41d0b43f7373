//! Auth Verifier: validates bearer tokens against a remote JWKS, with a
//! single-flight cache refresh so per-request verification never blocks on
//! network I/O after the first successful fetch.

mod jwks;

use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::Empty;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::AuthConfig;
use crate::prelude::*;
use crate::types::UserId;

pub use jwks::Jwks;

/// Verified identity claims extracted from a bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
	/// Subject: the external, stable identifier of the user.
	pub sub: String,
	#[serde(default)]
	pub email: Option<String>,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub picture: Option<String>,
}

impl Claims {
	pub fn user_id(&self) -> UserId {
		UserId(self.sub.clone())
	}
}

const DEV_SECRET_ENV: &str = "AUTH_DEV_SECRET";
const KEY_CACHE_TTL: Duration = Duration::from_secs(600);

struct KeyCache {
	jwks: Jwks,
	fetched_at: Instant,
}

/// Verifies bearer tokens either against a configured JWKS endpoint, or,
/// when none is configured, a shared development secret (HS256). The dev
/// path is loud about itself at startup and is not meant to run in
/// production — see `Config::from_env`.
pub struct Verifier {
	config: AuthConfig,
	http: Client<HttpsConnector<HttpConnector>, Empty<hyper::body::Bytes>>,
	cache: Mutex<Option<KeyCache>>,
	dev_secret: Option<String>,
}

impl Verifier {
	/// The JWKS endpoints this verifier fetches from are, in practice,
	/// always TLS — building the client over a plain `HttpConnector` would
	/// make every real identity provider unreachable. Grounded on
	/// `server/src/core/request.rs`'s own `HttpsConnectorBuilder` setup.
	pub fn new(config: AuthConfig) -> Result<Self> {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|_| Error::Internal("no native root CA certificates found".into()))?
			.https_only()
			.enable_http1()
			.build();
		let http = Client::builder(TokioExecutor::new()).build(connector);
		let dev_secret = std::env::var(DEV_SECRET_ENV).ok();
		Ok(Verifier { config, http, cache: Mutex::new(None), dev_secret })
	}

	pub async fn verify(&self, token: &str) -> Result<Claims> {
		let Some(jwks_url) = self.config.jwks_url.as_deref() else {
			return self.verify_dev(token);
		};

		let header = jsonwebtoken::decode_header(token)?;
		let kid = header.kid.as_deref().ok_or(Error::Unauthenticated)?;

		let key = self.resolve_key(jwks_url, kid).await?;
		let mut validation = Validation::new(header.alg);
		if let Some(iss) = &self.config.issuer {
			validation.set_issuer(&[iss]);
		}
		if let Some(aud) = &self.config.audience {
			validation.set_audience(&[aud]);
		}
		let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)?;
		Ok(data.claims)
	}

	fn verify_dev(&self, token: &str) -> Result<Claims> {
		let secret = self.dev_secret.as_deref().unwrap_or("development-only-insecure-secret");
		let key = DecodingKey::from_secret(secret.as_bytes());
		let mut validation = Validation::new(Algorithm::HS256);
		validation.validate_aud = false;
		let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)?;
		Ok(data.claims)
	}

	async fn resolve_key(&self, jwks_url: &str, kid: &str) -> Result<DecodingKey> {
		{
			let guard = self.cache.lock().await;
			if let Some(cache) = guard.as_ref() {
				if cache.fetched_at.elapsed() < KEY_CACHE_TTL {
					if let Some(key) = cache.jwks.decoding_key(kid)? {
						return Ok(key);
					}
				}
			}
		}

		// Single-flight: hold the lock across the refresh so concurrent
		// verifications for an unseen kid don't each issue their own fetch.
		let mut guard = self.cache.lock().await;
		if let Some(cache) = guard.as_ref() {
			if cache.fetched_at.elapsed() < KEY_CACHE_TTL {
				if let Some(key) = cache.jwks.decoding_key(kid)? {
					return Ok(key);
				}
			}
		}

		debug!("refreshing JWKS from {}", jwks_url);
		let jwks = jwks::fetch(&self.http, jwks_url).await?;
		let key = jwks.decoding_key(kid)?.ok_or(Error::Unauthenticated)?;
		*guard = Some(KeyCache { jwks, fetched_at: Instant::now() });
		Ok(key)
	}
}

pub type SharedVerifier = Arc<Verifier>;

// vim: ts=4
