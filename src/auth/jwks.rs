//! JWKS document fetch and key lookup.

use http_body_util::{BodyExt, Empty};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;

use crate::prelude::*;

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
	kid: String,
	#[serde(default)]
	n: Option<String>,
	#[serde(default)]
	e: Option<String>,
	#[serde(default)]
	x: Option<String>,
	#[serde(default)]
	y: Option<String>,
	kty: String,
	#[serde(default)]
	crv: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwksDocument {
	keys: Vec<Jwk>,
}

#[derive(Debug, Clone)]
pub struct Jwks {
	doc: JwksDocument,
}

impl Jwks {
	pub fn decoding_key(&self, kid: &str) -> Result<Option<DecodingKey>> {
		let Some(jwk) = self.doc.keys.iter().find(|k| k.kid == kid) else {
			return Ok(None);
		};

		let key = match jwk.kty.as_str() {
			"RSA" => {
				let n = jwk.n.as_deref().ok_or_else(|| Error::Unauthenticated)?;
				let e = jwk.e.as_deref().ok_or_else(|| Error::Unauthenticated)?;
				DecodingKey::from_rsa_components(n, e).map_err(Error::from)?
			}
			"OKP" => {
				let x = jwk.x.as_deref().ok_or_else(|| Error::Unauthenticated)?;
				DecodingKey::from_ed_components(x).map_err(Error::from)?
			}
			"EC" => {
				let x = jwk.x.as_deref().ok_or_else(|| Error::Unauthenticated)?;
				let y = jwk.y.as_deref().ok_or_else(|| Error::Unauthenticated)?;
				DecodingKey::from_ec_components(x, y).map_err(Error::from)?
			}
			other => {
				warn!("unsupported JWKS key type: {}", other);
				return Ok(None);
			}
		};
		Ok(Some(key))
	}
}

pub(super) async fn fetch(
	http: &Client<HttpsConnector<HttpConnector>, Empty<hyper::body::Bytes>>,
	url: &str,
) -> Result<Jwks> {
	let uri: hyper::Uri = url.parse().map_err(|_| Error::Internal("invalid AUTH_JWKS_URL".into()))?;
	let req = hyper::Request::builder()
		.method("GET")
		.uri(uri)
		.body(Empty::<hyper::body::Bytes>::new())
		.map_err(|_| Error::Internal("failed to build JWKS request".into()))?;

	let resp = http.request(req).await?;
	if !resp.status().is_success() {
		return Err(Error::Transient(format!("JWKS endpoint returned {}", resp.status())));
	}
	let body = resp.into_body().collect().await.map_err(|e| {
		warn!("failed reading JWKS body: {}", e);
		Error::Transient("jwks body".into())
	})?;
	let doc: JwksDocument = serde_json::from_slice(&body.to_bytes())?;
	Ok(Jwks { doc })
}

// vim: ts=4
