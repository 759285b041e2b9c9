use harrow_core::error::AppError;
use harrow_core::request::{HttpMethod, SignedRequest};
use harrow_core::traits::Signer;

/// Signer for platforms that authenticate with a session cookie alone.
///
/// Params pass through untouched; the account credential becomes the
/// `Cookie` header, followed by any static headers configured up front.
/// Platforms with real request signing plug in their own [`Signer`].
#[derive(Debug, Clone, Default)]
pub struct CookieSigner {
    headers: Vec<(String, String)>,
}

impl CookieSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a header to every signed request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Signer for CookieSigner {
    async fn sign(
        &self,
        uri: &str,
        params: &[(String, String)],
        _method: HttpMethod,
        cookies: &str,
    ) -> Result<SignedRequest, AppError> {
        if cookies.trim().is_empty() {
            return Err(AppError::Signing(format!("empty credential for {uri}")));
        }

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        headers.push(("Cookie".to_string(), cookies.to_string()));
        headers.extend(self.headers.iter().cloned());

        Ok(SignedRequest {
            params: params.to_vec(),
            headers,
        })
    }
}
