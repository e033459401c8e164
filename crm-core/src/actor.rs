use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Header carrying the acting user's login, set by the gateway in front of
/// this service.
pub const ACTOR_HEADER: &str = "x-actor";

/// Recorded when a request carries no usable actor header.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Identifier of the user performing a mutation, stored with audit entries.
///
/// Authentication happens upstream; this extractor only reads what the
/// gateway forwarded and never rejects a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Actor(v.chars().take(100).collect()),
            _ => Actor(ANONYMOUS_ACTOR.to_string()),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok());
        Ok(Actor::from_header(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Actor {
        let (mut parts, _) = request.into_parts();
        Actor::from_request_parts(&mut parts, &())
            .await
            .expect("infallible")
    }

    #[tokio::test]
    async fn test_reads_actor_header() {
        let request = Request::builder()
            .header(ACTOR_HEADER, " anna.kowalska ")
            .body(())
            .expect("request");
        assert_eq!(extract(request).await.as_str(), "anna.kowalska");
    }

    #[tokio::test]
    async fn test_missing_or_blank_header_is_anonymous() {
        let missing = Request::builder().body(()).expect("request");
        assert_eq!(extract(missing).await.as_str(), ANONYMOUS_ACTOR);

        let blank = Request::builder()
            .header(ACTOR_HEADER, "   ")
            .body(())
            .expect("request");
        assert_eq!(extract(blank).await.as_str(), ANONYMOUS_ACTOR);
    }

    #[test]
    fn test_long_actor_is_truncated_to_column_width() {
        let long = "x".repeat(250);
        assert_eq!(Actor::from_header(Some(&long)).as_str().len(), 100);
    }
}
