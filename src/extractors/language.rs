//! Accept-Language negotiation: a per-version middleware and the `CurrentLanguage` extractor.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::sync::Arc;

/// Language picked for the request, stored in request extensions by [`negotiate_language`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentLanguage(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentLanguage
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CurrentLanguage>()
            .cloned()
            .unwrap_or_else(|| CurrentLanguage(String::new())))
    }
}

/// Languages a version serves and the one used when nothing matches.
#[derive(Clone, Debug)]
pub struct LanguageSettings {
    pub supported: Vec<String>,
    pub default: String,
}

/// Best supported language for an `Accept-Language` value. Exact tags win over a primary
/// subtag match (`en-US` falls back to `en`); `q=0` entries are refused.
pub fn negotiate(accept: Option<&str>, settings: &LanguageSettings) -> String {
    let Some(accept) = accept else {
        return settings.default.clone();
    };
    let mut ranges: Vec<(String, f32)> = accept
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let tag = parts.next()?.trim().to_lowercase();
            if tag.is_empty() {
                return None;
            }
            let q = parts
                .find_map(|p| p.trim().strip_prefix("q=").map(|v| v.trim().parse::<f32>().unwrap_or(0.0)))
                .unwrap_or(1.0);
            Some((tag, q))
        })
        .filter(|(_, q)| *q > 0.0)
        .collect();
    ranges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    for (tag, _) in &ranges {
        if tag == "*" {
            return settings.default.clone();
        }
        if let Some(found) = settings.supported.iter().find(|s| s.to_lowercase() == *tag) {
            return found.clone();
        }
        let primary = tag.split('-').next().unwrap_or(tag);
        if let Some(found) = settings
            .supported
            .iter()
            .find(|s| s.to_lowercase().split('-').next() == Some(primary))
        {
            return found.clone();
        }
    }
    settings.default.clone()
}

/// Middleware: store the negotiated [`CurrentLanguage`] and echo it as `Content-Language`.
pub async fn negotiate_language(settings: Arc<LanguageSettings>, mut req: Request, next: Next) -> Response {
    let accept = req
        .headers()
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());
    let language = negotiate(accept, &settings);
    req.extensions_mut().insert(CurrentLanguage(language.clone()));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&language) {
        response.headers_mut().insert(header::CONTENT_LANGUAGE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LanguageSettings {
        LanguageSettings {
            supported: vec!["en".into(), "fr".into(), "pt-BR".into()],
            default: "en".into(),
        }
    }

    #[test]
    fn highest_quality_supported_tag_wins() {
        assert_eq!(negotiate(Some("de;q=0.9, fr;q=0.8, en;q=0.5"), &settings()), "fr");
        assert_eq!(negotiate(Some("pt-br"), &settings()), "pt-BR");
        assert_eq!(negotiate(Some("fr-CA"), &settings()), "fr");
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(negotiate(None, &settings()), "en");
        assert_eq!(negotiate(Some("de"), &settings()), "en");
        assert_eq!(negotiate(Some("fr;q=0"), &settings()), "en");
    }
}
