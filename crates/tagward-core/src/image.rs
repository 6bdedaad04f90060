//! Container image reference parsing.
//!
//! Accepts the usual docker forms:
//!
//! ```text
//! nginx                          → index.docker.io/library/nginx:latest
//! karolis/webhook-demo:0.0.15    → index.docker.io/karolis/webhook-demo:0.0.15
//! quay.io/org/app:1.2.3          → quay.io/org/app:1.2.3
//! localhost:5000/app:dev@sha256:…
//! http://registry.local/app:1.0  (plain-http registry)
//! ```
//!
//! The **base image name** used to correlate observations across tags is
//! [`ImageRef::repository`], i.e. the reference with its tag stripped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag assumed when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image reference {reference:?}: {reason}")]
    Invalid { reference: String, reason: &'static str },
}

/// A parsed image reference.
///
/// Serialized as its string form so tracked images and events stay readable
/// when persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    scheme: Scheme,
    registry: String,
    name: String,
    tag: String,
    digest: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scheme {
    Http,
    Https,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let invalid = |reason| ImageError::Invalid {
            reference: reference.to_string(),
            reason,
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(ImageError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else {
            (Scheme::Https, trimmed)
        };

        let (rest, digest) = match rest.split_once('@') {
            Some((_, "")) => return Err(invalid("empty digest")),
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (rest, None),
        };

        // A ':' after the last '/' separates the tag; one before it is a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], &rest[split + 1..])
            }
            None => (rest, DEFAULT_TAG),
        };

        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if tag.len() > 128
            || !tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(invalid("illegal characters in tag"));
        }

        let (registry, name) = match path.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), remainder.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), path.to_string()),
        };

        if name.is_empty() {
            return Err(invalid("missing repository name"));
        }
        for component in name.split('/') {
            if component.is_empty() {
                return Err(invalid("empty path component"));
            }
            if !component.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')
            }) {
                return Err(invalid("repository must be lowercase alphanumeric"));
            }
        }

        let name = if registry == DEFAULT_REGISTRY && !name.contains('/') {
            format!("library/{name}")
        } else {
            name
        };

        Ok(Self {
            scheme,
            registry,
            name,
            tag: tag.to_string(),
            digest,
        })
    }

    /// Registry host, with port if one was given.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &'static str {
        match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Repository path without the registry (`library/nginx`).
    pub fn short_name(&self) -> &str {
        &self.name
    }

    /// Base image name: `registry/name`, no tag.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.registry, self.name)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// `registry/name:tag`.
    pub fn remote(&self) -> String {
        format!("{}:{}", self.repository(), self.tag)
    }

    /// The same repository pointed at another tag. Any digest is dropped.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            digest: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scheme == Scheme::Http {
            f.write_str("http://")?;
        }
        write!(f, "{}", self.remote())?;
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_docker_hub_defaults() {
        let img = ImageRef::parse("nginx").unwrap();
        assert_eq!(img.registry(), DEFAULT_REGISTRY);
        assert_eq!(img.short_name(), "library/nginx");
        assert_eq!(img.tag(), "latest");
        assert_eq!(img.repository(), "index.docker.io/library/nginx");
    }

    #[test]
    fn user_repository_with_tag() {
        let img = ImageRef::parse("karolis/webhook-demo:0.0.15").unwrap();
        assert_eq!(img.short_name(), "karolis/webhook-demo");
        assert_eq!(img.tag(), "0.0.15");
        assert_eq!(img.remote(), "index.docker.io/karolis/webhook-demo:0.0.15");
    }

    #[test]
    fn registry_with_port_is_not_a_tag() {
        let img = ImageRef::parse("localhost:5000/team/app").unwrap();
        assert_eq!(img.registry(), "localhost:5000");
        assert_eq!(img.short_name(), "team/app");
        assert_eq!(img.tag(), "latest");

        let img = ImageRef::parse("localhost:5000/team/app:1.2.3-dev").unwrap();
        assert_eq!(img.tag(), "1.2.3-dev");
    }

    #[test]
    fn digest_and_scheme_are_kept() {
        let img = ImageRef::parse("http://registry.local/app:1.0@sha256:abcd").unwrap();
        assert_eq!(img.scheme(), "http");
        assert_eq!(img.digest(), Some("sha256:abcd"));
        assert_eq!(img.to_string(), "http://registry.local/app:1.0@sha256:abcd");
    }

    #[test]
    fn tags_of_same_repository_share_base_name() {
        let a = ImageRef::parse("quay.io/org/app:1.0.0").unwrap();
        let b = ImageRef::parse("quay.io/org/app:1.1.0-prod").unwrap();
        assert_eq!(a.repository(), b.repository());
        assert_eq!(a.with_tag("1.1.0-prod"), b);
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(ImageRef::parse("  "), Err(ImageError::Empty));
        assert!(ImageRef::parse("nginx:").is_err());
        assert!(ImageRef::parse("Org/App:1.0").is_err());
        assert!(ImageRef::parse("quay.io//app").is_err());
        assert!(ImageRef::parse("nginx 1.0").is_err());
        assert!(ImageRef::parse("nginx@").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let img = ImageRef::parse("quay.io/org/app:2.0.0").unwrap();
        let json = serde_json::to_string(&img).unwrap();
        assert_eq!(json, "\"quay.io/org/app:2.0.0\"");
        let back: ImageRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, img);
    }
}
