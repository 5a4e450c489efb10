//! Purpose: Normalize relay options into an immutable configuration.
//! Exports: `Options`, `Config`, `RoutePattern`, defaults.
//! Role: Single source of the method/credentials/route/concurrency shared by every node.
//! Invariants: `Options::normalize` is pure; repeated calls yield equal configs.
//! Invariants: Two nodes interoperate only when method, route and credentials match.
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::error::{Error, ErrorKind};

pub const DEFAULT_METHOD: &str = "PUT";
pub const DEFAULT_USERNAME: &str = "omega";
pub const DEFAULT_PASSWORD: &str = "supreme";
pub const DEFAULT_ROUTE: &str = "/primus/omega/supreme";
pub const DEFAULT_CONCURRENTLY: usize = 20;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Options {
    pub method: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub concurrently: Option<usize>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    method: String,
    username: String,
    password: String,
    route: RoutePattern,
    concurrently: usize,
    authorization: String,
}

impl Options {
    pub fn normalize(&self) -> Result<Config, Error> {
        let method = self
            .method
            .as_deref()
            .unwrap_or(DEFAULT_METHOD)
            .to_ascii_uppercase();
        if method.is_empty() || !method.bytes().all(is_token_byte) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid HTTP method: {method:?}")));
        }

        let concurrently = self.concurrently.unwrap_or(DEFAULT_CONCURRENTLY);
        if concurrently == 0 {
            return Err(
                Error::new(ErrorKind::Usage).with_message("concurrently must be greater than zero")
            );
        }

        let username = self
            .username
            .clone()
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string());
        let password = self
            .password
            .clone()
            .unwrap_or_else(|| DEFAULT_PASSWORD.to_string());
        let route = RoutePattern::parse(self.url.as_deref().unwrap_or(DEFAULT_ROUTE))?;
        let authorization = format!("Basic {}", STANDARD.encode(format!("{username}:{password}")));

        Ok(Config {
            method,
            username,
            password,
            route,
            concurrently,
            authorization,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        // Defaults are statically valid.
        match Options::default().normalize() {
            Ok(config) => config,
            Err(err) => unreachable!("default relay options must normalize: {err}"),
        }
    }
}

impl Config {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn route(&self) -> &RoutePattern {
        &self.route
    }

    pub fn concurrently(&self) -> usize {
        self.concurrently
    }

    /// Exact `Authorization` header value both sides compare against.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }
}

/// Path pattern: literal segments, `:name` placeholders and an optional trailing `*`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Param,
    Rest,
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if !raw.starts_with('/') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("route must start with '/': {raw:?}")));
        }
        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if index + 1 != parts.len() {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("route wildcard must be the last segment"));
                }
                Segment::Rest
            } else if part.len() > 1 && part.starts_with(':') {
                Segment::Param
            } else {
                Segment::Literal((*part).to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Test a request path; any query string is ignored.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut parts = split_path(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Param => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(literal) => {
                    if parts.next() != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}
