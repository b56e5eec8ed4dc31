//! Slug normalization and schema namespace derivation.
//!
//! A tenant's namespace is a PostgreSQL schema name derived from its slug:
//! lower-cased, every character outside `[a-z0-9]` replaced by `_`, and
//! prefixed with [`NAMESPACE_PREFIX`] so it can never collide with `public`,
//! `pg_*` or `information_schema`.

use std::fmt;

/// Prefix applied to every tenant schema
pub const NAMESPACE_PREFIX: &str = "tenant_";

/// Separator substituted for every non-alphanumeric slug character
pub const NAMESPACE_SEPARATOR: char = '_';

pub const SLUG_MIN_LEN: usize = 3;

/// PostgreSQL identifiers are limited to 63 bytes; the prefix takes seven.
pub const SLUG_MAX_LEN: usize = 56;

// Slug validation regex
lazy_static::lazy_static! {
    pub(crate) static ref SLUG_REGEX: regex::Regex = regex::Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugError {
    Length(usize),
    Format(String),
}

impl fmt::Display for SlugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlugError::Length(len) => write!(
                f,
                "slug must be {}-{} characters, got {}",
                SLUG_MIN_LEN, SLUG_MAX_LEN, len
            ),
            SlugError::Format(slug) => write!(
                f,
                "slug '{}' must be lowercase alphanumeric with hyphens",
                slug
            ),
        }
    }
}

impl std::error::Error for SlugError {}

/// Trim and lower-case a slug, then validate it.
pub fn normalize_slug(raw: &str) -> Result<String, SlugError> {
    let slug = raw.trim().to_lowercase();
    let len = slug.chars().count();
    if !(SLUG_MIN_LEN..=SLUG_MAX_LEN).contains(&len) {
        return Err(SlugError::Length(len));
    }
    if !SLUG_REGEX.is_match(&slug) {
        return Err(SlugError::Format(slug));
    }
    Ok(slug)
}

/// Deterministic schema name for a slug.
pub fn namespace_for_slug(slug: &str) -> String {
    let mut namespace = String::with_capacity(NAMESPACE_PREFIX.len() + slug.len());
    namespace.push_str(NAMESPACE_PREFIX);
    namespace.extend(slug.chars().map(|c| {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            c
        } else {
            NAMESPACE_SEPARATOR
        }
    }));
    namespace
}

/// Whether `name` could have been produced by [`namespace_for_slug`].
///
/// Guards every place a namespace is interpolated into DDL.
pub fn is_valid_namespace(name: &str) -> bool {
    name.len() <= NAMESPACE_PREFIX.len() + SLUG_MAX_LEN
        && name
            .strip_prefix(NAMESPACE_PREFIX)
            .map(|rest| {
                !rest.is_empty()
                    && rest
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == NAMESPACE_SEPARATOR)
            })
            .unwrap_or(false)
}
