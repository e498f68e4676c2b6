//! Login template for functional-account registrations.
//!
//! A template is literal text with `{{identifier}}` placeholders, e.g.
//! `{{fa_email_address}}||{{entry_uuid}}`. Parsing is strict and happens
//! when the configuration is loaded, so a malformed template never reaches
//! a remote call.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::event::Attributes;

/// Entry identifier of the functional account.
pub const FA_ENTRY_UUID: &str = "fa_entry_uuid";
/// Email address of the functional account.
pub const FA_EMAIL_ADDRESS: &str = "fa_email_address";
/// Entry identifier of the owning user.
pub const ENTRY_UUID: &str = "entry_uuid";
/// Directory path of the owning user.
pub const DN: &str = "dn";

/// Default registration login.
pub const DEFAULT_TEMPLATE: &str = "{{fa_email_address}}||{{entry_uuid}}";

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+$").expect("IDENTIFIER_RE is a valid regex pattern")
});

/// Template errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("empty placeholder at position {position}")]
    EmptyPlaceholder { position: usize },

    #[error("invalid placeholder '{identifier}' at position {position}")]
    InvalidIdentifier { identifier: String, position: usize },

    #[error("stray '{brace}' at position {position}")]
    StrayBrace { brace: char, position: usize },

    #[error("unterminated placeholder at position {position}")]
    Unterminated { position: usize },

    #[error("template '{template}' contains no placeholder")]
    NoPlaceholder { template: String },

    #[error("no value for placeholder '{identifier}'")]
    MissingValue { identifier: String },
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed login template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl Default for LoginTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            segments: vec![
                Segment::Placeholder(FA_EMAIL_ADDRESS.to_string()),
                Segment::Literal("||".to_string()),
                Segment::Placeholder(ENTRY_UUID.to_string()),
            ],
        }
    }
}

impl LoginTemplate {
    /// Parse a template.
    pub fn parse(text: &str) -> TemplateResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut pos = 0;

        while pos < text.len() {
            let rest = &text[pos..];
            if rest.starts_with("{{") {
                let Some(end) = rest[2..].find("}}") else {
                    return Err(TemplateError::Unterminated { position: pos });
                };
                let identifier = &rest[2..2 + end];
                if identifier.is_empty() {
                    return Err(TemplateError::EmptyPlaceholder { position: pos });
                }
                if !IDENTIFIER_RE.is_match(identifier) {
                    return Err(TemplateError::InvalidIdentifier {
                        identifier: identifier.to_string(),
                        position: pos,
                    });
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(identifier.to_string()));
                pos += end + 4;
                continue;
            }

            let Some(c) = rest.chars().next() else { break };
            if c == '{' || c == '}' {
                return Err(TemplateError::StrayBrace {
                    brace: c,
                    position: pos,
                });
            }
            literal.push(c);
            pos += c.len_utf8();
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if !segments.iter().any(|s| matches!(s, Segment::Placeholder(_))) {
            return Err(TemplateError::NoPlaceholder {
                template: text.to_string(),
            });
        }

        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    /// The parsed segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder identifiers in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The template text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitute every placeholder.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> TemplateResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = ctx
                        .resolve(name)
                        .ok_or_else(|| TemplateError::MissingValue {
                            identifier: name.clone(),
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for LoginTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Values available to a template for one (account, user) registration.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub account_entry_uuid: Option<&'a str>,
    pub account_email: Option<&'a str>,
    pub user_dn: &'a str,
    pub user: &'a Attributes,
}

/// Directory attribute holding an entry's durable identifier.
pub const ENTRY_UUID_ATTRIBUTE: &str = "entryUUID";

impl<'a> TemplateContext<'a> {
    fn resolve(&self, identifier: &str) -> Option<&'a str> {
        let value = match identifier {
            FA_ENTRY_UUID => self.account_entry_uuid,
            FA_EMAIL_ADDRESS => self.account_email,
            ENTRY_UUID => self.user.get_str(ENTRY_UUID_ATTRIBUTE),
            DN => Some(self.user_dn),
            other => self.user.get_str(other),
        };
        value.filter(|v| !v.is_empty())
    }
}
