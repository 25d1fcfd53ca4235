//! Doc-tag parsing
//!
//! Types, methods and properties may carry a raw doc blob with one tag per
//! line. Comment decoration (`///`, `/**`, leading `*`) is stripped, unknown
//! tags are ignored and malformed tags are skipped; parsing never fails.
//!
//! ```text
//! @singleton
//! @implementedBy [default|<name>] <Type>
//! @providedBy [default|<name>] <Type> [{json params}]
//! @inject
//! @var <Type>
//! @named <qualifier> [$param]
//! @before|@intercept|@after <AspectType> [k=v&k2=v2]
//! @allowedContext <name>
//! @generator ignore
//! ```

use crate::aspect::{AspectDescriptor, AspectPhase};
use crate::directive::{self, ProviderRef};
use crate::value::Args;
use std::collections::BTreeMap;

/// Qualifier that selects the unqualified binding in `@implementedBy` / `@providedBy`.
pub const DEFAULT_QUALIFIER: &str = "default";

/// Tags attached to a type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeTags {
    pub singleton: bool,
    pub implemented_by: Option<String>,
    pub named_implementations: BTreeMap<String, String>,
    pub provided_by: Option<ProviderRef>,
    pub named_providers: BTreeMap<String, ProviderRef>,
    /// `@generator ignore`: resolvable, but no source artifact is emitted
    pub generator_ignore: bool,
}

impl TypeTags {
    /// Merge `other` into `self`; later values win.
    pub fn merge(&mut self, other: TypeTags) {
        self.singleton |= other.singleton;
        self.generator_ignore |= other.generator_ignore;
        if other.implemented_by.is_some() {
            self.implemented_by = other.implemented_by;
        }
        if other.provided_by.is_some() {
            self.provided_by = other.provided_by;
        }
        self.named_implementations
            .extend(other.named_implementations);
        self.named_providers.extend(other.named_providers);
    }

    /// `@implementedBy` entry for a request (default when unqualified).
    pub fn implementation(&self, qualifier: Option<&str>) -> Option<&str> {
        match qualifier {
            None => self.implemented_by.as_deref(),
            Some(q) => self.named_implementations.get(q).map(String::as_str),
        }
    }

    /// `@providedBy` entry for a request (default when unqualified).
    pub fn provider(&self, qualifier: Option<&str>) -> Option<&ProviderRef> {
        match qualifier {
            None => self.provided_by.as_ref(),
            Some(q) => self.named_providers.get(q),
        }
    }
}

/// Tags attached to a method or constructor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberTags {
    pub injectable: bool,
    /// Aspect declarations in declaration order
    pub aspects: Vec<AspectDescriptor>,
    pub allowed_context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodTags {
    pub tags: MemberTags,
    /// `@named q $param` entries keyed by parameter name
    pub param_qualifiers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyTags {
    pub injectable: bool,
    pub declared_types: Vec<String>,
    pub qualifier: Option<String>,
}

/// Iterate `(tag, rest)` pairs of a doc blob.
fn tag_lines(doc: &str) -> impl Iterator<Item = (&str, &str)> {
    doc.lines().filter_map(|line| {
        let line = line
            .trim()
            .trim_start_matches(['/', '*', '!'])
            .trim_end_matches(['*', '/'])
            .trim();
        let body = line.strip_prefix('@')?;
        let (tag, rest) = match body.find(char::is_whitespace) {
            Some(at) => (&body[..at], body[at..].trim()),
            None => (body, ""),
        };
        (!tag.is_empty()).then_some((tag, rest))
    })
}

/// Parse the tags that apply to a type.
pub fn parse_type_tags(doc: &str) -> TypeTags {
    let mut tags = TypeTags::default();
    for (tag, rest) in tag_lines(doc) {
        match tag {
            "singleton" => tags.singleton = true,
            "implementedBy" => {
                let words: Vec<&str> = rest.split_whitespace().collect();
                // Anything after the type makes the tag malformed
                match words.as_slice() {
                    [ty] => tags.implemented_by = Some((*ty).to_string()),
                    [q, ty] if *q == DEFAULT_QUALIFIER => {
                        tags.implemented_by = Some((*ty).to_string())
                    }
                    [q, ty] => {
                        tags.named_implementations
                            .insert((*q).to_string(), (*ty).to_string());
                    }
                    _ => {}
                }
            }
            "providedBy" => {
                if let Some((qualifier, provider)) = parse_provided_by(rest) {
                    match qualifier {
                        None => tags.provided_by = Some(provider),
                        Some(q) => {
                            tags.named_providers.insert(q, provider);
                        }
                    }
                }
            }
            "generator" if rest.split_whitespace().next() == Some("ignore") => {
                tags.generator_ignore = true
            }
            _ => {}
        }
    }
    tags
}

// `[default|<name>] <Type> [{json}]`
fn parse_provided_by(rest: &str) -> Option<(Option<String>, ProviderRef)> {
    let (head, json) = match rest.find('{') {
        Some(at) => (&rest[..at], Some(&rest[at..])),
        None => (rest, None),
    };
    let words: Vec<&str> = head.split_whitespace().collect();
    let (qualifier, type_name) = match words.as_slice() {
        [ty] => (None, *ty),
        [q, ty] if *q == DEFAULT_QUALIFIER => (None, *ty),
        [q, ty] => (Some((*q).to_string()), *ty),
        _ => return None,
    };
    let params = match json.map(serde_json::from_str::<serde_json::Value>) {
        Some(Ok(serde_json::Value::Object(map))) => map
            .into_iter()
            .map(|(k, v)| (k, directive::argument_from_json(v)))
            .collect(),
        // Malformed params drop the whole tag
        Some(_) => return None,
        None => Args::new(),
    };
    Some((
        qualifier,
        ProviderRef {
            type_name: type_name.to_string(),
            params,
        },
    ))
}

/// Parse `k=v&k2=v2` aspect arguments.
pub fn parse_aspect_arguments(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (pair.trim().to_string(), String::new()),
        })
        .collect()
}

/// Parse the tags that apply to a method or constructor.
pub fn parse_method_tags(doc: &str) -> MethodTags {
    let mut parsed = MethodTags::default();
    for (tag, rest) in tag_lines(doc) {
        let phase = match tag {
            "inject" => {
                parsed.tags.injectable = true;
                continue;
            }
            "allowedContext" => {
                if let Some(ctx) = rest.split_whitespace().next() {
                    parsed.tags.allowed_context = Some(ctx.to_string());
                }
                continue;
            }
            "named" => {
                let mut words = rest.split_whitespace();
                if let (Some(q), Some(param)) = (words.next(), words.next()) {
                    if let Some(param) = param.strip_prefix('$') {
                        parsed
                            .param_qualifiers
                            .insert(param.to_string(), q.to_string());
                    }
                }
                continue;
            }
            "before" => AspectPhase::Before,
            "intercept" => AspectPhase::Intercept,
            "after" => AspectPhase::After,
            _ => continue,
        };
        let mut words = rest.splitn(2, char::is_whitespace);
        if let Some(aspect_type) = words.next().filter(|w| !w.is_empty()) {
            parsed.tags.aspects.push(AspectDescriptor {
                phase,
                aspect_type: aspect_type.to_string(),
                arguments: parse_aspect_arguments(words.next().unwrap_or("").trim()),
            });
        }
    }
    parsed
}

/// Parse the tags that apply to a property.
pub fn parse_property_tags(doc: &str) -> PropertyTags {
    let mut parsed = PropertyTags::default();
    for (tag, rest) in tag_lines(doc) {
        match tag {
            "inject" => parsed.injectable = true,
            "var" => {
                if let Some(ty) = rest.split_whitespace().next() {
                    parsed.declared_types.push(ty.to_string());
                }
            }
            "named" => {
                if let Some(q) = rest.split_whitespace().next() {
                    parsed.qualifier = Some(q.to_string());
                }
            }
            _ => {}
        }
    }
    parsed
}
