//! Endpoint rate-limit table and limiter registry
//!
//! The data-management API enforces a separate ceiling per endpoint and HTTP
//! method, while the object-storage API shares one large ceiling across all of
//! its operations. [`EndpointLimitTable`] describes those ceilings;
//! [`LimiterRegistry`] compiles it into one [`TokenBucket`] per rule and
//! resolves outgoing requests to the bucket that governs them.
//!
//! ## Rule order
//!
//! Rules for one method are evaluated most-specific first: the rule whose
//! template has the most literal characters is tried first, and rules with the
//! same count keep their declaration order. Placeholders such as `{item_id}`
//! match exactly one path segment (`[^/?]+`), which is narrower than matching
//! any non-empty run of characters: `hubs/{hub_id}` never matches
//! `hubs/a/b`. With the default table at most one rule matches any URL, so
//! the order only matters for custom tables.
//!
//! ## URL normalization
//!
//! URLs are matched in their parsed form: the host is lowercased and a
//! default port (`:443` for https, `:80` for http) is dropped before rules are
//! tried, so the registry resolves a URL the same way the HTTP client sends it.

use crate::error::{Error, Result};
use crate::limiter::TokenBucket;
use regex::Regex;
use reqwest::{Method, Url};
use std::collections::HashMap;

/// Host serving both the data-management and object-storage APIs
pub const DEFAULT_HOST: &str = "developer.api.autodesk.com";

/// Ceiling shared by every object-storage operation
pub const DEFAULT_STORAGE_PER_MINUTE: u32 = 1000;

/// Ceiling for requests no rule matches
pub const DEFAULT_FALLBACK_PER_MINUTE: u32 = 50;

/// Published data-management GET ceilings: (path template, requests per minute)
const GET_LIMITS: &[(&str, u32)] = &[
    // Hubs
    ("hubs", 50),
    ("hubs/{hub_id}", 50),
    // Projects
    ("hubs/{hub_id}/projects", 50),
    ("hubs/{hub_id}/projects/{project_id}", 50),
    ("hubs/{hub_id}/projects/{project_id}/hub", 50),
    ("hubs/{hub_id}/projects/{project_id}/topFolders", 300),
    ("projects/{project_id}/downloads/{download_id}", 300),
    ("projects/{project_id}/jobs/{job_id}", 300),
    // Folders
    ("projects/{project_id}/folders/{folder_id}", 300),
    ("projects/{project_id}/folders/{folder_id}/contents", 300),
    ("projects/{project_id}/folders/{folder_id}/parent", 50),
    ("projects/{project_id}/folders/{folder_id}/refs", 50),
    ("projects/{project_id}/folders/{folder_id}/relationships/links", 50),
    ("projects/{project_id}/folders/{folder_id}/relationships/refs", 50),
    ("projects/{project_id}/folders/{folder_id}/search", 300),
    // Items
    ("projects/{project_id}/items/{item_id}", 300),
    ("projects/{project_id}/items/{item_id}/parent", 50),
    ("projects/{project_id}/items/{item_id}/refs", 300),
    ("projects/{project_id}/items/{item_id}/relationships/refs", 50),
    ("projects/{project_id}/items/{item_id}/relationships/links", 50),
    ("projects/{project_id}/items/{item_id}/tip", 50),
    ("projects/{project_id}/items/{item_id}/versions", 800),
    // Versions
    ("projects/{project_id}/versions/{version_id}", 300),
    ("projects/{project_id}/versions/{version_id}/downloadFormats", 50),
    ("projects/{project_id}/versions/{version_id}/downloads", 50),
    ("projects/{project_id}/versions/{version_id}/item", 50),
    ("projects/{project_id}/versions/{version_id}/refs", 50),
    ("projects/{project_id}/versions/{version_id}/relationships/links", 50),
    ("projects/{project_id}/versions/{version_id}/relationships/refs", 50),
];

const POST_LIMITS: &[(&str, u32)] = &[
    ("projects/{project_id}/downloads", 50),
    ("projects/{project_id}/storage", 300),
    ("projects/{project_id}/folders", 50),
    ("projects/{project_id}/folders/{folder_id}/relationships/refs", 50),
    ("projects/{project_id}/items", 50),
    ("projects/{project_id}/items/{item_id}/relationships/refs", 50),
    ("projects/{project_id}/versions/{version_id}/relationships/refs", 50),
    ("projects/{project_id}/versions/{version_id}/relationships/links", 50),
    // Published twice upstream; collapses into the rule above
    ("projects/{project_id}/versions/{version_id}/relationships/links", 50),
    ("projects/{project_id}/commands", 300),
];

const PATCH_LIMITS: &[(&str, u32)] = &[
    ("projects/{project_id}/folders/{folder_id}", 50),
    ("projects/{project_id}/items/{item_id}", 50),
    ("projects/{project_id}/versions/{version_id}", 50),
    ("projects/{project_id}/versions/{version_id}/relationships/links/{link_id}", 50),
];

/// Piece of a path template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplatePiece<'a> {
    Literal(&'a str),
    Placeholder,
}

/// Split `template` into literal text and `{name}` placeholders
fn template_pieces(template: &str) -> Vec<TemplatePiece<'_>> {
    let mut pieces = Vec::new();
    let mut literal_start = 0;
    let mut search_from = 0;

    while let Some(open) = template[search_from..].find('{').map(|i| i + search_from) {
        let Some(close) = template[open..].find('}').map(|i| i + open) else {
            break;
        };
        let name = &template[open + 1..close];
        if name.is_empty() || name.contains(|c| c == '/' || c == '{') {
            search_from = open + 1;
            continue;
        }
        if literal_start < open {
            pieces.push(TemplatePiece::Literal(&template[literal_start..open]));
        }
        pieces.push(TemplatePiece::Placeholder);
        literal_start = close + 1;
        search_from = close + 1;
    }

    if literal_start < template.len() {
        pieces.push(TemplatePiece::Literal(&template[literal_start..]));
    }
    pieces
}

/// One (method, path template) -> ceiling mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRule {
    pub method: Method,
    /// Path below the data-management version prefix, e.g. `hubs/{hub_id}`
    pub template: String,
    pub per_minute: u32,
}

impl EndpointRule {
    pub fn new(method: Method, template: impl Into<String>, per_minute: u32) -> Self {
        Self {
            method,
            template: template.into(),
            per_minute,
        }
    }

    /// Number of template characters outside placeholders
    fn literal_len(&self) -> usize {
        template_pieces(&self.template)
            .iter()
            .map(|piece| match piece {
                TemplatePiece::Literal(text) => text.len(),
                TemplatePiece::Placeholder => 0,
            })
            .sum()
    }

    fn compile(&self, host: &str) -> Result<Regex> {
        let mut pattern = format!(
            r"^https?://{}/data/v(1|2)/",
            regex::escape(&host.to_ascii_lowercase())
        );
        for piece in template_pieces(&self.template) {
            match piece {
                TemplatePiece::Literal(text) => pattern.push_str(&regex::escape(text)),
                TemplatePiece::Placeholder => pattern.push_str("[^/?]+"),
            }
        }
        pattern.push_str(r"/?(\?.*)?$");

        Regex::new(&pattern).map_err(|e| {
            Error::InvalidConfig(format!("invalid endpoint template '{}': {}", self.template, e))
        })
    }
}

/// Static description of every throughput ceiling the client honours
#[derive(Debug, Clone)]
pub struct EndpointLimitTable {
    host: String,
    rules: Vec<EndpointRule>,
    storage_per_minute: u32,
    fallback_per_minute: u32,
}

impl Default for EndpointLimitTable {
    fn default() -> Self {
        let published = [
            (Method::GET, GET_LIMITS),
            (Method::POST, POST_LIMITS),
            (Method::PATCH, PATCH_LIMITS),
        ];

        let mut table = Self::empty(DEFAULT_HOST);
        for (method, limits) in published {
            for (template, per_minute) in limits {
                table = table.with_rule(EndpointRule::new(method.clone(), *template, *per_minute));
            }
        }
        table
    }
}

impl EndpointLimitTable {
    /// Table with no endpoint rules and the default storage/fallback ceilings
    pub fn empty(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            rules: Vec::new(),
            storage_per_minute: DEFAULT_STORAGE_PER_MINUTE,
            fallback_per_minute: DEFAULT_FALLBACK_PER_MINUTE,
        }
    }

    /// Point every pattern at another host (`host` or `host:port`)
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Add a rule; a rule for an existing (method, template) pair replaces it
    pub fn with_rule(mut self, rule: EndpointRule) -> Self {
        match self
            .rules
            .iter_mut()
            .find(|r| r.method == rule.method && r.template == rule.template)
        {
            Some(existing) => existing.per_minute = rule.per_minute,
            None => self.rules.push(rule),
        }
        self
    }

    pub fn with_storage_limit(mut self, per_minute: u32) -> Self {
        self.storage_per_minute = per_minute;
        self
    }

    pub fn with_fallback_limit(mut self, per_minute: u32) -> Self {
        self.fallback_per_minute = per_minute;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn rules(&self) -> &[EndpointRule] {
        &self.rules
    }

    pub fn storage_per_minute(&self) -> u32 {
        self.storage_per_minute
    }

    pub fn fallback_per_minute(&self) -> u32 {
        self.fallback_per_minute
    }
}

/// Which part of the table a limiter came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitScope {
    Endpoint { method: Method, template: String },
    Storage,
    Fallback,
}

/// A token bucket together with the rule it enforces
#[derive(Debug)]
pub struct RouteLimiter {
    scope: LimitScope,
    bucket: TokenBucket,
}

impl RouteLimiter {
    fn new(scope: LimitScope, per_minute: u32) -> Result<Self> {
        Ok(Self {
            scope,
            bucket: TokenBucket::per_minute(per_minute)?,
        })
    }

    pub fn scope(&self) -> &LimitScope {
        &self.scope
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Short human-readable name, used in logs
    pub fn label(&self) -> String {
        match &self.scope {
            LimitScope::Endpoint { method, template } => format!("{} {}", method, template),
            LimitScope::Storage => "storage".to_string(),
            LimitScope::Fallback => "fallback".to_string(),
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    limiter: RouteLimiter,
}

/// Compiled, read-only view of an [`EndpointLimitTable`]
///
/// Holds exactly one bucket per rule. Lookups take `&self` and are safe to
/// run concurrently.
#[derive(Debug)]
pub struct LimiterRegistry {
    endpoints: HashMap<Method, Vec<CompiledRule>>,
    storage_prefix: Regex,
    storage: RouteLimiter,
    fallback: RouteLimiter,
}

impl LimiterRegistry {
    pub fn new(table: &EndpointLimitTable) -> Result<Self> {
        let mut endpoints: HashMap<Method, Vec<(usize, &EndpointRule)>> = HashMap::new();
        for (position, rule) in table.rules().iter().enumerate() {
            endpoints
                .entry(rule.method.clone())
                .or_default()
                .push((position, rule));
        }

        let mut compiled = HashMap::with_capacity(endpoints.len());
        for (method, mut rules) in endpoints {
            rules.sort_by(|(pos_a, a), (pos_b, b)| {
                b.literal_len()
                    .cmp(&a.literal_len())
                    .then(pos_a.cmp(pos_b))
            });

            let mut ordered = Vec::with_capacity(rules.len());
            for (_, rule) in rules {
                ordered.push(CompiledRule {
                    pattern: rule.compile(table.host())?,
                    limiter: RouteLimiter::new(
                        LimitScope::Endpoint {
                            method: rule.method.clone(),
                            template: rule.template.clone(),
                        },
                        rule.per_minute,
                    )?,
                });
            }
            compiled.insert(method, ordered);
        }

        let storage_prefix = Regex::new(&format!(
            r"^https?://{}/oss/v2(?:[/?]|$)",
            regex::escape(&table.host().to_ascii_lowercase())
        ))
        .map_err(|e| Error::InvalidConfig(format!("invalid storage host '{}': {}", table.host(), e)))?;

        Ok(Self {
            endpoints: compiled,
            storage_prefix,
            storage: RouteLimiter::new(LimitScope::Storage, table.storage_per_minute())?,
            fallback: RouteLimiter::new(LimitScope::Fallback, table.fallback_per_minute())?,
        })
    }

    /// Resolve the limiter that governs `method url`
    ///
    /// `url` is parsed first; strings that are not absolute URLs are matched
    /// as given and end up on the fallback limiter.
    pub fn lookup(&self, method: &Method, url: &str) -> &RouteLimiter {
        match Url::parse(url) {
            Ok(parsed) => self.lookup_url(method, &parsed),
            Err(_) => self.resolve(method, url),
        }
    }

    /// Resolve the limiter that governs an already parsed URL
    pub fn lookup_url(&self, method: &Method, url: &Url) -> &RouteLimiter {
        self.resolve(method, url.as_str())
    }

    fn resolve(&self, method: &Method, url: &str) -> &RouteLimiter {
        if self.storage_prefix.is_match(url) {
            return &self.storage;
        }

        self.endpoints
            .get(method)
            .and_then(|rules| rules.iter().find(|rule| rule.pattern.is_match(url)))
            .map(|rule| &rule.limiter)
            .unwrap_or(&self.fallback)
    }

    pub fn storage(&self) -> &RouteLimiter {
        &self.storage
    }

    pub fn fallback(&self) -> &RouteLimiter {
        &self.fallback
    }

    /// Rules for `method` in evaluation order
    pub fn rules_for(&self, method: &Method) -> impl Iterator<Item = &RouteLimiter> {
        self.endpoints
            .get(method)
            .into_iter()
            .flatten()
            .map(|rule| &rule.limiter)
    }

    /// Number of distinct endpoint buckets
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DM: &str = "https://developer.api.autodesk.com/data/v1";

    fn published_count() -> usize {
        GET_LIMITS.len() + POST_LIMITS.len() + PATCH_LIMITS.len()
    }

    fn fill(template: &str, value: &str) -> String {
        template_pieces(template)
            .into_iter()
            .map(|piece| match piece {
                TemplatePiece::Literal(text) => text,
                TemplatePiece::Placeholder => value,
            })
            .collect()
    }

    fn registry() -> LimiterRegistry {
        LimiterRegistry::new(&EndpointLimitTable::default()).unwrap()
    }

    fn scope_of(registry: &LimiterRegistry, method: Method, url: &str) -> LimitScope {
        registry.lookup(&method, url).scope().clone()
    }

    fn endpoint(method: Method, template: &str) -> LimitScope {
        LimitScope::Endpoint {
            method,
            template: template.to_string(),
        }
    }

    #[test]
    fn test_default_table_collapses_duplicates() {
        let table = EndpointLimitTable::default();
        assert_eq!(table.rules().len(), published_count() - 1);

        let links: Vec<_> = table
            .rules()
            .iter()
            .filter(|r| {
                r.method == Method::POST
                    && r.template == "projects/{project_id}/versions/{version_id}/relationships/links"
            })
            .collect();
        assert_eq!(links.len(), 1);

        let replaced = table.with_rule(EndpointRule::new(Method::GET, "hubs", 10));
        let hubs = replaced
            .rules()
            .iter()
            .find(|r| r.method == Method::GET && r.template == "hubs")
            .unwrap();
        assert_eq!(hubs.per_minute, 10);
    }

    #[test]
    fn test_every_default_rule_resolves_to_itself() {
        let registry = registry();
        let table = EndpointLimitTable::default();

        for rule in table.rules() {
            let url = format!(
                "{}/{}",
                DM,
                fill(&rule.template, "urn:adsk.wipprod:fs.file:vf.abc")
            );
            let limiter = registry.lookup(&rule.method, &url);
            assert_eq!(
                limiter.scope(),
                &endpoint(rule.method.clone(), &rule.template),
                "{} {} resolved to {}",
                rule.method,
                url,
                limiter.label()
            );
            assert_eq!(limiter.bucket().ceiling(), rule.per_minute);
        }
    }

    #[test]
    fn test_specific_rules_do_not_fall_back() {
        let registry = registry();

        assert_eq!(
            scope_of(&registry, Method::GET, &format!("{}/projects/p1/items/i1/versions", DM)),
            endpoint(Method::GET, "projects/{project_id}/items/{item_id}/versions")
        );
        assert_eq!(
            scope_of(&registry, Method::GET, "http://developer.api.autodesk.com/data/v2/hubs/b.123"),
            endpoint(Method::GET, "hubs/{hub_id}")
        );
        assert_eq!(
            scope_of(
                &registry,
                Method::GET,
                &format!("{}/projects/p1/folders/f1/contents?page[number]=2", DM)
            ),
            endpoint(Method::GET, "projects/{project_id}/folders/{folder_id}/contents")
        );
        assert_eq!(
            scope_of(&registry, Method::GET, "https://developer.api.autodesk.com/project/v1/hubs/"),
            LimitScope::Fallback
        );
        assert_eq!(
            scope_of(&registry, Method::GET, &format!("{}/hubs/b.1/projects/", DM)),
            endpoint(Method::GET, "hubs/{hub_id}/projects")
        );
    }

    #[test]
    fn test_unmatched_requests_use_fallback() {
        let registry = registry();

        // Method without any rules
        assert_eq!(
            scope_of(&registry, Method::DELETE, &format!("{}/projects/p1/items/i1", DM)),
            LimitScope::Fallback
        );
        // Method with rules, path without one
        assert_eq!(
            scope_of(&registry, Method::GET, &format!("{}/projects/p1/unknown", DM)),
            LimitScope::Fallback
        );
        // Placeholders never span segments
        assert_eq!(
            scope_of(&registry, Method::GET, &format!("{}/hubs/a/b", DM)),
            LimitScope::Fallback
        );
        // Other hosts
        assert_eq!(
            scope_of(&registry, Method::GET, "https://example.com/data/v1/hubs"),
            LimitScope::Fallback
        );
        assert!(std::ptr::eq(
            registry.lookup(&Method::PUT, &format!("{}/hubs", DM)),
            registry.fallback()
        ));
    }

    #[test]
    fn test_storage_host_is_method_independent() {
        let registry = registry();
        let urls = [
            "https://developer.api.autodesk.com/oss/v2/buckets",
            "https://developer.api.autodesk.com/oss/v2/buckets/b/objects/o/resumable",
            "http://developer.api.autodesk.com/oss/v2?x=1",
        ];

        for url in urls {
            for method in [Method::GET, Method::PUT, Method::POST, Method::DELETE, Method::PATCH] {
                assert!(std::ptr::eq(registry.lookup(&method, url), registry.storage()));
            }
        }
        assert_eq!(registry.storage().bucket().ceiling(), DEFAULT_STORAGE_PER_MINUTE);

        assert_eq!(
            scope_of(
                &registry,
                Method::GET,
                "https://developer.api.autodesk.com/oss/v20/buckets"
            ),
            LimitScope::Fallback
        );
    }

    #[test]
    fn test_lookup_normalizes_port_and_host_case() {
        let registry = registry();

        let storage_urls = [
            "https://developer.api.autodesk.com:443/oss/v2/buckets/b/objects/o",
            "https://Developer.API.Autodesk.com/oss/v2/buckets/b/objects/o",
            "http://DEVELOPER.api.autodesk.com:80/oss/v2/buckets",
        ];
        for url in storage_urls {
            assert!(
                std::ptr::eq(registry.lookup(&Method::PUT, url), registry.storage()),
                "{} did not resolve to storage",
                url
            );
        }

        let url = "https://Developer.Api.Autodesk.com:443/data/v1/hubs/b.1/projects";
        assert_eq!(
            scope_of(&registry, Method::GET, url),
            endpoint(Method::GET, "hubs/{hub_id}/projects")
        );
        let parsed = Url::parse(url).unwrap();
        assert!(std::ptr::eq(
            registry.lookup(&Method::GET, url),
            registry.lookup_url(&Method::GET, &parsed)
        ));

        // Non-default ports stay significant
        assert_eq!(
            scope_of(
                &registry,
                Method::PUT,
                "https://developer.api.autodesk.com:8443/oss/v2/buckets"
            ),
            LimitScope::Fallback
        );
        assert_eq!(scope_of(&registry, Method::GET, "not a url"), LimitScope::Fallback);
    }

    #[test]
    fn test_mixed_case_table_host() {
        let table = EndpointLimitTable::empty("LocalHost:8080")
            .with_rule(EndpointRule::new(Method::GET, "items/{id}", 20));
        let registry = LimiterRegistry::new(&table).unwrap();

        assert_eq!(
            registry
                .lookup(&Method::GET, "http://localhost:8080/data/v1/items/1")
                .bucket()
                .ceiling(),
            20
        );
        assert!(std::ptr::eq(
            registry.lookup(&Method::GET, "http://LOCALHOST:8080/oss/v2/buckets"),
            registry.storage()
        ));
    }

    #[test]
    fn test_lookup_is_stable() {
        let registry = registry();
        let url = format!("{}/projects/p1/versions/v1/relationships/links", DM);

        let first = registry.lookup(&Method::POST, &url);
        for _ in 0..10 {
            assert!(std::ptr::eq(first, registry.lookup(&Method::POST, &url)));
        }
    }

    #[test]
    fn test_most_specific_rule_first() {
        let table = EndpointLimitTable::empty("localhost:8080")
            .with_rule(EndpointRule::new(Method::GET, "{a}/{b}", 10))
            .with_rule(EndpointRule::new(Method::GET, "items/{id}", 20))
            .with_rule(EndpointRule::new(Method::GET, "items/tip", 30));
        let registry = LimiterRegistry::new(&table).unwrap();

        let order: Vec<_> = registry.rules_for(&Method::GET).map(|l| l.label()).collect();
        assert_eq!(order, vec!["GET items/tip", "GET items/{id}", "GET {a}/{b}"]);

        let url = "http://localhost:8080/data/v1/items/tip";
        assert_eq!(registry.lookup(&Method::GET, url).bucket().ceiling(), 30);
        let url = "http://localhost:8080/data/v1/items/42";
        assert_eq!(registry.lookup(&Method::GET, url).bucket().ceiling(), 20);
        let url = "http://localhost:8080/data/v1/folders/42";
        assert_eq!(registry.lookup(&Method::GET, url).bucket().ceiling(), 10);
    }

    #[test]
    fn test_template_pieces() {
        assert_eq!(
            template_pieces("hubs/{hub_id}/projects"),
            vec![
                TemplatePiece::Literal("hubs/"),
                TemplatePiece::Placeholder,
                TemplatePiece::Literal("/projects"),
            ]
        );
        assert_eq!(template_pieces("{a}"), vec![TemplatePiece::Placeholder]);
        assert_eq!(template_pieces("a{}b"), vec![TemplatePiece::Literal("a{}b")]);
        assert_eq!(fill("x/{id}/y", "1"), "x/1/y");
    }

    #[test]
    fn test_one_bucket_per_rule() {
        let registry = registry();
        assert_eq!(registry.endpoint_count(), published_count() - 1);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let table = EndpointLimitTable::default().with_fallback_limit(0);
        assert!(matches!(
            LimiterRegistry::new(&table),
            Err(Error::InvalidConfig(_))
        ));
    }
}
