//! Static table mapping topics to message handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::handler::MessageHandler;

/// A topic pattern: an exact name, or a prefix written as `prefix*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Matches one topic.
    Exact(String),
    /// Matches every topic starting with the prefix.
    Prefix(String),
}

impl TopicPattern {
    /// Parses `name` or `prefix*`.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_owned()),
            None => Self::Exact(pattern.to_owned()),
        }
    }

    /// Returns `true` if `topic` matches.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(name) => name == topic,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }

    /// The pattern in subscription form.
    #[must_use]
    pub fn subscription(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Frozen `{pattern → handler}` table built once at startup.
#[derive(Clone)]
pub struct HandlerRegistry {
    exact: HashMap<String, Arc<dyn MessageHandler>>,
    // Longest prefix first.
    prefixes: Vec<(String, Arc<dyn MessageHandler>)>,
}

impl HandlerRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Finds the handler for a topic: exact match first, then the longest
    /// matching prefix.
    #[must_use]
    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn MessageHandler>> {
        if let Some(handler) = self.exact.get(topic) {
            return Some(Arc::clone(handler));
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| topic.starts_with(prefix.as_str()))
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Every registered pattern, in subscription form.
    #[must_use]
    pub fn patterns(&self) -> Vec<TopicPattern> {
        let mut patterns: Vec<_> = self
            .exact
            .keys()
            .cloned()
            .map(TopicPattern::Exact)
            .chain(
                self.prefixes
                    .iter()
                    .map(|(prefix, _)| TopicPattern::Prefix(prefix.clone())),
            )
            .collect();
        patterns.sort_by_key(ToString::to_string);
        patterns
    }

    /// Exact topic names with a handler.
    #[must_use]
    pub fn exact_topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.exact.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("patterns", &self.patterns())
            .finish()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    routes: Vec<(TopicPattern, Arc<dyn MessageHandler>)>,
}

impl HandlerRegistryBuilder {
    /// Registers `handler` for `pattern` (`topic` or `prefix*`).
    #[must_use]
    pub fn route(mut self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.routes.push((TopicPattern::parse(pattern), handler));
        self
    }

    /// Freezes the table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no route was registered, a pattern is
    /// empty, or the same pattern was registered twice.
    pub fn build(self) -> Result<HandlerRegistry, ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::Missing("message handlers".into()));
        }
        let mut exact = HashMap::new();
        let mut prefixes: Vec<(String, Arc<dyn MessageHandler>)> = Vec::new();
        for (pattern, handler) in self.routes {
            let duplicate = match &pattern {
                TopicPattern::Exact(name) if name.is_empty() => {
                    return Err(ConfigError::invalid("handler pattern", "empty topic"));
                }
                TopicPattern::Prefix(prefix) if prefix.is_empty() => {
                    return Err(ConfigError::invalid(
                        "handler pattern",
                        "a bare `*` would match every topic",
                    ));
                }
                TopicPattern::Exact(name) => exact.insert(name.clone(), handler).is_some(),
                TopicPattern::Prefix(prefix) => {
                    let seen = prefixes.iter().any(|(p, _)| p == prefix);
                    prefixes.push((prefix.clone(), handler));
                    seen
                }
            };
            if duplicate {
                return Err(ConfigError::invalid(
                    "handler pattern",
                    format!("{pattern} registered twice"),
                ));
            }
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(HandlerRegistry { exact, prefixes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use crate::message::MessageContext;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl MessageHandler for Named {
        async fn handle(&self, _payload: &[u8], _ctx: &MessageContext) -> Result<(), HandlerError> {
            Err(HandlerError::unknown(self.0))
        }
    }

    fn named(name: &'static str) -> Arc<dyn MessageHandler> {
        Arc::new(Named(name))
    }

    async fn name_of(handler: Option<Arc<dyn MessageHandler>>) -> Option<String> {
        let handler = handler?;
        let message = crate::message::InboundMessage {
            topic: "t".into(),
            partition: 0,
            offset: 0,
            key: None,
            value: Vec::new(),
            headers: crate::message::Headers::new(),
        };
        let ctx = MessageContext::primary(&message);
        handler
            .handle(&[], &ctx)
            .await
            .err()
            .map(|err| err.message().to_owned())
    }

    #[test]
    fn test_pattern_parse_and_match() {
        let exact = TopicPattern::parse("catalog.products");
        let prefix = TopicPattern::parse("catalog.*");

        assert!(exact.matches("catalog.products"));
        assert!(!exact.matches("catalog.products.retry-1"));
        assert!(prefix.matches("catalog.orders"));
        assert!(!prefix.matches("billing.orders"));
        assert_eq!(prefix.to_string(), "catalog.*");
    }

    #[tokio::test]
    async fn test_resolve_prefers_exact_then_longest_prefix() {
        // Arrange
        let registry = HandlerRegistry::builder()
            .route("catalog.*", named("short"))
            .route("catalog.products.*", named("long"))
            .route("catalog.products.created", named("exact"))
            .build()
            .unwrap();

        // Act
        let exact = name_of(registry.resolve("catalog.products.created")).await;
        let long = name_of(registry.resolve("catalog.products.updated")).await;
        let short = name_of(registry.resolve("catalog.orders")).await;
        let none = registry.resolve("billing.invoices");

        // Assert
        assert_eq!(exact.as_deref(), Some("exact"));
        assert_eq!(long.as_deref(), Some("long"));
        assert_eq!(short.as_deref(), Some("short"));
        assert!(none.is_none());
    }

    #[test]
    fn test_build_rejects_duplicates_and_empty_tables() {
        let duplicate = HandlerRegistry::builder()
            .route("a", named("1"))
            .route("a", named("2"))
            .build();
        let empty = HandlerRegistry::builder().build();
        let wildcard = HandlerRegistry::builder().route("*", named("all")).build();

        assert!(matches!(duplicate, Err(ConfigError::Invalid { .. })));
        assert!(matches!(empty, Err(ConfigError::Missing(_))));
        assert!(matches!(wildcard, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_patterns_list_every_route() {
        let registry = HandlerRegistry::builder()
            .route("b", named("b"))
            .route("a.*", named("a"))
            .build()
            .unwrap();

        let patterns: Vec<String> = registry.patterns().iter().map(ToString::to_string).collect();

        assert_eq!(patterns, vec!["a.*".to_owned(), "b".to_owned()]);
    }
}
