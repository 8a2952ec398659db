//! Retry topic chains: naming and position resolution.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::message::{ChainPosition, Headers, headers};

/// Placeholder replaced by the base topic in the dead-letter template.
pub const TOPIC_PLACEHOLDER: &str = "{topic}";

/// How retry topics are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopicNaming {
    /// One topic per attempt: `{base}.retry-1 … {base}.retry-N`.
    #[default]
    AttemptBased,
    /// A single `{base}.retry` topic; the attempt travels in a header.
    Fixed,
}

impl TopicNaming {
    /// Configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttemptBased => "attempt-based",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for TopicNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicNaming {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attempt-based" | "attempt_based" => Ok(Self::AttemptBased),
            "fixed" => Ok(Self::Fixed),
            other => Err(ConfigError::invalid(
                "retry_topic_naming",
                format!("`{other}` is neither `attempt-based` nor `fixed`"),
            )),
        }
    }
}

/// Dead-letter topic template such as `{topic}.dlq`. A template without the
/// placeholder names one shared dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTemplate(String);

impl DeadLetterTemplate {
    /// Wraps a template.
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Dead-letter topic for `base`.
    #[must_use]
    pub fn render(&self, base: &str) -> String {
        self.0.replace(TOPIC_PLACEHOLDER, base)
    }

    /// Returns `true` if `topic` is a dead-letter topic produced by this
    /// template.
    #[must_use]
    pub fn is_dead_letter(&self, topic: &str) -> bool {
        match self.0.split_once(TOPIC_PLACEHOLDER) {
            Some((prefix, suffix)) => {
                topic.len() > prefix.len() + suffix.len()
                    && topic.starts_with(prefix)
                    && topic.ends_with(suffix)
            }
            None => topic == self.0,
        }
    }

    /// The raw template.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The retry topics and dead-letter topic derived from one base topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTopicChain {
    base: String,
    naming: TopicNaming,
    max_retries: u32,
    dead_letter: String,
}

/// Where a failed message goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hop {
    /// Republish to a retry topic as the given attempt.
    Retry {
        /// Destination topic.
        topic: String,
        /// Attempt the message will be on.
        attempt: u32,
    },
    /// Retries are exhausted.
    DeadLetter {
        /// Destination topic.
        topic: String,
    },
}

impl RetryTopicChain {
    /// Derives the chain for `base`.
    #[must_use]
    pub fn new(
        base: impl Into<String>,
        naming: TopicNaming,
        max_retries: u32,
        dead_letter: &DeadLetterTemplate,
    ) -> Self {
        let base = base.into();
        let dead_letter = dead_letter.render(&base);
        Self {
            base,
            naming,
            max_retries,
            dead_letter,
        }
    }

    /// The topic the handler is registered for.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Number of retry attempts before dead-lettering.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Topic carrying attempt `attempt` (1-based).
    #[must_use]
    pub fn retry_topic(&self, attempt: u32) -> String {
        match self.naming {
            TopicNaming::AttemptBased => format!("{}.retry-{attempt}", self.base),
            TopicNaming::Fixed => format!("{}.retry", self.base),
        }
    }

    /// Every retry topic in the chain, in attempt order, without duplicates.
    #[must_use]
    pub fn retry_topics(&self) -> Vec<String> {
        match self.naming {
            TopicNaming::AttemptBased => {
                (1..=self.max_retries).map(|n| self.retry_topic(n)).collect()
            }
            TopicNaming::Fixed if self.max_retries > 0 => vec![self.retry_topic(1)],
            TopicNaming::Fixed => Vec::new(),
        }
    }

    /// The dead-letter topic.
    #[must_use]
    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter
    }

    /// Next hop for a message that failed on `attempt` (0 for the primary
    /// topic).
    #[must_use]
    pub fn next_hop(&self, attempt: u32) -> Hop {
        if attempt < self.max_retries {
            let attempt = attempt + 1;
            Hop::Retry {
                topic: self.retry_topic(attempt),
                attempt,
            }
        } else {
            Hop::DeadLetter {
                topic: self.dead_letter.clone(),
            }
        }
    }
}

/// A polled topic resolved against the configured chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTopic {
    /// The chain's base topic.
    pub base: String,
    /// Number of earlier failed attempts.
    pub attempt: u32,
    /// Position within the chain.
    pub position: ChainPosition,
}

/// Resolves any polled topic to its chain and position.
///
/// Topics of chains known at startup are looked up directly; other topics
/// (reached through prefix subscriptions) are parsed from their suffix. The
/// attempt is always taken from the topic name, except with fixed naming
/// where the single retry topic cannot carry it and the attempt header is
/// read instead.
#[derive(Debug, Clone)]
pub struct TopicChains {
    naming: TopicNaming,
    max_retries: u32,
    dead_letter: DeadLetterTemplate,
    known: HashMap<String, ResolvedTopic>,
}

impl TopicChains {
    /// Builds the resolver and pre-computes the chains of `bases`.
    pub fn new(
        naming: TopicNaming,
        max_retries: u32,
        dead_letter: DeadLetterTemplate,
        bases: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut chains = Self {
            naming,
            max_retries,
            dead_letter,
            known: HashMap::new(),
        };
        for base in bases {
            let chain = chains.chain(&base);
            // Retry topics first so a base that happens to look like a retry
            // topic still resolves as primary.
            if naming == TopicNaming::AttemptBased {
                for attempt in 1..=max_retries {
                    chains.known.insert(
                        chain.retry_topic(attempt),
                        ResolvedTopic {
                            base: base.clone(),
                            attempt,
                            position: ChainPosition::Retry(attempt),
                        },
                    );
                }
            }
            chains.known.insert(
                chain.dead_letter_topic().to_owned(),
                ResolvedTopic {
                    base: base.clone(),
                    attempt: max_retries,
                    position: ChainPosition::DeadLetter,
                },
            );
            chains.known.insert(
                base.clone(),
                ResolvedTopic {
                    base,
                    attempt: 0,
                    position: ChainPosition::Primary,
                },
            );
        }
        chains
    }

    /// The chain for `base`.
    #[must_use]
    pub fn chain(&self, base: &str) -> RetryTopicChain {
        RetryTopicChain::new(base, self.naming, self.max_retries, &self.dead_letter)
    }

    /// Resolves a polled topic.
    #[must_use]
    pub fn resolve(&self, topic: &str, message_headers: &Headers) -> ResolvedTopic {
        if let Some(resolved) = self.known.get(topic) {
            return resolved.clone();
        }
        if self.naming == TopicNaming::Fixed {
            if let Some(base) = topic.strip_suffix(".retry").filter(|b| !b.is_empty()) {
                let attempt = self.attempt_from_header(message_headers);
                return ResolvedTopic {
                    base: base.to_owned(),
                    attempt,
                    position: ChainPosition::Retry(attempt),
                };
            }
        }
        if self.dead_letter.is_dead_letter(topic) {
            return ResolvedTopic {
                base: topic.to_owned(),
                attempt: self.max_retries,
                position: ChainPosition::DeadLetter,
            };
        }
        if self.naming == TopicNaming::AttemptBased {
            if let Some((base, attempt)) = parse_attempt_suffix(topic) {
                let attempt = attempt.min(self.max_retries);
                return ResolvedTopic {
                    base: base.to_owned(),
                    attempt,
                    position: if attempt == 0 {
                        ChainPosition::Primary
                    } else {
                        ChainPosition::Retry(attempt)
                    },
                };
            }
        }
        ResolvedTopic {
            base: topic.to_owned(),
            attempt: 0,
            position: ChainPosition::Primary,
        }
    }

    /// Reads the attempt header, clamped to `1..=max_retries`. A missing or
    /// unreadable header counts as the last attempt.
    fn attempt_from_header(&self, message_headers: &Headers) -> u32 {
        message_headers
            .get(headers::RETRY_ATTEMPT)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|text| text.trim().parse::<u32>().ok())
            .map_or(self.max_retries, |attempt| {
                attempt.clamp(1, self.max_retries.max(1))
            })
    }

    /// Every retry topic of the chains known at startup.
    #[must_use]
    pub fn retry_subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .known
            .values()
            .filter(|resolved| resolved.position == ChainPosition::Primary)
            .flat_map(|resolved| self.chain(&resolved.base).retry_topics())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

fn parse_attempt_suffix(topic: &str) -> Option<(&str, u32)> {
    let (base, attempt) = topic.rsplit_once(".retry-")?;
    if base.is_empty() {
        return None;
    }
    attempt.parse().ok().map(|attempt| (base, attempt))
}
