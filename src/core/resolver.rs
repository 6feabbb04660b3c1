use std::net::Ipv4Addr;

use regex::Regex;
use serde::{Deserialize, Serialize};

// Maximal runs of digits and dots; a run is an address only if it parses as one
// and is not glued to a letter, digit or underscore on either side.
const NUMERIC_TOKEN: &str = r"[0-9]+(?:\.[0-9]+)*";

/// How to pick an address when a description contains several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    /// First dotted quad in document order.
    #[default]
    FirstMatch,
    /// First `IP=` NIC attribute, falling back to `FirstMatch`.
    NicAttribute,
}

/// Pulls a routable IPv4 address out of a backend description.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    strategy: ResolveStrategy,
    numeric_token: Regex,
    nic_attribute: Regex,
}

impl AddressResolver {
    pub fn new(strategy: ResolveStrategy) -> Result<Self, regex::Error> {
        Ok(Self {
            strategy,
            numeric_token: Regex::new(&format!("({})", NUMERIC_TOKEN))?,
            nic_attribute: Regex::new(&format!(r#"\bIP\s*=\s*"?({})"#, NUMERIC_TOKEN))?,
        })
    }

    pub fn strategy(&self) -> ResolveStrategy {
        self.strategy
    }

    /// Returns the instance address, or `None` when the text has no usable IPv4.
    pub fn resolve(&self, description: &str) -> Option<Ipv4Addr> {
        match self.strategy {
            ResolveStrategy::FirstMatch => self.first_match(description),
            ResolveStrategy::NicAttribute => self
                .first_capture(&self.nic_attribute, description)
                .or_else(|| self.first_match(description)),
        }
    }

    fn first_match(&self, description: &str) -> Option<Ipv4Addr> {
        self.first_capture(&self.numeric_token, description)
    }

    fn first_capture(&self, pattern: &Regex, text: &str) -> Option<Ipv4Addr> {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .filter(|m| on_word_boundary(text, m.start(), m.end()))
            .find_map(|m| m.as_str().parse().ok())
    }
}

fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word) && !after.is_some_and(is_word)
}
