//! In-memory shared store for tests and single-process runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{SharedStore, StoreError};

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    List(Vec<String>),
}

/// Store that keeps serialised values in a process-local map.
///
/// Values are stored as JSON text, exactly as the Redis store does, so both
/// stores exercise the same serialise/deserialise round trip.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(None),
            Some(Entry::Text(text)) => Ok(Some(serde_json::from_str(text)?)),
            Some(Entry::List(_)) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(value)?;
        self.entries.lock().await.insert(key.to_string(), Entry::Text(text));
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let matcher = glob_to_regex(pattern)?;
        let entries = self.entries.lock().await;
        Ok(entries.keys().filter(|key| matcher.is_match(key)).cloned().collect())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(keys.iter().filter(|key| entries.remove(key.as_str()).is_some()).count())
    }

    async fn append(&self, key: &str, value: &Value) -> Result<usize, StoreError> {
        let text = serde_json::to_string(value)?;
        let mut entries = self.entries.lock().await;
        match entries.entry(key.to_string()).or_insert_with(|| Entry::List(Vec::new())) {
            Entry::List(items) => {
                items.push(text);
                Ok(items.len())
            }
            Entry::Text(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn range(&self, key: &str, limit: Option<usize>) -> Result<Vec<Value>, StoreError> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(items)) => items
                .iter()
                .take(limit.unwrap_or(usize::MAX))
                .map(|text| serde_json::from_str(text).map_err(StoreError::from))
                .collect(),
            Some(Entry::Text(_)) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Translate a Redis-style glob into an anchored regular expression.
///
/// Supports `*`, `?`, `\\` escapes and `[...]` classes with `^` negation and
/// `a-z` ranges. An unterminated `[` matches itself.
fn glob_to_regex(pattern: &str) -> Result<Regex, StoreError> {
    let characters: Vec<char> = pattern.chars().collect();
    let mut expression = String::with_capacity(pattern.len() + 2);
    expression.push('^');
    let mut index = 0;
    while index < characters.len() {
        match characters[index] {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            '\\' => {
                if let Some(escaped) = characters.get(index + 1) {
                    expression.push_str(&regex::escape(&escaped.to_string()));
                    index += 1;
                }
            }
            '[' => match class_to_regex(&characters[index + 1..]) {
                Some((class, consumed)) => {
                    expression.push_str(&class);
                    index += consumed;
                }
                None => expression.push_str(&regex::escape("[")),
            },
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
        index += 1;
    }
    expression.push('$');
    Regex::new(&expression).map_err(|error| StoreError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: error.to_string(),
    })
}

/// Translate the body of a `[...]` class that follows the opening bracket.
/// Returns the regex class and how many characters it used, closing bracket
/// included, or `None` when the class is never closed.
fn class_to_regex(body: &[char]) -> Option<(String, usize)> {
    let mut class = String::from("[");
    let mut index = 0;
    if body.first() == Some(&'^') {
        class.push('^');
        index += 1;
    }
    while index < body.len() {
        match body[index] {
            ']' => {
                class.push(']');
                return Some((class, index + 1));
            }
            '\\' if index + 1 < body.len() => {
                index += 1;
                push_class_literal(&mut class, body[index]);
            }
            '-' if index + 1 < body.len() && body[index + 1] != ']' && !class.ends_with(['[', '^']) => class.push('-'),
            literal => push_class_literal(&mut class, literal),
        }
        index += 1;
    }
    None
}

fn push_class_literal(class: &mut String, literal: char) {
    if literal.is_ascii_punctuation() {
        class.push('\\');
    }
    class.push(literal);
}
