//! Descriptive tag generation through a completion provider.

use std::sync::Arc;

use crate::config::Config;
use crate::content::INTERNAL_MARKER;
use crate::providers::{CompletionProvider, ProviderError};
use crate::retry::retry;

pub fn build_prompt(tag_count: usize) -> String {
    format!(
        "Please find {tag_count} tags of the following paragraphs, separated by commas, each tag with only one word. Paragraph:\n"
    )
}

/// Prompt followed by content, cut to at most `limit` characters.
pub fn compose_prompt(prompt: &str, content: &str, limit: usize) -> String {
    prompt.chars().chain(content.chars()).take(limit).collect()
}

/// Split a completion on line breaks and commas; keep short candidates,
/// uppercased, in response order. A leading internal marker is dropped so
/// a generated tag always lands in the public namespace.
pub fn parse_tags(response: &str, max_words: usize) -> Vec<String> {
    response
        .split(['\n', ','])
        .map(|candidate| candidate.trim().trim_start_matches(INTERNAL_MARKER).trim())
        .filter(|candidate| !candidate.is_empty())
        .filter(|candidate| candidate.split_whitespace().count() <= max_words)
        .map(str::to_uppercase)
        .collect()
}

pub struct TagGenerator {
    provider: Arc<dyn CompletionProvider>,
    prompt: String,
    max_words: usize,
    char_limit: usize,
    attempts: usize,
}

/// Everything produced on the way to a tag list, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct Generated {
    pub prompt: String,
    pub response: String,
    pub tags: Vec<String>,
}

impl TagGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &Config) -> Self {
        Self {
            provider,
            prompt: build_prompt(config.tag_count),
            max_words: config.max_tag_words,
            char_limit: config.prompt_char_limit,
            attempts: config.provider_attempts,
        }
    }

    pub fn generate(&self, text: &str) -> Result<Generated, ProviderError> {
        let prompt = compose_prompt(&self.prompt, text, self.char_limit);

        let response = retry(self.attempts, ProviderError::is_retryable, |_| {
            self.provider.complete(&prompt)
        })?;
        log::info!("generated tag response: {response:?}");

        let tags = parse_tags(&response, self.max_words);
        Ok(Generated {
            prompt,
            response,
            tags,
        })
    }
}
