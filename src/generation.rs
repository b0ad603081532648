#![forbid(unsafe_code)]

//! Chat-completion calls that write descriptions and tag lists, plus the tag
//! clean-up applied before anything is sent back to YouTube.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::metadata::{
    GeneratedMetadata, MAX_TAG_CHARS, MAX_TAGS_CHARS, PROCESSED_MARKER, TAG_SEPARATOR,
    VideoRecord, serialize_tags,
};
use crate::retry::{RetryPolicy, with_retry};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const TEMPERATURE: f32 = 0.3;
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything able to answer a single-turn chat prompt.
pub trait TextGenerator {
    fn complete(&self, persona: &str, prompt: &str) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    agent: ureq::Agent,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(COMPLETION_TIMEOUT).build();
        Self {
            agent,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl TextGenerator for OpenAiClient {
    fn complete(&self, persona: &str, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: persona,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };
        let result = self
            .agent
            .post(&format!("{}/chat/completions", self.base_url))
            .set("Authorization", &format!("Bearer {}", self.api_key.trim()))
            .send_json(&body);
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let text = response
                    .into_string()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                bail!("chat completion returned {code}: {}", text.trim());
            }
            Err(err) => return Err(err).context("calling chat completions"),
        };
        let parsed: ChatResponse = response
            .into_json()
            .context("failed to parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(strip_quotes(&content).to_string())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Drops quote characters models like to wrap their answers in.
pub fn strip_quotes(text: &str) -> &str {
    text.trim().trim_matches(|ch: char| ch == '"' || ch == '\'')
}

/// Prompt wording. `{title}` is replaced with the video title.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub persona: String,
    pub description: String,
    pub tags: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            persona: "SEO YouTube Assistant".to_string(),
            description: "Write an SEO-optimized YouTube description for the video titled: {title}"
                .to_string(),
            tags: "List 20 SEO-optimized YouTube tags, separated by commas, for the video \
                   titled: {title}"
                .to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn description_prompt(&self, title: &str) -> String {
        self.description.replace("{title}", title)
    }

    pub fn tags_prompt(&self, title: &str) -> String {
        self.tags.replace("{title}", title)
    }
}

/// Produces descriptions and tags for records. Holds the one generator
/// handle created at startup.
pub struct SeoWriter<'a, G: TextGenerator + ?Sized> {
    generator: &'a G,
    prompts: PromptTemplates,
    policy: RetryPolicy,
}

impl<'a, G: TextGenerator + ?Sized> SeoWriter<'a, G> {
    pub fn new(generator: &'a G, prompts: PromptTemplates, policy: RetryPolicy) -> Self {
        Self {
            generator,
            prompts,
            policy,
        }
    }

    /// Asks the model once per retry attempt. An exhausted policy yields an
    /// empty string; the update phase treats that as a failed row.
    pub fn ask(&self, prompt: &str) -> String {
        match with_retry(&self.policy, "chat completion", || {
            self.generator.complete(&self.prompts.persona, prompt)
        }) {
            Ok(text) => text,
            Err(err) => {
                warn!("giving up on prompt: {err:#}");
                String::new()
            }
        }
    }

    pub fn generate<R: RngCore + ?Sized>(
        &self,
        record: &VideoRecord,
        rng: &mut R,
    ) -> GeneratedMetadata {
        let text = self.ask(&self.prompts.description_prompt(&record.title));
        let description = if text.trim().is_empty() {
            String::new()
        } else {
            format!("{text}{PROCESSED_MARKER}")
        };
        let raw_tags = self.ask(&self.prompts.tags_prompt(&record.title));
        let tags = sanitize_tags(&raw_tags, rng);
        debug!(
            "generated {} description char(s) and {} tag(s) for {}",
            description.chars().count(),
            tags.len(),
            record.video_id
        );
        GeneratedMetadata { description, tags }
    }
}

/// Cleans a comma-separated tag string.
///
/// Tags are trimmed, stripped of periods and dropped when empty or longer than
/// [`MAX_TAG_CHARS`]. While the joined list is longer than [`MAX_TAGS_CHARS`],
/// a randomly chosen tag is removed.
pub fn sanitize_tags<R: RngCore + ?Sized>(raw: &str, rng: &mut R) -> Vec<String> {
    let mut tags: Vec<String> = raw
        .split(',')
        .map(|tag| tag.trim().replace('.', ""))
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty() && tag.chars().count() <= MAX_TAG_CHARS)
        .collect();

    while !tags.is_empty() && serialize_tags(&tags).chars().count() > MAX_TAGS_CHARS {
        let index = (rng.next_u64() % tags.len() as u64) as usize;
        tags.remove(index);
    }
    tags
}

/// Same as [`sanitize_tags`] but returns the serialized string.
pub fn sanitize_tag_string<R: RngCore + ?Sized>(raw: &str, rng: &mut R) -> String {
    sanitize_tags(raw, rng).join(TAG_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Metrics, VideoRecord};
    use anyhow::anyhow;
    use chrono::Utc;
    use rand_core::OsRng;
    use std::cell::RefCell;

    struct ScriptedGenerator {
        replies: RefCell<Vec<Result<String>>>,
        prompts: RefCell<Vec<(String, String)>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: RefCell::new(replies),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl TextGenerator for ScriptedGenerator {
        fn complete(&self, persona: &str, prompt: &str) -> Result<String> {
            self.prompts
                .borrow_mut()
                .push((persona.to_string(), prompt.to_string()));
            let mut replies = self.replies.borrow_mut();
            if replies.is_empty() {
                return Err(anyhow!("no scripted reply"));
            }
            replies.remove(0)
        }
    }

    fn record(title: &str) -> VideoRecord {
        VideoRecord {
            video_id: "abc123".into(),
            video_url: "https://www.youtube.com/watch?v=abc123".into(),
            channel_name: "chess-br".into(),
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            category_id: 27,
            category: "Education".into(),
            published_at: Utc::now(),
            duration_minutes: 10,
            view_count: 0,
            like_count: 0,
            dislike_count: 0,
            comment_count: 0,
            metrics: Metrics {
                days_since_publish: 1,
                views_per_day: 0,
                reactions: 0,
            },
        }
    }

    #[test]
    fn strip_quotes_removes_wrapping_quotes() {
        assert_eq!(strip_quotes("\"Hello\""), "Hello");
        assert_eq!(strip_quotes("'Hi there'"), "Hi there");
        assert_eq!(strip_quotes("  \"quoted\"  "), "quoted");
        assert_eq!(strip_quotes("it's fine"), "it's fine");
    }

    #[test]
    fn sanitize_tags_cleans_and_filters() {
        let tags = sanitize_tags(
            " chess , opening traps., , a tag that is definitely longer than thirty chars, e4 ",
            &mut OsRng,
        );
        assert_eq!(tags, vec!["chess", "opening traps", "e4"]);
    }

    #[test]
    fn sanitize_tags_enforces_aggregate_limit() {
        let raw: Vec<String> = (0..60).map(|index| format!("chess tag number {index:02}")).collect();
        let raw = raw.join(",");
        for _ in 0..20 {
            let tags = sanitize_tags(&raw, &mut OsRng);
            assert!(serialize_tags(&tags).chars().count() <= MAX_TAGS_CHARS);
            assert!(tags.iter().all(|tag| tag.chars().count() <= MAX_TAG_CHARS));
            assert!(!tags.is_empty());
        }
    }

    #[test]
    fn sanitize_tags_is_idempotent_on_compliant_input() {
        let compliant = "chess, openings, e4 e5, ruy lopez";
        assert_eq!(sanitize_tag_string(compliant, &mut OsRng), compliant);
        let first = sanitize_tag_string(" chess. ,  blitz ,tactics ", &mut OsRng);
        assert_eq!(first, "chess, blitz, tactics");
        assert_eq!(sanitize_tag_string(&first, &mut OsRng), first);
    }

    #[test]
    fn sanitize_tags_handles_empty_input() {
        assert!(sanitize_tags("", &mut OsRng).is_empty());
        assert!(sanitize_tags(" , ,. ", &mut OsRng).is_empty());
    }

    #[test]
    fn prompts_substitute_title() {
        let prompts = PromptTemplates {
            persona: "p".into(),
            description: "Describe {title}!".into(),
            tags: "Tags for {title}".into(),
        };
        assert_eq!(prompts.description_prompt("Ruy Lopez"), "Describe Ruy Lopez!");
        assert_eq!(prompts.tags_prompt("Ruy Lopez"), "Tags for Ruy Lopez");
    }

    #[test]
    fn ask_retries_then_succeeds() {
        let generator = ScriptedGenerator::new(vec![Err(anyhow!("rate limited")), Ok("text".into())]);
        let writer = SeoWriter::new(&generator, PromptTemplates::default(), RetryPolicy::immediate(3));
        assert_eq!(writer.ask("prompt"), "text");
        assert_eq!(generator.prompts.borrow().len(), 2);
    }

    #[test]
    fn ask_returns_empty_after_exhaustion() {
        let generator = ScriptedGenerator::new(Vec::new());
        let writer = SeoWriter::new(&generator, PromptTemplates::default(), RetryPolicy::immediate(3));
        assert_eq!(writer.ask("prompt"), "");
        assert_eq!(generator.prompts.borrow().len(), 3);
    }

    #[test]
    fn generate_appends_marker_and_sanitizes_tags() {
        let generator = ScriptedGenerator::new(vec![
            Ok("Great chess video".into()),
            Ok("chess, tactics., endgame".into()),
        ]);
        let writer = SeoWriter::new(&generator, PromptTemplates::default(), RetryPolicy::immediate(1));
        let generated = writer.generate(&record("Endgame basics"), &mut OsRng);
        assert_eq!(generated.description, format!("Great chess video{PROCESSED_MARKER}"));
        assert_eq!(generated.tags, vec!["chess", "tactics", "endgame"]);
        let prompts = generator.prompts.borrow();
        assert_eq!(prompts[0].0, "SEO YouTube Assistant");
        assert!(prompts[0].1.contains("Endgame basics"));
        assert!(prompts[1].1.contains("Endgame basics"));
    }

    #[test]
    fn generate_leaves_description_empty_when_model_fails() {
        let generator = ScriptedGenerator::new(vec![Err(anyhow!("down")), Ok("chess".into())]);
        let writer = SeoWriter::new(&generator, PromptTemplates::default(), RetryPolicy::immediate(1));
        let generated = writer.generate(&record("Endgame basics"), &mut OsRng);
        assert_eq!(generated.description, "");
        assert_eq!(generated.tags, vec!["chess"]);
    }

    #[test]
    fn chat_response_tolerates_null_content() -> Result<()> {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)?;
        assert!(parsed.choices[0].message.content.is_none());
        Ok(())
    }
}
