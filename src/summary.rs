//! Parent-facing summaries of the current session.
//!
//! Both remote prompts are one-shot: the instruction is the only history
//! turn and the serialized transcript is the message. Failures propagate,
//! unlike the chat path.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::info;

use crate::error::ModelError;
use crate::gateway::{ChatModel, Turn};
use crate::transcript::Transcript;

const PARENT_SUGGESTIONS_PROMPT: &str = "Based on the conversation history,  suggestions for parents \
about topics or activities they could discuss with their child to build on this interaction.\
Give as one or two sentence";

const SESSION_SUMMARY_PROMPT: &str = "Based on the conversation history, provide a brief summary of the \
interaction, including topics discussed, the child's engagement level, and how the conversation \
progressed. Format as a single paragraph.";

pub struct SummaryGenerator {
    model: Arc<dyn ChatModel>,
}

impl SummaryGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn parent_suggestions(&self, transcript: &Transcript) -> Result<String, ModelError> {
        self.one_shot(PARENT_SUGGESTIONS_PROMPT, transcript).await
    }

    pub async fn session_summary(&self, transcript: &Transcript) -> Result<String, ModelError> {
        self.one_shot(SESSION_SUMMARY_PROMPT, transcript).await
    }

    async fn one_shot(&self, instruction: &str, transcript: &Transcript) -> Result<String, ModelError> {
        let payload = transcript.to_json();
        let text = self.model.send(&[Turn::user(instruction)], &payload).await?;
        info!(
            "Summary prompt over {} exchanges → {} chars",
            transcript.len(),
            text.len()
        );
        Ok(text)
    }
}

/// Keyword → topic label.
const TOPICS: &[(&str, &str)] = &[
    ("school", "school"),
    ("math", "mathematics"),
    ("england", "England"),
    ("cricket", "cricket"),
    ("badminton", "badminton"),
    ("geography", "geography"),
];

static PLAYING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"playing (\w+)").expect("static regex"));

const ENTHUSIASM: &[&str] = &["excited", "love", "fun"];
const DISENGAGEMENT: &[&str] = &["boring", "tired", "don't want"];

/// Offline keyword digest of a conversation: topics, activities and
/// whether the child's engagement waned. Needs no model call.
pub fn conversation_digest(transcript: &Transcript) -> String {
    let mut topics: Vec<&str> = Vec::new();
    let mut activities: Vec<String> = Vec::new();
    let mut enthusiastic = false;
    let mut waning = false;

    for exchange in transcript.exchanges() {
        let text = format!("{} {}", exchange.user_input, exchange.response).to_lowercase();

        for &(keyword, label) in TOPICS {
            if text.contains(keyword) && !topics.contains(&label) {
                topics.push(label);
            }
        }

        if text.contains("i spy") && !activities.iter().any(|a| a == "I Spy") {
            activities.push("I Spy".to_string());
        }
        if let Some(caps) = PLAYING.captures(&text) {
            let game = caps[1].to_string();
            if !activities.contains(&game) {
                activities.push(game);
            }
        }

        enthusiastic |= ENTHUSIASM.iter().any(|w| text.contains(w));
        waning |= DISENGAGEMENT.iter().any(|w| text.contains(w));
    }

    let mut digest = String::from("The child");
    if enthusiastic {
        digest.push_str(", initially excited");
    }
    if !topics.is_empty() {
        digest.push_str(&format!(", discussed {}", topics.join(", ")));
    }
    if !activities.is_empty() {
        digest.push_str(&format!(". Activities included {}", activities.join(", ")));
    }
    if waning {
        digest.push_str(". The child's enthusiasm appeared to decrease as the conversation progressed");
    }
    digest.push('.');
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::ScriptedModel;
    use crate::transcript::Exchange;

    fn sample() -> Transcript {
        Transcript::from_exchanges(vec![
            Exchange::new("I love school", "School is fun!"),
            Exchange::new("I was playing cricket", "Cricket is great."),
            Exchange::new("let's play i spy", "I spy something blue."),
        ])
    }

    #[tokio::test]
    async fn summary_prompts_send_instruction_and_transcript_json() {
        let model = Arc::new(ScriptedModel::with_replies([
            Ok("Talk about cricket.".to_string()),
            Ok("A happy chat.".to_string()),
        ]));
        let generator = SummaryGenerator::new(model.clone());
        let transcript = sample();

        assert_eq!(
            generator.parent_suggestions(&transcript).await.unwrap(),
            "Talk about cricket."
        );
        assert_eq!(generator.session_summary(&transcript).await.unwrap(), "A happy chat.");

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].0, vec![Turn::user(PARENT_SUGGESTIONS_PROMPT)]);
        assert_eq!(calls[1].0, vec![Turn::user(SESSION_SUMMARY_PROMPT)]);
        assert_eq!(calls[1].1, transcript.to_json());
    }

    #[test]
    fn parent_suggestions_prompt_keeps_fixed_wording() {
        assert_eq!(
            PARENT_SUGGESTIONS_PROMPT,
            "Based on the conversation history,  suggestions for parents about topics or \
activities they could discuss with their child to build on this interaction.Give as one or two sentence"
        );
    }

    #[test]
    fn digest_collects_each_game_once() {
        let transcript = Transcript::from_exchanges(vec![
            Exchange::new("we were playing tag", "Tag is fun."),
            Exchange::new("still playing tag", "Run fast!"),
            Exchange::new("now playing chess", "Chess needs thinking."),
        ]);
        assert_eq!(
            conversation_digest(&transcript),
            "The child, initially excited. Activities included tag, chess."
        );
    }

    #[tokio::test]
    async fn summary_failures_propagate() {
        let model = Arc::new(ScriptedModel::with_replies([Err(ModelError::Malformed(
            "nope".into(),
        ))]));
        let generator = SummaryGenerator::new(model);
        assert!(generator.parent_suggestions(&sample()).await.is_err());
    }

    #[test]
    fn digest_lists_topics_and_activities_in_order() {
        assert_eq!(
            conversation_digest(&sample()),
            "The child, initially excited, discussed school, cricket. Activities included cricket, I Spy."
        );
    }

    #[test]
    fn digest_notes_waning_engagement() {
        let transcript = Transcript::from_exchanges(vec![Exchange::new(
            "this is boring, I'm tired",
            "Let's try something else.",
        )]);
        assert_eq!(
            conversation_digest(&transcript),
            "The child. The child's enthusiasm appeared to decrease as the conversation progressed."
        );
        assert_eq!(conversation_digest(&Transcript::new()), "The child.");
    }
}
