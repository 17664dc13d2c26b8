use std::sync::Arc;
use std::time::Duration;

use leadline_core::conversation::Instruction;
use tracing::warn;

use crate::llm::{LlmClient, LlmError};

pub const FALLBACK_TEXT: &str = "I'm having trouble right now, please try again";

pub const LITERAL_CLOSING: &str = "Thank you for your time! Your information has been received, \
     and a member of our team will be in touch shortly.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhrasingUnavailable {
    Timeout,
    Provider(String),
    EmptyOutput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhraseSource {
    Generated,
    /// No model configured; the question text is used as-is.
    Literal,
    Fallback(PhrasingUnavailable),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phrased {
    pub text: String,
    pub source: PhraseSource,
}

impl Phrased {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, PhraseSource::Fallback(_))
    }
}

pub fn system_prompt(company_name: &str) -> String {
    format!(
        "You are a friendly and professional AI assistant for a company called '{company_name}'.\n\
         Your role is to qualify new leads by asking a series of questions.\n\
         Be conversational, polite, and keep your responses concise.\n\
         Do not ask more than one question at a time.\n\
         Do not deviate from the script."
    )
}

/// Turns engine instructions into user-facing text.
///
/// Phrasing never fails: provider errors, timeouts and blank output all
/// collapse to [`FALLBACK_TEXT`].
#[derive(Clone)]
pub struct ResponsePhraser {
    llm: Option<Arc<dyn LlmClient>>,
    system_prompt: String,
    timeout: Duration,
}

impl ResponsePhraser {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, company_name: &str, timeout: Duration) -> Self {
        Self { llm, system_prompt: system_prompt(company_name), timeout }
    }

    pub fn literal(company_name: &str) -> Self {
        Self::new(None, company_name, Duration::from_secs(1))
    }

    pub fn has_model(&self) -> bool {
        self.llm.is_some()
    }

    pub async fn phrase(&self, instruction: &Instruction) -> Phrased {
        let Some(llm) = &self.llm else {
            let text = match instruction {
                Instruction::AskQuestion { question, .. } => question.clone(),
                Instruction::Close { .. } => LITERAL_CLOSING.to_string(),
            };
            return Phrased { text, source: PhraseSource::Literal };
        };

        let prompt = instruction.render_prompt();
        let outcome =
            tokio::time::timeout(self.timeout, llm.complete(&self.system_prompt, &prompt)).await;

        let reason = match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                return Phrased { text: text.trim().to_string(), source: PhraseSource::Generated };
            }
            Ok(Ok(_)) | Ok(Err(LlmError::EmptyResponse)) => PhrasingUnavailable::EmptyOutput,
            Ok(Err(error)) => PhrasingUnavailable::Provider(error.to_string()),
            Err(_) => PhrasingUnavailable::Timeout,
        };

        warn!(
            event_name = "llm.phrase.fallback",
            provider = llm.name(),
            reason = ?reason,
            "model phrasing unavailable, using fallback text"
        );
        Phrased { text: FALLBACK_TEXT.to_string(), source: PhraseSource::Fallback(reason) }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use leadline_core::conversation::Instruction;

    use super::{
        PhraseSource, PhrasingUnavailable, ResponsePhraser, FALLBACK_TEXT, LITERAL_CLOSING,
    };
    use crate::llm::{ScriptedLlm, ScriptedReply};

    fn ask() -> Instruction {
        Instruction::AskQuestion {
            previous_answer: "Ada".to_string(),
            question: "What is your budget for this project?".to_string(),
        }
    }

    fn phraser(llm: ScriptedLlm) -> (Arc<ScriptedLlm>, ResponsePhraser) {
        let llm = Arc::new(llm);
        let phraser =
            ResponsePhraser::new(Some(llm.clone()), "Innovate Inc.", Duration::from_millis(200));
        (llm, phraser)
    }

    #[tokio::test]
    async fn generated_text_is_trimmed_and_prompt_carries_persona() {
        let (llm, phraser) = phraser(ScriptedLlm::always("  Thanks Ada! What's your budget?\n"));

        let phrased = phraser.phrase(&ask()).await;

        assert_eq!(phrased.text, "Thanks Ada! What's your budget?");
        assert_eq!(phrased.source, PhraseSource::Generated);
        let (system, prompt) = llm.calls()[0].clone();
        assert!(system.contains("'Innovate Inc.'"));
        assert!(system.contains("Do not ask more than one question at a time."));
        assert!(prompt.contains("'What is your budget for this project?'"));
    }

    #[tokio::test]
    async fn provider_error_falls_back() {
        let (_, phraser) =
            phraser(ScriptedLlm::sequence(Vec::new(), ScriptedReply::Error("quota".to_string())));

        let phrased = phraser.phrase(&ask()).await;

        assert_eq!(phrased.text, FALLBACK_TEXT);
        assert!(matches!(
            phrased.source,
            PhraseSource::Fallback(PhrasingUnavailable::Provider(ref message)) if message.contains("quota")
        ));
    }

    #[tokio::test]
    async fn blank_output_falls_back() {
        let (_, phraser) = phraser(ScriptedLlm::always("   "));

        let phrased = phraser.phrase(&ask()).await;

        assert_eq!(phrased.source, PhraseSource::Fallback(PhrasingUnavailable::EmptyOutput));
        assert_eq!(phrased.text, FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn slow_model_times_out_to_fallback() {
        let (_, phraser) = phraser(ScriptedLlm::sequence(
            Vec::new(),
            ScriptedReply::Stall(Duration::from_secs(5)),
        ));

        let phrased = phraser.phrase(&ask()).await;

        assert_eq!(phrased.source, PhraseSource::Fallback(PhrasingUnavailable::Timeout));
        assert!(phrased.is_fallback());
    }

    #[tokio::test]
    async fn literal_phraser_returns_question_and_fixed_closing() {
        let phraser = ResponsePhraser::literal("Innovate Inc.");

        let asked = phraser.phrase(&ask()).await;
        let closed = phraser
            .phrase(&Instruction::Close { final_answer: "none".to_string(), summary: Vec::new() })
            .await;

        assert_eq!(asked.text, "What is your budget for this project?");
        assert_eq!(asked.source, PhraseSource::Literal);
        assert_eq!(closed.text, LITERAL_CLOSING);
    }
}
