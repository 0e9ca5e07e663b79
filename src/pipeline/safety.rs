/// Layer 3: safety and ethical guardrails.
///
/// Crisis language is checked first so a user in distress always gets the
/// hotline, even when the text also matches another category.

use async_trait::async_trait;
use regex::Regex;

use super::{LayerOutcome, PipelineContext, PipelineLayer};
use crate::errors::{ErrorCode, HalaError, Rejection};

const CRISIS_PATTERNS: &[&str] = &[
    r"\b(bunuh\s*diri|suicide|kill\s*myself|end\s*my\s*life)\b",
    r"\b(mau\s*mati|want\s*to\s*die|ingin\s*mati)\b",
    r"\b(self[\s-]*harm|melukai\s*diri)\b",
    r"\b(tidak\s*ada\s*harapan|no\s*hope|hopeless)\b",
    r"\b(lebih\s*baik\s*mati|better\s*off\s*dead)\b",
];

const VIOLENCE_PATTERNS: &[&str] = &[
    r"\b(kill|murder|membunuh|bunuh)\s+(someone|orang|people)\b",
    r"\b(harm|hurt|menyakiti)\s+(others|orang\s*lain)\b",
    r"\b(terrorism|teroris|jihad\s*qital)\b",
    r"\b(weapons|senjata|bomb|bom)\b",
];

const HARAM_PATTERNS: &[&str] = &[
    r"\b(gambling|judi|taruhan|bet|casino)\b",
    r"\b(alcohol|alkohol|miras|wine|beer|vodka|whiskey)\b",
    r"\b(riba|usury|interest\s*loan)\b",
    r"\b(zina|fornication|adultery|prostitut)\b",
    r"\b(drugs|narkoba|ganja|cocaine|heroin)\b",
    r"\b(lgbt|gay|lesbian|homosexual)\s*(relationship|marriage|nikah)\b",
    r"\b(black\s*magic|sihir|santet|dukun)\b",
];

pub const CRISIS_HOTLINE: &str = "119 ext 8 (Into The Light Indonesia)";
pub const CRISIS_WEBSITE: &str = "https://www.intothelightid.org/";

pub const CRISIS_DETECTED: &str = "CRISIS_DETECTED";
pub const VIOLENCE_DETECTED: &str = "VIOLENCE_DETECTED";
pub const HARAM_TOPIC_DETECTED: &str = "HARAM_TOPIC_DETECTED";

fn compile(patterns: &[&str]) -> Result<Regex, HalaError> {
    Regex::new(&format!("(?i){}", patterns.join("|")))
        .map_err(|e| HalaError::Internal(format!("Invalid safety pattern: {}", e)))
}

pub struct SafetyLayer {
    crisis: Regex,
    violence: Regex,
    haram: Regex,
}

impl SafetyLayer {
    pub fn new() -> Result<Self, HalaError> {
        Ok(SafetyLayer {
            crisis: compile(CRISIS_PATTERNS)?,
            violence: compile(VIOLENCE_PATTERNS)?,
            haram: compile(HARAM_PATTERNS)?,
        })
    }

    /// First matching category as (flag, rejection).
    pub fn check(&self, text: &str) -> Option<(&'static str, Rejection)> {
        if self.crisis.is_match(text) {
            return Some((
                CRISIS_DETECTED,
                Rejection::new(
                    ErrorCode::SafetyViolation,
                    format!(
                        "Jika kamu sedang dalam kesulitan, tolong hubungi bantuan profesional. Hotline: {}",
                        CRISIS_HOTLINE
                    ),
                    format!(
                        "If you're struggling, please reach out to professional help. Hotline: {}",
                        CRISIS_HOTLINE
                    ),
                    format!("Please contact: {} or visit {}", CRISIS_HOTLINE, CRISIS_WEBSITE),
                ),
            ));
        }

        if self.violence.is_match(text) {
            return Some((
                VIOLENCE_DETECTED,
                Rejection::new(
                    ErrorCode::SafetyViolation,
                    "Permintaan ini tidak dapat diproses karena mengandung konten kekerasan.",
                    "This request cannot be processed as it contains violent content.",
                    "Hala Journal is here to help with positive growth and spiritual guidance.",
                ),
            ));
        }

        if self.haram.is_match(text) {
            return Some((
                HARAM_TOPIC_DETECTED,
                Rejection::new(
                    ErrorCode::SafetyViolation,
                    "Maaf, topik ini bertentangan dengan nilai-nilai Islam yang kami anut.",
                    "Sorry, this topic conflicts with the Islamic values we uphold.",
                    "Try asking about halal alternatives or how to overcome such challenges.",
                ),
            ));
        }

        None
    }
}

#[async_trait]
impl PipelineLayer for SafetyLayer {
    fn name(&self) -> &'static str {
        "safety_guardrails"
    }

    fn order(&self) -> u8 {
        3
    }

    async fn process(&self, ctx: &mut PipelineContext) -> LayerOutcome {
        match self.check(&ctx.processed_input) {
            Some((flag, rejection)) => {
                ctx.safety_flags.push(flag.to_string());
                if flag == CRISIS_DETECTED {
                    tracing::warn!(request_id = %ctx.request_id, "Crisis language detected");
                }
                LayerOutcome::Rejected(rejection)
            }
            None => LayerOutcome::Passed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(text: &str) -> Option<&'static str> {
        SafetyLayer::new().unwrap().check(text).map(|(f, _)| f)
    }

    #[test]
    fn test_crisis_patterns() {
        assert_eq!(flag("Saya merasa ingin bunuh diri"), Some(CRISIS_DETECTED));
        assert_eq!(flag("I feel hopeless every day"), Some(CRISIS_DETECTED));
        assert_eq!(flag("thinking about self-harm again"), Some(CRISIS_DETECTED));
        assert_eq!(flag("I'd be better off dead"), Some(CRISIS_DETECTED));
    }

    #[test]
    fn test_crisis_rejection_carries_hotline() {
        let (_, rejection) = SafetyLayer::new().unwrap().check("I WANT TO DIE").unwrap();
        assert_eq!(rejection.code, ErrorCode::SafetyViolation);
        assert!(rejection.message.id.ends_with("Hotline: 119 ext 8 (Into The Light Indonesia)"));
        assert!(rejection.message.en.starts_with("If you're struggling"));
        assert_eq!(
            rejection.suggested_action.as_deref(),
            Some("Please contact: 119 ext 8 (Into The Light Indonesia) or visit https://www.intothelightid.org/")
        );
    }

    #[test]
    fn test_crisis_wins_over_violence() {
        assert_eq!(flag("I want to kill myself and kill someone"), Some(CRISIS_DETECTED));
    }

    #[test]
    fn test_violence_patterns() {
        assert_eq!(flag("how to hurt others without being caught"), Some(VIOLENCE_DETECTED));
        assert_eq!(flag("cara membuat bom"), Some(VIOLENCE_DETECTED));
    }

    #[test]
    fn test_haram_patterns() {
        assert_eq!(flag("best casino strategy to win money"), Some(HARAM_TOPIC_DETECTED));
        assert_eq!(flag("belajar ilmu santet"), Some(HARAM_TOPIC_DETECTED));
    }

    #[test]
    fn test_word_boundaries() {
        // "better" and "bomb" fragments must not trigger
        assert_eq!(flag("I want to become a better Muslim"), None);
        assert_eq!(flag("Saya ingin membombardir diri dengan ilmu"), None);
        assert_eq!(flag("Saya ingin rajin sholat tahajud"), None);
    }

    #[tokio::test]
    async fn test_process_sets_flag() {
        let layer = SafetyLayer::new().unwrap();
        let mut ctx = PipelineContext::new("I want to die", "en");
        assert!(matches!(layer.process(&mut ctx).await, LayerOutcome::Rejected(_)));
        assert_eq!(ctx.safety_flags, vec![CRISIS_DETECTED]);

        let mut ctx = PipelineContext::new("Help me pray on time", "en");
        assert!(matches!(layer.process(&mut ctx).await, LayerOutcome::Passed));
        assert!(ctx.safety_flags.is_empty());
    }
}
