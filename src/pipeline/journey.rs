/// Journey request and the journey shape the model must produce.
///
/// Model output is parsed leniently (numbers where strings are expected, plain
/// strings where bilingual objects are expected) and then checked: every task
/// needs a `day` of the form "N" or "N-M". `total_days` is clamped to 1..=60.

use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::llm::LlmError;

pub const MIN_TOTAL_DAYS: u32 = 1;
pub const MAX_TOTAL_DAYS: u32 = 60;

pub const TASK_TYPES: [&str; 11] = [
    "reflection", "sadaqah", "praying", "gratitude", "dhikr", "quran",
    "habit_break", "action", "kindness", "self_care", "physical_act",
];

pub const TASK_TIMES: [&str; 6] = ["morning", "afternoon", "evening", "night", "before_sleep", "anytime"];

fn default_language() -> String {
    "id".to_string()
}

/// A journey generation request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JourneyRequest {
    /// The user's goal or question, 10-500 characters (required)
    pub prompt: String,
    /// Caller's user identifier (optional)
    #[serde(default)]
    pub user_id: Option<String>,
    /// Caller's session identifier for tracing (optional)
    #[serde(default)]
    pub session_id: Option<String>,
    /// Response language: "id" or "en" (default: "id")
    #[serde(default = "default_language")]
    pub language: String,
    /// LLM provider to use: "gemini", "openai" or "ollama" (default: configured provider)
    #[serde(default)]
    pub provider: Option<String>,
}

impl JourneyRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        JourneyRequest {
            prompt: prompt.into(),
            user_id: None,
            session_id: None,
            language: default_language(),
            provider: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Text in Indonesian and English. A plain string fills both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BilingualRepr")]
pub struct BilingualText {
    pub id: String,
    pub en: String,
}

impl BilingualText {
    pub fn new(id: impl Into<String>, en: impl Into<String>) -> Self {
        BilingualText { id: id.into(), en: en.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BilingualRepr {
    Plain(String),
    Pair {
        #[serde(default)]
        id: String,
        #[serde(default)]
        en: String,
    },
}

impl From<BilingualRepr> for BilingualText {
    fn from(repr: BilingualRepr) -> Self {
        match repr {
            BilingualRepr::Plain(text) => BilingualText { id: text.clone(), en: text },
            BilingualRepr::Pair { id, en } => BilingualText { id, en },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyTask {
    /// "3" for a single day, "1-30" for a recurring task
    #[serde(deserialize_with = "string_or_number")]
    pub day: String,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub title: BilingualText,
    #[serde(default)]
    pub description: BilingualText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse: Option<Verse>,
}

impl JourneyTask {
    /// Task used when the model returns no tasks at all.
    pub fn default_reflection() -> Self {
        JourneyTask {
            day: "1".to_string(),
            task_type: "reflection".to_string(),
            time: "morning".to_string(),
            title: BilingualText::new("Refleksi Spiritual", "Spiritual Reflection"),
            description: BilingualText::new(
                "Luangkan waktu untuk merefleksikan perjalanan spiritual Anda.",
                "Take time to reflect on your spiritual journey.",
            ),
            verse: None,
        }
    }

    /// First and last day covered by this task.
    pub fn day_range(&self) -> Option<(u32, u32)> {
        parse_day_range(&self.day)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    #[serde(default)]
    pub goal: String,
    #[serde(default, deserialize_with = "lenient_days")]
    pub total_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub introduction: BilingualText,
    #[serde(default)]
    pub goal_keyword: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub journey: Vec<JourneyTask>,
}

impl Journey {
    /// Parse and check model output, then normalize it.
    pub fn from_value(value: Value) -> Result<Journey, LlmError> {
        if !value.is_object() {
            return Err(LlmError::InvalidResponse("Journey must be a JSON object".to_string()));
        }
        let journey: Journey = serde_json::from_value(value)
            .map_err(|e| LlmError::InvalidResponse(format!("Journey shape mismatch: {}", e)))?;

        for (index, task) in journey.journey.iter().enumerate() {
            if task.day_range().is_none() {
                return Err(LlmError::InvalidResponse(format!(
                    "Task {} has invalid day '{}', expected \"N\" or \"N-M\"",
                    index, task.day
                )));
            }
        }

        Ok(journey.normalize())
    }

    /// Fill in the default task and keep `total_days` within bounds.
    pub fn normalize(mut self) -> Journey {
        if self.journey.is_empty() {
            tracing::warn!("No journey tasks generated, adding default task");
            self.journey = vec![JourneyTask::default_reflection()];
            self.total_days = 1;
            return self;
        }

        if self.total_days == 0 {
            self.total_days = self
                .journey
                .iter()
                .filter_map(|t| t.day_range().map(|(_, end)| end))
                .max()
                .unwrap_or(MIN_TOTAL_DAYS);
        }
        self.total_days = self.total_days.clamp(MIN_TOTAL_DAYS, MAX_TOTAL_DAYS);

        for task in &self.journey {
            if !TASK_TYPES.contains(&task.task_type.as_str()) {
                tracing::warn!(day = %task.day, task_type = %task.task_type, "Unknown task type");
            }
            if !is_known_time(&task.time) {
                tracing::warn!(day = %task.day, time = %task.time, "Unknown task time");
            }
        }
        self
    }
}

/// "N" or "N-M" with 1 <= N <= M.
pub fn parse_day_range(day: &str) -> Option<(u32, u32)> {
    let day = day.trim();
    let (start, end) = match day.split_once('-') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => (day, day),
    };
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(start) || !all_digits(end) {
        return None;
    }
    let start: u32 = start.parse().ok()?;
    let end: u32 = end.parse().ok()?;
    (start >= 1 && end >= start).then_some((start, end))
}

/// Named time of day or an exact "at-HH:mm".
pub fn is_known_time(time: &str) -> bool {
    if TASK_TIMES.contains(&time) {
        return true;
    }
    let Some(clock) = time.strip_prefix("at-") else {
        return false;
    };
    match clock.split_once(':') {
        Some((h, m)) if h.len() == 2 && m.len() == 2 => {
            matches!((h.parse::<u32>(), m.parse::<u32>()), (Ok(h), Ok(m)) if h < 24 && m < 60)
        }
        _ => false,
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

fn lenient_days<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let days = match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    };
    Ok(days.min(u32::MAX as u64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "goal": "Pray tahajjud regularly",
            "total_days": 14,
            "introduction": {"id": "Mari mulai", "en": "Let's begin"},
            "goal_keyword": "tahajjud-habit",
            "tags": ["prayer", "night", "discipline"],
            "journey": [
                {
                    "day": "1-14",
                    "type": "praying",
                    "time": "at-03:30",
                    "title": {"id": "Tahajud", "en": "Night prayer"},
                    "description": {"id": "Bangun malam", "en": "Wake up at night"},
                    "verse": {"ar": "وَمِنَ اللَّيْلِ", "en": "And from the night"}
                },
                {
                    "day": 7,
                    "type": "reflection",
                    "time": "evening",
                    "title": "Weekly review",
                    "description": {"en": "Look back"}
                }
            ]
        })
    }

    #[test]
    fn test_parses_lenient_fields() {
        let journey = Journey::from_value(sample()).unwrap();
        assert_eq!(journey.total_days, 14);
        assert_eq!(journey.journey.len(), 2);
        assert_eq!(journey.journey[1].day, "7");
        assert_eq!(journey.journey[1].title, BilingualText::new("Weekly review", "Weekly review"));
        assert_eq!(journey.journey[1].description.id, "");
        assert_eq!(journey.journey[0].verse.as_ref().and_then(|v| v.en.as_deref()), Some("And from the night"));
    }

    #[test]
    fn test_serializes_type_field() {
        let journey = Journey::from_value(sample()).unwrap();
        let value = serde_json::to_value(&journey).unwrap();
        assert_eq!(value["journey"][0]["type"], "praying");
        assert!(value["journey"][1].get("verse").is_none());
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_empty_journey_gets_default_task() {
        let journey = Journey::from_value(json!({"goal": "x", "total_days": 30, "journey": []})).unwrap();
        assert_eq!(journey.total_days, 1);
        assert_eq!(journey.journey, vec![JourneyTask::default_reflection()]);
        assert_eq!(journey.journey[0].title.en, "Spiritual Reflection");
    }

    #[test]
    fn test_total_days_clamped_and_inferred() {
        let mut value = sample();
        value["total_days"] = json!(90);
        assert_eq!(Journey::from_value(value).unwrap().total_days, 60);

        let mut value = sample();
        value["total_days"] = json!("0");
        assert_eq!(Journey::from_value(value).unwrap().total_days, 14);

        let mut value = sample();
        value.as_object_mut().unwrap().remove("total_days");
        assert_eq!(Journey::from_value(value).unwrap().total_days, 14);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(matches!(Journey::from_value(json!([1, 2])), Err(LlmError::InvalidResponse(_))));

        let mut value = sample();
        value["journey"][0]["day"] = json!("week one");
        assert!(matches!(Journey::from_value(value), Err(LlmError::InvalidResponse(_))));

        let mut value = sample();
        value["journey"] = json!("not a list");
        assert!(Journey::from_value(value).is_err());
    }

    #[test]
    fn test_parse_day_range() {
        assert_eq!(parse_day_range("3"), Some((3, 3)));
        assert_eq!(parse_day_range("1-30"), Some((1, 30)));
        assert_eq!(parse_day_range("0"), None);
        assert_eq!(parse_day_range("5-2"), None);
        assert_eq!(parse_day_range("-3"), None);
        assert_eq!(parse_day_range("1-"), None);
    }

    #[test]
    fn test_known_times() {
        assert!(is_known_time("before_sleep"));
        assert!(is_known_time("at-05:30"));
        assert!(!is_known_time("at-25:00"));
        assert!(!is_known_time("at-5:30"));
        assert!(!is_known_time("noonish"));
    }

    #[test]
    fn test_request_defaults() {
        let request: JourneyRequest = serde_json::from_value(json!({"prompt": "I want to pray more"})).unwrap();
        assert_eq!(request.language, "id");
        assert!(request.provider.is_none());
    }
}
