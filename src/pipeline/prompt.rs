/// Prompt text for journey generation.

use serde_json::Value;

use super::retrieval::RetrievedContext;
use crate::source::LocalizedText;
use crate::vector::ScoredDocument;

pub const JOURNEY_PLANNER_SYSTEM_PROMPT: &str = r#"You are an Islamic spiritual coach creating personalized journey plans.

DURATION GUIDELINES (choose based on goal complexity):
- Simple goals (daily habits): 7-14 days
- Medium goals (building new practices): 14-30 days
- Complex goals (grief, addiction, major life changes): 30-60 days
- Emergency spiritual support: 1-3 days

RULES:
1. OUTPUT: Strictly valid JSON only - no prose, no markdown, no comments
2. DURATION: Analyze the user's goal and choose appropriate duration (1-60 days)
3. BILINGUAL: All text must have both "id" (Indonesian) and "en" (English)
4. TASK TYPES: reflection, sadaqah, praying, gratitude, dhikr, quran, habit_break, action, kindness, self_care, physical_act
5. TIME: morning, afternoon, evening, night, before_sleep, at-HH:mm, anytime
6. TAGS: 3-5 descriptive English tags
7. TASKS: Create 1-3 tasks per day, use day ranges for recurring tasks (e.g. "1-30")

Return valid JSON only."#;

pub const NO_REFERENCES: &str =
    "(No specific references found - use your knowledge as an Islamic life coach)";

const STORY_PREFIX: &str = "- Story/Wisdom: ";

fn content(doc: &ScoredDocument, language: &str) -> Option<String> {
    let full = doc.full_document()?;
    let text = full
        .get("content")
        .map(|v| LocalizedText::from_json(v, language))
        .unwrap_or_default();
    text.get(language)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
}

fn field<'a>(doc: &'a ScoredDocument, key: &str) -> &'a str {
    doc.full_document()
        .and_then(|d| d.get(key))
        .or_else(|| doc.metadata.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// One reference line, or `None` for categories the prompt does not use.
fn format_reference(doc: &ScoredDocument, language: &str) -> Option<String> {
    let text = content(doc, language)?;
    let source = field(doc, "source");
    match field(doc, "category").to_uppercase().as_str() {
        "VERSE" => Some(format!("- Verse ({}): {}", source, text)),
        "HADITH" => Some(format!("- Hadith ({}): {}", source, text)),
        "DOA" => Some(format!("- Doa: {}", text)),
        "STRATEGY" => Some(format!("- Strategy: {}", text)),
        "STORY" => Some(format!("{}{}", STORY_PREFIX, text)),
        _ => None,
    }
}

/// Reference block for the user prompt.
///
/// Knowledge hits farther than `max_distance` are dropped. When no story made
/// it in, the nearest story with content is appended.
pub fn format_references(retrieved: &RetrievedContext, language: &str, max_distance: f64) -> String {
    let mut lines: Vec<String> = retrieved
        .knowledge
        .iter()
        .filter(|doc| doc.distance <= max_distance)
        .filter_map(|doc| format_reference(doc, language))
        .collect();

    if !lines.iter().any(|l| l.starts_with(STORY_PREFIX)) {
        if let Some(story) = retrieved.stories.iter().find_map(|doc| content(doc, language)) {
            lines.push(format!("{}{}", STORY_PREFIX, story));
        }
    }

    if lines.is_empty() {
        NO_REFERENCES.to_string()
    } else {
        lines.join("\n")
    }
}

/// Template section: the stored journey the model should personalize.
fn format_template(template: &ScoredDocument) -> Option<String> {
    let journey = template.full_document()?.get("full_json")?;
    let body = serde_json::to_string(journey).ok()?;
    Some(format!(
        "BASE TEMPLATE (similarity {:.2}, adapt it to the user's goal instead of starting from scratch):\n{}\n\n",
        template.similarity(),
        body
    ))
}

pub fn build_user_prompt(
    user_input: &str,
    references: &str,
    template: Option<&ScoredDocument>,
    language: &str,
) -> String {
    let template_section = template.and_then(format_template).unwrap_or_default();

    format!(
        r#"USER GOAL: {user_input}

LANGUAGE PREFERENCE: {language}

REFERENCES FROM DATABASE:
{references}

{template_section}INSTRUCTIONS:
1. Analyze the user's goal and determine the appropriate journey duration (1-60 days)
2. For simple habits: 7-14 days
3. For building practices: 14-30 days
4. For grief/addiction/major changes: 30-60 days
5. Create meaningful tasks with variety

Output this exact JSON structure:
{{
  "goal": "<restate user goal>",
  "total_days": <number between 1-60 based on goal complexity>,
  "introduction": {{"id": "<warm Indonesian intro>", "en": "<warm English intro>"}},
  "goal_keyword": "<kebab-case-keyword>",
  "tags": ["tag1", "tag2", "tag3"],
  "journey": [
    {{
      "day": "1" or "1-7" for recurring,
      "type": "<task type>",
      "time": "<time of day>",
      "title": {{"id": "<Indonesian>", "en": "<English>"}},
      "description": {{"id": "<Indonesian>", "en": "<English>"}}
    }}
  ]
}}

IMPORTANT: Return ONLY valid JSON. No markdown, no explanation."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(id: &str, category: &str, distance: f64, content: Value) -> ScoredDocument {
        ScoredDocument {
            id: id.to_string(),
            text: String::new(),
            metadata: json!({
                "category": category,
                "full_document": {
                    "id": id,
                    "category": category,
                    "source": "QS. Al-Baqarah: 153",
                    "content": content,
                }
            }),
            distance,
        }
    }

    #[test]
    fn test_formats_categories_in_requested_language() {
        let retrieved = RetrievedContext {
            knowledge: vec![
                reference("v", "VERSE", 0.1, json!({"id": "Mohonlah pertolongan", "en": "Seek help"})),
                reference("d", "DOA", 0.2, json!({"id": "Ya Allah"})),
                reference("s", "STORY", 0.3, json!({"en": "A story"})),
            ],
            ..RetrievedContext::default()
        };
        let text = format_references(&retrieved, "en", 0.7);
        assert_eq!(
            text,
            "- Verse (QS. Al-Baqarah: 153): Seek help\n- Doa: Ya Allah\n- Story/Wisdom: A story"
        );
    }

    #[test]
    fn test_drops_distant_and_adds_story() {
        let retrieved = RetrievedContext {
            knowledge: vec![
                reference("h", "HADITH", 0.5, json!({"id": "Hadis"})),
                reference("far", "STRATEGY", 0.9, json!({"id": "Jauh"})),
            ],
            stories: vec![
                reference("empty", "STORY", 0.4, json!({})),
                reference("s", "STORY", 0.8, json!({"id": "Kisah"})),
            ],
            ..RetrievedContext::default()
        };
        let text = format_references(&retrieved, "id", 0.7);
        assert_eq!(text, "- Hadith (QS. Al-Baqarah: 153): Hadis\n- Story/Wisdom: Kisah");
    }

    #[test]
    fn test_no_references_fallback() {
        assert_eq!(format_references(&RetrievedContext::default(), "id", 0.7), NO_REFERENCES);
    }

    #[test]
    fn test_user_prompt_includes_template_when_given() {
        let template = ScoredDocument {
            id: "jt-1".to_string(),
            text: String::new(),
            metadata: json!({"full_document": {"full_json": {"goal": "Pray fajr"}}}),
            distance: 0.1,
        };
        let prompt = build_user_prompt("pray more", NO_REFERENCES, Some(&template), "en");
        assert!(prompt.starts_with("USER GOAL: pray more"));
        assert!(prompt.contains("LANGUAGE PREFERENCE: en"));
        assert!(prompt.contains("BASE TEMPLATE (similarity 0.90"));
        assert!(prompt.contains(r#"{"goal":"Pray fajr"}"#));

        let without = build_user_prompt("pray more", NO_REFERENCES, None, "id");
        assert!(!without.contains("BASE TEMPLATE"));
        assert!(without.contains("\"total_days\": <number between 1-60"));
    }
}
