//! Description hints passed to the synthesis service.

use serde::{Deserialize, Serialize};

use recut_models::MergedWindow;

const CLOTHING_ISSUES: &[&str] = &[
    "revealing_clothing",
    "partial_nudity",
    "nudity",
    "swimwear",
    "bikini",
    "lingerie",
    "bathing",
    "underwear",
    "shirtless",
];

const CONTACT_ISSUES: &[&str] = &[
    "kissing",
    "intimate_touching",
    "embracing",
    "sexual_activity",
    "bed_scene",
    "romantic",
];

const SETTING_KEYWORDS: &[&str] = &[
    "ship", "deck", "night", "evening", "stars", "ocean", "sea", "boat", "room", "bedroom",
    "living room", "office", "outdoor", "car", "restaurant", "beach", "pool", "day", "dark",
    "bright", "sunset", "water", "swimming",
];

const MAX_SETTING_HINTS: usize = 3;

const NEGATIVE_PROMPT: &[&str] = &[
    "kissing", "intimate", "sexual", "nudity", "embrace", "romantic", "touching", "sensual",
];

const CLOTHING_PROMPT: &str = "The people in the scene are wearing modest, fully covering \
clothing in casual everyday attire. They interact naturally, having a friendly conversation \
or going about their day. Family-friendly scene.";

const CONTACT_PROMPT: &str = "Two people share a brief, friendly fist bump and smile at each \
other. The interaction is casual and platonic, like good friends or colleagues. \
Family-friendly moment with no romantic or intimate behavior.";

const GENERIC_PROMPT: &str = "People in the scene interact in a friendly, appropriate manner. \
They are modestly dressed and behaving naturally. The scene is completely family-friendly.";

/// Which replacement the window calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementKind {
    Clothing,
    Contact,
    Generic,
}

impl ReplacementKind {
    /// Clothing issues win over contact issues when both are present.
    pub fn for_issues<'a>(issues: impl IntoIterator<Item = &'a String>) -> Self {
        let lowered: Vec<String> = issues.into_iter().map(|i| i.to_lowercase()).collect();
        let any_of = |set: &[&str]| lowered.iter().any(|i| set.contains(&i.as_str()));

        if any_of(CLOTHING_ISSUES) {
            ReplacementKind::Clothing
        } else if any_of(CONTACT_ISSUES) {
            ReplacementKind::Contact
        } else {
            ReplacementKind::Generic
        }
    }

    fn base_prompt(&self) -> &'static str {
        match self {
            ReplacementKind::Clothing => CLOTHING_PROMPT,
            ReplacementKind::Contact => CONTACT_PROMPT,
            ReplacementKind::Generic => GENERIC_PROMPT,
        }
    }
}

/// Prompt material for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionHints {
    pub kind: ReplacementKind,
    pub prompt: String,
    pub negative_prompt: Vec<String>,
    pub setting: Vec<String>,
}

impl DescriptionHints {
    pub fn for_window(window: &MergedWindow) -> Self {
        let kind = ReplacementKind::for_issues(&window.issues);
        let setting = window
            .description
            .as_deref()
            .map(setting_keywords)
            .unwrap_or_default();

        let prompt = if setting.is_empty() {
            kind.base_prompt().to_string()
        } else {
            format!("Scene setting: {}. {}", setting.join(", "), kind.base_prompt())
        };

        Self {
            kind,
            prompt,
            negative_prompt: NEGATIVE_PROMPT.iter().map(|s| s.to_string()).collect(),
            setting,
        }
    }
}

/// Setting keywords found in a scene description, in keyword order.
fn setting_keywords(description: &str) -> Vec<String> {
    let lowered = description.to_lowercase();
    SETTING_KEYWORDS
        .iter()
        .filter(|kw| lowered.contains(**kw))
        .take(MAX_SETTING_HINTS)
        .map(|kw| kw.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recut_models::ScoredSegment;

    fn window(issues: &[&str], description: Option<&str>) -> MergedWindow {
        let mut seg = ScoredSegment::new(0.0, 4.0)
            .unwrap()
            .with_issues(issues.iter().copied());
        if let Some(d) = description {
            seg = seg.with_description(d);
        }
        MergedWindow::from(&seg)
    }

    #[test]
    fn test_kind_by_issue() {
        assert_eq!(
            DescriptionHints::for_window(&window(&["Kissing"], None)).kind,
            ReplacementKind::Contact
        );
        assert_eq!(
            DescriptionHints::for_window(&window(&["kissing", "swimwear"], None)).kind,
            ReplacementKind::Clothing
        );
        assert_eq!(
            DescriptionHints::for_window(&window(&["violence"], None)).kind,
            ReplacementKind::Generic
        );
    }

    #[test]
    fn test_setting_prefix_takes_first_three_keywords() {
        let hints = DescriptionHints::for_window(&window(
            &["embracing"],
            Some("Couple on the ship deck at night under the stars"),
        ));
        assert_eq!(hints.setting, vec!["ship", "deck", "night"]);
        assert!(hints.prompt.starts_with("Scene setting: ship, deck, night. Two people"));
    }

    #[test]
    fn test_no_description_no_prefix() {
        let hints = DescriptionHints::for_window(&window(&[], None));
        assert_eq!(hints.prompt, GENERIC_PROMPT);
        assert!(hints.negative_prompt.contains(&"nudity".to_string()));
    }
}
