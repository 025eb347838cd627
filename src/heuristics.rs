//! Keyword heuristics: a case-insensitive substring scan of title/channel
//! text, independent of the per-frame classifier.

pub const AI_KEYWORDS: &[&str] = &[
    "ai generated",
    "ai-generated",
    "deepfake",
    "deep fake",
    "synthetic",
    "neural network",
    "midjourney",
    "stable diffusion",
    "sora",
    "runway ml",
    "generated with ai",
    "made with ai",
];

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicVerdict {
    pub result: &'static str,
    pub confidence: f64,
    pub reason: String,
}

/// Scan `title + " " + channel` for any keyword in `AI_KEYWORDS`.
pub fn scan(title: Option<&str>, channel: Option<&str>) -> HeuristicVerdict {
    let haystack = format!(
        "{} {}",
        title.unwrap_or_default(),
        channel.unwrap_or_default()
    )
    .to_lowercase();

    for keyword in AI_KEYWORDS {
        if haystack.contains(keyword) {
            return HeuristicVerdict {
                result: "ai-detected",
                confidence: 0.7,
                reason: format!("keyword_match: {keyword}"),
            };
        }
    }

    HeuristicVerdict {
        result: "verified",
        confidence: 0.3,
        reason: "no_keywords".to_string(),
    }
}

pub fn has_ai_keywords(title: Option<&str>, channel: Option<&str>) -> bool {
    scan(title, channel).result == "ai-detected"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        let verdict = scan(Some("This is a DEEPFAKE video"), None);
        assert_eq!(verdict.result, "ai-detected");
    }

    #[test]
    fn no_match_returns_verified() {
        let verdict = scan(Some("my cat is so funny"), Some("cat channel"));
        assert_eq!(verdict.result, "verified");
        assert_eq!(verdict.confidence, 0.3);
    }

    #[test]
    fn tolerates_non_ascii_text() {
        let verdict = scan(Some("café vidéo deepfake été"), None);
        assert_eq!(verdict.result, "ai-detected");
    }
}
