//! Fuses per-frame real/artificial probabilities with a keyword heuristic
//! into a single verdict. Six ordered rules, first match wins (spec.md 4.2).

use crate::heuristics;
use crate::models::{Label, Verdict, VerdictFeatures, VoteShare};

/// Per-frame probability pair as returned by the classifier.
#[derive(Debug, Clone, Copy)]
pub struct FrameVote {
    pub real: f64,
    pub artificial: f64,
}

fn fraction_at_least(sorted_desc: &[f64], threshold: f64, total: usize) -> (usize, f64) {
    let count = sorted_desc.iter().filter(|&&v| v >= threshold).count();
    let frac = if total == 0 { 0.0 } else { count as f64 / total as f64 };
    (count, frac)
}

fn top_n_mean(sorted_desc: &[f64], n: usize) -> f64 {
    if sorted_desc.is_empty() {
        return 0.0;
    }
    let take = n.min(sorted_desc.len());
    sorted_desc[..take].iter().sum::<f64>() / take as f64
}

fn nth_highest(sorted_desc: &[f64], n: usize) -> f64 {
    if sorted_desc.is_empty() {
        return 0.0;
    }
    let idx = n.saturating_sub(1).min(sorted_desc.len() - 1);
    sorted_desc[idx]
}

fn compute_features(votes: &[FrameVote], has_ai_keywords: bool) -> (VerdictFeatures, Vec<f64>) {
    let total = votes.len();
    let real_votes = votes.iter().filter(|v| v.real >= v.artificial).count();
    let artificial_votes = total - real_votes;

    let mut artificial_sorted: Vec<f64> = votes.iter().map(|v| v.artificial).collect();
    artificial_sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let max_artificial = artificial_sorted.first().copied().unwrap_or(0.0);
    let top3_mean_artificial = top_n_mean(&artificial_sorted, 3);

    let (count_a80, frac_a80) = fraction_at_least(&artificial_sorted, 0.80, total);
    let (count_a90, frac_a90) = fraction_at_least(&artificial_sorted, 0.90, total);
    let (count_a95, frac_a95) = fraction_at_least(&artificial_sorted, 0.95, total);

    let features = VerdictFeatures {
        total_frames: total,
        real_votes,
        artificial_votes,
        max_artificial,
        top3_mean_artificial,
        frac_a80,
        frac_a90,
        frac_a95,
        count_a80,
        count_a90,
        count_a95,
        has_ai_keywords,
    };

    (features, artificial_sorted)
}

fn vote_share(features: &VerdictFeatures) -> VoteShare {
    if features.total_frames == 0 {
        return VoteShare::default();
    }
    let total = features.total_frames as f64;
    VoteShare {
        real: features.real_votes as f64 / total,
        artificial: features.artificial_votes as f64 / total,
    }
}

/// Aggregate per-frame probabilities and optional title/channel text into a
/// verdict. Infallible given well-formed input, per spec.md 4.3 step 4.
pub fn aggregate(votes: &[FrameVote], title: Option<&str>, channel: Option<&str>) -> Verdict {
    let has_ai_keywords = heuristics::has_ai_keywords(title, channel);
    let (features, artificial_sorted) = compute_features(votes, has_ai_keywords);
    let share = vote_share(&features);

    // Rule 1: too few frames.
    if features.total_frames < 4 {
        return Verdict {
            label: Label::Verified,
            confidence: 0.5,
            reason: "too_few_frames_default_real".to_string(),
            vote_share: share,
            features,
        };
    }

    let lowest_of_top5 = nth_highest(&artificial_sorted, 5);

    // Rule 2: strong artificial, with keywords.
    if has_ai_keywords
        && (features.frac_a95 >= 0.35
            || (features.count_a90 >= 4 && features.top3_mean_artificial >= 0.94)
            || features.frac_a90 >= 0.5)
    {
        return Verdict {
            label: Label::AiDetected,
            confidence: features.max_artificial,
            reason: "strong_artificial_with_keywords".to_string(),
            vote_share: share,
            features,
        };
    }

    // Rule 3: very strong artificial, no keywords.
    if !has_ai_keywords
        && (features.frac_a95 >= 0.6
            || (features.count_a95 >= 6 && features.top3_mean_artificial >= 0.97)
            || (features.frac_a90 >= 0.75 && lowest_of_top5 >= 0.93))
    {
        return Verdict {
            label: Label::AiDetected,
            confidence: features.max_artificial,
            reason: "very_strong_artificial_no_keywords".to_string(),
            vote_share: share,
            features,
        };
    }

    // Rule 4: suspicious, with keywords.
    if has_ai_keywords
        && (features.count_a90 >= 1 || features.frac_a80 >= 0.20 || features.max_artificial >= 0.85)
    {
        return Verdict {
            label: Label::Suspicious,
            confidence: features.max_artificial,
            reason: "suspicious_with_keywords".to_string(),
            vote_share: share,
            features,
        };
    }

    // Rule 5: suspicious, no keywords.
    if !has_ai_keywords
        && ((3..=5).contains(&features.count_a90) && features.top3_mean_artificial >= 0.93
            || (0.30..=0.60).contains(&features.frac_a90) && features.max_artificial >= 0.92
            || (features.frac_a80 >= 0.40 && features.top3_mean_artificial >= 0.90))
    {
        return Verdict {
            label: Label::Suspicious,
            confidence: features.max_artificial,
            reason: "suspicious_no_keywords".to_string(),
            vote_share: share,
            features,
        };
    }

    // Rule 6: default.
    Verdict {
        label: Label::Verified,
        confidence: (1.0 - features.max_artificial).max(0.6),
        reason: "default_real".to_string(),
        vote_share: share,
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(n: usize, artificial: f64) -> Vec<FrameVote> {
        (0..n)
            .map(|_| FrameVote { real: 1.0 - artificial, artificial })
            .collect()
    }

    #[test]
    fn strong_ai_with_keyword() {
        let v = votes(16, 0.97);
        let verdict = aggregate(&v, Some("AI generated deepfake demo"), Some("synthlab"));
        assert_eq!(verdict.label, Label::AiDetected);
        assert!((verdict.confidence - 0.97).abs() < 1e-9);
        assert_eq!(verdict.vote_share.artificial, 1.0);
    }

    #[test]
    fn default_real() {
        let v = votes(16, 0.2);
        let verdict = aggregate(&v, None, None);
        assert_eq!(verdict.label, Label::Verified);
        assert!((verdict.confidence - 0.8).abs() < 1e-9);
        assert_eq!(verdict.reason, "default_real");
    }

    #[test]
    fn suspicious_no_keyword() {
        let mut v = votes(4, 0.95);
        v.extend(votes(12, 0.4));
        let verdict = aggregate(&v, None, None);
        assert_eq!(verdict.label, Label::Suspicious);
    }

    #[test]
    fn too_few_frames() {
        let v = votes(3, 0.99);
        let verdict = aggregate(&v, None, None);
        assert_eq!(verdict.label, Label::Verified);
        assert_eq!(verdict.confidence, 0.5);
        assert_eq!(verdict.reason, "too_few_frames_default_real");
    }

    proptest::proptest! {
        #[test]
        fn always_yields_valid_label_and_confidence(
            scores in proptest::collection::vec(0.0f64..=1.0, 0..30)
        ) {
            let v: Vec<FrameVote> = scores.iter().map(|&a| FrameVote { real: 1.0 - a, artificial: a }).collect();
            let verdict = aggregate(&v, None, None);
            proptest::prop_assert!(verdict.confidence >= 0.0 && verdict.confidence <= 1.0);
            proptest::prop_assert!(matches!(verdict.label, Label::Verified | Label::Suspicious | Label::AiDetected));
        }

        #[test]
        fn vote_share_sums_to_one(
            scores in proptest::collection::vec(0.0f64..=1.0, 1..30)
        ) {
            let v: Vec<FrameVote> = scores.iter().map(|&a| FrameVote { real: 1.0 - a, artificial: a }).collect();
            let verdict = aggregate(&v, None, None);
            let sum = verdict.vote_share.real + verdict.vote_share.artificial;
            proptest::prop_assert!((sum - 1.0).abs() < 1e-9);
        }

        #[test]
        fn under_four_frames_is_always_default_real(
            scores in proptest::collection::vec(0.0f64..=1.0, 0..4)
        ) {
            let v: Vec<FrameVote> = scores.iter().map(|&a| FrameVote { real: 1.0 - a, artificial: a }).collect();
            let verdict = aggregate(&v, Some("deepfake"), None);
            proptest::prop_assert_eq!(verdict.label, Label::Verified);
            proptest::prop_assert_eq!(verdict.confidence, 0.5);
        }
    }
}
