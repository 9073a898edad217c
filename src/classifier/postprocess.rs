use super::{Category, ClassifierOptions, RawScores, ScoreActivation};

/// Turns raw model output into labelled categories: highest score first,
/// nothing under the threshold, at most `max_results` entries.
pub fn rank(raw: RawScores, options: &ClassifierOptions) -> Vec<Category> {
    let mut scores = match raw {
        RawScores::F32(scores) => scores,
        RawScores::U8(scores) => scores.into_iter().map(|s| f32::from(s) / 255.0).collect(),
    };

    if options.score_activation == ScoreActivation::Softmax {
        softmax(&mut scores);
    }

    let mut categories: Vec<Category> = scores
        .into_iter()
        .enumerate()
        .map(|(index, score)| (index, if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }))
        .filter(|&(_, score)| score >= options.score_threshold)
        .map(|(index, score)| Category {
            index,
            label: options.label_for(index),
            score,
        })
        .collect();

    categories.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    categories.truncate(options.max_results);
    categories
}

fn softmax(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        sum += *s;
    }
    if sum > 0.0 {
        for s in scores.iter_mut() {
            *s /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ClassifierOptions {
        ClassifierOptions {
            labels: vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            ..ClassifierOptions::default()
        }
    }

    #[test]
    fn sorts_descending_and_caps_at_max_results() {
        let ranked = rank(RawScores::F32(vec![0.2, 0.5, 0.15, 0.9, 0.3]), &options());
        let labels: Vec<_> = ranked.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["d", "b", "e"]);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn drops_scores_below_threshold() {
        let opts = ClassifierOptions {
            score_threshold: 0.25,
            ..options()
        };
        let ranked = rank(RawScores::F32(vec![0.24, 0.25, 0.1, 0.4]), &opts);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|c| c.score >= 0.25));
    }

    #[test]
    fn everything_below_threshold_yields_nothing() {
        assert!(rank(RawScores::F32(vec![0.01, 0.02]), &options()).is_empty());
    }

    #[test]
    fn quantized_scores_are_rescaled() {
        let ranked = rank(RawScores::U8(vec![255, 0, 51]), &options());
        assert_eq!(ranked[0].score, 1.0);
        assert!((ranked[1].score - 0.2).abs() < 1e-6);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let ranked = rank(RawScores::F32(vec![1.7, f32::NAN, 0.5]), &options());
        assert!(ranked.iter().all(|c| (0.0..=1.0).contains(&c.score)));
        assert_eq!(ranked[0].index, 0);
    }

    #[test]
    fn softmax_turns_logits_into_probabilities() {
        let opts = ClassifierOptions {
            score_activation: ScoreActivation::Softmax,
            score_threshold: 0.0,
            ..options()
        };
        let ranked = rank(RawScores::F32(vec![2.0, 1.0]), &opts);
        let total: f32 = ranked.iter().map(|c| c.score).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(ranked[0].label, "a");
    }

    #[test]
    fn ties_keep_model_order() {
        let ranked = rank(RawScores::F32(vec![0.5, 0.5]), &options());
        assert_eq!(ranked[0].index, 0);
        assert_eq!(ranked[1].index, 1);
    }
}
