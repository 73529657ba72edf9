//! Comparison/scoring engine.
//!
//! Deterministic given its inputs: the only external data it reads is the
//! recording's persisted transcription and duration. Produces an
//! [`AnalysisResult`] whose overall score is the weighted sum
//! `round(0.4·pronunciation + 0.3·fluency + 0.2·timing + 0.1·clarity)`.

use chrono::Utc;

use crate::model::{
    AnalysisIssue, AnalysisResult, FactorScores, IssueSeverity, Recording, Transcript,
};

/// Everything the engine reads about one recording.
#[derive(Debug, Clone)]
pub struct ScoringInput {
    pub transcript: Option<Transcript>,
    /// Measured clip duration in seconds.
    pub duration_secs: f64,
    /// Expected reference window.
    pub sentence_start_time: f64,
    pub sentence_end_time: f64,
}

impl ScoringInput {
    pub fn from_recording(recording: &Recording) -> Self {
        let transcript = recording.transcription.as_ref().map(|text| Transcript {
            text: text.clone(),
            confidence: recording.transcription_confidence.unwrap_or(0.0),
        });
        ScoringInput {
            transcript,
            duration_secs: recording
                .duration_secs
                .unwrap_or_else(|| recording.expected_duration()),
            sentence_start_time: recording.sentence_start_time,
            sentence_end_time: recording.sentence_end_time,
        }
    }
}

/// Neutral placeholder when no transcription is available.
const NEUTRAL_SCORE: i64 = 70;

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

fn round(v: f64) -> i64 {
    v.round() as i64
}

/// Position-by-position token walk against the reference text.
/// Returns (accuracy 0..=100, issues).
fn pronunciation_accuracy(user_text: &str, reference: &str) -> (i64, Vec<AnalysisIssue>) {
    let reference_tokens = tokenize(reference);
    if reference_tokens.is_empty() {
        return (100, Vec::new());
    }
    let user_tokens = tokenize(user_text);

    let mut issues = Vec::new();
    let mut matches = 0usize;
    for (i, expected) in reference_tokens.iter().enumerate() {
        match user_tokens.get(i) {
            Some(heard) if heard == expected => matches += 1,
            heard => {
                let heard_desc = heard
                    .map(|h| format!("\"{}\"", h))
                    .unwrap_or_else(|| "nothing".to_string());
                issues.push(AnalysisIssue {
                    kind: "pronunciation".to_string(),
                    severity: IssueSeverity::Medium,
                    word: Some(expected.clone()),
                    position: Some(i),
                    issue: format!("Expected \"{}\" but heard {}", expected, heard_desc),
                    suggestion: format!("Practice the pronunciation of \"{}\"", expected),
                });
            }
        }
    }

    let accuracy = round(100.0 * matches as f64 / reference_tokens.len() as f64);
    (accuracy, issues)
}

/// Banded timing score. Monotonically non-increasing in the deviation
/// percentage; deviations above 10% also emit an issue.
fn timing_score(
    duration_secs: f64,
    expected_duration: f64,
) -> (i64, Option<AnalysisIssue>) {
    if expected_duration <= 0.0 {
        return (100, None);
    }
    let diff_pct = (duration_secs - expected_duration).abs() / expected_duration * 100.0;

    let score = if diff_pct <= 10.0 {
        100
    } else if diff_pct <= 20.0 {
        90
    } else if diff_pct <= 30.0 {
        80
    } else if diff_pct <= 40.0 {
        70
    } else if diff_pct <= 50.0 {
        60
    } else {
        50
    };

    let issue = if diff_pct > 10.0 {
        let severity = if diff_pct > 30.0 {
            IssueSeverity::High
        } else {
            IssueSeverity::Medium
        };
        let direction = if duration_secs > expected_duration {
            "slower"
        } else {
            "faster"
        };
        Some(AnalysisIssue {
            kind: "timing".to_string(),
            severity,
            word: None,
            position: None,
            issue: format!(
                "Recording is {:.0}% {} than the reference window",
                diff_pct, direction
            ),
            suggestion: "Listen to the reference audio and match the speaker's pace".to_string(),
        })
    } else {
        None
    };

    (score, issue)
}

/// Words-per-minute banded fluency score. Ideal band is [130, 160] wpm.
fn fluency_score(word_count: usize, duration_secs: f64) -> i64 {
    if duration_secs <= 0.0 {
        return NEUTRAL_SCORE;
    }
    let wpm = word_count as f64 / duration_secs * 60.0;
    if (130.0..=160.0).contains(&wpm) {
        100
    } else if (110.0..=180.0).contains(&wpm) {
        90
    } else if (90.0..=200.0).contains(&wpm) {
        80
    } else if (70.0..=220.0).contains(&wpm) {
        70
    } else {
        60
    }
}

/// Compare a recording's transcription and timing against the reference
/// sentence and produce the full multi-factor analysis.
pub fn compare(input: &ScoringInput, reference_text: &str) -> AnalysisResult {
    let expected_duration = input.sentence_end_time - input.sentence_start_time;
    let (timing, timing_issue) = timing_score(input.duration_secs, expected_duration);

    let mut issues = Vec::new();
    let (pronunciation, fluency) = match &input.transcript {
        Some(transcript) => {
            let (accuracy, pronunciation_issues) =
                pronunciation_accuracy(&transcript.text, reference_text);
            issues.extend(pronunciation_issues);
            let word_count = tokenize(&transcript.text).len();
            (accuracy, fluency_score(word_count, input.duration_secs))
        }
        None => {
            // No transcription backend was available when the recording was
            // processed; fall back to neutral placeholders rather than
            // scoring every reference word as a miss.
            issues.push(AnalysisIssue {
                kind: "clarity".to_string(),
                severity: IssueSeverity::Medium,
                word: None,
                position: None,
                issue: "No transcription is available for this recording".to_string(),
                suggestion: "Re-record in a quiet environment and try again".to_string(),
            });
            (NEUTRAL_SCORE, NEUTRAL_SCORE)
        }
    };

    if let Some(issue) = timing_issue {
        issues.push(issue);
    }

    let clarity = round((pronunciation + fluency) as f64 / 2.0);
    let overall = round(
        0.4 * pronunciation as f64 + 0.3 * fluency as f64 + 0.2 * timing as f64
            + 0.1 * clarity as f64,
    );

    let mut recommendations = Vec::new();
    if pronunciation < 80 {
        recommendations
            .push("Practice slow repetition of the words flagged above".to_string());
    }
    if fluency < 80 {
        recommendations.push("Work on reducing pauses between words".to_string());
    }
    if timing < 80 {
        recommendations
            .push("Listen to the reference audio and match the speaker's pace".to_string());
    }
    if issues.len() > 3 {
        recommendations
            .push("Focus on the sentences you find hardest and repeat them daily".to_string());
    }

    AnalysisResult {
        overall_score: overall,
        scores: FactorScores {
            pronunciation,
            fluency,
            timing,
            clarity,
        },
        issues,
        transcription: input.transcript.clone(),
        recommendations,
        processed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(text: &str, duration: f64, start: f64, end: f64) -> ScoringInput {
        ScoringInput {
            transcript: Some(Transcript {
                text: text.to_string(),
                confidence: 0.95,
            }),
            duration_secs: duration,
            sentence_start_time: start,
            sentence_end_time: end,
        }
    }

    #[test]
    fn perfect_match_scores_100_everywhere() {
        // 4 words in ~1.7s ≈ 141 wpm, inside the ideal band
        let result = compare(&input("the quick brown fox", 1.7, 0.0, 1.7), "The Quick Brown Fox");
        assert_eq!(result.scores.pronunciation, 100);
        assert_eq!(result.scores.fluency, 100);
        assert_eq!(result.scores.timing, 100);
        assert_eq!(result.scores.clarity, 100);
        assert_eq!(result.overall_score, 100);
        assert!(result.issues.is_empty());
        assert!(result.recommendations.is_empty());
    }

    #[test]
    fn one_mismatched_token_scores_75() {
        let result = compare(
            &input("the quick brown sock", 1.7, 0.0, 1.7),
            "the quick brown fox",
        );
        assert_eq!(result.scores.pronunciation, 75);
        let pronunciation_issues: Vec<_> = result
            .issues
            .iter()
            .filter(|i| i.kind == "pronunciation")
            .collect();
        assert_eq!(pronunciation_issues.len(), 1);
        assert_eq!(pronunciation_issues[0].position, Some(3));
        assert_eq!(pronunciation_issues[0].word.as_deref(), Some("fox"));
    }

    #[test]
    fn small_timing_deviation_scores_100_without_issue() {
        // expected 10s, actual 10.5s -> 5% deviation
        let result = compare(&input("a b c", 10.5, 0.0, 10.0), "a b c");
        assert_eq!(result.scores.timing, 100);
        assert!(result.issues.iter().all(|i| i.kind != "timing"));
    }

    #[test]
    fn timing_bands_are_monotonically_non_increasing() {
        let mut prev = i64::MAX;
        for actual in [10.0, 11.5, 12.5, 13.5, 14.5, 16.0, 30.0] {
            let (score, _) = timing_score(actual, 10.0);
            assert!(score <= prev, "score rose at actual={}", actual);
            prev = score;
        }
    }

    #[test]
    fn large_timing_deviation_emits_high_severity_issue() {
        // expected 10s, actual 15s -> 50% deviation
        let result = compare(&input("a b", 15.0, 0.0, 10.0), "a b");
        assert_eq!(result.scores.timing, 60);
        let timing_issue = result.issues.iter().find(|i| i.kind == "timing").unwrap();
        assert_eq!(timing_issue.severity, IssueSeverity::High);
    }

    #[test]
    fn moderate_timing_deviation_is_medium_severity() {
        // expected 10s, actual 12s -> 20% deviation
        let result = compare(&input("a b", 12.0, 0.0, 10.0), "a b");
        assert_eq!(result.scores.timing, 90);
        let timing_issue = result.issues.iter().find(|i| i.kind == "timing").unwrap();
        assert_eq!(timing_issue.severity, IssueSeverity::Medium);
    }

    #[test]
    fn fluency_bands() {
        // 145 wpm -> 100
        assert_eq!(fluency_score(145, 60.0), 100);
        // 250 wpm -> 60
        assert_eq!(fluency_score(250, 60.0), 60);
        // 115 wpm -> 90
        assert_eq!(fluency_score(115, 60.0), 90);
        // 95 wpm -> 80
        assert_eq!(fluency_score(95, 60.0), 80);
        // 75 wpm -> 70
        assert_eq!(fluency_score(75, 60.0), 70);
    }

    #[test]
    fn missing_transcription_uses_neutral_placeholders() {
        let result = compare(
            &ScoringInput {
                transcript: None,
                duration_secs: 10.0,
                sentence_start_time: 0.0,
                sentence_end_time: 10.0,
            },
            "the quick brown fox",
        );
        assert_eq!(result.scores.pronunciation, NEUTRAL_SCORE);
        assert_eq!(result.scores.fluency, NEUTRAL_SCORE);
        assert!(result.transcription.is_none());
        assert!(result.issues.iter().any(|i| i.kind == "clarity"));
    }

    #[test]
    fn overall_score_matches_weighted_sum() {
        let result = compare(
            &input("the quick brown sock jumped", 14.0, 0.0, 10.0),
            "the quick brown fox jumped",
        );
        let s = result.scores;
        let expected = (0.4 * s.pronunciation as f64
            + 0.3 * s.fluency as f64
            + 0.2 * s.timing as f64
            + 0.1 * s.clarity as f64)
            .round() as i64;
        assert_eq!(result.overall_score, expected);
        assert!(result.overall_score >= 0 && result.overall_score <= 100);
        assert_eq!(
            s.clarity,
            ((s.pronunciation + s.fluency) as f64 / 2.0).round() as i64
        );
    }

    #[test]
    fn low_scores_produce_recommendations() {
        // all tokens wrong, far too slow
        let result = compare(&input("x y z", 30.0, 0.0, 10.0), "a b c d e f");
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("slow repetition")));
        assert!(result.recommendations.iter().any(|r| r.contains("pace")));
        // more than 3 issues -> hardest-sentences recommendation
        assert!(result.issues.len() > 3);
        assert!(result.recommendations.iter().any(|r| r.contains("hardest")));
    }
}
