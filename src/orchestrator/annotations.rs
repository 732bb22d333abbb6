//! Annotation presets attached to each output text block.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Who an annotated text block is intended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// The human user.
    User,
    /// The calling assistant/model.
    Assistant,
    /// Both.
    Both,
}

/// Priority and audience metadata carried alongside a text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Who this block is intended for.
    pub audience: Audience,
    /// Relative importance in `[0, 1]`.
    pub priority: f64,
    /// When this block was produced.
    pub last_modified: chrono::DateTime<Utc>,
}

impl Annotation {
    fn new(audience: Audience, priority: f64) -> Self {
        Self { audience, priority, last_modified: Utc::now() }
    }

    /// The primary result of a tool call: maximum priority, for both audiences.
    #[must_use]
    pub fn primary() -> Self {
        Self::new(Audience::Both, 1.0)
    }

    /// Supporting context for the assistant only.
    #[must_use]
    pub fn supporting() -> Self {
        Self::new(Audience::Assistant, 0.7)
    }

    /// Low-priority metadata visible to both audiences.
    #[must_use]
    pub fn metadata() -> Self {
        Self::new(Audience::Both, 0.3)
    }

    /// A citation, relevant to the assistant.
    #[must_use]
    pub fn citation() -> Self {
        Self::new(Audience::Assistant, 0.6)
    }

    /// A user-facing summary.
    #[must_use]
    pub fn summary() -> Self {
        Self::new(Audience::User, 0.8)
    }

    /// The N-th (1-based) entry in an ordered search result list. Priority
    /// decays by 0.05 per position, floored at 0.5.
    #[must_use]
    pub fn search_result(position: u32) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let decayed = 1.0 - 0.05 * f64::from(position);
        Self::new(Audience::Both, decayed.max(0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_is_full_priority_both_audiences() {
        let a = Annotation::primary();
        assert_eq!(a.audience, Audience::Both);
        assert!((a.priority - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn supporting_is_assistant_at_point_seven() {
        let a = Annotation::supporting();
        assert_eq!(a.audience, Audience::Assistant);
        assert!((a.priority - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn search_result_decays_by_position_and_floors_at_half() {
        assert!((Annotation::search_result(1).priority - 0.95).abs() < 1e-9);
        assert!((Annotation::search_result(5).priority - 0.75).abs() < 1e-9);
        assert!((Annotation::search_result(20).priority - 0.5).abs() < 1e-9);
        assert!((Annotation::search_result(100).priority - 0.5).abs() < 1e-9);
    }

    #[test]
    fn metadata_and_citation_and_summary_match_preset_values() {
        assert!((Annotation::metadata().priority - 0.3).abs() < f64::EPSILON);
        assert!((Annotation::citation().priority - 0.6).abs() < f64::EPSILON);
        assert!((Annotation::summary().priority - 0.8).abs() < f64::EPSILON);
        assert_eq!(Annotation::citation().audience, Audience::Assistant);
        assert_eq!(Annotation::summary().audience, Audience::User);
    }
}
