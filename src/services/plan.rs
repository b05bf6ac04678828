//! Implementation-plan extraction from design documents.
//!
//! The architect's design doc ends with an `## Implementation Plan`
//! section listing at most one `[foundation]` bullet and any number of
//! `[feature]` bullets. The foundation PR must merge before feature work
//! fans out. A missing or malformed section yields an empty plan.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub summary: String,
    pub slug: String,
}

impl PlanItem {
    fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            slug: slugify(summary, 40),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImplementationPlan {
    pub foundation: Option<PlanItem>,
    pub features: Vec<PlanItem>,
}

impl ImplementationPlan {
    pub fn is_empty(&self) -> bool {
        self.foundation.is_none() && self.features.is_empty()
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^#{1,6}\s*implementation\s+plan\s*$").expect("static regex"))
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[-*]\s*\[(foundation|feature)\]\s*(.+?)\s*$").expect("static regex")
    })
}

/// Parse the plan section out of a design document.
pub fn parse_plan(document: &str) -> ImplementationPlan {
    let mut plan = ImplementationPlan::default();
    let mut in_section = false;

    for line in document.lines() {
        let trimmed = line.trim();
        if heading_re().is_match(trimmed) {
            in_section = true;
            continue;
        }
        if in_section {
            // The section ends at the next heading.
            if trimmed.starts_with('#') {
                break;
            }
            if let Some(caps) = bullet_re().captures(trimmed) {
                let summary = &caps[2];
                match caps[1].to_lowercase().as_str() {
                    "foundation" => {
                        // First foundation bullet wins.
                        if plan.foundation.is_none() {
                            plan.foundation = Some(PlanItem::new(summary));
                        }
                    }
                    _ => plan.features.push(PlanItem::new(summary)),
                }
            }
        }
    }
    plan
}

/// Lowercase, dash-separated, truncated slug.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= max_len {
            break;
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
# Payments design

Some prose about the approach.

## Implementation Plan

- [foundation] Database schema and API scaffolding
- [feature] Card payment processing
- [feature] Refund flow

## Appendix

- [feature] Not part of the plan
"#;

    #[test]
    fn parses_foundation_and_features_within_section() {
        let plan = parse_plan(DOC);
        let foundation = plan.foundation.unwrap();
        assert_eq!(foundation.summary, "Database schema and API scaffolding");
        assert_eq!(foundation.slug, "database-schema-and-api-scaffolding");
        assert_eq!(plan.features.len(), 2);
        assert_eq!(plan.features[1].summary, "Refund flow");
    }

    #[test]
    fn plan_without_foundation_is_feature_only() {
        let doc = "## Implementation Plan\n- [feature] Only thing";
        let plan = parse_plan(doc);
        assert!(plan.foundation.is_none());
        assert_eq!(plan.features.len(), 1);
    }

    #[test]
    fn missing_section_is_empty() {
        assert!(parse_plan("# Design\nNo plan here.").is_empty());
    }

    #[test]
    fn malformed_bullets_are_skipped() {
        let doc = "## Implementation Plan\n- [unknown] nope\n- plain bullet\n- [feature] yes";
        let plan = parse_plan(doc);
        assert_eq!(plan.features.len(), 1);
        assert_eq!(plan.features[0].summary, "yes");
    }

    #[test]
    fn second_foundation_bullet_is_ignored() {
        let doc = "## Implementation Plan\n- [foundation] first\n- [foundation] second";
        let plan = parse_plan(doc);
        assert_eq!(plan.foundation.unwrap().summary, "first");
    }

    #[test]
    fn slugify_truncates_and_cleans() {
        assert_eq!(slugify("Card payment processing!", 40), "card-payment-processing");
        assert_eq!(slugify("A  very   spaced    name", 10), "a-very-spa");
    }
}
