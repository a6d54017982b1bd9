//! Health advice about a set of findings.
//!
//! Requests carry the complete findings payload; advisors keep no session.

#[cfg(feature = "advisor-http")]
mod http;

#[cfg(feature = "advisor-http")]
pub use http::HttpAdvisor;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::config::AdvisorSettings;
use crate::position::HorizontalBand;
use crate::recommend::recommendations;
use crate::report::{DetectionEntry, ReportDocument, SummaryEntry};

pub const SYSTEM_PROMPT: &str = "You are an AI health advisor for kidney stones.

Guidelines for responses:
\u{2022} Keep answers concise and clear
\u{2022} Use bullet points for recommendations
\u{2022} Focus on practical advice
\u{2022} Be reassuring but factual
\u{2022} Base advice on the stone data provided
\u{2022} Use simple, patient-friendly language

Format responses with headings followed by colons and bullet points using \"\u{2022}\".";

/// Question plus the findings it is about.
///
/// When the request comes from a report, `summary` and `recommendations`
/// are the report's own and are used as given. Bare findings fall back to
/// deriving both from the detections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdviceRequest {
    pub findings: Vec<DetectionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
    pub question: String,
}

impl AdviceRequest {
    pub fn new(findings: Vec<DetectionEntry>, question: impl Into<String>) -> Self {
        Self {
            findings,
            summary: None,
            recommendations: None,
            question: question.into(),
        }
    }

    pub fn from_document(doc: &ReportDocument, question: impl Into<String>) -> Self {
        Self {
            findings: doc.detections.clone(),
            summary: Some(doc.summary.clone()),
            recommendations: Some(doc.recommendations.clone()),
            question: question.into(),
        }
    }

    /// The report's recommendations, or ones derived from the findings.
    pub fn recommendations(&self, ctx: &FindingsContext) -> Vec<String> {
        match &self.recommendations {
            Some(recs) => recs.clone(),
            None => recommendations(ctx.stone_count, ctx.largest_stone_mm),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(anyhow!("question must not be empty"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoneBrief {
    pub id: u32,
    pub size_mm: f64,
    pub position: String,
    pub confidence: f64,
    #[serde(rename = "type")]
    pub stone_type: String,
}

/// What an advisor knows about the scan.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FindingsContext {
    pub stone_count: usize,
    pub total_burden_mm: f64,
    pub stones: Vec<StoneBrief>,
    pub left_kidney: usize,
    pub right_kidney: usize,
    pub average_size_mm: f64,
    pub largest_stone_mm: f64,
}

impl FindingsContext {
    pub fn from_findings(findings: &[DetectionEntry]) -> Self {
        let stones: Vec<StoneBrief> = findings
            .iter()
            .map(|f| StoneBrief {
                id: f.id,
                size_mm: f.diameter_mm,
                position: f.position.label(),
                confidence: f.confidence,
                stone_type: f.stone_type.clone(),
            })
            .collect();
        let count_side = |band: HorizontalBand| {
            findings
                .iter()
                .filter(|f| f.position.horizontal == band)
                .count()
        };
        let total: f64 = stones.iter().map(|s| s.size_mm).sum();
        let largest = stones.iter().map(|s| s.size_mm).fold(0.0, f64::max);
        let average = if stones.is_empty() {
            0.0
        } else {
            total / stones.len() as f64
        };
        Self {
            stone_count: stones.len(),
            total_burden_mm: total,
            left_kidney: count_side(HorizontalBand::Left),
            right_kidney: count_side(HorizontalBand::Right),
            average_size_mm: average,
            largest_stone_mm: largest,
            stones,
        }
    }

    /// Context for `request`, taking count, burden and largest size from the
    /// report summary when one is attached.
    pub fn from_request(request: &AdviceRequest) -> Self {
        let mut ctx = Self::from_findings(&request.findings);
        if let Some(summary) = &request.summary {
            ctx.stone_count = summary.total_stones;
            ctx.total_burden_mm = summary.total_burden_mm;
            ctx.largest_stone_mm = summary.largest_stone_mm;
            ctx.average_size_mm = if summary.total_stones == 0 {
                0.0
            } else {
                summary.total_burden_mm / summary.total_stones as f64
            };
        }
        ctx
    }

    /// The user message sent to a chat model.
    pub fn prompt(&self, question: &str) -> String {
        let locations = self
            .stones
            .iter()
            .map(|s| format!("Stone {} ({:.1}mm) in {}", s.id, s.size_mm, s.position))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Scan Data:\n\
             \u{2022} Stones: {} total\n\
             \u{2022} Size: {:.1}mm largest, {:.1}mm average\n\
             \u{2022} Left kidney: {} stones\n\
             \u{2022} Right kidney: {} stones\n\
             \u{2022} Locations: {}\n\n\
             Q: {}",
            self.stone_count,
            self.largest_stone_mm,
            self.average_size_mm,
            self.left_kidney,
            self.right_kidney,
            if locations.is_empty() { "none" } else { &locations },
            question.trim()
        )
    }
}

pub trait Advisor: Send + Sync {
    fn name(&self) -> &'static str;
    fn advise(&self, request: &AdviceRequest) -> Result<String>;
}

/// Deterministic advice built from the findings alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineAdvisor;

impl Advisor for OfflineAdvisor {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn advise(&self, request: &AdviceRequest) -> Result<String> {
        request.validate()?;
        let ctx = FindingsContext::from_request(request);
        let mut out = String::new();
        out.push_str(&format!("Your question: {}\n\n", request.question.trim()));
        out.push_str("Scan Summary:\n");
        if ctx.stone_count == 0 {
            out.push_str("\u{2022} No stones were detected on this scan\n");
        } else {
            out.push_str(&format!(
                "\u{2022} {} stone(s), {:.1}mm total burden\n",
                ctx.stone_count, ctx.total_burden_mm
            ));
            out.push_str(&format!(
                "\u{2022} Largest {:.1}mm, average {:.1}mm\n",
                ctx.largest_stone_mm, ctx.average_size_mm
            ));
            out.push_str(&format!(
                "\u{2022} Left side: {}, right side: {}\n",
                ctx.left_kidney, ctx.right_kidney
            ));
        }
        out.push_str("\nRecommendations:\n");
        for rec in request.recommendations(&ctx) {
            out.push_str(&format!("\u{2022} {}\n", rec));
        }
        out.push_str("\nWhen to Seek Medical Attention:\n");
        for item in [
            "Severe pain or cramping",
            "Blood in urine",
            "Fever or chills",
        ] {
            out.push_str(&format!("\u{2022} {}\n", item));
        }
        Ok(out)
    }
}

/// The configured advisor: HTTP when an endpoint is set and the build
/// supports it, offline otherwise.
pub fn advisor_from_settings(settings: &AdvisorSettings) -> Result<Box<dyn Advisor>> {
    match &settings.endpoint {
        #[cfg(feature = "advisor-http")]
        Some(_) => Ok(Box::new(HttpAdvisor::from_settings(settings)?)),
        #[cfg(not(feature = "advisor-http"))]
        Some(endpoint) => {
            log::warn!(
                "advisor endpoint {} ignored: built without advisor-http; using offline advisor",
                endpoint
            );
            Ok(Box::new(OfflineAdvisor))
        }
        None => Ok(Box::new(OfflineAdvisor)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::position::Position;

    fn entry(id: u32, mm: f64, position: &str) -> DetectionEntry {
        DetectionEntry {
            id,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            confidence: 0.8,
            diameter_px: mm / 0.25,
            diameter_mm: mm,
            stone_type: "kidney_stone".into(),
            position: position.parse::<Position>().unwrap(),
        }
    }

    #[test]
    fn context_counts_sides_and_sizes() {
        let findings = vec![
            entry(1, 4.0, "top-left"),
            entry(2, 6.0, "bottom-right"),
            entry(3, 2.0, "middle-center"),
        ];
        let ctx = FindingsContext::from_findings(&findings);
        assert_eq!(ctx.stone_count, 3);
        assert_eq!(ctx.total_burden_mm, 12.0);
        assert_eq!(ctx.left_kidney, 1);
        assert_eq!(ctx.right_kidney, 1);
        assert_eq!(ctx.largest_stone_mm, 6.0);
        assert_eq!(ctx.average_size_mm, 4.0);

        let prompt = ctx.prompt("Is this serious? ");
        assert!(prompt.contains("Stone 2 (6.0mm) in bottom-right"));
        assert!(prompt.ends_with("Q: Is this serious?"));
    }

    #[test]
    fn empty_findings_have_zero_context() {
        let ctx = FindingsContext::from_findings(&[]);
        assert_eq!(ctx.stone_count, 0);
        assert_eq!(ctx.average_size_mm, 0.0);
        assert_eq!(ctx.largest_stone_mm, 0.0);
        assert!(ctx.prompt("hi").contains("Locations: none"));
    }

    #[test]
    fn offline_advice_follows_recommendations() -> Result<()> {
        let request = AdviceRequest::new(vec![entry(1, 12.0, "top-left")], "What now?");
        let text = OfflineAdvisor.advise(&request)?;
        assert!(text.contains("Urgent medical attention recommended"));
        assert!(text.contains("Left side: 1, right side: 0"));

        let none = OfflineAdvisor.advise(&AdviceRequest::new(Vec::new(), "ok?"))?;
        assert!(none.contains("No stones detected"));
        Ok(())
    }

    #[test]
    fn report_summary_and_recommendations_are_used_as_given() -> Result<()> {
        // The entry's rounded size sits at the threshold; the report itself
        // classified the unrounded stone as urgent.
        let mut request = AdviceRequest::new(vec![entry(1, 10.0, "middle-right")], "Next steps?");
        request.summary = Some(SummaryEntry {
            total_stones: 1,
            total_burden_mm: 10.0,
            largest_stone_mm: 10.0,
            average_confidence: 0.8,
            risk_level: "moderate".into(),
            severity: None,
        });
        request.recommendations = Some(vec![
            "Stay well hydrated".into(),
            "Urgent medical attention recommended".into(),
        ]);
        let text = OfflineAdvisor.advise(&request)?;
        assert!(text.contains("\u{2022} Urgent medical attention recommended"));
        assert!(!text.contains("Monitor"));

        request.recommendations = None;
        let derived = OfflineAdvisor.advise(&request)?;
        assert!(!derived.contains("Urgent"));
        Ok(())
    }

    #[test]
    fn blank_question_is_rejected() {
        let request = AdviceRequest::new(Vec::new(), "   ");
        assert!(OfflineAdvisor.advise(&request).is_err());
    }

    #[test]
    fn default_settings_pick_offline() -> Result<()> {
        let advisor = advisor_from_settings(&AdvisorSettings::default())?;
        assert_eq!(advisor.name(), "offline");
        Ok(())
    }
}
