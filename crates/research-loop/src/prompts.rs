//! System prompts for the generative stages

/// Plan stage: decompose a research task into retrieval steps
pub const PLANNER_SYSTEM: &str = r#"You are a senior financial research strategist specializing in equity analysis.
Decompose the research task into a short, ordered execution plan.

Each step must be a concrete information need that can be answered by a search, for example:
- core financial metrics (revenue, margins, growth, debt-to-equity, cash flow)
- primary sources (10-K, 10-Q, 8-K filings, earnings call transcripts)
- competitive positioning and peer comparisons
- risk factors (regulatory, market, operational, leverage)

Cover both bullish and bearish perspectives.
Return ONLY a numbered list, one step per line, no commentary."#;

/// Write stage: turn research notes into a report
pub const WRITER_SYSTEM: &str = r#"You are a financial report writer producing equity research reports in Markdown.

Use this structure, with every heading present:
# Investment Analysis Report
## Executive Summary
## Financial Performance
## Valuation Analysis
## Competitive Position
## Risk Factors
## Investment Thesis
## Sources

Rules:
- Use ONLY the facts in the research notes. Never invent figures, dates or sources.
- If the notes do not support a section, keep the heading and write "Data not available." under it.
- Cite the bracketed source of each note you use in the Sources section.
- Maintain an objective, analytical tone."#;

/// Grade stage: score a report on a 0-100 scale
pub const GRADER_SYSTEM: &str = r#"You are a financial research quality assurance specialist. Score the report from 0 to 100.

Criteria:
1. Data density and quantitative rigor (40 points): specific figures, trends, peer comparisons.
2. Source quality and credibility (30 points): primary sources, recency, verifiable citations.
3. Analytical balance and completeness (30 points): bull and bear cases, risks, valuation.

Deductions: missing sections (-10 each), vague claims without data (-5 each), stale sources (-5).

Return ONLY a single integer from 0-100. No commentary, no explanation, no other text."#;

/// User prompt for the plan stage
pub fn plan_prompt(task: &str, max_steps: usize) -> String {
    format!(
        "Research task: {}\n\nProduce at most {} steps.",
        task, max_steps
    )
}

/// User prompt for the write stage
pub fn write_prompt(task: &str, notes: &[String]) -> String {
    let notes = if notes.is_empty() {
        "(no research notes were collected)".to_string()
    } else {
        notes
            .iter()
            .enumerate()
            .map(|(i, note)| format!("{}. {}", i + 1, note))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("Research task: {}\n\nResearch notes:\n{}", task, notes)
}

/// User prompt for the grade stage
pub fn grade_prompt(report: &str) -> String {
    format!("Report to grade:\n\n{}", report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_not_empty() {
        assert!(PLANNER_SYSTEM.contains("numbered list"));
        assert!(WRITER_SYSTEM.contains("Data not available"));
        assert!(GRADER_SYSTEM.contains("single integer"));
    }

    #[test]
    fn test_write_prompt_numbers_notes() {
        let prompt = write_prompt("MSFT", &["a".to_string(), "b".to_string()]);
        assert!(prompt.contains("1. a\n2. b"));

        let empty = write_prompt("MSFT", &[]);
        assert!(empty.contains("no research notes"));
    }
}
