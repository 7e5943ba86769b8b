//! Prompt templates for the research steps
//!
//! Every prompt starts with a `### task:` line naming the step, so a prompt
//! can be identified without parsing its body.

use super::types::{ChartSpec, Gap, Outline, Synthesis};

pub const TASK_OUTLINE: &str = "### task: outline";
pub const TASK_SEARCH_TASKS: &str = "### task: search_tasks";
pub const TASK_SYNTHESIS: &str = "### task: synthesis";
pub const TASK_COMPLETENESS: &str = "### task: completeness";
pub const TASK_CHART_PLAN: &str = "### task: chart_plan";
pub const TASK_CHART_CODE: &str = "### task: chart_code";
pub const TASK_CHART_REPAIR: &str = "### task: chart_repair";
pub const TASK_REPORT: &str = "### task: report";

pub const SYSTEM: &str = "You are a meticulous research analyst. You plan research, \
weigh sources critically and write clear, well-cited reports.";

pub fn outline(query: &str) -> String {
    format!(
        r#"{task}
Plan a research report answering the request below.

Request: {query}

Output a JSON object with:
- title: Report title
- sections: Array of 3-6 {{title, focus}} objects, in reading order

Return ONLY valid JSON."#,
        task = TASK_OUTLINE,
    )
}

pub fn search_tasks(
    query: &str,
    outline: &Outline,
    gaps: &[Gap],
    issued: &[String],
    count: usize,
) -> String {
    let focus = if gaps.is_empty() {
        "Cover every section of the outline broadly.".to_string()
    } else {
        let gaps = gaps
            .iter()
            .map(|g| match &g.section {
                Some(section) => format!("- [{}] {}", section, g.description),
                None => format!("- {}", g.description),
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("Target these unresolved gaps:\n{}", gaps)
    };
    let issued = if issued.is_empty() {
        "(none)".to_string()
    } else {
        issued.join("\n")
    };

    format!(
        r#"{task}
Write up to {count} web search queries for the research request.

Request: {query}

Outline:
{outline}
{focus}

Queries already issued (do not repeat them):
{issued}

Output a JSON object with:
- tasks: Array of {{query, goal, section, priority}} where section is an outline section title and priority is high, medium or low

Return ONLY valid JSON."#,
        task = TASK_SEARCH_TASKS,
        outline = outline.render(),
    )
}

pub fn synthesis(query: &str, outline: &Outline, previous: &str, evidence: &str) -> String {
    let previous = if previous.is_empty() {
        "(none yet)"
    } else {
        previous
    };
    format!(
        r#"{task}
Merge the evidence into an updated research synthesis for the request.
Rewrite the whole synthesis, keeping what is still supported and citing sources as [n].

Request: {query}

Outline:
{outline}
Previous synthesis:
{previous}

Evidence:
{evidence}

Return the synthesis as markdown, one section per outline section."#,
        task = TASK_SYNTHESIS,
        outline = outline.render(),
    )
}

pub fn completeness(query: &str, outline: &Outline, synthesis: &Synthesis) -> String {
    format!(
        r#"{task}
Judge whether the research below answers the request well enough to write the final report.

Request: {query}

Outline:
{outline}
Section coverage:
{coverage}

Synthesis:
{narrative}

Output a JSON object with:
- sufficient: true or false
- gaps: Array of {{description, section, priority}}, most important first
- rationale: One or two sentences

Return ONLY valid JSON."#,
        task = TASK_COMPLETENESS,
        outline = outline.render(),
        coverage = synthesis.render_coverage(),
        narrative = synthesis.narrative,
    )
}

pub fn chart_plan(query: &str, outline: &Outline, synthesis: &Synthesis, max_charts: usize) -> String {
    format!(
        r#"{task}
Propose at most {max_charts} charts that would make the report clearer. Only chart numbers that appear in the synthesis.

Request: {query}

Outline:
{outline}
Synthesis:
{narrative}

Output a JSON object with:
- charts: Array of {{title, kind, data_description, section}} where section is an outline section title

Return ONLY valid JSON. Return {{"charts": []}} if nothing is worth charting."#,
        task = TASK_CHART_PLAN,
        outline = outline.render(),
        narrative = synthesis.narrative,
    )
}

pub fn chart_code(spec: &ChartSpec, synthesis: &Synthesis) -> String {
    format!(
        r#"{task}
Write Python that draws this chart with matplotlib.

Title: {title}
Kind: {kind}
Data: {data}

Relevant research:
{narrative}

Rules:
- Hard-code the data; there is no network or file access
- Use matplotlib.pyplot as plt and leave the figure open; do not call plt.show() or savefig
- Return only the code in a ```python block"#,
        task = TASK_CHART_CODE,
        title = spec.title,
        kind = spec.kind,
        data = spec.data_description,
        narrative = synthesis.narrative,
    )
}

pub fn chart_repair(spec: &ChartSpec, code: &str, error: &str) -> String {
    format!(
        r#"{task}
This chart code failed. Fix it.

Title: {title}

Code:
```python
{code}
```

Error:
{error}

Return only the corrected code in a ```python block. Leave the figure open and do not call plt.show()."#,
        task = TASK_CHART_REPAIR,
        title = spec.title,
    )
}

pub fn report(
    query: &str,
    outline: &Outline,
    synthesis: &Synthesis,
    evidence: &str,
    charts: &[(usize, &ChartSpec)],
) -> String {
    let charts = if charts.is_empty() {
        "(no charts)".to_string()
    } else {
        charts
            .iter()
            .map(|(n, spec)| {
                format!(
                    "- ![{}](chart://{}) belongs in section \"{}\"",
                    spec.title, n, spec.section
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"{task}
Write the final research report in markdown.

Request: {query}

Outline (use these as ## headings, in order):
{outline}
Synthesis:
{narrative}

Sources:
{evidence}

Charts (place each image line inside its section):
{charts}

Cite sources as [n] and end with a ## Sources list."#,
        task = TASK_REPORT,
        outline = outline.render(),
        narrative = synthesis.narrative,
    )
}
