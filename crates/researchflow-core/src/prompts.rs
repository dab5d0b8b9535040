//! Instructions sent to the content generator for each stage.

use serde_json::json;

pub const PLANNER_INSTRUCTION: &str = "You are a research planner. Break the user's topic into \
concise, sequential research steps that together cover it without overlap, and state the \
assumptions you made about scope and audience. Respond only with JSON matching the schema.";

pub const RESEARCHER_INSTRUCTION: &str = "You are a meticulous researcher. Use search to \
investigate the question and write a factual summary of 2-3 paragraphs. Prefer recent, \
authoritative sources and do not speculate beyond them.";

pub const WRITER_INSTRUCTION: &str = "You are a technical writer. Synthesize the findings into \
one structured report with an introduction, a body and a conclusion. Use Markdown headings and \
lists. Present the subject matter directly; never describe the research process, the steps \
taken or the researchers involved.";

pub const REVIEWER_INSTRUCTION: &str = "You are an exacting editor. Critique the report for \
clarity, factual coherence and correctness. Reply with a short bulleted list of concrete \
suggestions, or state plainly that the report is ready if you find no issues.";

pub fn plan_prompt(topic: &str, min_steps: usize, max_steps: usize) -> String {
    format!(
        "Topic: {topic}\n\nDecompose this topic into {min_steps}-{max_steps} concise, sequential \
research steps and list the assumptions behind the plan."
    )
}

/// Schema demanded from the planner: exactly `steps` and `assumptions`.
pub fn plan_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "items": { "type": "string" }
            },
            "assumptions": { "type": "string" }
        },
        "required": ["steps", "assumptions"],
        "additionalProperties": false
    })
}

pub fn research_prompt(query: &str) -> String {
    format!("Research question: {query}\n\nSummarize what reliable sources say about it.")
}

pub fn writer_prompt(topic: &str, summaries: &[String]) -> String {
    let mut prompt = format!("Topic: {topic}\n\nFindings:\n");
    for (idx, summary) in summaries.iter().enumerate() {
        prompt.push_str(&format!("\n### Finding {}\n{}\n", idx + 1, summary));
    }
    prompt.push_str("\nWrite the final report.");
    prompt
}

pub fn reviewer_prompt(report: &str) -> String {
    format!("Review the following report:\n\n{report}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_prompt_keeps_finding_order() {
        let prompt = writer_prompt("topic", &["first".into(), "second".into()]);
        let first = prompt.find("first").unwrap();
        let second = prompt.find("second").unwrap();
        assert!(first < second);
        assert!(prompt.contains("### Finding 2"));
    }

    #[test]
    fn plan_schema_requires_both_fields() {
        let schema = plan_schema();
        assert_eq!(schema["required"], json!(["steps", "assumptions"]));
    }
}
