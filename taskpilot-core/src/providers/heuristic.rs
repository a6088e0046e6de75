//! Offline providers: deterministic text heuristics in place of a model.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{
    CodeContext, CodeGenerator, PlanContext, PlanGenerator, StepReasoner, TaskDecomposer, Thought,
};
use crate::error::{PilotError, PilotResult};
use crate::models::{AgentRole, Decomposition, Plan, Step, Task};
use crate::sandbox::escape_string_literal as escape;
use crate::tools::ToolInfo;

/// One actionable clause of a goal. `sequential` is set when the clause was
/// introduced by a sequencing word ("then", "after that", "finally", "next").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub text: String,
    pub sequential: bool,
}

const SEQUENCE_MARKERS: [&str; 6] = [
    "and then",
    "after that",
    "afterwards",
    "finally",
    "then",
    "next",
];

/// Split free text into clauses on line breaks, `;`, sentence ends and
/// inline "then".
pub fn split_clauses(text: &str) -> Vec<Clause> {
    let mut clauses = Vec::new();
    for segment in text.split(['\n', ';']) {
        for sentence in split_sentences(segment) {
            for (i, part) in split_on_then(&sentence).into_iter().enumerate() {
                let (body, marked) = strip_marker(&part);
                if body.is_empty() {
                    continue;
                }
                clauses.push(Clause {
                    text: body,
                    sequential: marked || i > 0,
                });
            }
        }
    }
    clauses
}

fn split_sentences(segment: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
        if matches!(c, '.' | '!' | '?') && at_boundary {
            if c == '?' {
                current.push(c);
            }
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        } else {
            current.push(c);
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn split_on_then(sentence: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = sentence.trim();

    loop {
        let lower = rest.to_ascii_lowercase();
        match lower.find(" then ") {
            Some(idx) if idx > 0 => {
                let head = rest[..idx].trim().trim_end_matches(',');
                let head = if head.to_ascii_lowercase().ends_with(" and") {
                    &head[..head.len() - 4]
                } else {
                    head
                };
                parts.push(head.trim().to_string());
                rest = rest[idx + 1..].trim();
            }
            _ => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}

fn strip_marker(part: &str) -> (String, bool) {
    let trimmed = part.trim().trim_end_matches(',');
    let lower = trimmed.to_ascii_lowercase();

    for marker in SEQUENCE_MARKERS {
        if !lower.starts_with(marker) {
            continue;
        }
        let after = &trimmed[marker.len()..];
        if after.chars().next().map_or(true, |c| !c.is_alphanumeric()) {
            let body = after.trim_start_matches(|c: char| c == ',' || c == ':' || c.is_whitespace());
            return (capitalize(body), true);
        }
    }
    (trimmed.to_string(), false)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn mentions(words: &[String], vocabulary: &[&str]) -> bool {
    words.iter().any(|w| vocabulary.contains(&w.as_str()))
}

const TOOL_VOCABULARY: [(&str, &[&str]); 4] = [
    (
        "write_file",
        &["write", "create", "generate", "add", "build", "save", "implement", "make"],
    ),
    ("read_file", &["read", "inspect", "open", "review", "load"]),
    ("list_files", &["list", "verify", "check", "test"]),
    ("delete_file", &["delete", "remove", "clean"]),
];

fn tool_hints(text: &str, available: &[ToolInfo]) -> Vec<String> {
    let words = words(text);
    TOOL_VOCABULARY
        .iter()
        .filter(|(_, vocabulary)| mentions(&words, vocabulary))
        .map(|(tool, _)| tool.to_string())
        .filter(|tool| available.is_empty() || available.iter().any(|t| &t.name == tool))
        .collect()
}

/// Turns each clause of the goal into a step; the last step requests a
/// checkpoint. Reviewer feedback becomes a leading review step.
pub struct HeuristicPlanner;

#[async_trait]
impl PlanGenerator for HeuristicPlanner {
    async fn generate_plan(&self, goal: &str, context: &PlanContext) -> PilotResult<Plan> {
        let clauses = split_clauses(goal);
        if clauses.is_empty() {
            return Err(PilotError::EmptyPlan(goal.to_string()));
        }

        let mut steps = Vec::with_capacity(clauses.len() + 1);
        if !context.feedback.is_empty() {
            steps.push(Step::new(
                "review-feedback",
                format!(
                    "Address reviewer feedback: {}",
                    context.feedback.join("; ")
                ),
            ));
        }
        for (i, clause) in clauses.iter().enumerate() {
            steps.push(
                Step::new(format!("step-{}", i + 1), clause.text.clone())
                    .with_tool_hints(tool_hints(&clause.text, &context.tools)),
            );
        }
        if let Some(last) = steps.last_mut() {
            last.checkpoint = true;
        }

        Ok(Plan::new(goal, steps))
    }
}

const ROLE_VOCABULARY: [(AgentRole, &[&str]); 4] = [
    (
        AgentRole::Tester,
        &["test", "tests", "verify", "validate", "qa", "check"],
    ),
    (
        AgentRole::Designer,
        &["design", "style", "styles", "css", "layout", "ui", "theme", "color", "colors"],
    ),
    (
        AgentRole::Researcher,
        &["research", "investigate", "analyze", "analyse", "compare", "survey", "study"],
    ),
    (
        AgentRole::Coder,
        &[
            "code", "implement", "build", "write", "create", "fix", "function", "api", "html",
            "script", "program", "refactor",
        ],
    ),
];

fn role_for(text: &str) -> AgentRole {
    let words = words(text);
    ROLE_VOCABULARY
        .iter()
        .find(|(_, vocabulary)| mentions(&words, vocabulary))
        .map(|(role, _)| *role)
        .unwrap_or(AgentRole::Generalist)
}

/// Clauses become tasks; a sequenced clause depends on the task before it.
pub struct HeuristicDecomposer;

#[async_trait]
impl TaskDecomposer for HeuristicDecomposer {
    async fn decompose(&self, goal: &str) -> PilotResult<Decomposition> {
        let clauses = split_clauses(goal);
        if clauses.is_empty() {
            return Err(PilotError::DecompositionFailed(format!(
                "goal '{}' has no actionable clauses",
                goal
            )));
        }

        let total = clauses.len();
        let tasks = clauses
            .iter()
            .enumerate()
            .map(|(i, clause)| {
                let mut task = Task::new(format!("task-{}", i + 1), clause.text.clone())
                    .with_agent(role_for(&clause.text))
                    .with_priority((total - i) as u32);
                if clause.sequential && i > 0 {
                    task.dependencies.push(format!("task-{}", i));
                }
                task
            })
            .collect();

        Ok(Decomposition::from_tasks(tasks))
    }
}

/// File the step text names (`index.html`), else a slug of the text.
fn target_file(description: &str) -> String {
    let named = description
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '"' | '\'' | '(' | ')')))
        .find(|w| {
            let Some((stem, ext)) = w.rsplit_once('.') else {
                return false;
            };
            !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && stem
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/'))
                && !stem.starts_with('/')
                && !stem.split('/').any(|s| s == "..")
        });

    if let Some(name) = named {
        return name.to_string();
    }

    let slug: Vec<String> = words(description).into_iter().take(6).collect();
    if slug.is_empty() {
        "notes.md".to_string()
    } else {
        format!("{}.md", slug.join("-"))
    }
}

/// Emits a sandbox script that logs the step and calls the hinted tools.
/// Run-scoped placeholders are left for the agent loop to fill.
pub struct TemplateCodeGenerator;

#[async_trait]
impl CodeGenerator for TemplateCodeGenerator {
    async fn generate_code(
        &self,
        task_description: &str,
        context: &CodeContext,
        available_tools: &[ToolInfo],
    ) -> PilotResult<String> {
        let description = escape(task_description);
        let file = escape(&target_file(task_description));
        let available: HashSet<&str> = available_tools.iter().map(|t| t.name.as_str()).collect();

        let mut script = String::new();
        script.push_str("print(\"[{{STEP_ID}}] ");
        script.push_str(&description);
        script.push_str("\");\n");

        if let Some(answer) = &context.human_answer {
            script.push_str(&format!("print(\"Human input: {}\");\n", escape(answer)));
        }

        for hint in &context.step.tool_hints {
            if !available.contains(hint.as_str()) {
                continue;
            }
            match hint.as_str() {
                "write_file" => {
                    script.push_str(&format!(
                        "let written = write_file(#{{ path: \"{}\", content: \"# {}\\n\\nGoal: {{{{GOAL}}}}\\nRun: {{{{RUN_ID}}}}\\n\" }});\n",
                        file, description
                    ));
                    script.push_str("if !written.success { throw written.error; }\n");
                    script.push_str("print(written.output);\n");
                }
                "read_file" => {
                    script.push_str(&format!(
                        "let found = read_file(#{{ path: \"{}\" }});\n",
                        file
                    ));
                    script.push_str(&format!(
                        "if found.success {{ print(found.output); }} else {{ log_warn(\"nothing to read at {}\"); }}\n",
                        file
                    ));
                }
                "list_files" => {
                    script.push_str("let files = list_files();\n");
                    script.push_str("print(\"Files in {{PROJECT}}: \" + files.output);\n");
                }
                "delete_file" => {
                    script.push_str(&format!(
                        "log_warn(\"not deleting {} without an explicit path\");\n",
                        file
                    ));
                }
                other => {
                    script.push_str(&format!("print(\"Tool available: {}\");\n", other));
                }
            }
        }

        script.push_str("\"done\"\n");
        Ok(script)
    }
}

const QUESTION_CUES: [&str; 5] = [
    "ask the user",
    "ask user",
    "clarify",
    "confirm with",
    "check with the user",
];

/// Asks for human input when the step text requests it or ends in `?`.
pub struct KeywordReasoner;

#[async_trait]
impl StepReasoner for KeywordReasoner {
    async fn think(&self, step: &Step, plan: &Plan) -> PilotResult<Thought> {
        let position = plan.position(&step.id).map(|i| i + 1).unwrap_or(0);
        let mut reasoning = format!(
            "Step {} of {}: {}.",
            position,
            plan.len(),
            step.description.trim_end_matches('.')
        );
        if !step.tool_hints.is_empty() {
            reasoning.push_str(&format!(" Suggested tools: {}.", step.tool_hints.join(", ")));
        }

        let lower = step.description.to_lowercase();
        let question = if step.description.trim_end().ends_with('?') {
            Some(step.description.trim().to_string())
        } else if QUESTION_CUES.iter().any(|cue| lower.contains(cue)) {
            Some(format!("Please clarify: {}", step.description.trim()))
        } else {
            None
        };

        Ok(Thought {
            reasoning,
            question,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParamType, ParameterSpec};

    fn tool(name: &str) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            description: String::new(),
            parameters: vec![ParameterSpec::required("project", ParamType::String, "")],
        }
    }

    fn texts(clauses: &[Clause]) -> Vec<&str> {
        clauses.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_split_clauses() {
        let clauses =
            split_clauses("Write index.html. Then add a stylesheet; finally test the page");
        assert_eq!(
            texts(&clauses),
            vec!["Write index.html", "Add a stylesheet", "Test the page"]
        );
        assert!(!clauses[0].sequential);
        assert!(clauses[1].sequential);
        assert!(clauses[2].sequential);
    }

    #[test]
    fn test_inline_then() {
        let clauses = split_clauses("build the api and then write tests");
        assert_eq!(texts(&clauses), vec!["build the api", "Write tests"]);
        assert!(clauses[1].sequential);
    }

    #[test]
    fn test_question_kept() {
        let clauses = split_clauses("Which color should the header be? Style the header.");
        assert_eq!(
            texts(&clauses),
            vec!["Which color should the header be?", "Style the header"]
        );
    }

    #[test]
    fn test_marker_needs_word_boundary() {
        let clauses = split_clauses("nextjs app scaffolding");
        assert_eq!(texts(&clauses), vec!["nextjs app scaffolding"]);
        assert!(!clauses[0].sequential);
    }

    #[tokio::test]
    async fn test_planner_builds_steps() {
        let ctx = PlanContext {
            tools: vec![tool("write_file"), tool("list_files")],
            ..Default::default()
        };
        let plan = HeuristicPlanner
            .generate_plan("Create index.html; then verify the files", &ctx)
            .await
            .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].tool_hints, vec!["write_file".to_string()]);
        assert_eq!(plan.steps[1].tool_hints, vec!["list_files".to_string()]);
        assert!(!plan.steps[0].checkpoint);
        assert!(plan.steps[1].checkpoint);
    }

    #[tokio::test]
    async fn test_planner_folds_feedback() {
        let ctx = PlanContext {
            feedback: vec!["too slow".to_string()],
            ..Default::default()
        };
        let plan = HeuristicPlanner
            .generate_plan("Write the report", &ctx)
            .await
            .unwrap();
        assert_eq!(plan.steps[0].id, "review-feedback");
        assert!(plan.steps[0].description.contains("too slow"));
        assert_eq!(plan.len(), 2);
    }

    #[tokio::test]
    async fn test_planner_rejects_empty_goal() {
        let err = HeuristicPlanner
            .generate_plan("  ", &PlanContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::EmptyPlan(_)));
    }

    #[tokio::test]
    async fn test_decomposer_dependencies_and_roles() {
        let decomposition = HeuristicDecomposer
            .decompose("Research competitor pricing; design the landing page; then write tests for the form")
            .await
            .unwrap();

        let tasks = &decomposition.tasks;
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].assigned_agent, AgentRole::Researcher);
        assert_eq!(tasks[1].assigned_agent, AgentRole::Designer);
        assert_eq!(tasks[2].assigned_agent, AgentRole::Tester);
        assert!(tasks[0].dependencies.is_empty());
        assert!(tasks[1].dependencies.is_empty());
        assert_eq!(tasks[2].dependencies, vec!["task-2".to_string()]);
        assert_eq!(decomposition.strategy, crate::models::Strategy::Hybrid);
    }

    #[test]
    fn test_target_file() {
        assert_eq!(target_file("Write index.html with a header"), "index.html");
        assert_eq!(target_file("Create src/app.js, then stop"), "src/app.js");
        assert_eq!(target_file("Summarize the findings"), "summarize-the-findings.md");
        assert_eq!(target_file("Open ../secret.txt"), "open-secret-txt.md");
    }

    #[tokio::test]
    async fn test_reasoner_asks_on_question() {
        let plan = Plan::new(
            "g",
            vec![
                Step::new("s1", "Which framework should we use?"),
                Step::new("s2", "Write the code"),
            ],
        );
        let thought = KeywordReasoner.think(&plan.steps[0], &plan).await.unwrap();
        assert_eq!(
            thought.question.as_deref(),
            Some("Which framework should we use?")
        );

        let thought = KeywordReasoner.think(&plan.steps[1], &plan).await.unwrap();
        assert!(thought.question.is_none());
        assert!(thought.reasoning.starts_with("Step 2 of 2"));
    }
}
