//! Prompt templates for every oracle call the research loop makes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::ResearchState;

pub const PLANNER_SYSTEM: &str = "You are a strategic research planner with expertise in breaking down complex questions into logical search steps. Your primary role is to create a detailed research plan before generating any search queries.

First, analyze the question thoroughly:
- Break down the core components and key concepts
- Identify any implicit assumptions or context needed
- Consider what foundational knowledge might be required
- Think about potential information gaps that need filling

Then, develop a strategic research plan that:
- Outlines the logical progression of information needed
- Identifies dependencies between different pieces of information
- Considers multiple angles or perspectives that might be relevant
- Anticipates potential dead-ends or areas needing clarification

Finally, translate this plan into a numbered list of 1-5 sequential search queries that:
- Are specific and focused (avoid broad queries that return general information)
- Are written in natural language without Boolean operators (no AND/OR)
- Progress logically from foundational to specific information
- Build upon each other in a meaningful way

Initial queries can be exploratory: they establish baseline information or verify assumptions before more targeted searches. Each query should serve a specific purpose in the overall research plan.";

pub const DECISION_SYSTEM: &str = "You are a research supervisor deciding whether the evidence gathered so far is sufficient to answer the user's question comprehensively and accurately.";

pub const SUMMARY_SYSTEM: &str = "You are a research extraction specialist. You condense raw web content into faithful, well-anchored narrative syntheses.";

const ANSWER_RULES: &str = "CRITICAL RULES:
- Citation is non-negotiable. Every key fact, statistic, or finding must be cited with a markdown link [source name](url) placed immediately after the sentence or clause it supports. Never add a raw URL.
- Synthesize information from multiple sources to provide a balanced and multi-faceted view instead of paraphrasing a single source.
- Answer naturally and never describe how the research was carried out.
- Provide direct, confident answers.
- When discussing time-sensitive information, reference the current date and mention how recent the information is.";

const INCOMPLETE_NOTICE: &str = "IMPORTANT: We may not have all the information needed to answer the question comprehensively, but we must make our best effort with what is available. Be transparent about any limitations: explicitly acknowledge which parts of the question the available sources do not cover.";

pub fn timestamp_line(now: DateTime<Utc>) -> String {
    format!("CURRENT DATE AND TIME: {}", now.to_rfc3339())
}

/// Joins prompt sections, skipping empty ones so optional context leaves no gaps.
fn sections(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn planner_prompt(state: &ResearchState, now: DateTime<Utc>) -> String {
    let timestamp = timestamp_line(now);
    let conversation = state.render_conversation();
    let location = state.render_location_hint();
    let evidence = state.render_evidence();
    let evidence = if evidence.is_empty() {
        "No searches have been run yet.".to_string()
    } else {
        evidence
    };

    sections(&[
        "Based on the current context, create a research plan and generate search queries to gather the information needed to answer the user's question.",
        "Please provide:\n1. A detailed research plan that outlines your strategic approach\n2. 1-5 specific search queries that will help gather the required information",
        "The queries should work together as a cohesive research strategy and must not repeat searches that already appear below.",
        "Here is the conversation history for context:",
        &conversation,
        "Here is the current context of your research:",
        &timestamp,
        &location,
        &evidence,
    ])
}

pub fn decision_prompt(state: &ResearchState, now: DateTime<Utc>) -> String {
    let timestamp = timestamp_line(now);
    let conversation = state.render_conversation();
    let location = state.render_location_hint();
    let evidence = state.render_evidence();

    sections(&[
        "You can take one of two actions:\n1. CONTINUE: The evidence is not yet sufficient; plan and run more searches.\n2. ANSWER: The evidence is sufficient to answer the user's question comprehensively.",
        "Choose 'answer' only when the gathered sources cover every part of the question. Provide a short title describing the action for the user interface and a brief reasoning.",
        "Here is the conversation history:",
        &conversation,
        &timestamp,
        &location,
        "Here is the evidence gathered so far:",
        &evidence,
    ])
}

/// Metadata and content for a single page summary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SummaryPromptInput<'a> {
    pub query: &'a str,
    pub title: &'a str,
    pub url: &'a str,
    pub date: &'a str,
    pub snippet: &'a str,
    pub conversation: &'a str,
    pub content: &'a str,
}

pub fn summary_prompt(input: &SummaryPromptInput<'_>) -> String {
    format!(
        "Given a research topic and raw web content, create a thoroughly detailed synthesis as a cohesive narrative that flows naturally between key concepts.

Extract the most valuable information related to the research topic, including relevant facts, statistics, methodologies, claims, and contextual information. Preserve technical terminology and domain-specific language from the source material.

Integrate specific metrics, dates, and quantitative information within their proper context. Acknowledge limitations by noting where information related to aspects of the research topic is missing or incomplete.

Important guidelines:
- Maintain original data context (e.g., \"2025 study of 150 patients\" rather than generic \"recent study\")
- Keep details anchored to their original context
- Write a cohesive narrative rather than disconnected bullet points or lists
- Use paragraph breaks only when transitioning between major themes

If the content lacks a specific aspect of the research topic, clearly state that in the synthesis. NEVER make up information and NEVER rely on external knowledge.

Research Topic: {query}

Source Information:
- Title: {title}
- URL: {url}
- Date: {date}
- Snippet: {snippet}

Conversation Context:
{conversation}

Raw Web Content:
{content}

Please provide a comprehensive synthesis of the above content focused on the research topic:",
        query = input.query,
        title = input.title,
        url = input.url,
        date = input.date,
        snippet = input.snippet,
        conversation = input.conversation,
        content = input.content,
    )
}

pub fn answer_system(is_final: bool, now: DateTime<Utc>) -> String {
    let timestamp = timestamp_line(now);
    let intro = "You are a helpful research assistant. Your goal is to provide comprehensive, accurate, and up-to-date answers grounded in the sources provided.";
    if is_final {
        sections(&[intro, INCOMPLETE_NOTICE, ANSWER_RULES, &timestamp])
    } else {
        sections(&[intro, ANSWER_RULES, &timestamp])
    }
}

pub fn answer_prompt(state: &ResearchState) -> String {
    let conversation = state.render_conversation();
    let location = state.render_location_hint();
    let evidence = state.render_evidence();

    sections(&[
        "Here is the conversation so far:",
        &conversation,
        &location,
        "Answer the user's latest message using the sources below. Use markdown citations [source name](url) for all key facts and findings.",
        "Sources:",
        &evidence,
    ])
}

pub const RELEVANCY_SYSTEM: &str = "You are a balanced and nuanced answer relevancy evaluator. Your job is to determine if LLM outputs are relevant to the input, including handling partially relevant or uncertain cases.

Key Principles:
1. Evaluate whether the output addresses what the input is asking for
2. Consider both direct answers and related context
3. Prioritize relevance to the input over correctness
4. Recognize that responses can be partially relevant
5. Empty inputs or error messages should always be marked as \"no\"
6. Responses that discuss the type of information being asked show partial relevance";

pub fn statements_prompt(answer: &str) -> String {
    format!(
        "Given the text, break it down into meaningful statements while preserving context and relationships. Don't split too aggressively.

Split compound statements particularly when they:
- Are joined by \"and\"
- Contain multiple distinct facts or claims
- Have multiple descriptive elements about the subject

Handle special cases:
- A single word answer should be treated as a complete statement
- Error messages should be treated as a single statement
- Empty strings should return an empty list
- When splitting text, keep related information together

Example text: Look! A bird! Birds are an interesting animal.
{{\"statements\": [\"Look!\", \"A bird!\", \"Birds are interesting animals.\"]}}

Text:
{answer}"
    )
}

pub fn relevancy_prompt(question: &str, statements: &[String]) -> String {
    let listed = statements
        .iter()
        .enumerate()
        .map(|(idx, statement)| format!("{}. {statement}", idx + 1))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Evaluate each statement's relevance to the input question, considering direct answers, related context, and uncertain cases.

Return one verdict object per statement, in order. Each verdict has:
- \"verdict\": \"yes\", \"no\", or \"unsure\"
- \"reason\": a clear explanation of the verdict

Verdict guidelines:
- \"yes\": the statement explicitly and directly answers the question, can stand alone as an answer, or gives the right kind of answer (a place for \"where\", a person for \"who\"). If it directly addresses the question but is wrong, use \"unsure\".
- \"unsure\": the statement is partially relevant. It discusses the type of information asked about, refers to the answer indirectly, mentions related entities or quantities, or needs more context to be complete.
- \"no\": the statement has no meaningful connection to the question. It mentions neither the subject nor the type of information requested, is empty, or only gives general facts about the subject unrelated to what is asked.

Judge relevancy only, never correctness. The number of verdicts MUST match the number of statements exactly.

Input:
{question}

Number of statements: {count}

Statements:
{listed}",
        count = statements.len(),
    )
}
