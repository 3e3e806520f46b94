//! Research state accumulated over one research session.
//!
//! The loop controller owns a single [`ResearchState`] and is the only code
//! path that mutates it. Every other component receives a shared borrow and
//! reads the rendered views when building oracle prompts.

use serde::{Deserialize, Serialize};

use crate::config::ResearchConfig;

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::System => "SYSTEM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// `ROLE: content` blocks separated by blank lines.
pub fn render_messages(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str(), message.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Coarse location of the person asking, used to localise searches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserLocation {
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl UserLocation {
    pub fn city_country(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            country: Some(country.into()),
            ..Self::default()
        }
    }

    /// `USER LOCATION: <city>, <country>`, or an empty string when neither is known.
    pub fn render(&self) -> String {
        let parts: Vec<&str> = [self.city.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect();

        if parts.is_empty() {
            return String::new();
        }
        format!("USER LOCATION: {}", parts.join(", "))
    }
}

/// One retrieved and summarised web source tied to a specific query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub date: String,
    pub raw_content: String,
    pub summary: String,
}

impl EvidenceRecord {
    /// Placeholder returned when a search yields nothing.
    pub fn no_results() -> Self {
        Self {
            title: "No results found".to_string(),
            url: String::new(),
            snippet: "No search results were found for this query. Please try rephrasing your search or ask a different question.".to_string(),
            date: "N/A".to_string(),
            raw_content: "No content available".to_string(),
            summary: "The search returned no sources for this query.".to_string(),
        }
    }

    /// Placeholder returned when the search provider itself failed.
    pub fn search_error(reason: &str) -> Self {
        Self {
            title: "Search Error".to_string(),
            url: String::new(),
            snippet: "I encountered an error while searching. Please try again or rephrase your question.".to_string(),
            date: "N/A".to_string(),
            raw_content: "Error occurred during search and scrape operation".to_string(),
            summary: format!("The search could not be completed: {reason}"),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.url.is_empty()
    }

    fn render(&self) -> String {
        [
            format!("### {} - {}", self.date, self.title),
            self.url.clone(),
            self.snippet.clone(),
            format!("<summary>\n{}\n</summary>", self.summary),
        ]
        .join("\n\n")
    }
}

/// Results for one executed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRound {
    pub query: String,
    pub results: Vec<EvidenceRecord>,
}

impl SearchRound {
    pub fn new(query: impl Into<String>, results: Vec<EvidenceRecord>) -> Self {
        Self {
            query: query.into(),
            results,
        }
    }
}

/// Accumulated research context for a single question.
#[derive(Debug, Clone)]
pub struct ResearchState {
    step: u32,
    max_steps: u32,
    rounds: Vec<SearchRound>,
    conversation: Vec<ConversationMessage>,
    location: Option<UserLocation>,
}

impl ResearchState {
    pub fn new(conversation: Vec<ConversationMessage>, location: Option<UserLocation>) -> Self {
        Self::with_budget(conversation, location, ResearchConfig::DEFAULT_MAX_STEPS)
    }

    pub fn with_budget(
        conversation: Vec<ConversationMessage>,
        location: Option<UserLocation>,
        max_steps: u32,
    ) -> Self {
        Self {
            step: 0,
            max_steps,
            rounds: Vec::new(),
            conversation,
            location,
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn rounds(&self) -> &[SearchRound] {
        &self.rounds
    }

    pub fn conversation(&self) -> &[ConversationMessage] {
        &self.conversation
    }

    pub fn location(&self) -> Option<&UserLocation> {
        self.location.as_ref()
    }

    /// Most recent user message, used as the headline question in logs.
    pub fn latest_question(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    /// Distinct source URLs gathered so far, in first-seen order.
    pub fn source_urls(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.rounds
            .iter()
            .flat_map(|round| round.results.iter())
            .filter(|record| !record.is_sentinel())
            .filter(|record| seen.insert(record.url.clone()))
            .map(|record| record.url.clone())
            .collect()
    }

    pub fn record_search_round(&mut self, round: SearchRound) {
        self.rounds.push(round);
    }

    pub fn increment_step(&mut self) {
        self.step = self.step.saturating_add(1);
    }

    pub fn should_stop(&self) -> bool {
        self.step >= self.max_steps
    }

    pub fn render_conversation(&self) -> String {
        render_messages(&self.conversation)
    }

    pub fn render_evidence(&self) -> String {
        self.rounds
            .iter()
            .map(|round| {
                std::iter::once(format!("## Query: \"{}\"", round.query))
                    .chain(round.results.iter().map(EvidenceRecord::render))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn render_location_hint(&self) -> String {
        self.location
            .as_ref()
            .map(UserLocation::render)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, url: &str) -> EvidenceRecord {
        EvidenceRecord {
            title: title.to_string(),
            url: url.to_string(),
            snippet: "snippet".to_string(),
            date: "Published: 2024-01-01".to_string(),
            raw_content: "raw".to_string(),
            summary: format!("summary of {title}"),
        }
    }

    #[test]
    fn should_stop_tracks_budget() {
        let mut state = ResearchState::with_budget(vec![], None, 2);
        assert!(!state.should_stop());
        state.increment_step();
        assert!(!state.should_stop());
        state.increment_step();
        assert!(state.should_stop());
        state.increment_step();
        assert!(state.should_stop());
        assert_eq!(state.step(), 3);
    }

    #[test]
    fn default_budget_is_five() {
        let state = ResearchState::new(vec![], None);
        assert_eq!(state.max_steps(), 5);
    }

    #[test]
    fn renders_conversation_with_roles() {
        let state = ResearchState::new(
            vec![
                ConversationMessage::user("What's the capital of France?"),
                ConversationMessage::assistant("Paris."),
            ],
            None,
        );
        assert_eq!(
            state.render_conversation(),
            "USER: What's the capital of France?\n\nASSISTANT: Paris."
        );
        assert_eq!(state.latest_question(), Some("What's the capital of France?"));
    }

    #[test]
    fn renders_evidence_in_recorded_order() {
        let mut state = ResearchState::new(vec![], None);
        state.record_search_round(SearchRound::new("first", vec![record("A", "https://a.test")]));
        state.record_search_round(SearchRound::new("second", vec![record("B", "https://b.test")]));

        let rendered = state.render_evidence();
        let first = rendered.find("## Query: \"first\"").unwrap();
        let second = rendered.find("## Query: \"second\"").unwrap();
        assert!(first < second);
        assert!(rendered.contains("### Published: 2024-01-01 - A"));
        assert!(rendered.contains("<summary>\nsummary of B\n</summary>"));
        assert_eq!(rendered, state.render_evidence());
    }

    #[test]
    fn location_hint_handles_partial_data() {
        let full = UserLocation::city_country("Recife", "BR");
        assert_eq!(full.render(), "USER LOCATION: Recife, BR");

        let country_only = UserLocation {
            country: Some("FR".into()),
            ..UserLocation::default()
        };
        assert_eq!(country_only.render(), "USER LOCATION: FR");

        let state = ResearchState::new(vec![], Some(UserLocation::default()));
        assert_eq!(state.render_location_hint(), "");
    }

    #[test]
    fn source_urls_skip_sentinels_and_duplicates() {
        let mut state = ResearchState::new(vec![], None);
        state.record_search_round(SearchRound::new(
            "q",
            vec![
                record("A", "https://a.test"),
                EvidenceRecord::no_results(),
                record("A again", "https://a.test"),
                record("B", "https://b.test"),
            ],
        ));
        assert_eq!(
            state.source_urls(),
            vec!["https://a.test".to_string(), "https://b.test".to_string()]
        );
    }
}
