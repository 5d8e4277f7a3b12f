//! One-shot intent classification used to pick an agent for unpinned sends.

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use serde_json::json;

use super::error::StreamError;
use crate::config::AgentProfile;

pub trait IntentClassifier: Send + Sync {
    /// Agent id best suited for `input`, or `None` to let the server decide.
    fn select_agent(&self, input: &str, user_id: &str) -> Result<Option<String>, StreamError>;
}

/// Picks the configured agent whose keywords occur most often in the input.
pub struct KeywordIntentClassifier {
    agents: Vec<(String, Vec<String>)>,
}

impl KeywordIntentClassifier {
    pub fn new(agents: &[AgentProfile]) -> Self {
        Self {
            agents: agents
                .iter()
                .filter(|a| !a.keywords.is_empty())
                .map(|a| (a.id.clone(), a.keywords.iter().map(|k| k.to_lowercase()).collect()))
                .collect(),
        }
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn select_agent(&self, input: &str, _user_id: &str) -> Result<Option<String>, StreamError> {
        let text = input.to_lowercase();
        let mut best: Option<(&str, usize)> = None;
        for (id, keywords) in &self.agents {
            let hits = keywords.iter().filter(|k| text.contains(k.as_str())).count();
            // ties keep the earlier agent
            if hits > 0 && best.is_none_or(|(_, n)| hits > n) {
                best = Some((id, hits));
            }
        }
        Ok(best.map(|(id, _)| id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    #[serde(default, alias = "agent")]
    agent_id: Option<String>,
}

/// Asks the server's intent endpoint.
pub struct HttpIntentClassifier {
    client: Client,
    endpoint: String,
    token: Option<SecretBox<String>>,
}

impl HttpIntentClassifier {
    pub fn new(endpoint: impl Into<String>, token: Option<&SecretBox<String>>) -> Result<Self, StreamError> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: endpoint.into(),
            token: token.map(|t| SecretBox::new(Box::new(t.expose_secret().clone()))),
        })
    }
}

impl IntentClassifier for HttpIntentClassifier {
    fn select_agent(&self, input: &str, user_id: &str) -> Result<Option<String>, StreamError> {
        let mut builder = self.client.post(&self.endpoint).json(&json!({ "input": input, "user_id": user_id }));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        let response = builder.send()?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(StreamError::Http { status, body: response.text().unwrap_or_default() });
        }
        let parsed: IntentResponse = response.json()?;
        Ok(parsed.agent_id.filter(|id| !id.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents() -> Vec<AgentProfile> {
        vec![
            AgentProfile { id: "outliner".into(), name: "Outliner".into(), keywords: vec!["outline".into(), "plot".into()] },
            AgentProfile { id: "critic".into(), name: "Critic".into(), keywords: vec!["evaluate".into(), "script".into()] },
            AgentProfile { id: "silent".into(), name: "Silent".into(), keywords: vec![] },
        ]
    }

    #[test]
    fn picks_agent_with_most_hits() {
        let c = KeywordIntentClassifier::new(&agents());
        assert_eq!(c.select_agent("Please evaluate my script", "u").unwrap(), Some("critic".into()));
        assert_eq!(c.select_agent("Outline the PLOT of act two", "u").unwrap(), Some("outliner".into()));
    }

    #[test]
    fn ties_keep_declaration_order() {
        let c = KeywordIntentClassifier::new(&agents());
        assert_eq!(c.select_agent("outline this script", "u").unwrap(), Some("outliner".into()));
    }

    #[test]
    fn no_hits_means_no_agent() {
        let c = KeywordIntentClassifier::new(&agents());
        assert_eq!(c.select_agent("hello there", "u").unwrap(), None);
    }
}
