//! User-Agent rotation for page and attachment requests.

use rand::seq::SliceRandom;

/// Fallback User-Agent when the configured pool is empty (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (attachment-harvester)")
}

/// Pool of User-Agent strings; each request draws one at random.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    /// Builds a pool from configured strings, dropping blanks.
    #[must_use]
    pub fn new(agents: &[String]) -> Self {
        let agents: Vec<String> = agents
            .iter()
            .map(|agent| agent.trim().to_string())
            .filter(|agent| !agent.is_empty())
            .collect();
        let agents = if agents.is_empty() {
            vec![default_user_agent()]
        } else {
            agents
        };
        Self { agents }
    }

    /// Picks the User-Agent for the next request.
    #[must_use]
    pub fn pick(&self) -> &str {
        self.agents
            .choose(&mut rand::thread_rng())
            .map_or("", String::as_str)
    }

    /// Number of agents in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Always false: an empty configuration falls back to the default agent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
