use crate::{
    error::{GatewayError, Result},
    model::Participant,
    ParticipantId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Decides whether a participant can answer a query for `required`.
pub trait CapabilityMatcher: Send + Sync {
    fn matches(&self, participant: &Participant, required: &str) -> bool;
}

impl<F> CapabilityMatcher for F
where
    F: Fn(&Participant, &str) -> bool + Send + Sync,
{
    fn matches(&self, participant: &Participant, required: &str) -> bool {
        self(participant, required)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityMatch {
    /// Tag must be present verbatim.
    #[default]
    Exact,
    /// A tag `energy.solar` satisfies a query for `energy`.
    Prefix,
}

impl CapabilityMatcher for CapabilityMatch {
    fn matches(&self, participant: &Participant, required: &str) -> bool {
        match self {
            CapabilityMatch::Exact => participant.has_capability(required),
            CapabilityMatch::Prefix => participant.capabilities.iter().any(|tag| {
                tag == required
                    || (tag.starts_with(required) && tag[required.len()..].starts_with('.'))
            }),
        }
    }
}

/// Read-mostly map of participant identity to endpoint and capabilities.
pub struct ParticipantRegistry {
    participants: RwLock<HashMap<ParticipantId, Participant>>,
    matcher: Arc<dyn CapabilityMatcher>,
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new(Arc::new(CapabilityMatch::Exact))
    }
}

impl ParticipantRegistry {
    pub fn new(matcher: Arc<dyn CapabilityMatcher>) -> Self {
        Self {
            participants: RwLock::new(HashMap::new()),
            matcher,
        }
    }

    /// Adds or replaces the entry for `participant.id`.
    pub fn register(&self, participant: Participant) -> Result<()> {
        participant.validate()?;
        let replaced = self
            .participants
            .write()
            .insert(participant.id.clone(), participant.clone())
            .is_some();

        tracing::info!(
            participant_id = %participant.id,
            endpoint = %participant.endpoint,
            replaced,
            "Participant registered"
        );
        Ok(())
    }

    pub fn find_by_capability(&self, tag: &str) -> Vec<Participant> {
        let participants = self.participants.read();
        let mut found: Vec<Participant> = participants
            .values()
            .filter(|participant| self.matcher.matches(participant, tag))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn get(&self, id: &str) -> Result<Participant> {
        self.participants
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownParticipant(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<Participant> {
        self.participants.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }
}
