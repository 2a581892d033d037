/// Who the author of a message is probably talking to, as judged by the model.
///
/// Labels are rendered with the agent's name and parsed back by exact match only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interlocutor {
    AgentForSure,
    AgentPossibly,
    SomeoneElse,
    NotSure,
}

impl Interlocutor {
    pub const ALL: [Interlocutor; 4] = [
        Interlocutor::AgentForSure,
        Interlocutor::AgentPossibly,
        Interlocutor::SomeoneElse,
        Interlocutor::NotSure,
    ];

    pub fn label(&self, agent_name: &str) -> String {
        match self {
            Interlocutor::AgentForSure => format!("{}, for sure", agent_name),
            Interlocutor::AgentPossibly => format!("{}, possibly", agent_name),
            Interlocutor::SomeoneElse => "someone else".to_string(),
            Interlocutor::NotSure => "not sure".to_string(),
        }
    }

    pub fn labels(agent_name: &str) -> Vec<String> {
        Self::ALL.iter().map(|i| i.label(agent_name)).collect()
    }

    pub fn from_label(label: &str, agent_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.label(agent_name) == label)
    }

    /// Both agent-named labels admit a reply
    pub fn addresses_agent(&self) -> bool {
        matches!(self, Interlocutor::AgentForSure | Interlocutor::AgentPossibly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_by_exact_match() {
        for i in Interlocutor::ALL {
            assert_eq!(Interlocutor::from_label(&i.label("Glandon"), "Glandon"), Some(i));
        }
        assert_eq!(Interlocutor::from_label("Glandon", "Glandon"), None);
        assert_eq!(Interlocutor::from_label("glandon, for sure", "Glandon"), None);
    }

    #[test]
    fn test_only_agent_labels_admit() {
        assert!(Interlocutor::AgentForSure.addresses_agent());
        assert!(Interlocutor::AgentPossibly.addresses_agent());
        assert!(!Interlocutor::SomeoneElse.addresses_agent());
        assert!(!Interlocutor::NotSure.addresses_agent());
    }
}
