//! Chaos scenarios for the canvas protocol.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// CAN-001: Healthy bus, verify one leader and one visible object
    SteadyState,

    /// CAN-002: Leader crashes, next-lowest id takes over
    LeaderFailover,

    /// CAN-003: Lower id joins late, recovers retained state and takes over
    LateJoin,

    /// CAN-004: Partition yields two leaders, heal converges to one
    SplitBrain,

    /// CAN-005: Garbage on both topics is discarded
    MalformedPayload,

    /// CAN-006: Leader's connection drops, supervisor reconnects with state
    FlakyTransport,

    /// CAN-007: 30% loss plus latency, then recovery
    LossyBus,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyState,
            ScenarioId::LeaderFailover,
            ScenarioId::LateJoin,
            ScenarioId::SplitBrain,
            ScenarioId::MalformedPayload,
            ScenarioId::FlakyTransport,
            ScenarioId::LossyBus,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyState => "steady_state",
            ScenarioId::LeaderFailover => "leader_failover",
            ScenarioId::LateJoin => "late_join",
            ScenarioId::SplitBrain => "split_brain",
            ScenarioId::MalformedPayload => "malformed_payload",
            ScenarioId::FlakyTransport => "flaky_transport",
            ScenarioId::LossyBus => "lossy_bus",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyState => "Healthy bus: min-id leader, every node in order, object visible once",
            ScenarioId::LeaderFailover => "Crash the leader, verify takeover within the membership timeout",
            ScenarioId::LateJoin => "Lowest id joins late, picks up retained state and takes over",
            ScenarioId::SplitBrain => "Partition into two groups for 5s, verify convergence after heal",
            ScenarioId::MalformedPayload => "Inject malformed heartbeats and state, verify they are ignored",
            ScenarioId::FlakyTransport => "Drop the leader's connection, verify reconnect keeps the object",
            ScenarioId::LossyBus => "30% loss and 20ms latency, verify recovery once the bus is clean",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_state" | "steadystate" | "can-001" => Ok(ScenarioId::SteadyState),
            "leader_failover" | "leaderfailover" | "can-002" => Ok(ScenarioId::LeaderFailover),
            "late_join" | "latejoin" | "can-003" => Ok(ScenarioId::LateJoin),
            "split_brain" | "splitbrain" | "can-004" => Ok(ScenarioId::SplitBrain),
            "malformed_payload" | "malformedpayload" | "can-005" => Ok(ScenarioId::MalformedPayload),
            "flaky_transport" | "flakytransport" | "can-006" => Ok(ScenarioId::FlakyTransport),
            "lossy_bus" | "lossybus" | "can-007" => Ok(ScenarioId::LossyBus),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("CAN-004".parse::<ScenarioId>(), Ok(ScenarioId::SplitBrain));
        assert_eq!("LateJoin".parse::<ScenarioId>(), Ok(ScenarioId::LateJoin));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_every_scenario_is_described() {
        let descriptions: std::collections::BTreeSet<&str> =
            ScenarioId::all().iter().map(|s| s.description()).collect();
        assert_eq!(descriptions.len(), ScenarioId::all().len());
    }
}
