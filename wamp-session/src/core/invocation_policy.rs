use std::fmt::Display;

/// How the router should select a callee when a procedure is registered by several sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPolicy {
    /// Only one callee may register the procedure.
    #[default]
    Single,
    RoundRobin,
    Random,
    First,
    Last,
}

impl InvocationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::RoundRobin => "roundrobin",
            Self::Random => "random",
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

impl Display for InvocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
