use std::fmt::Display;

/// How the router should cancel an active procedure call.
///
/// Regardless of the mode, the local pending call resolves as canceled as soon as the cancellation
/// is requested.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CallCancelMode {
    /// The router answers the caller immediately and does not interrupt the callee.
    Skip,
    /// The router interrupts the callee and waits for it to acknowledge.
    Kill,
    /// The router interrupts the callee and answers the caller immediately.
    #[default]
    KillNoWait,
}

impl CallCancelMode {
    /// The mode as transmitted in CANCEL options.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Kill => "kill",
            Self::KillNoWait => "killnowait",
        }
    }
}

impl Display for CallCancelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
