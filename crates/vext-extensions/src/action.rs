use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Control-flow result of one extension callback.
pub enum ClientScriptAction {
    Fail,
    Pass,
    Replace,
    PreDebug,
    Abort,
    EarlyReturn,
    Unknown,
}

impl ClientScriptAction {
    /// Maps the numeric value scripts return through `Client.Action`.
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Fail),
            1 => Some(Self::Pass),
            2 => Some(Self::Replace),
            3 => Some(Self::PreDebug),
            4 => Some(Self::Abort),
            5 => Some(Self::EarlyReturn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "FAIL",
            Self::Pass => "PASS",
            Self::Replace => "REPLACE",
            Self::PreDebug => "PRE_DEBUG",
            Self::Abort => "ABORT",
            Self::EarlyReturn => "EARLY_RETURN",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Values honored only when the host enables debug hooks.
    pub fn is_debug_gated(&self) -> bool {
        matches!(self, Self::PreDebug | Self::Abort | Self::EarlyReturn)
    }
}

#[cfg(test)]
mod tests {
    use super::ClientScriptAction;
    use vext_runtime::SCRIPT_ACTION_CONSTANTS;

    #[test]
    fn unit_action_values_match_published_script_constants() {
        for (name, value) in SCRIPT_ACTION_CONSTANTS {
            let action = ClientScriptAction::from_value(value).expect("known action");
            assert_eq!(action.as_str(), name);
        }
        assert_eq!(ClientScriptAction::from_value(6), None);
        assert_eq!(ClientScriptAction::from_value(-1), None);
    }

    #[test]
    fn unit_only_debug_values_are_gated() {
        assert!(ClientScriptAction::Abort.is_debug_gated());
        assert!(!ClientScriptAction::Replace.is_debug_gated());
        assert!(!ClientScriptAction::Fail.is_debug_gated());
    }
}
