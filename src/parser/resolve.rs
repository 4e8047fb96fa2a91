use super::strategy::FieldStrategy;
use crate::document::Fragment;

/// Outcome of running one StrategyChain over a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'c> {
    pub value: Option<String>,
    /// Name of the winning strategy.
    pub strategy: Option<&'c str>,
}

/// First strategy in chain order with a non-empty trimmed result wins.
pub fn resolve<'c>(fragment: &Fragment<'_>, chain: &'c [FieldStrategy]) -> Resolution<'c> {
    for strategy in chain {
        if let Some(value) = strategy.apply(fragment) {
            return Resolution {
                value: Some(value),
                strategy: Some(strategy.name.as_str()),
            };
        }
    }
    Resolution {
        value: None,
        strategy: None,
    }
}
