use serde::{Deserialize, Serialize};

use crate::error::PubSubError;
use crate::ledger::{AccountId, Amount};

/// Authenticated caller of a ledger operation and the value attached to the call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallContext {
    pub caller: AccountId,
    #[serde(default)]
    pub value: Amount,
}

impl CallContext {
    pub fn new(caller: impl Into<AccountId>) -> Self {
        Self {
            caller: caller.into(),
            value: 0,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }

    /// Non-payable operations refuse attached value instead of silently keeping it.
    pub(crate) fn require_no_value(&self) -> Result<(), PubSubError> {
        if self.value > 0 {
            return Err(PubSubError::InvalidArgument(
                "operation does not accept attached value",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attached_value_is_rejected_for_non_payable_calls() {
        assert!(CallContext::new("alice").require_no_value().is_ok());
        let err = CallContext::new("alice")
            .with_value(1)
            .require_no_value()
            .unwrap_err();
        assert!(matches!(err, PubSubError::InvalidArgument(_)));
    }
}
