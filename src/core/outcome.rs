use serde::{Deserialize, Serialize};

/// Combined result of one delivery, local or forwarded.
///
/// `delivered` travels as `send` on the wire so replies from any node fold
/// into the same tally.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub ok: bool,
    #[serde(rename = "send", default)]
    pub delivered: u64,
    #[serde(default)]
    pub local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(delivered: u64, local: bool) -> Self {
        Self {
            ok: true,
            delivered,
            local,
            reason: None,
        }
    }

    pub fn failed(delivered: u64, local: bool) -> Self {
        Self {
            ok: false,
            delivered,
            local,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::DeliveryOutcome;
    use serde_json::json;

    #[test]
    fn delivered_count_uses_wire_name() {
        let value = serde_json::to_value(DeliveryOutcome::delivered(4, true)).expect("encode");
        assert_eq!(value, json!({ "ok": true, "send": 4, "local": true }));
    }

    #[test]
    fn peer_reply_without_local_flag_decodes() {
        let outcome: DeliveryOutcome =
            serde_json::from_value(json!({ "ok": true, "send": 2 })).expect("decode");
        assert_eq!(outcome, DeliveryOutcome::delivered(2, false));
    }
}
