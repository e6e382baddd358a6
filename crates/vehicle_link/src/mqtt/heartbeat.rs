use serde_json::json;

/// Device address the heartbeat writes its connection state to.
const HEARTBEAT_OBJECT: &str = "34183";
const HEARTBEAT_INSTANCE: &str = "1";
const HEARTBEAT_RESOURCE: &str = "54";

/// Sentinel states the heartbeat alternates between; the device keeps its
/// data push active as long as either value keeps arriving.
const STATE_PRIMARY: u8 = 2;
const STATE_SECONDARY: u8 = 1;

/// Alternating heartbeat state sequence: 2, 1, 2, 1, …
#[derive(Debug, Default)]
pub struct HeartbeatCycle {
    toggled: bool,
}

impl HeartbeatCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_state(&mut self) -> u8 {
        let state = if self.toggled {
            STATE_SECONDARY
        } else {
            STATE_PRIMARY
        };
        self.toggled = !self.toggled;
        state
    }
}

/// Build one heartbeat payload.
pub fn heartbeat_payload(state: u8, timestamp_ms: i64) -> String {
    json!({
        "version": "1.2",
        "timestamp": timestamp_ms,
        "trans_id": xid::new().to_string(),
        "content": {
            HEARTBEAT_OBJECT: {
                HEARTBEAT_INSTANCE: {
                    HEARTBEAT_RESOURCE: state.to_string()
                }
            }
        }
    })
    .to_string()
}
