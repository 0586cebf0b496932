use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing CDP command.
#[derive(Debug, Serialize)]
pub struct CdpCommand {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Routes the command to an attached target when set.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Any frame Chrome sends us. Responses carry `id`, events carry `method`.
#[derive(Debug, Deserialize)]
pub struct RawCdpMessage {
    pub id: Option<u64>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<CdpProtocolError>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Error object of a failed command response.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpProtocolError {
    pub code: i64,
    pub message: String,
}

/// Response to a command we sent.
#[derive(Debug)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Result<Value, CdpProtocolError>,
    pub session_id: Option<String>,
}

/// Asynchronous notification pushed by Chrome.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event name, e.g. `Network.responseReceived`.
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

pub enum MessageKind {
    Response(CdpResponse),
    Event(CdpEvent),
}

impl RawCdpMessage {
    /// Split a raw frame into a response or an event.
    ///
    /// An `id` always wins over `method`; frames with neither are dropped.
    #[must_use]
    pub fn classify(self) -> Option<MessageKind> {
        match (self.id, self.method) {
            (Some(id), _) => {
                let result = match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Some(MessageKind::Response(CdpResponse {
                    id,
                    result,
                    session_id: self.session_id,
                }))
            }
            (None, Some(method)) => Some(MessageKind::Event(CdpEvent {
                method,
                params: self.params.unwrap_or(Value::Null),
                session_id: self.session_id,
            })),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(text: &str) -> Option<MessageKind> {
        serde_json::from_str::<RawCdpMessage>(text).unwrap().classify()
    }

    #[test]
    fn command_omits_absent_params_and_session() {
        let cmd = CdpCommand {
            id: 7,
            method: "Browser.close".into(),
            params: None,
            session_id: None,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json, json!({"id": 7, "method": "Browser.close"}));
    }

    #[test]
    fn command_routes_to_session() {
        let cmd = CdpCommand {
            id: 8,
            method: "Runtime.evaluate".into(),
            params: Some(json!({"expression": "1"})),
            session_id: Some("S1".into()),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["sessionId"], "S1");
        assert_eq!(json["params"]["expression"], "1");
    }

    #[test]
    fn response_with_error_is_err() {
        let Some(MessageKind::Response(resp)) =
            classify(r#"{"id":3,"error":{"code":-32000,"message":"No node"}}"#)
        else {
            panic!("expected response");
        };
        let err = resp.result.unwrap_err();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "No node");
    }

    #[test]
    fn response_without_result_is_null() {
        let Some(MessageKind::Response(resp)) = classify(r#"{"id":4}"#) else {
            panic!("expected response");
        };
        assert_eq!(resp.result.unwrap(), Value::Null);
    }

    #[test]
    fn session_scoped_event_keeps_session() {
        let Some(MessageKind::Event(event)) = classify(
            r#"{"method":"Runtime.consoleAPICalled","params":{"type":"log"},"sessionId":"S9"}"#,
        ) else {
            panic!("expected event");
        };
        assert_eq!(event.method, "Runtime.consoleAPICalled");
        assert_eq!(event.params["type"], "log");
        assert_eq!(event.session_id.as_deref(), Some("S9"));
    }

    #[test]
    fn empty_frame_is_unclassifiable() {
        assert!(classify("{}").is_none());
    }
}
