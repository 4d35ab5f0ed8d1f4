//! Messages exchanged on the interactive websocket, one JSON text frame each.

use crate::error::ErrorInfo;

use serde::{Deserialize, Serialize};

/// client -> server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Sent once, starts the session.
    #[serde(rename_all = "camelCase")]
    Code { source_code: String },
    /// Written verbatim to the program's terminal.
    Input { data: String },
}

/// server -> client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Output {
        data: String,
    },
    #[serde(rename_all = "camelCase")]
    CompileError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Exit {
        exit_code: i32,
        timed_out: bool,
    },
    Error(ErrorInfo),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    use serde_json::json;

    #[test]
    fn parse_client_messages() {
        let code: ClientMessage =
            serde_json::from_str(r#"{"type":"code","sourceCode":"int main(){}"}"#).unwrap();
        assert_eq!(
            code,
            ClientMessage::Code {
                source_code: "int main(){}".into()
            }
        );

        let input: ClientMessage =
            serde_json::from_str(r#"{"type":"input","data":"42\n"}"#).unwrap();
        assert_eq!(input, ClientMessage::Input { data: "42\n".into() });

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resize"}"#).is_err());
    }

    #[test]
    fn server_message_tags() {
        let exit = ServerMessage::Exit {
            exit_code: 124,
            timed_out: true,
        };
        assert_eq!(
            serde_json::to_value(&exit).unwrap(),
            json!({ "type": "exit", "exitCode": 124, "timedOut": true })
        );

        let ce = ServerMessage::CompileError {
            message: "error: expected ';'".into(),
        };
        assert_eq!(
            serde_json::to_value(&ce).unwrap(),
            json!({ "type": "compileError", "message": "error: expected ';'" })
        );

        let err = ServerMessage::Error(ErrorInfo::new(ErrorCode::IsolationFailure, "boom"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({ "type": "error", "code": "IsolationFailure", "message": "boom" })
        );
    }
}
