//! JSON protocol and command dispatch.
//!
//! One request per line in server mode, a single request in one-shot
//! mode. Analysis failures travel inside the response (`class` is
//! `failure` or `error`); only transport problems escape to the caller.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::buffer::Buffer;
use crate::cache::FILE_CACHE;
use crate::config::ProjectConfig;
use crate::query::OpenAction;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RequestPosition {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default = "default_document")]
    pub document: String,
    /// One-shot requests carry the buffer contents inline.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

fn default_document() -> String {
    "*buffer*".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Set the buffer contents from the request's `source` field.
    Tell,
    Outline,
    TypeAtPos {
        position: RequestPosition,
    },
    CompletePrefix {
        position: RequestPosition,
        prefix: String,
    },
    RefactorOpen {
        position: RequestPosition,
        action: OpenAction,
    },
    Errors,
    DumpConfiguration,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Class {
    Return,
    Failure,
    Error,
    Exception,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub class: Class,
    pub value: Value,
    pub notifications: Vec<String>,
}

impl Response {
    pub fn returned(value: Value, notifications: Vec<String>) -> Self {
        Response {
            class: Class::Return,
            value,
            notifications,
        }
    }

    pub fn failure(message: impl ToString) -> Self {
        Response {
            class: Class::Failure,
            value: Value::String(message.to_string()),
            notifications: vec![],
        }
    }

    pub fn error(message: impl ToString) -> Self {
        Response {
            class: Class::Error,
            value: Value::String(message.to_string()),
            notifications: vec![],
        }
    }

    pub fn exception(message: impl ToString) -> Self {
        Response {
            class: Class::Exception,
            value: Value::String(message.to_string()),
            notifications: vec![],
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// A set of live buffers keyed by document name; requests within one
/// buffer are processed strictly in arrival order.
#[derive(Default)]
pub struct Session {
    buffers: HashMap<String, Buffer>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and dispatch one request line.
    pub fn dispatch_line(&mut self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.dispatch(request),
            Err(error) => Response::error(format!("invalid request: {error}")),
        }
    }

    pub fn dispatch(&mut self, request: Request) -> Response {
        debug!("dispatching {:?} for {}", request.command, request.document);
        let document = request.document.clone();
        let mut notifications = vec![];

        // any request carrying source text updates the buffer first; a
        // pass stopped by a non-parse failure aborts the request
        if let Some(source) = &request.source {
            match self.open_buffer(&document, &mut notifications) {
                Ok(buffer) => {
                    buffer.tell(source);
                    if let Some(message) = buffer.exception() {
                        let mut response = Response::exception(message);
                        response.notifications = notifications;
                        return response;
                    }
                }
                Err(response) => return response,
            }
        }

        let value = match &request.command {
            Command::Tell => {
                if request.source.is_some() {
                    Ok(json!(true))
                } else {
                    Err(Response::failure("tell requires a 'source' field"))
                }
            }
            Command::Outline => self.query(&document, |buffer| Ok(to_json(&buffer.outline()))),
            Command::TypeAtPos { position } => self.query(&document, |buffer| {
                match buffer.type_at(position.line, position.col) {
                    Some(ty) => Ok(json!({ "type": ty })),
                    None => Err(Response::failure("no type at this position")),
                }
            }),
            Command::CompletePrefix { prefix, .. } => self.query(&document, |buffer| {
                Ok(json!({ "entries": to_json(&buffer.completions(prefix)) }))
            }),
            Command::RefactorOpen { position, action } => self.query(&document, |buffer| {
                Ok(to_json(
                    &buffer.refactor_open(position.line, position.col, *action),
                ))
            }),
            Command::Errors => self.query(&document, |buffer| Ok(to_json(&buffer.errors()))),
            Command::DumpConfiguration => self.query(&document, |buffer| {
                Ok(buffer.config().map(to_json).unwrap_or(Value::Null))
            }),
            Command::Drop => {
                self.buffers.remove(&document);
                Ok(json!(true))
            }
        };

        match value {
            Ok(value) => Response::returned(value, notifications),
            Err(response) => response,
        }
    }

    fn query(
        &self,
        document: &str,
        run: impl FnOnce(&Buffer) -> Result<Value, Response>,
    ) -> Result<Value, Response> {
        match self.buffers.get(document) {
            Some(buffer) => run(buffer),
            None => Err(Response::failure(format!(
                "no buffer for document '{document}'"
            ))),
        }
    }

    /// Get or create the buffer for `document`, loading its project
    /// configuration on first contact.
    fn open_buffer(
        &mut self,
        document: &str,
        notifications: &mut Vec<String>,
    ) -> Result<&mut Buffer, Response> {
        if !self.buffers.contains_key(document) {
            let config = match ProjectConfig::find_for(Path::new(document)) {
                Some(path) => match ProjectConfig::load(&path, &FILE_CACHE) {
                    Ok((config, mut config_notifications)) => {
                        notifications.append(&mut config_notifications);
                        Some(config)
                    }
                    // a broken configuration rejects requests for this
                    // buffer; other buffers are unaffected
                    Err(error) => return Err(Response::error(error)),
                },
                None => None,
            };
            self.buffers
                .insert(document.to_string(), Buffer::with_config(config));
        }
        Ok(self
            .buffers
            .get_mut(document)
            .expect("buffer was just inserted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(session: &mut Session, request: Value) -> Response {
        session.dispatch_line(&request.to_string())
    }

    #[test]
    fn test_tell_then_outline() {
        let mut session = Session::new();

        let told = dispatch(
            &mut session,
            json!({"command": "tell", "document": "a", "source": "let u = ()"}),
        );
        assert_eq!(told.class, Class::Return);

        let outlined = dispatch(&mut session, json!({"command": "outline", "document": "a"}));
        assert_eq!(outlined.class, Class::Return);
        let value = outlined.value.as_array().unwrap();
        assert_eq!(value.len(), 1);
        assert_eq!(value[0]["name"], "u");
        assert_eq!(value[0]["kind"], "Value");
        assert_eq!(value[0]["type"], "unit");
    }

    #[test]
    fn test_one_shot_request_with_inline_source() {
        let mut session = Session::new();
        let response = dispatch(
            &mut session,
            json!({
                "command": "type-at-pos",
                "source": "let a = 1",
                "position": {"line": 1, "col": 4}
            }),
        );
        assert_eq!(response.class, Class::Return);
        assert_eq!(response.value["type"], "int");
    }

    #[test]
    fn test_query_without_buffer_fails() {
        let mut session = Session::new();
        let response = dispatch(&mut session, json!({"command": "outline", "document": "x"}));
        assert_eq!(response.class, Class::Failure);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let mut session = Session::new();
        let response = session.dispatch_line("{nope");
        assert_eq!(response.class, Class::Error);
    }

    #[test]
    fn test_buffers_are_independent() {
        let mut session = Session::new();
        dispatch(
            &mut session,
            json!({"command": "tell", "document": "a", "source": "let u = ()"}),
        );
        dispatch(
            &mut session,
            json!({"command": "tell", "document": "b", "source": "let v = 1"}),
        );

        let a = dispatch(&mut session, json!({"command": "outline", "document": "a"}));
        let b = dispatch(&mut session, json!({"command": "outline", "document": "b"}));
        assert_eq!(a.value[0]["name"], "u");
        assert_eq!(b.value[0]["name"], "v");
    }

    #[test]
    fn test_blown_recursion_guard_is_an_exception() {
        let mut session = Session::new();
        let source = format!("let a = {}1{}", "(".repeat(600), ")".repeat(600));

        let told = dispatch(
            &mut session,
            json!({"command": "tell", "document": "a", "source": source}),
        );
        assert_eq!(told.class, Class::Exception);
        assert!(told.value.as_str().unwrap().contains("nests too deeply"));

        // the buffer is kept; the caller may still inspect what was analyzed
        let errors = dispatch(&mut session, json!({"command": "errors", "document": "a"}));
        assert_eq!(errors.class, Class::Return);
        let reports = errors.value.as_array().unwrap();
        assert!(reports.iter().any(|report| report["kind"] == "exception"));
    }

    #[test]
    fn test_drop_discards_buffer() {
        let mut session = Session::new();
        dispatch(
            &mut session,
            json!({"command": "tell", "document": "a", "source": "let u = ()"}),
        );
        dispatch(&mut session, json!({"command": "drop", "document": "a"}));
        let response = dispatch(&mut session, json!({"command": "outline", "document": "a"}));
        assert_eq!(response.class, Class::Failure);
    }
}
