//! Result of a unit of work run through `Engine::with_transaction`.

use crate::types::Value;
use std::any::Any;
use std::fmt;

/// What happened to a unit of work.
///
/// Exactly one of these holds:
///
/// - `success` with no `error` and no `panic`: the unit committed;
/// - `error` set: the action (or commit) failed and the unit was rolled back;
/// - `panic` set: the action panicked and the unit was rolled back.
///
/// `result` carries the session's `"result"` attribute when one was set,
/// whichever way the unit ended.
pub struct Outcome {
    pub success: bool,
    pub error: Option<eyre::Report>,
    pub panic: Option<String>,
    pub result: Option<Value>,
}

impl Outcome {
    pub(crate) fn committed(result: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            panic: None,
            result,
        }
    }

    pub(crate) fn failed(error: eyre::Report, result: Option<Value>) -> Self {
        Self {
            success: false,
            error: Some(error),
            panic: None,
            result,
        }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>, result: Option<Value>) -> Self {
        Self {
            success: false,
            error: None,
            panic: Some(panic_message(payload.as_ref())),
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Converts into a `Result`, turning a panic message into an error.
    pub fn into_result(self) -> eyre::Result<Option<Value>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if let Some(msg) = self.panic {
            return Err(eyre::eyre!("unit of work panicked: {}", msg));
        }
        Ok(self.result)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("success", &self.success)
            .field("error", &self.error.as_ref().map(|e| format!("{:#}", e)))
            .field("panic", &self.panic)
            .field("result", &self.result)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
