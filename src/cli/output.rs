//! Output formatting for CLI commands

use serde::Serialize;
use serde_json::Value;

/// Output context for consistent formatting across commands
///
/// Every command answers with a `{success, data}` or `{success, error}`
/// envelope on stdout.
#[derive(Debug, Clone)]
pub struct OutputContext {
    pretty: bool,
}

impl OutputContext {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn success<T: Serialize>(data: T) -> Value {
        serde_json::json!({
            "success": true,
            "data": data
        })
    }

    pub fn error(message: &str) -> Value {
        serde_json::json!({
            "success": false,
            "error": message
        })
    }

    /// Print a successful response
    pub fn print_success<T: Serialize>(&self, data: T) {
        self.print_json(&Self::success(data));
    }

    /// Print an error response
    pub fn print_error(&self, message: &str) {
        self.print_json(&Self::error(message));
    }

    fn print_json(&self, value: &Value) {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        match rendered {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to serialize output: {e}"),
        }
    }
}
